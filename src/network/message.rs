use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::node::NodeAddress;
use crate::membership::view::View;
use crate::news::item::NewsItem;

/*
    Every message is point-to-point and fire-and-forget. The transport may
    lose or reorder datagrams but does not corrupt or duplicate them; all
    retries happen at the protocol level on the next timer period.
*/

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] bincode::Error),
    #[error("failed to decode envelope: {0}")]
    Decode(#[source] bincode::Error),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Message {
    HeartbeatRequest,
    HeartbeatReply,
    Election(ElectionRequest),
    Vote(Vote),
    LeaderUpdate(LeaderUpdate),
    LeaderPullRequest,
    Content(NewsItem),
    PullRequest(PullRequest),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElectionRequest {
    pub candidate: NodeAddress,
    pub view: View,
    pub epoch: u64,
}

/// A vote for the candidacy identified by `epoch` on the receiving candidate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub epoch: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeaderUpdate {
    pub leader: NodeAddress,
    /// Epoch in which `leader` won.
    pub epoch: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub expected: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub from: NodeAddress,
    pub to: NodeAddress,
    pub message: Message,
}

impl Envelope {
    pub fn new(from: NodeAddress, to: NodeAddress, message: Message) -> Self {
        Envelope { from, to, message }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(self).map_err(CodecError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        bincode::deserialize(bytes).map_err(CodecError::Decode)
    }
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::HeartbeatRequest => "heartbeat-request",
            Message::HeartbeatReply => "heartbeat-reply",
            Message::Election(_) => "election",
            Message::Vote(_) => "vote",
            Message::LeaderUpdate(_) => "leader-update",
            Message::LeaderPullRequest => "leader-pull-request",
            Message::Content(_) => "content",
            Message::PullRequest(_) => "pull-request",
        }
    }
}
