use std::time::Duration;

use crate::network::message::Message;
use crate::network::node::NodeAddress;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum TimerKind {
    FailureCheck,
    LeaderPull,
    NewsPull,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum TimerCmd {
    /// First fire after `after`, then every `period`. Replaces any pending
    /// timer of the same kind.
    Schedule {
        kind: TimerKind,
        after: Duration,
        period: Duration,
    },
    Cancel(TimerKind),
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum LeaderEvent {
    Elected(NodeAddress),
    Lost(NodeAddress),
}

/// Node-internal events passed between processors. Routing is one-way:
/// the detector reports to election, election reports to news and detector.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Indication {
    Watch(NodeAddress),
    Suspect(NodeAddress),
    Restore(NodeAddress),
    Leader(LeaderEvent),
}

/// Everything a processor wants done as the result of handling one event.
#[derive(Debug, Default)]
pub struct Effects {
    pub outbound: Vec<(NodeAddress, Message)>,
    pub timers: Vec<TimerCmd>,
    pub indications: Vec<Indication>,
}

impl Effects {
    pub fn new() -> Self {
        Effects::default()
    }

    pub fn send(&mut self, to: NodeAddress, message: Message) {
        self.outbound.push((to, message));
    }

    pub fn broadcast<'a>(&mut self, to: impl IntoIterator<Item = &'a NodeAddress>, message: Message) {
        for address in to {
            self.outbound.push((*address, message.clone()));
        }
    }

    pub fn schedule(&mut self, kind: TimerKind, after: Duration, period: Duration) {
        self.timers.push(TimerCmd::Schedule { kind, after, period });
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        self.timers.push(TimerCmd::Cancel(kind));
    }

    pub fn indicate(&mut self, indication: Indication) {
        self.indications.push(indication);
    }

    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty() && self.timers.is_empty() && self.indications.is_empty()
    }

    /// Messages sent to `to`, in order.
    pub fn sent_to(&self, to: &NodeAddress) -> Vec<&Message> {
        self.outbound
            .iter()
            .filter(|(address, _)| address == to)
            .map(|(_, message)| message)
            .collect()
    }
}
