use std::time::Duration;

use tracing::{debug, info};

use crate::common::config::DetectorConfig;
use crate::network::message::Message;
use crate::network::node::NodeAddress;
use crate::node::effects::{Effects, Indication, TimerKind};

/*
    Eventually perfect failure detector over a single target.

    Strong completeness: a target that stops answering is suspected on the
    first tick without a reply and stays suspected.
    Eventual strong accuracy: every false suspicion widens the tick period by
    a fixed increment, so once the network delay is bounded the period
    outgrows it and the target is never suspected again. The widened period
    survives a new watch.
*/

pub struct FailureDetector {
    state: DetectorState,
    restores: u64,
    suspicions: u64,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct DetectorState {
    pub target: Option<NodeAddress>,
    pub delay: Duration,
    pub delta_delay: Duration,
    pub replied_since_last_tick: bool,
    pub suspected: bool,
}

impl FailureDetector {
    pub fn new(config: DetectorConfig) -> Self {
        let state = DetectorState {
            target: None,
            delay: config.initial_delay(),
            delta_delay: config.delay_increment(),
            replied_since_last_tick: false,
            suspected: false,
        };
        FailureDetector {
            state,
            restores: 0,
            suspicions: 0,
        }
    }

    pub fn state(&self) -> &DetectorState {
        &self.state
    }

    pub fn suspicions(&self) -> u64 {
        self.suspicions
    }

    pub fn restores(&self) -> u64 {
        self.restores
    }

    pub fn watch(&mut self, target: NodeAddress, fx: &mut Effects) {
        if self.state.target.is_some() {
            fx.cancel(TimerKind::FailureCheck);
        }
        debug!("watching {}", target);
        self.state.target = Some(target);
        self.state.replied_since_last_tick = true;
        self.state.suspected = false;
        fx.schedule(TimerKind::FailureCheck, Duration::ZERO, self.state.delay);
    }

    pub fn on_tick(&mut self, fx: &mut Effects) {
        let Some(target) = self.state.target else {
            return;
        };

        if !self.state.replied_since_last_tick && !self.state.suspected {
            self.state.suspected = true;
            self.suspicions += 1;
            info!("suspecting {}", target);
            fx.indicate(Indication::Suspect(target));
        } else if self.state.replied_since_last_tick && self.state.suspected {
            self.state.suspected = false;
            self.restores += 1;
            self.state.delay += self.state.delta_delay;
            info!("restoring {}, probe period now {:?}", target, self.state.delay);
            fx.indicate(Indication::Restore(target));
            fx.cancel(TimerKind::FailureCheck);
            fx.schedule(TimerKind::FailureCheck, self.state.delay, self.state.delay);
        }

        self.state.replied_since_last_tick = false;
        fx.send(target, Message::HeartbeatRequest);
    }

    pub fn on_heartbeat_request(&self, from: NodeAddress, fx: &mut Effects) {
        fx.send(from, Message::HeartbeatReply);
    }

    pub fn on_heartbeat_reply(&mut self, from: NodeAddress) {
        if self.state.target == Some(from) {
            self.state.replied_since_last_tick = true;
        }
    }
}
