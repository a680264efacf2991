use std::collections::HashSet;
use std::sync::Arc;

use rand::seq::SliceRandom;
use tracing::{debug, info};

use super::stability::StabilityGate;
use crate::common::config::ElectionConfig;
use crate::membership::sample::NeighborSample;
use crate::membership::view::{View, ViewComparator};
use crate::network::message::{ElectionRequest, LeaderUpdate, Message, Vote};
use crate::network::node::NodeAddress;
use crate::node::effects::{Effects, Indication, LeaderEvent, TimerKind};

/*
    Leader election over a ranked, shifting neighborhood.

    A node only stands when its neighborhood has been stable for a number of
    rounds, no leader is known, and no neighbor outranks it. The candidate
    snapshots its neighbors as the quorum and wins on a strict majority of
    that snapshot. Winners are spread by push (re-broadcast on first sight)
    and by pull (periodic query to a finger).

    Every announcement carries the epoch the winner stood in, and a node only
    moves forward in (epoch, identity) order. A stale winner can therefore
    not displace a newer one. Every adoption moves a node up that order, so
    each node relays only finitely often and announcements die out. A leader this node suspected is refused
    until it is restored or speaks for itself.

    The quorum is local to the candidate: two candidates with disjoint
    neighborhoods can both win under partition or fast churn. Nothing here
    prevents that.
*/

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ElectionRole {
    Unstable,
    Stable,
    Candidate,
    Leader,
    Follower,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ElectionState {
    pub current_leader: Option<NodeAddress>,
    pub is_candidate: bool,
    pub vote_token: bool,
    pub quorum: Vec<NodeAddress>,
    pub received_votes: usize,
    pub epoch: u64,
    /// Epoch of the current leader, kept after the leader is lost.
    pub leader_epoch: u64,
    /// Highest epoch seen in any election or announcement.
    pub highest_epoch: u64,
    voters: HashSet<NodeAddress>,
}

impl ElectionState {
    fn new() -> Self {
        ElectionState {
            current_leader: None,
            is_candidate: false,
            vote_token: true,
            quorum: Vec::new(),
            received_votes: 0,
            epoch: 0,
            leader_epoch: 0,
            highest_epoch: 0,
            voters: HashSet::new(),
        }
    }
}

pub struct ElectionProcessor {
    self_addr: NodeAddress,
    config: ElectionConfig,
    comparator: Arc<dyn ViewComparator>,
    gate: StabilityGate,
    sample: NeighborSample,
    local_view: View,
    state: ElectionState,
    watching: Option<NodeAddress>,
    suspected: Option<NodeAddress>,
    cooling_down: bool,
    candidacies: u64,
    wins: u64,
}

impl ElectionProcessor {
    pub fn new(self_addr: NodeAddress, config: ElectionConfig, comparator: Arc<dyn ViewComparator>) -> Self {
        let gate = StabilityGate::new(config.stability_rounds, config.disparity_threshold);
        ElectionProcessor {
            self_addr,
            config,
            comparator,
            gate,
            sample: NeighborSample::default(),
            local_view: View::new(self_addr.id, 0),
            state: ElectionState::new(),
            watching: None,
            suspected: None,
            cooling_down: false,
            candidacies: 0,
            wins: 0,
        }
    }

    pub fn state(&self) -> &ElectionState {
        &self.state
    }

    pub fn leader(&self) -> Option<NodeAddress> {
        self.state.current_leader
    }

    pub fn is_leader(&self) -> bool {
        self.state.current_leader == Some(self.self_addr)
    }

    pub fn candidacies(&self) -> u64 {
        self.candidacies
    }

    pub fn wins(&self) -> u64 {
        self.wins
    }

    pub fn max_rounds_to_stable(&self) -> u32 {
        self.gate.max_rounds_to_stable()
    }

    pub fn role(&self) -> ElectionRole {
        match self.state.current_leader {
            Some(leader) if leader == self.self_addr => ElectionRole::Leader,
            Some(_) => ElectionRole::Follower,
            None if self.state.is_candidate => ElectionRole::Candidate,
            None if self.gate.is_stable() => ElectionRole::Stable,
            None => ElectionRole::Unstable,
        }
    }

    pub fn start(&mut self, fx: &mut Effects) {
        let period = self.config.leader_pull_period();
        fx.schedule(TimerKind::LeaderPull, period, period);
    }

    pub fn on_sample(&mut self, sample: NeighborSample, local_view: View, fx: &mut Effects) {
        self.local_view = local_view;
        let stable = self.gate.observe(&sample.addresses());
        self.sample = sample;

        if !stable {
            debug!("neighborhood not stable ({} qualifying rounds)", self.gate.consecutive());
            return;
        }
        if self.state.current_leader.is_some() {
            return;
        }

        let outranked = self
            .sample
            .neighbors
            .iter()
            .any(|(_, view)| self.comparator.outranks(view, &self.local_view));
        if outranked {
            debug!("a neighbor outranks us, abstaining");
            if !self.cooling_down {
                self.pull_leader(fx);
            }
            return;
        }

        self.start_candidacy(fx);
    }

    fn start_candidacy(&mut self, fx: &mut Effects) {
        self.state.epoch = self.state.epoch.max(self.state.highest_epoch) + 1;
        self.state.highest_epoch = self.state.epoch;
        self.state.quorum = self.sample.addresses();
        self.state.received_votes = 0;
        self.state.voters.clear();
        self.state.is_candidate = true;
        self.candidacies += 1;
        info!(
            "standing for election, epoch {} with a quorum of {}",
            self.state.epoch,
            self.state.quorum.len()
        );

        let request = ElectionRequest {
            candidate: self.self_addr,
            view: self.local_view,
            epoch: self.state.epoch,
        };
        fx.broadcast(&self.state.quorum, Message::Election(request));
    }

    pub fn on_election(&mut self, from: NodeAddress, request: ElectionRequest, fx: &mut Effects) {
        self.state.highest_epoch = self.state.highest_epoch.max(request.epoch);
        if self.state.current_leader.is_some() && !self.state.vote_token {
            debug!("refusing vote to {}: leader known and token spent", request.candidate);
            return;
        }
        self.state.vote_token = false;
        debug!("voting for {} (epoch {})", request.candidate, request.epoch);
        fx.send(from, Message::Vote(Vote { epoch: request.epoch }));
    }

    pub fn on_vote(&mut self, from: NodeAddress, vote: Vote, fx: &mut Effects) {
        if !self.state.is_candidate || vote.epoch != self.state.epoch {
            return;
        }
        if !self.state.quorum.contains(&from) || !self.state.voters.insert(from) {
            return;
        }
        self.state.received_votes += 1;

        if self.state.received_votes > self.state.quorum.len() / 2 {
            self.win(fx);
        }
    }

    fn win(&mut self, fx: &mut Effects) {
        self.state.is_candidate = false;
        self.state.current_leader = Some(self.self_addr);
        self.state.leader_epoch = self.state.epoch;
        self.suspected = None;
        self.cooling_down = false;
        self.wins += 1;
        info!(
            "elected leader with {} of {} votes (epoch {})",
            self.state.received_votes,
            self.state.quorum.len(),
            self.state.epoch
        );

        let update = LeaderUpdate {
            leader: self.self_addr,
            epoch: self.state.epoch,
        };
        fx.broadcast(self.sample.addresses().iter(), Message::LeaderUpdate(update));
        fx.cancel(TimerKind::LeaderPull);
        fx.indicate(Indication::Leader(LeaderEvent::Elected(self.self_addr)));
    }

    pub fn on_leader_update(&mut self, from: NodeAddress, update: LeaderUpdate, fx: &mut Effects) {
        let leader = update.leader;
        self.state.highest_epoch = self.state.highest_epoch.max(update.epoch);
        if from == leader && self.suspected == Some(leader) {
            debug!("{} speaks for itself again", leader);
            self.suspected = None;
        }

        if self.supersedes(&update) {
            info!("adopting leader {} of epoch {} (via {})", leader, update.epoch, from);
            if self.is_leader() {
                info!("stepping down for {}", leader);
                let period = self.config.leader_pull_period();
                fx.schedule(TimerKind::LeaderPull, period, period);
            }
            self.state.current_leader = Some(leader);
            self.state.leader_epoch = update.epoch;
            self.state.vote_token = true;
            self.state.is_candidate = false;
            self.suspected = None;
            self.cooling_down = false;

            let relay: Vec<NodeAddress> = self
                .sample
                .addresses()
                .into_iter()
                .filter(|address| *address != from && *address != leader)
                .collect();
            fx.broadcast(&relay, Message::LeaderUpdate(update));
            fx.indicate(Indication::Leader(LeaderEvent::Elected(leader)));
        } else if self.state.current_leader == Some(leader) && update.epoch > self.state.leader_epoch {
            self.state.leader_epoch = update.epoch;
        }

        if from == leader && self.state.current_leader == Some(leader) && self.watching != Some(leader) {
            self.watching = Some(leader);
            fx.indicate(Indication::Watch(leader));
            fx.cancel(TimerKind::LeaderPull);
        }
    }

    /// Whether `update` should replace what this node follows. Leaders are
    /// ordered by epoch, then by identity with the smaller one first.
    fn supersedes(&self, update: &LeaderUpdate) -> bool {
        if update.leader == self.self_addr {
            return false;
        }
        let epoch = self.state.leader_epoch;
        match self.state.current_leader {
            Some(current) if current == update.leader => false,
            Some(current) => {
                update.epoch > epoch || (update.epoch == epoch && update.leader.id < current.id)
            }
            None if self.suspected == Some(update.leader) => false,
            None => update.epoch >= epoch,
        }
    }

    pub fn on_leader_pull_request(&self, from: NodeAddress, fx: &mut Effects) {
        let Some(leader) = self.state.current_leader else {
            return;
        };
        debug!("answering leader pull from {}", from);
        let update = LeaderUpdate {
            leader,
            epoch: self.state.leader_epoch,
        };
        fx.send(from, Message::LeaderUpdate(update));
    }

    pub fn on_pull_timer(&mut self, fx: &mut Effects) {
        self.cooling_down = false;
        if self.is_leader() {
            return;
        }
        self.pull_leader(fx);
    }

    fn pull_leader(&self, fx: &mut Effects) {
        let finger = self
            .sample
            .fingers
            .iter()
            .filter(|finger| **finger != self.self_addr)
            .collect::<Vec<_>>()
            .choose(&mut rand::thread_rng())
            .copied()
            .copied();
        if let Some(finger) = finger {
            debug!("pulling leader from finger {}", finger);
            fx.send(finger, Message::LeaderPullRequest);
        }
    }

    pub fn on_suspect(&mut self, suspected: NodeAddress, fx: &mut Effects) {
        if self.state.current_leader != Some(suspected) {
            return;
        }
        info!("leader {} suspected, clearing", suspected);
        self.state.current_leader = None;
        self.state.vote_token = true;
        self.watching = None;
        self.suspected = Some(suspected);
        self.cooling_down = true;

        let cooldown = self.config.leader_pull_cooldown();
        fx.schedule(TimerKind::LeaderPull, cooldown, self.config.leader_pull_period());
        fx.indicate(Indication::Leader(LeaderEvent::Lost(suspected)));
    }

    pub fn on_restore(&mut self, restored: NodeAddress) {
        debug!("{} answers again", restored);
        if self.suspected == Some(restored) {
            self.suspected = None;
        }
    }
}
