use std::collections::VecDeque;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{self, Receiver, Sender, UnboundedReceiver};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use super::effects::{Effects, Indication, TimerKind};
use super::stats::NodeStats;
use super::timers::Timers;
use crate::common::config::Config;
use crate::detector::processor::FailureDetector;
use crate::election::processor::ElectionProcessor;
use crate::membership::sample::NeighborSample;
use crate::membership::view::{View, ViewComparator};
use crate::network::message::{Envelope, Message};
use crate::network::node::NodeAddress;
use crate::network::{Datagram, Transport};
use crate::news::processor::NewsProcessor;

const COMMAND_CAPACITY: usize = 256;
const SAMPLE_CAPACITY: usize = 8;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("node {0} has stopped")]
    Stopped(NodeAddress),
}

pub enum Command {
    Publish(String),
    Snapshot(oneshot::Sender<Vec<String>>),
    Shutdown,
}

/// One node: a single task that owns all three processors and handles one
/// event at a time, so processor state needs no locking.
pub struct Node {
    address: NodeAddress,
    transport: Arc<dyn Transport>,
    detector: FailureDetector,
    election: ElectionProcessor,
    news: NewsProcessor,
    timers: Timers,
    inbox: UnboundedReceiver<Datagram>,
    samples: Receiver<NeighborSample>,
    commands: Receiver<Command>,
    leader_tx: watch::Sender<Option<NodeAddress>>,
    view_tx: watch::Sender<View>,
    stats_tx: watch::Sender<NodeStats>,
}

pub struct NodeHandle {
    address: NodeAddress,
    commands: Sender<Command>,
    samples: Sender<NeighborSample>,
    leader_rx: watch::Receiver<Option<NodeAddress>>,
    view_rx: watch::Receiver<View>,
    stats_rx: watch::Receiver<NodeStats>,
    task: JoinHandle<()>,
}

impl Node {
    pub fn spawn(
        address: NodeAddress,
        config: Config,
        comparator: Arc<dyn ViewComparator>,
        transport: Arc<dyn Transport>,
        inbox: UnboundedReceiver<Datagram>,
    ) -> NodeHandle {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (samples_tx, samples_rx) = mpsc::channel(SAMPLE_CAPACITY);
        let (leader_tx, leader_rx) = watch::channel(None);
        let (view_tx, view_rx) = watch::channel(View::new(address.id, 0));
        let (stats_tx, stats_rx) = watch::channel(NodeStats::default());

        let node = Node {
            address,
            transport,
            detector: FailureDetector::new(config.detector),
            election: ElectionProcessor::new(address, config.election, comparator.clone()),
            news: NewsProcessor::new(address, config.news, comparator),
            timers: Timers::new(),
            inbox,
            samples: samples_rx,
            commands: commands_rx,
            leader_tx,
            view_tx,
            stats_tx,
        };

        let span = info_span!("node", id = %address.id);
        let task = tokio::spawn(node.run().instrument(span));

        NodeHandle {
            address,
            commands: commands_tx,
            samples: samples_tx,
            leader_rx,
            view_rx,
            stats_rx,
            task,
        }
    }

    async fn run(mut self) {
        info!("starting at {}", self.address.endpoint);
        let mut fx = Effects::new();
        self.election.start(&mut fx);
        self.news.start(&mut fx);
        self.apply(fx);

        loop {
            let mut fx = Effects::new();
            tokio::select! {
                Some(bytes) = self.inbox.recv() => self.on_datagram(&bytes, &mut fx),
                Some(sample) = self.samples.recv() => self.on_sample(sample, &mut fx),
                command = self.commands.recv() => match command {
                    Some(Command::Publish(title)) => self.news.publish(title, &mut fx),
                    Some(Command::Snapshot(reply)) => {
                        let _ = reply.send(self.news.log().titles());
                    }
                    Some(Command::Shutdown) | None => break,
                },
                kind = self.timers.next() => self.on_timer(kind, &mut fx),
            }
            self.apply(fx);
            self.publish_state();
        }

        info!("stopped with {} committed items", self.news.log().len());
    }

    fn on_datagram(&mut self, bytes: &[u8], fx: &mut Effects) {
        let envelope = match Envelope::decode(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("{}", e);
                return;
            }
        };
        if envelope.to != self.address {
            debug!("misrouted {} for {}", envelope.message.kind(), envelope.to);
            return;
        }

        let from = envelope.from;
        match envelope.message {
            Message::HeartbeatRequest => self.detector.on_heartbeat_request(from, fx),
            Message::HeartbeatReply => self.detector.on_heartbeat_reply(from),
            Message::Election(request) => self.election.on_election(from, request, fx),
            Message::Vote(vote) => self.election.on_vote(from, vote, fx),
            Message::LeaderUpdate(update) => self.election.on_leader_update(from, update, fx),
            Message::LeaderPullRequest => self.election.on_leader_pull_request(from, fx),
            Message::Content(item) => self.news.on_content(from, item, fx),
            Message::PullRequest(request) => self.news.on_pull_request(from, request, fx),
        }
    }

    fn on_sample(&mut self, mut sample: NeighborSample, fx: &mut Effects) {
        let address = self.address;
        sample.neighbors.retain(|(neighbor, _)| *neighbor != address);
        sample.fingers.retain(|finger| *finger != address);

        self.news.on_sample(&sample);
        let local_view = self.news.view();
        self.election.on_sample(sample, local_view, fx);
    }

    fn on_timer(&mut self, kind: TimerKind, fx: &mut Effects) {
        match kind {
            TimerKind::FailureCheck => self.detector.on_tick(fx),
            TimerKind::LeaderPull => self.election.on_pull_timer(fx),
            TimerKind::NewsPull => self.news.on_pull_timer(fx),
        }
    }

    /// Carries out effects, routing indications until none are left.
    fn apply(&mut self, mut fx: Effects) {
        let mut indications = VecDeque::new();
        loop {
            for (to, message) in fx.outbound.drain(..) {
                self.transport.send(Envelope::new(self.address, to, message));
            }
            for cmd in fx.timers.drain(..) {
                self.timers.apply(cmd);
            }
            indications.extend(fx.indications.drain(..));

            let Some(indication) = indications.pop_front() else {
                break;
            };
            self.dispatch(indication, &mut fx);
        }
    }

    fn dispatch(&mut self, indication: Indication, fx: &mut Effects) {
        match indication {
            Indication::Watch(target) => self.detector.watch(target, fx),
            Indication::Suspect(target) => self.election.on_suspect(target, fx),
            Indication::Restore(target) => self.election.on_restore(target),
            Indication::Leader(event) => self.news.on_leader(event, fx),
        }
    }

    fn publish_state(&self) {
        publish(&self.leader_tx, self.election.leader());
        publish(&self.view_tx, self.news.view());
        publish(
            &self.stats_tx,
            NodeStats {
                leader: self.election.leader(),
                committed: self.news.log().len(),
                pending: self.news.pending_len(),
                outbox: self.news.outbox_len(),
                suspicions: self.detector.suspicions(),
                restores: self.detector.restores(),
                candidacies: self.election.candidacies(),
                wins: self.election.wins(),
                max_rounds_to_stable: self.election.max_rounds_to_stable(),
            },
        );
    }
}

fn publish<T: PartialEq>(tx: &watch::Sender<T>, value: T) {
    tx.send_if_modified(|current| {
        if *current == value {
            return false;
        }
        *current = value;
        true
    });
}

impl NodeHandle {
    pub fn address(&self) -> NodeAddress {
        self.address
    }

    pub async fn publish(&self, title: impl Into<String>) -> Result<(), NodeError> {
        self.commands
            .send(Command::Publish(title.into()))
            .await
            .map_err(|_| NodeError::Stopped(self.address))
    }

    /// Titles of the committed log, in sequence order.
    pub async fn snapshot(&self) -> Result<Vec<String>, NodeError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Snapshot(tx))
            .await
            .map_err(|_| NodeError::Stopped(self.address))?;
        rx.await.map_err(|_| NodeError::Stopped(self.address))
    }

    /// Hands a sample to the node. A sample that finds the queue full is
    /// dropped; the sampler sends a fresh one next period.
    pub fn offer_sample(&self, sample: NeighborSample) -> Result<(), NodeError> {
        match self.samples.try_send(sample) {
            Ok(()) | Err(TrySendError::Full(_)) => Ok(()),
            Err(TrySendError::Closed(_)) => Err(NodeError::Stopped(self.address)),
        }
    }

    pub fn leader(&self) -> Option<NodeAddress> {
        *self.leader_rx.borrow()
    }

    pub fn subscribe_leader(&self) -> watch::Receiver<Option<NodeAddress>> {
        self.leader_rx.clone()
    }

    pub fn view(&self) -> View {
        *self.view_rx.borrow()
    }

    pub fn stats(&self) -> NodeStats {
        self.stats_rx.borrow().clone()
    }

    pub async fn shutdown(self) -> Result<(), NodeError> {
        let address = self.address;
        // The task may already be gone; joining below covers both cases.
        let _ = self.commands.send(Command::Shutdown).await;
        self.task.await.map_err(|_| NodeError::Stopped(address))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::common::crypto::Pubkey;
    use crate::membership::view::ScoreRanking;
    use crate::network::memory::MemoryNetwork;

    fn address(id: u8) -> NodeAddress {
        NodeAddress::new(Pubkey { key: [id; 32] }, format!("127.0.0.1:{}", 5000 + id as u16).parse().unwrap())
    }

    fn spawn(network: &MemoryNetwork, id: u8) -> NodeHandle {
        let inbox = network.register(address(id));
        Node::spawn(
            address(id),
            Config::default(),
            Arc::new(ScoreRanking),
            Arc::new(network.clone()),
            inbox,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_answers_heartbeats_over_the_network() {
        let network = MemoryNetwork::new(0.0);
        let node = spawn(&network, 1);
        let mut probe = network.register(address(9));

        network.send(Envelope::new(address(9), address(1), Message::HeartbeatRequest));

        let bytes = probe.recv().await.unwrap();
        let reply = Envelope::decode(&bytes).unwrap();
        assert_eq!(reply.from, address(1));
        assert_eq!(reply.message, Message::HeartbeatReply);
        node.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_leader_announcement_drives_news_and_detector() {
        let network = MemoryNetwork::new(0.0);
        let node = spawn(&network, 2);
        let mut leader = network.register(address(1));
        let mut leader_rx = node.subscribe_leader();

        node.publish("scoop").await.unwrap();
        network.send(Envelope::new(
            address(1),
            address(2),
            Message::LeaderUpdate(crate::network::message::LeaderUpdate { leader: address(1), epoch: 1 }),
        ));

        leader_rx.changed().await.unwrap();
        assert_eq!(node.leader(), Some(address(1)));

        // The buffered item goes to the leader, and the detector starts probing it
        let mut saw_content = false;
        let mut saw_probe = false;
        while !(saw_content && saw_probe) {
            let envelope = Envelope::decode(&leader.recv().await.unwrap()).unwrap();
            match envelope.message {
                Message::Content(item) => {
                    assert_eq!(item.title, "scoop");
                    saw_content = true;
                }
                Message::HeartbeatRequest => saw_probe = true,
                _ => {}
            }
        }

        // Leader commits and pushes back
        network.send(Envelope::new(
            address(1),
            address(2),
            Message::Content(crate::news::item::NewsItem::sequenced("scoop", 0)),
        ));
        // Inbox and commands race inside the loop, so poll until the commit lands
        let mut titles = node.snapshot().await.unwrap();
        while titles.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
            titles = node.snapshot().await.unwrap();
        }
        assert_eq!(titles, vec!["scoop".to_string()]);
        assert_eq!(node.view().score, 1);
        assert_eq!(node.stats().outbox, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_leader_is_suspected_and_cleared() {
        let network = MemoryNetwork::new(0.0);
        let node = spawn(&network, 2);
        let _leader = network.register(address(1));
        let mut leader_rx = node.subscribe_leader();

        network.send(Envelope::new(
            address(1),
            address(2),
            Message::LeaderUpdate(crate::network::message::LeaderUpdate { leader: address(1), epoch: 1 }),
        ));
        leader_rx.changed().await.unwrap();
        assert_eq!(*leader_rx.borrow(), Some(address(1)));

        // The leader never answers heartbeats
        tokio::time::timeout(Duration::from_secs(10), leader_rx.changed())
            .await
            .expect("leader should be suspected")
            .unwrap();

        assert_eq!(node.leader(), None);
        assert_eq!(node.stats().suspicions, 1);
    }

    #[tokio::test]
    async fn test_commands_fail_after_shutdown() {
        let network = MemoryNetwork::new(0.0);
        let node = spawn(&network, 3);
        let commands = node.commands.clone();

        node.shutdown().await.unwrap();

        assert!(commands.send(Command::Publish("late".into())).await.is_err());
    }
}
