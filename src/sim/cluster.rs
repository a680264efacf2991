use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{info, info_span, warn, Instrument};

use super::sampler::GradientSampler;
use crate::common::config::Config;
use crate::common::crypto::Pubkey;
use crate::membership::view::{ScoreRanking, ViewComparator};
use crate::network::memory::MemoryNetwork;
use crate::network::node::NodeAddress;
use crate::node::runtime::{Node, NodeError, NodeHandle};
use crate::node::stats::{ClusterSummary, NodeStats};

const BASE_PORT: u16 = 7000;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub nodes: usize,
    pub neighbors: usize,
    pub fingers: usize,
    pub sample_period_ms: u64,
    pub loss_rate: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            nodes: 10,
            neighbors: 4,
            fingers: 2,
            sample_period_ms: 1000,
            loss_rate: 0.0,
        }
    }
}

impl SimulationConfig {
    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_ms.clamp(1, 24 * 60 * 60 * 1000))
    }
}

/// A set of nodes wired through one in-memory network and fed by one
/// gradient sampler.
pub struct Cluster {
    network: MemoryNetwork,
    addresses: Vec<NodeAddress>,
    nodes: Arc<RwLock<BTreeMap<Pubkey, NodeHandle>>>,
    sampler: JoinHandle<()>,
}

impl Cluster {
    pub fn start(simulation: SimulationConfig, config: Config) -> Self {
        Self::start_with(simulation, config, Arc::new(ScoreRanking))
    }

    pub fn start_with(simulation: SimulationConfig, config: Config, comparator: Arc<dyn ViewComparator>) -> Self {
        let network = MemoryNetwork::new(simulation.loss_rate);
        let transport = Arc::new(network.clone());

        let mut addresses = Vec::with_capacity(simulation.nodes);
        let mut nodes = BTreeMap::new();
        for i in 0..simulation.nodes {
            let port = BASE_PORT.saturating_add(i as u16);
            let address = NodeAddress::new(Pubkey::generate(), SocketAddr::from(([127, 0, 0, 1], port)));
            let inbox = network.register(address);
            let handle = Node::spawn(address, config.clone(), comparator.clone(), transport.clone(), inbox);
            addresses.push(address);
            nodes.insert(address.id, handle);
        }
        info!("started {} nodes", addresses.len());

        let nodes = Arc::new(RwLock::new(nodes));
        let sampler = GradientSampler::new(simulation.neighbors, simulation.fingers, comparator);
        let sampler = tokio::spawn(
            sampler
                .run(nodes.clone(), simulation.sample_period())
                .instrument(info_span!("sampler")),
        );

        Cluster {
            network,
            addresses,
            nodes,
            sampler,
        }
    }

    /// Every node ever started, crashed ones included, in start order.
    pub fn addresses(&self) -> &[NodeAddress] {
        &self.addresses
    }

    pub async fn live(&self) -> Vec<NodeAddress> {
        self.nodes.read().await.values().map(NodeHandle::address).collect()
    }

    pub async fn publish(&self, at: &NodeAddress, title: impl Into<String>) -> Result<(), NodeError> {
        let nodes = self.nodes.read().await;
        let handle = nodes.get(&at.id).ok_or(NodeError::Stopped(*at))?;
        handle.publish(title).await
    }

    /// Stops a node and cuts it off the network. It stops answering at once,
    /// as a crashed process would.
    pub async fn crash(&self, address: &NodeAddress) -> Result<(), NodeError> {
        self.network.crash(address);
        let handle = self
            .nodes
            .write()
            .await
            .remove(&address.id)
            .ok_or(NodeError::Stopped(*address))?;
        warn!("crashing {}", address);
        handle.shutdown().await
    }

    /// Each live node's current leader.
    pub async fn leaders(&self) -> Vec<(NodeAddress, Option<NodeAddress>)> {
        let nodes = self.nodes.read().await;
        nodes.values().map(|handle| (handle.address(), handle.leader())).collect()
    }

    /// The leader every live node agrees on, if there is one.
    pub async fn agreed_leader(&self) -> Option<NodeAddress> {
        let leaders = self.leaders().await;
        let (_, first) = leaders.first()?;
        let first = (*first)?;
        leaders
            .iter()
            .all(|(_, leader)| *leader == Some(first))
            .then_some(first)
    }

    pub async fn stats(&self) -> Vec<(NodeAddress, NodeStats)> {
        let nodes = self.nodes.read().await;
        nodes.values().map(|handle| (handle.address(), handle.stats())).collect()
    }

    pub async fn summary(&self) -> ClusterSummary {
        let stats = self.stats().await;
        ClusterSummary::from_stats(stats.iter().map(|(_, stats)| stats))
    }

    /// Committed titles per live node.
    pub async fn snapshots(&self) -> Result<Vec<(NodeAddress, Vec<String>)>, NodeError> {
        let nodes = self.nodes.read().await;
        let mut snapshots = Vec::with_capacity(nodes.len());
        for handle in nodes.values() {
            snapshots.push((handle.address(), handle.snapshot().await?));
        }
        Ok(snapshots)
    }

    /// Polls the summary until `done` holds or `timeout` runs out. Returns
    /// whether it held.
    pub async fn wait_for(&self, timeout: Duration, done: impl Fn(&ClusterSummary) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if done(&self.summary().await) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn shutdown(self) {
        self.sampler.abort();
        let nodes = std::mem::take(&mut *self.nodes.write().await);
        for (_, handle) in nodes {
            let address = handle.address();
            if let Err(e) = handle.shutdown().await {
                warn!("{} did not stop cleanly: {}", address, e);
            }
        }
    }
}
