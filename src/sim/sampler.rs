use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::RwLock;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, trace};

use crate::common::crypto::Pubkey;
use crate::membership::sample::NeighborSample;
use crate::membership::view::{View, ViewComparator};
use crate::network::node::NodeAddress;
use crate::node::runtime::NodeHandle;

/// Gradient-style peer sampling over a global view of the live nodes: each
/// node gets the best-ranked other nodes as neighbors, plus a few random
/// fingers for long-range queries.
pub struct GradientSampler {
    neighbors: usize,
    fingers: usize,
    comparator: Arc<dyn ViewComparator>,
}

impl GradientSampler {
    pub fn new(neighbors: usize, fingers: usize, comparator: Arc<dyn ViewComparator>) -> Self {
        GradientSampler {
            neighbors,
            fingers,
            comparator,
        }
    }

    pub fn sample_for<R: Rng + ?Sized>(
        &self,
        node: &NodeAddress,
        live: &[(NodeAddress, View)],
        rng: &mut R,
    ) -> NeighborSample {
        let mut others: Vec<(NodeAddress, View)> = live
            .iter()
            .filter(|(address, _)| address != node)
            .copied()
            .collect();
        others.sort_by(|(_, a), (_, b)| self.comparator.compare(b, a));

        let fingers = others
            .choose_multiple(rng, self.fingers)
            .map(|(address, _)| *address)
            .collect();
        others.truncate(self.neighbors);

        NeighborSample::new(others, fingers)
    }

    /// Hands every live node a fresh sample once per `period`, until the task
    /// is aborted.
    pub async fn run(self, nodes: Arc<RwLock<BTreeMap<Pubkey, NodeHandle>>>, period: Duration) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let nodes = nodes.read().await;
            self.round(&nodes);
        }
    }

    fn round(&self, nodes: &BTreeMap<Pubkey, NodeHandle>) {
        let live: Vec<(NodeAddress, View)> = nodes
            .values()
            .map(|handle| (handle.address(), handle.view()))
            .collect();
        trace!("sampling {} live nodes", live.len());

        let mut rng = rand::thread_rng();
        for handle in nodes.values() {
            let sample = self.sample_for(&handle.address(), &live, &mut rng);
            if let Err(e) = handle.offer_sample(sample) {
                debug!("{}", e);
            }
        }
    }
}
