use crate::network::node::NodeAddress;

/// Point-in-time counters for one node, exported on a watch channel.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeStats {
    pub leader: Option<NodeAddress>,
    pub committed: u64,
    pub pending: usize,
    pub outbox: usize,
    pub suspicions: u64,
    pub restores: u64,
    pub candidacies: u64,
    pub wins: u64,
    pub max_rounds_to_stable: u32,
}

/// Aggregate over a set of nodes, used for run summaries.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterSummary {
    pub nodes: usize,
    pub with_leader: usize,
    pub distinct_leaders: usize,
    pub min_committed: u64,
    pub max_committed: u64,
    pub suspicions: u64,
    pub wins: u64,
    pub max_rounds_to_stable: u32,
}

impl ClusterSummary {
    pub fn from_stats<'a>(stats: impl IntoIterator<Item = &'a NodeStats>) -> Self {
        let mut summary = ClusterSummary::default();
        let mut leaders: Vec<NodeAddress> = Vec::new();
        let mut min_committed: Option<u64> = None;

        for node in stats {
            summary.nodes += 1;
            if let Some(leader) = node.leader {
                summary.with_leader += 1;
                if !leaders.contains(&leader) {
                    leaders.push(leader);
                }
            }
            min_committed = Some(min_committed.map_or(node.committed, |min| min.min(node.committed)));
            summary.max_committed = summary.max_committed.max(node.committed);
            summary.suspicions += node.suspicions;
            summary.wins += node.wins;
            summary.max_rounds_to_stable = summary.max_rounds_to_stable.max(node.max_rounds_to_stable);
        }

        summary.distinct_leaders = leaders.len();
        summary.min_committed = min_committed.unwrap_or(0);
        summary
    }

    /// Every node agrees on one leader and holds the same number of items.
    pub fn converged(&self) -> bool {
        self.nodes > 0
            && self.with_leader == self.nodes
            && self.distinct_leaders == 1
            && self.min_committed == self.max_committed
    }
}
