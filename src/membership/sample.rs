use super::view::{View, ViewComparator};
use crate::network::node::NodeAddress;

/// Periodic output of the membership sampler.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NeighborSample {
    pub neighbors: Vec<(NodeAddress, View)>,
    pub fingers: Vec<NodeAddress>,
}

impl NeighborSample {
    pub fn new(neighbors: Vec<(NodeAddress, View)>, fingers: Vec<NodeAddress>) -> Self {
        NeighborSample { neighbors, fingers }
    }

    pub fn addresses(&self) -> Vec<NodeAddress> {
        self.neighbors.iter().map(|(address, _)| *address).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    /// Neighbors ordered best first.
    pub fn ranked(&self, comparator: &dyn ViewComparator) -> Vec<(NodeAddress, View)> {
        let mut ranked = self.neighbors.clone();
        ranked.sort_by(|(_, a), (_, b)| comparator.compare(b, a));
        ranked
    }
}
