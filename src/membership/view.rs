use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::common::crypto::Pubkey;

/// A node's advertised knowledge: its committed log length.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct View {
    pub node: Pubkey,
    pub score: u64,
}

impl View {
    pub fn new(node: Pubkey, score: u64) -> Self {
        View { node, score }
    }
}

/// Total order over views. `Ordering::Greater` means the left view ranks
/// better. Every ranking decision in the crate goes through this one order.
pub trait ViewComparator: Send + Sync {
    fn compare(&self, a: &View, b: &View) -> Ordering;

    fn outranks(&self, a: &View, b: &View) -> bool {
        self.compare(a, b) == Ordering::Greater
    }
}

/// Higher score ranks better; equal scores go to the smaller identity.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScoreRanking;

impl ViewComparator for ScoreRanking {
    fn compare(&self, a: &View, b: &View) -> Ordering {
        a.score
            .cmp(&b.score)
            .then_with(|| b.node.cmp(&a.node))
    }
}
