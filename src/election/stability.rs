use std::collections::HashSet;

use crate::network::node::NodeAddress;

/// Decides when the sampled neighborhood has settled enough to elect.
///
/// A sample qualifies when it has the same size as the previous one and at
/// least `disparity_threshold` of its members were also in the previous one.
/// The gate opens after `rounds_threshold` consecutive qualifying samples.
#[derive(Debug)]
pub struct StabilityGate {
    rounds_threshold: u32,
    disparity_threshold: f64,
    previous: Option<HashSet<NodeAddress>>,
    consecutive: u32,
    rounds_since_stable: u32,
    max_rounds_to_stable: u32,
}

impl StabilityGate {
    pub fn new(rounds_threshold: u32, disparity_threshold: f64) -> Self {
        StabilityGate {
            rounds_threshold,
            disparity_threshold,
            previous: None,
            consecutive: 0,
            rounds_since_stable: 0,
            max_rounds_to_stable: 0,
        }
    }

    pub fn observe(&mut self, current: &[NodeAddress]) -> bool {
        let current: HashSet<NodeAddress> = current.iter().copied().collect();
        self.rounds_since_stable += 1;

        let qualifies = match &self.previous {
            Some(previous) if !current.is_empty() && previous.len() == current.len() => {
                let overlap = current.intersection(previous).count() as f64 / current.len() as f64;
                overlap >= self.disparity_threshold
            }
            _ => false,
        };

        if qualifies {
            self.consecutive += 1;
        } else {
            self.consecutive = 0;
        }
        self.previous = Some(current);

        let stable = self.is_stable();
        if stable {
            self.max_rounds_to_stable = self.max_rounds_to_stable.max(self.rounds_since_stable);
            self.rounds_since_stable = 0;
        }
        stable
    }

    pub fn is_stable(&self) -> bool {
        self.consecutive >= self.rounds_threshold
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    /// Largest number of samples it took to go from unstable to stable.
    pub fn max_rounds_to_stable(&self) -> u32 {
        self.max_rounds_to_stable
    }
}
