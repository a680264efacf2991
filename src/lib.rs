//! Failure detection, leader election over a ranked neighborhood, and a
//! leader-sequenced news log repaired by gossip pulls.
//!
//! The protocol logic lives in three processors (`detector`, `election`,
//! `news`) that never touch the network or the clock. They are driven by the
//! per-node event loop in `node`, which turns their `Effects` into sends,
//! timers and internal indications. `sim` provides the in-memory network and
//! neighbor sampler needed to run a cluster in one process.

pub mod common;
pub mod detector;
pub mod election;
pub mod membership;
pub mod network;
pub mod news;
pub mod node;
pub mod sim;
