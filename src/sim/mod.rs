pub mod cluster;
pub mod sampler;

pub use cluster::*;
pub use sampler::*;
