pub mod processor;
pub mod stability;

pub use processor::*;
pub use stability::*;
