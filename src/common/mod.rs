pub mod config;
pub mod crypto;

pub use config::*;
pub use crypto::*;
