pub mod item;
pub mod processor;
pub mod store;

pub use item::*;
pub use processor::*;
pub use store::*;
