pub mod effects;
pub mod runtime;
pub mod stats;
pub mod timers;

pub use effects::*;
pub use runtime::*;
pub use stats::*;
pub use timers::*;
