pub mod sample;
pub mod view;

pub use sample::*;
pub use view::*;
