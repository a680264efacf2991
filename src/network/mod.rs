pub mod memory;
pub mod message;
pub mod node;

pub use memory::*;
pub use message::*;
pub use node::*;

pub type Datagram = Vec<u8>;

/// Outbound side of a node's network. Sends are fire-and-forget: a message
/// that cannot be delivered is dropped, never reported back to the sender.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, envelope: Envelope);
}
