use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::Rng;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{trace, warn};

use super::message::Envelope;
use super::node::NodeAddress;
use super::{Datagram, Transport};
use crate::common::crypto::Pubkey;

/// In-process datagram network. Envelopes are encoded on send and decoded by
/// the receiving node, so every message crosses the same codec a socket
/// transport would use.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    routes: Arc<Mutex<Routes>>,
}

#[derive(Default)]
struct Routes {
    inboxes: HashMap<Pubkey, UnboundedSender<Datagram>>,
    crashed: HashSet<Pubkey>,
    loss_rate: f64,
}

impl MemoryNetwork {
    pub fn new(loss_rate: f64) -> Self {
        let network = MemoryNetwork::default();
        network.routes().loss_rate = loss_rate.clamp(0.0, 1.0);
        network
    }

    pub fn register(&self, address: NodeAddress) -> UnboundedReceiver<Datagram> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut routes = self.routes();
        routes.crashed.remove(&address.id);
        routes.inboxes.insert(address.id, tx);
        rx
    }

    /// Cuts a node off: nothing is delivered to or from it afterwards.
    pub fn crash(&self, address: &NodeAddress) {
        let mut routes = self.routes();
        routes.crashed.insert(address.id);
        routes.inboxes.remove(&address.id);
    }

    pub fn is_crashed(&self, address: &NodeAddress) -> bool {
        self.routes().crashed.contains(&address.id)
    }

    fn routes(&self) -> MutexGuard<'_, Routes> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for MemoryNetwork {
    fn send(&self, envelope: Envelope) {
        let routes = self.routes();
        if routes.crashed.contains(&envelope.from.id) || routes.crashed.contains(&envelope.to.id) {
            return;
        }
        if routes.loss_rate > 0.0 && rand::thread_rng().gen_bool(routes.loss_rate) {
            trace!(to = %envelope.to, kind = envelope.message.kind(), "datagram lost");
            return;
        }
        let Some(inbox) = routes.inboxes.get(&envelope.to.id) else {
            trace!(to = %envelope.to, "no route");
            return;
        };
        match envelope.encode() {
            Ok(bytes) => {
                let _ = inbox.send(bytes);
            }
            Err(e) => warn!("dropping {} to {}: {}", envelope.message.kind(), envelope.to, e),
        }
    }
}
