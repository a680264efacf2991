use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::common::crypto::Pubkey;

/// Identity plus endpoint of a node. Equality and hashing use the identity
/// only, so an address stays the same map key if its endpoint is re-learnt.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct NodeAddress {
    pub id: Pubkey,
    pub endpoint: SocketAddr,
}

impl NodeAddress {
    pub fn new(id: Pubkey, endpoint: SocketAddr) -> Self {
        NodeAddress { id, endpoint }
    }
}

impl PartialEq for NodeAddress {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for NodeAddress {}

impl Hash for NodeAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.endpoint)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_equality_ignores_endpoint() {
        let id = Pubkey { key: [7u8; 32] };
        let a = NodeAddress::new(id, "127.0.0.1:5000".parse().unwrap());
        let b = NodeAddress::new(id, "10.0.0.1:6000".parse().unwrap());
        let c = NodeAddress::new(Pubkey { key: [8u8; 32] }, "127.0.0.1:5000".parse().unwrap());

        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<NodeAddress> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }
}
