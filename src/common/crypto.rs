use std::fmt;

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest as ShaDigest, Sha512};

pub type Digest = [u8; 64];

pub trait Hashable {
    fn digest(&self) -> Digest;
}

/// Node identity. Generated from a fresh ed25519 key so identities are unique
/// without coordination; messages themselves are not signed.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct Pubkey {
    pub key: [u8; 32],
}

impl Pubkey {
    pub fn generate() -> Self {
        let mut csprng = OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        Pubkey::from(&signing_key.verifying_key().to_bytes())
    }
}

impl AsRef<[u8]> for Pubkey {
    fn as_ref(&self) -> &[u8] {
        &self.key
    }
}

impl From<&[u8; 32]> for Pubkey {
    fn from(bytes: &[u8; 32]) -> Self {
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes[..32]);
        Pubkey { key }
    }
}

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.key[..4] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

pub fn digest(bytes: &[u8]) -> Digest {
    let mut hasher = Sha512::new();
    hasher.update(bytes);
    let result = hasher.finalize();
    let mut digest = [0u8; 64];
    digest.copy_from_slice(&result[..]);
    digest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_identities_are_distinct() {
        let a = Pubkey::generate();
        let b = Pubkey::generate();

        assert_ne!(a, b);
    }

    #[test]
    fn test_display_is_short_hex_prefix() {
        let key = Pubkey { key: [0xab; 32] };

        assert_eq!(key.to_string(), "abababab");
    }

    #[test]
    fn test_digest_is_stable() {
        assert_eq!(digest(b"headline"), digest(b"headline"));
        assert_ne!(digest(b"headline"), digest(b"other"));
    }
}
