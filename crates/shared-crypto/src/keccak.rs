//! # Keccak-256 Hashing
//!
//! The single hash function used for channel ids and signer addresses.
//! Keccak-256 (not NIST SHA-3) so outputs agree with the EVM adjudicator.

use sha3::{Digest, Keccak256};

/// Keccak-256 hash output (256-bit).
pub type Hash = [u8; 32];

/// Hash a byte slice in one shot.
pub fn keccak256(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Stateful Keccak-256 hasher for multi-part inputs.
pub struct Keccak256Hasher {
    inner: Keccak256,
}

impl Keccak256Hasher {
    /// Create new hasher.
    pub fn new() -> Self {
        Self {
            inner: Keccak256::new(),
        }
    }

    /// Update with data.
    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        self.inner.update(data);
        self
    }

    /// Finalize and return hash.
    pub fn finalize(self) -> Hash {
        self.inner.finalize().into()
    }
}

impl Default for Keccak256Hasher {
    fn default() -> Self {
        Self::new()
    }
}
