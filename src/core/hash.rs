// Hashing utilities

use crate::core::Hash256;
use sha2::{Digest, Sha256};

/// SHA-256 digest of arbitrary bytes.
/// The single hash function used for block identity, transaction identity,
/// Merkle node data, and the proof-of-work puzzle.
pub fn sha256(data: &[u8]) -> Hash256 {
    let digest = Sha256::digest(data);
    Hash256::from_slice(&digest).expect("SHA-256 always returns 32 bytes")
}
