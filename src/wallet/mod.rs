// Ownership-proof capability
//
// The transaction layer never sees concrete key material. It talks to a
// ProofSystem: something that can turn an address into locking data, produce
// a proof over a digest, and check a proof against a public key. Real wallets
// (key stores, signature schemes, address encodings) live behind this seam.

use crate::core::sha256;

/// Capability supplied by the wallet collaborator.
pub trait ProofSystem {
    /// Locking hash for an address, stored in transaction outputs.
    fn address_key_hash(&self, address: &str) -> Result<Vec<u8>, String>;

    /// (private material, public key) behind an address.
    fn key_material(&self, address: &str) -> Result<(Vec<u8>, Vec<u8>), String>;

    /// Hash a public key into the form stored in outputs.
    fn hash_public_key(&self, public_key: &[u8]) -> Vec<u8>;

    /// Produce an ownership proof over `data`.
    fn prove(&self, data: &[u8], private_material: &[u8]) -> Vec<u8>;

    /// Check a proof over `data` against a public key.
    fn verify(&self, proof: &[u8], data: &[u8], public_key: &[u8]) -> bool;
}

/// Earliest-protocol-revision locking: the address string is its own key
/// material, and a proof is the digest of the data salted with it. Anyone
/// holding the address string can spend outputs locked to it.
pub struct PlainLock;

impl ProofSystem for PlainLock {
    fn address_key_hash(&self, address: &str) -> Result<Vec<u8>, String> {
        if address.is_empty() {
            return Err("Invalid address: empty".to_string());
        }
        Ok(address.as_bytes().to_vec())
    }

    fn key_material(&self, address: &str) -> Result<(Vec<u8>, Vec<u8>), String> {
        let key = self.address_key_hash(address)?;
        Ok((key.clone(), key))
    }

    fn hash_public_key(&self, public_key: &[u8]) -> Vec<u8> {
        public_key.to_vec()
    }

    fn prove(&self, data: &[u8], private_material: &[u8]) -> Vec<u8> {
        let mut buf = data.to_vec();
        buf.extend_from_slice(private_material);
        sha256(&buf).as_bytes().to_vec()
    }

    fn verify(&self, proof: &[u8], data: &[u8], public_key: &[u8]) -> bool {
        proof == self.prove(data, public_key).as_slice()
    }
}
