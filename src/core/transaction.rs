// Transaction data structures and the UTXO spend model

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::{Hash256, encode, sha256};
use crate::storage::UtxoIndex;
use crate::wallet::ProofSystem;

/// Mining reward granted by every coinbase transaction.
pub const SUBSIDY: u64 = 10;

/// Transaction input - references a previous transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// ID of the transaction holding the referenced output (zero for coinbase)
    pub txid: Hash256,
    /// Index of the referenced output (-1 for coinbase)
    pub vout: i32,
    /// Ownership proof, produced through the wallet's ProofSystem
    pub signature: Vec<u8>,
    /// Public key of the spender (arbitrary memo bytes for coinbase)
    pub pub_key: Vec<u8>,
}

impl TxInput {
    /// Create a new input referencing `txid:vout`, proof left empty until signing
    pub fn new(txid: Hash256, vout: i32, pub_key: Vec<u8>) -> Self {
        Self {
            txid,
            vout,
            signature: Vec::new(),
            pub_key,
        }
    }

    /// Coinbase sentinel: zero source ID, output index -1.
    pub fn coinbase(memo: Vec<u8>) -> Self {
        Self {
            txid: Hash256::zero(),
            vout: -1,
            signature: Vec::new(),
            pub_key: memo,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.txid.is_zero() && self.vout == -1
    }
}

/// Transaction output - a value locked to a public key hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Amount in indivisible units
    pub value: u64,
    /// Locking condition
    pub pub_key_hash: Vec<u8>,
}

impl TxOutput {
    pub fn new(value: u64, pub_key_hash: Vec<u8>) -> Self {
        Self {
            value,
            pub_key_hash,
        }
    }

    /// Build an output locked to an address.
    pub fn locked(value: u64, address: &str, system: &dyn ProofSystem) -> Result<Self, String> {
        Ok(Self::new(value, system.address_key_hash(address)?))
    }

    pub fn is_locked_with(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash == pub_key_hash
    }
}

/// Transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Content digest of the transaction, excluding this field
    pub id: Hash256,
    pub vin: Vec<TxInput>,
    pub vout: Vec<TxOutput>,
}

impl Transaction {
    /// Create a coinbase transaction paying the subsidy to `to`.
    pub fn new_coinbase(
        to: &str,
        memo: &str,
        system: &dyn ProofSystem,
    ) -> Result<Transaction, String> {
        let memo = if memo.is_empty() {
            format!("Reward to '{}'", to)
        } else {
            memo.to_string()
        };

        let txin = TxInput::coinbase(memo.into_bytes());
        let txout = TxOutput::locked(SUBSIDY, to, system)?;

        let mut tx = Transaction {
            id: Hash256::zero(),
            vin: vec![txin],
            vout: vec![txout],
        };
        tx.id = tx.content_hash();

        Ok(tx)
    }

    /// Build and sign a transfer of `amount` from `from` to `to`, consuming
    /// spendable outputs found through the UTXO index. Emits a change output
    /// back to the sender when the consumed outputs exceed the amount.
    pub fn new_utxo_transaction(
        from: &str,
        to: &str,
        amount: u64,
        utxo: &UtxoIndex,
        system: &dyn ProofSystem,
    ) -> Result<Transaction, String> {
        let pub_key_hash = system.address_key_hash(from)?;
        let (accumulated, spendable) = utxo.find_spendable_outputs(&pub_key_hash, amount)?;

        if accumulated < amount {
            return Err(format!(
                "Not enough funds: have {}, need {}",
                accumulated, amount
            ));
        }

        let (private, public) = system.key_material(from)?;

        let mut vin = Vec::new();
        for (txid, out_indices) in spendable {
            for out_idx in out_indices {
                vin.push(TxInput::new(txid, out_idx as i32, public.clone()));
            }
        }

        let mut vout = vec![TxOutput::locked(amount, to, system)?];
        if accumulated > amount {
            // change back to the sender
            vout.push(TxOutput::locked(accumulated - amount, from, system)?);
        }

        let mut tx = Transaction {
            id: Hash256::zero(),
            vin,
            vout,
        };
        tx.sign(system, &private);
        tx.id = tx.content_hash();

        Ok(tx)
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].is_coinbase()
    }

    /// Content digest with the ID field itself zeroed out.
    pub(crate) fn content_hash(&self) -> Hash256 {
        let mut copy = self.clone();
        copy.id = Hash256::zero();
        sha256(&encode(&copy))
    }

    /// Digest that ownership proofs commit to: the transaction with every
    /// proof field cleared, so proofs do not sign themselves.
    pub fn signing_digest(&self) -> Hash256 {
        let mut copy = self.clone();
        copy.id = Hash256::zero();
        for input in &mut copy.vin {
            input.signature = Vec::new();
        }
        sha256(&encode(&copy))
    }

    /// Attach an ownership proof to every input.
    pub fn sign(&mut self, system: &dyn ProofSystem, private_material: &[u8]) {
        if self.is_coinbase() {
            return;
        }
        let digest = self.signing_digest();
        for input in &mut self.vin {
            input.signature = system.prove(digest.as_bytes(), private_material);
        }
    }

    /// Check every input against the transactions it references: the proof
    /// must verify against the referenced output's key hash, and the sum of
    /// consumed values must cover the sum of produced values.
    ///
    /// An unresolvable reference means the transaction is invalid, not that
    /// verification failed as an operation.
    pub fn verify(
        &self,
        system: &dyn ProofSystem,
        prev_txs: &HashMap<Hash256, Transaction>,
    ) -> bool {
        if self.is_coinbase() {
            return true;
        }

        let digest = self.signing_digest();
        let mut input_sum: u64 = 0;

        for input in &self.vin {
            let Some(prev) = prev_txs.get(&input.txid) else {
                return false;
            };
            let Ok(out_idx) = usize::try_from(input.vout) else {
                return false;
            };
            let Some(output) = prev.vout.get(out_idx) else {
                return false;
            };

            if system.hash_public_key(&input.pub_key) != output.pub_key_hash {
                return false;
            }
            if !system.verify(&input.signature, digest.as_bytes(), &input.pub_key) {
                return false;
            }

            input_sum += output.value;
        }

        let output_sum: u64 = self.vout.iter().map(|out| out.value).sum();
        input_sum >= output_sum
    }

    pub fn serialize(&self) -> Vec<u8> {
        encode(self)
    }

    pub fn deserialize(data: &[u8]) -> Result<Transaction, String> {
        crate::core::decode(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::PlainLock;

    fn coinbase_to(address: &str) -> Transaction {
        Transaction::new_coinbase(address, "", &PlainLock).unwrap()
    }

    #[test]
    fn test_coinbase_sentinel() {
        let input = TxInput::coinbase(b"memo".to_vec());
        assert!(input.is_coinbase());

        let input = TxInput::new(Hash256::new([1; 32]), 0, vec![]);
        assert!(!input.is_coinbase());
    }

    #[test]
    fn test_coinbase_transaction() {
        let tx = coinbase_to("alice");
        assert!(tx.is_coinbase());
        assert_eq!(tx.vin.len(), 1);
        assert_eq!(tx.vout.len(), 1);
        assert_eq!(tx.vout[0].value, SUBSIDY);
        assert!(tx.vout[0].is_locked_with(b"alice"));
    }

    #[test]
    fn test_transaction_id_deterministic() {
        let tx = coinbase_to("alice");
        let mut copy = tx.clone();
        copy.id = Hash256::zero();
        assert_eq!(tx.id, {
            copy.id = copy.content_hash();
            copy.id
        });
    }

    #[test]
    fn test_transaction_serialization_roundtrip() {
        let tx = coinbase_to("alice");
        let decoded = Transaction::deserialize(&tx.serialize()).unwrap();
        assert_eq!(tx, decoded);
    }

    #[test]
    fn test_sign_and_verify_spend() {
        let system = PlainLock;
        let coinbase = coinbase_to("alice");

        let (private, public) = system.key_material("alice").unwrap();
        let mut tx = Transaction {
            id: Hash256::zero(),
            vin: vec![TxInput::new(coinbase.id, 0, public)],
            vout: vec![
                TxOutput::locked(4, "bob", &system).unwrap(),
                TxOutput::locked(SUBSIDY - 4, "alice", &system).unwrap(),
            ],
        };
        tx.sign(&system, &private);
        tx.id = tx.content_hash();

        let mut prev_txs = HashMap::new();
        prev_txs.insert(coinbase.id, coinbase);

        assert!(tx.verify(&system, &prev_txs));
    }

    #[test]
    fn test_verify_rejects_wrong_key() {
        let system = PlainLock;
        let coinbase = coinbase_to("alice");

        // bob tries to spend alice's output with his own key
        let (private, public) = system.key_material("bob").unwrap();
        let mut tx = Transaction {
            id: Hash256::zero(),
            vin: vec![TxInput::new(coinbase.id, 0, public)],
            vout: vec![TxOutput::locked(SUBSIDY, "bob", &system).unwrap()],
        };
        tx.sign(&system, &private);
        tx.id = tx.content_hash();

        let mut prev_txs = HashMap::new();
        prev_txs.insert(coinbase.id, coinbase);

        assert!(!tx.verify(&system, &prev_txs));
    }

    #[test]
    fn test_verify_rejects_value_creation() {
        let system = PlainLock;
        let coinbase = coinbase_to("alice");

        // outputs exceed the referenced input value
        let (private, public) = system.key_material("alice").unwrap();
        let mut tx = Transaction {
            id: Hash256::zero(),
            vin: vec![TxInput::new(coinbase.id, 0, public)],
            vout: vec![TxOutput::locked(SUBSIDY + 1, "bob", &system).unwrap()],
        };
        tx.sign(&system, &private);
        tx.id = tx.content_hash();

        let mut prev_txs = HashMap::new();
        prev_txs.insert(coinbase.id, coinbase);

        assert!(!tx.verify(&system, &prev_txs));
    }

    #[test]
    fn test_verify_rejects_unresolvable_input() {
        let system = PlainLock;
        let (private, public) = system.key_material("alice").unwrap();
        let mut tx = Transaction {
            id: Hash256::zero(),
            vin: vec![TxInput::new(Hash256::new([9; 32]), 0, public)],
            vout: vec![TxOutput::locked(1, "bob", &system).unwrap()],
        };
        tx.sign(&system, &private);
        tx.id = tx.content_hash();

        assert!(!tx.verify(&system, &HashMap::new()));
    }
}
