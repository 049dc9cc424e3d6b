// UTXO index: a cache over the chain's unspent outputs
//
// Maps transaction ID -> list of (output index, output) still unspent. Spend
// and balance queries hit this tree only, never the chain itself.

use std::collections::HashMap;

use super::chain::{Blockchain, CHAINSTATE_TREE};
use crate::core::{Block, Hash256, TxOutput, decode, encode};

/// Derived index over the chain's unspent outputs.
pub struct UtxoIndex<'a> {
    chain: &'a Blockchain,
    tree: sled::Tree,
}

impl<'a> UtxoIndex<'a> {
    pub fn new(chain: &'a Blockchain) -> Result<UtxoIndex<'a>, String> {
        let tree = chain.open_tree(CHAINSTATE_TREE)?;
        Ok(UtxoIndex { chain, tree })
    }

    /// Rebuild the index from a full chain scan.
    pub fn reindex(&self) -> Result<(), String> {
        self.tree
            .clear()
            .map_err(|e| format!("Failed to clear UTXO index: {}", e))?;

        let utxo = self.chain.find_utxo()?;
        for (txid, outputs) in utxo {
            self.tree
                .insert(txid.as_bytes().as_slice(), encode(&outputs).as_slice())
                .map_err(|e| format!("Failed to store UTXO entry: {}", e))?;
        }

        self.chain.flush()
    }

    /// Apply a newly appended block: drop the outputs its inputs consume,
    /// then record its own outputs as unspent.
    pub fn update(&self, block: &Block) -> Result<(), String> {
        for tx in &block.transactions {
            if !tx.is_coinbase() {
                for input in &tx.vin {
                    let key = input.txid.as_bytes().as_slice();
                    let Some(data) = self
                        .tree
                        .get(key)
                        .map_err(|e| format!("Database error: {}", e))?
                    else {
                        continue;
                    };

                    let outputs: Vec<(u32, TxOutput)> = decode(&data)?;
                    let remaining: Vec<(u32, TxOutput)> = outputs
                        .into_iter()
                        .filter(|(idx, _)| *idx as i32 != input.vout)
                        .collect();

                    if remaining.is_empty() {
                        self.tree
                            .remove(key)
                            .map_err(|e| format!("Failed to remove UTXO entry: {}", e))?;
                    } else {
                        self.tree
                            .insert(key, encode(&remaining).as_slice())
                            .map_err(|e| format!("Failed to store UTXO entry: {}", e))?;
                    }
                }
            }

            let new_outputs: Vec<(u32, TxOutput)> = tx
                .vout
                .iter()
                .cloned()
                .enumerate()
                .map(|(idx, out)| (idx as u32, out))
                .collect();
            self.tree
                .insert(tx.id.as_bytes().as_slice(), encode(&new_outputs).as_slice())
                .map_err(|e| format!("Failed to store UTXO entry: {}", e))?;
        }

        self.chain.flush()
    }

    /// Accumulate outputs locked to `pub_key_hash`, in index order, until the
    /// running sum reaches `amount`. Returns the accumulated value and the
    /// consumed output indices grouped by transaction.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, HashMap<Hash256, Vec<u32>>), String> {
        let mut unspent: HashMap<Hash256, Vec<u32>> = HashMap::new();
        let mut accumulated: u64 = 0;

        'scan: for item in self.tree.iter() {
            let (key, value) = item.map_err(|e| format!("Database error: {}", e))?;
            let txid = Hash256::from_slice(&key)?;
            let outputs: Vec<(u32, TxOutput)> = decode(&value)?;

            for (idx, out) in outputs {
                if out.is_locked_with(pub_key_hash) && accumulated < amount {
                    accumulated += out.value;
                    unspent.entry(txid).or_default().push(idx);

                    if accumulated >= amount {
                        break 'scan;
                    }
                }
            }
        }

        Ok((accumulated, unspent))
    }

    /// Every unspent output locked to `pub_key_hash` (balance queries).
    pub fn find_utxo(&self, pub_key_hash: &[u8]) -> Result<Vec<TxOutput>, String> {
        let mut utxos = Vec::new();

        for item in self.tree.iter() {
            let (_, value) = item.map_err(|e| format!("Database error: {}", e))?;
            let outputs: Vec<(u32, TxOutput)> = decode(&value)?;
            for (_, out) in outputs {
                if out.is_locked_with(pub_key_hash) {
                    utxos.push(out);
                }
            }
        }

        Ok(utxos)
    }

    /// Number of transactions with at least one unspent output.
    pub fn count_transactions(&self) -> usize {
        self.tree.len()
    }

    #[cfg(test)]
    fn snapshot(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.tree
            .iter()
            .map(|item| {
                let (k, v) = item.unwrap();
                (k.to_vec(), v.to_vec())
            })
            .collect()
    }
}
