// Chain store backed by sled
//
// One database per node, two trees: "blocks" holds block digest -> serialized
// block plus the reserved tip key, "chainstate" holds the derived UTXO index.

use std::collections::HashMap;
use std::path::Path;

use sled::transaction::ConflictableTransactionResult;
use sled::{Db, Tree};

use crate::core::{Block, Hash256, Transaction, TxOutput};
use crate::wallet::ProofSystem;

const BLOCKS_TREE: &str = "blocks";
pub(crate) const CHAINSTATE_TREE: &str = "chainstate";

/// Reserved key holding the tip digest.
const TIP_KEY: &[u8] = b"l";

/// Durable, append-only, hash-linked block store.
pub struct Blockchain {
    db: Db,
    blocks: Tree,
}

impl Blockchain {
    /// Open an existing chain. Fails if none has been created at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Blockchain, String> {
        let chain = Self::open_db(path)?;
        if chain
            .blocks
            .get(TIP_KEY)
            .map_err(|e| format!("Database error: {}", e))?
            .is_none()
        {
            return Err("No existing blockchain found. Create one first.".to_string());
        }
        Ok(chain)
    }

    /// Create a new chain at `path` by mining the genesis block around
    /// `genesis_coinbase`. Fails if a chain already exists there.
    pub fn create<P: AsRef<Path>>(
        path: P,
        genesis_coinbase: Transaction,
    ) -> Result<Blockchain, String> {
        let chain = Self::open_db(path)?;
        if chain
            .blocks
            .get(TIP_KEY)
            .map_err(|e| format!("Database error: {}", e))?
            .is_some()
        {
            return Err("Blockchain already exists.".to_string());
        }

        let genesis = Block::genesis(genesis_coinbase);
        chain.persist_genesis(&genesis)?;
        Ok(chain)
    }

    /// In-memory chain for tests, seeded with a mined genesis block.
    pub fn memory(genesis_coinbase: Transaction) -> Result<Blockchain, String> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| format!("Failed to create memory db: {}", e))?;
        let blocks = db
            .open_tree(BLOCKS_TREE)
            .map_err(|e| format!("Failed to open blocks tree: {}", e))?;
        let chain = Blockchain { db, blocks };

        let genesis = Block::genesis(genesis_coinbase);
        chain.persist_genesis(&genesis)?;
        Ok(chain)
    }

    fn open_db<P: AsRef<Path>>(path: P) -> Result<Blockchain, String> {
        let db = sled::open(path).map_err(|e| format!("Failed to open database: {}", e))?;
        let blocks = db
            .open_tree(BLOCKS_TREE)
            .map_err(|e| format!("Failed to open blocks tree: {}", e))?;
        Ok(Blockchain { db, blocks })
    }

    fn persist_genesis(&self, genesis: &Block) -> Result<(), String> {
        let data = genesis.serialize();
        self.blocks
            .insert(genesis.hash.as_bytes().as_slice(), data.as_slice())
            .map_err(|e| format!("Failed to store genesis block: {}", e))?;
        self.blocks
            .insert(TIP_KEY, genesis.hash.as_bytes().as_slice())
            .map_err(|e| format!("Failed to store tip: {}", e))?;
        self.flush()
    }

    pub(crate) fn open_tree(&self, name: &str) -> Result<Tree, String> {
        self.db
            .open_tree(name)
            .map_err(|e| format!("Failed to open tree {}: {}", name, e))
    }

    pub(crate) fn flush(&self) -> Result<(), String> {
        self.db
            .flush()
            .map_err(|e| format!("Failed to flush: {}", e))?;
        Ok(())
    }

    /// Digest of the current tip block.
    pub fn tip(&self) -> Result<Hash256, String> {
        let data = self
            .blocks
            .get(TIP_KEY)
            .map_err(|e| format!("Database error: {}", e))?
            .ok_or_else(|| "Chain has no tip".to_string())?;
        Hash256::from_slice(&data)
    }

    /// Height of the tip block.
    pub fn get_best_height(&self) -> Result<u32, String> {
        let tip = self.tip()?;
        let block = self
            .get_block(&tip)?
            .ok_or_else(|| format!("Tip block {} missing from store", tip))?;
        Ok(block.height)
    }

    /// Point lookup by digest. A miss is an expected, recoverable condition.
    pub fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, String> {
        match self
            .blocks
            .get(hash.as_bytes())
            .map_err(|e| format!("Database error: {}", e))?
        {
            Some(data) => Ok(Some(Block::deserialize(&data)?)),
            None => Ok(None),
        }
    }

    /// Append a block under a single write transaction.
    ///
    /// A digest already in the store is a no-op (`Ok(false)`). The tip
    /// advances when the block extends the current tip, or when its height
    /// exceeds the tip's height - the latter covers initial block download,
    /// where blocks arrive newest first.
    pub fn add_block(&self, block: &Block) -> Result<bool, String> {
        let data = block.serialize();
        let stored = self
            .blocks
            .transaction(
                |txn| -> ConflictableTransactionResult<bool, sled::Error> {
                    if txn.get(block.hash.as_bytes())?.is_some() {
                        return Ok(false);
                    }
                    txn.insert(block.hash.as_bytes().as_slice(), data.as_slice())?;

                    let advance = match txn.get(TIP_KEY)? {
                        Some(tip_bytes) => {
                            if tip_bytes.as_ref() == block.prev_block_hash.as_bytes().as_slice() {
                                true
                            } else {
                                let tip_height = txn
                                    .get(tip_bytes.as_ref())?
                                    .and_then(|b| Block::deserialize(&b).ok())
                                    .map(|b| b.height);
                                tip_height.is_some_and(|h| block.height > h)
                            }
                        }
                        None => true,
                    };
                    if advance {
                        txn.insert(TIP_KEY, block.hash.as_bytes().as_slice())?;
                    }
                    Ok(true)
                },
            )
            .map_err(|e| format!("Block store transaction failed: {:?}", e))?;

        self.flush()?;
        Ok(stored)
    }

    /// Verify transactions, mine a block over the current tip, and append it.
    pub fn mine_block(
        &self,
        transactions: Vec<Transaction>,
        system: &dyn ProofSystem,
    ) -> Result<Block, String> {
        for tx in &transactions {
            if !self.verify_transaction(tx, system)? {
                return Err(format!("Invalid transaction: {}", tx.id));
            }
        }

        let tip = self.tip()?;
        let height = self.get_best_height()? + 1;
        let block = Block::new(transactions, tip, height);
        self.add_block(&block)?;
        Ok(block)
    }

    /// Backward iterator from the tip to genesis.
    pub fn iter(&self) -> Result<BlockchainIterator<'_>, String> {
        Ok(BlockchainIterator {
            current: Some(self.tip()?),
            blocks: &self.blocks,
        })
    }

    /// Every block digest, newest first, for peer inventory exchange.
    pub fn get_block_hashes(&self) -> Result<Vec<Hash256>, String> {
        let mut hashes = Vec::new();
        for block in self.iter()? {
            hashes.push(block?.hash);
        }
        Ok(hashes)
    }

    /// Find a transaction anywhere in the chain.
    pub fn find_transaction(&self, id: &Hash256) -> Result<Option<Transaction>, String> {
        for block in self.iter()? {
            let block = block?;
            for tx in block.transactions {
                if tx.id == *id {
                    return Ok(Some(tx));
                }
            }
        }
        Ok(None)
    }

    /// Check a transaction against the chain it spends from. Unresolvable
    /// inputs make the transaction invalid; they are not an error.
    pub fn verify_transaction(
        &self,
        tx: &Transaction,
        system: &dyn ProofSystem,
    ) -> Result<bool, String> {
        if tx.is_coinbase() {
            return Ok(true);
        }

        let mut prev_txs = HashMap::new();
        for input in &tx.vin {
            match self.find_transaction(&input.txid)? {
                Some(prev) => {
                    prev_txs.insert(prev.id, prev);
                }
                None => return Ok(false),
            }
        }
        Ok(tx.verify(system, &prev_txs))
    }

    /// Scan the whole chain for unspent outputs, grouped by transaction.
    /// A single backward pass suffices: an input always references a
    /// transaction deeper in the chain, so spends are recorded before the
    /// outputs they consume are visited.
    pub fn find_utxo(&self) -> Result<HashMap<Hash256, Vec<(u32, TxOutput)>>, String> {
        let mut utxo: HashMap<Hash256, Vec<(u32, TxOutput)>> = HashMap::new();
        let mut spent: HashMap<Hash256, Vec<i32>> = HashMap::new();

        for block in self.iter()? {
            let block = block?;
            for tx in &block.transactions {
                for (idx, out) in tx.vout.iter().enumerate() {
                    let is_spent = spent
                        .get(&tx.id)
                        .is_some_and(|outs| outs.contains(&(idx as i32)));
                    if !is_spent {
                        utxo.entry(tx.id).or_default().push((idx as u32, out.clone()));
                    }
                }

                if !tx.is_coinbase() {
                    for input in &tx.vin {
                        spent.entry(input.txid).or_default().push(input.vout);
                    }
                }
            }
        }

        Ok(utxo)
    }
}

/// Walks the chain backward: tip, tip's parent, ... , genesis.
pub struct BlockchainIterator<'a> {
    current: Option<Hash256>,
    blocks: &'a Tree,
}

impl Iterator for BlockchainIterator<'_> {
    type Item = Result<Block, String>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.current?;

        let data = match self.blocks.get(hash.as_bytes()) {
            Ok(Some(data)) => data,
            Ok(None) => {
                self.current = None;
                return Some(Err(format!("Block {} missing from store", hash)));
            }
            Err(e) => {
                self.current = None;
                return Some(Err(format!("Database error: {}", e)));
            }
        };

        match Block::deserialize(&data) {
            Ok(block) => {
                self.current = if block.prev_block_hash.is_zero() {
                    None
                } else {
                    Some(block.prev_block_hash)
                };
                Some(Ok(block))
            }
            Err(e) => {
                self.current = None;
                Some(Err(e))
            }
        }
    }
}
