// Block data structures

use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::consensus::ProofOfWork;
use crate::core::{Hash256, MerkleTree, Transaction, decode, encode};

/// Block - an immutable, mined record of transactions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Unix timestamp stamped at mining time
    pub timestamp: i64,
    /// Transactions in this block
    pub transactions: Vec<Transaction>,
    /// Digest of the previous block (zero for genesis)
    pub prev_block_hash: Hash256,
    /// This block's own digest, the proof-of-work solution
    pub hash: Hash256,
    /// Nonce found by the proof-of-work search
    pub nonce: u64,
    /// Position in the chain (genesis = 0)
    pub height: u32,
}

impl Block {
    /// Create a new block: stamp the current time and run the proof-of-work
    /// engine to completion.
    pub fn new(transactions: Vec<Transaction>, prev_block_hash: Hash256, height: u32) -> Block {
        let mut block = Block {
            timestamp: unix_now(),
            transactions,
            prev_block_hash,
            hash: Hash256::zero(),
            nonce: 0,
            height,
        };

        let (nonce, hash) = ProofOfWork::new(&block).run();
        block.nonce = nonce;
        block.hash = hash;
        block
    }

    /// Interruptible variant of `new`: returns `None` when `stop` is raised
    /// mid-search (a competing block arrived).
    pub fn try_new(
        transactions: Vec<Transaction>,
        prev_block_hash: Hash256,
        height: u32,
        stop: &AtomicBool,
    ) -> Option<Block> {
        let mut block = Block {
            timestamp: unix_now(),
            transactions,
            prev_block_hash,
            hash: Hash256::zero(),
            nonce: 0,
            height,
        };

        let (nonce, hash) = ProofOfWork::new(&block).run_interruptible(stop)?;
        block.nonce = nonce;
        block.hash = hash;
        Some(block)
    }

    /// Mine the genesis block around a coinbase transaction.
    pub fn genesis(coinbase: Transaction) -> Block {
        Block::new(vec![coinbase], Hash256::zero(), 0)
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_block_hash.is_zero()
    }

    /// Commitment over the block's transaction set: the Merkle root of the
    /// serialized transactions.
    pub fn hash_transactions(&self) -> Hash256 {
        let leaves: Vec<Vec<u8>> = self.transactions.iter().map(encode).collect();
        MerkleTree::new(&leaves).root_hash()
    }

    pub fn serialize(&self) -> Vec<u8> {
        encode(self)
    }

    pub fn deserialize(data: &[u8]) -> Result<Block, String> {
        decode(data)
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the Unix epoch")
        .as_secs() as i64
}
