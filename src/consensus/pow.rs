// Proof of Work

use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::{Block, Hash256, sha256};

/// Fixed difficulty: the block digest must have this many leading zero bits.
pub const TARGET_BITS: u32 = 16;

/// Nonce ceiling; practically unreachable at this difficulty.
const MAX_NONCE: u64 = u64::MAX;

/// Check the interrupt flag once per this many nonces.
const INTERRUPT_POLL_INTERVAL: u64 = 1024;

/// Proof-of-work engine over one block.
pub struct ProofOfWork<'a> {
    block: &'a Block,
    target: [u8; 32],
}

impl<'a> ProofOfWork<'a> {
    pub fn new(block: &'a Block) -> ProofOfWork<'a> {
        ProofOfWork {
            block,
            target: target_bytes(TARGET_BITS),
        }
    }

    /// Bytes the puzzle digest is computed over, at a candidate nonce.
    fn prepare_data(&self, nonce: u64) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(self.block.prev_block_hash.as_bytes());
        data.extend_from_slice(self.block.hash_transactions().as_bytes());
        data.extend_from_slice(&self.block.timestamp.to_be_bytes());
        data.extend_from_slice(&u64::from(TARGET_BITS).to_be_bytes());
        data.extend_from_slice(&nonce.to_be_bytes());
        data
    }

    /// Search nonces from 0 until the digest falls below the target.
    pub fn run(&self) -> (u64, Hash256) {
        let flag = AtomicBool::new(false);
        self.run_interruptible(&flag)
            .expect("uninterrupted mining always finds a nonce below the ceiling")
    }

    /// Like `run`, but gives up when `stop` is raised so a competing block
    /// can cancel an in-flight attempt.
    pub fn run_interruptible(&self, stop: &AtomicBool) -> Option<(u64, Hash256)> {
        for nonce in 0..MAX_NONCE {
            if nonce % INTERRUPT_POLL_INTERVAL == 0 && stop.load(Ordering::Relaxed) {
                return None;
            }

            let hash = sha256(&self.prepare_data(nonce));
            if is_below(&hash, &self.target) {
                return Some((nonce, hash));
            }

            if nonce > 0 && nonce % 1_000_000 == 0 {
                log::debug!("Mining attempts: {}", nonce);
            }
        }

        None
    }

    /// Recompute the digest at the block's stored nonce and require that it
    /// matches the block's stored hash and falls below the target. Used for
    /// locally mined blocks and blocks from peers.
    pub fn validate(&self) -> bool {
        let hash = sha256(&self.prepare_data(self.block.nonce));
        hash == self.block.hash && is_below(&hash, &self.target)
    }
}

/// Full 256-bit target for a difficulty: 1 << (256 - bits), big-endian.
fn target_bytes(bits: u32) -> [u8; 32] {
    debug_assert!(bits >= 1 && bits < 256);
    let mut target = [0u8; 32];
    let bit = 256 - bits as usize;
    target[31 - bit / 8] = 1 << (bit % 8);
    target
}

/// Big-endian numeric comparison: equal-length lexicographic byte order.
fn is_below(hash: &Hash256, target: &[u8; 32]) -> bool {
    hash.as_bytes().as_slice() < target.as_slice()
}
