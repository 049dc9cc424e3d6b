//! A minimal proof-of-work blockchain node: hash-linked blocks over a UTXO
//! transaction model, persisted in sled, synchronized over a small TCP
//! message protocol.

pub mod cli;
pub mod consensus;
pub mod core;
pub mod network;
pub mod storage;
pub mod wallet;

pub use crate::consensus::{ProofOfWork, TARGET_BITS};
pub use crate::core::{Block, Hash256, SUBSIDY, Transaction, TxInput, TxOutput};
pub use crate::network::{CENTRAL_NODE, Server};
pub use crate::storage::{Blockchain, UtxoIndex};
pub use crate::wallet::{PlainLock, ProofSystem};
