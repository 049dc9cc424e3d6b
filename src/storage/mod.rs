pub mod chain;
pub mod utxo;

pub use chain::{Blockchain, BlockchainIterator};
pub use utxo::UtxoIndex;
