// Core blockchain data structures

mod block;
mod encoding;
mod hash;
mod merkle;
mod transaction;
mod types;

pub use block::*;
pub use encoding::*;
pub use hash::*;
pub use merkle::*;
pub use transaction::*;
pub use types::*;
