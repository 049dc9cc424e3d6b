pub mod message;
pub mod server;

pub use message::{InvKind, Message};
pub use server::{CENTRAL_NODE, Server, submit_tx};
