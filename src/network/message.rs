// Wire format
//
// Every message is a 12-byte zero-padded ASCII command tag followed by a
// bincode payload. One message per connection.

use serde::{Deserialize, Serialize};

use crate::core::{Hash256, decode, encode};

pub const COMMAND_LENGTH: usize = 12;
pub const NODE_VERSION: u32 = 1;

/// What an inventory or data request refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvKind {
    Block,
    Tx,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionPayload {
    pub version: u32,
    pub best_height: u32,
    pub addr_from: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddrPayload {
    pub addr_list: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockPayload {
    pub addr_from: String,
    pub block: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetBlocksPayload {
    pub addr_from: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDataPayload {
    pub addr_from: String,
    pub kind: InvKind,
    pub id: Hash256,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvPayload {
    pub addr_from: String,
    pub kind: InvKind,
    pub items: Vec<Hash256>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxPayload {
    pub addr_from: String,
    pub transaction: Vec<u8>,
}

/// A complete peer message.
#[derive(Debug, Clone)]
pub enum Message {
    Version(VersionPayload),
    Addr(AddrPayload),
    Block(BlockPayload),
    GetBlocks(GetBlocksPayload),
    GetData(GetDataPayload),
    Inv(InvPayload),
    Tx(TxPayload),
}

impl Message {
    pub fn command(&self) -> &'static str {
        match self {
            Message::Version(_) => "version",
            Message::Addr(_) => "addr",
            Message::Block(_) => "block",
            Message::GetBlocks(_) => "getblocks",
            Message::GetData(_) => "getdata",
            Message::Inv(_) => "inv",
            Message::Tx(_) => "tx",
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0u8; COMMAND_LENGTH];
        let command = self.command().as_bytes();
        buf[..command.len()].copy_from_slice(command);

        let payload = match self {
            Message::Version(p) => encode(p),
            Message::Addr(p) => encode(p),
            Message::Block(p) => encode(p),
            Message::GetBlocks(p) => encode(p),
            Message::GetData(p) => encode(p),
            Message::Inv(p) => encode(p),
            Message::Tx(p) => encode(p),
        };
        buf.extend_from_slice(&payload);
        buf
    }

    pub fn deserialize(data: &[u8]) -> Result<Message, String> {
        if data.len() < COMMAND_LENGTH {
            return Err(format!("Message too short: {} bytes", data.len()));
        }

        let tag = String::from_utf8_lossy(&data[..COMMAND_LENGTH]);
        let command = tag.trim_end_matches('\0').to_string();
        let payload = &data[COMMAND_LENGTH..];

        let message = match command.as_str() {
            "version" => Message::Version(decode(payload)?),
            "addr" => Message::Addr(decode(payload)?),
            "block" => Message::Block(decode(payload)?),
            "getblocks" => Message::GetBlocks(decode(payload)?),
            "getdata" => Message::GetData(decode(payload)?),
            "inv" => Message::Inv(decode(payload)?),
            "tx" => Message::Tx(decode(payload)?),
            other => return Err(format!("Unknown command: {}", other)),
        };
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_roundtrip() {
        let msg = Message::Version(VersionPayload {
            version: NODE_VERSION,
            best_height: 7,
            addr_from: "localhost:3000".to_string(),
        });
        let bytes = msg.serialize();
        assert_eq!(&bytes[..7], b"version");
        assert!(bytes[7..COMMAND_LENGTH].iter().all(|b| *b == 0));

        match Message::deserialize(&bytes).unwrap() {
            Message::Version(p) => {
                assert_eq!(p.version, NODE_VERSION);
                assert_eq!(p.best_height, 7);
                assert_eq!(p.addr_from, "localhost:3000");
            }
            other => panic!("wrong message: {:?}", other),
        }
    }

    #[test]
    fn test_inv_roundtrip() {
        let items = vec![Hash256([1u8; 32]), Hash256([2u8; 32])];
        let msg = Message::Inv(InvPayload {
            addr_from: "localhost:3001".to_string(),
            kind: InvKind::Block,
            items: items.clone(),
        });

        match Message::deserialize(&msg.serialize()).unwrap() {
            Message::Inv(p) => {
                assert_eq!(p.kind, InvKind::Block);
                assert_eq!(p.items, items);
            }
            other => panic!("wrong message: {:?}", other),
        }
    }

    #[test]
    fn test_getdata_roundtrip() {
        let msg = Message::GetData(GetDataPayload {
            addr_from: "localhost:3001".to_string(),
            kind: InvKind::Tx,
            id: Hash256([9u8; 32]),
        });

        match Message::deserialize(&msg.serialize()).unwrap() {
            Message::GetData(p) => {
                assert_eq!(p.kind, InvKind::Tx);
                assert_eq!(p.id, Hash256([9u8; 32]));
            }
            other => panic!("wrong message: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_command_rejected() {
        let mut bytes = vec![0u8; COMMAND_LENGTH];
        bytes[..5].copy_from_slice(b"bogus");
        assert!(Message::deserialize(&bytes).is_err());
    }

    #[test]
    fn test_short_message_rejected() {
        assert!(Message::deserialize(b"ver").is_err());
    }
}
