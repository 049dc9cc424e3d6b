// Merkle tree over a transaction set
//
// Built transiently per block to derive the transaction commitment; never
// persisted.

use crate::core::{Hash256, sha256};

#[derive(Debug, Clone)]
pub struct MerkleNode {
    pub left: Option<Box<MerkleNode>>,
    pub right: Option<Box<MerkleNode>>,
    pub data: Hash256,
}

impl MerkleNode {
    /// Leaf node: digest of the raw input bytes.
    pub fn leaf(data: &[u8]) -> MerkleNode {
        MerkleNode {
            left: None,
            right: None,
            data: sha256(data),
        }
    }

    /// Internal node: digest of the concatenated child digests.
    pub fn parent(left: MerkleNode, right: MerkleNode) -> MerkleNode {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(left.data.as_bytes());
        buf.extend_from_slice(right.data.as_bytes());
        MerkleNode {
            data: sha256(&buf),
            left: Some(Box::new(left)),
            right: Some(Box::new(right)),
        }
    }
}

#[derive(Debug)]
pub struct MerkleTree {
    pub root: MerkleNode,
}

impl MerkleTree {
    /// Build a tree over the given leaves. An odd level duplicates its last
    /// node before pairing.
    pub fn new(leaves: &[Vec<u8>]) -> MerkleTree {
        let mut nodes: Vec<MerkleNode> = if leaves.is_empty() {
            vec![MerkleNode::leaf(&[])]
        } else {
            leaves.iter().map(|data| MerkleNode::leaf(data)).collect()
        };

        while nodes.len() > 1 {
            if nodes.len() % 2 != 0 {
                let last = nodes.last().expect("level is non-empty").clone();
                nodes.push(last);
            }

            let mut level = Vec::with_capacity(nodes.len() / 2);
            let mut pairs = nodes.into_iter();
            while let Some(left) = pairs.next() {
                let right = pairs.next().expect("level length is even");
                level.push(MerkleNode::parent(left, right));
            }
            nodes = level;
        }

        let root = nodes.pop().expect("tree has a root");
        MerkleTree { root }
    }

    pub fn root_hash(&self) -> Hash256 {
        self.root.data
    }
}
