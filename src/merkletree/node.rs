// src/merkletree/node.rs
//! Tree nodes and the tagged records they are stored as.

use crate::error::{Error, Result};
use crate::merkletree::entry::{Entry, ENTRY_BYTES};
use crate::merkletree::hash::{hash_elems, Hash, HASH_ZERO};

pub const TAG_MIDDLE: u8 = 0;
pub const TAG_LEAF: u8 = 1;
pub const TAG_ENTRY: u8 = 2;
pub const TAG_INDEX: u8 = 3;

/// Serialized size of a middle or leaf node.
pub const NODE_BYTES: usize = 65;

/// Domain separator hashed into every leaf key.
const LEAF_DOMAIN: Hash = {
    let mut b = [0u8; 32];
    b[31] = 1;
    Hash(b)
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Empty,
    Leaf { slot: Hash, value: Hash },
    Middle { left: Hash, right: Hash },
}

impl Node {
    /// Key the node is stored under.
    pub fn key(&self) -> Hash {
        match self {
            Node::Empty => HASH_ZERO,
            Node::Leaf { slot, value } => hash_elems(&[*slot, *value, LEAF_DOMAIN]),
            Node::Middle { left, right } => hash_elems(&[*left, *right]),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let (tag, a, b) = match self {
            Node::Empty => return Vec::new(),
            Node::Leaf { slot, value } => (TAG_LEAF, slot, value),
            Node::Middle { left, right } => (TAG_MIDDLE, left, right),
        };
        let mut out = Vec::with_capacity(NODE_BYTES);
        out.push(tag);
        out.extend_from_slice(a.as_bytes());
        out.extend_from_slice(b.as_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != NODE_BYTES {
            return Err(Error::InvalidInput(format!("node of {} bytes", bytes.len())));
        }
        let a = Hash::from_slice(&bytes[1..33])?;
        let b = Hash::from_slice(&bytes[33..65])?;
        match bytes[0] {
            TAG_MIDDLE => Ok(Node::Middle { left: a, right: b }),
            TAG_LEAF => Ok(Node::Leaf { slot: a, value: b }),
            tag => Err(Error::InvalidInput(format!("unexpected node tag {tag}"))),
        }
    }
}

/// Entry data record, stored under the entry's HValue.
pub fn entry_record(entry: &Entry) -> Vec<u8> {
    tagged(TAG_ENTRY, entry)
}

/// Index record pointing at an entry, stored outside the tree proper.
pub fn index_record(entry: &Entry) -> Vec<u8> {
    tagged(TAG_INDEX, entry)
}

fn tagged(tag: u8, entry: &Entry) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + ENTRY_BYTES);
    out.push(tag);
    out.extend_from_slice(&entry.to_bytes());
    out
}

/// Reads an entry or index record back.
pub fn parse_entry_record(bytes: &[u8]) -> Result<Entry> {
    match bytes.first() {
        Some(&TAG_ENTRY) | Some(&TAG_INDEX) => Entry::from_bytes(&bytes[1..]),
        _ => Err(Error::InvalidInput("not an entry record".into())),
    }
}

/// Label written to the `node_type` column for a stored record.
pub fn record_kind(bytes: &[u8]) -> &'static str {
    match bytes.first() {
        Some(&TAG_MIDDLE) => "middle",
        Some(&TAG_LEAF) => "leaf",
        Some(&TAG_ENTRY) => "entry",
        Some(&TAG_INDEX) => "index",
        _ => "raw",
    }
}
