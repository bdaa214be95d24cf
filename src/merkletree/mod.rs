// src/merkletree/mod.rs
//! Poseidon sparse Merkle trees persisted through the node store.

pub mod entry;
pub mod hash;
pub mod node;
pub mod proof;
pub mod tree;

pub use entry::{Element, Entry};
pub use hash::{Hash, HASH_ZERO};
pub use proof::{verify_proof, MerkleProof, NodeAux};
pub use tree::MerkleTree;

/// Depth bound for every tree the hub opens.
pub const DEFAULT_MAX_LEVELS: usize = 150;
