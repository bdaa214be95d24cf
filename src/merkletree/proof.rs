// src/merkletree/proof.rs
//! Membership and non-membership proofs.

use crate::merkletree::hash::{Hash, HASH_ZERO};
use crate::merkletree::node::Node;
use serde::{Deserialize, Serialize};

/// The leaf found on the path of a non-membership proof.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NodeAux {
    pub slot: Hash,
    pub value: Hash,
}

/// Sibling chain from the root down to the position of a slot.
///
/// `siblings[i]` is the sibling at depth `i`. With `existence` set the leaf at
/// the end of the path holds the queried slot; otherwise the path ends at an
/// empty subtree or at the leaf described by `node_aux`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    pub existence: bool,
    pub siblings: Vec<Hash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_aux: Option<NodeAux>,
}

impl MerkleProof {
    pub fn depth(&self) -> usize {
        self.siblings.len()
    }

    /// Checks the proof for `(slot, value)` against `root`.
    pub fn verify(&self, root: &Hash, slot: &Hash, value: &Hash) -> bool {
        verify_proof(root, self, slot, value)
    }
}

/// Recomputes the root from a proof.
///
/// For membership, `value` is the HValue of the entry. For non-membership it
/// is ignored: the proof shows that `slot` is empty or held by another leaf.
pub fn verify_proof(root: &Hash, proof: &MerkleProof, slot: &Hash, value: &Hash) -> bool {
    let mut hash = if proof.existence {
        Node::Leaf { slot: *slot, value: *value }.key()
    } else {
        match &proof.node_aux {
            Some(aux) => {
                if aux.slot == *slot {
                    return false;
                }
                // the other leaf must sit on the same path
                if (0..proof.depth()).any(|i| aux.slot.bit(i) != slot.bit(i)) {
                    return false;
                }
                Node::Leaf { slot: aux.slot, value: aux.value }.key()
            }
            None => HASH_ZERO,
        }
    };
    for (lvl, sibling) in proof.siblings.iter().enumerate().rev() {
        let node = if slot.bit(lvl) {
            Node::Middle { left: *sibling, right: hash }
        } else {
            Node::Middle { left: hash, right: *sibling }
        };
        hash = node.key();
    }
    hash == *root
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_tree_non_membership() {
        let proof = MerkleProof { existence: false, siblings: vec![], node_aux: None };
        assert!(verify_proof(&HASH_ZERO, &proof, &Hash([0; 32]), &HASH_ZERO));
    }

    #[test]
    fn test_single_leaf_membership() {
        let slot = Hash([0x11; 32]);
        let value = Hash([0x22; 32]);
        let root = Node::Leaf { slot, value }.key();
        let proof = MerkleProof { existence: true, siblings: vec![], node_aux: None };
        assert!(proof.verify(&root, &slot, &value));
        assert!(!proof.verify(&root, &slot, &Hash([0x23; 32])));
    }

    #[test]
    fn test_aux_with_same_slot_rejected() {
        let slot = Hash([0x11; 32]);
        let value = Hash([0x22; 32]);
        let root = Node::Leaf { slot, value }.key();
        let proof = MerkleProof {
            existence: false,
            siblings: vec![],
            node_aux: Some(NodeAux { slot, value }),
        };
        assert!(!proof.verify(&root, &slot, &value));
    }
}
