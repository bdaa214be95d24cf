// src/merkletree/tree.rs
//! Sparse Merkle tree over a prefixed [`Storage`].
//!
//! Leaves sit at the shallowest level where their path no longer collides with
//! another leaf, so the tree only grows as deep as the entries require.
//! `max_levels` bounds that depth.

use crate::error::{Error, Result};
use crate::merkletree::entry::Entry;
use crate::merkletree::hash::{Hash, HASH_ZERO};
use crate::merkletree::node::{entry_record, parse_entry_record, Node};
use crate::merkletree::proof::{MerkleProof, NodeAux};
use crate::storage::node_store::{Storage, Tx};
use log::debug;

/// Source the tree reads nodes from.
enum Reader<'a> {
    Committed(&'a Storage),
    Pending(&'a Tx),
}

impl Reader<'_> {
    async fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        match self {
            Reader::Committed(storage) => storage.get(key).await,
            Reader::Pending(tx) => tx.get(key).await,
        }
    }

    async fn node(&self, key: &Hash) -> Result<Node> {
        if key.is_zero() {
            return Ok(Node::Empty);
        }
        Node::from_bytes(&self.get(key.as_bytes()).await?)
    }
}

/// A Merkle tree handle. Snapshots are read-only views pinned at a root.
#[derive(Clone, Debug)]
pub struct MerkleTree {
    storage: Storage,
    max_levels: usize,
    snapshot: Option<Hash>,
}

impl MerkleTree {
    pub fn new(storage: Storage, max_levels: usize) -> Self {
        Self {
            storage,
            max_levels,
            snapshot: None,
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn max_levels(&self) -> usize {
        self.max_levels
    }

    pub fn is_snapshot(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Current root; the pinned root for a snapshot, [`HASH_ZERO`] when empty.
    pub async fn root(&self) -> Result<Hash> {
        if let Some(root) = self.snapshot {
            return Ok(root);
        }
        match self.storage.root().await? {
            Some(bytes) => Hash::from_slice(&bytes),
            None => Ok(HASH_ZERO),
        }
    }

    /// Root as seen by a pending transaction on this tree's prefix.
    pub async fn root_in(&self, tx: &mut Tx) -> Result<Hash> {
        if let Some(root) = self.snapshot {
            return Ok(root);
        }
        match tx.get_root().await? {
            Some(bytes) => Hash::from_slice(&bytes),
            None => Ok(HASH_ZERO),
        }
    }

    /// Read-only view of the tree at `root`.
    pub async fn snapshot(&self, root: Hash) -> Result<MerkleTree> {
        if !root.is_zero() {
            Reader::Committed(&self.storage).node(&root).await?;
        }
        Ok(MerkleTree {
            storage: self.storage.clone(),
            max_levels: self.max_levels,
            snapshot: Some(root),
        })
    }

    /// Adds an entry in its own transaction and commits it.
    pub async fn add(&self, entry: &Entry) -> Result<Hash> {
        let mut tx = self.storage.new_tx();
        let root = self.add_in(&mut tx, entry).await?;
        tx.commit().await?;
        Ok(root)
    }

    /// Adds an entry inside `tx`, which must be a transaction on this tree's
    /// storage. Returns the new root.
    pub async fn add_in(&self, tx: &mut Tx, entry: &Entry) -> Result<Hash> {
        if self.snapshot.is_some() {
            return Err(Error::NotWritable);
        }
        let slot = entry.slot();
        let value = entry.hvalue();
        let new_leaf = Node::Leaf { slot, value };

        let mut current = self.root_in(tx).await?;
        let mut siblings: Vec<Hash> = Vec::new();
        let subtree = loop {
            let lvl = siblings.len();
            if lvl >= self.max_levels {
                return Err(Error::ReachedMaxLevel);
            }
            match Reader::Pending(tx).node(&current).await? {
                Node::Empty => {
                    tx.put(new_leaf.key().as_bytes(), &new_leaf.to_bytes());
                    break new_leaf.key();
                }
                Node::Leaf {
                    slot: old_slot,
                    value: old_value,
                } => {
                    if old_slot == slot {
                        return Err(Error::EntryIndexAlreadyExists);
                    }
                    let old_leaf = Node::Leaf {
                        slot: old_slot,
                        value: old_value,
                    };
                    break self.push_leaf(tx, lvl, new_leaf, old_leaf)?;
                }
                Node::Middle { left, right } => {
                    if slot.bit(lvl) {
                        siblings.push(left);
                        current = right;
                    } else {
                        siblings.push(right);
                        current = left;
                    }
                }
            }
        };

        let root = self.climb(tx, &slot, subtree, &siblings);
        tx.put(value.as_bytes(), &entry_record(entry));
        tx.set_root(root.as_bytes()).await?;
        debug!(
            "added entry type {} v{} at depth {}, root {}",
            entry.claim_type(),
            entry.version(),
            siblings.len(),
            root
        );
        Ok(root)
    }

    /// Splits a leaf collision starting at `lvl`. Both leaves end up under
    /// the first level where their paths diverge; returns the subtree key at
    /// `lvl`.
    fn push_leaf(&self, tx: &mut Tx, lvl: usize, new_leaf: Node, old_leaf: Node) -> Result<Hash> {
        let (new_slot, old_slot) = match (new_leaf, old_leaf) {
            (Node::Leaf { slot: a, .. }, Node::Leaf { slot: b, .. }) => (a, b),
            _ => return Err(Error::InvalidInput("push_leaf expects two leaves".into())),
        };
        let split = (lvl..self.max_levels)
            .find(|&i| new_slot.bit(i) != old_slot.bit(i))
            .ok_or(Error::ReachedMaxLevel)?;

        tx.put(new_leaf.key().as_bytes(), &new_leaf.to_bytes());
        let middle = if new_slot.bit(split) {
            Node::Middle {
                left: old_leaf.key(),
                right: new_leaf.key(),
            }
        } else {
            Node::Middle {
                left: new_leaf.key(),
                right: old_leaf.key(),
            }
        };
        tx.put(middle.key().as_bytes(), &middle.to_bytes());

        let mut hash = middle.key();
        for i in (lvl..split).rev() {
            let node = if new_slot.bit(i) {
                Node::Middle {
                    left: HASH_ZERO,
                    right: hash,
                }
            } else {
                Node::Middle {
                    left: hash,
                    right: HASH_ZERO,
                }
            };
            tx.put(node.key().as_bytes(), &node.to_bytes());
            hash = node.key();
        }
        Ok(hash)
    }

    /// Rebuilds the middle nodes from `subtree` back up to the root.
    fn climb(&self, tx: &mut Tx, slot: &Hash, subtree: Hash, siblings: &[Hash]) -> Hash {
        let mut hash = subtree;
        for (lvl, sibling) in siblings.iter().enumerate().rev() {
            let node = if slot.bit(lvl) {
                Node::Middle {
                    left: *sibling,
                    right: hash,
                }
            } else {
                Node::Middle {
                    left: hash,
                    right: *sibling,
                }
            };
            tx.put(node.key().as_bytes(), &node.to_bytes());
            hash = node.key();
        }
        hash
    }

    /// Proof for `slot` at `root` (defaults to the current root). Also returns
    /// the HValue of the leaf when the slot is present.
    pub async fn generate_proof(
        &self,
        slot: &Hash,
        root: Option<Hash>,
    ) -> Result<(MerkleProof, Option<Hash>)> {
        let root = match root {
            Some(root) => root,
            None => self.root().await?,
        };
        let reader = Reader::Committed(&self.storage);
        let mut current = root;
        let mut siblings = Vec::new();
        for lvl in 0..=self.max_levels {
            match reader.node(&current).await? {
                Node::Empty => {
                    return Ok((
                        MerkleProof {
                            existence: false,
                            siblings,
                            node_aux: None,
                        },
                        None,
                    ));
                }
                Node::Leaf { slot: found, value } => {
                    if found == *slot {
                        return Ok((
                            MerkleProof {
                                existence: true,
                                siblings,
                                node_aux: None,
                            },
                            Some(value),
                        ));
                    }
                    return Ok((
                        MerkleProof {
                            existence: false,
                            siblings,
                            node_aux: Some(NodeAux { slot: found, value }),
                        },
                        None,
                    ));
                }
                Node::Middle { left, right } => {
                    if slot.bit(lvl) {
                        siblings.push(left);
                        current = right;
                    } else {
                        siblings.push(right);
                        current = left;
                    }
                }
            }
        }
        Err(Error::ReachedMaxLevel)
    }

    /// Proof that `entry` is (or is not) in the tree at `root`.
    pub async fn entry_proof(&self, entry: &Entry, root: Option<Hash>) -> Result<MerkleProof> {
        Ok(self.generate_proof(&entry.slot(), root).await?.0)
    }

    pub async fn contains(&self, entry: &Entry) -> Result<bool> {
        let (proof, value) = self.generate_proof(&entry.slot(), None).await?;
        Ok(proof.existence && value == Some(entry.hvalue()))
    }

    /// Entry stored under `hvalue`.
    pub async fn get_entry(&self, hvalue: &Hash) -> Result<Entry> {
        let bytes = self.storage.get(hvalue.as_bytes()).await?;
        parse_entry_record(&bytes)
    }

    /// Every entry reachable from the current root, left to right.
    pub async fn entries(&self) -> Result<Vec<Entry>> {
        let reader = Reader::Committed(&self.storage);
        let mut out = Vec::new();
        let mut stack = vec![self.root().await?];
        while let Some(key) = stack.pop() {
            match reader.node(&key).await? {
                Node::Empty => {}
                Node::Leaf { value, .. } => out.push(self.get_entry(&value).await?),
                Node::Middle { left, right } => {
                    stack.push(right);
                    stack.push(left);
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkletree::entry::write_header;
    use crate::merkletree::proof::verify_proof;
    use crate::testutil::memory_pool;

    fn entry(claim_type: u32, version: u32, seed: u8) -> Entry {
        let mut data = [[0u8; 32]; 4];
        data[2][31] = seed;
        data[1][30] = seed.wrapping_mul(3);
        write_header(&mut data[3], claim_type, version, 0);
        Entry::new(data).unwrap()
    }

    async fn tree(prefix: &[u8]) -> MerkleTree {
        let storage = Storage::new(memory_pool().await).with_prefix(prefix);
        MerkleTree::new(storage, 150)
    }

    #[tokio::test]
    async fn test_empty_root_is_zero() {
        let mt = tree(b"t").await;
        assert_eq!(mt.root().await.unwrap(), HASH_ZERO);
        assert!(mt.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_then_prove() {
        let mt = tree(b"t").await;
        let entries: Vec<Entry> = (1..=20).map(|i| entry(77, 0, i)).collect();
        for e in &entries {
            mt.add(e).await.unwrap();
        }
        let root = mt.root().await.unwrap();
        for e in &entries {
            let (proof, value) = mt.generate_proof(&e.slot(), None).await.unwrap();
            assert!(proof.existence);
            assert_eq!(value, Some(e.hvalue()));
            assert!(verify_proof(&root, &proof, &e.slot(), &e.hvalue()));
            assert!(mt.contains(e).await.unwrap());
        }
        assert_eq!(mt.entries().await.unwrap().len(), entries.len());
    }

    #[tokio::test]
    async fn test_absent_entry_non_membership_verifies() {
        let mt = tree(b"t").await;
        for i in 1..=5 {
            mt.add(&entry(77, 0, i)).await.unwrap();
        }
        let absent = entry(77, 0, 99);
        let root = mt.root().await.unwrap();
        let (proof, value) = mt.generate_proof(&absent.slot(), None).await.unwrap();
        assert!(!proof.existence);
        assert!(value.is_none());
        assert!(verify_proof(&root, &proof, &absent.slot(), &HASH_ZERO));
        // a non-membership proof never passes as membership
        let forged = MerkleProof {
            existence: true,
            ..proof
        };
        assert!(!verify_proof(&root, &forged, &absent.slot(), &absent.hvalue()));
    }

    #[tokio::test]
    async fn test_duplicate_rejected_versions_coexist() {
        let mt = tree(b"t").await;
        let v0 = entry(11, 0, 1);
        let v1 = entry(11, 1, 1);
        mt.add(&v0).await.unwrap();
        let root = mt.root().await.unwrap();
        assert!(matches!(
            mt.add(&v0).await,
            Err(Error::EntryIndexAlreadyExists)
        ));
        assert_eq!(mt.root().await.unwrap(), root);
        mt.add(&v1).await.unwrap();
        assert!(mt.contains(&v0).await.unwrap());
        assert!(mt.contains(&v1).await.unwrap());
    }

    #[tokio::test]
    async fn test_root_is_insertion_order_independent() {
        let pool = memory_pool().await;
        let a = MerkleTree::new(Storage::new(pool.clone()).with_prefix(b"a"), 150);
        let b = MerkleTree::new(Storage::new(pool).with_prefix(b"b"), 150);
        let entries: Vec<Entry> = (1..=8).map(|i| entry(5, 0, i)).collect();
        for e in &entries {
            a.add(e).await.unwrap();
        }
        for e in entries.iter().rev() {
            b.add(e).await.unwrap();
        }
        assert_eq!(a.root().await.unwrap(), b.root().await.unwrap());
    }

    #[tokio::test]
    async fn test_snapshot_is_frozen_and_read_only() {
        let mt = tree(b"t").await;
        let first = entry(5, 0, 1);
        mt.add(&first).await.unwrap();
        let pinned = mt.root().await.unwrap();
        let snap = mt.snapshot(pinned).await.unwrap();

        let later = entry(5, 0, 2);
        mt.add(&later).await.unwrap();
        assert_eq!(snap.root().await.unwrap(), pinned);
        assert!(snap.contains(&first).await.unwrap());
        assert!(!snap.contains(&later).await.unwrap());
        assert!(matches!(snap.add(&later).await, Err(Error::NotWritable)));
    }

    #[tokio::test]
    async fn test_snapshot_of_unknown_root_fails() {
        let mt = tree(b"t").await;
        let unknown = Hash([0x0a; 32]);
        assert!(matches!(mt.snapshot(unknown).await, Err(Error::NotFound(_))));
        assert!(mt.snapshot(HASH_ZERO).await.is_ok());
    }

    #[tokio::test]
    async fn test_max_levels_bound() {
        let storage = Storage::new(memory_pool().await).with_prefix(b"t");
        let mt = MerkleTree::new(storage, 0);
        assert!(matches!(
            mt.add(&entry(5, 0, 1)).await,
            Err(Error::ReachedMaxLevel)
        ));
    }

    #[tokio::test]
    async fn test_add_in_shared_tx_commits_together() {
        let pool = memory_pool().await;
        let a = MerkleTree::new(Storage::new(pool.clone()).with_prefix(b"a"), 150);
        let b = MerkleTree::new(Storage::new(pool).with_prefix(b"b"), 150);
        let mut tx_a = a.storage().new_tx();
        a.add_in(&mut tx_a, &entry(5, 0, 1)).await.unwrap();
        let mut tx_b = b.storage().new_tx();
        b.add_in(&mut tx_b, &entry(5, 0, 2)).await.unwrap();
        assert_eq!(a.root().await.unwrap(), HASH_ZERO);
        tx_a.add(tx_b);
        tx_a.commit().await.unwrap();
        assert_ne!(a.root().await.unwrap(), HASH_ZERO);
        assert_ne!(b.root().await.unwrap(), HASH_ZERO);
    }

    #[tokio::test]
    async fn test_get_entry_by_hvalue() {
        let mt = tree(b"t").await;
        let e = entry(5, 3, 4);
        mt.add(&e).await.unwrap();
        assert_eq!(mt.get_entry(&e.hvalue()).await.unwrap(), e);
        assert!(mt.get_entry(&entry(5, 3, 5).hvalue()).await.is_err());
    }
}
