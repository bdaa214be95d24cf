// src/services/proof_generator.rs
//! Proofs of registration for third-party verifiers.
//!
//! A [`Proof`] chains three Merkle proofs against the last committed root:
//! the credential's claim is in the issuer tree, its revocation twin is not,
//! and the issuer tree's root is in the root tree. With the claim entries
//! included, a verifier only needs the ledger to check it.

use crate::claims::{DidDigest, RegisteredDocument, SetRootKey};
use crate::error::{Error, Result};
use crate::merkletree::{verify_proof, Entry, Hash, MerkleProof, MerkleTree, DEFAULT_MAX_LEVELS};
use crate::models::credential::CredentialInput;
use crate::services::claim_service::{did_tree, root_tree, RootClaimIndex};
use crate::storage::node_store::Storage;
use crate::storage::root_commits::RootCommitStore;
use crate::utils::multihash::to_hex;
use log::debug;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// Block number reported when no root has been committed yet.
pub const UNCOMMITTED_BLOCK: i64 = -1;

/// Proof that a credential is registered and not revoked.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Proof {
    /// Membership of the Registered-Document claim in the issuer tree.
    pub exists_in_did_mt_proof: MerkleProof,
    /// Non-membership of its version-1 twin in the issuer tree.
    pub not_revoked_in_did_mt_proof: MerkleProof,
    /// Membership of the issuer's Set-Root-Key claim in the root tree.
    pub did_root_exists_proof: MerkleProof,
    pub did_root_exists_version: u32,
    pub did_root: Hash,
    pub root: Hash,
    /// [`UNCOMMITTED_BLOCK`] when `root` is the live, uncommitted root.
    pub block_number: i64,
    pub contract_address: Option<String>,
    pub tx_hash: Option<String>,
    pub committer_address: Option<String>,
    pub claim_entry: Entry,
    pub revocation_entry: Entry,
    pub did_root_claim_entry: Entry,
}

impl Proof {
    /// Checks the three proofs against each other and `root`.
    pub fn verify(&self) -> bool {
        let srk_root = SetRootKey::from_entry(&self.did_root_claim_entry)
            .map(|srk| srk.root == self.did_root)
            .unwrap_or(false);
        srk_root
            && self.exists_in_did_mt_proof.existence
            && verify_proof(
                &self.did_root,
                &self.exists_in_did_mt_proof,
                &self.claim_entry.slot(),
                &self.claim_entry.hvalue(),
            )
            && !self.not_revoked_in_did_mt_proof.existence
            && verify_proof(
                &self.did_root,
                &self.not_revoked_in_did_mt_proof,
                &self.revocation_entry.slot(),
                &self.revocation_entry.hvalue(),
            )
            && self.did_root_exists_proof.existence
            && verify_proof(
                &self.root,
                &self.did_root_exists_proof,
                &self.did_root_claim_entry.slot(),
                &self.did_root_claim_entry.hvalue(),
            )
    }
}

pub struct ProofGenerator {
    storage: Storage,
    root_tree: MerkleTree,
    commits: RootCommitStore,
}

impl ProofGenerator {
    pub fn new(pool: SqlitePool) -> Self {
        let storage = Storage::new(pool.clone());
        Self {
            root_tree: root_tree(&storage, DEFAULT_MAX_LEVELS),
            storage,
            commits: RootCommitStore::new(pool),
        }
    }

    /// Builds a [`Proof`] for `input` against the latest committed root, or
    /// the live root if nothing was committed yet.
    ///
    /// # Errors
    /// - [`Error::NotFound`] if the issuer has no root claim in that root, or
    ///   the credential is not in the issuer tree it points at
    /// - [`Error::Revoked`] if the revocation twin is present
    pub async fn generate_proof(&self, input: &CredentialInput) -> Result<Proof> {
        let subject = input.claim_subject()?;
        let digest = DidDigest::of(&subject.issuer)?;
        let claim = RegisteredDocument::new(subject.multihash, digest, subject.document_type);
        let claim_entry = claim.entry()?;
        let revocation_entry = claim.revoked().entry()?;

        let latest = self.commits.latest().await?;
        let root = match &latest {
            Some(commit) => commit.root,
            None => self.root_tree.root().await?,
        };
        let snapshot = self.root_tree.snapshot(root).await?;

        let (srk_entry, version) = self.root_claim_in(&snapshot, &digest).await?;
        let srk = SetRootKey::from_entry(&srk_entry)?;
        let did_snapshot = did_tree(&self.storage, &digest, DEFAULT_MAX_LEVELS)
            .snapshot(srk.root)
            .await?;

        let (exists, value) = did_snapshot
            .generate_proof(&claim_entry.slot(), Some(srk.root))
            .await?;
        if !exists.existence || value != Some(claim_entry.hvalue()) {
            return Err(Error::NotFound(format!(
                "credential {} in tree of {} at root {}",
                to_hex(&subject.multihash),
                subject.issuer,
                srk.root
            )));
        }
        let (not_revoked, _) = did_snapshot
            .generate_proof(&revocation_entry.slot(), Some(srk.root))
            .await?;
        if not_revoked.existence {
            return Err(Error::Revoked);
        }
        let did_root_exists = snapshot.entry_proof(&srk_entry, Some(root)).await?;

        debug!(
            "proof for {} at root {root} via root claim v{version}",
            to_hex(&subject.multihash)
        );
        Ok(Proof {
            exists_in_did_mt_proof: exists,
            not_revoked_in_did_mt_proof: not_revoked,
            did_root_exists_proof: did_root_exists,
            did_root_exists_version: version,
            did_root: srk.root,
            root,
            block_number: latest
                .as_ref()
                .map_or(UNCOMMITTED_BLOCK, |c| c.block_number),
            contract_address: latest.as_ref().map(|c| c.contract_address.clone()),
            tx_hash: latest.as_ref().map(|c| c.tx_hash.clone()),
            committer_address: latest.as_ref().map(|c| c.committer_address.clone()),
            claim_entry,
            revocation_entry,
            did_root_claim_entry: srk_entry,
        })
    }

    /// Newest root claim of the DID that `snapshot` contains.
    async fn root_claim_in(&self, snapshot: &MerkleTree, did: &DidDigest) -> Result<(Entry, u32)> {
        let index = RootClaimIndex::new(&self.storage, did)?;
        for version in (0..index.len().await?).rev() {
            let entry = index.get(version).await?;
            if snapshot.contains(&entry).await? {
                return Ok((entry, version));
            }
        }
        Err(Error::NotFound(format!("root claim for {did} in committed root")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{content_credential, Fixture};

    #[tokio::test]
    async fn test_uncommitted_proof_uses_live_root() {
        let fx = Fixture::with_tree().await;
        let vc = fx.sign(content_credential(&fx.did, "https://ap.com/article/1"));
        fx.claims.claim_content(&vc).await.unwrap();

        let proof = fx.proofs.generate_proof(&CredentialInput::Signed(vc)).await.unwrap();
        assert_eq!(proof.block_number, UNCOMMITTED_BLOCK);
        assert_eq!(proof.root, fx.claims.root_tree().root().await.unwrap());
        assert_eq!(proof.did_root_exists_version, 1);
        assert!(proof.tx_hash.is_none());
        assert!(proof.verify());
    }

    #[tokio::test]
    async fn test_unregistered_credential() {
        let fx = Fixture::with_tree().await;
        let vc = fx.sign(content_credential(&fx.did, "https://ap.com/never"));
        assert!(matches!(
            fx.proofs.generate_proof(&CredentialInput::Signed(vc)).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_issuer() {
        let fx = Fixture::with_tree().await;
        let other: crate::models::did::Did = "did:ethuri:unknown".parse().unwrap();
        let vc = fx.sign(content_credential(&other, "https://ap.com/x"));
        assert!(matches!(
            fx.proofs.generate_proof(&CredentialInput::Signed(vc)).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_tampered_proof_fails_verification() {
        let fx = Fixture::with_tree().await;
        let vc = fx.sign(content_credential(&fx.did, "https://ap.com/article/1"));
        fx.claims.claim_content(&vc).await.unwrap();
        let mut proof = fx.proofs.generate_proof(&CredentialInput::Signed(vc)).await.unwrap();
        proof.did_root = proof.root;
        assert!(!proof.verify());
    }
}
