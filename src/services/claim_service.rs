// src/services/claim_service.rs
//! Claim Service
//!
//! Builds and extends the per-DID Merkle trees and keeps the root tree in step
//! with them:
//! - DID trees: Authorize-KSign claims for the DID's signing keys, and one
//!   Registered-Document claim per credential (version 1 marks a revocation)
//! - Root tree: one Set-Root-Key claim per DID-tree root, versioned 0, 1, 2…
//!
//! Every mutation of a DID tree, the root claim that follows it and the stored
//! credential land in a single database transaction. Writers hold the DID's
//! distributed lock throughout and the root-tree lock while the root claim is
//! staged and committed.

use crate::claims::{AuthKey, Claim, DidDigest, RegisteredDocument, SetRootKey};
use crate::error::{Error, Result};
use crate::merkletree::node::{index_record, parse_entry_record};
use crate::merkletree::{Entry, Hash, MerkleTree, DEFAULT_MAX_LEVELS, HASH_ZERO};
use crate::models::credential::{ClaimSubject, CompactJwt, CredentialInput, VerifiableCredential};
use crate::models::did::Did;
use crate::services::did_resolver::DidResolver;
use crate::services::events::{announce, ClaimEvent, EventPublisher};
use crate::services::lock::{did_lock_key, release_logged, DistributedLock, LockGuard, ROOT_TREE_LOCK};
use crate::services::verifier::Verifier;
use crate::storage::credential_store::{CredentialStore, StoredCredential};
use crate::storage::node_store::{Storage, Tx};
use crate::utils::multihash::{to_hex, MULTIHASH_LEN};
use log::{debug, info, warn};
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use std::time::Duration;

/// Node-store prefix of the root tree.
pub const ROOT_TREE_PREFIX: &[u8] = b"merkletree";

/// Node-store prefix of the Set-Root-Key index records.
pub const ROOT_CLAIM_INDEX_PREFIX: &[u8] = b"rootclaims";

/// Commit attempts before a transient failure is returned to the caller.
const MAX_COMMIT_ATTEMPTS: u32 = 8;

/// Delay before retry `n` is `n` times this.
const RETRY_BACKOFF: Duration = Duration::from_millis(10);

const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);

/// The root tree over `storage`.
pub fn root_tree(storage: &Storage, max_levels: usize) -> MerkleTree {
    MerkleTree::new(storage.with_prefix(ROOT_TREE_PREFIX), max_levels)
}

/// The tree of one DID over `storage`.
pub fn did_tree(storage: &Storage, did: &DidDigest, max_levels: usize) -> MerkleTree {
    MerkleTree::new(storage.with_prefix(did.as_bytes()), max_levels)
}

/// HIndex shared by every Set-Root-Key claim of a DID.
pub fn root_claim_hindex(did: &DidDigest) -> Result<Hash> {
    Ok(SetRootKey::new(*did, HASH_ZERO, 0).entry()?.hindex())
}

/// Index of the Set-Root-Key claims written for one DID.
///
/// Records are keyed `HIndex ‖ version` (big-endian) and hold the claim entry,
/// so the number of records is the next version to write.
#[derive(Clone, Debug)]
pub struct RootClaimIndex {
    storage: Storage,
    hindex: Hash,
}

impl RootClaimIndex {
    pub fn new(storage: &Storage, did: &DidDigest) -> Result<Self> {
        let hindex = root_claim_hindex(did)?;
        Ok(Self {
            storage: storage
                .with_prefix(ROOT_CLAIM_INDEX_PREFIX)
                .with_prefix(hindex.as_bytes()),
            hindex,
        })
    }

    fn key(&self, version: u32) -> Vec<u8> {
        let mut key = self.hindex.as_bytes().to_vec();
        key.extend_from_slice(&version.to_be_bytes());
        key
    }

    /// Number of root claims written so far.
    pub async fn len(&self) -> Result<u32> {
        Ok(self.storage.count().await? as u32)
    }

    pub async fn get(&self, version: u32) -> Result<Entry> {
        parse_entry_record(&self.storage.get(&self.key(version)).await?)
    }

    pub async fn latest(&self) -> Result<Option<SetRootKey>> {
        match self.len().await? {
            0 => Ok(None),
            n => Ok(Some(SetRootKey::from_entry(&self.get(n - 1).await?)?)),
        }
    }

    /// Buffers the record for `entry` in a new transaction.
    fn stage(&self, version: u32, entry: &Entry) -> Tx {
        let mut tx = self.storage.new_tx();
        tx.put(&self.key(version), &index_record(entry));
        tx
    }
}

/// Result of a registration or revocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimReceipt {
    pub multihash: [u8; MULTIHASH_LEN],
    pub claim: RegisteredDocument,
    /// Root claim written for the new DID-tree root.
    pub root_claim: SetRootKey,
}

/// Service for DID trees, credential claims and root claims.
///
/// Holds:
/// - the node store the trees live in
/// - the credential store
/// - a [`Verifier`] (and through it the DID resolver)
/// - the distributed lock serializing writers per DID
/// - an optional event publisher
pub struct ClaimService {
    storage: Storage,
    root_tree: MerkleTree,
    max_levels: usize,
    credentials: CredentialStore,
    verifier: Verifier,
    lock: Arc<dyn DistributedLock>,
    lock_ttl: Duration,
    publisher: Option<Arc<dyn EventPublisher>>,
    subject_prefix: String,
}

impl ClaimService {
    /// Creates a ClaimService over `pool`.
    ///
    /// # Arguments
    /// * `pool` - database holding the node and credential tables
    /// * `verifier` - signature verifier with its DID resolver
    /// * `lock` - lock used for per-DID serialization
    pub fn new(pool: SqlitePool, verifier: Verifier, lock: Arc<dyn DistributedLock>) -> Self {
        let storage = Storage::new(pool.clone());
        Self {
            root_tree: root_tree(&storage, DEFAULT_MAX_LEVELS),
            storage,
            max_levels: DEFAULT_MAX_LEVELS,
            credentials: CredentialStore::new(pool),
            verifier,
            lock,
            lock_ttl: DEFAULT_LOCK_TTL,
            publisher: None,
            subject_prefix: String::new(),
        }
    }

    /// Publishes add/revoke events under `subject_prefix`.
    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>, subject_prefix: &str) -> Self {
        self.publisher = Some(publisher);
        self.subject_prefix = subject_prefix.to_string();
        self
    }

    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn root_tree(&self) -> &MerkleTree {
        &self.root_tree
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn did_tree(&self, did: &Did) -> Result<MerkleTree> {
        Ok(did_tree(&self.storage, &DidDigest::of(did)?, self.max_levels))
    }

    async fn lock_did(&self, digest: &DidDigest) -> Result<LockGuard> {
        Ok(self.lock.acquire(&did_lock_key(digest), self.lock_ttl).await?)
    }

    /// Initializes a DID tree with one Authorize-KSign claim per key and
    /// records its root in the root tree.
    ///
    /// Keys already in the tree are skipped; a call that adds nothing to a
    /// tree that already has a root claim is a no-op.
    ///
    /// # Errors
    /// [`Error::DidNotFound`] if the DID has no resolvable document.
    pub async fn create_tree_for_did(&self, did: &Did, keys: &[k256::PublicKey]) -> Result<Hash> {
        self.verifier.resolver().resolve(did).await?;
        let digest = DidDigest::of(did)?;
        let guard = self.lock_did(&digest).await?;
        let result = self.create_tree_locked(did, &digest, keys).await;
        release_logged(guard).await;
        result
    }

    async fn create_tree_locked(
        &self,
        did: &Did,
        digest: &DidDigest,
        keys: &[k256::PublicKey],
    ) -> Result<Hash> {
        let tree = did_tree(&self.storage, digest, self.max_levels);
        let mut entries = Vec::new();
        for key in keys {
            let entry = AuthKey::new(*key).entry()?;
            if !tree.contains(&entry).await? && !entries.contains(&entry) {
                entries.push(entry);
            }
        }
        let index = RootClaimIndex::new(&self.storage, digest)?;
        if entries.is_empty() && index.len().await? > 0 {
            debug!("tree for {did} already initialized");
            return tree.root().await;
        }
        let root_claim = self.commit_did_mutation(digest, &entries, None).await?;
        info!(
            "created tree for {did} with {} new keys, root claim v{}",
            entries.len(),
            root_claim.version
        );
        Ok(root_claim.root)
    }

    /// Verifies a linked-data credential and registers it in its issuer's
    /// tree.
    ///
    /// # Errors
    /// - [`Error::UnsupportedSignatureSuite`] for non-secp256k1 proofs or keys
    /// - [`Error::SignerNotAuthorized`] if the signing key is not an
    ///   Authorize-KSign claim of the issuer tree
    /// - [`Error::BadSignature`] if the proof does not verify
    /// - [`Error::DuplicateClaim`] if the credential is already registered
    pub async fn claim_content(&self, vc: &VerifiableCredential) -> Result<ClaimReceipt> {
        let issuer = vc.issuer_did()?;
        let digest = DidDigest::of(&issuer)?;
        let signer = self.verifier.signer_key(vc).await?;

        let guard = self.lock_did(&digest).await?;
        let result = self.claim_content_locked(vc, &issuer, &digest, &signer).await;
        release_logged(guard).await;
        let receipt = result?;

        info!("registered {} credential {} for {issuer}", vc.document_type().as_str(), to_hex(&receipt.multihash));
        self.publish(&issuer, ClaimEvent::Add, &vc.canonical_json()?).await;
        Ok(receipt)
    }

    async fn claim_content_locked(
        &self,
        vc: &VerifiableCredential,
        issuer: &Did,
        digest: &DidDigest,
        signer: &k256::PublicKey,
    ) -> Result<ClaimReceipt> {
        let tree = did_tree(&self.storage, digest, self.max_levels);
        if !tree.contains(&AuthKey::new(*signer).entry()?).await? {
            return Err(Error::SignerNotAuthorized);
        }
        Verifier::verify_proof(vc, signer)?;

        let multihash = vc.multihash()?;
        if self.credentials.exists(&multihash).await? {
            return Err(Error::DuplicateClaim);
        }
        let claim = RegisteredDocument::new(multihash, *digest, vc.document_type());
        let root_claim = self
            .commit_did_mutation(digest, &[claim.entry()?], Some(PendingCredential::Signed(vc)))
            .await
            .map_err(duplicate_as(Error::DuplicateClaim))?;
        debug!("root claim v{} for {issuer}", root_claim.version);
        Ok(ClaimReceipt {
            multihash,
            claim,
            root_claim,
        })
    }

    /// Registers a compact JWT submitted by `sender`, who must be its issuer.
    ///
    /// # Errors
    /// [`Error::Unauthorized`] if `sender` is not the `iss` of the token; see
    /// [`ClaimService::add_jwt_claim`] for the rest.
    pub async fn claim_jwt(&self, token: &str, sender: &Did) -> Result<ClaimReceipt> {
        let jwt = CompactJwt::parse(token)?;
        let issuer = jwt.issuer_did()?;
        if &issuer != sender {
            return Err(Error::Unauthorized(format!(
                "{sender} cannot register a jwt issued by {issuer}"
            )));
        }
        self.add_jwt_claim(&jwt, sender).await
    }

    /// Verifies a JWT against its issuer's document and registers it.
    ///
    /// `exp` and `nbf` are not checked: registration records that the issuer
    /// signed the token, not that it is currently valid.
    pub async fn add_jwt_claim(&self, jwt: &CompactJwt, sender: &Did) -> Result<ClaimReceipt> {
        self.verifier.verify_jwt(jwt).await?;
        let issuer = jwt.issuer_did()?;
        let digest = DidDigest::of(&issuer)?;

        let guard = self.lock_did(&digest).await?;
        let result = self.add_jwt_locked(jwt, sender, &digest).await;
        release_logged(guard).await;
        let receipt = result?;

        info!("registered jwt {} for {issuer}", to_hex(&receipt.multihash));
        self.publish(&issuer, ClaimEvent::Add, jwt.as_str()).await;
        Ok(receipt)
    }

    async fn add_jwt_locked(&self, jwt: &CompactJwt, sender: &Did, digest: &DidDigest) -> Result<ClaimReceipt> {
        let subject = CredentialInput::Jwt(jwt.as_str().to_string()).claim_subject()?;
        if self.credentials.exists(&subject.multihash).await? {
            return Err(Error::DuplicateClaim);
        }
        let claim = RegisteredDocument::new(subject.multihash, *digest, subject.document_type);
        let root_claim = self
            .commit_did_mutation(digest, &[claim.entry()?], Some(PendingCredential::Jwt(jwt, sender)))
            .await
            .map_err(duplicate_as(Error::DuplicateClaim))?;
        Ok(ClaimReceipt {
            multihash: subject.multihash,
            claim,
            root_claim,
        })
    }

    /// Revokes a registered credential by adding the version-1 twin of its
    /// Registered-Document claim.
    ///
    /// # Errors
    /// - [`Error::NotFound`] if the credential was never registered
    /// - [`Error::AlreadyRevoked`] if the twin already exists
    pub async fn revoke(&self, input: &CredentialInput) -> Result<ClaimReceipt> {
        let subject = input.claim_subject()?;
        if !self.credentials.exists(&subject.multihash).await? {
            return Err(Error::NotFound(format!("credential {}", to_hex(&subject.multihash))));
        }
        let digest = DidDigest::of(&subject.issuer)?;

        let guard = self.lock_did(&digest).await?;
        let result = self.revoke_locked(&subject, &digest).await;
        release_logged(guard).await;
        let receipt = result?;

        info!("revoked credential {} of {}", to_hex(&subject.multihash), subject.issuer);
        self.publish(&subject.issuer, ClaimEvent::Revoke, &subject.payload).await;
        Ok(receipt)
    }

    async fn revoke_locked(&self, subject: &ClaimSubject, digest: &DidDigest) -> Result<ClaimReceipt> {
        let claim = RegisteredDocument::new(subject.multihash, *digest, subject.document_type).revoked();
        let root_claim = self
            .commit_did_mutation(digest, &[claim.entry()?], None)
            .await
            .map_err(duplicate_as(Error::AlreadyRevoked))?;
        Ok(ClaimReceipt {
            multihash: subject.multihash,
            claim,
            root_claim,
        })
    }

    /// Appends a Set-Root-Key claim for the DID tree's current root.
    ///
    /// # Errors
    /// [`Error::RootUnchanged`] if the latest root claim already holds that root.
    pub async fn add_new_root_claim(&self, did: &Did) -> Result<SetRootKey> {
        let digest = DidDigest::of(did)?;
        let guard = self.lock_did(&digest).await?;
        let result = self.commit_did_mutation(&digest, &[], None).await;
        release_logged(guard).await;
        result
    }

    /// Version the next Set-Root-Key claim of `did` gets.
    pub async fn next_version_for(&self, did: &Did) -> Result<u32> {
        RootClaimIndex::new(&self.storage, &DidDigest::of(did)?)?.len().await
    }

    /// Every claim in the DID's tree.
    pub async fn get_merkle_tree_claims_for_did(&self, did: &Did) -> Result<Vec<Claim>> {
        self.did_tree(did)?
            .entries()
            .await?
            .iter()
            .map(Claim::classify)
            .collect()
    }

    /// Looks a stored credential up by hex keccak digest or hex multihash.
    pub async fn get_credential_by_multihash(&self, hex: &str) -> Result<StoredCredential> {
        self.credentials.get_by_hex(hex).await
    }

    /// Adds `entries` to the DID tree, the matching root claim to the root
    /// tree and `credential` to the credential store in one database
    /// transaction. Transient failures, root pointers moved by another writer
    /// included, are retried with a growing delay. The caller holds the DID
    /// lock.
    async fn commit_did_mutation(
        &self,
        digest: &DidDigest,
        entries: &[Entry],
        credential: Option<PendingCredential<'_>>,
    ) -> Result<SetRootKey> {
        let tree = did_tree(&self.storage, digest, self.max_levels);
        let mut attempt = 1;
        loop {
            match self.try_commit(&tree, digest, entries, credential.as_ref()).await {
                Ok(root_claim) => return Ok(root_claim),
                Err(e) if e.is_retriable() && attempt < MAX_COMMIT_ATTEMPTS => {
                    warn!("commit for did {} failed, retrying (attempt {attempt}): {e}", digest.hex());
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_commit(
        &self,
        tree: &MerkleTree,
        digest: &DidDigest,
        entries: &[Entry],
        credential: Option<&PendingCredential<'_>>,
    ) -> Result<SetRootKey> {
        let mut tx = tree.storage().new_tx();
        for entry in entries {
            tree.add_in(&mut tx, entry).await?;
        }
        let did_root = tree.root_in(&mut tx).await?;

        let guard = self.lock.acquire(ROOT_TREE_LOCK, self.lock_ttl).await?;
        let result = self.commit_with_root_claim(tx, digest, did_root, credential).await;
        release_logged(guard).await;
        result
    }

    async fn commit_with_root_claim(
        &self,
        mut tx: Tx,
        digest: &DidDigest,
        did_root: Hash,
        credential: Option<&PendingCredential<'_>>,
    ) -> Result<SetRootKey> {
        let (root_tx, root_claim) = self.stage_root_claim(digest, did_root).await?;
        tx.add(root_tx);

        let mut db = self.storage.pool().begin().await?;
        tx.commit_in(&mut db).await?;
        if let Some(credential) = credential {
            credential.insert_in(&mut db).await?;
        }
        db.commit().await?;
        Ok(root_claim)
    }

    /// Builds the Set-Root-Key claim for `did_root` and its index record.
    async fn stage_root_claim(&self, digest: &DidDigest, did_root: Hash) -> Result<(Tx, SetRootKey)> {
        let index = RootClaimIndex::new(&self.storage, digest)?;
        let version = index.len().await?;
        if let Some(last) = index.latest().await? {
            if last.root == did_root {
                return Err(Error::RootUnchanged);
            }
        }
        let claim = SetRootKey::new(*digest, did_root, version);
        let entry = claim.entry()?;
        let mut tx = self.root_tree.storage().new_tx();
        self.root_tree.add_in(&mut tx, &entry).await?;
        tx.add(index.stage(version, &entry));
        Ok((tx, claim))
    }

    async fn publish(&self, issuer: &Did, event: ClaimEvent, payload: &str) {
        if let Some(publisher) = &self.publisher {
            announce(publisher.as_ref(), &self.subject_prefix, issuer, event, payload).await;
        }
    }
}

/// Credential row written in the same transaction as its claim.
enum PendingCredential<'a> {
    Signed(&'a VerifiableCredential),
    Jwt(&'a CompactJwt, &'a Did),
}

impl PendingCredential<'_> {
    async fn insert_in(&self, conn: &mut SqliteConnection) -> Result<[u8; MULTIHASH_LEN]> {
        match self {
            PendingCredential::Signed(vc) => CredentialStore::insert_signed_in(conn, vc).await,
            PendingCredential::Jwt(jwt, sender) => CredentialStore::insert_jwt_in(conn, jwt, sender).await,
        }
    }
}

/// Maps a tree-level duplicate onto the claim-level error.
fn duplicate_as(error: Error) -> impl FnOnce(Error) -> Error {
    move |e| match e {
        Error::EntryIndexAlreadyExists => error,
        other => other,
    }
}
