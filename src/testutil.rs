// src/testutil.rs
//! Fixtures shared by the unit tests.

use crate::blockchain::root_commit::CommitOptions;
use crate::blockchain::simulated::SimulatedLedger;
use crate::merkletree::{Entry, MerkleTree};
use crate::models::credential::VerifiableCredential;
use crate::models::did::{Did, DidDocument};
use crate::services::claim_service::ClaimService;
use crate::services::events::EventPublisher;
use crate::services::lock::{DistributedLock, LocalLock, LockError, LockGuard, ROOT_TREE_LOCK};
use crate::services::proof_generator::ProofGenerator;
use crate::services::root_service::RootService;
use crate::services::verifier::Verifier;
use crate::storage;
use crate::storage::did_store::SqlDidStore;
use crate::wallet::KeyManager;
use async_trait::async_trait;
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const ISSUER_KEY: &str = "79156abe7fe2fd433dc9df969286b96666489bac508612d0e16593e944c4f69f";
pub const ISSUER_DID: &str = "did:ethuri:86ce6c71-27e6-4e0d-83dd-b60fe4d7785c";

/// Fresh in-memory database with the schema applied. One connection, since
/// every `sqlite::memory:` connection is its own database.
pub async fn memory_pool() -> SqlitePool {
    let pool = storage::connect("sqlite::memory:", 1)
        .await
        .expect("open in-memory database");
    storage::migrate(&pool).await.expect("apply migrations");
    pool
}

/// Unsigned content credential about `subject`.
pub fn content_credential(issuer: &Did, subject: &str) -> VerifiableCredential {
    serde_json::from_value(json!({
        "@context": ["https://www.w3.org/2018/credentials/v1"],
        "type": ["VerifiableCredential", "ContentCredential"],
        "credentialSubject": {"id": subject},
        "issuer": issuer.to_string(),
        "issuanceDate": "2020-01-01T00:00:00Z"
    }))
    .expect("credential json")
}

/// Services wired over one in-memory database, with the issuer's DID
/// document registered locally and a simulated ledger starting at block 2.
pub struct Fixture {
    pub documents: Arc<SqlDidStore>,
    pub did: Did,
    pub keys: KeyManager,
    pub claims: ClaimService,
    pub roots: Arc<RootService>,
    pub proofs: ProofGenerator,
    pub ledger: Arc<SimulatedLedger>,
}

impl Fixture {
    /// Issuer document registered, no trees yet.
    pub async fn new() -> Self {
        Self::build(None, Arc::new(LocalLock::new(Duration::from_secs(30)))).await
    }

    /// Issuer tree created with the issuer key.
    pub async fn with_tree() -> Self {
        let fx = Self::new().await;
        fx.create_tree().await;
        fx
    }

    pub async fn with_publisher(publisher: Arc<dyn EventPublisher>) -> Self {
        let fx = Self::build(Some(publisher), Arc::new(LocalLock::new(Duration::from_secs(30)))).await;
        fx.create_tree().await;
        fx
    }

    /// Issuer tree created, every service sharing `lock`.
    pub async fn with_lock(lock: Arc<dyn DistributedLock>) -> Self {
        let fx = Self::build(None, lock).await;
        fx.create_tree().await;
        fx
    }

    async fn build(publisher: Option<Arc<dyn EventPublisher>>, lock: Arc<dyn DistributedLock>) -> Self {
        let pool = memory_pool().await;
        let documents = Arc::new(SqlDidStore::new(pool.clone()));
        let ledger = Arc::new(SimulatedLedger::new(2));

        let mut claims = ClaimService::new(pool.clone(), Verifier::new(documents.clone()), lock.clone());
        if let Some(publisher) = publisher {
            claims = claims.with_publisher(publisher, "idhub");
        }
        let roots = RootService::new(pool.clone(), ledger.clone(), lock).with_options(CommitOptions {
            timeout: Duration::from_millis(300),
            poll_interval: Duration::from_millis(10),
        });

        let fx = Fixture {
            proofs: ProofGenerator::new(pool),
            documents,
            did: ISSUER_DID.parse().expect("issuer did"),
            keys: KeyManager::from_hex(ISSUER_KEY).expect("issuer key"),
            claims,
            roots: Arc::new(roots),
            ledger,
        };
        fx.register(&fx.did, &fx.keys).await;
        fx
    }

    async fn create_tree(&self) {
        self.claims
            .create_tree_for_did(&self.did, &[self.keys.public_key()])
            .await
            .expect("create issuer tree");
    }

    /// Publishes a DID document holding `keys` as `#key-1`.
    pub async fn register(&self, did: &Did, keys: &KeyManager) {
        let document = DidDocument::new(did.clone(), vec![keys.document_key(did, "key-1")]);
        self.documents.put(&document).await.expect("store document");
    }

    /// A second identity with its own key, document and tree.
    pub async fn add_identity(&self, did: &str) -> (Did, KeyManager) {
        let did: Did = did.parse().expect("did");
        let keys = KeyManager::generate();
        self.register(&did, &keys).await;
        self.claims
            .create_tree_for_did(&did, &[keys.public_key()])
            .await
            .expect("create tree");
        (did, keys)
    }

    /// Signs `vc` with the issuer key.
    pub fn sign(&self, vc: VerifiableCredential) -> VerifiableCredential {
        self.keys
            .sign_credential(vc, &format!("{}#key-1", self.did))
            .expect("sign credential")
    }
}

/// Lock whose guards unlock but report a failed release.
#[derive(Default)]
pub struct UnreleasableLock(LocalLock);

#[async_trait]
impl DistributedLock for UnreleasableLock {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<LockGuard, LockError> {
        Ok(self.0.acquire(key, ttl).await?.failing_release())
    }
}

/// Lock that, the first time the root-tree lock is taken, adds an entry to a
/// DID tree behind the writer's back.
#[derive(Default)]
pub struct InterleavingLock {
    inner: LocalLock,
    pending: Mutex<Option<(MerkleTree, Entry)>>,
}

impl InterleavingLock {
    pub fn interleave(&self, tree: MerkleTree, entry: Entry) {
        *self.pending.lock().unwrap() = Some((tree, entry));
    }
}

#[async_trait]
impl DistributedLock for InterleavingLock {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<LockGuard, LockError> {
        if key == ROOT_TREE_LOCK {
            let pending = self.pending.lock().unwrap().take();
            if let Some((tree, entry)) = pending {
                tree.add(&entry).await.expect("interleaved add");
            }
        }
        self.inner.acquire(key, ttl).await
    }
}
