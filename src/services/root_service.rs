// src/services/root_service.rs
//! Anchors the root tree on the ledger.
//!
//! One commit runs at a time across all processes (the root-commit lock). A
//! root that is already the latest recorded commit is not sent again.

use crate::blockchain::root_commit::{await_outcome, commit_root, CommitOptions};
use crate::blockchain::Ledger;
use crate::error::{Error, Result};
use crate::merkletree::{MerkleTree, DEFAULT_MAX_LEVELS};
use crate::services::claim_service::{root_tree, ROOT_TREE_PREFIX};
use crate::services::lock::{release_logged, DistributedLock, ROOT_COMMIT_LOCK};
use crate::storage::node_store::Storage;
use crate::storage::root_commits::{RootCommit, RootCommitStore};
use log::{debug, error, info};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Lock lifetime beyond the receipt timeout.
const LOCK_MARGIN: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The current root was already committed.
    NoOp,
    Committed(RootCommit),
}

/// Service committing the root tree's root to the root-commits contract.
pub struct RootService {
    root_tree: MerkleTree,
    commits: RootCommitStore,
    ledger: Arc<dyn Ledger>,
    lock: Arc<dyn DistributedLock>,
    options: CommitOptions,
}

impl RootService {
    /// Creates a RootService.
    ///
    /// # Arguments
    /// * `pool` - database holding the root tree and the commit records
    /// * `ledger` - where roots are sent
    /// * `lock` - lock guarding [`ROOT_COMMIT_LOCK`]
    pub fn new(pool: SqlitePool, ledger: Arc<dyn Ledger>, lock: Arc<dyn DistributedLock>) -> Self {
        Self {
            root_tree: root_tree(&Storage::new(pool.clone()), DEFAULT_MAX_LEVELS),
            commits: RootCommitStore::new(pool),
            ledger,
            lock,
            options: CommitOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CommitOptions) -> Self {
        self.options = options;
        self
    }

    pub fn commits(&self) -> &RootCommitStore {
        &self.commits
    }

    /// Sends the current root-tree root to the ledger and records the receipt.
    ///
    /// # Returns
    /// [`CommitOutcome::NoOp`] when the root is empty or matches the latest
    /// commit, otherwise the stored commit record.
    ///
    /// # Errors
    /// [`Error::Ledger`] if submission fails, the transaction reverts, or no
    /// receipt arrives within the configured timeout.
    pub async fn commit_current_root(&self) -> Result<CommitOutcome> {
        let guard = self
            .lock
            .acquire(ROOT_COMMIT_LOCK, self.options.timeout + LOCK_MARGIN)
            .await?;
        let result = self.commit_locked().await;
        release_logged(guard).await;
        result
    }

    async fn commit_locked(&self) -> Result<CommitOutcome> {
        let root = self.root_tree.root().await?;
        if root.is_zero() {
            debug!("root tree is empty, nothing to commit");
            return Ok(CommitOutcome::NoOp);
        }
        if let Some(latest) = self.commits.latest().await? {
            if latest.root == root {
                debug!("root {root} already committed in block {}", latest.block_number);
                return Ok(CommitOutcome::NoOp);
            }
        }

        info!("committing root {root}");
        let progress = commit_root(self.ledger.clone(), *root.as_bytes(), self.options);
        let receipt = await_outcome(progress).await.map_err(|(e, tx_hash)| {
            error!("commit of root {root} failed (tx {tx_hash:?}): {e}");
            Error::Ledger(e)
        })?;

        let commit = RootCommit {
            root,
            block_number: receipt.block_number as i64,
            prefix: String::from_utf8_lossy(ROOT_TREE_PREFIX).into_owned(),
            tx_hash: format!("0x{:x}", receipt.tx_hash),
            contract_address: format!("0x{:x}", receipt.contract_address),
            committer_address: format!("0x{:x}", receipt.committer_address),
        };
        self.commits.insert(&commit).await?;
        info!("root {root} committed in block {}", commit.block_number);
        Ok(CommitOutcome::Committed(commit))
    }

    /// Latest recorded commit, if any.
    pub async fn get_latest(&self) -> Result<Option<RootCommit>> {
        self.commits.latest().await
    }

    /// Runs [`RootService::commit_current_root`] every `interval`.
    pub fn spawn_periodic(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.commit_current_root().await {
                    Ok(CommitOutcome::NoOp) => {}
                    Ok(CommitOutcome::Committed(commit)) => {
                        debug!("periodic commit landed in block {}", commit.block_number)
                    }
                    Err(e) => error!("periodic root commit failed: {e}"),
                }
            }
        })
    }
}
