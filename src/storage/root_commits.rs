// src/storage/root_commits.rs
//! Append-only record of roots anchored on the ledger.

use crate::error::{Error, Result};
use crate::merkletree::Hash;
use log::info;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// A confirmed root commit.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RootCommit {
    pub root: Hash,
    pub block_number: i64,
    /// Prefix of the tree whose root was committed.
    pub prefix: String,
    pub tx_hash: String,
    pub contract_address: String,
    pub committer_address: String,
}

type RootCommitRow = (String, i64, String, String, String, String);

impl TryFrom<RootCommitRow> for RootCommit {
    type Error = Error;

    fn try_from(row: RootCommitRow) -> Result<Self> {
        let (root, block_number, prefix, tx_hash, contract_address, committer_address) = row;
        Ok(RootCommit {
            root: root.parse()?,
            block_number,
            prefix,
            tx_hash,
            contract_address,
            committer_address,
        })
    }
}

#[derive(Clone, Debug)]
pub struct RootCommitStore {
    pool: SqlitePool,
}

impl RootCommitStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Records a commit. A root that is already recorded is never rewritten.
    pub async fn insert(&self, commit: &RootCommit) -> Result<()> {
        let inserted = sqlx::query(
            "INSERT INTO root_commits \
             (root, block_number, prefix, tx_hash, contract_address, committer_address, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) ON CONFLICT(root) DO NOTHING",
        )
        .bind(commit.root.hex())
        .bind(commit.block_number)
        .bind(&commit.prefix)
        .bind(&commit.tx_hash)
        .bind(&commit.contract_address)
        .bind(&commit.committer_address)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?
        .rows_affected();
        if inserted == 0 {
            return Err(Error::Conflict(format!("root {} already committed", commit.root)));
        }
        info!(
            "recorded root commit {} at block {} (tx {})",
            commit.root, commit.block_number, commit.tx_hash
        );
        Ok(())
    }

    /// The commit with the highest block number, if any.
    pub async fn latest(&self) -> Result<Option<RootCommit>> {
        let row: Option<RootCommitRow> = sqlx::query_as(
            "SELECT root, block_number, prefix, tx_hash, contract_address, committer_address \
             FROM root_commits ORDER BY block_number DESC, created_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        row.map(RootCommit::try_from).transpose()
    }

    pub async fn get(&self, root: &Hash) -> Result<Option<RootCommit>> {
        let row: Option<RootCommitRow> = sqlx::query_as(
            "SELECT root, block_number, prefix, tx_hash, contract_address, committer_address \
             FROM root_commits WHERE root = ?",
        )
        .bind(root.hex())
        .fetch_optional(&self.pool)
        .await?;
        row.map(RootCommit::try_from).transpose()
    }

    pub async fn count(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM root_commits")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}
