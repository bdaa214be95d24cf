// src/storage/node_store.rs
//! Transactional, prefix-namespaced key-value store for Merkle nodes.
//!
//! A [`Storage`] is a view over the `claim_nodes` table scoped to a byte
//! prefix. Writes go through a [`Tx`] that buffers everything in memory and
//! lands it in one database transaction on [`Tx::commit`].
//!
//! Node keys are content hashes, so `claim_nodes` keeps one row per key no
//! matter how many prefixes wrote it; the row's `namespace` is the last
//! writer. `claim_node_owners` records every prefix that wrote a key, which is
//! what scoped reads go through.

use crate::error::{Error, Result};
use crate::merkletree::node::record_kind;
use crate::utils::crypto::hash_data;
use crate::utils::serialization::{decode_hex, encode_hex};
use futures::TryStreamExt;
use log::debug;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashMap;

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A prefixed view of the node table.
#[derive(Clone, Debug)]
pub struct Storage {
    pool: SqlitePool,
    prefix: Vec<u8>,
}

impl Storage {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            prefix: Vec::new(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    fn namespace(&self) -> String {
        encode_hex(&self.prefix)
    }

    /// Returns a view whose prefix is this prefix followed by `prefix`.
    pub fn with_prefix(&self, prefix: &[u8]) -> Storage {
        let mut full = self.prefix.clone();
        full.extend_from_slice(prefix);
        Storage {
            pool: self.pool.clone(),
            prefix: full,
        }
    }

    pub fn new_tx(&self) -> Tx {
        Tx {
            storage: self.clone(),
            writes: HashMap::new(),
            roots: HashMap::new(),
            observed_roots: HashMap::new(),
            seq: 0,
        }
    }

    /// Reads a value written under this prefix.
    pub async fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT n.node_value FROM claim_nodes n \
             JOIN claim_node_owners o ON o.node_key = n.node_key \
             WHERE o.namespace = ? AND n.node_key = ?",
        )
        .bind(self.namespace())
        .bind(encode_hex(key))
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some((value,)) => decode_hex(&value),
            None => Err(Error::NotFound(format!("key {}", encode_hex(key)))),
        }
    }

    /// Committed root pointer of this prefix, if one was ever set.
    pub async fn root(&self) -> Result<Option<Vec<u8>>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT root FROM tree_roots WHERE namespace = ?")
                .bind(self.namespace())
                .fetch_optional(&self.pool)
                .await?;
        row.map(|(root,)| decode_hex(&root)).transpose()
    }

    /// Entries written under this prefix in insertion order, at most `limit`.
    pub async fn list(&self, limit: u32) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT n.node_key, n.node_value FROM claim_node_owners o \
             JOIN claim_nodes n ON n.node_key = o.node_key \
             WHERE o.namespace = ? ORDER BY o.seq LIMIT ?",
        )
        .bind(self.namespace())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(k, v)| Ok((decode_hex(&k)?, decode_hex(&v)?)))
            .collect()
    }

    /// Number of entries written under this prefix.
    pub async fn count(&self) -> Result<u64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM claim_node_owners WHERE namespace = ?")
                .bind(self.namespace())
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }

    /// Calls `f(key, value)` for every stored node across all prefixes.
    ///
    /// Operator introspection only; trees never read through this.
    pub async fn iterate<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]),
    {
        let mut rows = sqlx::query_as::<_, (String, String)>(
            "SELECT node_key, node_value FROM claim_nodes ORDER BY created_at, node_key",
        )
        .fetch(&self.pool);
        while let Some((key, value)) = rows.try_next().await? {
            f(&decode_hex(&key)?, &decode_hex(&value)?);
        }
        Ok(())
    }
}

struct Write {
    namespace: String,
    key: Vec<u8>,
    value: Vec<u8>,
    seq: u64,
}

struct RootUpdate {
    /// Root the writer based its changes on; `None` when there was none.
    expected: Option<Vec<u8>>,
    root: Vec<u8>,
}

/// A buffered write transaction.
///
/// Reads see the transaction's own writes first. Nothing reaches the
/// database before [`Tx::commit`]; dropping or closing the tx discards it.
pub struct Tx {
    storage: Storage,
    writes: HashMap<[u8; 32], Write>,
    roots: HashMap<String, RootUpdate>,
    observed_roots: HashMap<String, Option<Vec<u8>>>,
    seq: u64,
}

impl Tx {
    fn cache_key(namespace: &str, key: &[u8]) -> [u8; 32] {
        let mut buf = Vec::with_capacity(namespace.len() + key.len() + 1);
        buf.extend_from_slice(namespace.as_bytes());
        buf.push(b'/');
        buf.extend_from_slice(key);
        hash_data(&buf)
    }

    pub fn prefix(&self) -> &[u8] {
        self.storage.prefix()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.roots.is_empty()
    }

    pub async fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let cache_key = Self::cache_key(&self.storage.namespace(), key);
        if let Some(write) = self.writes.get(&cache_key) {
            return Ok(write.value.clone());
        }
        self.storage.get(key).await
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        let namespace = self.storage.namespace();
        self.seq += 1;
        self.writes.insert(
            Self::cache_key(&namespace, key),
            Write {
                namespace,
                key: key.to_vec(),
                value: value.to_vec(),
                seq: self.seq,
            },
        );
    }

    /// Root pointer of this prefix as the transaction sees it.
    pub async fn get_root(&mut self) -> Result<Option<Vec<u8>>> {
        let namespace = self.storage.namespace();
        if let Some(update) = self.roots.get(&namespace) {
            return Ok(Some(update.root.clone()));
        }
        let root = self.storage.root().await?;
        self.observed_roots
            .entry(namespace)
            .or_insert_with(|| root.clone());
        Ok(root)
    }

    /// Moves the root pointer of this prefix.
    ///
    /// The commit only applies if the committed pointer still equals the one
    /// this transaction first observed.
    pub async fn set_root(&mut self, root: &[u8]) -> Result<()> {
        let namespace = self.storage.namespace();
        let expected = match self.roots.get(&namespace) {
            Some(update) => update.expected.clone(),
            None => match self.observed_roots.get(&namespace) {
                Some(observed) => observed.clone(),
                None => self.storage.root().await?,
            },
        };
        self.roots.insert(
            namespace,
            RootUpdate {
                expected,
                root: root.to_vec(),
            },
        );
        Ok(())
    }

    /// Merges another transaction's writes into this one. On key collisions
    /// the other transaction's value wins.
    pub fn add(&mut self, other: Tx) {
        let mut writes: Vec<Write> = other.writes.into_values().collect();
        writes.sort_by_key(|w| w.seq);
        for mut write in writes {
            self.seq += 1;
            write.seq = self.seq;
            self.writes
                .insert(Self::cache_key(&write.namespace, &write.key), write);
        }
        for (namespace, update) in other.roots {
            match self.roots.get_mut(&namespace) {
                Some(existing) => existing.root = update.root,
                None => {
                    self.roots.insert(namespace, update);
                }
            }
        }
        for (namespace, observed) in other.observed_roots {
            self.observed_roots.entry(namespace).or_insert(observed);
        }
    }

    /// Applies every buffered write in a single database transaction.
    pub async fn commit(self) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let mut db = self.storage.pool.begin().await?;
        self.commit_in(&mut db).await?;
        db.commit().await?;
        Ok(())
    }

    /// Applies every buffered write inside the caller's database transaction,
    /// so other rows can land atomically with the nodes. Nothing is visible
    /// until the caller commits `db`; on error the caller must drop it.
    pub async fn commit_in(self, db: &mut SqliteConnection) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let now = now_millis();

        let mut roots: Vec<(&String, &RootUpdate)> = self.roots.iter().collect();
        roots.sort_by(|a, b| a.0.cmp(b.0));
        for (namespace, update) in roots {
            let root_hex = encode_hex(&update.root);
            let applied = match &update.expected {
                Some(expected) => sqlx::query(
                    "UPDATE tree_roots SET root = ?, updated_at = ? \
                     WHERE namespace = ? AND root = ?",
                )
                .bind(&root_hex)
                .bind(now)
                .bind(namespace)
                .bind(encode_hex(expected))
                .execute(&mut *db)
                .await?
                .rows_affected(),
                None => sqlx::query(
                    "INSERT INTO tree_roots (namespace, root, updated_at) VALUES (?, ?, ?) \
                     ON CONFLICT(namespace) DO NOTHING",
                )
                .bind(namespace)
                .bind(&root_hex)
                .bind(now)
                .execute(&mut *db)
                .await?
                .rows_affected(),
            };
            if applied == 0 {
                return Err(Error::Conflict(namespace.clone()));
            }
        }

        let mut writes: Vec<&Write> = self.writes.values().collect();
        writes.sort_by_key(|w| w.seq);
        for write in &writes {
            let key_hex = encode_hex(&write.key);
            sqlx::query(
                "INSERT INTO claim_nodes (node_key, namespace, node_value, node_type, created_at) \
                 VALUES (?, ?, ?, ?, ?) \
                 ON CONFLICT(node_key) DO UPDATE SET \
                 namespace = excluded.namespace, \
                 node_value = excluded.node_value, \
                 node_type = excluded.node_type",
            )
            .bind(&key_hex)
            .bind(&write.namespace)
            .bind(encode_hex(&write.value))
            .bind(record_kind(&write.value))
            .bind(now)
            .execute(&mut *db)
            .await?;
            sqlx::query(
                "INSERT INTO claim_node_owners (namespace, node_key, created_at) VALUES (?, ?, ?) \
                 ON CONFLICT(namespace, node_key) DO NOTHING",
            )
            .bind(&write.namespace)
            .bind(&key_hex)
            .bind(now)
            .execute(&mut *db)
            .await?;
        }

        debug!(
            "applied tx: {} writes, {} root updates",
            writes.len(),
            self.roots.len()
        );
        Ok(())
    }

    /// Discards all buffered writes.
    pub fn close(self) {}
}
