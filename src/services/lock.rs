// src/services/lock.rs
//! Distributed locks.
//!
//! Writers to one DID tree hold `idhub:did:<digest>`, and take
//! `idhub:roottree` around each root-tree commit; the root committer holds
//! `idhub:rootcommit`. [`RedisLock`] coordinates a fleet through Redis
//! (`SET NX PX` plus a compare-and-delete release), [`LocalLock`] serializes
//! tasks inside one process.

use crate::claims::DidDigest;
use async_trait::async_trait;
use log::{debug, warn};
use redis::aio::ConnectionManager;
use redis::{Client, RedisError, Script};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;

/// Lock held around every root commit.
pub const ROOT_COMMIT_LOCK: &str = "idhub:rootcommit";

/// Lock held while a Set-Root-Key claim is staged and committed to the root
/// tree.
pub const ROOT_TREE_LOCK: &str = "idhub:roottree";

/// Lock serializing writes to one DID tree.
pub fn did_lock_key(digest: &DidDigest) -> String {
    format!("idhub:did:{}", digest.hex())
}

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out acquiring lock {0}")]
    Timeout(String),

    /// The lock's TTL ran out, so it was no longer ours to delete.
    #[error("lock {0} expired before release")]
    Expired(String),

    #[error("redis error: {0}")]
    Redis(#[from] RedisError),
}

#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Blocks until `key` is held. The lock expires after `ttl` if the holder
    /// never releases it.
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<LockGuard, LockError>;
}

enum Held {
    Local(OwnedMutexGuard<()>),
    Redis {
        conn: ConnectionManager,
        token: String,
    },
    /// Holds the inner lock but reports a failed release.
    #[cfg(test)]
    Failing(Box<LockGuard>),
    Released,
}

/// A held lock. Released by [`LockGuard::release`] or, failing that, on drop.
pub struct LockGuard {
    key: String,
    held: Held,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn release(mut self) -> Result<(), LockError> {
        match std::mem::replace(&mut self.held, Held::Released) {
            Held::Redis { mut conn, token } => release_redis(&mut conn, &self.key, &token).await,
            #[cfg(test)]
            Held::Failing(inner) => {
                drop(inner);
                Err(LockError::Expired(self.key.clone()))
            }
            Held::Local(_) | Held::Released => Ok(()),
        }
    }

    /// Wraps `self` so the lock is still released but the release reports an
    /// error.
    #[cfg(test)]
    pub(crate) fn failing_release(self) -> LockGuard {
        LockGuard {
            key: self.key.clone(),
            held: Held::Failing(Box::new(self)),
        }
    }
}

/// Releases `guard` once the work under it is done. A failure is logged, not
/// returned: the TTL reclaims a lock that could not be deleted.
pub async fn release_logged(guard: LockGuard) {
    let key = guard.key().to_string();
    if let Err(e) = guard.release().await {
        warn!("failed to release lock {key}: {e}");
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Held::Redis { mut conn, token } = std::mem::replace(&mut self.held, Held::Released) {
            let key = std::mem::take(&mut self.key);
            // Drop cannot await; the TTL covers a missing runtime.
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(e) = release_redis(&mut conn, &key, &token).await {
                        warn!("failed to release lock {key}: {e}");
                    }
                });
            }
        }
    }
}

async fn release_redis(conn: &mut ConnectionManager, key: &str, token: &str) -> Result<(), LockError> {
    let deleted: i32 = Script::new(RELEASE_SCRIPT)
        .key(key)
        .arg(token)
        .invoke_async(conn)
        .await?;
    if deleted == 0 {
        return Err(LockError::Expired(key.to_string()));
    }
    debug!("released lock {key}");
    Ok(())
}

/// Redis-backed lock shared by every hub instance.
#[derive(Clone)]
pub struct RedisLock {
    conn: ConnectionManager,
    acquire_timeout: Duration,
    retry_interval: Duration,
}

impl RedisLock {
    pub async fn connect(url: &str, acquire_timeout: Duration) -> Result<Self, LockError> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            acquire_timeout,
            retry_interval: Duration::from_millis(50),
        })
    }
}

#[async_trait]
impl DistributedLock for RedisLock {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<LockGuard, LockError> {
        let token = uuid::Uuid::new_v4().to_string();
        let deadline = Instant::now() + self.acquire_timeout;
        let mut conn = self.conn.clone();
        loop {
            let reply: Option<String> = redis::cmd("SET")
                .arg(key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(ttl.as_millis() as u64)
                .query_async(&mut conn)
                .await?;
            if reply.is_some() {
                debug!("acquired lock {key}");
                return Ok(LockGuard {
                    key: key.to_string(),
                    held: Held::Redis { conn, token },
                });
            }
            if Instant::now() >= deadline {
                return Err(LockError::Timeout(key.to_string()));
            }
            tokio::time::sleep(self.retry_interval).await;
        }
    }
}

/// In-process lock for single-instance deployments and tests.
///
/// The map holds a mutex per key that is held or awaited. Entries nobody
/// references are dropped on the next acquire, so it stays bounded by the
/// number of keys in use at once.
pub struct LocalLock {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    acquire_timeout: Duration,
}

impl LocalLock {
    pub fn new(acquire_timeout: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            acquire_timeout,
        }
    }

    fn slot(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // only the map refers to an idle slot
        locks.retain(|_, slot| Arc::strong_count(slot) > 1);
        locks.entry(key.to_string()).or_default().clone()
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for LocalLock {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl DistributedLock for LocalLock {
    async fn acquire(&self, key: &str, _ttl: Duration) -> Result<LockGuard, LockError> {
        let slot = self.slot(key);
        match tokio::time::timeout(self.acquire_timeout, slot.lock_owned()).await {
            Ok(guard) => Ok(LockGuard {
                key: key.to_string(),
                held: Held::Local(guard),
            }),
            Err(_) => Err(LockError::Timeout(key.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_local_lock_excludes_same_key() {
        let lock = LocalLock::new(Duration::from_millis(50));
        let held = lock.acquire("a", Duration::from_secs(1)).await.unwrap();
        assert!(matches!(
            lock.acquire("a", Duration::from_secs(1)).await,
            Err(LockError::Timeout(_))
        ));
        // other keys do not contend
        let other = lock.acquire("b", Duration::from_secs(1)).await.unwrap();
        held.release().await.unwrap();
        drop(other);
        assert!(lock.acquire("a", Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_local_lock_serializes_tasks() {
        let lock = Arc::new(LocalLock::default());
        let inside = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = lock.clone();
            let inside = inside.clone();
            handles.push(tokio::spawn(async move {
                let guard = lock.acquire("k", Duration::from_secs(1)).await.unwrap();
                assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
                guard.release().await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_local_lock_forgets_idle_keys() {
        let lock = LocalLock::default();
        for i in 0..50 {
            let guard = lock.acquire(&format!("did-{i}"), Duration::from_secs(1)).await.unwrap();
            guard.release().await.unwrap();
        }
        let held = lock.acquire("held", Duration::from_secs(1)).await.unwrap();
        assert_eq!(lock.tracked_keys(), 1);
        let other = lock.acquire("other", Duration::from_secs(1)).await.unwrap();
        assert_eq!(lock.tracked_keys(), 2);
        drop(held);
        drop(other);
    }

    #[tokio::test]
    async fn test_failed_release_still_unlocks() {
        let lock = LocalLock::new(Duration::from_millis(50));
        let guard = lock.acquire("a", Duration::from_secs(1)).await.unwrap().failing_release();
        assert_eq!(guard.key(), "a");
        assert!(matches!(guard.release().await, Err(LockError::Expired(key)) if key == "a"));
        assert!(lock.acquire("a", Duration::from_secs(1)).await.is_ok());

        let guard = lock.acquire("a", Duration::from_secs(1)).await.unwrap().failing_release();
        release_logged(guard).await;
        assert!(lock.acquire("a", Duration::from_secs(1)).await.is_ok());
    }
}
