// src/config.rs
//! Runtime settings.
//!
//! Sources, later ones winning: built-in defaults, an optional `idhub.toml`
//! (or the file named by `IDHUB_CONFIG`), then `IDHUB_*` environment variables
//! such as `IDHUB_DATABASE_URL` or `IDHUB_REDIS_URL`.

use crate::error::Result;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// sqlx SQLite URL.
    pub database_url: String,
    pub database_max_connections: u32,
    pub ledger_rpc_url: String,
    /// Committer key, hex. Without it the hub runs on the simulated ledger.
    pub ledger_private_key: Option<String>,
    pub root_commits_address: String,
    pub universal_resolver_host: Option<String>,
    pub universal_resolver_port: u16,
    pub resolver_timeout_secs: u64,
    /// Without it locks are in-process and events are not published.
    pub redis_url: Option<String>,
    pub commit_interval_secs: u64,
    pub subject_prefix: String,
    pub receipt_timeout_secs: u64,
    pub receipt_poll_interval_ms: u64,
    pub lock_ttl_secs: u64,
    pub lock_acquire_timeout_secs: u64,
}

impl Settings {
    pub fn load() -> Result<Self> {
        let file = std::env::var("IDHUB_CONFIG").unwrap_or_else(|_| "idhub".to_string());
        let settings = Config::builder()
            .set_default("database_url", "sqlite://idhub.db")?
            .set_default("database_max_connections", 8)?
            .set_default("ledger_rpc_url", "http://127.0.0.1:8545")?
            .set_default(
                "root_commits_address",
                "0x0000000000000000000000000000000000000000",
            )?
            .set_default("universal_resolver_port", 8080)?
            .set_default("resolver_timeout_secs", 10)?
            .set_default("commit_interval_secs", 600)?
            .set_default("subject_prefix", "idhub")?
            .set_default("receipt_timeout_secs", 120)?
            .set_default("receipt_poll_interval_ms", 2000)?
            .set_default("lock_ttl_secs", 30)?
            .set_default("lock_acquire_timeout_secs", 30)?
            .add_source(File::with_name(&file).required(false))
            .add_source(Environment::with_prefix("IDHUB").try_parsing(true))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn commit_interval(&self) -> Duration {
        Duration::from_secs(self.commit_interval_secs)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn lock_acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_acquire_timeout_secs)
    }

    pub fn resolver_timeout(&self) -> Duration {
        Duration::from_secs(self.resolver_timeout_secs)
    }
}
