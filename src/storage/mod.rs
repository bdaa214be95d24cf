// src/storage/mod.rs
//! SQLite persistence: Merkle nodes, credentials, root commits and DID documents.

pub mod credential_store;
pub mod did_store;
pub mod node_store;
pub mod root_commits;

pub use credential_store::{CredentialStore, StoredCredential};
pub use did_store::SqlDidStore;
pub use node_store::{Storage, Tx};
pub use root_commits::{RootCommit, RootCommitStore};

use crate::error::Result;
use log::info;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

/// Opens (creating if missing) the database at `database_url`.
///
/// # Arguments
///
/// * `database_url` - a `sqlite:` URL, e.g. `sqlite://idhub.db` or `sqlite::memory:`
/// * `max_connections` - pool size; in-memory databases need exactly one
pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    info!("Opening SQLite database {database_url}");
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Applies the bundled schema migrations.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
