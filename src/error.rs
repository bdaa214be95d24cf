// src/error.rs
//! Error kinds surfaced by the identity hub core.
//!
//! Every fallible operation in the crate returns [`Result`]. Storage and ledger
//! failures are carried verbatim so an operator-level retry policy can decide
//! what to do with them; cryptographic failures always reach the caller.

use crate::blockchain::ledger::LedgerError;
use crate::services::lock::LockError;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// A key, node, credential or record is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// The tree already holds a leaf with the same HIndex and HValue.
    #[error("entry index already exists in the merkle tree")]
    EntryIndexAlreadyExists,

    #[error("claim already registered")]
    DuplicateClaim,

    #[error("claim already revoked")]
    AlreadyRevoked,

    /// A value does not fit inside one field element (top byte must be zero).
    #[error("value is out of the tree field")]
    OutOfField,

    #[error("did method is too long to pack: {0}")]
    DidMethodTooLong(String),

    #[error("invalid did: {0}")]
    InvalidDid(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unsupported signature suite: {0}")]
    UnsupportedSignatureSuite(String),

    #[error("signature verification failed")]
    BadSignature,

    /// The signing key is not published in the issuer's DID tree.
    #[error("signer key is not authorized in the issuer tree")]
    SignerNotAuthorized,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("did not found: {0}")]
    DidNotFound(String),

    /// The DID tree root equals the last Set-Root-Key claim for that DID.
    #[error("did tree root unchanged since last root claim")]
    RootUnchanged,

    /// The credential has a version-1 twin in the proof snapshot.
    #[error("credential is revoked")]
    Revoked,

    #[error("reached maximum tree level")]
    ReachedMaxLevel,

    #[error("merkle tree snapshot is read-only")]
    NotWritable,

    /// A tree root pointer moved between read and commit.
    #[error("concurrent tree update on namespace {0}")]
    Conflict(String),

    #[error("ledger failure: {0}")]
    Ledger(#[from] LedgerError),

    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("migration failure: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("lock failure: {0}")]
    Lock(#[from] LockError),

    #[error("redis failure: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("did resolver failure: {0}")]
    Resolver(String),

    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration failure: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    /// Storage, ledger and lock failures are transient and may be retried.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::Storage(_)
                | Error::Ledger(_)
                | Error::Lock(_)
                | Error::Redis(_)
                | Error::Conflict(_)
        )
    }
}
