// src/storage/credential_store.rs
//! Persistent credential store keyed by multihash.
//!
//! Linked-data credentials (content and license) go to `signed_claims`, compact
//! JWTs to `jwt_claims`. Both tables are insert-only: a second insert of the
//! same multihash is rejected instead of overwriting the first.

use crate::claims::DocumentType;
use crate::error::{Error, Result};
use crate::models::credential::{CompactJwt, VerifiableCredential};
use crate::models::did::Did;
use crate::utils::multihash::{parse_hex, to_hex, MULTIHASH_LEN};
use log::debug;
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};

/// A stored compact JWT credential.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JwtRecord {
    pub multihash: String,
    pub jwt: String,
    pub issuer: String,
    pub subject: Option<String>,
    pub sender: String,
    /// Decoded payload JSON.
    pub data: serde_json::Value,
    #[serde(rename = "type")]
    pub jwt_type: Option<String>,
    pub issued_at: Option<i64>,
}

/// A credential as it was submitted.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoredCredential {
    Signed {
        doc_type: DocumentType,
        credential: VerifiableCredential,
    },
    Jwt(JwtRecord),
}

/// Store for both credential shapes.
#[derive(Clone, Debug)]
pub struct CredentialStore {
    pool: SqlitePool,
}

impl CredentialStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Stores a linked-data credential, proof included.
    ///
    /// # Returns
    /// The credential's multihash, or [`Error::DuplicateClaim`] if a credential
    /// with the same canonical form is already stored.
    pub async fn insert_signed(&self, vc: &VerifiableCredential) -> Result<[u8; MULTIHASH_LEN]> {
        let mut conn = self.pool.acquire().await?;
        Self::insert_signed_in(&mut conn, vc).await
    }

    /// [`CredentialStore::insert_signed`] on a caller-held connection or
    /// transaction.
    pub async fn insert_signed_in(
        conn: &mut SqliteConnection,
        vc: &VerifiableCredential,
    ) -> Result<[u8; MULTIHASH_LEN]> {
        let multihash = vc.multihash()?;
        let proof_json = match &vc.proof {
            Some(proof) => serde_json::to_string(proof)?,
            None => "null".to_string(),
        };
        let inserted = sqlx::query(
            "INSERT INTO signed_claims \
             (multihash, type, doc_type, issuer, subject_json, proof_json, issuance_date, credential) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) ON CONFLICT(multihash) DO NOTHING",
        )
        .bind(to_hex(&multihash))
        .bind(vc.type_name())
        .bind(vc.document_type() as u32)
        .bind(&vc.issuer)
        .bind(serde_json::to_string(&vc.credential_subject)?)
        .bind(proof_json)
        .bind(&vc.issuance_date)
        .bind(serde_json::to_string(vc)?)
        .execute(&mut *conn)
        .await?
        .rows_affected();
        if inserted == 0 {
            return Err(Error::DuplicateClaim);
        }
        debug!("stored signed credential {}", to_hex(&multihash));
        Ok(multihash)
    }

    /// Stores a compact JWT together with the DID that submitted it.
    ///
    /// # Returns
    /// The token's multihash, or [`Error::DuplicateClaim`] for a token already
    /// stored.
    pub async fn insert_jwt(&self, jwt: &CompactJwt, sender: &Did) -> Result<[u8; MULTIHASH_LEN]> {
        let mut conn = self.pool.acquire().await?;
        Self::insert_jwt_in(&mut conn, jwt, sender).await
    }

    pub async fn insert_jwt_in(
        conn: &mut SqliteConnection,
        jwt: &CompactJwt,
        sender: &Did,
    ) -> Result<[u8; MULTIHASH_LEN]> {
        let multihash = jwt.multihash();
        let data = serde_json::to_string(&jwt.payload)?;
        let inserted = sqlx::query(
            "INSERT INTO jwt_claims \
             (multihash, jwt, issuer, subject, sender, data, type, issued_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) ON CONFLICT(multihash) DO NOTHING",
        )
        .bind(to_hex(&multihash))
        .bind(jwt.as_str())
        .bind(&jwt.payload.iss)
        .bind(jwt.payload.sub.as_deref())
        .bind(sender.to_string())
        .bind(data)
        .bind(jwt.header.typ.as_deref())
        .bind(jwt.payload.iat)
        .execute(&mut *conn)
        .await?
        .rows_affected();
        if inserted == 0 {
            return Err(Error::DuplicateClaim);
        }
        debug!("stored jwt credential {}", to_hex(&multihash));
        Ok(multihash)
    }

    /// True if either table holds `multihash`.
    pub async fn exists(&self, multihash: &[u8; MULTIHASH_LEN]) -> Result<bool> {
        let key = to_hex(multihash);
        let (count,): (i64,) = sqlx::query_as(
            "SELECT (SELECT COUNT(*) FROM signed_claims WHERE multihash = ?) + \
             (SELECT COUNT(*) FROM jwt_claims WHERE multihash = ?)",
        )
        .bind(&key)
        .bind(&key)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    pub async fn get(&self, multihash: &[u8; MULTIHASH_LEN]) -> Result<StoredCredential> {
        let key = to_hex(multihash);
        let signed: Option<(u32, String)> =
            sqlx::query_as("SELECT doc_type, credential FROM signed_claims WHERE multihash = ?")
                .bind(&key)
                .fetch_optional(&self.pool)
                .await?;
        if let Some((doc_type, credential)) = signed {
            return Ok(StoredCredential::Signed {
                doc_type: DocumentType::try_from(doc_type)?,
                credential: serde_json::from_str(&credential)?,
            });
        }

        let jwt: Option<(String, String, Option<String>, String, String, Option<String>, Option<i64>)> =
            sqlx::query_as(
                "SELECT jwt, issuer, subject, sender, data, type, issued_at \
                 FROM jwt_claims WHERE multihash = ?",
            )
            .bind(&key)
            .fetch_optional(&self.pool)
            .await?;
        match jwt {
            Some((jwt, issuer, subject, sender, data, jwt_type, issued_at)) => {
                Ok(StoredCredential::Jwt(JwtRecord {
                    multihash: key,
                    jwt,
                    issuer,
                    subject,
                    sender,
                    data: serde_json::from_str(&data)?,
                    jwt_type,
                    issued_at,
                }))
            }
            None => Err(Error::NotFound(format!("credential {key}"))),
        }
    }

    /// Looks a credential up by hex keccak digest or hex multihash.
    pub async fn get_by_hex(&self, hex: &str) -> Result<StoredCredential> {
        self.get(&parse_hex(hex)?).await
    }

    /// JWTs submitted by `sender`, oldest first.
    pub async fn jwts_by_sender(&self, sender: &Did) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT jwt FROM jwt_claims WHERE sender = ? ORDER BY rowid")
                .bind(sender.to_string())
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(jwt,)| jwt).collect())
    }
}
