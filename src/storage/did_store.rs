// src/storage/did_store.rs
//! Local DID documents, used to resolve `did:ethuri:*` without a network hop.

use crate::error::Result;
use crate::models::did::{Did, DidDocument};
use log::debug;
use sqlx::SqlitePool;

#[derive(Clone, Debug)]
pub struct SqlDidStore {
    pool: SqlitePool,
}

impl SqlDidStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts or replaces the document stored for `document.id`.
    pub async fn put(&self, document: &DidDocument) -> Result<()> {
        sqlx::query(
            "INSERT INTO dids (did, document) VALUES (?, ?) \
             ON CONFLICT(did) DO UPDATE SET document = excluded.document",
        )
        .bind(document.id.to_string())
        .bind(serde_json::to_string(document)?)
        .execute(&self.pool)
        .await?;
        debug!("stored did document {}", document.id);
        Ok(())
    }

    pub async fn get(&self, did: &Did) -> Result<Option<DidDocument>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT document FROM dids WHERE did = ?")
            .bind(did.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(doc,)| serde_json::from_str(&doc)).transpose()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::did::{PublicKey, SECP256K1_SUITES};
    use crate::testutil::memory_pool;

    #[tokio::test]
    async fn test_put_replaces_document() {
        let store = SqlDidStore::new(memory_pool().await);
        let did: Did = "did:ethuri:abc".parse().unwrap();
        assert_eq!(store.get(&did).await.unwrap(), None);

        let mut doc = DidDocument::new(did.clone(), vec![]);
        store.put(&doc).await.unwrap();
        doc.public_key.push(PublicKey {
            id: format!("{did}#key-1"),
            key_type: SECP256K1_SUITES[0].to_string(),
            controller: did.to_string(),
            public_key_hex: Some("02".repeat(33)),
            public_key_jwk: None,
        });
        store.put(&doc).await.unwrap();
        assert_eq!(store.get(&did).await.unwrap(), Some(doc));
    }
}
