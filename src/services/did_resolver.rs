// src/services/did_resolver.rs
//! DID resolution.
//!
//! `did:ethuri:*` documents live in the local `dids` table; any other method
//! goes to a universal-resolver deployment over HTTP.

use crate::error::{Error, Result};
use crate::models::did::{Did, DidDocument};
use crate::storage::did_store::SqlDidStore;
use async_trait::async_trait;
use log::debug;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// DID method served from the local database.
pub const LOCAL_METHOD: &str = "ethuri";

#[async_trait]
pub trait DidResolver: Send + Sync {
    /// Resolves `did` to its document, or [`Error::DidNotFound`].
    async fn resolve(&self, did: &Did) -> Result<DidDocument>;
}

#[async_trait]
impl DidResolver for SqlDidStore {
    async fn resolve(&self, did: &Did) -> Result<DidDocument> {
        self.get(did)
            .await?
            .ok_or_else(|| Error::DidNotFound(did.to_string()))
    }
}

/// Resolution result envelope returned by universal-resolver drivers.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolutionResult {
    did_document: Option<DidDocument>,
}

/// HTTP client for the universal-resolver `GET /1.0/identifiers/{did}` route.
#[derive(Debug, Clone)]
pub struct UniversalResolver {
    client: reqwest::Client,
    base_url: String,
}

impl UniversalResolver {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Resolver(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Resolver at `http://{host}:{port}`.
    pub fn from_host(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        Self::new(&format!("http://{host}:{port}"), timeout)
    }
}

#[async_trait]
impl DidResolver for UniversalResolver {
    async fn resolve(&self, did: &Did) -> Result<DidDocument> {
        let url = format!("{}/1.0/identifiers/{}", self.base_url, did);
        debug!("resolving {did} via {url}");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Resolver(format!("{url}: {e}")))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::DidNotFound(did.to_string()));
        }
        if !response.status().is_success() {
            return Err(Error::Resolver(format!("{url}: status {}", response.status())));
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Resolver(format!("{url}: {e}")))?;
        // drivers answer with either a bare document or a resolution envelope
        if body.get("didDocument").is_some() {
            let envelope: ResolutionResult = serde_json::from_value(body)?;
            return envelope
                .did_document
                .ok_or_else(|| Error::DidNotFound(did.to_string()));
        }
        Ok(serde_json::from_value(body)?)
    }
}

/// Routes resolution by DID method, with an optional catch-all.
#[derive(Default, Clone)]
pub struct CompositeResolver {
    by_method: HashMap<String, Arc<dyn DidResolver>>,
    fallback: Option<Arc<dyn DidResolver>>,
}

impl CompositeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_method(mut self, method: &str, resolver: Arc<dyn DidResolver>) -> Self {
        self.by_method.insert(method.to_string(), resolver);
        self
    }

    pub fn with_fallback(mut self, resolver: Arc<dyn DidResolver>) -> Self {
        self.fallback = Some(resolver);
        self
    }
}

#[async_trait]
impl DidResolver for CompositeResolver {
    async fn resolve(&self, did: &Did) -> Result<DidDocument> {
        match self.by_method.get(did.method()).or(self.fallback.as_ref()) {
            Some(resolver) => resolver.resolve(did).await,
            None => Err(Error::DidNotFound(did.to_string())),
        }
    }
}
