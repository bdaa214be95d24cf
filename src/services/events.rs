// src/services/events.rs
//! Add/revoke notifications.
//!
//! Every registered or revoked credential is announced on
//! `{prefix}.{issuer}.{action}` and `{prefix}.public.{action}`. Publishing is
//! best effort and never undoes a tree mutation.

use crate::error::Result;
use crate::models::did::Did;
use async_trait::async_trait;
use log::{debug, warn};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimEvent {
    Add,
    Revoke,
}

impl ClaimEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimEvent::Add => "add",
            ClaimEvent::Revoke => "revoke",
        }
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, subject: &str, payload: &str) -> Result<()>;
}

/// The two subjects an event for `issuer` goes to.
pub fn subjects(prefix: &str, issuer: &Did, event: ClaimEvent) -> [String; 2] {
    [
        format!("{prefix}.{issuer}.{}", event.as_str()),
        format!("{prefix}.public.{}", event.as_str()),
    ]
}

/// Publishes `payload` on both subjects, logging failures.
pub async fn announce(
    publisher: &dyn EventPublisher,
    prefix: &str,
    issuer: &Did,
    event: ClaimEvent,
    payload: &str,
) {
    for subject in subjects(prefix, issuer, event) {
        match publisher.publish(&subject, payload).await {
            Ok(()) => debug!("published {subject}"),
            Err(e) => warn!("failed to publish {subject}: {e}"),
        }
    }
}

/// Redis pub/sub publisher.
#[derive(Clone)]
pub struct RedisPublisher {
    conn: ConnectionManager,
}

impl RedisPublisher {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl EventPublisher for RedisPublisher {
    async fn publish(&self, subject: &str, payload: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _receivers: i64 = conn.publish(subject, payload).await?;
        Ok(())
    }
}

/// Keeps every published message in memory.
#[derive(Default)]
pub struct RecordingPublisher {
    messages: Mutex<Vec<(String, String)>>,
}

impl RecordingPublisher {
    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, subject: &str, payload: &str) -> Result<()> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((subject.to_string(), payload.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    struct Failing;

    #[async_trait]
    impl EventPublisher for Failing {
        async fn publish(&self, subject: &str, _payload: &str) -> Result<()> {
            Err(Error::NotFound(subject.to_string()))
        }
    }

    #[tokio::test]
    async fn test_announce_hits_issuer_and_public_subjects() {
        let publisher = RecordingPublisher::default();
        let issuer: Did = "did:ethuri:abc".parse().unwrap();
        announce(&publisher, "idhub", &issuer, ClaimEvent::Revoke, "{}").await;
        let subjects: Vec<String> = publisher.messages().into_iter().map(|(s, _)| s).collect();
        assert_eq!(
            subjects,
            vec!["idhub.did:ethuri:abc.revoke", "idhub.public.revoke"]
        );
    }

    #[tokio::test]
    async fn test_announce_swallows_failures() {
        let issuer: Did = "did:ethuri:abc".parse().unwrap();
        announce(&Failing, "idhub", &issuer, ClaimEvent::Add, "{}").await;
    }
}
