// src/lib.rs
//! Identity hub.
//!
//! Keeps one sparse Merkle tree per issuer DID, registers and revokes
//! credentials as claims in those trees, and anchors a root tree over all of
//! them on an Ethereum-compatible ledger so holders can prove a credential was
//! registered and not revoked.

pub mod blockchain;
pub mod claims;
pub mod config;
pub mod error;
pub mod merkletree;
pub mod models;
pub mod services;
pub mod storage;
pub mod utils;
pub mod wallet;

#[cfg(test)]
mod testutil;

pub use error::{Error, Result};
