// src/services/mod.rs
pub mod claim_service;
pub mod did_resolver;
pub mod events;
pub mod lock;
pub mod proof_generator;
pub mod root_service;
pub mod verifier;

#[cfg(test)]
mod scenarios;

pub use claim_service::{ClaimReceipt, ClaimService};
pub use proof_generator::{Proof, ProofGenerator};
pub use root_service::{CommitOutcome, RootService};
pub use verifier::Verifier;
