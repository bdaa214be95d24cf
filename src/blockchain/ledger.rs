// src/blockchain/ledger.rs
//! The ledger capability the root-commit state machine drives.
//!
//! A ledger accepts a 32-byte root for the root-commits contract and later
//! reports whether that transaction landed. Production uses
//! [`EthersLedger`](crate::blockchain::ethers_ledger::EthersLedger); tests use
//! [`SimulatedLedger`](crate::blockchain::simulated::SimulatedLedger).

use async_trait::async_trait;
use ethers_core::types::{Address, H256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type TxHash = H256;

/// Inclusion receipt of a `setRoot` transaction.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub block_number: u64,
    pub tx_hash: TxHash,
    pub contract_address: Address,
    pub committer_address: Address,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// The transaction could not be built or sent.
    #[error("submission failed: {0}")]
    Submit(String),

    #[error("receipt lookup failed: {0}")]
    Receipt(String),

    /// The transaction was mined but did not succeed.
    #[error("transaction reverted")]
    Reverted,

    #[error("transaction not included within {0:?}")]
    Timeout(std::time::Duration),

    #[error("invalid ledger configuration: {0}")]
    Config(String),
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Sends `setRoot(root)` and returns the transaction hash without waiting.
    async fn submit_set_root(&self, root: [u8; 32]) -> Result<TxHash, LedgerError>;

    /// `None` while the transaction is pending.
    async fn transaction_receipt(&self, tx_hash: TxHash) -> Result<Option<Receipt>, LedgerError>;
}
