// src/blockchain/mod.rs
//! Ledger access and root anchoring.

pub mod ethers_ledger;
pub mod ledger;
pub mod root_commit;
pub mod simulated;

pub use ledger::{Ledger, LedgerError, Receipt, TxHash};
pub use root_commit::{commit_root, CommitOptions, ProgressUpdate};
