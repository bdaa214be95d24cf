// src/blockchain/root_commit.rs
//! Root-commit state machine.
//!
//! `commit_root` submits a root and reports progress on a channel:
//!
//! ```text
//! submit ──► Started ──► Done(receipt)
//!   │           │
//!   └───────────┴──────► Failed
//! ```
//!
//! `Done` and `Failed` are terminal. The channel closes right after the
//! terminal update, so a receiver that sees `None` has seen everything.

use crate::blockchain::ledger::{Ledger, LedgerError, Receipt, TxHash};
use log::{debug, error, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressUpdate {
    Started { tx_hash: TxHash },
    Done(Receipt),
    /// `tx_hash` is set when the failure happened after submission.
    Failed {
        error: LedgerError,
        tx_hash: Option<TxHash>,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct CommitOptions {
    /// How long to wait for inclusion after submission.
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for CommitOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_RECEIPT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Starts committing `root` and returns the progress channel.
pub fn commit_root(
    ledger: Arc<dyn Ledger>,
    root: [u8; 32],
    options: CommitOptions,
) -> mpsc::Receiver<ProgressUpdate> {
    let (tx, rx) = mpsc::channel(4);
    tokio::spawn(async move {
        let update = drive(ledger.as_ref(), root, options, &tx).await;
        if let ProgressUpdate::Failed { error, tx_hash } = &update {
            error!("root commit failed (tx {tx_hash:?}): {error}");
        }
        // receiver may have gone away; nothing left to do then
        let _ = tx.send(update).await;
    });
    rx
}

async fn drive(
    ledger: &dyn Ledger,
    root: [u8; 32],
    options: CommitOptions,
    progress: &mpsc::Sender<ProgressUpdate>,
) -> ProgressUpdate {
    let tx_hash = match ledger.submit_set_root(root).await {
        Ok(tx_hash) => tx_hash,
        Err(error) => {
            return ProgressUpdate::Failed {
                error,
                tx_hash: None,
            }
        }
    };
    let _ = progress.send(ProgressUpdate::Started { tx_hash }).await;

    let deadline = Instant::now() + options.timeout;
    loop {
        match ledger.transaction_receipt(tx_hash).await {
            Ok(Some(receipt)) => {
                debug!("tx {tx_hash:?} included in block {}", receipt.block_number);
                return ProgressUpdate::Done(receipt);
            }
            Ok(None) => {}
            Err(LedgerError::Receipt(reason)) => {
                warn!("receipt lookup for {tx_hash:?} failed, retrying: {reason}");
            }
            Err(error) => {
                return ProgressUpdate::Failed {
                    error,
                    tx_hash: Some(tx_hash),
                }
            }
        }
        if Instant::now() + options.poll_interval > deadline {
            return ProgressUpdate::Failed {
                error: LedgerError::Timeout(options.timeout),
                tx_hash: Some(tx_hash),
            };
        }
        tokio::time::sleep(options.poll_interval).await;
    }
}

/// Drains a progress channel down to its terminal outcome.
pub async fn await_outcome(
    mut rx: mpsc::Receiver<ProgressUpdate>,
) -> Result<Receipt, (LedgerError, Option<TxHash>)> {
    let mut last_tx = None;
    while let Some(update) = rx.recv().await {
        match update {
            ProgressUpdate::Started { tx_hash } => last_tx = Some(tx_hash),
            ProgressUpdate::Done(receipt) => return Ok(receipt),
            ProgressUpdate::Failed { error, tx_hash } => return Err((error, tx_hash.or(last_tx))),
        }
    }
    Err((
        LedgerError::Receipt("progress channel closed without outcome".into()),
        last_tx,
    ))
}
