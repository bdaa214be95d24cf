// src/blockchain/simulated.rs
//! In-process ledger for tests and local runs.
//!
//! Each submitted transaction is mined into its own block, starting at the
//! configured block number. A transaction can be held pending for a number of
//! receipt polls so timeouts can be exercised.

use crate::blockchain::ledger::{Ledger, LedgerError, Receipt, TxHash};
use crate::utils::crypto::hash_data;
use async_trait::async_trait;
use ethers_core::types::Address;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug)]
struct SimTx {
    block_number: u64,
    polls_left: u32,
}

#[derive(Debug)]
struct State {
    next_block: u64,
    pending_polls: u32,
    fail_submit: Option<String>,
    revert: bool,
    txs: HashMap<TxHash, SimTx>,
    submitted: Vec<[u8; 32]>,
}

#[derive(Debug)]
pub struct SimulatedLedger {
    contract_address: Address,
    committer_address: Address,
    state: Mutex<State>,
}

impl SimulatedLedger {
    /// A ledger whose first transaction lands in block `first_block`.
    pub fn new(first_block: u64) -> Self {
        Self {
            contract_address: Address::from_low_u64_be(0xc0),
            committer_address: Address::from_low_u64_be(0xc1),
            state: Mutex::new(State {
                next_block: first_block,
                pending_polls: 0,
                fail_submit: None,
                revert: false,
                txs: HashMap::new(),
                submitted: Vec::new(),
            }),
        }
    }

    /// Keeps every later transaction pending for `polls` receipt lookups.
    pub fn set_pending_polls(&self, polls: u32) {
        self.lock().pending_polls = polls;
    }

    /// Makes every later submission fail with `reason`.
    pub fn fail_submissions(&self, reason: &str) {
        self.lock().fail_submit = Some(reason.to_string());
    }

    pub fn revert_transactions(&self, revert: bool) {
        self.lock().revert = revert;
    }

    /// Roots submitted so far, oldest first.
    pub fn submitted(&self) -> Vec<[u8; 32]> {
        self.lock().submitted.clone()
    }

    pub fn contract_address(&self) -> Address {
        self.contract_address
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // a poisoned lock only means a test panicked mid-call
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Ledger for SimulatedLedger {
    async fn submit_set_root(&self, root: [u8; 32]) -> Result<TxHash, LedgerError> {
        let mut state = self.lock();
        if let Some(reason) = &state.fail_submit {
            return Err(LedgerError::Submit(reason.clone()));
        }
        let mut preimage = root.to_vec();
        preimage.extend_from_slice(&(state.submitted.len() as u64).to_be_bytes());
        let tx_hash = TxHash::from(hash_data(&preimage));
        let block_number = state.next_block;
        state.next_block += 1;
        let polls_left = state.pending_polls;
        state.txs.insert(
            tx_hash,
            SimTx {
                block_number,
                polls_left,
            },
        );
        state.submitted.push(root);
        Ok(tx_hash)
    }

    async fn transaction_receipt(&self, tx_hash: TxHash) -> Result<Option<Receipt>, LedgerError> {
        let mut state = self.lock();
        let revert = state.revert;
        let tx = state
            .txs
            .get_mut(&tx_hash)
            .ok_or_else(|| LedgerError::Receipt(format!("unknown tx {tx_hash:?}")))?;
        if tx.polls_left > 0 {
            tx.polls_left -= 1;
            return Ok(None);
        }
        if revert {
            return Err(LedgerError::Reverted);
        }
        Ok(Some(Receipt {
            block_number: tx.block_number,
            tx_hash,
            contract_address: self.contract_address,
            committer_address: self.committer_address,
        }))
    }
}
