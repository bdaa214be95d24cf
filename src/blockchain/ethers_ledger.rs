// src/blockchain/ethers_ledger.rs
//! Ethereum JSON-RPC ledger backed by `ethers`.
//!
//! Calls `setRoot(bytes32)` on the root-commits contract from a local signing
//! key and reads inclusion from transaction receipts.

use crate::blockchain::ledger::{Ledger, LedgerError, Receipt, TxHash};
use async_trait::async_trait;
use ethers::abi::parse_abi;
use ethers::contract::{BaseContract, Contract};
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers_core::types::{Address, H256, U256, U64};
use log::debug;
use std::sync::Arc;

type Client = SignerMiddleware<Arc<Provider<Http>>, LocalWallet>;

const SET_ROOT_ABI: &str = "function setRoot(bytes32 root)";
const SET_ROOT_GAS: u64 = 3_000_000;

/// Ledger client for the root-commits contract.
///
/// This client provides:
/// - `setRoot` submission signed by the configured committer key
/// - receipt polling through the same RPC provider
#[derive(Clone)]
pub struct EthersLedger {
    contract: Contract<Client>,
    committer: Address,
}

impl EthersLedger {
    /// Creates a new ledger client.
    ///
    /// # Arguments
    /// * `rpc_url` - JSON-RPC endpoint URL
    /// * `private_key` - hex-encoded committer key (with or without 0x prefix)
    /// * `contract_address` - address of the root-commits contract
    ///
    /// # Errors
    /// Returns [`LedgerError::Config`] if the URL, key or address is malformed
    /// or the chain id cannot be fetched.
    pub async fn new(
        rpc_url: &str,
        private_key: &str,
        contract_address: &str,
    ) -> Result<Self, LedgerError> {
        let provider = Arc::new(
            Provider::<Http>::try_from(rpc_url)
                .map_err(|e| LedgerError::Config(format!("rpc url: {e}")))?,
        );
        let chain_id = provider
            .get_chainid()
            .await
            .map_err(|e| LedgerError::Config(format!("chain id: {e}")))?
            .as_u64();
        let wallet: LocalWallet = private_key
            .trim_start_matches("0x")
            .parse()
            .map_err(|e| LedgerError::Config(format!("private key: {e}")))?;
        let wallet = wallet.with_chain_id(chain_id);
        let committer = wallet.address();
        let address: Address = contract_address
            .parse()
            .map_err(|e| LedgerError::Config(format!("contract address: {e}")))?;

        let abi = parse_abi(&[SET_ROOT_ABI]).map_err(|e| LedgerError::Config(e.to_string()))?;
        let client = Arc::new(SignerMiddleware::new(provider, wallet));
        let contract = Contract::new(address, BaseContract::from(abi), client);
        Ok(Self {
            contract,
            committer,
        })
    }

    pub fn committer(&self) -> Address {
        self.committer
    }
}

#[async_trait]
impl Ledger for EthersLedger {
    async fn submit_set_root(&self, root: [u8; 32]) -> Result<TxHash, LedgerError> {
        let call = self
            .contract
            .method::<_, H256>("setRoot", root)
            .map_err(|e| LedgerError::Submit(e.to_string()))?
            .gas(U256::from(SET_ROOT_GAS));
        let pending = call
            .send()
            .await
            .map_err(|e| LedgerError::Submit(e.to_string()))?;
        let tx_hash = pending.tx_hash();
        debug!("submitted setRoot tx {tx_hash:?}");
        Ok(tx_hash)
    }

    async fn transaction_receipt(&self, tx_hash: TxHash) -> Result<Option<Receipt>, LedgerError> {
        let receipt = self
            .contract
            .client()
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| LedgerError::Receipt(e.to_string()))?;
        let receipt = match receipt {
            Some(receipt) => receipt,
            None => return Ok(None),
        };
        let block_number = match receipt.block_number {
            Some(n) => n.as_u64(),
            None => return Ok(None),
        };
        if receipt.status == Some(U64::zero()) {
            return Err(LedgerError::Reverted);
        }
        Ok(Some(Receipt {
            block_number,
            tx_hash,
            contract_address: self.contract.address(),
            committer_address: receipt.from,
        }))
    }
}
