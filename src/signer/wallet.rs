//! Local wallet signer with send timeout and retry

use super::{Signer, SignerProvider};
use crate::chain::ChainManager;
use crate::config::WalletConfig;
use crate::error::{EngineError, EngineResult};
use crate::types::{parse_u256, TransactionRequest};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer as EthersSigner};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

const SEND_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_SEND_ATTEMPTS: u32 = 3;
const SEND_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Signs with a [`LocalWallet`] and broadcasts through the chain manager
pub struct WalletSigner {
    wallet: LocalWallet,
    chain_id: u64,
    chain_manager: Arc<ChainManager>,
}

impl WalletSigner {
    pub fn new(wallet: LocalWallet, chain_id: u64, chain_manager: Arc<ChainManager>) -> Self {
        Self {
            wallet: wallet.with_chain_id(chain_id),
            chain_id,
            chain_manager,
        }
    }

    /// Load wallet from the configured environment variable
    pub fn load_wallet(config: &WalletConfig) -> EngineResult<LocalWallet> {
        let key = std::env::var(&config.private_key_env).map_err(|_| {
            EngineError::Signer(format!(
                "No wallet configured. Set {}",
                config.private_key_env
            ))
        })?;

        key.trim()
            .parse::<LocalWallet>()
            .map_err(|e| EngineError::Signer(format!("Invalid private key: {}", e)))
    }

    fn build_tx(&self, tx: &TransactionRequest) -> EngineResult<TypedTransaction> {
        let to: Address = tx
            .to
            .parse()
            .map_err(|e| EngineError::Validation(format!("Invalid recipient {}: {}", tx.to, e)))?;

        let data = hex::decode(tx.data.trim_start_matches("0x"))
            .map_err(|e| EngineError::Validation(format!("Invalid calldata: {}", e)))?;

        let gas = tx.gas_limit_units();
        let max_fee = tx.max_fee_per_gas.as_deref().and_then(parse_u256);
        let priority_fee = tx.max_priority_fee_per_gas.as_deref().and_then(parse_u256);

        let typed = match (max_fee, priority_fee) {
            (Some(max_fee), Some(priority_fee)) => {
                let mut request = Eip1559TransactionRequest::new()
                    .from(self.wallet.address())
                    .to(to)
                    .data(data)
                    .value(tx.value_wei())
                    .chain_id(self.chain_id)
                    .max_fee_per_gas(max_fee)
                    .max_priority_fee_per_gas(priority_fee);
                if let Some(gas) = gas {
                    request = request.gas(gas);
                }
                TypedTransaction::Eip1559(request)
            }
            _ => {
                let mut request = ethers::types::TransactionRequest::new()
                    .from(self.wallet.address())
                    .to(to)
                    .data(data)
                    .value(tx.value_wei())
                    .chain_id(self.chain_id);
                if let Some(gas) = gas {
                    request = request.gas(gas);
                }
                if let Some(price) = tx.gas_price.as_deref().and_then(parse_u256) {
                    request = request.gas_price(price);
                }
                TypedTransaction::Legacy(request)
            }
        };

        Ok(typed)
    }
}

#[async_trait]
impl Signer for WalletSigner {
    fn address(&self) -> String {
        format!("{:?}", self.wallet.address())
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn send_transaction(&self, tx: &TransactionRequest) -> EngineResult<String> {
        if let Some(chain_id) = tx.chain_id {
            if chain_id != self.chain_id {
                return Err(EngineError::Signer(format!(
                    "Transaction for chain {} given to signer on chain {}",
                    chain_id, self.chain_id
                )));
            }
        }

        let provider = self.chain_manager.get_provider(self.chain_id)?;
        let client = SignerMiddleware::new(provider.http().clone(), self.wallet.clone());
        let mut typed = self.build_tx(tx)?;

        if typed.gas().is_none() {
            let estimate = client
                .estimate_gas(&typed, None)
                .await
                .map_err(|e| EngineError::Execution(format!("gas estimation failed: {}", e)))?;
            typed.set_gas(estimate);
        }

        let mut last_error = None;

        for attempt in 1..=MAX_SEND_ATTEMPTS {
            match timeout(SEND_TIMEOUT, client.send_transaction(typed.clone(), None)).await {
                Ok(Ok(pending_tx)) => {
                    let tx_hash = pending_tx.tx_hash();
                    info!(
                        "Transaction sent on chain {}: {:?} (attempt {}/{})",
                        self.chain_id, tx_hash, attempt, MAX_SEND_ATTEMPTS
                    );
                    return Ok(format!("{:?}", tx_hash));
                }
                Ok(Err(e)) => {
                    let error_msg = e.to_string();

                    if error_msg.contains("insufficient funds") {
                        return Err(EngineError::Execution(format!(
                            "insufficient funds on chain {}",
                            self.chain_id
                        )));
                    }
                    if error_msg.contains("execution reverted") {
                        return Err(EngineError::Execution(error_msg));
                    }

                    error!("Failed to send transaction on chain {}: {}", self.chain_id, error_msg);
                    last_error = Some(EngineError::Execution(error_msg));
                }
                Err(_) => {
                    warn!("Transaction send timeout (attempt {})", attempt);
                    last_error = Some(EngineError::Timeout {
                        operation: "send transaction".to_string(),
                    });
                }
            }

            if attempt < MAX_SEND_ATTEMPTS {
                tokio::time::sleep(SEND_RETRY_DELAY).await;
            }
        }

        Err(last_error.unwrap_or_else(|| EngineError::Execution("Unknown send error".to_string())))
    }

    async fn switch_chain(&self, chain_id: u64) -> EngineResult<Arc<dyn Signer>> {
        self.chain_manager.get_provider(chain_id)?;
        info!("Signer {} switched to chain {}", self.address(), chain_id);
        Ok(Arc::new(WalletSigner::new(
            self.wallet.clone(),
            chain_id,
            self.chain_manager.clone(),
        )))
    }
}

/// Serves the single configured operator wallet
pub struct WalletSignerProvider {
    wallet: LocalWallet,
    chain_manager: Arc<ChainManager>,
}

impl WalletSignerProvider {
    pub fn new(wallet: LocalWallet, chain_manager: Arc<ChainManager>) -> Self {
        Self {
            wallet,
            chain_manager,
        }
    }
}

#[async_trait]
impl SignerProvider for WalletSignerProvider {
    async fn get_signer(&self, address: &str, chain_id: u64) -> EngineResult<Arc<dyn Signer>> {
        let requested: Address = address
            .parse()
            .map_err(|e| EngineError::Validation(format!("Invalid address {}: {}", address, e)))?;

        if requested != self.wallet.address() {
            return Err(EngineError::Signer(format!(
                "No signer available for {}",
                address
            )));
        }

        Ok(Arc::new(WalletSigner::new(
            self.wallet.clone(),
            chain_id,
            self.chain_manager.clone(),
        )))
    }
}
