//! Chain provider with multi-RPC support and automatic failover

use crate::config::ChainConfig;
use crate::error::{EngineError, EngineResult};

use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Selector of `balanceOf(address)`
const BALANCE_OF_SELECTOR: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];

/// Selector of `allowance(address,address)`
const ALLOWANCE_SELECTOR: [u8; 4] = [0xdd, 0x62, 0xed, 0x3e];

/// Used when a node does not answer `eth_maxPriorityFeePerGas`
const DEFAULT_PRIORITY_FEE_WEI: u64 = 1_500_000_000;

/// Live EIP-1559 fee inputs for one chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeData {
    pub base_fee: U256,
    pub priority_fee: U256,
}

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    config: ChainConfig,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    current_provider: AtomicUsize,
}

impl ChainProvider {
    /// Create a provider over every parseable RPC URL of the chain
    pub fn new(config: ChainConfig) -> EngineResult<Self> {
        let mut http_providers = Vec::new();

        for url in config.rpc_urls.iter().filter(|u| !u.is_empty()) {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    http_providers.push(provider.interval(Duration::from_millis(500)));
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(EngineError::ChainConnection {
                chain_id: config.chain_id,
                message: "No valid RPC providers".to_string(),
            });
        }

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.config.chain_id, next);
    }

    fn connection_error(&self, message: impl Into<String>) -> EngineError {
        EngineError::ChainConnection {
            chain_id: self.config.chain_id,
            message: message.into(),
        }
    }

    /// Get current block number with failover
    pub async fn get_block_number(&self) -> EngineResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => return Ok(block.as_u64()),
                Err(e) => {
                    warn!(
                        "Failed to get block number from chain {}: {}",
                        self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(self.connection_error("All providers failed"))
    }

    /// Base fee of the latest block plus the node's priority fee suggestion
    pub async fn fee_data(&self) -> EngineResult<FeeData> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block(BlockNumber::Latest).await {
                Ok(Some(block)) => {
                    let base_fee = block
                        .base_fee_per_gas
                        .ok_or_else(|| self.connection_error("No base fee in latest block"))?;

                    let priority_fee = match self
                        .http()
                        .request::<_, U256>("eth_maxPriorityFeePerGas", ())
                        .await
                    {
                        Ok(fee) => fee,
                        Err(e) => {
                            debug!(
                                "eth_maxPriorityFeePerGas unavailable on chain {}: {}",
                                self.config.chain_id, e
                            );
                            U256::from(DEFAULT_PRIORITY_FEE_WEI)
                        }
                    };

                    return Ok(FeeData {
                        base_fee,
                        priority_fee,
                    });
                }
                Ok(None) => return Err(self.connection_error("No latest block")),
                Err(e) => {
                    warn!(
                        "Failed to get latest block from chain {}: {}",
                        self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(self.connection_error("All providers failed to return fee data"))
    }

    /// Native balance of `owner`
    pub async fn native_balance(&self, owner: Address) -> EngineResult<U256> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_balance(owner, None).await {
                Ok(balance) => return Ok(balance),
                Err(e) => {
                    warn!(
                        "Failed to get balance of {:?} on chain {}: {}",
                        owner, self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(self.connection_error("All providers failed to return a balance"))
    }

    /// ERC-20 balance of `owner` via `balanceOf`
    pub async fn token_balance(&self, token: Address, owner: Address) -> EngineResult<U256> {
        let mut data = BALANCE_OF_SELECTOR.to_vec();
        data.extend_from_slice(H256::from(owner).as_bytes());
        self.call_u256(token, data, "balanceOf").await
    }

    /// ERC-20 allowance granted by `owner` to `spender`
    pub async fn token_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> EngineResult<U256> {
        let mut data = ALLOWANCE_SELECTOR.to_vec();
        data.extend_from_slice(H256::from(owner).as_bytes());
        data.extend_from_slice(H256::from(spender).as_bytes());
        self.call_u256(token, data, "allowance").await
    }

    async fn call_u256(&self, to: Address, data: Vec<u8>, method: &str) -> EngineResult<U256> {
        let call: TypedTransaction = TransactionRequest::new().to(to).data(data).into();

        let output = self
            .http()
            .call(&call, None)
            .await
            .map_err(|e| self.connection_error(format!("{} call failed: {}", method, e)))?;

        if output.len() < 32 {
            return Err(self.connection_error(format!(
                "{} returned {} bytes for token {:?}",
                method,
                output.len(),
                to
            )));
        }

        Ok(U256::from_big_endian(&output[..32]))
    }

    /// Receipt status: `Some(true)` mined and succeeded, `Some(false)` reverted,
    /// `None` not yet mined
    pub async fn transaction_status(&self, tx_hash: H256) -> EngineResult<Option<bool>> {
        let receipt = self
            .http()
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| self.connection_error(e.to_string()))?;

        Ok(receipt.map(|r| r.status.map(|s| s.as_u64() == 1).unwrap_or(false)))
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        match self.get_block_number().await {
            Ok(_) => true,
            Err(e) => {
                error!("Health check failed for chain {}: {}", self.config.chain_id, e);
                false
            }
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(urls: &[&str]) -> ChainConfig {
        ChainConfig {
            chain_id: 1,
            name: "Ethereum".to_string(),
            rpc_urls: urls.iter().map(|u| u.to_string()).collect(),
            native_symbol: "ETH".to_string(),
            native_decimals: 18,
            tokens: Vec::new(),
            max_gas_price_gwei: 500,
            enabled: true,
        }
    }

    #[test]
    fn rejects_chain_without_usable_rpc() {
        let result = ChainProvider::new(chain(&[]));
        assert!(matches!(
            result,
            Err(EngineError::ChainConnection { chain_id: 1, .. })
        ));
    }

    #[test]
    fn failover_cycles_through_providers() {
        let provider =
            ChainProvider::new(chain(&["http://127.0.0.1:8545", "http://127.0.0.1:8546"])).unwrap();
        assert_eq!(provider.current_provider.load(Ordering::Relaxed), 0);
        provider.failover();
        assert_eq!(provider.current_provider.load(Ordering::Relaxed), 1);
        provider.failover();
        assert_eq!(provider.current_provider.load(Ordering::Relaxed), 0);
    }
}
