//! Chain module - read-only RPC access to every configured chain
//!
//! This module provides:
//! - Multi-RPC provider management with automatic failover
//! - EIP-1559 fee data for gas tier computation
//! - Native and ERC-20 balance lookups for transaction validation

pub mod provider;

pub use provider::{ChainProvider, FeeData};

use crate::config::Settings;
use crate::error::{EngineError, EngineResult};

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::types::{Address, H256, U256};
use std::sync::Arc;
use tracing::{info, warn};

/// Chain reads the engine depends on
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn fee_data(&self, chain_id: u64) -> EngineResult<FeeData>;

    async fn native_balance(&self, chain_id: u64, owner: Address) -> EngineResult<U256>;

    async fn token_balance(&self, chain_id: u64, token: Address, owner: Address)
        -> EngineResult<U256>;

    async fn token_allowance(
        &self,
        chain_id: u64,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> EngineResult<U256>;

    /// `Some(success)` once mined, `None` while pending
    async fn transaction_status(&self, chain_id: u64, tx_hash: H256) -> EngineResult<Option<bool>>;
}

/// Manages connections to all configured chains
pub struct ChainManager {
    /// Chain providers indexed by chain ID
    providers: DashMap<u64, Arc<ChainProvider>>,
}

impl ChainManager {
    /// Create a chain manager with a provider for each enabled chain that has RPC URLs
    pub fn new(settings: &Settings) -> Self {
        let providers = DashMap::new();

        for (name, chain_config) in settings.enabled_chains() {
            if chain_config.rpc_urls.is_empty() {
                warn!("Skipping RPC for chain {} - no URLs configured", name);
                continue;
            }

            match ChainProvider::new(chain_config.clone()) {
                Ok(provider) => {
                    info!(
                        "Initialized chain {} (ID: {})",
                        chain_config.name, chain_config.chain_id
                    );
                    providers.insert(chain_config.chain_id, Arc::new(provider));
                }
                Err(e) => warn!("Chain {} unavailable: {}", name, e),
            }
        }

        Self { providers }
    }

    /// Get provider for a specific chain
    pub fn get_provider(&self, chain_id: u64) -> EngineResult<Arc<ChainProvider>> {
        self.providers
            .get(&chain_id)
            .map(|p| p.clone())
            .ok_or(EngineError::ChainNotFound { chain_id })
    }

    /// Health check for all chains
    pub async fn health_check(&self) -> Vec<(u64, bool)> {
        let providers: Vec<_> = self.providers.iter().map(|e| e.value().clone()).collect();
        let checks = providers.into_iter().map(|provider| async move {
            let healthy = provider.health_check().await;
            crate::metrics::record_chain_health(provider.chain_id(), healthy);
            (provider.chain_id(), healthy)
        });

        futures::future::join_all(checks).await
    }

    /// Get all connected chain IDs
    pub fn connected_chains(&self) -> Vec<u64> {
        self.providers.iter().map(|e| *e.key()).collect()
    }
}

#[async_trait]
impl ChainRpc for ChainManager {
    async fn fee_data(&self, chain_id: u64) -> EngineResult<FeeData> {
        self.get_provider(chain_id)?.fee_data().await
    }

    async fn native_balance(&self, chain_id: u64, owner: Address) -> EngineResult<U256> {
        self.get_provider(chain_id)?.native_balance(owner).await
    }

    async fn token_balance(
        &self,
        chain_id: u64,
        token: Address,
        owner: Address,
    ) -> EngineResult<U256> {
        self.get_provider(chain_id)?.token_balance(token, owner).await
    }

    async fn token_allowance(
        &self,
        chain_id: u64,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> EngineResult<U256> {
        self.get_provider(chain_id)?
            .token_allowance(token, owner, spender)
            .await
    }

    async fn transaction_status(&self, chain_id: u64, tx_hash: H256) -> EngineResult<Option<bool>> {
        self.get_provider(chain_id)?.transaction_status(tx_hash).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainConfig;

    #[tokio::test]
    async fn chains_without_rpc_are_not_connected() {
        let mut settings = Settings::default();
        settings.chains.insert(
            "mantle".to_string(),
            ChainConfig {
                chain_id: 5000,
                name: "Mantle".to_string(),
                rpc_urls: Vec::new(),
                native_symbol: "MNT".to_string(),
                native_decimals: 18,
                tokens: Vec::new(),
                max_gas_price_gwei: 500,
                enabled: true,
            },
        );

        let manager = ChainManager::new(&settings);
        assert!(manager.connected_chains().is_empty());
        assert!(matches!(
            manager.fee_data(5000).await,
            Err(EngineError::ChainNotFound { chain_id: 5000 })
        ));
    }
}
