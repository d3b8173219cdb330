//! Service container wired once at startup

use crate::aggregator::{Aggregator, LifiClient};
use crate::chain::{ChainManager, ChainRpc};
use crate::config::Settings;
use crate::cross_chain::CrossChainExecutor;
use crate::error::EngineResult;
use crate::execution::ExecutionEngine;
use crate::history::{HistoryStore, MemoryHistoryStore, PgHistoryStore};
use crate::quote::{PerformanceTracker, QuoteManager};
use crate::rate_limit::RateLimiter;
use crate::registry::ConfigRegistry;
use crate::signer::{SignerProvider, WalletSigner, WalletSignerProvider};
use crate::store::{MemoryCache, MonitorRegistry};
use crate::tx::{GasOptimizer, TransactionBuilder};

use ethers::signers::Signer as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Pluggable edges of the engine
pub struct ServiceParts {
    pub aggregator: Arc<dyn Aggregator>,
    pub chain: Arc<dyn ChainRpc>,
    pub signers: Arc<dyn SignerProvider>,
    pub history_store: Arc<dyn HistoryStore>,
}

pub struct Services {
    pub settings: Settings,
    pub chain_manager: Arc<ChainManager>,
    pub registry: Arc<ConfigRegistry>,
    pub rate_limiter: Arc<RateLimiter>,
    pub performance: Arc<PerformanceTracker>,
    pub quotes: Arc<QuoteManager>,
    pub builder: Arc<TransactionBuilder>,
    pub history_store: Arc<dyn HistoryStore>,
    /// Set when history is persisted to PostgreSQL
    pub database: Option<Arc<PgHistoryStore>>,
    pub engine: Arc<ExecutionEngine>,
    pub cross_chain: Arc<CrossChainExecutor>,
}

impl Services {
    /// Production wiring: LI.FI, ethers RPC, the operator wallet and the configured history store
    pub async fn new(settings: Settings) -> EngineResult<Self> {
        let chain_manager = Arc::new(ChainManager::new(&settings));
        info!(
            "Chain connections initialized: {:?}",
            chain_manager.connected_chains()
        );

        let wallet = WalletSigner::load_wallet(&settings.wallet)?;
        info!("Operator wallet {:?} loaded", wallet.address());
        let signers = Arc::new(WalletSignerProvider::new(wallet, chain_manager.clone()));

        let aggregator = Arc::new(LifiClient::new(
            settings.aggregator.clone(),
            chain_manager.clone(),
        )?);

        let (history_store, database): (Arc<dyn HistoryStore>, _) = match &settings.database {
            Some(db) => {
                let store = Arc::new(PgHistoryStore::new(db).await?);
                store.run_migrations().await?;
                info!("Execution history persisted to PostgreSQL");
                let shared: Arc<dyn HistoryStore> = store.clone();
                (shared, Some(store))
            }
            None => {
                info!("No database configured, keeping execution history in memory");
                let memory: Arc<dyn HistoryStore> = Arc::new(MemoryHistoryStore::new());
                (memory, None)
            }
        };

        let parts = ServiceParts {
            aggregator,
            chain: chain_manager.clone(),
            signers,
            history_store,
        };
        let mut services = Self::assemble(settings, chain_manager, parts);
        services.database = database;
        Ok(services)
    }

    /// Wire the engine around the given edges
    pub fn assemble(settings: Settings, chain_manager: Arc<ChainManager>, parts: ServiceParts) -> Self {
        let registry = Arc::new(ConfigRegistry::from_settings(&settings));
        let rate_limiter = Arc::new(RateLimiter::new(settings.rate_limit.clone()));
        let performance = Arc::new(PerformanceTracker::new());
        let cache_size = settings.quotes.max_cache_entries;

        let quotes = Arc::new(QuoteManager::new(
            parts.aggregator.clone(),
            rate_limiter.clone(),
            registry.clone(),
            performance.clone(),
            Arc::new(MemoryCache::new("quotes", cache_size)),
            Arc::new(MemoryCache::new("comparisons", cache_size)),
            settings.quotes.clone(),
        ));

        let max_fees: Vec<(u64, u64)> = settings
            .enabled_chains()
            .into_iter()
            .map(|(_, chain)| (chain.chain_id, chain.max_gas_price_gwei))
            .collect();
        let gas = GasOptimizer::new(
            parts.chain.clone(),
            Arc::new(MemoryCache::new("gas", cache_size)),
            Duration::from_secs(settings.transactions.gas_cache_ttl_secs),
            max_fees,
        );
        let builder = Arc::new(TransactionBuilder::new(
            parts.chain.clone(),
            gas,
            settings.transactions.clone(),
        ));

        let engine = Arc::new(ExecutionEngine::new(
            parts.aggregator.clone(),
            rate_limiter.clone(),
            builder.clone(),
            parts.signers,
            parts.history_store.clone(),
            performance.clone(),
            Arc::new(MonitorRegistry::new()),
            settings.execution.clone(),
        ));

        let cross_chain = Arc::new(CrossChainExecutor::new(
            quotes.clone(),
            engine.clone(),
            parts.aggregator,
            rate_limiter.clone(),
            parts.history_store.clone(),
            Arc::new(MonitorRegistry::new()),
            Arc::new(MemoryCache::new("bridge-status", cache_size)),
            settings.cross_chain.clone(),
        ));

        Self {
            settings,
            chain_manager,
            registry,
            rate_limiter,
            performance,
            quotes,
            builder,
            history_store: parts.history_store,
            database: None,
            engine,
            cross_chain,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::chain::MockChainRpc;
    use crate::registry::tests::test_settings;
    use crate::test_utils::{FakeAggregator, FakeSignerProvider};
    use crate::types::QuoteRequest;

    pub(crate) fn test_services(aggregator: Arc<FakeAggregator>) -> Services {
        let settings = test_settings();
        let chain_manager = Arc::new(ChainManager::new(&settings));
        Services::assemble(
            settings,
            chain_manager,
            ServiceParts {
                aggregator,
                chain: Arc::new(MockChainRpc::new()),
                signers: Arc::new(FakeSignerProvider::new()),
                history_store: Arc::new(MemoryHistoryStore::new()),
            },
        )
    }

    #[tokio::test]
    async fn assembled_services_share_one_aggregator() {
        let aggregator = Arc::new(FakeAggregator::new());
        let services = test_services(aggregator.clone());

        let quote = services
            .quotes
            .get_quote(&QuoteRequest::new(1, 5000, "USDC", "MNT", "100000000", "0xabc"))
            .await
            .unwrap();

        assert!(quote.is_cross_chain());
        assert_eq!(aggregator.quote_calls(), 1);
        assert!(services.chain_manager.connected_chains().is_empty());
        assert!(services.database.is_none());
        assert!(services.cross_chain.active_cross_chain_executions().is_empty());
    }
}
