//! Gas tier computation from live fee data, with static fallbacks

use crate::chain::{ChainRpc, FeeData};
use crate::store::CacheStore;

use ethers::types::U256;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const GWEI: u64 = 1_000_000_000;

/// One EIP-1559 fee tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasTier {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasQuoteSource {
    Live,
    Fallback,
}

/// Slow / recommended / fast fee tiers for one chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasQuote {
    pub chain_id: u64,
    pub base_fee: U256,
    pub slow: GasTier,
    pub recommended: GasTier,
    pub fast: GasTier,
    pub source: GasQuoteSource,
}

impl GasQuote {
    /// Derive tiers from base fee `b` and priority fee `p`:
    /// slow `b + p`, recommended `2b + 1.5p`, fast `3b + 2p`
    pub fn from_fee_data(chain_id: u64, fees: FeeData, source: GasQuoteSource) -> Self {
        let base = fees.base_fee;
        let priority = fees.priority_fee;

        let slow_priority = priority;
        let recommended_priority = priority * 3 / 2;
        let fast_priority = priority * 2;

        Self {
            chain_id,
            base_fee: base,
            slow: GasTier {
                max_fee_per_gas: base + slow_priority,
                max_priority_fee_per_gas: slow_priority,
            },
            recommended: GasTier {
                max_fee_per_gas: base * 2 + recommended_priority,
                max_priority_fee_per_gas: recommended_priority,
            },
            fast: GasTier {
                max_fee_per_gas: base * 3 + fast_priority,
                max_priority_fee_per_gas: fast_priority,
            },
            source,
        }
    }

    /// Clamp every tier to a per-chain ceiling
    pub fn capped(mut self, max_fee: U256) -> Self {
        for tier in [&mut self.slow, &mut self.recommended, &mut self.fast] {
            tier.max_fee_per_gas = tier.max_fee_per_gas.min(max_fee);
            tier.max_priority_fee_per_gas = tier.max_priority_fee_per_gas.min(tier.max_fee_per_gas);
        }
        self
    }
}

/// Typical (base fee, priority fee) in gwei when a chain's RPC is unavailable
fn fallback_fee_data(chain_id: u64) -> FeeData {
    let (base_gwei, priority_gwei): (f64, f64) = match chain_id {
        1 => (20.0, 1.5),
        10 | 8453 => (0.05, 0.001),
        56 => (3.0, 1.0),
        137 => (50.0, 30.0),
        42161 => (0.1, 0.0),
        43114 => (25.0, 1.0),
        5000 => (0.02, 0.0),
        _ => (10.0, 1.0),
    };

    let to_wei = |gwei: f64| U256::from((gwei * GWEI as f64).round() as u64);
    FeeData {
        base_fee: to_wei(base_gwei),
        priority_fee: to_wei(priority_gwei),
    }
}

/// Computes and caches gas tiers per chain
pub struct GasOptimizer {
    chain: Arc<dyn ChainRpc>,
    cache: Arc<dyn CacheStore<GasQuote>>,
    ttl: Duration,
    /// Per-chain max fee ceilings in wei
    max_fees: Vec<(u64, U256)>,
}

impl GasOptimizer {
    pub fn new(
        chain: Arc<dyn ChainRpc>,
        cache: Arc<dyn CacheStore<GasQuote>>,
        ttl: Duration,
        max_fee_gwei: impl IntoIterator<Item = (u64, u64)>,
    ) -> Self {
        Self {
            chain,
            cache,
            ttl,
            max_fees: max_fee_gwei
                .into_iter()
                .map(|(chain_id, gwei)| (chain_id, U256::from(gwei) * U256::from(GWEI)))
                .collect(),
        }
    }

    /// Fee tiers for `chain_id`, cached per chain
    pub async fn optimize_gas_price(&self, chain_id: u64) -> GasQuote {
        let key = chain_id.to_string();
        if let Some(quote) = self.cache.get(&key).await {
            return quote;
        }

        let quote = match self.chain.fee_data(chain_id).await {
            Ok(fees) => GasQuote::from_fee_data(chain_id, fees, GasQuoteSource::Live),
            Err(e) => {
                warn!(
                    "Live fee data unavailable for chain {}: {} - using fallback table",
                    chain_id, e
                );
                GasQuote::from_fee_data(chain_id, fallback_fee_data(chain_id), GasQuoteSource::Fallback)
            }
        };

        let quote = match self.max_fees.iter().find(|(id, _)| *id == chain_id) {
            Some((_, max_fee)) => quote.capped(*max_fee),
            None => quote,
        };

        debug!("Gas tiers for chain {}: {:?}", chain_id, quote);
        self.cache.put(key, quote, self.ttl).await;
        quote
    }

    /// Drop expired gas quotes
    pub async fn sweep_cache(&self) -> usize {
        self.cache.sweep().await
    }
}
