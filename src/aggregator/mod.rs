//! Upstream quoting/execution capability
//!
//! The engine depends only on [`Aggregator`]; [`LifiClient`] is the
//! production implementation.

mod lifi;

pub use lifi::LifiClient;

use crate::error::EngineResult;
use crate::signer::Signer;
use crate::types::{BridgeStatus, ChainInfo, QuoteRequest, Route, StatusRequest, Step, Token};

use async_trait::async_trait;
use std::sync::Arc;

/// Upstream output changed between quoting and submission
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeRateUpdate {
    pub step_id: String,
    pub tool: String,
    pub old_to_amount: String,
    pub new_to_amount: String,
}

impl ExchangeRateUpdate {
    /// Relative loss of output as a fraction; gains count as zero
    pub fn decrease(&self) -> f64 {
        let old: f64 = self.old_to_amount.parse().unwrap_or(0.0);
        let new: f64 = self.new_to_amount.parse().unwrap_or(0.0);
        if old <= 0.0 || new >= old {
            0.0
        } else {
            (old - new) / old
        }
    }
}

/// Callbacks invoked while a route executes
#[async_trait]
pub trait ExecutionHooks: Send + Sync {
    /// Route state changed (step status, new process, tx hash)
    async fn on_route_update(&self, route: &Route);

    /// Resolves only once a signer for `chain_id` is ready
    async fn switch_chain(&self, chain_id: u64) -> EngineResult<Arc<dyn Signer>>;

    /// `true` lets execution continue at the new rate
    async fn accept_exchange_rate_update(&self, update: &ExchangeRateUpdate) -> bool;
}

/// Quote/execute/status API of a swap and bridge aggregator
#[async_trait]
pub trait Aggregator: Send + Sync {
    /// Single best upstream quote for the request
    async fn get_quote(&self, request: &QuoteRequest) -> EngineResult<Step>;

    /// Execute every step of the route, reporting through `hooks`.
    ///
    /// Same-chain steps return once confirmed. Bridged steps return once the
    /// source transaction is broadcast, leaving delivery to the caller.
    async fn execute_route(
        &self,
        route: Route,
        signer: Arc<dyn Signer>,
        hooks: Arc<dyn ExecutionHooks>,
    ) -> EngineResult<Route>;

    async fn get_status(&self, request: &StatusRequest) -> EngineResult<BridgeStatus>;

    async fn get_chains(&self) -> EngineResult<Vec<ChainInfo>>;

    async fn get_tokens(&self, chain_id: u64) -> EngineResult<Vec<Token>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(old: &str, new: &str) -> ExchangeRateUpdate {
        ExchangeRateUpdate {
            step_id: "s".into(),
            tool: "across".into(),
            old_to_amount: old.into(),
            new_to_amount: new.into(),
        }
    }

    #[test]
    fn decrease_is_relative_loss() {
        assert!((update("1000", "985").decrease() - 0.015).abs() < 1e-12);
        assert_eq!(update("1000", "1010").decrease(), 0.0);
        assert_eq!(update("0", "10").decrease(), 0.0);
    }
}
