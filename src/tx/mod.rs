//! Transaction construction and pre-flight validation
//!
//! Calldata always comes from the aggregator; this module only normalizes gas
//! fields, checks the transaction against chain state and encodes ERC-20
//! approvals.

pub mod approval;
mod gas;

pub use gas::{GasOptimizer, GasQuote, GasQuoteSource, GasTier};

use crate::chain::ChainRpc;
use crate::config::TransactionConfig;
use crate::error::{EngineError, EngineResult};
use crate::types::{parse_u256, QuoteResponse, TransactionRequest};

use ethers::types::{Address, U256};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of each independent pre-flight check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionChecks {
    pub balance_sufficient: bool,
    pub gas_limit_valid: bool,
    pub approval_required: bool,
    pub slippage_acceptable: bool,
    pub route_fresh: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub checks: TransactionChecks,
}

/// Turns quotes into signable transactions
pub struct TransactionBuilder {
    chain: Arc<dyn ChainRpc>,
    gas: GasOptimizer,
    config: TransactionConfig,
}

impl TransactionBuilder {
    pub fn new(chain: Arc<dyn ChainRpc>, gas: GasOptimizer, config: TransactionConfig) -> Self {
        Self { chain, gas, config }
    }

    pub fn gas_optimizer(&self) -> &GasOptimizer {
        &self.gas
    }

    /// Signable transaction from the quote's upstream transaction request.
    ///
    /// Gas limit falls back to the upstream estimate, then 21000. Fee caps
    /// come from the recommended tier when upstream supplied no price.
    pub async fn build_transaction(&self, quote: &QuoteResponse) -> EngineResult<TransactionRequest> {
        let mut tx = quote.transaction_request.clone().ok_or_else(|| {
            EngineError::Config(format!("Quote {} carries no transaction request", quote.id))
        })?;

        if tx.to.trim().is_empty() {
            return Err(EngineError::Config(format!(
                "Quote {} transaction has no recipient",
                quote.id
            )));
        }
        if !tx.has_calldata() {
            return Err(EngineError::Config(format!(
                "Quote {} transaction has no call data",
                quote.id
            )));
        }

        let gas_limit = tx
            .gas_limit_units()
            .or_else(|| quote.estimate.as_ref().and_then(|e| e.gas_limit()))
            .unwrap_or_else(|| U256::from(self.config.min_gas_limit));
        tx.gas_limit = Some(format!("{:#x}", gas_limit));

        tx.chain_id = Some(tx.chain_id.unwrap_or(quote.action.from_chain_id));
        if tx.from.is_none() {
            tx.from = Some(quote.action.from_address.clone());
        }
        if tx.value.is_none() {
            tx.value = Some("0x0".to_string());
        }

        if tx.gas_price.is_none() && tx.max_fee_per_gas.is_none() {
            let tiers = self.gas.optimize_gas_price(quote.action.from_chain_id).await;
            tx.max_fee_per_gas = Some(format!("{:#x}", tiers.recommended.max_fee_per_gas));
            tx.max_priority_fee_per_gas =
                Some(format!("{:#x}", tiers.recommended.max_priority_fee_per_gas));
        }

        debug!(
            "Built transaction for quote {} on chain {} (gas limit {})",
            quote.id, quote.action.from_chain_id, gas_limit
        );
        Ok(tx)
    }

    /// Run the five pre-flight checks; only errors make the transaction invalid
    pub async fn validate_transaction(
        &self,
        tx: &TransactionRequest,
        from_address: &str,
        quote: &QuoteResponse,
    ) -> TransactionValidation {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut checks = TransactionChecks::default();

        match self.check_balance(tx, from_address, quote).await {
            Ok(true) => checks.balance_sufficient = true,
            Ok(false) => errors.push(format!(
                "Insufficient {} balance for {}",
                quote.action.from_token.symbol, from_address
            )),
            Err(e) => {
                warn!("Balance check for {} failed: {}", from_address, e);
                warnings.push(format!("Could not verify balance: {}", e));
            }
        }

        let gas_limit = tx.gas_limit_units().unwrap_or_default();
        if gas_limit >= U256::from(self.config.min_gas_limit)
            && gas_limit <= U256::from(self.config.max_gas_limit)
        {
            checks.gas_limit_valid = true;
        } else {
            errors.push(format!(
                "Gas limit {} outside [{}, {}]",
                gas_limit, self.config.min_gas_limit, self.config.max_gas_limit
            ));
        }

        if !quote.action.from_token.is_native() {
            checks.approval_required = true;
            warnings.push(format!(
                "{} spending must be approved before execution",
                quote.action.from_token.symbol
            ));
        }

        if quote.action.slippage <= self.config.max_slippage {
            checks.slippage_acceptable = true;
        } else {
            errors.push(format!(
                "Slippage {:.2}% exceeds maximum {:.2}%",
                quote.action.slippage * 100.0,
                self.config.max_slippage * 100.0
            ));
        }

        let age = quote.age().num_seconds();
        if age < self.config.max_quote_age_secs {
            checks.route_fresh = true;
        } else {
            errors.push(format!("Quote is {}s old, refresh required", age));
        }

        TransactionValidation {
            is_valid: errors.is_empty(),
            errors,
            warnings,
            checks,
        }
    }

    async fn check_balance(
        &self,
        tx: &TransactionRequest,
        from_address: &str,
        quote: &QuoteResponse,
    ) -> EngineResult<bool> {
        let chain_id = quote.action.from_chain_id;
        let owner: Address = from_address.parse().map_err(|e| {
            EngineError::Validation(format!("Invalid address {}: {}", from_address, e))
        })?;
        let amount = parse_u256(&quote.action.from_amount).unwrap_or_default();
        let gas_cost = tx.max_gas_cost().unwrap_or_default();
        let native = self.chain.native_balance(chain_id, owner).await?;

        if quote.action.from_token.is_native() {
            let needed = tx.value_wei().max(amount).saturating_add(gas_cost);
            return Ok(native >= needed);
        }

        let token: Address = quote.action.from_token.address.parse().map_err(|e| {
            EngineError::Validation(format!(
                "Invalid token address {}: {}",
                quote.action.from_token.address, e
            ))
        })?;
        let token_balance = self.chain.token_balance(chain_id, token, owner).await?;

        Ok(token_balance >= amount && native >= tx.value_wei().saturating_add(gas_cost))
    }

    /// ERC-20 approval for the quoted amount, `None` for native tokens
    pub fn build_approval_transaction(
        &self,
        quote: &QuoteResponse,
    ) -> EngineResult<Option<TransactionRequest>> {
        if quote.action.from_token.is_native() {
            return Ok(None);
        }

        let spender = quote
            .estimate
            .as_ref()
            .and_then(|e| e.approval_address.clone())
            .or_else(|| quote.transaction_request.as_ref().map(|t| t.to.clone()))
            .ok_or_else(|| {
                EngineError::Config(format!("Quote {} has no approval address", quote.id))
            })?;

        let amount = parse_u256(&quote.action.from_amount).ok_or_else(|| {
            EngineError::Validation(format!("Invalid amount {}", quote.action.from_amount))
        })?;

        Ok(Some(TransactionRequest {
            from: Some(quote.action.from_address.clone()),
            to: quote.action.from_token.address.clone(),
            data: approval::encode_approve(&spender, amount)?,
            value: Some("0x0".to_string()),
            chain_id: Some(quote.action.from_chain_id),
            ..Default::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{FeeData, MockChainRpc};
    use crate::store::MemoryCache;
    use crate::test_utils::{sample_quote, TEST_ACCOUNT};
    use std::time::Duration;

    fn builder(chain: MockChainRpc) -> TransactionBuilder {
        let chain: Arc<dyn ChainRpc> = Arc::new(chain);
        let gas = GasOptimizer::new(
            chain.clone(),
            Arc::new(MemoryCache::new("gas", 16)),
            Duration::from_secs(30),
            Vec::new(),
        );
        TransactionBuilder::new(chain, gas, TransactionConfig::default())
    }

    fn rich_chain() -> MockChainRpc {
        let mut chain = MockChainRpc::new();
        chain
            .expect_native_balance()
            .returning(|_, _| Ok(U256::exp10(20)));
        chain
            .expect_token_balance()
            .returning(|_, _, _| Ok(U256::exp10(12)));
        chain.expect_fee_data().returning(|_| {
            Ok(FeeData {
                base_fee: U256::from(10_000_000_000u64),
                priority_fee: U256::from(1_000_000_000u64),
            })
        });
        chain
    }

    #[tokio::test]
    async fn non_native_source_requires_approval() {
        let builder = builder(rich_chain());
        let quote = sample_quote(1, 5000);
        let tx = builder.build_transaction(&quote).await.unwrap();

        let validation = builder.validate_transaction(&tx, TEST_ACCOUNT, &quote).await;
        assert!(validation.checks.approval_required);
        assert!(validation.checks.balance_sufficient);
        assert!(validation.checks.gas_limit_valid);
        assert!(validation.checks.route_fresh);
        assert!(validation.is_valid, "{:?}", validation.errors);
    }

    #[tokio::test]
    async fn build_requires_upstream_calldata() {
        let builder = builder(rich_chain());
        let mut quote = sample_quote(1, 1);
        quote.transaction_request.as_mut().unwrap().data = "0x".to_string();

        let result = builder.build_transaction(&quote).await;
        assert!(matches!(result, Err(EngineError::Config(_))));

        quote.transaction_request = None;
        assert!(matches!(
            builder.build_transaction(&quote).await,
            Err(EngineError::Config(_))
        ));
    }

    #[tokio::test]
    async fn gas_limit_defaults_to_estimate_then_minimum() {
        let builder = builder(rich_chain());
        let mut quote = sample_quote(1, 1);
        quote.transaction_request.as_mut().unwrap().gas_limit = None;

        let tx = builder.build_transaction(&quote).await.unwrap();
        assert_eq!(tx.gas_limit_units(), quote.estimate.as_ref().unwrap().gas_limit());
        assert!(tx.max_fee_per_gas.is_some());

        quote.estimate.as_mut().unwrap().gas_costs.clear();
        let tx = builder.build_transaction(&quote).await.unwrap();
        assert_eq!(tx.gas_limit_units(), Some(U256::from(21_000u64)));
    }

    #[tokio::test]
    async fn stale_quote_and_high_slippage_are_errors() {
        let builder = builder(rich_chain());
        let mut quote = sample_quote(1, 5000);
        quote.fetched_at = chrono::Utc::now() - chrono::Duration::seconds(121);
        quote.action.slippage = 0.08;
        let tx = builder.build_transaction(&quote).await.unwrap();

        let validation = builder.validate_transaction(&tx, TEST_ACCOUNT, &quote).await;
        assert!(!validation.is_valid);
        assert!(!validation.checks.route_fresh);
        assert!(!validation.checks.slippage_acceptable);
        assert_eq!(validation.errors.len(), 2);
    }

    #[tokio::test]
    async fn rpc_failure_is_only_a_warning() {
        let mut chain = MockChainRpc::new();
        chain
            .expect_native_balance()
            .returning(|chain_id, _| Err(EngineError::ChainNotFound { chain_id }));
        chain
            .expect_fee_data()
            .returning(|chain_id| Err(EngineError::ChainNotFound { chain_id }));
        let builder = builder(chain);
        let quote = sample_quote(1, 5000);
        let tx = builder.build_transaction(&quote).await.unwrap();

        let validation = builder.validate_transaction(&tx, TEST_ACCOUNT, &quote).await;
        assert!(validation.is_valid);
        assert!(!validation.checks.balance_sufficient);
        assert!(validation.warnings.iter().any(|w| w.contains("balance")));
    }

    #[test]
    fn approval_encodes_spender_and_amount() {
        let builder = builder(MockChainRpc::new());
        let quote = sample_quote(1, 5000);
        let approval = builder.build_approval_transaction(&quote).unwrap().unwrap();
        assert_eq!(approval.to, quote.action.from_token.address);
        assert!(approval.data.starts_with("0x095ea7b3"));

        let mut native = sample_quote(1, 5000);
        native.action.from_token.address = crate::types::NATIVE_TOKEN_ADDRESSES[0].to_string();
        assert!(builder.build_approval_transaction(&native).unwrap().is_none());
    }
}
