//! Quote acquisition, caching, tagging and comparison

mod performance;

pub use performance::{PerformanceTracker, ProviderPerformance};

use crate::aggregator::Aggregator;
use crate::config::QuoteConfig;
use crate::error::{EngineError, EngineResult};
use crate::rate_limit::RateLimiter;
use crate::registry::Registry;
use crate::store::CacheStore;
use crate::types::{is_evm_address, parse_u256, to_token_units, QuoteRequest, QuoteResponse};

use serde::Serialize;
use sha3::{Digest, Keccak256};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Amounts above this many token units get extra slippage headroom
const LARGE_TRADE_UNITS: f64 = 10_000.0;

#[derive(Debug, Clone, Default)]
pub struct ComparisonOptions {
    /// Defaults to the configured maximum
    pub max_quotes: Option<usize>,
    /// Tool keys that must not appear in the comparison
    pub exclude_tools: Vec<String>,
}

/// Alternative quotes with the best pick along each axis
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteComparison {
    pub quotes: Vec<QuoteResponse>,
    pub best_by_output: Option<QuoteResponse>,
    pub best_by_speed: Option<QuoteResponse>,
    pub best_by_cost: Option<QuoteResponse>,
    pub best_by_reliability: Option<QuoteResponse>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Slippage for a request: the explicit override, or base x1.5 cross-chain
/// x1.2 for large trades; always within the configured bounds
pub fn compute_slippage(config: &QuoteConfig, request: &QuoteRequest, decimals: Option<u8>) -> f64 {
    let slippage = match request.slippage.filter(|s| s.is_finite()) {
        Some(explicit) => explicit,
        None => {
            let mut slippage = config.base_slippage;
            if request.is_cross_chain() {
                slippage *= 1.5;
            }

            let amount = parse_u256(&request.from_amount).unwrap_or_default();
            let units = to_token_units(amount, decimals.unwrap_or(0));
            if units > LARGE_TRADE_UNITS {
                slippage *= 1.2;
            }
            slippage
        }
    };

    slippage.clamp(config.min_slippage, config.max_slippage)
}

/// Stable hash over every field that changes the upstream answer
fn cache_key(request: &QuoteRequest, slippage: f64) -> String {
    let list = |l: &Option<Vec<String>>| {
        l.as_ref()
            .map(|v| {
                let mut v: Vec<String> = v.iter().map(|s| s.to_lowercase()).collect();
                v.sort();
                v.join(",")
            })
            .unwrap_or_default()
    };

    let canonical = format!(
        "{}|{}|{}|{}|{}|{}|{}|{:.6}|{}|{}|{}|{}|{:?}",
        request.from_chain,
        request.to_chain,
        request.from_token.to_lowercase(),
        request.to_token.to_lowercase(),
        request.from_amount,
        request.from_address.to_lowercase(),
        request.receiver().to_lowercase(),
        slippage,
        list(&request.allow_bridges),
        list(&request.deny_bridges),
        list(&request.allow_exchanges),
        list(&request.deny_exchanges),
        request.order,
    );

    hex::encode(Keccak256::digest(canonical.as_bytes()))
}

fn speed_tag(duration_secs: f64) -> &'static str {
    if duration_secs <= 60.0 {
        "speed:fast"
    } else if duration_secs <= 300.0 {
        "speed:medium"
    } else {
        "speed:slow"
    }
}

fn cost_tag(gas_usd: f64) -> &'static str {
    if gas_usd < 1.0 {
        "cost:low"
    } else if gas_usd < 10.0 {
        "cost:medium"
    } else {
        "cost:high"
    }
}

pub struct QuoteManager {
    aggregator: Arc<dyn Aggregator>,
    rate_limiter: Arc<RateLimiter>,
    registry: Arc<dyn Registry>,
    performance: Arc<PerformanceTracker>,
    quotes: Arc<dyn CacheStore<QuoteResponse>>,
    comparisons: Arc<dyn CacheStore<RouteComparison>>,
    config: QuoteConfig,
}

impl QuoteManager {
    pub fn new(
        aggregator: Arc<dyn Aggregator>,
        rate_limiter: Arc<RateLimiter>,
        registry: Arc<dyn Registry>,
        performance: Arc<PerformanceTracker>,
        quotes: Arc<dyn CacheStore<QuoteResponse>>,
        comparisons: Arc<dyn CacheStore<RouteComparison>>,
        config: QuoteConfig,
    ) -> Self {
        Self {
            aggregator,
            rate_limiter,
            registry,
            performance,
            quotes,
            comparisons,
            config,
        }
    }

    /// Validated, tagged quote; identical requests within the TTL share one upstream call
    pub async fn get_quote(&self, request: &QuoteRequest) -> EngineResult<QuoteResponse> {
        let decimals = self.validate_request(request)?;
        let slippage = compute_slippage(&self.config, request, decimals);
        let key = cache_key(request, slippage);

        if let Some(quote) = self.quotes.get(&key).await {
            debug!("Quote cache hit for {} -> {}", request.from_chain, request.to_chain);
            crate::metrics::record_quote_request("hit");
            return Ok(quote);
        }
        crate::metrics::record_quote_request("miss");

        let mut upstream = request.clone();
        upstream.slippage = Some(slippage);

        let step = self
            .rate_limiter
            .execute_with_rate_limit(|| self.aggregator.get_quote(&upstream), None)
            .await?;

        let mut quote = QuoteResponse::from_step(step);
        normalize_addresses(&mut quote, request);
        quote.tags = self.tags(&quote);

        info!(
            "Quote {} via {}: {} {} on chain {} -> {} {} on chain {}",
            quote.id,
            quote.tool,
            request.from_amount,
            quote.action.from_token.symbol,
            request.from_chain,
            quote.to_amount(),
            quote.action.to_token.symbol,
            request.to_chain
        );

        self.quotes
            .put(key, quote.clone(), self.config.quote_ttl())
            .await;
        Ok(quote)
    }

    /// Resolve the source token's decimals while checking the request
    fn validate_request(&self, request: &QuoteRequest) -> EngineResult<Option<u8>> {
        for chain_id in [request.from_chain, request.to_chain] {
            if !self.registry.is_supported_chain(chain_id) {
                return Err(EngineError::Validation(format!(
                    "Unsupported chain {}",
                    chain_id
                )));
            }
        }

        let mut from_decimals = None;
        for (chain_id, token, is_source) in [
            (request.from_chain, &request.from_token, true),
            (request.to_chain, &request.to_token, false),
        ] {
            let token = token.trim();
            if token.is_empty() {
                return Err(EngineError::Validation("Token must not be empty".to_string()));
            }

            let known = self.registry.find_token(chain_id, token);
            if known.is_none() && !is_evm_address(token) {
                return Err(EngineError::Validation(format!(
                    "Unsupported token {} on chain {}",
                    token, chain_id
                )));
            }
            if is_source {
                from_decimals = known.map(|t| t.decimals);
            }
        }

        match parse_u256(&request.from_amount) {
            None => {
                return Err(EngineError::Validation(format!(
                    "Invalid amount {}",
                    request.from_amount
                )))
            }
            Some(amount) if amount.is_zero() => {
                return Err(EngineError::Validation(
                    "Amount must be greater than zero".to_string(),
                ))
            }
            Some(_) => {}
        }

        if request.from_address.trim().is_empty() {
            return Err(EngineError::Validation("Sender address is required".to_string()));
        }
        if let Some(to) = &request.to_address {
            if to.trim().is_empty() {
                return Err(EngineError::Validation(
                    "Receiver address must not be empty".to_string(),
                ));
            }
        }

        Ok(from_decimals)
    }

    fn tags(&self, quote: &QuoteResponse) -> Vec<String> {
        vec![
            quote.route_type.as_str().to_string(),
            format!("tool:{}", quote.tool),
            speed_tag(quote.execution_duration()).to_string(),
            cost_tag(quote.gas_cost_usd()).to_string(),
        ]
    }

    /// Primary quote plus alternates forced through specific bridges/exchanges
    pub async fn get_quote_comparison(
        &self,
        request: &QuoteRequest,
        options: &ComparisonOptions,
    ) -> EngineResult<RouteComparison> {
        let max_quotes = options
            .max_quotes
            .unwrap_or(self.config.default_max_quotes)
            .max(1);
        let mut excluded: Vec<String> = options
            .exclude_tools
            .iter()
            .map(|t| t.to_lowercase())
            .collect();
        excluded.sort();
        excluded.dedup();

        let key = format!(
            "{}:{}:{}",
            cache_key(request, request.slippage.unwrap_or(-1.0)),
            max_quotes,
            excluded.join(",")
        );
        if let Some(comparison) = self.comparisons.get(&key).await {
            return Ok(comparison);
        }

        let cross_chain = request.is_cross_chain();
        let mut base = request.clone();
        if !excluded.is_empty() {
            let deny = if cross_chain {
                &mut base.deny_bridges
            } else {
                &mut base.deny_exchanges
            };
            deny.get_or_insert_with(Vec::new).extend(excluded.iter().cloned());
        }

        let excluded: HashSet<String> = excluded.into_iter().collect();
        let mut quotes: Vec<QuoteResponse> = Vec::new();

        match self.get_quote(&base).await {
            Ok(quote) if !excluded.contains(&quote.tool.to_lowercase()) => quotes.push(quote),
            Ok(quote) => debug!("Dropping primary quote from excluded tool {}", quote.tool),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!("Primary quote for comparison failed: {}", e),
        }

        let alternates = if cross_chain {
            &self.config.alternate_bridges
        } else {
            &self.config.alternate_exchanges
        };

        for tool in alternates {
            if quotes.len() >= max_quotes {
                break;
            }
            let tool_key = tool.to_lowercase();
            if excluded.contains(&tool_key)
                || quotes.iter().any(|q| q.tool.to_lowercase() == tool_key)
            {
                continue;
            }

            let mut alternate = base.clone();
            if cross_chain {
                alternate.allow_bridges = Some(vec![tool.clone()]);
            } else {
                alternate.allow_exchanges = Some(vec![tool.clone()]);
            }

            match self.get_quote(&alternate).await {
                Ok(quote) => {
                    let quote_tool = quote.tool.to_lowercase();
                    if !excluded.contains(&quote_tool)
                        && !quotes.iter().any(|q| q.tool.to_lowercase() == quote_tool)
                    {
                        quotes.push(quote);
                    }
                }
                Err(EngineError::TryAgainLater) => {
                    warn!("Upstream busy, stopping alternate quote collection");
                    break;
                }
                Err(e) => debug!("No alternate quote via {}: {}", tool, e),
            }
        }

        if quotes.is_empty() {
            return Err(EngineError::Upstream {
                status: 404,
                message: format!(
                    "No routes available from chain {} to chain {}",
                    request.from_chain, request.to_chain
                ),
            });
        }

        let comparison = self.rank(quotes);
        self.comparisons
            .put(key, comparison.clone(), self.config.comparison_ttl())
            .await;
        Ok(comparison)
    }

    fn rank(&self, quotes: Vec<QuoteResponse>) -> RouteComparison {
        let best_by_output = quotes.iter().max_by_key(|q| q.to_amount()).cloned();
        let best_by_speed = quotes
            .iter()
            .min_by(|a, b| a.execution_duration().total_cmp(&b.execution_duration()))
            .cloned();
        let best_by_cost = quotes
            .iter()
            .min_by(|a, b| a.gas_cost_usd().total_cmp(&b.gas_cost_usd()))
            .cloned();
        let best_by_reliability = quotes
            .iter()
            .max_by(|a, b| self.reliability(a).total_cmp(&self.reliability(b)))
            .cloned();

        RouteComparison {
            quotes,
            best_by_output,
            best_by_speed,
            best_by_cost,
            best_by_reliability,
        }
    }

    /// Tools without history fall back to their registry preference
    fn reliability(&self, quote: &QuoteResponse) -> f64 {
        let neutral = self.registry.tool_preference(&quote.tool);
        self.performance.reliability_score(&quote.tool, neutral)
    }

    /// Blocking errors and advisory warnings for a quote about to execute
    pub fn validate_route(&self, quote: &QuoteResponse) -> RouteValidation {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if quote.estimate.is_none() {
            errors.push(format!("Quote {} has no estimate", quote.id));
        }
        for chain_id in [quote.action.from_chain_id, quote.action.to_chain_id] {
            if !self.registry.is_supported_chain(chain_id) {
                errors.push(format!("Unsupported chain {}", chain_id));
            }
        }

        if quote.action.slippage > self.config.max_slippage {
            warnings.push(format!(
                "High slippage: {:.2}%",
                quote.action.slippage * 100.0
            ));
        }
        if quote.execution_duration() > 600.0 {
            warnings.push(format!(
                "Long execution time: about {} minutes",
                (quote.execution_duration() / 60.0).ceil()
            ));
        }
        for token in [&quote.action.from_token, &quote.action.to_token] {
            if self.registry.find_token(token.chain_id, &token.address).is_none()
                && self.registry.find_token(token.chain_id, &token.symbol).is_none()
            {
                warnings.push(format!(
                    "Token {} on chain {} is not in the registry",
                    token.symbol, token.chain_id
                ));
            }
        }

        RouteValidation {
            is_valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    pub fn performance(&self) -> &Arc<PerformanceTracker> {
        &self.performance
    }

    /// Drop expired quotes and comparisons
    pub async fn sweep_caches(&self) -> usize {
        self.quotes.sweep().await + self.comparisons.sweep().await
    }
}

/// Force sender/receiver back to what the caller asked for
fn normalize_addresses(quote: &mut QuoteResponse, request: &QuoteRequest) {
    let from = request.from_address.clone();
    let to = request.receiver().to_string();

    if !quote.action.from_address.eq_ignore_ascii_case(&from)
        || !quote.action.to_address.eq_ignore_ascii_case(&to)
    {
        warn!(
            "Quote {} echoed addresses {} -> {}, repairing to {} -> {}",
            quote.id, quote.action.from_address, quote.action.to_address, from, to
        );
    }

    quote.action.from_address = from.clone();
    quote.action.to_address = to.clone();
    for step in &mut quote.included_steps {
        step.action.from_address = from.clone();
        step.action.to_address = to.clone();
    }
    if let Some(tx) = quote.transaction_request.as_mut() {
        tx.from = Some(from);
    }
}
