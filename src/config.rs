//! Configuration management for the orchestration engine
//!
//! Loads configuration from a TOML file with `${VAR}` environment variable
//! substitution, then applies `XCHAIN__SECTION__KEY` environment overrides.

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::default_retryable_patterns;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub rate_limit: RateLimitConfig,
    pub quotes: QuoteConfig,
    pub transactions: TransactionConfig,
    pub execution: ExecutionSettings,
    pub cross_chain: CrossChainSettings,
    pub history: HistorySettings,
    pub aggregator: AggregatorConfig,
    pub metrics: MetricsConfig,
    pub wallet: WalletConfig,
    pub database: Option<DatabaseConfig>,
    pub chains: HashMap<String, ChainConfig>,
    pub tools: Vec<ToolConfig>,
}

/// Token bucket in front of the upstream aggregator
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_tokens: u32,
    /// Tokens added per second
    pub refill_rate: f64,
    pub min_interval_ms: u64,
    pub max_retries: u32,
    pub default_retry_after_secs: u64,
    pub transient_retry_delay_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_tokens: 10,
            refill_rate: 1.0,
            min_interval_ms: 100,
            max_retries: 3,
            default_retry_after_secs: 3600,
            transient_retry_delay_ms: 2000,
        }
    }
}

impl RateLimitConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn default_retry_after(&self) -> Duration {
        Duration::from_secs(self.default_retry_after_secs)
    }

    pub fn transient_retry_delay(&self) -> Duration {
        Duration::from_millis(self.transient_retry_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QuoteConfig {
    pub quote_ttl_secs: u64,
    pub comparison_ttl_secs: u64,
    pub max_cache_entries: usize,
    pub sweep_interval_secs: u64,
    pub base_slippage: f64,
    pub min_slippage: f64,
    pub max_slippage: f64,
    pub default_max_quotes: usize,
    /// Bridges tried, in order, when gathering alternates for cross-chain routes
    pub alternate_bridges: Vec<String>,
    /// Exchanges tried when gathering alternates for same-chain routes
    pub alternate_exchanges: Vec<String>,
}

impl Default for QuoteConfig {
    fn default() -> Self {
        Self {
            quote_ttl_secs: 30,
            comparison_ttl_secs: 60,
            max_cache_entries: 1000,
            sweep_interval_secs: 60,
            base_slippage: 0.005,
            min_slippage: 0.001,
            max_slippage: 0.05,
            default_max_quotes: 3,
            alternate_bridges: ["stargateV2", "across", "hop", "cbridge", "mayan"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            alternate_exchanges: ["1inch", "paraswap", "0x", "sushiswap"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl QuoteConfig {
    pub fn quote_ttl(&self) -> Duration {
        Duration::from_secs(self.quote_ttl_secs)
    }

    pub fn comparison_ttl(&self) -> Duration {
        Duration::from_secs(self.comparison_ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    pub gas_cache_ttl_secs: u64,
    pub max_slippage: f64,
    pub max_quote_age_secs: i64,
    pub min_gas_limit: u64,
    pub max_gas_limit: u64,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            gas_cache_ttl_secs: 30,
            max_slippage: 0.05,
            max_quote_age_secs: 120,
            min_gas_limit: 21_000,
            max_gas_limit: 10_000_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub max_slippage_increase: f64,
    pub monitoring_timeout_secs: u64,
    /// How long a paused execution waits for an accept/reject answer
    pub action_required_timeout_secs: u64,
    pub max_history: usize,
    pub retryable_errors: Vec<String>,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 5000,
            max_slippage_increase: 0.02,
            monitoring_timeout_secs: 1800,
            action_required_timeout_secs: 300,
            max_history: 1000,
            retryable_errors: default_retryable_patterns(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrossChainSettings {
    pub bridge_poll_interval_secs: u64,
    pub bridge_timeout_secs: u64,
    pub bridge_status_ttl_secs: u64,
    pub bridge_sweep_interval_secs: u64,
    pub max_history: usize,
    pub enable_fallback: bool,
    pub max_fallbacks: usize,
}

impl Default for CrossChainSettings {
    fn default() -> Self {
        Self {
            bridge_poll_interval_secs: 10,
            bridge_timeout_secs: 1800,
            bridge_status_ttl_secs: 30,
            bridge_sweep_interval_secs: 30,
            max_history: 1000,
            enable_fallback: true,
            max_fallbacks: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    pub cleanup_interval_secs: u64,
    pub max_age_secs: u64,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: 86_400,
            max_age_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub integrator: String,
    pub timeout_ms: u64,
    pub status_poll_interval_ms: u64,
    pub confirmation_timeout_secs: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://li.quest/v1".to_string(),
            api_key: None,
            integrator: "xchain-router".to_string(),
            timeout_ms: 30_000,
            status_poll_interval_ms: 5_000,
            confirmation_timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9090,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    pub private_key_env: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            private_key_env: "XCHAIN_PRIVATE_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    #[serde(default)]
    pub rpc_urls: Vec<String>,
    pub native_symbol: String,
    #[serde(default = "default_decimals")]
    pub native_decimals: u8,
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
    #[serde(default = "default_max_gas_price_gwei")]
    pub max_gas_price_gwei: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub symbol: String,
    pub address: String,
    pub decimals: u8,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Bridge,
    Exchange,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolConfig {
    pub key: String,
    pub name: String,
    pub kind: ToolKind,
    /// Registry preference score in [0, 1]
    #[serde(default = "default_preference")]
    pub preference: f64,
}

fn default_decimals() -> u8 {
    18
}

fn default_max_gas_price_gwei() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

fn default_preference() -> f64 {
    0.5
}

lazy_static! {
    static ref ENV_VAR_PATTERN: regex::Regex =
        regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern");
}

impl Settings {
    /// Load settings from the configured file
    pub fn load() -> Result<Self> {
        let config_path = env::var("XCHAIN_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        let config_str = substitute_env_vars(&config_str);

        let settings: Settings = config::Config::builder()
            .add_source(config::File::from_str(&config_str, config::FileFormat::Toml))
            .add_source(config::Environment::with_prefix("XCHAIN").separator("__"))
            .build()
            .with_context(|| "Failed to parse configuration")?
            .try_deserialize()
            .with_context(|| "Failed to deserialize configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.enabled_chains().is_empty() {
            anyhow::bail!("At least one chain must be enabled");
        }

        let q = &self.quotes;
        if !(0.0 < q.min_slippage && q.min_slippage <= q.base_slippage && q.base_slippage <= q.max_slippage)
        {
            anyhow::bail!(
                "Slippage bounds are inconsistent: min {} base {} max {}",
                q.min_slippage,
                q.base_slippage,
                q.max_slippage
            );
        }

        if self.rate_limit.max_tokens == 0 || self.rate_limit.refill_rate <= 0.0 {
            anyhow::bail!("Rate limiter needs a positive bucket size and refill rate");
        }

        if self.transactions.min_gas_limit > self.transactions.max_gas_limit {
            anyhow::bail!("min_gas_limit exceeds max_gas_limit");
        }

        for (name, chain) in &self.chains {
            if chain.enabled && chain.rpc_urls.is_empty() {
                tracing::warn!(
                    "Chain {} has no RPC URLs configured - balance and fee checks will use fallbacks",
                    name
                );
            }
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        self.chains.iter().filter(|(_, c)| c.enabled).collect()
    }

    /// Get chain config by chain ID
    pub fn get_chain_by_id(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.values().find(|c| c.chain_id == chain_id)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();

    for cap in ENV_VAR_PATTERN.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
