//! Error types for the orchestration engine

use std::time::Duration;
use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Rate limited by upstream aggregator (429)")]
    RateLimited { retry_after: Option<Duration> },

    #[error("The service is busy right now, please try again later")]
    TryAgainLater,

    #[error("Transient upstream error: {0}")]
    Transient(String),

    #[error("Upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Execution {id} was cancelled")]
    Cancelled { id: String },

    #[error("Execution {id} not found")]
    ExecutionNotFound { id: String },

    #[error("Chain {chain_id} not found")]
    ChainNotFound { chain_id: u64 },

    #[error("Chain connection error for chain {chain_id}: {message}")]
    ChainConnection { chain_id: u64, message: String },

    #[error("Signer error: {0}")]
    Signer(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Upstream told us to slow down, either as a typed 429 or in the message text
    pub fn is_rate_limit(&self) -> bool {
        match self {
            EngineError::RateLimited { .. } => true,
            EngineError::Upstream { status: 429, .. } => true,
            other if other.is_fatal() => false,
            other => {
                let message = other.to_string().to_lowercase();
                message.contains("429") || message.contains("rate limit")
            }
        }
    }

    /// Server-provided back-off, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            EngineError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Network and timeout failures that are worth another attempt
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Transient(_)
            | EngineError::Timeout { .. }
            | EngineError::ChainConnection { .. } => true,
            EngineError::Upstream { status, .. } => *status >= 500,
            EngineError::Validation(_) | EngineError::Config(_) => false,
            other => {
                let message = other.to_string().to_lowercase();
                message.contains("network")
                    || message.contains("timeout")
                    || message.contains("timed out")
                    || message.contains("econnreset")
                    || message.contains("connection")
            }
        }
    }

    /// Errors that must never be retried or routed around
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Validation(_) | EngineError::Config(_))
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Substring allow-list deciding whether a failed execution may be retried
#[derive(Debug, Clone)]
pub struct RetryClassifier {
    patterns: Vec<String>,
}

impl RetryClassifier {
    pub fn new(patterns: &[String]) -> Self {
        Self {
            patterns: patterns.iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    /// Check whether an error message matches one of the retryable patterns
    pub fn is_retryable_message(&self, message: &str) -> bool {
        let message = message.to_lowercase();
        self.patterns.iter().any(|p| message.contains(p.as_str()))
    }

    /// Check if error is retryable
    pub fn is_retryable(&self, error: &EngineError) -> bool {
        !error.is_fatal() && self.is_retryable_message(&error.to_string())
    }
}

impl Default for RetryClassifier {
    fn default() -> Self {
        Self::new(&default_retryable_patterns())
    }
}

pub fn default_retryable_patterns() -> Vec<String> {
    ["network", "timeout", "gas", "nonce", "rate limit", "econnreset"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
