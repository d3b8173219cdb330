//! Append-only execution history
//!
//! Writes are fire-and-forget from the engine's point of view: failures are
//! logged, never read back.

mod memory;
mod postgres;

pub use memory::MemoryHistoryStore;
pub use postgres::PgHistoryStore;

use crate::error::EngineResult;
use crate::types::{QuoteRequest, QuoteResponse};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionKind {
    SingleChain,
    CrossChain,
}

impl ExecutionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionKind::SingleChain => "single-chain",
            ExecutionKind::CrossChain => "cross-chain",
        }
    }
}

/// One execution as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: String,
    pub kind: ExecutionKind,
    pub user_address: String,
    pub from_chain_id: u64,
    pub to_chain_id: u64,
    pub from_token: String,
    pub to_token: String,
    pub from_amount: String,
    pub to_amount: String,
    pub tool: String,
    pub status: String,
    pub tx_hash: Option<String>,
    pub block_number: Option<u64>,
    pub error: Option<String>,
    /// Status-specific extras (fees, leg hashes, retry counts)
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionRecord {
    /// Placeholder written before a quote exists; the tool stays empty until one arrives
    pub fn from_request(
        id: &str,
        kind: ExecutionKind,
        request: &QuoteRequest,
        user_address: &str,
        status: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            kind,
            user_address: user_address.to_string(),
            from_chain_id: request.from_chain,
            to_chain_id: request.to_chain,
            from_token: request.from_token.clone(),
            to_token: request.to_token.clone(),
            from_amount: request.from_amount.clone(),
            to_amount: String::new(),
            tool: String::new(),
            status: status.to_string(),
            tx_hash: None,
            block_number: None,
            error: None,
            details: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    /// Fresh record for an execution about to start
    pub fn from_quote(
        id: &str,
        kind: ExecutionKind,
        quote: &QuoteResponse,
        user_address: &str,
        status: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            kind,
            user_address: user_address.to_string(),
            from_chain_id: quote.action.from_chain_id,
            to_chain_id: quote.action.to_chain_id,
            from_token: quote.action.from_token.symbol.clone(),
            to_token: quote.action.to_token.symbol.clone(),
            from_amount: quote.action.from_amount.clone(),
            to_amount: quote
                .estimate
                .as_ref()
                .map(|e| e.to_amount.clone())
                .unwrap_or_default(),
            tool: quote.tool.clone(),
            status: status.to_string(),
            tx_hash: None,
            block_number: None,
            error: None,
            details: serde_json::json!({ "quoteId": quote.id }),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn save(&self, record: &ExecutionRecord) -> EngineResult<()>;

    /// Set the status and merge `fields` into the record's details
    async fn update_status(
        &self,
        id: &str,
        status: &str,
        error: Option<String>,
        fields: serde_json::Value,
    ) -> EngineResult<()>;

    async fn update_hash(&self, id: &str, tx_hash: &str, block_number: Option<u64>) -> EngineResult<()>;

    /// Remove records older than `max_age`, returning how many went
    async fn prune(&self, max_age: Duration) -> EngineResult<u64>;
}

/// Shallow-merge two JSON objects; non-object patches replace the value
pub(crate) fn merge_details(target: &mut serde_json::Value, patch: serde_json::Value) {
    match (target.as_object_mut(), patch) {
        (Some(target), serde_json::Value::Object(patch)) => {
            for (key, value) in patch {
                target.insert(key, value);
            }
        }
        (_, serde_json::Value::Null) => {}
        (_, patch) => *target = patch,
    }
}
