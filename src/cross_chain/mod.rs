//! Cross-chain transfers: source leg, bridge transit, destination leg
//!
//! Two axes describe an execution. `status` is what the user sees;
//! `current_phase` only ever moves forward:
//! PREPARATION -> SOURCE_CHAIN -> BRIDGE -> DESTINATION_CHAIN -> FINALIZATION.
//! Once the bridge phase starts the funds are committed and the transfer can
//! no longer be cancelled.

mod executor;
mod fallback;

pub use executor::CrossChainExecutor;
pub use fallback::{FallbackOutcome, FallbackRoute, FallbackRouter};

use crate::execution::ExecutionConfig;
use crate::types::{BridgeStatus, QuoteRequest, QuoteResponse};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrossChainStatus {
    Initializing,
    QuoteGeneration,
    SourceExecution,
    Bridging,
    DestinationExecution,
    Completed,
    Failed,
    Cancelled,
}

impl CrossChainStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CrossChainStatus::Completed | CrossChainStatus::Failed | CrossChainStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CrossChainStatus::Initializing => "INITIALIZING",
            CrossChainStatus::QuoteGeneration => "QUOTE_GENERATION",
            CrossChainStatus::SourceExecution => "SOURCE_EXECUTION",
            CrossChainStatus::Bridging => "BRIDGING",
            CrossChainStatus::DestinationExecution => "DESTINATION_EXECUTION",
            CrossChainStatus::Completed => "COMPLETED",
            CrossChainStatus::Failed => "FAILED",
            CrossChainStatus::Cancelled => "CANCELLED",
        }
    }
}

/// Declaration order is execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionPhase {
    Preparation,
    SourceChain,
    Bridge,
    DestinationChain,
    Finalization,
}

impl ExecutionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionPhase::Preparation => "PREPARATION",
            ExecutionPhase::SourceChain => "SOURCE_CHAIN",
            ExecutionPhase::Bridge => "BRIDGE",
            ExecutionPhase::DestinationChain => "DESTINATION_CHAIN",
            ExecutionPhase::Finalization => "FINALIZATION",
        }
    }

    /// Funds are still on the source chain
    pub fn is_cancellable(&self) -> bool {
        matches!(self, ExecutionPhase::Preparation | ExecutionPhase::SourceChain)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LegStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct CrossChainExecutionRequest {
    pub quote_request: QuoteRequest,
    pub user_address: String,
    /// Skips quote generation when the caller already holds a fresh quote
    pub quote: Option<QuoteResponse>,
    pub execution_id: Option<String>,
    pub execution: ExecutionConfig,
    /// Defaults to the configured switch
    pub enable_fallback: Option<bool>,
    pub max_fallbacks: Option<usize>,
}

impl CrossChainExecutionRequest {
    pub fn new(quote_request: QuoteRequest, user_address: impl Into<String>) -> Self {
        Self {
            quote_request,
            user_address: user_address.into(),
            quote: None,
            execution_id: None,
            execution: ExecutionConfig::default(),
            enable_fallback: None,
            max_fallbacks: None,
        }
    }
}

/// One on-chain leg of the transfer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInfo {
    pub chain_id: u64,
    pub tx_hash: Option<String>,
    pub status: LegStatus,
    pub amount: Option<String>,
    pub token: Option<String>,
    pub tool: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TransactionInfo {
    pub fn new(chain_id: u64, status: LegStatus) -> Self {
        Self {
            chain_id,
            tx_hash: None,
            status,
            amount: None,
            token: None,
            tool: None,
            timestamp: Utc::now(),
        }
    }
}

/// USD fee totals summed from the quote's itemized costs
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeBreakdown {
    pub gas_usd: f64,
    pub bridge_fee_usd: f64,
    pub protocol_fee_usd: f64,
    pub total_usd: f64,
}

impl FeeBreakdown {
    /// Fee items whose name mentions "bridge" count as bridge fees, the rest as protocol fees
    pub fn from_quote(quote: &QuoteResponse) -> Self {
        let gas_usd = quote.gas_cost_usd();
        let (mut bridge_fee_usd, mut protocol_fee_usd) = (0.0, 0.0);

        for fee in quote.fee_costs() {
            let amount = crate::types::parse_usd(fee.amount_usd.as_deref());
            if fee.name.to_lowercase().contains("bridge") {
                bridge_fee_usd += amount;
            } else {
                protocol_fee_usd += amount;
            }
        }

        Self {
            gas_usd,
            bridge_fee_usd,
            protocol_fee_usd,
            total_usd: gas_usd + bridge_fee_usd + protocol_fee_usd,
        }
    }
}

/// Minutes shown to users: 2 base, 10 more when bridging, 1 buffer
pub fn estimate_completion_secs(cross_chain: bool) -> u64 {
    let bridge_minutes = if cross_chain { 10 } else { 0 };
    (2 + bridge_minutes + 1) * 60
}

/// Live state of one in-flight transfer
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossChainMonitor {
    pub execution_id: String,
    pub user_address: String,
    pub status: CrossChainStatus,
    pub current_phase: ExecutionPhase,
    /// 0 to 100, never decreases
    pub progress: u8,
    pub source_status: LegStatus,
    pub bridge_status: LegStatus,
    pub destination_status: LegStatus,
    pub quote: Option<QuoteResponse>,
    pub source_transaction: Option<TransactionInfo>,
    pub latest_bridge_status: Option<BridgeStatus>,
    /// Execution-engine id of the leg currently running, if any
    pub active_leg: Option<String>,
    pub fallback_attempt: usize,
    pub estimated_completion_secs: u64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub bridge_started: Option<Instant>,
}

impl CrossChainMonitor {
    pub fn new(execution_id: &str, user_address: &str, cross_chain: bool) -> Self {
        Self {
            execution_id: execution_id.to_string(),
            user_address: user_address.to_string(),
            status: CrossChainStatus::Initializing,
            current_phase: ExecutionPhase::Preparation,
            progress: 0,
            source_status: LegStatus::Pending,
            bridge_status: if cross_chain {
                LegStatus::Pending
            } else {
                LegStatus::Skipped
            },
            destination_status: LegStatus::Pending,
            quote: None,
            source_transaction: None,
            latest_bridge_status: None,
            active_leg: None,
            fallback_attempt: 0,
            estimated_completion_secs: estimate_completion_secs(cross_chain),
            started_at: Utc::now(),
            updated_at: Utc::now(),
            bridge_started: None,
        }
    }

    /// Move to `phase`; earlier phases are refused and leave the monitor untouched
    pub fn advance(&mut self, phase: ExecutionPhase, status: CrossChainStatus, progress: u8) -> bool {
        if phase < self.current_phase || self.status.is_terminal() {
            return false;
        }
        self.current_phase = phase;
        self.status = status;
        self.raise_progress(progress);
        true
    }

    pub fn raise_progress(&mut self, progress: u8) {
        self.progress = self.progress.max(progress.min(100));
        self.updated_at = Utc::now();
    }

    pub fn source_tx_hash(&self) -> Option<&str> {
        self.source_transaction
            .as_ref()
            .and_then(|t| t.tx_hash.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossChainExecutionResult {
    pub execution_id: String,
    pub status: CrossChainStatus,
    pub success: bool,
    /// Phase reached when the execution ended
    pub final_phase: ExecutionPhase,
    pub quote: Option<QuoteResponse>,
    pub source_transaction: Option<TransactionInfo>,
    pub bridge_transaction: Option<TransactionInfo>,
    pub destination_transaction: Option<TransactionInfo>,
    pub fees: FeeBreakdown,
    pub error: Option<String>,
    /// Tool of the fallback route that produced this result
    pub fallback_tool: Option<String>,
    pub attempts: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl CrossChainExecutionResult {
    /// Source funds left the wallet; routing elsewhere would double-spend
    pub fn source_committed(&self) -> bool {
        self.source_transaction
            .as_ref()
            .map(|t| t.tx_hash.is_some())
            .unwrap_or(false)
    }
}
