//! Source-chain execution of a quoted route
//!
//! One execution walks `PENDING -> STARTED/EXECUTING -> (ACTION_REQUIRED |
//! CHAIN_SWITCH_REQUIRED) -> DONE | FAILED | CANCELLED`. Only one terminal
//! state is ever recorded per execution id.

mod engine;
mod steps;

pub use engine::ExecutionEngine;
pub use steps::{embed_fee_collection, quote_to_route};

use crate::types::{QuoteResponse, Route, StepStatus, StepType};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Heuristic per-step duration for remaining-time estimates
const SECS_PER_STEP: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Started,
    Executing,
    ActionRequired,
    ChainSwitchRequired,
    Done,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Done | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::Started => "STARTED",
            ExecutionStatus::Executing => "EXECUTING",
            ExecutionStatus::ActionRequired => "ACTION_REQUIRED",
            ExecutionStatus::ChainSwitchRequired => "CHAIN_SWITCH_REQUIRED",
            ExecutionStatus::Done => "DONE",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Cancelled => "CANCELLED",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub quote: QuoteResponse,
    /// Account whose signer executes the route
    pub user_address: String,
    /// Generated when absent
    pub execution_id: Option<String>,
}

/// Per-call overrides of the configured execution settings
#[derive(Debug, Clone, Default)]
pub struct ExecutionConfig {
    pub skip_validation: bool,
    pub max_retries: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub max_slippage_increase: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStep {
    pub step_id: String,
    pub tool: String,
    pub step_type: StepType,
    pub chain_id: u64,
    pub status: StepStatus,
    pub tx_hash: Option<String>,
}

impl ExecutionStep {
    fn from_route(route: &Route) -> Vec<Self> {
        route
            .steps
            .iter()
            .map(|s| ExecutionStep {
                step_id: s.id.clone(),
                tool: s.tool.clone(),
                step_type: s.step_type,
                chain_id: s.action.from_chain_id,
                status: s.status(),
                tx_hash: s.source_tx_hash().map(str::to_string),
            })
            .collect()
    }
}

/// Live progress of one in-flight execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMonitor {
    pub execution_id: String,
    pub status: ExecutionStatus,
    /// 0 to 100, never decreases
    pub progress: u8,
    pub current_step: usize,
    pub total_steps: usize,
    pub estimated_time_remaining_secs: u64,
    pub is_cross_chain: bool,
    pub tool: String,
    pub steps: Vec<ExecutionStep>,
    pub tx_hash: Option<String>,
    pub retry_count: u32,
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionMonitor {
    pub fn new(execution_id: &str, quote: &QuoteResponse, route: &Route) -> Self {
        let total_steps = quote.step_count();
        let mut monitor = Self {
            execution_id: execution_id.to_string(),
            status: ExecutionStatus::Pending,
            progress: 0,
            current_step: 0,
            total_steps,
            estimated_time_remaining_secs: 0,
            is_cross_chain: quote.is_cross_chain(),
            tool: quote.tool.clone(),
            steps: ExecutionStep::from_route(route),
            tx_hash: None,
            retry_count: 0,
            message: None,
            started_at: Utc::now(),
            updated_at: Utc::now(),
        };
        monitor.estimated_time_remaining_secs = monitor.estimate_remaining();
        monitor
    }

    fn estimate_remaining(&self) -> u64 {
        let remaining = self.total_steps.saturating_sub(self.current_step) as u64;
        let per_step = if self.is_cross_chain {
            SECS_PER_STEP * 2
        } else {
            SECS_PER_STEP
        };
        remaining * per_step
    }

    pub fn set_status(&mut self, status: ExecutionStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Raise progress; lower values are ignored
    pub fn advance_progress(&mut self, progress: u8) {
        self.progress = self.progress.max(progress.min(100));
        self.updated_at = Utc::now();
    }

    /// Fold the aggregator's view of the route into the monitor
    pub fn apply_route(&mut self, route: &Route) {
        self.steps = ExecutionStep::from_route(route);
        if let Some(hash) = route.source_tx_hash() {
            self.tx_hash = Some(hash);
        }

        let route_steps = route.steps.len().max(1);
        let done = route.completed_steps();
        let in_flight = route.steps.iter().any(|s| {
            matches!(
                s.status(),
                StepStatus::Started
                    | StepStatus::Pending
                    | StepStatus::ActionRequired
                    | StepStatus::ChainSwitchRequired
            )
        });

        self.current_step = (done * self.total_steps / route_steps).min(self.total_steps);
        let mut progress = done * 100 / route_steps;
        if in_flight {
            progress += 50 / route_steps;
        }
        // 100 is reserved for the terminal state
        self.advance_progress(progress.min(99) as u8);
        self.estimated_time_remaining_secs = self.estimate_remaining();
    }
}

/// Terminal outcome of an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub success: bool,
    pub tool: String,
    /// Last known route state, partial progress included
    pub route: Option<Route>,
    pub tx_hash: Option<String>,
    pub steps: Vec<ExecutionStep>,
    pub retry_count: u32,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::sample_quote;
    use crate::types::{ProcessStatus, ProcessType};

    #[test]
    fn progress_never_moves_backwards() {
        let quote = sample_quote(1, 5000);
        let mut route = quote_to_route(&quote, None).unwrap();
        let mut monitor = ExecutionMonitor::new("x", &quote, &route);
        assert_eq!(monitor.estimated_time_remaining_secs, 120);

        route.steps[0].set_status(StepStatus::Started);
        let process = route.steps[0].add_process(ProcessType::CrossChain, ProcessStatus::Pending);
        route.steps[0].process_mut(process).unwrap().tx_hash = Some("0xabc".into());
        monitor.apply_route(&route);
        assert_eq!(monitor.progress, 50);
        assert_eq!(monitor.tx_hash.as_deref(), Some("0xabc"));

        route.steps[0].set_status(StepStatus::Failed);
        monitor.apply_route(&route);
        assert_eq!(monitor.progress, 50);

        monitor.advance_progress(20);
        assert_eq!(monitor.progress, 50);
    }

    #[test]
    fn terminal_statuses() {
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(!ExecutionStatus::ActionRequired.is_terminal());
        assert_eq!(
            serde_json::to_value(ExecutionStatus::ChainSwitchRequired).unwrap(),
            "CHAIN_SWITCH_REQUIRED"
        );
    }
}
