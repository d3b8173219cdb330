//! Phase state machine for cross-chain transfers

use super::{
    CrossChainExecutionRequest, CrossChainExecutionResult, CrossChainMonitor, CrossChainStatus,
    ExecutionPhase, FallbackRouter, FeeBreakdown, LegStatus, TransactionInfo,
};
use crate::aggregator::Aggregator;
use crate::config::CrossChainSettings;
use crate::error::{EngineError, EngineResult};
use crate::execution::{ExecutionConfig, ExecutionEngine, ExecutionRequest, ExecutionStatus};
use crate::history::{ExecutionKind, ExecutionRecord, HistoryStore};
use crate::quote::QuoteManager;
use crate::rate_limit::RateLimiter;
use crate::store::{CacheStore, MonitorRegistry};
use crate::types::{
    BridgeStatus, QuoteRequest, QuoteResponse, StatusRequest, TransferInfo, TransferStatus,
};

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const KIND: &str = "cross-chain";

const PROGRESS_QUOTED: u8 = 5;
const PROGRESS_SOURCE: u8 = 10;
const PROGRESS_SOURCE_DONE: u8 = 35;
const PROGRESS_BRIDGE: u8 = 40;
const PROGRESS_BRIDGE_DONE: u8 = 75;
const PROGRESS_DESTINATION: u8 = 80;
const PROGRESS_FINAL: u8 = 100;

/// How far one route attempt got before it stopped
struct LegOutcome {
    phase: ExecutionPhase,
    status: CrossChainStatus,
    source: Option<TransactionInfo>,
    bridge: Option<TransactionInfo>,
    destination: Option<TransactionInfo>,
    error: Option<String>,
}

impl LegOutcome {
    fn new() -> Self {
        Self {
            phase: ExecutionPhase::Preparation,
            status: CrossChainStatus::Initializing,
            source: None,
            bridge: None,
            destination: None,
            error: None,
        }
    }

    fn failed(mut self, error: impl ToString) -> Self {
        self.status = CrossChainStatus::Failed;
        self.error = Some(error.to_string());
        self
    }

    fn cancelled(mut self) -> Self {
        self.status = CrossChainStatus::Cancelled;
        self.error = Some("Cancelled by user".to_string());
        self
    }
}

/// Wall and monotonic start of one execution
#[derive(Clone, Copy)]
struct Started {
    at: DateTime<Utc>,
    clock: Instant,
}

pub struct CrossChainExecutor {
    quotes: Arc<QuoteManager>,
    engine: Arc<ExecutionEngine>,
    aggregator: Arc<dyn Aggregator>,
    rate_limiter: Arc<RateLimiter>,
    fallback: FallbackRouter,
    history_store: Arc<dyn HistoryStore>,
    monitors: Arc<MonitorRegistry<CrossChainMonitor>>,
    bridge_cache: Arc<dyn CacheStore<BridgeStatus>>,
    history: RwLock<VecDeque<CrossChainExecutionResult>>,
    config: CrossChainSettings,
}

impl CrossChainExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        quotes: Arc<QuoteManager>,
        engine: Arc<ExecutionEngine>,
        aggregator: Arc<dyn Aggregator>,
        rate_limiter: Arc<RateLimiter>,
        history_store: Arc<dyn HistoryStore>,
        monitors: Arc<MonitorRegistry<CrossChainMonitor>>,
        bridge_cache: Arc<dyn CacheStore<BridgeStatus>>,
        config: CrossChainSettings,
    ) -> Self {
        Self {
            fallback: FallbackRouter::new(quotes.clone()),
            quotes,
            engine,
            aggregator,
            rate_limiter,
            history_store,
            monitors,
            bridge_cache,
            history: RwLock::new(VecDeque::new()),
            config,
        }
    }

    pub fn fallback_router(&self) -> &FallbackRouter {
        &self.fallback
    }

    /// Run a full transfer: quote, source leg, bridge wait, destination leg.
    ///
    /// Only input problems come back as errors. Every started transfer ends
    /// in a result; failed ones keep whatever legs already completed.
    pub async fn execute_cross_chain(
        &self,
        request: CrossChainExecutionRequest,
    ) -> EngineResult<CrossChainExecutionResult> {
        let id = request
            .execution_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if self.monitors.contains(&id) {
            return Err(EngineError::Validation(format!(
                "Execution {} is already running",
                id
            )));
        }

        let started = Started {
            at: Utc::now(),
            clock: Instant::now(),
        };
        self.monitors.insert(
            id.clone(),
            CrossChainMonitor::new(&id, &request.user_address, request.quote_request.is_cross_chain()),
        );
        self.publish_active();

        info!(
            "Cross-chain execution {} started: chain {} -> {}",
            id, request.quote_request.from_chain, request.quote_request.to_chain
        );

        self.monitors.update(&id, |m| {
            m.advance(ExecutionPhase::Preparation, CrossChainStatus::QuoteGeneration, 0)
        });
        // Persisted before any await so a cancel always finds a record to finish
        let placeholder = ExecutionRecord::from_request(
            &id,
            ExecutionKind::CrossChain,
            &request.quote_request,
            &request.user_address,
            CrossChainStatus::QuoteGeneration.as_str(),
        );
        if let Err(e) = self.history_store.save(&placeholder).await {
            warn!("Failed to save history for {}: {}", id, e);
        }

        let quote = match request.quote.clone() {
            Some(quote) => Ok(quote),
            None => self.quotes.get_quote(&request.quote_request).await,
        };
        if !self.monitors.contains(&id) {
            let outcome = LegOutcome::new().cancelled();
            let result = self.build_result(&id, quote.ok(), outcome, 1, started);
            return Ok(self.finish(result).await);
        }
        let quote = match quote {
            Ok(quote) => quote,
            Err(e) if e.is_fatal() => {
                self.abandon(&id, &e).await;
                return Err(e);
            }
            Err(e) => {
                let outcome = LegOutcome::new().failed(format!("Quote generation failed: {}", e));
                let result = self.build_result(&id, None, outcome, 1, started);
                return Ok(self.finish(result).await);
            }
        };

        let validation = self.quotes.validate_route(&quote);
        if !validation.is_valid {
            let e = EngineError::Validation(validation.errors.join("; "));
            self.abandon(&id, &e).await;
            return Err(e);
        }
        for warning in &validation.warnings {
            warn!("Execution {}: {}", id, warning);
        }

        let record = ExecutionRecord::from_quote(
            &id,
            ExecutionKind::CrossChain,
            &quote,
            &request.user_address,
            CrossChainStatus::QuoteGeneration.as_str(),
        );
        if let Err(e) = self.history_store.save(&record).await {
            warn!("Failed to save history for {}: {}", id, e);
        }
        if !self.monitors.contains(&id) {
            // Cancelled while the quoted record was written; put the terminal state back
            self.rewrite_recorded(&id).await;
            let outcome = LegOutcome::new().cancelled();
            let result = self.build_result(&id, Some(quote), outcome, 1, started);
            return Ok(self.finish(result).await);
        }
        self.monitors.update(&id, |m| {
            m.quote = Some(quote.clone());
            m.raise_progress(PROGRESS_QUOTED);
        });

        let enabled = request.enable_fallback.unwrap_or(self.config.enable_fallback);
        let max_fallbacks = if enabled {
            request.max_fallbacks.unwrap_or(self.config.max_fallbacks)
        } else {
            0
        };

        let primary_tool = quote.tool.clone();
        let (id_ref, request_ref) = (id.as_str(), &request);
        let outcome = self
            .fallback
            .execute_route_with_fallback(
                &request.quote_request,
                quote,
                max_fallbacks,
                move |route_quote, attempt| {
                    self.attempt_route(id_ref, request_ref, route_quote, attempt, started)
                },
            )
            .await;

        let mut result = outcome.result;
        result.attempts = outcome.attempts;
        result.fallback_tool = outcome.fallback_tool;
        if let (true, Some(tool)) = (result.success, &result.fallback_tool) {
            info!(
                "Execution {} completed via fallback {} after {} failed",
                id, tool, primary_tool
            );
        }
        Ok(self.finish(result).await)
    }

    async fn attempt_route(
        &self,
        id: &str,
        request: &CrossChainExecutionRequest,
        quote: QuoteResponse,
        attempt: usize,
        started: Started,
    ) -> CrossChainExecutionResult {
        let outcome = self
            .run_phases(id, &request.user_address, &quote, attempt, &request.execution)
            .await;
        if outcome.status == CrossChainStatus::Failed {
            warn!(
                "Execution {} route via {} failed in {}: {}",
                id,
                quote.tool,
                outcome.phase.as_str(),
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
        self.build_result(id, Some(quote), outcome, attempt + 1, started)
    }

    async fn run_phases(
        &self,
        id: &str,
        user_address: &str,
        quote: &QuoteResponse,
        attempt: usize,
        options: &ExecutionConfig,
    ) -> LegOutcome {
        let mut outcome = LegOutcome::new();
        if !self.monitors.contains(id) {
            return outcome.cancelled();
        }

        // Source chain
        outcome.phase = ExecutionPhase::SourceChain;
        let leg_id = if attempt == 0 {
            format!("{}-source", id)
        } else {
            format!("{}-fallback-{}", id, attempt)
        };
        self.monitors.update(id, |m| {
            m.quote = Some(quote.clone());
            m.fallback_attempt = attempt;
            m.active_leg = Some(leg_id.clone());
            m.source_status = LegStatus::InProgress;
        });
        self.transition(
            id,
            ExecutionPhase::SourceChain,
            CrossChainStatus::SourceExecution,
            PROGRESS_SOURCE,
        )
        .await;

        let mut source = TransactionInfo::new(quote.action.from_chain_id, LegStatus::InProgress);
        source.amount = Some(quote.action.from_amount.clone());
        source.token = Some(quote.action.from_token.symbol.clone());
        source.tool = Some(quote.tool.clone());

        let execution = self
            .engine
            .execute_transaction(
                ExecutionRequest {
                    quote: quote.clone(),
                    user_address: user_address.to_string(),
                    execution_id: Some(leg_id),
                },
                options.clone(),
            )
            .await;
        self.monitors.update(id, |m| m.active_leg = None);

        let execution = match execution {
            Ok(execution) => execution,
            Err(e) => {
                source.status = LegStatus::Failed;
                outcome.source = Some(source);
                self.monitors.update(id, |m| m.source_status = LegStatus::Failed);
                return outcome.failed(format!("Source execution failed: {}", e));
            }
        };

        source.tx_hash = execution.tx_hash.clone();
        source.timestamp = Utc::now();
        if !self.monitors.contains(id) || execution.status == ExecutionStatus::Cancelled {
            source.status = LegStatus::Failed;
            outcome.source = Some(source);
            return outcome.cancelled();
        }
        if execution.status != ExecutionStatus::Done {
            source.status = LegStatus::Failed;
            outcome.source = Some(source.clone());
            self.monitors.update(id, |m| {
                m.source_status = LegStatus::Failed;
                m.source_transaction = Some(source);
            });
            let error = execution
                .error
                .unwrap_or_else(|| "unknown error".to_string());
            return outcome.failed(format!("Source execution failed: {}", error));
        }

        source.status = LegStatus::Completed;
        let source_hash = source.tx_hash.clone();
        outcome.source = Some(source.clone());
        self.monitors.update(id, |m| {
            m.source_status = LegStatus::Completed;
            m.source_transaction = Some(source);
            m.raise_progress(PROGRESS_SOURCE_DONE);
        });
        if let Some(hash) = &source_hash {
            if let Err(e) = self.history_store.update_hash(id, hash, None).await {
                warn!("Failed to record source hash for {}: {}", id, e);
            }
        }

        if !quote.is_cross_chain() {
            outcome.destination = outcome.source.clone();
            outcome.phase = ExecutionPhase::Finalization;
            outcome.status = CrossChainStatus::Completed;
            self.monitors
                .update(id, |m| m.destination_status = LegStatus::Completed);
            self.transition(id, ExecutionPhase::Finalization, CrossChainStatus::Completed, PROGRESS_FINAL)
                .await;
            return outcome;
        }

        // Bridge
        let source_hash = match source_hash {
            Some(hash) => hash,
            None => return outcome.failed("Source leg finished without a transaction hash"),
        };
        outcome.phase = ExecutionPhase::Bridge;
        self.monitors.update(id, |m| {
            m.bridge_status = LegStatus::InProgress;
            m.bridge_started = Some(Instant::now());
        });
        self.transition(id, ExecutionPhase::Bridge, CrossChainStatus::Bridging, PROGRESS_BRIDGE)
            .await;

        let mut bridge = TransactionInfo::new(quote.action.from_chain_id, LegStatus::InProgress);
        bridge.tx_hash = Some(source_hash.clone());
        bridge.tool = Some(quote.tool.clone());

        let delivered = match self.monitor_bridge(id, &source_hash, quote).await {
            Ok(status) => status,
            Err(e) => {
                bridge.status = LegStatus::Failed;
                outcome.bridge = Some(bridge);
                self.monitors.update(id, |m| m.bridge_status = LegStatus::Failed);
                return outcome.failed(e);
            }
        };

        bridge.status = LegStatus::Completed;
        bridge.timestamp = Utc::now();
        if let Some(receiving) = &delivered.receiving {
            bridge.chain_id = receiving.chain_id.unwrap_or(quote.action.to_chain_id);
            bridge.amount = receiving.amount.clone();
            bridge.token = receiving.token.as_ref().map(|t| t.symbol.clone());
        }
        outcome.bridge = Some(bridge);
        self.monitors.update(id, |m| {
            m.bridge_status = LegStatus::Completed;
            m.raise_progress(PROGRESS_BRIDGE_DONE);
        });

        // Destination chain
        outcome.phase = ExecutionPhase::DestinationChain;
        self.monitors
            .update(id, |m| m.destination_status = LegStatus::InProgress);
        self.transition(
            id,
            ExecutionPhase::DestinationChain,
            CrossChainStatus::DestinationExecution,
            PROGRESS_DESTINATION,
        )
        .await;

        match self
            .complete_destination(id, user_address, quote, &delivered, options)
            .await
        {
            Ok(destination) => outcome.destination = Some(destination),
            Err(e) => {
                let mut failed = TransactionInfo::new(quote.action.to_chain_id, LegStatus::Failed);
                failed.token = Some(quote.action.to_token.symbol.clone());
                outcome.destination = Some(failed);
                self.monitors
                    .update(id, |m| m.destination_status = LegStatus::Failed);
                return outcome.failed(format!("Destination execution failed: {}", e));
            }
        }
        self.monitors
            .update(id, |m| m.destination_status = LegStatus::Completed);

        outcome.phase = ExecutionPhase::Finalization;
        outcome.status = CrossChainStatus::Completed;
        self.transition(id, ExecutionPhase::Finalization, CrossChainStatus::Completed, PROGRESS_FINAL)
            .await;
        outcome
    }

    /// Poll the bridge until it settles or the wait cap passes
    async fn monitor_bridge(
        &self,
        id: &str,
        tx_hash: &str,
        quote: &QuoteResponse,
    ) -> EngineResult<BridgeStatus> {
        let started = Instant::now();
        let timeout = Duration::from_secs(self.config.bridge_timeout_secs);
        let interval = Duration::from_secs(self.config.bridge_poll_interval_secs.max(1));
        let request = StatusRequest {
            tx_hash: tx_hash.to_string(),
            bridge: Some(quote.tool.clone()),
            from_chain: Some(quote.action.from_chain_id),
            to_chain: Some(quote.action.to_chain_id),
        };

        loop {
            match self.bridge_status(&request).await {
                Ok(status) => {
                    let waited = started.elapsed().as_secs_f64() / timeout.as_secs_f64().max(1.0);
                    let span = (PROGRESS_BRIDGE_DONE - PROGRESS_BRIDGE) as f64;
                    let progress = PROGRESS_BRIDGE + (span * waited.min(0.9)) as u8;
                    self.monitors.update(id, |m| {
                        m.latest_bridge_status = Some(status.clone());
                        m.raise_progress(progress);
                    });

                    match status.status {
                        TransferStatus::Done => {
                            info!("Bridge transfer {} delivered for {}", tx_hash, id);
                            return Ok(status);
                        }
                        TransferStatus::Failed | TransferStatus::Invalid => {
                            let reason = status
                                .substatus_message
                                .clone()
                                .or_else(|| status.substatus.clone())
                                .unwrap_or_else(|| status.status.as_str().to_string());
                            return Err(EngineError::Execution(format!(
                                "Bridge transfer {} failed: {}",
                                tx_hash, reason
                            )));
                        }
                        TransferStatus::Pending | TransferStatus::NotFound => {}
                    }
                }
                Err(e) => warn!("Bridge status for {} unavailable: {}", tx_hash, e),
            }

            if started.elapsed() >= timeout {
                error!(
                    "Bridge transfer {} for {} still pending after {:?}",
                    tx_hash, id, timeout
                );
                return Err(EngineError::Timeout {
                    operation: format!(
                        "bridge transfer {} after {} minutes",
                        tx_hash,
                        timeout.as_secs() / 60
                    ),
                });
            }
            sleep(interval).await;
        }
    }

    /// Bridge status through the per-hash cache
    async fn bridge_status(&self, request: &StatusRequest) -> EngineResult<BridgeStatus> {
        if let Some(status) = self.bridge_cache.get(&request.tx_hash.to_lowercase()).await {
            return Ok(status);
        }
        self.fetch_bridge_status(request).await
    }

    /// One upstream status call; both pollers already repeat on their own schedule
    async fn fetch_bridge_status(&self, request: &StatusRequest) -> EngineResult<BridgeStatus> {
        let status = self
            .rate_limiter
            .execute_with_rate_limit(|| self.aggregator.get_status(request), Some(0))
            .await?;
        crate::metrics::record_bridge_poll(status.status.as_str());

        self.bridge_cache
            .put(
                request.tx_hash.to_lowercase(),
                status.clone(),
                Duration::from_secs(self.config.bridge_status_ttl_secs),
            )
            .await;
        Ok(status)
    }

    /// Swap into the requested token when the bridge delivered something else
    async fn complete_destination(
        &self,
        id: &str,
        user_address: &str,
        quote: &QuoteResponse,
        delivered: &BridgeStatus,
        options: &ExecutionConfig,
    ) -> EngineResult<TransactionInfo> {
        let receiving = delivered.receiving.clone().unwrap_or(TransferInfo {
            tx_hash: None,
            tx_link: None,
            chain_id: Some(quote.action.to_chain_id),
            amount: None,
            token: None,
            timestamp: None,
        });
        let wrong_token = receiving
            .token
            .as_ref()
            .map(|t| !t.address.eq_ignore_ascii_case(&quote.action.to_token.address))
            .unwrap_or(false);

        let mut destination = TransactionInfo::new(quote.action.to_chain_id, LegStatus::Completed);
        destination.token = Some(quote.action.to_token.symbol.clone());
        destination.tx_hash = receiving.tx_hash.clone();
        destination.amount = receiving.amount.clone();
        destination.tool = Some(quote.tool.clone());

        if !delivered.is_partial() && !wrong_token {
            return Ok(destination);
        }

        let (token, amount) = match (receiving.token, receiving.amount) {
            (Some(token), Some(amount)) => (token, amount),
            _ => {
                return Err(EngineError::Execution(
                    "Bridge delivered a partial transfer without token details".to_string(),
                ))
            }
        };
        if !wrong_token {
            return Ok(destination);
        }

        info!(
            "Execution {} received {} {} on chain {}, swapping into {}",
            id, amount, token.symbol, quote.action.to_chain_id, quote.action.to_token.symbol
        );

        let mut swap_request = QuoteRequest::new(
            quote.action.to_chain_id,
            quote.action.to_chain_id,
            token.address.clone(),
            quote.action.to_token.address.clone(),
            amount,
            user_address,
        );
        swap_request.to_address = Some(quote.action.to_address.clone());

        let swap_quote = self.quotes.get_quote(&swap_request).await?;
        let swap = self
            .engine
            .execute_transaction(
                ExecutionRequest {
                    quote: swap_quote.clone(),
                    user_address: user_address.to_string(),
                    execution_id: Some(format!("{}-destination", id)),
                },
                options.clone(),
            )
            .await?;

        if swap.status != ExecutionStatus::Done {
            return Err(EngineError::Execution(swap.error.unwrap_or_else(|| {
                format!("destination swap ended {}", swap.status.as_str())
            })));
        }

        destination.tx_hash = swap.tx_hash;
        destination.tool = Some(swap_quote.tool.clone());
        destination.amount = swap_quote.estimate.as_ref().map(|e| e.to_amount.clone());
        destination.timestamp = Utc::now();
        Ok(destination)
    }

    /// Advance the monitor and mirror the new status into history
    async fn transition(&self, id: &str, phase: ExecutionPhase, status: CrossChainStatus, progress: u8) {
        let advanced = self
            .monitors
            .update(id, |m| m.advance(phase, status, progress))
            .unwrap_or(false);
        if !advanced {
            debug!("Execution {} ignored transition to {}", id, phase.as_str());
            return;
        }

        debug!("Execution {} entered {} ({})", id, phase.as_str(), status.as_str());
        let fields = serde_json::json!({ "phase": phase.as_str() });
        if let Err(e) = self
            .history_store
            .update_status(id, status.as_str(), None, fields)
            .await
        {
            debug!("History update for {} skipped: {}", id, e);
        }
    }

    fn build_result(
        &self,
        id: &str,
        quote: Option<QuoteResponse>,
        outcome: LegOutcome,
        attempts: usize,
        started: Started,
    ) -> CrossChainExecutionResult {
        CrossChainExecutionResult {
            execution_id: id.to_string(),
            status: outcome.status,
            success: outcome.status == CrossChainStatus::Completed,
            final_phase: outcome.phase,
            fees: quote.as_ref().map(FeeBreakdown::from_quote).unwrap_or_default(),
            quote,
            source_transaction: outcome.source,
            bridge_transaction: outcome.bridge,
            destination_transaction: outcome.destination,
            error: outcome.error,
            fallback_tool: None,
            attempts,
            started_at: started.at,
            completed_at: Utc::now(),
            duration_ms: started.clock.elapsed().as_millis() as u64,
        }
    }

    /// Drop the monitor of an execution rejected before any route ran
    async fn abandon(&self, id: &str, error: &EngineError) {
        if self.monitors.remove(id).is_none() {
            return;
        }
        self.publish_active();
        if let Err(e) = self
            .history_store
            .update_status(
                id,
                CrossChainStatus::Failed.as_str(),
                Some(error.to_string()),
                serde_json::json!({ "phase": ExecutionPhase::Preparation.as_str() }),
            )
            .await
        {
            warn!("Failed to update history for {}: {}", id, e);
        }
    }

    /// Write the already-recorded terminal result to the store again
    async fn rewrite_recorded(&self, id: &str) {
        if let Some(recorded) = self.get_cross_chain_result(id).await {
            self.persist_terminal(&recorded).await;
        }
    }

    /// Record the terminal state once; a late caller gets the recorded result
    async fn finish(&self, result: CrossChainExecutionResult) -> CrossChainExecutionResult {
        let id = result.execution_id.clone();
        if self.monitors.remove(&id).is_none() {
            debug!("Execution {} already terminal, discarding late outcome", id);
            return match self.get_cross_chain_result(&id).await {
                Some(recorded) => recorded,
                None => CrossChainExecutionResult {
                    status: CrossChainStatus::Cancelled,
                    success: false,
                    ..result
                },
            };
        }
        self.publish_active();
        self.record_terminal(&result).await;

        if result.success {
            info!(
                "Cross-chain execution {} completed in {} ms",
                id, result.duration_ms
            );
        } else {
            error!(
                "Cross-chain execution {} {} in {}: {}",
                id,
                result.status.as_str(),
                result.final_phase.as_str(),
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
        result
    }

    async fn record_terminal(&self, result: &CrossChainExecutionResult) {
        crate::metrics::record_execution(KIND, result.status.as_str());
        crate::metrics::observe_execution_duration(KIND, result.duration_ms as f64 / 1000.0);

        {
            let mut history = self.history.write().await;
            history.push_back(result.clone());
            while history.len() > self.config.max_history.max(1) {
                history.pop_front();
            }
        }

        self.persist_terminal(result).await;
    }

    async fn persist_terminal(&self, result: &CrossChainExecutionResult) {
        let fields = serde_json::json!({
            "phase": result.final_phase.as_str(),
            "fees": result.fees,
            "sourceTransaction": result.source_transaction,
            "bridgeTransaction": result.bridge_transaction,
            "destinationTransaction": result.destination_transaction,
            "attempts": result.attempts,
            "fallbackTool": result.fallback_tool,
        });
        if let Err(e) = self
            .history_store
            .update_status(
                &result.execution_id,
                result.status.as_str(),
                result.error.clone(),
                fields,
            )
            .await
        {
            warn!("Failed to update history for {}: {}", result.execution_id, e);
        }
    }

    fn publish_active(&self) {
        crate::metrics::set_active_executions(KIND, self.monitors.len());
    }

    /// Cancel while funds are still on the source chain; refused from the bridge phase on
    pub async fn cancel_cross_chain_execution(&self, execution_id: &str) -> bool {
        let monitor = match self.monitors.get(execution_id) {
            Some(monitor) => monitor,
            None => return false,
        };
        // The source leg can broadcast well before the engine hands its result back
        let leg_broadcast = monitor
            .active_leg
            .as_deref()
            .and_then(|leg| self.engine.get_execution_status(leg))
            .map(|leg| leg.tx_hash.is_some())
            .unwrap_or(false);
        if !monitor.current_phase.is_cancellable()
            || monitor.source_tx_hash().is_some()
            || leg_broadcast
        {
            warn!(
                "Refusing to cancel {} in {}: funds are committed",
                execution_id,
                monitor.current_phase.as_str()
            );
            return false;
        }

        // Removing the monitor claims the terminal state
        let monitor = match self.monitors.remove(execution_id) {
            Some(monitor) => monitor,
            None => return false,
        };
        self.publish_active();
        if let Some(leg) = &monitor.active_leg {
            self.engine.cancel_execution(leg).await;
        }

        let now = Utc::now();
        let result = CrossChainExecutionResult {
            execution_id: execution_id.to_string(),
            status: CrossChainStatus::Cancelled,
            success: false,
            final_phase: monitor.current_phase,
            fees: monitor
                .quote
                .as_ref()
                .map(FeeBreakdown::from_quote)
                .unwrap_or_default(),
            quote: monitor.quote.clone(),
            source_transaction: monitor.source_transaction.clone(),
            bridge_transaction: None,
            destination_transaction: None,
            error: Some("Cancelled by user".to_string()),
            fallback_tool: None,
            attempts: monitor.fallback_attempt + 1,
            started_at: monitor.started_at,
            completed_at: now,
            duration_ms: (now - monitor.started_at).num_milliseconds().max(0) as u64,
        };
        self.record_terminal(&result).await;

        info!("Cross-chain execution {} cancelled", execution_id);
        true
    }

    /// Refresh every transfer waiting on its bridge, independent of the awaiting caller
    pub async fn refresh_bridge_statuses(&self) -> usize {
        let bridging: Vec<CrossChainMonitor> = self
            .monitors
            .values()
            .into_iter()
            .filter(|m| m.current_phase == ExecutionPhase::Bridge && !m.status.is_terminal())
            .collect();

        let mut refreshed = 0;
        for monitor in bridging {
            let (hash, quote) = match (monitor.source_tx_hash(), monitor.quote.as_ref()) {
                (Some(hash), Some(quote)) => (hash.to_string(), quote),
                _ => continue,
            };
            let request = StatusRequest {
                tx_hash: hash.clone(),
                bridge: Some(quote.tool.clone()),
                from_chain: Some(quote.action.from_chain_id),
                to_chain: Some(quote.action.to_chain_id),
            };

            match self.fetch_bridge_status(&request).await {
                Ok(status) => {
                    self.monitors.update(&monitor.execution_id, |m| {
                        m.latest_bridge_status = Some(status);
                        m.updated_at = Utc::now();
                    });
                    refreshed += 1;
                }
                Err(e) => warn!("Bridge refresh for {} failed: {}", hash, e),
            }
        }

        if refreshed > 0 {
            debug!("Refreshed {} bridge statuses", refreshed);
        }
        refreshed
    }

    /// Live monitor, `None` once terminal
    pub fn get_cross_chain_status(&self, execution_id: &str) -> Option<CrossChainMonitor> {
        self.monitors.get(execution_id)
    }

    pub fn active_cross_chain_executions(&self) -> Vec<CrossChainMonitor> {
        self.monitors.values()
    }

    pub async fn get_cross_chain_result(&self, execution_id: &str) -> Option<CrossChainExecutionResult> {
        self.history
            .read()
            .await
            .iter()
            .rev()
            .find(|r| r.execution_id == execution_id)
            .cloned()
    }

    /// Most recent first
    pub async fn cross_chain_history(&self, limit: usize) -> Vec<CrossChainExecutionResult> {
        self.history
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn cleanup_history(&self, max_age: Duration) -> usize {
        let cutoff = match chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        {
            Some(cutoff) => cutoff,
            None => return 0,
        };

        let mut history = self.history.write().await;
        let before = history.len();
        history.retain(|r| r.completed_at >= cutoff);
        before - history.len()
    }

    /// Drop expired bridge statuses
    pub async fn sweep_caches(&self) -> usize {
        self.bridge_cache.sweep().await
    }
}

#[cfg(test)]
impl CrossChainExecutor {
    pub(crate) fn insert_monitor(&self, monitor: CrossChainMonitor) {
        self.monitors.insert(monitor.execution_id.clone(), monitor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainRpc, FeeData, MockChainRpc};
    use crate::config::{ExecutionSettings, QuoteConfig, RateLimitConfig, TransactionConfig};
    use crate::history::{MemoryHistoryStore, MockHistoryStore};
    use crate::quote::PerformanceTracker;
    use crate::registry::tests::test_settings;
    use crate::registry::ConfigRegistry;
    use crate::store::MemoryCache;
    use crate::test_utils::{
        native, sample_quote, usdc, ExecutePlan, FakeAggregator, FakeSignerProvider, TEST_ACCOUNT,
    };
    use crate::tx::{GasOptimizer, TransactionBuilder};
    use crate::types::Token;
    use ethers::types::U256;
    use std::sync::Mutex;

    struct Harness {
        executor: CrossChainExecutor,
        aggregator: Arc<FakeAggregator>,
        monitors: Arc<MonitorRegistry<CrossChainMonitor>>,
    }

    fn chain() -> MockChainRpc {
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

    fn harness_with(history: Arc<dyn HistoryStore>) -> Harness {
        let aggregator = Arc::new(FakeAggregator::new());
        let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            min_interval_ms: 0,
            ..RateLimitConfig::default()
        }));
        let performance = Arc::new(PerformanceTracker::new());
        let quotes = Arc::new(QuoteManager::new(
            aggregator.clone(),
            rate_limiter.clone(),
            Arc::new(ConfigRegistry::from_settings(&test_settings())),
            performance.clone(),
            Arc::new(MemoryCache::new("quotes", 100)),
            Arc::new(MemoryCache::new("comparisons", 100)),
            QuoteConfig::default(),
        ));

        let chain: Arc<dyn ChainRpc> = Arc::new(chain());
        let gas = GasOptimizer::new(
            chain.clone(),
            Arc::new(MemoryCache::new("gas", 16)),
            Duration::from_secs(30),
            Vec::new(),
        );
        let engine = Arc::new(ExecutionEngine::new(
            aggregator.clone(),
            rate_limiter.clone(),
            Arc::new(TransactionBuilder::new(chain, gas, TransactionConfig::default())),
            Arc::new(FakeSignerProvider::new()),
            history.clone(),
            performance,
            Arc::new(MonitorRegistry::new()),
            ExecutionSettings::default(),
        ));

        let monitors = Arc::new(MonitorRegistry::new());
        let executor = CrossChainExecutor::new(
            quotes,
            engine,
            aggregator.clone(),
            rate_limiter,
            history,
            monitors.clone(),
            Arc::new(MemoryCache::new("bridge", 100)),
            CrossChainSettings::default(),
        );

        Harness {
            executor,
            aggregator,
            monitors,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(MemoryHistoryStore::new()))
    }

    fn request(id: &str) -> CrossChainExecutionRequest {
        let mut request = CrossChainExecutionRequest::new(
            QuoteRequest::new(1, 5000, "USDC", "MNT", "100000000", TEST_ACCOUNT),
            TEST_ACCOUNT,
        );
        request.execution_id = Some(id.to_string());
        request
    }

    fn delivered(token: Token, amount: &str, substatus: Option<&str>) -> BridgeStatus {
        BridgeStatus {
            status: TransferStatus::Done,
            substatus: substatus.map(str::to_string),
            substatus_message: None,
            sending: None,
            receiving: Some(TransferInfo {
                tx_hash: Some("0xdest".to_string()),
                tx_link: None,
                chain_id: Some(5000),
                amount: Some(amount.to_string()),
                token: Some(token),
                timestamp: None,
            }),
            tool: Some("stargateV2".to_string()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transfer_runs_every_phase_to_completion() {
        let h = harness();
        h.aggregator.push_status(BridgeStatus::pending());
        h.aggregator
            .set_default_status(delivered(native(5000), "151000000000000000000", None));

        let result = h.executor.execute_cross_chain(request("happy")).await.unwrap();

        assert!(result.success);
        assert_eq!(result.status, CrossChainStatus::Completed);
        assert_eq!(result.final_phase, ExecutionPhase::Finalization);
        assert_eq!(result.attempts, 1);
        assert!(result.fallback_tool.is_none());
        assert!(result.source_committed());
        assert_eq!(
            result.bridge_transaction.as_ref().unwrap().status,
            LegStatus::Completed
        );
        assert_eq!(
            result.destination_transaction.as_ref().unwrap().tx_hash.as_deref(),
            Some("0xdest")
        );
        assert!(result.fees.total_usd > 0.0);

        assert!(h.executor.get_cross_chain_status("happy").is_none());
        assert!(h.executor.active_cross_chain_executions().is_empty());
        assert_eq!(h.executor.cross_chain_history(10).await.len(), 1);
        // Source leg only, the bridge delivered the requested token
        assert_eq!(h.aggregator.execute_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn statuses_are_written_in_phase_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut store = MockHistoryStore::new();
        store.expect_save().returning(|_| Ok(()));
        store.expect_update_hash().returning(|_, _, _| Ok(()));
        store.expect_prune().returning(|_| Ok(0));
        let log = seen.clone();
        store
            .expect_update_status()
            .returning(move |id: &str, status: &str, _, _| {
                if id == "ordered" {
                    log.lock().unwrap().push(status.to_string());
                }
                Ok(())
            });

        let h = harness_with(Arc::new(store));
        h.aggregator
            .set_default_status(delivered(native(5000), "151000000000000000000", None));
        let result = h.executor.execute_cross_chain(request("ordered")).await.unwrap();
        assert!(result.success);

        let seen = seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                "SOURCE_EXECUTION",
                "BRIDGING",
                "DESTINATION_EXECUTION",
                "COMPLETED",
                "COMPLETED",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_bridge_times_out_keeping_the_source_leg() {
        let h = harness();
        let started = Instant::now();

        let result = h.executor.execute_cross_chain(request("stuck")).await.unwrap();

        assert_eq!(result.status, CrossChainStatus::Failed);
        assert_eq!(result.final_phase, ExecutionPhase::Bridge);
        assert!(result.error.as_deref().unwrap().contains("Timeout"));
        assert!(result.source_committed());
        assert_eq!(
            result.bridge_transaction.as_ref().unwrap().status,
            LegStatus::Failed
        );
        assert!(started.elapsed() >= Duration::from_secs(30 * 60));
        // Committed source funds are never routed around
        assert_eq!(result.attempts, 1);
        assert_eq!(h.aggregator.execute_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_bridge_reports_its_reason() {
        let h = harness();
        h.aggregator.set_default_status(BridgeStatus {
            status: TransferStatus::Failed,
            substatus_message: Some("refunded on source chain".to_string()),
            ..BridgeStatus::pending()
        });

        let result = h.executor.execute_cross_chain(request("refund")).await.unwrap();

        assert_eq!(result.status, CrossChainStatus::Failed);
        assert!(result.error.unwrap().contains("refunded on source chain"));
    }

    #[tokio::test(start_paused = true)]
    async fn source_failure_falls_back_to_another_bridge() {
        let h = harness();
        h.aggregator.fail_tool("stargateV2");
        h.aggregator
            .set_default_status(delivered(native(5000), "150000000000000000000", None));

        let result = h.executor.execute_cross_chain(request("fallback")).await.unwrap();

        assert!(result.success);
        assert_eq!(result.attempts, 2);
        let tool = result.fallback_tool.clone().unwrap();
        assert!(!tool.eq_ignore_ascii_case("stargateV2"));
        assert_eq!(result.quote.unwrap().tool, tool);
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_can_be_switched_off() {
        let h = harness();
        h.aggregator.fail_tool("stargateV2");
        let mut req = request("no-fallback");
        req.enable_fallback = Some(false);

        let result = h.executor.execute_cross_chain(req).await.unwrap();

        assert_eq!(result.status, CrossChainStatus::Failed);
        assert_eq!(result.final_phase, ExecutionPhase::SourceChain);
        assert_eq!(result.attempts, 1);
        assert!(!result.source_committed());
    }

    #[tokio::test(start_paused = true)]
    async fn partial_delivery_is_swapped_on_destination() {
        let h = harness();
        h.aggregator
            .set_default_status(delivered(usdc(5000), "99000000", Some("PARTIAL")));

        let result = h.executor.execute_cross_chain(request("partial")).await.unwrap();

        assert!(result.success);
        assert_eq!(h.aggregator.execute_calls(), 2);
        let swap = &h.aggregator.executed_routes()[1];
        assert_eq!(swap.from_chain_id, 5000);
        assert_eq!(swap.to_chain_id, 5000);
        let destination = result.destination_transaction.unwrap();
        assert_ne!(destination.tx_hash.as_deref(), Some("0xdest"));
        assert_eq!(destination.chain_id, 5000);
    }

    #[tokio::test]
    async fn invalid_request_is_rejected_without_tracking() {
        let h = harness();
        let mut req = request("bad");
        req.quote_request.from_amount = "0".to_string();

        let result = h.executor.execute_cross_chain(req).await;

        assert!(matches!(result, Err(EngineError::Validation(_))));
        assert!(h.monitors.is_empty());
        assert!(h.executor.get_cross_chain_result("bad").await.is_none());
    }

    #[tokio::test]
    async fn bridging_transfers_cannot_be_cancelled() {
        let h = harness();
        let mut monitor = CrossChainMonitor::new("bridging", TEST_ACCOUNT, true);
        monitor.advance(ExecutionPhase::SourceChain, CrossChainStatus::SourceExecution, 10);
        monitor.advance(ExecutionPhase::Bridge, CrossChainStatus::Bridging, 40);
        h.monitors.insert("bridging".to_string(), monitor);

        assert!(!h.executor.cancel_cross_chain_execution("bridging").await);
        assert!(h.executor.get_cross_chain_status("bridging").is_some());
        assert!(h.executor.get_cross_chain_result("bridging").await.is_none());
    }

    #[tokio::test]
    async fn cancel_before_funds_move_records_one_terminal_state() {
        let h = harness();
        let mut monitor = CrossChainMonitor::new("early", TEST_ACCOUNT, true);
        monitor.quote = Some(sample_quote(1, 5000));
        h.monitors.insert("early".to_string(), monitor);

        assert!(h.executor.cancel_cross_chain_execution("early").await);
        assert!(!h.executor.cancel_cross_chain_execution("early").await);

        let result = h.executor.get_cross_chain_result("early").await.unwrap();
        assert_eq!(result.status, CrossChainStatus::Cancelled);
        assert_eq!(result.final_phase, ExecutionPhase::Preparation);
        assert_eq!(h.executor.cross_chain_history(10).await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_quote_generation_is_persisted() {
        let history = Arc::new(MemoryHistoryStore::new());
        let h = harness_with(history.clone());
        // Holds the quote in the limiter's transient back-off
        h.aggregator
            .push_quote_error(EngineError::Transient("connection reset".into()));

        let run = h.executor.execute_cross_chain(request("quoting"));
        let cancel = async {
            sleep(Duration::from_millis(100)).await;
            h.executor.cancel_cross_chain_execution("quoting").await
        };
        let (result, cancelled) = tokio::join!(run, cancel);

        assert!(cancelled);
        let result = result.unwrap();
        assert_eq!(result.status, CrossChainStatus::Cancelled);
        assert_eq!(h.aggregator.execute_calls(), 0);
        assert_eq!(history.get("quoting").unwrap().status, "CANCELLED");
        assert_eq!(h.executor.cross_chain_history(10).await.len(), 1);
        assert!(h.monitors.is_empty());
    }

    #[tokio::test]
    async fn rejected_quote_leaves_a_failed_record() {
        let history = Arc::new(MemoryHistoryStore::new());
        let h = harness_with(history.clone());
        let mut req = request("rejected");
        req.quote_request.from_amount = "0".to_string();

        assert!(h.executor.execute_cross_chain(req).await.is_err());
        assert_eq!(history.get("rejected").unwrap().status, "FAILED");
    }

    #[tokio::test(start_paused = true)]
    async fn broadcast_source_leg_cannot_be_cancelled() {
        let history = Arc::new(MemoryHistoryStore::new());
        let h = harness_with(history.clone());
        h.aggregator
            .push_plan(ExecutePlan::SlowConfirmation(Duration::from_secs(60)));
        h.aggregator
            .set_default_status(delivered(native(5000), "151000000000000000000", None));

        let run = h.executor.execute_cross_chain(request("inflight"));
        let cancel = async {
            sleep(Duration::from_secs(10)).await;
            let monitor = h.executor.get_cross_chain_status("inflight").unwrap();
            assert_eq!(monitor.current_phase, ExecutionPhase::SourceChain);
            assert!(monitor.source_transaction.is_none());
            h.executor.cancel_cross_chain_execution("inflight").await
        };
        let (result, cancelled) = tokio::join!(run, cancel);

        assert!(!cancelled);
        let result = result.unwrap();
        assert!(result.success);
        assert!(result.source_committed());
        assert_eq!(history.get("inflight").unwrap().status, "COMPLETED");
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_updates_bridging_monitors() {
        let h = harness();
        let mut monitor = CrossChainMonitor::new("sweep", TEST_ACCOUNT, true);
        monitor.quote = Some(sample_quote(1, 5000));
        monitor.advance(ExecutionPhase::SourceChain, CrossChainStatus::SourceExecution, 10);
        let mut source = TransactionInfo::new(1, LegStatus::Completed);
        source.tx_hash = Some("0xsource".to_string());
        monitor.source_transaction = Some(source);
        monitor.advance(ExecutionPhase::Bridge, CrossChainStatus::Bridging, 40);
        h.monitors.insert("sweep".to_string(), monitor);
        h.monitors
            .insert("idle".to_string(), CrossChainMonitor::new("idle", TEST_ACCOUNT, true));

        assert_eq!(h.executor.refresh_bridge_statuses().await, 1);
        assert_eq!(h.aggregator.status_calls(), 1);
        let monitor = h.executor.get_cross_chain_status("sweep").unwrap();
        assert_eq!(
            monitor.latest_bridge_status.unwrap().status,
            TransferStatus::Pending
        );
    }
}
