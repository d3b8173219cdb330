//! Execution engine: validate, build, execute with retries, monitor

use super::{
    quote_to_route, ExecutionConfig, ExecutionMonitor, ExecutionRequest, ExecutionResult,
    ExecutionStatus,
};
use crate::aggregator::{Aggregator, ExchangeRateUpdate, ExecutionHooks};
use crate::config::ExecutionSettings;
use crate::error::{EngineError, EngineResult, RetryClassifier};
use crate::history::{ExecutionKind, ExecutionRecord, HistoryStore};
use crate::quote::PerformanceTracker;
use crate::rate_limit::RateLimiter;
use crate::signer::{Signer, SignerProvider};
use crate::store::MonitorRegistry;
use crate::tx::TransactionBuilder;
use crate::types::Route;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const KIND: &str = "single-chain";

pub struct ExecutionEngine {
    aggregator: Arc<dyn Aggregator>,
    rate_limiter: Arc<RateLimiter>,
    builder: Arc<TransactionBuilder>,
    signers: Arc<dyn SignerProvider>,
    history_store: Arc<dyn HistoryStore>,
    performance: Arc<PerformanceTracker>,
    monitors: Arc<MonitorRegistry<ExecutionMonitor>>,
    history: RwLock<VecDeque<ExecutionResult>>,
    pending_actions: Arc<DashMap<String, oneshot::Sender<bool>>>,
    classifier: RetryClassifier,
    config: ExecutionSettings,
}

impl ExecutionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        aggregator: Arc<dyn Aggregator>,
        rate_limiter: Arc<RateLimiter>,
        builder: Arc<TransactionBuilder>,
        signers: Arc<dyn SignerProvider>,
        history_store: Arc<dyn HistoryStore>,
        performance: Arc<PerformanceTracker>,
        monitors: Arc<MonitorRegistry<ExecutionMonitor>>,
        config: ExecutionSettings,
    ) -> Self {
        Self {
            aggregator,
            rate_limiter,
            builder,
            signers,
            history_store,
            performance,
            monitors,
            history: RwLock::new(VecDeque::new()),
            pending_actions: Arc::new(DashMap::new()),
            classifier: RetryClassifier::new(&config.retryable_errors),
            config,
        }
    }

    /// Execute the quote's route on its source chain.
    ///
    /// Validation and build problems are returned as errors before anything
    /// is tracked. Once the execution starts, every outcome, failures
    /// included, comes back as an [`ExecutionResult`] carrying the last known
    /// route state.
    pub async fn execute_transaction(
        &self,
        request: ExecutionRequest,
        options: ExecutionConfig,
    ) -> EngineResult<ExecutionResult> {
        let quote = &request.quote;
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

        let tx = self.builder.build_transaction(quote).await?;
        if !options.skip_validation {
            let validation = self
                .builder
                .validate_transaction(&tx, &request.user_address, quote)
                .await;
            for warning in &validation.warnings {
                debug!("Execution {}: {}", id, warning);
            }
            if !validation.is_valid {
                return Err(EngineError::Validation(validation.errors.join("; ")));
            }
        }

        let route = quote_to_route(quote, Some(tx))?;
        let started_at = Utc::now();
        let clock = Instant::now();

        self.monitors
            .insert(id.clone(), ExecutionMonitor::new(&id, quote, &route));
        self.publish_active();

        let record = ExecutionRecord::from_quote(
            &id,
            ExecutionKind::SingleChain,
            quote,
            &request.user_address,
            ExecutionStatus::Pending.as_str(),
        );
        if let Err(e) = self.history_store.save(&record).await {
            warn!("Failed to save history for execution {}: {}", id, e);
        }

        info!(
            "Execution {} started: {} via {} on chain {}",
            id, quote.id, quote.tool, quote.action.from_chain_id
        );

        let hooks = Arc::new(EngineHooks {
            execution_id: id.clone(),
            user_address: request.user_address.clone(),
            monitors: self.monitors.clone(),
            signers: self.signers.clone(),
            history_store: self.history_store.clone(),
            pending_actions: self.pending_actions.clone(),
            latest: Mutex::new(route),
            last_hash: Mutex::new(None),
            max_slippage_increase: options
                .max_slippage_increase
                .unwrap_or(self.config.max_slippage_increase),
            action_timeout: Duration::from_secs(self.config.action_required_timeout_secs),
        });

        let outcome = match self
            .signers
            .get_signer(&request.user_address, quote.action.from_chain_id)
            .await
        {
            Ok(signer) => self.run_with_retries(&id, signer, hooks.clone(), &options).await,
            Err(e) => Err(e),
        };

        let route = hooks.latest_route().await;
        let retry_count = self
            .monitors
            .get(&id)
            .map(|m| m.retry_count)
            .unwrap_or_default();

        let (status, route, error) = match outcome {
            Ok(route) => (ExecutionStatus::Done, route, None),
            Err(e) => {
                error!("Execution {} failed: {}", id, e);
                (ExecutionStatus::Failed, route, Some(e.to_string()))
            }
        };

        let result = ExecutionResult {
            execution_id: id.clone(),
            status,
            success: status == ExecutionStatus::Done,
            tool: quote.tool.clone(),
            tx_hash: route.source_tx_hash(),
            steps: super::ExecutionStep::from_route(&route),
            route: Some(route),
            retry_count,
            error,
            started_at,
            completed_at: Utc::now(),
            duration_ms: clock.elapsed().as_millis() as u64,
        };

        Ok(self.finalize(result, quote.gas_cost_usd()).await)
    }

    async fn run_with_retries(
        &self,
        id: &str,
        signer: Arc<dyn Signer>,
        hooks: Arc<EngineHooks>,
        options: &ExecutionConfig,
    ) -> EngineResult<Route> {
        let max_retries = options.max_retries.unwrap_or(self.config.max_retries);
        let retry_delay = options
            .retry_delay
            .unwrap_or_else(|| Duration::from_millis(self.config.retry_delay_ms));
        let deadline = Instant::now() + Duration::from_secs(self.config.monitoring_timeout_secs);
        let mut attempt: u32 = 0;

        loop {
            if !self.monitors.contains(id) {
                return Err(EngineError::Cancelled { id: id.to_string() });
            }
            self.monitors.update(id, |m| {
                m.set_status(if attempt == 0 {
                    ExecutionStatus::Started
                } else {
                    ExecutionStatus::Executing
                })
            });

            let hooks_dyn: Arc<dyn ExecutionHooks> = hooks.clone();
            let call = || {
                let aggregator = self.aggregator.clone();
                let signer = signer.clone();
                let hooks = hooks.clone();
                let hooks_dyn = hooks_dyn.clone();
                async move {
                    let route = hooks.latest_route().await;
                    aggregator.execute_route(route, signer, hooks_dyn).await
                }
            };

            let result = match timeout_at(
                deadline,
                self.rate_limiter.execute_throttled(call, None),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => {
                    return Err(EngineError::Timeout {
                        operation: format!("execution {}", id),
                    })
                }
            };

            match result {
                Ok(route) => return Ok(route),
                Err(e) => {
                    if attempt >= max_retries || !self.classifier.is_retryable(&e) {
                        return Err(e);
                    }
                    if Instant::now() + retry_delay >= deadline {
                        return Err(e);
                    }

                    attempt += 1;
                    warn!(
                        "Execution {} attempt {}/{} failed: {}, retrying in {:?}",
                        id,
                        attempt,
                        max_retries + 1,
                        e,
                        retry_delay
                    );
                    self.monitors.update(id, |m| {
                        m.retry_count = attempt;
                        m.message = Some(e.to_string());
                    });
                    sleep(retry_delay).await;
                }
            }
        }
    }

    /// Record a terminal result unless another path already did.
    ///
    /// Whoever removes the monitor owns the terminal state; a late result
    /// for a cancelled execution is discarded in favour of the recorded one.
    async fn finalize(&self, result: ExecutionResult, cost_usd: f64) -> ExecutionResult {
        if self.monitors.remove(&result.execution_id).is_none() {
            debug!(
                "Execution {} already terminal, discarding {} outcome",
                result.execution_id,
                result.status.as_str()
            );
            return match self.get_execution_result(&result.execution_id).await {
                Some(recorded) => recorded,
                None => ExecutionResult {
                    status: ExecutionStatus::Cancelled,
                    success: false,
                    ..result
                },
            };
        }
        self.pending_actions.remove(&result.execution_id);
        self.publish_active();

        self.record_terminal(&result).await;
        if result.status != ExecutionStatus::Cancelled {
            self.performance.record(
                &result.tool,
                result.success,
                Duration::from_millis(result.duration_ms),
                cost_usd,
            );
        }

        info!(
            "Execution {} finished {} after {} ms",
            result.execution_id,
            result.status.as_str(),
            result.duration_ms
        );
        result
    }

    async fn record_terminal(&self, result: &ExecutionResult) {
        crate::metrics::record_execution(KIND, result.status.as_str());
        crate::metrics::observe_execution_duration(KIND, result.duration_ms as f64 / 1000.0);

        {
            let mut history = self.history.write().await;
            history.push_back(result.clone());
            while history.len() > self.config.max_history.max(1) {
                history.pop_front();
            }
        }

        let fields = serde_json::json!({
            "retryCount": result.retry_count,
            "steps": result.steps,
            "durationMs": result.duration_ms,
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

    /// Answer a paused rate-change prompt
    pub fn respond_to_action(&self, execution_id: &str, accept: bool) -> EngineResult<()> {
        let (_, sender) = self
            .pending_actions
            .remove(execution_id)
            .ok_or_else(|| EngineError::ExecutionNotFound {
                id: execution_id.to_string(),
            })?;

        info!(
            "Execution {} rate change {}",
            execution_id,
            if accept { "accepted" } else { "rejected" }
        );
        // Receiver gone means the wait already timed out
        let _ = sender.send(accept);
        Ok(())
    }

    /// Advisory cancel: the in-flight upstream call keeps running, its result is dropped
    pub async fn cancel_execution(&self, execution_id: &str) -> bool {
        let monitor = match self.monitors.remove(execution_id) {
            Some(monitor) => monitor,
            None => return false,
        };
        self.pending_actions.remove(execution_id);
        self.publish_active();

        let now = Utc::now();
        let result = ExecutionResult {
            execution_id: execution_id.to_string(),
            status: ExecutionStatus::Cancelled,
            success: false,
            tool: monitor.tool.clone(),
            route: None,
            tx_hash: monitor.tx_hash.clone(),
            steps: monitor.steps.clone(),
            retry_count: monitor.retry_count,
            error: Some("Cancelled by user".to_string()),
            started_at: monitor.started_at,
            completed_at: now,
            duration_ms: (now - monitor.started_at).num_milliseconds().max(0) as u64,
        };
        self.record_terminal(&result).await;

        info!("Execution {} cancelled", execution_id);
        true
    }

    /// Live monitor, `None` once terminal
    pub fn get_execution_status(&self, execution_id: &str) -> Option<ExecutionMonitor> {
        self.monitors.get(execution_id)
    }

    pub async fn get_execution_result(&self, execution_id: &str) -> Option<ExecutionResult> {
        self.history
            .read()
            .await
            .iter()
            .rev()
            .find(|r| r.execution_id == execution_id)
            .cloned()
    }

    pub fn active_executions(&self) -> Vec<ExecutionMonitor> {
        self.monitors.values()
    }

    /// Most recent terminal results first
    pub async fn execution_history(&self, limit: usize) -> Vec<ExecutionResult> {
        self.history
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Drop terminal results older than `max_age`
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
}

/// Hooks bound to one execution
struct EngineHooks {
    execution_id: String,
    user_address: String,
    monitors: Arc<MonitorRegistry<ExecutionMonitor>>,
    signers: Arc<dyn SignerProvider>,
    history_store: Arc<dyn HistoryStore>,
    pending_actions: Arc<DashMap<String, oneshot::Sender<bool>>>,
    /// Latest route state reported by the aggregator; retries resume from it
    latest: Mutex<Route>,
    last_hash: Mutex<Option<String>>,
    max_slippage_increase: f64,
    action_timeout: Duration,
}

impl EngineHooks {
    async fn latest_route(&self) -> Route {
        self.latest.lock().await.clone()
    }

    fn set_status(&self, status: ExecutionStatus, message: Option<String>) {
        self.monitors.update(&self.execution_id, |m| {
            m.set_status(status);
            if message.is_some() {
                m.message = message;
            }
        });
    }
}

#[async_trait]
impl ExecutionHooks for EngineHooks {
    async fn on_route_update(&self, route: &Route) {
        *self.latest.lock().await = route.clone();
        self.monitors
            .update(&self.execution_id, |m| m.apply_route(route));

        if let Some(hash) = route.source_tx_hash() {
            let mut last = self.last_hash.lock().await;
            if last.as_deref() != Some(hash.as_str()) {
                debug!("Execution {} broadcast {}", self.execution_id, hash);
                if let Err(e) = self
                    .history_store
                    .update_hash(&self.execution_id, &hash, None)
                    .await
                {
                    warn!("Failed to record hash for {}: {}", self.execution_id, e);
                }
                *last = Some(hash);
            }
        }
    }

    async fn switch_chain(&self, chain_id: u64) -> EngineResult<Arc<dyn Signer>> {
        self.set_status(
            ExecutionStatus::ChainSwitchRequired,
            Some(format!("Switching to chain {}", chain_id)),
        );
        let signer = self.signers.get_signer(&self.user_address, chain_id).await?;
        self.set_status(ExecutionStatus::Executing, None);
        Ok(signer)
    }

    async fn accept_exchange_rate_update(&self, update: &ExchangeRateUpdate) -> bool {
        let decrease = update.decrease();
        if decrease <= self.max_slippage_increase {
            debug!(
                "Execution {} auto-accepting {:.2}% rate change on {}",
                self.execution_id,
                decrease * 100.0,
                update.tool
            );
            return true;
        }
        if !self.monitors.contains(&self.execution_id) {
            return false;
        }

        let (sender, receiver) = oneshot::channel();
        self.pending_actions
            .insert(self.execution_id.clone(), sender);
        self.set_status(
            ExecutionStatus::ActionRequired,
            Some(format!(
                "Output dropped {:.2}% ({} -> {}), confirmation required",
                decrease * 100.0,
                update.old_to_amount,
                update.new_to_amount
            )),
        );
        warn!(
            "Execution {} paused: {:.2}% rate drop exceeds {:.2}%",
            self.execution_id,
            decrease * 100.0,
            self.max_slippage_increase * 100.0
        );

        let accepted = matches!(
            tokio::time::timeout(self.action_timeout, receiver).await,
            Ok(Ok(true))
        );
        self.pending_actions.remove(&self.execution_id);

        if accepted {
            self.set_status(ExecutionStatus::Executing, None);
        }
        accepted
    }
}
