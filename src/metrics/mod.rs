//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Quote cache effectiveness and upstream rate limiting
//! - Execution outcomes and latency
//! - Bridge status polling
//! - Chain RPC health

use crate::error::{EngineError, EngineResult};

use axum::{http::StatusCode, routing::get, Json, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use serde::Serialize;
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Quote metrics
    pub static ref QUOTE_REQUESTS: CounterVec = register_counter_vec!(
        "xchain_quote_requests_total",
        "Quote requests by cache outcome",
        &["cache"]
    ).expect("register xchain_quote_requests_total");

    pub static ref UPSTREAM_RATE_LIMITED: CounterVec = register_counter_vec!(
        "xchain_upstream_rate_limited_total",
        "Upstream 429 responses absorbed by the rate limiter",
        &[]
    ).expect("register xchain_upstream_rate_limited_total");

    // Execution metrics
    pub static ref EXECUTIONS: CounterVec = register_counter_vec!(
        "xchain_executions_total",
        "Terminal executions by kind and status",
        &["kind", "status"]
    ).expect("register xchain_executions_total");

    pub static ref EXECUTION_LATENCY: HistogramVec = register_histogram_vec!(
        "xchain_execution_duration_seconds",
        "Wall-clock time from start to terminal state",
        &["kind"],
        vec![5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 1800.0]
    ).expect("register xchain_execution_duration_seconds");

    pub static ref ACTIVE_EXECUTIONS: GaugeVec = register_gauge_vec!(
        "xchain_active_executions",
        "Executions currently in flight",
        &["kind"]
    ).expect("register xchain_active_executions");

    // Bridge metrics
    pub static ref BRIDGE_POLLS: CounterVec = register_counter_vec!(
        "xchain_bridge_status_polls_total",
        "Bridge status lookups by reported status",
        &["status"]
    ).expect("register xchain_bridge_status_polls_total");

    // Chain metrics
    pub static ref CHAIN_CONNECTED: GaugeVec = register_gauge_vec!(
        "xchain_chain_connected",
        "Chain RPC status (1=reachable, 0=unreachable)",
        &["chain_id"]
    ).expect("register xchain_chain_connected");
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> EngineResult<()> {
        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| EngineError::Internal(format!("Failed to bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| EngineError::Internal(format!("Metrics server failed: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    render().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Text exposition of every registered metric
pub fn render() -> EngineResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| EngineError::Internal(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer).map_err(|e| EngineError::Internal(e.to_string()))
}

// Helper functions to record metrics

pub fn record_quote_request(cache: &str) {
    QUOTE_REQUESTS.with_label_values(&[cache]).inc();
}

pub fn record_upstream_rate_limited() {
    UPSTREAM_RATE_LIMITED.with_label_values(&[]).inc();
}

pub fn record_execution(kind: &str, status: &str) {
    EXECUTIONS.with_label_values(&[kind, status]).inc();
}

pub fn observe_execution_duration(kind: &str, secs: f64) {
    EXECUTION_LATENCY.with_label_values(&[kind]).observe(secs);
}

pub fn set_active_executions(kind: &str, count: usize) {
    ACTIVE_EXECUTIONS.with_label_values(&[kind]).set(count as f64);
}

pub fn record_bridge_poll(status: &str) {
    BRIDGE_POLLS.with_label_values(&[status]).inc();
}

pub fn record_chain_health(chain_id: u64, healthy: bool) {
    CHAIN_CONNECTED
        .with_label_values(&[&chain_id.to_string()])
        .set(if healthy { 1.0 } else { 0.0 });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorded_metrics_show_up_in_exposition() {
        record_quote_request("hit");
        record_execution("cross-chain", "COMPLETED");
        record_chain_health(5000, true);

        let text = render().unwrap();
        assert!(text.contains("xchain_quote_requests_total"));
        assert!(text.contains("xchain_executions_total"));
        assert!(text.contains("chain_id=\"5000\""));
    }
}
