//! Rolling per-tool execution statistics used for reliability ranking

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Bridge waits beyond this count as the slowest possible speed score
const SLOWEST_EXPECTED_SECS: f64 = 1800.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderPerformance {
    pub tool: String,
    /// Fraction in [0, 1]
    pub success_rate: f64,
    pub avg_time_secs: f64,
    pub avg_cost_usd: f64,
    pub total_transactions: u64,
    pub successful_transactions: u64,
    pub last_updated: DateTime<Utc>,
}

impl ProviderPerformance {
    fn new(tool: &str) -> Self {
        Self {
            tool: tool.to_string(),
            success_rate: 0.0,
            avg_time_secs: 0.0,
            avg_cost_usd: 0.0,
            total_transactions: 0,
            successful_transactions: 0,
            last_updated: Utc::now(),
        }
    }

    /// 1.0 for instant, 0.0 at or beyond thirty minutes
    pub fn speed_score(&self) -> f64 {
        (1.0 - self.avg_time_secs / SLOWEST_EXPECTED_SECS).clamp(0.0, 1.0)
    }
}

#[derive(Default)]
pub struct PerformanceTracker {
    stats: DashMap<String, ProviderPerformance>,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one terminal execution into the tool's running averages
    pub fn record(&self, tool: &str, success: bool, duration: Duration, cost_usd: f64) {
        let key = tool.to_lowercase();
        let mut entry = self
            .stats
            .entry(key)
            .or_insert_with(|| ProviderPerformance::new(tool));

        let stats = entry.value_mut();
        let n = stats.total_transactions as f64;
        stats.total_transactions += 1;
        if success {
            stats.successful_transactions += 1;
        }
        stats.success_rate = stats.successful_transactions as f64 / stats.total_transactions as f64;
        stats.avg_time_secs = (stats.avg_time_secs * n + duration.as_secs_f64()) / (n + 1.0);
        stats.avg_cost_usd = (stats.avg_cost_usd * n + cost_usd.max(0.0)) / (n + 1.0);
        stats.last_updated = Utc::now();

        debug!(
            "Tool {} performance: {:.0}% success over {} executions",
            tool,
            stats.success_rate * 100.0,
            stats.total_transactions
        );
    }

    pub fn get(&self, tool: &str) -> Option<ProviderPerformance> {
        self.stats.get(&tool.to_lowercase()).map(|s| s.clone())
    }

    pub fn all(&self) -> Vec<ProviderPerformance> {
        self.stats.iter().map(|s| s.value().clone()).collect()
    }

    /// `0.7 * success_rate + 0.3 * speed_score`, or `neutral` without history
    pub fn reliability_score(&self, tool: &str, neutral: f64) -> f64 {
        match self.get(tool) {
            Some(stats) if stats.total_transactions > 0 => {
                0.7 * stats.success_rate + 0.3 * stats.speed_score()
            }
            _ => neutral,
        }
    }
}
