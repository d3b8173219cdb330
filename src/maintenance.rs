//! Background upkeep: cache sweeps, bridge refreshes and history pruning

use crate::services::Services;

use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info};

/// Background jobs, each on its own task so a slow one never delays the others
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    CacheSweep,
    BridgeRefresh,
    HistoryCleanup,
}

pub struct Maintenance {
    services: Arc<Services>,
    shutdown: watch::Sender<bool>,
}

impl Maintenance {
    pub fn new(services: Arc<Services>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self { services, shutdown }
    }

    /// Spawn every job and wait until all of them have seen [`Maintenance::stop`]
    pub async fn run(self: Arc<Self>) {
        let settings = &self.services.settings;
        let jobs = [
            (Job::CacheSweep, settings.quotes.sweep_interval_secs),
            (Job::BridgeRefresh, settings.cross_chain.bridge_sweep_interval_secs),
            (Job::HistoryCleanup, settings.history.cleanup_interval_secs),
        ];

        info!("Maintenance started");

        let handles: Vec<_> = jobs
            .into_iter()
            .map(|(job, secs)| {
                let maintenance = self.clone();
                tokio::spawn(async move {
                    maintenance
                        .run_job(job, Duration::from_secs(secs.max(1)))
                        .await
                })
            })
            .collect();

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Maintenance task ended abnormally: {}", e);
            }
        }

        info!("Maintenance stopped");
    }

    async fn run_job(&self, job: Job, period: Duration) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    match job {
                        Job::CacheSweep => {
                            self.sweep_caches().await;
                        }
                        Job::BridgeRefresh => {
                            self.services.cross_chain.refresh_bridge_statuses().await;
                        }
                        Job::HistoryCleanup => {
                            self.cleanup_history().await;
                        }
                    }
                }

                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        debug!("Maintenance job {:?} stopped", job);
    }

    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// Evict expired quotes, comparisons, gas tiers and bridge statuses
    pub async fn sweep_caches(&self) -> usize {
        let removed = self.services.quotes.sweep_caches().await
            + self.services.builder.gas_optimizer().sweep_cache().await
            + self.services.cross_chain.sweep_caches().await;
        if removed > 0 {
            debug!("Swept {} expired cache entries", removed);
        }
        removed
    }

    /// Drop history entries older than the configured max age
    pub async fn cleanup_history(&self) -> usize {
        let max_age = Duration::from_secs(self.services.settings.history.max_age_secs);
        let mut removed = self.services.engine.cleanup_history(max_age).await
            + self.services.cross_chain.cleanup_history(max_age).await;

        match self.services.history_store.prune(max_age).await {
            Ok(pruned) => removed += pruned as usize,
            Err(e) => error!("Failed to prune execution history: {}", e),
        }

        if removed > 0 {
            info!("Removed {} history entries older than {:?}", removed, max_age);
        }
        removed
    }
}
