//! xchain-router - cross-chain swap and bridge orchestration service
//!
//! Wires the quote, execution and cross-chain services, then keeps caches,
//! bridge statuses and history tidy in the background until shutdown.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use xchain_router::config::Settings;
use xchain_router::maintenance::Maintenance;
use xchain_router::metrics::MetricsServer;
use xchain_router::Services;

/// Interval between chain and database health checks
const HEALTH_CHECK_INTERVAL_SECS: u64 = 60;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("Starting xchain-router v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} chains and {} tools",
        settings.enabled_chains().len(),
        settings.tools.len()
    );

    let metrics_server = if settings.metrics.enabled {
        Some(MetricsServer::new(settings.metrics.port))
    } else {
        None
    };

    let services = Arc::new(Services::new(settings).await?);
    info!("Services initialized");

    let metrics_handle = metrics_server.map(|server| {
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        })
    });

    let maintenance = Arc::new(Maintenance::new(services.clone()));
    let maintenance_handle = tokio::spawn(maintenance.clone().run());

    let health_handle = tokio::spawn({
        let services = services.clone();
        async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(HEALTH_CHECK_INTERVAL_SECS)).await;

                for (chain_id, healthy) in services.chain_manager.health_check().await {
                    if !healthy {
                        warn!("Chain {} health check failed", chain_id);
                    }
                }

                if let Some(database) = &services.database {
                    if let Err(e) = database.health_check().await {
                        warn!("Database health check failed: {}", e);
                    }
                }
            }
        }
    });

    info!("xchain-router is running");
    if services.settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", services.settings.metrics.port);
    }

    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    maintenance.stop();
    let in_flight = services.cross_chain.active_cross_chain_executions().len()
        + services.engine.active_executions().len();
    if in_flight > 0 {
        warn!("Stopping with {} executions still in flight", in_flight);
    }

    maintenance_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("xchain-router stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,xchain_router=debug,sqlx=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
