//! Beacon server binary.
//!
//! ## Configuration
//!
//! - `BEACON_CONFIG`: path to the TOML config (default: `config/beacon.toml`)
//! - `BEACON_WEBHOOK_URL`: overrides `webhook.url`
//! - `PORT`: overrides `server.port`
//! - `RUST_LOG`: logging filter (default: "info")

use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use beacon::config::BeaconConfig;
use beacon::metrics::Metrics;
use beacon::queue::DispatchQueue;
use beacon::server::{self, create_router, AppState};
use beacon::shutdown::ShutdownSignal;
use beacon::worker::WorkerPool;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize Logging
    dotenvy::dotenv().ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // 2. Load Configuration
    let config = BeaconConfig::load().map_err(|e| {
        error!(error = %e, "Invalid configuration");
        e
    })?;

    // 3. Start the dispatch pipeline
    let metrics = Arc::new(Metrics::new());
    let queue = Arc::new(DispatchQueue::new(
        config.queue.capacity,
        config.queue.admission_policy(),
    ));
    let client = Arc::new(config.webhook.build_client());

    info!(
        webhook = %client.url(),
        timeout_ms = config.webhook.timeout_ms,
        max_attempts = config.webhook.max_attempts,
        "Webhook delivery configured"
    );

    let pool = WorkerPool::spawn(config.worker.count, queue.clone(), client, metrics.clone());

    // 4. Build Router
    let app = create_router(AppState::new(queue, metrics.clone()));

    // 5. Start Server
    let shutdown = ShutdownSignal::with_timeout(config.worker.shutdown_grace());
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move { shutdown.wait().await }
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = server::bind(addr).await.map_err(|e| {
        error!(error = %e, "Could not start listener");
        e
    })?;
    info!("Beacon listening on {}", addr);

    server::run(listener, app, shutdown.clone().cancelled_owned()).await?;

    // 6. Drain the queue
    let report = pool.shutdown(shutdown.timeout()).await;
    let totals = metrics.snapshot();

    info!(
        drained_in_time = report.drained_in_time,
        dropped = report.dropped,
        accepted = totals.accepted,
        delivered = totals.delivered,
        rejected = totals.rejected,
        failed = totals.failed,
        "Beacon shutdown complete"
    );

    Ok(())
}
