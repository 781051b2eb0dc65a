//! upwatch - Service Monitoring Daemon
//!
//! Probes a user-defined set of HTTP(S) and TCP+TLS endpoints on individual
//! recurring intervals, records pass/fail history and raises notifications
//! on failure.

use upwatch::checker::ProtocolChecker;
use upwatch::config::AppConfig;
use upwatch::connectivity::AlwaysOnline;
use upwatch::db::Store;
use upwatch::notify::LogNotifier;
use upwatch::scheduler::{Scheduler, SchedulerOptions};

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("upwatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = AppConfig::load();
    tracing::info!("Starting upwatch...");
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    // Create scheduler
    let scheduler = Scheduler::new(
        store.clone(),
        ProtocolChecker::new(),
        Arc::new(LogNotifier),
        Arc::new(AlwaysOnline),
        SchedulerOptions {
            min_interval: cfg.min_interval(),
            retry_delay: cfg.retry_delay(),
        },
    );

    // Start monitoring every active service
    scheduler.schedule_all().await?;

    // Run until interrupted, then stop all recurring work cleanly
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    scheduler.shutdown().await;

    Ok(())
}
