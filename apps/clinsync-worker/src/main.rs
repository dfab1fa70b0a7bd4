//! Sync worker daemon.
//!
//! Connects to the database, runs migrations, and hands control to the
//! scheduler: periodic incremental syncs for every organization with
//! practice-API credentials, plus the stale-run sweeper. Ctrl-C drains
//! the scheduler loop.

mod config;

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use clinsync_engine::{run_migrations, SchedulerConfig, SyncScheduler, SyncService};
use clinsync_vault::{CredentialCipher, CredentialVault};

use crate::config::WorkerConfig;

#[tokio::main]
async fn main() {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,clinsync_engine=debug")),
        )
        .init();

    let config = WorkerConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Configuration error: {e}");
        std::process::exit(1);
    });

    let cipher = CredentialCipher::from_hex(&config.master_key)
        .or_else(|_| CredentialCipher::from_base64(&config.master_key))
        .unwrap_or_else(|e| {
            eprintln!("Invalid CLINSYNC_MASTER_KEY (expected 32 bytes, hex or base64): {e}");
            std::process::exit(1);
        });

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .unwrap_or_else(|e| {
            eprintln!("Database connection error: {e}");
            std::process::exit(1);
        });

    run_migrations(&pool).await.unwrap_or_else(|e| {
        eprintln!("Migration error: {e}");
        std::process::exit(1);
    });

    let vault = Arc::new(CredentialVault::new(pool.clone(), cipher));
    let service = Arc::new(SyncService::new(pool, vault));

    let scheduler_config = SchedulerConfig {
        sync_interval_secs: config.sync_interval_secs,
        sweep_interval_secs: config.sweep_interval_secs,
        stale_threshold_minutes: config.stale_threshold_minutes,
        ..SchedulerConfig::default()
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = SyncScheduler::new(Arc::clone(&service), scheduler_config, shutdown_rx);
    let scheduler_handle = tokio::spawn(scheduler.run());

    tracing::info!("Sync worker started");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }

    tracing::info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);
    let _ = scheduler_handle.await;

    tracing::info!("Sync worker stopped");
}
