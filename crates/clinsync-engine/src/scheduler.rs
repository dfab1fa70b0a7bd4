//! Periodic sync triggering and stale-run sweeping.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::run::SyncMode;
use crate::service::SyncService;

/// Scheduler intervals and thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between scheduled sync passes over all organizations.
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    /// Seconds between stale-run sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Minutes a run may stay in `running` before the sweeper fails it.
    #[serde(default = "default_stale_threshold_minutes")]
    pub stale_threshold_minutes: i64,

    /// Mode requested for scheduled runs. First runs are still promoted
    /// to full by the service.
    #[serde(default = "default_mode")]
    pub mode: SyncMode,
}

fn default_sync_interval_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_stale_threshold_minutes() -> i64 {
    30
}

fn default_mode() -> SyncMode {
    SyncMode::Incremental
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: default_sync_interval_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            stale_threshold_minutes: default_stale_threshold_minutes(),
            mode: default_mode(),
        }
    }
}

/// Drives periodic syncs and the stale-run sweeper until shutdown.
pub struct SyncScheduler {
    service: Arc<SyncService>,
    config: SchedulerConfig,
    shutdown: watch::Receiver<bool>,
}

impl SyncScheduler {
    #[must_use]
    pub fn new(
        service: Arc<SyncService>,
        config: SchedulerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            service,
            config,
            shutdown,
        }
    }

    /// Run the scheduler loop until the shutdown signal flips.
    ///
    /// The sweeper runs once up front so runs orphaned by a previous
    /// worker crash release their locks before the first sync pass.
    pub async fn run(self) {
        info!(
            sync_interval_secs = self.config.sync_interval_secs,
            sweep_interval_secs = self.config.sweep_interval_secs,
            stale_threshold_minutes = self.config.stale_threshold_minutes,
            "Scheduler started"
        );

        self.sweep().await;

        let mut shutdown = self.shutdown.clone();
        let mut sync_tick =
            tokio::time::interval(Duration::from_secs(self.config.sync_interval_secs));
        let mut sweep_tick =
            tokio::time::interval(Duration::from_secs(self.config.sweep_interval_secs));
        sync_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        sweep_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        // The first interval tick fires immediately; consume both so the
        // first scheduled pass is a full interval away.
        sync_tick.tick().await;
        sweep_tick.tick().await;

        loop {
            tokio::select! {
                _ = sync_tick.tick() => self.sync_all().await,
                _ = sweep_tick.tick() => self.sweep().await,
                changed = shutdown.changed() => {
                    // A dropped sender also means shutdown.
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Scheduler shutting down");
                        return;
                    }
                }
            }
        }
    }

    async fn sync_all(&self) {
        let organizations = match self.service.organizations().await {
            Ok(orgs) => orgs,
            Err(e) => {
                warn!(error = %e, "Failed to list organizations for scheduled sync");
                return;
            }
        };

        debug!(count = organizations.len(), "Scheduled sync pass");

        for organization_id in organizations {
            let service = Arc::clone(&self.service);
            match service.start(organization_id, self.config.mode, false).await {
                Ok(run_id) => {
                    debug!(
                        organization_id = %organization_id,
                        run_id = %run_id,
                        "Scheduled sync started"
                    );
                }
                Err(SyncError::AlreadyRunning { .. }) => {
                    debug!(
                        organization_id = %organization_id,
                        "Skipping scheduled sync, run already in progress"
                    );
                }
                Err(e) => {
                    warn!(
                        organization_id = %organization_id,
                        error = %e,
                        "Failed to start scheduled sync"
                    );
                }
            }
        }
    }

    async fn sweep(&self) {
        if let Err(e) = self
            .service
            .cleanup(self.config.stale_threshold_minutes)
            .await
        {
            warn!(error = %e, "Stale-run sweep failed");
        }
    }
}
