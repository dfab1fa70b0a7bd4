//! # clinsync-engine
//!
//! Reconciliation engine for the clinsync practice sync.
//!
//! One sync run flows through these phases:
//!
//! ```text
//! SyncService::start ──► SyncRunStore (per-org running lock)
//!        │
//!        ▼
//! CredentialVault ──► PracticeClient (pages) ──► Normalizer
//!                                                    │
//!                                                    ▼
//!                  PatientStore::snapshot ──► reconcile (pure diff)
//!                                                    │
//!                                                    ▼
//!                     PatientStore::apply (one transaction)
//!                                                    │
//!                                                    ▼
//!                     SyncRunStore::complete_run / fail_run
//! ```
//!
//! A `ProgressReporter` writes step/percentage metadata onto the run after
//! each phase; the `SyncScheduler` triggers periodic runs and sweeps runs
//! stuck in `running`.

pub mod config;
pub mod error;
pub mod model;
pub mod normalize;
pub mod progress;
pub mod reconcile;
pub mod run;
pub mod scheduler;
pub mod service;
pub mod store;

pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use model::{ActivityStatus, CanonicalPatient};
pub use normalize::{normalize_phone, NormalizeError, Normalizer};
pub use progress::{ProgressDetail, ProgressReporter, ProgressStep, SyncProgress};
pub use reconcile::{reconcile, ReconcilePlan};
pub use run::{RunCounts, SyncMode, SyncRun, SyncRunStore, SyncStatus};
pub use scheduler::{SchedulerConfig, SyncScheduler};
pub use service::SyncService;
pub use store::{ApplyCounts, PatientStore, PersistError};

use sqlx::PgPool;

/// Run all pending database migrations.
///
/// Migrations are embedded at compile time from the `migrations/`
/// directory and applied in filename order.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Migrations complete");
    Ok(())
}
