//! Sync run lifecycle: the per-organization running lock, terminal
//! transitions, and the stale-run sweeper.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::store::is_unique_violation;

/// How much of the remote data set a run fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Every patient and the full appointment window. Absence from the
    /// fetched set deactivates the local row.
    Full,
    /// Only patients updated since the last successful run. Never
    /// deactivates anything.
    Incremental,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Incremental => write!(f, "incremental"),
        }
    }
}

impl FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Self::Full),
            "incremental" => Ok(Self::Incremental),
            other => Err(format!("unknown sync mode: {other}")),
        }
    }
}

/// Lifecycle state of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl SyncStatus {
    /// Terminal states accept no further transitions.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown sync status: {other}")),
        }
    }
}

/// Record counters written onto a run at completion (or accumulated up to
/// the point of failure).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub processed: i32,
    pub success: i32,
    pub failed: i32,
}

/// One reconciliation execution.
#[derive(Debug, Clone, Serialize)]
pub struct SyncRun {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub source_system: String,
    pub mode: SyncMode,
    pub status: SyncStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub records_processed: i32,
    pub records_success: i32,
    pub records_failed: i32,
    pub metadata: serde_json::Value,
    pub error_details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct SyncRunRow {
    id: Uuid,
    organization_id: Uuid,
    source_system: String,
    operation_type: String,
    status: String,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    records_processed: i32,
    records_success: i32,
    records_failed: i32,
    metadata: serde_json::Value,
    error_details: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl SyncRunRow {
    fn into_run(self) -> SyncRun {
        SyncRun {
            id: self.id,
            organization_id: self.organization_id,
            source_system: self.source_system,
            mode: self
                .operation_type
                .parse()
                .unwrap_or(SyncMode::Incremental),
            status: self.status.parse().unwrap_or(SyncStatus::Failed),
            started_at: self.started_at,
            completed_at: self.completed_at,
            records_processed: self.records_processed,
            records_success: self.records_success,
            records_failed: self.records_failed,
            metadata: self.metadata,
            error_details: self.error_details,
            created_at: self.created_at,
        }
    }
}

const RUN_COLUMNS: &str = "id, organization_id, source_system, operation_type, status, \
     started_at, completed_at, records_processed, records_success, \
     records_failed, metadata, error_details, created_at";

/// Store over the `sync_runs` table.
#[derive(Debug, Clone)]
pub struct SyncRunStore {
    pool: PgPool,
}

impl SyncRunStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a run in `running` state, unless one is already running for
    /// the organization.
    ///
    /// The conditional insert rejects most concurrent starts; two
    /// transactions racing past the `NOT EXISTS` check are still caught
    /// by the partial unique index, whose violation is mapped to
    /// `AlreadyRunning` here. Either way the loser never holds the lock.
    pub async fn start_run(
        &self,
        organization_id: Uuid,
        source_system: &str,
        mode: SyncMode,
    ) -> SyncResult<SyncRun> {
        let row = sqlx::query_as::<_, SyncRunRow>(&format!(
            r#"
            INSERT INTO sync_runs (organization_id, source_system, operation_type,
                                   status, started_at)
            SELECT $1, $2, $3, 'running', NOW()
            WHERE NOT EXISTS (
                SELECT 1 FROM sync_runs
                WHERE organization_id = $1 AND status = 'running'
            )
            RETURNING {RUN_COLUMNS}
            "#
        ))
        .bind(organization_id)
        .bind(source_system)
        .bind(mode.to_string())
        .fetch_optional(&self.pool)
        .await;

        match row {
            Ok(Some(row)) => Ok(row.into_run()),
            Ok(None) => Err(SyncError::AlreadyRunning { organization_id }),
            Err(e) if is_unique_violation(&e) => {
                Err(SyncError::AlreadyRunning { organization_id })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Mark a running run `completed` with its final counters.
    pub async fn complete_run(&self, run_id: Uuid, counts: RunCounts) -> SyncResult<SyncRun> {
        let row = sqlx::query_as::<_, SyncRunRow>(&format!(
            r#"
            UPDATE sync_runs SET
                status = 'completed',
                completed_at = NOW(),
                records_processed = $2,
                records_success = $3,
                records_failed = $4,
                updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            RETURNING {RUN_COLUMNS}
            "#
        ))
        .bind(run_id)
        .bind(counts.processed)
        .bind(counts.success)
        .bind(counts.failed)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.into_run()),
            None => Err(self.not_running(run_id).await),
        }
    }

    /// Mark a running run `failed`, recording the error taxonomy and the
    /// counters accumulated before the failure.
    pub async fn fail_run(
        &self,
        run_id: Uuid,
        counts: RunCounts,
        error_details: serde_json::Value,
    ) -> SyncResult<SyncRun> {
        let row = sqlx::query_as::<_, SyncRunRow>(&format!(
            r#"
            UPDATE sync_runs SET
                status = 'failed',
                completed_at = NOW(),
                records_processed = $2,
                records_success = $3,
                records_failed = $4,
                error_details = $5,
                updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            RETURNING {RUN_COLUMNS}
            "#
        ))
        .bind(run_id)
        .bind(counts.processed)
        .bind(counts.success)
        .bind(counts.failed)
        .bind(error_details)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.into_run()),
            None => Err(self.not_running(run_id).await),
        }
    }

    /// Merge progress metadata onto a running run. No-op if the run has
    /// already reached a terminal state (the sweeper may have claimed it).
    pub async fn update_progress(
        &self,
        run_id: Uuid,
        progress: serde_json::Value,
    ) -> SyncResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sync_runs SET
                metadata = metadata || jsonb_build_object('progress', $2::jsonb),
                updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(run_id)
        .bind(progress)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Fetch one run by id.
    pub async fn get(&self, run_id: Uuid) -> SyncResult<SyncRun> {
        let row = sqlx::query_as::<_, SyncRunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM sync_runs WHERE id = $1"
        ))
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.into_run()),
            None => Err(SyncError::RunNotFound { run_id }),
        }
    }

    /// Most recent runs for an organization, newest first.
    pub async fn history(
        &self,
        organization_id: Uuid,
        limit: i64,
    ) -> SyncResult<Vec<SyncRun>> {
        let rows = sqlx::query_as::<_, SyncRunRow>(&format!(
            r#"
            SELECT {RUN_COLUMNS} FROM sync_runs
            WHERE organization_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#
        ))
        .bind(organization_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(SyncRunRow::into_run).collect())
    }

    /// Start time of the last completed run, if any. Used as the
    /// incremental watermark for the next fetch.
    pub async fn last_successful_started_at(
        &self,
        organization_id: Uuid,
    ) -> SyncResult<Option<DateTime<Utc>>> {
        let row: Option<(Option<DateTime<Utc>>,)> = sqlx::query_as(
            r#"
            SELECT started_at FROM sync_runs
            WHERE organization_id = $1 AND status = 'completed'
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|(started_at,)| started_at))
    }

    /// Fail every run stuck in `running` longer than the threshold.
    ///
    /// A worker that crashed mid-run leaves its row in `running`, which
    /// would hold the organization's lock forever. The original elapsed
    /// time is preserved under `metadata.cleanup` before the row is
    /// failed.
    pub async fn sweep_stale(&self, threshold_minutes: i64) -> SyncResult<u64> {
        let cutoff = sweep_cutoff(Utc::now(), threshold_minutes);
        let result = sqlx::query(
            r#"
            UPDATE sync_runs SET
                status = 'failed',
                completed_at = NOW(),
                error_details = jsonb_build_object(
                    'error', 'stale, stuck in running'
                ),
                metadata = metadata || jsonb_build_object(
                    'cleanup', jsonb_build_object(
                        'original_elapsed_minutes',
                        FLOOR(EXTRACT(EPOCH FROM (NOW() - started_at)) / 60),
                        'cleaned_at', NOW()
                    )
                ),
                updated_at = NOW()
            WHERE status = 'running'
              AND started_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        let swept = result.rows_affected();
        if swept > 0 {
            tracing::warn!(swept, threshold_minutes, "Swept stale sync runs");
        }
        Ok(swept)
    }

    /// Forcibly fail a running run. Administrative escape hatch for a
    /// lock wedged by a dead worker before the sweeper threshold elapses.
    pub async fn force_clear(&self, run_id: Uuid) -> SyncResult<SyncRun> {
        let row = sqlx::query_as::<_, SyncRunRow>(&format!(
            r#"
            UPDATE sync_runs SET
                status = 'failed',
                completed_at = NOW(),
                error_details = jsonb_build_object(
                    'error', 'force cleared by administrator'
                ),
                updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            RETURNING {RUN_COLUMNS}
            "#
        ))
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.into_run()),
            None => Err(self.not_running(run_id).await),
        }
    }

    async fn not_running(&self, run_id: Uuid) -> SyncError {
        match self.get(run_id).await {
            Ok(run) => SyncError::InvalidState {
                run_id,
                expected: "running",
                actual: run.status.to_string(),
            },
            Err(e) => e,
        }
    }
}

/// Start-time cutoff for the stale sweep: a running run started strictly
/// before this is considered stuck.
fn sweep_cutoff(now: DateTime<Utc>, threshold_minutes: i64) -> DateTime<Utc> {
    now - chrono::Duration::minutes(threshold_minutes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_sweep_cutoff_threshold_math() {
        let now = Utc::now();
        let cutoff = sweep_cutoff(now, 30);

        let stuck = now - Duration::minutes(31);
        let healthy = now - Duration::minutes(29);
        let boundary = now - Duration::minutes(30);

        assert!(stuck < cutoff);
        assert!(healthy >= cutoff);
        // Exactly at the threshold is not yet stale.
        assert!(boundary >= cutoff);
    }

    #[test]
    fn test_mode_round_trips_through_strings() {
        assert_eq!("full".parse::<SyncMode>(), Ok(SyncMode::Full));
        assert_eq!(SyncMode::Incremental.to_string(), "incremental");
        assert!("weekly".parse::<SyncMode>().is_err());
    }

    #[test]
    fn test_status_terminality() {
        assert!(!SyncStatus::Pending.is_terminal());
        assert!(!SyncStatus::Running.is_terminal());
        assert!(SyncStatus::Completed.is_terminal());
        assert!(SyncStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_round_trips_through_strings() {
        for status in [
            SyncStatus::Pending,
            SyncStatus::Running,
            SyncStatus::Completed,
            SyncStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<SyncStatus>(), Ok(status));
        }
    }
}
