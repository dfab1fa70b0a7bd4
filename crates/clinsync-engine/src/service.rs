//! Sync run orchestration.
//!
//! `SyncService` is the single entry point for starting, watching, and
//! clearing sync runs. `start` acquires the per-organization lock,
//! spawns the run in the background, and returns the run row
//! immediately; callers poll progress through `get_run`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use clinsync_core::{PRACTICE_SERVICE, SOURCE_SYSTEM};
use clinsync_source::{PracticeClient, SourceConfig};
use clinsync_vault::CredentialVault;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::model::CanonicalPatient;
use crate::progress::{ProgressDetail, ProgressReporter, ProgressStep};
use crate::reconcile::reconcile;
use crate::run::{RunCounts, SyncMode, SyncRun, SyncRunStore, SyncStatus};
use crate::store::{ApplyCounts, PatientStore};

/// Orchestrates sync runs for all organizations.
pub struct SyncService {
    vault: Arc<CredentialVault>,
    runs: SyncRunStore,
    patients: PatientStore,
    sync_config: SyncConfig,
    source_config: SourceConfig,
}

impl SyncService {
    #[must_use]
    pub fn new(pool: PgPool, vault: Arc<CredentialVault>) -> Self {
        Self {
            vault,
            runs: SyncRunStore::new(pool.clone()),
            patients: PatientStore::new(pool),
            sync_config: SyncConfig::default(),
            source_config: SourceConfig::default(),
        }
    }

    #[must_use]
    pub fn with_sync_config(mut self, config: SyncConfig) -> Self {
        self.sync_config = config;
        self
    }

    #[must_use]
    pub fn with_source_config(mut self, config: SourceConfig) -> Self {
        self.source_config = config;
        self
    }

    /// Start a sync run for an organization.
    ///
    /// Returns the new run's id immediately; the work itself continues on
    /// a background task. An incremental request is promoted to full when
    /// the organization has no completed run yet (there is no watermark
    /// to be incremental against), or when `force_full` is set.
    pub async fn start(
        self: Arc<Self>,
        organization_id: Uuid,
        requested: SyncMode,
        force_full: bool,
    ) -> SyncResult<Uuid> {
        let watermark = self.runs.last_successful_started_at(organization_id).await?;

        let mode = if force_full || watermark.is_none() {
            SyncMode::Full
        } else {
            requested
        };

        let run = self
            .runs
            .start_run(organization_id, SOURCE_SYSTEM, mode)
            .await?;

        info!(
            organization_id = %organization_id,
            run_id = %run.id,
            mode = %mode,
            "Sync run started"
        );

        let service = Arc::clone(&self);
        let run_id = run.id;
        let cursor = match mode {
            SyncMode::Incremental => watermark,
            SyncMode::Full => None,
        };
        tokio::spawn(async move {
            service.run_sync(run_id, organization_id, mode, cursor).await;
        });

        Ok(run_id)
    }

    /// Current state of one run, or `None` if the id is unknown.
    pub async fn status(&self, run_id: Uuid) -> SyncResult<Option<SyncRun>> {
        match self.runs.get(run_id).await {
            Ok(run) => Ok(Some(run)),
            Err(SyncError::RunNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Recent runs for an organization, newest first.
    pub async fn history(&self, organization_id: Uuid, limit: i64) -> SyncResult<Vec<SyncRun>> {
        self.runs.history(organization_id, limit).await
    }

    /// Whether the organization currently has a running run.
    pub async fn is_running(&self, organization_id: Uuid) -> SyncResult<bool> {
        let recent = self.runs.history(organization_id, 1).await?;
        Ok(recent
            .first()
            .is_some_and(|run| run.status == SyncStatus::Running))
    }

    /// Forcibly fail a running run.
    pub async fn force_clear(&self, run_id: Uuid) -> SyncResult<SyncRun> {
        self.runs.force_clear(run_id).await
    }

    /// Fail runs stuck in `running` longer than the threshold.
    pub async fn cleanup(&self, stale_threshold_minutes: i64) -> SyncResult<u64> {
        self.runs.sweep_stale(stale_threshold_minutes).await
    }

    /// Organizations with active practice-API credentials.
    pub async fn organizations(&self) -> SyncResult<Vec<Uuid>> {
        Ok(self
            .vault
            .organizations_with_credentials(PRACTICE_SERVICE)
            .await?)
    }

    async fn run_sync(
        &self,
        run_id: Uuid,
        organization_id: Uuid,
        mode: SyncMode,
        cursor: Option<DateTime<Utc>>,
    ) {
        let mut reporter = ProgressReporter::new(self.runs.clone(), run_id);
        let mut counts = RunCounts::default();

        match self
            .execute(run_id, organization_id, mode, cursor, &mut reporter, &mut counts)
            .await
        {
            Ok(applied) => {
                info!(
                    organization_id = %organization_id,
                    run_id = %run_id,
                    processed = counts.processed,
                    created = applied.created,
                    updated = applied.updated,
                    deactivated = applied.deactivated,
                    "Sync run completed"
                );
                if let Err(e) = self.runs.complete_run(run_id, counts).await {
                    warn!(run_id = %run_id, error = %e, "Failed to mark run completed");
                }
            }
            Err(e) => {
                warn!(
                    organization_id = %organization_id,
                    run_id = %run_id,
                    error = %e,
                    code = e.code(),
                    "Sync run failed"
                );
                let details = failure_details(&e);
                if let Err(e) = self.runs.fail_run(run_id, counts, details).await {
                    warn!(run_id = %run_id, error = %e, "Failed to mark run failed");
                }
            }
        }
    }

    async fn execute(
        &self,
        run_id: Uuid,
        organization_id: Uuid,
        mode: SyncMode,
        cursor: Option<DateTime<Utc>>,
        reporter: &mut ProgressReporter,
        counts: &mut RunCounts,
    ) -> SyncResult<ApplyCounts> {
        let now = Utc::now();

        reporter.step(ProgressStep::CheckingConfig, 1).await;

        reporter.step(ProgressStep::ValidatingCredentials, 5).await;
        let credentials = self
            .vault
            .get_credentials(organization_id, PRACTICE_SERVICE)
            .await?;
        let client = PracticeClient::new(credentials, self.source_config.clone())?;

        // Appointment types and appointments come first so every patient
        // page can later be normalized in one pass. The full history is
        // fetched; the recent/upcoming windows narrow the counts during
        // normalization only, so total counts, last-appointment fields,
        // and the dormant status still see appointments older than the
        // recent window.
        let types: HashMap<String, String> = client
            .fetch_appointment_types()
            .await?
            .into_iter()
            .filter_map(|t| Some((t.id?, t.name?)))
            .collect();
        let window_to = now + Duration::days(self.sync_config.upcoming_window_days);
        let appointments = client.fetch_appointments(None, window_to).await?;

        // Patients: 10% to 40%, scaled by the remote total when known.
        reporter
            .report(
                ProgressStep::FetchingPatients,
                10,
                ProgressDetail {
                    appointments_loaded: Some(appointments.len()),
                    ..Default::default()
                },
            )
            .await;
        let mut remote_patients = Vec::new();
        let mut pager = client.patients(cursor);
        while let Some(page) = pager.next_page().await? {
            let percent = match page.total_entries {
                Some(total) if total > 0 => {
                    10 + ((30 * page.fetched.min(total)) / total) as u8
                }
                _ => reporter.last_percent().min(39),
            };
            reporter
                .report(
                    ProgressStep::FetchingPatients,
                    percent,
                    ProgressDetail {
                        current_page: Some(page.page),
                        total_entries: page.total_entries,
                        patients_loaded: Some(remote_patients.len() + page.items.len()),
                        ..Default::default()
                    },
                )
                .await;
            remote_patients.extend(page.items);
        }
        reporter
            .report(
                ProgressStep::PatientsFetched,
                45,
                ProgressDetail {
                    patients_loaded: Some(remote_patients.len()),
                    ..Default::default()
                },
            )
            .await;

        reporter.step(ProgressStep::ProcessingPatients, 50).await;
        let normalized = self.normalize_all(
            organization_id,
            &remote_patients,
            &appointments,
            types,
            now,
            counts,
        )?;

        reporter.step(ProgressStep::StoringPatients, 70).await;
        let snapshot = self.patients.snapshot(organization_id).await?;
        let plan = reconcile(normalized, &snapshot, mode);
        info!(
            organization_id = %organization_id,
            run_id = %run_id,
            create = plan.to_create.len(),
            update = plan.to_update.len(),
            deactivate = plan.to_deactivate.len(),
            "Reconciliation plan computed"
        );

        reporter
            .report(
                ProgressStep::CheckingDeletions,
                85,
                ProgressDetail {
                    deactivated: Some(plan.to_deactivate.len() as i32),
                    ..Default::default()
                },
            )
            .await;
        let applied = self.patients.apply(organization_id, &plan).await?;
        reporter
            .report(
                ProgressStep::DeletionsHandled,
                95,
                ProgressDetail {
                    deactivated: Some(applied.deactivated),
                    ..Default::default()
                },
            )
            .await;

        reporter
            .report(
                ProgressStep::Completed,
                100,
                ProgressDetail {
                    deactivated: Some(applied.deactivated),
                    message: Some(format!(
                        "created {}, updated {}, deactivated {}",
                        applied.created, applied.updated, applied.deactivated
                    )),
                    ..Default::default()
                },
            )
            .await;

        Ok(applied)
    }

    fn normalize_all(
        &self,
        organization_id: Uuid,
        remote_patients: &[clinsync_source::RemotePatient],
        appointments: &[clinsync_source::RemoteAppointment],
        types: HashMap<String, String>,
        now: DateTime<Utc>,
        counts: &mut RunCounts,
    ) -> SyncResult<Vec<CanonicalPatient>> {
        let normalizer = crate::normalize::Normalizer::new(&self.sync_config, types, now);

        let mut by_patient: HashMap<&str, Vec<&clinsync_source::RemoteAppointment>> =
            HashMap::new();
        for appt in appointments {
            if let Some(patient_id) = appt.patient_id.as_deref() {
                by_patient.entry(patient_id).or_default().push(appt);
            }
        }
        let empty: Vec<&clinsync_source::RemoteAppointment> = Vec::new();

        let mut normalized = Vec::with_capacity(remote_patients.len());
        for patient in remote_patients {
            counts.processed += 1;
            let related = patient
                .id
                .as_deref()
                .and_then(|id| by_patient.get(id))
                .unwrap_or(&empty);
            match normalizer.normalize(organization_id, patient, related) {
                Ok(canonical) => {
                    counts.success += 1;
                    normalized.push(canonical);
                }
                Err(e) => {
                    counts.failed += 1;
                    warn!(
                        organization_id = %organization_id,
                        error = %e,
                        "Skipping patient that failed normalization"
                    );
                }
            }
        }

        // A bad page or a schema drift upstream can poison the whole
        // fetch. Failing the run beats deactivating half the tenant.
        if counts.processed > 0 {
            let ratio = f64::from(counts.failed) / f64::from(counts.processed);
            if ratio > self.sync_config.max_failure_ratio {
                return Err(SyncError::NormalizationThreshold {
                    failed: counts.failed,
                    processed: counts.processed,
                });
            }
        }

        Ok(normalized)
    }
}

impl std::fmt::Debug for SyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncService")
            .field("sync_config", &self.sync_config)
            .finish_non_exhaustive()
    }
}

/// The `error_details` payload written onto a failed run.
fn failure_details(e: &SyncError) -> serde_json::Value {
    serde_json::json!({
        "error": e.code(),
        "message": e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinsync_vault::CredentialError;

    #[test]
    fn test_missing_credentials_fail_with_taxonomy_code() {
        let organization_id = Uuid::new_v4();
        let err = SyncError::Credential(CredentialError::NotFound {
            organization_id,
            service: PRACTICE_SERVICE.to_string(),
        });

        let details = failure_details(&err);
        assert_eq!(details["error"], "CredentialError.NotFound");
        assert!(details["message"]
            .as_str()
            .is_some_and(|m| m.contains(&organization_id.to_string())));

        // Credentials are resolved before any fetch, so the counters a
        // credential failure is recorded with are still zero.
        let counts = RunCounts::default();
        assert_eq!(counts.processed, 0);
        assert_eq!(counts.failed, 0);
    }

    #[test]
    fn test_persist_failure_details_surface_apply_code() {
        let err = SyncError::Persist(crate::store::PersistError::ApplyFailed {
            message: "duplicate key value".to_string(),
        });
        assert_eq!(failure_details(&err)["error"], "PersistenceError.ApplyFailed");
    }
}
