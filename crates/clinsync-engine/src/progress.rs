//! Pollable run progress.
//!
//! Each phase of a run writes a step name and a monotonically
//! non-decreasing percentage into the run's metadata, so a poller
//! watching `sync_runs.metadata.progress` sees forward motion only.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::run::SyncRunStore;

/// Named phases a run moves through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStep {
    CheckingConfig,
    ValidatingCredentials,
    FetchingPatients,
    PatientsFetched,
    ProcessingPatients,
    StoringPatients,
    CheckingDeletions,
    DeletionsHandled,
    Completed,
}

impl ProgressStep {
    /// Human-readable label used in progress messages.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::CheckingConfig => "checking configuration",
            Self::ValidatingCredentials => "validating credentials",
            Self::FetchingPatients => "fetching patients",
            Self::PatientsFetched => "patients fetched",
            Self::ProcessingPatients => "processing patients",
            Self::StoringPatients => "storing patients",
            Self::CheckingDeletions => "checking deletions",
            Self::DeletionsHandled => "deletions handled",
            Self::Completed => "completed",
        }
    }
}

/// Optional per-step details merged into the progress payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patients_loaded: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_entries: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appointments_loaded: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deactivated: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The progress payload stored under `metadata.progress`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncProgress {
    pub step: ProgressStep,
    pub progress_percent: u8,
    #[serde(flatten)]
    pub detail: ProgressDetail,
}

/// Clamp a proposed percentage so reported progress never regresses.
///
/// A regression is a caller bug; debug builds assert, release builds
/// hold the previous value.
#[must_use]
pub fn advance_percent(last: u8, next: u8) -> u8 {
    debug_assert!(next >= last, "progress went backwards: {last} -> {next}");
    last.max(next).min(100)
}

/// Best-effort progress writer for one run.
///
/// Progress is observability, not state: a failed write is logged and
/// swallowed so it can never fail the run itself.
pub struct ProgressReporter {
    store: SyncRunStore,
    run_id: Uuid,
    last_percent: u8,
}

impl ProgressReporter {
    #[must_use]
    pub fn new(store: SyncRunStore, run_id: Uuid) -> Self {
        Self {
            store,
            run_id,
            last_percent: 0,
        }
    }

    /// Record a step with no extra detail.
    pub async fn step(&mut self, step: ProgressStep, percent: u8) {
        self.report(step, percent, ProgressDetail::default()).await;
    }

    /// Record a step with per-step detail.
    pub async fn report(&mut self, step: ProgressStep, percent: u8, detail: ProgressDetail) {
        let percent = advance_percent(self.last_percent, percent);
        self.last_percent = percent;

        let progress = SyncProgress {
            step,
            progress_percent: percent,
            detail,
        };

        let payload = match serde_json::to_value(&progress) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(run_id = %self.run_id, error = %e, "Failed to serialize progress");
                return;
            }
        };

        match self.store.update_progress(self.run_id, payload).await {
            Ok(true) => {
                tracing::debug!(
                    run_id = %self.run_id,
                    step = step.label(),
                    percent,
                    "Progress updated"
                );
            }
            Ok(false) => {
                tracing::debug!(
                    run_id = %self.run_id,
                    "Skipped progress update, run no longer running"
                );
            }
            Err(e) => {
                tracing::warn!(run_id = %self.run_id, error = %e, "Failed to write progress");
            }
        }
    }

    /// Last percentage reported, for interpolating within a phase.
    #[must_use]
    pub fn last_percent(&self) -> u8 {
        self.last_percent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_percent_moves_forward() {
        assert_eq!(advance_percent(10, 25), 25);
        assert_eq!(advance_percent(0, 100), 100);
    }

    #[test]
    fn test_advance_percent_caps_at_hundred() {
        assert_eq!(advance_percent(95, 120), 100);
    }

    #[test]
    #[should_panic(expected = "progress went backwards")]
    fn test_advance_percent_rejects_regression_in_debug() {
        let _ = advance_percent(50, 40);
    }

    #[test]
    fn test_progress_serializes_flat() {
        let progress = SyncProgress {
            step: ProgressStep::FetchingPatients,
            progress_percent: 22,
            detail: ProgressDetail {
                current_page: Some(3),
                patients_loaded: Some(300),
                total_entries: Some(1200),
                ..Default::default()
            },
        };

        let value = serde_json::to_value(&progress).unwrap();
        assert_eq!(value["step"], "fetching_patients");
        assert_eq!(value["progress_percent"], 22);
        assert_eq!(value["current_page"], 3);
        assert!(value.get("message").is_none());
    }
}
