//! Sync engine error types.
//!
//! The taxonomy code of the error that fails a run is written into the
//! run's `error_details`, so pollers can distinguish failure classes
//! without parsing messages.

use thiserror::Error;
use uuid::Uuid;

use clinsync_source::SourceError;
use clinsync_vault::CredentialError;

use crate::store::PersistError;

/// Result type for sync engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can fail a sync run or reject a control-surface call.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Credential vault failure. Fatal, never retried.
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// Remote API failure that survived the client's retry budget.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Persistence failure after the batch retry.
    #[error(transparent)]
    Persist(#[from] PersistError),

    /// A sync run is already running for the organization.
    #[error("a sync run is already in progress for organization {organization_id}")]
    AlreadyRunning { organization_id: Uuid },

    /// Run id does not exist.
    #[error("sync run not found: {run_id}")]
    RunNotFound { run_id: Uuid },

    /// Run is not in the state the operation requires.
    #[error("sync run {run_id} is not {expected} (current: {actual})")]
    InvalidState {
        run_id: Uuid,
        expected: &'static str,
        actual: String,
    },

    /// Too many records failed normalization.
    #[error("normalization failures exceeded threshold: {failed} of {processed} records")]
    NormalizationThreshold { failed: i32, processed: i32 },

    /// Database error outside the persister's apply path.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Metadata serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Stable taxonomy code recorded in `error_details.error`.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Credential(e) => e.code(),
            Self::Source(e) => e.code(),
            Self::Persist(e) => e.code(),
            Self::AlreadyRunning { .. } => "ConcurrencyError.AlreadyRunning",
            Self::RunNotFound { .. } => "SyncError.RunNotFound",
            Self::InvalidState { .. } => "SyncError.InvalidState",
            Self::NormalizationThreshold { .. } => "NormalizationError.ThresholdExceeded",
            Self::Database(_) => "PersistenceError.Database",
            Self::Serialization(_) => "SyncError.Serialization",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_surface_leaf_taxonomy() {
        let err = SyncError::Credential(CredentialError::NotFound {
            organization_id: Uuid::nil(),
            service: "practice_api".to_string(),
        });
        assert_eq!(err.code(), "CredentialError.NotFound");

        let err = SyncError::Source(SourceError::Unauthorized { status: 401 });
        assert_eq!(err.code(), "RemoteAPIError.Unauthorized");

        let err = SyncError::AlreadyRunning {
            organization_id: Uuid::nil(),
        };
        assert_eq!(err.code(), "ConcurrencyError.AlreadyRunning");
    }
}
