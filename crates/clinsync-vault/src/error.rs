//! Credential vault error types.

use thiserror::Error;
use uuid::Uuid;

/// Result type for vault operations.
pub type CredentialResult<T> = Result<T, CredentialError>;

/// Errors that can occur while retrieving or decrypting credentials.
///
/// All variants are fatal to a sync run; none are retried.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// No active credential row exists for the organization/service pair.
    #[error("no active credential for organization {organization_id}, service '{service}'")]
    NotFound {
        organization_id: Uuid,
        service: String,
    },

    /// The stored envelope matches none of the accepted shapes.
    #[error("malformed credential envelope: {message}")]
    MalformedEnvelope { message: String },

    /// Decryption or parsing of the decrypted plaintext failed.
    #[error("credential decryption failed: {message}")]
    DecryptFailed { message: String },

    /// Encryption failed while writing a credential.
    #[error("credential encryption failed: {message}")]
    EncryptFailed { message: String },

    /// Database error while reading the credential row.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl CredentialError {
    /// Stable taxonomy code, recorded in a failed run's `error_details`.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "CredentialError.NotFound",
            Self::MalformedEnvelope { .. } => "CredentialError.MalformedEnvelope",
            Self::DecryptFailed { .. } => "CredentialError.DecryptFailed",
            Self::EncryptFailed { .. } => "CredentialError.EncryptFailed",
            Self::Database(_) => "CredentialError.Database",
        }
    }
}
