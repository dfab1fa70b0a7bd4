//! Credential envelope shapes.
//!
//! Historically credentials were stored either as a raw base64 ciphertext
//! string or as a JSON wrapper `{"encrypted_data": "<base64>"}`. New
//! writes use the canonical versioned form `{"version": 1, "ciphertext":
//! "<base64>"}`. Reads detect the shape by structural inspection only;
//! the legacy shapes are accepted during the migration window.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::error::{CredentialError, CredentialResult};

/// Current envelope version written by [`CredentialEnvelope::versioned`].
pub const ENVELOPE_VERSION: u32 = 1;

/// A parsed credential envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialEnvelope {
    /// Canonical tagged form: `{"version": N, "ciphertext": "<base64>"}`.
    Versioned { version: u32, ciphertext: String },
    /// Legacy JSON wrapper: `{"encrypted_data": "<base64>"}`.
    LegacyWrapped { encrypted_data: String },
    /// Legacy raw base64 ciphertext string.
    LegacyRaw(String),
}

#[derive(Serialize, Deserialize)]
struct VersionedForm {
    version: u32,
    ciphertext: String,
}

#[derive(Deserialize)]
struct WrappedForm {
    encrypted_data: String,
}

impl CredentialEnvelope {
    /// Parse a stored envelope, detecting its shape structurally.
    pub fn parse(stored: &str) -> CredentialResult<Self> {
        let trimmed = stored.trim();
        if trimmed.is_empty() {
            return Err(CredentialError::MalformedEnvelope {
                message: "empty envelope".to_string(),
            });
        }

        if trimmed.starts_with('{') {
            if let Ok(v) = serde_json::from_str::<VersionedForm>(trimmed) {
                return Ok(Self::Versioned {
                    version: v.version,
                    ciphertext: v.ciphertext,
                });
            }
            if let Ok(w) = serde_json::from_str::<WrappedForm>(trimmed) {
                return Ok(Self::LegacyWrapped {
                    encrypted_data: w.encrypted_data,
                });
            }
            return Err(CredentialError::MalformedEnvelope {
                message: "JSON envelope has neither 'ciphertext' nor 'encrypted_data'".to_string(),
            });
        }

        Ok(Self::LegacyRaw(trimmed.to_string()))
    }

    /// Build the canonical versioned envelope for an encrypted payload.
    #[must_use]
    pub fn versioned(payload: &[u8]) -> Self {
        Self::Versioned {
            version: ENVELOPE_VERSION,
            ciphertext: STANDARD.encode(payload),
        }
    }

    /// Decode the base64 ciphertext this envelope carries.
    pub fn decode(&self) -> CredentialResult<Vec<u8>> {
        let b64 = match self {
            Self::Versioned { ciphertext, .. } => ciphertext,
            Self::LegacyWrapped { encrypted_data } => encrypted_data,
            Self::LegacyRaw(raw) => raw,
        };
        STANDARD
            .decode(b64)
            .map_err(|e| CredentialError::MalformedEnvelope {
                message: format!("ciphertext is not valid base64: {e}"),
            })
    }

    /// Render the envelope to its stored text form.
    ///
    /// Legacy shapes round-trip unchanged; only the versioned shape is
    /// produced for new writes.
    pub fn to_stored(&self) -> CredentialResult<String> {
        match self {
            Self::Versioned { version, ciphertext } => {
                serde_json::to_string(&VersionedForm {
                    version: *version,
                    ciphertext: ciphertext.clone(),
                })
                .map_err(|e| CredentialError::EncryptFailed {
                    message: format!("failed to serialize envelope: {e}"),
                })
            }
            Self::LegacyWrapped { encrypted_data } => {
                serde_json::to_string(&serde_json::json!({
                    "encrypted_data": encrypted_data,
                }))
                .map_err(|e| CredentialError::EncryptFailed {
                    message: format!("failed to serialize envelope: {e}"),
                })
            }
            Self::LegacyRaw(raw) => Ok(raw.clone()),
        }
    }

    /// Whether this envelope is one of the legacy shapes.
    #[must_use]
    pub fn is_legacy(&self) -> bool {
        !matches!(self, Self::Versioned { .. })
    }
}
