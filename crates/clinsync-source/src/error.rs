//! Remote API error types with transient/permanent classification.

use thiserror::Error;

/// Result type for source client operations.
pub type SourceResult<T> = Result<T, SourceError>;

/// Errors from the remote practice API.
#[derive(Debug, Error)]
pub enum SourceError {
    /// 401/403 from the remote API. Never retried.
    #[error("remote API rejected credentials (HTTP {status})")]
    Unauthorized { status: u16 },

    /// 429 persisted beyond the retry budget.
    #[error("remote API rate limit exceeded after {attempts} attempts")]
    RateLimited { attempts: u32 },

    /// Request timed out beyond the retry budget.
    #[error("remote API request timed out: {url}")]
    Timeout { url: String },

    /// 5xx persisted beyond the retry budget.
    #[error("remote API server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// Network-level failure beyond the retry budget.
    #[error("network error calling remote API: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Response body did not match the expected collection shape.
    #[error("invalid remote API response: {message}")]
    InvalidResponse { message: String },

    /// Client-side configuration problem (bad base URL, builder failure).
    #[error("invalid source configuration: {message}")]
    InvalidConfiguration { message: String },
}

impl SourceError {
    /// Whether a fresh attempt could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::Timeout { .. }
                | Self::ServerError { .. }
                | Self::Transport { .. }
        )
    }

    /// Stable taxonomy code, recorded in a failed run's `error_details`.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized { .. } => "RemoteAPIError.Unauthorized",
            Self::RateLimited { .. } => "RemoteAPIError.RateLimited",
            Self::Timeout { .. } => "RemoteAPIError.Timeout",
            Self::ServerError { .. } => "RemoteAPIError.ServerError",
            Self::Transport { .. } => "RemoteAPIError.Transport",
            Self::InvalidResponse { .. } => "RemoteAPIError.InvalidResponse",
            Self::InvalidConfiguration { .. } => "RemoteAPIError.InvalidConfiguration",
        }
    }

    pub(crate) fn transport(message: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(!SourceError::Unauthorized { status: 401 }.is_retryable());
        assert!(SourceError::RateLimited { attempts: 4 }.is_retryable());
        assert!(SourceError::Timeout {
            url: "https://api.example.com/patients".to_string()
        }
        .is_retryable());
        assert!(SourceError::ServerError {
            status: 503,
            message: "unavailable".to_string()
        }
        .is_retryable());
        assert!(!SourceError::InvalidResponse {
            message: "missing collection".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            SourceError::Unauthorized { status: 403 }.code(),
            "RemoteAPIError.Unauthorized"
        );
        assert_eq!(
            SourceError::RateLimited { attempts: 1 }.code(),
            "RemoteAPIError.RateLimited"
        );
    }
}
