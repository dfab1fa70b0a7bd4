//! # clinsync-source
//!
//! HTTP client for the remote clinical-practice API.
//!
//! Fetches patients, appointments and appointment types as sequential
//! pages, with per-endpoint rate limiting, bounded retries with
//! exponential backoff, and `Retry-After` handling for 429 responses.
//! Authentication failures (401/403) fail immediately and are never
//! retried.

pub mod client;
pub mod config;
pub mod error;
pub mod rate_limit;
pub mod types;

pub use client::{Page, Pager, PracticeClient};
pub use config::{RetryConfig, SourceConfig};
pub use error::{SourceError, SourceResult};
pub use rate_limit::{parse_retry_after, RateLimitConfig, RateLimitStats, RateLimiter};
pub use types::{RemoteAppointment, RemoteAppointmentType, RemotePatient};
