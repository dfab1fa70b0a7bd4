//! Source client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::rate_limit::RateLimitConfig;

/// Configuration for the practice API client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Page size for collection fetches.
    #[serde(default = "default_per_page")]
    pub per_page: u32,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Read timeout in seconds.
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,

    /// Descriptive client identifier sent as the User-Agent header.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Retry behavior for transient failures.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Rate limiting behavior.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

fn default_per_page() -> u32 {
    100
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_read_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("clinsync/{} (sync engine)", env!("CARGO_PKG_VERSION"))
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            per_page: default_per_page(),
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            user_agent: default_user_agent(),
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl SourceConfig {
    /// Set the page size.
    #[must_use]
    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page.max(1);
        self
    }

    /// Set the retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the rate limit configuration.
    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }
}

/// Retry behavior with exponential backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum retry attempts after the initial request.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff delay in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Backoff ceiling in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Whether to add random jitter to backoff delays.
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_jitter() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    /// Create a config with a custom retry budget.
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Disable retries entirely.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Set the initial backoff in milliseconds.
    #[must_use]
    pub fn with_initial_backoff(mut self, ms: u64) -> Self {
        self.initial_backoff_ms = ms;
        self
    }

    /// Set the backoff ceiling in milliseconds.
    #[must_use]
    pub fn with_max_backoff(mut self, ms: u64) -> Self {
        self.max_backoff_ms = ms;
        self
    }

    /// Disable jitter (deterministic backoff, mostly for tests).
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Whether an HTTP status warrants a retry.
    #[must_use]
    pub fn should_retry(&self, status: u16) -> bool {
        status == 429 || status == 408 || (500..=599).contains(&status)
    }

    /// Backoff delay before the given attempt (1-based), doubling each
    /// attempt up to the ceiling, with optional jitter.
    #[must_use]
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let base = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_backoff_ms);

        let ms = if self.jitter && base > 0 {
            use rand::Rng;
            // Up to 25% random jitter on top of the base delay.
            let jitter = rand::thread_rng().gen_range(0..=base / 4);
            (base + jitter).min(self.max_backoff_ms)
        } else {
            base
        };

        Duration::from_millis(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SourceConfig::default();
        assert_eq!(config.per_page, 100);
        assert_eq!(config.retry.max_retries, 3);
        assert!(config.user_agent.starts_with("clinsync/"));
    }

    #[test]
    fn test_should_retry() {
        let retry = RetryConfig::default();
        assert!(retry.should_retry(429));
        assert!(retry.should_retry(500));
        assert!(retry.should_retry(503));
        assert!(retry.should_retry(408));
        assert!(!retry.should_retry(401));
        assert!(!retry.should_retry(403));
        assert!(!retry.should_retry(404));
        assert!(!retry.should_retry(200));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let retry = RetryConfig::new(5)
            .with_initial_backoff(100)
            .with_max_backoff(1000)
            .without_jitter();

        assert_eq!(retry.calculate_backoff(1), Duration::from_millis(100));
        assert_eq!(retry.calculate_backoff(2), Duration::from_millis(200));
        assert_eq!(retry.calculate_backoff(3), Duration::from_millis(400));
        assert_eq!(retry.calculate_backoff(5), Duration::from_millis(1000));
        assert_eq!(retry.calculate_backoff(30), Duration::from_millis(1000));
    }

    #[test]
    fn test_jittered_backoff_stays_bounded() {
        let retry = RetryConfig::new(3)
            .with_initial_backoff(100)
            .with_max_backoff(1000);

        for attempt in 1..=10 {
            let backoff = retry.calculate_backoff(attempt);
            assert!(backoff <= Duration::from_millis(1000));
        }
    }

    #[test]
    fn test_per_page_floor() {
        let config = SourceConfig::default().with_per_page(0);
        assert_eq!(config.per_page, 1);
    }
}
