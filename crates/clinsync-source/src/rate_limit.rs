//! Sliding-window rate limiting for remote API requests.
//!
//! Per-endpoint request timestamps are kept in an explicit map of windows;
//! expired timestamps are swept on every acquire. A semaphore bounds
//! concurrent in-flight requests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::trace;

/// Width of the sliding window.
const WINDOW: Duration = Duration::from_secs(1);

/// Configuration for rate limiting behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Maximum requests per second.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    /// Maximum concurrent in-flight requests.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,
}

fn default_enabled() -> bool {
    true
}

fn default_requests_per_second() -> u32 {
    10
}

fn default_max_concurrent() -> u32 {
    5
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            requests_per_second: default_requests_per_second(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl RateLimitConfig {
    /// Create a config with a custom requests-per-second limit.
    #[must_use]
    pub fn new(requests_per_second: u32) -> Self {
        Self {
            requests_per_second,
            ..Default::default()
        }
    }

    /// Disable rate limiting.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Set the concurrency bound.
    #[must_use]
    pub fn with_max_concurrent(mut self, max: u32) -> Self {
        self.max_concurrent = max.max(1);
        self
    }
}

/// Rate limiter statistics.
#[derive(Debug, Clone)]
pub struct RateLimitStats {
    /// Total requests admitted since creation.
    pub total_admitted: u64,
    /// Total time spent waiting for a slot.
    pub total_wait: Duration,
    /// Endpoints currently tracked.
    pub tracked_endpoints: usize,
}

/// Guard representing an admitted request. Holds the concurrency permit
/// for the duration of the request.
#[derive(Debug)]
pub struct RateLimitGuard {
    _permit: Option<OwnedSemaphorePermit>,
}

/// Sliding-window rate limiter with a per-endpoint window map.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
    semaphore: Arc<Semaphore>,
    admitted: Mutex<(u64, Duration)>,
}

impl RateLimiter {
    /// Create a limiter from configuration.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        let permits = config.max_concurrent.max(1) as usize;
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
            semaphore: Arc::new(Semaphore::new(permits)),
            admitted: Mutex::new((0, Duration::ZERO)),
        }
    }

    /// Wait until a request to `endpoint` is allowed, returning a guard
    /// that must be held while the request is in flight.
    pub async fn acquire(&self, endpoint: &str) -> RateLimitGuard {
        if !self.config.enabled {
            return RateLimitGuard { _permit: None };
        }

        let started = Instant::now();
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("rate limiter semaphore is never closed");

        loop {
            let wait = {
                let mut windows = self.windows.lock().await;
                let window = windows.entry(endpoint.to_string()).or_default();
                let now = Instant::now();
                Self::sweep(window, now);

                if (window.len() as u32) < self.config.requests_per_second {
                    window.push_back(now);
                    None
                } else {
                    // Oldest entry decides when a slot frees up.
                    window
                        .front()
                        .map(|oldest| WINDOW.saturating_sub(now.duration_since(*oldest)))
                }
            };

            match wait {
                None => break,
                Some(wait) => {
                    trace!(endpoint = %endpoint, wait_ms = wait.as_millis() as u64, "Rate limit window full, waiting");
                    tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
                }
            }
        }

        let mut admitted = self.admitted.lock().await;
        admitted.0 += 1;
        admitted.1 += started.elapsed();

        RateLimitGuard {
            _permit: Some(permit),
        }
    }

    /// Drop window entries older than the sliding window.
    fn sweep(window: &mut VecDeque<Instant>, now: Instant) {
        while let Some(front) = window.front() {
            if now.duration_since(*front) >= WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Snapshot limiter statistics.
    pub async fn stats(&self) -> RateLimitStats {
        let admitted = self.admitted.lock().await;
        let windows = self.windows.lock().await;
        RateLimitStats {
            total_admitted: admitted.0,
            total_wait: admitted.1,
            tracked_endpoints: windows.len(),
        }
    }
}

/// Parse a `Retry-After` header value: either delay seconds or an
/// HTTP-date.
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let trimmed = value.trim();

    if let Ok(secs) = trimmed.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let date = chrono::DateTime::parse_from_rfc2822(trimmed).ok()?;
    let delta = date.with_timezone(&Utc) - Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after(" 5 "), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let future = Utc::now() + chrono::Duration::seconds(60);
        let header = future.to_rfc2822();
        let parsed = parse_retry_after(&header).unwrap();
        assert!(parsed <= Duration::from_secs(61));
        assert!(parsed >= Duration::from_secs(55));
    }

    #[test]
    fn test_parse_retry_after_past_date_is_zero() {
        let past = Utc::now() - chrono::Duration::seconds(60);
        assert_eq!(parse_retry_after(&past.to_rfc2822()), Some(Duration::ZERO));
    }

    #[test]
    fn test_parse_retry_after_garbage() {
        assert_eq!(parse_retry_after("soon"), None);
        assert_eq!(parse_retry_after(""), None);
    }

    #[tokio::test]
    async fn test_disabled_limiter_admits_immediately() {
        let limiter = RateLimiter::new(RateLimitConfig::disabled());
        let _guard = limiter.acquire("/patients").await;
        assert_eq!(limiter.stats().await.total_admitted, 0);
    }

    #[tokio::test]
    async fn test_limiter_tracks_endpoints_separately() {
        let limiter = RateLimiter::new(RateLimitConfig::new(100));
        let _a = limiter.acquire("/patients").await;
        let _b = limiter.acquire("/appointments").await;

        let stats = limiter.stats().await;
        assert_eq!(stats.total_admitted, 2);
        assert_eq!(stats.tracked_endpoints, 2);
    }

    #[tokio::test]
    async fn test_window_sweep_frees_slots() {
        let mut window: VecDeque<Instant> = VecDeque::new();
        let old = Instant::now() - Duration::from_secs(2);
        window.push_back(old);
        window.push_back(Instant::now());

        RateLimiter::sweep(&mut window, Instant::now());
        assert_eq!(window.len(), 1);
    }
}
