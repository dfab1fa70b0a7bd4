//! Sync engine configuration.

use serde::{Deserialize, Serialize};

/// Configuration for normalization and run-failure thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Trailing window, in days, for "recent" appointment counts.
    #[serde(default = "default_recent_window_days")]
    pub recent_window_days: i64,

    /// Forward window, in days, for "upcoming" appointment counts.
    #[serde(default = "default_upcoming_window_days")]
    pub upcoming_window_days: i64,

    /// Country calling code used for phone normalization.
    #[serde(default = "default_country_code")]
    pub country_code: String,

    /// Trunk prefix replaced by the country code in local numbers.
    #[serde(default = "default_trunk_prefix")]
    pub trunk_prefix: String,

    /// Fraction of records that may fail normalization before the whole
    /// run is failed.
    #[serde(default = "default_max_failure_ratio")]
    pub max_failure_ratio: f64,
}

fn default_recent_window_days() -> i64 {
    90
}

fn default_upcoming_window_days() -> i64 {
    90
}

fn default_country_code() -> String {
    "61".to_string()
}

fn default_trunk_prefix() -> String {
    "0".to_string()
}

fn default_max_failure_ratio() -> f64 {
    0.5
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            recent_window_days: default_recent_window_days(),
            upcoming_window_days: default_upcoming_window_days(),
            country_code: default_country_code(),
            trunk_prefix: default_trunk_prefix(),
            max_failure_ratio: default_max_failure_ratio(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.recent_window_days, 90);
        assert_eq!(config.upcoming_window_days, 90);
        assert_eq!(config.country_code, "61");
        assert_eq!(config.trunk_prefix, "0");
        assert!((config.max_failure_ratio - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: SyncConfig = serde_json::from_str(r#"{"country_code": "64"}"#).unwrap();
        assert_eq!(config.country_code, "64");
        assert_eq!(config.recent_window_days, 90);
    }
}
