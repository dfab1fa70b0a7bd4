/// Configuration for the sync worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Database connection URL.
    pub database_url: String,

    /// Maximum database pool connections.
    pub max_connections: u32,

    /// Credential master key, hex or base64 encoded (32 bytes decoded).
    pub master_key: String,

    /// Seconds between scheduled sync passes.
    pub sync_interval_secs: u64,

    /// Seconds between stale-run sweeps.
    pub sweep_interval_secs: u64,

    /// Minutes a run may stay running before it is swept.
    pub stale_threshold_minutes: i64,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_reader(|key| std::env::var(key))
    }

    /// Load configuration from a custom variable reader.
    ///
    /// This allows tests to supply variables without mutating process-global
    /// environment state.
    pub fn from_reader<F>(reader: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let database_url =
            reader("DATABASE_URL").map_err(|_| ConfigError::MissingVar("DATABASE_URL".into()))?;

        let master_key = reader("CLINSYNC_MASTER_KEY")
            .map_err(|_| ConfigError::MissingVar("CLINSYNC_MASTER_KEY".into()))?;

        let max_connections = reader("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse::<u32>()
            .map_err(|e| {
                ConfigError::InvalidValue("DATABASE_MAX_CONNECTIONS".into(), e.to_string())
            })?;

        let sync_interval_secs = reader("CLINSYNC_SYNC_INTERVAL_SECS")
            .unwrap_or_else(|_| "3600".to_string())
            .parse::<u64>()
            .map_err(|e| {
                ConfigError::InvalidValue("CLINSYNC_SYNC_INTERVAL_SECS".into(), e.to_string())
            })?;

        let sweep_interval_secs = reader("CLINSYNC_SWEEP_INTERVAL_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse::<u64>()
            .map_err(|e| {
                ConfigError::InvalidValue("CLINSYNC_SWEEP_INTERVAL_SECS".into(), e.to_string())
            })?;

        let stale_threshold_minutes = reader("CLINSYNC_STALE_THRESHOLD_MINUTES")
            .unwrap_or_else(|_| "30".to_string())
            .parse::<i64>()
            .map_err(|e| {
                ConfigError::InvalidValue(
                    "CLINSYNC_STALE_THRESHOLD_MINUTES".into(),
                    e.to_string(),
                )
            })?;

        Ok(Self {
            database_url,
            max_connections,
            master_key,
            sync_interval_secs,
            sweep_interval_secs,
            stale_threshold_minutes,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars<'a>(
        pairs: &'a [(&'a str, &'a str)],
    ) -> impl Fn(&str) -> Result<String, std::env::VarError> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v).to_string())
                .ok_or(std::env::VarError::NotPresent)
        }
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = WorkerConfig::from_reader(vars(&[
            ("DATABASE_URL", "postgres://localhost/clinsync"),
            ("CLINSYNC_MASTER_KEY", "00".repeat(32).leak()),
        ]))
        .unwrap();

        assert_eq!(config.max_connections, 10);
        assert_eq!(config.sync_interval_secs, 3600);
        assert_eq!(config.sweep_interval_secs, 300);
        assert_eq!(config.stale_threshold_minutes, 30);
    }

    #[test]
    fn test_missing_database_url_fails() {
        let err = WorkerConfig::from_reader(vars(&[("CLINSYNC_MASTER_KEY", "abc")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(v) if v == "DATABASE_URL"));
    }

    #[test]
    fn test_invalid_interval_fails() {
        let err = WorkerConfig::from_reader(vars(&[
            ("DATABASE_URL", "postgres://localhost/clinsync"),
            ("CLINSYNC_MASTER_KEY", "abc"),
            ("CLINSYNC_SYNC_INTERVAL_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(v, _) if v == "CLINSYNC_SYNC_INTERVAL_SECS"));
    }
}
