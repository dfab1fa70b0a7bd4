//! Decrypted credential contract shared by the vault and API clients.

use serde::{Deserialize, Serialize};

/// Decrypted remote-API credentials for one tenant.
///
/// This is the plaintext form of a credential envelope after the vault has
/// decrypted it. It never appears in logs or debug output in full.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiCredentials {
    /// API key used to build the Basic-style authorization header.
    pub api_key: String,
    /// Base URL of the tenant's practice API instance.
    pub api_url: String,
    /// Region/shard identifier of the remote instance.
    pub region: String,
}

impl ApiCredentials {
    /// Create credentials from their parts.
    #[must_use]
    pub fn new(
        api_key: impl Into<String>,
        api_url: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            api_url: api_url.into(),
            region: region.into(),
        }
    }
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &"[REDACTED]")
            .field("api_url", &self.api_url)
            .field("region", &self.region)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_api_key() {
        let creds = ApiCredentials::new("key-12345", "https://api.example.com", "au1");
        let debug = format!("{creds:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("key-12345"));
        assert!(debug.contains("https://api.example.com"));
    }

    #[test]
    fn test_serde_roundtrip() {
        let creds = ApiCredentials::new("k", "https://api.example.com", "au1");
        let json = serde_json::to_string(&creds).unwrap();
        let back: ApiCredentials = serde_json::from_str(&json).unwrap();
        assert_eq!(creds, back);
    }
}
