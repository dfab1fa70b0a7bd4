//! In-memory TTL cache for decrypted credentials.
//!
//! An explicit map with per-entry expiry and a sweep operation, keyed by
//! (organization, service).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use clinsync_core::ApiCredentials;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Cache key: organization plus service name.
type CacheKey = (Uuid, String);

/// A cached credential with its expiry time.
#[derive(Debug, Clone)]
struct CachedCredentials {
    credentials: ApiCredentials,
    expires_at: DateTime<Utc>,
}

/// Cache statistics for health reporting.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Total number of cached entries.
    pub total_count: usize,
    /// Number of expired entries still awaiting a sweep.
    pub expired_count: usize,
}

/// TTL cache for decrypted credentials.
#[derive(Debug)]
pub struct CredentialCache {
    entries: RwLock<HashMap<CacheKey, CachedCredentials>>,
    ttl_seconds: u64,
}

impl CredentialCache {
    /// Create a cache with the given TTL in seconds.
    #[must_use]
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl_seconds,
        }
    }

    /// Get cached credentials if present and not expired.
    pub async fn get(&self, organization_id: Uuid, service: &str) -> Option<ApiCredentials> {
        let entries = self.entries.read().await;
        entries
            .get(&(organization_id, service.to_string()))
            .and_then(|cached| {
                if Utc::now() < cached.expires_at {
                    Some(cached.credentials.clone())
                } else {
                    None
                }
            })
    }

    /// Store credentials in the cache.
    pub async fn set(&self, organization_id: Uuid, service: &str, credentials: ApiCredentials) {
        let expires_at = Utc::now() + chrono::Duration::seconds(self.ttl_seconds as i64);
        let mut entries = self.entries.write().await;
        entries.insert(
            (organization_id, service.to_string()),
            CachedCredentials {
                credentials,
                expires_at,
            },
        );
    }

    /// Drop a cache entry.
    pub async fn invalidate(&self, organization_id: Uuid, service: &str) {
        let mut entries = self.entries.write().await;
        entries.remove(&(organization_id, service.to_string()));
    }

    /// Remove all expired entries.
    pub async fn clear_expired(&self) {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, cached| cached.expires_at > now);
    }

    /// Snapshot cache statistics.
    pub async fn stats(&self) -> CacheStats {
        let now = Utc::now();
        let entries = self.entries.read().await;
        CacheStats {
            total_count: entries.len(),
            expired_count: entries.values().filter(|c| c.expires_at <= now).count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> ApiCredentials {
        ApiCredentials::new("key", "https://api.example.com", "au1")
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let cache = CredentialCache::new(300);
        let org = Uuid::new_v4();

        cache.set(org, "practice_api", creds()).await;
        let hit = cache.get(org, "practice_api").await;
        assert_eq!(hit, Some(creds()));

        // Different service misses.
        assert!(cache.get(org, "messaging").await.is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_misses_and_is_swept() {
        let cache = CredentialCache::new(0);
        let org = Uuid::new_v4();

        cache.set(org, "practice_api", creds()).await;
        assert!(cache.get(org, "practice_api").await.is_none());

        let stats = cache.stats().await;
        assert_eq!(stats.total_count, 1);
        assert_eq!(stats.expired_count, 1);

        cache.clear_expired().await;
        assert_eq!(cache.stats().await.total_count, 0);
    }

    #[tokio::test]
    async fn test_invalidate() {
        let cache = CredentialCache::new(300);
        let org = Uuid::new_v4();

        cache.set(org, "practice_api", creds()).await;
        cache.invalidate(org, "practice_api").await;
        assert!(cache.get(org, "practice_api").await.is_none());
    }
}
