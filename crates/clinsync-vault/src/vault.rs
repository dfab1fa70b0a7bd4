//! Credential vault: lookup, envelope detection, decryption, caching.

use sqlx::PgPool;
use tracing::{debug, warn};
use uuid::Uuid;

use clinsync_core::ApiCredentials;

use crate::cache::CredentialCache;
use crate::crypto::CredentialCipher;
use crate::envelope::CredentialEnvelope;
use crate::error::{CredentialError, CredentialResult};

/// Default TTL for cached decrypted credentials, in seconds.
const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Retrieves and decrypts per-tenant remote-API credentials.
///
/// Credential rows are provisioned by an external flow; this vault is
/// read-mostly. Exactly one active row exists per (organization, service).
#[derive(Debug)]
pub struct CredentialVault {
    pool: PgPool,
    cipher: CredentialCipher,
    cache: CredentialCache,
}

impl CredentialVault {
    /// Create a vault with the default cache TTL.
    #[must_use]
    pub fn new(pool: PgPool, cipher: CredentialCipher) -> Self {
        Self::with_cache_ttl(pool, cipher, DEFAULT_CACHE_TTL_SECS)
    }

    /// Create a vault with a custom cache TTL in seconds.
    #[must_use]
    pub fn with_cache_ttl(pool: PgPool, cipher: CredentialCipher, ttl_seconds: u64) -> Self {
        Self {
            pool,
            cipher,
            cache: CredentialCache::new(ttl_seconds),
        }
    }

    /// Fetch and decrypt the active credentials for an organization/service.
    pub async fn get_credentials(
        &self,
        organization_id: Uuid,
        service: &str,
    ) -> CredentialResult<ApiCredentials> {
        if let Some(cached) = self.cache.get(organization_id, service).await {
            return Ok(cached);
        }

        let row: Option<(String,)> = sqlx::query_as(
            r"
            SELECT encrypted_data
            FROM sync_credentials
            WHERE organization_id = $1 AND service_name = $2 AND is_active
            ",
        )
        .bind(organization_id)
        .bind(service)
        .fetch_optional(&self.pool)
        .await?;

        let stored = row.ok_or_else(|| CredentialError::NotFound {
            organization_id,
            service: service.to_string(),
        })?;

        let envelope = CredentialEnvelope::parse(&stored.0)?;
        if envelope.is_legacy() {
            debug!(
                organization_id = %organization_id,
                service = %service,
                "Credential stored in legacy envelope shape"
            );
        }

        let payload = envelope.decode()?;
        let credentials: ApiCredentials = self.cipher.decrypt_json(&payload).inspect_err(|_| {
            warn!(
                organization_id = %organization_id,
                service = %service,
                "Credential decryption failed"
            );
        })?;

        self.cache
            .set(organization_id, service, credentials.clone())
            .await;

        Ok(credentials)
    }

    /// Encrypt and store credentials in the canonical versioned envelope.
    ///
    /// Upserts the active row for the (organization, service) pair. Used by
    /// provisioning flows and test setup.
    pub async fn store_credentials(
        &self,
        organization_id: Uuid,
        service: &str,
        credentials: &ApiCredentials,
    ) -> CredentialResult<()> {
        let payload = self.cipher.encrypt_json(credentials)?;
        let stored = CredentialEnvelope::versioned(&payload).to_stored()?;

        sqlx::query(
            r"
            INSERT INTO sync_credentials (organization_id, service_name, encrypted_data, is_active)
            VALUES ($1, $2, $3, TRUE)
            ON CONFLICT (organization_id, service_name) WHERE is_active
            DO UPDATE SET encrypted_data = EXCLUDED.encrypted_data, updated_at = NOW()
            ",
        )
        .bind(organization_id)
        .bind(service)
        .bind(&stored)
        .execute(&self.pool)
        .await?;

        self.cache.invalidate(organization_id, service).await;

        debug!(
            organization_id = %organization_id,
            service = %service,
            "Stored credentials in versioned envelope"
        );
        Ok(())
    }

    /// Organizations with an active credential for the given service.
    pub async fn organizations_with_credentials(
        &self,
        service: &str,
    ) -> CredentialResult<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r"
            SELECT DISTINCT organization_id
            FROM sync_credentials
            WHERE service_name = $1 AND is_active
            ORDER BY organization_id
            ",
        )
        .bind(service)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Cache statistics for health reporting.
    pub async fn cache_stats(&self) -> crate::cache::CacheStats {
        self.cache.stats().await
    }
}
