//! Practice API client with sequential pagination and bounded retries.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{header, Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use clinsync_core::ApiCredentials;

use crate::config::SourceConfig;
use crate::error::{SourceError, SourceResult};
use crate::rate_limit::{parse_retry_after, RateLimitStats, RateLimiter};

/// One fetched page of a remote collection.
#[derive(Debug, Clone)]
pub struct Page<T> {
    /// Records on this page.
    pub items: Vec<T>,
    /// 1-based page number.
    pub page: u32,
    /// Total entries reported by the remote API, when present.
    pub total_entries: Option<u64>,
    /// Running count of records fetched so far, this page included.
    pub fetched: u64,
}

/// Client for one tenant's practice API instance.
pub struct PracticeClient {
    client: Client,
    credentials: ApiCredentials,
    config: SourceConfig,
    rate_limiter: Arc<RateLimiter>,
}

impl std::fmt::Debug for PracticeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PracticeClient")
            .field("api_url", &self.credentials.api_url)
            .field("region", &self.credentials.region)
            .field("per_page", &self.config.per_page)
            .finish()
    }
}

impl PracticeClient {
    /// Build a client from decrypted credentials and configuration.
    pub fn new(credentials: ApiCredentials, config: SourceConfig) -> SourceResult<Self> {
        if credentials.api_url.trim().is_empty() {
            return Err(SourceError::InvalidConfiguration {
                message: "credential api_url is empty".to_string(),
            });
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.read_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| SourceError::InvalidConfiguration {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));

        Ok(Self {
            client,
            credentials,
            config,
            rate_limiter,
        })
    }

    /// Page iterator over patients, optionally restricted to records
    /// updated after the given cursor (incremental mode).
    #[must_use]
    pub fn patients(&self, updated_after: Option<DateTime<Utc>>) -> Pager<'_, crate::types::RemotePatient> {
        let mut params = Vec::new();
        if let Some(cursor) = updated_after {
            params.push((
                "updated_after".to_string(),
                cursor.to_rfc3339_opts(SecondsFormat::Secs, true),
            ));
        }
        Pager::new(self, "patients", "patients", params)
    }

    /// Page iterator over appointments with `starts_at` up to `to`,
    /// optionally bounded below. Without `from` the whole history is
    /// fetched.
    #[must_use]
    pub fn appointments(
        &self,
        from: Option<DateTime<Utc>>,
        to: DateTime<Utc>,
    ) -> Pager<'_, crate::types::RemoteAppointment> {
        let mut params = vec![(
            "starts_at_lte".to_string(),
            to.to_rfc3339_opts(SecondsFormat::Secs, true),
        )];
        if let Some(from) = from {
            params.push((
                "starts_at_gte".to_string(),
                from.to_rfc3339_opts(SecondsFormat::Secs, true),
            ));
        }
        Pager::new(self, "appointments", "appointments", params)
    }

    /// Page iterator over appointment types.
    #[must_use]
    pub fn appointment_types(&self) -> Pager<'_, crate::types::RemoteAppointmentType> {
        Pager::new(self, "appointment_types", "appointment_types", Vec::new())
    }

    /// Fetch every appointment up to `to`, draining all pages.
    pub async fn fetch_appointments(
        &self,
        from: Option<DateTime<Utc>>,
        to: DateTime<Utc>,
    ) -> SourceResult<Vec<crate::types::RemoteAppointment>> {
        let mut pager = self.appointments(from, to);
        let mut all = Vec::new();
        while let Some(page) = pager.next_page().await? {
            all.extend(page.items);
        }
        Ok(all)
    }

    /// Fetch every appointment type, draining all pages.
    pub async fn fetch_appointment_types(
        &self,
    ) -> SourceResult<Vec<crate::types::RemoteAppointmentType>> {
        let mut pager = self.appointment_types();
        let mut all = Vec::new();
        while let Some(page) = pager.next_page().await? {
            all.extend(page.items);
        }
        Ok(all)
    }

    /// Rate limiter statistics.
    pub async fn rate_limit_stats(&self) -> RateLimitStats {
        self.rate_limiter.stats().await
    }

    fn auth_header(&self) -> String {
        // Basic-style header: API key as username, empty password.
        let encoded = STANDARD.encode(format!("{}:", self.credentials.api_key));
        format!("Basic {encoded}")
    }

    fn endpoint_url(&self, path: &str) -> String {
        format!("{}/{}", self.credentials.api_url.trim_end_matches('/'), path)
    }

    /// GET one page of a collection with rate limiting and bounded
    /// retries. 401/403 fail immediately; 429 honors `Retry-After`; 5xx
    /// and network timeouts back off exponentially.
    pub(crate) async fn get_page(
        &self,
        path: &str,
        params: &[(String, String)],
        page: u32,
    ) -> SourceResult<Value> {
        let url = self.endpoint_url(path);
        let retry = &self.config.retry;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let _guard = self.rate_limiter.acquire(path).await;

            let request = self
                .client
                .get(&url)
                .header(header::AUTHORIZATION, self.auth_header())
                .header(header::USER_AGENT, &self.config.user_agent)
                .header(header::ACCEPT, "application/json")
                .query(params)
                .query(&[("page", page), ("per_page", self.config.per_page)]);

            debug!(url = %url, page = page, attempt = attempt, "Fetching remote page");

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                        return Err(SourceError::Unauthorized {
                            status: status.as_u16(),
                        });
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        if attempt > retry.max_retries {
                            return Err(SourceError::RateLimited { attempts: attempt });
                        }
                        let wait = response
                            .headers()
                            .get(header::RETRY_AFTER)
                            .and_then(|v| v.to_str().ok())
                            .and_then(parse_retry_after)
                            .unwrap_or_else(|| retry.calculate_backoff(attempt));
                        warn!(
                            url = %url,
                            attempt = attempt,
                            wait_ms = wait.as_millis() as u64,
                            "Rate limited (429), waiting before retry"
                        );
                        tokio::time::sleep(wait).await;
                        continue;
                    }

                    if retry.should_retry(status.as_u16()) {
                        if attempt > retry.max_retries {
                            let body = response.text().await.unwrap_or_default();
                            return Err(SourceError::ServerError {
                                status: status.as_u16(),
                                message: truncate(&body, 200),
                            });
                        }
                        let backoff = retry.calculate_backoff(attempt);
                        warn!(
                            url = %url,
                            status = %status,
                            attempt = attempt,
                            wait_ms = backoff.as_millis() as u64,
                            "Transient error, retrying with backoff"
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(SourceError::InvalidResponse {
                            message: format!("HTTP {}: {}", status.as_u16(), truncate(&body, 200)),
                        });
                    }

                    return response.json::<Value>().await.map_err(|e| {
                        SourceError::InvalidResponse {
                            message: format!("response body is not valid JSON: {e}"),
                        }
                    });
                }
                Err(e) => {
                    let timed_out = e.is_timeout();
                    if attempt > retry.max_retries {
                        if timed_out {
                            return Err(SourceError::Timeout { url });
                        }
                        return Err(SourceError::transport(
                            format!("request failed after {attempt} attempts: {url}"),
                            e,
                        ));
                    }
                    let backoff = retry.calculate_backoff(attempt);
                    warn!(
                        url = %url,
                        error = %e,
                        attempt = attempt,
                        wait_ms = backoff.as_millis() as u64,
                        "Request failed, retrying with backoff"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

/// Sequential page iterator over one remote collection.
///
/// Pages are requested one at a time; each successful call advances the
/// cursor, so a failed call can be retried without refetching earlier
/// pages.
pub struct Pager<'a, T> {
    client: &'a PracticeClient,
    path: &'static str,
    collection: &'static str,
    params: Vec<(String, String)>,
    page: u32,
    fetched: u64,
    done: bool,
    _marker: PhantomData<T>,
}

impl<'a, T: DeserializeOwned> Pager<'a, T> {
    fn new(
        client: &'a PracticeClient,
        path: &'static str,
        collection: &'static str,
        params: Vec<(String, String)>,
    ) -> Self {
        Self {
            client,
            path,
            collection,
            params,
            page: 1,
            fetched: 0,
            done: false,
            _marker: PhantomData,
        }
    }

    /// Fetch the next page, or `None` once the collection is exhausted.
    pub async fn next_page(&mut self) -> SourceResult<Option<Page<T>>> {
        if self.done {
            return Ok(None);
        }

        let body = self
            .client
            .get_page(self.path, &self.params, self.page)
            .await?;

        let total_entries = body.get("total_entries").and_then(Value::as_u64);
        let items_value = body.get(self.collection).cloned().ok_or_else(|| {
            SourceError::InvalidResponse {
                message: format!("response missing '{}' collection", self.collection),
            }
        })?;
        let items: Vec<T> =
            serde_json::from_value(items_value).map_err(|e| SourceError::InvalidResponse {
                message: format!("could not parse '{}' records: {e}", self.collection),
            })?;

        let count = items.len() as u64;
        self.fetched += count;
        self.done = count == 0
            || count < u64::from(self.client.config.per_page)
            || total_entries.is_some_and(|total| self.fetched >= total);

        let page = Page {
            items,
            page: self.page,
            total_entries,
            fetched: self.fetched,
        };
        self.page += 1;

        Ok(Some(page))
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}
