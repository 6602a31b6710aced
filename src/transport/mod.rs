//! Resilient HTTP transport to the vault backend.
//!
//! One [`Transport`] owns one `reqwest::Client` (and therefore one
//! connection pool), one [`CircuitBreaker`], and one optional
//! [`ResponseCache`]. Construct it once at startup and share it behind an
//! `Arc`; every pipeline run reuses it.
//!
//! # Request path
//!
//! ```text
//! get(path, priority)
//!   │
//!   ├─ cache hit (fresh, CachePolicy::Use) ──────────────▶ return
//!   │
//!   └─ for attempt in 0..=max_retries
//!        ├─ breaker refuses ─────────────▶ Err(CircuitOpen)
//!        ├─ send with priority timeout
//!        ├─ 2xx ──▶ breaker.succeed ──▶ cache.put ──▶ return
//!        ├─ 4xx ──▶ breaker.succeed ──▶ Err(Status)   (no retry)
//!        └─ timeout / connection / 5xx / 429
//!             ──▶ breaker.fail ──▶ backoff ──▶ next attempt
//!   Err(BackendUnavailable) once attempts are exhausted
//! ```
//!
//! # Retry Strategy
//!
//! - Timeouts, connection errors, HTTP 429 and 5xx → retry
//! - HTTP 4xx (not 429) → fail immediately
//! - Backoff: `backoff_base × 2^(attempt-1)`, capped at 2^5
//!
//! Response bodies are read incrementally and reassembled through the
//! [`StreamMerger`](crate::stream::StreamMerger), bounded by
//! `max_body_bytes`.

pub mod breaker;
pub mod cache;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, LAST_MODIFIED};
use reqwest::Url;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::config::Config;
use crate::error::TransportError;
use crate::metadata::parse_http_date;
use crate::models::StreamChunk;
use crate::stream::StreamMerger;

pub use breaker::{BreakerState, CircuitBreaker};
pub use cache::ResponseCache;

/// Timeout class of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    /// Health checks.
    Fast,
    /// Listings and content fetches.
    Medium,
    /// Large or expensive reads.
    Slow,
}

/// Whether a read may be served from the response cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    #[default]
    Use,
    /// Skip the cached copy and overwrite it on success.
    Refresh,
}

/// A successful backend response.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub body: String,
    pub status: u16,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Snapshot of breaker state and request counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransportStats {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    /// Requests actually sent to the backend (retries included).
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub retries: u64,
    /// Calls refused by an open breaker.
    pub short_circuited: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

#[derive(Debug, Default)]
struct Counters {
    total_requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    retries: AtomicU64,
    short_circuited: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Per-priority request timeouts.
#[derive(Debug, Clone, Copy)]
pub struct PriorityTimeouts {
    pub fast: Duration,
    pub medium: Duration,
    pub slow: Duration,
}

impl PriorityTimeouts {
    pub fn for_priority(&self, priority: Priority) -> Duration {
        match priority {
            Priority::Fast => self.fast,
            Priority::Medium => self.medium,
            Priority::Slow => self.slow,
        }
    }
}

pub struct Transport {
    client: reqwest::Client,
    base_url: Url,
    timeouts: PriorityTimeouts,
    max_retries: u32,
    backoff_base: Duration,
    max_body_bytes: usize,
    breaker: CircuitBreaker,
    cache: Option<ResponseCache>,
    counters: Counters,
}

impl Transport {
    /// Build a transport using the credential from `vault.api_key_env`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.vault.api_key();
        if api_key.is_none() {
            tracing::warn!(
                env = %config.vault.api_key_env,
                "no vault credential set, requests will be unauthenticated"
            );
        }
        Self::new(config, api_key)
    }

    /// Build a transport with an explicit bearer credential.
    pub fn new(config: &Config, api_key: Option<String>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", key))
                .context("vault credential is not a valid header value")?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let t = &config.transport;
        let timeouts = PriorityTimeouts {
            fast: Duration::from_millis(t.fast_timeout_ms),
            medium: Duration::from_millis(t.medium_timeout_ms),
            slow: Duration::from_millis(t.slow_timeout_ms),
        };

        // The backend is a localhost service with a self-signed certificate.
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(config.vault.accept_invalid_certs)
            .connect_timeout(timeouts.medium)
            .build()
            .context("Failed to build HTTP client")?;

        let base_url = Url::parse(&config.vault.base_url)
            .with_context(|| format!("invalid vault base_url: {}", config.vault.base_url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("vault base_url cannot carry a path: {}", base_url);
        }

        let breaker = CircuitBreaker::new(
            config.circuit_breaker.failure_threshold,
            Duration::from_millis(config.circuit_breaker.cooldown_ms),
        );

        Ok(Self {
            client,
            base_url,
            timeouts,
            max_retries: t.max_retries,
            backoff_base: Duration::from_millis(t.backoff_base_ms),
            max_body_bytes: t.max_body_bytes,
            breaker,
            cache: t
                .cache_ttl()
                .map(|ttl| ResponseCache::new(ttl, t.cache_capacity)),
            counters: Counters::default(),
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    /// GET `path`, serving from the cache when a fresh copy exists.
    pub async fn get(
        &self,
        path: &str,
        priority: Priority,
    ) -> Result<TransportResponse, TransportError> {
        self.get_with(path, priority, CachePolicy::Use).await
    }

    pub async fn get_with(
        &self,
        path: &str,
        priority: Priority,
        policy: CachePolicy,
    ) -> Result<TransportResponse, TransportError> {
        let key = normalize_path(path);

        if let Some(cache) = &self.cache {
            if policy == CachePolicy::Use {
                if let Some(hit) = cache.get(&key) {
                    Counters::bump(&self.counters.cache_hits);
                    tracing::trace!(path = %key, "cache hit");
                    return Ok(hit);
                }
            }
            Counters::bump(&self.counters.cache_misses);
        }

        let response = self.execute(&key, priority, self.max_retries).await?;

        if let Some(cache) = &self.cache {
            cache.put(key, response.clone());
        }
        Ok(response)
    }

    /// Single fast request to the backend root, never cached or retried.
    pub async fn health(&self) -> Result<(), TransportError> {
        self.execute("/", Priority::Fast, 0).await.map(|_| ())
    }

    /// Drop any cached copy of `path`.
    pub fn invalidate(&self, path: &str) {
        if let Some(cache) = &self.cache {
            cache.invalidate(&normalize_path(path));
        }
    }

    pub fn stats(&self) -> TransportStats {
        let c = &self.counters;
        TransportStats {
            state: self.breaker.state(),
            consecutive_failures: self.breaker.consecutive_failures(),
            total_requests: c.total_requests.load(Ordering::Relaxed),
            successes: c.successes.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            retries: c.retries.load(Ordering::Relaxed),
            short_circuited: c.short_circuited.load(Ordering::Relaxed),
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            cache_misses: c.cache_misses.load(Ordering::Relaxed),
        }
    }

    async fn execute(
        &self,
        path: &str,
        priority: Priority,
        max_retries: u32,
    ) -> Result<TransportResponse, TransportError> {
        let mut last_err = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                Counters::bump(&self.counters.retries);
                tokio::time::sleep(self.backoff(attempt)).await;
            }

            let Some(permit) = self.breaker.try_acquire() else {
                Counters::bump(&self.counters.short_circuited);
                tracing::debug!(path, "circuit open, request short-circuited");
                return Err(TransportError::CircuitOpen {
                    path: path.to_string(),
                });
            };

            Counters::bump(&self.counters.total_requests);
            match self.send_once(path, priority).await {
                Ok(response) => {
                    permit.succeed();
                    Counters::bump(&self.counters.successes);
                    return Ok(response);
                }
                Err(err) => {
                    Counters::bump(&self.counters.failures);
                    if err.counts_against_breaker() {
                        permit.fail();
                    } else {
                        // The backend answered; it is reachable.
                        permit.succeed();
                    }
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    tracing::warn!(path, attempt, error = %err, "backend request failed");
                    last_err = Some(err);
                }
            }
        }

        let last = last_err.unwrap_or_else(|| TransportError::Connection {
            path: path.to_string(),
            message: "no attempt was made".to_string(),
        });
        Err(TransportError::BackendUnavailable {
            path: path.to_string(),
            attempts: max_retries + 1,
            last: Box::new(last),
        })
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base * (1u32 << (attempt - 1).min(5))
    }

    async fn send_once(
        &self,
        path: &str,
        priority: Priority,
    ) -> Result<TransportResponse, TransportError> {
        let timeout = self.timeouts.for_priority(priority);
        let url = request_url(&self.base_url, path);

        let request = async {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| classify(path, timeout, e))?;

            let status = response.status();
            if !status.is_success() {
                return Err(TransportError::Status {
                    path: path.to_string(),
                    status: status.as_u16(),
                });
            }

            let last_modified = response
                .headers()
                .get(LAST_MODIFIED)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_http_date);

            let body = self.read_body(path, timeout, response).await?;
            Ok(TransportResponse {
                body,
                status: status.as_u16(),
                last_modified,
            })
        };

        match tokio::time::timeout(timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                path: path.to_string(),
                after: timeout,
            }),
        }
    }

    async fn read_body(
        &self,
        path: &str,
        timeout: Duration,
        mut response: reqwest::Response,
    ) -> Result<String, TransportError> {
        let mut merger = StreamMerger::with_limit(self.max_body_bytes);
        let mut index = 0u64;

        loop {
            let next = response
                .chunk()
                .await
                .map_err(|e| classify(path, timeout, e))?;
            let done = next.is_none();
            let data = next.map(|bytes| bytes.to_vec()).unwrap_or_default();
            merger
                .push(StreamChunk::new(index, data, done))
                .map_err(|e| invalid(path, e))?;
            if merger.exceeds_limit() {
                return Err(TransportError::BodyTooLarge {
                    path: path.to_string(),
                    limit: self.max_body_bytes,
                });
            }
            if done {
                break;
            }
            index += 1;
        }

        merger
            .finish()
            .and_then(|merged| merged.into_string())
            .map_err(|e| invalid(path, e))
    }
}

fn classify(path: &str, timeout: Duration, err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout {
            path: path.to_string(),
            after: timeout,
        }
    } else {
        TransportError::Connection {
            path: path.to_string(),
            message: err.to_string(),
        }
    }
}

fn invalid(path: &str, err: impl std::fmt::Display) -> TransportError {
    TransportError::InvalidResponse {
        path: path.to_string(),
        message: err.to_string(),
    }
}

/// Canonical form of a request path, used as the cache key.
///
/// Collapses repeated and `.` segments, guarantees one leading `/`, and keeps
/// a trailing `/` (directory listings differ from file reads).
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    let segments: Vec<&str> = trimmed
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    if segments.is_empty() {
        return "/".to_string();
    }
    let mut normalized = format!("/{}", segments.join("/"));
    if trimmed.ends_with('/') {
        normalized.push('/');
    }
    normalized
}

/// Join a request path onto `base`, percent-encoding each segment.
///
/// `base` must not be a cannot-be-a-base URL; [`Transport::new`] rejects those.
pub fn request_url(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments
            .pop_if_empty()
            .extend(path.split('/').filter(|s| !s.is_empty()));
        if path.ends_with('/') {
            segments.push("");
        }
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("vault/a.md"), "/vault/a.md");
        assert_eq!(normalize_path("//vault//./a.md "), "/vault/a.md");
        assert_eq!(normalize_path("/vault/notes/"), "/vault/notes/");
    }

    #[test]
    fn test_request_url() {
        let base = Url::parse("https://127.0.0.1:27124").unwrap();
        assert_eq!(
            request_url(&base, "/vault/a.md").as_str(),
            "https://127.0.0.1:27124/vault/a.md"
        );
        assert_eq!(
            request_url(&base, "/vault/My Notes/é.md").path(),
            "/vault/My%20Notes/%C3%A9.md"
        );
        assert_eq!(
            request_url(&base, "/vault/a#b?.md").path(),
            "/vault/a%23b%3F.md"
        );
        assert_eq!(request_url(&base, "/vault/notes/").path(), "/vault/notes/");
        assert_eq!(request_url(&base, "/").path(), "/");
    }

    #[test]
    fn test_request_url_keeps_base_path() {
        let base = Url::parse("http://localhost:8080/api/").unwrap();
        assert_eq!(request_url(&base, "/vault/a.md").path(), "/api/vault/a.md");
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut config = Config::default();
        config.transport.backoff_base_ms = 100;
        let transport = Transport::new(&config, None).unwrap();
        assert_eq!(transport.backoff(1), Duration::from_millis(100));
        assert_eq!(transport.backoff(2), Duration::from_millis(200));
        assert_eq!(transport.backoff(3), Duration::from_millis(400));
        assert_eq!(transport.backoff(20), Duration::from_millis(3200));
    }

    #[test]
    fn test_priority_timeouts() {
        let config = Config::default();
        let transport = Transport::new(&config, Some("key".to_string())).unwrap();
        assert_eq!(
            transport.timeouts.for_priority(Priority::Fast),
            Duration::from_millis(2_000)
        );
        assert_eq!(
            transport.timeouts.for_priority(Priority::Medium),
            Duration::from_millis(10_000)
        );
        assert!(transport.cache.is_some());
        assert_eq!(transport.base_url(), "https://127.0.0.1:27124");
    }

    #[test]
    fn test_fresh_stats() {
        let transport = Transport::new(&Config::default(), None).unwrap();
        let stats = transport.stats();
        assert_eq!(stats.state, BreakerState::Closed);
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.cache_hits, 0);
    }
}
