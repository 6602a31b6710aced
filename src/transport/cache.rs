//! In-memory response cache with a freshness window.
//!
//! Keyed by normalized request path. Entries expire `ttl` after insertion
//! and the cache holds at most `capacity` entries; moka evicts both in the
//! background. Only successful responses are stored.

use moka::sync::Cache;
use std::time::Duration;

use super::TransportResponse;

pub struct ResponseCache {
    ttl: Duration,
    inner: Cache<String, TransportResponse>,
}

impl ResponseCache {
    pub fn new(ttl: Duration, capacity: u64) -> Self {
        Self {
            ttl,
            inner: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh entry for `key`, if any.
    pub fn get(&self, key: &str) -> Option<TransportResponse> {
        self.inner.get(key)
    }

    pub fn put(&self, key: String, response: TransportResponse) {
        self.inner.insert(key, response);
    }

    pub fn invalidate(&self, key: &str) {
        self.inner.invalidate(key);
    }

    pub fn clear(&self) {
        self.inner.invalidate_all();
    }

    /// Number of live entries after pending evictions have run.
    pub fn len(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
