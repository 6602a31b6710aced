//! Error taxonomy for the retrieval pipeline.
//!
//! | Error | Raised by | Meaning |
//! |-------|-----------|---------|
//! | [`TransportError`] | [`transport`](crate::transport), [`vault`](crate::vault) | Backend could not serve a request |
//! | [`MergeError`] | [`stream`](crate::stream) | Chunked data could not be reassembled |
//! | [`SearchError`] | [`pipeline`](crate::pipeline) | A whole search run failed |
//!
//! Ranking, boosting, deduplication, and assembly do not fail: an empty
//! context is a valid result, not an error.

use std::time::Duration;

/// Failure of a single backend request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("request to {path} timed out after {}ms", after.as_millis())]
    Timeout { path: String, after: Duration },

    #[error("connection to backend failed for {path}: {message}")]
    Connection { path: String, message: String },

    /// Non-2xx status. 4xx statuses are returned without retry.
    #[error("backend returned HTTP {status} for {path}")]
    Status { path: String, status: u16 },

    /// The circuit breaker is open; no request was sent.
    #[error("circuit open: backend calls suspended, {path} not attempted")]
    CircuitOpen { path: String },

    /// Retries were exhausted on a retryable failure.
    #[error("backend unavailable for {path} after {attempts} attempts: {last}")]
    BackendUnavailable {
        path: String,
        attempts: u32,
        last: Box<TransportError>,
    },

    #[error("response body for {path} exceeds {limit} bytes")]
    BodyTooLarge { path: String, limit: usize },

    #[error("invalid response for {path}: {message}")]
    InvalidResponse { path: String, message: String },
}

impl TransportError {
    /// Whether the failure may succeed on a later attempt.
    ///
    /// Timeouts, connection failures, 5xx and 429 are retryable. Other 4xx
    /// statuses, open circuits, and malformed bodies are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Timeout { .. } | TransportError::Connection { .. } => true,
            TransportError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Whether the circuit breaker should count this as a backend failure.
    pub fn counts_against_breaker(&self) -> bool {
        self.is_retryable()
    }

    /// Path of the request that failed.
    pub fn path(&self) -> &str {
        match self {
            TransportError::Timeout { path, .. }
            | TransportError::Connection { path, .. }
            | TransportError::Status { path, .. }
            | TransportError::CircuitOpen { path }
            | TransportError::BackendUnavailable { path, .. }
            | TransportError::BodyTooLarge { path, .. }
            | TransportError::InvalidResponse { path, .. } => path,
        }
    }

    /// HTTP status code, if the backend answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            TransportError::BackendUnavailable { last, .. } => last.status(),
            _ => None,
        }
    }
}

/// Failure to reassemble a chunked stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    #[error("missing chunk {expected} (next available is {found})")]
    Gap { expected: u64, found: u64 },

    #[error("chunk {index} received twice with different data")]
    Conflict { index: u64 },

    #[error("stream ended before a completing chunk was merged (merged {merged} chunks)")]
    Incomplete { merged: u64 },

    #[error("merged stream is not valid UTF-8: {0}")]
    InvalidUtf8(String),
}

/// Failure of a full search run.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// Options rejected before any network call.
    #[error("invalid search options: {0}")]
    Validation(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("search deadline of {}ms exceeded", .0.as_millis())]
    DeadlineExceeded(Duration),

    #[error("search cancelled by caller")]
    Cancelled,
}

impl SearchError {
    /// True when the backend is short-circuited and callers should back off.
    pub fn is_circuit_open(&self) -> bool {
        matches!(
            self,
            SearchError::Transport(TransportError::CircuitOpen { .. })
        )
    }
}
