//! # Vault Context
//!
//! Token-bounded context retrieval over a personal knowledge vault served by
//! a local HTTP API.
//!
//! A single call, [`Pipeline::search`](pipeline::Pipeline::search), turns a
//! free-text query into an [`AssembledContext`](models::AssembledContext):
//! the most relevant note excerpts, deduplicated and packed into a token
//! budget, ready to hand to a language model.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌────────────┐   ┌──────┐   ┌───────┐   ┌───────┐   ┌──────────┐
//! │  Compose  │──▶│ Aggregate  │──▶│ Rank │──▶│ Boost │──▶│ Dedup │──▶│ Assemble │
//! └───────────┘   └─────┬──────┘   └──────┘   └───────┘   └───────┘   └──────────┘
//!                       │
//!                 ┌─────▼──────┐
//!                 │ Transport  │  retries · circuit breaker · cache
//!                 └─────┬──────┘
//!                       ▼
//!                 vault HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Transport, merge, and search errors |
//! | [`transport`] | Resilient HTTP client |
//! | [`vault`] | Backend trait and HTTP vault client |
//! | [`memory`] | In-memory backend |
//! | [`metadata`] | Tag and date extraction |
//! | [`query`] | Tokenizer and query composer |
//! | [`aggregate`] | Candidate aggregation |
//! | [`rank`] | BM25 ranking |
//! | [`boost`] | Path and tag boosts |
//! | [`dedup`] | Near-duplicate removal |
//! | [`chunk`] | Text chunking and token estimate |
//! | [`assemble`] | Budgeted context assembly |
//! | [`stream`] | Chunked stream reassembly |
//! | [`pipeline`] | Search entrypoint |
//! | [`telemetry`] | Tracing setup |

pub mod aggregate;
pub mod assemble;
pub mod boost;
pub mod chunk;
pub mod config;
pub mod dedup;
pub mod error;
pub mod memory;
pub mod metadata;
pub mod models;
pub mod pipeline;
pub mod query;
pub mod rank;
pub mod stream;
pub mod telemetry;
pub mod transport;
pub mod vault;

pub use error::{SearchError, TransportError};
pub use pipeline::{Pipeline, SearchOptions};
pub use tokio_util::sync::CancellationToken;
