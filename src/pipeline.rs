//! Search entrypoint: query in, token-bounded context out.
//!
//! ```text
//! query ─▶ compose ─▶ aggregate ─▶ rank ─▶ boost ─▶ dedup ─▶ assemble ─▶ AssembledContext
//!                        │
//!                  VaultBackend (network)
//! ```
//!
//! Only aggregation touches the backend; the remaining stages are pure
//! transformations over the candidate list. A run is bounded by an optional
//! deadline and can be cancelled through a [`CancellationToken`]; either one drops
//! the in-flight aggregation, which cancels its outstanding requests.
//!
//! # Example
//!
//! ```rust,no_run
//! use vault_context::config::Config;
//! use vault_context::pipeline::{Pipeline, SearchOptions};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::default();
//! let pipeline = Pipeline::connect(&config)?;
//! let options = SearchOptions::from_config(&config)?;
//! let context = pipeline.search("ownership", &options).await?;
//! println!("{} tokens from {} notes", context.token_count, context.sources.len());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::aggregate::Aggregator;
use crate::assemble::ContextAssembler;
use crate::boost::MetadataBooster;
use crate::config::Config;
use crate::dedup::{CanonicalStrategy, Deduplicator};
use crate::error::SearchError;
use crate::models::AssembledContext;
use crate::query::QueryComposer;
use crate::rank::Bm25Ranker;
use crate::transport::Transport;
use crate::vault::{VaultBackend, VaultClient};

/// Per-call search parameters.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Maximum candidates the aggregator produces.
    pub limit: usize,
    pub max_tokens: usize,
    /// Maximum estimated tokens per chunk.
    pub chunk_size: usize,
    pub similarity_threshold: f64,
    pub strategy: CanonicalStrategy,
    pub deadline: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        let config = Config::default();
        Self {
            limit: config.search.limit,
            max_tokens: config.search.max_tokens,
            chunk_size: config.search.chunk_size,
            similarity_threshold: config.dedup.similarity_threshold,
            strategy: CanonicalStrategy::default(),
            deadline: Some(Duration::from_millis(config.search.deadline_ms)),
            cancel: None,
        }
    }
}

impl SearchOptions {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let s = &config.search;
        Ok(Self {
            limit: s.limit,
            max_tokens: s.max_tokens,
            chunk_size: s.chunk_size,
            similarity_threshold: config.dedup.similarity_threshold,
            strategy: config.dedup.canonical_strategy()?,
            deadline: (s.deadline_ms > 0).then(|| Duration::from_millis(s.deadline_ms)),
            cancel: None,
        })
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Reject options that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<(), SearchError> {
        if self.limit == 0 {
            return Err(SearchError::Validation("limit must be >= 1".to_string()));
        }
        if self.max_tokens == 0 {
            return Err(SearchError::Validation("max_tokens must be > 0".to_string()));
        }
        if self.chunk_size == 0 {
            return Err(SearchError::Validation("chunk_size must be > 0".to_string()));
        }
        let t = self.similarity_threshold;
        if !(t > 0.0 && t <= 1.0) {
            return Err(SearchError::Validation(format!(
                "similarity_threshold must be in (0.0, 1.0], got {}",
                t
            )));
        }
        if self.deadline == Some(Duration::ZERO) {
            return Err(SearchError::Validation("deadline must be > 0".to_string()));
        }
        Ok(())
    }
}

pub struct Pipeline<B: VaultBackend + ?Sized> {
    composer: QueryComposer,
    aggregator: Aggregator<B>,
    ranker: Bm25Ranker,
    booster: MetadataBooster,
}

impl Pipeline<VaultClient> {
    /// Build a pipeline over the HTTP vault described by `config`.
    pub fn connect(config: &Config) -> anyhow::Result<Self> {
        let transport = Arc::new(Transport::from_config(config)?);
        Self::new(config, Arc::new(VaultClient::new(transport)))
    }
}

impl<B: VaultBackend + ?Sized> Pipeline<B> {
    pub fn new(config: &Config, backend: Arc<B>) -> anyhow::Result<Self> {
        Ok(Self {
            composer: QueryComposer::from_config(&config.ranking),
            aggregator: Aggregator::new(backend, config)?,
            ranker: Bm25Ranker::from_config(&config.ranking),
            booster: MetadataBooster::from_config(&config.boost),
        })
    }

    pub fn backend(&self) -> &Arc<B> {
        self.aggregator.backend()
    }

    /// Run the full pipeline for `query`.
    ///
    /// Options are validated before any backend call. An empty context is a
    /// valid result; errors mean the run itself failed.
    pub async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<AssembledContext, SearchError> {
        options.validate()?;

        let bounded = async {
            match options.deadline {
                Some(deadline) => tokio::time::timeout(deadline, self.run(query, options))
                    .await
                    .map_err(|_| SearchError::DeadlineExceeded(deadline))?,
                None => self.run(query, options).await,
            }
        };

        match &options.cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(SearchError::Cancelled),
                    result = bounded => result,
                }
            }
            None => bounded.await,
        }
    }

    async fn run(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<AssembledContext, SearchError> {
        let started = Instant::now();
        let composed = self.composer.compose(query);

        let candidates = self.aggregator.aggregate(&composed, options.limit).await?;
        let aggregated = candidates.len();
        let fetch_ms = started.elapsed().as_millis() as u64;

        let ranked = self.ranker.rank(candidates, &composed);
        let boosted = self.booster.boost(ranked);

        let mut dedup = Deduplicator::new(options.similarity_threshold, options.strategy);
        if boosted.iter().any(|c| c.match_score > 0.0) {
            dedup = dedup.with_min_score(f64::MIN_POSITIVE);
        }
        let deduped = dedup.deduplicate(boosted);

        let context =
            ContextAssembler::new(options.max_tokens, options.chunk_size).assemble(&deduped);

        tracing::info!(
            query = %composed.raw,
            aggregated,
            after_dedup = deduped.len(),
            sources = context.sources.len(),
            tokens = context.token_count,
            fetch_ms,
            total_ms = started.elapsed().as_millis() as u64,
            "search complete"
        );
        Ok(context)
    }
}
