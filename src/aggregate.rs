//! Candidate aggregator.
//!
//! Turns a composed query into at most `limit` candidates by walking the
//! vault through a [`VaultBackend`]:
//!
//! 1. **Enumerate**: breadth-first listing from `vault.root`, entries sorted
//!    by name, recursion bounded by `max_depth`. Files are kept when they
//!    match an include glob and no exclude glob. The result is sorted by
//!    path, so every later step sees the same order for the same vault.
//! 2. **Filename pass**: documents whose file stem matches a query token.
//!    These are tagged [`MatchType::FilenameMatch`].
//! 3. **Content pass**: only if the filename pass left room. The remaining
//!    documents are read in path order, at most `scan_budget` of them, and
//!    those whose body contains a query token are tagged
//!    [`MatchType::ContentMatch`].
//!
//! A list-all query (empty input) returns the first `limit` documents.
//!
//! Reads run concurrently, bounded by `concurrency`, and results keep path
//! order. Any backend error aborts the whole call: a partial candidate list
//! is never returned.

use anyhow::Result;
use futures::stream::{self, StreamExt, TryStreamExt};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::config::Config;
use crate::error::TransportError;
use crate::models::{Candidate, MatchType, RawContent};
use crate::query::{tokenize, ComposedQuery};
use crate::vault::{VaultBackend, VaultEntry};

/// Vault housekeeping directories never worth scanning.
const DEFAULT_EXCLUDES: &[&str] = &["**/.obsidian/**", "**/.trash/**", "**/.git/**"];

pub struct Aggregator<B: VaultBackend + ?Sized> {
    backend: Arc<B>,
    root: String,
    include: GlobSet,
    exclude: GlobSet,
    scan_budget: usize,
    concurrency: usize,
    max_depth: usize,
}

impl<B: VaultBackend + ?Sized> Aggregator<B> {
    pub fn new(backend: Arc<B>, config: &Config) -> Result<Self> {
        let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        excludes.extend(config.vault.exclude_globs.iter().cloned());

        Ok(Self {
            backend,
            root: config.vault.root.trim_matches('/').to_string(),
            include: build_globset(&config.vault.include_globs)?,
            exclude: build_globset(&excludes)?,
            scan_budget: config.aggregation.scan_budget,
            concurrency: config.aggregation.concurrency.max(1),
            max_depth: config.aggregation.max_depth,
        })
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// All document paths under the root that pass the glob filters, sorted.
    pub async fn enumerate(&self) -> Result<Vec<String>, TransportError> {
        let mut paths = Vec::new();
        let mut queue = VecDeque::from([(self.root.clone(), 0usize)]);

        while let Some((dir, depth)) = queue.pop_front() {
            let mut entries = self.backend.list(&dir).await?;
            entries.sort_by(|a, b| entry_name(a).cmp(entry_name(b)));

            for entry in entries {
                match entry {
                    VaultEntry::Dir(name) => {
                        if depth < self.max_depth {
                            queue.push_back((join(&dir, &name), depth + 1));
                        }
                    }
                    VaultEntry::File(name) => {
                        let path = join(&dir, &name);
                        if self.include.is_match(&path) && !self.exclude.is_match(&path) {
                            paths.push(path);
                        }
                    }
                }
            }
        }

        paths.sort();
        paths.dedup();
        Ok(paths)
    }

    pub async fn aggregate(
        &self,
        query: &ComposedQuery,
        limit: usize,
    ) -> Result<Vec<Candidate>, TransportError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let paths = self.enumerate().await?;

        if query.is_list_all() {
            let selected: Vec<&String> = paths.iter().take(limit).collect();
            let docs = self.read_all(&selected).await?;
            tracing::debug!(documents = paths.len(), candidates = docs.len(), "listed all");
            return Ok(docs
                .into_iter()
                .map(|d| Candidate::new(d, MatchType::FilenameMatch))
                .collect());
        }

        let tokens: HashSet<&str> = query.tokens().collect();
        // Queries without word characters ("?!", "++") match as substrings.
        let needle = if tokenize(&query.raw).is_empty() {
            query.raw.trim().to_lowercase()
        } else {
            String::new()
        };

        let (by_name, rest): (Vec<&String>, Vec<&String>) = paths
            .iter()
            .partition(|p| filename_matches(p, &tokens, &needle));

        let name_hits: Vec<&String> = by_name.into_iter().take(limit).collect();
        let mut candidates: Vec<Candidate> = self
            .read_all(&name_hits)
            .await?
            .into_iter()
            .map(|d| Candidate::new(d, MatchType::FilenameMatch))
            .collect();
        let filename_matches = candidates.len();

        let mut scanned = 0usize;
        if candidates.len() < limit {
            let budget: Vec<&String> = rest.into_iter().take(self.scan_budget).collect();
            let batch_size = limit.max(self.concurrency);

            for batch in budget.chunks(batch_size) {
                let docs = self.read_all(batch).await?;
                scanned += docs.len();
                for doc in docs {
                    if content_matches(&doc.text, &tokens, &needle) {
                        candidates.push(Candidate::new(doc, MatchType::ContentMatch));
                        if candidates.len() == limit {
                            break;
                        }
                    }
                }
                if candidates.len() == limit {
                    break;
                }
            }
        }

        tracing::debug!(
            documents = paths.len(),
            filename_matches,
            content_matches = candidates.len() - filename_matches,
            scanned,
            "aggregated candidates"
        );
        Ok(candidates)
    }

    /// Read `paths` concurrently, keeping their order.
    async fn read_all(&self, paths: &[&String]) -> Result<Vec<RawContent>, TransportError> {
        let backend = &self.backend;
        stream::iter(paths.iter().map(|p| backend.read(p)))
            .buffered(self.concurrency)
            .try_collect()
            .await
    }
}

fn entry_name(entry: &VaultEntry) -> &str {
    match entry {
        VaultEntry::File(name) | VaultEntry::Dir(name) => name,
    }
}

fn join(dir: &str, name: &str) -> String {
    let name = name.trim_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

fn stem(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rfind('.') {
        Some(pos) if pos > 0 => &name[..pos],
        _ => name,
    }
}

fn filename_matches(path: &str, tokens: &HashSet<&str>, needle: &str) -> bool {
    let stem = stem(path).to_lowercase();
    tokenize(&stem).iter().any(|t| tokens.contains(t.as_str()))
        || (!needle.is_empty() && stem.contains(needle))
}

fn content_matches(text: &str, tokens: &HashSet<&str>, needle: &str) -> bool {
    tokenize(text).iter().any(|t| tokens.contains(t.as_str()))
        || (!needle.is_empty() && text.to_lowercase().contains(needle))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryVault;
    use crate::query::QueryComposer;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn vault() -> Arc<InMemoryVault> {
        let now = Utc::now();
        Arc::new(
            InMemoryVault::new()
                .with_doc("notes/logica-notes.md", "Overview of the project.", now)
                .with_doc("notes/daily/2024-01-01.md", "Worked on logica. More logica.", now)
                .with_doc("notes/daily/2024-01-02.md", "Groceries and errands.", now)
                .with_doc("reference/rust.md", "Ownership and borrowing.", now)
                .with_doc(".obsidian/workspace.md", "logica", now)
                .with_doc("attachments/logica.png", "binary", now),
        )
    }

    fn aggregator(vault: Arc<InMemoryVault>, config: &Config) -> Aggregator<InMemoryVault> {
        Aggregator::new(vault, config).unwrap()
    }

    fn compose(q: &str) -> ComposedQuery {
        QueryComposer::default().compose(q)
    }

    #[tokio::test]
    async fn test_enumerate_applies_globs_and_sorts() {
        let agg = aggregator(vault(), &Config::default());
        let paths = agg.enumerate().await.unwrap();
        assert_eq!(
            paths,
            vec![
                "notes/daily/2024-01-01.md",
                "notes/daily/2024-01-02.md",
                "notes/logica-notes.md",
                "reference/rust.md",
            ]
        );
    }

    #[tokio::test]
    async fn test_match_types() {
        let agg = aggregator(vault(), &Config::default());
        let candidates = agg.aggregate(&compose("logica"), 10).await.unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].path(), "notes/logica-notes.md");
        assert_eq!(candidates[0].match_type, MatchType::FilenameMatch);
        assert_eq!(candidates[1].path(), "notes/daily/2024-01-01.md");
        assert_eq!(candidates[1].match_type, MatchType::ContentMatch);
    }

    #[tokio::test]
    async fn test_filename_matches_come_first_and_limit_skips_content_scan() {
        let v = vault();
        let agg = aggregator(v.clone(), &Config::default());
        let candidates = agg.aggregate(&compose("logica"), 1).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].match_type, MatchType::FilenameMatch);
        assert_eq!(v.read_count(), 1);
    }

    #[tokio::test]
    async fn test_scan_budget_bounds_reads() {
        let v = vault();
        let mut config = Config::default();
        config.aggregation.scan_budget = 1;
        let agg = aggregator(v.clone(), &config);
        let candidates = agg.aggregate(&compose("ownership"), 10).await.unwrap();
        // reference/rust.md is fourth in path order, beyond the budget.
        assert!(candidates.is_empty());
        assert_eq!(v.read_count(), 1);
    }

    #[tokio::test]
    async fn test_stable_across_runs() {
        let agg = aggregator(vault(), &Config::default());
        let q = compose("logica errands");
        let first = agg.aggregate(&q, 2).await.unwrap();
        let second = agg.aggregate(&q, 2).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_list_all() {
        let agg = aggregator(vault(), &Config::default());
        let candidates = agg.aggregate(&compose("  "), 3).await.unwrap();
        let paths: Vec<&str> = candidates.iter().map(|c| c.path()).collect();
        assert_eq!(
            paths,
            vec![
                "notes/daily/2024-01-01.md",
                "notes/daily/2024-01-02.md",
                "notes/logica-notes.md"
            ]
        );
    }

    #[tokio::test]
    async fn test_root_and_depth() {
        let mut config = Config::default();
        config.vault.root = "notes".to_string();
        config.aggregation.max_depth = 0;
        let agg = aggregator(vault(), &config);
        assert_eq!(agg.enumerate().await.unwrap(), vec!["notes/logica-notes.md"]);
    }

    #[tokio::test]
    async fn test_backend_error_aborts() {
        let v = vault();
        v.fail_path("notes/daily/2024-01-01.md");
        let agg = aggregator(v, &Config::default());
        let err = agg.aggregate(&compose("logica"), 10).await.unwrap_err();
        assert_eq!(err.status(), Some(503));
    }

    #[tokio::test]
    async fn test_symbol_query_matches_substring() {
        let v = Arc::new(InMemoryVault::new().with_doc("a.md", "use C++ here", Utc::now()));
        let agg = aggregator(v, &Config::default());
        let candidates = agg.aggregate(&compose("++"), 5).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].match_type, MatchType::ContentMatch);
    }

    /// Counts reads that are in flight at the same time.
    struct GaugedVault {
        inner: InMemoryVault,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl VaultBackend for GaugedVault {
        async fn list(&self, dir: &str) -> Result<Vec<VaultEntry>, TransportError> {
            self.inner.list(dir).await
        }

        async fn read(&self, path: &str) -> Result<RawContent, TransportError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            let result = self.inner.read(path).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    #[tokio::test]
    async fn test_reads_bounded_by_concurrency() {
        let inner = InMemoryVault::new();
        for i in 0..10 {
            inner.insert(&format!("notes/n{i:02}.md"), "alpha body", Utc::now());
        }
        let v = Arc::new(GaugedVault {
            inner,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let mut config = Config::default();
        config.aggregation.concurrency = 2;
        let agg = Aggregator::new(v.clone(), &config).unwrap();

        let candidates = agg.aggregate(&compose("alpha"), 20).await.unwrap();
        assert_eq!(candidates.len(), 10);
        assert_eq!(v.inner.read_count(), 10);
        let peak = v.peak.load(Ordering::SeqCst);
        assert!(peak <= 2, "peak concurrent reads: {peak}");
        assert!(peak >= 1);
    }

    #[tokio::test]
    async fn test_zero_limit() {
        let agg = aggregator(vault(), &Config::default());
        assert!(agg.aggregate(&compose("logica"), 0).await.unwrap().is_empty());
    }
}
