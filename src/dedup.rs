//! Near-duplicate removal.
//!
//! # Similarity
//!
//! Two candidates are compared in two steps:
//!
//! 1. **Exact**: SHA-256 of the whitespace-collapsed, lowercased text. Equal
//!    fingerprints score `1.0`.
//! 2. **Bag-of-words overlap**: with `A` and `B` the multisets of
//!    [`tokenize`] words,
//!    `Σ_w min(A[w], B[w]) / max(|A|, |B|)`.
//!
//! Two bodies that differ in 5 of 100 words score `0.95`: they merge at a
//! threshold of `0.9` and stay apart at `0.99`.
//!
//! # Clustering
//!
//! Pairs scoring at or above the threshold are joined with union-find, so
//! clusters are transitive. Each cluster keeps one canonical survivor chosen
//! by [`CanonicalStrategy`]. Survivors keep their input (score) order.
//!
//! Survivors of different clusters are pairwise below the threshold, so a
//! second pass finds nothing to merge.

use anyhow::bail;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;

use crate::config::DedupConfig;
use crate::models::{Candidate, DocumentRef};
use crate::query::tokenize;

/// Which member of a duplicate cluster survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CanonicalStrategy {
    /// Latest `modified_at`; ties go to the higher score.
    #[default]
    Freshest,
    /// Highest `match_score`; ties go to the fresher document.
    HighestScore,
}

impl FromStr for CanonicalStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "freshest" => Ok(CanonicalStrategy::Freshest),
            "highest-score" | "highest_score" => Ok(CanonicalStrategy::HighestScore),
            other => bail!(
                "unknown dedup strategy '{}' (expected 'freshest' or 'highest-score')",
                other
            ),
        }
    }
}

impl std::fmt::Display for CanonicalStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CanonicalStrategy::Freshest => f.write_str("freshest"),
            CanonicalStrategy::HighestScore => f.write_str("highest-score"),
        }
    }
}

/// Audit record for one collapsed cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateCluster {
    pub canonical: DocumentRef,
    /// Dropped members, in input order.
    pub members: Vec<DocumentRef>,
}

/// Result of [`Deduplicator::cluster`].
#[derive(Debug, Clone)]
pub struct Deduplication {
    pub kept: Vec<Candidate>,
    pub clusters: Vec<DuplicateCluster>,
}

/// Precomputed comparison data for one candidate.
struct Signature {
    fingerprint: [u8; 32],
    words: HashMap<String, usize>,
    len: usize,
}

impl Signature {
    fn of(text: &str) -> Self {
        let normalized = text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        let fingerprint: [u8; 32] = Sha256::digest(normalized.as_bytes()).into();

        let mut words = HashMap::new();
        let mut len = 0;
        for word in tokenize(text) {
            *words.entry(word).or_insert(0) += 1;
            len += 1;
        }
        Self {
            fingerprint,
            words,
            len,
        }
    }

    fn similarity(&self, other: &Signature) -> f64 {
        if self.fingerprint == other.fingerprint {
            return 1.0;
        }
        let denom = self.len.max(other.len);
        if denom == 0 {
            return 0.0;
        }
        let (small, large) = if self.words.len() <= other.words.len() {
            (&self.words, &other.words)
        } else {
            (&other.words, &self.words)
        };
        let shared: usize = small
            .iter()
            .map(|(w, &n)| n.min(large.get(w).copied().unwrap_or(0)))
            .sum();
        shared as f64 / denom as f64
    }
}

/// Content similarity of two texts in `[0, 1]`.
pub fn similarity(a: &str, b: &str) -> f64 {
    Signature::of(a).similarity(&Signature::of(b))
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }
}

#[derive(Debug, Clone)]
pub struct Deduplicator {
    threshold: f64,
    strategy: CanonicalStrategy,
    min_score: Option<f64>,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(0.9, CanonicalStrategy::Freshest)
    }
}

impl Deduplicator {
    pub fn new(threshold: f64, strategy: CanonicalStrategy) -> Self {
        Self {
            threshold,
            strategy,
            min_score: None,
        }
    }

    pub fn from_config(config: &DedupConfig) -> anyhow::Result<Self> {
        Ok(Self::new(
            config.similarity_threshold,
            config.canonical_strategy()?,
        ))
    }

    /// Only compare candidates scoring at least `min_score`; others pass
    /// through untouched.
    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = Some(min_score);
        self
    }

    pub fn deduplicate(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        self.cluster(candidates).kept
    }

    /// Collapse near-duplicates and report what was dropped.
    pub fn cluster(&self, candidates: Vec<Candidate>) -> Deduplication {
        let considered: Vec<usize> = (0..candidates.len())
            .filter(|&i| self.min_score.is_none_or(|m| candidates[i].match_score >= m))
            .collect();
        let signatures: Vec<Signature> = considered
            .iter()
            .map(|&i| Signature::of(candidates[i].text()))
            .collect();

        let mut sets = DisjointSet::new(candidates.len());
        for a in 0..considered.len() {
            for b in (a + 1)..considered.len() {
                if signatures[a].similarity(&signatures[b]) >= self.threshold {
                    sets.union(considered[a], considered[b]);
                }
            }
        }

        let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
        for i in 0..candidates.len() {
            groups.entry(sets.find(i)).or_default().push(i);
        }

        let mut dropped = vec![false; candidates.len()];
        let mut clusters = Vec::new();
        let mut roots: Vec<usize> = groups.keys().copied().collect();
        roots.sort_unstable();
        for root in roots {
            let members = &groups[&root];
            if members.len() < 2 {
                continue;
            }
            let canonical = self.pick_canonical(&candidates, members);
            let mut removed = Vec::new();
            for &m in members {
                if m != canonical {
                    dropped[m] = true;
                    removed.push(candidates[m].doc().clone());
                }
            }
            tracing::debug!(
                canonical = %candidates[canonical].path(),
                dropped = removed.len(),
                strategy = %self.strategy,
                "collapsed duplicate cluster"
            );
            clusters.push(DuplicateCluster {
                canonical: candidates[canonical].doc().clone(),
                members: removed,
            });
        }

        let kept = candidates
            .into_iter()
            .zip(dropped)
            .filter_map(|(c, d)| (!d).then_some(c))
            .collect();
        Deduplication { kept, clusters }
    }

    /// Index of the survivor among `members` (input indices, ascending).
    fn pick_canonical(&self, candidates: &[Candidate], members: &[usize]) -> usize {
        let by_freshness =
            |a: &Candidate, b: &Candidate| a.doc().modified_at.cmp(&b.doc().modified_at);
        let by_score = |a: &Candidate, b: &Candidate| a.match_score.total_cmp(&b.match_score);

        let mut best = members[0];
        for &m in &members[1..] {
            let (cand, cur) = (&candidates[m], &candidates[best]);
            let ord = match self.strategy {
                CanonicalStrategy::Freshest => {
                    by_freshness(cand, cur).then_with(|| by_score(cand, cur))
                }
                CanonicalStrategy::HighestScore => {
                    by_score(cand, cur).then_with(|| by_freshness(cand, cur))
                }
            };
            // Full ties keep the earlier candidate.
            if ord == Ordering::Greater {
                best = m;
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MatchType, RawContent};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    fn candidate(path: &str, text: &str, score: f64, modified: DateTime<Utc>) -> Candidate {
        let mut c = Candidate::new(
            RawContent {
                doc: DocumentRef::new(path, modified),
                text: text.to_string(),
                tags: Vec::new(),
            },
            MatchType::ContentMatch,
        );
        c.match_score = score;
        c
    }

    fn words(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("word{}", i)).collect()
    }

    /// Two 100-word bodies sharing 95 words.
    fn near_pair() -> (String, String) {
        let a = words(100);
        let mut b = a.clone();
        for (i, w) in b.iter_mut().enumerate().skip(95) {
            *w = format!("other{}", i);
        }
        (a.join(" "), b.join(" "))
    }

    fn paths(candidates: &[Candidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.path()).collect()
    }

    #[test]
    fn test_similarity_metric() {
        let (a, b) = near_pair();
        assert!((similarity(&a, &b) - 0.95).abs() < 1e-9);
        assert_eq!(similarity("Same  Text", "same text"), 1.0);
        assert_eq!(similarity("alpha beta", "gamma delta"), 0.0);
        assert_eq!(similarity("", "!!!"), 0.0);
    }

    #[test]
    fn test_threshold_controls_merge() {
        let (a, b) = near_pair();
        let input = vec![
            candidate("a.md", &a, 2.0, at(1)),
            candidate("b.md", &b, 1.0, at(2)),
        ];

        let merged = Deduplicator::new(0.9, CanonicalStrategy::Freshest).deduplicate(input.clone());
        assert_eq!(paths(&merged), vec!["b.md"]);

        let separate = Deduplicator::new(0.99, CanonicalStrategy::Freshest).deduplicate(input);
        assert_eq!(separate.len(), 2);
    }

    #[test]
    fn test_highest_score_strategy() {
        let (a, b) = near_pair();
        let input = vec![
            candidate("a.md", &a, 2.0, at(1)),
            candidate("b.md", &b, 1.0, at(2)),
        ];
        let out = Deduplicator::new(0.9, CanonicalStrategy::HighestScore).deduplicate(input);
        assert_eq!(paths(&out), vec!["a.md"]);
    }

    #[test]
    fn test_idempotent() {
        let (a, b) = near_pair();
        let input = vec![
            candidate("a.md", &a, 5.0, at(1)),
            candidate("x.md", "completely different words here", 4.0, at(1)),
            candidate("b.md", &b, 3.0, at(3)),
            candidate("c.md", &a, 2.0, at(2)),
            candidate("y.md", "completely different words here", 1.0, at(5)),
        ];
        let dedup = Deduplicator::default();
        let once = dedup.deduplicate(input);
        let twice = dedup.deduplicate(once.clone());
        assert_eq!(once, twice);
        assert_eq!(paths(&once), vec!["b.md", "y.md"]);
    }

    #[test]
    fn test_survivors_keep_score_order() {
        let input = vec![
            candidate("top.md", "unique top", 9.0, at(1)),
            candidate("dup1.md", "shared body text", 5.0, at(1)),
            candidate("mid.md", "unique middle", 4.0, at(1)),
            candidate("dup2.md", "shared body text", 1.0, at(9)),
        ];
        let result = Deduplicator::default().cluster(input);
        assert_eq!(paths(&result.kept), vec!["top.md", "mid.md", "dup2.md"]);
        assert_eq!(result.clusters.len(), 1);
        assert_eq!(result.clusters[0].canonical.path, "dup2.md");
        assert_eq!(result.clusters[0].members[0].path, "dup1.md");
    }

    #[test]
    fn test_min_score_limits_comparison() {
        let input = vec![
            candidate("a.md", "same body", 3.0, at(1)),
            candidate("b.md", "same body", 0.0, at(2)),
        ];
        let out = Deduplicator::default()
            .with_min_score(1.0)
            .deduplicate(input);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_never_empties_non_empty_input() {
        let input = vec![
            candidate("a.md", "x", 1.0, at(1)),
            candidate("b.md", "x", 1.0, at(1)),
            candidate("c.md", "x", 1.0, at(1)),
        ];
        let out = Deduplicator::default().deduplicate(input);
        assert_eq!(paths(&out), vec!["a.md"]);
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!(
            "freshest".parse::<CanonicalStrategy>().unwrap(),
            CanonicalStrategy::Freshest
        );
        assert_eq!(
            "Highest-Score".parse::<CanonicalStrategy>().unwrap(),
            CanonicalStrategy::HighestScore
        );
        assert!("oldest".parse::<CanonicalStrategy>().is_err());
        assert_eq!(CanonicalStrategy::HighestScore.to_string(), "highest-score");
    }
}
