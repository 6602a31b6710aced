//! BM25 lexical ranker.
//!
//! Scores each candidate against a [`ComposedQuery`] using corpus
//! statistics computed over the candidate set itself (the aggregated subset
//! is all the ranker sees).
//!
//! # Formula
//!
//! For each query term `t` with weight `w` and each field `f` with boost `β`:
//!
//! ```text
//! score += w · IDF(t) · β_f · tf·(k1+1) / (tf + k1·(1 − b + b·dl_f/avgdl_f))
//! IDF(t) = ln((N − df + 0.5) / (df + 0.5) + 1)
//! ```
//!
//! Fields are the file stem (title), the extracted tags, and the body. `df`
//! counts candidates containing `t` in any field.
//!
//! [`MatchType`](crate::models::MatchType) is not read here. The title field
//! scores the same stem tokens the aggregator's filename pass matched on, so
//! a filename hit is credited through the title boost and only through it.
//!
//! Output has the same length as the input, sorted by score descending with
//! ties kept in input order. Candidates without any matching term score `0`.

use std::collections::{HashMap, HashSet};

use crate::config::RankingConfig;
use crate::models::Candidate;
use crate::query::{tokenize, ComposedQuery, Field};

/// Tokenized view of one candidate, built for a single ranking pass.
struct FieldView {
    title: Vec<String>,
    tags: Vec<String>,
    body: Vec<String>,
}

impl FieldView {
    fn of(candidate: &Candidate) -> Self {
        Self {
            title: tokenize(candidate.doc().stem()),
            tags: candidate
                .content
                .tags
                .iter()
                .flat_map(|t| tokenize(t))
                .collect(),
            body: tokenize(candidate.text()),
        }
    }

    fn field(&self, field: Field) -> &[String] {
        match field {
            Field::Title => &self.title,
            Field::Tags => &self.tags,
            Field::Body => &self.body,
        }
    }

    fn contains(&self, term: &str) -> bool {
        [&self.title, &self.tags, &self.body]
            .iter()
            .any(|tokens| tokens.iter().any(|t| t == term))
    }
}

const FIELDS: [Field; 3] = [Field::Title, Field::Tags, Field::Body];

/// Corpus statistics over one candidate set.
struct RankContext {
    total_docs: usize,
    doc_freqs: HashMap<String, usize>,
    avg_len: HashMap<Field, f64>,
}

impl RankContext {
    fn build(views: &[FieldView], terms: &HashSet<&str>) -> Self {
        let mut doc_freqs = HashMap::new();
        for term in terms {
            let df = views.iter().filter(|v| v.contains(term)).count();
            doc_freqs.insert(term.to_string(), df);
        }

        let n = views.len().max(1) as f64;
        let avg_len = FIELDS
            .iter()
            .map(|&f| {
                let total: usize = views.iter().map(|v| v.field(f).len()).sum();
                (f, total as f64 / n)
            })
            .collect();

        Self {
            total_docs: views.len(),
            doc_freqs,
            avg_len,
        }
    }

    fn idf(&self, term: &str) -> f64 {
        let df = self.doc_freqs.get(term).copied().unwrap_or(0) as f64;
        let n = self.total_docs as f64;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }
}

#[derive(Debug, Clone)]
pub struct Bm25Ranker {
    k1: f64,
    b: f64,
}

impl Default for Bm25Ranker {
    fn default() -> Self {
        Self::from_config(&RankingConfig::default())
    }
}

impl Bm25Ranker {
    pub fn new(k1: f64, b: f64) -> Self {
        Self { k1, b }
    }

    pub fn from_config(config: &RankingConfig) -> Self {
        Self::new(config.k1, config.b)
    }

    /// Overwrite `match_score` on every candidate and sort descending.
    pub fn rank(&self, candidates: Vec<Candidate>, query: &ComposedQuery) -> Vec<Candidate> {
        let views: Vec<FieldView> = candidates.iter().map(FieldView::of).collect();
        let terms: HashSet<&str> = query.tokens().filter(|t| !t.is_empty()).collect();
        let ctx = RankContext::build(&views, &terms);

        let mut scored: Vec<Candidate> = candidates
            .into_iter()
            .zip(&views)
            .map(|(mut candidate, view)| {
                candidate.match_score = self.score(view, query, &ctx);
                candidate
            })
            .collect();

        // Stable: equal scores keep input order.
        scored.sort_by(|a, b| b.match_score.total_cmp(&a.match_score));
        scored
    }

    fn score(&self, view: &FieldView, query: &ComposedQuery, ctx: &RankContext) -> f64 {
        let mut score = 0.0;
        for term in &query.terms {
            if term.text.is_empty() {
                continue;
            }
            let idf = ctx.idf(&term.text);
            for field in FIELDS {
                let tokens = view.field(field);
                let tf = tokens.iter().filter(|t| **t == term.text).count() as f64;
                if tf == 0.0 {
                    continue;
                }
                let avg = ctx.avg_len.get(&field).copied().unwrap_or(0.0);
                let norm = if avg > 0.0 {
                    1.0 - self.b + self.b * tokens.len() as f64 / avg
                } else {
                    1.0
                };
                let saturated = tf * (self.k1 + 1.0) / (tf + self.k1 * norm);
                score += term.weight * idf * query.boost(field) * saturated;
            }
        }
        score
    }
}
