//! Context assembler: greedy packing of candidate chunks into a token budget.
//!
//! Candidates are visited in descending score order (ties in input order).
//! Each body is split with [`chunk_text`] into pieces of at most
//! `chunk_size` estimated tokens, and pieces are appended until the next one
//! would overflow `max_tokens`. The first piece of every source is preceded
//! by a `### {path}` header line; headers and the blank-line separators count
//! against the budget.
//!
//! The result never exceeds `max_tokens`. If the very first piece alone is
//! too large it is truncated to fit, so a non-empty candidate list with a
//! positive budget always yields non-empty content.

use crate::chunk::{chunk_text, estimate_tokens, truncate_to_tokens};
use crate::models::{AssembledContext, Candidate};

const SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, Copy)]
pub struct ContextAssembler {
    max_tokens: usize,
    chunk_size: usize,
}

impl ContextAssembler {
    pub fn new(max_tokens: usize, chunk_size: usize) -> Self {
        Self {
            max_tokens,
            chunk_size,
        }
    }

    pub fn assemble(&self, candidates: &[Candidate]) -> AssembledContext {
        if self.max_tokens == 0 || candidates.is_empty() {
            return AssembledContext::empty();
        }

        let mut order: Vec<&Candidate> = candidates.iter().collect();
        order.sort_by(|a, b| b.match_score.total_cmp(&a.match_score));

        // Zero scores are noise once anything actually matched.
        if order.iter().any(|c| c.match_score > 0.0) {
            order.retain(|c| c.match_score > 0.0);
        }

        let mut content = String::new();
        let mut used = 0usize;
        let mut sources = Vec::new();

        'candidates: for candidate in order {
            let chunks = chunk_text(candidate.text(), self.chunk_size);
            for (i, chunk) in chunks.iter().enumerate() {
                let piece = if i == 0 {
                    format!("### {}{}{}", candidate.path(), SEPARATOR, chunk)
                } else {
                    chunk.clone()
                };
                let separator_cost = if content.is_empty() {
                    0
                } else {
                    estimate_tokens(SEPARATOR)
                };
                let cost = separator_cost + estimate_tokens(&piece);

                if used + cost > self.max_tokens {
                    if content.is_empty() {
                        content.push_str(truncate_to_tokens(&piece, self.max_tokens));
                        sources.push(candidate.doc().clone());
                    }
                    break 'candidates;
                }

                if !content.is_empty() {
                    content.push_str(SEPARATOR);
                }
                content.push_str(&piece);
                used += cost;
                if i == 0 {
                    sources.push(candidate.doc().clone());
                }
            }
        }

        let token_count = estimate_tokens(&content);
        tracing::debug!(
            tokens = token_count,
            budget = self.max_tokens,
            sources = sources.len(),
            "context assembled"
        );

        AssembledContext {
            budget_used_percent: token_count as f64 / self.max_tokens as f64 * 100.0,
            content,
            token_count,
            sources,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentRef, MatchType, RawContent};
    use chrono::Utc;

    fn candidate(path: &str, text: &str, score: f64) -> Candidate {
        let mut c = Candidate::new(
            RawContent {
                doc: DocumentRef::new(path, Utc::now()),
                text: text.to_string(),
                tags: Vec::new(),
            },
            MatchType::ContentMatch,
        );
        c.match_score = score;
        c
    }

    fn paragraphs(n: usize, words_each: usize) -> String {
        (0..n)
            .map(|p| {
                (0..words_each)
                    .map(|w| format!("p{}w{}", p, w))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[test]
    fn test_never_exceeds_budget() {
        let candidates = vec![
            candidate("a.md", &paragraphs(20, 30), 3.0),
            candidate("b.md", &paragraphs(10, 50), 2.0),
            candidate("c.md", "short note", 1.0),
        ];
        for max_tokens in [1, 5, 17, 64, 100, 333, 1000, 10_000] {
            for chunk_size in [1, 8, 50, 512] {
                let ctx = ContextAssembler::new(max_tokens, chunk_size).assemble(&candidates);
                assert!(
                    ctx.token_count <= max_tokens,
                    "{} > {} (chunk_size {})",
                    ctx.token_count,
                    max_tokens,
                    chunk_size
                );
                assert!(!ctx.content.is_empty());
                assert!(ctx.budget_used_percent <= 100.0);
            }
        }
    }

    #[test]
    fn test_zero_budget_is_empty_not_error() {
        let candidates = vec![candidate("a.md", "some text", 1.0)];
        let ctx = ContextAssembler::new(0, 512).assemble(&candidates);
        assert!(ctx.content.is_empty());
        assert_eq!(ctx.token_count, 0);
        assert_eq!(ctx.budget_used_percent, 0.0);
        assert!(ctx.sources.is_empty());
    }

    #[test]
    fn test_sources_listed_once_in_score_order() {
        let candidates = vec![
            candidate("low.md", "low body", 1.0),
            candidate("high.md", &paragraphs(3, 5), 2.0),
        ];
        let ctx = ContextAssembler::new(10_000, 8).assemble(&candidates);
        let paths: Vec<&str> = ctx.sources.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["high.md", "low.md"]);
        assert!(ctx.content.starts_with("### high.md\n\n"));
        assert_eq!(ctx.content.matches("### high.md").count(), 1);
        assert!(ctx.content.contains("### low.md"));
    }

    #[test]
    fn test_first_chunk_truncated_to_fit() {
        let big = "word ".repeat(400);
        let ctx = ContextAssembler::new(10, 512).assemble(&[candidate("big.md", &big, 1.0)]);
        assert!(ctx.token_count <= 10);
        assert!(ctx.content.starts_with("### big.md"));
        assert_eq!(ctx.sources.len(), 1);
    }

    #[test]
    fn test_stops_at_first_overflow() {
        let candidates = vec![
            candidate("a.md", "alpha body", 3.0),
            candidate("b.md", &"long ".repeat(200), 2.0),
            candidate("c.md", "tiny", 1.0),
        ];
        let ctx = ContextAssembler::new(20, 512).assemble(&candidates);
        let paths: Vec<&str> = ctx.sources.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["a.md"]);
    }

    #[test]
    fn test_zero_scores_skipped_when_others_match() {
        let candidates = vec![
            candidate("hit.md", "hit", 1.0),
            candidate("miss.md", "miss", 0.0),
        ];
        let ctx = ContextAssembler::new(1000, 512).assemble(&candidates);
        assert_eq!(ctx.sources.len(), 1);

        let all_zero = vec![candidate("x.md", "x", 0.0), candidate("y.md", "y", 0.0)];
        let ctx = ContextAssembler::new(1000, 512).assemble(&all_zero);
        assert_eq!(ctx.sources.len(), 2);
    }

    #[test]
    fn test_budget_percent() {
        let ctx = ContextAssembler::new(100, 512).assemble(&[candidate("a.md", "abcd", 1.0)]);
        // "### a.md\n\nabcd" = 14 chars = 4 tokens
        assert_eq!(ctx.token_count, 4);
        assert_eq!(ctx.budget_used_percent, 4.0);
    }

    #[test]
    fn test_empty_candidates() {
        let ctx = ContextAssembler::new(100, 512).assemble(&[]);
        assert!(ctx.is_empty());
    }
}
