//! Metadata booster: multiplicative re-scoring by path prefix and tag.
//!
//! Rules are fixed when the booster is built. Every matching rule multiplies
//! the score, so two matching rules of ×1.5 and ×2.0 yield ×3.0. Candidates
//! matching no rule pass through with their score untouched. The booster
//! never adds or removes candidates.

use crate::config::BoostConfig;
use crate::metadata::normalize_tag;
use crate::models::Candidate;

/// Multiply the score of documents under `prefix`.
///
/// Matching is by whole path segments: `reference` covers `reference/a.md`
/// but not `reference-archive/a.md`.
#[derive(Debug, Clone, PartialEq)]
pub struct PathRule {
    /// Stored without leading or trailing `/`.
    pub prefix: String,
    pub multiplier: f64,
}

impl PathRule {
    pub fn new(prefix: &str, multiplier: f64) -> Self {
        Self {
            prefix: prefix.trim_matches('/').to_string(),
            multiplier,
        }
    }

    fn matches(&self, candidate: &Candidate) -> bool {
        let path = candidate.path();
        self.prefix.is_empty()
            || path == self.prefix
            || path
                .strip_prefix(self.prefix.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// Multiply the score of documents carrying `tag`.
#[derive(Debug, Clone, PartialEq)]
pub struct TagRule {
    /// Normalised: lowercase, no `#`.
    pub tag: String,
    pub multiplier: f64,
}

impl TagRule {
    pub fn new(tag: &str, multiplier: f64) -> Self {
        Self {
            tag: normalize_tag(tag),
            multiplier,
        }
    }

    fn matches(&self, candidate: &Candidate) -> bool {
        candidate.content.tags.iter().any(|t| *t == self.tag)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetadataBooster {
    path_rules: Vec<PathRule>,
    tag_rules: Vec<TagRule>,
}

impl MetadataBooster {
    pub fn new(path_rules: Vec<PathRule>, tag_rules: Vec<TagRule>) -> Self {
        Self {
            path_rules,
            tag_rules,
        }
    }

    pub fn from_config(config: &BoostConfig) -> Self {
        Self::new(
            config
                .path_rules
                .iter()
                .map(|r| PathRule::new(&r.prefix, r.multiplier))
                .collect(),
            config
                .tag_rules
                .iter()
                .map(|r| TagRule::new(&r.tag, r.multiplier))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.path_rules.is_empty() && self.tag_rules.is_empty()
    }

    /// Product of every rule multiplier that applies to `candidate`.
    pub fn multiplier_for(&self, candidate: &Candidate) -> f64 {
        let path: f64 = self
            .path_rules
            .iter()
            .filter(|r| r.matches(candidate))
            .map(|r| r.multiplier)
            .product();
        let tag: f64 = self
            .tag_rules
            .iter()
            .filter(|r| r.matches(candidate))
            .map(|r| r.multiplier)
            .product();
        path * tag
    }

    /// Apply every rule and re-sort by score, keeping input order on ties.
    pub fn boost(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        if self.is_empty() {
            return candidates;
        }

        let mut boosted: Vec<Candidate> = candidates
            .into_iter()
            .map(|mut c| {
                let multiplier = self.multiplier_for(&c);
                if multiplier != 1.0 {
                    tracing::trace!(path = %c.path(), multiplier, "boosted");
                    c.match_score *= multiplier;
                }
                c
            })
            .collect();
        boosted.sort_by(|a, b| b.match_score.total_cmp(&a.match_score));
        boosted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentRef, MatchType, RawContent};
    use chrono::Utc;

    fn candidate(path: &str, tags: &[&str], score: f64) -> Candidate {
        let mut c = Candidate::new(
            RawContent {
                doc: DocumentRef::new(path, Utc::now()),
                text: String::new(),
                tags: tags.iter().map(|t| t.to_string()).collect(),
            },
            MatchType::ContentMatch,
        );
        c.match_score = score;
        c
    }

    #[test]
    fn test_rules_compose_by_multiplication() {
        let booster = MetadataBooster::new(
            vec![PathRule::new("/reference/", 1.5)],
            vec![TagRule::new("#Important", 2.0)],
        );
        let out = booster.boost(vec![
            candidate("reference/a.md", &["important"], 1.0),
            candidate("reference/b.md", &[], 1.0),
            candidate("notes/c.md", &["important"], 1.0),
            candidate("notes/d.md", &[], 1.0),
        ]);

        let score = |p: &str| out.iter().find(|c| c.path() == p).unwrap().match_score;
        assert_eq!(score("reference/a.md"), 3.0);
        assert_eq!(score("reference/b.md"), 1.5);
        assert_eq!(score("notes/c.md"), 2.0);
        assert_eq!(score("notes/d.md"), 1.0);
        assert_eq!(out[0].path(), "reference/a.md");
    }

    #[test]
    fn test_preserves_membership() {
        let booster = MetadataBooster::new(vec![PathRule::new("x/", 10.0)], vec![]);
        let input = vec![
            candidate("a.md", &[], 3.0),
            candidate("x/b.md", &[], 1.0),
            candidate("c.md", &[], 0.0),
        ];
        let out = booster.boost(input);
        assert_eq!(out.len(), 3);
        let paths: Vec<&str> = out.iter().map(|c| c.path()).collect();
        assert_eq!(paths, vec!["x/b.md", "a.md", "c.md"]);
    }

    #[test]
    fn test_path_rule_matches_whole_segments() {
        let booster = MetadataBooster::new(vec![PathRule::new("reference", 2.0)], vec![]);
        assert_eq!(booster.multiplier_for(&candidate("reference/a.md", &[], 1.0)), 2.0);
        assert_eq!(booster.multiplier_for(&candidate("reference/deep/b.md", &[], 1.0)), 2.0);
        assert_eq!(
            booster.multiplier_for(&candidate("reference-archive/a.md", &[], 1.0)),
            1.0
        );
        assert_eq!(booster.multiplier_for(&candidate("referenced.md", &[], 1.0)), 1.0);

        let file_rule = MetadataBooster::new(vec![PathRule::new("notes/todo.md", 3.0)], vec![]);
        assert_eq!(file_rule.multiplier_for(&candidate("notes/todo.md", &[], 1.0)), 3.0);
        assert_eq!(file_rule.multiplier_for(&candidate("notes/todo.md.bak", &[], 1.0)), 1.0);
        assert_eq!(PathRule::new("/reference/", 1.0).prefix, "reference");
    }

    #[test]
    fn test_no_rules_is_identity() {
        let input = vec![candidate("b.md", &[], 0.5), candidate("a.md", &[], 2.0)];
        let out = MetadataBooster::default().boost(input.clone());
        assert_eq!(out, input);
    }

    #[test]
    fn test_from_config() {
        let config = crate::config::parse_config(
            "[boost]\npath_rules = [{ prefix = \"ref/\", multiplier = 1.5 }]\ntag_rules = [{ tag = \"#Key\", multiplier = 2.0 }]",
        )
        .unwrap();
        let booster = MetadataBooster::from_config(&config.boost);
        assert_eq!(booster.multiplier_for(&candidate("ref/x.md", &["key"], 1.0)), 3.0);
    }
}
