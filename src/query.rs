//! Tokenizer and query composer.
//!
//! [`tokenize`] is shared by every stage that compares text (composer,
//! aggregator, ranker, deduplicator) so that "a term" means the same thing
//! everywhere: a UAX#29 word, lowercased.
//!
//! [`QueryComposer::compose`] turns a raw query into a [`ComposedQuery`]:
//!
//! 1. Tokenize and lowercase.
//! 2. Drop stopwords, unless that would leave nothing.
//! 3. Deduplicate, keeping first-seen order.
//! 4. Append singular/plural variants of each token at reduced weight.
//! 5. Attach field boosts (title > tags > body by default).

use serde::Serialize;
use std::collections::BTreeMap;
use unicode_segmentation::UnicodeSegmentation;

use crate::config::RankingConfig;

/// Weight of a morphological variant relative to an original token.
pub const EXPANSION_WEIGHT: f64 = 0.5;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is", "it",
    "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there", "these",
    "they", "this", "to", "was", "will", "with",
];

/// Split text into lowercase words.
///
/// ```
/// use vault_context::query::tokenize;
///
/// assert_eq!(tokenize("Logica-Notes, v2!"), vec!["logica", "notes", "v2"]);
/// ```
pub fn tokenize(text: &str) -> Vec<String> {
    text.unicode_words().map(|w| w.to_lowercase()).collect()
}

fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token)
}

/// Logical document fields that scoring distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Title,
    Tags,
    Body,
}

/// One token of a composed query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryTerm {
    pub text: String,
    pub weight: f64,
    /// True for generated variants, false for tokens typed by the caller.
    pub expansion: bool,
}

/// Output of the composer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComposedQuery {
    pub raw: String,
    /// Original tokens first, then expansions. Never empty.
    pub terms: Vec<QueryTerm>,
    /// Boost multiplier per field. Empty for a list-all query.
    pub field_boosts: BTreeMap<Field, f64>,
}

impl ComposedQuery {
    /// Token texts, originals first.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.terms.iter().map(|t| t.text.as_str())
    }

    /// Tokens the caller actually typed.
    pub fn original_tokens(&self) -> impl Iterator<Item = &str> {
        self.terms
            .iter()
            .filter(|t| !t.expansion)
            .map(|t| t.text.as_str())
    }

    /// An empty query composes to a single empty token: list everything.
    pub fn is_list_all(&self) -> bool {
        self.terms.len() == 1 && self.terms[0].text.is_empty()
    }

    /// Boost for `field`; `1.0` when no boost is configured.
    pub fn boost(&self, field: Field) -> f64 {
        self.field_boosts.get(&field).copied().unwrap_or(1.0)
    }
}

#[derive(Debug, Clone)]
pub struct QueryComposer {
    field_boosts: BTreeMap<Field, f64>,
    expand: bool,
}

impl Default for QueryComposer {
    fn default() -> Self {
        Self::from_config(&RankingConfig::default())
    }
}

impl QueryComposer {
    pub fn from_config(config: &RankingConfig) -> Self {
        let field_boosts = BTreeMap::from([
            (Field::Title, config.title_boost),
            (Field::Tags, config.tags_boost),
            (Field::Body, config.body_boost),
        ]);
        Self {
            field_boosts,
            expand: true,
        }
    }

    /// Override the boost for one field.
    pub fn with_boost(mut self, field: Field, boost: f64) -> Self {
        self.field_boosts.insert(field, boost);
        self
    }

    /// Enable or disable morphological expansion.
    pub fn with_expansion(mut self, expand: bool) -> Self {
        self.expand = expand;
        self
    }

    pub fn compose(&self, query: &str) -> ComposedQuery {
        let raw = query.to_string();
        let trimmed = query.trim();

        if trimmed.is_empty() {
            return ComposedQuery {
                raw,
                terms: vec![QueryTerm {
                    text: String::new(),
                    weight: 1.0,
                    expansion: false,
                }],
                field_boosts: BTreeMap::new(),
            };
        }

        let tokens = tokenize(trimmed);
        let content: Vec<String> = tokens
            .iter()
            .filter(|t| !is_stopword(t))
            .cloned()
            .collect();
        let mut originals = if content.is_empty() { tokens } else { content };
        if originals.is_empty() {
            // Punctuation-only query: keep it verbatim as the only token.
            originals.push(trimmed.to_lowercase());
        }

        let mut terms: Vec<QueryTerm> = Vec::new();
        for token in originals {
            if !terms.iter().any(|t| t.text == token) {
                terms.push(QueryTerm {
                    text: token,
                    weight: 1.0,
                    expansion: false,
                });
            }
        }

        if self.expand {
            let originals: Vec<String> = terms.iter().map(|t| t.text.clone()).collect();
            for token in &originals {
                for variant in variants(token) {
                    if !terms.iter().any(|t| t.text == variant) {
                        terms.push(QueryTerm {
                            text: variant,
                            weight: EXPANSION_WEIGHT,
                            expansion: true,
                        });
                    }
                }
            }
        }

        ComposedQuery {
            raw,
            terms,
            field_boosts: self.field_boosts.clone(),
        }
    }
}

/// Singular/plural variants of an English-looking token.
fn variants(token: &str) -> Vec<String> {
    let alphabetic = token.chars().all(|c| c.is_alphabetic());
    if token.chars().count() < 3 || !alphabetic {
        return Vec::new();
    }

    if let Some(stem) = token.strip_suffix("ies") {
        if stem.chars().count() >= 2 {
            return vec![format!("{}y", stem)];
        }
    }
    for suffix in ["sses", "shes", "ches", "xes", "zes"] {
        if token.ends_with(suffix) {
            return vec![token[..token.len() - 2].to_string()];
        }
    }
    if token.ends_with("ss") || token.ends_with("us") || token.ends_with("is") {
        return vec![format!("{}es", token)];
    }
    if let Some(stem) = token.strip_suffix('s') {
        return vec![stem.to_string()];
    }

    if let Some(stem) = token.strip_suffix('y') {
        let before = stem.chars().last();
        if before.is_some_and(|c| !"aeiou".contains(c)) {
            return vec![format!("{}ies", stem)];
        }
    }
    if ["x", "z", "ch", "sh"].iter().any(|s| token.ends_with(s)) {
        return vec![format!("{}es", token)];
    }
    vec![format!("{}s", token)]
}
