//! Core data models used throughout the retrieval pipeline.
//!
//! These types represent the documents, candidates, and assembled context
//! that flow from the vault through ranking and into the final context.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Identity of a stored vault item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DocumentRef {
    /// Vault-relative path, unique and stable within the vault.
    pub path: String,
    /// Display label (file name).
    pub name: String,
    /// Last modification time; source of truth for freshness ordering.
    pub modified_at: DateTime<Utc>,
}

impl DocumentRef {
    /// Build a reference from a vault path, deriving the display name from
    /// its last segment.
    pub fn new(path: impl Into<String>, modified_at: DateTime<Utc>) -> Self {
        let path = path.into();
        let name = path.rsplit('/').next().unwrap_or(&path).to_string();
        Self {
            path,
            name,
            modified_at,
        }
    }

    /// File name without its extension (`notes/logica-notes.md` → `logica-notes`).
    pub fn stem(&self) -> &str {
        match self.name.rfind('.') {
            Some(pos) if pos > 0 => &self.name[..pos],
            _ => &self.name,
        }
    }
}

/// The text of a document plus its identity and extracted tags.
#[derive(Debug, Clone, PartialEq)]
pub struct RawContent {
    pub doc: DocumentRef,
    pub text: String,
    /// Lowercased tags without the leading `#`.
    pub tags: Vec<String>,
}

/// Where the aggregator found the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchType {
    FilenameMatch,
    ContentMatch,
}

impl std::fmt::Display for MatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchType::FilenameMatch => f.write_str("filename-match"),
            MatchType::ContentMatch => f.write_str("content-match"),
        }
    }
}

/// A scored unit of retrieval.
///
/// Each stage consumes a `Vec<Candidate>` and returns a new one; only
/// `match_score` changes between ranking stages. Scores are comparable
/// within one search run only.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub content: RawContent,
    pub match_type: MatchType,
    pub match_score: f64,
}

impl Candidate {
    pub fn new(content: RawContent, match_type: MatchType) -> Self {
        Self {
            content,
            match_type,
            match_score: 0.0,
        }
    }

    pub fn doc(&self) -> &DocumentRef {
        &self.content.doc
    }

    pub fn path(&self) -> &str {
        &self.content.doc.path
    }

    pub fn text(&self) -> &str {
        &self.content.text
    }
}

/// The pipeline's final artifact. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssembledContext {
    pub content: String,
    /// Estimated LM tokens in `content` (see [`crate::chunk::estimate_tokens`]).
    pub token_count: usize,
    pub budget_used_percent: f64,
    /// Contributing documents, in inclusion order, each listed once.
    pub sources: Vec<DocumentRef>,
}

impl AssembledContext {
    pub fn empty() -> Self {
        Self {
            content: String::new(),
            token_count: 0,
            budget_used_percent: 0.0,
            sources: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// One piece of a chunked or streamed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub data: Vec<u8>,
    /// Position in the logical stream, starting at 0.
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    /// Marks the last chunk of the stream.
    pub complete: bool,
}

impl StreamChunk {
    pub fn new(index: u64, data: impl Into<Vec<u8>>, complete: bool) -> Self {
        Self {
            data: data.into(),
            index,
            timestamp: Utc::now(),
            complete,
        }
    }
}
