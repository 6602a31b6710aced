//! In-memory [`VaultBackend`] implementation for tests and embedding.
//!
//! Documents live in a `BTreeMap` behind `std::sync::RwLock`. Directory
//! listings are derived from document paths. Individual paths can be marked
//! as failing to exercise error propagation without a network.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::TransportError;
use crate::metadata::extract_tags;
use crate::models::{DocumentRef, RawContent};
use crate::vault::{VaultBackend, VaultEntry};

struct StoredDoc {
    text: String,
    modified_at: DateTime<Utc>,
}

/// In-memory vault.
pub struct InMemoryVault {
    docs: RwLock<BTreeMap<String, StoredDoc>>,
    failing: RwLock<HashSet<String>>,
    reads: AtomicUsize,
}

impl InMemoryVault {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(BTreeMap::new()),
            failing: RwLock::new(HashSet::new()),
            reads: AtomicUsize::new(0),
        }
    }

    /// Insert or replace a document.
    pub fn insert(&self, path: &str, text: &str, modified_at: DateTime<Utc>) {
        let mut docs = self.docs.write().unwrap_or_else(|e| e.into_inner());
        docs.insert(
            path.trim_start_matches('/').to_string(),
            StoredDoc {
                text: text.to_string(),
                modified_at,
            },
        );
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with_doc(self, path: &str, text: &str, modified_at: DateTime<Utc>) -> Self {
        self.insert(path, text, modified_at);
        self
    }

    /// Make reads of `path` (or listings of it, for a directory) fail with a
    /// 503-style transport error.
    pub fn fail_path(&self, path: &str) {
        let mut failing = self.failing.write().unwrap_or_else(|e| e.into_inner());
        failing.insert(path.trim_matches('/').to_string());
    }

    /// Number of successful and failed `read` calls so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    fn check_failing(&self, path: &str) -> Result<(), TransportError> {
        let failing = self.failing.read().unwrap_or_else(|e| e.into_inner());
        if failing.contains(path.trim_matches('/')) {
            return Err(TransportError::Status {
                path: path.to_string(),
                status: 503,
            });
        }
        Ok(())
    }
}

impl Default for InMemoryVault {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VaultBackend for InMemoryVault {
    async fn list(&self, dir: &str) -> Result<Vec<VaultEntry>, TransportError> {
        self.check_failing(dir)?;
        let dir = dir.trim_matches('/');
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{}/", dir)
        };

        let docs = self.docs.read().unwrap_or_else(|e| e.into_inner());
        let mut files = BTreeSet::new();
        let mut dirs = BTreeSet::new();
        for path in docs.keys() {
            let Some(rest) = path.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((child, _)) => {
                    dirs.insert(child.to_string());
                }
                None => {
                    files.insert(rest.to_string());
                }
            }
        }

        if !prefix.is_empty() && files.is_empty() && dirs.is_empty() {
            return Err(TransportError::Status {
                path: format!("/vault/{}", prefix),
                status: 404,
            });
        }

        Ok(dirs
            .into_iter()
            .map(VaultEntry::Dir)
            .chain(files.into_iter().map(VaultEntry::File))
            .collect())
    }

    async fn read(&self, path: &str) -> Result<RawContent, TransportError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.check_failing(path)?;
        let key = path.trim_start_matches('/');
        let docs = self.docs.read().unwrap_or_else(|e| e.into_inner());
        let stored = docs.get(key).ok_or_else(|| TransportError::Status {
            path: format!("/vault/{}", key),
            status: 404,
        })?;
        Ok(RawContent {
            doc: DocumentRef::new(key, stored.modified_at),
            text: stored.text.clone(),
            tags: extract_tags(&stored.text),
        })
    }
}
