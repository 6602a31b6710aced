//! Vault backend abstraction.
//!
//! The [`VaultBackend`] trait defines the two read operations the
//! aggregator needs: list a directory and read a document. Two
//! implementations ship with the crate:
//!
//! | Backend | Module | Use |
//! |---------|--------|-----|
//! | [`VaultClient`] | here | Local REST API over the resilient [`Transport`] |
//! | [`InMemoryVault`](crate::memory::InMemoryVault) | [`memory`](crate::memory) | Tests and embedding |
//!
//! # Backend HTTP API
//!
//! | Method | Path | Response |
//! |--------|------|----------|
//! | `GET` | `/vault/{dir}/` | `{"files": ["note.md", "sub/"]}`; `/` suffix marks a directory |
//! | `GET` | `/vault/{path}` | Raw document text |
//!
//! All requests carry the bearer credential configured on the transport.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::TransportError;
use crate::metadata::{extract_tags, frontmatter_modified};
use crate::models::{DocumentRef, RawContent};
use crate::transport::{Priority, Transport, TransportResponse};

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultEntry {
    File(String),
    Dir(String),
}

impl VaultEntry {
    /// Parse a listing name: a trailing `/` marks a directory.
    pub fn parse(name: &str) -> Self {
        match name.strip_suffix('/') {
            Some(dir) => VaultEntry::Dir(dir.to_string()),
            None => VaultEntry::File(name.to_string()),
        }
    }
}

/// Read-only access to a vault.
///
/// Paths are vault-relative without a leading `/` (`notes/a.md`); the empty
/// string is the vault root.
#[async_trait]
pub trait VaultBackend: Send + Sync {
    /// List the direct children of `dir`. Names are relative to `dir`.
    async fn list(&self, dir: &str) -> Result<Vec<VaultEntry>, TransportError>;

    /// Fetch the raw text of a document.
    async fn read(&self, path: &str) -> Result<RawContent, TransportError>;
}

#[derive(Debug, Deserialize)]
struct ListingResponse {
    files: Vec<String>,
}

/// HTTP vault backend.
pub struct VaultClient {
    transport: Arc<Transport>,
}

impl VaultClient {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    fn listing_path(dir: &str) -> String {
        let dir = dir.trim_matches('/');
        if dir.is_empty() {
            "/vault/".to_string()
        } else {
            format!("/vault/{}/", dir)
        }
    }

    fn document_path(path: &str) -> String {
        format!("/vault/{}", path.trim_start_matches('/'))
    }
}

#[async_trait]
impl VaultBackend for VaultClient {
    async fn list(&self, dir: &str) -> Result<Vec<VaultEntry>, TransportError> {
        let request_path = Self::listing_path(dir);
        let response = self.transport.get(&request_path, Priority::Medium).await?;
        let listing: ListingResponse =
            serde_json::from_str(&response.body).map_err(|e| TransportError::InvalidResponse {
                path: request_path.clone(),
                message: format!("malformed listing: {}", e),
            })?;
        Ok(listing.files.iter().map(|f| VaultEntry::parse(f)).collect())
    }

    async fn read(&self, path: &str) -> Result<RawContent, TransportError> {
        let request_path = Self::document_path(path);
        let response = self.transport.get(&request_path, Priority::Medium).await?;
        Ok(raw_content(path.trim_start_matches('/'), response))
    }
}

/// Build [`RawContent`] from a fetched body, resolving `modified_at` from
/// the `Last-Modified` header, then frontmatter, then the Unix epoch.
fn raw_content(path: &str, response: TransportResponse) -> RawContent {
    let modified_at = response
        .last_modified
        .or_else(|| frontmatter_modified(&response.body))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    let tags = extract_tags(&response.body);
    RawContent {
        doc: DocumentRef::new(path, modified_at),
        text: response.body,
        tags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_entry_parse() {
        assert_eq!(VaultEntry::parse("a.md"), VaultEntry::File("a.md".into()));
        assert_eq!(VaultEntry::parse("notes/"), VaultEntry::Dir("notes".into()));
    }

    #[test]
    fn test_request_paths() {
        assert_eq!(VaultClient::listing_path(""), "/vault/");
        assert_eq!(VaultClient::listing_path("notes/daily/"), "/vault/notes/daily/");
        assert_eq!(VaultClient::document_path("/notes/a.md"), "/vault/notes/a.md");
    }

    #[test]
    fn test_raw_content_modified_resolution() {
        let header_time = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let body = "---\nmodified: 2020-01-01\ntags: [x]\n---\ntext".to_string();

        let from_header = raw_content(
            "a.md",
            TransportResponse {
                body: body.clone(),
                status: 200,
                last_modified: Some(header_time),
            },
        );
        assert_eq!(from_header.doc.modified_at, header_time);
        assert_eq!(from_header.tags, vec!["x"]);

        let from_front = raw_content(
            "a.md",
            TransportResponse {
                body,
                status: 200,
                last_modified: None,
            },
        );
        assert_eq!(
            from_front.doc.modified_at,
            Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
        );

        let fallback = raw_content(
            "b.md",
            TransportResponse {
                body: "plain".to_string(),
                status: 200,
                last_modified: None,
            },
        );
        assert_eq!(fallback.doc.modified_at, DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(fallback.doc.name, "b.md");
    }
}
