//! Streaming merger.
//!
//! Reassembles [`StreamChunk`]s that may arrive out of order into a single
//! ordered byte stream. Chunks are merged strictly by `index`; a missing
//! index is an error, never silently skipped. The stream terminates once a
//! chunk with `complete = true` has been merged, and anything after it is
//! ignored.
//!
//! Two entry points:
//! - [`merge`] for a batch of chunks already collected.
//! - [`StreamMerger`] for incremental use while chunks are still arriving
//!   (the transport feeds response bodies through it).

use std::collections::BTreeMap;

use crate::error::MergeError;
use crate::models::StreamChunk;

/// Result of a completed merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedResult {
    pub content: Vec<u8>,
    /// Size of `content` in bytes.
    pub size: usize,
    /// Number of chunks merged, including the completing chunk.
    pub chunks: u64,
}

impl MergedResult {
    /// Decode the merged bytes as UTF-8.
    pub fn into_string(self) -> Result<String, MergeError> {
        String::from_utf8(self.content).map_err(|e| MergeError::InvalidUtf8(e.to_string()))
    }
}

/// Merge a batch of chunks in `index` order.
///
/// # Errors
///
/// - [`MergeError::Gap`] if an index before the completing chunk is missing.
/// - [`MergeError::Conflict`] if one index appears twice with different data.
/// - [`MergeError::Incomplete`] if no completing chunk is reachable.
pub fn merge(chunks: Vec<StreamChunk>) -> Result<MergedResult, MergeError> {
    let mut merger = StreamMerger::new();
    for chunk in chunks {
        if merger.push(chunk)? {
            break;
        }
    }
    merger.finish()
}

/// Incremental merger for chunks that arrive one by one.
#[derive(Debug, Default)]
pub struct StreamMerger {
    pending: BTreeMap<u64, StreamChunk>,
    next_index: u64,
    buffer: Vec<u8>,
    complete: bool,
    max_bytes: Option<usize>,
}

impl StreamMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merger that stops accepting data once `max_bytes` have been merged
    /// or buffered.
    pub fn with_limit(max_bytes: usize) -> Self {
        Self {
            max_bytes: Some(max_bytes),
            ..Self::default()
        }
    }

    /// Accept a chunk. Returns `true` once the stream is complete.
    ///
    /// Chunks pushed after completion are ignored.
    pub fn push(&mut self, chunk: StreamChunk) -> Result<bool, MergeError> {
        if self.complete || chunk.index < self.next_index {
            return Ok(self.complete);
        }

        if let Some(existing) = self.pending.get(&chunk.index) {
            if existing.data != chunk.data || existing.complete != chunk.complete {
                return Err(MergeError::Conflict { index: chunk.index });
            }
            return Ok(false);
        }
        self.pending.insert(chunk.index, chunk);

        while let Some(next) = self.pending.remove(&self.next_index) {
            self.buffer.extend_from_slice(&next.data);
            self.next_index += 1;
            if next.complete {
                self.complete = true;
                self.pending.clear();
                break;
            }
        }

        Ok(self.complete)
    }

    /// Bytes merged so far plus bytes waiting on a missing index.
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len() + self.pending.values().map(|c| c.data.len()).sum::<usize>()
    }

    /// Whether the configured byte limit has been exceeded.
    pub fn exceeds_limit(&self) -> bool {
        self.max_bytes
            .is_some_and(|limit| self.buffered_bytes() > limit)
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Finish the merge, reporting gaps or a missing completion marker.
    pub fn finish(self) -> Result<MergedResult, MergeError> {
        if !self.complete {
            if let Some(&found) = self.pending.keys().next() {
                return Err(MergeError::Gap {
                    expected: self.next_index,
                    found,
                });
            }
            return Err(MergeError::Incomplete {
                merged: self.next_index,
            });
        }

        let size = self.buffer.len();
        Ok(MergedResult {
            content: self.buffer,
            size,
            chunks: self.next_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(index: u64, data: &str, complete: bool) -> StreamChunk {
        StreamChunk::new(index, data.as_bytes().to_vec(), complete)
    }

    #[test]
    fn test_out_of_order_matches_in_order() {
        let shuffled = merge(vec![
            chunk(1, "beta ", false),
            chunk(0, "alpha ", false),
            chunk(2, "gamma", true),
        ])
        .unwrap();
        let ordered = merge(vec![
            chunk(0, "alpha ", false),
            chunk(1, "beta ", false),
            chunk(2, "gamma", true),
        ])
        .unwrap();
        assert_eq!(shuffled, ordered);
        assert_eq!(shuffled.clone().into_string().unwrap(), "alpha beta gamma");
        assert_eq!(shuffled.size, 16);
        assert_eq!(shuffled.chunks, 3);
    }

    #[test]
    fn test_gap_is_error() {
        let err = merge(vec![chunk(0, "a", false), chunk(2, "c", true)]).unwrap_err();
        assert_eq!(
            err,
            MergeError::Gap {
                expected: 1,
                found: 2
            }
        );
    }

    #[test]
    fn test_missing_complete_is_error() {
        let err = merge(vec![chunk(0, "a", false), chunk(1, "b", false)]).unwrap_err();
        assert_eq!(err, MergeError::Incomplete { merged: 2 });

        let err = merge(Vec::new()).unwrap_err();
        assert_eq!(err, MergeError::Incomplete { merged: 0 });
    }

    #[test]
    fn test_trailing_chunks_after_complete_ignored() {
        let merged = merge(vec![
            chunk(0, "a", false),
            chunk(1, "b", true),
            chunk(2, "ignored", false),
            chunk(5, "ignored too", true),
        ])
        .unwrap();
        assert_eq!(merged.into_string().unwrap(), "ab");
    }

    #[test]
    fn test_complete_chunk_arriving_before_gap_fill() {
        // Completion is only observed once the ordered sequence reaches it.
        let mut merger = StreamMerger::new();
        assert!(!merger.push(chunk(2, "c", true)).unwrap());
        assert!(!merger.push(chunk(0, "a", false)).unwrap());
        assert!(merger.push(chunk(1, "b", false)).unwrap());
        assert_eq!(merger.finish().unwrap().into_string().unwrap(), "abc");
    }

    #[test]
    fn test_duplicate_chunks() {
        let merged = merge(vec![
            chunk(0, "a", false),
            chunk(0, "a", false),
            chunk(1, "b", true),
        ])
        .unwrap();
        assert_eq!(merged.into_string().unwrap(), "ab");

        let mut merger = StreamMerger::new();
        merger.push(chunk(1, "x", false)).unwrap();
        let err = merger.push(chunk(1, "y", false)).unwrap_err();
        assert_eq!(err, MergeError::Conflict { index: 1 });
    }

    #[test]
    fn test_utf8_split_across_chunks() {
        let bytes = "héllo".as_bytes();
        let merged = merge(vec![
            StreamChunk::new(1, bytes[2..].to_vec(), true),
            StreamChunk::new(0, bytes[..2].to_vec(), false),
        ])
        .unwrap();
        assert_eq!(merged.into_string().unwrap(), "héllo");
    }

    #[test]
    fn test_limit_tracking() {
        let mut merger = StreamMerger::with_limit(4);
        merger.push(chunk(0, "abc", false)).unwrap();
        assert!(!merger.exceeds_limit());
        merger.push(chunk(2, "de", false)).unwrap();
        assert!(merger.exceeds_limit());
    }
}
