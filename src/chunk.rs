//! Paragraph-boundary text chunker and token estimator.
//!
//! Splits document text into pieces that respect a `max_tokens` limit.
//! Splitting occurs on paragraph boundaries (`\n\n`) to keep each piece
//! coherent; oversized paragraphs are hard-split at the nearest newline or
//! space.
//!
//! # Token estimate
//!
//! All budget arithmetic uses one estimator: `ceil(chars / 4)`, where
//! `chars` counts Unicode scalar values. The estimate is subadditive
//! (`estimate(a + b) <= estimate(a) + estimate(b)`), so summing piece
//! estimates never undercounts the concatenation.
//!
//! # Example
//!
//! ```rust
//! use vault_context::chunk::{chunk_text, estimate_tokens};
//!
//! let chunks = chunk_text("Hello world.\n\nSecond paragraph.", 700);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(estimate_tokens("abcd"), 1);
//! assert_eq!(estimate_tokens("abcde"), 2);
//! ```

/// Approximate characters-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimated LM tokens for `text`: `ceil(chars / 4)`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Truncate `text` so that its estimate does not exceed `max_tokens`.
///
/// Cuts on a character boundary, preferring the last whitespace when one
/// exists in the second half of the allowed window.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> &str {
    let max_chars = max_tokens.saturating_mul(CHARS_PER_TOKEN);
    let cut = match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => byte_idx,
        None => return text,
    };
    let window = &text[..cut];
    match window.rfind(char::is_whitespace) {
        Some(pos) if pos >= cut / 2 => window[..pos].trim_end(),
        _ => window,
    }
}

/// Split text into chunks on paragraph boundaries, respecting `max_tokens`.
///
/// # Guarantees
///
/// - Every returned chunk satisfies `estimate_tokens(chunk) <= max_tokens`
///   (for `max_tokens >= 1`).
/// - Chunks appear in document order; whitespace-only paragraphs are dropped.
/// - Empty or whitespace-only text yields no chunks.
pub fn chunk_text(text: &str, max_tokens: usize) -> Vec<String> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;

    let mut chunks = Vec::new();
    let mut current_buf = String::new();
    let mut current_chars = 0usize;

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }
        let para_chars = trimmed.chars().count();

        // If adding this paragraph would exceed max, flush current buffer
        let would_be = if current_buf.is_empty() {
            para_chars
        } else {
            current_chars + 2 + para_chars
        };

        if would_be > max_chars && !current_buf.is_empty() {
            chunks.push(std::mem::take(&mut current_buf));
            current_chars = 0;
        }

        if para_chars > max_chars {
            hard_split(trimmed, max_chars, &mut chunks);
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
                current_chars += 2;
            }
            current_buf.push_str(trimmed);
            current_chars += para_chars;
        }
    }

    if !current_buf.is_empty() {
        chunks.push(current_buf);
    }

    chunks
}

/// Split an oversized paragraph at `max_chars` boundaries, backing up to a
/// newline or space where possible.
fn hard_split(paragraph: &str, max_chars: usize, out: &mut Vec<String>) {
    let mut remaining = paragraph;
    while !remaining.is_empty() {
        let split_at = match remaining.char_indices().nth(max_chars) {
            Some((byte_idx, _)) => {
                let window = &remaining[..byte_idx];
                window
                    .rfind('\n')
                    .or_else(|| window.rfind(' '))
                    .filter(|&pos| pos > 0)
                    .map(|pos| pos + 1)
                    .unwrap_or(byte_idx)
            }
            None => remaining.len(),
        };
        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        remaining = &remaining[split_at..];
    }
}
