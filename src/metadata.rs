//! Structural metadata extracted from note text.
//!
//! Notes may start with a `---` delimited frontmatter block. Tags are read
//! from a frontmatter `tags:` key (inline `[a, b]`, comma list, or YAML block
//! list) and from inline `#tag` tokens in the body. Modification dates are
//! read from `modified:` or `updated:` keys when the backend does not supply
//! a `Last-Modified` header.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

static INLINE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)#([\p{L}\p{N}_][\p{L}\p{N}_/-]*)").unwrap());
static FRONTMATTER_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_-]*)\s*:\s*(.*)$").unwrap());

/// Split a note into its frontmatter block (without delimiters) and body.
pub fn split_frontmatter(text: &str) -> (Option<&str>, &str) {
    let rest = match text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))
    {
        Some(rest) => rest,
        None => return (None, text),
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let front = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return (Some(front), body);
        }
        offset += line.len();
    }
    (None, text)
}

/// Collect normalized tags (lowercase, no `#`), deduplicated in first-seen order.
pub fn extract_tags(text: &str) -> Vec<String> {
    let (front, body) = split_frontmatter(text);
    let mut tags: Vec<String> = Vec::new();

    if let Some(front) = front {
        for raw in frontmatter_list(front, "tags") {
            push_tag(&mut tags, &raw);
        }
    }

    for line in body.lines() {
        // Markdown headings are not tags.
        if line.trim_start().starts_with("# ") {
            continue;
        }
        for cap in INLINE_TAG.captures_iter(line) {
            // Purely numeric tokens (`#42`) are issue references, not tags.
            if cap[1].chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            push_tag(&mut tags, &cap[1]);
        }
    }

    tags
}

/// Normalize a tag for comparison: trim, strip `#`, lowercase.
pub fn normalize_tag(tag: &str) -> String {
    tag.trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim_start_matches('#')
        .to_lowercase()
}

fn push_tag(tags: &mut Vec<String>, raw: &str) {
    let tag = normalize_tag(raw);
    if !tag.is_empty() && !tags.contains(&tag) {
        tags.push(tag);
    }
}

/// Read a list-valued frontmatter key in any of the common layouts.
fn frontmatter_list(front: &str, key: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut in_block = false;

    for line in front.lines() {
        if in_block {
            if let Some(item) = line.trim_start().strip_prefix("- ") {
                values.push(item.trim().to_string());
                continue;
            }
            if line.trim().is_empty() {
                continue;
            }
            in_block = false;
        }

        let Some(cap) = FRONTMATTER_KEY.captures(line) else {
            continue;
        };
        if !cap[1].eq_ignore_ascii_case(key) {
            continue;
        }
        let value = cap[2].trim();
        if value.is_empty() {
            in_block = true;
            continue;
        }
        let inner = value
            .strip_prefix('[')
            .and_then(|v| v.strip_suffix(']'))
            .unwrap_or(value);
        values.extend(
            inner
                .split([',', ' '])
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string),
        );
    }

    values
}

/// Modification date declared in frontmatter (`modified:` or `updated:`).
pub fn frontmatter_modified(text: &str) -> Option<DateTime<Utc>> {
    let (front, _) = split_frontmatter(text);
    let front = front?;
    front.lines().find_map(|line| {
        let cap = FRONTMATTER_KEY.captures(line)?;
        let key = cap[1].to_ascii_lowercase();
        if key != "modified" && key != "updated" {
            return None;
        }
        parse_date(cap[2].trim().trim_matches(|c| c == '"' || c == '\''))
    })
}

fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Parse an HTTP `Last-Modified` header value.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_split_frontmatter() {
        let text = "---\ntitle: x\n---\nBody here";
        let (front, body) = split_frontmatter(text);
        assert_eq!(front, Some("title: x\n"));
        assert_eq!(body, "Body here");

        let (front, body) = split_frontmatter("No frontmatter");
        assert!(front.is_none());
        assert_eq!(body, "No frontmatter");
    }

    #[test]
    fn test_unterminated_frontmatter_is_body() {
        let text = "---\ntitle: x\nstill going";
        let (front, body) = split_frontmatter(text);
        assert!(front.is_none());
        assert_eq!(body, text);
    }

    #[test]
    fn test_tags_inline_list() {
        let text = "---\ntags: [Reference, rust]\n---\nSome text";
        assert_eq!(extract_tags(text), vec!["reference", "rust"]);
    }

    #[test]
    fn test_tags_block_list_and_inline() {
        let text = "---\ntags:\n  - project\n  - \"#Idea\"\nstatus: open\n---\n# Heading\nA note about #logic and #project.";
        assert_eq!(extract_tags(text), vec!["project", "idea", "logic"]);
    }

    #[test]
    fn test_heading_and_anchors_not_tags() {
        let text = "# Title\n\nSee [link](page#section) and issue #42 here";
        assert!(extract_tags(text).is_empty());
    }

    #[test]
    fn test_frontmatter_modified() {
        let text = "---\nmodified: 2024-03-01\n---\nbody";
        assert_eq!(
            frontmatter_modified(text),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
        );
        let text = "---\nupdated: 2024-03-01T10:30:00Z\n---\nbody";
        assert_eq!(
            frontmatter_modified(text),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 30, 0).unwrap())
        );
        assert_eq!(frontmatter_modified("no front"), None);
    }

    #[test]
    fn test_parse_http_date() {
        assert_eq!(
            parse_http_date("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap())
        );
        assert_eq!(parse_http_date("garbage"), None);
    }
}
