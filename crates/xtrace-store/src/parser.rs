//! Report parser for the ingest path.
//!
//! Two parse paths coexist. The fast path assumes the canonical layout
//! (header line, then the `X-Trace:` field at a fixed offset) and decodes
//! nothing else. Reports that carry `Tag:` or `Title:` right after the
//! metadata line, and reports that deviate from the canonical layout, take
//! the slow line-by-line path, which also collects the first title and the
//! set of all tags.
//!
//! Task ids are normalized to uppercase hex on both paths so filenames and
//! index keys always agree.

use std::collections::BTreeSet;

use xtrace_error::{Result, XTraceError};
use xtrace_types::{XTraceMetadata, REPORT_HEADER_LENGTH};

/// Byte offset of the metadata hex on a canonical report.
const XTRACE_FIELD_OFFSET: usize = REPORT_HEADER_LENGTH + "X-Trace: ".len();

/// Where the metadata line's newline lands for the common 17-byte metadata
/// (flags + 8-byte task id + 8-byte op id = 34 hex chars).
const EXPECTED_NEWLINE: usize = XTRACE_FIELD_OFFSET + 34;

/// What ingest needs from one report; the raw text is persisted separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReport {
    /// Task id in canonical uppercase-hex form.
    pub task_id: String,
    /// First `Title:` value, when the slow path ran.
    pub title: Option<String>,
    /// All `Tag:` values, when the slow path ran.
    pub tags: Option<BTreeSet<String>>,
}

/// Parse one complete report message.
///
/// Failures mean the report must be dropped; the caller logs and moves on.
pub fn parse_report(msg: &str) -> Result<ParsedReport> {
    let bytes = msg.as_bytes();

    if !region_matches(bytes, REPORT_HEADER_LENGTH, b"X-Trace:") {
        return parse_slow(msg);
    }

    let line_end = if bytes.get(EXPECTED_NEWLINE) == Some(&b'\n') {
        EXPECTED_NEWLINE
    } else {
        match bytes[XTRACE_FIELD_OFFSET.min(bytes.len())..]
            .iter()
            .position(|&b| b == b'\n')
        {
            Some(pos) => XTRACE_FIELD_OFFSET + pos,
            None => return parse_slow(msg),
        }
    };

    // Reports carrying tags or a title go through the slow path so those
    // fields are collected (defined behavior, not an optimization bailout).
    if region_matches(bytes, line_end + 1, b"Tag: ")
        || region_matches(bytes, line_end + 1, b"Title: ")
    {
        return parse_slow(msg);
    }

    let Some(hex) = msg.get(XTRACE_FIELD_OFFSET..line_end) else {
        return parse_slow(msg);
    };
    let metadata = XTraceMetadata::from_hex_str(hex)?;

    Ok(ParsedReport {
        task_id: metadata.task_id().to_hex(),
        title: None,
        tags: None,
    })
}

fn region_matches(bytes: &[u8], offset: usize, needle: &[u8]) -> bool {
    offset
        .checked_add(needle.len())
        .and_then(|end| bytes.get(offset..end))
        .is_some_and(|region| region == needle)
}

/// Line-by-line scan: locate the `X-Trace:` line anywhere in the frame,
/// collect the first title and all tags. Scanning stops at the blank-line
/// terminator.
fn parse_slow(msg: &str) -> Result<ParsedReport> {
    let mut metadata_hex: Option<&str> = None;
    let mut title: Option<String> = None;
    let mut tags: Option<BTreeSet<String>> = None;

    for line in msg.lines() {
        if line.is_empty() {
            break;
        }
        if let Some(rest) = line.strip_prefix("X-Trace:") {
            if metadata_hex.is_none() && rest.starts_with(char::is_whitespace) {
                let candidate = rest.trim_start();
                if !candidate.is_empty()
                    && candidate.bytes().all(|b| b.is_ascii_hexdigit())
                {
                    metadata_hex = Some(candidate);
                }
            }
        } else if let Some(value) = line.strip_prefix("Title:") {
            if title.is_none() {
                title = Some(value.trim_start().to_owned());
            }
        } else if let Some(value) = line.strip_prefix("Tag:") {
            tags.get_or_insert_with(BTreeSet::new)
                .insert(value.trim_start().to_owned());
        }
    }

    let hex = metadata_hex.ok_or_else(|| XTraceError::MalformedReport {
        detail: "report has no X-Trace line".to_owned(),
    })?;
    let metadata = XTraceMetadata::from_hex_str(hex)?;

    Ok(ParsedReport {
        task_id: metadata.task_id().to_hex(),
        title,
        tags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use xtrace_types::{OpId, TaskId, REPORT_HEADER};

    fn metadata(task_hex: &str, op_len: usize) -> XTraceMetadata {
        let task_id = TaskId::from_hex(task_hex).expect("task id");
        let op_id = OpId::from_bytes(&vec![0x42; op_len]).expect("op id");
        XTraceMetadata::new(task_id, op_id)
    }

    fn canonical(meta: &XTraceMetadata, extra_lines: &str) -> String {
        format!("{REPORT_HEADER}\nX-Trace: {}\n{extra_lines}\n", meta.to_hex())
    }

    #[test]
    fn test_fast_path_common_shape() {
        let meta = metadata("ABCDEF0123456789", 8);
        let msg = canonical(&meta, "Host: alpha");
        let parsed = parse_report(&msg).expect("fast path parses");
        assert_eq!(parsed.task_id, "ABCDEF0123456789");
        assert_eq!(parsed.title, None);
        assert_eq!(parsed.tags, None);
    }

    #[test]
    fn test_fast_path_non_canonical_metadata_length() {
        // 4-byte task id + 4-byte op id: 18 hex chars, so the newline is
        // not at the expected position and must be found by scanning.
        let meta = metadata("DEADBEEF", 4);
        let msg = canonical(&meta, "Host: alpha");
        let parsed = parse_report(&msg).expect("fallback newline scan");
        assert_eq!(parsed.task_id, "DEADBEEF");
    }

    #[test]
    fn test_tagged_report_takes_slow_path() {
        let meta = metadata("ABCDEF0123456789", 8);
        let msg = canonical(&meta, "Tag: web\nTag: backend");
        let parsed = parse_report(&msg).expect("slow path parses");
        assert_eq!(parsed.task_id, "ABCDEF0123456789");
        let tags = parsed.tags.expect("tags collected");
        assert!(tags.contains("web") && tags.contains("backend"));
    }

    #[test]
    fn test_titled_report_takes_slow_path() {
        let meta = metadata("ABCDEF0123456789", 8);
        let msg = canonical(&meta, "Title: first\nTitle: second");
        let parsed = parse_report(&msg).expect("slow path parses");
        assert_eq!(parsed.title.as_deref(), Some("first"));
    }

    #[test]
    fn test_slow_path_finds_metadata_after_other_fields() {
        let meta = metadata("ABCDEF0123456789", 8);
        let msg = format!(
            "{REPORT_HEADER}\nAgent: worker-3\nX-Trace: {}\nTag: q\n\n",
            meta.to_hex()
        );
        let parsed = parse_report(&msg).expect("slow path finds X-Trace line");
        assert_eq!(parsed.task_id, "ABCDEF0123456789");
        assert_eq!(parsed.tags.expect("tags").len(), 1);
    }

    #[test]
    fn test_task_id_uppercased_on_both_paths() {
        let lower = metadata("ABCDEF0123456789", 8).to_hex().to_lowercase();
        let fast = format!("{REPORT_HEADER}\nX-Trace: {lower}\nHost: a\n\n");
        assert_eq!(
            parse_report(&fast).expect("fast").task_id,
            "ABCDEF0123456789"
        );
        let slow = format!("{REPORT_HEADER}\nX-Trace: {lower}\nTag: t\n\n");
        assert_eq!(
            parse_report(&slow).expect("slow").task_id,
            "ABCDEF0123456789"
        );
    }

    #[test]
    fn test_no_xtrace_line_is_malformed() {
        let msg = format!("{REPORT_HEADER}\nHost: alpha\n\n");
        let err = parse_report(&msg).expect_err("must drop");
        assert!(matches!(err, XTraceError::MalformedReport { .. }));
    }

    #[test]
    fn test_bad_metadata_hex_is_rejected() {
        let msg = format!("{REPORT_HEADER}\nX-Trace: 00FF\nTag: t\n\n");
        let err = parse_report(&msg).expect_err("truncated metadata");
        assert!(matches!(err, XTraceError::InvalidMetadata { .. }));
    }

    #[test]
    fn test_fields_after_blank_line_ignored() {
        let meta = metadata("ABCDEF0123456789", 8);
        let msg = format!(
            "{REPORT_HEADER}\nX-Trace: {}\nTag: kept\n\nTag: dropped\n",
            meta.to_hex()
        );
        let parsed = parse_report(&msg).expect("parse");
        let tags = parsed.tags.expect("tags");
        assert!(tags.contains("kept"));
        assert!(!tags.contains("dropped"));
    }

    #[test]
    fn test_xtrace_line_requires_whitespace_and_pure_hex() {
        // No whitespace after the colon: not a metadata line.
        let msg = format!("{REPORT_HEADER}\nX-Trace:ABCD\nTag: t\n\n");
        assert!(parse_report(&msg).is_err());
        // Trailing junk after the hex: not a metadata line.
        let msg = format!("{REPORT_HEADER}\nX-Trace: ABCD zz\nTag: t\n\n");
        assert!(parse_report(&msg).is_err());
    }
}
