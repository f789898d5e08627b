//! Framed text report document.
//!
//! A report is a newline-delimited UTF-8 document:
//!
//! ```text
//! X-Trace Report ver 1.0
//! X-Trace: <hex-metadata>
//! Title: <string>            (optional, 0 or 1)
//! Tag: <string>              (optional, 0 or more)
//! <arbitrary Key: Value lines>
//! <blank line terminator>
//! ```
//!
//! The raw text is what gets persisted; [`Report`] is the parsed read-side
//! view with a key → values multimap.

use std::collections::BTreeMap;

use xtrace_error::{Result, XTraceError};

use crate::{TaskId, XTraceMetadata};

/// Prefix every report's first line must start with.
pub const REPORT_HEADER_PREFIX: &str = "X-Trace Report ver";

/// Canonical first line of a current-version report.
pub const REPORT_HEADER: &str = "X-Trace Report ver 1.0";

/// Length of the canonical header line including its newline; the fast
/// ingest path reads the `X-Trace:` field at this fixed offset.
pub const REPORT_HEADER_LENGTH: usize = REPORT_HEADER.len() + 1;

/// A parsed report: the raw text plus its `Key: Value` fields.
///
/// Repeated keys accumulate in first-to-last order. Lines without a colon
/// are ignored, as is anything after the blank-line terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    raw: String,
    fields: BTreeMap<String, Vec<String>>,
}

impl Report {
    /// Parse a report from its raw text.
    ///
    /// Fails only when the first line does not carry the report header;
    /// field parsing itself is lenient.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut lines = raw.lines();
        let header = lines.next().unwrap_or("");
        if !header.starts_with(REPORT_HEADER_PREFIX) {
            return Err(XTraceError::MalformedReport {
                detail: format!("first line is not a report header: {header:?}"),
            });
        }

        let mut fields: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            fields
                .entry(key.trim().to_owned())
                .or_default()
                .push(value.trim_start().to_owned());
        }

        Ok(Self {
            raw: raw.to_owned(),
            fields,
        })
    }

    /// The raw report text, exactly as received.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// All values observed for `key`, in report order.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.fields.get(key).map(Vec::as_slice)
    }

    /// Decode the metadata from the first `X-Trace` field.
    pub fn metadata(&self) -> Result<XTraceMetadata> {
        let value = self
            .get("X-Trace")
            .and_then(<[String]>::first)
            .ok_or_else(|| XTraceError::MalformedReport {
                detail: "report has no X-Trace field".to_owned(),
            })?;
        XTraceMetadata::from_hex_str(value)
    }

    /// The task id from the metadata, if it decodes.
    #[must_use]
    pub fn task_id(&self) -> Option<TaskId> {
        self.metadata().ok().map(|m| m.task_id().clone())
    }

    /// The first `Title` value, if any.
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.get("Title").and_then(<[String]>::first).map(String::as_str)
    }

    /// All `Tag` values, in report order.
    #[must_use]
    pub fn tags(&self) -> &[String] {
        self.get("Tag").unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OpId;

    fn sample_metadata() -> XTraceMetadata {
        let task_id = TaskId::from_hex("ABCDEF0123456789").expect("8-byte task id");
        let op_id = OpId::from_bytes(&[0x11, 0x22, 0x33, 0x44]).expect("op id");
        XTraceMetadata::new(task_id, op_id)
    }

    fn sample_report() -> String {
        format!(
            "{REPORT_HEADER}\nX-Trace: {}\nTitle: fetch /index\nTag: web\nTag: frontend\nHost: alpha\n\n",
            sample_metadata().to_hex()
        )
    }

    #[test]
    fn test_parse_collects_fields() {
        let report = Report::parse(&sample_report()).expect("well-formed report");
        assert_eq!(report.title(), Some("fetch /index"));
        assert_eq!(report.tags(), ["web", "frontend"]);
        assert_eq!(report.get("Host"), Some(&["alpha".to_owned()][..]));
    }

    #[test]
    fn test_parse_decodes_metadata() {
        let report = Report::parse(&sample_report()).expect("well-formed report");
        let meta = report.metadata().expect("metadata decodes");
        assert_eq!(meta.task_id().to_hex(), "ABCDEF0123456789");
        assert_eq!(report.task_id().expect("task id").to_hex(), "ABCDEF0123456789");
    }

    #[test]
    fn test_parse_requires_header() {
        let err = Report::parse("Title: no header\n\n").expect_err("header required");
        assert!(matches!(err, XTraceError::MalformedReport { .. }));
    }

    #[test]
    fn test_parse_stops_at_blank_line() {
        let raw = format!("{REPORT_HEADER}\nTag: kept\n\nTag: dropped\n");
        let report = Report::parse(&raw).expect("parse");
        assert_eq!(report.tags(), ["kept"]);
    }

    #[test]
    fn test_repeated_keys_accumulate_in_order() {
        let raw = format!("{REPORT_HEADER}\nTag: a\nTag: b\nTag: a\n\n");
        let report = Report::parse(&raw).expect("parse");
        assert_eq!(report.tags(), ["a", "b", "a"]);
    }

    #[test]
    fn test_value_may_contain_colons() {
        let raw = format!("{REPORT_HEADER}\nTimestamp: 12:34:56\n\n");
        let report = Report::parse(&raw).expect("parse");
        assert_eq!(
            report.get("Timestamp"),
            Some(&["12:34:56".to_owned()][..])
        );
    }

    #[test]
    fn test_header_length_covers_newline() {
        assert_eq!(REPORT_HEADER_LENGTH, REPORT_HEADER.len() + 1);
        let raw = sample_report();
        assert_eq!(&raw[REPORT_HEADER_LENGTH..REPORT_HEADER_LENGTH + 8], "X-Trace:");
    }

    #[test]
    fn test_raw_preserved_verbatim() {
        let raw = sample_report();
        let report = Report::parse(&raw).expect("parse");
        assert_eq!(report.raw(), raw);
    }
}
