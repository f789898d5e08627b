//! Public API facade for the X-Trace report store.
//!
//! Re-exports the stable surface: open a [`ReportStore`] on a root
//! directory, feed it complete report messages, and query task metadata
//! and report histories back out.

pub use xtrace_error::{Result, XTraceError};
pub use xtrace_store::{ReportStore, StoreConfig};
pub use xtrace_types::{
    OpId, Report, TaskId, TaskRecord, XTraceMetadata, REPORT_HEADER, REPORT_HEADER_LENGTH,
};
