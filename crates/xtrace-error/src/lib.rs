use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for the X-Trace report store.
///
/// Structured variants for the failure classes the store distinguishes.
/// Most ingest-side failures are logged and swallowed at the call site
/// (a malformed report must never stall the pipeline); the variants here
/// carry enough detail for that one log line to be useful.
#[derive(Error, Debug)]
pub enum XTraceError {
    // === Startup errors (fail fast) ===
    /// The report root directory is missing, not a directory, or not
    /// writable.
    #[error("report store directory unusable: '{path}': {detail}")]
    StoreDirectory { path: PathBuf, detail: String },

    // === Report / metadata errors ===
    /// A task identifier failed validation (bad length or non-hex input).
    #[error("invalid task id: {detail}")]
    InvalidTaskId { detail: String },

    /// An `X-Trace` metadata hex string could not be decoded.
    #[error("invalid X-Trace metadata: {detail}")]
    InvalidMetadata { detail: String },

    /// A report frame is missing its `X-Trace` line or a task id.
    #[error("malformed report: {detail}")]
    MalformedReport { detail: String },

    // === I/O and index errors ===
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure inside the embedded metadata index. The engine error is
    /// stringified at the boundary so this crate stays engine-agnostic.
    #[error("metadata index error: {detail}")]
    Index { detail: String },

    // === Lifecycle errors ===
    /// A background worker could not be spawned or joined.
    #[error("store lifecycle error: {detail}")]
    Shutdown { detail: String },
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, XTraceError>;
