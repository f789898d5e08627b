//! Server-side Report Store core for X-Trace.
//!
//! The store ingests a stream of serialized trace reports and persists them
//! so a query layer can retrieve per-task report histories, search by
//! tag/title/time, and reconstruct overlapping execution windows:
//!
//! - [`parser`] extracts task id, optional title, and tags from a framed
//!   text report
//! - [`handle_cache`] bounds open append-mode file handles with
//!   staleness-triggered eviction
//! - [`task_file`] maps task ids to shard directories and streams reports
//!   back out of a task file
//! - [`pending`] coalesces per-task metadata deltas between ingest events
//!   and the background flush
//! - [`index`] is the embedded relational index over task metadata
//! - [`updater`] drains pending deltas into the index in transactional
//!   batches
//! - [`store`] wires the pieces together and exposes the query surface

pub mod config;
pub mod handle_cache;
pub mod index;
pub mod parser;
pub mod pending;
pub mod store;
pub mod task_file;
pub mod updater;

pub use config::StoreConfig;
pub use store::ReportStore;

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, the timestamp unit used by the
/// handle cache and every index row.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
