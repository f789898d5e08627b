//! Per-task row materialized from the metadata index.

use serde::{Deserialize, Serialize};

use crate::TaskId;

/// One task's metadata as committed to the index.
///
/// Timestamps are integer milliseconds since the Unix epoch;
/// `first_seen <= last_updated` holds for every committed row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// The task this row describes.
    pub task_id: TaskId,
    /// When the first report for this task was committed.
    pub first_seen: u64,
    /// When the most recent update batch touched this row.
    pub last_updated: u64,
    /// Reports ingested for this task (monotonically increasing).
    pub num_reports: u64,
    /// Last non-null observed title; defaults to the task id's hex form.
    pub title: String,
    /// Union of all observed tags.
    pub tags: Vec<String>,
}

impl TaskRecord {
    /// Whether this record carries `tag` exactly (not as a substring).
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}
