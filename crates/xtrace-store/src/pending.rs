//! Coalesced per-task metadata deltas awaiting the index updater.
//!
//! The ingest loop records one delta per report; the updater periodically
//! swaps the whole map out and applies it as a transactional batch. Merge
//! rules: counts add, an arriving title overwrites, tags union.
//!
//! The original design guarded this map with an atomic-flag spin lock;
//! hold times are O(1) hash operations with exactly two contenders, so a
//! standard short-hold mutex realizes the same protocol.

use std::collections::{BTreeSet, HashMap};
use std::mem;

use parking_lot::Mutex;

/// Unflushed metadata accumulated for one task between updater drains.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingUpdate {
    /// Reports ingested since the last drain.
    pub new_report_count: u64,
    /// Last title observed since the last drain, if any.
    pub title: Option<String>,
    /// Union of tags observed since the last drain, if any.
    pub tags: Option<BTreeSet<String>>,
}

/// The task-id → delta map shared by the ingest loop and the updater.
#[derive(Debug, Default)]
pub struct PendingUpdates {
    map: Mutex<HashMap<String, PendingUpdate>>,
}

impl PendingUpdates {
    /// Empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one ingested report for `task_id`, merging into any delta
    /// already pending.
    pub fn record(
        &self,
        task_id: &str,
        title: Option<String>,
        tags: Option<BTreeSet<String>>,
    ) {
        let mut map = self.map.lock();
        let update = map.entry(task_id.to_owned()).or_default();
        update.new_report_count += 1;
        if title.is_some() {
            update.title = title;
        }
        if let Some(tags) = tags {
            match &mut update.tags {
                Some(existing) => existing.extend(tags),
                None => update.tags = Some(tags),
            }
        }
    }

    /// Exchange the current map for an empty one, returning the drained
    /// deltas to the caller.
    #[must_use]
    pub fn swap(&self) -> HashMap<String, PendingUpdate> {
        mem::take(&mut *self.map.lock())
    }

    /// Number of tasks with a pending delta.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    /// Whether no deltas are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn test_counts_add() {
        let pending = PendingUpdates::new();
        pending.record("T1", None, None);
        pending.record("T1", None, None);
        pending.record("T1", None, None);

        let drained = pending.swap();
        assert_eq!(drained["T1"].new_report_count, 3);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_title_overwrites_but_none_does_not() {
        let pending = PendingUpdates::new();
        pending.record("T1", Some("first".to_owned()), None);
        pending.record("T1", None, None);
        pending.record("T1", Some("second".to_owned()), None);
        pending.record("T1", None, None);

        let drained = pending.swap();
        assert_eq!(drained["T1"].title.as_deref(), Some("second"));
    }

    #[test]
    fn test_tags_union() {
        let pending = PendingUpdates::new();
        pending.record("T1", None, Some(tags(&["a"])));
        pending.record("T1", None, Some(tags(&["b"])));
        pending.record("T1", None, Some(tags(&["a", "c"])));

        let drained = pending.swap();
        assert_eq!(drained["T1"].tags, Some(tags(&["a", "b", "c"])));
    }

    #[test]
    fn test_tasks_are_independent() {
        let pending = PendingUpdates::new();
        pending.record("T1", Some("t1".to_owned()), Some(tags(&["x"])));
        pending.record("T2", None, None);

        let drained = pending.swap();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained["T1"].new_report_count, 1);
        assert_eq!(drained["T2"].new_report_count, 1);
        assert_eq!(drained["T2"].title, None);
        assert_eq!(drained["T2"].tags, None);
    }

    #[test]
    fn test_swap_leaves_empty_map_for_new_deltas() {
        let pending = PendingUpdates::new();
        pending.record("T1", None, None);
        let first = pending.swap();
        assert_eq!(first.len(), 1);

        pending.record("T2", None, None);
        let second = pending.swap();
        assert_eq!(second.len(), 1);
        assert!(second.contains_key("T2"));
        assert!(!second.contains_key("T1"));
    }
}
