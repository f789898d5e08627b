//! The report store: ingest orchestration plus the read-side query surface.
//!
//! A [`ReportStore`] owns the task file tree, the handle cache, the pending
//! delta map, the embedded metadata index, and the background updater. It
//! is constructed once at startup and passed around explicitly; nothing
//! here is process-global.
//!
//! Threading: the ingest loop is single-threaded; the updater runs in the
//! background; query methods may be called from any thread. Queries and the
//! updater's transactional commits are mutually exclusive on the index
//! connection's mutex.

use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use xtrace_error::{Result, XTraceError};
use xtrace_types::{TaskId, TaskRecord};

use crate::config::StoreConfig;
use crate::handle_cache::HandleCache;
use crate::index::MetadataIndex;
use crate::parser::parse_report;
use crate::pending::PendingUpdates;
use crate::task_file::ReportIterator;
use crate::updater::IndexUpdater;

/// Tag reads tolerate this many attempts before giving up.
const TAG_READ_RETRIES: usize = 3;

/// The server-side report store.
pub struct ReportStore {
    config: StoreConfig,
    cache: HandleCache,
    pending: Arc<PendingUpdates>,
    index: Arc<Mutex<Option<MetadataIndex>>>,
    updater: Mutex<Option<IndexUpdater>>,
    stopped: AtomicBool,
}

impl std::fmt::Debug for ReportStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportStore").finish_non_exhaustive()
    }
}

impl ReportStore {
    /// Open a store rooted at `config.root` and start the background
    /// updater.
    ///
    /// Fails fast when the root directory is missing, not a directory, or
    /// not writable, or when the embedded index cannot be opened.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let root = &config.root;
        let meta = fs::metadata(root).map_err(|err| XTraceError::StoreDirectory {
            path: root.clone(),
            detail: err.to_string(),
        })?;
        if !meta.is_dir() {
            return Err(XTraceError::StoreDirectory {
                path: root.clone(),
                detail: "not a directory".to_owned(),
            });
        }
        if meta.permissions().readonly() {
            return Err(XTraceError::StoreDirectory {
                path: root.clone(),
                detail: "not writable".to_owned(),
            });
        }

        let index = Arc::new(Mutex::new(Some(MetadataIndex::open(root)?)));
        let pending = Arc::new(PendingUpdates::new());
        let updater = IndexUpdater::spawn(
            Arc::clone(&pending),
            Arc::clone(&index),
            config.updater_interval,
        )?;
        let cache = HandleCache::new(root.clone(), config.handle_valid_for);

        info!(root = %root.display(), "report store opened");
        Ok(Self {
            config,
            cache,
            pending,
            index,
            updater: Mutex::new(Some(updater)),
            stopped: AtomicBool::new(false),
        })
    }

    // --- ingest --------------------------------------------------------

    /// Ingest one complete report message.
    ///
    /// The report's bytes reach the file writer before its metadata delta
    /// becomes visible to the updater; a failed write records no delta.
    /// Every failure is logged and swallowed; ingest never raises and
    /// never blocks the producer on errors.
    pub fn ingest(&self, msg: &str) {
        if self.stopped.load(Ordering::Acquire) {
            warn!("report received after shutdown; discarding");
            return;
        }
        let parsed = match parse_report(msg) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(error = %err, "discarding report");
                return;
            }
        };
        if let Err(err) = self.cache.append(&parsed.task_id, msg) {
            warn!(
                task_id = %parsed.task_id,
                error = %err,
                "discarding report after write failure"
            );
            return;
        }
        self.pending.record(&parsed.task_id, parsed.title, parsed.tags);
    }

    /// Consume reports from `reports` until the channel closes or shutdown
    /// is requested. The external receiver owns the sending half; each
    /// message is one complete report.
    pub fn run(&self, reports: &Receiver<String>) {
        info!("report store ingest loop running");
        while !self.stopped.load(Ordering::Acquire) {
            match reports.recv() {
                Ok(msg) => self.ingest(&msg),
                Err(_) => {
                    debug!("ingest channel closed; leaving ingest loop");
                    break;
                }
            }
        }
    }

    /// Flush all cached file writers to disk.
    pub fn sync(&self) {
        self.cache.flush_all();
    }

    /// When the file tree was last flushed, in ms since the epoch.
    #[must_use]
    pub fn data_as_of(&self) -> u64 {
        self.cache.last_synced()
    }

    /// Stop the updater (draining outstanding deltas), close every file
    /// handle, and close the index. Safe to call more than once.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("shutting down report store");
        if let Some(mut updater) = self.updater.lock().take() {
            updater.stop();
        }
        self.cache.close_all();
        // Dropping the index closes the connection; queries from here on
        // return their empty defaults.
        self.index.lock().take();
    }

    // --- query surface -------------------------------------------------

    /// Lazy sequence of the reports recorded for `task_id`.
    #[must_use]
    pub fn reports_by_task(&self, task_id: &TaskId) -> ReportIterator {
        ReportIterator::open(&self.config.root, &task_id.to_hex())
    }

    /// Committed tags for `task_id`. Retries a few times to tolerate a
    /// concurrent updater commit; empty on persistent failure.
    #[must_use]
    pub fn tags_for_task(&self, task_id: &TaskId) -> Vec<String> {
        let key = task_id.to_hex();
        for attempt in 1..=TAG_READ_RETRIES {
            match self.with_index(|index| index.tags_of(&key)) {
                Ok(tags) => return tags,
                Err(err) if attempt == TAG_READ_RETRIES => {
                    warn!(task_id = %key, error = %err, "giving up reading tags");
                }
                Err(_) => {}
            }
        }
        Vec::new()
    }

    /// Tasks first seen at or after `since_millis`, most recently updated
    /// first, windowed by `(offset, limit)`.
    #[must_use]
    pub fn tasks_since(&self, since_millis: u64, offset: usize, limit: usize) -> Vec<TaskRecord> {
        records_or_empty(self.with_index(|ix| ix.tasks_since(since_millis, offset, limit)))
    }

    /// All tasks, most recently updated first, windowed by
    /// `(offset, limit)`.
    #[must_use]
    pub fn latest_tasks(&self, offset: usize, limit: usize) -> Vec<TaskRecord> {
        records_or_empty(self.with_index(|ix| ix.latest_tasks(offset, limit)))
    }

    /// Tasks carrying `tag` exactly.
    #[must_use]
    pub fn tasks_by_tag(&self, tag: &str, offset: usize, limit: usize) -> Vec<TaskRecord> {
        records_or_empty(self.with_index(|ix| ix.tasks_by_tag(tag, offset, limit)))
    }

    /// Tasks whose title equals `title` (case-insensitive).
    #[must_use]
    pub fn tasks_by_title(&self, title: &str, offset: usize, limit: usize) -> Vec<TaskRecord> {
        records_or_empty(self.with_index(|ix| ix.tasks_by_title(title, offset, limit)))
    }

    /// Tasks whose title contains `title` (case-insensitive).
    #[must_use]
    pub fn tasks_by_title_substring(
        &self,
        title: &str,
        offset: usize,
        limit: usize,
    ) -> Vec<TaskRecord> {
        records_or_empty(self.with_index(|ix| ix.tasks_by_title_approx(title, offset, limit)))
    }

    /// Committed report count for `task_id` (0 when unknown).
    #[must_use]
    pub fn count_by_task(&self, task_id: &TaskId) -> u64 {
        match self.with_index(|ix| ix.num_reports_of(&task_id.to_hex())) {
            Ok(count) => count.unwrap_or(0),
            Err(err) => {
                warn!(task_id = %task_id, error = %err, "report count query failed");
                0
            }
        }
    }

    /// Last update time for `task_id` (0 when unknown).
    #[must_use]
    pub fn last_updated_by_task(&self, task_id: &TaskId) -> u64 {
        match self.with_index(|ix| ix.last_updated_of(&task_id.to_hex())) {
            Ok(ts) => ts.unwrap_or(0),
            Err(err) => {
                warn!(task_id = %task_id, error = %err, "last-updated query failed");
                0
            }
        }
    }

    /// Total committed reports across all tasks.
    #[must_use]
    pub fn num_reports(&self) -> u64 {
        scalar_or_zero(self.with_index(MetadataIndex::total_reports))
    }

    /// Total distinct tasks.
    #[must_use]
    pub fn num_tasks(&self) -> u64 {
        scalar_or_zero(self.with_index(MetadataIndex::total_tasks))
    }

    /// One-hop temporal overlap: every task whose `[first_seen,
    /// last_updated]` interval intersects `task_id`'s. Includes the task
    /// itself.
    #[must_use]
    pub fn overlapping_tasks(&self, task_id: &TaskId) -> BTreeSet<String> {
        let key = task_id.to_hex();
        let mut overlaps = BTreeSet::from([key.clone()]);

        let guard = self.index.lock();
        let Some(index) = guard.as_ref() else {
            return overlaps;
        };
        let result = index.times_of(&key).and_then(|times| {
            if let Some((first_seen, last_updated)) = times {
                for id in index.tasks_between(last_updated, first_seen)? {
                    overlaps.insert(id);
                }
            }
            Ok(())
        });
        if let Err(err) = result {
            warn!(task_id = %key, error = %err, "overlap query failed");
        }
        overlaps
    }

    /// Transitive temporal overlap: breadth-first traversal with an
    /// expanding `[lower, upper]` bounding window. Best-effort: a task is
    /// overlapping if its row intersects the expanding window. Terminates
    /// because each task is enqueued at most once.
    #[must_use]
    pub fn all_overlapping_tasks(&self, task_id: &TaskId) -> BTreeSet<String> {
        let start = task_id.to_hex();
        let mut seen = BTreeSet::from([start.clone()]);
        let mut frontier = VecDeque::from([start]);
        let mut lower = u64::MAX;
        let mut upper = 0_u64;

        let guard = self.index.lock();
        let Some(index) = guard.as_ref() else {
            return seen;
        };

        while let Some(next) = frontier.pop_front() {
            let step = index.times_of(&next).and_then(|times| {
                let Some((first_seen, last_updated)) = times else {
                    return Ok(Vec::new());
                };
                lower = lower.min(first_seen);
                upper = upper.max(last_updated);
                index.tasks_between(upper, lower)
            });
            match step {
                Ok(ids) => {
                    for id in ids {
                        if seen.insert(id.clone()) {
                            frontier.push_back(id);
                        }
                    }
                }
                Err(err) => {
                    warn!(task_id = %next, error = %err, "skipping task in overlap traversal");
                }
            }
        }
        seen
    }

    // --- helpers -------------------------------------------------------

    fn with_index<T>(&self, op: impl FnOnce(&MetadataIndex) -> Result<T>) -> Result<T> {
        let guard = self.index.lock();
        match guard.as_ref() {
            Some(index) => op(index),
            None => Err(XTraceError::Index {
                detail: "store is shut down".to_owned(),
            }),
        }
    }
}

fn records_or_empty(result: Result<Vec<TaskRecord>>) -> Vec<TaskRecord> {
    result.unwrap_or_else(|err| {
        warn!(error = %err, "task listing query failed");
        Vec::new()
    })
}

fn scalar_or_zero(result: Result<u64>) -> u64 {
    result.unwrap_or_else(|err| {
        warn!(error = %err, "aggregate query failed");
        0
    })
}

impl Drop for ReportStore {
    fn drop(&mut self) {
        self.shutdown();
    }
}
