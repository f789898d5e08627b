//! LRU cache of append-mode file handles, keyed by task id.
//!
//! The cache is size-unbounded but self-trims under sustained ingest: on
//! every insertion the least-recently-used entry is inspected, and if it
//! has not been touched within the staleness window its writer is flushed,
//! closed, and removed. Idle tasks keep their handle open until displaced.
//!
//! All operations serialize on one mutex. Handle use is safe because only
//! the ingest thread writes report bodies, one task at a time.

use std::collections::{HashMap, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};
use xtrace_error::{Result, XTraceError};

use crate::now_millis;
use crate::task_file::task_file_path;

/// Writer buffer size, matching the append granularity of report bodies.
const WRITE_BUFFER_BYTES: usize = 65536;

/// Shortest task-id string the file store accepts (shard prefix plus a
/// minimal id body).
const MIN_TASK_ID_CHARS: usize = 6;

struct CachedHandle {
    writer: BufWriter<File>,
    last_access: u64,
}

struct CacheInner {
    handles: HashMap<String, CachedHandle>,
    /// Recency order: front is least recently used, back most.
    recency: VecDeque<String>,
    last_synced: u64,
}

/// Bounded-staleness cache of per-task append writers.
pub struct HandleCache {
    inner: Mutex<CacheInner>,
    root: PathBuf,
    valid_for: Duration,
}

impl HandleCache {
    /// Create a cache rooted at `root` with the given staleness window.
    #[must_use]
    pub fn new(root: PathBuf, valid_for: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                handles: HashMap::new(),
                recency: VecDeque::new(),
                last_synced: now_millis(),
            }),
            root,
            valid_for,
        }
    }

    /// Append one raw report plus the blank-line separator to the task's
    /// file, creating the shard directory and file on first use.
    ///
    /// Task ids shorter than [`MIN_TASK_ID_CHARS`] fail fast; I/O errors
    /// are returned so the caller can log and drop the report.
    pub fn append(&self, task_id: &str, raw: &str) -> Result<()> {
        if task_id.len() < MIN_TASK_ID_CHARS {
            return Err(XTraceError::InvalidTaskId {
                detail: format!("task id too short for file store: {task_id:?}"),
            });
        }

        let now = now_millis();
        let mut inner = self.inner.lock();

        if !inner.handles.contains_key(task_id) {
            self.evict_stale_lru(&mut inner, now);

            let path = task_file_path(&self.root, task_id);
            if let Some(shard_dir) = path.parent() {
                fs::create_dir_all(shard_dir)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            debug!(task_id, path = %path.display(), "opened report file handle");
            inner.handles.insert(
                task_id.to_owned(),
                CachedHandle {
                    writer: BufWriter::with_capacity(WRITE_BUFFER_BYTES, file),
                    last_access: now,
                },
            );
            inner.recency.push_back(task_id.to_owned());
        } else {
            // Bump recency: move the key to the most-recently-used end.
            inner.recency.retain(|k| k != task_id);
            inner.recency.push_back(task_id.to_owned());
        }

        let handle = inner
            .handles
            .get_mut(task_id)
            .expect("handle inserted above");
        handle.last_access = now;
        handle.writer.write_all(raw.as_bytes())?;
        handle.writer.write_all(b"\n\n")?;
        Ok(())
    }

    /// If the least-recently-used entry is past the staleness window,
    /// flush, close, and remove it. At most one entry is evicted per
    /// insertion.
    fn evict_stale_lru(&self, inner: &mut CacheInner, now: u64) {
        let Some(lru_key) = inner.recency.front().cloned() else {
            return;
        };
        let stale = inner
            .handles
            .get(&lru_key)
            .is_some_and(|h| h.last_access + millis(self.valid_for) < now);
        if !stale {
            return;
        }
        inner.recency.pop_front();
        if let Some(mut handle) = inner.handles.remove(&lru_key) {
            if let Err(err) = handle.writer.flush() {
                warn!(task_id = %lru_key, error = %err, "error flushing evicted handle");
            }
            debug!(task_id = %lru_key, "evicted stale file handle");
        }
    }

    /// Flush every cached writer (without closing) and record the sync
    /// watermark.
    pub fn flush_all(&self) {
        let mut inner = self.inner.lock();
        for (task_id, handle) in &mut inner.handles {
            if let Err(err) = handle.writer.flush() {
                warn!(task_id = %task_id, error = %err, "error flushing report file");
            }
        }
        inner.last_synced = now_millis();
    }

    /// Flush, close, and drop every handle. Idempotent.
    pub fn close_all(&self) {
        let mut inner = self.inner.lock();
        for (task_id, mut handle) in inner.handles.drain() {
            if let Err(err) = handle.writer.flush() {
                warn!(task_id = %task_id, error = %err, "error closing report file");
            }
        }
        inner.recency.clear();
        inner.last_synced = now_millis();
    }

    /// When [`HandleCache::flush_all`] last ran, in ms since the epoch.
    #[must_use]
    pub fn last_synced(&self) -> u64 {
        self.inner.lock().last_synced
    }

    /// Number of open handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().handles.len()
    }

    /// Whether no handles are open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn is_cached(&self, task_id: &str) -> bool {
        self.inner.lock().handles.contains_key(task_id)
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::thread;

    use tempfile::tempdir;

    use super::*;

    const TASK_A: &str = "AA00000001";
    const TASK_B: &str = "BB00000002";

    #[test]
    fn test_append_creates_sharded_file() {
        let dir = tempdir().expect("tempdir");
        let cache = HandleCache::new(dir.path().to_path_buf(), Duration::from_secs(60));
        cache.append(TASK_A, "report body").expect("append");
        cache.flush_all();

        let path = task_file_path(dir.path(), TASK_A);
        let content = fs::read_to_string(path).expect("read back");
        assert_eq!(content, "report body\n\n");
    }

    #[test]
    fn test_appends_are_separated_by_blank_lines() {
        let dir = tempdir().expect("tempdir");
        let cache = HandleCache::new(dir.path().to_path_buf(), Duration::from_secs(60));
        cache.append(TASK_A, "one").expect("append");
        cache.append(TASK_A, "two").expect("append");
        cache.flush_all();

        let content =
            fs::read_to_string(task_file_path(dir.path(), TASK_A)).expect("read back");
        assert_eq!(content, "one\n\ntwo\n\n");
    }

    #[test]
    fn test_short_task_id_fails_fast() {
        let dir = tempdir().expect("tempdir");
        let cache = HandleCache::new(dir.path().to_path_buf(), Duration::from_secs(60));
        let err = cache.append("AB12", "x").expect_err("too short");
        assert!(matches!(err, XTraceError::InvalidTaskId { .. }));
    }

    #[test]
    fn test_stale_lru_evicted_on_insertion() {
        let dir = tempdir().expect("tempdir");
        let cache = HandleCache::new(dir.path().to_path_buf(), Duration::from_millis(10));
        cache.append(TASK_A, "a").expect("append");
        thread::sleep(Duration::from_millis(50));
        cache.append(TASK_B, "b").expect("append");

        assert!(!cache.is_cached(TASK_A), "stale LRU entry must be closed");
        assert!(cache.is_cached(TASK_B));
        // The evicted handle was flushed on the way out.
        let content =
            fs::read_to_string(task_file_path(dir.path(), TASK_A)).expect("read back");
        assert_eq!(content, "a\n\n");
    }

    #[test]
    fn test_fresh_lru_not_evicted() {
        let dir = tempdir().expect("tempdir");
        let cache = HandleCache::new(dir.path().to_path_buf(), Duration::from_secs(60));
        cache.append(TASK_A, "a").expect("append");
        cache.append(TASK_B, "b").expect("append");
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_access_bumps_recency() {
        let dir = tempdir().expect("tempdir");
        let cache = HandleCache::new(dir.path().to_path_buf(), Duration::from_millis(30));
        cache.append(TASK_A, "a").expect("append");
        cache.append(TASK_B, "b").expect("append");
        thread::sleep(Duration::from_millis(60));
        // Touch A so B becomes the LRU candidate.
        cache.append(TASK_A, "a2").expect("append");
        cache.append("CC00000003", "c").expect("append");
        assert!(cache.is_cached(TASK_A));
        assert!(!cache.is_cached(TASK_B), "B was the stale LRU entry");
    }

    #[test]
    fn test_close_all_is_idempotent_and_reopenable() {
        let dir = tempdir().expect("tempdir");
        let cache = HandleCache::new(dir.path().to_path_buf(), Duration::from_secs(60));
        cache.append(TASK_A, "one").expect("append");
        cache.close_all();
        cache.close_all();
        assert!(cache.is_empty());

        // A later append reopens in append mode; prior content is kept.
        cache.append(TASK_A, "two").expect("append");
        cache.close_all();
        let content =
            fs::read_to_string(task_file_path(dir.path(), TASK_A)).expect("read back");
        assert_eq!(content, "one\n\ntwo\n\n");
    }

    #[test]
    fn test_flush_all_advances_watermark() {
        let dir = tempdir().expect("tempdir");
        let cache = HandleCache::new(dir.path().to_path_buf(), Duration::from_secs(60));
        let before = cache.last_synced();
        thread::sleep(Duration::from_millis(5));
        cache.flush_all();
        assert!(cache.last_synced() >= before);
    }
}
