//! Background worker that drains pending deltas into the metadata index.
//!
//! The updater swaps the pending map, applies the drained deltas in one
//! transaction, and commits. When nothing is pending it parks for the
//! configured interval; a shutdown request unparks it, it drains once
//! more, and exits. Per-task failures skip that task's delta and the batch
//! continues; the report bytes are already on disk, which is the source
//! of truth.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use xtrace_error::{Result, XTraceError};

use crate::index::{join_with_commas, merge_tags_csv, MetadataIndex};
use crate::pending::{PendingUpdate, PendingUpdates};

/// Handle to the updater thread.
pub struct IndexUpdater {
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl IndexUpdater {
    /// Spawn the updater thread.
    pub fn spawn(
        pending: Arc<PendingUpdates>,
        index: Arc<Mutex<Option<MetadataIndex>>>,
        interval: Duration,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);
        let worker = thread::Builder::new()
            .name("xtrace-index-updater".to_owned())
            .spawn(move || {
                info!("index updater thread started");
                loop {
                    let stopping = worker_stop.load(Ordering::Acquire);
                    let drained = pending.swap();
                    if !drained.is_empty() {
                        apply_batch(&index, &drained);
                    }
                    if stopping {
                        info!("index updater thread exiting");
                        return;
                    }
                    if drained.is_empty() {
                        thread::park_timeout(interval);
                    }
                }
            })
            .map_err(|err| XTraceError::Shutdown {
                detail: format!("failed to spawn index updater thread: {err}"),
            })?;
        Ok(Self {
            stop,
            worker: Some(worker),
        })
    }

    /// Request shutdown, wait for the final drain, and join. Idempotent.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            worker.thread().unpark();
            if worker.join().is_err() {
                warn!("index updater thread panicked during shutdown");
            }
        }
    }
}

impl Drop for IndexUpdater {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Apply one drained batch inside a single transaction.
fn apply_batch(index: &Mutex<Option<MetadataIndex>>, batch: &HashMap<String, PendingUpdate>) {
    let guard = index.lock();
    let Some(index) = guard.as_ref() else {
        warn!(
            tasks = batch.len(),
            "index already closed; dropping metadata batch (reports remain on disk)"
        );
        return;
    };

    if let Err(err) = index.begin() {
        warn!(error = %err, "could not begin index transaction; dropping batch");
        return;
    }
    for (task_id, delta) in batch {
        if let Err(err) = apply_one(index, task_id, delta) {
            warn!(
                task_id = %task_id,
                error = %err,
                "error updating task metadata; skipping (report remains on disk)"
            );
        }
    }
    match index.commit() {
        Ok(()) => debug!(tasks = batch.len(), "committed metadata batch"),
        Err(err) => {
            warn!(error = %err, "error committing metadata batch");
            let _ = index.rollback();
        }
    }
}

/// Per-task update order: existence-check, then title, then tags, then the
/// report-count bump. Inserts carry the correct initial count, and a
/// first-observed title is persisted instead of the task-id default.
fn apply_one(index: &MetadataIndex, task_id: &str, delta: &PendingUpdate) -> Result<()> {
    if !index.task_exists(task_id)? {
        let title = delta.title.as_deref().unwrap_or(task_id);
        let tags_csv = delta
            .tags
            .as_ref()
            .map(|tags| join_with_commas(tags.iter().map(String::as_str)))
            .unwrap_or_default();
        index.insert_task(task_id, &tags_csv, title, delta.new_report_count)?;
        return Ok(());
    }

    if let Some(title) = &delta.title {
        index.set_title(task_id, title)?;
    }
    if let Some(tags) = &delta.tags {
        let current = index.read_tags(task_id)?;
        index.set_tags(task_id, &merge_tags_csv(&current, tags))?;
    }
    index.bump_reports(task_id, delta.new_report_count)?;
    Ok(())
}
