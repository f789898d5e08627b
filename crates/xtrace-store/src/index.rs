//! Embedded relational index over task metadata.
//!
//! One row per task id in a SQLite database under the store root. All
//! mutations run inside explicit transactions driven by the updater;
//! readers observe committed state only. The schema and the prepared-query
//! surface are the contract here, not the engine.
//!
//! Timestamps are integer milliseconds since the Unix epoch. Tags are
//! serialized as a comma-delimited string in the row; the SQL `LIKE` tag
//! search is only a pre-filter, exact-tag equality is decided client-side.

use std::collections::BTreeSet;
use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;
use xtrace_error::{Result, XTraceError};
use xtrace_types::{TaskId, TaskRecord};

use crate::now_millis;

/// Filename of the embedded database under the store root.
pub const INDEX_FILE_NAME: &str = "tasks.db";

const SELECT_RECORD: &str =
    "SELECT task_id, first_seen, last_updated, num_reports, tags, title FROM tasks";

/// The task metadata index.
pub struct MetadataIndex {
    conn: Connection,
}

impl MetadataIndex {
    /// Open (creating if necessary) the index under `root`. Fails fast on
    /// any engine error; the store cannot run without its index.
    pub fn open(root: &Path) -> Result<Self> {
        let path = root.join(INDEX_FILE_NAME);
        let conn = Connection::open(&path).map_err(index_err)?;
        // journal_mode is a row-returning pragma; query it instead of
        // batching it.
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
            .map_err(index_err)?;
        conn.execute_batch("PRAGMA synchronous = NORMAL;")
            .map_err(index_err)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tasks (\n\
                 task_id      TEXT PRIMARY KEY,\n\
                 first_seen   INTEGER NOT NULL,\n\
                 last_updated INTEGER NOT NULL,\n\
                 num_reports  INTEGER NOT NULL DEFAULT 1,\n\
                 tags         TEXT,\n\
                 title        TEXT\n\
             );\n\
             CREATE INDEX IF NOT EXISTS idx_tasks_first_seen ON tasks(first_seen);\n\
             CREATE INDEX IF NOT EXISTS idx_tasks_last_updated ON tasks(last_updated);\n\
             CREATE INDEX IF NOT EXISTS idx_tasks_tags ON tasks(tags);\n\
             CREATE INDEX IF NOT EXISTS idx_tasks_title ON tasks(title);",
        )
        .map_err(index_err)?;
        info!(path = %path.display(), "opened task metadata index");
        Ok(Self { conn })
    }

    // --- transaction control (driven by the updater) -------------------

    /// Begin an explicit transaction.
    pub fn begin(&self) -> Result<()> {
        self.conn.execute_batch("BEGIN").map_err(index_err)
    }

    /// Commit the open transaction.
    pub fn commit(&self) -> Result<()> {
        self.conn.execute_batch("COMMIT").map_err(index_err)
    }

    /// Roll back the open transaction, if any.
    pub fn rollback(&self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK").map_err(index_err)
    }

    // --- mutations -----------------------------------------------------

    /// Whether a row exists for `task_id`.
    pub fn task_exists(&self, task_id: &str) -> Result<bool> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT 1 FROM tasks WHERE task_id = ?1")
            .map_err(index_err)?;
        stmt.query_row(params![task_id], |_| Ok(()))
            .optional()
            .map(|found| found.is_some())
            .map_err(index_err)
    }

    /// Insert a new row with `first_seen = last_updated = now`.
    pub fn insert_task(
        &self,
        task_id: &str,
        tags_csv: &str,
        title: &str,
        num_reports: u64,
    ) -> Result<()> {
        let now = to_db(now_millis());
        let mut stmt = self
            .conn
            .prepare_cached(
                "INSERT INTO tasks (task_id, first_seen, last_updated, num_reports, tags, title) \
                 VALUES (?1, ?2, ?2, ?3, ?4, ?5)",
            )
            .map_err(index_err)?;
        stmt.execute(params![task_id, now, to_db(num_reports), tags_csv, title])
            .map_err(index_err)?;
        Ok(())
    }

    /// `num_reports += delta; last_updated = now`.
    pub fn bump_reports(&self, task_id: &str, delta: u64) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "UPDATE tasks SET num_reports = num_reports + ?1, last_updated = ?2 \
                 WHERE task_id = ?3",
            )
            .map_err(index_err)?;
        stmt.execute(params![to_db(delta), to_db(now_millis()), task_id])
            .map_err(index_err)?;
        Ok(())
    }

    /// Overwrite the title.
    pub fn set_title(&self, task_id: &str, title: &str) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare_cached("UPDATE tasks SET title = ?1 WHERE task_id = ?2")
            .map_err(index_err)?;
        stmt.execute(params![title, task_id]).map_err(index_err)?;
        Ok(())
    }

    /// Current tags CSV for `task_id` (empty when absent or null); the
    /// updater reads, unions, and writes back.
    pub fn read_tags(&self, task_id: &str) -> Result<String> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT tags FROM tasks WHERE task_id = ?1")
            .map_err(index_err)?;
        let tags: Option<Option<String>> = stmt
            .query_row(params![task_id], |row| row.get(0))
            .optional()
            .map_err(index_err)?;
        Ok(tags.flatten().unwrap_or_default())
    }

    /// Overwrite the tags CSV.
    pub fn set_tags(&self, task_id: &str, tags_csv: &str) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare_cached("UPDATE tasks SET tags = ?1 WHERE task_id = ?2")
            .map_err(index_err)?;
        stmt.execute(params![tags_csv, task_id]).map_err(index_err)?;
        Ok(())
    }

    /// Backdate a row's interval. Maintenance hook for re-indexing; the
    /// overlap tests also lean on it to build known windows.
    pub(crate) fn set_times(&self, task_id: &str, first_seen: u64, last_updated: u64) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare_cached("UPDATE tasks SET first_seen = ?1, last_updated = ?2 WHERE task_id = ?3")
            .map_err(index_err)?;
        stmt.execute(params![to_db(first_seen), to_db(last_updated), task_id])
            .map_err(index_err)?;
        Ok(())
    }

    // --- listings ------------------------------------------------------

    /// Tasks first seen at or after `first_seen_at_least`, most recently
    /// updated first.
    pub fn tasks_since(
        &self,
        first_seen_at_least: u64,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<TaskRecord>> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!(
                "{SELECT_RECORD} WHERE first_seen >= ?1 ORDER BY last_updated DESC \
                 LIMIT ?2 OFFSET ?3"
            ))
            .map_err(index_err)?;
        let rows = stmt
            .query_map(
                params![to_db(first_seen_at_least), window(limit), window(offset)],
                read_task_record,
            )
            .map_err(index_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(index_err)
    }

    /// Ids of tasks whose interval intersects `[lower, upper]`:
    /// `first_seen <= upper AND last_updated >= lower`.
    pub fn tasks_between(&self, upper: u64, lower: u64) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT task_id FROM tasks WHERE first_seen <= ?1 AND last_updated >= ?2",
            )
            .map_err(index_err)?;
        let rows = stmt
            .query_map(params![to_db(upper), to_db(lower)], |row| row.get(0))
            .map_err(index_err)?;
        rows.collect::<rusqlite::Result<Vec<String>>>().map_err(index_err)
    }

    /// All tasks, most recently updated first.
    pub fn latest_tasks(&self, offset: usize, limit: usize) -> Result<Vec<TaskRecord>> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!(
                "{SELECT_RECORD} ORDER BY last_updated DESC LIMIT ?1 OFFSET ?2"
            ))
            .map_err(index_err)?;
        let rows = stmt
            .query_map(params![window(limit), window(offset)], read_task_record)
            .map_err(index_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(index_err)
    }

    /// Tasks carrying `tag` exactly. The SQL `LIKE` narrows candidates;
    /// membership and the pagination window are decided on the exact
    /// matches.
    pub fn tasks_by_tag(&self, tag: &str, offset: usize, limit: usize) -> Result<Vec<TaskRecord>> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!(
                "{SELECT_RECORD} WHERE tags LIKE '%' || ?1 || '%' ORDER BY last_updated DESC"
            ))
            .map_err(index_err)?;
        let rows = stmt
            .query_map(params![tag], read_task_record)
            .map_err(index_err)?;

        let mut out = Vec::new();
        let mut matched = 0_usize;
        for row in rows {
            let record = row.map_err(index_err)?;
            if !record.has_tag(tag) {
                continue;
            }
            if matched >= offset && out.len() < limit {
                out.push(record);
            }
            matched += 1;
            if matched >= offset.saturating_add(limit) {
                break;
            }
        }
        Ok(out)
    }

    /// Tasks whose title equals `title` (case-insensitive), most recently
    /// updated first.
    pub fn tasks_by_title(&self, title: &str, offset: usize, limit: usize) -> Result<Vec<TaskRecord>> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!(
                "{SELECT_RECORD} WHERE title = ?1 COLLATE NOCASE \
                 ORDER BY last_updated DESC LIMIT ?2 OFFSET ?3"
            ))
            .map_err(index_err)?;
        let rows = stmt
            .query_map(params![title, window(limit), window(offset)], read_task_record)
            .map_err(index_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(index_err)
    }

    /// Tasks whose title contains `title` (case-insensitive), most
    /// recently updated first.
    pub fn tasks_by_title_approx(
        &self,
        title: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<TaskRecord>> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!(
                "{SELECT_RECORD} WHERE title LIKE '%' || ?1 || '%' \
                 ORDER BY last_updated DESC LIMIT ?2 OFFSET ?3"
            ))
            .map_err(index_err)?;
        let rows = stmt
            .query_map(params![title, window(limit), window(offset)], read_task_record)
            .map_err(index_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(index_err)
    }

    // --- scalar lookups ------------------------------------------------

    /// Committed report count for `task_id`, if a row exists.
    pub fn num_reports_of(&self, task_id: &str) -> Result<Option<u64>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT num_reports FROM tasks WHERE task_id = ?1")
            .map_err(index_err)?;
        let count: Option<i64> = stmt
            .query_row(params![task_id], |row| row.get(0))
            .optional()
            .map_err(index_err)?;
        Ok(count.map(from_db))
    }

    /// Last update time for `task_id`, if a row exists.
    pub fn last_updated_of(&self, task_id: &str) -> Result<Option<u64>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT last_updated FROM tasks WHERE task_id = ?1")
            .map_err(index_err)?;
        let ts: Option<i64> = stmt
            .query_row(params![task_id], |row| row.get(0))
            .optional()
            .map_err(index_err)?;
        Ok(ts.map(from_db))
    }

    /// `(first_seen, last_updated)` for `task_id`, if a row exists.
    pub fn times_of(&self, task_id: &str) -> Result<Option<(u64, u64)>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT first_seen, last_updated FROM tasks WHERE task_id = ?1")
            .map_err(index_err)?;
        let times: Option<(i64, i64)> = stmt
            .query_row(params![task_id], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()
            .map_err(index_err)?;
        Ok(times.map(|(f, l)| (from_db(f), from_db(l))))
    }

    /// Committed tags for `task_id` (empty when absent).
    pub fn tags_of(&self, task_id: &str) -> Result<Vec<String>> {
        Ok(split_csv(&self.read_tags(task_id)?))
    }

    /// Sum of committed report counts across all tasks.
    pub fn total_reports(&self) -> Result<u64> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT COALESCE(SUM(num_reports), 0) FROM tasks")
            .map_err(index_err)?;
        let total: i64 = stmt.query_row([], |row| row.get(0)).map_err(index_err)?;
        Ok(from_db(total))
    }

    /// Number of distinct tasks.
    pub fn total_tasks(&self) -> Result<u64> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT COUNT(DISTINCT task_id) FROM tasks")
            .map_err(index_err)?;
        let total: i64 = stmt.query_row([], |row| row.get(0)).map_err(index_err)?;
        Ok(from_db(total))
    }
}

fn read_task_record(row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
    let task_hex: String = row.get("task_id")?;
    let task_id = TaskId::from_hex(&task_hex).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err))
    })?;
    let tags: Option<String> = row.get("tags")?;
    let title: Option<String> = row.get("title")?;
    Ok(TaskRecord {
        task_id,
        first_seen: from_db(row.get("first_seen")?),
        last_updated: from_db(row.get("last_updated")?),
        num_reports: from_db(row.get("num_reports")?),
        title: title.unwrap_or(task_hex),
        tags: split_csv(&tags.unwrap_or_default()),
    })
}

fn index_err(err: rusqlite::Error) -> XTraceError {
    XTraceError::Index {
        detail: err.to_string(),
    }
}

fn to_db(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_db(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn window(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Join tags into the comma-delimited row form.
pub(crate) fn join_with_commas<'a>(tags: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for tag in tags {
        if !out.is_empty() {
            out.push(',');
        }
        out.push_str(tag);
    }
    out
}

/// Split the comma-delimited row form, dropping empty segments.
pub(crate) fn split_csv(csv: &str) -> Vec<String> {
    csv.split(',')
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Union an existing CSV with newly observed tags.
pub(crate) fn merge_tags_csv(current: &str, new_tags: &BTreeSet<String>) -> String {
    let mut merged: BTreeSet<String> = split_csv(current).into_iter().collect();
    merged.extend(new_tags.iter().cloned());
    join_with_commas(merged.iter().map(String::as_str))
}
