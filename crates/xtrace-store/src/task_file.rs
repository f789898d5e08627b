//! On-disk layout of the task-sharded report tree.
//!
//! Each task's reports live in `<root>/<id[0..2]>/<ID>.txt`, an append-only
//! concatenation of raw report texts separated by blank lines. This module
//! maps task ids to paths and streams reports back out of a task file; the
//! write side goes through [`crate::handle_cache`].

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::warn;
use xtrace_types::{Report, REPORT_HEADER_PREFIX};

/// Reader buffer size for report streaming.
const READ_BUFFER_BYTES: usize = 4096;

/// Path of the append-only report file for `task_id` (canonical uppercase
/// hex, at least two characters, enforced upstream by the handle cache).
#[must_use]
pub fn task_file_path(root: &Path, task_id: &str) -> PathBuf {
    root.join(&task_id[..2]).join(format!("{task_id}.txt"))
}

/// Lazy, forward-only sequence of the reports recorded for one task.
///
/// Scans for lines starting with the report header prefix, accumulates
/// until a blank line (or end of file), and yields the assembled report.
/// Not restartable; a read error silently ends the sequence. A missing
/// file yields an empty sequence.
pub struct ReportIterator {
    reader: Option<BufReader<File>>,
}

impl ReportIterator {
    /// Open the report stream for `task_id` under `root`.
    #[must_use]
    pub fn open(root: &Path, task_id: &str) -> Self {
        let reader = File::open(task_file_path(root, task_id))
            .ok()
            .map(|f| BufReader::with_capacity(READ_BUFFER_BYTES, f));
        Self { reader }
    }

    fn read_line(&mut self) -> Option<String> {
        let reader = self.reader.as_mut()?;
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => {
                while line.ends_with('\n') || line.ends_with('\r') {
                    line.pop();
                }
                Some(line)
            }
            Err(err) => {
                warn!(error = %err, "I/O error while streaming reports; ending iteration");
                self.reader = None;
                None
            }
        }
    }
}

impl Iterator for ReportIterator {
    type Item = Report;

    fn next(&mut self) -> Option<Report> {
        loop {
            // Skip to the next frame start.
            let mut line = loop {
                let line = self.read_line()?;
                if line.starts_with(REPORT_HEADER_PREFIX) {
                    break line;
                }
            };

            // Accumulate until the blank-line terminator or end of file.
            let mut buf = String::new();
            loop {
                buf.push_str(&line);
                buf.push('\n');
                match self.read_line() {
                    Some(next) if !next.is_empty() => line = next,
                    _ => break,
                }
            }

            match Report::parse(&buf) {
                Ok(report) => return Some(report),
                // A frame that starts like a report but fails to parse is
                // skipped; later frames may still be intact.
                Err(err) => warn!(error = %err, "skipping unparseable report frame"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::tempdir;
    use xtrace_types::{OpId, TaskId, XTraceMetadata, REPORT_HEADER};

    use super::*;

    const TASK: &str = "ABCDEF0123456789";

    fn write_frames(root: &Path, task_id: &str, frames: &[String]) {
        let path = task_file_path(root, task_id);
        std::fs::create_dir_all(path.parent().expect("shard dir")).expect("mkdir");
        let mut file = File::create(&path).expect("create task file");
        for frame in frames {
            write!(file, "{frame}\n\n").expect("write frame");
        }
    }

    fn frame(body: &str) -> String {
        let meta = XTraceMetadata::new(
            TaskId::from_hex(TASK).expect("task id"),
            OpId::from_bytes(&[1, 2, 3, 4]).expect("op id"),
        );
        format!("{REPORT_HEADER}\nX-Trace: {}\n{body}", meta.to_hex())
    }

    #[test]
    fn test_task_file_path_shards_by_prefix() {
        let path = task_file_path(Path::new("/data"), TASK);
        assert_eq!(path, Path::new("/data/AB/ABCDEF0123456789.txt"));
    }

    #[test]
    fn test_iterates_all_frames() {
        let dir = tempdir().expect("tempdir");
        write_frames(
            dir.path(),
            TASK,
            &[frame("Seq: 0"), frame("Seq: 1"), frame("Seq: 2")],
        );
        let reports: Vec<Report> = ReportIterator::open(dir.path(), TASK).collect();
        assert_eq!(reports.len(), 3);
        for (i, report) in reports.iter().enumerate() {
            assert_eq!(report.get("Seq"), Some(&[i.to_string()][..]));
        }
    }

    #[test]
    fn test_missing_file_yields_empty() {
        let dir = tempdir().expect("tempdir");
        assert_eq!(ReportIterator::open(dir.path(), TASK).count(), 0);
    }

    #[test]
    fn test_final_frame_without_terminator_is_yielded() {
        let dir = tempdir().expect("tempdir");
        let path = task_file_path(dir.path(), TASK);
        std::fs::create_dir_all(path.parent().expect("shard dir")).expect("mkdir");
        let mut file = File::create(&path).expect("create");
        write!(file, "{}\n\n{}", frame("Seq: 0"), frame("Seq: 1")).expect("write");
        assert_eq!(ReportIterator::open(dir.path(), TASK).count(), 2);
    }

    #[test]
    fn test_leading_junk_is_skipped() {
        let dir = tempdir().expect("tempdir");
        let path = task_file_path(dir.path(), TASK);
        std::fs::create_dir_all(path.parent().expect("shard dir")).expect("mkdir");
        let mut file = File::create(&path).expect("create");
        write!(file, "garbage line\n\n{}\n\n", frame("Seq: 0")).expect("write");
        assert_eq!(ReportIterator::open(dir.path(), TASK).count(), 1);
    }
}
