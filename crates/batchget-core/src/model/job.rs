//! Job row and lifecycle.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::file::{FileEntry, FileStatus};

/// Job identifier (SQLite rowid).
pub type JobId = i64;

/// High-level job state stored as a string in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    NotRunning,
    Starting,
    Running,
    Stopping,
    Completed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::NotRunning => "not_running",
            JobStatus::Starting => "starting",
            JobStatus::Running => "running",
            JobStatus::Stopping => "stopping",
            JobStatus::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "starting" => JobStatus::Starting,
            "running" => JobStatus::Running,
            "stopping" => JobStatus::Stopping,
            "completed" => JobStatus::Completed,
            _ => JobStatus::NotRunning,
        }
    }
}

/// A named set of selected files sharing a target folder and lifecycle.
///
/// The byte and file counters are a cache of the selected files' state; the
/// update cycle recomputes them every tick the job is touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub status: JobStatus,
    pub folder: PathBuf,
    pub total_size_bytes: i64,
    pub downloaded_bytes: i64,
    pub selected_files_count: i64,
    pub selected_files_with_known_size: i64,
    pub files_done: i64,
    pub threads_allocated: i64,
}

impl Job {
    /// A not-yet-persisted job (id 0 until the store assigns one).
    pub fn new(name: impl Into<String>, folder: impl Into<PathBuf>, threads: usize) -> Self {
        Self {
            id: 0,
            name: name.into(),
            status: JobStatus::NotRunning,
            folder: folder.into(),
            total_size_bytes: 0,
            downloaded_bytes: 0,
            selected_files_count: 0,
            selected_files_with_known_size: 0,
            files_done: 0,
            threads_allocated: threads.max(1) as i64,
        }
    }

    /// All selected files are done. A job with nothing selected is never complete.
    pub fn is_complete(&self) -> bool {
        self.selected_files_count > 0 && self.files_done >= self.selected_files_count
    }

    /// Where `file_name` lives on disk for this job.
    pub fn local_path(&self, file_name: &str) -> PathBuf {
        local_path(&self.folder, file_name)
    }

    /// Add a newly selected file to the aggregate counters.
    pub fn adopt_file(&mut self, file: &FileEntry) {
        self.selected_files_count += 1;
        if file.has_known_size() {
            self.selected_files_with_known_size += 1;
            self.total_size_bytes += file.size_bytes;
        }
        self.downloaded_bytes += file.downloaded_bytes;
        if file.status == FileStatus::Completed {
            self.files_done += 1;
        }
    }

    /// Remove a file's contribution from the aggregate counters (manual
    /// removal and selected→unselected transitions share this arithmetic).
    pub fn forget_file(&mut self, file: &FileEntry) {
        self.selected_files_count = (self.selected_files_count - 1).max(0);
        if file.has_known_size() {
            self.selected_files_with_known_size = (self.selected_files_with_known_size - 1).max(0);
            self.total_size_bytes = (self.total_size_bytes - file.size_bytes).max(0);
        }
        self.downloaded_bytes = (self.downloaded_bytes - file.downloaded_bytes).max(0);
        if file.status == FileStatus::Completed {
            self.files_done = (self.files_done - 1).max(0);
        }
    }
}

pub(crate) fn local_path(folder: &Path, file_name: &str) -> PathBuf {
    folder.join(file_name)
}
