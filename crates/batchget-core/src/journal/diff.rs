//! Sparse field-level changes to a job or file row.
//!
//! `None` means "unchanged". Merging lets the later value of every set field
//! win, so several updates between two ticks collapse into one diff.

use serde::Serialize;

use crate::model::{FileEvent, FileStatus, JobStatus, Priority};

fn overwrite<T>(dst: &mut Option<T>, src: Option<T>) {
    if src.is_some() {
        *dst = src;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobDiff {
    pub status: Option<JobStatus>,
    pub threads_allocated: Option<i64>,
    pub total_size_bytes: Option<i64>,
    pub downloaded_bytes: Option<i64>,
    pub files_done: Option<i64>,
    pub selected_files_count: Option<i64>,
    pub selected_files_with_known_size: Option<i64>,
    pub rate_bps: Option<u64>,
    pub eta_secs: Option<u64>,
    pub percent: Option<u8>,
}

impl JobDiff {
    pub fn merge(&mut self, other: JobDiff) {
        overwrite(&mut self.status, other.status);
        overwrite(&mut self.threads_allocated, other.threads_allocated);
        overwrite(&mut self.total_size_bytes, other.total_size_bytes);
        overwrite(&mut self.downloaded_bytes, other.downloaded_bytes);
        overwrite(&mut self.files_done, other.files_done);
        overwrite(&mut self.selected_files_count, other.selected_files_count);
        overwrite(
            &mut self.selected_files_with_known_size,
            other.selected_files_with_known_size,
        );
        overwrite(&mut self.rate_bps, other.rate_bps);
        overwrite(&mut self.eta_secs, other.eta_secs);
        overwrite(&mut self.percent, other.percent);
    }

    pub fn is_empty(&self) -> bool {
        *self == JobDiff::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileDiff {
    pub status: Option<FileStatus>,
    pub size_bytes: Option<i64>,
    pub downloaded_bytes: Option<i64>,
    pub priority: Option<Priority>,
    pub selected: Option<bool>,
    pub rate_bps: Option<u64>,
    pub eta_secs: Option<u64>,
    pub percent: Option<u8>,
    /// Filled in by the update cycle once new events are persisted.
    pub latest_event: Option<FileEvent>,
}

impl FileDiff {
    pub fn merge(&mut self, other: FileDiff) {
        overwrite(&mut self.status, other.status);
        overwrite(&mut self.size_bytes, other.size_bytes);
        overwrite(&mut self.downloaded_bytes, other.downloaded_bytes);
        overwrite(&mut self.priority, other.priority);
        overwrite(&mut self.selected, other.selected);
        overwrite(&mut self.rate_bps, other.rate_bps);
        overwrite(&mut self.eta_secs, other.eta_secs);
        overwrite(&mut self.percent, other.percent);
        overwrite(&mut self.latest_event, other.latest_event);
    }

    pub fn is_empty(&self) -> bool {
        *self == FileDiff::default()
    }
}
