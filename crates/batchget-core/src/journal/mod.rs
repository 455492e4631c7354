//! Progress journals: what changed for a job since the last tick.
//!
//! Worker threads never touch the store. They report into the
//! [`JournalDaemon`], which accumulates one [`ProgressJournal`] per job and
//! hands the whole batch to the update cycle once per tick.

mod daemon;
pub mod derived;
mod diff;

use std::collections::{BTreeSet, HashMap};

pub use daemon::{JournalConsumer, JournalDaemon};
pub use derived::{derive_fields, DerivedFields, Snapshot};
pub use diff::{FileDiff, JobDiff};

use crate::model::{FileEvent, JobId};

/// One tick's worth of journals, keyed by job.
pub type JournalBatch = HashMap<JobId, ProgressJournal>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressJournal {
    pub job: Option<JobDiff>,
    pub files: HashMap<String, FileDiff>,
    /// New history lines per file, oldest first.
    pub events: HashMap<String, Vec<FileEvent>>,
    /// One-shot job-level messages (e.g. a failed resume).
    pub notices: Vec<String>,
}

impl ProgressJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `other` into `self`: set fields of `other` win, event lists and
    /// notices concatenate.
    pub fn merge(&mut self, other: ProgressJournal) {
        if let Some(job) = other.job {
            self.job_mut().merge(job);
        }
        for (name, diff) in other.files {
            self.file_mut(&name).merge(diff);
        }
        for (name, events) in other.events {
            self.events.entry(name).or_default().extend(events);
        }
        self.notices.extend(other.notices);
    }

    pub fn job_mut(&mut self) -> &mut JobDiff {
        self.job.get_or_insert_with(JobDiff::default)
    }

    pub fn file_mut(&mut self, name: &str) -> &mut FileDiff {
        self.files.entry(name.to_string()).or_default()
    }

    pub fn push_event(&mut self, name: &str, event: FileEvent) {
        self.events.entry(name.to_string()).or_default().push(event);
    }

    pub fn notice(&mut self, message: impl Into<String>) {
        self.notices.push(message.into());
    }

    /// Files with a diff or new events, in name order.
    pub fn touched_files(&self) -> BTreeSet<String> {
        self.files
            .keys()
            .chain(self.events.keys())
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.job.as_ref().map_or(true, JobDiff::is_empty)
            && self.files.values().all(FileDiff::is_empty)
            && self.events.values().all(Vec::is_empty)
            && self.notices.is_empty()
    }
}

/// Merge `journal` into the batch entry for `job`.
pub fn merge_into(batch: &mut JournalBatch, job: JobId, journal: ProgressJournal) {
    batch.entry(job).or_default().merge(journal);
}
