//! JSON export/import of a job definition.
//!
//! Only what is needed to recreate the job elsewhere travels: names, URLs,
//! priorities, selection and known sizes. Progress and history stay behind.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::model::{FileEntry, Job, Priority, UNKNOWN_SIZE};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobExport {
    pub name: String,
    pub folder: PathBuf,
    pub threads: i64,
    pub files: Vec<FileExport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileExport {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "selected_default")]
    pub selected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<i64>,
}

fn selected_default() -> bool {
    true
}

impl JobExport {
    pub fn from_job(job: &Job, files: &[FileEntry]) -> Self {
        Self {
            name: job.name.clone(),
            folder: job.folder.clone(),
            threads: job.threads_allocated,
            files: files
                .iter()
                .map(|f| FileExport {
                    name: f.name.clone(),
                    url: f.url.clone(),
                    priority: f.priority,
                    selected: f.selected,
                    size_bytes: f.has_known_size().then_some(f.size_bytes),
                })
                .collect(),
        }
    }

    /// Fresh rows for the imported files.
    pub fn file_entries(&self) -> Vec<FileEntry> {
        self.files
            .iter()
            .map(|f| FileEntry {
                priority: f.priority,
                selected: f.selected,
                size_bytes: f.size_bytes.filter(|s| *s >= 0).unwrap_or(UNKNOWN_SIZE),
                ..FileEntry::new(&f.name, &f.url)
            })
            .collect()
    }
}
