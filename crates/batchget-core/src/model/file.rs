//! File rows, priorities, and the per-file event history.

use serde::{Deserialize, Serialize};

/// Sentinel for a remote size that has not been resolved yet.
pub const UNKNOWN_SIZE: i64 = -1;

/// Lifecycle of one file within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    New,
    Queued,
    Downloading,
    Stopping,
    Stopped,
    Completed,
    Failed,
    Invalid,
}

impl FileStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::New => "new",
            FileStatus::Queued => "queued",
            FileStatus::Downloading => "downloading",
            FileStatus::Stopping => "stopping",
            FileStatus::Stopped => "stopped",
            FileStatus::Completed => "completed",
            FileStatus::Failed => "failed",
            FileStatus::Invalid => "invalid",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "new" => FileStatus::New,
            "queued" => FileStatus::Queued,
            "downloading" => FileStatus::Downloading,
            "stopping" => FileStatus::Stopping,
            "stopped" => FileStatus::Stopped,
            "completed" => FileStatus::Completed,
            "failed" => FileStatus::Failed,
            _ => FileStatus::Invalid,
        }
    }

    /// Whether a start request should (re)enqueue a file in this state.
    pub fn is_startable(self) -> bool {
        matches!(
            self,
            FileStatus::New | FileStatus::Stopped | FileStatus::Failed | FileStatus::Queued
        )
    }
}

/// Download priority. Lower rank is more urgent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    pub fn rank(self) -> u8 {
        match self {
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }

    pub fn from_rank(rank: i64) -> Self {
        match rank {
            i64::MIN..=1 => Priority::High,
            2 => Priority::Normal,
            _ => Priority::Low,
        }
    }
}

/// One line of a file's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvent {
    pub timestamp: String,
    pub message: String,
}

impl FileEvent {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            timestamp: super::event_timestamp(),
            message: message.into(),
        }
    }
}

/// A file of a job, keyed by `name` within that job.
///
/// Rows read back from the store carry no events; the history is loaded
/// separately (`Store::get_file_events`) and the cache appends new ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub url: String,
    pub status: FileStatus,
    /// `UNKNOWN_SIZE` until resolved.
    pub size_bytes: i64,
    pub downloaded_bytes: i64,
    pub priority: Priority,
    pub selected: bool,
    pub events: Vec<FileEvent>,
}

impl FileEntry {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            status: FileStatus::New,
            size_bytes: UNKNOWN_SIZE,
            downloaded_bytes: 0,
            priority: Priority::Normal,
            selected: true,
            events: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn has_known_size(&self) -> bool {
        self.size_bytes >= 0
    }

    pub fn known_size(&self) -> Option<u64> {
        self.has_known_size().then_some(self.size_bytes as u64)
    }

    pub fn latest_event(&self) -> Option<&FileEvent> {
        self.events.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_status_roundtrip() {
        for s in [
            FileStatus::New,
            FileStatus::Queued,
            FileStatus::Downloading,
            FileStatus::Stopping,
            FileStatus::Stopped,
            FileStatus::Completed,
            FileStatus::Failed,
            FileStatus::Invalid,
        ] {
            assert_eq!(FileStatus::from_str(s.as_str()), s);
        }
    }

    #[test]
    fn priority_rank_orders_by_urgency() {
        assert!(Priority::High.rank() < Priority::Normal.rank());
        assert!(Priority::Normal.rank() < Priority::Low.rank());
        assert_eq!(Priority::from_rank(1), Priority::High);
        assert_eq!(Priority::from_rank(2), Priority::Normal);
        assert_eq!(Priority::from_rank(7), Priority::Low);
    }

    #[test]
    fn new_file_has_unknown_size() {
        let f = FileEntry::new("x.iso", "https://example.com/x.iso");
        assert!(!f.has_known_size());
        assert_eq!(f.known_size(), None);
        assert!(f.selected);
        assert_eq!(f.status, FileStatus::New);
    }
}
