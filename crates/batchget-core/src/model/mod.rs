//! Jobs, files, and the states they move through.
//!
//! These are the persisted shapes shared by the store, the update cycle and
//! the engines. Partial updates to them travel as diffs (see `journal`).

mod file;
mod job;

pub use file::{FileEntry, FileEvent, FileStatus, Priority, UNKNOWN_SIZE};
pub use job::{Job, JobId, JobStatus};

use std::time::{SystemTime, UNIX_EPOCH};

/// Fixed-width, lexicographically sortable timestamp for file events:
/// microseconds since the Unix epoch, zero-padded to 20 digits.
pub fn event_timestamp() -> String {
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros();
    format!("{:020}", micros)
}
