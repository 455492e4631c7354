//! Startup reconciliation and on-disk integrity checks.
//!
//! Persisted statuses are what the process believed when it last ran. On
//! launch each selected file is brought back in line: interrupted stops
//! finish, interrupted transfers resume, queued files re-enter the queue, and
//! completed files are checked against the bytes recorded for them. A
//! completed file that no longer matches is marked Invalid; it is never
//! re-downloaded behind the user's back.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use super::EngineInner;
use crate::model::{FileEntry, FileStatus};

/// Why a completed file failed verification.
#[derive(Debug, thiserror::Error)]
pub enum IntegrityError {
    #[error("corrupted: file is missing from disk")]
    Missing,
    #[error("corrupted: {actual} of {expected} bytes on disk")]
    Undersized { expected: u64, actual: u64 },
    #[error("cannot inspect file: {0}")]
    Unreadable(#[source] io::Error),
}

/// Check that `path` is a regular file holding at least `expected` bytes.
pub fn check_integrity(path: &Path, expected: i64) -> Result<(), IntegrityError> {
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(IntegrityError::Missing),
        Err(e) => return Err(IntegrityError::Unreadable(e)),
    };
    if !meta.is_file() {
        return Err(IntegrityError::Missing);
    }
    let expected = expected.max(0) as u64;
    if meta.len() < expected {
        return Err(IntegrityError::Undersized {
            expected,
            actual: meta.len(),
        });
    }
    Ok(())
}

pub(super) fn reconcile(inner: &EngineInner, files: Vec<FileEntry>) {
    let journal = &inner.ctx.journal;
    if let Err(e) = std::fs::create_dir_all(&inner.folder) {
        tracing::error!(job = inner.job, folder = %inner.folder.display(), error = %e, "resume failed");
        journal.job_notice(
            inner.job,
            format!("resume failed: cannot create {}: {e}", inner.folder.display()),
        );
        return;
    }

    let mut requeue = Vec::new();
    for file in files.into_iter().filter(|f| f.selected) {
        if inner.is_closing() {
            return;
        }
        match file.status {
            FileStatus::Queued => requeue.push(file),
            _ => guarded(inner, &file.name, || reconcile_one(inner, file.clone())),
        }
    }

    let mut count = 0usize;
    for file in requeue {
        let name = file.name.clone();
        guarded(inner, &name, || {
            if inner.enqueue(file) {
                journal.add_file_event(inner.job, &name, "re-queued after restart");
                count += 1;
            }
        });
    }
    tracing::debug!(job = inner.job, requeued = count, "resume finished");
}

fn reconcile_one(inner: &EngineInner, file: FileEntry) {
    let journal = &inner.ctx.journal;
    match file.status {
        FileStatus::Stopping => {
            journal.file_transition(
                inner.job,
                &file.name,
                FileStatus::Stopped,
                "stopped after restart",
            );
        }
        FileStatus::Downloading => {
            let name = file.name.clone();
            if inner.enqueue(file) {
                journal.add_file_event(inner.job, &name, "resuming after restart");
            }
        }
        FileStatus::Completed => {
            verify(inner, &file, false);
        }
        _ => {}
    }
}

/// Verify completed files only.
pub(super) fn health_check(inner: &EngineInner, files: Vec<FileEntry>) {
    let mut invalid = 0usize;
    for file in files
        .iter()
        .filter(|f| f.selected && f.status == FileStatus::Completed)
    {
        if inner.is_closing() {
            break;
        }
        guarded(inner, &file.name, || {
            if !verify(inner, file, true) {
                invalid += 1;
            }
        });
    }
    tracing::info!(job = inner.job, invalid, "health check finished");
}

/// Returns whether the file passed.
fn verify(inner: &EngineInner, file: &FileEntry, report_pass: bool) -> bool {
    let journal = &inner.ctx.journal;
    let path = inner.folder.join(&file.name);
    match check_integrity(&path, file.downloaded_bytes) {
        Ok(()) => {
            if report_pass {
                journal.add_file_event(inner.job, &file.name, "health check passed");
            }
            true
        }
        Err(e) => {
            tracing::warn!(job = inner.job, file = %file.name, error = %e, "integrity check failed");
            journal.file_transition(inner.job, &file.name, FileStatus::Invalid, &e.to_string());
            false
        }
    }
}

/// One bad file must not abort the rest.
fn guarded(inner: &EngineInner, name: &str, stage: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(stage)).is_err() {
        tracing::error!(job = inner.job, file = %name, "reconciliation step panicked");
        inner
            .ctx
            .journal
            .add_file_event(inner.job, name, "reconciliation failed for this file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_corrupted() {
        let dir = tempfile::tempdir().unwrap();
        let err = check_integrity(&dir.path().join("gone.iso"), 10).unwrap_err();
        assert!(matches!(err, IntegrityError::Missing));
        assert!(err.to_string().contains("corrupted"));
    }

    #[test]
    fn directory_counts_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            check_integrity(dir.path(), 0),
            Err(IntegrityError::Missing)
        ));
    }

    #[test]
    fn undersized_file_reports_both_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.iso");
        std::fs::write(&path, vec![0u8; 900]).unwrap();
        let err = check_integrity(&path, 1000).unwrap_err();
        assert_eq!(err.to_string(), "corrupted: 900 of 1000 bytes on disk");
    }

    #[test]
    fn full_or_larger_file_passes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.iso");
        std::fs::write(&path, vec![0u8; 1000]).unwrap();
        assert!(check_integrity(&path, 1000).is_ok());
        assert!(check_integrity(&path, 999).is_ok());
    }
}
