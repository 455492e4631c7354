//! Background HEAD probes for files whose remote size is unknown.

use super::EngineInner;
use crate::model::FileEntry;
use crate::retry::run_with_retry;
use crate::transfer::TransferError;

pub(super) fn resolve_sizes(inner: &EngineInner, files: Vec<FileEntry>) {
    let journal = &inner.ctx.journal;
    let mut resolved = 0usize;
    for file in files.iter().filter(|f| !f.has_known_size()) {
        if inner.is_closing() {
            break;
        }
        let result = run_with_retry(&inner.ctx.resolve_policy, || {
            if inner.is_closing() {
                return Err(TransferError::Other("engine shutting down".into()));
            }
            inner.ctx.transfer.resolve_remote_size(&file.url)
        });
        match result {
            Ok(size) => {
                journal.update_file_size(inner.job, &file.name, size as i64);
                journal.add_file_event(
                    inner.job,
                    &file.name,
                    format!("size resolved: {size} bytes"),
                );
                resolved += 1;
            }
            Err(e) => {
                tracing::warn!(job = inner.job, file = %file.name, error = %e, "size resolution failed");
                journal.add_file_event(
                    inner.job,
                    &file.name,
                    format!("size resolution failed: {e}"),
                );
            }
        }
    }
    tracing::debug!(job = inner.job, resolved, "size resolution finished");
}
