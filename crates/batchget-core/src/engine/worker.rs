//! Worker loop: pop, transfer, journal the outcome.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{ActiveTransfer, EngineInner, PoolState};
use crate::model::{FileEntry, FileStatus, Priority};
use crate::queue::Popped;
use crate::transfer::{
    CancelReason, TransferError, TransferOutcome, TransferProgress, TransferRequest,
    TransferSignal,
};

/// Minimum spacing between progress reports for one file.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

pub(super) fn run(inner: Arc<EngineInner>) {
    loop {
        let file = match inner.queue.pop() {
            Popped::Poison => break,
            Popped::File(file) => file,
        };
        let Some(slot) = InProgress::begin(&inner, &file) else {
            // Cancelled between pop and start.
            continue;
        };
        let attempt =
            panic::catch_unwind(AssertUnwindSafe(|| transfer(&inner, &file, &slot.signal)));
        finish(&inner, slot, file, attempt);
    }
    tracing::debug!(job = inner.job, "worker exiting");
}

/// Marks a file in progress for as long as it lives. Dropping it without
/// `release` (a panic while journaling) still frees the slot.
struct InProgress<'a> {
    inner: &'a EngineInner,
    name: String,
    signal: Arc<TransferSignal>,
    released: bool,
}

impl<'a> InProgress<'a> {
    fn begin(inner: &'a EngineInner, file: &FileEntry) -> Option<Self> {
        let mut pool = inner.pool.lock();
        if !pool.in_queue.remove(&file.name) {
            return None;
        }
        let signal = Arc::new(TransferSignal::new());
        pool.in_progress.insert(
            file.name.clone(),
            ActiveTransfer {
                priority: file.priority,
                signal: Arc::clone(&signal),
            },
        );
        inner.ctx.limiter.attach(&signal);
        inner.ctx.journal.file_transition(
            inner.job,
            &file.name,
            FileStatus::Downloading,
            "download started",
        );
        if let Some(size) = file.known_size() {
            inner
                .ctx
                .journal
                .update_file_size(inner.job, &file.name, size as i64);
        }
        tracing::debug!(job = inner.job, file = %file.name, "download started");
        Some(Self {
            inner,
            name: file.name.clone(),
            signal,
            released: false,
        })
    }

    /// Free the slot and run `then` under the same pool lock, so nobody sees
    /// the file neither active nor in its next state. `then` also gets the
    /// priority the file held while active.
    fn release(mut self, then: impl FnOnce(&mut PoolState, Option<Priority>)) {
        let inner = self.inner;
        let mut pool = inner.pool.lock();
        let priority = self.unlink(&mut pool);
        then(&mut pool, priority);
    }

    fn unlink(&mut self, pool: &mut PoolState) -> Option<Priority> {
        let active = pool.in_progress.remove(&self.name);
        self.inner.ctx.limiter.detach(&self.signal);
        self.released = true;
        active.map(|a| a.priority)
    }
}

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        if !self.released {
            let inner = self.inner;
            let mut pool = inner.pool.lock();
            self.unlink(&mut pool);
        }
    }
}

struct Finished {
    outcome: TransferOutcome,
    last: TransferProgress,
}

fn transfer(
    inner: &EngineInner,
    file: &FileEntry,
    signal: &TransferSignal,
) -> Result<(Finished, Option<u64>), (TransferError, TransferProgress)> {
    let journal = &inner.ctx.journal;
    let destination = inner.folder.join(&file.name);
    let request = TransferRequest {
        url: &file.url,
        destination: &destination,
        known_size: file.known_size(),
    };
    let mut last = TransferProgress {
        downloaded: 0,
        total: file.known_size(),
    };
    let mut size = file.known_size();
    let mut reported_at: Option<Instant> = None;

    let result = inner.ctx.transfer.download(&request, signal, &mut |p| {
        if p.total.is_some() && p.total != size {
            size = p.total;
            if let Some(total) = p.total {
                journal.update_file_size(inner.job, &file.name, total as i64);
            }
        }
        last = p;
        if reported_at.map_or(true, |t| t.elapsed() >= PROGRESS_INTERVAL) {
            journal.update_file_progress(inner.job, &file.name, p.downloaded as i64);
            reported_at = Some(Instant::now());
        }
    });
    match result {
        Ok(outcome) => Ok((Finished { outcome, last }, size)),
        Err(e) => Err((e, last)),
    }
}

enum Terminal {
    Completed { downloaded: u64, size: Option<u64> },
    Stopped(u64),
    Requeue(u64),
    Failed { reason: String, downloaded: u64 },
    /// Shutdown: leave the persisted state alone.
    Silent,
}

fn from_cancel(reason: CancelReason, downloaded: u64) -> Terminal {
    match reason {
        CancelReason::User => Terminal::Stopped(downloaded),
        CancelReason::Preempt => Terminal::Requeue(downloaded),
        CancelReason::Shutdown => Terminal::Silent,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

type Attempt = std::thread::Result<
    Result<(Finished, Option<u64>), (TransferError, TransferProgress)>,
>;

fn finish(inner: &EngineInner, slot: InProgress<'_>, mut file: FileEntry, attempt: Attempt) {
    let cancelled = slot.signal.cancel_reason();
    let terminal = match attempt {
        Ok(Ok((done, size))) => match done.outcome {
            TransferOutcome::Completed => Terminal::Completed {
                downloaded: done.last.downloaded,
                size,
            },
            TransferOutcome::Cancelled(reason) => from_cancel(reason, done.last.downloaded),
        },
        // A transfer aborted by our own cancel may surface as an error.
        Ok(Err((_, last))) if cancelled.is_some() => {
            from_cancel(cancelled.unwrap_or(CancelReason::User), last.downloaded)
        }
        Ok(Err((e, last))) => Terminal::Failed {
            reason: e.to_string(),
            downloaded: last.downloaded,
        },
        Err(payload) => Terminal::Failed {
            reason: format!("worker panicked: {}", panic_message(payload.as_ref())),
            downloaded: 0,
        },
    };

    let job = inner.job;
    let name = file.name.clone();
    let journal = &inner.ctx.journal;
    let signal = Arc::clone(&slot.signal);
    let mut status = None;

    slot.release(|pool, active_priority| match terminal {
        Terminal::Completed { downloaded, size } => {
            let size = size.unwrap_or(downloaded);
            journal.update_file_size(job, &name, size as i64);
            journal.update_file_progress(job, &name, downloaded as i64);
            journal.file_transition(job, &name, FileStatus::Completed, "download completed");
            tracing::info!(job, file = %name, bytes = downloaded, "download completed");
            status = Some(FileStatus::Completed);
        }
        Terminal::Stopped(downloaded) => {
            journal.update_file_progress(job, &name, downloaded as i64);
            journal.file_transition(job, &name, FileStatus::Stopped, "download stopped");
            tracing::debug!(job, file = %name, "download stopped");
            status = Some(FileStatus::Stopped);
        }
        Terminal::Requeue(downloaded) => {
            journal.update_file_progress(job, &name, downloaded as i64);
            journal.file_transition(
                job,
                &name,
                FileStatus::Queued,
                "re-queued: worker thread removed",
            );
            if !inner.is_closing() {
                if let Some(priority) = active_priority {
                    file.priority = priority;
                }
                pool.in_queue.insert(name.clone());
                inner.queue.put(file);
            }
            status = Some(FileStatus::Queued);
        }
        Terminal::Failed { reason, downloaded } => {
            if downloaded > 0 {
                journal.update_file_progress(job, &name, downloaded as i64);
            }
            journal.file_transition(
                job,
                &name,
                FileStatus::Failed,
                &format!("download failed: {reason}"),
            );
            tracing::warn!(job, file = %name, error = %reason, "download failed");
            status = Some(FileStatus::Failed);
        }
        Terminal::Silent => {}
    });

    if let Some(status) = status {
        signal.notify(status);
    }
}
