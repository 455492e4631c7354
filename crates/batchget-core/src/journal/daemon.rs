//! Process-wide journal collector with a fixed-interval flush.

use std::mem;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use parking_lot::{Condvar, Mutex};

use super::derived::Snapshot;
use super::{merge_into, JournalBatch, ProgressJournal};
use crate::model::{FileEvent, FileStatus, JobId, JobStatus, Priority};

/// Receives one coherent batch per tick, on the tick thread.
pub type JournalConsumer = Box<dyn FnMut(JournalBatch) + Send>;

struct DaemonState {
    journals: JournalBatch,
    snapshot: Snapshot,
}

#[derive(Default)]
struct TickerControl {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Collects worker updates between ticks.
///
/// Producers only ever take the state lock for an in-memory merge. The flush
/// takes the batch out under that lock and runs the consumer after releasing
/// it, so producers never wait on the store. A second lock held across the
/// whole flush keeps batches in order when `flush_now` races the ticker.
pub struct JournalDaemon {
    state: Mutex<DaemonState>,
    consumer: Mutex<JournalConsumer>,
    control: Arc<TickerControl>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl JournalDaemon {
    pub fn new(consumer: JournalConsumer) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(DaemonState {
                journals: JournalBatch::new(),
                snapshot: Snapshot::default(),
            }),
            consumer: Mutex::new(consumer),
            control: Arc::new(TickerControl::default()),
            ticker: Mutex::new(None),
        })
    }

    /// Start the tick thread. It holds only a weak reference, so dropping the
    /// last `Arc` also ends it.
    pub fn spawn_ticker(self: &Arc<Self>, interval: Duration) -> Result<()> {
        let mut ticker = self.ticker.lock();
        if ticker.is_some() {
            return Ok(());
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        let control = Arc::clone(&self.control);
        let handle = thread::Builder::new()
            .name("journal-tick".into())
            .spawn(move || loop {
                {
                    let mut stopped = control.stopped.lock();
                    if !*stopped {
                        control.wake.wait_for(&mut stopped, interval);
                    }
                    if *stopped {
                        break;
                    }
                }
                match weak.upgrade() {
                    Some(daemon) => daemon.flush_now(),
                    None => break,
                }
            })
            .context("spawn journal tick thread")?;
        *ticker = Some(handle);
        tracing::debug!(interval_ms = interval.as_millis() as u64, "journal ticker started");
        Ok(())
    }

    /// Stop the tick thread, then deliver whatever is still pending.
    pub fn stop(&self) {
        *self.control.stopped.lock() = true;
        self.control.wake.notify_all();
        let handle = self.ticker.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        self.flush_now();
    }

    /// Run one tick synchronously: derive fields, snapshot, hand off the batch.
    pub fn flush_now(&self) {
        let mut consumer = self.consumer.lock();
        let batch = self.take_batch(Instant::now());
        (consumer)(batch);
    }

    fn take_batch(&self, now: Instant) -> JournalBatch {
        let mut state = self.state.lock();
        let DaemonState { journals, snapshot } = &mut *state;
        *snapshot = snapshot.advance(journals, now);
        mem::take(journals)
    }

    fn with_journal(&self, job: JobId, f: impl FnOnce(&mut ProgressJournal)) {
        let mut state = self.state.lock();
        f(state.journals.entry(job).or_default());
    }

    /// Merge a journal built elsewhere into the pending one.
    pub fn submit(&self, job: JobId, journal: ProgressJournal) {
        let mut state = self.state.lock();
        merge_into(&mut state.journals, job, journal);
    }

    pub fn update_job_status(&self, job: JobId, status: JobStatus) {
        self.with_journal(job, |j| j.job_mut().status = Some(status));
    }

    pub fn update_job_threads(&self, job: JobId, threads: usize) {
        self.with_journal(job, |j| j.job_mut().threads_allocated = Some(threads as i64));
    }

    pub fn job_notice(&self, job: JobId, message: impl Into<String>) {
        let message = message.into();
        self.with_journal(job, |j| j.notice(message));
    }

    pub fn update_file_status(&self, job: JobId, name: &str, status: FileStatus) {
        self.with_journal(job, |j| j.file_mut(name).status = Some(status));
    }

    pub fn update_file_progress(&self, job: JobId, name: &str, downloaded: i64) {
        self.with_journal(job, |j| j.file_mut(name).downloaded_bytes = Some(downloaded));
    }

    pub fn update_file_size(&self, job: JobId, name: &str, size: i64) {
        self.with_journal(job, |j| j.file_mut(name).size_bytes = Some(size));
    }

    pub fn update_file_priority(&self, job: JobId, name: &str, priority: Priority) {
        self.with_journal(job, |j| j.file_mut(name).priority = Some(priority));
    }

    pub fn add_file_event(&self, job: JobId, name: &str, message: impl Into<String>) {
        let event = FileEvent::now(message);
        self.with_journal(job, |j| j.push_event(name, event));
    }

    /// Status change plus the history line explaining it.
    pub fn file_transition(&self, job: JobId, name: &str, status: FileStatus, message: &str) {
        let event = FileEvent::now(message);
        self.with_journal(job, |j| {
            j.file_mut(name).status = Some(status);
            j.push_event(name, event);
        });
    }

    /// Number of jobs with pending updates.
    pub fn pending_jobs(&self) -> usize {
        self.state.lock().journals.len()
    }
}

impl Drop for JournalDaemon {
    fn drop(&mut self) {
        *self.control.stopped.lock() = true;
        self.control.wake.notify_all();
    }
}
