//! Per-job download engine.
//!
//! One engine owns one job's [`FileQueue`] and a resizable pool of worker
//! threads. Workers pop files, run the transfer, and journal what happened;
//! they never touch the store. Size resolution, resume reconciliation and
//! health checks each run on their own short-lived thread.
//!
//! Bookkeeping (`in_queue`, `in_progress`, pool size) lives behind one mutex.
//! Lock order is pool → queue → rate limiter → journal; nothing in those
//! takes the pool lock back.

mod resolve;
mod resume;
mod worker;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;

pub use resume::{check_integrity, IntegrityError};

use crate::journal::JournalDaemon;
use crate::model::{FileEntry, FileStatus, JobId, Priority};
use crate::queue::FileQueue;
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::transfer::{CancelReason, Transfer, TransferSignal};

/// Process-wide collaborators shared by every engine.
#[derive(Clone)]
pub struct EngineContext {
    pub transfer: Arc<dyn Transfer>,
    pub journal: Arc<JournalDaemon>,
    pub limiter: Arc<RateLimiter>,
    /// Per-file budget for HEAD size probes.
    pub resolve_policy: RetryPolicy,
}

/// Result of `stop_active_download`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopAck {
    /// The file was not being transferred.
    NotActive,
    /// Cancellation requested; not waiting for the worker.
    Requested,
    /// The worker finished with this status within the wait.
    Acknowledged(FileStatus),
    /// The worker did not finish within the wait.
    TimedOut,
}

struct ActiveTransfer {
    priority: Priority,
    signal: Arc<TransferSignal>,
}

#[derive(Default)]
struct PoolState {
    in_queue: HashSet<String>,
    in_progress: HashMap<String, ActiveTransfer>,
    pool_size: usize,
    workers: Vec<JoinHandle<()>>,
    spawned: usize,
}

struct EngineInner {
    job: JobId,
    folder: PathBuf,
    queue: FileQueue,
    pool: Mutex<PoolState>,
    ctx: EngineContext,
    closing: AtomicBool,
}

impl EngineInner {
    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    fn spawn_worker(self: &Arc<Self>, pool: &mut PoolState) -> Result<()> {
        pool.spawned += 1;
        let inner = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("job{}-worker{}", self.job, pool.spawned))
            .spawn(move || worker::run(inner))
            .context("spawn worker thread")?;
        pool.workers.push(handle);
        pool.pool_size += 1;
        Ok(())
    }

    /// Queue `file` and journal it as Queued. Re-queuing an already queued
    /// file replaces its entry. Files being transferred are left alone.
    fn enqueue(&self, file: FileEntry) -> bool {
        if self.is_closing() {
            return false;
        }
        let mut pool = self.pool.lock();
        if pool.in_progress.contains_key(&file.name) {
            return false;
        }
        if pool.in_queue.insert(file.name.clone()) {
            self.ctx
                .journal
                .update_file_status(self.job, &file.name, FileStatus::Queued);
        }
        self.queue.put(file);
        true
    }
}

/// Download engine for one job. Dropping it shuts the pool down.
pub struct DownloadEngine {
    inner: Arc<EngineInner>,
}

impl DownloadEngine {
    /// Create the engine and start `threads` workers (at least one).
    pub fn new(
        job: JobId,
        folder: impl Into<PathBuf>,
        threads: usize,
        ctx: EngineContext,
    ) -> Result<Self> {
        let inner = Arc::new(EngineInner {
            job,
            folder: folder.into(),
            queue: FileQueue::new(),
            pool: Mutex::new(PoolState::default()),
            ctx,
            closing: AtomicBool::new(false),
        });
        {
            let mut pool = inner.pool.lock();
            for _ in 0..threads.max(1) {
                inner.spawn_worker(&mut pool)?;
            }
        }
        tracing::debug!(job, threads = threads.max(1), "engine started");
        Ok(Self { inner })
    }

    pub fn job(&self) -> JobId {
        self.inner.job
    }

    pub fn folder(&self) -> &Path {
        &self.inner.folder
    }

    /// Enqueue one file and mark it Queued.
    pub fn download_file(&self, file: FileEntry) -> bool {
        self.inner.enqueue(file)
    }

    /// Enqueue several files; returns how many were accepted.
    pub fn download_files(&self, files: impl IntoIterator<Item = FileEntry>) -> usize {
        files
            .into_iter()
            .filter(|f| self.inner.enqueue(f.clone()))
            .count()
    }

    /// Drop a file that is still waiting in the queue. No-op once its
    /// transfer has started.
    pub fn cancel_download(&self, name: &str) -> bool {
        let mut pool = self.inner.pool.lock();
        if pool.in_queue.remove(name) {
            self.inner.queue.remove(name);
            true
        } else {
            false
        }
    }

    /// Ask the worker transferring `name` to stop. The file goes Stopping now
    /// and Stopped (or whatever the transfer ended with) once the worker
    /// notices. With `wait`, block up to that long for the final status.
    pub fn stop_active_download(&self, name: &str, wait: Option<Duration>) -> StopAck {
        let listener = {
            let pool = self.inner.pool.lock();
            let Some(active) = pool.in_progress.get(name) else {
                return StopAck::NotActive;
            };
            let listener = wait.map(|_| active.signal.listen());
            // Journaled under the pool lock so it lands before the worker's
            // terminal status.
            if active.signal.cancel(CancelReason::User) {
                self.inner
                    .ctx
                    .journal
                    .update_file_status(self.inner.job, name, FileStatus::Stopping);
            }
            listener
        };
        match (listener, wait) {
            (Some(rx), Some(timeout)) => match rx.recv_timeout(timeout) {
                Ok(status) => StopAck::Acknowledged(status),
                Err(_) => StopAck::TimedOut,
            },
            _ => StopAck::Requested,
        }
    }

    /// Grow the pool by one worker. Returns the new pool size.
    pub fn add_thread(&self) -> Result<usize> {
        let size = {
            let mut pool = self.inner.pool.lock();
            self.inner.spawn_worker(&mut pool)?;
            pool.pool_size
        };
        self.inner.ctx.journal.update_job_threads(self.inner.job, size);
        Ok(size)
    }

    /// Shrink the pool by one worker. When every worker is busy, the active
    /// transfer with the lowest urgency (highest rank, then greatest name) is
    /// preempted and goes back into the queue. The last worker is never
    /// removed.
    pub fn remove_thread(&self) -> bool {
        let size = {
            let mut pool = self.inner.pool.lock();
            if pool.pool_size <= 1 || self.inner.is_closing() {
                return false;
            }
            if pool.in_progress.len() >= pool.pool_size {
                let victim = pool
                    .in_progress
                    .iter()
                    .max_by(|(a_name, a), (b_name, b)| {
                        a.priority
                            .rank()
                            .cmp(&b.priority.rank())
                            .then_with(|| a_name.cmp(b_name))
                    });
                if let Some((name, active)) = victim {
                    tracing::info!(job = self.inner.job, file = %name, "preempting to shrink pool");
                    active.signal.cancel(CancelReason::Preempt);
                }
            }
            pool.pool_size -= 1;
            self.inner.queue.put_poison();
            pool.pool_size
        };
        self.inner.ctx.journal.update_job_threads(self.inner.job, size);
        true
    }

    /// Change the priority of a queued or active file. Active files keep
    /// downloading; the new priority only matters for preemption.
    pub fn reprioritize(&self, name: &str, priority: Priority) -> bool {
        let mut pool = self.inner.pool.lock();
        if let Some(active) = pool.in_progress.get_mut(name) {
            active.priority = priority;
            return true;
        }
        pool.in_queue.contains(name) && self.inner.queue.reprioritize(name, priority)
    }

    /// Resolve unknown remote sizes in the background.
    pub fn resolve_file_sizes(&self, files: Vec<FileEntry>) -> Result<JoinHandle<()>> {
        self.spawn_task("resolve", move |inner| resolve::resolve_sizes(inner, files))
    }

    /// Reconcile persisted statuses after a restart.
    pub fn resume_files(&self, files: Vec<FileEntry>) -> Result<JoinHandle<()>> {
        self.spawn_task("resume", move |inner| resume::reconcile(inner, files))
    }

    /// Verify completed files against the bytes recorded for them.
    pub fn health_check(&self, files: Vec<FileEntry>) -> Result<JoinHandle<()>> {
        self.spawn_task("health", move |inner| resume::health_check(inner, files))
    }

    fn spawn_task<F>(&self, kind: &str, task: F) -> Result<JoinHandle<()>>
    where
        F: FnOnce(&EngineInner) + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        thread::Builder::new()
            .name(format!("job{}-{}", inner.job, kind))
            .spawn(move || task(&inner))
            .with_context(|| format!("spawn {kind} thread"))
    }

    /// Anything queued or transferring.
    pub fn has_active_work(&self) -> bool {
        let pool = self.inner.pool.lock();
        !pool.in_queue.is_empty() || !pool.in_progress.is_empty()
    }

    pub fn is_queued(&self, name: &str) -> bool {
        self.inner.pool.lock().in_queue.contains(name)
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.inner.pool.lock().in_progress.contains_key(name)
    }

    pub fn pool_size(&self) -> usize {
        self.inner.pool.lock().pool_size
    }

    pub fn busy_threads(&self) -> usize {
        self.inner.pool.lock().in_progress.len()
    }

    /// Stop every worker. Active transfers are cancelled without journaling
    /// anything, so their persisted state still says Downloading/Queued and
    /// the next launch resumes them.
    pub fn shutdown(&self) {
        if self.inner.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        let (workers, size) = {
            let mut pool = self.inner.pool.lock();
            for active in pool.in_progress.values() {
                active.signal.cancel(CancelReason::Shutdown);
            }
            for name in std::mem::take(&mut pool.in_queue) {
                self.inner.queue.remove(&name);
            }
            let size = pool.pool_size;
            pool.pool_size = 0;
            (std::mem::take(&mut pool.workers), size)
        };
        for _ in 0..size {
            self.inner.queue.put_poison();
        }
        for handle in workers {
            let _ = handle.join();
        }
        tracing::debug!(job = self.inner.job, "engine stopped");
    }
}

impl Drop for DownloadEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests;
