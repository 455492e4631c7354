//! The tick consumer: folds journal batches into the store, the cache and
//! the UI.
//!
//! Runs on the journal tick thread. Per job it holds the persistence lock for
//! the whole read-merge-write, then sends UI events after releasing it.
//! Lock order is persistence → cache; the activity probe only takes engine
//! locks, which never wait on either.

mod cache;
mod status;

use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;

pub use cache::JobCache;
pub use status::infer_status;

use crate::events::{UiEvent, UiSink};
use crate::journal::derived::progress_fields;
use crate::journal::{merge_into, FileDiff, JobDiff, JournalBatch, ProgressJournal};
use crate::model::{FileEntry, Job, JobId};
use crate::rate_limit::RateLimiter;
use crate::store::{Persistence, Store};

/// Tells the cycle whether a job's engine still has queued or active files.
pub trait ActivityProbe: Send + Sync {
    fn has_active_work(&self, job: JobId) -> bool;
}

pub struct UpdateCycle {
    persistence: Arc<Persistence>,
    cache: Arc<Mutex<JobCache>>,
    probe: Arc<dyn ActivityProbe>,
    limiter: Arc<RateLimiter>,
    ui: UiSink,
    /// Journals submitted outside the tick cadence.
    inbox: Mutex<JournalBatch>,
    ticks: AtomicU64,
}

impl UpdateCycle {
    pub fn new(
        persistence: Arc<Persistence>,
        cache: Arc<Mutex<JobCache>>,
        probe: Arc<dyn ActivityProbe>,
        limiter: Arc<RateLimiter>,
        ui: UiSink,
    ) -> Self {
        Self {
            persistence,
            cache,
            probe,
            limiter,
            ui,
            inbox: Mutex::new(JournalBatch::new()),
            ticks: AtomicU64::new(0),
        }
    }

    /// Queue a journal for the next tick. It is merged after that tick's batch.
    pub fn submit(&self, job: JobId, journal: ProgressJournal) {
        merge_into(&mut self.inbox.lock(), job, journal);
    }

    /// Number of ticks processed.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Apply one tick's batch.
    pub fn update_tick(&self, mut batch: JournalBatch) {
        let inbox = mem::take(&mut *self.inbox.lock());
        for (job, journal) in inbox {
            merge_into(&mut batch, job, journal);
        }

        let mut jobs: Vec<(JobId, ProgressJournal)> = batch.into_iter().collect();
        jobs.sort_by_key(|(id, _)| *id);
        for (id, journal) in jobs {
            match self.apply_job(id, journal) {
                Ok(events) => {
                    for event in events {
                        self.ui.send(event);
                    }
                }
                Err(e) => tracing::error!(job = id, error = %format!("{e:#}"), "tick update failed"),
            }
        }

        self.limiter.rebalance();
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    fn apply_job(&self, id: JobId, journal: ProgressJournal) -> Result<Vec<UiEvent>> {
        let guard = self.persistence.lock();
        let store: &dyn Store = guard.as_ref();

        let Some(mut job) = store.get_job_by_id(id)? else {
            tracing::warn!(job = id, "dropping update for deleted job");
            self.cache.lock().remove_job(id);
            return Ok(Vec::new());
        };
        let previous = job.clone();

        let touched: Vec<String> = journal.touched_files().into_iter().collect();
        let ProgressJournal {
            job: job_diff,
            files: mut file_diffs,
            events: mut new_events,
            notices,
        } = journal;
        let mut job_diff = job_diff.unwrap_or_default();
        if let Some(status) = job_diff.status {
            job.status = status;
        }
        if let Some(threads) = job_diff.threads_allocated {
            job.threads_allocated = threads.max(1);
        }

        let mut rows = store.get_file_models_by_names(id, &touched)?;

        let mut file_events = Vec::with_capacity(touched.len());
        for name in touched {
            let Some(mut row) = rows.remove(&name) else {
                tracing::warn!(job = id, file = %name, "dropping update for deleted file");
                continue;
            };
            let mut diff = file_diffs.remove(&name).unwrap_or_default();
            let before = row.clone();
            apply_file_diff(&mut row, &diff);

            if before.selected != row.selected {
                if row.selected {
                    job.adopt_file(&row);
                } else {
                    job.forget_file(&before);
                }
            }
            if row != before && !store.save_file(id, &row)? {
                tracing::warn!(job = id, file = %name, "file vanished while saving");
                continue;
            }

            if let Some(events) = new_events.remove(&name) {
                for event in &events {
                    store.add_file_event(id, &name, event)?;
                }
                diff.latest_event = events.last().cloned();
            }

            self.cache.lock().put_file(id, row);
            file_events.push(UiEvent::FileChanged {
                job: id,
                name,
                diff,
            });
        }

        let statuses = {
            let cache = self.cache.lock();
            cache.recompute(&mut job);
            cache.selected_statuses(id)
        };
        fill_aggregates(&mut job_diff, &previous, &job);

        let active = self.probe.has_active_work(id);
        let status = infer_status(job.status, &statuses, job.is_complete(), active);
        job.status = status;
        job_diff.status = (status != previous.status).then_some(status);
        if status != previous.status {
            tracing::info!(job = id, from = ?previous.status, to = ?status, "job status changed");
        }

        if job != previous && !store.save_job(&job)? {
            tracing::warn!(job = id, "job vanished while saving");
            return Ok(Vec::new());
        }
        self.cache.lock().put_job(job);
        drop(guard);

        let mut out = Vec::with_capacity(file_events.len() + notices.len() + 1);
        if !job_diff.is_empty() {
            out.push(UiEvent::JobChanged {
                job: id,
                diff: job_diff,
            });
        }
        out.extend(file_events);
        out.extend(notices.into_iter().map(|message| {
            tracing::warn!(job = id, %message, "job notice");
            UiEvent::JobNotice { job: id, message }
        }));
        Ok(out)
    }
}

fn apply_file_diff(row: &mut FileEntry, diff: &FileDiff) {
    if let Some(status) = diff.status {
        row.status = status;
    }
    if let Some(size) = diff.size_bytes {
        row.size_bytes = size;
    }
    if let Some(downloaded) = diff.downloaded_bytes {
        row.downloaded_bytes = downloaded;
    }
    if let Some(priority) = diff.priority {
        row.priority = priority;
    }
    if let Some(selected) = diff.selected {
        row.selected = selected;
    }
}

/// Put changed counters into the job diff, plus ETA/percent for the job as a
/// whole.
fn fill_aggregates(diff: &mut JobDiff, before: &Job, after: &Job) {
    fn changed(old: i64, new: i64) -> Option<i64> {
        (old != new).then_some(new)
    }
    diff.total_size_bytes = changed(before.total_size_bytes, after.total_size_bytes);
    diff.downloaded_bytes = changed(before.downloaded_bytes, after.downloaded_bytes);
    diff.files_done = changed(before.files_done, after.files_done);
    diff.selected_files_count = changed(before.selected_files_count, after.selected_files_count);
    diff.selected_files_with_known_size = changed(
        before.selected_files_with_known_size,
        after.selected_files_with_known_size,
    );
    diff.threads_allocated = changed(before.threads_allocated, after.threads_allocated);

    let bytes_moved = diff.total_size_bytes.is_some() || diff.downloaded_bytes.is_some();
    if diff.rate_bps.is_some() || bytes_moved {
        let fields = progress_fields(
            after.total_size_bytes,
            after.downloaded_bytes,
            diff.rate_bps.unwrap_or(0),
        );
        if diff.rate_bps.is_some() {
            diff.eta_secs = Some(fields.eta_secs);
        }
        diff.percent = Some(fields.percent);
    }
}
