//! Rate, ETA and percent, derived from two consecutive snapshots.
//!
//! Workers only report absolute byte counts. Once per tick the daemon compares
//! each reported count with the one recorded at the previous tick and fills
//! in the derived fields before the batch leaves the daemon. The rate is the
//! byte delta per tick, whatever the actual spacing of the ticks.

use std::collections::HashMap;
use std::time::Instant;

use super::JournalBatch;
use crate::model::{FileStatus, JobId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DerivedFields {
    pub rate_bps: u64,
    pub eta_secs: u64,
    pub percent: u8,
}

/// Derived fields for one file. `previous` is the byte count at the last
/// snapshot; without one there is no baseline and the rate is 0.
pub fn derive_fields(total: i64, downloaded: i64, previous: Option<i64>) -> DerivedFields {
    let rate_bps = previous.map_or(0, |prev| (downloaded - prev).max(0) as u64);
    progress_fields(total, downloaded, rate_bps)
}

/// ETA and percent for a known rate. Unknown or zero totals give 0 for both.
pub fn progress_fields(total: i64, downloaded: i64, rate_bps: u64) -> DerivedFields {
    let remaining = (total - downloaded).max(0) as u64;
    let eta_secs = if rate_bps > 0 && total > 0 {
        remaining / rate_bps
    } else {
        0
    };
    let percent = if total > 0 {
        (downloaded.max(0) as u128 * 100 / total as u128).min(100) as u8
    } else {
        0
    };
    DerivedFields {
        rate_bps,
        eta_secs,
        percent,
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct FileMark {
    downloaded: Option<i64>,
    total: i64,
    rate: u64,
}

/// Numeric state of every transferring file as of one tick.
#[derive(Debug, Clone)]
pub struct Snapshot {
    taken_at: Instant,
    jobs: HashMap<JobId, HashMap<String, FileMark>>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::at(Instant::now())
    }
}

impl Snapshot {
    /// Empty snapshot taken at `taken_at`.
    pub fn at(taken_at: Instant) -> Self {
        Self {
            taken_at,
            jobs: HashMap::new(),
        }
    }

    pub fn taken_at(&self) -> Instant {
        self.taken_at
    }

    /// Rate recorded for a file at this snapshot.
    pub fn file_rate(&self, job: JobId, name: &str) -> Option<u64> {
        self.jobs.get(&job)?.get(name).map(|m| m.rate)
    }

    /// Fill rate/ETA/percent into `batch` relative to this snapshot and return
    /// the snapshot for the next tick, taken at `now`.
    ///
    /// Files that had a positive rate here but report nothing in `batch` get an
    /// explicit zero rate. Files leaving the Downloading state drop out.
    pub fn advance(&self, batch: &mut JournalBatch, now: Instant) -> Snapshot {
        let mut next = self.jobs.clone();

        for (job_id, journal) in batch.iter_mut() {
            let prev_files = self.jobs.get(job_id);
            let marks = next.entry(*job_id).or_default();
            for (name, diff) in journal.files.iter_mut() {
                let prev = prev_files
                    .and_then(|files| files.get(name))
                    .copied()
                    .unwrap_or_default();
                let mut mark = prev;
                if let Some(size) = diff.size_bytes {
                    mark.total = size;
                }
                if let Some(downloaded) = diff.downloaded_bytes {
                    let fields = derive_fields(mark.total, downloaded, prev.downloaded);
                    diff.rate_bps = Some(fields.rate_bps);
                    diff.eta_secs = Some(fields.eta_secs);
                    diff.percent = Some(fields.percent);
                    mark.downloaded = Some(downloaded);
                    mark.rate = fields.rate_bps;
                } else if prev.rate > 0 {
                    diff.rate_bps = Some(0);
                    diff.eta_secs = Some(0);
                    mark.rate = 0;
                }

                let transferring = diff.status.map_or(true, |s| s == FileStatus::Downloading);
                if transferring {
                    marks.insert(name.clone(), mark);
                } else {
                    diff.rate_bps = Some(0);
                    diff.eta_secs = Some(0);
                    marks.remove(name);
                }
            }
        }

        for (job_id, files) in &self.jobs {
            for (name, mark) in files {
                if mark.rate == 0 {
                    continue;
                }
                let reported = batch
                    .get(job_id)
                    .is_some_and(|j| j.files.contains_key(name));
                if reported {
                    continue;
                }
                let diff = batch.entry(*job_id).or_default().file_mut(name);
                diff.rate_bps = Some(0);
                diff.eta_secs = Some(0);
                if let Some(m) = next.get_mut(job_id).and_then(|f| f.get_mut(name)) {
                    m.rate = 0;
                }
            }
        }

        for (job_id, journal) in batch.iter_mut() {
            if journal.files.values().all(|d| d.rate_bps.is_none()) {
                continue;
            }
            let rate = next
                .get(job_id)
                .map_or(0, |files| files.values().map(|m| m.rate).sum());
            journal.job_mut().rate_bps = Some(rate);
        }

        next.retain(|_, files| !files.is_empty());
        Snapshot {
            taken_at: now,
            jobs: next,
        }
    }
}
