//! In-memory mirror of jobs and their files, refreshed by the update cycle.
//!
//! Controller queries read from here instead of the store, and the cycle
//! recomputes job aggregates from it after every tick.

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;

use crate::model::{FileEntry, FileStatus, Job, JobId};
use crate::store::Store;

struct CachedJob {
    job: Job,
    files: BTreeMap<String, FileEntry>,
}

#[derive(Default)]
pub struct JobCache {
    jobs: HashMap<JobId, CachedJob>,
}

impl JobCache {
    /// Read every job and file row from `store`.
    pub fn load(store: &dyn Store) -> Result<Self> {
        let mut cache = Self::default();
        for job in store.get_all_jobs()? {
            let files = store.get_files_of_job(job.id)?;
            cache.insert_job(job, files);
        }
        Ok(cache)
    }

    pub fn insert_job(&mut self, job: Job, files: impl IntoIterator<Item = FileEntry>) {
        let files = files
            .into_iter()
            .map(|mut f| {
                f.events.clear();
                (f.name.clone(), f)
            })
            .collect();
        self.jobs.insert(job.id, CachedJob { job, files });
    }

    pub fn remove_job(&mut self, id: JobId) -> bool {
        self.jobs.remove(&id).is_some()
    }

    pub fn put_job(&mut self, job: Job) {
        if let Some(cached) = self.jobs.get_mut(&job.id) {
            cached.job = job;
        }
    }

    pub fn put_file(&mut self, id: JobId, mut file: FileEntry) {
        if let Some(cached) = self.jobs.get_mut(&id) {
            file.events.clear();
            cached.files.insert(file.name.clone(), file);
        }
    }

    pub fn job(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(&id).map(|c| &c.job)
    }

    /// Jobs ordered by id.
    pub fn jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.values().map(|c| c.job.clone()).collect();
        jobs.sort_by_key(|j| j.id);
        jobs
    }

    pub fn file(&self, id: JobId, name: &str) -> Option<&FileEntry> {
        self.jobs.get(&id)?.files.get(name)
    }

    /// Files of a job in name order.
    pub fn files(&self, id: JobId) -> Vec<FileEntry> {
        self.jobs
            .get(&id)
            .map(|c| c.files.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn selected_files(&self, id: JobId) -> Vec<FileEntry> {
        self.jobs
            .get(&id)
            .map(|c| c.files.values().filter(|f| f.selected).cloned().collect())
            .unwrap_or_default()
    }

    pub fn selected_statuses(&self, id: JobId) -> Vec<FileStatus> {
        self.jobs
            .get(&id)
            .map(|c| {
                c.files
                    .values()
                    .filter(|f| f.selected)
                    .map(|f| f.status)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Reset `job`'s counters and rebuild them from the cached selected files.
    /// Returns false when the job is not cached.
    pub fn recompute(&self, job: &mut Job) -> bool {
        let Some(cached) = self.jobs.get(&job.id) else {
            return false;
        };
        job.total_size_bytes = 0;
        job.downloaded_bytes = 0;
        job.selected_files_count = 0;
        job.selected_files_with_known_size = 0;
        job.files_done = 0;
        for file in cached.files.values().filter(|f| f.selected) {
            job.adopt_file(file);
        }
        true
    }
}
