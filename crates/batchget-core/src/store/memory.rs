//! In-process store for tests and throwaway sessions.

use std::collections::{BTreeMap, HashMap};

use anyhow::{bail, Result};
use parking_lot::Mutex;

use super::Store;
use crate::model::{FileEntry, FileEvent, Job, JobId};

#[derive(Default)]
struct Tables {
    next_id: JobId,
    jobs: BTreeMap<JobId, Job>,
    /// Rows without events, in insertion order.
    files: BTreeMap<JobId, Vec<FileEntry>>,
    events: HashMap<(JobId, String), Vec<FileEvent>>,
}

impl Tables {
    fn file(&self, job: JobId, name: &str) -> Option<&FileEntry> {
        self.files.get(&job)?.iter().find(|f| f.name == name)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn files_where(&self, job: JobId, keep: impl Fn(&FileEntry) -> bool) -> Vec<FileEntry> {
        let t = self.tables.lock();
        t.files
            .get(&job)
            .map(|files| files.iter().filter(|f| keep(f)).cloned().collect())
            .unwrap_or_default()
    }
}

impl Store for MemoryStore {
    fn create_job(&self, job: &Job) -> Result<JobId> {
        let mut t = self.tables.lock();
        if t.jobs.values().any(|j| j.name == job.name) {
            bail!("job name {:?} already exists", job.name);
        }
        t.next_id += 1;
        let id = t.next_id;
        let mut row = job.clone();
        row.id = id;
        t.jobs.insert(id, row);
        t.files.insert(id, Vec::new());
        Ok(id)
    }

    fn get_job_by_id(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.tables.lock().jobs.get(&id).cloned())
    }

    fn get_job_by_name(&self, name: &str) -> Result<Option<Job>> {
        let t = self.tables.lock();
        Ok(t.jobs.values().find(|j| j.name == name).cloned())
    }

    fn get_all_jobs(&self) -> Result<Vec<Job>> {
        Ok(self.tables.lock().jobs.values().cloned().collect())
    }

    fn save_job(&self, job: &Job) -> Result<bool> {
        let mut t = self.tables.lock();
        match t.jobs.get_mut(&job.id) {
            Some(row) => {
                *row = job.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_job(&self, id: JobId) -> Result<bool> {
        let mut t = self.tables.lock();
        let existed = t.jobs.remove(&id).is_some();
        t.files.remove(&id);
        t.events.retain(|(job, _), _| *job != id);
        Ok(existed)
    }

    fn add_files(&self, job: JobId, files: &[FileEntry]) -> Result<()> {
        let mut t = self.tables.lock();
        if !t.jobs.contains_key(&job) {
            bail!("job {} does not exist", job);
        }
        for file in files {
            if t.file(job, &file.name).is_some() {
                bail!("file {:?} already exists in job {}", file.name, job);
            }
            let mut row = file.clone();
            let events = std::mem::take(&mut row.events);
            t.files.entry(job).or_default().push(row);
            if !events.is_empty() {
                t.events
                    .entry((job, file.name.clone()))
                    .or_default()
                    .extend(events);
            }
        }
        Ok(())
    }

    fn get_file_model_by_name(&self, job: JobId, name: &str) -> Result<Option<FileEntry>> {
        Ok(self.tables.lock().file(job, name).cloned())
    }

    fn get_file_models_by_names(
        &self,
        job: JobId,
        names: &[String],
    ) -> Result<HashMap<String, FileEntry>> {
        let t = self.tables.lock();
        Ok(names
            .iter()
            .filter_map(|n| t.file(job, n).map(|f| (n.clone(), f.clone())))
            .collect())
    }

    fn get_files_of_job(&self, job: JobId) -> Result<Vec<FileEntry>> {
        Ok(self.files_where(job, |_| true))
    }

    fn get_selected_files_of_job(&self, job: JobId) -> Result<Vec<FileEntry>> {
        Ok(self.files_where(job, |f| f.selected))
    }

    fn get_selected_files_with_unknown_size(&self, job: JobId) -> Result<Vec<FileEntry>> {
        Ok(self.files_where(job, |f| f.selected && !f.has_known_size()))
    }

    fn save_file(&self, job: JobId, file: &FileEntry) -> Result<bool> {
        let mut t = self.tables.lock();
        let Some(row) = t
            .files
            .get_mut(&job)
            .and_then(|files| files.iter_mut().find(|f| f.name == file.name))
        else {
            return Ok(false);
        };
        *row = FileEntry {
            events: Vec::new(),
            ..file.clone()
        };
        Ok(true)
    }

    fn add_file_event(&self, job: JobId, name: &str, event: &FileEvent) -> Result<bool> {
        let mut t = self.tables.lock();
        if t.file(job, name).is_none() {
            return Ok(false);
        }
        t.events
            .entry((job, name.to_string()))
            .or_default()
            .push(event.clone());
        Ok(true)
    }

    fn get_file_events(&self, job: JobId, name: &str) -> Result<Vec<FileEvent>> {
        let t = self.tables.lock();
        let mut events = t
            .events
            .get(&(job, name.to_string()))
            .cloned()
            .unwrap_or_default();
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(events)
    }
}
