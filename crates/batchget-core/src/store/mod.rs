//! Persistence seam: the `Store` DAO and the process-wide lock around it.
//!
//! Every store call goes through [`Persistence`], whose re-entrant lock
//! serializes access across the tick thread and controller calls. Worker
//! threads never touch the store; they journal instead.

mod memory;
pub mod sqlite;

use std::collections::HashMap;

use anyhow::Result;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::model::{FileEntry, FileEvent, Job, JobId};

/// Synchronous job/file/event DAO.
///
/// File rows come back without their event history; use `get_file_events`.
/// Update methods return `false` when the target row no longer exists.
pub trait Store: Send {
    /// Insert a job and return its id. Names are unique.
    fn create_job(&self, job: &Job) -> Result<JobId>;
    fn get_job_by_id(&self, id: JobId) -> Result<Option<Job>>;
    fn get_job_by_name(&self, name: &str) -> Result<Option<Job>>;
    fn get_all_jobs(&self) -> Result<Vec<Job>>;
    fn save_job(&self, job: &Job) -> Result<bool>;
    /// Delete a job with its files and events.
    fn delete_job(&self, id: JobId) -> Result<bool>;

    /// Insert files (and any events they carry). Names are unique per job.
    fn add_files(&self, job: JobId, files: &[FileEntry]) -> Result<()>;
    fn get_file_model_by_name(&self, job: JobId, name: &str) -> Result<Option<FileEntry>>;
    /// Batch fetch; names without a row are absent from the map.
    fn get_file_models_by_names(
        &self,
        job: JobId,
        names: &[String],
    ) -> Result<HashMap<String, FileEntry>>;
    /// All files of a job in insertion order.
    fn get_files_of_job(&self, job: JobId) -> Result<Vec<FileEntry>>;
    fn get_selected_files_of_job(&self, job: JobId) -> Result<Vec<FileEntry>>;
    fn get_selected_files_with_unknown_size(&self, job: JobId) -> Result<Vec<FileEntry>>;
    fn save_file(&self, job: JobId, file: &FileEntry) -> Result<bool>;

    fn add_file_event(&self, job: JobId, name: &str, event: &FileEvent) -> Result<bool>;
    /// Events of one file, oldest first.
    fn get_file_events(&self, job: JobId, name: &str) -> Result<Vec<FileEvent>>;
}

/// The store behind the global re-entrant persistence lock.
pub struct Persistence {
    store: ReentrantMutex<Box<dyn Store>>,
}

impl Persistence {
    pub fn new(store: impl Store + 'static) -> Self {
        Self::from_boxed(Box::new(store))
    }

    pub fn from_boxed(store: Box<dyn Store>) -> Self {
        Self {
            store: ReentrantMutex::new(store),
        }
    }

    /// Hold the lock across several calls. Re-entrant on the same thread.
    pub fn lock(&self) -> ReentrantMutexGuard<'_, Box<dyn Store>> {
        self.store.lock()
    }

    pub fn with<R>(&self, f: impl FnOnce(&dyn Store) -> R) -> R {
        let guard = self.store.lock();
        f(guard.as_ref())
    }
}
