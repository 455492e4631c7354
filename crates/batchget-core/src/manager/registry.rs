//! Live engines by job, plus the background threads they spawned.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::Result;
use parking_lot::Mutex;

use crate::cycle::ActivityProbe;
use crate::engine::DownloadEngine;
use crate::model::JobId;

#[derive(Default)]
pub(crate) struct EngineRegistry {
    engines: Mutex<HashMap<JobId, Arc<DownloadEngine>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl EngineRegistry {
    pub fn get(&self, job: JobId) -> Option<Arc<DownloadEngine>> {
        self.engines.lock().get(&job).cloned()
    }

    /// The engine for `job`, created with `create` if there is none yet.
    pub fn get_or_create(
        &self,
        job: JobId,
        create: impl FnOnce() -> Result<DownloadEngine>,
    ) -> Result<Arc<DownloadEngine>> {
        let mut engines = self.engines.lock();
        if let Some(engine) = engines.get(&job) {
            return Ok(Arc::clone(engine));
        }
        let engine = Arc::new(create()?);
        engines.insert(job, Arc::clone(&engine));
        Ok(engine)
    }

    pub fn remove(&self, job: JobId) -> Option<Arc<DownloadEngine>> {
        self.engines.lock().remove(&job)
    }

    pub fn drain(&self) -> Vec<Arc<DownloadEngine>> {
        self.engines.lock().drain().map(|(_, e)| e).collect()
    }

    pub fn track(&self, task: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    /// Background tasks still running.
    pub fn pending_tasks(&self) -> usize {
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.len()
    }

    pub fn join_tasks(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.join();
        }
    }

    pub fn any_active(&self) -> bool {
        self.engines.lock().values().any(|e| e.has_active_work())
    }
}

impl ActivityProbe for EngineRegistry {
    fn has_active_work(&self, job: JobId) -> bool {
        self.get(job).is_some_and(|e| e.has_active_work())
    }
}
