//! Controller: the operations a front end calls.
//!
//! Every operation does a quick synchronous pre-check against the cache, then
//! hands the work to an engine or journals the change, and returns an
//! [`OpResult`]. Effects become visible in the store and on the UI channel at
//! the next tick.

mod export;
mod registry;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;

pub use export::{FileExport, JobExport};

use crate::config::BatchgetConfig;
use crate::cycle::{JobCache, UpdateCycle};
use crate::engine::{DownloadEngine, EngineContext, StopAck};
use crate::events::UiSink;
use crate::journal::{JournalConsumer, JournalDaemon, ProgressJournal};
use crate::model::{FileEntry, FileEvent, FileStatus, Job, JobId, JobStatus, Priority};
use crate::naming::names_for_urls;
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::store::{Persistence, Store};
use crate::transfer::Transfer;
use registry::EngineRegistry;

/// Outcome of a controller operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpResult {
    pub success: bool,
    pub message: String,
}

impl OpResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

impl From<Result<String>> for OpResult {
    fn from(result: Result<String>) -> Self {
        match result {
            Ok(message) => OpResult::ok(message),
            Err(e) => OpResult::fail(format!("{e:#}")),
        }
    }
}

pub struct JobManager {
    config: BatchgetConfig,
    persistence: Arc<Persistence>,
    cache: Arc<Mutex<JobCache>>,
    registry: Arc<EngineRegistry>,
    cycle: Arc<UpdateCycle>,
    daemon: Arc<JournalDaemon>,
    limiter: Arc<RateLimiter>,
    transfer: Arc<dyn Transfer>,
    closed: AtomicBool,
}

impl JobManager {
    /// Load the cache from `store` and start the journal ticker.
    pub fn new(
        config: BatchgetConfig,
        store: Box<dyn Store>,
        transfer: Arc<dyn Transfer>,
        ui: UiSink,
    ) -> Result<Self> {
        let cache = JobCache::load(store.as_ref()).context("load jobs")?;
        let cache = Arc::new(Mutex::new(cache));
        let persistence = Arc::new(Persistence::from_boxed(store));
        let limiter = Arc::new(RateLimiter::new(config.max_bytes_per_sec));
        let registry = Arc::new(EngineRegistry::default());
        let cycle = Arc::new(UpdateCycle::new(
            Arc::clone(&persistence),
            Arc::clone(&cache),
            registry.clone(),
            Arc::clone(&limiter),
            ui,
        ));
        let consumer: JournalConsumer = {
            let cycle = Arc::clone(&cycle);
            Box::new(move |batch| cycle.update_tick(batch))
        };
        let daemon = JournalDaemon::new(consumer);
        daemon.spawn_ticker(config.tick_interval())?;
        tracing::info!(
            jobs = cache.lock().jobs().len(),
            tick_ms = config.tick_interval_ms,
            "job manager ready"
        );
        Ok(Self {
            config,
            persistence,
            cache,
            registry,
            cycle,
            daemon,
            limiter,
            transfer,
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &BatchgetConfig {
        &self.config
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.cache.lock().jobs()
    }

    pub fn job(&self, id: JobId) -> Option<Job> {
        self.cache.lock().job(id).cloned()
    }

    pub fn files(&self, id: JobId) -> Vec<FileEntry> {
        self.cache.lock().files(id)
    }

    pub fn file_events(&self, id: JobId, name: &str) -> Result<Vec<FileEvent>> {
        self.persistence.with(|s| s.get_file_events(id, name))
    }

    /// Nothing queued, transferring, or running in the background.
    pub fn is_idle(&self) -> bool {
        !self.registry.any_active() && self.registry.pending_tasks() == 0
    }

    /// Run one tick now instead of waiting for the ticker.
    pub fn tick_now(&self) {
        self.daemon.flush_now();
    }

    /// Create a job with one file per URL. Names are derived from the URLs
    /// and made unique. `folder` defaults to `<download_dir>/<name>`.
    pub fn create_job(&self, name: &str, folder: Option<&Path>, urls: &[String]) -> Result<JobId> {
        let name = name.trim();
        if name.is_empty() {
            bail!("job name must not be empty");
        }
        if urls.is_empty() {
            bail!("a job needs at least one URL");
        }
        for url in urls {
            url::Url::parse(url).with_context(|| format!("invalid URL {url:?}"))?;
        }
        let folder = match folder {
            Some(folder) => folder.to_path_buf(),
            None => self.default_folder(name)?,
        };
        let names = names_for_urls(urls.iter().map(String::as_str), std::iter::empty());
        let files: Vec<FileEntry> = names
            .into_iter()
            .zip(urls)
            .map(|(file_name, url)| {
                let mut file = FileEntry::new(file_name, url.as_str());
                file.events.push(FileEvent::now("added to job"));
                file
            })
            .collect();
        let job = Job::new(name, folder, self.config.threads_per_job);
        self.insert_job(job, files)
    }

    fn default_folder(&self, name: &str) -> Result<PathBuf> {
        let base = match &self.config.download_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().context("current directory")?,
        };
        Ok(base.join(crate::naming::sanitize_filename(name)))
    }

    fn insert_job(&self, mut job: Job, files: Vec<FileEntry>) -> Result<JobId> {
        for file in files.iter().filter(|f| f.selected) {
            job.adopt_file(file);
        }
        let guard = self.persistence.lock();
        let store: &dyn Store = guard.as_ref();
        if store.get_job_by_name(&job.name)?.is_some() {
            bail!("a job named {:?} already exists", job.name);
        }
        let id = store.create_job(&job)?;
        job.id = id;
        if let Err(e) = store.add_files(id, &files) {
            let _ = store.delete_job(id);
            return Err(e.context("add files"));
        }
        tracing::info!(job = id, name = %job.name, files = files.len(), "job created");
        self.cache.lock().insert_job(job, files);
        Ok(id)
    }

    /// Delete a job and its rows. Running transfers are stopped first; files
    /// on disk are left alone.
    pub fn delete_job(&self, id: JobId) -> OpResult {
        if let Some(engine) = self.registry.remove(id) {
            engine.shutdown();
        }
        let deleted = {
            let guard = self.persistence.lock();
            let deleted = guard.delete_job(id);
            self.cache.lock().remove_job(id);
            deleted
        };
        match deleted {
            Ok(true) => OpResult::ok(format!("deleted job {id}")),
            Ok(false) => OpResult::fail(format!("no job with id {id}")),
            Err(e) => OpResult::fail(format!("{e:#}")),
        }
    }

    /// Queue every selected file that can start, and resolve unknown sizes
    /// in the background.
    pub fn start_job(&self, id: JobId) -> OpResult {
        self.try_start_job(id).into()
    }

    fn try_start_job(&self, id: JobId) -> Result<String> {
        let (job, files) = {
            let cache = self.cache.lock();
            let job = cache.job(id).cloned().with_context(|| format!("no job with id {id}"))?;
            (job, cache.selected_files(id))
        };
        let startable: Vec<FileEntry> = files
            .iter()
            .filter(|f| f.status.is_startable())
            .cloned()
            .collect();
        if startable.is_empty() {
            return Ok("nothing to start".into());
        }
        let unknown: Vec<FileEntry> = startable
            .iter()
            .filter(|f| !f.has_known_size())
            .cloned()
            .collect();

        let engine = self.engine_for(&job)?;
        self.set_job_status(id, JobStatus::Starting);
        let queued = engine.download_files(startable);
        if !unknown.is_empty() {
            self.registry.track(engine.resolve_file_sizes(unknown)?);
        }
        tracing::info!(job = id, queued, "job started");
        Ok(format!("queued {queued} files"))
    }

    /// Cancel queued files and ask active transfers to stop.
    pub fn stop_job(&self, id: JobId) -> OpResult {
        let Some(engine) = self.registry.get(id) else {
            return OpResult::fail(format!("job {id} is not running"));
        };
        self.set_job_status(id, JobStatus::Stopping);
        let names: Vec<String> = self
            .cache
            .lock()
            .selected_files(id)
            .into_iter()
            .map(|f| f.name)
            .collect();
        let mut stopping = 0;
        for name in names {
            if engine.cancel_download(&name) {
                self.daemon
                    .file_transition(id, &name, FileStatus::Stopped, "download stopped");
            } else if engine.stop_active_download(&name, None) != StopAck::NotActive {
                stopping += 1;
            }
        }
        tracing::info!(job = id, stopping, "job stopping");
        OpResult::ok(format!("stopping {stopping} active transfers"))
    }

    pub fn start_file(&self, id: JobId, name: &str) -> OpResult {
        self.try_start_file(id, name).into()
    }

    fn try_start_file(&self, id: JobId, name: &str) -> Result<String> {
        let (job, file) = self.lookup(id, name)?;
        if !file.selected {
            bail!("{name} is not selected");
        }
        if !file.status.is_startable() {
            bail!("{name} is {}", file.status.as_str());
        }
        let engine = self.engine_for(&job)?;
        if !engine.download_file(file) {
            bail!("{name} is already downloading");
        }
        Ok(format!("queued {name}"))
    }

    /// Stop one file, waiting up to `stop_wait` for an active transfer to
    /// acknowledge.
    pub fn stop_file(&self, id: JobId, name: &str) -> OpResult {
        let Some(engine) = self.registry.get(id) else {
            return OpResult::fail(format!("job {id} is not running"));
        };
        if engine.cancel_download(name) {
            self.daemon
                .file_transition(id, name, FileStatus::Stopped, "download stopped");
            return OpResult::ok(format!("removed {name} from the queue"));
        }
        match engine.stop_active_download(name, Some(self.config.stop_wait())) {
            StopAck::NotActive => OpResult::fail(format!("{name} is not downloading")),
            StopAck::Acknowledged(status) => {
                OpResult::ok(format!("{name} is {}", status.as_str()))
            }
            StopAck::Requested | StopAck::TimedOut => {
                OpResult::ok(format!("stop requested for {name}"))
            }
        }
    }

    /// Throw away the local copy of a file and download it again.
    pub fn redownload_file(&self, id: JobId, name: &str) -> OpResult {
        self.try_redownload_file(id, name).into()
    }

    fn try_redownload_file(&self, id: JobId, name: &str) -> Result<String> {
        let (job, file) = self.lookup(id, name)?;
        if !file.selected {
            bail!("{name} is not selected");
        }
        if let Some(engine) = self.registry.get(id) {
            if engine.is_active(name) || engine.is_queued(name) {
                bail!("{name} is busy; stop it first");
            }
        }
        let path = job.local_path(name);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("remove {}", path.display())),
        }
        self.daemon.update_file_progress(id, name, 0);
        self.daemon.add_file_event(id, name, "re-download requested");
        let engine = self.engine_for(&job)?;
        engine.download_file(FileEntry {
            downloaded_bytes: 0,
            status: FileStatus::New,
            ..file
        });
        Ok(format!("re-downloading {name}"))
    }

    pub fn set_priority(&self, id: JobId, name: &str, priority: Priority) -> OpResult {
        if let Err(e) = self.lookup(id, name) {
            return OpResult::fail(format!("{e:#}"));
        }
        if let Some(engine) = self.registry.get(id) {
            engine.reprioritize(name, priority);
        }
        self.daemon.update_file_priority(id, name, priority);
        OpResult::ok(format!("{name} priority set"))
    }

    /// Select or unselect a file. Unselecting stops it first.
    pub fn set_selected(&self, id: JobId, name: &str, selected: bool) -> OpResult {
        let file = match self.lookup(id, name) {
            Ok((_, file)) => file,
            Err(e) => return OpResult::fail(format!("{e:#}")),
        };
        if file.selected == selected {
            return OpResult::ok("unchanged");
        }
        let mut journal = ProgressJournal::new();
        if !selected {
            if let Some(engine) = self.registry.get(id) {
                if engine.cancel_download(name) {
                    journal.file_mut(name).status = Some(FileStatus::Stopped);
                } else {
                    engine.stop_active_download(name, None);
                }
            }
        }
        journal.file_mut(name).selected = Some(selected);
        self.cycle.submit(id, journal);
        OpResult::ok(if selected {
            format!("{name} selected")
        } else {
            format!("{name} unselected")
        })
    }

    pub fn add_thread(&self, id: JobId) -> OpResult {
        let Some(job) = self.job(id) else {
            return OpResult::fail(format!("no job with id {id}"));
        };
        match self.registry.get(id) {
            Some(engine) => match engine.add_thread() {
                Ok(size) => OpResult::ok(format!("{size} worker threads")),
                Err(e) => OpResult::fail(format!("{e:#}")),
            },
            None => {
                let threads = job.threads_allocated + 1;
                self.set_job_threads(id, threads);
                OpResult::ok(format!("{threads} worker threads"))
            }
        }
    }

    pub fn remove_thread(&self, id: JobId) -> OpResult {
        let Some(job) = self.job(id) else {
            return OpResult::fail(format!("no job with id {id}"));
        };
        match self.registry.get(id) {
            Some(engine) => {
                if engine.remove_thread() {
                    OpResult::ok(format!("{} worker threads", engine.pool_size()))
                } else {
                    OpResult::fail("cannot remove the last worker thread")
                }
            }
            None if job.threads_allocated > 1 => {
                let threads = job.threads_allocated - 1;
                self.set_job_threads(id, threads);
                OpResult::ok(format!("{threads} worker threads"))
            }
            None => OpResult::fail("cannot remove the last worker thread"),
        }
    }

    /// Change the global bandwidth cap (bytes/s, 0 = unlimited).
    pub fn set_rate_limit(&self, bytes_per_sec: u64) -> OpResult {
        self.limiter.set_global_cap(bytes_per_sec);
        OpResult::ok(format!("rate limit {bytes_per_sec} B/s"))
    }

    pub fn health_check(&self, id: JobId) -> OpResult {
        self.try_background(id, |engine, files| engine.health_check(files), false)
            .into()
    }

    pub fn resolve_sizes(&self, id: JobId) -> OpResult {
        self.try_background(id, |engine, files| engine.resolve_file_sizes(files), true)
            .into()
    }

    fn try_background(
        &self,
        id: JobId,
        run: impl FnOnce(&DownloadEngine, Vec<FileEntry>) -> Result<std::thread::JoinHandle<()>>,
        unknown_only: bool,
    ) -> Result<String> {
        let job = self.job(id).with_context(|| format!("no job with id {id}"))?;
        let files = self.persistence.with(|s| {
            if unknown_only {
                s.get_selected_files_with_unknown_size(id)
            } else {
                s.get_selected_files_of_job(id)
            }
        })?;
        let count = files.len();
        let engine = self.engine_for(&job)?;
        self.registry.track(run(&*engine, files)?);
        Ok(format!("checking {count} files"))
    }

    /// Reconcile every job's persisted state after a restart.
    pub fn resume_all(&self) -> OpResult {
        self.try_resume_all().into()
    }

    fn try_resume_all(&self) -> Result<String> {
        let mut resumed = 0;
        for job in self.jobs() {
            let files = self.persistence.with(|s| s.get_selected_files_of_job(job.id))?;
            let needs_engine = files.iter().any(|f| {
                matches!(
                    f.status,
                    FileStatus::Stopping
                        | FileStatus::Downloading
                        | FileStatus::Queued
                        | FileStatus::Completed
                )
            });
            if !needs_engine {
                continue;
            }
            let engine = self.engine_for(&job)?;
            self.registry.track(engine.resume_files(files)?);
            resumed += 1;
        }
        tracing::info!(jobs = resumed, "resume started");
        Ok(format!("resuming {resumed} jobs"))
    }

    pub fn export_job(&self, id: JobId, path: &Path) -> OpResult {
        self.try_export_job(id, path).into()
    }

    fn try_export_job(&self, id: JobId, path: &Path) -> Result<String> {
        let job = self.job(id).with_context(|| format!("no job with id {id}"))?;
        let files = self.persistence.with(|s| s.get_files_of_job(id))?;
        let export = JobExport::from_job(&job, &files);
        let json = serde_json::to_string_pretty(&export)?;
        std::fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
        Ok(format!("exported {} files to {}", files.len(), path.display()))
    }

    pub fn import_job(&self, path: &Path) -> Result<JobId> {
        let json =
            std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let export: JobExport = serde_json::from_str(&json)
            .with_context(|| format!("parse job export {}", path.display()))?;
        let threads = export.threads.max(1) as usize;
        let mut files = export.file_entries();
        for file in &mut files {
            file.events.push(FileEvent::now("imported"));
        }
        self.insert_job(Job::new(export.name, export.folder, threads), files)
    }

    /// Stop every engine and background task, then flush the last journal.
    /// Active transfers keep their persisted state and resume next launch.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for engine in self.registry.drain() {
            engine.shutdown();
        }
        self.registry.join_tasks();
        self.daemon.stop();
        tracing::info!(ticks = self.cycle.ticks(), "job manager stopped");
    }

    fn lookup(&self, id: JobId, name: &str) -> Result<(Job, FileEntry)> {
        let cache = self.cache.lock();
        let job = cache.job(id).cloned().with_context(|| format!("no job with id {id}"))?;
        let file = cache
            .file(id, name)
            .cloned()
            .with_context(|| format!("no file {name:?} in job {id}"))?;
        Ok((job, file))
    }

    fn engine_for(&self, job: &Job) -> Result<Arc<DownloadEngine>> {
        if self.closed.load(Ordering::Acquire) {
            bail!("manager is shut down");
        }
        self.registry.get_or_create(job.id, || {
            let ctx = EngineContext {
                transfer: Arc::clone(&self.transfer),
                journal: Arc::clone(&self.daemon),
                limiter: Arc::clone(&self.limiter),
                resolve_policy: RetryPolicy::from_config(self.config.retry.as_ref()),
            };
            DownloadEngine::new(
                job.id,
                job.folder.clone(),
                job.threads_allocated.max(1) as usize,
                ctx,
            )
        })
    }

    fn set_job_status(&self, id: JobId, status: JobStatus) {
        let mut journal = ProgressJournal::new();
        journal.job_mut().status = Some(status);
        self.cycle.submit(id, journal);
    }

    fn set_job_threads(&self, id: JobId, threads: i64) {
        let mut journal = ProgressJournal::new();
        journal.job_mut().threads_allocated = Some(threads);
        self.cycle.submit(id, journal);
    }
}

impl Drop for JobManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
