//! SQLite-backed store (sqlx).
//!
//! sqlx is async; the `Store` trait is not. Each store owns a private
//! current-thread tokio runtime and blocks on it, which is fine because all
//! callers already serialize through the persistence lock.

mod files;
mod jobs;

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};

use super::Store;
use crate::model::{FileEntry, FileEvent, FileStatus, Job, JobId, JobStatus, Priority};

/// Percent-encode a path for use in a sqlite:// URI so spaces and special chars don't break parsing.
fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    format!("sqlite://{}", out)
}

/// Current time as Unix seconds (row timestamps).
pub(crate) fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        status TEXT NOT NULL,
        folder TEXT NOT NULL,
        total_size_bytes INTEGER NOT NULL DEFAULT 0,
        downloaded_bytes INTEGER NOT NULL DEFAULT 0,
        selected_files_count INTEGER NOT NULL DEFAULT 0,
        selected_files_with_known_size INTEGER NOT NULL DEFAULT 0,
        files_done INTEGER NOT NULL DEFAULT 0,
        threads_allocated INTEGER NOT NULL DEFAULT 1,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id INTEGER NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        url TEXT NOT NULL,
        status TEXT NOT NULL,
        size_bytes INTEGER NOT NULL DEFAULT -1,
        downloaded_bytes INTEGER NOT NULL DEFAULT 0,
        priority INTEGER NOT NULL DEFAULT 2,
        selected INTEGER NOT NULL DEFAULT 1,
        UNIQUE (job_id, name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
        timestamp TEXT NOT NULL,
        message TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS events_by_file ON events (file_id, timestamp)",
];

/// Handle to the SQLite job/file/event database.
pub struct SqliteStore {
    // Dropped before the runtime it was created on.
    pool: Pool<Sqlite>,
    rt: tokio::runtime::Runtime,
}

impl SqliteStore {
    /// Open (or create) the database at `path`. Creates parent dirs if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create database dir {}", parent.display()))?;
        }
        let uri = path_to_sqlite_uri(path) + "?mode=rwc";
        Self::connect(&uri, 4).with_context(|| format!("open database {}", path.display()))
    }

    /// Private in-memory database (one connection, so every call sees it).
    pub fn open_memory() -> Result<Self> {
        Self::connect("sqlite::memory:", 1)
    }

    fn connect(uri: &str, max_connections: u32) -> Result<Self> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("build store runtime")?;
        let pool = rt.block_on(
            SqlitePoolOptions::new()
                .max_connections(max_connections)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
                .connect(uri),
        )?;
        let store = Self { pool, rt };
        store.block_on(store.migrate())?;
        Ok(store)
    }

    fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.rt.block_on(fut)
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

const JOB_COLUMNS: &str = "id, name, status, folder, total_size_bytes, downloaded_bytes, \
     selected_files_count, selected_files_with_known_size, files_done, threads_allocated";

const FILE_COLUMNS: &str =
    "name, url, status, size_bytes, downloaded_bytes, priority, selected";

fn job_from_row(row: &SqliteRow) -> Job {
    let status: String = row.get("status");
    let folder: String = row.get("folder");
    Job {
        id: row.get("id"),
        name: row.get("name"),
        status: JobStatus::from_str(&status),
        folder: folder.into(),
        total_size_bytes: row.get("total_size_bytes"),
        downloaded_bytes: row.get("downloaded_bytes"),
        selected_files_count: row.get("selected_files_count"),
        selected_files_with_known_size: row.get("selected_files_with_known_size"),
        files_done: row.get("files_done"),
        threads_allocated: row.get("threads_allocated"),
    }
}

fn file_from_row(row: &SqliteRow) -> FileEntry {
    let status: String = row.get("status");
    let priority: i64 = row.get("priority");
    let selected: i64 = row.get("selected");
    FileEntry {
        name: row.get("name"),
        url: row.get("url"),
        status: FileStatus::from_str(&status),
        size_bytes: row.get("size_bytes"),
        downloaded_bytes: row.get("downloaded_bytes"),
        priority: Priority::from_rank(priority),
        selected: selected != 0,
        events: Vec::new(),
    }
}

fn event_from_row(row: &SqliteRow) -> FileEvent {
    FileEvent {
        timestamp: row.get("timestamp"),
        message: row.get("message"),
    }
}

impl Store for SqliteStore {
    fn create_job(&self, job: &Job) -> Result<JobId> {
        self.block_on(self.insert_job(job))
    }

    fn get_job_by_id(&self, id: JobId) -> Result<Option<Job>> {
        self.block_on(self.job_by_id(id))
    }

    fn get_job_by_name(&self, name: &str) -> Result<Option<Job>> {
        self.block_on(self.job_by_name(name))
    }

    fn get_all_jobs(&self) -> Result<Vec<Job>> {
        self.block_on(self.list_jobs())
    }

    fn save_job(&self, job: &Job) -> Result<bool> {
        self.block_on(self.update_job(job))
    }

    fn delete_job(&self, id: JobId) -> Result<bool> {
        self.block_on(self.remove_job(id))
    }

    fn add_files(&self, job: JobId, files: &[FileEntry]) -> Result<()> {
        self.block_on(self.insert_files(job, files))
    }

    fn get_file_model_by_name(&self, job: JobId, name: &str) -> Result<Option<FileEntry>> {
        self.block_on(self.file_by_name(job, name))
    }

    fn get_file_models_by_names(
        &self,
        job: JobId,
        names: &[String],
    ) -> Result<HashMap<String, FileEntry>> {
        self.block_on(self.files_by_names(job, names))
    }

    fn get_files_of_job(&self, job: JobId) -> Result<Vec<FileEntry>> {
        self.block_on(self.files_where(job, ""))
    }

    fn get_selected_files_of_job(&self, job: JobId) -> Result<Vec<FileEntry>> {
        self.block_on(self.files_where(job, "AND selected = 1"))
    }

    fn get_selected_files_with_unknown_size(&self, job: JobId) -> Result<Vec<FileEntry>> {
        self.block_on(self.files_where(job, "AND selected = 1 AND size_bytes < 0"))
    }

    fn save_file(&self, job: JobId, file: &FileEntry) -> Result<bool> {
        self.block_on(self.update_file(job, file))
    }

    fn add_file_event(&self, job: JobId, name: &str, event: &FileEvent) -> Result<bool> {
        self.block_on(self.insert_event(job, name, event))
    }

    fn get_file_events(&self, job: JobId, name: &str) -> Result<Vec<FileEvent>> {
        self.block_on(self.events_of(job, name))
    }
}
