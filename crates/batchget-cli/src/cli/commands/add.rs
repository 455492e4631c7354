//! `batchget add <name> [--dir <folder>] <url>...` – create a job.

use std::path::Path;

use anyhow::Result;
use batchget_core::JobManager;

pub fn run_add(manager: &JobManager, name: &str, dir: Option<&Path>, urls: &[String]) -> Result<()> {
    let id = manager.create_job(name, dir, urls)?;
    let job = manager.job(id);
    let folder = job
        .as_ref()
        .map(|j| j.folder.display().to_string())
        .unwrap_or_default();
    println!("Added job {id} ({} files) into {folder}", urls.len());
    Ok(())
}
