//! `batchget import <path>` – create a job from an export.

use std::path::Path;

use anyhow::Result;
use batchget_core::JobManager;

pub fn run_import(manager: &JobManager, path: &Path) -> Result<()> {
    let id = manager.import_job(path)?;
    let files = manager.files(id).len();
    println!("Imported job {id} ({files} files) from {}", path.display());
    Ok(())
}
