//! `batchget export <id> <path>` – write a job definition as JSON.

use std::path::Path;

use anyhow::{bail, Result};
use batchget_core::JobManager;

pub fn run_export(manager: &JobManager, id: i64, path: &Path) -> Result<()> {
    let result = manager.export_job(id, path);
    if !result.success {
        bail!("{}", result.message);
    }
    println!("{}", result.message);
    Ok(())
}
