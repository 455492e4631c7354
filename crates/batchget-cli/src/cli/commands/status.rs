//! `batchget status [id]` – list jobs, or the files of one job.

use anyhow::{Context, Result};
use batchget_core::model::{FileEntry, Job};
use batchget_core::JobManager;

pub fn run_status(manager: &JobManager, id: Option<i64>) -> Result<()> {
    match id {
        None => print_jobs(&manager.jobs()),
        Some(id) => {
            let job = manager.job(id).with_context(|| format!("no job with id {id}"))?;
            print_jobs(std::slice::from_ref(&job));
            println!();
            print_files(&manager.files(id));
        }
    }
    Ok(())
}

fn print_jobs(jobs: &[Job]) {
    if jobs.is_empty() {
        println!("No jobs in database.");
        return;
    }
    println!(
        "{:<6} {:<12} {:<8} {:<8} {:<22} {}",
        "ID", "STATUS", "FILES", "THREADS", "BYTES", "NAME"
    );
    for j in jobs {
        println!(
            "{:<6} {:<12} {:<8} {:<8} {:<22} {}",
            j.id,
            j.status.as_str(),
            format!("{}/{}", j.files_done, j.selected_files_count),
            j.threads_allocated,
            format!("{}/{}", j.downloaded_bytes, j.total_size_bytes),
            j.name
        );
    }
}

fn print_files(files: &[FileEntry]) {
    println!("{:<12} {:<8} {:<22} {}", "STATUS", "PRIO", "BYTES", "NAME");
    for f in files {
        let size = f
            .known_size()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "?".to_string());
        let name = if f.selected {
            f.name.clone()
        } else {
            format!("{} (unselected)", f.name)
        };
        println!(
            "{:<12} {:<8} {:<22} {}",
            f.status.as_str(),
            format!("{:?}", f.priority).to_lowercase(),
            format!("{}/{}", f.downloaded_bytes, size),
            name
        );
    }
}
