//! `batchget run` – resume interrupted work, start jobs, print progress until idle.

use std::sync::mpsc::{Receiver, RecvTimeoutError};

use anyhow::{bail, Result};
use batchget_core::model::{JobId, JobStatus};
use batchget_core::{JobManager, UiEvent};

pub fn run_jobs(
    manager: &JobManager,
    events: &Receiver<UiEvent>,
    job: Option<JobId>,
    threads: Option<usize>,
) -> Result<()> {
    let resumed = manager.resume_all();
    tracing::info!(message = %resumed.message, "resume");

    let targets: Vec<JobId> = match job {
        Some(id) => {
            if manager.job(id).is_none() {
                bail!("no job with id {id}");
            }
            vec![id]
        }
        None => manager
            .jobs()
            .into_iter()
            .filter(|j| j.status != JobStatus::Completed)
            .map(|j| j.id)
            .collect(),
    };

    for id in targets {
        let before = manager.job(id).map(|j| j.threads_allocated).unwrap_or(1);
        let result = manager.start_job(id);
        println!("job {id}: {}", result.message);
        if !result.success {
            continue;
        }
        if let Some(threads) = threads {
            resize_pool(manager, id, before, threads.max(1) as i64);
        }
    }

    wait_until_idle(manager, events);
    for j in manager.jobs() {
        println!(
            "job {} {}: {} ({}/{} files)",
            j.id,
            j.name,
            j.status.as_str(),
            j.files_done,
            j.selected_files_count
        );
    }
    Ok(())
}

fn resize_pool(manager: &JobManager, id: JobId, mut current: i64, wanted: i64) {
    while current < wanted {
        if !manager.add_thread(id).success {
            return;
        }
        current += 1;
    }
    while current > wanted {
        if !manager.remove_thread(id).success {
            return;
        }
        current -= 1;
    }
}

/// Print UI events until nothing is queued, transferring or running in the
/// background, then apply the final tick.
pub(super) fn wait_until_idle(manager: &JobManager, events: &Receiver<UiEvent>) {
    let poll = manager.config().tick_interval();
    loop {
        match events.recv_timeout(poll) {
            Ok(event) => print_event(&event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if manager.is_idle() {
            break;
        }
    }
    manager.tick_now();
    for event in events.try_iter() {
        print_event(&event);
    }
}

fn print_event(event: &UiEvent) {
    match event {
        UiEvent::JobChanged { job, diff } => {
            if let Some(status) = diff.status {
                println!("job {job}: {}", status.as_str());
            }
            if let Some(percent) = diff.percent {
                let rate = diff
                    .rate_bps
                    .map(|r| format!("  {:.2} MiB/s", r as f64 / 1_048_576.0))
                    .unwrap_or_default();
                let eta = diff
                    .eta_secs
                    .map(|s| format!("  ETA {s}s"))
                    .unwrap_or_default();
                println!("job {job}: {percent}%{rate}{eta}");
            }
        }
        UiEvent::FileChanged { job, name, diff } => {
            if let Some(event) = &diff.latest_event {
                println!("job {job} {name}: {}", event.message);
            } else if let Some(status) = diff.status {
                println!("job {job} {name}: {}", status.as_str());
            }
        }
        UiEvent::JobNotice { job, message } => println!("job {job}: {message}"),
    }
}
