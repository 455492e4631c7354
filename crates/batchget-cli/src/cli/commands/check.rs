//! `batchget check <id>` – verify completed files on disk.

use std::sync::mpsc::Receiver;

use anyhow::{bail, Result};
use batchget_core::model::FileStatus;
use batchget_core::{JobManager, UiEvent};

use super::run::wait_until_idle;

pub fn run_check(manager: &JobManager, events: &Receiver<UiEvent>, id: i64) -> Result<()> {
    let result = manager.health_check(id);
    if !result.success {
        bail!("{}", result.message);
    }
    println!("job {id}: {}", result.message);
    wait_until_idle(manager, events);

    let invalid: Vec<String> = manager
        .files(id)
        .into_iter()
        .filter(|f| f.selected && f.status == FileStatus::Invalid)
        .map(|f| f.name)
        .collect();
    if invalid.is_empty() {
        println!("job {id}: all completed files are intact");
    } else {
        println!("job {id}: {} invalid: {}", invalid.len(), invalid.join(", "));
    }
    Ok(())
}
