//! Shared fixtures: a scripted transfer and a manager wired for manual ticks.

#![allow(dead_code)]

pub mod http_server;

use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use batchget_core::config::{BatchgetConfig, RetryConfig};
use batchget_core::events::{UiEvent, UiSink};
use batchget_core::manager::JobManager;
use batchget_core::store::Store;
use batchget_core::transfer::{
    Transfer, TransferError, TransferOutcome, TransferProgress, TransferRequest, TransferSignal,
};
use parking_lot::{Condvar, Mutex};

#[derive(Debug, Clone, Default)]
pub struct Script {
    pub body: Vec<u8>,
    /// Fail with this message instead of writing.
    pub fail: Option<String>,
    /// Block until `release` (or cancellation).
    pub hold: bool,
}

impl Script {
    pub fn body(len: usize) -> Self {
        Self {
            body: (0..len).map(|i| (i % 251) as u8).collect(),
            ..Self::default()
        }
    }

    pub fn held(len: usize) -> Self {
        Self {
            hold: true,
            ..Self::body(len)
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            fail: Some(message.to_string()),
            ..Self::default()
        }
    }
}

/// Writes scripted bodies to disk in small chunks, resuming from whatever
/// is already there. Unknown URLs answer 404.
#[derive(Default)]
pub struct ScriptedTransfer {
    scripts: Mutex<HashMap<String, Script>>,
    released: Mutex<HashSet<String>>,
    changed: Condvar,
    started: Mutex<Vec<String>>,
}

impl ScriptedTransfer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, url: &str, script: Script) {
        self.scripts.lock().insert(url.to_string(), script);
    }

    pub fn release(&self, url: &str) {
        self.released.lock().insert(url.to_string());
        self.changed.notify_all();
    }

    /// URLs in the order their downloads started.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().clone()
    }

    fn wait_for_release(&self, url: &str, signal: &TransferSignal) -> bool {
        let mut released = self.released.lock();
        loop {
            if signal.is_cancelled() {
                return false;
            }
            if released.contains(url) {
                return true;
            }
            self.changed.wait_for(&mut released, Duration::from_millis(5));
        }
    }
}

impl Transfer for ScriptedTransfer {
    fn download(
        &self,
        request: &TransferRequest<'_>,
        signal: &TransferSignal,
        progress: &mut dyn FnMut(TransferProgress),
    ) -> Result<TransferOutcome, TransferError> {
        let script = self
            .scripts
            .lock()
            .get(request.url)
            .cloned()
            .ok_or(TransferError::Http(404))?;
        self.started.lock().push(request.url.to_string());

        if script.hold && !self.wait_for_release(request.url, signal) {
            if let Some(reason) = signal.cancel_reason() {
                return Ok(TransferOutcome::Cancelled(reason));
            }
        }
        if let Some(message) = script.fail {
            return Err(TransferError::Other(message));
        }

        if let Some(parent) = request.destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let total = script.body.len() as u64;
        let existing = std::fs::metadata(request.destination)
            .map(|m| m.len())
            .unwrap_or(0);
        let mut offset = if existing <= total { existing } else { 0 };
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(offset > 0)
            .truncate(offset == 0)
            .open(request.destination)?;
        progress(TransferProgress {
            downloaded: offset,
            total: Some(total),
        });
        for chunk in script.body[offset as usize..].chunks(64) {
            if let Some(reason) = signal.cancel_reason() {
                return Ok(TransferOutcome::Cancelled(reason));
            }
            file.write_all(chunk)?;
            offset += chunk.len() as u64;
            progress(TransferProgress {
                downloaded: offset,
                total: Some(total),
            });
        }
        Ok(TransferOutcome::Completed)
    }

    fn resolve_remote_size(&self, url: &str) -> Result<u64, TransferError> {
        self.scripts
            .lock()
            .get(url)
            .map(|s| s.body.len() as u64)
            .ok_or(TransferError::Http(404))
    }
}

/// Config for tests: ticks only when the test asks, fast retries.
pub fn test_config() -> BatchgetConfig {
    BatchgetConfig {
        threads_per_job: 2,
        tick_interval_ms: 3_600_000,
        stop_wait_secs: 5,
        retry: Some(RetryConfig {
            max_attempts: 2,
            base_delay_secs: 0.001,
            max_delay_secs: 1,
        }),
        ..BatchgetConfig::default()
    }
}

pub fn manager(
    store: Box<dyn Store>,
    transfer: Arc<ScriptedTransfer>,
) -> (JobManager, Receiver<UiEvent>) {
    let (tx, rx) = mpsc::channel();
    let manager = JobManager::new(test_config(), store, transfer, UiSink::new(tx)).unwrap();
    (manager, rx)
}

pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Wait for all work to drain, then apply the journal.
pub fn settle(manager: &JobManager) {
    assert!(wait_until(|| manager.is_idle()), "work did not drain");
    manager.tick_now();
}
