use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::*;
use crate::journal::{merge_into, JournalBatch};
use crate::transfer::{TransferError, TransferOutcome, TransferProgress, TransferRequest};

/// Transfers block until released, failed, panicked, or cancelled.
#[derive(Default)]
struct GateTransfer {
    state: Mutex<Gates>,
    changed: Condvar,
}

#[derive(Default)]
struct Gates {
    started: Vec<String>,
    released: HashSet<String>,
    failing: HashSet<String>,
    panicking: HashSet<String>,
    /// Report half of the known size before waiting.
    halfway: HashSet<String>,
}

impl GateTransfer {
    fn release(&self, name: &str) {
        self.state.lock().released.insert(name.to_string());
        self.changed.notify_all();
    }

    fn started(&self) -> Vec<String> {
        self.state.lock().started.clone()
    }
}

impl Transfer for GateTransfer {
    fn download(
        &self,
        request: &TransferRequest<'_>,
        signal: &TransferSignal,
        progress: &mut dyn FnMut(TransferProgress),
    ) -> Result<TransferOutcome, TransferError> {
        let name = request
            .destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut gates = self.state.lock();
        gates.started.push(name.clone());
        self.changed.notify_all();
        if gates.halfway.contains(&name) {
            progress(TransferProgress {
                downloaded: request.known_size.unwrap_or(0) / 2,
                total: request.known_size,
            });
        }
        loop {
            if let Some(reason) = signal.cancel_reason() {
                return Ok(TransferOutcome::Cancelled(reason));
            }
            if gates.failing.contains(&name) {
                return Err(TransferError::Other("connection reset".into()));
            }
            if gates.panicking.contains(&name) {
                drop(gates);
                panic!("fake transfer exploded");
            }
            if gates.released.contains(&name) {
                drop(gates);
                progress(TransferProgress {
                    downloaded: 10,
                    total: Some(10),
                });
                return Ok(TransferOutcome::Completed);
            }
            self.changed.wait_for(&mut gates, Duration::from_millis(5));
        }
    }

    fn resolve_remote_size(&self, url: &str) -> Result<u64, TransferError> {
        if url.contains("missing") {
            Err(TransferError::Http(404))
        } else {
            Ok(1234)
        }
    }
}

struct Harness {
    transfer: Arc<GateTransfer>,
    daemon: Arc<JournalDaemon>,
    seen: Arc<Mutex<JournalBatch>>,
    ctx: EngineContext,
}

impl Harness {
    fn new() -> Self {
        let transfer = Arc::new(GateTransfer::default());
        let seen = Arc::new(Mutex::new(JournalBatch::new()));
        let sink = Arc::clone(&seen);
        let daemon = JournalDaemon::new(Box::new(move |batch: JournalBatch| {
            let mut seen = sink.lock();
            for (job, journal) in batch {
                merge_into(&mut seen, job, journal);
            }
        }));
        let ctx = EngineContext {
            transfer: transfer.clone(),
            journal: Arc::clone(&daemon),
            limiter: Arc::new(RateLimiter::new(0)),
            resolve_policy: RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
        };
        Self {
            transfer,
            daemon,
            seen,
            ctx,
        }
    }

    fn engine(&self, threads: usize) -> DownloadEngine {
        DownloadEngine::new(1, "/tmp/batchget-engine-tests", threads, self.ctx.clone()).unwrap()
    }

    fn status(&self, name: &str) -> Option<FileStatus> {
        self.daemon.flush_now();
        self.seen
            .lock()
            .get(&1)
            .and_then(|j| j.files.get(name))
            .and_then(|d| d.status)
    }

    fn events(&self, name: &str) -> Vec<String> {
        self.daemon.flush_now();
        self.seen
            .lock()
            .get(&1)
            .and_then(|j| j.events.get(name))
            .map(|ev| ev.iter().map(|e| e.message.clone()).collect())
            .unwrap_or_default()
    }

    fn threads(&self) -> Option<i64> {
        self.daemon.flush_now();
        self.seen
            .lock()
            .get(&1)
            .and_then(|j| j.job.as_ref())
            .and_then(|d| d.threads_allocated)
    }
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

fn file(name: &str, priority: Priority) -> FileEntry {
    FileEntry::new(name, format!("http://h/{name}")).with_priority(priority)
}

#[test]
fn shrinking_a_busy_pool_preempts_the_least_urgent_file() {
    let h = Harness::new();
    let engine = h.engine(3);
    engine.download_files([
        file("a", Priority::High),
        file("b", Priority::Normal),
        file("c", Priority::Low),
    ]);
    assert!(wait_until(|| engine.busy_threads() == 3));

    assert!(engine.remove_thread());
    assert_eq!(engine.pool_size(), 2);
    assert!(wait_until(|| engine.is_queued("c")));
    assert!(engine.is_active("a"));
    assert!(engine.is_active("b"));
    assert_eq!(h.status("c"), Some(FileStatus::Queued));
    assert!(h
        .events("c")
        .contains(&"re-queued: worker thread removed".to_string()));
    assert_eq!(h.threads(), Some(2));

    // The freed slot picks the preempted file back up.
    h.transfer.release("a");
    assert!(wait_until(|| engine.is_active("c")));
    assert_eq!(h.status("a"), Some(FileStatus::Completed));
}

#[test]
fn preempted_file_is_requeued_at_its_active_priority() {
    let h = Harness::new();
    let engine = h.engine(2);
    engine.download_files([
        file("a", Priority::High),
        file("b", Priority::Normal),
        file("c", Priority::Low),
    ]);
    assert!(wait_until(|| engine.is_active("a") && engine.is_active("b")));
    assert!(engine.is_queued("c"));

    assert!(engine.reprioritize("b", Priority::Low));
    assert!(engine.remove_thread());
    assert!(wait_until(|| engine.is_queued("b")));

    // "b" now waits behind "c", which was queued at Low first.
    h.transfer.release("a");
    assert!(wait_until(|| engine.is_active("c")));
    assert!(engine.is_queued("b"));
    assert_eq!(h.transfer.started(), ["a", "b", "c"]);
}

#[test]
fn removing_the_last_thread_is_a_no_op() {
    let h = Harness::new();
    let engine = h.engine(1);
    assert!(!engine.remove_thread());
    assert_eq!(engine.pool_size(), 1);
    assert_eq!(engine.add_thread().unwrap(), 2);
    assert!(engine.remove_thread());
    assert_eq!(engine.pool_size(), 1);
}

#[test]
fn idle_shrink_does_not_preempt() {
    let h = Harness::new();
    let engine = h.engine(2);
    engine.download_file(file("a", Priority::Low));
    assert!(wait_until(|| engine.is_active("a")));
    assert!(engine.remove_thread());
    thread::sleep(Duration::from_millis(50));
    assert!(engine.is_active("a"));
    assert_eq!(h.status("a"), Some(FileStatus::Downloading));
}

#[test]
fn stop_waits_for_the_worker_to_acknowledge() {
    let h = Harness::new();
    let engine = h.engine(1);
    assert_eq!(engine.stop_active_download("a", None), StopAck::NotActive);

    engine.download_file(file("a", Priority::Normal));
    assert!(wait_until(|| engine.is_active("a")));
    let ack = engine.stop_active_download("a", Some(Duration::from_secs(5)));
    assert_eq!(ack, StopAck::Acknowledged(FileStatus::Stopped));
    assert!(!engine.is_active("a"));
    assert_eq!(h.status("a"), Some(FileStatus::Stopped));
    assert_eq!(h.events("a"), ["download started", "download stopped"]);
}

#[test]
fn cancel_only_touches_queued_files() {
    let h = Harness::new();
    let engine = h.engine(1);
    engine.download_files([file("a", Priority::Normal), file("b", Priority::Normal)]);
    assert!(wait_until(|| engine.is_active("a")));
    assert!(engine.is_queued("b"));

    assert!(engine.cancel_download("b"));
    assert!(!engine.cancel_download("b"));
    assert!(!engine.cancel_download("a"));

    h.transfer.release("a");
    assert!(wait_until(|| !engine.has_active_work()));
    assert_eq!(h.transfer.started(), ["a"]);
}

#[test]
fn failures_and_panics_keep_the_worker_alive() {
    let h = Harness::new();
    {
        let mut gates = h.transfer.state.lock();
        gates.failing.insert("f".into());
        gates.panicking.insert("p".into());
        gates.released.insert("ok".into());
    }
    let engine = h.engine(1);
    engine.download_files([
        file("f", Priority::Normal),
        file("p", Priority::Normal),
        file("ok", Priority::Normal),
    ]);
    assert!(wait_until(|| h.status("ok") == Some(FileStatus::Completed)));

    assert_eq!(h.status("f"), Some(FileStatus::Failed));
    assert!(h
        .events("f")
        .contains(&"download failed: connection reset".to_string()));
    assert_eq!(h.status("p"), Some(FileStatus::Failed));
    assert!(h
        .events("p")
        .iter()
        .any(|e| e.contains("worker panicked")));
    assert_eq!(engine.pool_size(), 1);
    assert!(!engine.has_active_work());
}

#[test]
fn completion_journals_size_and_progress() {
    let h = Harness::new();
    h.transfer.release("a");
    let engine = h.engine(1);
    engine.download_file(file("a", Priority::Normal));
    assert!(wait_until(|| h.status("a") == Some(FileStatus::Completed)));
    let seen = h.seen.lock();
    let diff = &seen[&1].files["a"];
    assert_eq!(diff.size_bytes, Some(10));
    assert_eq!(diff.downloaded_bytes, Some(10));
}

#[test]
fn known_size_gives_percent_while_downloading() {
    let h = Harness::new();
    h.transfer.state.lock().halfway.insert("a".into());
    let engine = h.engine(1);
    let mut a = file("a", Priority::Normal);
    a.size_bytes = 1000;
    engine.download_file(a);
    assert!(wait_until(|| h.transfer.started() == ["a"]));

    assert_eq!(h.status("a"), Some(FileStatus::Downloading));
    let seen = h.seen.lock();
    let diff = &seen[&1].files["a"];
    assert_eq!(diff.size_bytes, Some(1000));
    assert_eq!(diff.downloaded_bytes, Some(500));
    assert_eq!(diff.percent, Some(50));
}

#[test]
fn shutdown_journals_nothing_for_active_files() {
    let h = Harness::new();
    let engine = h.engine(1);
    engine.download_files([file("a", Priority::Normal), file("b", Priority::Normal)]);
    assert!(wait_until(|| engine.is_active("a")));
    engine.shutdown();

    assert_eq!(h.status("a"), Some(FileStatus::Downloading));
    assert_eq!(h.events("a"), ["download started"]);
    assert_eq!(h.status("b"), Some(FileStatus::Queued));
    assert!(!engine.download_file(file("c", Priority::Normal)));
    assert!(!engine.remove_thread());
}

#[test]
fn resolver_reports_sizes_and_keeps_going_after_errors() {
    let h = Harness::new();
    let engine = h.engine(1);
    let mut known = FileEntry::new("known", "http://h/known");
    known.size_bytes = 5;
    let files = vec![
        FileEntry::new("missing", "http://h/missing"),
        known,
        FileEntry::new("ok", "http://h/ok"),
    ];
    engine.resolve_file_sizes(files).unwrap().join().unwrap();

    h.daemon.flush_now();
    {
        let seen = h.seen.lock();
        let journal = &seen[&1];
        assert_eq!(journal.files["ok"].size_bytes, Some(1234));
        assert!(!journal.files.contains_key("missing"));
        assert!(!journal.events.contains_key("known"));
    }
    assert_eq!(h.events("ok"), ["size resolved: 1234 bytes"]);
    assert_eq!(h.events("missing"), ["size resolution failed: HTTP 404"]);
}

fn with_status(name: &str, status: FileStatus, downloaded: i64) -> FileEntry {
    FileEntry {
        status,
        downloaded_bytes: downloaded,
        size_bytes: downloaded.max(-1),
        ..FileEntry::new(name, format!("http://h/{name}"))
    }
}

#[test]
fn resume_reconciles_each_status() {
    let h = Harness::new();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("short.iso"), vec![0u8; 900]).unwrap();
    std::fs::write(dir.path().join("good.iso"), vec![0u8; 1000]).unwrap();
    let engine = DownloadEngine::new(1, dir.path(), 1, h.ctx.clone()).unwrap();

    let mut unselected = with_status("skip.iso", FileStatus::Stopping, 0);
    unselected.selected = false;
    let files = vec![
        with_status("halted.iso", FileStatus::Stopping, 10),
        with_status("busy.iso", FileStatus::Downloading, 10),
        with_status("waiting.iso", FileStatus::Queued, 0),
        with_status("short.iso", FileStatus::Completed, 1000),
        with_status("good.iso", FileStatus::Completed, 1000),
        with_status("fresh.iso", FileStatus::New, 0),
        unselected,
    ];
    engine.resume_files(files).unwrap().join().unwrap();

    assert_eq!(h.status("halted.iso"), Some(FileStatus::Stopped));
    assert_eq!(h.events("halted.iso"), ["stopped after restart"]);
    assert!(h
        .events("busy.iso")
        .contains(&"resuming after restart".to_string()));
    assert!(h
        .events("waiting.iso")
        .contains(&"re-queued after restart".to_string()));
    assert_eq!(h.status("short.iso"), Some(FileStatus::Invalid));
    assert_eq!(
        h.events("short.iso"),
        ["corrupted: 900 of 1000 bytes on disk"]
    );
    assert_eq!(h.status("good.iso"), None);
    assert_eq!(h.status("fresh.iso"), None);
    assert_eq!(h.status("skip.iso"), None);
    assert!(wait_until(|| engine.is_active("busy.iso")));
    assert!(engine.is_queued("waiting.iso"));
}

#[test]
fn resume_reports_an_unusable_folder_as_a_job_notice() {
    let h = Harness::new();
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"x").unwrap();
    let engine = DownloadEngine::new(1, blocker.join("job"), 1, h.ctx.clone()).unwrap();
    engine
        .resume_files(vec![with_status("a", FileStatus::Queued, 0)])
        .unwrap()
        .join()
        .unwrap();

    h.daemon.flush_now();
    let seen = h.seen.lock();
    let journal = &seen[&1];
    assert_eq!(journal.notices.len(), 1);
    assert!(journal.notices[0].starts_with("resume failed"));
    assert!(journal.files.is_empty());
}

#[test]
fn health_check_verifies_completed_files_only() {
    let h = Harness::new();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("good.iso"), vec![0u8; 1000]).unwrap();
    let engine = DownloadEngine::new(1, dir.path(), 1, h.ctx.clone()).unwrap();
    engine
        .health_check(vec![
            with_status("good.iso", FileStatus::Completed, 1000),
            with_status("gone.iso", FileStatus::Completed, 1000),
            with_status("halted.iso", FileStatus::Stopping, 0),
        ])
        .unwrap()
        .join()
        .unwrap();

    assert_eq!(h.events("good.iso"), ["health check passed"]);
    assert_eq!(h.status("gone.iso"), Some(FileStatus::Invalid));
    assert_eq!(h.events("gone.iso"), ["corrupted: file is missing from disk"]);
    assert_eq!(h.status("halted.iso"), None);
}
