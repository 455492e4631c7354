//! Per-transfer control token: cancellation reason, rate cap, stop listener.
//!
//! One signal is created for each active transfer. The transfer primitive
//! polls it once per chunk; the rate limiter pushes the per-thread cap into it.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc;

use parking_lot::Mutex;

use crate::model::FileStatus;

/// Why a transfer was cancelled. Decides what the worker journals afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Stopped by the user: the file ends up Stopped.
    User,
    /// Freed to shrink a fully busy pool: the file goes back into the queue.
    Preempt,
    /// Engine shutdown: nothing is journaled so the next launch resumes it.
    Shutdown,
}

impl CancelReason {
    fn code(self) -> u8 {
        match self {
            CancelReason::User => 1,
            CancelReason::Preempt => 2,
            CancelReason::Shutdown => 3,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(CancelReason::User),
            2 => Some(CancelReason::Preempt),
            3 => Some(CancelReason::Shutdown),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct TransferSignal {
    cancel: AtomicU8,
    rate_cap: AtomicU64,
    listener: Mutex<Option<mpsc::Sender<FileStatus>>>,
}

impl TransferSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. The first reason wins.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        self.cancel
            .compare_exchange(0, reason.code(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn cancel_reason(&self) -> Option<CancelReason> {
        CancelReason::from_code(self.cancel.load(Ordering::Acquire))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire) != 0
    }

    /// Bytes per second allowed for this transfer; 0 means unlimited.
    pub fn rate_cap(&self) -> u64 {
        self.rate_cap.load(Ordering::Relaxed)
    }

    pub fn set_rate_cap(&self, cap: u64) {
        self.rate_cap.store(cap, Ordering::Relaxed);
    }

    /// Register a one-shot listener for the transfer's terminal status.
    pub fn listen(&self) -> mpsc::Receiver<FileStatus> {
        let (tx, rx) = mpsc::channel();
        *self.listener.lock() = Some(tx);
        rx
    }

    /// Deliver the terminal status to the listener, if any.
    pub fn notify(&self, status: FileStatus) {
        if let Some(tx) = self.listener.lock().take() {
            let _ = tx.send(status);
        }
    }
}
