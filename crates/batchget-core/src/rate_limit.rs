//! Global bandwidth cap shared across all jobs.
//!
//! Every active transfer registers its signal here. Whenever the set of
//! active transfers (or the cap) changes, the per-thread share is recomputed
//! and pushed into each live signal, where the transfer's pacer reads it
//! between chunks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::transfer::TransferSignal;

/// Per-thread byte rate: `global / active`, at least 1 while limited.
/// A global cap of 0 means unlimited, as does having no active transfers.
pub fn per_thread_cap(global: u64, active: usize) -> u64 {
    if global == 0 || active == 0 {
        return 0;
    }
    (global / active as u64).max(1)
}

#[derive(Debug, Default)]
pub struct RateLimiter {
    global_cap: AtomicU64,
    signals: Mutex<Vec<Weak<TransferSignal>>>,
}

impl RateLimiter {
    /// Create a limiter with the given global cap in bytes/s (0 = unlimited).
    pub fn new(global_cap: u64) -> Self {
        Self {
            global_cap: AtomicU64::new(global_cap),
            signals: Mutex::new(Vec::new()),
        }
    }

    pub fn global_cap(&self) -> u64 {
        self.global_cap.load(Ordering::Relaxed)
    }

    pub fn set_global_cap(&self, cap: u64) {
        self.global_cap.store(cap, Ordering::Relaxed);
        self.rebalance();
    }

    /// Register an active transfer and rebalance.
    pub fn attach(&self, signal: &Arc<TransferSignal>) {
        let mut signals = self.signals.lock();
        signals.push(Arc::downgrade(signal));
        self.rebalance_locked(&mut signals);
    }

    /// Unregister a finished transfer and rebalance.
    pub fn detach(&self, signal: &Arc<TransferSignal>) {
        let mut signals = self.signals.lock();
        let ptr = Arc::as_ptr(signal);
        signals.retain(|w| w.as_ptr() != ptr);
        self.rebalance_locked(&mut signals);
    }

    /// Number of live registered transfers.
    pub fn active(&self) -> usize {
        self.signals
            .lock()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// Recompute and push the per-thread cap to every live signal.
    pub fn rebalance(&self) {
        let mut signals = self.signals.lock();
        self.rebalance_locked(&mut signals);
    }

    fn rebalance_locked(&self, signals: &mut Vec<Weak<TransferSignal>>) {
        signals.retain(|w| w.strong_count() > 0);
        let cap = per_thread_cap(self.global_cap(), signals.len());
        for signal in signals.iter().filter_map(Weak::upgrade) {
            signal.set_rate_cap(cap);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cap_split_evenly() {
        assert_eq!(per_thread_cap(1000, 4), 250);
        assert_eq!(per_thread_cap(0, 4), 0);
        assert_eq!(per_thread_cap(1000, 0), 0);
        assert_eq!(per_thread_cap(3, 8), 1);
    }

    #[test]
    fn attach_and_detach_rebalance_live_signals() {
        let limiter = RateLimiter::new(1000);
        let signals: Vec<_> = (0..4).map(|_| Arc::new(TransferSignal::new())).collect();
        for s in &signals {
            limiter.attach(s);
        }
        assert!(signals.iter().all(|s| s.rate_cap() == 250));

        limiter.detach(&signals[0]);
        assert_eq!(limiter.active(), 3);
        assert_eq!(signals[1].rate_cap(), 333);
    }

    #[test]
    fn dropped_signals_are_pruned() {
        let limiter = RateLimiter::new(1000);
        let keep = Arc::new(TransferSignal::new());
        limiter.attach(&keep);
        {
            let gone = Arc::new(TransferSignal::new());
            limiter.attach(&gone);
            assert_eq!(keep.rate_cap(), 500);
        }
        limiter.rebalance();
        assert_eq!(limiter.active(), 1);
        assert_eq!(keep.rate_cap(), 1000);
    }

    #[test]
    fn zero_cap_means_unlimited() {
        let limiter = RateLimiter::new(1000);
        let s = Arc::new(TransferSignal::new());
        limiter.attach(&s);
        limiter.set_global_cap(0);
        assert_eq!(s.rate_cap(), 0);
    }
}
