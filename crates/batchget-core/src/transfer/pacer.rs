//! Chunk pacing against a per-thread byte rate cap.

use std::thread;
use std::time::{Duration, Instant};

use super::signal::TransferSignal;

/// Longest single sleep, so cancellation is still noticed promptly.
const MAX_NAP: Duration = Duration::from_millis(100);

/// Sleeps between chunks so the average rate since the cap last changed stays
/// under the cap. A cap of 0 disables pacing.
#[derive(Debug)]
pub struct Pacer {
    window_start: Instant,
    window_bytes: u64,
    cap: u64,
}

impl Default for Pacer {
    fn default() -> Self {
        Self::new()
    }
}

impl Pacer {
    pub fn new() -> Self {
        Self {
            window_start: Instant::now(),
            window_bytes: 0,
            cap: 0,
        }
    }

    /// Account for `chunk` bytes and sleep as needed under the signal's current cap.
    pub fn pace(&mut self, chunk: u64, signal: &TransferSignal) {
        let cap = signal.rate_cap();
        if cap != self.cap {
            self.cap = cap;
            self.window_start = Instant::now();
            self.window_bytes = 0;
        }
        self.window_bytes += chunk;
        if cap == 0 {
            return;
        }
        let due = Duration::from_secs_f64(self.window_bytes as f64 / cap as f64);
        loop {
            let elapsed = self.window_start.elapsed();
            if elapsed >= due || signal.is_cancelled() {
                return;
            }
            thread::sleep((due - elapsed).min(MAX_NAP));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::CancelReason;

    #[test]
    fn unlimited_never_sleeps() {
        let signal = TransferSignal::new();
        let mut pacer = Pacer::new();
        let start = Instant::now();
        for _ in 0..100 {
            pacer.pace(1 << 20, &signal);
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn capped_rate_sleeps_proportionally() {
        let signal = TransferSignal::new();
        signal.set_rate_cap(10_000);
        let mut pacer = Pacer::new();
        let start = Instant::now();
        // 2_000 bytes at 10_000 B/s is 200ms.
        pacer.pace(1_000, &signal);
        pacer.pace(1_000, &signal);
        assert!(start.elapsed() >= Duration::from_millis(180));
    }

    #[test]
    fn cancellation_cuts_the_sleep_short() {
        let signal = TransferSignal::new();
        signal.set_rate_cap(1);
        signal.cancel(CancelReason::User);
        let mut pacer = Pacer::new();
        let start = Instant::now();
        pacer.pace(1_000_000, &signal);
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
