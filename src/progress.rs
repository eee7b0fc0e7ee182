//! Live per-worker progress, readable while a load is running.
//!
//! Each worker owns one slot and is the only writer to it; observers read all
//! slots without locking.

use crate::partition::WorkerId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Inserted-record counters, one per worker of the current load.
#[derive(Debug)]
pub struct ProgressBoard {
    started: Instant,
    slots: Vec<AtomicU64>,
}

impl ProgressBoard {
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self {
            started: Instant::now(),
            slots: (0..workers).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Add `n` committed records to `worker`'s slot. Unknown workers are ignored.
    pub fn record(&self, worker: WorkerId, n: u64) {
        if let Some(slot) = self.slots.get(worker.0) {
            slot.fetch_add(n, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn inserted(&self, worker: WorkerId) -> u64 {
        self.slots
            .get(worker.0)
            .map_or(0, |slot| slot.load(Ordering::Relaxed))
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        let per_worker: Vec<u64> = self
            .slots
            .iter()
            .map(|slot| slot.load(Ordering::Relaxed))
            .collect();
        ProgressSnapshot {
            total: per_worker.iter().sum(),
            per_worker,
            elapsed: self.started.elapsed(),
        }
    }
}

/// Counters at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub per_worker: Vec<u64>,
    pub total: u64,
    /// Time since the board was created.
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    /// Records per second since the load started.
    #[must_use]
    pub fn average_rate(&self) -> Option<f64> {
        rate(self.total, self.elapsed)
    }

    /// Records per second between `earlier` and `self`.
    #[must_use]
    pub fn rate_since(&self, earlier: &Self) -> Option<f64> {
        rate(
            self.total.saturating_sub(earlier.total),
            self.elapsed.saturating_sub(earlier.elapsed),
        )
    }
}

#[allow(clippy::cast_precision_loss)]
fn rate(records: u64, over: Duration) -> Option<f64> {
    (!over.is_zero()).then(|| records as f64 / over.as_secs_f64())
}
