//! Per-worker request/latency accounting, read by an external status loop
//! (`snapshotStats`) while the worker thread keeps running.

use std::collections::HashMap;
use std::sync::Mutex;

use kv_stress_types::Operation;

#[derive(Default)]
struct Inner {
    per_op: HashMap<Operation, (u64, u64)>,
    errors: u64,
}

/// Thread-safe counters for one worker. Written only by the owning worker;
/// read by whatever reports aggregate progress.
#[derive(Default)]
pub struct Stats {
    inner: Mutex<Inner>,
}

/// A point-in-time view of [`Stats`].
#[derive(Debug, Clone, Default)]
pub struct StatsSnapshot {
    /// `(count, total_latency_nanos)` per operation kind.
    pub per_op: HashMap<Operation, (u64, u64)>,
    /// Number of faults observed since the last reset.
    pub errors: u64,
}

impl Stats {
    /// A fresh, empty counter set.
    pub fn new() -> Self {
        Stats::default()
    }

    /// Record a successful request of kind `op` that took `latency_nanos`.
    pub fn register_request(&self, latency_nanos: u64, op: Operation) {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.per_op.entry(op).or_insert((0, 0));
        entry.0 += 1;
        entry.1 += latency_nanos;
    }

    /// Record a fault.
    pub fn register_error(&self) {
        self.inner.lock().unwrap().errors += 1;
    }

    /// Take a snapshot, optionally resetting the counters back to zero.
    pub fn snapshot(&self, reset: bool) -> StatsSnapshot {
        let mut inner = self.inner.lock().unwrap();
        let snapshot = StatsSnapshot {
            per_op: inner.per_op.clone(),
            errors: inner.errors,
        };
        if reset {
            inner.per_op.clear();
            inner.errors = 0;
        }
        snapshot
    }
}
