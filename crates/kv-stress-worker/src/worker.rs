//! `StressorWorker` — the per-thread load phase + operation loop that drives
//! one of [`crate::LegacyLogic`], [`crate::PrivateLogLogic`], or
//! [`crate::SharedLogLogic`] (spec §5).

use std::hash::Hash;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use kv_stress_cache::{CacheBackend, CacheKey, StoredValue};
use kv_stress_types::{IdentityKeyGenerator, KeyGenerator, Operation, SlaveLiveness, StressorConfig, ThreadId};
use rand::RngCore;

use crate::cancellation::CancellationToken;
use crate::error::LogicFault;
use crate::legacy::LegacyLogic;
use crate::private_logic::PrivateLogLogic;
use crate::shared_logic::SharedLogLogic;
use crate::stats::{Stats, StatsSnapshot};

/// Coarse worker lifecycle state, observable through [`WorkerHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// Running the load phase, not yet serving the configured workload.
    Loading,
    /// Load phase complete; issuing the configured workload.
    Running,
    /// `run()` returned, whether by cancellation or a fatal fault.
    Stopped,
}

struct Shared {
    cancel: Arc<CancellationToken>,
    stats: Arc<Stats>,
    loaded: AtomicBool,
    status: Mutex<WorkerStatus>,
}

/// A cloneable, thread-safe reference to a running [`StressorWorker`], used
/// by the driving process to request shutdown and poll progress.
#[derive(Clone)]
pub struct WorkerHandle {
    shared: Arc<Shared>,
}

impl WorkerHandle {
    /// Ask the worker to stop at its next cancellation check point.
    pub fn request_terminate(&self) {
        self.shared.cancel.request_terminate();
    }

    /// Whether the load phase has completed.
    pub fn is_loaded(&self) -> bool {
        self.shared.loaded.load(Ordering::SeqCst)
    }

    /// The worker's current lifecycle state.
    pub fn status(&self) -> WorkerStatus {
        *self.shared.status.lock().unwrap()
    }

    /// `snapshotStats(reset, nowNanos)`: a point-in-time view of this
    /// worker's accumulated request/error counters.
    pub fn snapshot_stats(&self, reset: bool) -> StatsSnapshot {
        self.shared.stats.snapshot(reset)
    }
}

/// Dispatches `invoke()`/`rollback_on_cancel()` across whichever logic this
/// worker was configured to run. A tagged union rather than a trait object,
/// since the three logics share no common supertrait worth naming.
enum WorkerLogic<K, B> {
    Legacy(LegacyLogic<K, B>),
    Private(PrivateLogLogic<K, B>),
    Shared(SharedLogLogic<K, B>),
}

impl<K, B> WorkerLogic<K, B>
where
    K: Clone + Eq + Hash + Send + Sync,
    B: CacheBackend<K>,
{
    fn invoke(&mut self) -> Result<(), LogicFault> {
        match self {
            WorkerLogic::Legacy(l) => l.invoke(),
            WorkerLogic::Private(l) => l.invoke(),
            WorkerLogic::Shared(l) => l.invoke(),
        }
    }

    fn rollback_on_cancel(&mut self) {
        match self {
            WorkerLogic::Legacy(l) => l.rollback_on_cancel(),
            WorkerLogic::Private(l) => l.rollback_on_cancel(),
            WorkerLogic::Shared(l) => l.rollback_on_cancel(),
        }
    }
}

/// This thread's shard of `[0, numEntries)`, used by the legacy driver and
/// `PrivateLogLogic`. The last shard absorbs any remainder so every key in
/// `[0, numEntries)` is owned by exactly one thread across the whole
/// deployment (spec §6's global `threadId` space).
fn key_range(config: &StressorConfig, thread_id: ThreadId) -> Range<i64> {
    let total_threads = (config.num_slaves as u64) * (config.num_threads as u64);
    let total_threads = total_threads.max(1);
    let per_thread = config.num_entries / total_threads;
    let start = (thread_id * per_thread) as i64;
    let end = if thread_id + 1 == total_threads {
        config.num_entries as i64
    } else {
        ((thread_id + 1) * per_thread) as i64
    };
    start..end
}

/// Runs one stressor thread to completion: the load phase, then the
/// configured workload, until cancelled or a fatal fault occurs.
pub struct StressorWorker<K, B> {
    thread_id: ThreadId,
    cache: Arc<B>,
    key_gen: Arc<dyn KeyGenerator<Key = K>>,
    liveness: Arc<dyn SlaveLiveness>,
    config: StressorConfig,
    range: Range<i64>,
    inherited_ranges: Vec<Range<i64>>,
    shared: Arc<Shared>,
}

impl<K, B> StressorWorker<K, B>
where
    K: Clone + Eq + Hash + Send + Sync,
    B: CacheBackend<K>,
{
    /// Build a worker for `thread_id`. `key_gen` defaults to
    /// [`IdentityKeyGenerator`] when `K = i64`; callers with an opaque key
    /// type must supply their own.
    pub fn new(
        thread_id: ThreadId,
        cache: Arc<B>,
        key_gen: Arc<dyn KeyGenerator<Key = K>>,
        liveness: Arc<dyn SlaveLiveness>,
        config: StressorConfig,
    ) -> Self {
        let range = key_range(&config, thread_id);
        StressorWorker {
            thread_id,
            cache,
            key_gen,
            liveness,
            config,
            range,
            inherited_ranges: Vec::new(),
            shared: Arc::new(Shared {
                cancel: Arc::new(CancellationToken::new()),
                stats: Arc::new(Stats::new()),
                loaded: AtomicBool::new(false),
                status: Mutex::new(WorkerStatus::Loading),
            }),
        }
    }

    /// Adopt additional key ranges left behind by workers that died before
    /// completing their own load phase (spec §3: "optional ranges inherited
    /// from dead workers"). The load phase fills these the same way it fills
    /// the worker's own primary range; the op phase never draws keys from
    /// them directly, since ownership of those keys hasn't otherwise changed.
    pub fn with_inherited_ranges(mut self, ranges: Vec<Range<i64>>) -> Self {
        self.inherited_ranges = ranges;
        self
    }

    /// A handle other threads can use to monitor and cancel this worker.
    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            shared: self.shared.clone(),
        }
    }

    fn set_status(&self, status: WorkerStatus) {
        *self.shared.status.lock().unwrap() = status;
    }

    /// Run this worker to completion on the calling thread. Intended to be
    /// called from a dedicated OS thread per spec §5's concurrency model.
    pub fn run(&mut self) {
        if let Err(e) = self.load_phase() {
            tracing::error!(thread_id = self.thread_id, error = %e, "load phase failed");
            self.set_status(WorkerStatus::Stopped);
            return;
        }
        self.shared.loaded.store(true, Ordering::SeqCst);
        if self.config.load_only {
            self.set_status(WorkerStatus::Stopped);
            return;
        }

        let mut logic = match self.build_logic() {
            Ok(logic) => logic,
            Err(e) => {
                tracing::error!(thread_id = self.thread_id, error = %e, "failed to start logic");
                self.set_status(WorkerStatus::Stopped);
                return;
            }
        };

        self.set_status(WorkerStatus::Running);
        while !self.shared.cancel.is_cancelled() {
            match logic.invoke() {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => break,
                Err(e) => {
                    tracing::error!(thread_id = self.thread_id, error = %e, "fatal consistency violation");
                    break;
                }
            }
            if !self.config.delay_between_requests.is_zero()
                && !self.shared.cancel.sleep(self.config.delay_between_requests)
            {
                break;
            }
        }
        logic.rollback_on_cancel();
        self.set_status(WorkerStatus::Stopped);
    }

    fn build_logic(&self) -> Result<WorkerLogic<K, B>, LogicFault> {
        if !self.config.use_log_values {
            return Ok(WorkerLogic::Legacy(LegacyLogic::new(
                self.cache.clone(),
                self.config.bucket_id.clone(),
                self.key_gen.clone(),
                self.shared.stats.clone(),
                self.range.clone(),
                self.config.operation_mix,
                self.config.entry_size,
                self.config.transaction_size,
                self.thread_id,
            )));
        }
        if self.config.shared_keys {
            Ok(WorkerLogic::Shared(SharedLogLogic::new(
                self.thread_id,
                self.cache.clone(),
                self.config.bucket_id.clone(),
                self.key_gen.clone(),
                self.liveness.clone(),
                self.shared.cancel.clone(),
                self.shared.stats.clone(),
                self.config.transaction_size,
                self.config.log_counter_update_period,
                self.config.num_slaves,
                self.config.ignore_dead_checkers,
                self.config.log_value_max_size,
                self.config.num_entries,
                self.thread_id,
            )?))
        } else {
            Ok(WorkerLogic::Private(PrivateLogLogic::new(
                self.thread_id,
                self.cache.clone(),
                self.config.bucket_id.clone(),
                self.key_gen.clone(),
                self.liveness.clone(),
                self.shared.cancel.clone(),
                self.shared.stats.clone(),
                self.config.transaction_size,
                self.config.log_counter_update_period,
                self.config.num_slaves,
                self.config.ignore_dead_checkers,
                self.config.log_value_max_size,
                self.range.clone(),
            )?))
        }
    }

    /// Fill this thread's key shard with random payloads before the
    /// workload starts. Fails fast if `loadWithPutIfAbsent` is configured
    /// against a backend that can't support it (spec §5).
    fn load_phase(&mut self) -> Result<(), LogicFault> {
        if self.config.load_with_put_if_absent && !self.cache.supports_atomic_ops() {
            return Err(kv_stress_cache::CacheError::AtomicCapabilityUnavailable.into());
        }
        let mut rng = kv_stress_types::ReplayableRng::from_seed(self.thread_id.wrapping_add(1));
        let ranges = std::iter::once(self.range.clone()).chain(self.inherited_ranges.iter().cloned());
        for key_id in ranges.flatten() {
            if self.shared.cancel.is_cancelled() {
                return Ok(());
            }
            let key = CacheKey::Entry(self.key_gen.generate_key(key_id));
            let mut payload = vec![0u8; self.config.entry_size];
            rng.fill_bytes(&mut payload);
            let started = Instant::now();
            if self.config.load_with_put_if_absent {
                self.cache
                    .put_if_absent(&self.config.bucket_id, &key, StoredValue::Payload(payload))?;
            } else {
                self.cache.put(&self.config.bucket_id, &key, StoredValue::Payload(payload))?;
            }
            self.shared
                .stats
                .register_request(started.elapsed().as_nanos() as u64, Operation::Put);
        }
        Ok(())
    }
}

/// Convenience constructor for the common case of an `i64`-keyed backend.
pub fn identity_worker<B>(
    thread_id: ThreadId,
    cache: Arc<B>,
    liveness: Arc<dyn SlaveLiveness>,
    config: StressorConfig,
) -> StressorWorker<i64, B>
where
    B: CacheBackend<i64>,
{
    StressorWorker::new(thread_id, cache, Arc::new(IdentityKeyGenerator), liveness, config)
}
