//! `LogLogicBase` — the shared state machine behind [`crate::PrivateLogLogic`]
//! and [`crate::SharedLogLogic`]: the operation-id counter, the replayable
//! RNG, transaction framing with rollback replay, delayed-remove queueing,
//! and checker synchronization (spec §4.3).
//!
//! Both concrete logics are generic over a `LogMode`, a small capability set
//! (`next_key_id`, `invoke_logic`) that plugs the logic-specific algorithm
//! into this shared driver — the "base component parameterized over a
//! capability set" the design notes call for.

use std::collections::BTreeMap;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use kv_stress_cache::{CacheBackend, CacheKey, StoredValue};
use kv_stress_types::{
    KeyGenerator, LastOperation, Operation, OperationId, ReplayableRng, SlaveLiveness,
    StressorError, ThreadId,
};

use crate::cancellation::CancellationToken;
use crate::error::LogicFault;
use crate::stats::Stats;

/// One entry of a pending delayed remove: the absolute key id to remove and
/// the value expected to still be there when it finally runs.
#[derive(Debug, Clone)]
pub struct DelayedRemove {
    /// The absolute key id queued for removal.
    pub key_id: i64,
    /// The value `checkedRemove` must find at that key.
    pub old_value: StoredValue,
}

/// State captured at the start of a transaction, restored verbatim on
/// rollback so the replayed attempts are bit-for-bit identical to the
/// original (spec P4). Captures `operation` alongside the fields spec §4.3
/// names explicitly, because without it a reseeded RNG would redraw a
/// different coin flip than the original attempt.
#[derive(Debug, Clone, Copy)]
struct TxSnapshot {
    operation_id: OperationId,
    key_id: i64,
    operation: Operation,
    rng_seed: u64,
}

/// The outcome of `get_checked_operation` (spec §4.3).
pub struct CheckedOperation {
    /// The minimum certified operation id across all consulted checkers, or
    /// `None` if at least one checker hasn't certified anything yet and
    /// isn't eligible for the dead-checker bypass ("−∞" in the spec).
    pub min_operation_id: Option<OperationId>,
    /// Whether a write to an `ignoredKey` happened inside an open
    /// transaction, meaning the caller must raise `BreakTxRequest`.
    pub break_requested: bool,
}

/// What a log logic's `nextValue` computation settled on.
pub enum NextValueOutcome<V> {
    /// A next value is ready to write.
    Ready(V),
    /// Blocked waiting on checker progress and cancelled before one arrived.
    Blocked,
    /// A dead-checker bypass write needs `BreakTxRequest` treatment.
    Break,
}

/// The capability set a concrete log logic plugs into [`LogLogicBase`].
pub trait LogMode<K, B>
where
    B: CacheBackend<K>,
    K: Clone + Eq + Hash + Send + Sync,
{
    /// Draw the next absolute key id to operate on.
    fn next_key_id(&mut self, rng: &mut ReplayableRng) -> i64;

    /// Attempt one operation against `key_id`/`operation`.
    fn invoke_logic(
        &mut self,
        base: &mut LogLogicBase<K, B>,
        key_id: i64,
        operation: Operation,
    ) -> Result<kv_stress_types::InvokeOutcome, LogicFault>;
}

/// Shared state machine for log-based logics (spec §4.3).
pub struct LogLogicBase<K, B> {
    thread_id: ThreadId,
    operation_id: OperationId,
    rng: ReplayableRng,
    key_id: i64,
    delayed_removes: BTreeMap<i64, DelayedRemove>,
    tx: Option<TxSnapshot>,
    pending_rollback: Option<TxSnapshot>,
    remaining_tx_ops: i64,
    ops_since_checkpoint: u64,
    transaction_size: i64,
    log_counter_update_period: u64,
    num_slaves: u32,
    ignore_dead_checkers: bool,
    cache: Arc<B>,
    bucket: String,
    key_gen: Arc<dyn KeyGenerator<Key = K>>,
    liveness: Arc<dyn SlaveLiveness>,
    cancel: Arc<CancellationToken>,
    stats: Arc<Stats>,
    _marker: PhantomData<K>,
}

impl<K, B> LogLogicBase<K, B>
where
    K: Clone + Eq + Hash + Send + Sync,
    B: CacheBackend<K>,
{
    /// Construct a logic, recovering from a prior `LastOperation` checkpoint
    /// if one is present, or else seeding the RNG from `fallback_seed`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        thread_id: ThreadId,
        cache: Arc<B>,
        bucket: String,
        key_gen: Arc<dyn KeyGenerator<Key = K>>,
        liveness: Arc<dyn SlaveLiveness>,
        cancel: Arc<CancellationToken>,
        stats: Arc<Stats>,
        transaction_size: i64,
        log_counter_update_period: u64,
        num_slaves: u32,
        ignore_dead_checkers: bool,
        fallback_seed: u64,
    ) -> Result<Self, LogicFault> {
        let checkpoint = cache
            .get(&bucket, &CacheKey::LastOperation(thread_id))?
            .and_then(|v| v.as_last_operation());
        let (operation_id, rng) = match checkpoint {
            Some(last) => (last.operation_id + 1, ReplayableRng::from_seed(last.rng_seed)),
            None => (0, ReplayableRng::from_seed(fallback_seed)),
        };
        Ok(LogLogicBase {
            thread_id,
            operation_id,
            rng,
            key_id: 0,
            delayed_removes: BTreeMap::new(),
            tx: None,
            pending_rollback: None,
            remaining_tx_ops: 0,
            ops_since_checkpoint: 0,
            transaction_size,
            log_counter_update_period,
            num_slaves,
            ignore_dead_checkers,
            cache,
            bucket,
            key_gen,
            liveness,
            cancel,
            stats,
            _marker: PhantomData,
        })
    }

    /// Whether this worker runs with transactions enabled.
    pub fn transactional(&self) -> bool {
        self.transaction_size > 0
    }

    /// This worker's id.
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// The operation id the current attempt would consume if it commits.
    pub fn operation_id(&self) -> OperationId {
        self.operation_id
    }

    /// Whether a transaction is currently open on this logic.
    pub fn has_open_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// Map an absolute key id to the cache key its backend entry lives at.
    pub fn entry_key(&self, key_id: i64) -> CacheKey<K> {
        CacheKey::Entry(self.key_gen.generate_key(key_id))
    }

    /// Read the entry at `key_id`.
    pub fn checked_get(&self, key_id: i64) -> Result<Option<StoredValue>, LogicFault> {
        Ok(self.cache.get(&self.bucket, &self.entry_key(key_id))?)
    }

    /// Unconditionally write `value` at `key_id`.
    pub fn checked_put(&self, key_id: i64, value: StoredValue) -> Result<(), LogicFault> {
        Ok(self.cache.put(&self.bucket, &self.entry_key(key_id), value)?)
    }

    /// Compare-and-swap write. `None` as `old` means "absent".
    pub fn cas_put(
        &self,
        key_id: i64,
        old: Option<&StoredValue>,
        new: StoredValue,
    ) -> Result<bool, LogicFault> {
        let key = self.entry_key(key_id);
        match old {
            None => Ok(self.cache.put_if_absent(&self.bucket, &key, new)?.is_none()),
            Some(old) => Ok(self.cache.replace(&self.bucket, &key, old, new)?),
        }
    }

    /// Compare-and-swap remove.
    pub fn cas_remove(&self, key_id: i64, expected: &StoredValue) -> Result<bool, LogicFault> {
        Ok(self.cache.remove_cas(&self.bucket, &self.entry_key(key_id), expected)?)
    }

    /// Remove `key_id`, asserting the prior value equals `expected`. A
    /// mismatch is a fatal consistency violation (spec §4.4).
    pub fn checked_remove(&self, key_id: i64, expected: &StoredValue) -> Result<(), LogicFault> {
        let found = self.cache.remove(&self.bucket, &self.entry_key(key_id))?;
        match found {
            Some(ref v) if v == expected => Ok(()),
            other => Err(LogicFault::Consistency(StressorError::UnexpectedRemovedValue {
                key: key_id.to_string(),
                expected: format!("{expected:?}"),
                found: other.map_or_else(|| "<absent>".to_string(), |v| format!("{v:?}")),
            })),
        }
    }

    /// Queue, or immediately perform, the removal of `old_value` at
    /// `key_id`, superseded by a write elsewhere (spec §4.3, "delayed
    /// removes"). When a transaction moves a value `k -> ~k -> k`, the two
    /// delayed-remove calls cancel each other out entirely rather than
    /// leaving a stale entry that would later fail its expected-value check.
    pub fn delayed_remove(&mut self, key_id: i64, old_value: StoredValue) -> Result<(), LogicFault> {
        if !self.transactional() {
            return self.checked_remove(key_id, &old_value);
        }
        let complementary = !key_id;
        if self.delayed_removes.remove(&complementary).is_some() {
            return Ok(());
        }
        self.delayed_removes
            .insert(key_id, DelayedRemove { key_id, old_value });
        Ok(())
    }

    /// Query checker progress for `thread_id`, applying the dead-checker
    /// bypass when configured (spec §4.3, §7: P7).
    pub fn get_checked_operation(
        &mut self,
        thread_id: ThreadId,
        min_operation_id: OperationId,
    ) -> Result<CheckedOperation, LogicFault> {
        let mut overall: Option<OperationId> = Some(u64::MAX);
        let mut break_requested = false;
        for slave in 0..self.num_slaves {
            let read_operation_id: Option<OperationId> = self
                .cache
                .get(
                    &self.bucket,
                    &CacheKey::CheckerWatermark {
                        slave_index: slave,
                        thread_id,
                    },
                )?
                .and_then(|v| v.as_checker_watermark())
                .map(|w| w.read_operation_id);
            // A watermark below the floor is just as stale as a missing one
            // ("−∞"): both qualify for the dead-checker bypass, per spec
            // §4.3's `readOperationId < minOperationId` condition.
            let stale = read_operation_id.map(|read| read < min_operation_id).unwrap_or(true);
            let observed: Option<OperationId> =
                if stale && self.ignore_dead_checkers && !self.liveness.is_slave_alive(slave) {
                    let ignored_key = CacheKey::IgnoredKey {
                        slave_index: slave,
                        thread_id,
                    };
                    let current = self
                        .cache
                        .get(&self.bucket, &ignored_key)?
                        .and_then(|v| v.as_ignored_key());
                    if current.map(|c| (c as u64) < min_operation_id).unwrap_or(true) {
                        self.cache.put(
                            &self.bucket,
                            &ignored_key,
                            StoredValue::IgnoredKey(min_operation_id as i64),
                        )?;
                        if self.tx.is_some() {
                            break_requested = true;
                        }
                    }
                    Some(min_operation_id)
                } else {
                    read_operation_id
                };
            overall = match (overall, observed) {
                (_, None) => None,
                (None, _) => None,
                (Some(a), Some(b)) => Some(a.min(b)),
            };
        }
        Ok(CheckedOperation {
            min_operation_id: overall,
            break_requested,
        })
    }

    /// Query checker progress for every thread in `thread_ids` against the
    /// same `min_operation_id` floor, returning a per-thread map suitable
    /// for [`kv_stress_types::SharedLogValue::with_trimmed`] (spec §4.3,
    /// "`getCheckedOperations`"), plus whether any bypass write requested a
    /// `BreakTxRequest`.
    pub fn get_checked_operations<I: IntoIterator<Item = ThreadId>>(
        &mut self,
        thread_ids: I,
        min_operation_id: OperationId,
    ) -> Result<(BTreeMap<ThreadId, OperationId>, bool), LogicFault> {
        let mut mins = BTreeMap::new();
        let mut break_requested = false;
        for t in thread_ids {
            let checked = self.get_checked_operation(t, min_operation_id)?;
            if checked.break_requested {
                break_requested = true;
            }
            if let Some(m) = checked.min_operation_id {
                mins.insert(t, m);
            }
        }
        Ok((mins, break_requested))
    }

    /// The outer `invoke()` loop (spec §4.3): draws (or replays) a key id
    /// and operation, then drives `invoke_on` until it signals "advance".
    pub fn invoke<M: LogMode<K, B>>(&mut self, mode: &mut M) -> Result<(), LogicFault> {
        let (key_id, operation) = if let Some(snap) = self.pending_rollback.take() {
            self.operation_id = snap.operation_id;
            self.rng = ReplayableRng::from_seed(snap.rng_seed);
            (snap.key_id, snap.operation)
        } else {
            let key_id = mode.next_key_id(&mut self.rng);
            let operation = if self.rng.next_f64() < 0.5 {
                Operation::Put
            } else {
                Operation::Remove
            };
            (key_id, operation)
        };
        self.key_id = key_id;

        let started = Instant::now();
        loop {
            // Every retry spin (a lost CAS, or a blocking wait on checker
            // progress that returns early) must observe cancellation here;
            // otherwise a worker blocked at `logValueMaxSize` with no
            // checker progress spins forever and `requestTerminate()` can
            // never stop it (spec §5). A best-effort rollback discards any
            // open transaction without scheduling a replay, since the
            // worker is exiting, not retrying.
            if self.cancel.is_cancelled() {
                self.rollback_on_cancel();
                return Err(kv_stress_cache::CacheError::Cancelled.into());
            }
            match self.invoke_on(mode, key_id, operation) {
                Ok(true) => break,
                Ok(false) => {
                    if self.pending_rollback.is_some() {
                        // The transaction this attempt belonged to was rolled
                        // back; hand control back to the caller so the next
                        // `invoke()` call resumes the replay from the
                        // snapshot. `operation_id` is left untouched: the
                        // next call overwrites it from the snapshot
                        // regardless, and this attempt never committed.
                        return Ok(());
                    }
                }
                Err(fault) => {
                    self.stats.register_error();
                    return Err(fault);
                }
            }
        }
        self.stats
            .register_request(started.elapsed().as_nanos() as u64, operation);
        self.operation_id += 1;
        Ok(())
    }

    fn invoke_on<M: LogMode<K, B>>(
        &mut self,
        mode: &mut M,
        key_id: i64,
        operation: Operation,
    ) -> Result<bool, LogicFault> {
        if self.transactional() && self.tx.is_none() {
            self.cache.start_transaction()?;
            self.tx = Some(TxSnapshot {
                operation_id: self.operation_id,
                key_id,
                operation,
                rng_seed: self.rng.seed(),
            });
            self.remaining_tx_ops = self.transaction_size;
        }

        let outcome = match mode.invoke_logic(self, key_id, operation) {
            Ok(outcome) => outcome,
            Err(fault) => {
                if fault.is_cancelled() || fault.is_consistency_violation() {
                    return Err(fault);
                }
                if fault.is_member_suspected() {
                    tracing::debug!(error = %fault, "member suspected, retrying");
                } else {
                    tracing::warn!(error = %fault, "transient backend fault");
                }
                if self.transactional() && self.tx.is_some() {
                    self.rollback();
                    return Ok(false);
                }
                return Ok(false);
            }
        };

        match outcome {
            kv_stress_types::InvokeOutcome::Break => {
                if self.transactional() && self.tx.is_some() {
                    if !self.commit_transaction()? {
                        return Ok(false);
                    }
                }
                Ok(false)
            }
            kv_stress_types::InvokeOutcome::Done { advance } => {
                if !advance {
                    return Ok(false);
                }
                if self.transactional() {
                    self.remaining_tx_ops -= 1;
                    if self.remaining_tx_ops <= 0 {
                        if !self.commit_transaction()? {
                            return Ok(false);
                        }
                        self.write_checkpoint()?;
                    }
                } else {
                    self.ops_since_checkpoint += 1;
                    if self.ops_since_checkpoint >= self.log_counter_update_period {
                        self.write_checkpoint()?;
                        self.ops_since_checkpoint = 0;
                    }
                }
                Ok(true)
            }
        }
    }

    /// Commit the open transaction and flush delayed removes. Returns
    /// `false` (and schedules a replay) if the commit itself failed.
    fn commit_transaction(&mut self) -> Result<bool, LogicFault> {
        match self.cache.end_transaction(true) {
            Ok(()) => {
                self.tx = None;
                self.flush_delayed_removes()?;
                Ok(true)
            }
            Err(e) => {
                if e.is_cancelled() {
                    return Err(e.into());
                }
                tracing::warn!(error = %e, "commit failed, rolling back for replay");
                self.rollback();
                Ok(false)
            }
        }
    }

    fn rollback(&mut self) {
        let _ = self.cache.end_transaction(false);
        self.delayed_removes.clear();
        self.pending_rollback = self.tx.take();
        self.remaining_tx_ops = 0;
    }

    /// Best-effort rollback of an open transaction on worker cancellation
    /// (spec §5): never executes pending delayed removes.
    pub fn rollback_on_cancel(&mut self) {
        if self.tx.is_some() {
            let _ = self.cache.end_transaction(false);
            self.delayed_removes.clear();
            self.tx = None;
        }
    }

    fn flush_delayed_removes(&mut self) -> Result<(), LogicFault> {
        if self.delayed_removes.is_empty() {
            return Ok(());
        }
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            self.cache.start_transaction()?;
            let mut all_ok = true;
            for dr in self.delayed_removes.values() {
                let key = self.entry_key(dr.key_id);
                match self.cache.remove(&self.bucket, &key) {
                    Ok(found) if found.as_ref() == Some(&dr.old_value) => {}
                    Ok(found) => {
                        all_ok = false;
                        tracing::error!(key_id = dr.key_id, ?found, "delayed remove value mismatch");
                    }
                    Err(e) => {
                        if e.is_cancelled() {
                            return Err(e.into());
                        }
                        all_ok = false;
                    }
                }
            }
            if all_ok {
                self.cache.end_transaction(true)?;
                self.delayed_removes.clear();
                return Ok(());
            }
            let _ = self.cache.end_transaction(false);
            if !self.cancel.sleep(Duration::from_millis(50)) {
                return Ok(());
            }
        }
    }

    fn write_checkpoint(&mut self) -> Result<(), LogicFault> {
        let key = CacheKey::LastOperation(self.thread_id);
        let value = StoredValue::LastOperation(LastOperation {
            operation_id: self.operation_id,
            rng_seed: self.rng.seed(),
        });
        if self.transactional() {
            self.cache.start_transaction()?;
            match self.cache.put(&self.bucket, &key, value) {
                Ok(()) => self.cache.end_transaction(true)?,
                Err(e) => {
                    let _ = self.cache.end_transaction(false);
                    return Err(e.into());
                }
            }
        } else {
            self.cache.put(&self.bucket, &key, value)?;
        }
        Ok(())
    }

    /// Blocking poll, honoring cancellation: sleeps up to `dur`, returning
    /// `false` if cancelled before it elapsed.
    pub fn poll_wait(&self, dur: Duration) -> bool {
        self.cancel.sleep(dur)
    }

    /// Whether the worker has been asked to stop.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

trait CacheErrorExt {
    fn is_member_suspected(&self) -> bool;
}

impl CacheErrorExt for LogicFault {
    fn is_member_suspected(&self) -> bool {
        matches!(self, LogicFault::Cache(e) if e.is_member_suspected())
    }
}
