//! `SharedLogLogic` — any worker may write any key; write races are
//! resolved with compare-and-swap (spec §4.5).

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use kv_stress_cache::{CacheBackend, StoredValue};
use kv_stress_types::{InvokeOutcome, KeyGenerator, Operation, SharedLogValue, SlaveLiveness, ThreadId};

use crate::cancellation::CancellationToken;
use crate::error::LogicFault;
use crate::log_base::{LogLogicBase, LogMode};
use crate::stats::Stats;

enum ValueOutcome {
    Ready(SharedLogValue),
    TooBig,
    Break,
}

fn as_shared(key_id: i64, value: StoredValue) -> Result<SharedLogValue, LogicFault> {
    value.as_shared().cloned().ok_or_else(|| {
        kv_stress_types::StressorError::UnexpectedValueShape {
            key: key_id.to_string(),
            expected_type: "SharedLogValue".to_string(),
        }
        .into()
    })
}

fn compute_next<K, B>(
    base: &mut LogLogicBase<K, B>,
    log_value_max_size: usize,
    thread_id: ThreadId,
    operation_id: u64,
    prev: Option<SharedLogValue>,
    backup: Option<SharedLogValue>,
) -> Result<ValueOutcome, LogicFault>
where
    K: Clone + Eq + Hash + Send + Sync,
    B: CacheBackend<K>,
{
    if prev.is_none() && backup.is_none() {
        return Ok(ValueOutcome::Ready(SharedLogValue::new(thread_id, operation_id)));
    }
    let joined = prev.unwrap_or_default().join(&backup.unwrap_or_default());
    if joined.size() < log_value_max_size {
        return Ok(ValueOutcome::Ready(joined.with(thread_id, operation_id)));
    }
    let min_bound = joined.min_from(thread_id).unwrap_or(operation_id);
    let thread_ids: Vec<ThreadId> = joined.thread_ids().collect();
    let (mins, break_requested) = base.get_checked_operations(thread_ids, min_bound)?;
    if break_requested {
        return Ok(ValueOutcome::Break);
    }
    let filtered = joined.with_trimmed(thread_id, operation_id, &mins);
    if filtered.size() > log_value_max_size {
        Ok(ValueOutcome::TooBig)
    } else {
        Ok(ValueOutcome::Ready(filtered))
    }
}

struct SharedMode {
    num_entries: u64,
    log_value_max_size: usize,
}

impl<K, B> LogMode<K, B> for SharedMode
where
    K: Clone + Eq + Hash + Send + Sync,
    B: CacheBackend<K>,
{
    fn next_key_id(&mut self, rng: &mut kv_stress_types::ReplayableRng) -> i64 {
        rng.next_bounded(self.num_entries) as i64
    }

    fn invoke_logic(
        &mut self,
        base: &mut LogLogicBase<K, B>,
        key_id: i64,
        operation: Operation,
    ) -> Result<InvokeOutcome, LogicFault> {
        if !operation.is_log_mutation() {
            unreachable!("log logics only ever draw Put/Remove");
        }
        let thread_id = base.thread_id();
        loop {
            let prev = base.checked_get(key_id)?.map(|v| as_shared(key_id, v)).transpose()?;
            let backup = base.checked_get(!key_id)?.map(|v| as_shared(!key_id, v)).transpose()?;
            let operation_id = base.operation_id();
            match compute_next(
                base,
                self.log_value_max_size,
                thread_id,
                operation_id,
                prev.clone(),
                backup.clone(),
            )? {
                ValueOutcome::Break => return Ok(InvokeOutcome::Break),
                ValueOutcome::TooBig => {
                    if !base.poll_wait(Duration::from_millis(100)) {
                        return Ok(InvokeOutcome::Done { advance: false });
                    }
                }
                ValueOutcome::Ready(next) => {
                    return if operation == Operation::Put {
                        let old = prev.clone().map(StoredValue::Shared);
                        let won = base.cas_put(key_id, old.as_ref(), StoredValue::Shared(next))?;
                        if won {
                            if let Some(backup_value) = backup {
                                base.delayed_remove(!key_id, StoredValue::Shared(backup_value))?;
                            }
                            Ok(InvokeOutcome::Done { advance: true })
                        } else {
                            Ok(InvokeOutcome::Done { advance: false })
                        }
                    } else {
                        let old = backup.clone().map(StoredValue::Shared);
                        let won = base.cas_put(!key_id, old.as_ref(), StoredValue::Shared(next))?;
                        if won {
                            if let Some(prev_value) = prev {
                                base.delayed_remove(key_id, StoredValue::Shared(prev_value))?;
                            }
                            Ok(InvokeOutcome::Done { advance: true })
                        } else {
                            Ok(InvokeOutcome::Done { advance: false })
                        }
                    };
                }
            }
        }
    }
}

/// Log logic where any worker may write any key id in `[0, num_entries)`,
/// using compare-and-swap to resolve concurrent writers.
pub struct SharedLogLogic<K, B> {
    base: LogLogicBase<K, B>,
    mode: SharedMode,
}

impl<K, B> SharedLogLogic<K, B>
where
    K: Clone + Eq + Hash + Send + Sync,
    B: CacheBackend<K>,
{
    /// Build a shared log logic over the full `[0, num_entries)` key space.
    /// The backend must support atomic compare-and-swap operations.
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
        log_value_max_size: usize,
        num_entries: u64,
        fallback_seed: u64,
    ) -> Result<Self, LogicFault> {
        if !cache.supports_atomic_ops() {
            return Err(kv_stress_cache::CacheError::AtomicCapabilityUnavailable.into());
        }
        let base = LogLogicBase::new(
            thread_id,
            cache,
            bucket,
            key_gen,
            liveness,
            cancel,
            stats,
            transaction_size,
            log_counter_update_period,
            num_slaves,
            ignore_dead_checkers,
            fallback_seed,
        )?;
        Ok(SharedLogLogic {
            base,
            mode: SharedMode {
                num_entries,
                log_value_max_size,
            },
        })
    }

    /// Run one attempt to completion.
    pub fn invoke(&mut self) -> Result<(), LogicFault> {
        self.base.invoke(&mut self.mode)
    }

    /// Best-effort rollback of an open transaction, for worker shutdown.
    pub fn rollback_on_cancel(&mut self) {
        self.base.rollback_on_cancel();
    }
}
