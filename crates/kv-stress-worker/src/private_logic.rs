//! `PrivateLogLogic` — each key is written by exactly one worker, using
//! read-modify-write with expected-value removes (spec §4.4).

use std::hash::Hash;
use std::ops::Range;
use std::sync::Arc;

use kv_stress_cache::{CacheBackend, StoredValue};
use kv_stress_types::{InvokeOutcome, KeyGenerator, Operation, PrivateLogValue, SlaveLiveness};

use crate::cancellation::CancellationToken;
use crate::error::LogicFault;
use crate::log_base::{LogLogicBase, LogMode, NextValueOutcome};
use crate::stats::Stats;

struct PrivateMode {
    range: Range<i64>,
    log_value_max_size: usize,
}

impl<K, B> LogMode<K, B> for PrivateMode
where
    K: Clone + Eq + Hash + Send + Sync,
    B: CacheBackend<K>,
{
    fn next_key_id(&mut self, rng: &mut kv_stress_types::ReplayableRng) -> i64 {
        let span = (self.range.end - self.range.start) as u64;
        self.range.start + rng.next_bounded(span) as i64
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

        let prev = base.checked_get(key_id)?.map(|v| as_private(key_id, v)).transpose()?;

        if prev.is_none() || operation == Operation::Put {
            let backup = if prev.is_none() {
                base.checked_get(!key_id)?
                    .map(|v| as_private(!key_id, v))
                    .transpose()?
            } else {
                None
            };
            let basis = prev.clone().or_else(|| backup.clone());
            let outcome = match basis {
                Some(b) => next_value(base, self.log_value_max_size, &b)?,
                None => NextValueOutcome::Ready(PrivateLogValue::new(base.thread_id(), base.operation_id())),
            };
            match outcome {
                NextValueOutcome::Blocked => return Ok(InvokeOutcome::Done { advance: false }),
                NextValueOutcome::Break => return Ok(InvokeOutcome::Break),
                NextValueOutcome::Ready(next) => {
                    base.checked_put(key_id, StoredValue::Private(next))?;
                    if let Some(backup_value) = backup {
                        base.delayed_remove(!key_id, StoredValue::Private(backup_value))?;
                    }
                }
            }
        } else {
            let prev = prev.expect("prev is Some on the Remove branch");
            match next_value(base, self.log_value_max_size, &prev)? {
                NextValueOutcome::Blocked => return Ok(InvokeOutcome::Done { advance: false }),
                NextValueOutcome::Break => return Ok(InvokeOutcome::Break),
                NextValueOutcome::Ready(next) => {
                    base.checked_put(!key_id, StoredValue::Private(next))?;
                    base.delayed_remove(key_id, StoredValue::Private(prev))?;
                }
            }
        }

        Ok(InvokeOutcome::Done { advance: true })
    }
}

fn as_private(key_id: i64, value: StoredValue) -> Result<PrivateLogValue, LogicFault> {
    value.as_private().cloned().ok_or_else(|| {
        kv_stress_types::StressorError::UnexpectedValueShape {
            key: key_id.to_string(),
            expected_type: "PrivateLogValue".to_string(),
        }
        .into()
    })
}

fn next_value<K, B>(
    base: &mut LogLogicBase<K, B>,
    log_value_max_size: usize,
    prev: &PrivateLogValue,
) -> Result<NextValueOutcome<PrivateLogValue>, LogicFault>
where
    K: Clone + Eq + Hash + Send + Sync,
    B: CacheBackend<K>,
{
    if prev.size() < log_value_max_size {
        return Ok(NextValueOutcome::Ready(prev.with(base.operation_id())));
    }
    let thread_id = base.thread_id();
    loop {
        let checked = base.get_checked_operation(thread_id, prev.operation_id(0))?;
        if checked.break_requested {
            return Ok(NextValueOutcome::Break);
        }
        if let Some(min_checked) = checked.min_operation_id {
            if prev.operation_id(0) <= min_checked {
                let mut prefix = 0usize;
                while prefix < prev.size() && prev.operation_id(prefix) <= min_checked {
                    prefix += 1;
                }
                return Ok(NextValueOutcome::Ready(prev.shift(prefix, base.operation_id())));
            }
        }
        if !base.poll_wait(std::time::Duration::from_millis(100)) {
            return Ok(NextValueOutcome::Blocked);
        }
    }
}

/// Log logic where each absolute key id is written by exactly one worker.
pub struct PrivateLogLogic<K, B> {
    base: LogLogicBase<K, B>,
    mode: PrivateMode,
}

impl<K, B> PrivateLogLogic<K, B>
where
    K: Clone + Eq + Hash + Send + Sync,
    B: CacheBackend<K>,
{
    /// Build a private log logic bound to `range`, recovering from a prior
    /// checkpoint if present.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        thread_id: u64,
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
        range: Range<i64>,
    ) -> Result<Self, LogicFault> {
        let fallback_seed = range.start as u64;
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
        Ok(PrivateLogLogic {
            base,
            mode: PrivateMode {
                range,
                log_value_max_size,
            },
        })
    }

    /// Run one attempt to completion (spec §4.3's `invoke()`).
    pub fn invoke(&mut self) -> Result<(), LogicFault> {
        self.base.invoke(&mut self.mode)
    }

    /// Best-effort rollback of an open transaction, for worker shutdown.
    pub fn rollback_on_cancel(&mut self) {
        self.base.rollback_on_cancel();
    }
}
