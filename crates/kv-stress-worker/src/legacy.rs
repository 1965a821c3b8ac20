//! `LegacyLogic` — a simple rotating-cursor GET/PUT/REMOVE driver with
//! optional fixed-size transactions and no log semantics (spec §4.2). The
//! baseline the log logics elaborate on.

use std::hash::Hash;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use kv_stress_cache::{CacheBackend, CacheKey, StoredValue};
use kv_stress_types::{KeyGenerator, Operation, OperationMix, ReplayableRng};
use rand::RngCore;

use crate::error::LogicFault;
use crate::stats::Stats;

/// A rotating cursor over `[start, end)` issuing GET/PUT/REMOVE per a
/// configured probability mix.
pub struct LegacyLogic<K, B> {
    cache: Arc<B>,
    bucket: String,
    key_gen: Arc<dyn KeyGenerator<Key = K>>,
    stats: Arc<Stats>,
    range: Range<i64>,
    cursor: i64,
    mix: OperationMix,
    rng: ReplayableRng,
    entry_size: usize,
    transaction_size: i64,
    remaining_tx_ops: i64,
    tx_open: bool,
}

impl<K, B> LegacyLogic<K, B>
where
    K: Clone + Eq + Hash + Send + Sync,
    B: CacheBackend<K>,
{
    /// Build a legacy logic cursoring over `range`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache: Arc<B>,
        bucket: String,
        key_gen: Arc<dyn KeyGenerator<Key = K>>,
        stats: Arc<Stats>,
        range: Range<i64>,
        mix: OperationMix,
        entry_size: usize,
        transaction_size: i64,
        seed: u64,
    ) -> Self {
        let cursor = range.start;
        LegacyLogic {
            cache,
            bucket,
            key_gen,
            stats,
            range,
            cursor,
            mix,
            rng: ReplayableRng::from_seed(seed),
            entry_size,
            transaction_size,
            remaining_tx_ops: 0,
            tx_open: false,
        }
    }

    fn transactional(&self) -> bool {
        self.transaction_size > 0
    }

    fn advance_cursor(&mut self) -> i64 {
        let key_id = self.cursor;
        self.cursor += 1;
        if self.cursor >= self.range.end {
            self.cursor = self.range.start;
        }
        key_id
    }

    /// Run one operation to completion.
    pub fn invoke(&mut self) -> Result<(), LogicFault> {
        let operation = self.mix.pick(self.rng.next_f64());
        let key_id = self.advance_cursor();

        if self.transactional() && !self.tx_open {
            self.cache.start_transaction()?;
            self.tx_open = true;
            self.remaining_tx_ops = self.transaction_size;
        }

        let key = CacheKey::Entry(self.key_gen.generate_key(key_id));
        let started = Instant::now();
        let outcome = match operation {
            Operation::Get | Operation::GetNull => self
                .cache
                .get(&self.bucket, &key)
                .map(|found| Operation::normalize_get(found.is_some())),
            Operation::Put => {
                let mut payload = vec![0u8; self.entry_size];
                self.rng.fill_bytes(&mut payload);
                self.cache
                    .put(&self.bucket, &key, StoredValue::Payload(payload))
                    .map(|()| Operation::Put)
            }
            Operation::Remove => self.cache.remove(&self.bucket, &key).map(|_| Operation::Remove),
        };

        match outcome {
            Ok(observed) => {
                self.stats
                    .register_request(started.elapsed().as_nanos() as u64, observed);
            }
            Err(e) => {
                self.stats.register_error();
                if self.transactional() && self.tx_open {
                    let _ = self.cache.end_transaction(false);
                    self.tx_open = false;
                    self.remaining_tx_ops = 0;
                }
                if e.is_cancelled() {
                    return Err(e.into());
                }
                tracing::warn!(error = %e, "legacy op failed");
                return Ok(());
            }
        }

        if self.transactional() {
            self.remaining_tx_ops -= 1;
            if self.remaining_tx_ops <= 0 {
                self.cache.end_transaction(true)?;
                self.tx_open = false;
            }
        }
        Ok(())
    }

    /// Best-effort rollback of an open transaction, for worker shutdown.
    pub fn rollback_on_cancel(&mut self) {
        if self.tx_open {
            let _ = self.cache.end_transaction(false);
            self.tx_open = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kv_stress_cache_memory::MemoryBackend;
    use kv_stress_types::IdentityKeyGenerator;
    use std::sync::Arc;

    #[test]
    fn wraps_cursor_and_writes_every_key() {
        let cache: Arc<MemoryBackend<i64>> = Arc::new(MemoryBackend::new());
        let mut logic = LegacyLogic::new(
            cache.clone(),
            "b".to_string(),
            Arc::new(IdentityKeyGenerator),
            Arc::new(Stats::new()),
            10..13,
            OperationMix { get: 0.0, put: 1.0, remove: 0.0 },
            8,
            0,
            1,
        );
        for _ in 0..4 {
            logic.invoke().unwrap();
        }
        assert_eq!(logic.cursor, 10);
        for k in 10..13 {
            let v = cache
                .get("b", &CacheKey::entry(k))
                .unwrap()
                .unwrap();
            assert!(matches!(v, StoredValue::Payload(_)));
        }
    }
}
