use kv_stress_types::ThreadId;
use serde::{Deserialize, Serialize};

/// Every kind of key the core ever addresses in the cache: workload entries
/// (keyed by whatever opaque key the [`kv_stress_types::KeyGenerator`]
/// produces) and the three persisted bookkeeping keys from spec §6.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheKey<K> {
    /// A workload entry: `Entry(k)` holds the value written under the
    /// opaque key `k`, and `Entry` for the bitwise-negated id is its backup.
    Entry(K),
    /// `LastOperation(threadId)` — the stressor's own restart checkpoint.
    LastOperation(ThreadId),
    /// `checkerKey(slaveIdx, threadId)` — read-only checker watermark.
    CheckerWatermark {
        /// The checker process that owns this watermark.
        slave_index: u32,
        /// The stressor thread being watched.
        thread_id: ThreadId,
    },
    /// `ignoredKey(slaveIdx, threadId)` — written by the core to declare a
    /// range ignored for a dead checker.
    IgnoredKey {
        /// The dead checker process.
        slave_index: u32,
        /// The stressor thread whose range is being ignored.
        thread_id: ThreadId,
    },
}

impl<K> CacheKey<K> {
    /// Construct an entry key from an opaque key value.
    pub fn entry(key: K) -> Self {
        CacheKey::Entry(key)
    }
}
