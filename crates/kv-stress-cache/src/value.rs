use kv_stress_types::{PrivateLogValue, SharedLogValue};
use serde::{Deserialize, Serialize};

/// The stressor's own restart checkpoint: pairs an operation id with the
/// exact RNG seed at the moment it was taken (spec §9, "Replayable RNG").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastOperation {
    /// The last operation id this worker successfully committed.
    pub operation_id: u64,
    /// The RNG state at that moment.
    pub rng_seed: u64,
}

/// A checker's watermark, as read by `getCheckedOperation`. Read-only from
/// the core's perspective; checkers write it, the core only ever reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckerWatermark {
    /// The highest operation id this checker has certified as observed.
    pub read_operation_id: u64,
}

/// Every shape of value the core ever stores or reads. The cache itself is a
/// plain `Object -> Object` store (mirroring the distributed caches this
/// stresses); this enum is the core's own typed view onto that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoredValue {
    /// A random byte payload written during the legacy driver's load phase
    /// or active workload.
    Payload(Vec<u8>),
    /// A `PrivateLogLogic` log value.
    Private(PrivateLogValue),
    /// A `SharedLogLogic` log value.
    Shared(SharedLogValue),
    /// A `LastOperation(threadId)` checkpoint.
    LastOperation(LastOperation),
    /// A `checkerKey(slaveIdx, threadId)` watermark.
    CheckerWatermark(CheckerWatermark),
    /// An `ignoredKey(slaveIdx, threadId)` bound.
    IgnoredKey(i64),
}

impl StoredValue {
    /// View this value as a [`PrivateLogValue`], if that's what it is.
    pub fn as_private(&self) -> Option<&PrivateLogValue> {
        match self {
            StoredValue::Private(v) => Some(v),
            _ => None,
        }
    }

    /// View this value as a [`SharedLogValue`], if that's what it is.
    pub fn as_shared(&self) -> Option<&SharedLogValue> {
        match self {
            StoredValue::Shared(v) => Some(v),
            _ => None,
        }
    }

    /// View this value as a [`LastOperation`] checkpoint, if that's what it is.
    pub fn as_last_operation(&self) -> Option<LastOperation> {
        match self {
            StoredValue::LastOperation(v) => Some(*v),
            _ => None,
        }
    }

    /// View this value as a [`CheckerWatermark`], if that's what it is.
    pub fn as_checker_watermark(&self) -> Option<CheckerWatermark> {
        match self {
            StoredValue::CheckerWatermark(v) => Some(*v),
            _ => None,
        }
    }

    /// View this value as an ignored-key bound, if that's what it is.
    pub fn as_ignored_key(&self) -> Option<i64> {
        match self {
            StoredValue::IgnoredKey(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<PrivateLogValue> for StoredValue {
    fn from(v: PrivateLogValue) -> Self {
        StoredValue::Private(v)
    }
}

impl From<SharedLogValue> for StoredValue {
    fn from(v: SharedLogValue) -> Self {
        StoredValue::Shared(v)
    }
}
