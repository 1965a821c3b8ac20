use std::hash::Hash;

use crate::{CacheError, CacheKey, StoredValue};

/// The capability set the core consumes from a distributed cache (spec §6).
///
/// Blocking by design: each stressor thread is an independent OS thread that
/// calls straight into the backend and is expected to block on it, the way
/// a real cache client would. Implementations must be safe to share across
/// worker threads (`Send + Sync`) but each call is expected to apply to the
/// calling thread's own in-flight transaction, if any.
pub trait CacheBackend<K>: Send + Sync
where
    K: Clone + Eq + Hash + Send + Sync,
{
    /// Fetch the current value at `key` in `bucket`, or `None` if absent.
    fn get(&self, bucket: &str, key: &CacheKey<K>) -> Result<Option<StoredValue>, CacheError>;

    /// Unconditionally store `value` at `key` in `bucket`.
    fn put(&self, bucket: &str, key: &CacheKey<K>, value: StoredValue) -> Result<(), CacheError>;

    /// Remove the value at `key`, returning it if one was present.
    fn remove(
        &self,
        bucket: &str,
        key: &CacheKey<K>,
    ) -> Result<Option<StoredValue>, CacheError>;

    /// Begin a transaction for the calling thread.
    fn start_transaction(&self) -> Result<(), CacheError>;

    /// End the calling thread's transaction, committing or rolling back.
    fn end_transaction(&self, commit: bool) -> Result<(), CacheError>;

    /// Whether the backend is still accepting operations.
    fn is_running(&self) -> bool;

    /// Whether `put_if_absent`/`replace`/`remove_cas` are actually
    /// implemented by this backend. `loadWithPutIfAbsent` and
    /// `SharedLogLogic` require this to be `true`.
    fn supports_atomic_ops(&self) -> bool {
        false
    }

    /// Store `value` at `key` only if no value is currently present,
    /// returning the prior value (`None` on success).
    fn put_if_absent(
        &self,
        _bucket: &str,
        _key: &CacheKey<K>,
        _value: StoredValue,
    ) -> Result<Option<StoredValue>, CacheError> {
        Err(CacheError::AtomicCapabilityUnavailable)
    }

    /// Replace the value at `key` with `new` iff the current value equals
    /// `old`. Returns whether the replacement happened.
    fn replace(
        &self,
        _bucket: &str,
        _key: &CacheKey<K>,
        _old: &StoredValue,
        _new: StoredValue,
    ) -> Result<bool, CacheError> {
        Err(CacheError::AtomicCapabilityUnavailable)
    }

    /// Remove the value at `key` iff the current value equals `expected`.
    /// Returns whether the removal happened.
    fn remove_cas(
        &self,
        _bucket: &str,
        _key: &CacheKey<K>,
        _expected: &StoredValue,
    ) -> Result<bool, CacheError> {
        Err(CacheError::AtomicCapabilityUnavailable)
    }
}
