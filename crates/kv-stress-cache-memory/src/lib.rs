#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **kv-stress-cache-memory** – an in-memory [`CacheBackend`] used by
//! `kv-stress`'s own tests and local runs.
//!
//! A plain `Mutex<HashMap<_, _>>` backs the store, extended with per-thread
//! transaction buffering and the compare-and-swap primitives `SharedLogLogic`
//! needs. Transactions are modeled as a
//! thread-local pending-write buffer that is merged over the committed
//! store on read and flushed into it atomically on commit; a whole-backend
//! mutex stands in for the atomicity a real distributed cache would give
//! a single key.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread::{self, ThreadId};

use kv_stress_cache::{CacheBackend, CacheError, CacheKey, StoredValue};

type EntryKey<K> = (String, CacheKey<K>);

struct Inner<K> {
    store: HashMap<EntryKey<K>, StoredValue>,
    transactions: HashMap<ThreadId, HashMap<EntryKey<K>, Option<StoredValue>>>,
}

impl<K> Default for Inner<K> {
    fn default() -> Self {
        Inner {
            store: HashMap::new(),
            transactions: HashMap::new(),
        }
    }
}

/// A non-persistent, process-local cache backend.
pub struct MemoryBackend<K> {
    inner: Mutex<Inner<K>>,
    running: AtomicBool,
}

impl<K> Default for MemoryBackend<K>
where
    K: Clone + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> MemoryBackend<K>
where
    K: Clone + Eq + Hash,
{
    /// Construct an empty, running backend.
    pub fn new() -> Self {
        MemoryBackend {
            inner: Mutex::new(Inner::default()),
            running: AtomicBool::new(true),
        }
    }

    /// Make the backend report `is_running() == false`, simulating node
    /// loss for cancellation tests.
    pub fn shut_down(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Number of entries currently committed to the store (ignores any
    /// thread's uncommitted transaction buffer).
    pub fn committed_len(&self) -> usize {
        self.inner.lock().unwrap().store.len()
    }

    fn merged_view(inner: &Inner<K>, tid: ThreadId, k: &EntryKey<K>) -> Option<StoredValue> {
        if let Some(tx) = inner.transactions.get(&tid) {
            if let Some(pending) = tx.get(k) {
                return pending.clone();
            }
        }
        inner.store.get(k).cloned()
    }

    fn write(inner: &mut Inner<K>, tid: ThreadId, k: EntryKey<K>, value: Option<StoredValue>) {
        if let Some(tx) = inner.transactions.get_mut(&tid) {
            tx.insert(k, value);
        } else {
            match value {
                Some(v) => {
                    inner.store.insert(k, v);
                }
                None => {
                    inner.store.remove(&k);
                }
            }
        }
    }
}

impl<K> CacheBackend<K> for MemoryBackend<K>
where
    K: Clone + Eq + Hash + Send + Sync,
{
    fn get(&self, bucket: &str, key: &CacheKey<K>) -> Result<Option<StoredValue>, CacheError> {
        let inner = self.inner.lock().unwrap();
        let tid = thread::current().id();
        Ok(Self::merged_view(&inner, tid, &(bucket.to_string(), key.clone())))
    }

    fn put(&self, bucket: &str, key: &CacheKey<K>, value: StoredValue) -> Result<(), CacheError> {
        let mut inner = self.inner.lock().unwrap();
        let tid = thread::current().id();
        Self::write(&mut inner, tid, (bucket.to_string(), key.clone()), Some(value));
        Ok(())
    }

    fn remove(
        &self,
        bucket: &str,
        key: &CacheKey<K>,
    ) -> Result<Option<StoredValue>, CacheError> {
        let mut inner = self.inner.lock().unwrap();
        let tid = thread::current().id();
        let k = (bucket.to_string(), key.clone());
        let prior = Self::merged_view(&inner, tid, &k);
        Self::write(&mut inner, tid, k, None);
        Ok(prior)
    }

    fn start_transaction(&self) -> Result<(), CacheError> {
        let mut inner = self.inner.lock().unwrap();
        let tid = thread::current().id();
        if inner.transactions.contains_key(&tid) {
            return Err(CacheError::TransactionAlreadyOpen);
        }
        inner.transactions.insert(tid, HashMap::new());
        Ok(())
    }

    fn end_transaction(&self, commit: bool) -> Result<(), CacheError> {
        let mut inner = self.inner.lock().unwrap();
        let tid = thread::current().id();
        let pending = inner
            .transactions
            .remove(&tid)
            .ok_or(CacheError::NoTransaction)?;
        if commit {
            for (k, v) in pending {
                match v {
                    Some(value) => {
                        inner.store.insert(k, value);
                    }
                    None => {
                        inner.store.remove(&k);
                    }
                }
            }
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn supports_atomic_ops(&self) -> bool {
        true
    }

    fn put_if_absent(
        &self,
        bucket: &str,
        key: &CacheKey<K>,
        value: StoredValue,
    ) -> Result<Option<StoredValue>, CacheError> {
        let mut inner = self.inner.lock().unwrap();
        let tid = thread::current().id();
        let k = (bucket.to_string(), key.clone());
        let current = Self::merged_view(&inner, tid, &k);
        if current.is_none() {
            Self::write(&mut inner, tid, k, Some(value));
        }
        Ok(current)
    }

    fn replace(
        &self,
        bucket: &str,
        key: &CacheKey<K>,
        old: &StoredValue,
        new: StoredValue,
    ) -> Result<bool, CacheError> {
        let mut inner = self.inner.lock().unwrap();
        let tid = thread::current().id();
        let k = (bucket.to_string(), key.clone());
        let current = Self::merged_view(&inner, tid, &k);
        if current.as_ref() == Some(old) {
            Self::write(&mut inner, tid, k, Some(new));
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn remove_cas(
        &self,
        bucket: &str,
        key: &CacheKey<K>,
        expected: &StoredValue,
    ) -> Result<bool, CacheError> {
        let mut inner = self.inner.lock().unwrap();
        let tid = thread::current().id();
        let k = (bucket.to_string(), key.clone());
        let current = Self::merged_view(&inner, tid, &k);
        if current.as_ref() == Some(expected) {
            Self::write(&mut inner, tid, k, None);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kv_stress_cache::LastOperation;

    #[test]
    fn put_then_get_roundtrips() {
        let backend: MemoryBackend<i64> = MemoryBackend::new();
        let key = CacheKey::entry(7i64);
        backend
            .put("b", &key, StoredValue::LastOperation(LastOperation { operation_id: 1, rng_seed: 9 }))
            .unwrap();
        let got = backend.get("b", &key).unwrap().unwrap();
        assert_eq!(got.as_last_operation().unwrap().operation_id, 1);
    }

    #[test]
    fn uncommitted_transaction_is_invisible_to_final_read_on_rollback() {
        let backend: MemoryBackend<i64> = MemoryBackend::new();
        let key = CacheKey::entry(1i64);
        backend.start_transaction().unwrap();
        backend
            .put("b", &key, StoredValue::IgnoredKey(42))
            .unwrap();
        assert!(backend.get("b", &key).unwrap().is_some());
        backend.end_transaction(false).unwrap();
        assert!(backend.get("b", &key).unwrap().is_none());
        assert_eq!(backend.committed_len(), 0);
    }

    #[test]
    fn committed_transaction_is_visible() {
        let backend: MemoryBackend<i64> = MemoryBackend::new();
        let key = CacheKey::entry(1i64);
        backend.start_transaction().unwrap();
        backend
            .put("b", &key, StoredValue::IgnoredKey(42))
            .unwrap();
        backend.end_transaction(true).unwrap();
        assert_eq!(backend.get("b", &key).unwrap().unwrap().as_ignored_key(), Some(42));
    }

    #[test]
    fn put_if_absent_only_succeeds_once() {
        let backend: MemoryBackend<i64> = MemoryBackend::new();
        let key = CacheKey::entry(1i64);
        let first = backend
            .put_if_absent("b", &key, StoredValue::IgnoredKey(1))
            .unwrap();
        assert!(first.is_none());
        let second = backend
            .put_if_absent("b", &key, StoredValue::IgnoredKey(2))
            .unwrap();
        assert_eq!(second.unwrap().as_ignored_key(), Some(1));
    }

    #[test]
    fn replace_is_compare_and_swap() {
        let backend: MemoryBackend<i64> = MemoryBackend::new();
        let key = CacheKey::entry(1i64);
        backend.put("b", &key, StoredValue::IgnoredKey(1)).unwrap();
        let lost = backend
            .replace("b", &key, &StoredValue::IgnoredKey(99), StoredValue::IgnoredKey(2))
            .unwrap();
        assert!(!lost);
        let won = backend
            .replace("b", &key, &StoredValue::IgnoredKey(1), StoredValue::IgnoredKey(2))
            .unwrap();
        assert!(won);
        assert_eq!(backend.get("b", &key).unwrap().unwrap().as_ignored_key(), Some(2));
    }

    #[test]
    fn shut_down_is_reported_by_is_running() {
        let backend: MemoryBackend<i64> = MemoryBackend::new();
        assert!(backend.is_running());
        backend.shut_down();
        assert!(!backend.is_running());
    }
}
