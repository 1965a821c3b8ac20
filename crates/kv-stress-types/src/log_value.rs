//! The two tamper-evident log-value types.
//!
//! Both are immutable value types with structural equality: every mutation
//! returns a new value rather than touching `self` in place, and the shared
//! variant maintains a stable per-worker ordering (`BTreeMap`) so that its
//! canonical serialization is reproducible across processes — `SharedLogLogic`
//! relies on that for CAS comparisons to even make sense.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Identifies the worker (stressor thread) that produced an operation id.
pub type ThreadId = u64;

/// A per-worker monotonically increasing operation sequence number.
pub type OperationId = u64;

/// A value owned by exactly one worker. `thread_id` never changes across a
/// value's lifetime; `operation_ids` is always non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateLogValue {
    thread_id: ThreadId,
    operation_ids: Vec<OperationId>,
}

impl PrivateLogValue {
    /// Construct the first value a worker ever writes at a key.
    pub fn new(thread_id: ThreadId, first_op: OperationId) -> Self {
        PrivateLogValue {
            thread_id,
            operation_ids: vec![first_op],
        }
    }

    /// The single worker that produced every id in this value.
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Number of still-unobserved operation ids.
    pub fn size(&self) -> usize {
        self.operation_ids.len()
    }

    /// The id at position `index`, oldest first.
    pub fn operation_id(&self, index: usize) -> OperationId {
        self.operation_ids[index]
    }

    /// All ids, oldest first.
    pub fn operation_ids(&self) -> &[OperationId] {
        &self.operation_ids
    }

    /// Append `op_id`, growing the value by one.
    pub fn with(&self, op_id: OperationId) -> Self {
        let mut operation_ids = self.operation_ids.clone();
        operation_ids.push(op_id);
        PrivateLogValue {
            thread_id: self.thread_id,
            operation_ids,
        }
    }

    /// Drop the first `k` ids (certified by the checker) and append `op_id`.
    ///
    /// `k` must be in `1..=self.size()`; this is an internal invariant
    /// enforced by the caller, not a user-facing validation.
    pub fn shift(&self, k: usize, op_id: OperationId) -> Self {
        assert!(
            k >= 1 && k <= self.operation_ids.len(),
            "shift amount {k} out of range for size {}",
            self.operation_ids.len()
        );
        let mut operation_ids: Vec<OperationId> =
            self.operation_ids[k..].to_vec();
        operation_ids.push(op_id);
        PrivateLogValue {
            thread_id: self.thread_id,
            operation_ids,
        }
    }
}

/// A value that may be written by any worker: a mapping from worker id to
/// its ordered, deduplicated subsequence of still-unobserved operation ids.
///
/// Worker ordering is a `BTreeMap` rather than a `HashMap` so two processes
/// that agree on content also agree on encoding — required for CAS to work
/// against a backend that compares serialized bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SharedLogValue {
    per_thread: BTreeMap<ThreadId, Vec<OperationId>>,
}

impl SharedLogValue {
    /// Construct a fresh value holding a single worker's first operation.
    pub fn new(thread_id: ThreadId, op_id: OperationId) -> Self {
        let mut per_thread = BTreeMap::new();
        per_thread.insert(thread_id, vec![op_id]);
        SharedLogValue { per_thread }
    }

    /// Whether no worker has any open operation id in this value.
    pub fn is_empty(&self) -> bool {
        self.per_thread.values().all(|v| v.is_empty())
    }

    /// Total number of unobserved operation ids across all workers.
    pub fn size(&self) -> usize {
        self.per_thread.values().map(|v| v.len()).sum()
    }

    /// The ordered ids a given worker has contributed that are still open.
    pub fn per_thread(&self, thread_id: ThreadId) -> &[OperationId] {
        self.per_thread
            .get(&thread_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// The smallest opId `thread_id` still has open, or `None` ("+∞") if it
    /// has none — used to bound checker queries in `filterAndAddOperation`.
    pub fn min_from(&self, thread_id: ThreadId) -> Option<OperationId> {
        self.per_thread.get(&thread_id).and_then(|v| v.first().copied())
    }

    /// Append `op_id` to `thread_id`'s subsequence.
    pub fn with(&self, thread_id: ThreadId, op_id: OperationId) -> Self {
        let mut per_thread = self.per_thread.clone();
        per_thread.entry(thread_id).or_default().push(op_id);
        SharedLogValue { per_thread }
    }

    /// Append `op_id` to `thread_id`'s subsequence, first discarding, for
    /// every worker `t`, the prefix of its subsequence whose ids are
    /// `<= min_seen[t]`.
    pub fn with_trimmed(
        &self,
        thread_id: ThreadId,
        op_id: OperationId,
        min_seen: &BTreeMap<ThreadId, OperationId>,
    ) -> Self {
        let mut per_thread = BTreeMap::new();
        for (&t, ids) in &self.per_thread {
            let bound = min_seen.get(&t).copied();
            let trimmed: Vec<OperationId> = match bound {
                Some(bound) => ids.iter().copied().filter(|id| *id > bound).collect(),
                None => ids.clone(),
            };
            if !trimmed.is_empty() {
                per_thread.insert(t, trimmed);
            }
        }
        per_thread.entry(thread_id).or_default().push(op_id);
        SharedLogValue { per_thread }
    }

    /// The workers with any still-open operation id in this value.
    pub fn thread_ids(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.per_thread.keys().copied()
    }

    /// Reconcile a key and its backup: concatenate per-worker subsequences
    /// and deduplicate by id. Commutative and idempotent on identical inputs.
    pub fn join(&self, other: &Self) -> Self {
        let mut per_thread: BTreeMap<ThreadId, Vec<OperationId>> = BTreeMap::new();
        let threads = self.per_thread.keys().chain(other.per_thread.keys());
        for &t in threads {
            if per_thread.contains_key(&t) {
                continue;
            }
            let mut merged: Vec<OperationId> = self
                .per_thread
                .get(&t)
                .into_iter()
                .flatten()
                .chain(other.per_thread.get(&t).into_iter().flatten())
                .copied()
                .collect();
            merged.sort_unstable();
            merged.dedup();
            per_thread.insert(t, merged);
        }
        SharedLogValue { per_thread }
    }
}
