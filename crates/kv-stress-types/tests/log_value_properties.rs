//! Property-based checks for the two log-value algebras: growth/shift on
//! `PrivateLogValue`, and join/trim on `SharedLogValue`.

use std::collections::BTreeMap;

use proptest::prelude::*;

use kv_stress_types::{PrivateLogValue, SharedLogValue};

fn build_private(thread_id: u64, ops: &[u64]) -> PrivateLogValue {
    let mut v = PrivateLogValue::new(thread_id, ops[0]);
    for &op in &ops[1..] {
        v = v.with(op);
    }
    v
}

fn build_shared(thread_id: u64, ops: &[u64]) -> SharedLogValue {
    let mut ops = ops.to_vec();
    ops.sort_unstable();
    ops.dedup();
    match ops.split_first() {
        None => SharedLogValue::default(),
        Some((&first, rest)) => {
            let mut v = SharedLogValue::new(thread_id, first);
            for &op in rest {
                v = v.with(thread_id, op);
            }
            v
        }
    }
}

proptest! {
    #[test]
    fn with_grows_by_one_and_appends_at_the_tail(
        thread_id in any::<u64>(),
        mut ops in prop::collection::vec(any::<u64>(), 1..8),
        new_op in any::<u64>(),
    ) {
        ops.sort_unstable();
        ops.dedup();
        let v = build_private(thread_id, &ops);
        let before = v.size();

        let grown = v.with(new_op);

        prop_assert_eq!(grown.size(), before + 1);
        prop_assert_eq!(grown.operation_id(before), new_op);
    }

    #[test]
    fn shift_drops_the_certified_prefix_and_appends_the_tail(
        thread_id in any::<u64>(),
        mut ops in prop::collection::vec(any::<u64>(), 1..8),
        new_op in any::<u64>(),
        k_raw in any::<u32>(),
    ) {
        ops.sort_unstable();
        ops.dedup();
        let v = build_private(thread_id, &ops);
        let size = v.size();
        let k = 1 + (k_raw as usize % size);

        let shifted = v.shift(k, new_op);

        prop_assert_eq!(shifted.size(), size - k + 1);
        let mut expected: Vec<u64> = v.operation_ids()[k..].to_vec();
        expected.push(new_op);
        prop_assert_eq!(shifted.operation_ids().to_vec(), expected);
    }

    #[test]
    fn join_is_commutative_and_idempotent(
        thread_a in 0u64..4,
        ops_a in prop::collection::vec(any::<u64>(), 0..6),
        thread_b in 0u64..4,
        ops_b in prop::collection::vec(any::<u64>(), 0..6),
    ) {
        let a = build_shared(thread_a, &ops_a);
        let b = build_shared(thread_b, &ops_b);

        prop_assert_eq!(a.join(&b), b.join(&a));
        let joined = a.join(&b);
        prop_assert_eq!(joined.join(&joined), joined);
    }

    #[test]
    fn join_deduplicates_and_sorts_each_workers_subsequence(
        thread_id in 0u64..4,
        ops_a in prop::collection::vec(any::<u64>(), 0..6),
        ops_b in prop::collection::vec(any::<u64>(), 0..6),
    ) {
        let a = build_shared(thread_id, &ops_a);
        let b = build_shared(thread_id, &ops_b);
        let joined = a.join(&b);

        let ids = joined.per_thread(thread_id);
        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        prop_assert_eq!(ids.to_vec(), sorted);
    }

    #[test]
    fn with_trimmed_drops_ids_not_exceeding_the_bound(
        thread_id in 0u64..4,
        ops in prop::collection::vec(any::<u64>(), 1..6),
        new_op in any::<u64>(),
        bound in any::<u64>(),
    ) {
        let v = build_shared(thread_id, &ops);
        let mut mins: BTreeMap<u64, u64> = BTreeMap::new();
        mins.insert(thread_id, bound);

        let trimmed = v.with_trimmed(thread_id, new_op, &mins);

        let mut expected: Vec<u64> = v
            .per_thread(thread_id)
            .iter()
            .copied()
            .filter(|id| *id > bound)
            .collect();
        expected.push(new_op);
        prop_assert_eq!(trimmed.per_thread(thread_id).to_vec(), expected);
    }
}
