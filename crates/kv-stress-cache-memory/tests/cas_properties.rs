//! Compare-and-swap primitives must never mutate the store on a mismatch,
//! and must always mutate it to exactly the requested value on a match.

use kv_stress_cache::{CacheBackend, CacheKey, StoredValue};
use kv_stress_cache_memory::MemoryBackend;
use proptest::prelude::*;

fn ignored(id: i64) -> StoredValue {
    StoredValue::IgnoredKey(id)
}

proptest! {
    #[test]
    fn replace_only_swaps_on_a_matching_current_value(
        initial in any::<i64>(),
        guess in any::<i64>(),
        replacement in any::<i64>(),
    ) {
        let backend: MemoryBackend<i64> = MemoryBackend::new();
        let key = CacheKey::entry(0i64);
        backend.put("b", &key, ignored(initial)).unwrap();

        let swapped = backend.replace("b", &key, &ignored(guess), ignored(replacement)).unwrap();
        let stored = backend.get("b", &key).unwrap().unwrap();

        if guess == initial {
            prop_assert!(swapped);
            prop_assert_eq!(stored, ignored(replacement));
        } else {
            prop_assert!(!swapped);
            prop_assert_eq!(stored, ignored(initial));
        }
    }

    #[test]
    fn remove_cas_only_removes_on_a_matching_expected_value(
        initial in any::<i64>(),
        guess in any::<i64>(),
    ) {
        let backend: MemoryBackend<i64> = MemoryBackend::new();
        let key = CacheKey::entry(0i64);
        backend.put("b", &key, ignored(initial)).unwrap();

        let removed = backend.remove_cas("b", &key, &ignored(guess)).unwrap();
        let stored = backend.get("b", &key).unwrap();

        if guess == initial {
            prop_assert!(removed);
            prop_assert!(stored.is_none());
        } else {
            prop_assert!(!removed);
            prop_assert_eq!(stored, Some(ignored(initial)));
        }
    }

    #[test]
    fn put_if_absent_never_overwrites_an_existing_value(
        initial in any::<i64>(),
        attempted in any::<i64>(),
    ) {
        let backend: MemoryBackend<i64> = MemoryBackend::new();
        let key = CacheKey::entry(0i64);
        backend.put("b", &key, ignored(initial)).unwrap();

        let prior = backend.put_if_absent("b", &key, ignored(attempted)).unwrap();
        let stored = backend.get("b", &key).unwrap().unwrap();

        prop_assert_eq!(prior, Some(ignored(initial)));
        prop_assert_eq!(stored, ignored(initial));
    }
}
