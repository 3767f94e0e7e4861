// adapted from: https://github.com/jonhoo/flurry/blob/main/tests/basic.rs

use jujube::HashMap;

use std::hash::{BuildHasherDefault, Hasher};

mod common;
use common::with_map;

// A hasher that passes `usize` keys through unchanged, for tests that need
// precise control over probe positions.
#[derive(Default)]
struct UsizeHasher(u64);

impl Hasher for UsizeHasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, _: &[u8]) {
        unimplemented!("UsizeHasher only hashes usize keys")
    }

    fn write_usize(&mut self, n: usize) {
        self.0 = n as u64;
    }
}

type PassThrough = BuildHasherDefault<UsizeHasher>;

fn with_pass_through(capacity: usize) -> HashMap<usize, usize, PassThrough> {
    HashMap::with_capacity_and_hasher(capacity, PassThrough::default())
}

#[test]
fn new() {
    with_map::<usize, usize>(|map| drop(map()));
}

#[test]
fn insert() {
    with_map::<usize, usize>(|map| {
        let map = map();
        let guard = map.guard();
        let old = map.insert(42, 0, &guard);
        assert!(old.is_none());
    });
}

#[test]
fn get_empty() {
    with_map::<usize, usize>(|map| {
        let map = map();
        let guard = map.guard();
        assert!(map.get(&42, &guard).is_none());
    });
}

#[test]
fn remove_empty() {
    with_map::<usize, usize>(|map| {
        let map = map();
        let guard = map.guard();
        assert!(map.remove(&42, &guard).is_none());
    });
}

#[test]
fn insert_and_remove() {
    with_map::<usize, usize>(|map| {
        let map = map();
        let guard = map.guard();
        map.insert(42, 0, &guard);
        assert_eq!(map.remove(&42, &guard), Some(&0));
        assert!(map.get(&42, &guard).is_none());
    });
}

#[test]
fn insert_and_get() {
    with_map::<usize, usize>(|map| {
        let map = map();
        map.pin().insert(42, 0);

        let guard = map.guard();
        let e = map.get(&42, &guard).unwrap();
        assert_eq!(e, &0);
    });
}

#[test]
fn insert_and_get_key_value() {
    with_map::<usize, usize>(|map| {
        let map = map();
        map.pin().insert(42, 0);

        let guard = map.guard();
        assert_eq!(map.get_key_value(&42, &guard), Some((&42, &0)));
    });
}

#[test]
fn update() {
    with_map::<usize, usize>(|map| {
        let map = map();
        let guard = map.guard();
        map.insert(42, 0, &guard);
        assert_eq!(map.insert(42, 1, &guard), Some(&0));
        assert_eq!(map.get(&42, &guard), Some(&1));

        // An overwrite must not change the length.
        assert_eq!(map.len(), 1);
    });
}

#[test]
fn try_insert() {
    with_map::<usize, usize>(|map| {
        let map = map();
        let guard = map.guard();

        assert_eq!(map.try_insert(42, 0, &guard), Ok(&0));

        let err = map.try_insert(42, 1, &guard).unwrap_err();
        assert_eq!(err.current, &0);
        assert_eq!(err.not_inserted, 1);

        // The binding was not modified.
        assert_eq!(map.get(&42, &guard), Some(&0));
    });
}

#[test]
fn try_insert_after_remove() {
    with_map::<usize, usize>(|map| {
        let map = map();
        let guard = map.guard();

        map.insert(42, 0, &guard);
        map.remove(&42, &guard);

        // A tombstone does not count as an occupant.
        assert_eq!(map.try_insert(42, 1, &guard), Ok(&1));
        assert_eq!(map.get(&42, &guard), Some(&1));
    });
}

#[test]
fn get_or_insert() {
    with_map::<usize, usize>(|map| {
        let map = map();
        let guard = map.guard();

        assert_eq!(map.get_or_insert(42, 3, &guard), &3);
        assert_eq!(map.get_or_insert(42, 6, &guard), &3);
    });
}

#[test]
fn compare_and_swap() {
    with_map::<usize, usize>(|map| {
        let map = map();
        let guard = map.guard();

        map.insert(42, 0, &guard);
        assert_eq!(map.compare_and_swap(42, &0, 1, &guard), Ok(&0));
        assert_eq!(map.get(&42, &guard), Some(&1));
    });
}

#[test]
fn compare_and_swap_mismatch() {
    with_map::<usize, usize>(|map| {
        let map = map();
        let guard = map.guard();

        map.insert(42, 0, &guard);

        // The expected value does not match, so the resident is unchanged.
        let err = map.compare_and_swap(42, &7, 1, &guard).unwrap_err();
        assert_eq!(err.current, Some(&0));
        assert_eq!(err.not_swapped, 1);
        assert_eq!(map.get(&42, &guard), Some(&0));
    });
}

#[test]
fn compare_and_swap_absent() {
    with_map::<usize, usize>(|map| {
        let map = map();
        let guard = map.guard();

        // A compare-and-swap never inserts.
        let err = map.compare_and_swap(42, &0, 1, &guard).unwrap_err();
        assert_eq!(err.current, None);
        assert!(map.get(&42, &guard).is_none());
        assert_eq!(map.len(), 0);
    });
}

#[test]
fn remove_returns_length() {
    with_map::<usize, usize>(|map| {
        let map = map();
        let guard = map.guard();

        let before = map.len();
        map.insert(42, 0, &guard);
        map.remove(&42, &guard);
        assert_eq!(map.len(), before);

        // A double remove is a no-op.
        assert!(map.remove(&42, &guard).is_none());
        assert_eq!(map.len(), before);
    });
}

#[test]
fn remove_entry() {
    with_map::<usize, usize>(|map| {
        let map = map();
        let guard = map.guard();
        map.insert(42, 0, &guard);
        assert_eq!(map.remove_entry(&42, &guard), Some((&42, &0)));
        assert!(map.get(&42, &guard).is_none());
    });
}

#[test]
fn reinsert_after_remove() {
    with_map::<usize, usize>(|map| {
        let map = map();
        let guard = map.guard();

        map.insert(42, 0, &guard);
        map.remove(&42, &guard);
        assert!(map.insert(42, 1, &guard).is_none());
        assert_eq!(map.get(&42, &guard), Some(&1));
        assert_eq!(map.len(), 1);
    });
}

#[test]
fn clear() {
    with_map::<usize, usize>(|map| {
        let map = map();
        {
            let guard = map.guard();
            for i in 0..64 {
                map.insert(i, i, &guard);
            }
        }

        map.pin().clear();

        assert!(map.is_empty());
        assert_eq!(map.len(), 0);

        let guard = map.guard();
        for i in 0..64 {
            assert!(map.get(&i, &guard).is_none());
        }

        // The map remains usable after a clear.
        map.insert(1, 1, &guard);
        assert_eq!(map.get(&1, &guard), Some(&1));
    });
}

#[test]
fn retain() {
    with_map::<usize, usize>(|map| {
        let map = map();
        {
            let guard = map.guard();
            for i in 0..128 {
                map.insert(i, i * 10, &guard);
            }
        }

        map.pin().retain(|&k, _| k % 2 == 0);

        assert_eq!(map.len(), 64);

        let guard = map.guard();
        for i in 0..128 {
            if i % 2 == 0 {
                assert_eq!(map.get(&i, &guard), Some(&(i * 10)));
            } else {
                assert!(map.get(&i, &guard).is_none());
            }
        }
    });
}

#[test]
fn retain_all() {
    with_map::<usize, usize>(|map| {
        let map = map();
        {
            let guard = map.guard();
            for i in 0..128 {
                map.insert(i, i, &guard);
            }
        }

        // A sweep that removes everything triggers an eager rebuild.
        map.pin().retain(|_, _| false);
        assert_eq!(map.len(), 0);

        let guard = map.guard();
        for i in 0..128 {
            assert!(map.get(&i, &guard).is_none());
        }
    });
}

#[test]
fn iter() {
    with_map::<usize, usize>(|map| {
        let map = map();
        let guard = map.guard();
        for i in 0..64 {
            map.insert(i, i + 1, &guard);
        }

        let mut got: Vec<(usize, usize)> = map.iter(&guard).map(|(&k, &v)| (k, v)).collect();
        got.sort_unstable();

        let expected: Vec<(usize, usize)> = (0..64).map(|i| (i, i + 1)).collect();
        assert_eq!(got, expected);
    });
}

#[test]
fn keys_and_values() {
    with_map::<usize, usize>(|map| {
        let map = map();
        let guard = map.guard();
        for i in 0..16 {
            map.insert(i, i + 100, &guard);
        }

        let mut keys: Vec<usize> = map.keys(&guard).copied().collect();
        keys.sort_unstable();
        assert_eq!(keys, (0..16).collect::<Vec<_>>());

        let mut values: Vec<usize> = map.values(&guard).copied().collect();
        values.sort_unstable();
        assert_eq!(values, (100..116).collect::<Vec<_>>());
    });
}

#[test]
fn growth() {
    // Scenario: a tiny table that must grow many times.
    with_map::<usize, usize>(|map| {
        let map = map();
        {
            let guard = map.guard();
            for i in 0..4096 {
                map.insert(i, i, &guard);
            }
        }

        assert_eq!(map.len(), 4096);
        assert!(map.capacity() >= 4096);

        let guard = map.guard();
        for i in 0..4096 {
            assert_eq!(map.get(&i, &guard), Some(&i));
        }
    });
}

#[test]
fn growth_from_capacity_two() {
    let map: HashMap<usize, usize> = HashMap::with_capacity(2);
    let guard = map.guard();

    for i in 0..128 {
        map.insert(i, i, &guard);
    }

    assert!(map.capacity() > 2);
    for i in 0..128 {
        assert_eq!(map.get(&i, &guard), Some(&i));
    }
}

#[test]
fn growth_from_capacity_one() {
    // Keys 0..4 hash to themselves; the table must grow to hold them all.
    let map = with_pass_through(1);
    let guard = map.guard();

    for k in 0..4 {
        map.insert(k, k + 100, &guard);
    }

    for k in 0..4 {
        assert_eq!(map.get(&k, &guard), Some(&(k + 100)));
    }

    assert_eq!(map.len(), 4);
    assert!(map.capacity() >= 4);
}

#[test]
fn probes_through_tombstones() {
    // Keys 4, 8 and 12 share the initial probe index in a table of four
    // slots, forming a single probe chain.
    let map = with_pass_through(4);
    let guard = map.guard();

    map.insert(4, 1, &guard);
    map.insert(8, 2, &guard);
    map.insert(12, 3, &guard);

    // Removing the middle of the chain must not hide the tail.
    assert_eq!(map.remove(&8, &guard), Some(&2));
    assert_eq!(map.get(&4, &guard), Some(&1));
    assert_eq!(map.get(&12, &guard), Some(&3));
    assert!(map.get(&8, &guard).is_none());
}

#[test]
fn zero_hash_keys() {
    // A user hash of zero is remapped internally; the key must behave like
    // any other.
    let map = with_pass_through(8);
    let guard = map.guard();

    assert!(map.insert(0, 7, &guard).is_none());
    assert_eq!(map.get(&0, &guard), Some(&7));
    assert_eq!(map.insert(0, 8, &guard), Some(&7));
    assert_eq!(map.remove(&0, &guard), Some(&8));
    assert!(map.get(&0, &guard).is_none());
}

#[test]
fn capacity_zero_uses_default() {
    let map: HashMap<usize, usize> = HashMap::with_capacity(0);
    assert!(map.capacity() > 0);
}

#[test]
fn capacity_rounds_up() {
    let map: HashMap<usize, usize> = HashMap::with_capacity(3);
    assert!(map.capacity() >= 4);
    assert!(map.capacity().is_power_of_two());
}

#[test]
fn max_capacity_accepted() {
    // The allocation is lazily faulted, so this is cheap despite its size.
    let map: HashMap<usize, usize> = HashMap::with_capacity(1 << 26);
    assert_eq!(map.capacity(), 1 << 26);
}

#[test]
#[should_panic]
fn over_max_capacity_rejected() {
    let _map: HashMap<usize, usize> = HashMap::with_capacity((1 << 26) + 1);
}

#[test]
fn references_outlive_removal() {
    with_map::<usize, String>(|map| {
        let map = map();
        map.pin().insert(1, String::from("a"));

        let guard = map.guard();
        let value = map.get(&1, &guard).unwrap();

        // The removal is deferred while our guard is held.
        map.remove(&1, &map.guard());
        assert_eq!(value, "a");
    });
}

#[test]
fn references_outlive_clear() {
    with_map::<usize, String>(|map| {
        let map = map();
        map.pin().insert(1, String::from("a"));

        let guard = map.guard();
        let value = map.get(&1, &guard).unwrap();

        map.clear(&map.guard());
        assert_eq!(value, "a");
        assert!(map.pin().get(&1).is_none());
    });
}

#[test]
fn from_iter() {
    use std::iter::FromIterator;

    let map = HashMap::from_iter((0..32usize).map(|i| (i, i)));
    let guard = map.guard();

    assert_eq!(map.len(), 32);
    for i in 0..32 {
        assert_eq!(map.get(&i, &guard), Some(&i));
    }
}

#[test]
fn from_array() {
    let map = HashMap::from([(1, "a"), (2, "b")]);
    let m = map.pin();
    assert_eq!(m.get(&1), Some(&"a"));
    assert_eq!(m.get(&2), Some(&"b"));
}

#[test]
fn extend() {
    let map: HashMap<usize, usize> = HashMap::new();
    (&map).extend((0..16).map(|i| (i, i)));
    assert_eq!(map.len(), 16);
}

#[test]
fn clone() {
    let map: HashMap<usize, String> = HashMap::new();
    map.pin().insert(1, String::from("a"));
    map.pin().insert(2, String::from("b"));

    let cloned = map.clone();
    assert_eq!(map, cloned);

    // The clone is independent.
    cloned.pin().insert(3, String::from("c"));
    assert!(map.pin().get(&3).is_none());
}

#[test]
fn eq() {
    let a: HashMap<usize, usize> = (0..8).map(|i| (i, i)).collect();
    let b: HashMap<usize, usize> = (0..8).rev().map(|i| (i, i)).collect();
    assert_eq!(a, b);

    b.pin().insert(8, 8);
    assert_ne!(a, b);
}

#[test]
fn debug() {
    let map: HashMap<usize, usize> = HashMap::new();
    map.pin().insert(1, 2);
    assert_eq!(format!("{map:?}"), "{1: 2}");
}

#[test]
fn pinned_ref() {
    let map: HashMap<usize, usize> = HashMap::new();
    let m = map.pin();

    m.insert(1, 1);
    assert_eq!(m.get(&1), Some(&1));
    assert!(m.contains_key(&1));
    assert_eq!(m.len(), 1);

    let collected: Vec<_> = (&m).into_iter().collect();
    assert_eq!(collected, [(&1, &1)]);
}

#[test]
fn borrowed_keys() {
    let map: HashMap<String, usize> = HashMap::new();
    let m = map.pin();

    m.insert(String::from("a"), 1);

    // Lookups work through any equivalent borrowed form of the key.
    assert_eq!(m.get("a"), Some(&1));
    assert!(m.contains_key("a"));
    assert_eq!(m.remove("a"), Some(&1));
}
