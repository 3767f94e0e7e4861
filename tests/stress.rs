use jujube::{HashMap, HashSet};
use rand::prelude::*;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Barrier;
use std::thread;

mod common;
use common::{threads, with_map};

// Two writers race unconditional inserts on one key. Readers must always
// observe one of the two candidate values, never a miss or a torn value.
#[test]
fn overwrite_single_key() {
    const ITERATIONS: usize = 10_000;

    with_map::<usize, usize>(|map| {
        let map = map();
        map.pin().insert(0, 1);

        let writers = AtomicUsize::new(2);
        let barrier = Barrier::new(3);

        thread::scope(|s| {
            for value in [1, 2] {
                let map = &map;
                let barrier = &barrier;
                let writers = &writers;

                s.spawn(move || {
                    barrier.wait();
                    let guard = map.guard();
                    for _ in 0..ITERATIONS {
                        map.insert(0, value, &guard);
                    }
                    writers.fetch_sub(1, Ordering::Release);
                });
            }

            s.spawn(|| {
                barrier.wait();
                while writers.load(Ordering::Acquire) != 0 {
                    let guard = map.guard();
                    let value = *map.get(&0, &guard).expect("key must always be present");
                    assert!(matches!(value, 1 | 2), "unexpected value {value}");
                }
            });
        });

        let value = *map.pin().get(&0).unwrap();
        assert!(matches!(value, 1 | 2));
    });
}

// Each thread inserts a disjoint range of keys. Every insert that returned
// must be visible afterwards.
#[test]
fn insert_disjoint_ranges() {
    const PER_THREAD: usize = 8_192;

    with_map::<usize, usize>(|map| {
        let map = map();
        let threads = threads();
        let barrier = Barrier::new(threads);

        thread::scope(|s| {
            for t in 0..threads {
                let map = &map;
                let barrier = &barrier;

                s.spawn(move || {
                    barrier.wait();
                    let guard = map.guard();
                    for i in 0..PER_THREAD {
                        let key = t * PER_THREAD + i;
                        map.insert(key, key, &guard);
                    }
                });
            }
        });

        assert_eq!(map.len(), threads * PER_THREAD);

        let guard = map.guard();
        for key in 0..threads * PER_THREAD {
            assert_eq!(map.get(&key, &guard), Some(&key));
        }
    });
}

// Every thread inserts the same keys with its own value. Exactly one of
// the candidate values must be resident per key.
#[test]
fn insert_same_keys() {
    const KEYS: usize = 1_024;

    with_map::<usize, usize>(|map| {
        let map = map();
        let threads = threads();
        let barrier = Barrier::new(threads);

        thread::scope(|s| {
            for t in 0..threads {
                let map = &map;
                let barrier = &barrier;

                s.spawn(move || {
                    barrier.wait();
                    let guard = map.guard();
                    for key in 0..KEYS {
                        map.insert(key, t, &guard);
                    }
                });
            }
        });

        assert_eq!(map.len(), KEYS);

        let guard = map.guard();
        for key in 0..KEYS {
            let value = *map.get(&key, &guard).unwrap();
            assert!(value < threads, "value {value} was never inserted");
        }
    });
}

// A tiny table grows under contention; every key must survive the
// migrations.
#[test]
fn growth_under_contention() {
    const KEYS: usize = 128;

    let map: HashMap<usize, usize> = HashMap::with_capacity(2);
    let threads = threads().min(8);
    let barrier = Barrier::new(threads);

    thread::scope(|s| {
        for t in 0..threads {
            let map = &map;
            let barrier = &barrier;
            s.spawn(move || {
                barrier.wait();
                let guard = map.guard();
                for key in (t..KEYS).step_by(threads) {
                    map.insert(key, key, &guard);
                }
            });
        }
    });

    assert!(map.capacity() > 2);
    assert_eq!(map.len(), KEYS);

    let guard = map.guard();
    for key in 0..KEYS {
        assert_eq!(map.get(&key, &guard), Some(&key));
    }
}

// A sweep removes even values while another thread pours new ones in. The
// preloaded entries were all inserted before the sweep began, so none may
// survive it; a final quiescent sweep clears the stragglers.
#[test]
fn retain_racing_inserts() {
    const PRELOADED: usize = 10_000;

    let map: HashMap<usize, usize> = HashMap::new();

    {
        let guard = map.guard();
        for key in 0..PRELOADED {
            map.insert(key, key * 2, &guard);
        }
    }

    let barrier = Barrier::new(2);

    thread::scope(|s| {
        s.spawn(|| {
            barrier.wait();
            map.retain(|_, &v| v % 2 != 0, &map.guard());
        });

        s.spawn(|| {
            barrier.wait();
            let guard = map.guard();
            for key in PRELOADED..2 * PRELOADED {
                map.insert(key, key * 2, &guard);
            }
        });
    });

    {
        let guard = map.guard();
        for key in 0..PRELOADED {
            assert!(map.get(&key, &guard).is_none(), "key {key} survived the sweep");
        }
    }

    // Entries inserted during the sweep may have been missed; a quiescent
    // sweep observes exactly the live set.
    map.retain(|_, &v| v % 2 != 0, &map.guard());

    assert_eq!(map.len(), 0);
    assert_eq!(map.iter(&map.guard()).count(), 0);
}

// The canonical key instance returned by the set's interning operation is
// shared between all threads.
#[test]
fn find_or_store_identity() {
    const KEYS: usize = 64;

    let set: HashSet<String> = HashSet::new();
    let threads = threads();
    let barrier = Barrier::new(threads);
    let canonical: Vec<AtomicUsize> = (0..KEYS).map(|_| AtomicUsize::new(0)).collect();

    thread::scope(|s| {
        for _ in 0..threads {
            let set = &set;
            let barrier = &barrier;
            let canonical = &canonical;
            s.spawn(move || {
                barrier.wait();
                let guard = set.guard();
                for key in 0..KEYS {
                    let resident = set.get_or_insert(key.to_string(), &guard);
                    let addr = resident as *const String as usize;

                    // The first thread to store the key publishes its
                    // address; everyone else must observe the same instance.
                    match canonical[key].compare_exchange(
                        0,
                        addr,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => {}
                        Err(first) => assert_eq!(first, addr, "key {key} was stored twice"),
                    }
                }
            });
        }
    });

    assert_eq!(set.len(), KEYS);
}

// Clears race inserts; the map must stay internally consistent and remain
// usable afterwards.
#[test]
fn clear_racing_inserts() {
    const KEYS: usize = 4_096;

    let map: HashMap<usize, usize> = HashMap::new();
    let barrier = Barrier::new(3);

    thread::scope(|s| {
        for _ in 0..2 {
            let map = &map;
            let barrier = &barrier;
            s.spawn(move || {
                barrier.wait();
                let guard = map.guard();
                for key in 0..KEYS {
                    map.insert(key, key, &guard);
                }
            });
        }

        s.spawn(|| {
            barrier.wait();
            for _ in 0..64 {
                map.clear(&map.guard());
            }
        });
    });

    // At quiescence the length estimate and the table contents agree.
    let guard = map.guard();
    let live = map.iter(&guard).count();
    assert_eq!(map.len(), live);

    for (key, value) in map.iter(&guard) {
        assert_eq!(key, value);
        assert_eq!(map.get(key, &guard), Some(value));
    }

    // The map is still usable.
    map.insert(KEYS, KEYS, &guard);
    assert_eq!(map.get(&KEYS, &guard), Some(&KEYS));
}

// Heap-allocated values are overwritten and removed under contention,
// exercising deferred reclamation through table migrations.
#[test]
fn overwrite_strings() {
    const KEYS: usize = 512;
    const ITERATIONS: usize = 32;

    let map: HashMap<usize, String> = HashMap::with_capacity(16);
    let threads = threads();
    let barrier = Barrier::new(threads);

    thread::scope(|s| {
        for t in 0..threads {
            let map = &map;
            let barrier = &barrier;
            s.spawn(move || {
                barrier.wait();
                let guard = map.guard();
                for i in 0..ITERATIONS {
                    for key in 0..KEYS {
                        if (key + i + t) % 7 == 0 {
                            map.remove(&key, &guard);
                        } else {
                            map.insert(key, format!("{t}:{key}"), &guard);
                        }
                    }
                }
            });
        }
    });

    let guard = map.guard();
    for key in 0..KEYS {
        if let Some(value) = map.get(&key, &guard) {
            let (_, stored) = value.split_once(':').expect("malformed value");
            assert_eq!(stored.parse::<usize>().unwrap(), key);
        }
    }
}

// Random mixed operations, verified against quiescent invariants.
#[test]
fn random_operations() {
    const KEYS: usize = 1_024;
    const OPERATIONS: usize = 50_000;

    with_map::<usize, usize>(|map| {
        let map = map();
        let threads = threads();
        let barrier = Barrier::new(threads);

        thread::scope(|s| {
            for _ in 0..threads {
                let map = &map;
                let barrier = &barrier;
                s.spawn(move || {
                    let mut rng = rand::thread_rng();
                    barrier.wait();

                    let guard = map.guard();
                    for _ in 0..OPERATIONS {
                        let key = rng.gen_range(0..KEYS);
                        match rng.gen_range(0..4) {
                            0 => {
                                map.insert(key, key, &guard);
                            }
                            1 => {
                                map.remove(&key, &guard);
                            }
                            2 => {
                                let _ = map.compare_and_swap(key, &key, key, &guard);
                            }
                            _ => {
                                if let Some(&value) = map.get(&key, &guard) {
                                    assert_eq!(value, key);
                                }
                            }
                        }
                    }
                });
            }
        });

        // Every surviving binding is intact and the estimate matches the
        // table contents.
        let guard = map.guard();
        let mut live = 0;
        for (key, value) in map.iter(&guard) {
            assert_eq!(key, value);
            live += 1;
        }

        assert_eq!(map.len(), live);
    });
}

// Removals race lookups on a shared key set; a reader may see a key or
// miss it, but never observe an inconsistent value.
#[test]
fn remove_racing_get() {
    const KEYS: usize = 4_096;

    with_map::<usize, usize>(|map| {
        let map = map();
        {
            let guard = map.guard();
            for key in 0..KEYS {
                map.insert(key, key + 1, &guard);
            }
        }

        let barrier = Barrier::new(2);

        thread::scope(|s| {
            s.spawn(|| {
                barrier.wait();
                let guard = map.guard();
                for key in 0..KEYS {
                    assert_eq!(map.remove(&key, &guard), Some(&(key + 1)));
                }
            });

            s.spawn(|| {
                barrier.wait();
                let guard = map.guard();
                for key in 0..KEYS {
                    if let Some(&value) = map.get(&key, &guard) {
                        assert_eq!(value, key + 1);
                    }
                }
            });
        });

        assert_eq!(map.len(), 0);
    });
}
