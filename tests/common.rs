#![allow(dead_code)]

use jujube::{HashMap, HashSet};

// The number of threads to use for stress tests.
pub fn threads() -> usize {
    std::thread::available_parallelism()
        .map(Into::into)
        .unwrap_or(4)
        .clamp(4, 8)
}

// Run the test against maps with different initial capacities, exercising
// both the pre-sized path and the growth-heavy path.
pub fn with_map<K, V>(mut test: impl FnMut(&dyn Fn() -> HashMap<K, V>)) {
    // The default capacity.
    test(&HashMap::new);

    // A minimal table that must grow almost immediately.
    test(&(|| HashMap::with_capacity(1)));

    // A pre-sized table.
    test(&(|| HashMap::with_capacity(1 << 10)));
}

// Run the test against sets with different initial capacities.
pub fn with_set<K>(mut test: impl FnMut(&dyn Fn() -> HashSet<K>)) {
    test(&HashSet::new);
    test(&(|| HashSet::with_capacity(1)));
    test(&(|| HashSet::with_capacity(1 << 10)));
}
