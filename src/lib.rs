//! A lock-free concurrent hash map and set with cooperative incremental
//! resizing.
//!
//! Both [`HashMap`] and [`HashSet`] tolerate any number of concurrent
//! readers and writers without mutual exclusion. All coordination happens
//! through single-word atomic operations on the table's records, so no
//! operation ever blocks another, with the exception of a short bounded
//! back-off when many threads race to allocate a very large table.
//!
//! # Usage
//!
//! Operations that return references into the map require a [`Guard`],
//! which prevents the referenced entries from being reclaimed while it is
//! held. A guard can be acquired with [`HashMap::guard`], or managed
//! automatically with the [`HashMap::pin`] API:
//!
//! ```
//! use jujube::HashMap;
//!
//! let map = HashMap::new();
//!
//! // Pin the map, acquiring a guard internally.
//! let m = map.pin();
//! m.insert('a', 1);
//! assert_eq!(m.get(&'a'), Some(&1));
//!
//! // Or manage the guard explicitly.
//! let guard = map.guard();
//! assert_eq!(map.get(&'a', &guard), Some(&1));
//! ```
//!
//! Guards are inexpensive to create, but note that holding one pins any
//! values removed in the meantime, so long-lived operations should
//! periodically refresh their guard.
//!
//! # Consistency
//!
//! Single-key operations (`get`, `insert`, `try_insert`,
//! `compare_and_swap`, `remove`) are individually linearizable. Aggregates
//! and sweeps are not: [`HashMap::len`] is an estimate under concurrent
//! modification, and iteration is a best-effort traversal that may observe
//! a key twice, or not at all, if the table is resized mid-flight.
//!
//! When the table fills up it is migrated incrementally: every thread that
//! notices the resize copies a small chunk of entries to the new table
//! before continuing, so no single writer absorbs the whole migration
//! pause.

#![allow(unstable_name_collisions)]
#![deny(unsafe_op_in_unsafe_fn)]

mod map;
mod raw;
mod set;

pub use equivalent::Equivalent;
pub use map::{
    CompareAndSwapError, HashMap, HashMapBuilder, HashMapRef, Iter, Keys, OccupiedError, Values,
};
pub use seize::{Collector, Guard, LocalGuard, OwnedGuard};
pub use set::{HashSet, HashSetBuilder, HashSetRef, Iter as SetIter};
