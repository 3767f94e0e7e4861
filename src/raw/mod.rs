mod alloc;
mod probe;
mod utils;

use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::sync::atomic::{self, AtomicPtr, Ordering};
use std::sync::Arc;
use std::time::Duration;
use std::{hint, ptr, thread};

use self::alloc::{RawTable, Table};
use self::probe::Probe;
use self::utils::{Counter, PointerExt, Tagged};
use crate::Equivalent;

use seize::{Collector, Guard, LocalGuard, OwnedGuard};

/// The maximum capacity of a table.
pub const MAX_CAPACITY: usize = 1 << 26;

// The capacity of a table allocated through `HashMap::new`.
const DEFAULT_CAPACITY: usize = 32;

// A lock-free hash map.
pub struct HashMap<K, V, S> {
    // A pointer to the current root table.
    table: AtomicPtr<RawTable>,

    // Collector for memory reclamation.
    collector: Collector,

    // The hasher for keys.
    pub hasher: S,

    // The capacity of the replacement table installed by `clear`.
    initial_capacity: usize,

    _kv: PhantomData<(K, V)>,
}

// An entry in the hash map.
//
// The value is only initialized for live entries. Tombstones keep the key
// so the identity of a slot survives deletion, but never touch the value.
#[repr(C, align(8))]
pub struct Entry<K, V> {
    pub key: K,
    pub value: MaybeUninit<V>,
}

// Entry pointer tag bits.
//
// An entry pointer moves through a fixed life-cycle:
//
// ```text
// null -> live/tombstone -> (live <-> tombstone)* -> prime -> dead
// ```
//
// Once a slot is primed the only successor state is the dead sentinel, and
// once dead the slot is frozen.

// The entry is logically deleted. The key is initialized, the value is not.
const TOMBSTONE: usize = 0b001;

// The entry is mid-copy to the successor table. Readers and writers must
// consult the successor for the authoritative binding.
const PRIME: usize = 0b010;

// The entry was installed into this table by the copy protocol and may still
// be reachable through the predecessor's prime. Only affects reclamation.
const BORROWED: usize = 0b100;

// Mask covering all entry tag bits.
const TAG_MASK: usize = TOMBSTONE | PRIME | BORROWED;

// Splits a stored entry word into its tagged halves.
#[inline]
fn unpack<K, V>(raw: *mut Entry<K, V>) -> Tagged<Entry<K, V>> {
    Tagged::split(raw, TAG_MASK)
}

// The sentinel installed in a slot once its migration has completed.
//
// There is a single sentinel reference for the whole process; comparisons
// are by address and the pointee is never read. The alignment keeps the
// pointer's tag bits clear.
#[repr(align(8))]
struct Dead;

static DEAD: Dead = Dead;

#[inline]
fn dead<K, V>() -> *mut Entry<K, V> {
    (&DEAD as *const Dead).cast_mut().cast()
}

#[inline]
fn is_dead<K, V>(entry: *mut Entry<K, V>) -> bool {
    entry == dead()
}

// The raw result of an insert operation.
pub enum InsertResult<'g, K, V> {
    // Inserted the entry; there was no live binding for the key.
    Inserted(&'g Entry<K, V>),

    // Replaced a live binding.
    Replaced(&'g Entry<K, V>),

    // A live binding exists and replacement was not requested.
    Error {
        current: &'g Entry<K, V>,
        not_inserted: Box<Entry<K, V>>,
    },
}

// The raw result of a conditional replace.
pub enum ReplaceResult<'g, K, V> {
    // Replaced the live binding.
    Replaced(&'g Entry<K, V>),

    // The resident value failed the predicate, or there is no live binding.
    Mismatch {
        current: Option<&'g Entry<K, V>>,
        not_replaced: Box<Entry<K, V>>,
    },
}

impl<K, V, S> HashMap<K, V, S> {
    /// Creates a map with the given capacity, hasher, and collector.
    ///
    /// A capacity of zero falls back to the default. Panics if the capacity
    /// exceeds [`MAX_CAPACITY`].
    pub fn new(capacity: usize, hasher: S, collector: Collector) -> HashMap<K, V, S> {
        assert!(
            capacity <= MAX_CAPACITY,
            "capacity must be at most 2^26 entries"
        );

        let capacity = match capacity {
            0 => DEFAULT_CAPACITY,
            capacity => capacity.next_power_of_two(),
        };

        let table = Table::<Entry<K, V>>::alloc(capacity, Arc::new(Counter::default()), 0);

        HashMap {
            table: AtomicPtr::new(table.raw),
            collector,
            hasher,
            initial_capacity: capacity,
            _kv: PhantomData,
        }
    }

    /// Returns a guard for use with this map.
    #[inline]
    pub fn guard(&self) -> LocalGuard<'_> {
        self.collector.enter()
    }

    /// Returns an owned guard for use with this map.
    #[inline]
    pub fn owned_guard(&self) -> OwnedGuard<'_> {
        self.collector.enter_owned()
    }

    /// Returns a reference to the collector.
    #[inline]
    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    /// Returns the approximate number of live entries in the map.
    #[inline]
    pub fn len(&self) -> usize {
        let guard = self.collector.enter();
        self.root(&guard).state().size.sum()
    }

    /// Returns the capacity of the current table, or of the in-progress
    /// successor if a resize is underway.
    #[inline]
    pub fn capacity(&self) -> usize {
        let guard = self.collector.enter();
        let table = self.root(&guard);

        match table.next_table() {
            Some(next) => next.len(),
            None => table.len(),
        }
    }

    // Returns a reference to the root table.
    #[inline]
    fn root(&self, guard: &impl Guard) -> Table<Entry<K, V>> {
        assert_eq!(
            *guard.collector(),
            self.collector,
            "attempted to access map with incorrect guard"
        );

        let raw = guard.protect(&self.table, Ordering::Acquire);

        // Safety: The root pointer always refers to a valid table allocation.
        unsafe { Table::from_raw(raw) }
    }
}

impl<K, V, S> HashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    // Returns the normalized hash for a key.
    #[inline]
    fn hash<Q: Hash + ?Sized>(&self, key: &Q) -> u32 {
        normalize(self.hasher.hash_one(key))
    }

    /// Returns the entry for the given key.
    #[inline]
    pub fn get<'g, Q>(&self, key: &Q, guard: &'g impl Guard) -> Option<&'g Entry<K, V>>
    where
        Q: Equivalent<K> + Hash + ?Sized,
    {
        let h = self.hash(key);
        let mut table = self.root(guard);

        'table: loop {
            let mut probe = Probe::start(h as usize, table.mask);

            while probe.len <= table.limit {
                // Safety: `probe.i` is always in-bounds for the table length.
                let hash = unsafe { table.hash(probe.i) }.load(Ordering::Acquire);

                // The slot was never claimed, so the key is not in this
                // table. During a resize it may have been written directly
                // into the successor.
                if hash == 0 {
                    match table.next_table() {
                        Some(next) => {
                            table = next;
                            continue 'table;
                        }
                        None => return None,
                    }
                }

                if hash == h {
                    let entry =
                        unpack(guard.protect(unsafe { table.entry(probe.i) }, Ordering::Acquire));

                    // A retired slot may have held a key that collides with
                    // ours, so it cannot end the search. Terminal probes
                    // descend into the successor.
                    //
                    // A null payload means the first write to the slot is
                    // still in flight, so there is no visible binding.
                    if is_dead(entry.raw) || entry.raw.is_null() {
                        probe.next(table.mask);
                        continue;
                    }

                    // Safety: We performed a protected load of the pointer
                    // and verified it is neither null nor the sentinel, so it
                    // is valid for reads as long as we hold the guard.
                    if key.equivalent(unsafe { &(*entry.ptr).key }) {
                        // The key was deleted.
                        if entry.tag() & TOMBSTONE != 0 {
                            return None;
                        }

                        // The binding is mid-copy. The successor may hold a
                        // newer value, so finish this slot's migration and
                        // read the authoritative answer there.
                        if entry.tag() & PRIME != 0 {
                            let next = table.next_table().unwrap();
                            self.help_copy_slot(probe.i, table, next, guard);
                            table = next;
                            continue 'table;
                        }

                        // Safety: Live entries have an initialized value.
                        return Some(unsafe { &*entry.ptr });
                    }
                }

                probe.next(table.mask);
            }

            // Ran out of probes; the binding can only be in the successor.
            match table.next_table() {
                Some(next) => table = next,
                None => return None,
            }
        }
    }

    /// Inserts an entry into the map.
    ///
    /// If `replace` is false and a live binding exists, the insert fails and
    /// returns the resident entry.
    #[inline]
    pub fn insert<'g>(
        &self,
        key: K,
        value: V,
        replace: bool,
        guard: &'g impl Guard,
    ) -> InsertResult<'g, K, V> {
        let new = Tagged::plain(Box::into_raw(Box::new(Entry {
            key,
            value: MaybeUninit::new(value),
        })));

        // Safety: `new` was allocated above and is never shared.
        let h = self.hash(unsafe { &(*new.ptr).key });

        let mut table = self.root(guard);
        let mut help_copy = true;

        'table: loop {
            let mut probe = Probe::start(h as usize, table.mask);
            let mut passed_dead = false;

            'probe: while probe.len <= table.limit {
                // Safety: `probe.i` is always in-bounds for the table length.
                let hash = unsafe { table.hash(probe.i) }.load(Ordering::Acquire);

                if hash == 0 {
                    // Part of this probe chain was already migrated, so a
                    // fresh claim here could be missed by the copy. Continue
                    // in the successor instead.
                    if passed_dead {
                        break 'probe;
                    }

                    // Claim the slot for this hash. The hash word is
                    // monotone: it is never modified once claimed.
                    match unsafe { table.hash(probe.i) }.compare_exchange(
                        0,
                        h,
                        Ordering::Release,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => {
                            table.state().slots.fetch_add(1, Ordering::Relaxed);
                        }

                        // Another writer claimed the same hash; the slot may
                        // still end up bound to our key.
                        Err(found) if found == h => {}

                        // Claimed by a colliding hash, keep probing.
                        Err(_) => {
                            probe.next(table.mask);
                            continue 'probe;
                        }
                    }
                } else if hash != h {
                    probe.next(table.mask);
                    continue 'probe;
                }

                let mut entry =
                    unpack(guard.protect(unsafe { table.entry(probe.i) }, Ordering::Acquire));

                loop {
                    // The slot was retired. It may have held a colliding key,
                    // so the probe chain continues, but fresh claims beyond
                    // this point are off-limits.
                    if is_dead(entry.raw) {
                        passed_dead = true;
                        probe.next(table.mask);
                        continue 'probe;
                    }

                    // The slot has no binding yet; the first installed entry
                    // decides which key it belongs to.
                    if entry.raw.is_null() {
                        if passed_dead {
                            break 'probe;
                        }

                        match unsafe { table.entry(probe.i) }.compare_exchange(
                            ptr::null_mut(),
                            new.raw,
                            Ordering::Release,
                            Ordering::Acquire,
                        ) {
                            Ok(_) => {
                                table.state().size.get(guard).fetch_add(1, Ordering::Relaxed);

                                // Safety: `new` is now in the table and valid
                                // for reads while the guard is held.
                                return InsertResult::Inserted(unsafe { &*new.ptr });
                            }
                            Err(found) => {
                                entry = unpack(found);
                                continue;
                            }
                        }
                    }

                    // Safety: Non-null, not the sentinel, protected load.
                    if unsafe { (*new.ptr).key != (*entry.ptr).key } {
                        probe.next(table.mask);
                        continue 'probe;
                    }

                    // The binding is mid-copy; finish this slot's migration
                    // and race for the latest value in the successor.
                    if entry.tag() & PRIME != 0 {
                        let next = table.next_table().unwrap();
                        self.help_copy_slot(probe.i, table, next, guard);
                        break 'probe;
                    }

                    // A live binding exists and we were asked to keep it.
                    if entry.tag() & TOMBSTONE == 0 && !replace {
                        return InsertResult::Error {
                            // Safety: The resident is live and protected.
                            current: unsafe { &*entry.ptr },
                            // Safety: `new` never made it into the table.
                            not_inserted: unsafe { Box::from_raw(new.ptr) },
                        };
                    }

                    // Replace the resident entry.
                    match unsafe { table.entry(probe.i) }.compare_exchange(
                        entry.raw,
                        new.raw,
                        Ordering::Release,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => {
                            if entry.tag() & TOMBSTONE != 0 {
                                // Revived a deleted slot.
                                table.state().size.get(guard).fetch_add(1, Ordering::Relaxed);

                                // Safety: The tombstone is now unreachable,
                                // and tombstones are never mirrored.
                                unsafe {
                                    guard.defer_retire(entry.ptr, reclaim_tombstone::<K, V>)
                                };

                                return InsertResult::Inserted(unsafe { &*new.ptr });
                            }

                            // Safety: The entry was just unlinked from this
                            // table by the CAS above.
                            unsafe { self.defer_retire(entry, table, guard) };

                            // Safety: The previous entry stays valid for
                            // reads while the guard is held.
                            return InsertResult::Replaced(unsafe { &*entry.ptr });
                        }
                        Err(found) => {
                            entry = unpack(found);
                            continue;
                        }
                    }
                }
            }

            // Went past the probe limit, or the chain was migrated from
            // under us: continue in the successor, creating it if necessary.
            table = self.prepare_retry(&mut help_copy, table, guard);
        }
    }

    /// Replaces the value for a key, but only while the resident live value
    /// satisfies the predicate.
    ///
    /// The predicate is re-evaluated whenever the replacement loses a race.
    #[inline]
    pub fn replace_if<'g, F>(
        &self,
        key: K,
        value: V,
        mut should_replace: F,
        guard: &'g impl Guard,
    ) -> ReplaceResult<'g, K, V>
    where
        F: FnMut(&V) -> bool,
    {
        let new = Tagged::plain(Box::into_raw(Box::new(Entry {
            key,
            value: MaybeUninit::new(value),
        })));

        // Safety: `new` was allocated above and is never shared.
        let h = self.hash(unsafe { &(*new.ptr).key });

        let mut table = self.root(guard);
        let mut help_copy = true;

        'table: loop {
            let mut probe = Probe::start(h as usize, table.mask);
            let mut passed_dead = false;

            'probe: while probe.len <= table.limit {
                // Safety: `probe.i` is always in-bounds for the table length.
                let hash = unsafe { table.hash(probe.i) }.load(Ordering::Acquire);

                // A conditional replace of an absent key fails without
                // claiming the slot.
                if hash == 0 {
                    if passed_dead {
                        break 'probe;
                    }

                    return self.mismatch(new, None);
                }

                if hash != h {
                    probe.next(table.mask);
                    continue 'probe;
                }

                let mut entry =
                    unpack(guard.protect(unsafe { table.entry(probe.i) }, Ordering::Acquire));

                loop {
                    if is_dead(entry.raw) {
                        passed_dead = true;
                        probe.next(table.mask);
                        continue 'probe;
                    }

                    // No visible binding yet.
                    if entry.raw.is_null() {
                        probe.next(table.mask);
                        continue 'probe;
                    }

                    // Safety: Non-null, not the sentinel, protected load.
                    if unsafe { (*new.ptr).key != (*entry.ptr).key } {
                        probe.next(table.mask);
                        continue 'probe;
                    }

                    if entry.tag() & PRIME != 0 {
                        let next = table.next_table().unwrap();
                        self.help_copy_slot(probe.i, table, next, guard);
                        break 'probe;
                    }

                    // The key was deleted; there is no live value to match.
                    if entry.tag() & TOMBSTONE != 0 {
                        return self.mismatch(new, None);
                    }

                    // Safety: Live entries have an initialized value.
                    if !should_replace(unsafe { (*entry.ptr).value.assume_init_ref() }) {
                        return self.mismatch(new, Some(unsafe { &*entry.ptr }));
                    }

                    match unsafe { table.entry(probe.i) }.compare_exchange(
                        entry.raw,
                        new.raw,
                        Ordering::Release,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => {
                            // Safety: The entry was just unlinked from this
                            // table by the CAS above.
                            unsafe { self.defer_retire(entry, table, guard) };

                            return ReplaceResult::Replaced(unsafe { &*entry.ptr });
                        }
                        Err(found) => {
                            entry = unpack(found);
                            continue;
                        }
                    }
                }
            }

            // The binding, if any, can only be in the successor.
            match table.next_table() {
                Some(next) => {
                    if help_copy {
                        help_copy = false;
                        self.help_copy(guard);
                    }

                    table = next;
                }
                None => return self.mismatch(new, None),
            }
        }
    }

    // Reclaims the unused replacement entry and reports a mismatch.
    #[inline]
    fn mismatch<'g>(
        &self,
        new: Tagged<Entry<K, V>>,
        current: Option<&'g Entry<K, V>>,
    ) -> ReplaceResult<'g, K, V> {
        ReplaceResult::Mismatch {
            current,
            // Safety: `new` never made it into the table.
            not_replaced: unsafe { Box::from_raw(new.ptr) },
        }
    }

    /// Removes a key from the map, returning the entry for the key if it was
    /// previously live.
    #[inline]
    pub fn remove<'g, Q>(&self, key: &Q, guard: &'g impl Guard) -> Option<&'g Entry<K, V>>
    where
        Q: Equivalent<K> + Hash + ?Sized,
        K: Clone,
    {
        let h = self.hash(key);
        let mut table = self.root(guard);
        let mut help_copy = true;

        // The deletion marker is allocated lazily: a remove of an absent key
        // never claims a slot.
        let mut tombstone: *mut Entry<K, V> = ptr::null_mut();

        'table: loop {
            let mut probe = Probe::start(h as usize, table.mask);
            let mut passed_dead = false;

            'probe: while probe.len <= table.limit {
                // Safety: `probe.i` is always in-bounds for the table length.
                let hash = unsafe { table.hash(probe.i) }.load(Ordering::Acquire);

                if hash == 0 {
                    if passed_dead {
                        break 'probe;
                    }

                    return self.finish_remove(tombstone, None);
                }

                if hash != h {
                    probe.next(table.mask);
                    continue 'probe;
                }

                let mut entry =
                    unpack(guard.protect(unsafe { table.entry(probe.i) }, Ordering::Acquire));

                loop {
                    if is_dead(entry.raw) {
                        passed_dead = true;
                        probe.next(table.mask);
                        continue 'probe;
                    }

                    // No visible binding yet.
                    if entry.raw.is_null() {
                        probe.next(table.mask);
                        continue 'probe;
                    }

                    // Safety: Non-null, not the sentinel, protected load.
                    if !key.equivalent(unsafe { &(*entry.ptr).key }) {
                        probe.next(table.mask);
                        continue 'probe;
                    }

                    if entry.tag() & PRIME != 0 {
                        let next = table.next_table().unwrap();
                        self.help_copy_slot(probe.i, table, next, guard);
                        break 'probe;
                    }

                    // Already deleted.
                    if entry.tag() & TOMBSTONE != 0 {
                        return self.finish_remove(tombstone, None);
                    }

                    if tombstone.is_null() {
                        // The marker carries its own copy of the key so the
                        // slot's identity survives the deletion.
                        let key = unsafe { (*entry.ptr).key.clone() };

                        tombstone = Box::into_raw(Box::new(Entry {
                            key,
                            value: MaybeUninit::uninit(),
                        }))
                        .map_addr(|addr| addr | TOMBSTONE);
                    }

                    match unsafe { table.entry(probe.i) }.compare_exchange(
                        entry.raw,
                        tombstone,
                        Ordering::Release,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => {
                            table.state().size.get(guard).fetch_sub(1, Ordering::Relaxed);

                            // Safety: The entry was just unlinked from this
                            // table by the CAS above.
                            unsafe { self.defer_retire(entry, table, guard) };

                            // Safety: The previous entry stays valid for
                            // reads while the guard is held.
                            return Some(unsafe { &*entry.ptr });
                        }
                        Err(found) => {
                            entry = unpack(found);
                            continue;
                        }
                    }
                }
            }

            // The binding, if any, can only be in the successor.
            match table.next_table() {
                Some(next) => {
                    if help_copy {
                        help_copy = false;
                        self.help_copy(guard);
                    }

                    table = next;
                }
                None => return self.finish_remove(tombstone, None),
            }
        }
    }

    // Reclaims an unused deletion marker before reporting a miss.
    #[inline]
    fn finish_remove<'g>(
        &self,
        tombstone: *mut Entry<K, V>,
        result: Option<&'g Entry<K, V>>,
    ) -> Option<&'g Entry<K, V>> {
        if !tombstone.is_null() {
            // Safety: The marker never made it into the table.
            let _ = unsafe { Box::from_raw(tombstone.map_addr(|addr| addr & !TAG_MASK)) };
        }

        result
    }

    /// Retains only the entries specified by the predicate.
    ///
    /// The predicate may be re-evaluated for a key whose value is
    /// concurrently modified.
    #[inline]
    pub fn retain<F>(&self, mut f: F, guard: &impl Guard)
    where
        F: FnMut(&K, &V) -> bool,
        K: Clone,
    {
        let mut table = self.root(guard);

        loop {
            let mut removed = 0;

            'slot: for i in 0..table.len() {
                // Safety: `i` is in-bounds for the table length.
                let mut entry =
                    unpack(guard.protect(unsafe { table.entry(i) }, Ordering::Acquire));

                loop {
                    if entry.raw.is_null() || is_dead(entry.raw) {
                        continue 'slot;
                    }

                    if entry.tag() & TOMBSTONE != 0 {
                        continue 'slot;
                    }

                    // Finish the slot's migration; the sweep revisits the
                    // binding when it reaches the successor.
                    if entry.tag() & PRIME != 0 {
                        let next = table.next_table().unwrap();
                        self.help_copy_slot(i, table, next, guard);
                        continue 'slot;
                    }

                    // Safety: The entry is live and protected.
                    let (key, value) =
                        unsafe { (&(*entry.ptr).key, (*entry.ptr).value.assume_init_ref()) };

                    if f(key, value) {
                        continue 'slot;
                    }

                    let tombstone = Box::into_raw(Box::new(Entry {
                        key: key.clone(),
                        value: MaybeUninit::uninit(),
                    }))
                    .map_addr(|addr| addr | TOMBSTONE);

                    match unsafe { table.entry(i) }.compare_exchange(
                        entry.raw,
                        tombstone,
                        Ordering::Release,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => {
                            table.state().size.get(guard).fetch_sub(1, Ordering::Relaxed);
                            removed += 1;

                            // Safety: The entry was just unlinked from this
                            // table by the CAS above.
                            unsafe { self.defer_retire(entry, table, guard) };
                            continue 'slot;
                        }
                        Err(found) => {
                            // Safety: The marker never made it into the table.
                            let _ = unsafe {
                                Box::from_raw(tombstone.map_addr(|addr| addr & !TAG_MASK))
                            };

                            // Re-evaluate against the new resident.
                            entry = unpack(found);
                        }
                    }
                }
            }

            // A sweep that removed a large share of the table leaves it
            // tombstone-heavy; migrate eagerly.
            if removed > table.len() >> 4 || removed > table.state().size.sum() >> 2 {
                self.get_or_alloc_next(table);
                self.help_copy(guard);
            }

            match table.next_table() {
                Some(next) => table = next,
                None => break,
            }
        }
    }

    /// Removes all entries by swapping in a fresh table of the original
    /// initial capacity.
    ///
    /// In-flight operations on the abandoned tables complete against them;
    /// the chain is reclaimed once all current readers move on.
    #[inline]
    pub fn clear(&self, guard: &impl Guard) {
        assert_eq!(
            *guard.collector(),
            self.collector,
            "attempted to access map with incorrect guard"
        );

        let table =
            Table::<Entry<K, V>>::alloc(self.initial_capacity, Arc::new(Counter::default()), 0);

        // The replacement must be fully initialized before it can be
        // observed.
        atomic::fence(Ordering::SeqCst);

        let old = self.table.swap(table.raw, Ordering::SeqCst);

        // Safety: The old chain is unreachable for any guard created after
        // the swap, and is reclaimed as a whole once current readers leave.
        unsafe { guard.defer_retire(old, reclaim_chain::<K, V>) };
    }

    /// Returns an iterator over the entries of the map.
    ///
    /// The iterator is a forward cursor that follows table migrations
    /// without restarting; it carries no snapshot guarantee.
    #[inline]
    pub fn iter<'g, G>(&'g self, guard: &'g G) -> Iter<'g, K, V, S, G>
    where
        G: Guard,
    {
        Iter {
            map: self,
            table: self.root(guard),
            i: 0,
            guard,
        }
    }
}

// Resize operations.
impl<K, V, S> HashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    // Prepare to retry a write in the successor table, creating it if
    // necessary.
    #[cold]
    #[inline(never)]
    fn prepare_retry(
        &self,
        help_copy: &mut bool,
        table: Table<Entry<K, V>>,
        guard: &impl Guard,
    ) -> Table<Entry<K, V>> {
        let next = self.get_or_alloc_next(table);

        // Contribute a chunk of copying work once per operation, keeping
        // latency consistent.
        if *help_copy {
            *help_copy = false;
            self.help_copy(guard);
        }

        next
    }

    // Returns the successor table, allocating it if it has not yet been
    // created.
    #[cold]
    #[inline(never)]
    fn get_or_alloc_next(&self, table: Table<Entry<K, V>>) -> Table<Entry<K, V>> {
        if let Some(next) = table.next_table() {
            return next;
        }

        let state = table.state();
        let capacity = table.len();
        let size = state.size.sum();

        // Baseline the new capacity on the live density.
        let mut new_cap = if size >= capacity / 4 * 3 {
            size * 8
        } else if size >= capacity / 2 {
            size * 4
        } else if size >= capacity / 4 {
            size * 2
        } else {
            size
        };

        // A table dominated by tombstones is rebuilt at double the capacity
        // rather than sized by its live count.
        if state.slots.load(Ordering::Relaxed) >= 2 * size {
            new_cap = capacity * 2;
        }

        // Never shrink.
        if new_cap < capacity {
            new_cap = capacity;
        }

        // A table born with the live count it still has suggests resizes are
        // thrashing without making progress.
        if size == state.prev_size {
            new_cap *= 2;
        }

        let new_cap = new_cap.next_power_of_two();
        assert!(
            new_cap <= isize::MAX as usize,
            "`HashMap` exceeded maximum capacity"
        );

        // Damp the allocation storm when many threads race to grow a large
        // table at once: losers spin, then sleep in bounded steps, adopting
        // the winner's table as soon as it appears.
        let resizers = state.resizers.fetch_add(1, Ordering::Relaxed) + 1;

        if new_cap >> 18 != 0 && resizers > 2 {
            for spun in 0..7 {
                for _ in 0..(spun * spun) {
                    hint::spin_loop();
                }

                if let Some(next) = table.next_table() {
                    return next;
                }
            }

            let budget = ((new_cap >> 18) as u64).saturating_mul(resizers as u64).min(128);
            let mut slept = 0;

            while slept < budget {
                if let Some(next) = table.next_table() {
                    return next;
                }

                thread::sleep(Duration::from_millis(1));
                slept += 1;
            }
        }

        // Allocate and race to install the table. The successor inherits the
        // live counter, so the count survives the migration.
        let next = Table::alloc(new_cap, Arc::clone(&state.size), size);

        match state.next.compare_exchange(
            ptr::null_mut(),
            next.raw,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => next,
            Err(winner) => {
                // Safety: Allocated above and never shared.
                unsafe { Table::dealloc(next) };

                // Safety: The winner was installed by another thread and
                // lives at least as long as this table is reachable.
                unsafe { Table::from_raw(winner) }
            }
        }
    }

    // Contribute a chunk of copying work to the resize of the root table.
    #[cold]
    #[inline(never)]
    fn help_copy(&self, guard: &impl Guard) {
        // Always help the highest priority, root, copy.
        let table = self.root(guard);

        let Some(next) = table.next_table() else {
            return;
        };

        let capacity = table.len();
        let state = table.state();

        // Claim a chunk of slots to migrate.
        let chunk = capacity.min(1024);
        let start = state.copy_idx.fetch_add(chunk, Ordering::Relaxed);

        if start >= capacity {
            // Every slot is claimed; make sure a completed copy is promoted.
            self.try_promote(table, next, 0, guard);
            return;
        }

        let mut copied = 0;
        for i in start..capacity.min(start + chunk) {
            // Safety: `i` is in-bounds for the table length.
            if self.copy_slot(i, table, next, guard) {
                copied += 1;
            }
        }

        self.try_promote(table, next, copied, guard);
    }

    // Migrate a single slot into the successor table, crediting the work
    // toward the table's promotion.
    fn help_copy_slot(
        &self,
        i: usize,
        table: Table<Entry<K, V>>,
        next: Table<Entry<K, V>>,
        guard: &impl Guard,
    ) {
        if self.copy_slot(i, table, next, guard) {
            self.try_promote(table, next, 1, guard);
        }
    }

    // Migrate the slot at the given index into the successor table.
    //
    // The migration is idempotent: any thread may invoke it for any slot.
    // Returns `true` if this call retired the slot.
    fn copy_slot(
        &self,
        i: usize,
        table: Table<Entry<K, V>>,
        next: Table<Entry<K, V>>,
        guard: &impl Guard,
    ) -> bool {
        // Safety: `i` is in-bounds for the table length.
        let slot = unsafe { table.entry(i) };
        let mut entry = unpack(slot.load(Ordering::Acquire));

        // Freeze the slot, committing its binding to migration.
        loop {
            // Already retired.
            if is_dead(entry.raw) {
                return false;
            }

            // Another thread committed the binding; help finish below.
            if entry.tag() & PRIME != 0 {
                break;
            }

            // Nothing was ever written; retire the slot outright.
            if entry.raw.is_null() {
                match slot.compare_exchange(
                    ptr::null_mut(),
                    dead(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return true,
                    Err(found) => {
                        entry = unpack(found);
                        continue;
                    }
                }
            }

            // A tombstone has no live value to migrate.
            if entry.tag() & TOMBSTONE != 0 {
                match slot.compare_exchange(entry.raw, dead(), Ordering::AcqRel, Ordering::Acquire)
                {
                    Ok(_) => {
                        // Safety: The tombstone is unreachable and was never
                        // mirrored into a successor.
                        unsafe { guard.defer_retire(entry.ptr, reclaim_tombstone::<K, V>) };
                        return true;
                    }
                    Err(found) => {
                        entry = unpack(found);
                        continue;
                    }
                }
            }

            // A live binding; mark it as mid-copy. Writers that observe the
            // prime redirect to the successor.
            match slot.compare_exchange(
                entry.raw,
                entry.raw.map_addr(|addr| addr | PRIME),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    entry = entry.with_tag(PRIME);
                    break;
                }
                Err(found) => entry = unpack(found),
            }
        }

        // Mirror the binding into the successor, unless a newer write got
        // there first. The mirror is marked borrowed: it stays reachable
        // through this slot's prime until the slot is retired, so writers
        // that unlink it from the successor must defer its reclamation.
        let borrowed = Tagged::plain(entry.ptr).with_tag(BORROWED);

        self.insert_copy(borrowed, slot, next, guard);

        // Retire the slot. The CAS only fails if another helper got here
        // first.
        slot.compare_exchange(entry.raw, dead(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    // Mirror a live entry into the successor table during migration.
    //
    // The mirror loses to any concurrent write: it only installs into an
    // empty payload and never replaces an entry for the key. It is also
    // only needed while the source slot remains primed; once the slot is
    // retired the binding has settled, and a straggling mirror could
    // otherwise resurrect a key that was deleted in the meantime.
    fn insert_copy(
        &self,
        new: Tagged<Entry<K, V>>,
        source: &AtomicPtr<Entry<K, V>>,
        table: Table<Entry<K, V>>,
        guard: &impl Guard,
    ) {
        // Safety: The caller's prime keeps the entry alive for reads.
        let key = unsafe { &(*new.ptr).key };
        let h = self.hash(key);

        let mut table = table;

        'table: loop {
            let mut probe = Probe::start(h as usize, table.mask);
            let mut passed_dead = false;

            'probe: while probe.len <= table.limit {
                // Safety: `probe.i` is always in-bounds for the table length.
                let hash = unsafe { table.hash(probe.i) }.load(Ordering::Acquire);

                if hash == 0 {
                    if passed_dead {
                        break 'probe;
                    }

                    match unsafe { table.hash(probe.i) }.compare_exchange(
                        0,
                        h,
                        Ordering::Release,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => {
                            table.state().slots.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(found) if found == h => {}
                        Err(_) => {
                            probe.next(table.mask);
                            continue 'probe;
                        }
                    }
                } else if hash != h {
                    probe.next(table.mask);
                    continue 'probe;
                }

                let mut entry =
                    unpack(guard.protect(unsafe { table.entry(probe.i) }, Ordering::Acquire));

                loop {
                    // The successor is itself being migrated onward.
                    if is_dead(entry.raw) {
                        passed_dead = true;
                        probe.next(table.mask);
                        continue 'probe;
                    }

                    if entry.raw.is_null() {
                        if passed_dead {
                            break 'probe;
                        }

                        // The source slot was retired by another helper, so
                        // the binding has already settled.
                        if is_dead(source.load(Ordering::Acquire)) {
                            return;
                        }

                        match unsafe { table.entry(probe.i) }.compare_exchange(
                            ptr::null_mut(),
                            new.raw,
                            Ordering::Release,
                            Ordering::Acquire,
                        ) {
                            Ok(_) => return,
                            Err(found) => {
                                entry = unpack(found);
                                continue;
                            }
                        }
                    }

                    // Safety: Non-null, not the sentinel, protected load.
                    if unsafe { *key == (*entry.ptr).key } {
                        // A newer write already owns this key; the mirror
                        // loses.
                        return;
                    }

                    probe.next(table.mask);
                    continue 'probe;
                }
            }

            // No room, or the chain has moved on: continue in the next
            // nested table.
            table = self.get_or_alloc_next(table);
        }
    }

    // Record copy progress and promote the successor to the root once the
    // table is fully migrated.
    //
    // Returns `true` if the copy is complete.
    fn try_promote(
        &self,
        table: Table<Entry<K, V>>,
        next: Table<Entry<K, V>>,
        copied: usize,
        guard: &impl Guard,
    ) -> bool {
        let state = table.state();

        let done = if copied > 0 {
            state.copy_done.fetch_add(copied, Ordering::AcqRel) + copied
        } else {
            state.copy_done.load(Ordering::Acquire)
        };

        if done < table.len() {
            return false;
        }

        let mut table = table;
        let mut next = next;

        loop {
            // Only the root may be promoted; a nested copy waits for its
            // parent to finish.
            let root = self.table.load(Ordering::Relaxed);
            if root != table.raw {
                break;
            }

            if self
                .table
                .compare_exchange(table.raw, next.raw, Ordering::Release, Ordering::Acquire)
                .is_err()
            {
                break;
            }

            // Safety: The old root was fully migrated and is now unreachable
            // from the root pointer; its slots are all retired.
            unsafe { guard.defer_retire(table.raw, reclaim_table::<K, V>) };

            // The successor may have finished its own copy while waiting on
            // this one; keep promoting.
            match next.next_table() {
                Some(nested) if next.state().copy_done.load(Ordering::Acquire) >= next.len() => {
                    table = next;
                    next = nested;
                }
                _ => break,
            }
        }

        true
    }

    // Retire an entry that was just unlinked from the given table.
    //
    // # Safety
    //
    // The entry must be unreachable from `table`, and must not be retired
    // twice.
    unsafe fn defer_retire(
        &self,
        entry: Tagged<Entry<K, V>>,
        table: Table<Entry<K, V>>,
        guard: &impl Guard,
    ) {
        if entry.tag() & BORROWED == 0 {
            // The entry is not reachable from any predecessor table.
            unsafe { guard.defer_retire(entry.ptr, reclaim_entry::<K, V>) };
            return;
        }

        let root = guard.protect(&self.table, Ordering::Acquire);

        // If our table, or any of its successors, is the root, every
        // predecessor holding a prime for this entry has been retired.
        let mut search = Some(table);
        while let Some(current) = search {
            if current.raw == root {
                unsafe { guard.defer_retire(entry.ptr, reclaim_entry::<K, V>) };
                return;
            }

            search = current.next_table();
        }

        // The table we were copied from may still reach the entry through
        // its prime; hand the entry over to be retired along with it.
        //
        // Safety: The root pointer always refers to a valid table allocation.
        let mut prev = unsafe { Table::<Entry<K, V>>::from_raw(root) };

        loop {
            let Some(next) = prev.next_table() else {
                // The chain was detached wholesale by `clear`, so no guard
                // newer than ours can reach the entry at all.
                unsafe { guard.defer_retire(entry.ptr, reclaim_entry::<K, V>) };
                return;
            };

            if next.raw == table.raw {
                prev.state().deferred.push(entry.ptr);
                return;
            }

            prev = next;
        }
    }
}

// An iterator over the entries of a map.
pub struct Iter<'g, K, V, S, G> {
    map: &'g HashMap<K, V, S>,
    table: Table<Entry<K, V>>,
    i: usize,
    guard: &'g G,
}

impl<'g, K, V, S, G> Iterator for Iter<'g, K, V, S, G>
where
    K: Hash + Eq,
    S: BuildHasher,
    G: Guard,
{
    type Item = &'g Entry<K, V>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        loop {
            // Finished this table; descend into the successor without
            // restarting. A key may be seen in both tables, or be missed
            // entirely if it moves behind the cursor.
            if self.i >= self.table.len() {
                match self.table.next_table() {
                    Some(next) => {
                        self.table = next;
                        self.i = 0;
                        continue;
                    }
                    None => return None,
                }
            }

            // Safety: `self.i` is in-bounds for the table length.
            let entry = unpack(
                self.guard
                    .protect(unsafe { self.table.entry(self.i) }, Ordering::Acquire),
            );

            if entry.raw.is_null() || is_dead(entry.raw) || entry.tag() & TOMBSTONE != 0 {
                self.i += 1;
                continue;
            }

            // Help the binding's migration along so the successor pass
            // observes it.
            if entry.tag() & PRIME != 0 {
                let next = self.table.next_table().unwrap();
                self.map.help_copy_slot(self.i, self.table, next, self.guard);
                self.i += 1;
                continue;
            }

            self.i += 1;

            // Safety: The entry is live and protected by the guard.
            return Some(unsafe { &*entry.ptr });
        }
    }
}

impl<K, V, S, G> Clone for Iter<'_, K, V, S, G> {
    fn clone(&self) -> Self {
        Iter {
            map: self.map,
            table: self.table,
            i: self.i,
            guard: self.guard,
        }
    }
}

// Safety: An iterator holds shared references to the map and guard, and
// yields references to entries protected by that guard.
unsafe impl<K, V, S, G> Send for Iter<'_, K, V, S, G>
where
    K: Send + Sync,
    V: Send + Sync,
    S: Sync,
    G: Sync,
{
}

unsafe impl<K, V, S, G> Sync for Iter<'_, K, V, S, G>
where
    K: Send + Sync,
    V: Send + Sync,
    S: Sync,
    G: Sync,
{
}

impl<K, V, S> Drop for HashMap<K, V, S> {
    fn drop(&mut self) {
        // Make sure all retired objects are reclaimed before the chain is
        // freed; reclamation callbacks may reference the collector.
        //
        // Safety: We hold a unique reference to the collector.
        unsafe { self.collector.reclaim_all() };

        // Safety: We hold the last reference to the map, and the chain is
        // not accessed after this call.
        unsafe { reclaim_chain::<K, V>(*self.table.get_mut(), &self.collector) };
    }
}

// Reclaim a live entry.
unsafe fn reclaim_entry<K, V>(entry: *mut Entry<K, V>, _collector: &Collector) {
    unsafe { drop_entry(entry) }
}

// Reclaim a tombstone. The value is never initialized.
unsafe fn reclaim_tombstone<K, V>(entry: *mut Entry<K, V>, _collector: &Collector) {
    let _ = unsafe { Box::from_raw(entry) };
}

// Drop a live entry, including its value.
unsafe fn drop_entry<K, V>(entry: *mut Entry<K, V>) {
    let mut entry = unsafe { Box::from_raw(entry) };

    // Safety: Live entries have an initialized value.
    unsafe { entry.value.assume_init_drop() };
}

// Reclaim a table whose slots were all migrated to its successor.
unsafe fn reclaim_table<K, V>(raw: *mut RawTable, collector: &Collector) {
    // Safety: The table was retired by promotion and is no longer
    // accessible.
    let mut table = unsafe { Table::<Entry<K, V>>::from_raw(raw) };

    // Entries that successors unlinked while this table could still reach
    // them through a prime are unreachable now as well.
    table
        .state_mut()
        .deferred
        .drain(|entry| unsafe { collector.retire(entry, reclaim_entry::<K, V>) });

    unsafe { Table::dealloc(table) };
}

// Reclaim a chain of tables abandoned by `clear`, or owned exclusively at
// drop, along with all of their entries.
unsafe fn reclaim_chain<K, V>(raw: *mut RawTable, _collector: &Collector) {
    let mut raw = raw;

    while !raw.is_null() {
        // Safety: The caller owns the chain; the root and successor pointers
        // are always valid table allocations or null.
        let mut table = unsafe { Table::<Entry<K, V>>::from_raw(raw) };
        let next = *table.state_mut().next.get_mut();

        for i in 0..table.len() {
            // Safety: `i` is in-bounds and the chain is unreachable.
            let entry = unpack(unsafe { table.entry(i) }.load(Ordering::Relaxed));

            if entry.raw.is_null() || is_dead(entry.raw) {
                continue;
            }

            // A primed entry is owned by the slot it was mirrored to in the
            // successor, and is dropped there or through the deferred stack.
            if entry.tag() & PRIME != 0 {
                continue;
            }

            if entry.tag() & TOMBSTONE != 0 {
                let _ = unsafe { Box::from_raw(entry.ptr) };
            } else {
                unsafe { drop_entry(entry.ptr) };
            }
        }

        // Entries unlinked from a successor while borrowed are referenced
        // only by a prime in this chain, so they are dropped here.
        table
            .state_mut()
            .deferred
            .drain(|entry| unsafe { drop_entry(entry) });

        // Safety: The table is not accessed after this call.
        unsafe { Table::dealloc(table) };

        raw = next;
    }
}

// Normalizes a user hash into the nonzero 32-bit space.
//
// A hash word of zero means the slot was never claimed, so hashes that fold
// to zero are remapped to a fixed substitute.
#[inline]
fn normalize(hash: u64) -> u32 {
    const SUBSTITUTE: u32 = 0x5555_5555;

    match (hash ^ (hash >> 32)) as u32 {
        0 => SUBSTITUTE,
        folded => folded,
    }
}
