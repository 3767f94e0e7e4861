use crate::raw::{self, InsertResult, ReplaceResult};
use crate::Equivalent;
use seize::{Collector, Guard, LocalGuard, OwnedGuard};

use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;

/// A concurrent hash map.
///
/// Most operations require a [`Guard`](crate::Guard), which can be acquired
/// through [`HashMap::guard`] or using the [`HashMap::pin`] API. See the
/// [crate-level documentation](crate#usage) for details.
pub struct HashMap<K, V, S = RandomState> {
    pub(crate) raw: raw::HashMap<K, V, S>,
}

// Safety: We only ever hand out `&K`/`&V` through shared references to the
// map, and never expose owned or mutable references to keys or values.
// Entries may be dropped by a different thread than the one that created
// them, so both `Send` and `Sync` are required of the contents.
unsafe impl<K, V, S> Send for HashMap<K, V, S>
where
    K: Send + Sync,
    V: Send + Sync,
    S: Send,
{
}

unsafe impl<K, V, S> Sync for HashMap<K, V, S>
where
    K: Send + Sync,
    V: Send + Sync,
    S: Sync,
{
}

/// A builder for a [`HashMap`].
///
/// # Examples
///
/// ```rust
/// use jujube::HashMap;
/// use seize::Collector;
/// use std::collections::hash_map::RandomState;
///
/// let map: HashMap<i32, i32> = HashMap::builder()
///     // Set the initial capacity.
///     .capacity(2048)
///     // Set the hasher.
///     .hasher(RandomState::new())
///     // Set a custom garbage collector.
///     .collector(Collector::new().batch_size(128))
///     // Construct the hash map.
///     .build();
/// ```
pub struct HashMapBuilder<K, V, S = RandomState> {
    hasher: S,
    capacity: usize,
    collector: Collector,
    _kv: PhantomData<(K, V)>,
}

impl<K, V> HashMapBuilder<K, V> {
    /// Set the hash builder used to hash keys.
    ///
    /// Warning: `hasher` is normally randomly generated, and is designed to
    /// allow maps to be resistant to attacks that cause many collisions and
    /// very poor performance. Setting it manually using this function can
    /// expose a DoS attack vector.
    pub fn hasher<S>(self, hasher: S) -> HashMapBuilder<K, V, S> {
        HashMapBuilder {
            hasher,
            capacity: self.capacity,
            collector: self.collector,
            _kv: PhantomData,
        }
    }
}

impl<K, V, S> HashMapBuilder<K, V, S> {
    /// Set the initial capacity of the map.
    ///
    /// The capacity is rounded up to the next power of two, and must be at
    /// most `2^26`. If it is 0, the default capacity is used.
    pub fn capacity(self, capacity: usize) -> HashMapBuilder<K, V, S> {
        HashMapBuilder {
            capacity,
            hasher: self.hasher,
            collector: self.collector,
            _kv: PhantomData,
        }
    }

    /// Set the [`seize::Collector`] used for garbage collection.
    ///
    /// This method may be useful when you want more control over garbage
    /// collection.
    ///
    /// Note that all `Guard` references used to access the map must be
    /// produced by the provided `collector`.
    pub fn collector(self, collector: Collector) -> Self {
        HashMapBuilder {
            collector,
            hasher: self.hasher,
            capacity: self.capacity,
            _kv: PhantomData,
        }
    }

    /// Construct a [`HashMap`] from the builder, using the configured
    /// options.
    pub fn build(self) -> HashMap<K, V, S> {
        HashMap {
            raw: raw::HashMap::new(self.capacity, self.hasher, self.collector),
        }
    }
}

impl<K, V, S> fmt::Debug for HashMapBuilder<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashMapBuilder")
            .field("capacity", &self.capacity)
            .field("collector", &self.collector)
            .finish()
    }
}

impl<K, V> HashMap<K, V> {
    /// Creates an empty `HashMap` with the default capacity.
    ///
    /// # Examples
    ///
    /// ```
    /// use jujube::HashMap;
    /// let map: HashMap<&str, i32> = HashMap::new();
    /// ```
    pub fn new() -> HashMap<K, V> {
        HashMap::with_capacity_and_hasher(0, RandomState::new())
    }

    /// Creates an empty `HashMap` with the specified capacity.
    ///
    /// The table should be able to hold at least `capacity` elements before
    /// resizing, though poor hash distribution may force an earlier resize.
    /// A capacity of 0 falls back to the default.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` exceeds `2^26`.
    ///
    /// # Examples
    ///
    /// ```
    /// use jujube::HashMap;
    /// let map: HashMap<&str, i32> = HashMap::with_capacity(10);
    /// ```
    pub fn with_capacity(capacity: usize) -> HashMap<K, V> {
        HashMap::with_capacity_and_hasher(capacity, RandomState::new())
    }

    /// Returns a builder for a `HashMap`.
    ///
    /// The builder can be used for more complex configuration, such as using
    /// a custom [`Collector`].
    pub fn builder() -> HashMapBuilder<K, V> {
        HashMapBuilder {
            capacity: 0,
            hasher: RandomState::default(),
            collector: Collector::new(),
            _kv: PhantomData,
        }
    }
}

impl<K, V, S> Default for HashMap<K, V, S>
where
    S: Default,
{
    fn default() -> Self {
        HashMap::with_hasher(S::default())
    }
}

impl<K, V, S> HashMap<K, V, S> {
    /// Creates an empty `HashMap` which will use the given hash builder to
    /// hash keys.
    ///
    /// # Examples
    ///
    /// ```
    /// use jujube::HashMap;
    /// use std::collections::hash_map::RandomState;
    ///
    /// let map = HashMap::with_hasher(RandomState::new());
    /// map.pin().insert(1, 2);
    /// ```
    pub fn with_hasher(hasher: S) -> HashMap<K, V, S> {
        HashMap::with_capacity_and_hasher(0, hasher)
    }

    /// Creates an empty `HashMap` with at least the specified capacity,
    /// using `hasher` to hash the keys.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` exceeds `2^26`.
    ///
    /// # Examples
    ///
    /// ```
    /// use jujube::HashMap;
    /// use std::collections::hash_map::RandomState;
    ///
    /// let map = HashMap::with_capacity_and_hasher(10, RandomState::new());
    /// map.pin().insert(1, 2);
    /// ```
    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> HashMap<K, V, S> {
        HashMap {
            raw: raw::HashMap::new(capacity, hasher, Collector::default()),
        }
    }

    /// Returns a pinned reference to the map.
    ///
    /// The returned reference manages a guard internally, preventing garbage
    /// collection for as long as it is held.
    #[inline]
    pub fn pin(&self) -> HashMapRef<'_, K, V, S, LocalGuard<'_>> {
        HashMapRef {
            guard: self.guard(),
            map: self,
        }
    }

    /// Returns a pinned reference to the map.
    ///
    /// Unlike [`HashMap::pin`], the returned reference implements `Send`
    /// and `Sync`, allowing it to be held across `.await` points in
    /// work-stealing schedulers. This is especially useful for iterators.
    #[inline]
    pub fn pin_owned(&self) -> HashMapRef<'_, K, V, S, OwnedGuard<'_>> {
        HashMapRef {
            guard: self.owned_guard(),
            map: self,
        }
    }

    /// Returns a guard for use with this map.
    ///
    /// Note that holding on to a guard prevents garbage collection.
    #[inline]
    pub fn guard(&self) -> LocalGuard<'_> {
        self.raw.guard()
    }

    /// Returns an owned guard for use with this map.
    ///
    /// Owned guards implement `Send` and `Sync`, allowing them to be held
    /// across `.await` points in work-stealing schedulers.
    #[inline]
    pub fn owned_guard(&self) -> OwnedGuard<'_> {
        self.raw.owned_guard()
    }

    /// Returns the number of entries in the map.
    ///
    /// The count is approximate under concurrent modification.
    ///
    /// # Examples
    ///
    /// ```
    /// use jujube::HashMap;
    ///
    /// let map = HashMap::new();
    ///
    /// map.pin().insert(1, "a");
    /// map.pin().insert(2, "b");
    /// assert_eq!(map.len(), 2);
    /// ```
    #[inline]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Returns `true` if the map is empty. Otherwise returns `false`.
    ///
    /// # Examples
    ///
    /// ```
    /// use jujube::HashMap;
    ///
    /// let map = HashMap::new();
    /// assert!(map.is_empty());
    /// map.pin().insert("a", 1);
    /// assert!(!map.is_empty());
    /// ```
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the capacity of the current table, or of the in-progress
    /// successor table if a resize is underway.
    ///
    /// # Examples
    ///
    /// ```
    /// use jujube::HashMap;
    ///
    /// let map: HashMap<i32, i32> = HashMap::with_capacity(4);
    /// assert!(map.capacity() >= 4);
    /// ```
    #[inline]
    pub fn capacity(&self) -> usize {
        self.raw.capacity()
    }
}

impl<K, V, S> HashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    /// Returns `true` if the map contains a value for the specified key.
    ///
    /// # Examples
    ///
    /// ```
    /// use jujube::HashMap;
    ///
    /// let map = HashMap::new();
    /// let m = map.pin();
    /// m.insert(1, "a");
    /// assert_eq!(m.contains_key(&1), true);
    /// assert_eq!(m.contains_key(&2), false);
    /// ```
    #[inline]
    pub fn contains_key<Q>(&self, key: &Q, guard: &impl Guard) -> bool
    where
        Q: Equivalent<K> + Hash + ?Sized,
    {
        self.get(key, guard).is_some()
    }

    /// Returns a reference to the value corresponding to the key.
    ///
    /// # Examples
    ///
    /// ```
    /// use jujube::HashMap;
    ///
    /// let map = HashMap::new();
    /// let m = map.pin();
    /// m.insert(1, "a");
    /// assert_eq!(m.get(&1), Some(&"a"));
    /// assert_eq!(m.get(&2), None);
    /// ```
    #[inline]
    pub fn get<'g, Q>(&self, key: &Q, guard: &'g impl Guard) -> Option<&'g V>
    where
        Q: Equivalent<K> + Hash + ?Sized,
        K: 'g,
    {
        let entry = self.raw.get(key, guard)?;

        // Safety: The entry is live, so its value is initialized.
        Some(unsafe { entry.value.assume_init_ref() })
    }

    /// Returns the key-value pair corresponding to the supplied key.
    ///
    /// # Examples
    ///
    /// ```
    /// use jujube::HashMap;
    ///
    /// let map = HashMap::new();
    /// let m = map.pin();
    /// m.insert(1, "a");
    /// assert_eq!(m.get_key_value(&1), Some((&1, &"a")));
    /// assert_eq!(m.get_key_value(&2), None);
    /// ```
    #[inline]
    pub fn get_key_value<'g, Q>(&self, key: &Q, guard: &'g impl Guard) -> Option<(&'g K, &'g V)>
    where
        Q: Equivalent<K> + Hash + ?Sized,
    {
        let entry = self.raw.get(key, guard)?;

        // Safety: The entry is live, so its value is initialized.
        Some(unsafe { (&entry.key, entry.value.assume_init_ref()) })
    }

    /// Inserts a key-value pair into the map.
    ///
    /// If the map did not have this key present, [`None`] is returned.
    ///
    /// If the map did have this key present, the value is updated, and the
    /// old value is returned. The key is not updated, though; this matters
    /// for types that can be `==` without being identical.
    ///
    /// # Examples
    ///
    /// ```
    /// use jujube::HashMap;
    ///
    /// let map = HashMap::new();
    /// assert_eq!(map.pin().insert(37, "a"), None);
    /// assert_eq!(map.pin().is_empty(), false);
    ///
    /// let m = map.pin();
    /// m.insert(37, "b");
    /// assert_eq!(m.insert(37, "c"), Some(&"b"));
    /// assert_eq!(m.get(&37), Some(&"c"));
    /// ```
    #[inline]
    pub fn insert<'g>(&self, key: K, value: V, guard: &'g impl Guard) -> Option<&'g V>
    where
        K: 'g,
    {
        match self.raw.insert(key, value, true, guard) {
            InsertResult::Inserted(_) => None,

            // Safety: The replaced entry was live, so its value is
            // initialized.
            InsertResult::Replaced(entry) => Some(unsafe { entry.value.assume_init_ref() }),

            InsertResult::Error { .. } => unreachable!(),
        }
    }

    /// Tries to insert a key-value pair into the map, and returns a
    /// reference to the value that was inserted.
    ///
    /// If the map already had this key present, nothing is updated, and an
    /// error containing the existing value is returned.
    ///
    /// # Examples
    ///
    /// ```
    /// use jujube::HashMap;
    ///
    /// let map = HashMap::new();
    /// let m = map.pin();
    /// assert_eq!(m.try_insert(37, "a").unwrap(), &"a");
    ///
    /// let err = m.try_insert(37, "b").unwrap_err();
    /// assert_eq!(err.current, &"a");
    /// assert_eq!(err.not_inserted, "b");
    /// ```
    #[inline]
    pub fn try_insert<'g>(
        &self,
        key: K,
        value: V,
        guard: &'g impl Guard,
    ) -> Result<&'g V, OccupiedError<'g, V>>
    where
        K: 'g,
    {
        match self.raw.insert(key, value, false, guard) {
            // Safety: Inserted and replaced entries are live, so their
            // values are initialized.
            InsertResult::Inserted(entry) => Ok(unsafe { entry.value.assume_init_ref() }),
            InsertResult::Error {
                current,
                not_inserted,
            } => {
                let entry = *not_inserted;

                Err(OccupiedError {
                    // Safety: The resident entry is live.
                    current: unsafe { current.value.assume_init_ref() },
                    // Safety: Our entry never made it into the map, and its
                    // value was initialized on creation.
                    not_inserted: unsafe { entry.value.assume_init() },
                })
            }
            InsertResult::Replaced(_) => unreachable!(),
        }
    }

    /// Returns a reference to the value corresponding to the key, or inserts
    /// a default value.
    ///
    /// # Examples
    ///
    /// ```
    /// use jujube::HashMap;
    ///
    /// let map = HashMap::new();
    /// assert_eq!(map.pin().get_or_insert("a", 3), &3);
    /// assert_eq!(map.pin().get_or_insert("a", 6), &3);
    /// ```
    #[inline]
    pub fn get_or_insert<'g>(&self, key: K, value: V, guard: &'g impl Guard) -> &'g V
    where
        K: 'g,
    {
        match self.try_insert(key, value, guard) {
            Ok(inserted) => inserted,
            Err(OccupiedError { current, .. }) => current,
        }
    }

    /// Replaces the value for a key only if the resident value equals
    /// `current`.
    ///
    /// On success, the previous value is returned. On failure, the resident
    /// value (if any) and the proposed value are returned unchanged. The
    /// comparison is retried if the entry is concurrently modified.
    ///
    /// # Examples
    ///
    /// ```
    /// use jujube::HashMap;
    ///
    /// let map = HashMap::new();
    /// let m = map.pin();
    /// m.insert("a", 1);
    ///
    /// assert_eq!(m.compare_and_swap("a", &1, 2), Ok(&1));
    /// assert_eq!(m.get(&"a"), Some(&2));
    ///
    /// let err = m.compare_and_swap("a", &1, 3).unwrap_err();
    /// assert_eq!(err.current, Some(&2));
    /// assert_eq!(err.not_swapped, 3);
    /// ```
    #[inline]
    pub fn compare_and_swap<'g>(
        &self,
        key: K,
        current: &V,
        new: V,
        guard: &'g impl Guard,
    ) -> Result<&'g V, CompareAndSwapError<'g, V>>
    where
        V: PartialEq,
        K: 'g,
    {
        match self.raw.replace_if(key, new, |value| value == current, guard) {
            // Safety: The replaced entry was live, so its value is
            // initialized.
            ReplaceResult::Replaced(entry) => Ok(unsafe { entry.value.assume_init_ref() }),
            ReplaceResult::Mismatch {
                current,
                not_replaced,
            } => {
                let entry = *not_replaced;

                Err(CompareAndSwapError {
                    // Safety: The resident entry, if any, is live.
                    current: current.map(|entry| unsafe { entry.value.assume_init_ref() }),
                    // Safety: Our entry never made it into the map, and its
                    // value was initialized on creation.
                    not_swapped: unsafe { entry.value.assume_init() },
                })
            }
        }
    }

    /// Removes a key from the map, returning the value at the key if the
    /// key was previously in the map.
    ///
    /// # Examples
    ///
    /// ```
    /// use jujube::HashMap;
    ///
    /// let map = HashMap::new();
    /// map.pin().insert(1, "a");
    /// assert_eq!(map.pin().remove(&1), Some(&"a"));
    /// assert_eq!(map.pin().remove(&1), None);
    /// ```
    #[inline]
    pub fn remove<'g, Q>(&self, key: &Q, guard: &'g impl Guard) -> Option<&'g V>
    where
        Q: Equivalent<K> + Hash + ?Sized,
        K: Clone + 'g,
    {
        let entry = self.raw.remove(key, guard)?;

        // Safety: The removed entry was live, so its value is initialized.
        Some(unsafe { entry.value.assume_init_ref() })
    }

    /// Removes a key from the map, returning the stored key and value if
    /// the key was previously in the map.
    ///
    /// # Examples
    ///
    /// ```
    /// use jujube::HashMap;
    ///
    /// let map = HashMap::new();
    /// map.pin().insert(1, "a");
    /// assert_eq!(map.pin().remove_entry(&1), Some((&1, &"a")));
    /// assert_eq!(map.pin().remove(&1), None);
    /// ```
    #[inline]
    pub fn remove_entry<'g, Q>(&self, key: &Q, guard: &'g impl Guard) -> Option<(&'g K, &'g V)>
    where
        Q: Equivalent<K> + Hash + ?Sized,
        K: Clone,
    {
        let entry = self.raw.remove(key, guard)?;

        // Safety: The removed entry was live, so its value is initialized.
        Some(unsafe { (&entry.key, entry.value.assume_init_ref()) })
    }

    /// Clears the map, removing all key-value pairs.
    ///
    /// The map is atomically reset to an empty table of its original
    /// initial capacity. Operations racing with the clear may complete
    /// against the abandoned table.
    ///
    /// # Examples
    ///
    /// ```
    /// use jujube::HashMap;
    ///
    /// let map = HashMap::new();
    ///
    /// map.pin().insert(1, "a");
    /// map.pin().clear();
    /// assert!(map.pin().is_empty());
    /// ```
    #[inline]
    pub fn clear(&self, guard: &impl Guard) {
        self.raw.clear(guard)
    }

    /// Retains only the elements specified by the predicate.
    ///
    /// In other words, removes all pairs `(k, v)` for which `f(&k, &v)`
    /// returns `false`. The elements are visited in unsorted (and
    /// unspecified) order.
    ///
    /// Note the function may be called more than once for a given key if
    /// its value is concurrently modified during removal.
    ///
    /// # Examples
    ///
    /// ```
    /// use jujube::HashMap;
    ///
    /// let map: HashMap<i32, i32> = (0..8).map(|x| (x, x * 10)).collect();
    /// map.pin().retain(|&k, _| k % 2 == 0);
    /// assert_eq!(map.len(), 4);
    /// ```
    #[inline]
    pub fn retain<F>(&self, f: F, guard: &impl Guard)
    where
        F: FnMut(&K, &V) -> bool,
        K: Clone,
    {
        self.raw.retain(f, guard)
    }

    /// An iterator visiting all key-value pairs in arbitrary order.
    /// The iterator element type is `(&K, &V)`.
    ///
    /// The iterator reflects concurrent mutations on a best-effort basis: a
    /// key that moves during a resize may be yielded twice, or not at all.
    ///
    /// # Examples
    ///
    /// ```
    /// use jujube::HashMap;
    ///
    /// let map = HashMap::from([
    ///     ("a", 1),
    ///     ("b", 2),
    ///     ("c", 3),
    /// ]);
    ///
    /// for (key, val) in map.pin().iter() {
    ///     println!("key: {key} val: {val}");
    /// }
    /// ```
    #[inline]
    pub fn iter<'g, G>(&'g self, guard: &'g G) -> Iter<'g, K, V, S, G>
    where
        G: Guard,
    {
        Iter {
            raw: self.raw.iter(guard),
        }
    }

    /// An iterator visiting all keys in arbitrary order.
    /// The iterator element type is `&K`.
    ///
    /// See [`HashMap::iter`] for details.
    #[inline]
    pub fn keys<'g, G>(&'g self, guard: &'g G) -> Keys<'g, K, V, S, G>
    where
        G: Guard,
    {
        Keys {
            iter: self.iter(guard),
        }
    }

    /// An iterator visiting all values in arbitrary order.
    /// The iterator element type is `&V`.
    ///
    /// See [`HashMap::iter`] for details.
    #[inline]
    pub fn values<'g, G>(&'g self, guard: &'g G) -> Values<'g, K, V, S, G>
    where
        G: Guard,
    {
        Values {
            iter: self.iter(guard),
        }
    }
}

/// An error returned by [`try_insert`](HashMap::try_insert) when the key
/// already exists.
///
/// Contains the existing value, and the value that was not inserted.
#[derive(Debug, PartialEq, Eq)]
pub struct OccupiedError<'a, V: 'a> {
    /// The value in the map that was already present.
    pub current: &'a V,
    /// The value which was not inserted, because the entry was already
    /// occupied.
    pub not_inserted: V,
}

/// An error returned by [`compare_and_swap`](HashMap::compare_and_swap)
/// when the resident value does not match the expected one.
#[derive(Debug, PartialEq, Eq)]
pub struct CompareAndSwapError<'a, V: 'a> {
    /// The value in the map at the time of the comparison, if the key was
    /// present.
    pub current: Option<&'a V>,
    /// The value that was not swapped in.
    pub not_swapped: V,
}

impl<K, V, S> PartialEq for HashMap<K, V, S>
where
    K: Hash + Eq,
    V: PartialEq,
    S: BuildHasher,
{
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }

        let (guard1, guard2) = (&self.guard(), &other.guard());

        let mut iter = self.iter(guard1);
        iter.all(|(key, value)| other.get(key, guard2).map_or(false, |v| *value == *v))
    }
}

impl<K, V, S> Eq for HashMap<K, V, S>
where
    K: Hash + Eq,
    V: Eq,
    S: BuildHasher,
{
}

impl<K, V, S> fmt::Debug for HashMap<K, V, S>
where
    K: Hash + Eq + fmt::Debug,
    V: fmt::Debug,
    S: BuildHasher,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.guard();
        f.debug_map().entries(self.iter(&guard)).finish()
    }
}

impl<K, V, S> Extend<(K, V)> for &HashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        let guard = self.guard();
        for (key, value) in iter {
            self.insert(key, value, &guard);
        }
    }
}

impl<'a, K, V, S> Extend<(&'a K, &'a V)> for &HashMap<K, V, S>
where
    K: Copy + Hash + Eq,
    V: Copy,
    S: BuildHasher,
{
    fn extend<T: IntoIterator<Item = (&'a K, &'a V)>>(&mut self, iter: T) {
        self.extend(iter.into_iter().map(|(&key, &value)| (key, value)));
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for HashMap<K, V, RandomState>
where
    K: Hash + Eq,
{
    fn from(arr: [(K, V); N]) -> Self {
        HashMap::from_iter(arr)
    }
}

impl<K, V, S> FromIterator<(K, V)> for HashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher + Default,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut iter = iter.into_iter();

        match iter.next() {
            None => Self::default(),
            Some((key, value)) => {
                // Pre-size the table from the iterator's hint.
                let (lower, _) = iter.size_hint();
                let capacity = lower.saturating_add(1).min(raw::MAX_CAPACITY);
                let map = HashMap::with_capacity_and_hasher(capacity, S::default());

                {
                    let map = map.pin();
                    map.insert(key, value);
                    for (key, value) in iter {
                        map.insert(key, value);
                    }
                }

                map
            }
        }
    }
}

impl<K, V, S> Clone for HashMap<K, V, S>
where
    K: Clone + Hash + Eq,
    V: Clone,
    S: BuildHasher + Clone,
{
    fn clone(&self) -> HashMap<K, V, S> {
        let other = HashMap::builder()
            .capacity(self.len())
            .hasher(self.raw.hasher.clone())
            .collector(self.raw.collector().clone())
            .build();

        {
            let (guard1, guard2) = (&self.guard(), &other.guard());
            for (key, value) in self.iter(guard1) {
                other.insert(key.clone(), value.clone(), guard2);
            }
        }

        other
    }
}

/// A pinned reference to a [`HashMap`].
///
/// This type is created with [`HashMap::pin`] and can be used to access a
/// [`HashMap`] without explicitly managing a guard.
pub struct HashMapRef<'map, K, V, S, G> {
    guard: G,
    map: &'map HashMap<K, V, S>,
}

impl<'map, K, V, S, G> HashMapRef<'map, K, V, S, G>
where
    K: Hash + Eq,
    S: BuildHasher,
    G: Guard,
{
    /// Returns a reference to the inner [`HashMap`].
    #[inline]
    pub fn map(&self) -> &'map HashMap<K, V, S> {
        self.map
    }

    /// Returns the number of entries in the map.
    ///
    /// See [`HashMap::len`] for details.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if the map is empty. Otherwise returns `false`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the capacity of the map.
    ///
    /// See [`HashMap::capacity`] for details.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.map.capacity()
    }

    /// Returns `true` if the map contains a value for the specified key.
    ///
    /// See [`HashMap::contains_key`] for details.
    #[inline]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        Q: Equivalent<K> + Hash + ?Sized,
    {
        self.get(key).is_some()
    }

    /// Returns a reference to the value corresponding to the key.
    ///
    /// See [`HashMap::get`] for details.
    #[inline]
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        Q: Equivalent<K> + Hash + ?Sized,
    {
        self.map.get(key, &self.guard)
    }

    /// Returns the key-value pair corresponding to the supplied key.
    ///
    /// See [`HashMap::get_key_value`] for details.
    #[inline]
    pub fn get_key_value<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        Q: Equivalent<K> + Hash + ?Sized,
    {
        self.map.get_key_value(key, &self.guard)
    }

    /// Inserts a key-value pair into the map.
    ///
    /// See [`HashMap::insert`] for details.
    #[inline]
    pub fn insert(&self, key: K, value: V) -> Option<&V> {
        self.map.insert(key, value, &self.guard)
    }

    /// Tries to insert a key-value pair into the map, and returns a
    /// reference to the value that was inserted.
    ///
    /// See [`HashMap::try_insert`] for details.
    #[inline]
    pub fn try_insert(&self, key: K, value: V) -> Result<&V, OccupiedError<'_, V>> {
        self.map.try_insert(key, value, &self.guard)
    }

    /// Returns a reference to the value corresponding to the key, or
    /// inserts a default value.
    ///
    /// See [`HashMap::get_or_insert`] for details.
    #[inline]
    pub fn get_or_insert(&self, key: K, value: V) -> &V {
        self.map.get_or_insert(key, value, &self.guard)
    }

    /// Replaces the value for a key only if the resident value equals
    /// `current`.
    ///
    /// See [`HashMap::compare_and_swap`] for details.
    #[inline]
    pub fn compare_and_swap(
        &self,
        key: K,
        current: &V,
        new: V,
    ) -> Result<&V, CompareAndSwapError<'_, V>>
    where
        V: PartialEq,
    {
        self.map.compare_and_swap(key, current, new, &self.guard)
    }

    /// Removes a key from the map, returning the value at the key if the
    /// key was previously in the map.
    ///
    /// See [`HashMap::remove`] for details.
    #[inline]
    pub fn remove<Q>(&self, key: &Q) -> Option<&V>
    where
        Q: Equivalent<K> + Hash + ?Sized,
        K: Clone,
    {
        self.map.remove(key, &self.guard)
    }

    /// Removes a key from the map, returning the stored key and value if
    /// the key was previously in the map.
    ///
    /// See [`HashMap::remove_entry`] for details.
    #[inline]
    pub fn remove_entry<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        Q: Equivalent<K> + Hash + ?Sized,
        K: Clone,
    {
        self.map.remove_entry(key, &self.guard)
    }

    /// Clears the map, removing all key-value pairs.
    ///
    /// See [`HashMap::clear`] for details.
    #[inline]
    pub fn clear(&self) {
        self.map.clear(&self.guard)
    }

    /// Retains only the elements specified by the predicate.
    ///
    /// See [`HashMap::retain`] for details.
    #[inline]
    pub fn retain<F>(&self, f: F)
    where
        F: FnMut(&K, &V) -> bool,
        K: Clone,
    {
        self.map.retain(f, &self.guard)
    }

    /// An iterator visiting all key-value pairs in arbitrary order.
    /// The iterator element type is `(&K, &V)`.
    ///
    /// See [`HashMap::iter`] for details.
    #[inline]
    pub fn iter(&self) -> Iter<'_, K, V, S, G> {
        Iter {
            raw: self.map.raw.iter(&self.guard),
        }
    }

    /// An iterator visiting all keys in arbitrary order.
    /// The iterator element type is `&K`.
    ///
    /// See [`HashMap::keys`] for details.
    #[inline]
    pub fn keys(&self) -> Keys<'_, K, V, S, G> {
        Keys { iter: self.iter() }
    }

    /// An iterator visiting all values in arbitrary order.
    /// The iterator element type is `&V`.
    ///
    /// See [`HashMap::values`] for details.
    #[inline]
    pub fn values(&self) -> Values<'_, K, V, S, G> {
        Values { iter: self.iter() }
    }
}

impl<K, V, S, G> fmt::Debug for HashMapRef<'_, K, V, S, G>
where
    K: Hash + Eq + fmt::Debug,
    V: fmt::Debug,
    S: BuildHasher,
    G: Guard,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<'a, K, V, S, G> IntoIterator for &'a HashMapRef<'_, K, V, S, G>
where
    K: Hash + Eq,
    S: BuildHasher,
    G: Guard,
{
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V, S, G>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// An iterator over a map's entries.
///
/// This struct is created by the [`iter`](HashMap::iter) method on
/// [`HashMap`]. See its documentation for details.
pub struct Iter<'g, K, V, S, G> {
    raw: raw::Iter<'g, K, V, S, G>,
}

impl<'g, K: 'g, V: 'g, S, G> Iterator for Iter<'g, K, V, S, G>
where
    K: Hash + Eq,
    S: BuildHasher,
    G: Guard,
{
    type Item = (&'g K, &'g V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.raw.next()?;

        // Safety: The iterator only yields live entries.
        Some(unsafe { (&entry.key, entry.value.assume_init_ref()) })
    }
}

impl<K, V, S, G> fmt::Debug for Iter<'_, K, V, S, G>
where
    K: Hash + Eq + fmt::Debug,
    V: fmt::Debug,
    S: BuildHasher,
    G: Guard,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(Iter {
                raw: self.raw.clone(),
            })
            .finish()
    }
}

/// An iterator over a map's keys.
///
/// This struct is created by the [`keys`](HashMap::keys) method on
/// [`HashMap`]. See its documentation for details.
pub struct Keys<'g, K, V, S, G> {
    iter: Iter<'g, K, V, S, G>,
}

impl<'g, K: 'g, V: 'g, S, G> Iterator for Keys<'g, K, V, S, G>
where
    K: Hash + Eq,
    S: BuildHasher,
    G: Guard,
{
    type Item = &'g K;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let (key, _) = self.iter.next()?;
        Some(key)
    }
}

impl<K, V, S, G> fmt::Debug for Keys<'_, K, V, S, G>
where
    K: Hash + Eq + fmt::Debug,
    V: fmt::Debug,
    S: BuildHasher,
    G: Guard,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Keys").field(&self.iter).finish()
    }
}

/// An iterator over a map's values.
///
/// This struct is created by the [`values`](HashMap::values) method on
/// [`HashMap`]. See its documentation for details.
pub struct Values<'g, K, V, S, G> {
    iter: Iter<'g, K, V, S, G>,
}

impl<'g, K: 'g, V: 'g, S, G> Iterator for Values<'g, K, V, S, G>
where
    K: Hash + Eq,
    S: BuildHasher,
    G: Guard,
{
    type Item = &'g V;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let (_, value) = self.iter.next()?;
        Some(value)
    }
}

impl<K, V, S, G> fmt::Debug for Values<'_, K, V, S, G>
where
    K: Hash + Eq + fmt::Debug,
    V: fmt::Debug,
    S: BuildHasher,
    G: Guard,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Values").field(&self.iter).finish()
    }
}
