use crate::map::{self, HashMap};
use crate::raw::InsertResult;
use crate::Equivalent;
use seize::{Collector, Guard, LocalGuard, OwnedGuard};

use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;

/// A concurrent hash set.
///
/// The set is a [`HashMap`] with the value elided. Most operations require
/// a [`Guard`](crate::Guard), which can be acquired through
/// [`HashSet::guard`] or using the [`HashSet::pin`] API. See the
/// [crate-level documentation](crate#usage) for details.
pub struct HashSet<K, S = RandomState> {
    map: HashMap<K, (), S>,
}

/// A builder for a [`HashSet`].
///
/// # Examples
///
/// ```rust
/// use jujube::HashSet;
/// use seize::Collector;
/// use std::collections::hash_map::RandomState;
///
/// let set: HashSet<i32> = HashSet::builder()
///     // Set the initial capacity.
///     .capacity(2048)
///     // Set the hasher.
///     .hasher(RandomState::new())
///     // Set a custom garbage collector.
///     .collector(Collector::new().batch_size(128))
///     // Construct the hash set.
///     .build();
/// ```
pub struct HashSetBuilder<K, S = RandomState> {
    hasher: S,
    capacity: usize,
    collector: Collector,
    _k: PhantomData<K>,
}

impl<K> HashSetBuilder<K> {
    /// Set the hash builder used to hash keys.
    ///
    /// Warning: `hasher` is normally randomly generated, and is designed to
    /// allow sets to be resistant to attacks that cause many collisions and
    /// very poor performance. Setting it manually using this function can
    /// expose a DoS attack vector.
    pub fn hasher<S>(self, hasher: S) -> HashSetBuilder<K, S> {
        HashSetBuilder {
            hasher,
            capacity: self.capacity,
            collector: self.collector,
            _k: PhantomData,
        }
    }
}

impl<K, S> HashSetBuilder<K, S> {
    /// Set the initial capacity of the set.
    ///
    /// The capacity is rounded up to the next power of two, and must be at
    /// most `2^26`. If it is 0, the default capacity is used.
    pub fn capacity(self, capacity: usize) -> HashSetBuilder<K, S> {
        HashSetBuilder {
            capacity,
            hasher: self.hasher,
            collector: self.collector,
            _k: PhantomData,
        }
    }

    /// Set the [`seize::Collector`] used for garbage collection.
    ///
    /// Note that all `Guard` references used to access the set must be
    /// produced by the provided `collector`.
    pub fn collector(self, collector: Collector) -> Self {
        HashSetBuilder {
            collector,
            hasher: self.hasher,
            capacity: self.capacity,
            _k: PhantomData,
        }
    }

    /// Construct a [`HashSet`] from the builder, using the configured
    /// options.
    pub fn build(self) -> HashSet<K, S> {
        HashSet {
            map: HashMap::builder()
                .capacity(self.capacity)
                .hasher(self.hasher)
                .collector(self.collector)
                .build(),
        }
    }
}

impl<K, S> fmt::Debug for HashSetBuilder<K, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashSetBuilder")
            .field("capacity", &self.capacity)
            .field("collector", &self.collector)
            .finish()
    }
}

impl<K> HashSet<K> {
    /// Creates an empty `HashSet` with the default capacity.
    ///
    /// # Examples
    ///
    /// ```
    /// use jujube::HashSet;
    /// let set: HashSet<&str> = HashSet::new();
    /// ```
    pub fn new() -> HashSet<K> {
        HashSet::with_capacity_and_hasher(0, RandomState::new())
    }

    /// Creates an empty `HashSet` with the specified capacity.
    ///
    /// A capacity of 0 falls back to the default.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` exceeds `2^26`.
    ///
    /// # Examples
    ///
    /// ```
    /// use jujube::HashSet;
    /// let set: HashSet<&str> = HashSet::with_capacity(10);
    /// ```
    pub fn with_capacity(capacity: usize) -> HashSet<K> {
        HashSet::with_capacity_and_hasher(capacity, RandomState::new())
    }

    /// Returns a builder for a `HashSet`.
    ///
    /// The builder can be used for more complex configuration, such as
    /// using a custom [`Collector`].
    pub fn builder() -> HashSetBuilder<K> {
        HashSetBuilder {
            capacity: 0,
            hasher: RandomState::default(),
            collector: Collector::new(),
            _k: PhantomData,
        }
    }
}

impl<K, S> Default for HashSet<K, S>
where
    S: Default,
{
    fn default() -> Self {
        HashSet::with_hasher(S::default())
    }
}

impl<K, S> HashSet<K, S> {
    /// Creates an empty `HashSet` which will use the given hash builder to
    /// hash keys.
    ///
    /// # Examples
    ///
    /// ```
    /// use jujube::HashSet;
    /// use std::collections::hash_map::RandomState;
    ///
    /// let set = HashSet::with_hasher(RandomState::new());
    /// set.pin().insert(1);
    /// ```
    pub fn with_hasher(hasher: S) -> HashSet<K, S> {
        HashSet::with_capacity_and_hasher(0, hasher)
    }

    /// Creates an empty `HashSet` with at least the specified capacity,
    /// using `hasher` to hash the keys.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` exceeds `2^26`.
    ///
    /// # Examples
    ///
    /// ```
    /// use jujube::HashSet;
    /// use std::collections::hash_map::RandomState;
    ///
    /// let set = HashSet::with_capacity_and_hasher(10, RandomState::new());
    /// set.pin().insert(1);
    /// ```
    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> HashSet<K, S> {
        HashSet {
            map: HashMap::with_capacity_and_hasher(capacity, hasher),
        }
    }

    /// Returns a pinned reference to the set.
    ///
    /// The returned reference manages a guard internally, preventing
    /// garbage collection for as long as it is held.
    #[inline]
    pub fn pin(&self) -> HashSetRef<'_, K, S, LocalGuard<'_>> {
        HashSetRef {
            guard: self.guard(),
            set: self,
        }
    }

    /// Returns a pinned reference to the set.
    ///
    /// Unlike [`HashSet::pin`], the returned reference implements `Send`
    /// and `Sync`.
    #[inline]
    pub fn pin_owned(&self) -> HashSetRef<'_, K, S, OwnedGuard<'_>> {
        HashSetRef {
            guard: self.owned_guard(),
            set: self,
        }
    }

    /// Returns a guard for use with this set.
    ///
    /// Note that holding on to a guard prevents garbage collection.
    #[inline]
    pub fn guard(&self) -> LocalGuard<'_> {
        self.map.guard()
    }

    /// Returns an owned guard for use with this set.
    #[inline]
    pub fn owned_guard(&self) -> OwnedGuard<'_> {
        self.map.owned_guard()
    }

    /// Returns the number of entries in the set.
    ///
    /// The count is approximate under concurrent modification.
    ///
    /// # Examples
    ///
    /// ```
    /// use jujube::HashSet;
    ///
    /// let set = HashSet::new();
    ///
    /// set.pin().insert(1);
    /// set.pin().insert(2);
    /// assert_eq!(set.len(), 2);
    /// ```
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if the set is empty. Otherwise returns `false`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the capacity of the current table, or of the in-progress
    /// successor table if a resize is underway.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.map.capacity()
    }
}

impl<K, S> HashSet<K, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    /// Returns `true` if the set contains the specified key.
    ///
    /// # Examples
    ///
    /// ```
    /// use jujube::HashSet;
    ///
    /// let set = HashSet::new();
    /// let s = set.pin();
    /// s.insert(1);
    /// assert_eq!(s.contains(&1), true);
    /// assert_eq!(s.contains(&2), false);
    /// ```
    #[inline]
    pub fn contains<Q>(&self, key: &Q, guard: &impl Guard) -> bool
    where
        Q: Equivalent<K> + Hash + ?Sized,
    {
        self.get(key, guard).is_some()
    }

    /// Returns a reference to the key in the set, if any, that is equal to
    /// the given key.
    ///
    /// # Examples
    ///
    /// ```
    /// use jujube::HashSet;
    ///
    /// let set = HashSet::new();
    /// let s = set.pin();
    /// s.insert(1);
    /// assert_eq!(s.get(&1), Some(&1));
    /// assert_eq!(s.get(&2), None);
    /// ```
    #[inline]
    pub fn get<'g, Q>(&self, key: &Q, guard: &'g impl Guard) -> Option<&'g K>
    where
        Q: Equivalent<K> + Hash + ?Sized,
    {
        self.map.get_key_value(key, guard).map(|(key, _)| key)
    }

    /// Adds a key to the set.
    ///
    /// Returns `true` if the key was not already live in the set.
    ///
    /// # Examples
    ///
    /// ```
    /// use jujube::HashSet;
    ///
    /// let set = HashSet::new();
    /// let s = set.pin();
    /// assert_eq!(s.insert(1), true);
    /// assert_eq!(s.insert(1), false);
    /// assert_eq!(s.contains(&1), true);
    /// ```
    #[inline]
    pub fn insert(&self, key: K, guard: &impl Guard) -> bool {
        self.map.insert(key, (), guard).is_none()
    }

    /// Adds a key to the set, returning a reference to the canonical stored
    /// key.
    ///
    /// If an equal key is already resident, the resident instance is
    /// returned instead of storing `key`, which makes the set usable as an
    /// interning pool.
    ///
    /// # Examples
    ///
    /// ```
    /// use jujube::HashSet;
    ///
    /// let set = HashSet::new();
    /// let s = set.pin();
    ///
    /// let first = s.get_or_insert("a".to_string());
    /// assert_eq!(first, "a");
    ///
    /// // The second call returns the stored instance.
    /// let second = s.get_or_insert("a".to_string());
    /// assert!(std::ptr::eq(first, second));
    /// ```
    #[inline]
    pub fn get_or_insert<'g>(&self, key: K, guard: &'g impl Guard) -> &'g K {
        match self.map.raw.insert(key, (), false, guard) {
            InsertResult::Inserted(entry) => &entry.key,
            InsertResult::Error { current, .. } => &current.key,
            InsertResult::Replaced(_) => unreachable!(),
        }
    }

    /// Removes a key from the set.
    ///
    /// Returns `true` if the key was live in the set.
    ///
    /// # Examples
    ///
    /// ```
    /// use jujube::HashSet;
    ///
    /// let set = HashSet::new();
    /// let s = set.pin();
    /// s.insert(1);
    /// assert_eq!(s.remove(&1), true);
    /// assert_eq!(s.remove(&1), false);
    /// ```
    #[inline]
    pub fn remove<Q>(&self, key: &Q, guard: &impl Guard) -> bool
    where
        Q: Equivalent<K> + Hash + ?Sized,
        K: Clone,
    {
        self.map.remove(key, guard).is_some()
    }

    /// Clears the set, removing all keys.
    ///
    /// See [`HashMap::clear`] for details.
    #[inline]
    pub fn clear(&self, guard: &impl Guard) {
        self.map.clear(guard)
    }

    /// Retains only the keys specified by the predicate.
    ///
    /// # Examples
    ///
    /// ```
    /// use jujube::HashSet;
    ///
    /// let set: HashSet<i32> = (0..8).collect();
    /// set.pin().retain(|&k| k % 2 == 0);
    /// assert_eq!(set.len(), 4);
    /// ```
    #[inline]
    pub fn retain<F>(&self, mut f: F, guard: &impl Guard)
    where
        F: FnMut(&K) -> bool,
        K: Clone,
    {
        self.map.retain(|key, _| f(key), guard)
    }

    /// An iterator visiting all keys in arbitrary order.
    /// The iterator element type is `&K`.
    ///
    /// The iterator reflects concurrent mutations on a best-effort basis.
    ///
    /// # Examples
    ///
    /// ```
    /// use jujube::HashSet;
    ///
    /// let set = HashSet::from(["a", "b", "c"]);
    ///
    /// for key in set.pin().iter() {
    ///     println!("{key}");
    /// }
    /// ```
    #[inline]
    pub fn iter<'g, G>(&'g self, guard: &'g G) -> Iter<'g, K, S, G>
    where
        G: Guard,
    {
        Iter {
            keys: self.map.keys(guard),
        }
    }
}

impl<K, S> PartialEq for HashSet<K, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    fn eq(&self, other: &Self) -> bool {
        self.map == other.map
    }
}

impl<K, S> Eq for HashSet<K, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
}

impl<K, S> fmt::Debug for HashSet<K, S>
where
    K: Hash + Eq + fmt::Debug,
    S: BuildHasher,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.guard();
        f.debug_set().entries(self.iter(&guard)).finish()
    }
}

impl<K, S> Extend<K> for &HashSet<K, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    fn extend<T: IntoIterator<Item = K>>(&mut self, iter: T) {
        let guard = self.guard();
        for key in iter {
            self.insert(key, &guard);
        }
    }
}

impl<'a, K, S> Extend<&'a K> for &HashSet<K, S>
where
    K: Copy + Hash + Eq,
    S: BuildHasher,
{
    fn extend<T: IntoIterator<Item = &'a K>>(&mut self, iter: T) {
        self.extend(iter.into_iter().copied());
    }
}

impl<K, const N: usize> From<[K; N]> for HashSet<K, RandomState>
where
    K: Hash + Eq,
{
    fn from(arr: [K; N]) -> Self {
        HashSet::from_iter(arr)
    }
}

impl<K, S> FromIterator<K> for HashSet<K, S>
where
    K: Hash + Eq,
    S: BuildHasher + Default,
{
    fn from_iter<T: IntoIterator<Item = K>>(iter: T) -> Self {
        HashSet {
            map: iter.into_iter().map(|key| (key, ())).collect(),
        }
    }
}

impl<K, S> Clone for HashSet<K, S>
where
    K: Clone + Hash + Eq,
    S: BuildHasher + Clone,
{
    fn clone(&self) -> HashSet<K, S> {
        HashSet {
            map: self.map.clone(),
        }
    }
}

/// A pinned reference to a [`HashSet`].
///
/// This type is created with [`HashSet::pin`] and can be used to access a
/// [`HashSet`] without explicitly managing a guard.
pub struct HashSetRef<'set, K, S, G> {
    guard: G,
    set: &'set HashSet<K, S>,
}

impl<'set, K, S, G> HashSetRef<'set, K, S, G>
where
    K: Hash + Eq,
    S: BuildHasher,
    G: Guard,
{
    /// Returns a reference to the inner [`HashSet`].
    #[inline]
    pub fn set(&self) -> &'set HashSet<K, S> {
        self.set
    }

    /// Returns the number of entries in the set.
    ///
    /// See [`HashSet::len`] for details.
    #[inline]
    pub fn len(&self) -> usize {
        self.set.len()
    }

    /// Returns `true` if the set is empty. Otherwise returns `false`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the capacity of the set.
    ///
    /// See [`HashSet::capacity`] for details.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.set.capacity()
    }

    /// Returns `true` if the set contains the specified key.
    ///
    /// See [`HashSet::contains`] for details.
    #[inline]
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        Q: Equivalent<K> + Hash + ?Sized,
    {
        self.set.contains(key, &self.guard)
    }

    /// Returns a reference to the key in the set, if any, that is equal to
    /// the given key.
    ///
    /// See [`HashSet::get`] for details.
    #[inline]
    pub fn get<Q>(&self, key: &Q) -> Option<&K>
    where
        Q: Equivalent<K> + Hash + ?Sized,
    {
        self.set.get(key, &self.guard)
    }

    /// Adds a key to the set.
    ///
    /// See [`HashSet::insert`] for details.
    #[inline]
    pub fn insert(&self, key: K) -> bool {
        self.set.insert(key, &self.guard)
    }

    /// Adds a key to the set, returning a reference to the canonical
    /// stored key.
    ///
    /// See [`HashSet::get_or_insert`] for details.
    #[inline]
    pub fn get_or_insert(&self, key: K) -> &K {
        self.set.get_or_insert(key, &self.guard)
    }

    /// Removes a key from the set.
    ///
    /// See [`HashSet::remove`] for details.
    #[inline]
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        Q: Equivalent<K> + Hash + ?Sized,
        K: Clone,
    {
        self.set.remove(key, &self.guard)
    }

    /// Clears the set, removing all keys.
    ///
    /// See [`HashSet::clear`] for details.
    #[inline]
    pub fn clear(&self) {
        self.set.clear(&self.guard)
    }

    /// Retains only the keys specified by the predicate.
    ///
    /// See [`HashSet::retain`] for details.
    #[inline]
    pub fn retain<F>(&self, f: F)
    where
        F: FnMut(&K) -> bool,
        K: Clone,
    {
        self.set.retain(f, &self.guard)
    }

    /// An iterator visiting all keys in arbitrary order.
    /// The iterator element type is `&K`.
    ///
    /// See [`HashSet::iter`] for details.
    #[inline]
    pub fn iter(&self) -> Iter<'_, K, S, G> {
        Iter {
            keys: self.set.map.keys(&self.guard),
        }
    }
}

impl<K, S, G> fmt::Debug for HashSetRef<'_, K, S, G>
where
    K: Hash + Eq + fmt::Debug,
    S: BuildHasher,
    G: Guard,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<'a, K, S, G> IntoIterator for &'a HashSetRef<'_, K, S, G>
where
    K: Hash + Eq,
    S: BuildHasher,
    G: Guard,
{
    type Item = &'a K;
    type IntoIter = Iter<'a, K, S, G>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// An iterator over a set's keys.
///
/// This struct is created by the [`iter`](HashSet::iter) method on
/// [`HashSet`]. See its documentation for details.
pub struct Iter<'g, K, S, G> {
    keys: map::Keys<'g, K, (), S, G>,
}

impl<'g, K: 'g, S, G> Iterator for Iter<'g, K, S, G>
where
    K: Hash + Eq,
    S: BuildHasher,
    G: Guard,
{
    type Item = &'g K;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.keys.next()
    }
}

impl<K, S, G> fmt::Debug for Iter<'_, K, S, G>
where
    K: Hash + Eq + fmt::Debug,
    S: BuildHasher,
    G: Guard,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Iter").field(&self.keys).finish()
    }
}
