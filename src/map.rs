//! A concurrent hash map with per-group locking.

use crate::error::{Fallibility, TryReserveError};
use crate::raw::{alloc::Allocator, alloc::Global, Access, RawTable};
use crate::util::{equivalent_key, infallible, make_hash, make_hasher};
use core::borrow::Borrow;
use core::fmt::{self, Debug};
use core::hash::{BuildHasher, Hash};
use std::collections::hash_map::RandomState;


/// Default hasher for `ConcurrentFlatMap` and `ConcurrentFlatSet`.
pub type DefaultHashBuilder = RandomState;

/// A hash map which can be used from many threads at once through a shared
/// reference.
///
/// Elements are stored inline in groups of 15 slots, each group guarded by
/// its own reader/writer lock. There is no way to borrow an element outside
/// of the table: lookups run a closure on the element while its group is
/// locked. `cvisit` style methods take the lock shared and hand out `&V`,
/// `visit` style methods take it exclusively and hand out `&mut V`.
///
/// A closure given to the map must not call back into the same map. Debug
/// builds panic when that happens, release builds may deadlock.
///
/// # Examples
///
/// ```
/// use cflat::ConcurrentFlatMap;
/// use std::thread;
///
/// let map = ConcurrentFlatMap::new();
///
/// thread::scope(|s| {
///     for t in 0..4 {
///         let map = &map;
///         s.spawn(move || {
///             for i in 0..100 {
///                 map.insert_or_visit(i, 1, |_, v| *v += 1);
///             }
///             map.insert(1000 + t, 0);
///         });
///     }
/// });
///
/// assert_eq!(map.len(), 104);
/// map.cvisit(&7, |_, v| assert_eq!(*v, 4));
/// ```
pub struct ConcurrentFlatMap<K, V, S = DefaultHashBuilder, A: Allocator = Global> {
    hash_builder: S,
    table: RawTable<(K, V), A>,
}

impl<K, V> ConcurrentFlatMap<K, V, DefaultHashBuilder> {
    /// Creates an empty `ConcurrentFlatMap`.
    ///
    /// The map is initially created with a capacity of 0, so it will not
    /// allocate until it is first inserted into.
    ///
    /// # Examples
    ///
    /// ```
    /// use cflat::ConcurrentFlatMap;
    /// let map: ConcurrentFlatMap<&str, i32> = ConcurrentFlatMap::new();
    /// assert_eq!(map.bucket_count(), 0);
    /// ```
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty `ConcurrentFlatMap` with the specified capacity.
    ///
    /// The map will be able to hold at least `capacity` elements without
    /// reallocating. If `capacity` is 0, the map will not allocate.
    ///
    /// # Examples
    ///
    /// ```
    /// use cflat::ConcurrentFlatMap;
    /// let map: ConcurrentFlatMap<&str, i32> = ConcurrentFlatMap::with_capacity(10);
    /// assert!(map.capacity() >= 10);
    /// ```
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, DefaultHashBuilder::default())
    }
}

impl<K, V, S> ConcurrentFlatMap<K, V, S> {
    /// Creates an empty `ConcurrentFlatMap` which will use the given hash
    /// builder to hash keys.
    ///
    /// # Examples
    ///
    /// ```
    /// use cflat::{ConcurrentFlatMap, DefaultHashBuilder};
    ///
    /// let s = DefaultHashBuilder::default();
    /// let map = ConcurrentFlatMap::with_hasher(s);
    /// map.insert(1, 2);
    /// ```
    #[inline]
    pub fn with_hasher(hash_builder: S) -> Self {
        Self::with_hasher_in(hash_builder, Global)
    }

    /// Creates an empty `ConcurrentFlatMap` with the specified capacity,
    /// using `hash_builder` to hash the keys.
    #[inline]
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        Self::with_capacity_and_hasher_in(capacity, hash_builder, Global)
    }
}

impl<K, V, S, A: Allocator> ConcurrentFlatMap<K, V, S, A> {
    /// Creates an empty `ConcurrentFlatMap` which will use the given hash
    /// builder to hash keys and `alloc` for its storage.
    #[inline]
    pub fn with_hasher_in(hash_builder: S, alloc: A) -> Self {
        Self {
            hash_builder,
            table: RawTable::new_in(alloc),
        }
    }

    /// Creates an empty `ConcurrentFlatMap` with the specified capacity,
    /// using `hash_builder` to hash the keys and `alloc` for its storage.
    ///
    /// # Panics
    ///
    /// Panics if the capacity overflows, and calls
    /// [`handle_alloc_error`](std::alloc::handle_alloc_error) if the
    /// allocation fails.
    #[inline]
    pub fn with_capacity_and_hasher_in(capacity: usize, hash_builder: S, alloc: A) -> Self {
        Self {
            hash_builder,
            table: RawTable::with_capacity_in(capacity, alloc),
        }
    }

    /// Returns a reference to the map's [`BuildHasher`].
    #[inline]
    pub fn hasher(&self) -> &S {
        &self.hash_builder
    }

    /// Returns a reference to the underlying allocator.
    #[inline]
    pub fn allocator(&self) -> &A {
        self.table.allocator()
    }

    /// Returns the number of elements in the map.
    ///
    /// While other threads are inserting this may briefly count elements
    /// whose insertion has not completed yet.
    ///
    /// # Examples
    ///
    /// ```
    /// use cflat::ConcurrentFlatMap;
    ///
    /// let a = ConcurrentFlatMap::new();
    /// assert_eq!(a.len(), 0);
    /// a.insert(1, "a");
    /// assert_eq!(a.len(), 1);
    /// ```
    #[inline]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if the map contains no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of elements the map can hold without reallocating.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Returns the number of slots, occupied or not.
    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.table.buckets()
    }

    /// Returns the ratio of elements to slots.
    #[inline]
    pub fn load_factor(&self) -> f32 {
        let buckets = self.bucket_count();
        if buckets == 0 {
            0.0
        } else {
            self.len() as f32 / buckets as f32
        }
    }

    /// Returns the load factor past which the map grows.
    #[inline]
    pub fn max_load_factor(&self) -> f32 {
        0.875
    }

    /// Returns how many times the map has moved to larger storage.
    ///
    /// # Examples
    ///
    /// ```
    /// use cflat::ConcurrentFlatMap;
    ///
    /// let map = ConcurrentFlatMap::new();
    /// map.reserve(1000);
    /// let generation = map.generation();
    /// map.insert_iter((0..1000).map(|i| (i, i)));
    /// assert_eq!(map.generation(), generation);
    /// ```
    #[inline]
    pub fn generation(&self) -> u64 {
        self.table.generation()
    }

    /// Calls `f` on every element with its group locked exclusively.
    /// Returns the number of elements visited.
    ///
    /// Groups are locked one at a time, so elements inserted or erased
    /// concurrently may or may not be visited.
    ///
    /// # Examples
    ///
    /// ```
    /// use cflat::ConcurrentFlatMap;
    ///
    /// let map: ConcurrentFlatMap<_, _> = (0..10).map(|i| (i, i)).collect();
    /// assert_eq!(map.visit_all(|_, v| *v *= 2), 10);
    /// map.cvisit(&3, |_, v| assert_eq!(*v, 6));
    /// ```
    pub fn visit_all(&self, mut f: impl FnMut(&K, &mut V)) -> usize {
        self.table.for_each(Access::Exclusive, |bucket| {
            let entry = unsafe { bucket.as_mut() };
            f(&entry.0, &mut entry.1);
        })
    }

    /// Calls `f` on every element with its group locked shared.
    /// Returns the number of elements visited.
    pub fn cvisit_all(&self, mut f: impl FnMut(&K, &V)) -> usize {
        self.table.for_each(Access::Shared, |bucket| {
            let entry = unsafe { bucket.as_ref() };
            f(&entry.0, &entry.1);
        })
    }

    /// Erases every element for which `keep` returns `false`.
    /// Returns the number of elements erased.
    ///
    /// # Examples
    ///
    /// ```
    /// use cflat::ConcurrentFlatMap;
    ///
    /// let map: ConcurrentFlatMap<i32, i32> = (0..8).map(|x| (x, x * 10)).collect();
    /// assert_eq!(map.retain(|&k, _| k % 2 == 0), 4);
    /// assert_eq!(map.len(), 4);
    /// ```
    pub fn retain(&self, mut keep: impl FnMut(&K, &mut V) -> bool) -> usize {
        self.table.retain(|entry| keep(&entry.0, &mut entry.1))
    }

    /// Erases every element. Other operations wait until it is done.
    ///
    /// The storage is kept.
    #[inline]
    pub fn clear(&self) {
        self.table.clear();
    }
}

impl<K, V, S, A> ConcurrentFlatMap<K, V, S, A>
where
    K: Eq + Hash,
    S: BuildHasher,
    A: Allocator,
{
    /// Makes room for at least `capacity` elements in total, so that
    /// inserting up to that many elements does not move the storage.
    ///
    /// # Panics
    ///
    /// Panics if the new capacity overflows `usize`.
    #[inline]
    pub fn reserve(&self, capacity: usize) {
        infallible(self.table.reserve(
            capacity,
            make_hasher::<K, V, S>(&self.hash_builder),
            Fallibility::Infallible,
        ));
    }

    /// Tries to make room for at least `capacity` elements in total.
    ///
    /// If the storage cannot grow the map is left as it was.
    ///
    /// # Examples
    ///
    /// ```
    /// use cflat::{ConcurrentFlatMap, TryReserveError};
    ///
    /// let map: ConcurrentFlatMap<i32, i32> = ConcurrentFlatMap::new();
    /// map.try_reserve(10).expect("why is the test harness OOMing on 10 bytes?");
    /// assert_eq!(map.try_reserve(usize::MAX), Err(TryReserveError::CapacityOverflow));
    /// ```
    #[inline]
    pub fn try_reserve(&self, capacity: usize) -> Result<(), TryReserveError> {
        self.table.reserve(
            capacity,
            make_hasher::<K, V, S>(&self.hash_builder),
            Fallibility::Fallible,
        )
    }

    /// Inserts a key-value pair unless the key is already present, in which
    /// case the pair is dropped and the map is left unchanged.
    ///
    /// Returns whether the pair was inserted.
    ///
    /// # Examples
    ///
    /// ```
    /// use cflat::ConcurrentFlatMap;
    ///
    /// let map = ConcurrentFlatMap::new();
    /// assert!(map.insert(37, "a"));
    /// assert!(!map.insert(37, "b"));
    /// map.cvisit(&37, |_, v| assert_eq!(*v, "a"));
    /// ```
    #[inline]
    pub fn insert(&self, k: K, v: V) -> bool {
        infallible(self.try_insert_inner(k, v, Fallibility::Infallible))
    }

    /// Inserts a key-value pair unless the key is already present, reporting
    /// a failure to grow the storage instead of panicking.
    #[inline]
    pub fn try_insert(&self, k: K, v: V) -> Result<bool, TryReserveError> {
        self.try_insert_inner(k, v, Fallibility::Fallible)
    }

    #[inline]
    fn try_insert_inner(&self, k: K, v: V, fallibility: Fallibility) -> Result<bool, TryReserveError> {
        let hash = make_hash(&self.hash_builder, &k);
        self.table.insert(
            hash,
            (k, v),
            |x, y| x.0 == y.0,
            make_hasher::<K, V, S>(&self.hash_builder),
            Access::Shared,
            fallibility,
            |x| x,
            |_, _| {},
        )
    }

    /// Inserts a clone of `value` unless its key is already present.
    ///
    /// Nothing is cloned when the key is present. If cloning panics the map
    /// is left unchanged.
    #[inline]
    pub fn insert_cloned(&self, value: &(K, V)) -> bool
    where
        K: Clone,
        V: Clone,
    {
        let hash = make_hash(&self.hash_builder, &value.0);
        infallible(self.table.insert(
            hash,
            value,
            |x, y| x.0 == y.0,
            make_hasher::<K, V, S>(&self.hash_builder),
            Access::Shared,
            Fallibility::Infallible,
            |x| (x.0.clone(), x.1.clone()),
            |_, _| {},
        ))
    }

    /// Inserts `k` with the value returned by `f` unless `k` is already
    /// present. `f` is only called if the pair is inserted, with the target
    /// group locked.
    ///
    /// # Examples
    ///
    /// ```
    /// use cflat::ConcurrentFlatMap;
    ///
    /// let map = ConcurrentFlatMap::new();
    /// assert!(map.insert_with("k", || vec![1, 2, 3]));
    /// assert!(!map.insert_with("k", || unreachable!()));
    /// ```
    #[inline]
    pub fn insert_with(&self, k: K, f: impl FnOnce() -> V) -> bool {
        let hash = make_hash(&self.hash_builder, &k);
        infallible(self.table.insert(
            hash,
            (k, f),
            |x, y| x.0 == y.0,
            make_hasher::<K, V, S>(&self.hash_builder),
            Access::Shared,
            Fallibility::Infallible,
            |(k, f)| (k, f()),
            |_, _| {},
        ))
    }

    /// Inserts every pair of `iter` in order, as `insert` does. Returns the
    /// number of pairs inserted.
    ///
    /// If a panic escapes from hashing or comparing keys, the pairs before
    /// it stay inserted and the rest of the iterator is dropped.
    pub fn insert_iter(&self, iter: impl IntoIterator<Item = (K, V)>) -> usize {
        let mut inserted = 0;
        for (k, v) in iter {
            if self.insert(k, v) {
                inserted += 1;
            }
        }
        inserted
    }

    /// Inserts a key-value pair, or assigns `v` to the value of an existing
    /// key. The stored key is kept and `k` is dropped in the latter case.
    ///
    /// Returns whether the pair was inserted.
    ///
    /// # Examples
    ///
    /// ```
    /// use cflat::ConcurrentFlatMap;
    ///
    /// let map = ConcurrentFlatMap::new();
    /// assert!(map.insert_or_assign("a", 1));
    /// assert!(!map.insert_or_assign("a", 2));
    /// map.cvisit("a", |_, v| assert_eq!(*v, 2));
    /// ```
    #[inline]
    pub fn insert_or_assign(&self, k: K, v: V) -> bool {
        let hash = make_hash(&self.hash_builder, &k);
        infallible(self.table.insert(
            hash,
            (k, v),
            |x, y| x.0 == y.0,
            make_hasher::<K, V, S>(&self.hash_builder),
            Access::Exclusive,
            Fallibility::Infallible,
            |x| x,
            |bucket, (_, v)| unsafe { bucket.as_mut().1 = v },
        ))
    }

    /// Inserts clones of `k` and `v`, or assigns `v` to the value of an
    /// existing key through [`Clone::clone_from`].
    #[inline]
    pub fn insert_or_assign_cloned(&self, k: &K, v: &V) -> bool
    where
        K: Clone,
        V: Clone,
    {
        let hash = make_hash(&self.hash_builder, k);
        infallible(self.table.insert(
            hash,
            (k, v),
            |x, y| *x.0 == y.0,
            make_hasher::<K, V, S>(&self.hash_builder),
            Access::Exclusive,
            Fallibility::Infallible,
            |(k, v)| (k.clone(), v.clone()),
            |bucket, (_, v)| unsafe { bucket.as_mut().1.clone_from(v) },
        ))
    }

    /// Inserts a key-value pair, or calls `f` on the existing element with
    /// its group locked exclusively. `f` is not called if the pair is
    /// inserted.
    ///
    /// Returns whether the pair was inserted.
    ///
    /// # Examples
    ///
    /// ```
    /// use cflat::ConcurrentFlatMap;
    ///
    /// let counts = ConcurrentFlatMap::new();
    /// for word in ["a", "b", "a"] {
    ///     counts.insert_or_visit(word, 1, |_, n| *n += 1);
    /// }
    /// counts.cvisit("a", |_, n| assert_eq!(*n, 2));
    /// ```
    #[inline]
    pub fn insert_or_visit(&self, k: K, v: V, f: impl FnOnce(&K, &mut V)) -> bool {
        let hash = make_hash(&self.hash_builder, &k);
        infallible(self.table.insert(
            hash,
            (k, v),
            |x, y| x.0 == y.0,
            make_hasher::<K, V, S>(&self.hash_builder),
            Access::Exclusive,
            Fallibility::Infallible,
            |x| x,
            |bucket, _| {
                let entry = unsafe { bucket.as_mut() };
                f(&entry.0, &mut entry.1);
            },
        ))
    }

    /// Inserts a key-value pair, or calls `f` on the existing element with
    /// its group locked shared.
    #[inline]
    pub fn insert_or_cvisit(&self, k: K, v: V, f: impl FnOnce(&K, &V)) -> bool {
        let hash = make_hash(&self.hash_builder, &k);
        infallible(self.table.insert(
            hash,
            (k, v),
            |x, y| x.0 == y.0,
            make_hasher::<K, V, S>(&self.hash_builder),
            Access::Shared,
            Fallibility::Infallible,
            |x| x,
            |bucket, _| {
                let entry = unsafe { bucket.as_ref() };
                f(&entry.0, &entry.1);
            },
        ))
    }

    /// Applies `insert_or_visit` to every pair of `iter` in order. Returns
    /// the number of pairs inserted.
    pub fn insert_or_visit_iter(
        &self,
        iter: impl IntoIterator<Item = (K, V)>,
        mut f: impl FnMut(&K, &mut V),
    ) -> usize {
        let mut inserted = 0;
        for (k, v) in iter {
            if self.insert_or_visit(k, v, &mut f) {
                inserted += 1;
            }
        }
        inserted
    }

    /// Applies `insert_or_cvisit` to every pair of `iter` in order. Returns
    /// the number of pairs inserted.
    pub fn insert_or_cvisit_iter(
        &self,
        iter: impl IntoIterator<Item = (K, V)>,
        mut f: impl FnMut(&K, &V),
    ) -> usize {
        let mut inserted = 0;
        for (k, v) in iter {
            if self.insert_or_cvisit(k, v, &mut f) {
                inserted += 1;
            }
        }
        inserted
    }

    /// Calls `f` on the element with key `k`, if any, with its group locked
    /// exclusively. Returns the number of elements visited.
    #[inline]
    pub fn visit<Q>(&self, k: &Q, f: impl FnOnce(&K, &mut V)) -> usize
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = make_hash(&self.hash_builder, k);
        self.table
            .find(hash, equivalent_key(k), Access::Exclusive, |bucket| {
                let entry = unsafe { bucket.as_mut() };
                f(&entry.0, &mut entry.1);
            })
            .map_or(0, |()| 1)
    }

    /// Calls `f` on the element with key `k`, if any, with its group locked
    /// shared. Returns the number of elements visited.
    ///
    /// # Examples
    ///
    /// ```
    /// use cflat::ConcurrentFlatMap;
    ///
    /// let map = ConcurrentFlatMap::new();
    /// map.insert(String::from("poneyland"), 3);
    ///
    /// let mut value = 0;
    /// assert_eq!(map.cvisit("poneyland", |_, v| value = *v), 1);
    /// assert_eq!(value, 3);
    /// assert_eq!(map.cvisit("horseyland", |_, _| unreachable!()), 0);
    /// ```
    #[inline]
    pub fn cvisit<Q>(&self, k: &Q, f: impl FnOnce(&K, &V)) -> usize
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = make_hash(&self.hash_builder, k);
        self.table
            .find(hash, equivalent_key(k), Access::Shared, |bucket| {
                let entry = unsafe { bucket.as_ref() };
                f(&entry.0, &entry.1);
            })
            .map_or(0, |()| 1)
    }

    /// Returns `true` if the map contains a value for the specified key.
    #[inline]
    pub fn contains<Q>(&self, k: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.count(k) != 0
    }

    /// Returns the number of elements with key `k`, which is 0 or 1.
    #[inline]
    pub fn count<Q>(&self, k: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.cvisit(k, |_, _| {})
    }

    /// Erases the element with key `k`. Returns the number of elements
    /// erased.
    ///
    /// The element is dropped after its group lock is released.
    ///
    /// # Examples
    ///
    /// ```
    /// use cflat::ConcurrentFlatMap;
    ///
    /// let map = ConcurrentFlatMap::new();
    /// map.insert(1, "a");
    /// assert_eq!(map.erase(&1), 1);
    /// assert_eq!(map.erase(&1), 0);
    /// ```
    #[inline]
    pub fn erase<Q>(&self, k: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.erase_if(k, |_, _| true)
    }

    /// Erases the element with key `k` if `pred` returns `true` for it.
    /// Returns the number of elements erased.
    #[inline]
    pub fn erase_if<Q>(&self, k: &Q, pred: impl FnOnce(&K, &mut V) -> bool) -> usize
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = make_hash(&self.hash_builder, k);
        let removed = self
            .table
            .remove_if(hash, equivalent_key(k), |entry| pred(&entry.0, &mut entry.1));
        match removed {
            Some(_) => 1,
            None => 0,
        }
    }
}

impl<K, V, S: Default> Default for ConcurrentFlatMap<K, V, S> {
    /// Creates an empty `ConcurrentFlatMap<K, V, S>`, with the `Default`
    /// value for the hasher.
    #[inline]
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S, A> Debug for ConcurrentFlatMap<K, V, S, A>
where
    K: Debug,
    V: Debug,
    A: Allocator,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        self.cvisit_all(|k, v| {
            map.entry(k, v);
        });
        map.finish()
    }
}

impl<K, V, S> FromIterator<(K, V)> for ConcurrentFlatMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher + Default,
{
    #[inline]
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let iter = iter.into_iter();
        let map = Self::with_capacity_and_hasher(iter.size_hint().0, S::default());
        map.insert_iter(iter);
        map
    }
}

impl<K, V, S, A> Extend<(K, V)> for ConcurrentFlatMap<K, V, S, A>
where
    K: Eq + Hash,
    S: BuildHasher,
    A: Allocator,
{
    #[inline]
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        self.insert_iter(iter);
    }
}
