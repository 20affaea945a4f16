//! A concurrent hash set, sharing the engine of the map.

use crate::error::{Fallibility, TryReserveError};
use crate::map::DefaultHashBuilder;
use crate::raw::{alloc::Allocator, alloc::Global, Access, RawTable};
use crate::util::{equivalent, infallible, make_element_hasher, make_hash};
use core::borrow::Borrow;
use core::fmt::{self, Debug};
use core::hash::{BuildHasher, Hash};


/// A hash set which can be used from many threads at once through a shared
/// reference.
///
/// Elements can only be reached through closures which run while the
/// element's group is locked shared. Elements are never handed out mutably,
/// since changing one could change its hash.
///
/// # Examples
///
/// ```
/// use cflat::ConcurrentFlatSet;
///
/// let books = ConcurrentFlatSet::new();
/// books.insert("A Dance With Dragons".to_string());
/// books.insert("To Kill a Mockingbird".to_string());
///
/// assert!(books.contains("To Kill a Mockingbird"));
/// assert!(!books.contains("The Winds of Winter"));
///
/// assert_eq!(books.erase("A Dance With Dragons"), 1);
/// assert_eq!(books.len(), 1);
/// ```
pub struct ConcurrentFlatSet<T, S = DefaultHashBuilder, A: Allocator = Global> {
    hash_builder: S,
    table: RawTable<T, A>,
}

impl<T> ConcurrentFlatSet<T, DefaultHashBuilder> {
    /// Creates an empty `ConcurrentFlatSet`. It does not allocate until it
    /// is first inserted into.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty `ConcurrentFlatSet` able to hold at least
    /// `capacity` elements without reallocating.
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, DefaultHashBuilder::default())
    }
}

impl<T, S> ConcurrentFlatSet<T, S> {
    #[inline]
    pub fn with_hasher(hash_builder: S) -> Self {
        Self::with_hasher_in(hash_builder, Global)
    }

    #[inline]
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        Self::with_capacity_and_hasher_in(capacity, hash_builder, Global)
    }
}

impl<T, S, A: Allocator> ConcurrentFlatSet<T, S, A> {
    #[inline]
    pub fn with_hasher_in(hash_builder: S, alloc: A) -> Self {
        Self {
            hash_builder,
            table: RawTable::new_in(alloc),
        }
    }

    #[inline]
    pub fn with_capacity_and_hasher_in(capacity: usize, hash_builder: S, alloc: A) -> Self {
        Self {
            hash_builder,
            table: RawTable::with_capacity_in(capacity, alloc),
        }
    }

    #[inline]
    pub fn hasher(&self) -> &S {
        &self.hash_builder
    }

    #[inline]
    pub fn allocator(&self) -> &A {
        self.table.allocator()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.table.buckets()
    }

    #[inline]
    pub fn load_factor(&self) -> f32 {
        let buckets = self.bucket_count();
        if buckets == 0 {
            0.0
        } else {
            self.len() as f32 / buckets as f32
        }
    }

    #[inline]
    pub fn max_load_factor(&self) -> f32 {
        0.875
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.table.generation()
    }

    /// Calls `f` on every element. Returns the number of elements visited.
    pub fn cvisit_all(&self, mut f: impl FnMut(&T)) -> usize {
        self.table
            .for_each(Access::Shared, |bucket| f(unsafe { bucket.as_ref() }))
    }

    /// Erases every element for which `keep` returns `false`.
    /// Returns the number of elements erased.
    pub fn retain(&self, mut keep: impl FnMut(&T) -> bool) -> usize {
        self.table.retain(|x| keep(x))
    }

    #[inline]
    pub fn clear(&self) {
        self.table.clear();
    }
}

impl<T, S, A> ConcurrentFlatSet<T, S, A>
where
    T: Eq + Hash,
    S: BuildHasher,
    A: Allocator,
{
    /// Makes room for at least `capacity` elements in total.
    #[inline]
    pub fn reserve(&self, capacity: usize) {
        infallible(self.table.reserve(
            capacity,
            make_element_hasher::<T, S>(&self.hash_builder),
            Fallibility::Infallible,
        ));
    }

    #[inline]
    pub fn try_reserve(&self, capacity: usize) -> Result<(), TryReserveError> {
        self.table.reserve(
            capacity,
            make_element_hasher::<T, S>(&self.hash_builder),
            Fallibility::Fallible,
        )
    }

    /// Adds a value to the set unless an equal one is present.
    ///
    /// Returns whether the value was inserted.
    ///
    /// # Examples
    ///
    /// ```
    /// use cflat::ConcurrentFlatSet;
    ///
    /// let set = ConcurrentFlatSet::new();
    /// assert!(set.insert(2));
    /// assert!(!set.insert(2));
    /// assert_eq!(set.len(), 1);
    /// ```
    #[inline]
    pub fn insert(&self, value: T) -> bool {
        infallible(self.try_insert_inner(value, Fallibility::Infallible))
    }

    #[inline]
    pub fn try_insert(&self, value: T) -> Result<bool, TryReserveError> {
        self.try_insert_inner(value, Fallibility::Fallible)
    }

    #[inline]
    fn try_insert_inner(&self, value: T, fallibility: Fallibility) -> Result<bool, TryReserveError> {
        let hash = make_hash(&self.hash_builder, &value);
        self.table.insert(
            hash,
            value,
            |x, y| x == y,
            make_element_hasher::<T, S>(&self.hash_builder),
            Access::Shared,
            fallibility,
            |x| x,
            |_, _| {},
        )
    }

    /// Adds a clone of `value` unless an equal element is present.
    #[inline]
    pub fn insert_cloned(&self, value: &T) -> bool
    where
        T: Clone,
    {
        let hash = make_hash(&self.hash_builder, value);
        infallible(self.table.insert(
            hash,
            value,
            |x, y| *x == y,
            make_element_hasher::<T, S>(&self.hash_builder),
            Access::Shared,
            Fallibility::Infallible,
            |x| x.clone(),
            |_, _| {},
        ))
    }

    /// Inserts every value of `iter` in order. Returns the number inserted.
    pub fn insert_iter(&self, iter: impl IntoIterator<Item = T>) -> usize {
        let mut inserted = 0;
        for value in iter {
            if self.insert(value) {
                inserted += 1;
            }
        }
        inserted
    }

    /// Adds a value to the set, or calls `f` on the equal element already
    /// present.
    #[inline]
    pub fn insert_or_cvisit(&self, value: T, f: impl FnOnce(&T)) -> bool {
        let hash = make_hash(&self.hash_builder, &value);
        infallible(self.table.insert(
            hash,
            value,
            |x, y| x == y,
            make_element_hasher::<T, S>(&self.hash_builder),
            Access::Shared,
            Fallibility::Infallible,
            |x| x,
            |bucket, _| f(unsafe { bucket.as_ref() }),
        ))
    }

    pub fn insert_or_cvisit_iter(
        &self,
        iter: impl IntoIterator<Item = T>,
        mut f: impl FnMut(&T),
    ) -> usize {
        let mut inserted = 0;
        for value in iter {
            if self.insert_or_cvisit(value, &mut f) {
                inserted += 1;
            }
        }
        inserted
    }

    /// Calls `f` on the element equal to `value`, if any. Returns the
    /// number of elements visited.
    #[inline]
    pub fn cvisit<Q>(&self, value: &Q, f: impl FnOnce(&T)) -> usize
    where
        T: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = make_hash(&self.hash_builder, value);
        self.table
            .find(hash, equivalent(value), Access::Shared, |bucket| {
                f(unsafe { bucket.as_ref() })
            })
            .map_or(0, |()| 1)
    }

    #[inline]
    pub fn contains<Q>(&self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.count(value) != 0
    }

    #[inline]
    pub fn count<Q>(&self, value: &Q) -> usize
    where
        T: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.cvisit(value, |_| {})
    }

    /// Erases the element equal to `value`. Returns the number of elements
    /// erased.
    #[inline]
    pub fn erase<Q>(&self, value: &Q) -> usize
    where
        T: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.erase_if(value, |_| true)
    }

    /// Erases the element equal to `value` if `pred` returns `true` for it.
    #[inline]
    pub fn erase_if<Q>(&self, value: &Q, pred: impl FnOnce(&T) -> bool) -> usize
    where
        T: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = make_hash(&self.hash_builder, value);
        let removed = self.table.remove_if(hash, equivalent(value), |x| pred(x));
        match removed {
            Some(_) => 1,
            None => 0,
        }
    }
}

impl<T, S: Default> Default for ConcurrentFlatSet<T, S> {
    #[inline]
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<T: Debug, S, A: Allocator> Debug for ConcurrentFlatSet<T, S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        self.cvisit_all(|x| {
            set.entry(x);
        });
        set.finish()
    }
}

impl<T, S> FromIterator<T> for ConcurrentFlatSet<T, S>
where
    T: Eq + Hash,
    S: BuildHasher + Default,
{
    #[inline]
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let set = Self::with_capacity_and_hasher(iter.size_hint().0, S::default());
        set.insert_iter(iter);
        set
    }
}

impl<T, S, A> Extend<T> for ConcurrentFlatSet<T, S, A>
where
    T: Eq + Hash,
    S: BuildHasher,
    A: Allocator,
{
    #[inline]
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.insert_iter(iter);
    }
}
