//! The concurrent table engine shared by the map and the set.
//!
//! `RawTable` knows nothing about keys. Callers pass the hash of the element
//! they are interested in along with closures for equality, hashing stored
//! elements and constructing new ones.

use self::{
    alloc::{Allocator, Global},
    lock::Gate,
    probe::{capacity_to_groups, grown_groups},
    storage::{Found, TableRef, VacantSlot, Vacancy},
};
use crate::{
    error::{Fallibility, TryReserveError},
    scopeguard::{guard, ScopeGuard},
};
use crossbeam_utils::CachePadded;
use std::{
    hint,
    marker::PhantomData,
    mem,
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
};

pub(crate) mod alloc;
mod bitmask;
pub(crate) mod group;
pub(crate) mod lock;
mod probe;
mod storage;


pub(crate) use self::lock::Access;
pub(crate) use self::storage::Bucket;

/// One unit of the element count, taken before an insertion claims a slot
/// and given back unless the insertion commits.
struct Reservation<'a> {
    items: &'a AtomicUsize,
}

impl Reservation<'_> {
    #[inline]
    fn commit(self) {
        mem::forget(self);
    }
}

impl Drop for Reservation<'_> {
    #[inline]
    fn drop(&mut self) {
        self.items.fetch_sub(1, Ordering::Relaxed);
    }
}

enum Probe<'a, T> {
    Found(Found<'a, T>),
    Vacant(VacantSlot<'a, T>, Reservation<'a>),
    /// The table has to grow before the element fits.
    Full,
}

pub(crate) struct RawTable<T, A: Allocator = Global> {
    gate: Gate<TableRef<T>>,
    items: CachePadded<AtomicUsize>,
    epoch: AtomicU64,
    alloc: A,
    marker: PhantomData<T>,
}

unsafe impl<T: Send, A: Allocator + Send> Send for RawTable<T, A> {}
unsafe impl<T: Send + Sync, A: Allocator + Sync> Sync for RawTable<T, A> {}

impl<T, A: Allocator> RawTable<T, A> {
    #[inline]
    pub(crate) fn new_in(alloc: A) -> Self {
        RawTable {
            gate: Gate::new(TableRef::empty()),
            items: CachePadded::new(AtomicUsize::new(0)),
            epoch: AtomicU64::new(0),
            alloc,
            marker: PhantomData,
        }
    }

    /// Creates a table able to hold `capacity` elements without growing.
    pub(crate) fn try_with_capacity_in(
        capacity: usize,
        alloc: A,
        fallibility: Fallibility,
    ) -> Result<Self, TryReserveError> {
        let groups = match capacity_to_groups(capacity) {
            Some(groups) => groups,
            None => return Err(fallibility.capacity_overflow()),
        };

        let table = if groups == 0 {
            TableRef::empty()
        } else {
            TableRef::allocate(&alloc, groups, fallibility)?
        };

        Ok(RawTable {
            gate: Gate::new(table),
            items: CachePadded::new(AtomicUsize::new(0)),
            epoch: AtomicU64::new(0),
            alloc,
            marker: PhantomData,
        })
    }

    /// Panics on capacity overflow and aborts through `handle_alloc_error`
    /// if the allocation fails.
    #[inline]
    pub(crate) fn with_capacity_in(capacity: usize, alloc: A) -> Self {
        match Self::try_with_capacity_in(capacity, alloc, Fallibility::Infallible) {
            Ok(table) => table,
            Err(_) => unsafe { hint::unreachable_unchecked() },
        }
    }

    #[inline]
    pub(crate) fn allocator(&self) -> &A {
        &self.alloc
    }

    /// Returns the number of elements, including insertions in flight.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.items.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.gate.shared().capacity()
    }

    #[inline]
    pub(crate) fn buckets(&self) -> usize {
        self.gate.shared().buckets()
    }

    /// Returns the number of times the storage has been replaced.
    #[inline]
    pub(crate) fn generation(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Looks an element up and runs `f` on it with its group locked in
    /// `access` mode.
    #[inline]
    pub(crate) fn find<R>(
        &self,
        hash: u64,
        eq: impl FnMut(&T) -> bool,
        access: Access,
        f: impl FnOnce(Bucket<T>) -> R,
    ) -> Option<R> {
        let table = self.gate.shared();
        let found = table.find(hash, eq, access)?;
        Some(f(found.bucket))
    }

    /// Inserts the element built from `input` unless an equal one is
    /// present, in which case `visit` runs on the stored element instead.
    ///
    /// The lookup locks groups in `access` mode, which is also the mode the
    /// stored element is visited in. `construct` runs with the target group
    /// locked exclusively; if it panics the slot stays vacant and the
    /// reserved size is given back.
    ///
    /// Returns whether an element was inserted.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn insert<X>(
        &self,
        hash: u64,
        input: X,
        mut eq: impl FnMut(&X, &T) -> bool,
        hasher: impl Fn(&T) -> u64,
        access: Access,
        fallibility: Fallibility,
        construct: impl FnOnce(X) -> T,
        visit: impl FnOnce(Bucket<T>, X),
    ) -> Result<bool, TryReserveError> {
        loop {
            let seen_epoch = {
                let table = self.gate.shared();
                let seen_epoch = self.epoch.load(Ordering::Acquire);

                let probe = self.probe(&table, hash, |stored| eq(&input, stored), access);
                match probe {
                    Probe::Found(found) => {
                        visit(found.bucket, input);
                        return Ok(false);
                    }
                    Probe::Vacant(slot, reservation) => {
                        // This may panic.
                        let value = construct(input);

                        slot.insert(value);
                        reservation.commit();
                        return Ok(true);
                    }
                    Probe::Full => {}
                }
                seen_epoch
            };

            self.grow(seen_epoch, &hasher, fallibility)?;
        }
    }

    /// Finds the element matching `eq`, or a vacant slot and a unit of size
    /// for a new one.
    fn probe<'a>(
        &'a self,
        table: &'a TableRef<T>,
        hash: u64,
        mut eq: impl FnMut(&T) -> bool,
        access: Access,
    ) -> Probe<'a, T> {
        if table.groups() == 0 {
            return Probe::Full;
        }

        let max_load = table.capacity();
        let home = table.group(table.probe_seq(hash).pos);

        loop {
            let seen = home.insert_count();

            if let Some(found) = table.find(hash, &mut eq, access) {
                return Probe::Found(found);
            }

            let reservation = match self.reserve_one(max_load) {
                Some(reservation) => reservation,
                None => return Probe::Full,
            };

            match table.find_vacant(hash, home, seen) {
                Vacancy::Slot(slot) => return Probe::Vacant(slot, reservation),
                Vacancy::Contended => {
                    // The same key may have gone in meanwhile, look again.
                }
                Vacancy::Exhausted => {
                    // Erasures made room behind us. Rare, just retry.
                }
            }
        }
    }

    #[inline]
    fn reserve_one(&self, max_load: usize) -> Option<Reservation<'_>> {
        let items = &*self.items;
        if items.fetch_add(1, Ordering::Relaxed) >= max_load {
            items.fetch_sub(1, Ordering::Relaxed);
            None
        } else {
            Some(Reservation { items })
        }
    }

    /// Grows the table unless it was replaced since `seen_epoch`.
    #[cold]
    #[inline(never)]
    fn grow(
        &self,
        seen_epoch: u64,
        hasher: &impl Fn(&T) -> u64,
        fallibility: Fallibility,
    ) -> Result<(), TryReserveError> {
        let mut table = self.gate.exclusive();

        if self.epoch.load(Ordering::Acquire) != seen_epoch {
            log_trace!("table already grown by another thread, retrying");
            return Ok(());
        }

        let needed = match self.len().checked_add(1) {
            Some(needed) => needed,
            None => return Err(fallibility.capacity_overflow()),
        };

        if needed <= table.capacity() {
            // Erasures made room since the insertion gave up.
            return Ok(());
        }

        let groups = match grown_groups(table.groups(), needed) {
            Some(groups) => groups,
            None => return Err(fallibility.capacity_overflow()),
        };

        self.resize(&mut table, groups, hasher, fallibility)
    }

    /// Makes sure `capacity` elements fit without growing.
    pub(crate) fn reserve(
        &self,
        capacity: usize,
        hasher: impl Fn(&T) -> u64,
        fallibility: Fallibility,
    ) -> Result<(), TryReserveError> {
        if capacity <= self.capacity() {
            return Ok(());
        }

        let mut table = self.gate.exclusive();

        if capacity <= table.capacity() {
            return Ok(());
        }

        let groups = match capacity_to_groups(capacity) {
            Some(groups) => groups,
            None => return Err(fallibility.capacity_overflow()),
        };

        self.resize(&mut table, groups, &hasher, fallibility)
    }

    /// Moves every element into new storage of `groups` groups. The gate
    /// must be held exclusively.
    ///
    /// On failure, whether the allocation failed or `hasher` panicked, the
    /// current storage is left in place with all its elements.
    fn resize(
        &self,
        table: &mut TableRef<T>,
        groups: usize,
        hasher: &impl Fn(&T) -> u64,
        fallibility: Fallibility,
    ) -> Result<(), TryReserveError> {
        debug_assert!(groups > table.groups());

        let new_table = match TableRef::allocate(&self.alloc, groups, fallibility) {
            Ok(new_table) => new_table,
            Err(err) => {
                log_warn!("abandoning resize to {} groups: {}", groups, err);
                return Err(err);
            }
        };

        // The elements are only copied into the new storage, so if the
        // hasher panics it is freed without dropping anything.
        let mut new_table = guard(new_table, |new_table| unsafe {
            log_warn!("abandoning resize: hasher panicked while rehashing");
            mem::replace(new_table, TableRef::empty()).free_storage(&self.alloc);
        });

        unsafe { table.rehash_into(&mut new_table, hasher) };

        let new_table = ScopeGuard::into_inner(new_table);
        let old_table = mem::replace(table, new_table);
        let _old_buckets = old_table.buckets();
        unsafe { old_table.free_storage(&self.alloc) };

        let _epoch = self.epoch.fetch_add(1, Ordering::Release) + 1;

        log_debug!(
            "resized table from {} to {} slots ({} elements, generation {})",
            _old_buckets,
            table.buckets(),
            self.len(),
            _epoch
        );

        Ok(())
    }

    /// Removes the element matching `eq` if `pred` agrees, returning it.
    ///
    /// The caller drops the element, which happens after every lock is
    /// released.
    pub(crate) fn remove_if(
        &self,
        hash: u64,
        eq: impl FnMut(&T) -> bool,
        pred: impl FnOnce(&mut T) -> bool,
    ) -> Option<T> {
        let table = self.gate.shared();
        let found = table.find(hash, eq, Access::Exclusive)?;

        if !pred(unsafe { found.bucket.as_mut() }) {
            return None;
        }

        let value = found.take();
        self.items.fetch_sub(1, Ordering::Relaxed);
        Some(value)
    }

    /// Runs `f` on every element, one group at a time, each group locked in
    /// `access` mode. Returns the number of elements visited.
    pub(crate) fn for_each(&self, access: Access, mut f: impl FnMut(Bucket<T>)) -> usize {
        let table = self.gate.shared();
        let mut visited = 0;

        for pos in 0..table.groups() {
            let group = table.group(pos);
            let guard = group.lock().lock(access);

            for index in group.meta(&guard).match_full() {
                f(unsafe { table.bucket(pos, index) });
                visited += 1;
            }
        }

        visited
    }

    /// Removes every element for which `keep` returns `false`. Returns the
    /// number of elements removed.
    ///
    /// Removed elements of a group are dropped once its lock is released.
    pub(crate) fn retain(&self, mut keep: impl FnMut(&mut T) -> bool) -> usize {
        let table = self.gate.shared();
        let mut removed = Vec::new();
        let mut count = 0;

        for pos in 0..table.groups() {
            {
                let group = table.group(pos);
                let mut guard = group.lock().write();

                for index in group.meta(&guard).match_full() {
                    let bucket = unsafe { table.bucket(pos, index) };

                    if !keep(unsafe { bucket.as_mut() }) {
                        group.meta_mut(&mut guard).clear(index);
                        self.items.fetch_sub(1, Ordering::Relaxed);
                        removed.push(unsafe { bucket.read() });
                        count += 1;
                    }
                }
            }

            removed.clear();
        }

        count
    }

    /// Drops every element. Excludes all other operations while it runs.
    pub(crate) fn clear(&self) {
        let mut table = self.gate.exclusive();
        unsafe { table.drop_elements(&self.items) };
    }
}

impl<T, A: Allocator> Drop for RawTable<T, A> {
    fn drop(&mut self) {
        let table = mem::replace(self.gate.get_mut(), TableRef::empty());

        // Free the storage even if an element destructor panics.
        let mut table = guard(table, |table| unsafe {
            mem::replace(table, TableRef::empty()).free_storage(&self.alloc);
        });

        unsafe { table.drop_elements(&self.items) };
    }
}
