//! Table storage: one allocation holding the group control blocks followed
//! by the slots, and the element-level operations on it.
//!
//! Nothing here takes the gate. Shared methods lock groups themselves and
//! rely on the caller holding the gate in shared mode; `&mut self` methods
//! rely on the caller holding it exclusively.

use super::{
    alloc::{AllocError, Allocator},
    group::{Group, Metadata, GROUP_WIDTH},
    lock::{Access, GroupGuard},
    probe::{groups_to_capacity, ProbeSeq},
};
use crate::error::{Fallibility, TryReserveError};
use core::ptr::NonNull;
use std::{
    alloc::Layout,
    marker::PhantomData,
    ptr,
    sync::atomic::{AtomicUsize, Ordering},
};

/// A reference to a slot holding (or about to hold) a `T`.
pub(crate) struct Bucket<T> {
    ptr: NonNull<T>,
}

impl<T> Clone for Bucket<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Bucket<T> {}

impl<T> Bucket<T> {
    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }
    #[inline]
    pub(crate) unsafe fn drop(&self) {
        self.as_ptr().drop_in_place();
    }
    #[inline]
    pub(crate) unsafe fn read(&self) -> T {
        self.as_ptr().read()
    }
    #[inline]
    pub(crate) unsafe fn write(&self, val: T) {
        self.as_ptr().write(val);
    }
    #[inline]
    pub(crate) unsafe fn as_ref<'a>(&self) -> &'a T {
        &*self.as_ptr()
    }
    #[inline]
    pub(crate) unsafe fn as_mut<'a>(&self) -> &'a mut T {
        &mut *self.as_ptr()
    }
}

/// An occupied slot found by a lookup, with its group lock held.
pub(crate) struct Found<'a, T> {
    guard: GroupGuard<'a>,
    group: &'a Group,
    index: usize,
    pub(crate) bucket: Bucket<T>,
}

impl<T> Found<'_, T> {
    /// Moves the element out of the table, leaving the slot vacant.
    /// The lookup must have been made with exclusive access.
    #[inline]
    pub(crate) fn take(mut self) -> T {
        self.group.meta_mut(&mut self.guard).clear(self.index);
        unsafe { self.bucket.read() }
    }
}

/// A vacant slot, locked exclusively and claimed for one insertion.
pub(crate) struct VacantSlot<'a, T> {
    guard: GroupGuard<'a>,
    group: &'a Group,
    index: usize,
    bucket: Bucket<T>,
    hash: u64,
}

impl<T> VacantSlot<'_, T> {
    /// Stores `value` and publishes it in the metadata.
    #[inline]
    pub(crate) fn insert(mut self, value: T) -> Bucket<T> {
        unsafe { self.bucket.write(value) };
        self.group
            .meta_mut(&mut self.guard)
            .set(self.index, self.hash);
        self.bucket
    }
}

/// The outcome of looking for room for a new element.
pub(crate) enum Vacancy<'a, T> {
    Slot(VacantSlot<'a, T>),
    /// Another insertion starting at the same group got in first.
    Contended,
    /// Every group was full when visited.
    Exhausted,
}

/// The storage of a table. Owned by the gate; copying it around does not
/// copy the storage.
pub(crate) struct TableRef<T> {
    groups: NonNull<Group>,
    slots: NonNull<T>,
    group_count: usize,
    marker: PhantomData<T>,
}

impl<T> TableRef<T> {
    /// A table without any storage. Lookups find nothing and insertions
    /// have to grow it first.
    #[inline]
    pub(crate) fn empty() -> Self {
        TableRef {
            groups: NonNull::dangling(),
            slots: NonNull::dangling(),
            group_count: 0,
            marker: PhantomData,
        }
    }

    #[inline]
    fn layout(groups: usize) -> Option<(Layout, usize)> {
        let control = Layout::array::<Group>(groups).ok()?;
        let slots = Layout::array::<T>(groups.checked_mul(GROUP_WIDTH)?).ok()?;
        let (total, slots_offset) = control.extend(slots).ok()?;
        Some((total.pad_to_align(), slots_offset))
    }

    pub(crate) fn allocate<A: Allocator>(
        alloc: &A,
        groups: usize,
        fallibility: Fallibility,
    ) -> Result<Self, TryReserveError> {
        debug_assert!(groups.is_power_of_two());

        let (layout, slots_offset) = match Self::layout(groups) {
            Some(layout) => layout,
            None => return Err(fallibility.capacity_overflow()),
        };

        let ptr = match alloc.allocate(layout) {
            Ok(ptr) => ptr,
            Err(AllocError) => return Err(fallibility.alloc_err(layout)),
        };

        unsafe {
            let group_ptr = ptr.cast::<Group>();
            for i in 0..groups {
                group_ptr.as_ptr().add(i).write(Group::new());
            }

            Ok(TableRef {
                groups: group_ptr,
                slots: NonNull::new_unchecked(ptr.as_ptr().add(slots_offset).cast::<T>()),
                group_count: groups,
                marker: PhantomData,
            })
        }
    }

    /// Frees the storage without dropping any element still in it.
    ///
    /// The caller must own the storage and no group may be locked.
    pub(crate) unsafe fn free_storage<A: Allocator>(self, alloc: &A) {
        if self.group_count == 0 {
            return;
        }

        ptr::drop_in_place(ptr::slice_from_raw_parts_mut(
            self.groups.as_ptr(),
            self.group_count,
        ));

        // The layout was validated when the storage was allocated.
        let (layout, _) = Self::layout(self.group_count).unwrap_unchecked();
        alloc.deallocate(self.groups.cast(), layout);
    }

    /// Returns the number of groups.
    #[inline]
    pub(crate) fn groups(&self) -> usize {
        self.group_count
    }

    #[inline]
    pub(crate) fn group_mask(&self) -> usize {
        self.group_count.wrapping_sub(1)
    }

    /// Returns the number of slots.
    #[inline]
    pub(crate) fn buckets(&self) -> usize {
        self.group_count * GROUP_WIDTH
    }

    /// Returns the number of elements the storage may hold before it has
    /// to grow.
    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        groups_to_capacity(self.group_count)
    }

    #[inline]
    pub(crate) fn probe_seq(&self, hash: u64) -> ProbeSeq {
        ProbeSeq::new(hash, self.group_mask())
    }

    #[inline]
    pub(crate) fn group(&self, pos: usize) -> &Group {
        debug_assert!(pos < self.group_count);
        unsafe { &*self.groups.as_ptr().add(pos) }
    }

    #[inline]
    unsafe fn group_mut(&mut self, pos: usize) -> &mut Group {
        debug_assert!(pos < self.group_count);
        &mut *self.groups.as_ptr().add(pos)
    }

    /// Returns a pointer to a slot.
    #[inline]
    pub(crate) unsafe fn bucket(&self, pos: usize, index: usize) -> Bucket<T> {
        debug_assert!(pos < self.group_count);
        debug_assert!(index < GROUP_WIDTH);

        Bucket {
            ptr: NonNull::new_unchecked(self.slots.as_ptr().add(pos * GROUP_WIDTH + index)),
        }
    }

    /// Searches for an element, locking each group visited with `access`.
    ///
    /// `eq` runs with the group lock held. If it panics the lock is released
    /// by unwinding and nothing has been modified.
    pub(crate) fn find(
        &self,
        hash: u64,
        mut eq: impl FnMut(&T) -> bool,
        access: Access,
    ) -> Option<Found<'_, T>> {
        if self.group_count == 0 {
            return None;
        }

        let h2_hash = super::group::h2(hash);
        let mut probe_seq = self.probe_seq(hash);

        loop {
            let group = self.group(probe_seq.pos);
            let guard = group.lock().lock(access);
            let meta = group.meta(&guard);

            for index in meta.match_byte(h2_hash) {
                let bucket = unsafe { self.bucket(probe_seq.pos, index) };
                if eq(unsafe { bucket.as_ref() }) {
                    return Some(Found {
                        guard,
                        group,
                        index,
                        bucket,
                    });
                }
            }

            if meta.is_not_overflowed(hash) {
                return None;
            }

            drop(guard);

            if !probe_seq.move_next(self.group_mask()) {
                return None;
            }
        }
    }

    /// Looks for a vacant slot along the probe sequence of `hash`, marking
    /// the groups passed over as overflowed.
    ///
    /// `home` is the first group of the probe sequence and `seen` the value
    /// of its insertion counter read before the key was looked up. The slot
    /// is only handed out if no other insertion from `home` happened since.
    pub(crate) fn find_vacant<'a>(&'a self, hash: u64, home: &Group, seen: u32) -> Vacancy<'a, T> {
        debug_assert!(self.group_count > 0);

        let mut probe_seq = self.probe_seq(hash);

        loop {
            let group = self.group(probe_seq.pos);
            let mut guard = group.lock().write();

            if let Some(index) = group.meta(&guard).match_empty().lowest_set_bit() {
                if !home.claim_insert(seen) {
                    return Vacancy::Contended;
                }

                return Vacancy::Slot(VacantSlot {
                    guard,
                    group,
                    index,
                    bucket: unsafe { self.bucket(probe_seq.pos, index) },
                    hash,
                });
            }

            group.meta_mut(&mut guard).mark_overflow(hash);
            drop(guard);

            if !probe_seq.move_next(self.group_mask()) {
                return Vacancy::Exhausted;
            }
        }
    }

    /// Claims a vacant slot for an element known to be absent, without
    /// locking. There must be at least one vacant slot in the table.
    unsafe fn prepare_insert_exclusive(&mut self, hash: u64) -> Bucket<T> {
        let mut probe_seq = self.probe_seq(hash);

        loop {
            let pos = probe_seq.pos;
            let meta = self.group_mut(pos).meta_exclusive();

            if let Some(index) = meta.match_empty().lowest_set_bit() {
                meta.set(index, hash);
                return self.bucket(pos, index);
            }

            meta.mark_overflow(hash);

            let more = probe_seq.move_next(self.group_mask());
            debug_assert!(more, "no vacant slot in a table being rehashed into");
        }
    }

    /// Moves every element into `new_table`, which must be empty and large
    /// enough to hold them.
    ///
    /// Elements are copied bitwise and stay owned by `self` until the caller
    /// frees `self` without dropping them. If `hasher` panics, `self` is left
    /// untouched and `new_table` must be freed without dropping anything.
    pub(crate) unsafe fn rehash_into(
        &mut self,
        new_table: &mut TableRef<T>,
        hasher: impl Fn(&T) -> u64,
    ) {
        for pos in 0..self.group_count {
            let meta = *self.group_mut(pos).meta_exclusive();

            for index in meta.match_full() {
                let from = self.bucket(pos, index);

                // This may panic.
                let hash = hasher(from.as_ref());

                let to = new_table.prepare_insert_exclusive(hash);
                to.as_ptr().copy_from_nonoverlapping(from.as_ptr(), 1);
            }
        }
    }

    /// Drops every element, keeping `items` in step so that a panicking
    /// destructor leaves the count consistent with the metadata.
    pub(crate) unsafe fn drop_elements(&mut self, items: &AtomicUsize) {
        for pos in 0..self.group_count {
            let meta = *self.group_mut(pos).meta_exclusive();

            for index in meta.match_full() {
                self.group_mut(pos).meta_exclusive().clear(index);
                items.fetch_sub(1, Ordering::Relaxed);
                self.bucket(pos, index).drop();
            }

            *self.group_mut(pos).meta_exclusive() = Metadata::EMPTY;
        }
    }
}
