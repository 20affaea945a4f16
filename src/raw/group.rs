//! Slot groups and their metadata.
//!
//! A group is a cluster of `GROUP_WIDTH` slots sharing one lock and one
//! 16-byte metadata block. Bytes `0..GROUP_WIDTH` of the block describe the
//! slots: `EMPTY` for a vacant slot, or the reduced hash of the element it
//! holds. The last byte is the overflow byte: bit `hash % 8` is set whenever
//! an insertion for such a hash found the group full and moved on, so a
//! lookup may stop at the first group where its bit is clear.

use super::bitmask::BitMask;
use super::lock::{GroupGuard, GroupLock};
use std::{
    cell::UnsafeCell,
    sync::atomic::{AtomicU32, Ordering},
};

/// Number of slots in a group.
pub(crate) const GROUP_WIDTH: usize = 15;

/// Metadata byte of a vacant slot. Reduced hashes are never `EMPTY`.
pub(crate) const EMPTY: u8 = 0;

const OVERFLOW_INDEX: usize = 15;

pub(crate) type BitMaskWord = u128;
pub(crate) const BITMASK_STRIDE: usize = 8;
/// High bit of every slot byte, overflow byte excluded.
pub(crate) const BITMASK_MASK: BitMaskWord = 0x0080_8080_8080_8080_8080_8080_8080_8080;

const LOW_SEVEN: BitMaskWord = 0x7f7f_7f7f_7f7f_7f7f_7f7f_7f7f_7f7f_7f7f;

#[inline]
fn repeat(byte: u8) -> BitMaskWord {
    BitMaskWord::from_le_bytes([byte; 16])
}

/// Sets the high bit of every byte of `x` which is zero, and nothing else.
///
/// Unlike the classic `(x - 0x01..) & !x & 0x80..` trick this has no false
/// positives, since the addition can never carry into the next byte.
#[inline]
fn zero_bytes(x: BitMaskWord) -> BitMaskWord {
    !(((x & LOW_SEVEN).wrapping_add(LOW_SEVEN)) | x | LOW_SEVEN)
}

/// Returns the reduced hash stored in the metadata of an occupied slot.
#[inline]
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn h2(hash: u64) -> u8 {
    let top = (hash >> 56) as u8;
    if top == EMPTY {
        1
    } else {
        top
    }
}

#[inline]
fn overflow_bit(hash: u64) -> u8 {
    1 << (hash % 8)
}

/// The metadata block of a group.
#[derive(Copy, Clone, PartialEq, Eq)]
#[repr(C, align(16))]
pub(crate) struct Metadata([u8; 16]);

impl Metadata {
    pub(crate) const EMPTY: Metadata = Metadata([EMPTY; 16]);

    #[inline]
    fn word(self) -> BitMaskWord {
        BitMaskWord::from_le_bytes(self.0)
    }

    /// Returns a `BitMask` indicating all slots whose reduced hash is `byte`.
    #[inline]
    pub(crate) fn match_byte(self, byte: u8) -> BitMask {
        BitMask(zero_bytes(self.word() ^ repeat(byte)) & BITMASK_MASK)
    }

    /// Returns a `BitMask` indicating all vacant slots.
    #[inline]
    pub(crate) fn match_empty(self) -> BitMask {
        BitMask(zero_bytes(self.word()) & BITMASK_MASK)
    }

    /// Returns a `BitMask` indicating all occupied slots.
    #[inline]
    pub(crate) fn match_full(self) -> BitMask {
        self.match_empty().invert()
    }

    #[cfg(test)]
    pub(crate) fn is_full(self, index: usize) -> bool {
        debug_assert!(index < GROUP_WIDTH);
        self.0[index] != EMPTY
    }

    #[inline]
    pub(crate) fn set(&mut self, index: usize, hash: u64) {
        debug_assert!(index < GROUP_WIDTH);
        self.0[index] = h2(hash);
    }

    #[inline]
    pub(crate) fn clear(&mut self, index: usize) {
        debug_assert!(index < GROUP_WIDTH);
        self.0[index] = EMPTY;
    }

    /// Records that an insertion for `hash` continued past this group.
    #[inline]
    pub(crate) fn mark_overflow(&mut self, hash: u64) {
        self.0[OVERFLOW_INDEX] |= overflow_bit(hash);
    }

    /// Returns whether no insertion for a hash like `hash` ever continued
    /// past this group, in which case a lookup can stop here.
    #[inline]
    pub(crate) fn is_not_overflowed(self, hash: u64) -> bool {
        self.0[OVERFLOW_INDEX] & overflow_bit(hash) == 0
    }

    #[cfg(test)]
    pub(crate) fn overflow(self) -> u8 {
        self.0[OVERFLOW_INDEX]
    }
}

/// The control block of a group: its lock, its insertion counter and its
/// metadata.
///
/// The insertion counter of a group is bumped by every insertion whose probe
/// sequence starts at that group. Inserters read it before looking the key
/// up and bump it once they have a vacant slot locked; a mismatch means some
/// other thread may have inserted the same key in the meantime and the
/// inserter starts over.
#[repr(C)]
pub(crate) struct Group {
    lock: GroupLock,
    insert_counter: AtomicU32,
    meta: UnsafeCell<Metadata>,
}

impl Group {
    #[inline]
    pub(crate) fn new() -> Self {
        Group {
            lock: GroupLock::new(),
            insert_counter: AtomicU32::new(0),
            meta: UnsafeCell::new(Metadata::EMPTY),
        }
    }

    #[inline]
    pub(crate) fn lock(&self) -> &GroupLock {
        &self.lock
    }

    #[inline]
    pub(crate) fn insert_count(&self) -> u32 {
        self.insert_counter.load(Ordering::Acquire)
    }

    /// Claims the next insertion from this group's probe sequence. Returns
    /// whether no other insertion happened since `seen` was read.
    #[inline]
    pub(crate) fn claim_insert(&self, seen: u32) -> bool {
        self.insert_counter.fetch_add(1, Ordering::AcqRel) == seen
    }

    /// Reads the metadata. `guard` must be held on this group's lock.
    #[inline]
    pub(crate) fn meta(&self, guard: &GroupGuard<'_>) -> Metadata {
        debug_assert!(guard.guards(&self.lock));
        unsafe { *self.meta.get() }
    }

    /// Gives write access to the metadata. `guard` must be an exclusive
    /// guard held on this group's lock.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) fn meta_mut<'g>(&'g self, guard: &'g mut GroupGuard<'_>) -> &'g mut Metadata {
        debug_assert!(guard.guards(&self.lock));
        debug_assert!(guard.is_exclusive());
        unsafe { &mut *self.meta.get() }
    }

    /// Access to the metadata while the whole table is held exclusively.
    #[inline]
    pub(crate) fn meta_exclusive(&mut self) -> &mut Metadata {
        self.meta.get_mut()
    }
}
