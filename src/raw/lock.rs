//! Locking discipline for the table.
//!
//! Every group carries its own reader/writer lock. Operations take the
//! table-wide gate in shared mode for their whole duration and lock groups
//! one at a time underneath it. Resizing takes the gate exclusively, which
//! waits for every in-flight group operation to finish and keeps new ones
//! out until the new storage is published.
//!
//! A thread must never enter the same table twice. Doing so from a visitation
//! callback would deadlock on the group lock it already holds, or on the gate
//! if a resize is queued. Debug builds track the tables entered by the current
//! thread and panic instead.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::{
    marker::PhantomData,
    ops::{Deref, DerefMut},
    ptr,
};

#[cfg(debug_assertions)]
use std::cell::RefCell;

/// The mode a group lock is taken in.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Access {
    /// Lookups and const visitation.
    Shared,
    /// Insertion, erasure, assignment and mutable visitation.
    Exclusive,
}

/// The lock protecting the slots and metadata of a single group.
pub(crate) struct GroupLock(RwLock<()>);

impl GroupLock {
    #[inline]
    pub(crate) fn new() -> Self {
        GroupLock(RwLock::new(()))
    }

    #[inline]
    pub(crate) fn read(&self) -> GroupGuard<'_> {
        GroupGuard::Shared(self.0.read())
    }

    #[inline]
    pub(crate) fn write(&self) -> GroupGuard<'_> {
        GroupGuard::Exclusive(self.0.write())
    }

    #[inline]
    pub(crate) fn lock(&self, access: Access) -> GroupGuard<'_> {
        match access {
            Access::Shared => self.read(),
            Access::Exclusive => self.write(),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_locked(&self) -> bool {
        self.0.is_locked()
    }
}

/// A held group lock. Released when dropped, unwinding included.
pub(crate) enum GroupGuard<'a> {
    Shared(RwLockReadGuard<'a, ()>),
    Exclusive(RwLockWriteGuard<'a, ()>),
}

impl GroupGuard<'_> {
    #[inline]
    pub(crate) fn is_exclusive(&self) -> bool {
        matches!(self, GroupGuard::Exclusive(_))
    }

    /// Checks whether this guard was taken on `lock`.
    #[inline]
    pub(crate) fn guards(&self, lock: &GroupLock) -> bool {
        let held = match self {
            GroupGuard::Shared(guard) => RwLockReadGuard::rwlock(guard),
            GroupGuard::Exclusive(guard) => RwLockWriteGuard::rwlock(guard),
        };
        ptr::eq(held, &lock.0)
    }
}

#[cfg(debug_assertions)]
thread_local! {
    static ENTERED: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

#[inline(never)]
#[cold]
#[cfg(debug_assertions)]
fn panic_reentered() -> ! {
    panic!("reentrant access: the current thread is already inside an operation on this table");
}

/// Marks the current thread as being inside an operation on a table.
pub(crate) struct Entered {
    #[cfg(debug_assertions)]
    id: usize,
    // Tied to the thread that entered.
    _marker: PhantomData<*mut ()>,
}

impl Entered {
    #[inline]
    fn new(_id: usize) -> Self {
        #[cfg(debug_assertions)]
        ENTERED.with(|entered| {
            let mut entered = entered.borrow_mut();
            if entered.contains(&_id) {
                drop(entered);
                panic_reentered();
            }
            entered.push(_id);
        });

        Entered {
            #[cfg(debug_assertions)]
            id: _id,
            _marker: PhantomData,
        }
    }
}

impl Drop for Entered {
    #[inline]
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            let _ = ENTERED.try_with(|entered| {
                let mut entered = entered.borrow_mut();
                if let Some(pos) = entered.iter().rposition(|&id| id == self.id) {
                    entered.swap_remove(pos);
                }
            });
        }
    }
}

/// The table-wide gate. Holds the current storage descriptor.
pub(crate) struct Gate<V> {
    current: RwLock<V>,
}

impl<V> Gate<V> {
    #[inline]
    pub(crate) fn new(value: V) -> Self {
        Gate {
            current: RwLock::new(value),
        }
    }

    #[inline]
    fn id(&self) -> usize {
        self as *const Self as usize
    }

    /// Enters the table for a group-level operation.
    #[inline]
    pub(crate) fn shared(&self) -> SharedGate<'_, V> {
        let entered = Entered::new(self.id());
        SharedGate {
            guard: self.current.read(),
            _entered: entered,
        }
    }

    /// Enters the table excluding every other operation.
    #[inline]
    pub(crate) fn exclusive(&self) -> ExclusiveGate<'_, V> {
        let entered = Entered::new(self.id());
        ExclusiveGate {
            guard: self.current.write(),
            _entered: entered,
        }
    }

    #[inline]
    pub(crate) fn get_mut(&mut self) -> &mut V {
        self.current.get_mut()
    }
}

/// The gate held in shared mode.
pub(crate) struct SharedGate<'a, V> {
    guard: RwLockReadGuard<'a, V>,
    _entered: Entered,
}

impl<V> Deref for SharedGate<'_, V> {
    type Target = V;

    #[inline]
    fn deref(&self) -> &V {
        &self.guard
    }
}

/// The gate held in exclusive mode.
pub(crate) struct ExclusiveGate<'a, V> {
    guard: RwLockWriteGuard<'a, V>,
    _entered: Entered,
}

impl<V> Deref for ExclusiveGate<'_, V> {
    type Target = V;

    #[inline]
    fn deref(&self) -> &V {
        &self.guard
    }
}

impl<V> DerefMut for ExclusiveGate<'_, V> {
    #[inline]
    fn deref_mut(&mut self) -> &mut V {
        &mut self.guard
    }
}
