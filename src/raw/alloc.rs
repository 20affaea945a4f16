//! The allocator capability used for table storage.
//!
//! This mirrors the unstable `core::alloc::Allocator` trait closely enough
//! that an implementation can forward to it, while building on stable.

use std::{alloc::Layout, ptr::NonNull};
use thiserror::Error;

/// The error returned by an [`Allocator`] which could not provide memory.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
#[error("memory allocation failed")]
pub struct AllocError;

/// A source of raw memory for table storage.
///
/// # Safety
///
/// Memory returned by `allocate` must be valid for reads and writes of
/// `layout.size()` bytes, aligned to `layout.align()`, and must stay valid
/// until it is passed back to `deallocate` with the same layout. Clones of
/// an allocator must be able to free each other's memory.
pub unsafe trait Allocator {
    /// Allocates a block of memory fitting `layout`.
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError>;

    /// Frees a block of memory. Must not fail.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate` on this allocator (or a
    /// clone of it) with the same `layout`, and not freed since.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// The global memory allocator.
#[derive(Copy, Clone, Debug, Default)]
pub struct Global;

unsafe impl Allocator for Global {
    #[inline]
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        if layout.size() == 0 {
            // Any aligned, non-null pointer is a valid zero sized allocation.
            return Ok(unsafe { NonNull::new_unchecked(layout.align() as *mut u8) });
        }
        NonNull::new(unsafe { std::alloc::alloc(layout) }).ok_or(AllocError)
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() != 0 {
            std::alloc::dealloc(ptr.as_ptr(), layout)
        }
    }
}

unsafe impl<A: Allocator + ?Sized> Allocator for &A {
    #[inline]
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        (**self).allocate(layout)
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        (**self).deallocate(ptr, layout)
    }
}
