//! This crate contains [ConcurrentFlatMap] and [ConcurrentFlatSet], hash tables which many threads
//! can insert into, erase from and visit at the same time through a shared reference.
//!
//! Elements are stored inline in an open-addressing table split into groups of 15 slots. Each
//! group has its own reader/writer lock, so operations on different groups do not contend.
//! Elements are reached through closures which run with the element's group locked, and a panic
//! escaping from a hasher, comparison, constructor or closure leaves the table consistent.

#![allow(clippy::len_without_is_empty)]

#[macro_use]
mod macros;

mod error;
mod raw;
mod scopeguard;
mod util;

pub mod map;
pub mod set;

pub use error::TryReserveError;
pub use map::{ConcurrentFlatMap, DefaultHashBuilder};
pub use raw::alloc::{AllocError, Allocator, Global};
pub use set::ConcurrentFlatSet;
