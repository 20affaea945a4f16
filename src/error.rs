use std::alloc::{handle_alloc_error, Layout};

/// The error type for `try_reserve` and `try_insert`.
///
/// When it is returned the table is left exactly as it was: the old storage
/// stays in place and keeps every element.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum TryReserveError {
    /// The requested capacity exceeds what the table can address.
    #[error("hash table capacity overflow")]
    CapacityOverflow,

    /// The allocator failed to provide memory for the new storage.
    #[error("memory allocation of {} bytes failed", layout.size())]
    AllocError {
        /// The layout of the allocation request that failed.
        layout: Layout,
    },
}

/// Whether a failed allocation is reported to the caller or is fatal.
#[derive(Copy, Clone, Debug)]
pub(crate) enum Fallibility {
    Fallible,
    Infallible,
}

impl Fallibility {
    /// Error to return on capacity overflow.
    #[cold]
    pub(crate) fn capacity_overflow(self) -> TryReserveError {
        match self {
            Fallibility::Fallible => TryReserveError::CapacityOverflow,
            Fallibility::Infallible => panic!("Hash table capacity overflow"),
        }
    }

    /// Error to return on allocation error.
    #[cold]
    pub(crate) fn alloc_err(self, layout: Layout) -> TryReserveError {
        match self {
            Fallibility::Fallible => TryReserveError::AllocError { layout },
            Fallibility::Infallible => handle_alloc_error(layout),
        }
    }
}
