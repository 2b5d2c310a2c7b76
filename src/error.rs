//! Error types for the `pocketmap` crate.
//!
//! Only allocation can fail. Absence of a key is never an error: lookups
//! return `Option` or `bool`.

/// Errors reported by mutating table operations.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Allocating the bucket arrays failed, either when creating a table or
    /// while growing/compacting it.
    ///
    /// A table that hits this during a resize is poisoned: its previous
    /// contents stay readable, but every later insert is refused with
    /// [`Error::Poisoned`]. The table should be dropped.
    #[error("failed to allocate bucket arrays for {buckets} buckets")]
    ResizeAlloc {
        /// Bucket count that was being allocated.
        buckets: usize,
    },

    /// Allocating out-of-line storage for a single long key failed.
    ///
    /// The table is unchanged and remains fully usable; the entry was not
    /// added.
    #[error("failed to allocate {len} bytes of key storage")]
    KeyAlloc {
        /// Length of the key that could not be stored.
        len: usize,
    },

    /// The requested bucket count does not fit in the address space.
    #[error("requested capacity overflows the address space")]
    CapacityOverflow,

    /// The table was poisoned by an earlier failed resize.
    #[error("table is unusable after a failed resize")]
    Poisoned,
}

impl Error {
    /// The numeric code a binding layer reads after the failing call.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::KeyAlloc { .. } => ErrorCode::KeyAllocFailed,
            Error::ResizeAlloc { .. } | Error::CapacityOverflow | Error::Poisoned => {
                ErrorCode::ResizeFailed
            }
        }
    }
}

/// Outcome of the most recent mutating call on a table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// The call succeeded.
    #[default]
    Ok = 0,
    /// A resize could not allocate. The table must be dropped.
    ResizeFailed = -1,
    /// A long key could not be stored. The table is still valid.
    KeyAllocFailed = -2,
}

impl ErrorCode {
    /// Returns `true` unless the table has been poisoned.
    pub fn is_usable(self) -> bool {
        self != ErrorCode::ResizeFailed
    }
}
