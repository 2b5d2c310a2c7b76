//! Checked allocation.
//!
//! Table arrays and spilled keys must report allocation failure instead of
//! aborting, so every allocation goes through here. Under `cfg(test)` a
//! per-thread failpoint can make the n-th allocation fail.

use core::alloc::Layout;
use core::ptr::NonNull;

/// Allocates `layout`, returning `None` on failure.
///
/// `layout` must have a non-zero size.
#[inline]
pub(crate) fn try_alloc(layout: Layout) -> Option<NonNull<u8>> {
    debug_assert!(layout.size() != 0);
    if injected_failure() {
        return None;
    }
    // SAFETY: The caller guarantees a non-zero sized layout.
    NonNull::new(unsafe { alloc::alloc::alloc(layout) })
}

/// Releases an allocation obtained from [`try_alloc`].
///
/// # Safety
///
/// `ptr` must come from `try_alloc(layout)` and must not be used afterwards.
#[inline]
pub(crate) unsafe fn dealloc(ptr: NonNull<u8>, layout: Layout) {
    // SAFETY: Caller guarantees `ptr` was allocated with `layout`.
    unsafe { alloc::alloc::dealloc(ptr.as_ptr(), layout) }
}

#[cfg(not(test))]
#[inline(always)]
pub(crate) fn injected_failure() -> bool {
    false
}

#[cfg(test)]
pub(crate) use failpoint::injected_failure;
