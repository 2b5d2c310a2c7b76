//! Per-bucket control bytes.
//!
//! Every bucket owns one byte. A live bucket stores the low 7 bits of its
//! key's hash (the tag), so its sign bit is always clear. The two sentinels
//! both have the sign bit set and can never be mistaken for a tag.

/// Control byte of a bucket that holds nothing and never terminated a probe
/// chain since the last clear or rehash.
///
/// Chosen as 0x80 (sign bit set, low bits clear) so the SSE2 matcher and the
/// portable matcher can both compare against a single broadcast byte.
pub(crate) const EMPTY: u8 = 0x80;

/// Control byte of a tombstone left behind by a removal.
///
/// Tombstones keep probe chains intact; they are only reclaimed by a rehash.
pub(crate) const DELETED: u8 = 0xFE;

const TAG_BITS: u32 = 7;
const TAG_MASK: u64 = (1 << TAG_BITS) - 1;

/// The 7-bit tag stored in a live bucket.
#[inline(always)]
pub(crate) fn h2(hash: u64) -> u8 {
    (hash & TAG_MASK) as u8
}

/// The part of the hash that selects the starting group.
#[inline(always)]
pub(crate) fn h1(hash: u64) -> usize {
    (hash >> TAG_BITS) as usize
}

#[inline(always)]
pub(crate) fn is_live(ctrl: u8) -> bool {
    ctrl & 0x80 == 0
}
