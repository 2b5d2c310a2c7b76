//! Group matching over runs of control bytes.
//!
//! A group is `Group::WIDTH` consecutive control bytes starting at a multiple
//! of `Group::WIDTH`. Matching produces a [`BitMask`] with one bit per lane.
//!
//! Two matchers exist: an SSE2 one (16 lanes) used on x86_64, and a portable
//! SWAR one (8 lanes, one `u64`) used everywhere else. The portable matcher is
//! always compiled so it can be tested on every target.

use crate::control::EMPTY;

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "x86_64", target_feature = "sse2"))] {
        pub(crate) type Group = Sse2Group;
    } else {
        pub(crate) type Group = SwarGroup;
    }
}

/// Lane offsets selected by a group match, lowest lane first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct BitMask(u32);

impl BitMask {
    #[inline(always)]
    pub(crate) fn lowest(self) -> Option<usize> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as usize)
        }
    }

    #[cfg(test)]
    pub(crate) fn bits(self) -> u32 {
        self.0
    }
}

impl Iterator for BitMask {
    type Item = usize;

    #[inline(always)]
    fn next(&mut self) -> Option<usize> {
        let lane = self.lowest()?;
        self.0 &= self.0 - 1;
        Some(lane)
    }
}

const LANE_LSB: u64 = 0x0101_0101_0101_0101;
const LANE_LOW7: u64 = 0x7F7F_7F7F_7F7F_7F7F;

/// Moves the high bit of each byte (bit `8i + 7`) down to bit `i`.
const PACK_MUL: u64 = 0x0102_0408_1020_4080;

/// Portable 8-lane matcher working on a single little-endian `u64`.
#[derive(Clone, Copy)]
#[cfg_attr(
    all(target_arch = "x86_64", target_feature = "sse2"),
    allow(dead_code)
)]
pub(crate) struct SwarGroup(u64);

#[cfg_attr(
    all(target_arch = "x86_64", target_feature = "sse2"),
    allow(dead_code)
)]
impl SwarGroup {
    pub(crate) const WIDTH: usize = 8;

    /// Load a group of control bytes.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads of `Self::WIDTH` bytes.
    #[inline(always)]
    pub(crate) unsafe fn load(ptr: *const u8) -> Self {
        // SAFETY: Caller guarantees `WIDTH` readable bytes; the read is unaligned.
        let bytes = unsafe { ptr.cast::<[u8; 8]>().read_unaligned() };
        SwarGroup(u64::from_le_bytes(bytes))
    }

    /// Sets the high bit of every byte of `word` that is exactly zero.
    ///
    /// Unlike the classic `(x - 0x01..) & !x` trick this has no false
    /// positives: the per-byte add can never carry into the next byte.
    #[inline(always)]
    fn zero_bytes(word: u64) -> u64 {
        !(((word & LANE_LOW7).wrapping_add(LANE_LOW7)) | word | LANE_LOW7)
    }

    #[inline(always)]
    fn pack(high_bits: u64) -> BitMask {
        BitMask(((high_bits >> 7).wrapping_mul(PACK_MUL) >> 56) as u32)
    }

    #[inline(always)]
    pub(crate) fn match_tag(self, tag: u8) -> BitMask {
        Self::pack(Self::zero_bytes(self.0 ^ LANE_LSB.wrapping_mul(tag as u64)))
    }

    #[inline(always)]
    pub(crate) fn match_empty(self) -> BitMask {
        Self::pack(Self::zero_bytes(self.0 ^ LANE_LSB.wrapping_mul(EMPTY as u64)))
    }
}

/// SSE2 16-lane matcher.
#[cfg(all(target_arch = "x86_64", target_feature = "sse2"))]
#[derive(Clone, Copy)]
pub(crate) struct Sse2Group(core::arch::x86_64::__m128i);

#[cfg(all(target_arch = "x86_64", target_feature = "sse2"))]
impl Sse2Group {
    pub(crate) const WIDTH: usize = 16;

    /// Load a group of control bytes.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads of `Self::WIDTH` bytes.
    #[inline(always)]
    pub(crate) unsafe fn load(ptr: *const u8) -> Self {
        use core::arch::x86_64::*;
        // SAFETY: Caller guarantees `WIDTH` readable bytes; `loadu` has no
        // alignment requirement.
        unsafe { Sse2Group(_mm_loadu_si128(ptr as *const __m128i)) }
    }

    #[inline(always)]
    fn match_byte(self, byte: u8) -> BitMask {
        use core::arch::x86_64::*;
        // SAFETY: SSE2 is statically enabled for this target.
        unsafe {
            let cmp = _mm_cmpeq_epi8(self.0, _mm_set1_epi8(byte as i8));
            BitMask(_mm_movemask_epi8(cmp) as u16 as u32)
        }
    }

    #[inline(always)]
    pub(crate) fn match_tag(self, tag: u8) -> BitMask {
        self.match_byte(tag)
    }

    #[inline(always)]
    pub(crate) fn match_empty(self) -> BitMask {
        self.match_byte(EMPTY)
    }
}
