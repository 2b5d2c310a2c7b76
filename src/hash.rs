//! Scalar keys fold the halves of their bit pattern together with XOR. This is
//! cheap and reversible, and adequate for keys that are not chosen
//! adversarially.
//!
//! String keys are hashed with `foldhash` under a fixed seed. Because the seed
//! never changes, a crafted key set can force every key into one probe chain.
//! This is a known limitation; callers that face untrusted keys should not use
//! these tables.

use core::hash::BuildHasher;
use core::hash::Hasher;

use foldhash::fast::FixedState;

/// Seed used for every byte-string hash.
pub const STRING_HASH_SEED: u64 = 1;

#[inline(always)]
fn fold32(bits: u32) -> u64 {
    (bits ^ (bits >> 16)) as u64
}

/// Hash of a 32-bit integer key.
#[inline]
pub fn hash_i32(key: i32) -> u64 {
    fold32(key as u32)
}

/// Hash of a 64-bit integer key.
#[inline]
pub fn hash_i64(key: i64) -> u64 {
    let bits = key as u64;
    fold32(bits as u32 ^ (bits >> 32) as u32)
}

/// Hash of a 32-bit float key.
///
/// `-0.0` and `0.0` compare equal, so both hash like `0.0`.
#[inline]
pub fn hash_f32(key: f32) -> u64 {
    let key = if key == 0.0 { 0.0 } else { key };
    fold32(key.to_bits())
}

/// Hash of a 64-bit float key. Zero is normalized as in [`hash_f32`].
#[inline]
pub fn hash_f64(key: f64) -> u64 {
    let key = if key == 0.0 { 0.0 } else { key };
    hash_i64(key.to_bits() as i64)
}

/// Hash of a byte-string key. Only the logical bytes are hashed, never the
/// storage mode.
#[inline]
pub fn hash_bytes(key: &[u8]) -> u64 {
    let mut hasher = FixedState::with_seed(STRING_HASH_SEED).build_hasher();
    hasher.write(key);
    hasher.finish()
}
