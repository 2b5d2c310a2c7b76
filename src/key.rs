//! Key kinds and their storage.
//!
//! Scalar keys are stored by value. Byte-string keys are stored as a
//! [`SmallKey`]: short keys live inline in the bucket, longer ones are spilled
//! to an owned heap block. The storage mode is fixed when the key is stored.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Debug;

use crate::error::Error;
use crate::hash;
use crate::memory::injected_failure;
use crate::sealed::Sealed;

/// Storage for one byte-string key.
///
/// Keys of at most [`SmallKey::MAX_INLINE`] bytes are stored inline; anything
/// longer is spilled into a heap block owned exclusively by this value and
/// released when it is dropped.
#[derive(Clone)]
pub struct SmallKey(Repr);

#[derive(Clone)]
enum Repr {
    /// `data[..len]` is the key; the rest is zero.
    Contained {
        len: u8,
        data: [u8; SmallKey::MAX_INLINE],
    },
    Spilled(Box<[u8]>),
}

impl SmallKey {
    /// Size of the inline buffer, counting the length byte.
    pub const INLINE_BUF: usize = 23;

    /// Longest key stored inline.
    pub const MAX_INLINE: usize = Self::INLINE_BUF - 1;

    /// Stores `bytes`, spilling to the heap if they do not fit inline.
    ///
    /// Fails with [`Error::KeyAlloc`] if the heap block cannot be allocated.
    pub fn try_new(bytes: &[u8]) -> Result<Self, Error> {
        let len = bytes.len();
        if len <= Self::MAX_INLINE {
            let mut data = [0; Self::MAX_INLINE];
            data[..len].copy_from_slice(bytes);
            return Ok(SmallKey(Repr::Contained {
                len: len as u8,
                data,
            }));
        }

        if injected_failure() {
            return Err(Error::KeyAlloc { len });
        }
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| Error::KeyAlloc { len })?;
        buf.extend_from_slice(bytes);
        Ok(SmallKey(Repr::Spilled(buf.into_boxed_slice())))
    }

    /// The logical key bytes, whatever the storage mode.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        match &self.0 {
            Repr::Contained { len, data } => &data[..*len as usize],
            Repr::Spilled(bytes) => bytes,
        }
    }

    /// Returns `true` if the key owns a heap block.
    #[inline]
    pub fn is_spilled(&self) -> bool {
        matches!(self.0, Repr::Spilled(_))
    }

    /// Heap bytes owned by the key; zero when stored inline.
    pub fn heap_bytes(&self) -> usize {
        match &self.0 {
            Repr::Spilled(bytes) => bytes.len(),
            Repr::Contained { .. } => 0,
        }
    }

    /// Consumes the key, returning its bytes.
    pub fn into_vec(self) -> Vec<u8> {
        match self.0 {
            Repr::Contained { len, data } => data[..len as usize].to_vec(),
            Repr::Spilled(bytes) => bytes.into_vec(),
        }
    }
}

impl PartialEq for SmallKey {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for SmallKey {}

impl Debug for SmallKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.is_spilled() {
            "Spilled"
        } else {
            "Contained"
        };
        f.debug_tuple(mode)
            .field(&format_args!("{}", self.as_bytes().escape_ascii()))
            .finish()
    }
}

/// Storage for a key that is known to be valid UTF-8.
#[derive(Clone, PartialEq, Eq)]
pub struct StrKey(SmallKey);

impl StrKey {
    /// Stores `key`, spilling to the heap if it does not fit inline.
    pub fn try_new(key: &str) -> Result<Self, Error> {
        SmallKey::try_new(key.as_bytes()).map(StrKey)
    }

    /// The stored string.
    #[inline]
    pub fn as_str(&self) -> &str {
        // SAFETY: A `StrKey` is only ever built from a `&str`.
        unsafe { core::str::from_utf8_unchecked(self.0.as_bytes()) }
    }

    /// The underlying byte storage.
    pub fn as_small_key(&self) -> &SmallKey {
        &self.0
    }
}

impl Debug for StrKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(self.as_str(), f)
    }
}

/// The capability set a table needs from a key kind.
///
/// A kind names three types: how a key is stored in a bucket (`Stored`), how
/// callers pass it in for lookups (`Borrowed`) and what a removal hands back
/// (`Owned`). Only the kinds defined in this crate implement it.
pub trait KeyKind: Sealed {
    /// Per-bucket storage.
    type Stored: Clone;
    /// Lookup form of the key.
    type Borrowed: ?Sized + PartialEq + Debug;
    /// Owned form handed back when an entry is taken out.
    type Owned;

    /// Name used when rendering a table, e.g. `str`.
    const NAME: &'static str;

    /// Hash of a key. Equal keys must hash equally.
    fn hash_key(key: &Self::Borrowed) -> u64;

    /// Builds bucket storage for `key`. Only byte-string kinds can fail.
    fn try_store(key: &Self::Borrowed) -> Result<Self::Stored, Error>;

    /// The logical view of a stored key.
    fn view(stored: &Self::Stored) -> &Self::Borrowed;

    /// Full equality between a stored key and a lookup key.
    #[inline]
    fn key_eq(stored: &Self::Stored, key: &Self::Borrowed) -> bool {
        Self::view(stored) == key
    }

    /// Converts storage taken out of a bucket into the owned form.
    fn into_owned(stored: Self::Stored) -> Self::Owned;

    /// Writes a key the way a table rendering shows it.
    fn fmt_key(key: &Self::Borrowed, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(key, f)
    }

    /// Heap bytes owned by a stored key.
    fn heap_bytes(_stored: &Self::Stored) -> usize {
        0
    }
}

macro_rules! scalar_key {
    ($($ty:ty => $name:literal, $hash:path);* $(;)?) => {
        $(
            impl KeyKind for $ty {
                type Stored = $ty;
                type Borrowed = $ty;
                type Owned = $ty;

                const NAME: &'static str = $name;

                #[inline]
                fn hash_key(key: &$ty) -> u64 {
                    $hash(*key)
                }

                #[inline]
                fn try_store(key: &$ty) -> Result<$ty, Error> {
                    Ok(*key)
                }

                #[inline]
                fn view(stored: &$ty) -> &$ty {
                    stored
                }

                #[inline]
                fn into_owned(stored: $ty) -> $ty {
                    stored
                }
            }
        )*
    };
}

scalar_key! {
    i32 => "int32", hash::hash_i32;
    i64 => "int64", hash::hash_i64;
    f32 => "float32", hash::hash_f32;
    f64 => "float64", hash::hash_f64;
}

/// Byte-string key kind: looked up as `[u8]`, returned as `Vec<u8>`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Bytes;

impl Sealed for Bytes {}

impl KeyKind for Bytes {
    type Stored = SmallKey;
    type Borrowed = [u8];
    type Owned = Vec<u8>;

    const NAME: &'static str = "bytes";

    #[inline]
    fn hash_key(key: &[u8]) -> u64 {
        hash::hash_bytes(key)
    }

    #[inline]
    fn try_store(key: &[u8]) -> Result<SmallKey, Error> {
        SmallKey::try_new(key)
    }

    #[inline]
    fn view(stored: &SmallKey) -> &[u8] {
        stored.as_bytes()
    }

    fn into_owned(stored: SmallKey) -> Vec<u8> {
        stored.into_vec()
    }

    fn fmt_key(key: &[u8], f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b'{}'", key.escape_ascii())
    }

    fn heap_bytes(stored: &SmallKey) -> usize {
        stored.heap_bytes()
    }
}

/// UTF-8 string key kind: looked up as `str`, returned as `String`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Str;

impl Sealed for Str {}

impl KeyKind for Str {
    type Stored = StrKey;
    type Borrowed = str;
    type Owned = String;

    const NAME: &'static str = "str";

    #[inline]
    fn hash_key(key: &str) -> u64 {
        hash::hash_bytes(key.as_bytes())
    }

    #[inline]
    fn try_store(key: &str) -> Result<StrKey, Error> {
        StrKey::try_new(key)
    }

    #[inline]
    fn view(stored: &StrKey) -> &str {
        stored.as_str()
    }

    fn into_owned(stored: StrKey) -> String {
        // SAFETY: A `StrKey` only holds bytes copied from a `&str`.
        unsafe { String::from_utf8_unchecked(stored.0.into_vec()) }
    }

    fn fmt_key(key: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'", key.escape_debug())
    }

    fn heap_bytes(stored: &StrKey) -> usize {
        stored.0.heap_bytes()
    }
}
