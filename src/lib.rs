#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

#[cfg(all(test, not(feature = "std")))]
extern crate std;

mod control;
mod group;
mod memory;

pub mod error;

/// Hash functions for every key kind.
///
/// Scalars are folded, strings go through a fixed-seed `foldhash`.
pub mod hash;

pub mod key;

/// Value kinds storable in a map, plus `()` for sets.
pub mod value;

pub mod raw_table;

/// A typed map over the raw table.
///
/// This module provides a `PocketMap` that wraps the `RawTable` and exposes the
/// mapping interface a host binding layer builds on.
pub mod pocket_map;

/// A typed set over the raw table.
///
/// This module provides a `PocketSet` that wraps a value-less `RawTable`.
pub mod pocket_set;

pub use error::Error;
pub use error::ErrorCode;
pub use key::Bytes;
pub use key::KeyKind;
pub use key::SmallKey;
pub use key::Str;
pub use pocket_map::PocketMap;
pub use pocket_set::PocketSet;
pub use raw_table::RawTable;
pub use raw_table::SetOutcome;
pub use value::Value;

mod sealed {
    pub trait Sealed {}

    impl Sealed for i32 {}
    impl Sealed for i64 {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
    impl Sealed for () {}
}
