use core::fmt;
use core::fmt::Debug;
use core::fmt::Display;
use core::iter::FusedIterator;

use crate::error::Error;
use crate::error::ErrorCode;
use crate::key::KeyKind;
use crate::raw_table;
use crate::raw_table::RawTable;

/// A set of `K` keys backed by a value-less [`RawTable`].
///
/// # Examples
///
/// ```rust
/// use pocketmap::PocketSet;
/// use pocketmap::Str;
///
/// let mut set: PocketSet<Str> = PocketSet::new();
/// assert!(set.insert("a")?);
/// assert!(!set.insert("a")?);
/// assert!(set.contains("a"));
/// assert_eq!(set.to_string(), "<pocketset[str]: {'a'}>");
/// # Ok::<(), pocketmap::Error>(())
/// ```
pub struct PocketSet<K: KeyKind> {
    table: RawTable<K, ()>,
}

impl<K: KeyKind> Clone for PocketSet<K> {
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
        }
    }
}

impl<K: KeyKind> Debug for PocketSet<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<K: KeyKind> Display for PocketSet<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<pocketset[{}]: {{", K::NAME)?;
        for (i, key) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            K::fmt_key(key, f)?;
        }
        f.write_str("}>")
    }
}

impl<K: KeyKind> PartialEq for PocketSet<K> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|key| other.contains(key))
    }
}

impl<K: KeyKind> Default for PocketSet<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: KeyKind> PocketSet<K> {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates an empty set with at least `capacity` buckets.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            table: RawTable::with_capacity(capacity),
        }
    }

    /// Creates an empty set, reporting allocation failure as an error.
    pub fn try_with_capacity(capacity: usize) -> Result<Self, Error> {
        Ok(Self {
            table: RawTable::try_with_capacity(capacity)?,
        })
    }

    /// Copies the set like `clone`, reporting allocation failure instead of
    /// aborting.
    pub fn try_clone(&self) -> Result<Self, Error> {
        Ok(Self {
            table: self.table.try_clone()?,
        })
    }

    /// Returns the number of elements in the set.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if the set contains no elements.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Returns the number of buckets.
    pub fn capacity(&self) -> usize {
        self.table.num_buckets()
    }

    /// Removes all elements, keeping the allocated buckets.
    pub fn clear(&mut self) {
        self.table.clear();
    }

    /// Adds `key`. Returns `true` if it was not already present.
    pub fn insert(&mut self, key: &K::Borrowed) -> Result<bool, Error> {
        Ok(self.table.set(key, (), false)?.is_inserted())
    }

    /// Returns `true` if the set contains `key`.
    pub fn contains(&self, key: &K::Borrowed) -> bool {
        self.table.contains(key)
    }

    /// Removes `key`. Returns `true` if it was present.
    pub fn remove(&mut self, key: &K::Borrowed) -> bool {
        self.table.remove(key).is_some()
    }

    /// Removes and returns the element in the lowest occupied bucket.
    pub fn pop(&mut self) -> Option<K::Owned> {
        let (index, _, ()) = self.table.iter().next()?;
        self.table.remove_at(index).map(|(key, ())| key)
    }

    /// Adds every element of `other`.
    pub fn update_from(&mut self, other: &Self) -> Result<(), Error> {
        self.table.merge_from(&other.table)
    }

    /// Adds every key from `iter`. Stops at the first error.
    pub fn try_extend<'k, I>(&mut self, iter: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = &'k K::Borrowed>,
        K::Borrowed: 'k,
    {
        for key in iter {
            self.insert(key)?;
        }
        Ok(())
    }

    /// Iterates over elements in bucket order.
    pub fn iter(&self) -> Iter<'_, K> {
        Iter {
            inner: self.table.iter(),
        }
    }

    /// Outcome of the most recent inserting call.
    pub fn error_code(&self) -> ErrorCode {
        self.table.error_code()
    }

    /// The underlying table, for bucket-level traversal.
    pub fn raw(&self) -> &RawTable<K, ()> {
        &self.table
    }
}

impl<'a, K: KeyKind> IntoIterator for &'a PocketSet<K> {
    type IntoIter = Iter<'a, K>;
    type Item = &'a K::Borrowed;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// An iterator over the elements of a `PocketSet`.
pub struct Iter<'a, K: KeyKind> {
    inner: raw_table::Iter<'a, K, ()>,
}

impl<'a, K: KeyKind> Iterator for Iter<'a, K> {
    type Item = &'a K::Borrowed;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, k, ())| k)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K: KeyKind> ExactSizeIterator for Iter<'_, K> {}

impl<K: KeyKind> FusedIterator for Iter<'_, K> {}

impl<K: KeyKind> Clone for Iter<'_, K> {
    fn clone(&self) -> Self {
        Iter {
            inner: self.inner.clone(),
        }
    }
}
