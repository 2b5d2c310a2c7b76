use core::fmt;
use core::fmt::Debug;
use core::fmt::Display;
use core::iter::FusedIterator;

use crate::error::Error;
use crate::error::ErrorCode;
use crate::key::KeyKind;
use crate::raw_table;
use crate::raw_table::RawTable;
use crate::raw_table::SetOutcome;
use crate::value::Value;

/// A map from `K` keys to `V` values backed by a [`RawTable`].
///
/// `K` is a key kind (`i32`, `i64`, `f32`, `f64`, [`Bytes`](crate::Bytes) or
/// [`Str`](crate::Str)) and `V` a value kind (`i32`, `i64`, `f32`, `f64`).
/// Keys are passed in borrowed form (`&str`, `&[u8]`, `&i64`, ...) and values
/// by copy.
///
/// Every method that can insert returns a `Result`, since storing a long
/// string key or growing the table allocates.
///
/// # Examples
///
/// ```rust
/// use pocketmap::PocketMap;
/// use pocketmap::Str;
///
/// let mut map: PocketMap<Str, i64> = PocketMap::new();
/// map.insert("1", 2)?;
/// assert_eq!(map.get("1"), Some(2));
/// assert_eq!(map.to_string(), "<pocketmap[str, int64]: {'1': 2}>");
/// # Ok::<(), pocketmap::Error>(())
/// ```
pub struct PocketMap<K: KeyKind, V: Value> {
    table: RawTable<K, V>,
}

impl<K: KeyKind, V: Value> Clone for PocketMap<K, V> {
    /// Copies the map, keeping its bucket count.
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
        }
    }
}

impl<K: KeyKind, V: Value> Debug for PocketMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K: KeyKind, V: Value> Display for PocketMap<K, V> {
    /// Renders the map as `<pocketmap[K, V]: {k: v, ...}>`, entries in bucket
    /// order.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<pocketmap[{}, {}]: {{", K::NAME, V::NAME)?;
        for (i, (key, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            K::fmt_key(key, f)?;
            f.write_str(": ")?;
            value.fmt_value(f)?;
        }
        f.write_str("}>")
    }
}

impl<K: KeyKind, V: Value> PartialEq for PocketMap<K, V> {
    /// Maps are equal when they hold the same keys with equal values,
    /// regardless of bucket count or layout.
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(key, value)| other.get(key).is_some_and(|v| v == value))
    }
}

impl<K: KeyKind, V: Value> Default for PocketMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: KeyKind, V: Value> PocketMap<K, V> {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates an empty map with at least `capacity` buckets.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use pocketmap::PocketMap;
    /// let map: PocketMap<i64, f64> = PocketMap::with_capacity(1000);
    /// assert_eq!(map.capacity(), 1024);
    /// ```
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            table: RawTable::with_capacity(capacity),
        }
    }

    /// Creates an empty map, reporting allocation failure as an error.
    pub fn try_with_capacity(capacity: usize) -> Result<Self, Error> {
        Ok(Self {
            table: RawTable::try_with_capacity(capacity)?,
        })
    }

    /// Copies the map like `clone`, reporting allocation failure instead of
    /// aborting.
    pub fn try_clone(&self) -> Result<Self, Error> {
        Ok(Self {
            table: self.table.try_clone()?,
        })
    }

    /// Returns the number of entries in the map.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if the map contains no entries.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Returns the number of buckets.
    pub fn capacity(&self) -> usize {
        self.table.num_buckets()
    }

    /// Removes all entries, keeping the allocated buckets.
    pub fn clear(&mut self) {
        self.table.clear();
    }

    /// Returns `true` if the map contains `key`.
    pub fn contains_key(&self, key: &K::Borrowed) -> bool {
        self.table.contains(key)
    }

    /// Returns the value for `key`.
    pub fn get(&self, key: &K::Borrowed) -> Option<V> {
        self.table.get(key)
    }

    /// Inserts or overwrites `key`, returning the previous value.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use pocketmap::PocketMap;
    /// # use pocketmap::Bytes;
    /// let mut map: PocketMap<Bytes, i32> = PocketMap::new();
    /// assert_eq!(map.insert(b"k", 1), Ok(None));
    /// assert_eq!(map.insert(b"k", 2), Ok(Some(1)));
    /// assert_eq!(map.get(b"k"), Some(2));
    /// ```
    pub fn insert(&mut self, key: &K::Borrowed, value: V) -> Result<Option<V>, Error> {
        self.table.set(key, value, true).map(SetOutcome::previous)
    }

    /// Inserts `key` only if it is absent. Returns the existing value, which
    /// is left untouched, when it is present.
    pub fn try_insert(&mut self, key: &K::Borrowed, value: V) -> Result<Option<V>, Error> {
        self.table.set(key, value, false).map(SetOutcome::previous)
    }

    /// Inserts `key` with an explicit replace flag. See [`RawTable::set`].
    pub fn set(
        &mut self,
        key: &K::Borrowed,
        value: V,
        replace: bool,
    ) -> Result<SetOutcome<V>, Error> {
        self.table.set(key, value, replace)
    }

    /// Returns the value for `key`, inserting `default` first if it is absent.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use pocketmap::PocketMap;
    /// # use pocketmap::Str;
    /// let mut counts: PocketMap<Str, i64> = PocketMap::new();
    /// assert_eq!(counts.get_or_insert("a", 0), Ok(0));
    /// counts.insert("a", 5)?;
    /// assert_eq!(counts.get_or_insert("a", 0), Ok(5));
    /// # Ok::<(), pocketmap::Error>(())
    /// ```
    pub fn get_or_insert(&mut self, key: &K::Borrowed, default: V) -> Result<V, Error> {
        Ok(match self.table.set(key, default, false)? {
            SetOutcome::Inserted => default,
            SetOutcome::AlreadyPresent(value) => value,
        })
    }

    /// Removes `key`, returning its value.
    pub fn remove(&mut self, key: &K::Borrowed) -> Option<V> {
        self.table.remove(key)
    }

    /// Removes and returns the entry in the lowest occupied bucket.
    pub fn pop_item(&mut self) -> Option<(K::Owned, V)> {
        let (index, _, _) = self.table.iter().next()?;
        self.table.remove_at(index)
    }

    /// Inserts every entry of `other`, overwriting values of keys present in
    /// both.
    pub fn update_from(&mut self, other: &Self) -> Result<(), Error> {
        self.table.merge_from(&other.table)
    }

    /// Inserts every pair from `iter`, overwriting existing values. Stops at
    /// the first error.
    pub fn try_extend<'k, I>(&mut self, iter: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = (&'k K::Borrowed, V)>,
        K::Borrowed: 'k,
    {
        for (key, value) in iter {
            self.insert(key, value)?;
        }
        Ok(())
    }

    /// Iterates over `(key, value)` pairs in bucket order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            inner: self.table.iter(),
        }
    }

    /// Iterates over keys in bucket order.
    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys { inner: self.iter() }
    }

    /// Iterates over values in bucket order.
    pub fn values(&self) -> Values<'_, K, V> {
        Values { inner: self.iter() }
    }

    /// Outcome of the most recent inserting call.
    pub fn error_code(&self) -> ErrorCode {
        self.table.error_code()
    }

    /// The underlying table, for bucket-level traversal.
    pub fn raw(&self) -> &RawTable<K, V> {
        &self.table
    }
}

impl<'a, K: KeyKind, V: Value> IntoIterator for &'a PocketMap<K, V> {
    type IntoIter = Iter<'a, K, V>;
    type Item = (&'a K::Borrowed, V);

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// An iterator over the entries of a `PocketMap`.
pub struct Iter<'a, K: KeyKind, V: Value> {
    inner: raw_table::Iter<'a, K, V>,
}

impl<'a, K: KeyKind, V: Value> Iterator for Iter<'a, K, V> {
    type Item = (&'a K::Borrowed, V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, k, v)| (k, v))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K: KeyKind, V: Value> ExactSizeIterator for Iter<'_, K, V> {}

impl<K: KeyKind, V: Value> FusedIterator for Iter<'_, K, V> {}

impl<K: KeyKind, V: Value> Clone for Iter<'_, K, V> {
    fn clone(&self) -> Self {
        Iter {
            inner: self.inner.clone(),
        }
    }
}

/// An iterator over the keys of a `PocketMap`.
pub struct Keys<'a, K: KeyKind, V: Value> {
    inner: Iter<'a, K, V>,
}

impl<'a, K: KeyKind, V: Value> Iterator for Keys<'a, K, V> {
    type Item = &'a K::Borrowed;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, _)| k)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K: KeyKind, V: Value> ExactSizeIterator for Keys<'_, K, V> {}

impl<K: KeyKind, V: Value> FusedIterator for Keys<'_, K, V> {}

impl<K: KeyKind, V: Value> Clone for Keys<'_, K, V> {
    fn clone(&self) -> Self {
        Keys {
            inner: self.inner.clone(),
        }
    }
}

/// An iterator over the values of a `PocketMap`.
pub struct Values<'a, K: KeyKind, V: Value> {
    inner: Iter<'a, K, V>,
}

impl<K: KeyKind, V: Value> Iterator for Values<'_, K, V> {
    type Item = V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, v)| v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K: KeyKind, V: Value> ExactSizeIterator for Values<'_, K, V> {}

impl<K: KeyKind, V: Value> FusedIterator for Values<'_, K, V> {}

impl<K: KeyKind, V: Value> Clone for Values<'_, K, V> {
    fn clone(&self) -> Self {
        Values {
            inner: self.inner.clone(),
        }
    }
}
