//! The table core shared by [`PocketMap`](crate::PocketMap) and
//! [`PocketSet`](crate::PocketSet).
//!
//! Storage is a single allocation holding three co-indexed arrays: one control
//! byte per bucket, the keys, and the values (zero-sized in set mode). The
//! control array is scanned a group at a time; a lookup visits groups in
//! triangular order until it finds an equal key or a group with an empty lane.
//!
//! Removal leaves a tombstone. Inserts only ever claim empty lanes, so
//! tombstones accumulate until the next rehash. Before an insert, if live
//! entries plus tombstones reach `upper_bound`, the table is rebuilt: at twice
//! the size when live entries alone reach `grow_threshold`, otherwise at the
//! same size just to drop the tombstones.

use alloc::alloc::handle_alloc_error;
use core::alloc::Layout;
use core::fmt::Debug;
use core::iter::FusedIterator;
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::ptr::NonNull;

use crate::control;
use crate::control::DELETED;
use crate::control::EMPTY;
use crate::error::Error;
use crate::error::ErrorCode;
use crate::group::Group;
use crate::key::KeyKind;
use crate::memory;
use crate::value::Value;

/// Fraction of buckets that may be live or tombstoned before an insert forces
/// a rebuild.
pub const PEAK_LOAD: f64 = 0.79;

/// Smallest bucket count a table is ever created with.
pub const MIN_BUCKETS: usize = 32;

const _: () = assert!(MIN_BUCKETS.is_power_of_two() && MIN_BUCKETS % Group::WIDTH == 0);

/// `floor(PEAK_LOAD * buckets)`, computed exactly.
fn upper_bound(buckets: usize) -> usize {
    (buckets as u128 * 79 / 100) as usize
}

/// `floor(PEAK_LOAD² * buckets)`, computed exactly.
fn grow_threshold(buckets: usize) -> usize {
    (buckets as u128 * 6241 / 10000) as usize
}

fn bucket_count(capacity: usize) -> Result<usize, Error> {
    capacity
        .max(MIN_BUCKETS)
        .checked_next_power_of_two()
        .ok_or(Error::CapacityOverflow)
}

#[cold]
#[inline(never)]
fn capacity_overflow() -> ! {
    panic!("capacity overflow")
}

#[cold]
#[inline(never)]
fn probe_exhausted(num_buckets: usize) -> ! {
    panic!("probe sequence exhausted all {num_buckets} buckets without reaching an empty lane")
}

#[derive(Debug)]
struct DataLayout {
    layout: Layout,
    keys_offset: usize,
    values_offset: usize,
}

impl DataLayout {
    fn new<K: KeyKind, V>(buckets: usize) -> Result<Self, Error> {
        let overflow = |_| Error::CapacityOverflow;

        let control_layout = Layout::array::<u8>(buckets)
            .and_then(|l| l.align_to(Group::WIDTH))
            .map_err(overflow)?;
        let keys_layout = Layout::array::<MaybeUninit<K::Stored>>(buckets).map_err(overflow)?;
        let values_layout = Layout::array::<MaybeUninit<V>>(buckets).map_err(overflow)?;

        let (layout, keys_offset) = control_layout.extend(keys_layout).map_err(overflow)?;
        let (layout, values_offset) = layout.extend(values_layout).map_err(overflow)?;

        Ok(DataLayout {
            layout: layout.pad_to_align(),
            keys_offset,
            values_offset,
        })
    }
}

/// Where a probe ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Probe {
    /// An equal key lives at this index.
    Found(usize),
    /// The key is absent; this empty bucket is where it would be inserted.
    Vacant(usize),
}

/// Triangular walk over group indices. With a power-of-two group count this
/// visits every group exactly once in `num_groups` steps.
struct ProbeSeq {
    group: usize,
    stride: usize,
    mask: usize,
}

impl ProbeSeq {
    #[inline]
    fn new(hash: u64, num_groups: usize) -> Self {
        let mask = num_groups - 1;
        ProbeSeq {
            group: control::h1(hash) & mask,
            stride: 0,
            mask,
        }
    }

    #[inline]
    fn advance(&mut self) {
        self.stride += 1;
        self.group = (self.group + self.stride) & self.mask;
    }
}

/// Result of [`RawTable::set`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetOutcome<V> {
    /// The key was absent and has been added.
    Inserted,
    /// The key was already present with this value. The stored value was
    /// overwritten only if `replace` was set.
    AlreadyPresent(V),
}

impl<V> SetOutcome<V> {
    /// The value that was stored before the call, if any.
    pub fn previous(self) -> Option<V> {
        match self {
            SetOutcome::Inserted => None,
            SetOutcome::AlreadyPresent(v) => Some(v),
        }
    }

    /// Returns `true` if the call added a new entry.
    pub fn is_inserted(&self) -> bool {
        matches!(self, SetOutcome::Inserted)
    }
}

/// Occupancy statistics for a table.
///
/// Only available with the `stats` feature.
#[cfg(any(test, feature = "stats"))]
#[derive(Debug, Clone)]
pub struct TableStats {
    /// Total number of buckets
    pub num_buckets: usize,
    /// Live entries
    pub size: usize,
    /// Tombstones awaiting the next rehash
    pub num_deleted: usize,
    /// Live plus tombstoned count that triggers a rebuild
    pub upper_bound: usize,
    /// Live count above which a rebuild doubles the table
    pub grow_threshold: usize,
    /// size / num_buckets
    pub load_factor: f64,
    /// (size + num_deleted) / num_buckets
    pub occupancy: f64,
    /// Keys stored out of line
    pub spilled_keys: usize,
    /// Heap bytes owned by spilled keys
    pub spilled_bytes: usize,
    /// Size of the bucket allocation
    pub table_bytes: usize,
}

#[cfg(any(test, feature = "stats"))]
impl TableStats {
    /// Pretty-print the statistics.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        println!("=== Table Statistics ===");
        println!(
            "Population: {}/{} buckets ({:.2}% load factor)",
            self.size,
            self.num_buckets,
            self.load_factor * 100.0
        );
        println!(
            "Tombstones: {} ({:.2}% occupied incl. tombstones)",
            self.num_deleted,
            self.occupancy * 100.0
        );
        println!(
            "Thresholds: rebuild at {}, grow at {}",
            self.upper_bound, self.grow_threshold
        );
        println!(
            "Spilled keys: {} ({} heap bytes)",
            self.spilled_keys, self.spilled_bytes
        );
        println!("Table allocation: {} bytes", self.table_bytes);
    }
}

/// An open-addressing table of `K` keys and `V` values.
///
/// `RawTable` is the engine behind the typed facades. It exposes the
/// operations a binding layer needs: `set` with a replace flag, `get`,
/// `remove`, `contains`, `clear`, and traversal by physical bucket index.
///
/// ## Errors
///
/// Only allocation can fail. A failed resize poisons the table: its contents
/// stay readable and removable, but every later `set` returns
/// [`Error::Poisoned`]. A failed spilled-key allocation leaves the table
/// unchanged. [`error_code`](RawTable::error_code) reports the outcome of the
/// most recent mutating call. [`Clone`] aborts on allocation failure like the
/// standard collections; [`try_clone`](RawTable::try_clone) reports it.
///
/// ## Example
///
/// ```rust
/// use pocketmap::RawTable;
/// use pocketmap::SetOutcome;
/// use pocketmap::Str;
///
/// let mut table: RawTable<Str, i64> = RawTable::new();
/// assert_eq!(table.set("one", 1, true), Ok(SetOutcome::Inserted));
/// assert_eq!(table.set("one", 10, false), Ok(SetOutcome::AlreadyPresent(1)));
/// assert_eq!(table.get("one"), Some(1));
/// assert_eq!(table.remove("one"), Some(1));
/// assert!(!table.contains("one"));
/// ```
pub struct RawTable<K: KeyKind, V: Value> {
    layout: DataLayout,
    alloc: NonNull<u8>,

    num_buckets: usize,
    size: usize,
    num_deleted: usize,
    upper_bound: usize,
    grow_threshold: usize,
    error_code: ErrorCode,

    _phantom: PhantomData<(K::Stored, V)>,
}

// SAFETY: The table exclusively owns its allocation; it is as thread-safe as
// the keys and values it holds.
unsafe impl<K: KeyKind, V: Value> Send for RawTable<K, V> where K::Stored: Send {}

// SAFETY: Shared references only read.
unsafe impl<K: KeyKind, V: Value> Sync for RawTable<K, V> where K::Stored: Sync {}

impl<K: KeyKind, V: Value> Debug for RawTable<K, V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use alloc::format;
        use alloc::string::String;
        use alloc::vec::Vec;

        let control = self
            .ctrl_bytes()
            .chunks(Group::WIDTH)
            .map(|group| {
                group
                    .iter()
                    .map(|&c| match c {
                        EMPTY => String::from(".."),
                        DELETED => String::from("xx"),
                        tag => format!("{tag:02x}"),
                    })
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>();

        f.debug_struct("RawTable")
            .field("control", &control)
            .field("size", &self.size)
            .field("num_deleted", &self.num_deleted)
            .field("num_buckets", &self.num_buckets)
            .field("error_code", &self.error_code)
            .finish()
    }
}

impl<K: KeyKind, V: Value> Clone for RawTable<K, V> {
    /// Produces a table with the same bucket count whose control bytes,
    /// tombstones included, match this one exactly.
    fn clone(&self) -> Self {
        let Ok(new_table) = self.copy_entries_into(
            Self::with_buckets(self.num_buckets),
            |key| Ok::<_, core::convert::Infallible>(key.clone()),
        );
        new_table
    }
}

impl<K: KeyKind, V: Value> Drop for RawTable<K, V> {
    fn drop(&mut self) {
        self.drop_live_keys();
        // SAFETY: `alloc` was obtained from `try_alloc(layout.layout)` and no
        // live key refers into it anymore.
        unsafe { memory::dealloc(self.alloc, self.layout.layout) }
    }
}

impl<K: KeyKind, V: Value> Default for RawTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: KeyKind, V: Value> RawTable<K, V> {
    /// Creates an empty table with [`MIN_BUCKETS`] buckets.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates an empty table with at least `capacity` buckets.
    ///
    /// The bucket count is `capacity` rounded up to a power of two, and never
    /// less than [`MIN_BUCKETS`].
    ///
    /// # Panics
    ///
    /// Panics if the bucket count overflows, and aborts through
    /// [`handle_alloc_error`] if the allocation fails. Use
    /// [`try_with_capacity`](Self::try_with_capacity) to handle both.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use pocketmap::RawTable;
    /// let table: RawTable<i32, f64> = RawTable::with_capacity(100);
    /// assert_eq!(table.num_buckets(), 128);
    /// ```
    pub fn with_capacity(capacity: usize) -> Self {
        let num_buckets = bucket_count(capacity).unwrap_or_else(|_| capacity_overflow());
        Self::with_buckets(num_buckets)
    }

    /// Creates an empty table with at least `capacity` buckets, reporting
    /// allocation failure instead of aborting.
    pub fn try_with_capacity(capacity: usize) -> Result<Self, Error> {
        let num_buckets = bucket_count(capacity)?;
        let (layout, alloc) = Self::allocate(num_buckets)?;
        Ok(Self::from_parts(layout, alloc, num_buckets))
    }

    fn with_buckets(num_buckets: usize) -> Self {
        let layout = DataLayout::new::<K, V>(num_buckets).unwrap_or_else(|_| capacity_overflow());
        let Some(alloc) = memory::try_alloc(layout.layout) else {
            handle_alloc_error(layout.layout)
        };
        // SAFETY: The allocation holds `num_buckets` control bytes at offset 0.
        unsafe { core::ptr::write_bytes(alloc.as_ptr(), EMPTY, num_buckets) };
        Self::from_parts(layout, alloc, num_buckets)
    }

    /// Allocates arrays for `num_buckets` buckets with every control byte
    /// EMPTY.
    fn allocate(num_buckets: usize) -> Result<(DataLayout, NonNull<u8>), Error> {
        let layout = DataLayout::new::<K, V>(num_buckets)?;
        let alloc = memory::try_alloc(layout.layout).ok_or(Error::ResizeAlloc {
            buckets: num_buckets,
        })?;
        // SAFETY: The allocation holds `num_buckets` control bytes at offset 0.
        unsafe { core::ptr::write_bytes(alloc.as_ptr(), EMPTY, num_buckets) };
        Ok((layout, alloc))
    }

    /// Copies the table like [`Clone`], reporting allocation failure instead
    /// of aborting.
    ///
    /// Fails with [`Error::ResizeAlloc`] if the bucket arrays cannot be
    /// allocated and with [`Error::KeyAlloc`] if a spilled key cannot be
    /// copied. `self` is untouched either way.
    pub fn try_clone(&self) -> Result<Self, Error> {
        let (layout, alloc) = Self::allocate(self.num_buckets)?;
        let new_table = Self::from_parts(layout, alloc, self.num_buckets);
        self.copy_entries_into(new_table, |key| K::try_store(K::view(key)))
    }

    /// Fills `new_table`, which must be empty and have the same bucket count,
    /// with copies of every entry, keeping control bytes (tombstones
    /// included) identical.
    fn copy_entries_into<E>(
        &self,
        mut new_table: Self,
        mut copy_key: impl FnMut(&K::Stored) -> Result<K::Stored, E>,
    ) -> Result<Self, E> {
        debug_assert_eq!(new_table.num_buckets, self.num_buckets);

        for index in 0..self.num_buckets {
            // SAFETY: Both tables have `num_buckets` buckets. A control byte
            // is only marked live after its key and value have been written,
            // so bailing out early (or a panicking clone) leaves `new_table`
            // droppable.
            unsafe {
                let ctrl = self.ctrl(index);
                if control::is_live(ctrl) {
                    let key = copy_key(self.key_ref(index))?;
                    new_table.write_entry(index, key, self.value_read(index));
                    new_table.size += 1;
                }
                new_table.set_ctrl(index, ctrl);
            }
        }

        new_table.num_deleted = self.num_deleted;
        new_table.error_code = self.error_code;
        debug_assert_eq!(new_table.size, self.size);
        Ok(new_table)
    }

    fn from_parts(layout: DataLayout, alloc: NonNull<u8>, num_buckets: usize) -> Self {
        Self {
            layout,
            alloc,
            num_buckets,
            size: 0,
            num_deleted: 0,
            upper_bound: upper_bound(num_buckets),
            grow_threshold: grow_threshold(num_buckets),
            error_code: ErrorCode::Ok,
            _phantom: PhantomData,
        }
    }

    fn ctrl_bytes(&self) -> &[u8] {
        // SAFETY: Control bytes are initialized for the whole lifetime of the
        // allocation.
        unsafe { core::slice::from_raw_parts(self.alloc.as_ptr(), self.num_buckets) }
    }

    fn keys_ptr(&self) -> NonNull<[MaybeUninit<K::Stored>]> {
        // SAFETY: Allocation is valid and properly sized for the keys slice
        unsafe {
            NonNull::slice_from_raw_parts(
                self.alloc.add(self.layout.keys_offset).cast(),
                self.num_buckets,
            )
        }
    }

    fn values_ptr(&self) -> NonNull<[MaybeUninit<V>]> {
        // SAFETY: Allocation is valid and properly sized for the values slice
        unsafe {
            NonNull::slice_from_raw_parts(
                self.alloc.add(self.layout.values_offset).cast(),
                self.num_buckets,
            )
        }
    }

    /// # Safety
    ///
    /// `index < num_buckets`
    #[inline]
    unsafe fn ctrl(&self, index: usize) -> u8 {
        // SAFETY: Caller guarantees `index` is in bounds.
        unsafe { *self.ctrl_bytes().get_unchecked(index) }
    }

    /// # Safety
    ///
    /// `index < num_buckets`
    #[inline]
    unsafe fn set_ctrl(&mut self, index: usize, ctrl: u8) {
        debug_assert!(index < self.num_buckets);
        // SAFETY: Caller guarantees `index` is in bounds.
        unsafe { *self.alloc.as_ptr().add(index) = ctrl }
    }

    /// # Safety
    ///
    /// The bucket at `index` must be live.
    #[inline]
    unsafe fn key_ref(&self, index: usize) -> &K::Stored {
        // SAFETY: Live buckets hold an initialized key.
        unsafe { self.keys_ptr().as_ref().get_unchecked(index).assume_init_ref() }
    }

    /// # Safety
    ///
    /// The bucket at `index` must be live.
    #[inline]
    unsafe fn value_read(&self, index: usize) -> V {
        // SAFETY: Live buckets hold an initialized value.
        unsafe { self.values_ptr().as_ref().get_unchecked(index).assume_init_read() }
    }

    /// # Safety
    ///
    /// `index < num_buckets`. Any key previously at `index` must already have
    /// been moved out or dropped.
    #[inline]
    unsafe fn write_entry(&mut self, index: usize, key: K::Stored, value: V) {
        // SAFETY: Caller guarantees `index` is in bounds.
        unsafe {
            self.keys_ptr().as_mut().get_unchecked_mut(index).write(key);
            self.values_ptr().as_mut().get_unchecked_mut(index).write(value);
        }
    }

    /// # Safety
    ///
    /// `group < num_buckets / Group::WIDTH`
    #[inline]
    unsafe fn load_group(&self, group: usize) -> Group {
        // SAFETY: The group lies entirely inside the control array.
        unsafe { Group::load(self.alloc.as_ptr().add(group * Group::WIDTH)) }
    }

    fn find(&self, hash: u64, key: &K::Borrowed) -> Probe {
        let tag = control::h2(hash);
        let num_groups = self.num_buckets / Group::WIDTH;
        let mut seq = ProbeSeq::new(hash, num_groups);

        for _ in 0..num_groups {
            let base = seq.group * Group::WIDTH;
            // SAFETY: `seq.group` is masked to the group count.
            let group = unsafe { self.load_group(seq.group) };

            for lane in group.match_tag(tag) {
                let index = base + lane;
                // SAFETY: A lane matching a tag is live.
                if K::key_eq(unsafe { self.key_ref(index) }, key) {
                    return Probe::Found(index);
                }
            }

            if let Some(lane) = group.match_empty().lowest() {
                return Probe::Vacant(base + lane);
            }
            seq.advance();
        }

        probe_exhausted(self.num_buckets)
    }

    /// Empty-lane search used when the key is known to be absent.
    fn find_empty(&self, hash: u64) -> usize {
        let num_groups = self.num_buckets / Group::WIDTH;
        let mut seq = ProbeSeq::new(hash, num_groups);

        for _ in 0..num_groups {
            // SAFETY: `seq.group` is masked to the group count.
            let group = unsafe { self.load_group(seq.group) };
            if let Some(lane) = group.match_empty().lowest() {
                return seq.group * Group::WIDTH + lane;
            }
            seq.advance();
        }

        probe_exhausted(self.num_buckets)
    }

    /// Returns the number of live entries.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Returns `true` if the table holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Returns the number of buckets, live or not.
    pub fn num_buckets(&self) -> usize {
        self.num_buckets
    }

    /// Returns the number of tombstones awaiting the next rehash.
    pub fn num_deleted(&self) -> usize {
        self.num_deleted
    }

    /// Outcome of the most recent mutating call.
    ///
    /// Removals and `clear` cannot fail, so they reset it to
    /// [`ErrorCode::Ok`] unless the table is poisoned. Reads leave it
    /// untouched.
    pub fn error_code(&self) -> ErrorCode {
        self.error_code
    }

    fn record_infallible_mutation(&mut self) {
        if !self.is_poisoned() {
            self.error_code = ErrorCode::Ok;
        }
    }

    /// Returns `true` if a resize failed. A poisoned table refuses inserts.
    pub fn is_poisoned(&self) -> bool {
        self.error_code == ErrorCode::ResizeFailed
    }

    /// Returns `true` if `key` is present.
    pub fn contains(&self, key: &K::Borrowed) -> bool {
        matches!(self.find(K::hash_key(key), key), Probe::Found(_))
    }

    /// Returns the value stored for `key`.
    pub fn get(&self, key: &K::Borrowed) -> Option<V> {
        match self.find(K::hash_key(key), key) {
            // SAFETY: `find` only reports live buckets.
            Probe::Found(index) => Some(unsafe { self.value_read(index) }),
            Probe::Vacant(_) => None,
        }
    }

    /// Inserts `key` with `value`.
    ///
    /// If the key is already present its current value is reported in
    /// [`SetOutcome::AlreadyPresent`], and replaced by `value` only when
    /// `replace` is set.
    ///
    /// May rebuild the table first. On [`Error::ResizeAlloc`] the table is
    /// poisoned; on [`Error::KeyAlloc`] it is unchanged apart from any
    /// rebuild that already happened.
    pub fn set(
        &mut self,
        key: &K::Borrowed,
        value: V,
        replace: bool,
    ) -> Result<SetOutcome<V>, Error> {
        if self.is_poisoned() {
            return Err(Error::Poisoned);
        }

        let result = self.set_impl(key, value, replace);
        self.error_code = match &result {
            Ok(_) => ErrorCode::Ok,
            Err(err) => err.code(),
        };
        result
    }

    fn set_impl(
        &mut self,
        key: &K::Borrowed,
        value: V,
        replace: bool,
    ) -> Result<SetOutcome<V>, Error> {
        self.maybe_resize_rehash()?;

        let hash = K::hash_key(key);
        match self.find(hash, key) {
            Probe::Found(index) => {
                // SAFETY: `find` only reports live buckets.
                let old = unsafe { self.value_read(index) };
                if replace {
                    // SAFETY: In bounds; `V` is `Copy` so overwriting drops
                    // nothing.
                    unsafe {
                        self.values_ptr()
                            .as_mut()
                            .get_unchecked_mut(index)
                            .write(value);
                    }
                }
                Ok(SetOutcome::AlreadyPresent(old))
            }
            Probe::Vacant(index) => {
                let stored = K::try_store(key)?;
                // SAFETY: `index` is an EMPTY bucket from `find`; the control
                // byte is written last so the bucket only becomes live once
                // fully initialized.
                unsafe {
                    self.write_entry(index, stored, value);
                    self.set_ctrl(index, control::h2(hash));
                }
                self.size += 1;
                Ok(SetOutcome::Inserted)
            }
        }
    }

    fn maybe_resize_rehash(&mut self) -> Result<(), Error> {
        if self.size + self.num_deleted < self.upper_bound {
            return Ok(());
        }

        let num_buckets = if self.size >= self.grow_threshold {
            self.num_buckets
                .checked_mul(2)
                .ok_or(Error::CapacityOverflow)?
        } else {
            self.num_buckets
        };
        self.resize_rehash(num_buckets)
    }

    /// Moves every live entry into fresh arrays of `num_buckets` buckets,
    /// dropping all tombstones.
    ///
    /// The new arrays are allocated before the old ones are touched, so on
    /// failure the table keeps its current contents.
    #[cold]
    #[inline(never)]
    fn resize_rehash(&mut self, num_buckets: usize) -> Result<(), Error> {
        debug_assert!(self.size < upper_bound(num_buckets));

        let (new_layout, new_alloc) = Self::allocate(num_buckets)?;
        let old_layout = core::mem::replace(&mut self.layout, new_layout);
        let old_alloc = core::mem::replace(&mut self.alloc, new_alloc);
        let old_buckets = core::mem::replace(&mut self.num_buckets, num_buckets);
        self.upper_bound = upper_bound(num_buckets);
        self.grow_threshold = grow_threshold(num_buckets);
        self.num_deleted = 0;

        // SAFETY: `old_alloc` is still a valid allocation described by
        // `old_layout` with `old_buckets` buckets.
        let (old_ctrl, old_keys, old_values) = unsafe {
            (
                core::slice::from_raw_parts(old_alloc.as_ptr(), old_buckets),
                NonNull::<[MaybeUninit<K::Stored>]>::slice_from_raw_parts(
                    old_alloc.add(old_layout.keys_offset).cast(),
                    old_buckets,
                ),
                NonNull::<[MaybeUninit<V>]>::slice_from_raw_parts(
                    old_alloc.add(old_layout.values_offset).cast(),
                    old_buckets,
                ),
            )
        };

        // SAFETY: Keys and values are moved bitwise out of the old arrays;
        // the old allocation is then released without running destructors,
        // so each key is owned by exactly one table.
        unsafe {
            for (index, &ctrl) in old_ctrl.iter().enumerate() {
                if !control::is_live(ctrl) {
                    continue;
                }

                let key = old_keys.as_ref().get_unchecked(index).assume_init_read();
                let value = old_values.as_ref().get_unchecked(index).assume_init_read();
                let hash = K::hash_key(K::view(&key));
                let slot = self.find_empty(hash);
                self.write_entry(slot, key, value);
                self.set_ctrl(slot, control::h2(hash));
            }

            memory::dealloc(old_alloc, old_layout.layout);
        }

        Ok(())
    }

    /// Removes `key`, returning its value.
    ///
    /// The key's storage is released immediately and its bucket becomes a
    /// tombstone.
    pub fn remove(&mut self, key: &K::Borrowed) -> Option<V> {
        self.record_infallible_mutation();
        match self.find(K::hash_key(key), key) {
            // SAFETY: `find` only reports live buckets.
            Probe::Found(index) => Some(unsafe { self.take(index) }.1),
            Probe::Vacant(_) => None,
        }
    }

    /// Removes the entry in bucket `index`, if that bucket is live.
    pub fn remove_at(&mut self, index: usize) -> Option<(K::Owned, V)> {
        self.record_infallible_mutation();
        if !self.is_live(index) {
            return None;
        }
        // SAFETY: Checked live above.
        let (key, value) = unsafe { self.take(index) };
        Some((K::into_owned(key), value))
    }

    /// # Safety
    ///
    /// The bucket at `index` must be live.
    unsafe fn take(&mut self, index: usize) -> (K::Stored, V) {
        // SAFETY: Caller guarantees the bucket is live; it is marked deleted
        // right after the key is moved out.
        unsafe {
            let key = self.keys_ptr().as_ref().get_unchecked(index).assume_init_read();
            let value = self.value_read(index);
            self.set_ctrl(index, DELETED);
            self.size -= 1;
            self.num_deleted += 1;
            (key, value)
        }
    }

    /// Removes every entry, keeping the bucket arrays.
    pub fn clear(&mut self) {
        self.record_infallible_mutation();
        self.drop_live_keys();
        // SAFETY: The allocation holds `num_buckets` control bytes at offset 0.
        unsafe { core::ptr::write_bytes(self.alloc.as_ptr(), EMPTY, self.num_buckets) };
        self.size = 0;
        self.num_deleted = 0;
    }

    fn drop_live_keys(&mut self) {
        if !core::mem::needs_drop::<K::Stored>() || self.size == 0 {
            return;
        }
        for index in 0..self.num_buckets {
            // SAFETY: In bounds; live buckets hold an initialized key. Callers
            // reset or release the control array right after.
            unsafe {
                if control::is_live(self.ctrl(index)) {
                    self.keys_ptr()
                        .as_mut()
                        .get_unchecked_mut(index)
                        .assume_init_drop();
                }
            }
        }
    }

    /// Sets every entry of `other` into this table, replacing existing values.
    pub fn merge_from(&mut self, other: &Self) -> Result<(), Error> {
        for (_, key, value) in other.iter() {
            self.set(key, value, true)?;
        }
        Ok(())
    }

    /// Returns `true` if bucket `index` holds a live entry. Out-of-range
    /// indices are never live.
    pub fn is_live(&self, index: usize) -> bool {
        self.ctrl_bytes()
            .get(index)
            .is_some_and(|&ctrl| control::is_live(ctrl))
    }

    /// The key in bucket `index`, if that bucket is live.
    pub fn key_at(&self, index: usize) -> Option<&K::Borrowed> {
        // SAFETY: Checked live.
        self.is_live(index)
            .then(|| K::view(unsafe { self.key_ref(index) }))
    }

    /// The value in bucket `index`, if that bucket is live.
    pub fn value_at(&self, index: usize) -> Option<V> {
        // SAFETY: Checked live.
        self.is_live(index).then(|| unsafe { self.value_read(index) })
    }

    /// Iterates over live entries as `(bucket index, key, value)` in physical
    /// bucket order.
    ///
    /// The order is neither insertion nor hash order. The iterator borrows the
    /// table, so it cannot be mutated while iterating.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            table: self,
            index: 0,
            remaining: self.size,
        }
    }

    /// Returns occupancy statistics.
    ///
    /// Only available with the `stats` feature.
    #[cfg(any(test, feature = "stats"))]
    pub fn stats(&self) -> TableStats {
        let (spilled_keys, spilled_bytes) = self
            .iter()
            .map(|(index, _, _)| {
                // SAFETY: The iterator only yields live buckets.
                K::heap_bytes(unsafe { self.key_ref(index) })
            })
            .filter(|&bytes| bytes > 0)
            .fold((0, 0), |(count, total), bytes| (count + 1, total + bytes));

        TableStats {
            num_buckets: self.num_buckets,
            size: self.size,
            num_deleted: self.num_deleted,
            upper_bound: self.upper_bound,
            grow_threshold: self.grow_threshold,
            load_factor: self.size as f64 / self.num_buckets as f64,
            occupancy: (self.size + self.num_deleted) as f64 / self.num_buckets as f64,
            spilled_keys,
            spilled_bytes,
            table_bytes: self.layout.layout.size(),
        }
    }

    /// Histogram of probe lengths over live entries.
    ///
    /// Bin `i` counts entries found after visiting `i` groups beyond their
    /// home group. Only available with the `stats` feature.
    #[cfg(any(test, feature = "stats"))]
    pub fn probe_histogram(&self) -> alloc::vec::Vec<usize> {
        let mut hist = alloc::vec::Vec::new();
        let num_groups = self.num_buckets / Group::WIDTH;

        for (index, key, _) in self.iter() {
            let target = index / Group::WIDTH;
            let mut seq = ProbeSeq::new(K::hash_key(key), num_groups);
            let mut steps = 0;
            while seq.group != target {
                seq.advance();
                steps += 1;
            }
            if hist.len() <= steps {
                hist.resize(steps + 1, 0);
            }
            hist[steps] += 1;
        }

        hist
    }
}

/// Iterator over the live entries of a [`RawTable`] in bucket order.
pub struct Iter<'a, K: KeyKind, V: Value> {
    table: &'a RawTable<K, V>,
    index: usize,
    remaining: usize,
}

impl<'a, K: KeyKind, V: Value> Iterator for Iter<'a, K, V> {
    type Item = (usize, &'a K::Borrowed, V);

    fn next(&mut self) -> Option<Self::Item> {
        let table = self.table;
        while self.remaining > 0 && self.index < table.num_buckets {
            let index = self.index;
            self.index += 1;

            // SAFETY: `index` is in bounds; live buckets hold a key and value.
            unsafe {
                if control::is_live(table.ctrl(index)) {
                    self.remaining -= 1;
                    return Some((index, K::view(table.key_ref(index)), table.value_read(index)));
                }
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K: KeyKind, V: Value> ExactSizeIterator for Iter<'_, K, V> {}

impl<K: KeyKind, V: Value> FusedIterator for Iter<'_, K, V> {}

impl<K: KeyKind, V: Value> Clone for Iter<'_, K, V> {
    fn clone(&self) -> Self {
        Iter { ..*self }
    }
}

#[cfg(test)]
mod tests {
    use alloc::format;
    use alloc::string::String;
    use alloc::string::ToString;
    use alloc::vec;
    use alloc::vec::Vec;

    use rand::Rng;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;
    use crate::key::Bytes;
    use crate::key::Str;
    use crate::memory::failpoint;

    fn long_key(i: usize) -> String {
        format!("{i:0>40}")
    }

    #[test]
    fn thresholds() {
        assert_eq!(upper_bound(32), 25);
        assert_eq!(grow_threshold(32), 19);
        assert_eq!(upper_bound(1 << 20), (PEAK_LOAD * (1 << 20) as f64) as usize);
        assert_eq!(
            grow_threshold(1 << 20),
            (PEAK_LOAD * PEAK_LOAD * (1 << 20) as f64) as usize
        );
        assert_eq!(bucket_count(0), Ok(32));
        assert_eq!(bucket_count(33), Ok(64));
        assert_eq!(bucket_count(64), Ok(64));
        assert_eq!(bucket_count(usize::MAX), Err(Error::CapacityOverflow));
    }

    #[test]
    fn probe_seq_visits_every_group() {
        for num_groups in [1usize, 2, 4, 64, 1024] {
            let mut seen = vec![false; num_groups];
            let mut seq = ProbeSeq::new(0x1234_5678, num_groups);
            for _ in 0..num_groups {
                assert!(!seen[seq.group]);
                seen[seq.group] = true;
                seq.advance();
            }
            assert!(seen.iter().all(|&s| s));
        }
    }

    #[test]
    fn insert_and_get() {
        let mut table: RawTable<i64, i64> = RawTable::new();
        for i in 0..1000 {
            assert_eq!(table.set(&i, i * 2, true), Ok(SetOutcome::Inserted));
        }
        assert_eq!(table.len(), 1000);
        for i in 0..1000 {
            assert_eq!(table.get(&i), Some(i * 2));
            assert!(table.contains(&i));
        }
        assert_eq!(table.get(&1000), None);
        assert!(table.num_buckets().is_power_of_two());
        assert!(table.len() < upper_bound(table.num_buckets()) + 1);
    }

    #[test]
    fn replace_flag() {
        let mut table: RawTable<Str, i32> = RawTable::new();
        table.set("k", 1, true).unwrap();
        assert_eq!(table.set("k", 2, false), Ok(SetOutcome::AlreadyPresent(1)));
        assert_eq!(table.get("k"), Some(1));
        assert_eq!(table.set("k", 3, true), Ok(SetOutcome::AlreadyPresent(1)));
        assert_eq!(table.get("k"), Some(3));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn remove_leaves_tombstone() {
        let mut table: RawTable<i32, f32> = RawTable::new();
        for i in 0..10 {
            table.set(&i, i as f32, true).unwrap();
        }
        assert_eq!(table.remove(&3), Some(3.0));
        assert_eq!(table.remove(&3), None);
        assert_eq!(table.remove(&42), None);
        assert_eq!(table.get(&3), None);
        assert_eq!(table.len(), 9);
        assert_eq!(table.num_deleted(), 1);

        let live = table.ctrl_bytes().iter().filter(|&&c| control::is_live(c)).count();
        let dead = table.ctrl_bytes().iter().filter(|&&c| c == DELETED).count();
        assert_eq!(live, table.len());
        assert_eq!(dead, table.num_deleted());
    }

    #[test]
    fn grows_when_live_entries_reach_threshold() {
        let mut table: RawTable<i32, i32> = RawTable::new();
        for i in 0..25 {
            table.set(&i, i, true).unwrap();
        }
        assert_eq!(table.num_buckets(), 32);

        table.set(&25, 25, true).unwrap();
        assert_eq!(table.num_buckets(), 64);
        assert_eq!(table.len(), 26);
        for i in 0..26 {
            assert_eq!(table.get(&i), Some(i));
        }
    }

    #[test]
    fn compacts_tombstones_in_place() {
        let mut table: RawTable<Str, i64> = RawTable::new();
        for i in 0..18 {
            table.set(&long_key(i), i as i64, true).unwrap();
        }
        for i in 0..7 {
            assert_eq!(table.remove(&long_key(i)), Some(i as i64));
        }
        for i in 18..25 {
            table.set(&long_key(i), i as i64, true).unwrap();
        }
        assert_eq!(table.len() + table.num_deleted(), 25);

        table.set(&long_key(25), 25, true).unwrap();
        assert_eq!(table.num_buckets(), 32);
        assert_eq!(table.num_deleted(), 0);
        assert_eq!(table.len(), 19);
        for i in 7..26 {
            assert_eq!(table.get(&long_key(i)), Some(i as i64));
        }
        for i in 0..7 {
            assert!(!table.contains(&long_key(i)));
        }
    }

    #[test]
    fn clear_keeps_capacity() {
        let mut table: RawTable<Str, i32> = RawTable::new();
        for i in 0..200 {
            table.set(&long_key(i), i as i32, true).unwrap();
        }
        table.remove(&long_key(0));
        let buckets = table.num_buckets();

        table.clear();
        assert_eq!(table.len(), 0);
        assert_eq!(table.num_deleted(), 0);
        assert_eq!(table.num_buckets(), buckets);
        assert!(table.ctrl_bytes().iter().all(|&c| c == EMPTY));
        for i in 0..200 {
            assert!(!table.contains(&long_key(i)));
        }

        for i in 0..150 {
            table.set(&long_key(i), -(i as i32), true).unwrap();
        }
        assert_eq!(table.num_buckets(), buckets);
        assert_eq!(table.get(&long_key(149)), Some(-149));
    }

    #[test]
    fn resize_failure_poisons() {
        let mut table: RawTable<Str, i64> = RawTable::new();
        for i in 0..25 {
            table.set(&long_key(i), i as i64, true).unwrap();
        }

        failpoint::fail_after(0);
        assert_eq!(
            table.set(&long_key(25), 25, true),
            Err(Error::ResizeAlloc { buckets: 64 })
        );
        failpoint::disarm();
        assert_eq!(table.error_code(), ErrorCode::ResizeFailed);
        assert!(table.is_poisoned());

        // Old contents stay intact and readable.
        assert_eq!(table.len(), 25);
        assert_eq!(table.num_buckets(), 32);
        for i in 0..25 {
            assert_eq!(table.get(&long_key(i)), Some(i as i64));
        }

        assert_eq!(table.set(&long_key(0), 0, true), Err(Error::Poisoned));
        assert_eq!(table.remove(&long_key(3)), Some(3));
        table.clear();
        assert_eq!(table.set("x", 1, true), Err(Error::Poisoned));
        assert_eq!(table.error_code(), ErrorCode::ResizeFailed);
    }

    #[test]
    fn key_alloc_failure_keeps_table() {
        let mut table: RawTable<Bytes, i32> = RawTable::new();
        table.set(b"short", 1, true).unwrap();
        let long = [0xABu8; 100];

        failpoint::fail_after(0);
        assert_eq!(
            table.set(&long, 2, true),
            Err(Error::KeyAlloc { len: 100 })
        );
        failpoint::disarm();
        assert_eq!(table.error_code(), ErrorCode::KeyAllocFailed);
        assert!(!table.is_poisoned());
        assert_eq!(table.len(), 1);
        assert!(!table.contains(&long));

        assert_eq!(table.set(&long, 2, true), Ok(SetOutcome::Inserted));
        assert_eq!(table.error_code(), ErrorCode::Ok);
        assert_eq!(table.get(&long), Some(2));
    }

    #[test]
    fn successful_mutations_reset_key_alloc_code() {
        let mut table: RawTable<Bytes, i32> = RawTable::new();
        let long = [0xCDu8; 64];
        let fail_insert = |table: &mut RawTable<Bytes, i32>| {
            failpoint::fail_after(0);
            assert_eq!(table.set(&long, 1, true), Err(Error::KeyAlloc { len: 64 }));
            failpoint::disarm();
            assert_eq!(table.error_code(), ErrorCode::KeyAllocFailed);
        };
        table.set(b"a", 1, true).unwrap();
        table.set(b"b", 2, true).unwrap();

        fail_insert(&mut table);
        assert_eq!(table.get(b"a"), Some(1));
        assert!(table.contains(b"b"));
        assert_eq!(table.error_code(), ErrorCode::KeyAllocFailed);

        assert_eq!(table.remove(b"missing"), None);
        assert_eq!(table.error_code(), ErrorCode::Ok);

        fail_insert(&mut table);
        let (index, _, _) = table.iter().next().unwrap();
        assert!(table.remove_at(index).is_some());
        assert_eq!(table.error_code(), ErrorCode::Ok);

        fail_insert(&mut table);
        table.clear();
        assert_eq!(table.error_code(), ErrorCode::Ok);
    }

    #[test]
    fn try_clone_matches_clone_and_reports_failure() {
        let mut table: RawTable<Str, i64> = RawTable::new();
        for i in 0..30 {
            table.set(&long_key(i), i as i64, true).unwrap();
        }
        table.set("short", -1, true).unwrap();
        table.remove(&long_key(4));

        let copy = table.try_clone().unwrap();
        assert_eq!(copy.ctrl_bytes(), table.ctrl_bytes());
        assert_eq!(copy.len(), table.len());
        assert_eq!(copy.num_deleted(), table.num_deleted());
        assert_eq!(copy.get(&long_key(29)), Some(29));
        assert_eq!(copy.get("short"), Some(-1));
        drop(copy);

        let buckets = table.num_buckets();
        failpoint::fail_after(0);
        assert_eq!(
            table.try_clone().unwrap_err(),
            Error::ResizeAlloc { buckets }
        );
        // The bucket arrays and two keys are copied before the third key fails.
        failpoint::fail_after(3);
        assert_eq!(table.try_clone().unwrap_err(), Error::KeyAlloc { len: 40 });
        failpoint::disarm();

        assert_eq!(table.len(), 30);
        assert_eq!(table.error_code(), ErrorCode::Ok);
        for i in 5..30 {
            assert_eq!(table.get(&long_key(i)), Some(i as i64));
        }
    }

    #[test]
    fn try_with_capacity_reports_failure() {
        failpoint::fail_after(0);
        let result = RawTable::<i32, i32>::try_with_capacity(1000);
        failpoint::disarm();
        assert!(matches!(result, Err(Error::ResizeAlloc { buckets: 1024 })));

        let table = RawTable::<i32, i32>::try_with_capacity(1000).unwrap();
        assert_eq!(table.num_buckets(), 1024);
        assert_eq!(
            RawTable::<i32, i32>::try_with_capacity(usize::MAX).unwrap_err(),
            Error::CapacityOverflow
        );
    }

    #[test]
    #[should_panic(expected = "probe sequence exhausted")]
    fn probe_exhaustion_panics() {
        let mut table: RawTable<i32, i32> = RawTable::new();
        // SAFETY: Every bucket becomes a tombstone; no key is live.
        unsafe { core::ptr::write_bytes(table.alloc.as_ptr(), DELETED, table.num_buckets) };
        table.num_deleted = table.num_buckets;
        table.get(&1);
    }

    #[test]
    fn clone_preserves_tombstones() {
        let mut table: RawTable<Str, f64> = RawTable::with_capacity(64);
        for i in 0..40 {
            table.set(&long_key(i), i as f64, true).unwrap();
        }
        for i in (0..40).step_by(3) {
            table.remove(&long_key(i));
        }

        let mut copy = table.clone();
        assert_eq!(copy.ctrl_bytes(), table.ctrl_bytes());
        assert_eq!(copy.len(), table.len());
        assert_eq!(copy.num_deleted(), table.num_deleted());
        assert_eq!(copy.num_buckets(), table.num_buckets());
        for (index, key, value) in table.iter() {
            assert_eq!(copy.key_at(index), Some(key));
            assert_eq!(copy.value_at(index), Some(value));
        }

        copy.set(&long_key(1), -1.0, true).unwrap();
        copy.remove(&long_key(2));
        assert_eq!(table.get(&long_key(1)), Some(1.0));
        assert_eq!(table.get(&long_key(2)), Some(2.0));
    }

    #[test]
    fn traversal_is_bounds_checked() {
        let mut table: RawTable<Bytes, ()> = RawTable::new();
        for word in [&b"alpha"[..], &b"beta"[..], &b"gamma"[..]] {
            table.set(word, (), true).unwrap();
        }

        let n = table.num_buckets();
        assert!(!table.is_live(n));
        assert_eq!(table.key_at(n), None);
        assert_eq!(table.value_at(usize::MAX), None);

        let indices: Vec<usize> = table.iter().map(|(i, _, _)| i).collect();
        assert_eq!(indices.len(), 3);
        assert!(indices.windows(2).all(|w| w[0] < w[1]));
        for &i in &indices {
            assert!(table.is_live(i));
            assert_eq!(table.value_at(i), Some(()));
        }
        assert_eq!(table.iter().len(), 3);

        let (key, ()) = table.remove_at(indices[0]).unwrap();
        assert!(!table.contains(&key));
        assert_eq!(table.remove_at(indices[0]), None);
    }

    #[test]
    fn merge_replaces_values() {
        let mut a: RawTable<i32, i32> = RawTable::new();
        let mut b: RawTable<i32, i32> = RawTable::new();
        for i in 0..50 {
            a.set(&i, 0, true).unwrap();
        }
        for i in 25..100 {
            b.set(&i, 1, true).unwrap();
        }
        a.merge_from(&b).unwrap();
        assert_eq!(a.len(), 100);
        assert_eq!(a.get(&0), Some(0));
        assert_eq!(a.get(&25), Some(1));
        assert_eq!(a.get(&99), Some(1));
    }

    #[test]
    fn nan_keys_never_match() {
        let mut table: RawTable<f64, i32> = RawTable::new();
        table.set(&f64::NAN, 1, true).unwrap();
        table.set(&f64::NAN, 2, true).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(&f64::NAN), None);

        table.set(&-0.0, 3, true).unwrap();
        assert_eq!(table.set(&0.0, 4, false), Ok(SetOutcome::AlreadyPresent(3)));
    }

    #[test]
    fn randomized_against_reference() {
        let mut rng = SmallRng::seed_from_u64(0xC0FFEE);
        let mut table: RawTable<Str, i64> = RawTable::new();
        let mut reference = std::collections::HashMap::new();

        for step in 0..20_000i64 {
            let len = rng.random_range(0..40);
            let key: String = (0..len)
                .map(|_| rng.random_range(b'a'..=b'd') as char)
                .take(len.min(3 + (step as usize % 30)))
                .collect();
            match rng.random_range(0..3) {
                0 | 1 => {
                    let outcome = table.set(&key, step, true).unwrap();
                    assert_eq!(outcome.previous(), reference.insert(key, step));
                }
                _ => {
                    assert_eq!(table.remove(&key), reference.remove(&key));
                }
            }
            assert_eq!(table.len(), reference.len());
        }

        for (key, value) in &reference {
            assert_eq!(table.get(key), Some(*value));
        }
        let live = table.ctrl_bytes().iter().filter(|&&c| control::is_live(c)).count();
        assert_eq!(live, table.len());
    }

    #[test]
    fn stats_and_histogram() {
        let mut table: RawTable<Str, i32> = RawTable::new();
        for i in 0..100 {
            let key = if i % 2 == 0 { long_key(i) } else { i.to_string() };
            table.set(&key, i as i32, true).unwrap();
        }
        table.remove("1");

        let stats = table.stats();
        assert_eq!(stats.size, 99);
        assert_eq!(stats.num_deleted, 1);
        assert_eq!(stats.spilled_keys, 50);
        assert_eq!(stats.spilled_bytes, 50 * 40);
        assert_eq!(stats.num_buckets, table.num_buckets());

        let hist = table.probe_histogram();
        assert_eq!(hist.iter().sum::<usize>(), 99);
    }

    #[test]
    fn debug_dumps_control_bytes() {
        let mut table: RawTable<i32, i32> = RawTable::new();
        table.set(&1, 1, true).unwrap();
        table.set(&2, 2, true).unwrap();
        table.remove(&2);

        let dump = format!("{table:?}");
        assert!(dump.starts_with("RawTable"));
        assert!(dump.contains("01"));
        assert!(dump.contains("xx"));
        assert!(dump.contains(".."));
        assert!(dump.contains("num_deleted: 1"));
    }
}
