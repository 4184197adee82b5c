//! The raw open-addressed table behind [`InterningSet`](crate::InterningSet).
//!
//! `HashTable<V>` knows nothing about how values are hashed or compared: every
//! operation takes the hash code and an equality predicate from the caller.
//! The predicate may fail, in which case the operation returns the predicate's
//! error without touching the table.
//!
//! Slots are probed with a perturbation sequence. Removed entries leave a
//! tombstone behind so that probe chains through them stay intact; the first
//! tombstone met while probing for an absent value is reused by the following
//! insert. Tombstones are only dropped when the table is rehashed: at the same
//! size when they make up most of the used slots, into a larger allocation
//! otherwise. The table never shrinks.

use alloc::alloc::handle_alloc_error;
use alloc::vec::Vec;
use core::alloc::Layout;
use core::fmt::Debug;

use crate::error::AllocError;

/// Smallest number of slots a table ever has.
pub const MIN_CAPACITY: usize = 8;

/// Bits of the hash mixed into each probe step before it is exhausted.
const PERTURB_SHIFT: u32 = 5;

cfg_if::cfg_if! {
    if #[cfg(feature = "load-two-thirds")] {
        const LOAD_NUMERATOR: u128 = 2;
        const LOAD_DENOMINATOR: u128 = 3;
    } else {
        const LOAD_NUMERATOR: u128 = 3;
        const LOAD_DENOMINATOR: u128 = 5;
    }
}

/// Maximum number of used (live + tombstone) slots allowed in a table of
/// `capacity` slots.
#[inline(always)]
fn max_used(capacity: usize) -> usize {
    ((capacity as u128 * LOAD_NUMERATOR) / LOAD_DENOMINATOR) as usize
}

/// Smallest power-of-two slot count that holds `entries` under the load
/// threshold.
fn capacity_for(entries: usize) -> Result<usize, AllocError> {
    let mut capacity = MIN_CAPACITY;
    while max_used(capacity) < entries {
        capacity = capacity
            .checked_mul(2)
            .ok_or(AllocError::CapacityOverflow { requested: entries })?;
    }
    Ok(capacity)
}

#[derive(Clone)]
enum Slot<V> {
    Empty,
    Tombstone,
    Occupied { hash: u64, value: V },
}

/// What a probe found at a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// The slot holds a value equal to the probe.
    Occupied,
    /// The probe value is absent; the slot is a never-used insertion point.
    Empty,
    /// The probe value is absent; the slot is a tombstone that the next
    /// insert of this value will reuse.
    Tombstone,
}

/// The result of probing a table: a slot index and what was found there.
///
/// A `SlotRef` is only meaningful for the table state it was computed
/// against. Any insert or removal may invalidate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRef {
    index: usize,
    kind: SlotKind,
}

impl SlotRef {
    /// Index of the slot within the table.
    pub fn index(&self) -> usize {
        self.index
    }

    /// What the probe found.
    pub fn kind(&self) -> SlotKind {
        self.kind
    }

    /// Returns `true` if the probe found an equal value.
    pub fn is_found(&self) -> bool {
        self.kind == SlotKind::Occupied
    }
}

/// The perturbation probe sequence for one hash code.
///
/// Starts at `hash & mask`, then steps with `i = 5 * i + 1 + perturb` while
/// shifting `perturb` right. Once every hash bit has been mixed in the step
/// degenerates to `5 * i + 1`, which visits every slot of a power-of-two table.
struct ProbeSeq {
    index: usize,
    perturb: u64,
    mask: usize,
}

impl ProbeSeq {
    #[inline(always)]
    fn new(hash: u64, mask: usize) -> Self {
        Self {
            index: hash as usize & mask,
            perturb: hash,
            mask,
        }
    }

    #[inline(always)]
    fn advance(&mut self) {
        self.index = self
            .index
            .wrapping_mul(5)
            .wrapping_add(1)
            .wrapping_add(self.perturb as usize)
            & self.mask;
        self.perturb >>= PERTURB_SHIFT;
    }
}

/// Debug statistics for table analysis.
#[cfg(any(test, feature = "stats"))]
#[derive(Debug, Clone)]
pub struct DebugStats {
    /// Number of live entries
    pub populated: usize,
    /// Number of tombstones
    pub tombstones: usize,
    /// Total number of slots allocated
    pub capacity: usize,
    /// Maximum number of used slots before the next insert grows the table
    pub max_used: usize,
    /// Live entries per slot
    pub load_factor: f64,
    /// Used (live + tombstone) slots per slot
    pub fill_factor: f64,
    /// Longest probe sequence of any live entry, counted in steps
    pub max_probe_length: usize,
    /// Total bytes of the slot array
    pub total_bytes: usize,
}

#[cfg(any(test, feature = "stats"))]
impl DebugStats {
    /// Pretty-print the debug statistics.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        println!("=== Intern Table Debug Statistics ===");
        println!(
            "Population: {}/{} slots ({:.2}% load factor)",
            self.populated,
            self.capacity,
            self.load_factor * 100.0
        );
        println!(
            "Fill: {} live + {} tombstones, grows past {} ({:.2}% fill)",
            self.populated,
            self.tombstones,
            self.max_used,
            self.fill_factor * 100.0
        );
        println!("Longest probe: {} steps", self.max_probe_length);
        println!("Total Allocated: {} bytes", self.total_bytes);
    }
}

/// Counts of live entries by probe length.
///
/// Bin `i` holds the number of entries found `i` steps after the first slot
/// of their probe sequence.
#[cfg(any(test, feature = "stats"))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeHistogram {
    /// Entry counts, indexed by probe length.
    pub bins: Vec<usize>,
}

#[cfg(any(test, feature = "stats"))]
impl ProbeHistogram {
    /// Total number of entries counted.
    pub fn total(&self) -> usize {
        self.bins.iter().sum()
    }

    /// Pretty-prints the histogram horizontally using stdout.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        let max = *self.bins.iter().max().unwrap_or(&0);
        if max == 0 {
            println!("probe histogram: empty");
            return;
        }

        let max_bar = 60usize;
        println!("probe histogram ({} entries):", self.total());
        for (i, &count) in self.bins.iter().enumerate() {
            let width = (count * max_bar).div_ceil(max);
            println!("{:>3} | {} ({})", i, "█".repeat(width), count);
        }
    }
}

/// An open-addressed hash table with tombstones and perturbation probing.
///
/// `HashTable<V>` stores values of type `V` together with their hash codes.
/// The caller supplies both the hash and an equality predicate for each
/// operation, which lets the predicate fail and lets the caller hash and
/// compare through functions the values themselves do not provide.
///
/// ## Example
///
/// ```rust
/// use intern_set::hash_table::Entry;
/// use intern_set::hash_table::HashTable;
///
/// let mut table: HashTable<String> = HashTable::new();
/// let hash = 0x5eed;
///
/// match table.entry(hash, |s: &String| Ok::<_, ()>(s == "path")).unwrap() {
///     Entry::Vacant(entry) => {
///         entry.insert("path".to_string()).unwrap();
///     }
///     Entry::Occupied(_) => unreachable!(),
/// }
///
/// let found = table.find(hash, |s| Ok::<_, ()>(s == "path")).unwrap();
/// assert_eq!(found.map(String::as_str), Some("path"));
/// ```
#[derive(Clone)]
pub struct HashTable<V> {
    slots: Vec<Slot<V>>,
    populated: usize,
    used: usize,
    version: u64,
}

impl<V> Debug for HashTable<V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use alloc::format;
        use alloc::string::String;
        use alloc::string::ToString;

        f.debug_struct("HashTable")
            .field(
                "popmap",
                &self
                    .slots
                    .chunks(16)
                    .map(|w| {
                        w.iter()
                            .map(|slot| match slot {
                                Slot::Empty => "..".to_string(),
                                Slot::Tombstone => "xx".to_string(),
                                Slot::Occupied { hash, .. } => format!("{:02x}", hash >> 56),
                            })
                            .collect::<Vec<String>>()
                            .join(", ")
                    })
                    .collect::<Vec<_>>(),
            )
            .field("populated", &self.populated)
            .field("used", &self.used)
            .field("capacity", &self.slots.len())
            .field("version", &self.version)
            .finish()
    }
}

impl<V> Default for HashTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> HashTable<V> {
    /// Creates an empty table with the minimum number of slots.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates an empty table that can hold at least `capacity` values
    /// without growing.
    ///
    /// Aborts through the global allocation error handler if the slot array
    /// cannot be allocated, and panics if `capacity` is too large to be
    /// represented.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use intern_set::hash_table::HashTable;
    ///
    /// let table: HashTable<u64> = HashTable::with_capacity(100);
    /// assert!(table.capacity() >= 100);
    /// assert!(table.capacity().is_power_of_two());
    /// ```
    pub fn with_capacity(capacity: usize) -> Self {
        match Self::try_with_capacity(capacity) {
            Ok(table) => table,
            Err(AllocError::CapacityOverflow { .. }) => panic!("capacity overflow"),
            Err(AllocError::AllocatorFailed { slots }) => {
                handle_alloc_error(Layout::array::<Slot<V>>(slots).unwrap_or(Layout::new::<Slot<V>>()))
            }
        }
    }

    /// Fallible version of [`with_capacity`](Self::with_capacity).
    pub fn try_with_capacity(capacity: usize) -> Result<Self, AllocError> {
        let slots = Self::allocate_slots(capacity_for(capacity)?)?;
        Ok(Self {
            slots,
            populated: 0,
            used: 0,
            version: 0,
        })
    }

    fn allocate_slots(count: usize) -> Result<Vec<Slot<V>>, AllocError> {
        debug_assert!(count.is_power_of_two() && count >= MIN_CAPACITY);

        if Layout::array::<Slot<V>>(count).is_err() {
            return Err(AllocError::CapacityOverflow { requested: count });
        }

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(count)
            .map_err(|_| AllocError::AllocatorFailed { slots: count })?;
        slots.resize_with(count, || Slot::Empty);
        Ok(slots)
    }

    #[inline(always)]
    fn mask(&self) -> usize {
        self.slots.len() - 1
    }

    /// Returns the number of values in the table.
    pub fn len(&self) -> usize {
        self.populated
    }

    /// Returns `true` if the table holds no values.
    pub fn is_empty(&self) -> bool {
        self.populated == 0
    }

    /// Returns the number of slots. Always a power of two, at least
    /// [`MIN_CAPACITY`].
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns the number of slots that are live or tombstoned.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Returns the structural version of the table.
    ///
    /// The version changes on every removal, every rehash and every
    /// [`clear`](Self::clear). Inserts that do not rehash leave it unchanged.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Size in bytes of the slot array.
    pub fn allocation_size(&self) -> usize {
        self.slots.capacity() * core::mem::size_of::<Slot<V>>()
    }

    /// Probes for a value.
    ///
    /// Returns the slot holding a value for which `eq` is true, or, if there
    /// is none, the slot the value would be inserted into: the first tombstone
    /// met along the probe sequence, or else the empty slot that ended it.
    ///
    /// `eq` is only called for stored values whose hash code equals `hash`.
    /// Its first error aborts the probe.
    pub fn probe<E>(
        &self,
        hash: u64,
        mut eq: impl FnMut(&V) -> Result<bool, E>,
    ) -> Result<SlotRef, E> {
        let mut seq = ProbeSeq::new(hash, self.mask());
        let mut free_slot = None;

        loop {
            match &self.slots[seq.index] {
                Slot::Empty => {
                    return Ok(match free_slot {
                        Some(index) => SlotRef {
                            index,
                            kind: SlotKind::Tombstone,
                        },
                        None => SlotRef {
                            index: seq.index,
                            kind: SlotKind::Empty,
                        },
                    });
                }
                Slot::Tombstone => {
                    if free_slot.is_none() {
                        free_slot = Some(seq.index);
                    }
                }
                Slot::Occupied {
                    hash: stored,
                    value,
                } => {
                    if *stored == hash && eq(value)? {
                        return Ok(SlotRef {
                            index: seq.index,
                            kind: SlotKind::Occupied,
                        });
                    }
                }
            }

            seq.advance();
        }
    }

    /// Finds the first empty slot on the probe sequence of `hash`.
    ///
    /// Only valid right after a rehash, when the table holds no tombstones and
    /// no value equal to the one being placed.
    fn find_empty(&self, hash: u64) -> usize {
        let mut seq = ProbeSeq::new(hash, self.mask());
        while !matches!(self.slots[seq.index], Slot::Empty) {
            seq.advance();
        }
        seq.index
    }

    fn occupied(&self, index: usize) -> &V {
        match &self.slots[index] {
            Slot::Occupied { value, .. } => value,
            _ => unreachable!("slot {index} is not occupied"),
        }
    }

    /// Returns the value for which `eq` is true, if any.
    pub fn find<E>(
        &self,
        hash: u64,
        eq: impl FnMut(&V) -> Result<bool, E>,
    ) -> Result<Option<&V>, E> {
        let slot = self.probe(hash, eq)?;
        Ok(slot.is_found().then(|| self.occupied(slot.index)))
    }

    /// Gets the entry for the given hash and equality predicate.
    ///
    /// The table is not modified by this call; a vacant entry only grows the
    /// table once a value is actually inserted through it.
    pub fn entry<E>(
        &mut self,
        hash: u64,
        eq: impl FnMut(&V) -> Result<bool, E>,
    ) -> Result<Entry<'_, V>, E> {
        let slot = self.probe(hash, eq)?;
        Ok(if slot.is_found() {
            Entry::Occupied(OccupiedEntry {
                table: self,
                index: slot.index,
            })
        } else {
            Entry::Vacant(VacantEntry {
                table: self,
                hash,
                slot,
            })
        })
    }

    /// Removes and returns the value for which `eq` is true, leaving a
    /// tombstone in its slot.
    pub fn remove<E>(
        &mut self,
        hash: u64,
        eq: impl FnMut(&V) -> Result<bool, E>,
    ) -> Result<Option<V>, E> {
        let slot = self.probe(hash, eq)?;
        Ok(slot.is_found().then(|| self.remove_at(slot.index)))
    }

    fn remove_at(&mut self, index: usize) -> V {
        match core::mem::replace(&mut self.slots[index], Slot::Tombstone) {
            Slot::Occupied { value, .. } => {
                self.populated -= 1;
                self.version = self.version.wrapping_add(1);
                value
            }
            _ => unreachable!("slot {index} is not occupied"),
        }
    }

    /// Removes every value, keeping the current number of slots.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = Slot::Empty;
        }
        self.populated = 0;
        self.used = 0;
        self.version = self.version.wrapping_add(1);
        tracing::trace!(capacity = self.slots.len(), "cleared intern table");
    }

    /// Makes room for at least `additional` more values without growing.
    ///
    /// Tombstones count against the room left, so a table with many of them
    /// is rehashed to drop them, at its current size if the live values
    /// allow. On failure the table is unchanged.
    pub fn reserve(&mut self, additional: usize) -> Result<(), AllocError> {
        let overflow = AllocError::CapacityOverflow {
            requested: usize::MAX,
        };
        let used = self.used.checked_add(additional).ok_or(overflow)?;
        if used <= max_used(self.slots.len()) {
            return Ok(());
        }

        let live = self.populated.checked_add(additional).ok_or(overflow)?;
        self.rehash(capacity_for(live)?.max(self.slots.len()))
    }

    /// Makes room for `min_entries` live values after the used count hit the
    /// threshold.
    ///
    /// If the live values fill at most half of the threshold, the used slots
    /// are mostly tombstones and the table is rehashed at its current size.
    /// Otherwise the slot count doubles, repeatedly if needed. The table never
    /// shrinks.
    #[cold]
    fn grow(&mut self, min_entries: usize) -> Result<(), AllocError> {
        let capacity = self.slots.len();
        if min_entries <= max_used(capacity) / 2 {
            return self.rehash(capacity);
        }

        let overflow = AllocError::CapacityOverflow {
            requested: min_entries,
        };
        let mut capacity = capacity.checked_mul(2).ok_or(overflow)?;
        while max_used(capacity) < min_entries {
            capacity = capacity.checked_mul(2).ok_or(overflow)?;
        }
        self.rehash(capacity)
    }

    /// Moves every live value into a fresh allocation of `capacity` slots.
    ///
    /// Stored hash codes are reused, so no caller code runs and the only
    /// failure is the allocation itself, which happens before the table is
    /// touched.
    fn rehash(&mut self, capacity: usize) -> Result<(), AllocError> {
        let fresh = Self::allocate_slots(capacity)?;
        let old_capacity = self.slots.len();
        let tombstones = self.used - self.populated;
        let old = core::mem::replace(&mut self.slots, fresh);

        for slot in old {
            if let Slot::Occupied { hash, value } = slot {
                let index = self.find_empty(hash);
                self.slots[index] = Slot::Occupied { hash, value };
            }
        }

        self.used = self.populated;
        self.version = self.version.wrapping_add(1);
        tracing::debug!(
            old_capacity,
            new_capacity = capacity,
            live = self.populated,
            tombstones,
            "rehashed intern table"
        );
        Ok(())
    }

    /// Returns the first live value at or after slot `position`, with its
    /// slot index.
    pub fn next_occupied(&self, position: usize) -> Option<(usize, &V)> {
        self.slots
            .iter()
            .enumerate()
            .skip(position)
            .find_map(|(index, slot)| match slot {
                Slot::Occupied { value, .. } => Some((index, value)),
                _ => None,
            })
    }

    /// Returns an iterator over all values in ascending slot order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use intern_set::hash_table::HashTable;
    ///
    /// let mut table = HashTable::new();
    /// for n in 0..4u64 {
    ///     table
    ///         .entry(n, |&v: &u64| Ok::<_, ()>(v == n))
    ///         .unwrap()
    ///         .or_insert(n)
    ///         .unwrap();
    /// }
    ///
    /// let mut values: Vec<u64> = table.iter().copied().collect();
    /// values.sort();
    /// assert_eq!(values, [0, 1, 2, 3]);
    /// ```
    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            slots: self.slots.iter(),
            remaining: self.populated,
        }
    }

    /// Computes a histogram of probe lengths for the current table state.
    ///
    /// The probe length of an entry is the number of steps its probe sequence
    /// takes from its first slot to the slot the entry sits in.
    #[cfg(any(test, feature = "stats"))]
    pub fn probe_histogram(&self) -> ProbeHistogram {
        let mut bins = Vec::new();
        for (index, slot) in self.slots.iter().enumerate() {
            if let Slot::Occupied { hash, .. } = slot {
                let length = self.probe_length(*hash, index);
                if bins.len() <= length {
                    bins.resize(length + 1, 0);
                }
                bins[length] += 1;
            }
        }
        ProbeHistogram { bins }
    }

    #[cfg(any(test, feature = "stats"))]
    fn probe_length(&self, hash: u64, index: usize) -> usize {
        let mut seq = ProbeSeq::new(hash, self.mask());
        let mut steps = 0;
        while seq.index != index {
            seq.advance();
            steps += 1;
        }
        steps
    }

    /// Returns detailed utilization statistics for debugging.
    #[cfg(any(test, feature = "stats"))]
    pub fn debug_stats(&self) -> DebugStats {
        let capacity = self.slots.len();
        DebugStats {
            populated: self.populated,
            tombstones: self.used - self.populated,
            capacity,
            max_used: max_used(capacity),
            load_factor: self.populated as f64 / capacity as f64,
            fill_factor: self.used as f64 / capacity as f64,
            max_probe_length: self.probe_histogram().bins.len().saturating_sub(1),
            total_bytes: self.allocation_size(),
        }
    }
}

/// A view into a single entry in the table, which may be vacant or occupied.
///
/// Constructed by [`HashTable::entry`].
pub enum Entry<'a, V> {
    /// The value is not present in the table
    Vacant(VacantEntry<'a, V>),
    /// An equal value is present in the table
    Occupied(OccupiedEntry<'a, V>),
}

impl<'a, V> Entry<'a, V> {
    /// Inserts `default` if the entry is vacant, and returns a reference to
    /// the value now stored.
    ///
    /// `default` is dropped if an equal value was already present.
    pub fn or_insert(self, default: V) -> Result<&'a V, AllocError> {
        match self {
            Entry::Occupied(entry) => Ok(entry.into_ref()),
            Entry::Vacant(entry) => entry.insert(default),
        }
    }
}

/// A vacant entry: the probed value is absent.
pub struct VacantEntry<'a, V> {
    table: &'a mut HashTable<V>,
    hash: u64,
    slot: SlotRef,
}

impl<'a, V> VacantEntry<'a, V> {
    /// The slot the value will be written to, unless the insert grows the
    /// table first.
    pub fn slot(&self) -> SlotRef {
        self.slot
    }

    /// Stores `value` and returns a reference to it.
    ///
    /// A tombstone found while probing is reused. If the value would instead
    /// take an empty slot and push the table past its load threshold, the
    /// table is rehashed into a larger allocation first. If that allocation
    /// fails, `value` is dropped and the table is left as it was.
    pub fn insert(self, value: V) -> Result<&'a V, AllocError> {
        let VacantEntry { table, hash, slot } = self;

        let index = if slot.kind == SlotKind::Empty && table.used + 1 > max_used(table.capacity()) {
            table.grow(table.populated + 1)?;
            table.find_empty(hash)
        } else {
            slot.index
        };

        if matches!(table.slots[index], Slot::Empty) {
            table.used += 1;
        }
        table.slots[index] = Slot::Occupied { hash, value };
        table.populated += 1;
        debug_assert!(table.used <= max_used(table.capacity()));

        Ok(table.occupied(index))
    }
}

/// An occupied entry: an equal value is stored in the table.
pub struct OccupiedEntry<'a, V> {
    table: &'a mut HashTable<V>,
    index: usize,
}

impl<'a, V> OccupiedEntry<'a, V> {
    /// Returns a reference to the stored value.
    pub fn get(&self) -> &V {
        self.table.occupied(self.index)
    }

    /// Converts the entry into a reference to the stored value with the
    /// lifetime of the table borrow.
    pub fn into_ref(self) -> &'a V {
        self.table.occupied(self.index)
    }

    /// Index of the slot holding the value.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Removes the stored value from the table, leaving a tombstone.
    pub fn remove(self) -> V {
        self.table.remove_at(self.index)
    }
}

/// An iterator over the values in a [`HashTable`], in ascending slot order.
pub struct Iter<'a, V> {
    slots: core::slice::Iter<'a, Slot<V>>,
    remaining: usize,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        for slot in self.slots.by_ref() {
            if let Slot::Occupied { value, .. } = slot {
                self.remaining -= 1;
                return Some(value);
            }
        }

        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<V> ExactSizeIterator for Iter<'_, V> {}

#[cfg(test)]
mod tests {
    use alloc::string::String;
    use alloc::string::ToString;
    use alloc::vec;
    use core::convert::Infallible;
    use core::hash::Hasher;

    use rand::TryRngCore;
    use rand::rngs::OsRng;
    use siphasher::sip::SipHasher;

    use super::*;

    struct HashState {
        k0: u64,
        k1: u64,
    }

    impl HashState {
        fn default() -> Self {
            let mut rng = OsRng;
            Self {
                k0: rng.try_next_u64().unwrap(),
                k1: rng.try_next_u64().unwrap(),
            }
        }

        fn build_hasher(&self) -> SipHasher {
            SipHasher::new_with_keys(self.k0, self.k1)
        }
    }

    fn hash_key(state: &HashState, key: u64) -> u64 {
        let mut h = state.build_hasher();
        h.write_u64(key);
        h.finish()
    }

    fn is(key: u64) -> impl Fn(&u64) -> Result<bool, Infallible> {
        move |v| Ok(*v == key)
    }

    fn insert(table: &mut HashTable<u64>, hash: u64, key: u64) {
        match table.entry(hash, is(key)).unwrap() {
            Entry::Vacant(v) => {
                v.insert(key).unwrap();
            }
            Entry::Occupied(_) => panic!("{key} already present: {table:#?}"),
        }
    }

    #[test]
    fn new_table_has_minimum_capacity() {
        let table: HashTable<u64> = HashTable::new();
        assert_eq!(table.capacity(), MIN_CAPACITY);
        assert_eq!(table.len(), 0);
        assert_eq!(table.used(), 0);
        assert!(table.is_empty());
    }

    #[test]
    fn with_capacity_rounds_to_power_of_two() {
        for requested in [0, 1, 4, 5, 17, 100, 1000] {
            let table: HashTable<u64> = HashTable::with_capacity(requested);
            assert!(table.capacity().is_power_of_two());
            assert!(table.capacity() >= MIN_CAPACITY);
            assert!(max_used(table.capacity()) >= requested);
        }
    }

    #[test]
    fn insert_and_find() {
        let state = HashState::default();
        let mut table = HashTable::new();
        for k in 0..32u64 {
            let hash = hash_key(&state, k);
            insert(&mut table, hash, k);
            assert_eq!(table.find(hash, is(k)).unwrap(), Some(&k), "{table:#?}");
        }
        assert_eq!(table.len(), 32);
        for k in 32..64u64 {
            assert_eq!(table.find(hash_key(&state, k), is(k)).unwrap(), None);
        }
    }

    #[test]
    fn duplicate_entry_is_occupied() {
        let state = HashState::default();
        let mut table = HashTable::new();
        let hash = hash_key(&state, 5);
        insert(&mut table, hash, 5);

        match table.entry(hash, is(5)).unwrap() {
            Entry::Occupied(entry) => assert_eq!(*entry.get(), 5),
            Entry::Vacant(_) => panic!("expected occupied entry"),
        }
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn or_insert_keeps_first_value() {
        let mut table: HashTable<(u64, &str)> = HashTable::new();
        let first = *table
            .entry(9, |v: &(u64, &str)| Ok::<_, Infallible>(v.0 == 9))
            .unwrap()
            .or_insert((9, "first"))
            .unwrap();
        let second = *table
            .entry(9, |v: &(u64, &str)| Ok::<_, Infallible>(v.0 == 9))
            .unwrap()
            .or_insert((9, "second"))
            .unwrap();

        assert_eq!(first, (9, "first"));
        assert_eq!(second, (9, "first"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn growth_keeps_load_under_threshold() {
        let state = HashState::default();
        let mut table = HashTable::new();
        let mut capacities = vec![table.capacity()];
        for k in 0..1000u64 {
            insert(&mut table, hash_key(&state, k), k);
            assert!(table.used() <= max_used(table.capacity()));
            if *capacities.last().unwrap() != table.capacity() {
                capacities.push(table.capacity());
            }
        }

        assert!(capacities.len() >= 3, "{capacities:?}");
        for pair in capacities.windows(2) {
            assert_eq!(pair[1], pair[0] * 2);
        }
        for k in 0..1000u64 {
            assert_eq!(table.find(hash_key(&state, k), is(k)).unwrap(), Some(&k));
        }
    }

    #[test]
    fn growth_bumps_version_plain_insert_does_not() {
        let mut table = HashTable::new();
        insert(&mut table, 1, 1);
        let version = table.version();
        insert(&mut table, 2, 2);
        assert_eq!(table.version(), version);

        let capacity = table.capacity();
        let mut k = 3;
        while table.capacity() == capacity {
            insert(&mut table, k, k);
            k += 1;
        }
        assert_ne!(table.version(), version);
    }

    #[test]
    fn remove_leaves_tombstone() {
        let state = HashState::default();
        let mut table = HashTable::new();
        for k in 0..4u64 {
            insert(&mut table, hash_key(&state, k), k);
        }
        let version = table.version();

        let hash = hash_key(&state, 2);
        assert_eq!(table.remove(hash, is(2)).unwrap(), Some(2));
        assert_eq!(table.len(), 3);
        assert_eq!(table.used(), 4);
        assert_ne!(table.version(), version);
        assert_eq!(table.find(hash, is(2)).unwrap(), None);

        let version = table.version();
        assert_eq!(table.remove(hash, is(2)).unwrap(), None);
        assert_eq!(table.version(), version);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn probe_reuses_first_tombstone() {
        let mut table = HashTable::new();
        // Identical hashes share one probe chain.
        for k in 0..4u64 {
            insert(&mut table, 0, k);
        }
        let first = table.probe(0, is(0)).unwrap();
        let second = table.probe(0, is(1)).unwrap();
        assert_eq!(first.kind(), SlotKind::Occupied);
        table.remove(0, is(0)).unwrap();
        table.remove(0, is(1)).unwrap();

        let slot = table.probe(0, is(99)).unwrap();
        assert_eq!(slot.kind(), SlotKind::Tombstone);
        assert_eq!(slot.index(), first.index());
        assert_ne!(slot.index(), second.index());

        let used = table.used();
        insert(&mut table, 0, 99);
        assert_eq!(table.used(), used);
        assert_eq!(table.probe(0, is(99)).unwrap().index(), first.index());

        // Entries behind the tombstones stay reachable.
        for k in 2..4u64 {
            assert_eq!(table.find(0, is(k)).unwrap(), Some(&k));
        }
    }

    #[test]
    fn probe_on_empty_slot_reports_insertion_point() {
        let table: HashTable<u64> = HashTable::new();
        let slot = table.probe(0x1234, is(1)).unwrap();
        assert_eq!(slot.kind(), SlotKind::Empty);
        assert_eq!(slot.index(), 0x1234 & (MIN_CAPACITY - 1));
        assert!(!slot.is_found());
    }

    #[test]
    fn rehash_drops_tombstones() {
        let state = HashState::default();
        let mut table = HashTable::new();
        let limit = max_used(table.capacity()) as u64;
        for k in 0..limit {
            insert(&mut table, hash_key(&state, k), k);
        }
        for k in 1..limit {
            table.remove(hash_key(&state, k), is(k)).unwrap();
        }
        assert_eq!(table.used(), limit as usize);
        assert_eq!(table.len(), 1);

        // The next fresh slot crosses the threshold. With one live value the
        // table is rehashed at its current size.
        let capacity = table.capacity();
        let version = table.version();
        insert(&mut table, hash_key(&state, 100), 100);
        assert_eq!(table.capacity(), capacity);
        assert_ne!(table.version(), version);
        assert_eq!(table.used(), 2);
        assert_eq!(table.len(), 2);
        assert_eq!(table.debug_stats().tombstones, 0);
        assert_eq!(table.find(hash_key(&state, 0), is(0)).unwrap(), Some(&0));
        assert_eq!(table.find(hash_key(&state, 100), is(100)).unwrap(), Some(&100));
    }

    #[test]
    fn load_threshold_follows_feature() {
        if cfg!(feature = "load-two-thirds") {
            assert_eq!(max_used(MIN_CAPACITY), 5);
            assert_eq!(max_used(1 << 10), 682);
        } else {
            assert_eq!(max_used(MIN_CAPACITY), 4);
            assert_eq!(max_used(1 << 10), 614);
        }
        assert_eq!(capacity_for(max_used(64)).unwrap(), 64);
        assert_eq!(capacity_for(max_used(64) + 1).unwrap(), 128);
    }

    #[test]
    fn churn_does_not_grow_past_live_count() {
        let state = HashState::default();
        let mut table = HashTable::new();
        insert(&mut table, hash_key(&state, 0), 0);
        insert(&mut table, hash_key(&state, 1), 1);

        for k in 2..200_000u64 {
            let hash = hash_key(&state, k);
            insert(&mut table, hash, k);
            assert_eq!(table.remove(hash, is(k)).unwrap(), Some(k));
            assert!(table.used() <= max_used(table.capacity()));
        }

        assert_eq!(table.len(), 2);
        assert!(table.capacity() <= 2 * MIN_CAPACITY, "{}", table.capacity());
    }

    #[test]
    fn reserve_counts_tombstones() {
        let state = HashState::default();
        let mut table = HashTable::new();
        let limit = max_used(table.capacity()) as u64;
        for k in 0..limit {
            insert(&mut table, hash_key(&state, k), k);
        }
        for k in 1..limit {
            table.remove(hash_key(&state, k), is(k)).unwrap();
        }

        let additional = limit as usize - 1;
        table.reserve(additional).unwrap();
        assert!(table.used() + additional <= max_used(table.capacity()));
        assert_eq!(table.capacity(), MIN_CAPACITY);

        let capacity = table.capacity();
        let version = table.version();
        for k in 100..100 + additional as u64 {
            insert(&mut table, hash_key(&state, k), k);
        }
        assert_eq!(table.capacity(), capacity);
        assert_eq!(table.version(), version);
    }

    #[test]
    fn failing_predicate_aborts_without_change() {
        let mut table = HashTable::new();
        insert(&mut table, 7, 1);
        let version = table.version();

        let result = table.entry(7, |_: &u64| Err::<bool, _>("boom"));
        assert!(matches!(result, Err("boom")));
        let result = table.remove(7, |_: &u64| Err::<bool, _>("boom"));
        assert_eq!(result, Err("boom"));
        assert_eq!(table.len(), 1);
        assert_eq!(table.version(), version);
    }

    #[test]
    fn predicate_only_sees_matching_hashes() {
        let mut table = HashTable::new();
        insert(&mut table, 1, 1);
        insert(&mut table, 2, 2);

        let mut calls = 0;
        let found = table
            .find(3, |_: &u64| {
                calls += 1;
                Ok::<_, Infallible>(true)
            })
            .unwrap();
        assert_eq!(found, None);
        assert_eq!(calls, 0);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn insert_many() {
        let state = HashState::default();
        let mut table = HashTable::new();
        for k in 0..100000u64 {
            insert(&mut table, hash_key(&state, k), k);
        }

        assert_eq!(table.len(), 100000);
        for k in 0..100000u64 {
            assert_eq!(table.find(hash_key(&state, k), is(k)).unwrap(), Some(&k));
        }
        assert_eq!(table.probe_histogram().total(), 100000);
    }

    #[test]
    fn explicit_collision() {
        let mut table = HashTable::new();
        for k in 0..65u64 {
            insert(&mut table, 0, k);
        }

        assert_eq!(table.len(), 65);
        for k in 0..65u64 {
            assert_eq!(table.find(0, is(k)).unwrap(), Some(&k), "{table:#?}");
        }
    }

    #[test]
    fn iter_visits_each_value_once() {
        let state = HashState::default();
        let mut table = HashTable::new();
        for k in 10..20u64 {
            insert(&mut table, hash_key(&state, k), k);
        }
        table.remove(hash_key(&state, 15), is(15)).unwrap();

        let iter = table.iter();
        assert_eq!(iter.len(), 9);
        let mut collected: Vec<u64> = iter.copied().collect();
        collected.sort();
        assert_eq!(collected, [10, 11, 12, 13, 14, 16, 17, 18, 19]);
    }

    #[test]
    fn next_occupied_walks_in_slot_order() {
        let state = HashState::default();
        let mut table = HashTable::new();
        for k in 0..5u64 {
            insert(&mut table, hash_key(&state, k), k);
        }

        let mut position = 0;
        let mut indexes = Vec::new();
        while let Some((index, _)) = table.next_occupied(position) {
            indexes.push(index);
            position = index + 1;
        }
        assert_eq!(indexes.len(), 5);
        assert!(indexes.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(table.next_occupied(table.capacity()), None);
    }

    #[test]
    fn occupied_entry_remove() {
        let mut table: HashTable<String> = HashTable::new();
        let eq = |s: &String| Ok::<_, Infallible>(s == "gone");
        table
            .entry(11, eq)
            .unwrap()
            .or_insert("gone".to_string())
            .unwrap();

        match table.entry(11, eq).unwrap() {
            Entry::Occupied(entry) => assert_eq!(entry.remove(), "gone"),
            Entry::Vacant(_) => panic!("expected occupied entry"),
        }
        assert!(table.is_empty());
        assert_eq!(table.used(), 1);
    }

    #[test]
    fn reserve_rehashes_once() {
        let mut table: HashTable<u64> = HashTable::new();
        table.reserve(500).unwrap();
        let capacity = table.capacity();
        assert!(max_used(capacity) >= 500);

        for k in 0..500u64 {
            insert(&mut table, k.wrapping_mul(0x9e37_79b9_7f4a_7c15), k);
        }
        assert_eq!(table.capacity(), capacity);
    }

    #[test]
    fn reserve_overflow_is_reported() {
        let mut table: HashTable<u64> = HashTable::new();
        insert(&mut table, 1, 1);
        assert!(matches!(
            table.reserve(usize::MAX),
            Err(AllocError::CapacityOverflow { .. })
        ));
        assert_eq!(table.len(), 1);
        assert_eq!(table.capacity(), MIN_CAPACITY);
    }

    #[test]
    fn clear_resets_slots() {
        let mut table = HashTable::new();
        for k in 0..20u64 {
            insert(&mut table, k, k);
        }
        let capacity = table.capacity();
        let version = table.version();
        table.clear();

        assert!(table.is_empty());
        assert_eq!(table.used(), 0);
        assert_eq!(table.capacity(), capacity);
        assert_ne!(table.version(), version);
        assert_eq!(table.iter().count(), 0);
    }

    #[test]
    fn clone_is_independent() {
        let mut table = HashTable::new();
        for k in 0..10u64 {
            insert(&mut table, k, k);
        }
        let snapshot = table.clone();
        table.remove(3, is(3)).unwrap();

        assert_eq!(snapshot.len(), 10);
        assert_eq!(snapshot.find(3, is(3)).unwrap(), Some(&3));
        assert_eq!(table.find(3, is(3)).unwrap(), None);
    }

    #[test]
    fn probe_sequence_covers_table() {
        let mask = 63;
        let mut seen = vec![false; mask + 1];
        let mut seq = ProbeSeq::new(0xdead_beef_cafe_f00d, mask);
        // Enough steps to exhaust the perturbation and cycle once.
        for _ in 0..(64 / PERTURB_SHIFT as usize + 1 + 2 * (mask + 1)) {
            seen[seq.index] = true;
            seq.advance();
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn histogram_output() {
        let state = HashState::default();
        let mut table = HashTable::new();
        for k in 0..1000u64 {
            insert(&mut table, hash_key(&state, k), k);
        }
        let histogram = table.probe_histogram();
        assert_eq!(histogram.total(), 1000);
        assert!(histogram.bins[0] > 0);

        let stats = table.debug_stats();
        assert_eq!(stats.populated, 1000);
        assert_eq!(stats.max_probe_length + 1, histogram.bins.len());
        assert!(stats.fill_factor <= LOAD_NUMERATOR as f64 / LOAD_DENOMINATOR as f64);

        #[cfg(feature = "std")]
        {
            histogram.print();
            stats.print();
        }
    }

    #[test]
    fn debug_renders_popmap() {
        let mut table: HashTable<String> = HashTable::new();
        table
            .entry(0xab00_0000_0000_0000, |_: &String| Ok::<_, Infallible>(false))
            .unwrap()
            .or_insert("x".to_string())
            .unwrap();
        let rendered = alloc::format!("{table:?}");
        assert!(rendered.contains("ab"), "{rendered}");
        assert!(rendered.contains(".."), "{rendered}");
    }
}
