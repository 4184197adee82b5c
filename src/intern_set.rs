use core::fmt::Debug;

use crate::capability::HashEq;
use crate::capability::Handle;
use crate::capability::KeyCapability;
use crate::error::InternError;
use crate::hash_table::Entry;
use crate::hash_table::HashTable;
use crate::hash_table::SlotRef;

/// An interning set: stores one canonical handle per distinct value.
///
/// `InterningSet<H, C>` stores handles `H` (such as `Rc<T>` or `Arc<T>`) to
/// values of type `H::Target`, hashed and compared through the
/// [`KeyCapability`] `C`. Adding a value equal to one already stored hands
/// back the stored handle, so callers can drop their own copy and keep the
/// shared instance.
///
/// # Examples
///
/// ```rust
/// # #[cfg(any(feature = "std", feature = "foldhash"))]
/// # {
/// use std::rc::Rc;
///
/// use intern_set::InterningSet;
///
/// let mut set: InterningSet<Rc<str>> = InterningSet::new();
/// let a = set.add(Rc::from("a")).unwrap();
/// set.add(Rc::from("b")).unwrap();
/// let again = set.add(Rc::from("a")).unwrap();
///
/// assert_eq!(set.len(), 2);
/// assert!(Rc::ptr_eq(&a, &again));
///
/// assert!(set.discard("b").unwrap());
/// assert_eq!(set.len(), 1);
/// assert!(!set.contains("b").unwrap());
/// assert!(Rc::ptr_eq(set.get("a").unwrap().unwrap(), &a));
/// # }
/// ```
#[derive(Clone)]
pub struct InterningSet<H, C = HashEq> {
    table: HashTable<H>,
    capability: C,
}

/// A detached iteration position over an [`InterningSet`].
///
/// Created by [`InterningSet::cursor`] and advanced by
/// [`InterningSet::advance`]. A cursor does not borrow the set, so the set may
/// be modified while a cursor exists; advancing it afterwards fails with
/// [`InternError::ConcurrentModification`] if the modification was
/// structural. A failed cursor cannot be resumed, only replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    position: usize,
    version: u64,
}

impl Cursor {
    /// The slot index the next call to [`InterningSet::advance`] starts
    /// scanning from.
    pub fn position(&self) -> usize {
        self.position
    }
}

impl<H, C> Debug for InterningSet<H, C>
where
    H: Handle + Debug,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.table.iter()).finish()
    }
}

/// Equality used while probing: the same instance is always equal to itself,
/// without asking the capability.
#[inline]
fn same_or_equal<T, C>(capability: &C, stored: &T, probe: &T) -> Result<bool, C::Error>
where
    T: ?Sized,
    C: KeyCapability<T>,
{
    if core::ptr::eq(stored, probe) {
        return Ok(true);
    }
    capability.equal(stored, probe)
}

impl<H, C> InterningSet<H, C>
where
    H: Handle,
    C: KeyCapability<H::Target>,
{
    /// Creates an empty set using `capability` to hash and compare values.
    pub fn with_capability(capability: C) -> Self {
        Self::with_capacity_and_capability(0, capability)
    }

    /// Creates an empty set that holds at least `capacity` values before
    /// growing.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::hash::RandomState;
    /// use std::rc::Rc;
    ///
    /// use intern_set::InterningSet;
    /// use intern_set::capability::HashEq;
    ///
    /// let set: InterningSet<Rc<str>, _> =
    ///     InterningSet::with_capacity_and_capability(100, HashEq::new(RandomState::new()));
    /// assert!(set.capacity() >= 100);
    /// assert!(set.is_empty());
    /// ```
    pub fn with_capacity_and_capability(capacity: usize, capability: C) -> Self {
        Self {
            table: HashTable::with_capacity(capacity),
            capability,
        }
    }

    /// Returns the capability used to hash and compare values.
    pub fn capability(&self) -> &C {
        &self.capability
    }

    /// Returns the number of values in the set.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if the set holds no values.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Returns the number of slots in the underlying table.
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Returns the number of slots that hold a value or a tombstone.
    pub fn used(&self) -> usize {
        self.table.used()
    }

    /// Returns the structural version, which changes whenever existing
    /// values may have moved or disappeared.
    pub fn version(&self) -> u64 {
        self.table.version()
    }

    /// Approximate memory used by the set itself, excluding the values its
    /// handles point to.
    pub fn memory_usage(&self) -> usize {
        core::mem::size_of::<Self>() + self.table.allocation_size()
    }

    #[inline]
    fn hash(&self, key: &H::Target) -> Result<u64, InternError<C::Error>> {
        self.capability.hash(key).map_err(InternError::Capability)
    }

    /// Probes for `key` and reports the slot it occupies or would be
    /// inserted into.
    ///
    /// This is the primitive behind [`add`](Self::add),
    /// [`get`](Self::get) and [`discard`](Self::discard).
    pub fn lookup_slot(&self, key: &H::Target) -> Result<SlotRef, InternError<C::Error>> {
        let hash = self.hash(key)?;
        let capability = &self.capability;
        self.table
            .probe(hash, |stored: &H| same_or_equal(capability, &**stored, key))
            .map_err(InternError::Capability)
    }

    /// Adds a value, returning the canonical handle for it.
    ///
    /// If an equal value is already stored, its handle is returned and `key`
    /// is dropped. Otherwise `key` becomes the canonical handle, and a clone
    /// of it is returned.
    ///
    /// # Errors
    ///
    /// [`InternError::Capability`] if hashing or comparing fails, and
    /// [`InternError::AllocationFailure`] if the table needs to grow and the
    /// allocation fails. In both cases the set is unchanged.
    pub fn add(&mut self, key: H) -> Result<H, InternError<C::Error>> {
        let hash = self.hash(&key)?;
        let capability = &self.capability;
        let entry = self
            .table
            .entry(hash, |stored: &H| same_or_equal(capability, &**stored, &*key))
            .map_err(InternError::Capability)?;

        match entry {
            Entry::Occupied(entry) => Ok(entry.into_ref().clone()),
            Entry::Vacant(entry) => Ok(entry.insert(key)?.clone()),
        }
    }

    /// Returns `true` if a value equal to `key` is stored.
    pub fn contains(&self, key: &H::Target) -> Result<bool, InternError<C::Error>> {
        Ok(self.lookup_slot(key)?.is_found())
    }

    /// Returns the canonical handle for `key`, if a value equal to it is
    /// stored.
    pub fn get(&self, key: &H::Target) -> Result<Option<&H>, InternError<C::Error>> {
        let hash = self.hash(key)?;
        let capability = &self.capability;
        self.table
            .find(hash, |stored: &H| same_or_equal(capability, &**stored, key))
            .map_err(InternError::Capability)
    }

    /// Removes the value equal to `key`, dropping the set's handle to it.
    ///
    /// Returns whether a value was removed. The slot is left as a tombstone
    /// and the table never shrinks.
    pub fn discard(&mut self, key: &H::Target) -> Result<bool, InternError<C::Error>> {
        let hash = self.hash(key)?;
        let capability = &self.capability;
        let removed = self
            .table
            .remove(hash, |stored: &H| same_or_equal(capability, &**stored, key))
            .map_err(InternError::Capability)?;
        Ok(removed.is_some())
    }

    /// Makes room for at least `additional` more values, so that adding them
    /// neither grows nor rehashes the table.
    ///
    /// Slots left behind by discarded values count against the room; if there
    /// are too many of them the table is rehashed, possibly at its current
    /// size.
    pub fn reserve(&mut self, additional: usize) -> Result<(), InternError<C::Error>> {
        self.table.reserve(additional)?;
        Ok(())
    }

    /// Removes every value, dropping the set's handles and keeping its
    /// capacity.
    pub fn clear(&mut self) {
        self.table.clear();
    }

    /// Returns an iterator over the canonical handles.
    ///
    /// The set cannot be modified while the iterator is alive. Use
    /// [`cursor`](Self::cursor) to iterate across modifications.
    pub fn iter(&self) -> Iter<'_, H> {
        Iter {
            inner: self.table.iter(),
        }
    }

    /// Starts a detached iteration from the first slot.
    pub fn cursor(&self) -> Cursor {
        Cursor {
            position: 0,
            version: self.table.version(),
        }
    }

    /// Advances `cursor` and returns the next canonical handle, or `None`
    /// once every slot has been visited.
    ///
    /// # Errors
    ///
    /// [`InternError::ConcurrentModification`] if the set was structurally
    /// modified since the cursor was created: a value was discarded, the
    /// table was rehashed by an add or by [`reserve`](Self::reserve), or the
    /// set was cleared.
    /// Lookups and inserts that do not grow the table do not invalidate a
    /// cursor.
    pub fn advance(&self, cursor: &mut Cursor) -> Result<Option<&H>, InternError<C::Error>> {
        if cursor.version != self.table.version() {
            return Err(InternError::ConcurrentModification);
        }

        match self.table.next_occupied(cursor.position) {
            Some((index, handle)) => {
                cursor.position = index + 1;
                Ok(Some(handle))
            }
            None => {
                cursor.position = self.table.capacity();
                Ok(None)
            }
        }
    }

    /// Computes a histogram of probe lengths for the stored values.
    #[cfg(any(test, feature = "stats"))]
    pub fn probe_histogram(&self) -> crate::hash_table::ProbeHistogram {
        self.table.probe_histogram()
    }

    /// Returns detailed utilization statistics for debugging.
    #[cfg(any(test, feature = "stats"))]
    pub fn debug_stats(&self) -> crate::hash_table::DebugStats {
        self.table.debug_stats()
    }
}

impl<H, C> InterningSet<H, C>
where
    H: Handle,
    C: KeyCapability<H::Target> + Default,
{
    /// Creates an empty set with the default capability.
    pub fn new() -> Self {
        Self::with_capability(C::default())
    }

    /// Creates an empty set with the default capability that holds at least
    /// `capacity` values before growing.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_capability(capacity, C::default())
    }
}

impl<H, C> Default for InterningSet<H, C>
where
    H: Handle,
    C: KeyCapability<H::Target> + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

/// An iterator over the canonical handles of an [`InterningSet`].
pub struct Iter<'a, H> {
    inner: crate::hash_table::Iter<'a, H>,
}

impl<'a, H> Iterator for Iter<'a, H> {
    type Item = &'a H;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<H> ExactSizeIterator for Iter<'_, H> {}

impl<'a, H, C> IntoIterator for &'a InterningSet<H, C>
where
    H: Handle,
    C: KeyCapability<H::Target>,
{
    type IntoIter = Iter<'a, H>;
    type Item = &'a H;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
