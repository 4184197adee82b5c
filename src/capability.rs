use alloc::rc::Rc;
use alloc::sync::Arc;
use core::convert::Infallible;
use core::fmt::Debug;
use core::hash::BuildHasher;
use core::hash::Hash;
use core::marker::PhantomData;
use core::ops::Deref;

cfg_if::cfg_if! {
    if #[cfg(feature = "foldhash")] {
        /// The hasher builder used by [`HashEq`] when none is specified.
        pub type DefaultHashBuilder = foldhash::fast::RandomState;
    } else if #[cfg(feature = "std")] {
        /// The hasher builder used by [`HashEq`] when none is specified.
        pub type DefaultHashBuilder = std::hash::RandomState;
    } else {
        /// The hasher builder used by [`HashEq`] when none is specified.
        ///
        /// Without `std` or `foldhash` there is no randomly seeded hasher
        /// available, so this falls back to an unkeyed SipHash.
        #[allow(deprecated)]
        pub type DefaultHashBuilder = core::hash::BuildHasherDefault<core::hash::SipHasher>;
    }
}

/// A shared-ownership pointer to an interned value.
///
/// Cloning a handle must be cheap and must not copy the value it points to:
/// the set stores one handle per canonical value and gives clones of it back
/// to callers.
pub trait Handle: Clone + Deref {}

impl<T: ?Sized> Handle for Rc<T> {}

impl<T: ?Sized> Handle for Arc<T> {}

impl<T: ?Sized> Handle for &T {}

/// The hash and equality functions an [`InterningSet`](crate::InterningSet)
/// uses for its values.
///
/// Both functions may fail. A failure aborts the operation that triggered it
/// and is handed back to the caller unchanged, wrapped in
/// [`InternError::Capability`](crate::InternError::Capability).
///
/// Implementations must be consistent: values that compare equal must hash
/// to the same code, and neither result may change while a value is stored.
pub trait KeyCapability<T: ?Sized> {
    /// Error raised by [`hash`](Self::hash) or [`equal`](Self::equal).
    type Error;

    /// Computes the hash code of `value`.
    fn hash(&self, value: &T) -> Result<u64, Self::Error>;

    /// Returns whether the stored value and the probe value are equal.
    fn equal(&self, stored: &T, probe: &T) -> Result<bool, Self::Error>;
}

/// A [`KeyCapability`] backed by the value type's own `Hash` and `Eq`.
///
/// This capability never fails.
#[derive(Clone, Debug, Default)]
pub struct HashEq<S = DefaultHashBuilder> {
    hash_builder: S,
}

impl<S> HashEq<S> {
    /// Creates a capability hashing with `hash_builder`.
    pub fn new(hash_builder: S) -> Self {
        Self { hash_builder }
    }

    /// Returns the hasher builder.
    pub fn hasher(&self) -> &S {
        &self.hash_builder
    }
}

impl<T, S> KeyCapability<T> for HashEq<S>
where
    T: Hash + Eq + ?Sized,
    S: BuildHasher,
{
    type Error = Infallible;

    #[inline]
    fn hash(&self, value: &T) -> Result<u64, Self::Error> {
        Ok(self.hash_builder.hash_one(value))
    }

    #[inline]
    fn equal(&self, stored: &T, probe: &T) -> Result<bool, Self::Error> {
        Ok(stored == probe)
    }
}

/// A [`KeyCapability`] assembled from a pair of functions.
///
/// Useful when the hash or equality of a value is defined outside its type,
/// or can fail.
///
/// # Examples
///
/// ```rust
/// use std::rc::Rc;
///
/// use intern_set::InterningSet;
/// use intern_set::capability::FnCapability;
///
/// // Case-insensitive interning of ASCII names.
/// let capability = FnCapability::new(
///     |s: &str| -> Result<u64, ()> {
///         Ok(s.bytes().fold(0u64, |h, b| {
///             h.wrapping_mul(31).wrapping_add(b.to_ascii_lowercase() as u64)
///         }))
///     },
///     |a: &str, b: &str| Ok(a.eq_ignore_ascii_case(b)),
/// );
/// let mut set: InterningSet<Rc<str>, _> = InterningSet::with_capability(capability);
///
/// let first = set.add(Rc::from("Main")).unwrap();
/// let second = set.add(Rc::from("MAIN")).unwrap();
/// assert!(Rc::ptr_eq(&first, &second));
/// ```
pub struct FnCapability<FH, FE, E> {
    hash: FH,
    equal: FE,
    _error: PhantomData<fn() -> E>,
}

impl<FH, FE, E> FnCapability<FH, FE, E> {
    /// Creates a capability from a hash function and an equality function.
    pub fn new(hash: FH, equal: FE) -> Self {
        Self {
            hash,
            equal,
            _error: PhantomData,
        }
    }
}

impl<FH, FE, E> Debug for FnCapability<FH, FE, E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FnCapability").finish_non_exhaustive()
    }
}

impl<FH, FE, E> Clone for FnCapability<FH, FE, E>
where
    FH: Clone,
    FE: Clone,
{
    fn clone(&self) -> Self {
        Self::new(self.hash.clone(), self.equal.clone())
    }
}

impl<T, FH, FE, E> KeyCapability<T> for FnCapability<FH, FE, E>
where
    T: ?Sized,
    FH: Fn(&T) -> Result<u64, E>,
    FE: Fn(&T, &T) -> Result<bool, E>,
{
    type Error = E;

    #[inline]
    fn hash(&self, value: &T) -> Result<u64, E> {
        (self.hash)(value)
    }

    #[inline]
    fn equal(&self, stored: &T, probe: &T) -> Result<bool, E> {
        (self.equal)(stored, probe)
    }
}
