use alloc::string::String;

/// The slot array of a table could not be allocated.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The requested number of slots does not fit in `usize`, or is not
    /// representable as a power of two.
    #[error("capacity overflow while sizing a table of {requested} slots")]
    CapacityOverflow {
        /// Number of slots that was requested.
        requested: usize,
    },

    /// The global allocator refused the request.
    #[error("allocator failed to provide {slots} slots")]
    AllocatorFailed {
        /// Number of slots that was requested.
        slots: usize,
    },
}

/// Errors produced by [`InterningSet`](crate::InterningSet) operations.
///
/// `E` is the error type of the set's
/// [`KeyCapability`](crate::capability::KeyCapability). For the default
/// [`HashEq`](crate::capability::HashEq) capability it is
/// [`Infallible`](core::convert::Infallible).
///
/// A missing value is never an error: `get` returns `None` and `discard`
/// returns `false`.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum InternError<E> {
    /// Growing the table failed. The table is left at its previous size with
    /// its previous contents.
    #[error(transparent)]
    AllocationFailure(#[from] AllocError),

    /// The caller-supplied hash or equality function failed. The operation was
    /// aborted before the table was modified.
    #[error("hash or equality capability failed")]
    Capability(#[source] E),

    /// A cursor was advanced after the set was structurally modified.
    #[error("set changed during iteration; restart from a new cursor")]
    ConcurrentModification,
}

impl<E> InternError<E> {
    /// Returns the capability error, if this is one.
    pub fn into_capability_error(self) -> Option<E> {
        match self {
            InternError::Capability(error) => Some(error),
            _ => None,
        }
    }
}

/// Load-time failures of the interface handshake.
///
/// These are reported by [`InternSetApi::import`](crate::interface::InternSetApi::import)
/// before any operation is called through the imported table.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum InterfaceError {
    /// The exporter was built against a different interface revision.
    #[error("{module} exports interface version {found}, expected {expected}")]
    VersionMismatch {
        module: &'static str,
        expected: u32,
        found: u32,
    },

    /// A function the consumer requires is not in the export table.
    #[error("{module} does not export expected function {name}")]
    MissingFunction { module: &'static str, name: String },

    /// A function is exported under the expected name with another signature.
    #[error("function {module}.{name} has wrong signature (expected {expected}, got {found})")]
    SignatureMismatch {
        module: &'static str,
        name: String,
        expected: String,
        found: &'static str,
    },

    /// The exported set type has a size the consumer cannot accept.
    #[error(
        "{module}.{type_name} size changed, may indicate binary incompatibility. Expected {expected} bytes, got {found}"
    )]
    LayoutMismatch {
        module: &'static str,
        type_name: &'static str,
        expected: usize,
        found: usize,
    },

    /// The exported set type has a different alignment.
    #[error("{module}.{type_name} alignment changed (expected {expected}, got {found})")]
    AlignmentMismatch {
        module: &'static str,
        type_name: &'static str,
        expected: usize,
        found: usize,
    },
}
