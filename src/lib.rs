#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

/// Hash and equality capabilities, and the handle types the set stores.
pub mod capability;

/// Error types for set operations, allocation and the interface handshake.
pub mod error;

pub mod hash_table;

pub mod interface;

/// The interning set.
///
/// This module provides an `InterningSet` that wraps the `HashTable` and
/// keeps one shared handle per distinct value.
pub mod intern_set;

pub use capability::DefaultHashBuilder;
pub use capability::Handle;
pub use capability::HashEq;
pub use capability::KeyCapability;
pub use error::AllocError;
pub use error::InterfaceError;
pub use error::InternError;
pub use hash_table::HashTable;
pub use hash_table::SlotKind;
pub use hash_table::SlotRef;
pub use intern_set::Cursor;
pub use intern_set::InterningSet;
pub use interface::InternSetApi;
