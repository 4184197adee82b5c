//! A versioned function table for calling into an [`InterningSet`] from code
//! that was built separately.
//!
//! The exporting side builds an [`InternSetApi`] with
//! [`InternSetApi::export`]. The consuming side describes what it was built
//! against in an [`ImportSpec`] and calls [`InternSetApi::import`] once, at
//! load time. The handshake checks the interface version, resolves every
//! required function by name and signature, and compares the layout of the set
//! type. After that, calls go straight through the table's function pointers
//! with no further checks.
//!
//! ```rust
//! # #[cfg(any(feature = "std", feature = "foldhash"))]
//! # {
//! use std::rc::Rc;
//!
//! use intern_set::capability::HashEq;
//! use intern_set::interface::ImportSpec;
//! use intern_set::interface::InternSetApi;
//!
//! type Api = InternSetApi<Rc<str>, HashEq>;
//!
//! let exported = Api::export();
//! let api = Api::import(&exported, &ImportSpec::for_set::<Rc<str>, HashEq>()).unwrap();
//!
//! let mut set = (api.new)();
//! let a = (api.add)(&mut set, Rc::from("a")).unwrap();
//! assert!(Rc::ptr_eq(&a, &(api.add)(&mut set, Rc::from("a")).unwrap()));
//! assert_eq!((api.size)(&set), 1);
//! # }
//! ```

use alloc::string::ToString;
use core::alloc::Layout;

use crate::capability::Handle;
use crate::capability::KeyCapability;
use crate::error::InterfaceError;
use crate::error::InternError;
use crate::hash_table::SlotRef;
use crate::intern_set::Cursor;
use crate::intern_set::InterningSet;

/// Revision of the exported function table. Bumped whenever a function is
/// added, removed or changes signature.
pub const INTERFACE_VERSION: u32 = 1;

/// Name the set module exports its table under.
pub const MODULE_NAME: &str = "intern_set";

/// A named function in the export table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol {
    /// Name the function is resolved by.
    pub name: &'static str,
    /// Textual signature, compared verbatim during the handshake.
    pub signature: &'static str,
}

/// Every function exported by [`InternSetApi`], in table order.
pub const SYMBOLS: &[Symbol] = &[
    Symbol {
        name: "InterningSet_New",
        signature: "fn() -> InterningSet",
    },
    Symbol {
        name: "InterningSet_Add",
        signature: "fn(&mut InterningSet, H) -> Result<H, InternError>",
    },
    Symbol {
        name: "InterningSet_Contains",
        signature: "fn(&InterningSet, &T) -> Result<bool, InternError>",
    },
    Symbol {
        name: "InterningSet_Discard",
        signature: "fn(&mut InterningSet, &T) -> Result<bool, InternError>",
    },
    Symbol {
        name: "InterningSet_Get",
        signature: "fn(&InterningSet, &T) -> Result<Option<&H>, InternError>",
    },
    Symbol {
        name: "InterningSet_Size",
        signature: "fn(&InterningSet) -> usize",
    },
    Symbol {
        name: "InterningSet_Next",
        signature: "fn(&InterningSet, &mut Cursor) -> Result<Option<&H>, InternError>",
    },
    Symbol {
        name: "InterningSet_LookupSlot",
        signature: "fn(&InterningSet, &T) -> Result<SlotRef, InternError>",
    },
];

/// What the exporting side publishes about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportDescriptor {
    /// Name of the exporting module.
    pub module: &'static str,
    /// Interface revision the exporter was built with.
    pub version: u32,
    /// Name of the exported set type.
    pub type_name: &'static str,
    /// Layout of the exported set type.
    pub layout: Layout,
    /// Functions available in the table.
    pub symbols: &'static [Symbol],
}

/// How strictly the handshake compares the size of the set type.
///
/// An exported type smaller than expected is always rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SizeCheck {
    /// Any size difference is an error.
    Error,
    /// A larger exported type is accepted with a logged warning.
    #[default]
    Warn,
    /// A larger exported type is accepted silently.
    Ignore,
}

/// What the consuming side was built against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSpec<'a> {
    /// Required interface revision.
    pub version: u32,
    /// Functions the consumer will call, with the signatures it expects.
    pub symbols: &'a [Symbol],
    /// Layout the consumer expects for the set type.
    pub layout: Layout,
    /// Size comparison policy.
    pub size_check: SizeCheck,
}

impl ImportSpec<'static> {
    /// Requirements of a consumer compiled against this crate for sets of
    /// `InterningSet<H, C>`, requiring every exported function.
    pub fn for_set<H, C>() -> Self
    where
        H: Handle,
        C: KeyCapability<H::Target>,
    {
        Self {
            version: INTERFACE_VERSION,
            symbols: SYMBOLS,
            layout: Layout::new::<InterningSet<H, C>>(),
            size_check: SizeCheck::default(),
        }
    }
}

type SetError<H, C> = InternError<<C as KeyCapability<<H as core::ops::Deref>::Target>>::Error>;

/// The exported function table of [`InterningSet<H, C>`].
///
/// Obtain one with [`export`](Self::export) and validate it with
/// [`import`](Self::import) before calling through it.
pub struct InternSetApi<H, C>
where
    H: Handle,
    C: KeyCapability<H::Target>,
{
    /// What the exporter published about itself.
    pub descriptor: ExportDescriptor,
    /// Create.
    pub new: fn() -> InterningSet<H, C>,
    /// Add.
    pub add: fn(&mut InterningSet<H, C>, H) -> Result<H, SetError<H, C>>,
    /// Contains.
    pub contains: for<'a, 'b> fn(&'a InterningSet<H, C>, &'b H::Target) -> Result<bool, SetError<H, C>>,
    /// Discard.
    pub discard:
        for<'a, 'b> fn(&'a mut InterningSet<H, C>, &'b H::Target) -> Result<bool, SetError<H, C>>,
    /// Get.
    pub get: for<'a, 'b> fn(
        &'a InterningSet<H, C>,
        &'b H::Target,
    ) -> Result<Option<&'a H>, SetError<H, C>>,
    /// Size.
    pub size: fn(&InterningSet<H, C>) -> usize,
    /// Next: one iteration step.
    pub next: for<'a, 'b> fn(
        &'a InterningSet<H, C>,
        &'b mut Cursor,
    ) -> Result<Option<&'a H>, SetError<H, C>>,
    /// LookupSlot.
    pub lookup_slot:
        for<'a, 'b> fn(&'a InterningSet<H, C>, &'b H::Target) -> Result<SlotRef, SetError<H, C>>,
}

impl<H, C> InternSetApi<H, C>
where
    H: Handle,
    C: KeyCapability<H::Target> + Default,
{
    /// Builds the function table for `InterningSet<H, C>`.
    pub fn export() -> Self {
        Self {
            descriptor: ExportDescriptor {
                module: MODULE_NAME,
                version: INTERFACE_VERSION,
                type_name: core::any::type_name::<InterningSet<H, C>>(),
                layout: Layout::new::<InterningSet<H, C>>(),
                symbols: SYMBOLS,
            },
            new: InterningSet::new,
            add: InterningSet::add,
            contains: InterningSet::contains,
            discard: InterningSet::discard,
            get: InterningSet::get,
            size: InterningSet::len,
            next: InterningSet::advance,
            lookup_slot: InterningSet::lookup_slot,
        }
    }
}

impl<H, C> InternSetApi<H, C>
where
    H: Handle,
    C: KeyCapability<H::Target>,
{
    /// Performs the load-time handshake against `spec`.
    ///
    /// Returns the validated table, or the first mismatch found. Nothing in
    /// the table is called during the check.
    pub fn import<'e>(
        exported: &'e Self,
        spec: &ImportSpec<'_>,
    ) -> Result<&'e Self, InterfaceError> {
        let descriptor = &exported.descriptor;
        let module = descriptor.module;

        if descriptor.version != spec.version {
            return Err(InterfaceError::VersionMismatch {
                module,
                expected: spec.version,
                found: descriptor.version,
            });
        }

        for required in spec.symbols {
            let Some(symbol) = descriptor
                .symbols
                .iter()
                .find(|symbol| symbol.name == required.name)
            else {
                return Err(InterfaceError::MissingFunction {
                    module,
                    name: required.name.to_string(),
                });
            };

            if symbol.signature != required.signature {
                return Err(InterfaceError::SignatureMismatch {
                    module,
                    name: required.name.to_string(),
                    expected: required.signature.to_string(),
                    found: symbol.signature,
                });
            }
        }

        check_layout(descriptor, spec)?;

        tracing::debug!(
            module,
            version = descriptor.version,
            type_name = descriptor.type_name,
            functions = spec.symbols.len(),
            "imported intern set interface"
        );
        Ok(exported)
    }
}

fn check_layout(descriptor: &ExportDescriptor, spec: &ImportSpec<'_>) -> Result<(), InterfaceError> {
    let expected = spec.layout.size();
    let found = descriptor.layout.size();
    let mismatch = InterfaceError::LayoutMismatch {
        module: descriptor.module,
        type_name: descriptor.type_name,
        expected,
        found,
    };

    if found < expected {
        return Err(mismatch);
    }
    if found > expected {
        match spec.size_check {
            SizeCheck::Error => return Err(mismatch),
            SizeCheck::Warn => tracing::warn!(
                module = descriptor.module,
                type_name = descriptor.type_name,
                expected,
                found,
                "size changed, may indicate binary incompatibility"
            ),
            SizeCheck::Ignore => {}
        }
    }

    if descriptor.layout.align() != spec.layout.align() {
        return Err(InterfaceError::AlignmentMismatch {
            module: descriptor.module,
            type_name: descriptor.type_name,
            expected: spec.layout.align(),
            found: descriptor.layout.align(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use alloc::rc::Rc;
    use alloc::vec::Vec;
    use core::hash::BuildHasherDefault;

    use siphasher::sip::SipHasher;

    use super::*;
    use crate::capability::HashEq;

    type Capability = HashEq<BuildHasherDefault<SipHasher>>;
    type Api = InternSetApi<Rc<str>, Capability>;

    fn spec() -> ImportSpec<'static> {
        ImportSpec::for_set::<Rc<str>, Capability>()
    }

    #[test]
    fn handshake_accepts_matching_export() {
        let exported = Api::export();
        let api = Api::import(&exported, &spec()).unwrap();

        let mut set = (api.new)();
        let a = (api.add)(&mut set, Rc::from("a")).unwrap();
        (api.add)(&mut set, Rc::from("b")).unwrap();
        let again = (api.add)(&mut set, Rc::from("a")).unwrap();
        assert!(Rc::ptr_eq(&a, &again));
        assert_eq!((api.size)(&set), 2);

        assert!((api.contains)(&set, "b").unwrap());
        assert!((api.lookup_slot)(&set, "b").unwrap().is_found());
        assert!((api.discard)(&mut set, "b").unwrap());
        assert!(!(api.contains)(&set, "b").unwrap());
        assert!(Rc::ptr_eq((api.get)(&set, "a").unwrap().unwrap(), &a));

        let mut cursor = set.cursor();
        let mut seen = Vec::new();
        while let Some(handle) = (api.next)(&set, &mut cursor).unwrap() {
            seen.push(handle.clone());
        }
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn handshake_accepts_subset_of_symbols() {
        let exported = Api::export();
        let required = [SYMBOLS[0], SYMBOLS[1]];
        let spec = ImportSpec {
            symbols: &required,
            ..spec()
        };
        assert!(Api::import(&exported, &spec).is_ok());
    }

    #[test]
    fn handshake_rejects_version() {
        let mut exported = Api::export();
        exported.descriptor.version = INTERFACE_VERSION + 1;

        assert_eq!(
            Api::import(&exported, &spec()).err(),
            Some(InterfaceError::VersionMismatch {
                module: MODULE_NAME,
                expected: INTERFACE_VERSION,
                found: INTERFACE_VERSION + 1,
            })
        );
    }

    #[test]
    fn handshake_rejects_missing_function() {
        let mut exported = Api::export();
        exported.descriptor.symbols = &SYMBOLS[..SYMBOLS.len() - 1];

        let err = Api::import(&exported, &spec()).err().unwrap();
        assert_eq!(
            err,
            InterfaceError::MissingFunction {
                module: MODULE_NAME,
                name: "InterningSet_LookupSlot".to_string(),
            }
        );
    }

    #[test]
    fn handshake_rejects_signature() {
        let exported = Api::export();
        let required = [Symbol {
            name: "InterningSet_Size",
            signature: "fn(&InterningSet) -> u32",
        }];
        let spec = ImportSpec {
            symbols: &required,
            ..spec()
        };

        let err = Api::import(&exported, &spec).err().unwrap();
        assert!(matches!(err, InterfaceError::SignatureMismatch { ref name, .. } if name == "InterningSet_Size"));
        assert!(err.to_string().contains("has wrong signature"));
    }

    #[test]
    fn handshake_size_policy() {
        let exported = Api::export();
        let size = exported.descriptor.layout.size();
        let align = exported.descriptor.layout.align();
        let smaller = Layout::from_size_align(size - align, align).unwrap();
        let larger = Layout::from_size_align(size + align, align).unwrap();

        // Exported type smaller than the consumer expects: always fatal.
        for size_check in [SizeCheck::Error, SizeCheck::Warn, SizeCheck::Ignore] {
            let spec = ImportSpec {
                layout: larger,
                size_check,
                ..spec()
            };
            assert!(matches!(
                Api::import(&exported, &spec),
                Err(InterfaceError::LayoutMismatch { .. })
            ));
        }

        // Exported type larger than expected: depends on the policy.
        let strict = ImportSpec {
            layout: smaller,
            size_check: SizeCheck::Error,
            ..spec()
        };
        assert!(matches!(
            Api::import(&exported, &strict),
            Err(InterfaceError::LayoutMismatch { .. })
        ));
        for size_check in [SizeCheck::Warn, SizeCheck::Ignore] {
            let lenient = ImportSpec {
                layout: smaller,
                size_check,
                ..spec()
            };
            assert!(Api::import(&exported, &lenient).is_ok());
        }
    }

    #[test]
    fn handshake_rejects_alignment() {
        let exported = Api::export();
        let layout = exported.descriptor.layout;
        let spec = ImportSpec {
            layout: Layout::from_size_align(layout.size(), layout.align() * 2).unwrap(),
            size_check: SizeCheck::Ignore,
            ..spec()
        };
        assert!(matches!(
            Api::import(&exported, &spec),
            Err(InterfaceError::AlignmentMismatch { .. })
        ));
    }

    #[test]
    fn symbol_names_are_unique() {
        for (i, a) in SYMBOLS.iter().enumerate() {
            for b in &SYMBOLS[i + 1..] {
                assert_ne!(a.name, b.name);
            }
        }
    }
}
