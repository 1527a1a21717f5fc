//! Base-type providers
//!
//! The native bases of a synthesized type come from an ordered chain of
//! providers. Each receives the bases accumulated so far and returns the new
//! list, so a provider can prepend, append, replace or drop entries. The
//! first entry of the final list is the primary base; its layout is the one
//! instances extend.
//!
//! The default chain maps managed inheritance onto native inheritance and
//! then appends a collection mixin for enumerable types.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::trace;

use crate::class_manager;
use crate::error::{BridgeError, Result};
use crate::extensions::{self, ExtensionKind};
use crate::managed::{core, Type};
use crate::reference::BorrowedReference;
use crate::runtime::ffi::error::PyExc_Exception;
use crate::runtime::ffi::types::{PyBaseObject_Type, PyType_Check};
use crate::runtime::ffi::PyObject;

/// A step of the base-type chain
///
/// Implementations run with the interpreter lock held and may request other
/// bridged types through [`class_manager::get_or_create`].
pub trait BaseTypeProvider: Send + Sync {
    fn name(&self) -> &str;

    fn provide(&self, ty: &Type, bases: Vec<BorrowedReference>) -> Result<Vec<BorrowedReference>>;
}

/// Managed base class to native base type
///
/// `Object` sits on the interpreter's `object` and `Exception` on its
/// `Exception`; interfaces sit on the bridged `Object`; everything else sits
/// on the bridged type of its managed base.
pub struct DefaultBaseTypeProvider;

impl BaseTypeProvider for DefaultBaseTypeProvider {
    fn name(&self) -> &str {
        "default"
    }

    fn provide(&self, ty: &Type, mut bases: Vec<BorrowedReference>) -> Result<Vec<BorrowedReference>> {
        let c = core();
        let primary = if ty == &c.object {
            PyBaseObject_Type() as *mut PyObject
        } else if ty == &c.exception {
            PyExc_Exception()
        } else {
            let managed_base = match ty.base() {
                Some(base) if !ty.is_interface() => base,
                _ => &c.object,
            };
            class_manager::get_or_create(managed_base)? as *mut PyObject
        };
        bases.insert(0, unsafe { BorrowedReference::from_raw(primary) });
        Ok(bases)
    }
}

/// Appends a mixin giving enumerable types an iteration-based `in`
pub struct CollectionMixinProvider;

impl CollectionMixinProvider {
    pub(crate) fn is_collection(ty: &Type) -> bool {
        let c = core();
        ty.is_array()
            || ty.implements(&c.ienumerable)
            || !ty.find_methods("GetEnumerator").is_empty()
    }
}

impl BaseTypeProvider for CollectionMixinProvider {
    fn name(&self) -> &str {
        "collection-mixin"
    }

    fn provide(&self, ty: &Type, mut bases: Vec<BorrowedReference>) -> Result<Vec<BorrowedReference>> {
        if ty.is_interface() || !Self::is_collection(ty) {
            return Ok(bases);
        }
        // Inherited through a bridged base already
        if ty.base().is_some_and(Self::is_collection) {
            return Ok(bases);
        }
        let mixin = unsafe { extensions::type_object(ExtensionKind::CollectionMixin)? };
        bases.push(unsafe { BorrowedReference::from_raw(mixin as *mut PyObject) });
        Ok(bases)
    }
}

fn default_chain() -> Vec<Arc<dyn BaseTypeProvider>> {
    vec![Arc::new(DefaultBaseTypeProvider), Arc::new(CollectionMixinProvider)]
}

static CHAIN: Lazy<RwLock<Vec<Arc<dyn BaseTypeProvider>>>> = Lazy::new(|| RwLock::new(default_chain()));

/// Append a provider; it sees the output of every provider before it
pub fn register(provider: Arc<dyn BaseTypeProvider>) {
    trace!(event = "provider_registered", name = provider.name(), "base type provider added");
    CHAIN.write().push(provider);
}

/// Back to the default chain
pub fn reset() {
    *CHAIN.write() = default_chain();
}

/// Run the chain for `ty` and validate the result
///
/// # Safety
/// The interpreter lock must be held
pub unsafe fn resolve(ty: &Type) -> Result<Vec<BorrowedReference>> {
    // Providers recurse into the class manager; never hold the lock across them
    let chain: Vec<Arc<dyn BaseTypeProvider>> = CHAIN.read().clone();
    let mut bases = Vec::new();
    for provider in &chain {
        bases = provider.provide(ty, bases)?;
    }
    if bases.is_empty() {
        return Err(BridgeError::Configuration(format!(
            "base type providers produced no base for {}",
            ty
        )));
    }
    for (i, base) in bases.iter().enumerate() {
        if base.is_null() || !PyType_Check(base.as_ptr()) {
            return Err(BridgeError::Configuration(format!(
                "base type provider result {} for {} is not a type",
                i, ty
            )));
        }
    }
    trace!(event = "bases_resolved", ty = %ty, count = bases.len(), "native bases chosen");
    Ok(bases)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managed::TypeBuilder;
    use crate::testing::runtime;

    struct DropAll;

    impl BaseTypeProvider for DropAll {
        fn name(&self) -> &str {
            "drop-all"
        }

        fn provide(&self, _ty: &Type, _bases: Vec<BorrowedReference>) -> Result<Vec<BorrowedReference>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_default_chain_roots() {
        runtime(|| unsafe {
            let c = core();
            let object = resolve(&c.object).unwrap();
            assert_eq!(object[0].as_ptr(), PyBaseObject_Type() as *mut PyObject);
            let exception = resolve(&c.exception).unwrap();
            assert_eq!(exception[0].as_ptr(), PyExc_Exception());
        });
    }

    #[test]
    fn test_enumerable_gets_mixin_once() {
        runtime(|| unsafe {
            let c = core();
            let bag = TypeBuilder::class("Demo", "Bag").implements(&c.ienumerable).build();
            let bases = resolve(&bag).unwrap();
            assert_eq!(bases.len(), 2);
            let sub = TypeBuilder::class("Demo", "SubBag").base(&bag).build();
            assert_eq!(resolve(&sub).unwrap().len(), 1);
        });
    }

    #[test]
    fn test_empty_result_is_configuration_error() {
        runtime(|| unsafe {
            register(Arc::new(DropAll));
            let ty = TypeBuilder::class("Demo", "Orphan").build();
            let err = resolve(&ty).unwrap_err();
            reset();
            assert!(matches!(err, BridgeError::Configuration(_)));
        });
    }
}
