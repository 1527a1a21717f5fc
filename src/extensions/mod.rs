//! Extension-only native types
//!
//! Reflected members show up in a bridged type's dict as instances of a few
//! small native types: method objects and the bound methods they hand out,
//! property and field descriptors, and the iterator over managed collections.
//! A collection mixin joins them as an extra base for enumerable types. None of
//! these have a managed type of their own, so they are plain heap types whose
//! metatype is the interpreter's `type`. Each is created on first use and
//! dropped by [`reset`].
//!
//! Instances are a bare object header followed by one pointer to Rust-owned
//! state ([`Boxed`]); the state is freed by the type's deallocator.

pub mod field;
pub mod iterator;
pub mod method;
pub mod property;

use std::collections::HashMap;
use std::ffi::c_int;
use std::mem::size_of;
use std::ptr::null_mut;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{BridgeError, Result};
use crate::exceptions::{check_status, rethrow_last};
use crate::reference::{NativeObject, NewReference};
use crate::runtime::ffi::dict::{PyDict_New, PyDict_SetItemString};
use crate::runtime::ffi::iter::{PyIter_Next, PyObject_GetIter};
use crate::runtime::ffi::error::PyExc_TypeError;
use crate::runtime::ffi::object::{PyObject_RichCompareBool, Py_EQ};
use crate::runtime::ffi::refcount::{Py_DECREF, Py_NewRef};
use crate::runtime::ffi::scalar::{unicode_from_str, PyUnicode_AsUTF8};
use crate::runtime::ffi::types::*;
use crate::runtime::ffi::{instance_of, PyHeapTypeObject, PyObject, PyTypeObject, Py_ssize_t};
use crate::runtime::offsets::object_head_size;
use crate::trampoline::{trampoline, trampoline_void};
use crate::types::{Slot, SlotTable};

pub use self::field::FieldObject;
pub use self::iterator::IteratorObject;
pub use self::method::{BoundMethod, MethodObject};
pub use self::property::PropertyObject;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionKind {
    Method,
    BoundMethod,
    Property,
    Field,
    Iterator,
    CollectionMixin,
}

impl ExtensionKind {
    pub fn name(self) -> &'static str {
        match self {
            ExtensionKind::Method => "MethodObject",
            ExtensionKind::BoundMethod => "MethodBinding",
            ExtensionKind::Property => "PropertyObject",
            ExtensionKind::Field => "FieldObject",
            ExtensionKind::Iterator => "Iterator",
            ExtensionKind::CollectionMixin => "CollectionMixin",
        }
    }

    fn slots(self) -> SlotTable {
        let mut table = match self {
            ExtensionKind::Method => method::method_slots(),
            ExtensionKind::BoundMethod => method::bound_slots(),
            ExtensionKind::Property => property::slots(),
            ExtensionKind::Field => field::slots(),
            ExtensionKind::Iterator => iterator::slots(),
            ExtensionKind::CollectionMixin => {
                let mut t = SlotTable::new();
                t.insert("sq_contains", Slot::ObjObj(collection_contains));
                t
            }
        };
        if self != ExtensionKind::CollectionMixin {
            table.insert("tp_new", Slot::New(refuse_new));
        }
        table
    }

    fn basicsize(self) -> Py_ssize_t {
        match self {
            ExtensionKind::CollectionMixin => object_head_size(),
            _ => size_of::<Boxed<()>>() as Py_ssize_t,
        }
    }
}

static TYPES: Lazy<Mutex<HashMap<ExtensionKind, NativeObject>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Native type for `kind`, creating it on first use
///
/// # Safety
/// The interpreter lock must be held
pub unsafe fn type_object(kind: ExtensionKind) -> Result<*mut PyTypeObject> {
    if let Some(tp) = lookup(kind) {
        return Ok(tp);
    }
    let created = create(kind)?;
    let mut types = TYPES.lock();
    let entry = types.entry(kind).or_insert(created);
    Ok(entry.as_ptr() as *mut PyTypeObject)
}

fn lookup(kind: ExtensionKind) -> Option<*mut PyTypeObject> {
    TYPES.lock().get(&kind).map(|t| t.as_ptr() as *mut PyTypeObject)
}

/// Drop every extension type; live instances keep theirs alive
///
/// # Safety
/// The interpreter lock must be held
pub unsafe fn reset() {
    let drained: Vec<NativeObject> = TYPES.lock().drain().map(|(_, t)| t).collect();
    debug!(event = "extension_types_reset", count = drained.len(), "extension types dropped");
    drop(drained);
}

/// Is `ob` a property or field descriptor
///
/// # Safety
/// `ob` must be a live object
pub unsafe fn is_member_descriptor(ob: *mut PyObject) -> bool {
    [ExtensionKind::Property, ExtensionKind::Field]
        .into_iter()
        .filter_map(lookup)
        .any(|tp| instance_of(ob, tp))
}

unsafe fn create(kind: ExtensionKind) -> Result<NativeObject> {
    let tp = PyType_GenericAlloc(PyType_Type(), 0) as *mut PyTypeObject;
    if tp.is_null() {
        return Err(rethrow_last());
    }
    let owned = NewReference::from_raw(tp as *mut PyObject);
    let ht = tp as *mut PyHeapTypeObject;
    let name = NewReference::checked(unicode_from_str(kind.name()))?;
    (*ht).ht_name = Py_NewRef(name.as_ptr());
    (*ht).ht_qualname = Py_NewRef(name.as_ptr());
    (*tp).tp_name = PyUnicode_AsUTF8((*ht).ht_name);
    (*tp).tp_basicsize = kind.basicsize();

    let mut flags = Py_TPFLAGS_DEFAULT | Py_TPFLAGS_HEAPTYPE;
    if kind == ExtensionKind::CollectionMixin {
        flags |= Py_TPFLAGS_BASETYPE;
    }
    (*tp).tp_flags = flags;
    (*tp).tp_as_number = &mut (*ht).as_number;
    (*tp).tp_as_sequence = &mut (*ht).as_sequence;
    (*tp).tp_as_mapping = &mut (*ht).as_mapping;
    (*tp).tp_as_buffer = &mut (*ht).as_buffer;
    (*tp).tp_base = Py_NewRef(PyBaseObject_Type() as *mut PyObject) as *mut PyTypeObject;
    kind.slots().apply(tp)?;

    let dict = PyDict_New();
    if dict.is_null() {
        return Err(rethrow_last());
    }
    (*tp).tp_dict = dict;
    let module = NewReference::checked(unicode_from_str("CLR"))?;
    check_status(PyDict_SetItemString(dict, c"__module__".as_ptr(), module.as_ptr()))?;
    check_status(PyType_Ready(tp))?;
    debug!(event = "extension_type_created", name = kind.name(), "extension type ready");
    owned.move_to_owner()
}

/// Object header plus one owned pointer
#[repr(C)]
pub struct Boxed<T> {
    ob_base: PyObject,
    value: *mut T,
}

/// Instance of the `kind` type owning `value`
///
/// # Safety
/// The interpreter lock must be held; `kind`'s deallocator must be
/// [`dealloc_boxed::<T>`]
pub(crate) unsafe fn new_boxed<T>(kind: ExtensionKind, value: T) -> Result<NewReference> {
    let tp = type_object(kind)?;
    let ob = NewReference::checked(PyType_GenericAlloc(tp, 0))?;
    (*(ob.as_ptr() as *mut Boxed<T>)).value = Box::into_raw(Box::new(value));
    Ok(ob)
}

/// State of an instance of `kind`; None for anything else
///
/// # Safety
/// `ob` must be live and the borrow must not outlive it
pub(crate) unsafe fn boxed_ref<'a, T>(ob: *mut PyObject, kind: ExtensionKind) -> Option<&'a T> {
    let tp = lookup(kind)?;
    if ob.is_null() || !instance_of(ob, tp) {
        return None;
    }
    (*(ob as *mut Boxed<T>)).value.as_ref()
}

/// State of an instance reached through one of its own type's slots
///
/// # Safety
/// `ob` must be a live instance created by [`new_boxed::<T>`]
pub(crate) unsafe fn state<'a, T>(ob: *mut PyObject) -> Result<&'a T> {
    (*(ob as *mut Boxed<T>))
        .value
        .as_ref()
        .ok_or_else(|| BridgeError::Runtime(format!("'{}' object has no state", obj_type_name(ob))))
}

/// `tp_dealloc` for [`Boxed`] instances
pub(crate) unsafe extern "C" fn dealloc_boxed<T>(ob: *mut PyObject) {
    trampoline_void("tp_dealloc", || {
        let value = std::mem::replace(&mut (*(ob as *mut Boxed<T>)).value, null_mut());
        if !value.is_null() {
            drop(Box::from_raw(value));
        }
        Ok(())
    });
    free_instance(ob);
}

unsafe extern "C" fn refuse_new(tp: *mut PyTypeObject, _args: *mut PyObject, _kwds: *mut PyObject) -> *mut PyObject {
    typebridge_runtime::set_error(PyExc_TypeError(), format!("cannot create '{}' instances", type_name(tp)));
    null_mut()
}

/// `in` by iteration and equality, for enumerable types
unsafe extern "C" fn collection_contains(ob: *mut PyObject, item: *mut PyObject) -> c_int {
    trampoline("sq_contains", || {
        let iter = NewReference::checked(PyObject_GetIter(ob))?;
        loop {
            let next = PyIter_Next(iter.as_ptr());
            if next.is_null() {
                if crate::exceptions::error_occurred() {
                    return Err(rethrow_last());
                }
                return Ok(0);
            }
            let eq = PyObject_RichCompareBool(next, item, Py_EQ);
            Py_DECREF(next);
            match eq {
                1 => return Ok(1),
                0 => {}
                _ => return Err(rethrow_last()),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ffi::object::{PyObject_CallNoArgs, Py_TYPE};
    use crate::testing::runtime;

    #[test]
    fn test_types_are_cached_per_kind() {
        runtime(|| unsafe {
            let a = type_object(ExtensionKind::Property).unwrap();
            let b = type_object(ExtensionKind::Property).unwrap();
            assert_eq!(a, b);
            assert_ne!(a, type_object(ExtensionKind::Field).unwrap());
            assert_eq!(type_name(a), "PropertyObject");
            assert_eq!(type_module(a), "CLR");
            assert_eq!(Py_TYPE(a as *mut PyObject), PyType_Type());
        });
    }

    #[test]
    fn test_descriptor_types_cannot_be_instantiated() {
        runtime(|| unsafe {
            let tp = type_object(ExtensionKind::Method).unwrap();
            let made = PyObject_CallNoArgs(tp as *mut PyObject);
            assert!(made.is_null());
            crate::runtime::ffi::error::PyErr_Clear();
        });
    }

    #[test]
    fn test_only_the_mixin_is_subclassable() {
        runtime(|| unsafe {
            let mixin = type_object(ExtensionKind::CollectionMixin).unwrap();
            assert_ne!((*mixin).tp_flags & Py_TPFLAGS_BASETYPE, 0);
            assert_eq!((*mixin).tp_basicsize, object_head_size());
            let iter = type_object(ExtensionKind::Iterator).unwrap();
            assert_eq!((*iter).tp_flags & Py_TPFLAGS_BASETYPE, 0);
        });
    }
}
