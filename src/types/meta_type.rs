//! The metatype of every bridged type
//!
//! Bridged type objects are instances of one heap metatype whose instances
//! extend the heap type struct with two words: the managed-handle offset of
//! the type's instances and a pointer to the class implementation behind the
//! type. Calling the metatype with `(name, bases, dict)` builds a managed
//! subclass; subscripting a generic definition closes it over the given
//! argument types. The metatype is created on first use and lives for the
//! rest of the process.

use std::ffi::c_int;
use std::mem::size_of;
use std::ptr::null_mut;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use tracing::debug;

use super::slots::{Slot, SlotTable};
use crate::classes::{derived, ClassBase};
use crate::error::{BridgeError, ConversionError, Result};
use crate::exceptions::check_status;
use crate::extensions;
use crate::managed::{core, Type};
use crate::reference::NewReference;
use crate::runtime::ffi::dict::{PyDict_New, PyDict_SetItemString};
use crate::runtime::ffi::object::Py_TYPE;
use crate::runtime::ffi::refcount::Py_NewRef;
use crate::runtime::ffi::scalar::{
    unicode_from_str, PyBool_Type, PyFloat_Type, PyLong_Type, PyUnicode_AsUTF8, PyUnicode_Type,
};
use crate::runtime::ffi::tuple::{tuple_items, PyTuple_Check};
use crate::runtime::ffi::types::*;
use crate::runtime::ffi::{instance_of, PyHeapTypeObject, PyObject, PyTypeObject, Py_ssize_t};
use crate::trampoline::{trampoline, trampoline_void};

/// Layout of a bridged type object
#[repr(C)]
pub struct BridgeTypeObject {
    pub heap: PyHeapTypeObject,
    /// Offset of the managed handle in instances of this type
    pub handle_offset: Py_ssize_t,
    /// Owned `Arc<ClassBase>` in raw form; null until the type is populated
    pub class: *const ClassBase,
}

static METATYPE: AtomicPtr<PyTypeObject> = AtomicPtr::new(null_mut());

const METATYPE_NAME: &str = "CLR.CLRMetatype";

/// The bridge metatype, creating it on first use
///
/// # Safety
/// The interpreter lock must be held
pub unsafe fn metatype() -> Result<*mut PyTypeObject> {
    let existing = METATYPE.load(Ordering::Acquire);
    if !existing.is_null() {
        return Ok(existing);
    }
    let created = create()?;
    METATYPE.store(created, Ordering::Release);
    debug!(event = "metatype_created", name = METATYPE_NAME, "bridge metatype ready");
    Ok(created)
}

/// Is `tp` a type synthesized by the bridge (or a native subclass of one)
///
/// # Safety
/// `tp` must be a live type object
pub unsafe fn is_bridge_type(tp: *mut PyTypeObject) -> bool {
    let meta = METATYPE.load(Ordering::Acquire);
    !meta.is_null() && !tp.is_null() && instance_of(tp as *mut PyObject, meta)
}

/// Handle offset recorded on a bridged type
///
/// # Safety
/// `tp` must be a live type object
pub unsafe fn handle_offset_of(tp: *mut PyTypeObject) -> Option<Py_ssize_t> {
    if !is_bridge_type(tp) {
        return None;
    }
    let offset = (*(tp as *mut BridgeTypeObject)).handle_offset;
    (offset > 0).then_some(offset)
}

/// Class implementation behind a bridged type
///
/// # Safety
/// `tp` must be a live type object; the borrow must not outlive it
pub unsafe fn class_of<'a>(tp: *mut PyTypeObject) -> Option<&'a ClassBase> {
    if !is_bridge_type(tp) {
        return None;
    }
    (*(tp as *mut BridgeTypeObject)).class.as_ref()
}

/// Record the handle offset and class on a type the metatype allocated
///
/// # Safety
/// `tp` must be an instance of the metatype with no class stored yet
pub unsafe fn bind_class(tp: *mut PyTypeObject, handle_offset: Py_ssize_t, class: Arc<ClassBase>) {
    let bridge = tp as *mut BridgeTypeObject;
    (*bridge).handle_offset = handle_offset;
    (*bridge).class = Arc::into_raw(class);
}

unsafe fn create() -> Result<*mut PyTypeObject> {
    let tp = PyType_GenericAlloc(PyType_Type(), 0) as *mut PyTypeObject;
    if tp.is_null() {
        return Err(crate::exceptions::rethrow_last());
    }
    let owned = NewReference::from_raw(tp as *mut PyObject);
    let ht = tp as *mut PyHeapTypeObject;
    let name = unicode_from_str(METATYPE_NAME);
    if name.is_null() {
        return Err(crate::exceptions::rethrow_last());
    }
    (*ht).ht_name = name;
    (*ht).ht_qualname = Py_NewRef(name);
    (*tp).tp_name = PyUnicode_AsUTF8(name);
    (*tp).tp_basicsize = size_of::<BridgeTypeObject>() as Py_ssize_t;
    (*tp).tp_flags = Py_TPFLAGS_DEFAULT | Py_TPFLAGS_HEAPTYPE | Py_TPFLAGS_BASETYPE | Py_TPFLAGS_TYPE_SUBCLASS;
    (*tp).tp_as_number = &mut (*ht).as_number;
    (*tp).tp_as_sequence = &mut (*ht).as_sequence;
    (*tp).tp_as_mapping = &mut (*ht).as_mapping;
    (*tp).tp_as_buffer = &mut (*ht).as_buffer;
    (*tp).tp_base = Py_NewRef(PyType_Type() as *mut PyObject) as *mut PyTypeObject;

    let mut slots = SlotTable::new();
    slots.insert("tp_new", Slot::New(meta_new));
    slots.insert("tp_dealloc", Slot::Destructor(meta_dealloc));
    slots.insert("tp_setattro", Slot::ObjObjArg(meta_setattro));
    slots.insert("mp_subscript", Slot::Binary(meta_subscript));
    slots.insert("tp_alloc", Slot::Alloc(PyType_GenericAlloc));
    slots.apply(tp)?;

    let dict = PyDict_New();
    if dict.is_null() {
        return Err(crate::exceptions::rethrow_last());
    }
    (*tp).tp_dict = dict;
    let module = NewReference::checked(unicode_from_str("CLR"))?;
    check_status(PyDict_SetItemString(dict, c"__module__".as_ptr(), module.as_ptr()))?;
    check_status(PyType_Ready(tp))?;
    Ok(owned.into_raw() as *mut PyTypeObject)
}

/// `tp_new` of the metatype: a native subclass of a bridged type
unsafe extern "C" fn meta_new(meta: *mut PyTypeObject, args: *mut PyObject, kwds: *mut PyObject) -> *mut PyObject {
    trampoline("tp_new", || derived::create_subclass(meta, args, kwds))
}

/// Release the class implementation, then the type object itself
unsafe extern "C" fn meta_dealloc(ob: *mut PyObject) {
    trampoline_void("tp_dealloc", || {
        let bridge = ob as *mut BridgeTypeObject;
        let class = std::mem::replace(&mut (*bridge).class, std::ptr::null());
        if !class.is_null() {
            drop(Arc::from_raw(class));
        }
        Ok(())
    });
    match (*PyType_Type()).tp_dealloc {
        Some(dealloc) => dealloc(ob),
        None => free_instance(ob),
    }
}

/// Assignment through the type: static properties and fields take the value,
/// anything else goes to the type dict
unsafe extern "C" fn meta_setattro(tp: *mut PyObject, name: *mut PyObject, value: *mut PyObject) -> c_int {
    trampoline("tp_setattro", || {
        let descr = _PyType_Lookup(tp as *mut PyTypeObject, name);
        if !descr.is_null() && extensions::is_member_descriptor(descr) {
            if let Some(set) = (*Py_TYPE(descr)).tp_descr_set {
                return check_status(set(descr, tp, value)).map(|_| 0);
            }
        }
        match (*PyType_Type()).tp_setattro {
            Some(set) => check_status(set(tp, name, value)).map(|_| 0),
            None => Err(BridgeError::Runtime("type has no attribute setter".into())),
        }
    })
}

/// `Definition[Arg, ...]`: close a generic definition
unsafe extern "C" fn meta_subscript(tp: *mut PyObject, key: *mut PyObject) -> *mut PyObject {
    trampoline("mp_subscript", || {
        let Some(class) = class_of(tp as *mut PyTypeObject) else {
            return Err(BridgeError::Runtime("subscripted type has no managed class".into()));
        };
        let definition = class.ty();
        let args: Vec<*mut PyObject> = if PyTuple_Check(key) {
            tuple_items(key).to_vec()
        } else {
            vec![key]
        };
        let mut resolved = Vec::with_capacity(args.len());
        for &arg in &args {
            resolved.push(type_argument(arg)?);
        }
        let closed = definition.make_generic_type(&resolved).map_err(BridgeError::Managed)?;
        let tp = crate::class_manager::get_or_create(&closed)?;
        Ok(Py_NewRef(tp as *mut PyObject))
    })
}

/// Managed type named by a native type object used as a generic argument
unsafe fn type_argument(arg: *mut PyObject) -> Result<Type> {
    if !PyType_Check(arg) {
        return Err(ConversionError::mismatch("type", obj_type_name(arg)).into());
    }
    let tp = arg as *mut PyTypeObject;
    if let Some(class) = class_of(tp) {
        return Ok(class.ty().clone());
    }
    let c = core();
    let builtin = if tp == PyBool_Type() {
        Some(&c.boolean)
    } else if tp == PyLong_Type() {
        Some(&c.int32)
    } else if tp == PyFloat_Type() {
        Some(&c.double)
    } else if tp == PyUnicode_Type() {
        Some(&c.string)
    } else if tp == PyBaseObject_Type() {
        Some(&c.object)
    } else {
        None
    };
    builtin.cloned().ok_or_else(|| {
        BridgeError::InvalidArgument(format!(
            "'{}' does not name a managed type",
            type_name(tp)
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::runtime;

    #[test]
    fn test_metatype_is_a_type_subclass() {
        runtime(|| unsafe {
            let meta = metatype().unwrap();
            assert_eq!(metatype().unwrap(), meta);
            assert!(PyType_IsSubtype(meta, PyType_Type()) != 0);
            assert_eq!((*meta).tp_basicsize as usize, size_of::<BridgeTypeObject>());
            assert_eq!(type_name(meta), "CLR.CLRMetatype");
        });
    }

    #[test]
    fn test_builtin_types_are_not_bridge_types() {
        runtime(|| unsafe {
            metatype().unwrap();
            assert!(!is_bridge_type(PyLong_Type()));
            assert!(class_of(PyBaseObject_Type()).is_none());
            assert_eq!(handle_offset_of(PyType_Type()), None);
        });
    }

    #[test]
    fn test_builtin_generic_arguments() {
        runtime(|| unsafe {
            let c = core();
            assert_eq!(type_argument(PyLong_Type() as *mut PyObject).unwrap(), c.int32);
            assert_eq!(type_argument(PyUnicode_Type() as *mut PyObject).unwrap(), c.string);
            assert!(type_argument(PyType_Type() as *mut PyObject).is_err());
        });
    }
}
