//! Instance wrappers
//!
//! A wrapper is a native instance of a bridged type with a [`GcHandle`] to
//! one managed object stored at the type's handle offset. The handle is the
//! only thing keeping the managed object reachable from the native side, and
//! it is released exactly once, by [`clr_dealloc`].

use std::ffi::c_void;
use std::ptr::null_mut;

use tracing::trace;

use crate::class_manager;
use crate::error::{BridgeError, Result};
use crate::exceptions::rethrow_last;
use crate::managed::{GcHandle, ObjectRef, Type};
use crate::reference::{BorrowedReference, NewReference};
use crate::runtime::ffi::error::{PyException_SetArgs, PyException_SetCause, PyExceptionInstance_Check};
use crate::runtime::ffi::object::Py_TYPE;
use crate::runtime::ffi::scalar::unicode_from_str;
use crate::runtime::ffi::tuple::tuple_from_vec;
use crate::runtime::ffi::types::{free_instance, type_name, PyType_GenericAlloc};
use crate::runtime::ffi::{PyObject, PyTypeObject};
use crate::runtime::offsets::{read_field, write_field};
use crate::trampoline::trampoline_void;
use crate::types::meta_type::handle_offset_of;
use crate::types::is_bridge_type;

/// Native instance for `obj` as seen through `ty`
///
/// Objects created for a native subclass instance come back as that
/// instance; everything else gets a fresh wrapper.
///
/// # Safety
/// The interpreter lock must be held
pub unsafe fn wrap(obj: &ObjectRef, ty: &Type) -> Result<NewReference> {
    let existing = obj.native_self();
    if !existing.is_null() {
        trace!(event = "wrap_identity", ty = %obj.ty(), "returning original native instance");
        return Ok(NewReference::from_nullable(BorrowedReference::from_raw(existing)));
    }
    let tp = class_manager::get_or_create(ty)?;
    wrap_as(obj, tp)
}

/// Fresh wrapper for `obj` of exactly the native type `tp`
///
/// # Safety
/// The interpreter lock must be held; `tp` must be a bridged type
pub unsafe fn wrap_as(obj: &ObjectRef, tp: *mut PyTypeObject) -> Result<NewReference> {
    let offset = handle_offset_of(tp).ok_or_else(|| {
        BridgeError::Configuration(format!("'{}' has no managed handle slot", type_name(tp)))
    })?;
    let alloc = (*tp).tp_alloc.unwrap_or(PyType_GenericAlloc);
    let ob = NewReference::checked(alloc(tp, 0))?;
    write_field(ob.as_ptr(), offset, GcHandle::alloc(obj).into_raw());

    if let Some(data) = obj.as_exception() {
        if PyExceptionInstance_Check(ob.as_ptr()) {
            init_exception(ob.as_ptr(), &data.message(), data.inner())?;
        }
    }
    if obj.ty().is_derived_from_native() && obj.native_self().is_null() {
        obj.set_native_self(ob.as_ptr());
    }
    trace!(event = "wrapper_created", ty = type_name(tp), object = obj.address(), "managed object wrapped");
    Ok(ob)
}

/// Give a wrapped exception its `args` and `__cause__`
unsafe fn init_exception(ob: *mut PyObject, message: &str, inner: Option<ObjectRef>) -> Result<()> {
    let text = NewReference::checked(unicode_from_str(message))?;
    let args = tuple_from_vec(vec![text.into_raw()]);
    if args.is_null() {
        return Err(rethrow_last());
    }
    let args = NewReference::from_raw(args);
    PyException_SetArgs(ob, args.as_ptr());
    if let Some(inner) = inner {
        let cause = wrap(&inner, &inner.ty().clone())?;
        PyException_SetCause(ob, cause.into_raw());
    }
    Ok(())
}

/// Managed object behind a wrapper, or None for anything else
///
/// The offset is read from the instance's type, so subclasses that share a
/// handle slot resolve the same way.
///
/// # Safety
/// `ob` must be a live object
pub unsafe fn get_managed_object(ob: *mut PyObject) -> Option<ObjectRef> {
    if ob.is_null() {
        return None;
    }
    let tp = Py_TYPE(ob);
    if !is_bridge_type(tp) {
        return None;
    }
    let offset = handle_offset_of(tp)?;
    let raw: *mut c_void = read_field(ob, offset);
    if raw.is_null() {
        return None;
    }
    Some(GcHandle::borrow_raw(raw))
}

/// [`get_managed_object`] that reports non-wrappers as an error
///
/// # Safety
/// As for [`get_managed_object`]
pub unsafe fn require_managed(ob: *mut PyObject) -> Result<ObjectRef> {
    get_managed_object(ob).ok_or_else(|| {
        BridgeError::InvalidArgument(format!(
            "'{}' object is not bound to a managed instance",
            crate::runtime::ffi::types::obj_type_name(ob)
        ))
    })
}

/// `tp_dealloc` of every bridged type
///
/// Releases the identity handle, then hands the memory to the nearest
/// native base's deallocator, which clears the dict and frees the instance.
///
/// # Safety
/// Called by the interpreter with a dead instance
pub unsafe extern "C" fn clr_dealloc(ob: *mut PyObject) {
    let tp = Py_TYPE(ob);
    trampoline_void("tp_dealloc", || {
        if let Some(offset) = handle_offset_of(tp) {
            let raw: *mut c_void = read_field(ob, offset);
            if !raw.is_null() {
                write_field(ob, offset, null_mut::<c_void>());
                let handle = GcHandle::from_raw(raw);
                handle.target().clear_native_self(ob);
                trace!(event = "wrapper_released", ty = type_name(tp), "identity handle freed");
                handle.free();
            }
        }
        Ok(())
    });
    let mut base = tp;
    while !base.is_null() && is_bridge_type(base) {
        base = (*base).tp_base;
    }
    match base.as_ref().and_then(|b| b.tp_dealloc) {
        Some(dealloc) => dealloc(ob),
        None => free_instance(ob),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managed::{core, live_handles, TypeBuilder};
    use crate::runtime::ffi::error::{PyException_GetArgs, PyException_GetCause};
    use crate::runtime::ffi::refcount::Py_DECREF;
    use crate::runtime::ffi::scalar::unicode_as_str;
    use crate::runtime::ffi::tuple::tuple_items;
    use crate::testing::runtime;

    #[test]
    fn test_unwrap_returns_same_object() {
        runtime(|| unsafe {
            let ty = TypeBuilder::class("Demo", "Box").build();
            let obj = ObjectRef::alloc(&ty);
            let ob = wrap(&obj, &ty).unwrap();
            let back = get_managed_object(ob.as_ptr()).unwrap();
            assert!(back.ptr_eq(&obj));
        });
    }

    #[test]
    fn test_wrapping_twice_gives_distinct_wrappers() {
        runtime(|| unsafe {
            let ty = TypeBuilder::class("Demo", "Twice").build();
            let obj = ObjectRef::alloc(&ty);
            let a = wrap(&obj, &ty).unwrap();
            let b = wrap(&obj, &ty).unwrap();
            assert_ne!(a.as_ptr(), b.as_ptr());
        });
    }

    #[test]
    fn test_dealloc_frees_handle_once() {
        runtime(|| unsafe {
            let ty = TypeBuilder::class("Demo", "Short").build();
            let obj = ObjectRef::alloc(&ty);
            let ob = wrap(&obj, &ty).unwrap();
            let live = live_handles();
            drop(ob);
            assert_eq!(live_handles(), live - 1);
        });
    }

    #[test]
    fn test_plain_objects_are_not_wrappers() {
        runtime(|| unsafe {
            let s = unicode_from_str("plain");
            assert!(get_managed_object(s).is_none());
            assert!(require_managed(s).is_err());
            Py_DECREF(s);
        });
    }

    #[test]
    fn test_exception_wrapper_has_args_and_cause() {
        runtime(|| unsafe {
            let c = core();
            let inner = ObjectRef::new_exception(&c.argument_exception, "inner", None);
            let outer = ObjectRef::new_exception(&c.invalid_operation_exception, "outer", Some(inner.clone()));
            let ob = wrap(&outer, &c.invalid_operation_exception).unwrap();
            let args = PyException_GetArgs(ob.as_ptr());
            assert_eq!(unicode_as_str(tuple_items(args)[0]), Some("outer"));
            Py_DECREF(args);
            let cause = PyException_GetCause(ob.as_ptr());
            assert!(get_managed_object(cause).unwrap().ptr_eq(&inner));
            Py_DECREF(cause);
        });
    }
}
