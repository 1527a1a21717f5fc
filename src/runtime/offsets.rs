//! Raw field access at byte offsets inside native objects
//!
//! Every read or write is checked against the object's own type's declared
//! basic size in debug builds. Offsets come from type objects (`tp_dictoffset`,
//! the bridge's handle offset), never from constants baked into callers.

use std::mem::{offset_of, size_of};

use typebridge_runtime::{PyBaseExceptionObject, PyObject, Py_TYPE, Py_ssize_t};

/// Width of one object pointer slot
pub const PTR_SIZE: Py_ssize_t = size_of::<*mut PyObject>() as Py_ssize_t;

/// Size of the bare object header; grows by two pointers under `trace-refs`
pub const fn object_head_size() -> Py_ssize_t {
    size_of::<PyObject>() as Py_ssize_t
}

/// Offset of `args` inside every exception instance
pub const fn exception_args_offset() -> Py_ssize_t {
    offset_of!(PyBaseExceptionObject, args) as Py_ssize_t
}

/// Offset of `__cause__` inside every exception instance
pub const fn exception_cause_offset() -> Py_ssize_t {
    offset_of!(PyBaseExceptionObject, cause) as Py_ssize_t
}

#[inline]
unsafe fn check_bounds(ob: *mut PyObject, offset: Py_ssize_t, width: usize) {
    debug_assert!(offset >= object_head_size(), "field offset {} overlaps the object header", offset);
    debug_assert!(
        offset + width as Py_ssize_t <= (*Py_TYPE(ob)).tp_basicsize,
        "field at offset {} runs past basic size {} of '{}'",
        offset,
        (*Py_TYPE(ob)).tp_basicsize,
        typebridge_runtime::obj_type_name(ob)
    );
}

/// Read a `T` stored at `offset`
///
/// # Safety
/// `ob` must be live and the field at `offset` must hold a `T`
pub unsafe fn read_field<T: Copy>(ob: *mut PyObject, offset: Py_ssize_t) -> T {
    check_bounds(ob, offset, size_of::<T>());
    ((ob as *mut u8).offset(offset) as *mut T).read_unaligned()
}

/// Write a `T` at `offset`, returning nothing about the previous value
///
/// # Safety
/// `ob` must be live; the caller owns whatever was stored there before
pub unsafe fn write_field<T>(ob: *mut PyObject, offset: Py_ssize_t, value: T) {
    check_bounds(ob, offset, size_of::<T>());
    ((ob as *mut u8).offset(offset) as *mut T).write_unaligned(value)
}

/// Address of an object-pointer slot
///
/// # Safety
/// `ob` must be live and `offset` a pointer slot within its type's layout
pub unsafe fn slot_ptr(ob: *mut PyObject, offset: Py_ssize_t) -> *mut *mut PyObject {
    check_bounds(ob, offset, size_of::<*mut PyObject>());
    (ob as *mut u8).offset(offset) as *mut *mut PyObject
}

#[cfg(test)]
mod tests {
    use super::*;
    use typebridge_runtime::{PyExc_Exception, PyTypeObject, PyType_GenericAlloc, Py_DECREF};

    use crate::testing::runtime;

    #[test]
    fn test_header_is_two_pointers_without_tracing() {
        #[cfg(not(feature = "trace-refs"))]
        assert_eq!(object_head_size(), 2 * PTR_SIZE);
        #[cfg(feature = "trace-refs")]
        assert_eq!(object_head_size(), 4 * PTR_SIZE);
    }

    #[test]
    fn test_exception_fields_follow_dict() {
        assert_eq!(exception_args_offset(), object_head_size() + PTR_SIZE);
        assert!(exception_cause_offset() > exception_args_offset());
    }

    #[test]
    fn test_field_write_then_read() {
        runtime(|| unsafe {
            let tp = PyExc_Exception() as *mut PyTypeObject;
            let ob = PyType_GenericAlloc(tp, 0);
            let marker = 0x5a5a_usize as *mut PyObject;
            write_field(ob, exception_cause_offset(), marker);
            assert_eq!(read_field::<*mut PyObject>(ob, exception_cause_offset()), marker);
            assert_eq!(*slot_ptr(ob, exception_cause_offset()), marker);
            write_field(ob, exception_cause_offset(), std::ptr::null_mut::<PyObject>());
            Py_DECREF(ob);
        });
    }
}
