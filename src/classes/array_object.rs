//! Managed arrays
//!
//! Construction from dimensions or from a sequence, indexing with negative
//! indices and with tuples for multi-dimensional arrays, and buffer export.
//! Iteration and containment come from the shared layer and the collection
//! mixin.

use std::ffi::c_int;

use crate::buffer::{array_getbuffer, array_releasebuffer};
use crate::classes::class_object::require_class;
use crate::clr_object::{require_managed, wrap_as};
use crate::converter::{to_managed, to_python};
use crate::error::{BridgeError, Result};
use crate::exceptions::{raise_as, short_repr};
use crate::managed::{core, ArrayData, ObjectRef, Value};
use crate::reference::NewReference;
use crate::runtime::ffi::error::{PyExc_IndexError, PyExc_TypeError, PyExc_ValueError};
use crate::runtime::ffi::scalar::{long_value, PyLong_Check};
use crate::runtime::ffi::tuple::{tuple_items, PyTuple_Check};
use crate::runtime::ffi::{PyObject, PyTypeObject, Py_ssize_t};
use crate::trampoline::trampoline;
use crate::types::{Slot, SlotTable};

pub(crate) fn fill(t: &mut SlotTable) {
    t.insert("tp_new", Slot::New(array_new));
    t.insert("mp_subscript", Slot::Binary(array_getitem));
    t.insert("mp_ass_subscript", Slot::ObjObjArg(array_setitem));
    t.insert("mp_length", Slot::Len(array_length));
    t.insert("sq_length", Slot::Len(array_length));
    t.insert("bf_getbuffer", Slot::GetBuffer(array_getbuffer));
    t.insert("bf_releasebuffer", Slot::ReleaseBuffer(array_releasebuffer));
}

/// `T[](n)`, `T[,](n, m)` or `T[](sequence)`
unsafe extern "C" fn array_new(tp: *mut PyTypeObject, args: *mut PyObject, _kwds: *mut PyObject) -> *mut PyObject {
    trampoline("tp_new", || {
        let ty = require_class(tp)?.ty().clone();
        let elem = ty.element_type().cloned().unwrap_or_else(|| core().object.clone());
        let rank = ty.array_rank().unwrap_or(1);
        let items = if args.is_null() { &[][..] } else { tuple_items(args) };

        let obj = if items.len() == rank && items.iter().all(|&a| PyLong_Check(a)) {
            let mut dims = Vec::with_capacity(rank);
            for &a in items {
                let n = long_value(a);
                if n < 0 {
                    return Ok(raise_as(PyExc_ValueError(), format!("negative array dimension {}", n)));
                }
                dims.push(n as usize);
            }
            ObjectRef::new_array(&elem, &dims)
        } else if let [source] = items {
            match to_managed(*source, &ty)? {
                Value::Object(obj) => obj,
                _ => return Err(BridgeError::InvalidArgument(format!("cannot build {} from None", ty))),
            }
        } else {
            return Ok(raise_as(
                PyExc_TypeError(),
                format!("{}() takes {} dimension(s) or one sequence", ty.name(), rank),
            ));
        };
        wrap_as(&obj, tp).map(NewReference::into_raw)
    })
}

enum BadKey {
    OutOfRange,
    WrongType,
}

fn normalize(i: i128, dim: usize) -> std::result::Result<usize, BadKey> {
    let adjusted = if i < 0 { i + dim as i128 } else { i };
    if adjusted < 0 || adjusted >= dim as i128 {
        return Err(BadKey::OutOfRange);
    }
    Ok(adjusted as usize)
}

/// Flat storage position for `key`
unsafe fn position(data: &ArrayData, key: *mut PyObject) -> std::result::Result<usize, BadKey> {
    let dims = data.dims();
    if PyLong_Check(key) {
        if dims.len() != 1 {
            return Err(BadKey::WrongType);
        }
        return normalize(long_value(key), dims[0]);
    }
    if PyTuple_Check(key) {
        let parts = tuple_items(key);
        if parts.len() != dims.len() || !parts.iter().all(|&p| PyLong_Check(p)) {
            return Err(BadKey::WrongType);
        }
        let mut indices = Vec::with_capacity(parts.len());
        for (&p, &dim) in parts.iter().zip(dims) {
            indices.push(normalize(long_value(p), dim)?);
        }
        return data.flat_index(&indices).ok_or(BadKey::OutOfRange);
    }
    Err(BadKey::WrongType)
}

unsafe fn bad_key<R: crate::trampoline::Sentinel>(problem: BadKey, key: *mut PyObject) -> R {
    match problem {
        BadKey::OutOfRange => raise_as(PyExc_IndexError(), "array index out of range"),
        BadKey::WrongType => raise_as(PyExc_TypeError(), format!("invalid array index: {}", short_repr(key))),
    }
}

fn array_of(obj: &ObjectRef) -> Result<&ArrayData> {
    obj.as_array()
        .ok_or_else(|| BridgeError::InvalidArgument(format!("'{}' object is not an array", obj.ty().full_name())))
}

unsafe extern "C" fn array_getitem(ob: *mut PyObject, key: *mut PyObject) -> *mut PyObject {
    trampoline("mp_subscript", || {
        let obj = require_managed(ob)?;
        let data = array_of(&obj)?;
        let index = match position(data, key) {
            Ok(i) => i,
            Err(problem) => return Ok(bad_key(problem, key)),
        };
        let value = data.get(index)?;
        to_python(&value, data.element_type()).map(NewReference::into_raw)
    })
}

unsafe extern "C" fn array_setitem(ob: *mut PyObject, key: *mut PyObject, value: *mut PyObject) -> c_int {
    trampoline("mp_ass_subscript", || {
        if value.is_null() {
            return Ok(raise_as(PyExc_TypeError(), "array items cannot be deleted"));
        }
        let obj = require_managed(ob)?;
        let data = array_of(&obj)?;
        let index = match position(data, key) {
            Ok(i) => i,
            Err(problem) => return Ok(bad_key(problem, key)),
        };
        let converted = to_managed(value, data.element_type())?;
        data.set(index, converted)?;
        Ok(0)
    })
}

unsafe extern "C" fn array_length(ob: *mut PyObject) -> Py_ssize_t {
    trampoline("mp_length", || {
        let obj = require_managed(ob)?;
        Ok(array_of(&obj)?.len() as Py_ssize_t)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class_manager;
    use crate::managed::Type;
    use crate::runtime::ffi::error::{PyErr_Clear, PyErr_ExceptionMatches};
    use crate::runtime::ffi::list::list_from_vec;
    use crate::runtime::ffi::mapping::{PyObject_GetItem, PyObject_SetItem};
    use crate::runtime::ffi::object::{PyObject_Call, PyObject_Size};
    use crate::runtime::ffi::scalar::long_from_i128;
    use crate::runtime::ffi::sequence::PySequence_Contains;
    use crate::runtime::ffi::tuple::tuple_from_vec;
    use crate::testing::runtime;

    unsafe fn make(ty: &Type, args: Vec<*mut PyObject>) -> NewReference {
        let tp = class_manager::get_or_create(ty).unwrap();
        let args = NewReference::from_raw(tuple_from_vec(args));
        NewReference::checked(PyObject_Call(tp as *mut PyObject, args.as_ptr(), std::ptr::null_mut())).unwrap()
    }

    unsafe fn int(n: i128) -> NewReference {
        NewReference::from_raw(long_from_i128(n))
    }

    #[test]
    fn test_length_constructor_and_negative_index() {
        runtime(|| unsafe {
            let ty = core().int32.make_array_type(1);
            let arr = make(&ty, vec![long_from_i128(3)]);
            assert_eq!(PyObject_Size(arr.as_ptr()), 3);
            let (last, seven) = (int(-1), int(7));
            assert_eq!(PyObject_SetItem(arr.as_ptr(), last.as_ptr(), seven.as_ptr()), 0);
            let two = int(2);
            let got = NewReference::checked(PyObject_GetItem(arr.as_ptr(), two.as_ptr())).unwrap();
            assert_eq!(long_value(got.as_ptr()), 7);
            assert_eq!(PySequence_Contains(arr.as_ptr(), seven.as_ptr()), 1);
        });
    }

    #[test]
    fn test_out_of_range_is_index_error() {
        runtime(|| unsafe {
            let ty = core().int32.make_array_type(1);
            let arr = make(&ty, vec![long_from_i128(2)]);
            let key = int(5);
            assert!(PyObject_GetItem(arr.as_ptr(), key.as_ptr()).is_null());
            assert!(PyErr_ExceptionMatches(PyExc_IndexError()) != 0);
            PyErr_Clear();
        });
    }

    #[test]
    fn test_two_dimensional_tuple_index() {
        runtime(|| unsafe {
            let ty = core().int32.make_array_type(2);
            let arr = make(&ty, vec![long_from_i128(2), long_from_i128(3)]);
            assert_eq!(PyObject_Size(arr.as_ptr()), 6);
            let key = NewReference::from_raw(tuple_from_vec(vec![long_from_i128(1), long_from_i128(2)]));
            let value = int(9);
            assert_eq!(PyObject_SetItem(arr.as_ptr(), key.as_ptr(), value.as_ptr()), 0);
            let obj = require_managed(arr.as_ptr()).unwrap();
            assert_eq!(obj.as_array().unwrap().get(5).unwrap(), Value::I32(9));

            let flat = int(1);
            assert!(PyObject_GetItem(arr.as_ptr(), flat.as_ptr()).is_null());
            assert!(PyErr_ExceptionMatches(PyExc_TypeError()) != 0);
            PyErr_Clear();
        });
    }

    #[test]
    fn test_sequence_constructor_converts_elements() {
        runtime(|| unsafe {
            let ty = core().int64.make_array_type(1);
            let list = NewReference::from_raw(list_from_vec(vec![long_from_i128(4), long_from_i128(5)]));
            let arr = make(&ty, vec![crate::runtime::ffi::refcount::Py_NewRef(list.as_ptr())]);
            let obj = require_managed(arr.as_ptr()).unwrap();
            assert_eq!(obj.as_array().unwrap().to_vec(), vec![Value::I64(4), Value::I64(5)]);
        });
    }

    #[test]
    fn test_items_cannot_be_deleted() {
        runtime(|| unsafe {
            let ty = core().int32.make_array_type(1);
            let arr = make(&ty, vec![long_from_i128(1)]);
            let key = int(0);
            assert_eq!(array_setitem(arr.as_ptr(), key.as_ptr(), std::ptr::null_mut()), -1);
            assert!(PyErr_ExceptionMatches(PyExc_TypeError()) != 0);
            PyErr_Clear();
        });
    }
}
