//! Buffer export for arrays of primitive elements
//!
//! The view points straight at the array's element storage. The array is
//! pinned for as long as the view is held; shape, strides and the format
//! string live in a heap block hung off `view.internal` and are freed by the
//! matching release.

use std::ffi::{c_int, c_void, CString};
use std::ptr::null_mut;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::trace;

use crate::clr_object::require_managed;
use crate::error::Result;
use crate::managed::{ObjectRef, TypeCode};
use crate::runtime::ffi::buffer::{PyBUF_FORMAT, PyBUF_ND, PyBUF_STRIDES};
use crate::runtime::ffi::error::PyExc_BufferError;
use crate::runtime::ffi::refcount::Py_NewRef;
use crate::runtime::ffi::{to_index, PyObject, Py_buffer, Py_ssize_t};
use crate::trampoline::{trampoline, trampoline_void};

const TOO_LARGE: &str = "array too large to export";

static LIVE_EXPORTS: AtomicUsize = AtomicUsize::new(0);

/// Views handed out and not yet released
pub fn live_exports() -> usize {
    LIVE_EXPORTS.load(Ordering::Acquire)
}

/// Struct-module format character for an element type code
pub fn format_code(code: TypeCode) -> Option<&'static str> {
    let f = match code {
        TypeCode::Boolean => "?",
        TypeCode::SByte => "b",
        TypeCode::Byte => "B",
        TypeCode::Int16 => "h",
        TypeCode::UInt16 => "H",
        TypeCode::Int32 => "i",
        TypeCode::UInt32 => "I",
        TypeCode::Int64 => "q",
        TypeCode::UInt64 => "Q",
        TypeCode::Single => "f",
        TypeCode::Double => "d",
        TypeCode::Char | TypeCode::String | TypeCode::Object => return None,
    };
    Some(f)
}

/// Everything a view borrows, owned until release
struct BufferInfo {
    shape: Box<[Py_ssize_t]>,
    strides: Box<[Py_ssize_t]>,
    format: CString,
    array: ObjectRef,
}

/// `bf_getbuffer` of bridged array types
///
/// # Safety
/// Called by the interpreter with a live array wrapper and a writable view
pub unsafe extern "C" fn array_getbuffer(ob: *mut PyObject, view: *mut Py_buffer, flags: c_int) -> c_int {
    trampoline("bf_getbuffer", || {
        if view.is_null() {
            raise_buffer_error("buffer export requested without a view");
            return Ok(-1);
        }
        let array = require_managed(ob)?;
        match fill(ob, &mut *view, flags, array) {
            Ok(()) => Ok(0),
            Err(message) => {
                raise_buffer_error(&message);
                Ok(-1)
            }
        }
    })
}

unsafe fn fill(ob: *mut PyObject, view: &mut Py_buffer, flags: c_int, array: ObjectRef) -> Result<(), String> {
    let data = array
        .as_array()
        .ok_or_else(|| format!("'{}' is not an array", array.ty()))?;
    let elem = data.element_type();
    let (format, itemsize) = match (elem.is_primitive(), format_code(elem.type_code()), elem.type_code().size()) {
        (true, Some(f), Some(size)) => (f, size),
        _ => return Err(format!("arrays of {} cannot export a buffer", elem)),
    };

    let dims = data.dims();
    let mut strides = vec![0 as Py_ssize_t; dims.len()];
    let mut step = itemsize;
    for (i, &d) in dims.iter().enumerate().rev() {
        strides[i] = to_index(step).ok_or_else(|| TOO_LARGE.to_owned())?;
        step = step.saturating_mul(d);
    }
    let shape: Vec<Py_ssize_t> = dims
        .iter()
        .map(|&d| to_index(d).ok_or_else(|| TOO_LARGE.to_owned()))
        .collect::<Result<_, String>>()?;
    let len = to_index(data.len() * itemsize).ok_or_else(|| TOO_LARGE.to_owned())?;
    let format = CString::new(format).map_err(|e| e.to_string())?;

    data.pin();
    let mut info = Box::new(BufferInfo {
        shape: shape.into_boxed_slice(),
        strides: strides.into_boxed_slice(),
        format,
        array: array.clone(),
    });

    *view = Py_buffer::new();
    view.buf = data.data_ptr() as *mut c_void;
    view.obj = Py_NewRef(ob);
    view.len = len;
    view.itemsize = itemsize as Py_ssize_t;
    view.readonly = 0;
    view.ndim = dims.len() as c_int;
    if flags & PyBUF_FORMAT == PyBUF_FORMAT {
        view.format = info.format.as_ptr() as *mut _;
    }
    if flags & PyBUF_ND == PyBUF_ND {
        view.shape = info.shape.as_mut_ptr();
    }
    if flags & PyBUF_STRIDES == PyBUF_STRIDES {
        view.strides = info.strides.as_mut_ptr();
    }
    view.internal = Box::into_raw(info) as *mut c_void;

    let live = LIVE_EXPORTS.fetch_add(1, Ordering::AcqRel) + 1;
    trace!(event = "buffer_export", ty = %array.ty(), len, live, "array buffer exported");
    Ok(())
}

/// `bf_releasebuffer` of bridged array types
///
/// # Safety
/// `view` must have been filled by [`array_getbuffer`]
pub unsafe extern "C" fn array_releasebuffer(_ob: *mut PyObject, view: *mut Py_buffer) {
    trampoline_void("bf_releasebuffer", || {
        if view.is_null() {
            return Ok(());
        }
        let internal = std::mem::replace(&mut (*view).internal, null_mut());
        if internal.is_null() {
            return Ok(());
        }
        let info = Box::from_raw(internal as *mut BufferInfo);
        if let Some(data) = info.array.as_array() {
            data.unpin();
        }
        (*view).shape = null_mut();
        (*view).strides = null_mut();
        (*view).format = null_mut();
        let live = LIVE_EXPORTS.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        trace!(event = "buffer_release", ty = %info.array.ty(), live, "array buffer released");
        drop(info);
        Ok(())
    });
}

unsafe fn raise_buffer_error(message: &str) {
    typebridge_runtime::set_error(PyExc_BufferError(), message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clr_object::wrap;
    use crate::managed::{core, Value};
    use crate::runtime::ffi::buffer::{PyBUF_FULL_RO, PyBUF_SIMPLE, PyBuffer_Release, PyObject_GetBuffer};
    use crate::testing::runtime;

    #[test]
    fn test_int_array_view_shape() {
        runtime(|| unsafe {
            let c = core();
            let array = ObjectRef::array_from(&c.int32, vec![Value::I32(1), Value::I32(2), Value::I32(3)]).unwrap();
            let ob = wrap(&array, &c.int32.make_array_type(1)).unwrap();
            let mut view = Py_buffer::new();
            assert_eq!(PyObject_GetBuffer(ob.as_ptr(), &mut view, PyBUF_FULL_RO), 0);
            assert_eq!(view.itemsize, 4);
            assert_eq!(view.len, 12);
            assert_eq!(view.ndim, 1);
            assert_eq!(view.readonly, 0);
            assert_eq!(*view.shape, 3);
            assert_eq!(*view.strides, 4);
            assert_eq!(std::ffi::CStr::from_ptr(view.format).to_str().unwrap(), "i");
            assert_eq!(*(view.buf as *const i32).add(2), 3);
            assert_eq!(array.as_array().unwrap().pin_count(), 1);

            PyBuffer_Release(&mut view);
            assert_eq!(array.as_array().unwrap().pin_count(), 0);
            assert!(view.internal.is_null());
            assert!(view.obj.is_null());
        });
    }

    #[test]
    fn test_simple_request_omits_shape() {
        runtime(|| unsafe {
            let c = core();
            let array = ObjectRef::new_array(&c.double, &[2, 3]);
            let ob = wrap(&array, &c.double.make_array_type(2)).unwrap();
            let mut view = Py_buffer::new();
            assert_eq!(PyObject_GetBuffer(ob.as_ptr(), &mut view, PyBUF_SIMPLE), 0);
            assert!(view.shape.is_null());
            assert!(view.format.is_null());
            assert_eq!(view.len, 48);
            let info = &*(view.internal as *const BufferInfo);
            assert_eq!(&info.strides[..], &[24, 8]);
            PyBuffer_Release(&mut view);
        });
    }

    #[test]
    fn test_string_arrays_refuse_export() {
        runtime(|| unsafe {
            let c = core();
            let array = ObjectRef::array_from(&c.string, vec![Value::string("a")]).unwrap();
            let ob = wrap(&array, &c.string.make_array_type(1)).unwrap();
            let mut view = Py_buffer::new();
            assert_eq!(PyObject_GetBuffer(ob.as_ptr(), &mut view, PyBUF_FULL_RO), -1);
            assert!(crate::exceptions::error_occurred());
            crate::runtime::ffi::error::PyErr_Clear();
            assert_eq!(array.as_array().unwrap().pin_count(), 0);
        });
    }
}
