//! `builtin_function_or_method` - native callables described by a `PyMethodDef`

use core::ffi::CStr;
use core::mem::size_of;
use core::ptr::null_mut;
use core::sync::atomic::Ordering;

use crate::builtins::dict::PyDict_Size;
use crate::builtins::tuple::tuple_items;
use crate::builtins::unicode::unicode_from_str;
use crate::errors::{raise_null, PyErr_BadInternalCall, PyExc_SystemError, PyExc_TypeError};
use crate::object::*;
use crate::refcount::{Py_XDECREF, Py_XINCREF};
use crate::typeobject::{free_instance, new_static_type, PyObject_TypeCheck, PyType_GenericAlloc};

global_ptr!(CFUNCTION_TYPE, PyCFunction_Type, PyTypeObject);

#[inline]
pub unsafe fn PyCFunction_Check(o: *mut PyObject) -> bool {
    PyObject_TypeCheck(o, PyCFunction_Type())
}

#[inline]
unsafe fn func(o: *mut PyObject) -> *mut PyCFunctionObject {
    o as *mut PyCFunctionObject
}

/// New native callable; `ml` must outlive every function built from it
///
/// # Safety
/// `ml` must be a valid, `'static` method definition
#[no_mangle]
pub unsafe extern "C" fn PyCFunction_NewEx(
    ml: *const PyMethodDef,
    slf: *mut PyObject,
    module: *mut PyObject,
) -> *mut PyObject {
    if ml.is_null() || (*ml).ml_meth.is_null() {
        PyErr_BadInternalCall();
        return null_mut();
    }
    let o = PyType_GenericAlloc(PyCFunction_Type(), 0);
    if o.is_null() {
        return null_mut();
    }
    Py_XINCREF(slf);
    Py_XINCREF(module);
    (*func(o)).m_ml = ml;
    (*func(o)).m_self = slf;
    (*func(o)).m_module = module;
    o
}

/// # Safety
/// See [`PyCFunction_NewEx`]
#[no_mangle]
pub unsafe extern "C" fn PyCFunction_New(ml: *const PyMethodDef, slf: *mut PyObject) -> *mut PyObject {
    PyCFunction_NewEx(ml, slf, null_mut())
}

/// Borrowed `self` the function was bound with
///
/// # Safety
/// `o` must be a builtin function
#[no_mangle]
pub unsafe extern "C" fn PyCFunction_GetSelf(o: *mut PyObject) -> *mut PyObject {
    (*func(o)).m_self
}

unsafe fn name<'a>(o: *mut PyObject) -> &'a str {
    let ml = (*func(o)).m_ml;
    if (*ml).ml_name.is_null() {
        return "?";
    }
    CStr::from_ptr((*ml).ml_name).to_str().unwrap_or("?")
}

unsafe extern "C" fn cfunction_call(o: *mut PyObject, args: *mut PyObject, kwargs: *mut PyObject) -> *mut PyObject {
    let ml = (*func(o)).m_ml;
    let slf = (*func(o)).m_self;
    let flags = (*ml).ml_flags;
    let meth = (*ml).ml_meth;
    let has_kwargs = !kwargs.is_null() && PyDict_Size(kwargs) > 0;

    if flags & METH_KEYWORDS != 0 {
        let f: PyCFunctionWithKeywords = core::mem::transmute(meth);
        return f(slf, args, kwargs);
    }
    if has_kwargs {
        return raise_null(PyExc_TypeError(), format!("{}() takes no keyword arguments", name(o)));
    }
    let f: PyCFunction = core::mem::transmute(meth);
    let positional = tuple_items(args);
    match flags & (METH_VARARGS | METH_NOARGS | METH_O) {
        METH_VARARGS => f(slf, args),
        METH_NOARGS => {
            if !positional.is_empty() {
                return raise_null(
                    PyExc_TypeError(),
                    format!("{}() takes no arguments ({} given)", name(o), positional.len()),
                );
            }
            f(slf, null_mut())
        }
        METH_O => match positional {
            [arg] => f(slf, *arg),
            _ => raise_null(
                PyExc_TypeError(),
                format!("{}() takes exactly one argument ({} given)", name(o), positional.len()),
            ),
        },
        _ => raise_null(PyExc_SystemError(), format!("{}() has bad call flags", name(o))),
    }
}

unsafe extern "C" fn cfunction_dealloc(o: *mut PyObject) {
    Py_XDECREF((*func(o)).m_self);
    Py_XDECREF((*func(o)).m_module);
    free_instance(o);
}

unsafe extern "C" fn cfunction_repr(o: *mut PyObject) -> *mut PyObject {
    unicode_from_str(&format!("<built-in function {}>", name(o)))
}

pub(crate) unsafe fn init() {
    let tp = new_static_type(c"builtin_function_or_method", size_of::<PyCFunctionObject>(), 0, 0);
    (*tp).tp_dealloc = Some(cfunction_dealloc);
    (*tp).tp_repr = Some(cfunction_repr);
    (*tp).tp_call = Some(cfunction_call);
    CFUNCTION_TYPE.store(tp, Ordering::Release);
}
