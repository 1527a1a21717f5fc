//! `module` objects and the process-wide module table

use core::ffi::{c_char, c_int, CStr};
use core::mem::{offset_of, size_of};
use core::ptr::null_mut;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::builtins::dict::{dict_lookup, PyDict_New, PyDict_SetItem, PyDict_SetItemString};
use crate::builtins::unicode::{unicode_as_str, unicode_from_str};
use crate::errors::{raise_neg, raise_null, PyErr_BadInternalCall, PyExc_SystemError, PyExc_TypeError};
use crate::object::*;
use crate::refcount::{Py_DECREF, Py_NewRef, Py_XDECREF};
use crate::typeobject::{free_instance, new_static_type, PyObject_TypeCheck, PyType_GenericAlloc};

global_ptr!(MODULE_TYPE, PyModule_Type, PyTypeObject);

static MODULES: AtomicPtr<PyObject> = AtomicPtr::new(null_mut());

#[inline]
pub unsafe fn PyModule_Check(o: *mut PyObject) -> bool {
    PyObject_TypeCheck(o, PyModule_Type())
}

#[inline]
unsafe fn module(o: *mut PyObject) -> *mut PyModuleObject {
    o as *mut PyModuleObject
}

/// New module named by the str `name`
///
/// # Safety
/// `name` must be a str
#[no_mangle]
pub unsafe extern "C" fn PyModule_NewObject(name: *mut PyObject) -> *mut PyObject {
    let m = PyType_GenericAlloc(PyModule_Type(), 0);
    if m.is_null() {
        return null_mut();
    }
    let dict = PyDict_New();
    if dict.is_null() {
        Py_DECREF(m);
        return null_mut();
    }
    (*module(m)).md_dict = dict;
    (*module(m)).md_name = Py_NewRef(name);
    if PyDict_SetItemString(dict, c"__name__".as_ptr(), name) < 0 {
        Py_DECREF(m);
        return null_mut();
    }
    m
}

/// # Safety
/// `name` must be NUL-terminated UTF-8
#[no_mangle]
pub unsafe extern "C" fn PyModule_New(name: *const c_char) -> *mut PyObject {
    let n = unicode_from_str(&CStr::from_ptr(name).to_string_lossy());
    if n.is_null() {
        return null_mut();
    }
    let m = PyModule_NewObject(n);
    Py_DECREF(n);
    m
}

/// Borrowed module namespace
///
/// # Safety
/// `m` must be a live object
#[no_mangle]
pub unsafe extern "C" fn PyModule_GetDict(m: *mut PyObject) -> *mut PyObject {
    if !PyModule_Check(m) {
        PyErr_BadInternalCall();
        return null_mut();
    }
    (*module(m)).md_dict
}

/// Borrowed name as UTF-8
///
/// # Safety
/// `m` must be a live object
#[no_mangle]
pub unsafe extern "C" fn PyModule_GetName(m: *mut PyObject) -> *const c_char {
    if !PyModule_Check(m) {
        raise_null(PyExc_TypeError(), "expected a module object");
        return core::ptr::null();
    }
    crate::builtins::unicode::PyUnicode_AsUTF8((*module(m)).md_name)
}

/// Bind `value` under `name`; the reference is stolen only on success
///
/// # Safety
/// `m` must be a live object; `name` NUL-terminated UTF-8
#[no_mangle]
pub unsafe extern "C" fn PyModule_AddObject(m: *mut PyObject, name: *const c_char, value: *mut PyObject) -> c_int {
    let rc = PyModule_AddObjectRef(m, name, value);
    if rc == 0 {
        Py_DECREF(value);
    }
    rc
}

/// Bind `value` under `name` without stealing
///
/// # Safety
/// `m` must be a live object; `name` NUL-terminated UTF-8
#[no_mangle]
pub unsafe extern "C" fn PyModule_AddObjectRef(m: *mut PyObject, name: *const c_char, value: *mut PyObject) -> c_int {
    if !PyModule_Check(m) {
        return raise_neg(PyExc_TypeError(), "PyModule_AddObjectRef() needs module as first arg");
    }
    if value.is_null() {
        return raise_neg(PyExc_SystemError(), "PyModule_AddObjectRef() must be called with an exception raised if value is NULL");
    }
    PyDict_SetItemString((*module(m)).md_dict, name, value)
}

/// Process-wide `name -> module` table (borrowed)
pub unsafe fn modules() -> *mut PyObject {
    MODULES.load(Ordering::Acquire)
}

/// Borrowed module registered under `name`, creating and registering it when absent
///
/// # Safety
/// `name` must be NUL-terminated UTF-8
#[no_mangle]
pub unsafe extern "C" fn PyImport_AddModule(name: *const c_char) -> *mut PyObject {
    let table = modules();
    let key = unicode_from_str(&CStr::from_ptr(name).to_string_lossy());
    if key.is_null() {
        return null_mut();
    }
    let existing = dict_lookup(table, key);
    if !existing.is_null() {
        Py_DECREF(key);
        return existing;
    }
    let m = PyModule_NewObject(key);
    if m.is_null() || PyDict_SetItem(table, key, m) < 0 {
        Py_XDECREF(m);
        Py_DECREF(key);
        return null_mut();
    }
    Py_DECREF(key);
    Py_DECREF(m);
    m
}

unsafe extern "C" fn module_dealloc(o: *mut PyObject) {
    Py_XDECREF((*module(o)).md_dict);
    Py_XDECREF((*module(o)).md_name);
    free_instance(o);
}

unsafe extern "C" fn module_repr(o: *mut PyObject) -> *mut PyObject {
    let name = unicode_as_str((*module(o)).md_name).unwrap_or("?");
    unicode_from_str(&format!("<module '{name}'>"))
}

pub(crate) unsafe fn init() {
    let tp = new_static_type(c"module", size_of::<PyModuleObject>(), 0, Py_TPFLAGS_BASETYPE);
    (*tp).tp_dictoffset = offset_of!(PyModuleObject, md_dict) as Py_ssize_t;
    (*tp).tp_dealloc = Some(module_dealloc);
    (*tp).tp_repr = Some(module_repr);
    MODULE_TYPE.store(tp, Ordering::Release);
}

/// Create the module table; runs after the builtin types are ready
pub(crate) unsafe fn init_module_table() -> c_int {
    let table = PyDict_New();
    if table.is_null() {
        return -1;
    }
    MODULES.store(table, Ordering::Release);
    0
}
