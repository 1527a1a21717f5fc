//! Sequence iterators
//!
//! `PySeqIter` walks any object with `sq_item` until `IndexError`;
//! `PyListIter` reads list storage directly and tolerates resizing.

use core::mem::size_of;
use core::ptr::null_mut;
use core::sync::atomic::Ordering;

use crate::abstract_::PySequence_GetItem;
use crate::builtins::list::list_items;
use crate::errors::{PyErr_Clear, PyErr_ExceptionMatches, PyExc_IndexError, PyExc_StopIteration};
use crate::object::*;
use crate::refcount::{Py_CLEAR, Py_NewRef, Py_XDECREF};
use crate::typeobject::{free_instance, new_static_type, PyType_GenericAlloc};

global_ptr!(SEQ_ITER_TYPE, PySeqIter_Type, PyTypeObject);
global_ptr!(LIST_ITER_TYPE, PyListIter_Type, PyTypeObject);

#[inline]
unsafe fn state(o: *mut PyObject) -> *mut PySeqIterObject {
    o as *mut PySeqIterObject
}

unsafe fn iter_new(tp: *mut PyTypeObject, seq: *mut PyObject) -> *mut PyObject {
    let it = PyType_GenericAlloc(tp, 0);
    if it.is_null() {
        return null_mut();
    }
    (*state(it)).it_index = 0;
    (*state(it)).it_seq = Py_NewRef(seq);
    it
}

/// Iterator over `seq` driven by its `sq_item` slot
///
/// # Safety
/// `seq` must be a live object
#[no_mangle]
pub unsafe extern "C" fn PySeqIter_New(seq: *mut PyObject) -> *mut PyObject {
    iter_new(PySeqIter_Type(), seq)
}

pub(crate) unsafe fn list_iter_new(list: *mut PyObject) -> *mut PyObject {
    iter_new(PyListIter_Type(), list)
}

unsafe extern "C" fn iter_dealloc(o: *mut PyObject) {
    Py_XDECREF((*state(o)).it_seq);
    free_instance(o);
}

unsafe extern "C" fn iter_self(o: *mut PyObject) -> *mut PyObject {
    Py_NewRef(o)
}

unsafe extern "C" fn seqiter_next(o: *mut PyObject) -> *mut PyObject {
    let st = state(o);
    if (*st).it_seq.is_null() {
        return null_mut();
    }
    let item = PySequence_GetItem((*st).it_seq, (*st).it_index);
    if item.is_null() {
        if PyErr_ExceptionMatches(PyExc_IndexError()) != 0
            || PyErr_ExceptionMatches(PyExc_StopIteration()) != 0
        {
            PyErr_Clear();
            Py_CLEAR(&mut (*st).it_seq);
        }
        return null_mut();
    }
    (*st).it_index += 1;
    item
}

unsafe extern "C" fn listiter_next(o: *mut PyObject) -> *mut PyObject {
    let st = state(o);
    if (*st).it_seq.is_null() {
        return null_mut();
    }
    match list_items((*st).it_seq).get((*st).it_index as usize) {
        Some(&item) => {
            (*st).it_index += 1;
            Py_NewRef(item)
        }
        None => {
            Py_CLEAR(&mut (*st).it_seq);
            null_mut()
        }
    }
}

unsafe fn iter_type(name: &'static core::ffi::CStr, next: iternextfunc) -> *mut PyTypeObject {
    let tp = new_static_type(name, size_of::<PySeqIterObject>(), 0, 0);
    (*tp).tp_dealloc = Some(iter_dealloc);
    (*tp).tp_iter = Some(iter_self);
    (*tp).tp_iternext = Some(next);
    tp
}

pub(crate) unsafe fn init() {
    SEQ_ITER_TYPE.store(iter_type(c"iterator", seqiter_next), Ordering::Release);
    LIST_ITER_TYPE.store(iter_type(c"list_iterator", listiter_next), Ordering::Release);
}
