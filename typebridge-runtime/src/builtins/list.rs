//! `list` - growable sequence backed by a boxed `Vec`

use core::ffi::{c_int, c_long};
use core::mem::size_of;
use core::ptr::null_mut;
use core::sync::atomic::Ordering;

use crate::abstract_::{PyIter_Next, PyObject_GetIter, PyObject_RichCompareBool};
use crate::builtins::iter::list_iter_new;
use crate::builtins::long::PyBool_FromLong;
use crate::builtins::none::Py_NotImplemented;
use crate::builtins::tuple::{join_reprs, sequence_equal, tuple_from_vec, tuple_items};
use crate::builtins::unicode::unicode_from_str;
use crate::errors::{raise_neg, raise_null, PyErr_BadInternalCall, PyErr_Occurred, PyExc_IndexError, PyExc_TypeError};
use crate::object::*;
use crate::refcount::{Py_DECREF, Py_NewRef, Py_XDECREF};
use crate::typeobject::{free_instance, leak_table, new_static_type, PyType_GenericAlloc};

global_ptr!(LIST_TYPE, PyList_Type, PyTypeObject);

#[inline]
pub unsafe fn PyList_Check(o: *mut PyObject) -> bool {
    PyType_HasFeature(Py_TYPE(o), Py_TPFLAGS_LIST_SUBCLASS)
}

#[inline]
unsafe fn storage<'a>(o: *mut PyObject) -> &'a mut Vec<*mut PyObject> {
    &mut *(*(o as *mut PyListObject)).items
}

#[inline]
unsafe fn sync_size(o: *mut PyObject) {
    (*(o as *mut PyVarObject)).ob_size = storage(o).len() as Py_ssize_t;
}

/// Borrow the items of a list
pub unsafe fn list_items<'a>(o: *mut PyObject) -> &'a [*mut PyObject] {
    storage(o).as_slice()
}

/// List owning (stealing) every element of `items`
pub unsafe fn list_from_vec(items: Vec<*mut PyObject>) -> *mut PyObject {
    let o = PyType_GenericAlloc(PyList_Type(), 0);
    if o.is_null() {
        for item in items {
            Py_XDECREF(item);
        }
        return null_mut();
    }
    (*(o as *mut PyListObject)).items = Box::into_raw(Box::new(items));
    sync_size(o);
    o
}

/// New list with `size` null slots
#[no_mangle]
pub unsafe extern "C" fn PyList_New(size: Py_ssize_t) -> *mut PyObject {
    if size < 0 {
        PyErr_BadInternalCall();
        return null_mut();
    }
    list_from_vec(vec![null_mut(); size as usize])
}

/// # Safety
/// `o` must be a live object
#[no_mangle]
pub unsafe extern "C" fn PyList_Size(o: *mut PyObject) -> Py_ssize_t {
    if !PyList_Check(o) {
        PyErr_BadInternalCall();
        return -1;
    }
    storage(o).len() as Py_ssize_t
}

/// Borrowed item
///
/// # Safety
/// `o` must be a live object
#[no_mangle]
pub unsafe extern "C" fn PyList_GetItem(o: *mut PyObject, i: Py_ssize_t) -> *mut PyObject {
    if !PyList_Check(o) {
        PyErr_BadInternalCall();
        return null_mut();
    }
    match usize::try_from(i).ok().and_then(|i| storage(o).get(i)) {
        Some(&item) => item,
        None => raise_null(PyExc_IndexError(), "list index out of range"),
    }
}

/// Store an item, stealing `v`
///
/// # Safety
/// `o` must be a live object
#[no_mangle]
pub unsafe extern "C" fn PyList_SetItem(o: *mut PyObject, i: Py_ssize_t, v: *mut PyObject) -> c_int {
    if !PyList_Check(o) {
        Py_XDECREF(v);
        PyErr_BadInternalCall();
        return -1;
    }
    let Some(slot) = usize::try_from(i).ok().and_then(|i| storage(o).get_mut(i)) else {
        Py_XDECREF(v);
        return raise_neg(PyExc_IndexError(), "list assignment index out of range");
    };
    let old = core::mem::replace(slot, v);
    Py_XDECREF(old);
    0
}

/// Append a borrowed item
///
/// # Safety
/// `o` must be a live object
#[no_mangle]
pub unsafe extern "C" fn PyList_Append(o: *mut PyObject, v: *mut PyObject) -> c_int {
    if !PyList_Check(o) || v.is_null() {
        PyErr_BadInternalCall();
        return -1;
    }
    storage(o).push(Py_NewRef(v));
    sync_size(o);
    0
}

/// Insert a borrowed item before index `i` (clamped)
///
/// # Safety
/// `o` must be a live object
#[no_mangle]
pub unsafe extern "C" fn PyList_Insert(o: *mut PyObject, i: Py_ssize_t, v: *mut PyObject) -> c_int {
    if !PyList_Check(o) || v.is_null() {
        PyErr_BadInternalCall();
        return -1;
    }
    let items = storage(o);
    let len = items.len() as Py_ssize_t;
    let at = if i < 0 { (i + len).max(0) } else { i.min(len) };
    items.insert(at as usize, Py_NewRef(v));
    sync_size(o);
    0
}

/// # Safety
/// `o` must be a live object
#[no_mangle]
pub unsafe extern "C" fn PyList_AsTuple(o: *mut PyObject) -> *mut PyObject {
    if !PyList_Check(o) {
        PyErr_BadInternalCall();
        return null_mut();
    }
    tuple_from_vec(storage(o).iter().map(|&x| Py_NewRef(x)).collect())
}

unsafe extern "C" fn list_dealloc(o: *mut PyObject) {
    let items = (*(o as *mut PyListObject)).items;
    if !items.is_null() {
        let items = Box::from_raw(items);
        for item in items.into_iter() {
            Py_XDECREF(item);
        }
    }
    free_instance(o);
}

unsafe extern "C" fn list_repr(o: *mut PyObject) -> *mut PyObject {
    let snapshot: Vec<_> = list_items(o).to_vec();
    match join_reprs(&snapshot) {
        Some(inner) => unicode_from_str(&format!("[{inner}]")),
        None => null_mut(),
    }
}

unsafe extern "C" fn list_length(o: *mut PyObject) -> Py_ssize_t {
    storage(o).len() as Py_ssize_t
}

unsafe extern "C" fn list_item(o: *mut PyObject, i: Py_ssize_t) -> *mut PyObject {
    match usize::try_from(i).ok().and_then(|i| storage(o).get(i)) {
        Some(&item) => Py_NewRef(item),
        None => raise_null(PyExc_IndexError(), "list index out of range"),
    }
}

unsafe extern "C" fn list_ass_item(o: *mut PyObject, i: Py_ssize_t, v: *mut PyObject) -> c_int {
    let items = storage(o);
    let Some(idx) = usize::try_from(i).ok().filter(|&i| i < items.len()) else {
        return raise_neg(PyExc_IndexError(), "list assignment index out of range");
    };
    let old = if v.is_null() {
        let old = items.remove(idx);
        sync_size(o);
        old
    } else {
        core::mem::replace(&mut items[idx], Py_NewRef(v))
    };
    Py_XDECREF(old);
    0
}

unsafe extern "C" fn list_contains(o: *mut PyObject, v: *mut PyObject) -> c_int {
    let snapshot: Vec<_> = list_items(o).to_vec();
    for item in snapshot {
        match PyObject_RichCompareBool(item, v, Py_EQ) {
            0 => {}
            r => return r,
        }
    }
    0
}

unsafe extern "C" fn list_concat(a: *mut PyObject, b: *mut PyObject) -> *mut PyObject {
    if !PyList_Check(b) {
        return raise_null(PyExc_TypeError(), "can only concatenate list to list");
    }
    let joined = list_items(a)
        .iter()
        .chain(list_items(b))
        .map(|&x| Py_NewRef(x))
        .collect();
    list_from_vec(joined)
}

unsafe extern "C" fn list_richcompare(a: *mut PyObject, b: *mut PyObject, op: c_int) -> *mut PyObject {
    if !PyList_Check(a) || !PyList_Check(b) || (op != Py_EQ && op != Py_NE) {
        return Py_NewRef(Py_NotImplemented());
    }
    let eq = sequence_equal(list_items(a), list_items(b));
    if eq < 0 {
        return null_mut();
    }
    PyBool_FromLong(((eq == 1) == (op == Py_EQ)) as c_long)
}

unsafe extern "C" fn list_iter(o: *mut PyObject) -> *mut PyObject {
    list_iter_new(o)
}

/// Collect every item produced by iterating `o` (new references)
pub(crate) unsafe fn collect_iterable(o: *mut PyObject) -> Option<Vec<*mut PyObject>> {
    let it = PyObject_GetIter(o);
    if it.is_null() {
        return None;
    }
    let mut out = Vec::new();
    loop {
        let item = PyIter_Next(it);
        if item.is_null() {
            break;
        }
        out.push(item);
    }
    Py_DECREF(it);
    if !PyErr_Occurred().is_null() {
        for item in out {
            Py_DECREF(item);
        }
        return None;
    }
    Some(out)
}

unsafe extern "C" fn list_new(_tp: *mut PyTypeObject, args: *mut PyObject, _kwds: *mut PyObject) -> *mut PyObject {
    let items = if args.is_null() { &[][..] } else { tuple_items(args) };
    match items {
        [] => list_from_vec(Vec::new()),
        [x] => match collect_iterable(*x) {
            Some(v) => list_from_vec(v),
            None => null_mut(),
        },
        _ => raise_null(PyExc_TypeError(), "list expected at most 1 argument"),
    }
}

pub(crate) unsafe fn init() {
    let tp = new_static_type(
        c"list",
        size_of::<PyListObject>(),
        0,
        Py_TPFLAGS_BASETYPE | Py_TPFLAGS_LIST_SUBCLASS,
    );
    let seq = leak_table::<PySequenceMethods>();
    (*seq).sq_length = Some(list_length);
    (*seq).sq_concat = Some(list_concat);
    (*seq).sq_item = Some(list_item);
    (*seq).sq_ass_item = Some(list_ass_item);
    (*seq).sq_contains = Some(list_contains);
    (*tp).tp_as_sequence = seq;
    (*tp).tp_dealloc = Some(list_dealloc);
    (*tp).tp_repr = Some(list_repr);
    (*tp).tp_richcompare = Some(list_richcompare);
    (*tp).tp_iter = Some(list_iter);
    (*tp).tp_new = Some(list_new);
    LIST_TYPE.store(tp, Ordering::Release);
}
