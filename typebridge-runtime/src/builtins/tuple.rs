//! `tuple` - fixed-size sequence with inline item storage

use core::ffi::{c_int, c_long};
use core::mem::size_of;
use core::ptr::null_mut;
use core::sync::atomic::Ordering;

use crate::abstract_::{PyObject_Hash, PyObject_Repr, PyObject_RichCompareBool, PySequence_Tuple};
use crate::builtins::long::PyBool_FromLong;
use crate::builtins::none::Py_NotImplemented;
use crate::builtins::unicode::{unicode_as_str, unicode_from_str};
use crate::errors::{raise_neg, raise_null, PyErr_BadInternalCall, PyExc_IndexError, PyExc_TypeError};
use crate::object::*;
use crate::refcount::{Py_DECREF, Py_NewRef, Py_XDECREF};
use crate::typeobject::{free_instance, leak_table, new_static_type, PyType_GenericAlloc};

global_ptr!(TUPLE_TYPE, PyTuple_Type, PyTypeObject);

#[inline]
pub unsafe fn PyTuple_Check(o: *mut PyObject) -> bool {
    PyType_HasFeature(Py_TYPE(o), Py_TPFLAGS_TUPLE_SUBCLASS)
}

#[inline]
unsafe fn items_ptr(o: *mut PyObject) -> *mut *mut PyObject {
    (*(o as *mut PyTupleObject)).ob_item.as_mut_ptr()
}

/// Borrow the items of a tuple
pub unsafe fn tuple_items<'a>(o: *mut PyObject) -> &'a [*mut PyObject] {
    core::slice::from_raw_parts(items_ptr(o), Py_SIZE(o) as usize)
}

/// Tuple owning (stealing) every element of `items`
pub unsafe fn tuple_from_vec(items: Vec<*mut PyObject>) -> *mut PyObject {
    let t = PyTuple_New(items.len() as Py_ssize_t);
    if t.is_null() {
        for item in items {
            Py_XDECREF(item);
        }
        return null_mut();
    }
    let dst = items_ptr(t);
    for (i, item) in items.into_iter().enumerate() {
        *dst.add(i) = item;
    }
    t
}

/// New tuple with `size` null slots
#[no_mangle]
pub unsafe extern "C" fn PyTuple_New(size: Py_ssize_t) -> *mut PyObject {
    if size < 0 {
        PyErr_BadInternalCall();
        return null_mut();
    }
    PyType_GenericAlloc(PyTuple_Type(), size)
}

/// # Safety
/// `o` must be a live object
#[no_mangle]
pub unsafe extern "C" fn PyTuple_Size(o: *mut PyObject) -> Py_ssize_t {
    if !PyTuple_Check(o) {
        PyErr_BadInternalCall();
        return -1;
    }
    Py_SIZE(o)
}

/// Borrowed item
///
/// # Safety
/// `o` must be a live object
#[no_mangle]
pub unsafe extern "C" fn PyTuple_GetItem(o: *mut PyObject, i: Py_ssize_t) -> *mut PyObject {
    if !PyTuple_Check(o) {
        PyErr_BadInternalCall();
        return null_mut();
    }
    if i < 0 || i >= Py_SIZE(o) {
        return raise_null(PyExc_IndexError(), "tuple index out of range");
    }
    *items_ptr(o).add(i as usize)
}

/// Store an item, stealing `v`; only valid while the tuple is being built
///
/// # Safety
/// `o` must be a tuple not yet shared
#[no_mangle]
pub unsafe extern "C" fn PyTuple_SetItem(o: *mut PyObject, i: Py_ssize_t, v: *mut PyObject) -> c_int {
    if !PyTuple_Check(o) {
        Py_XDECREF(v);
        PyErr_BadInternalCall();
        return -1;
    }
    if i < 0 || i >= Py_SIZE(o) {
        Py_XDECREF(v);
        return raise_neg(PyExc_IndexError(), "tuple assignment index out of range");
    }
    let slot = items_ptr(o).add(i as usize);
    let old = *slot;
    *slot = v;
    Py_XDECREF(old);
    0
}

/// New tuple with items `[low, high)`
///
/// # Safety
/// `o` must be a tuple
#[no_mangle]
pub unsafe extern "C" fn PyTuple_GetSlice(o: *mut PyObject, low: Py_ssize_t, high: Py_ssize_t) -> *mut PyObject {
    let items = tuple_items(o);
    let len = items.len() as Py_ssize_t;
    let low = low.clamp(0, len) as usize;
    let high = high.clamp(low as Py_ssize_t, len) as usize;
    tuple_from_vec(items[low..high].iter().map(|&x| Py_NewRef(x)).collect())
}

unsafe extern "C" fn tuple_dealloc(o: *mut PyObject) {
    for &item in tuple_items(o) {
        Py_XDECREF(item);
    }
    free_instance(o);
}

/// Join the reprs of `items` with ", "
pub(crate) unsafe fn join_reprs(items: &[*mut PyObject]) -> Option<String> {
    let mut parts = Vec::with_capacity(items.len());
    for &item in items {
        let r = PyObject_Repr(item);
        if r.is_null() {
            return None;
        }
        parts.push(unicode_as_str(r).unwrap_or("").to_owned());
        Py_DECREF(r);
    }
    Some(parts.join(", "))
}

unsafe extern "C" fn tuple_repr(o: *mut PyObject) -> *mut PyObject {
    let items = tuple_items(o);
    let Some(inner) = join_reprs(items) else {
        return null_mut();
    };
    if items.len() == 1 {
        unicode_from_str(&format!("({inner},)"))
    } else {
        unicode_from_str(&format!("({inner})"))
    }
}

unsafe extern "C" fn tuple_hash(o: *mut PyObject) -> Py_hash_t {
    let mut acc: u64 = 0x27d4_eb2f_1656_67c5;
    for &item in tuple_items(o) {
        let h = PyObject_Hash(item);
        if h == -1 {
            return -1;
        }
        acc = (acc ^ h as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15).rotate_left(31);
    }
    let h = acc as Py_hash_t;
    if h == -1 {
        -2
    } else {
        h
    }
}

/// Element-wise equality shared by tuple and list
pub(crate) unsafe fn sequence_equal(a: &[*mut PyObject], b: &[*mut PyObject]) -> c_int {
    if a.len() != b.len() {
        return 0;
    }
    for (&x, &y) in a.iter().zip(b) {
        match PyObject_RichCompareBool(x, y, Py_EQ) {
            1 => {}
            r => return r,
        }
    }
    1
}

unsafe extern "C" fn tuple_richcompare(a: *mut PyObject, b: *mut PyObject, op: c_int) -> *mut PyObject {
    if !PyTuple_Check(a) || !PyTuple_Check(b) || (op != Py_EQ && op != Py_NE) {
        return Py_NewRef(Py_NotImplemented());
    }
    let eq = sequence_equal(tuple_items(a), tuple_items(b));
    if eq < 0 {
        return null_mut();
    }
    PyBool_FromLong(((eq == 1) == (op == Py_EQ)) as c_long)
}

unsafe extern "C" fn tuple_length(o: *mut PyObject) -> Py_ssize_t {
    Py_SIZE(o)
}

unsafe extern "C" fn tuple_item(o: *mut PyObject, i: Py_ssize_t) -> *mut PyObject {
    if i < 0 || i >= Py_SIZE(o) {
        return raise_null(PyExc_IndexError(), "tuple index out of range");
    }
    Py_NewRef(*items_ptr(o).add(i as usize))
}

unsafe extern "C" fn tuple_contains(o: *mut PyObject, v: *mut PyObject) -> c_int {
    for &item in tuple_items(o) {
        match PyObject_RichCompareBool(item, v, Py_EQ) {
            0 => {}
            r => return r,
        }
    }
    0
}

unsafe extern "C" fn tuple_concat(a: *mut PyObject, b: *mut PyObject) -> *mut PyObject {
    if !PyTuple_Check(b) {
        return raise_null(PyExc_TypeError(), "can only concatenate tuple to tuple");
    }
    let joined = tuple_items(a)
        .iter()
        .chain(tuple_items(b))
        .map(|&x| Py_NewRef(x))
        .collect();
    tuple_from_vec(joined)
}

unsafe extern "C" fn tuple_new(_tp: *mut PyTypeObject, args: *mut PyObject, _kwds: *mut PyObject) -> *mut PyObject {
    let items = if args.is_null() { &[][..] } else { tuple_items(args) };
    match items {
        [] => PyTuple_New(0),
        [x] => PySequence_Tuple(*x),
        _ => raise_null(PyExc_TypeError(), "tuple expected at most 1 argument"),
    }
}

pub(crate) unsafe fn init() {
    let tp = new_static_type(
        c"tuple",
        size_of::<PyTupleObject>(),
        size_of::<*mut PyObject>(),
        Py_TPFLAGS_BASETYPE | Py_TPFLAGS_TUPLE_SUBCLASS,
    );
    let seq = leak_table::<PySequenceMethods>();
    (*seq).sq_length = Some(tuple_length);
    (*seq).sq_concat = Some(tuple_concat);
    (*seq).sq_item = Some(tuple_item);
    (*seq).sq_contains = Some(tuple_contains);
    (*tp).tp_as_sequence = seq;
    (*tp).tp_dealloc = Some(tuple_dealloc);
    (*tp).tp_repr = Some(tuple_repr);
    (*tp).tp_hash = Some(tuple_hash);
    (*tp).tp_richcompare = Some(tuple_richcompare);
    (*tp).tp_new = Some(tuple_new);
    TUPLE_TYPE.store(tp, Ordering::Release);
}
