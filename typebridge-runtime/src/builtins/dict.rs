//! `dict` - insertion-ordered mapping
//!
//! Design: entries live in a boxed `Vec` scanned linearly with the cached hash
//! as a prefilter. Type dicts and instance dicts stay small, so a probe table
//! buys nothing here. String keys compare by text without a rich-compare call.

use core::ffi::{c_char, c_int, c_long, CStr};
use core::mem::size_of;
use core::ptr::null_mut;
use core::sync::atomic::Ordering;

use crate::abstract_::{PyObject_GetIter, PyObject_Hash, PyObject_Repr, PyObject_RichCompareBool};
use crate::builtins::list::list_from_vec;
use crate::builtins::long::PyBool_FromLong;
use crate::builtins::none::Py_NotImplemented;
use crate::builtins::tuple::tuple_from_vec;
use crate::builtins::unicode::{unicode_as_str, unicode_from_str};
use crate::errors::{PyErr_BadInternalCall, PyErr_Clear, PyErr_SetObject, PyExc_KeyError};
use crate::object::*;
use crate::refcount::{Py_DECREF, Py_NewRef, Py_XDECREF};
use crate::typeobject::{free_instance, leak_table, new_static_type, PyType_GenericAlloc};

global_ptr!(DICT_TYPE, PyDict_Type, PyTypeObject);

#[inline]
pub unsafe fn PyDict_Check(o: *mut PyObject) -> bool {
    PyType_HasFeature(Py_TYPE(o), Py_TPFLAGS_DICT_SUBCLASS)
}

#[inline]
unsafe fn entries<'a>(o: *mut PyObject) -> &'a mut Vec<DictEntry> {
    &mut *(*(o as *mut PyDictObject)).entries
}

#[inline]
unsafe fn sync_used(o: *mut PyObject) {
    (*(o as *mut PyDictObject)).ma_used = entries(o).len() as Py_ssize_t;
}

/// Position of `key`; Err when hashing or comparison raised
unsafe fn find(o: *mut PyObject, key: *mut PyObject, hash: Py_hash_t) -> Result<Option<usize>, ()> {
    let key_text = unicode_as_str(key);
    let count = entries(o).len();
    for i in 0..count {
        let Some(entry) = entries(o).get(i) else {
            break;
        };
        if entry.hash != hash {
            continue;
        }
        if entry.key == key {
            return Ok(Some(i));
        }
        if let (Some(a), Some(b)) = (key_text, unicode_as_str(entry.key)) {
            if a == b {
                return Ok(Some(i));
            }
            continue;
        }
        let candidate = Py_NewRef(entry.key);
        let eq = PyObject_RichCompareBool(candidate, key, Py_EQ);
        Py_DECREF(candidate);
        match eq {
            1 => return Ok(Some(i)),
            0 => {}
            _ => return Err(()),
        }
    }
    Ok(None)
}

/// Borrowed value for `key`, or null; never leaves an error set
///
/// # Safety
/// `o` must be a dict
pub unsafe fn dict_lookup(o: *mut PyObject, key: *mut PyObject) -> *mut PyObject {
    let hash = PyObject_Hash(key);
    if hash == -1 {
        PyErr_Clear();
        return null_mut();
    }
    match find(o, key, hash) {
        Ok(Some(i)) => entries(o)[i].value,
        Ok(None) => null_mut(),
        Err(()) => {
            PyErr_Clear();
            null_mut()
        }
    }
}

/// Snapshot of the entries as owned (key, value) pairs
pub unsafe fn dict_pairs(o: *mut PyObject) -> Vec<(*mut PyObject, *mut PyObject)> {
    entries(o)
        .iter()
        .map(|e| (Py_NewRef(e.key), Py_NewRef(e.value)))
        .collect()
}

#[no_mangle]
pub unsafe extern "C" fn PyDict_New() -> *mut PyObject {
    let o = PyType_GenericAlloc(PyDict_Type(), 0);
    if o.is_null() {
        return null_mut();
    }
    (*(o as *mut PyDictObject)).entries = Box::into_raw(Box::new(Vec::new()));
    o
}

/// Borrowed lookup that suppresses errors
///
/// # Safety
/// `o` must be a live object
#[no_mangle]
pub unsafe extern "C" fn PyDict_GetItem(o: *mut PyObject, key: *mut PyObject) -> *mut PyObject {
    if !PyDict_Check(o) {
        return null_mut();
    }
    dict_lookup(o, key)
}

/// Borrowed lookup; null with an error set when hashing/comparison failed
///
/// # Safety
/// `o` must be a live object
#[no_mangle]
pub unsafe extern "C" fn PyDict_GetItemWithError(o: *mut PyObject, key: *mut PyObject) -> *mut PyObject {
    if !PyDict_Check(o) {
        PyErr_BadInternalCall();
        return null_mut();
    }
    let hash = PyObject_Hash(key);
    if hash == -1 {
        return null_mut();
    }
    match find(o, key, hash) {
        Ok(Some(i)) => entries(o)[i].value,
        _ => null_mut(),
    }
}

/// # Safety
/// `o` must be a live object; `key` NUL-terminated UTF-8
#[no_mangle]
pub unsafe extern "C" fn PyDict_GetItemString(o: *mut PyObject, key: *const c_char) -> *mut PyObject {
    let k = unicode_from_str(&CStr::from_ptr(key).to_string_lossy());
    if k.is_null() {
        PyErr_Clear();
        return null_mut();
    }
    let v = PyDict_GetItem(o, k);
    Py_DECREF(k);
    v
}

/// Insert or replace; both references are borrowed
///
/// # Safety
/// `o` must be a live object
#[no_mangle]
pub unsafe extern "C" fn PyDict_SetItem(o: *mut PyObject, key: *mut PyObject, value: *mut PyObject) -> c_int {
    if !PyDict_Check(o) || key.is_null() || value.is_null() {
        PyErr_BadInternalCall();
        return -1;
    }
    let hash = PyObject_Hash(key);
    if hash == -1 {
        return -1;
    }
    match find(o, key, hash) {
        Err(()) => -1,
        Ok(Some(i)) => {
            let old = core::mem::replace(&mut entries(o)[i].value, Py_NewRef(value));
            Py_DECREF(old);
            0
        }
        Ok(None) => {
            entries(o).push(DictEntry {
                hash,
                key: Py_NewRef(key),
                value: Py_NewRef(value),
            });
            sync_used(o);
            0
        }
    }
}

/// # Safety
/// `o` must be a live object; `key` NUL-terminated UTF-8
#[no_mangle]
pub unsafe extern "C" fn PyDict_SetItemString(o: *mut PyObject, key: *const c_char, value: *mut PyObject) -> c_int {
    let k = unicode_from_str(&CStr::from_ptr(key).to_string_lossy());
    if k.is_null() {
        return -1;
    }
    let rc = PyDict_SetItem(o, k, value);
    Py_DECREF(k);
    rc
}

unsafe fn key_error(key: *mut PyObject) -> c_int {
    PyErr_SetObject(PyExc_KeyError(), key);
    -1
}

/// Remove `key`, raising `KeyError` when absent
///
/// # Safety
/// `o` must be a live object
#[no_mangle]
pub unsafe extern "C" fn PyDict_DelItem(o: *mut PyObject, key: *mut PyObject) -> c_int {
    if !PyDict_Check(o) {
        PyErr_BadInternalCall();
        return -1;
    }
    let hash = PyObject_Hash(key);
    if hash == -1 {
        return -1;
    }
    match find(o, key, hash) {
        Err(()) => -1,
        Ok(None) => key_error(key),
        Ok(Some(i)) => {
            let entry = entries(o).remove(i);
            sync_used(o);
            Py_DECREF(entry.key);
            Py_DECREF(entry.value);
            0
        }
    }
}

/// # Safety
/// `o` must be a live object; `key` NUL-terminated UTF-8
#[no_mangle]
pub unsafe extern "C" fn PyDict_DelItemString(o: *mut PyObject, key: *const c_char) -> c_int {
    let k = unicode_from_str(&CStr::from_ptr(key).to_string_lossy());
    if k.is_null() {
        return -1;
    }
    let rc = PyDict_DelItem(o, k);
    Py_DECREF(k);
    rc
}

/// # Safety
/// `o` must be a live object
#[no_mangle]
pub unsafe extern "C" fn PyDict_Contains(o: *mut PyObject, key: *mut PyObject) -> c_int {
    let hash = PyObject_Hash(key);
    if hash == -1 {
        return -1;
    }
    match find(o, key, hash) {
        Err(()) => -1,
        Ok(found) => found.is_some() as c_int,
    }
}

/// # Safety
/// `o` must be a live object
#[no_mangle]
pub unsafe extern "C" fn PyDict_Size(o: *mut PyObject) -> Py_ssize_t {
    if !PyDict_Check(o) {
        PyErr_BadInternalCall();
        return -1;
    }
    entries(o).len() as Py_ssize_t
}

/// # Safety
/// `o` must be a dict
#[no_mangle]
pub unsafe extern "C" fn PyDict_Keys(o: *mut PyObject) -> *mut PyObject {
    list_from_vec(entries(o).iter().map(|e| Py_NewRef(e.key)).collect())
}

/// # Safety
/// `o` must be a dict
#[no_mangle]
pub unsafe extern "C" fn PyDict_Values(o: *mut PyObject) -> *mut PyObject {
    list_from_vec(entries(o).iter().map(|e| Py_NewRef(e.value)).collect())
}

/// List of `(key, value)` tuples
///
/// # Safety
/// `o` must be a dict
#[no_mangle]
pub unsafe extern "C" fn PyDict_Items(o: *mut PyObject) -> *mut PyObject {
    let pairs = dict_pairs(o)
        .into_iter()
        .map(|(k, v)| tuple_from_vec(vec![k, v]))
        .collect();
    list_from_vec(pairs)
}

/// Iterate entries with borrowed key/value out-parameters
///
/// # Safety
/// `o` must be a dict; `pos` writable; `key`/`value` null or writable
#[no_mangle]
pub unsafe extern "C" fn PyDict_Next(
    o: *mut PyObject,
    pos: *mut Py_ssize_t,
    key: *mut *mut PyObject,
    value: *mut *mut PyObject,
) -> c_int {
    let Some(entry) = usize::try_from(*pos).ok().and_then(|i| entries(o).get(i)) else {
        return 0;
    };
    if !key.is_null() {
        *key = entry.key;
    }
    if !value.is_null() {
        *value = entry.value;
    }
    *pos += 1;
    1
}

/// Shallow copy
///
/// # Safety
/// `o` must be a dict
#[no_mangle]
pub unsafe extern "C" fn PyDict_Copy(o: *mut PyObject) -> *mut PyObject {
    let copy = PyDict_New();
    if copy.is_null() {
        return null_mut();
    }
    let cloned: Vec<DictEntry> = entries(o)
        .iter()
        .map(|e| DictEntry {
            hash: e.hash,
            key: Py_NewRef(e.key),
            value: Py_NewRef(e.value),
        })
        .collect();
    *entries(copy) = cloned;
    sync_used(copy);
    copy
}

/// # Safety
/// `o` must be a dict
#[no_mangle]
pub unsafe extern "C" fn PyDict_Clear(o: *mut PyObject) {
    let old = core::mem::take(entries(o));
    sync_used(o);
    for e in old {
        Py_DECREF(e.key);
        Py_DECREF(e.value);
    }
}

unsafe extern "C" fn dict_dealloc(o: *mut PyObject) {
    let raw = (*(o as *mut PyDictObject)).entries;
    if !raw.is_null() {
        for e in Box::from_raw(raw).into_iter() {
            Py_XDECREF(e.key);
            Py_XDECREF(e.value);
        }
    }
    free_instance(o);
}

unsafe extern "C" fn dict_repr(o: *mut PyObject) -> *mut PyObject {
    let mut parts = Vec::new();
    for (k, v) in dict_pairs(o) {
        let kr = PyObject_Repr(k);
        let vr = if kr.is_null() { null_mut() } else { PyObject_Repr(v) };
        Py_DECREF(k);
        Py_DECREF(v);
        if vr.is_null() {
            Py_XDECREF(kr);
            return null_mut();
        }
        parts.push(format!(
            "{}: {}",
            unicode_as_str(kr).unwrap_or(""),
            unicode_as_str(vr).unwrap_or("")
        ));
        Py_DECREF(kr);
        Py_DECREF(vr);
    }
    unicode_from_str(&format!("{{{}}}", parts.join(", ")))
}

unsafe extern "C" fn dict_length(o: *mut PyObject) -> Py_ssize_t {
    entries(o).len() as Py_ssize_t
}

unsafe extern "C" fn dict_subscript(o: *mut PyObject, key: *mut PyObject) -> *mut PyObject {
    let hash = PyObject_Hash(key);
    if hash == -1 {
        return null_mut();
    }
    match find(o, key, hash) {
        Ok(Some(i)) => Py_NewRef(entries(o)[i].value),
        Ok(None) => {
            key_error(key);
            null_mut()
        }
        Err(()) => null_mut(),
    }
}

unsafe extern "C" fn dict_ass_subscript(o: *mut PyObject, key: *mut PyObject, value: *mut PyObject) -> c_int {
    if value.is_null() {
        PyDict_DelItem(o, key)
    } else {
        PyDict_SetItem(o, key, value)
    }
}

unsafe extern "C" fn dict_iter(o: *mut PyObject) -> *mut PyObject {
    let keys = PyDict_Keys(o);
    if keys.is_null() {
        return null_mut();
    }
    let it = PyObject_GetIter(keys);
    Py_DECREF(keys);
    it
}

unsafe extern "C" fn dict_richcompare(a: *mut PyObject, b: *mut PyObject, op: c_int) -> *mut PyObject {
    if !PyDict_Check(a) || !PyDict_Check(b) || (op != Py_EQ && op != Py_NE) {
        return Py_NewRef(Py_NotImplemented());
    }
    let mut equal = entries(a).len() == entries(b).len();
    if equal {
        for (k, v) in dict_pairs(a) {
            let other = dict_lookup(b, k);
            let same = if other.is_null() {
                0
            } else {
                PyObject_RichCompareBool(v, other, Py_EQ)
            };
            Py_DECREF(k);
            Py_DECREF(v);
            if same < 0 {
                return null_mut();
            }
            if same == 0 {
                equal = false;
                break;
            }
        }
    }
    PyBool_FromLong((equal == (op == Py_EQ)) as c_long)
}

pub(crate) unsafe fn init() {
    let tp = new_static_type(
        c"dict",
        size_of::<PyDictObject>(),
        0,
        Py_TPFLAGS_BASETYPE | Py_TPFLAGS_DICT_SUBCLASS,
    );
    let mapping = leak_table::<PyMappingMethods>();
    (*mapping).mp_length = Some(dict_length);
    (*mapping).mp_subscript = Some(dict_subscript);
    (*mapping).mp_ass_subscript = Some(dict_ass_subscript);
    let seq = leak_table::<PySequenceMethods>();
    (*seq).sq_contains = Some(PyDict_Contains);
    (*tp).tp_as_mapping = mapping;
    (*tp).tp_as_sequence = seq;
    (*tp).tp_dealloc = Some(dict_dealloc);
    (*tp).tp_repr = Some(dict_repr);
    (*tp).tp_iter = Some(dict_iter);
    (*tp).tp_richcompare = Some(dict_richcompare);
    (*tp).tp_new = Some(dict_new);
    DICT_TYPE.store(tp, Ordering::Release);
}

unsafe extern "C" fn dict_new(tp: *mut PyTypeObject, _args: *mut PyObject, _kwds: *mut PyObject) -> *mut PyObject {
    if tp == PyDict_Type() {
        return PyDict_New();
    }
    let o = PyType_GenericAlloc(tp, 0);
    if !o.is_null() {
        (*(o as *mut PyDictObject)).entries = Box::into_raw(Box::new(Vec::new()));
    }
    o
}
