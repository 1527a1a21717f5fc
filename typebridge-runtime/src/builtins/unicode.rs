//! `str` - immutable text stored as owned, NUL-terminated UTF-8

use core::ffi::{c_char, c_int, c_long, c_void, CStr};
use core::mem::size_of;
use core::ptr::null_mut;
use core::sync::atomic::Ordering;

use crate::builtins::long::{compare, PyBool_FromLong};
use crate::builtins::none::Py_NotImplemented;
use crate::builtins::tuple::tuple_items;
use crate::errors::{raise_neg, raise_null, PyExc_IndexError, PyExc_TypeError, PyExc_ValueError};
use crate::abstract_::PyObject_Str;
use crate::memory::{PyMem_Free, PyMem_Malloc};
use crate::object::*;
use crate::refcount::Py_NewRef;
use crate::typeobject::{free_instance, leak_table, new_static_type, obj_type_name, PyType_GenericAlloc};

global_ptr!(UNICODE_TYPE, PyUnicode_Type, PyTypeObject);

#[inline]
pub unsafe fn PyUnicode_Check(o: *mut PyObject) -> bool {
    PyType_HasFeature(Py_TYPE(o), Py_TPFLAGS_UNICODE_SUBCLASS)
}

#[inline]
unsafe fn text(o: *mut PyObject) -> *mut PyUnicodeObject {
    o as *mut PyUnicodeObject
}

/// Borrow the text of a str object; None for any other object
pub unsafe fn unicode_as_str<'a>(o: *mut PyObject) -> Option<&'a str> {
    if o.is_null() || !PyUnicode_Check(o) {
        return None;
    }
    let t = text(o);
    let bytes = core::slice::from_raw_parts((*t).utf8 as *const u8, (*t).utf8_length as usize);
    core::str::from_utf8(bytes).ok()
}

/// New str object from Rust text
pub unsafe fn unicode_from_str(s: &str) -> *mut PyObject {
    let o = PyType_GenericAlloc(PyUnicode_Type(), 0);
    if o.is_null() {
        return null_mut();
    }
    let buf = PyMem_Malloc(s.len() + 1) as *mut u8;
    if buf.is_null() {
        crate::refcount::Py_DECREF(o);
        return crate::errors::PyErr_NoMemory();
    }
    core::ptr::copy_nonoverlapping(s.as_ptr(), buf, s.len());
    *buf.add(s.len()) = 0;
    let t = text(o);
    (*t).utf8 = buf as *mut c_char;
    (*t).utf8_length = s.len() as Py_ssize_t;
    (*t).length = s.chars().count() as Py_ssize_t;
    (*t).hash = -1;
    o
}

/// # Safety
/// `s` must be a NUL-terminated UTF-8 string
#[no_mangle]
pub unsafe extern "C" fn PyUnicode_FromString(s: *const c_char) -> *mut PyObject {
    match CStr::from_ptr(s).to_str() {
        Ok(s) => unicode_from_str(s),
        Err(_) => raise_null(PyExc_ValueError(), "invalid utf-8 in string"),
    }
}

/// # Safety
/// `s` must point at `size` readable bytes
#[no_mangle]
pub unsafe extern "C" fn PyUnicode_FromStringAndSize(s: *const c_char, size: Py_ssize_t) -> *mut PyObject {
    if size < 0 {
        return raise_null(PyExc_ValueError(), "negative size passed to PyUnicode_FromStringAndSize");
    }
    if s.is_null() {
        return unicode_from_str("");
    }
    let bytes = core::slice::from_raw_parts(s as *const u8, size as usize);
    match core::str::from_utf8(bytes) {
        Ok(s) => unicode_from_str(s),
        Err(_) => raise_null(PyExc_ValueError(), "invalid utf-8 in string"),
    }
}

/// # Safety
/// `s` must be a NUL-terminated UTF-8 string
#[no_mangle]
pub unsafe extern "C" fn PyUnicode_InternFromString(s: *const c_char) -> *mut PyObject {
    PyUnicode_FromString(s)
}

/// Borrowed UTF-8 buffer, valid while `o` lives
///
/// # Safety
/// `o` must be a live object
#[no_mangle]
pub unsafe extern "C" fn PyUnicode_AsUTF8(o: *mut PyObject) -> *const c_char {
    if !PyUnicode_Check(o) {
        raise_null(PyExc_TypeError(), format!("bad argument type: {}", obj_type_name(o)));
        return core::ptr::null();
    }
    (*text(o)).utf8
}

/// # Safety
/// `o` must be a live object; `size` null or writable
#[no_mangle]
pub unsafe extern "C" fn PyUnicode_AsUTF8AndSize(o: *mut PyObject, size: *mut Py_ssize_t) -> *const c_char {
    let p = PyUnicode_AsUTF8(o);
    if !p.is_null() && !size.is_null() {
        *size = (*text(o)).utf8_length;
    }
    p
}

/// Length in code points
///
/// # Safety
/// `o` must be a live object
#[no_mangle]
pub unsafe extern "C" fn PyUnicode_GetLength(o: *mut PyObject) -> Py_ssize_t {
    if !PyUnicode_Check(o) {
        return raise_neg(PyExc_TypeError(), "bad argument type") as Py_ssize_t;
    }
    (*text(o)).length
}

/// # Safety
/// Both must be live objects
#[no_mangle]
pub unsafe extern "C" fn PyUnicode_Concat(a: *mut PyObject, b: *mut PyObject) -> *mut PyObject {
    match (unicode_as_str(a), unicode_as_str(b)) {
        (Some(x), Some(y)) => unicode_from_str(&format!("{x}{y}")),
        _ => raise_null(
            PyExc_TypeError(),
            format!("can only concatenate str (not \"{}\") to str", obj_type_name(b)),
        ),
    }
}

/// Quote text the way the interpreter's `repr` does
pub fn quote(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// FNV-1a over the UTF-8 bytes
fn hash_text(s: &str) -> Py_hash_t {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in s.bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(0x0100_0000_01b3);
    }
    let h = h as Py_hash_t;
    if h == -1 {
        -2
    } else {
        h
    }
}

unsafe extern "C" fn unicode_dealloc(o: *mut PyObject) {
    PyMem_Free((*text(o)).utf8 as *mut c_void);
    free_instance(o);
}

unsafe extern "C" fn unicode_repr(o: *mut PyObject) -> *mut PyObject {
    unicode_from_str(&quote(unicode_as_str(o).unwrap_or("")))
}

unsafe extern "C" fn unicode_str(o: *mut PyObject) -> *mut PyObject {
    if Py_TYPE(o) == PyUnicode_Type() {
        Py_NewRef(o)
    } else {
        unicode_from_str(unicode_as_str(o).unwrap_or(""))
    }
}

unsafe extern "C" fn unicode_hash(o: *mut PyObject) -> Py_hash_t {
    let t = text(o);
    if (*t).hash == -1 {
        (*t).hash = hash_text(unicode_as_str(o).unwrap_or(""));
    }
    (*t).hash
}

unsafe extern "C" fn unicode_richcompare(a: *mut PyObject, b: *mut PyObject, op: c_int) -> *mut PyObject {
    match (unicode_as_str(a), unicode_as_str(b)) {
        (Some(x), Some(y)) => PyBool_FromLong(compare(x, y, op) as c_long),
        _ => Py_NewRef(Py_NotImplemented()),
    }
}

unsafe extern "C" fn unicode_length(o: *mut PyObject) -> Py_ssize_t {
    (*text(o)).length
}

unsafe extern "C" fn unicode_item(o: *mut PyObject, i: Py_ssize_t) -> *mut PyObject {
    let s = unicode_as_str(o).unwrap_or("");
    match usize::try_from(i).ok().and_then(|i| s.chars().nth(i)) {
        Some(c) => unicode_from_str(c.encode_utf8(&mut [0u8; 4])),
        None => raise_null(PyExc_IndexError(), "string index out of range"),
    }
}

unsafe extern "C" fn unicode_contains(o: *mut PyObject, needle: *mut PyObject) -> c_int {
    match (unicode_as_str(o), unicode_as_str(needle)) {
        (Some(hay), Some(n)) => hay.contains(n) as c_int,
        _ => raise_neg(
            PyExc_TypeError(),
            format!("'in <string>' requires string as left operand, not {}", obj_type_name(needle)),
        ),
    }
}

unsafe extern "C" fn unicode_new(_tp: *mut PyTypeObject, args: *mut PyObject, _kwds: *mut PyObject) -> *mut PyObject {
    let items = if args.is_null() { &[][..] } else { tuple_items(args) };
    match items {
        [] => unicode_from_str(""),
        [x] => PyObject_Str(*x),
        _ => raise_null(PyExc_TypeError(), "str() takes at most 1 argument"),
    }
}

pub(crate) unsafe fn init() {
    let tp = new_static_type(
        c"str",
        size_of::<PyUnicodeObject>(),
        0,
        Py_TPFLAGS_BASETYPE | Py_TPFLAGS_UNICODE_SUBCLASS,
    );
    let seq = leak_table::<PySequenceMethods>();
    (*seq).sq_length = Some(unicode_length);
    (*seq).sq_concat = Some(PyUnicode_Concat);
    (*seq).sq_item = Some(unicode_item);
    (*seq).sq_contains = Some(unicode_contains);
    (*tp).tp_as_sequence = seq;
    (*tp).tp_dealloc = Some(unicode_dealloc);
    (*tp).tp_repr = Some(unicode_repr);
    (*tp).tp_str = Some(unicode_str);
    (*tp).tp_hash = Some(unicode_hash);
    (*tp).tp_richcompare = Some(unicode_richcompare);
    (*tp).tp_new = Some(unicode_new);
    UNICODE_TYPE.store(tp, Ordering::Release);
}
