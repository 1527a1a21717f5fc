//! `int` and `bool`
//!
//! Values are stored as `i128`, wide enough for every 64-bit host integer in
//! either signedness. Arithmetic that leaves that range raises `OverflowError`
//! rather than promoting to arbitrary precision.

use core::ffi::{c_int, c_long, c_ulong, c_ulonglong, c_longlong};
use core::mem::size_of;
use core::ptr::null_mut;
use core::sync::atomic::Ordering;

use crate::builtins::float::{float_value, PyFloat_Check, PyFloat_FromDouble};
use crate::builtins::none::{Py_None, Py_NotImplemented};
use crate::builtins::tuple::tuple_items;
use crate::builtins::unicode::{unicode_as_str, unicode_from_str, PyUnicode_Check};
use crate::errors::{
    raise_null, set_error, PyExc_OverflowError, PyExc_TypeError, PyExc_ValueError,
    PyExc_ZeroDivisionError,
};
use crate::abstract_::PyObject_IsTrue;
use crate::object::*;
use crate::refcount::{Py_DECREF, Py_NewRef, IMMORTAL_REFCNT};
use crate::typeobject::{free_instance, leak_table, new_static_type, obj_type_name, PyType_GenericAlloc};

global_ptr!(LONG_TYPE, PyLong_Type, PyTypeObject);
global_ptr!(BOOL_TYPE, PyBool_Type, PyTypeObject);
global_ptr!(TRUE, Py_True, PyObject);
global_ptr!(FALSE, Py_False, PyObject);

#[inline]
pub unsafe fn PyLong_Check(o: *mut PyObject) -> bool {
    PyType_HasFeature(Py_TYPE(o), Py_TPFLAGS_LONG_SUBCLASS)
}

#[inline]
pub unsafe fn PyLong_CheckExact(o: *mut PyObject) -> bool {
    Py_TYPE(o) == PyLong_Type()
}

#[inline]
pub unsafe fn PyBool_Check(o: *mut PyObject) -> bool {
    Py_TYPE(o) == PyBool_Type()
}

/// Stored value of an int (or bool); caller checks the type
#[inline]
pub unsafe fn long_value(o: *mut PyObject) -> i128 {
    (*(o as *mut PyLongObject)).value
}

/// New int object from any value in range
pub unsafe fn long_from_i128(value: i128) -> *mut PyObject {
    let o = PyType_GenericAlloc(PyLong_Type(), 0);
    if o.is_null() {
        return null_mut();
    }
    (*(o as *mut PyLongObject)).value = value;
    o
}

#[no_mangle]
pub unsafe extern "C" fn PyLong_FromLong(v: c_long) -> *mut PyObject {
    long_from_i128(v as i128)
}

#[no_mangle]
pub unsafe extern "C" fn PyLong_FromUnsignedLong(v: c_ulong) -> *mut PyObject {
    long_from_i128(v as i128)
}

#[no_mangle]
pub unsafe extern "C" fn PyLong_FromLongLong(v: c_longlong) -> *mut PyObject {
    long_from_i128(v as i128)
}

#[no_mangle]
pub unsafe extern "C" fn PyLong_FromUnsignedLongLong(v: c_ulonglong) -> *mut PyObject {
    long_from_i128(v as i128)
}

#[no_mangle]
pub unsafe extern "C" fn PyLong_FromSsize_t(v: Py_ssize_t) -> *mut PyObject {
    long_from_i128(v as i128)
}

#[no_mangle]
pub unsafe extern "C" fn PyLong_FromSize_t(v: usize) -> *mut PyObject {
    long_from_i128(v as i128)
}

/// Truncating conversion from a float
#[no_mangle]
pub unsafe extern "C" fn PyLong_FromDouble(v: f64) -> *mut PyObject {
    if v.is_nan() {
        return raise_null(PyExc_ValueError(), "cannot convert float NaN to integer");
    }
    if v.is_infinite() {
        return raise_null(PyExc_OverflowError(), "cannot convert float infinity to integer");
    }
    let t = v.trunc();
    if t < i128::MIN as f64 || t >= i128::MAX as f64 {
        return raise_null(PyExc_OverflowError(), "int too large");
    }
    long_from_i128(t as i128)
}

/// Integer value of `o`, via `__index__` for non-int objects
pub unsafe fn index_value(o: *mut PyObject) -> Option<i128> {
    if PyLong_Check(o) {
        return Some(long_value(o));
    }
    let number = (*Py_TYPE(o)).tp_as_number;
    if let Some(index) = number.as_ref().and_then(|n| n.nb_index) {
        let r = index(o);
        if r.is_null() {
            return None;
        }
        if !PyLong_Check(r) {
            Py_DECREF(r);
            set_error(PyExc_TypeError(), "__index__ returned non-int");
            return None;
        }
        let v = long_value(r);
        Py_DECREF(r);
        return Some(v);
    }
    set_error(
        PyExc_TypeError(),
        format!("'{}' object cannot be interpreted as an integer", obj_type_name(o)),
    );
    None
}

/// Signed 64-bit value; reports out-of-range through `overflow` without raising
///
/// # Safety
/// `o` must be a live object, `overflow` writable
#[no_mangle]
pub unsafe extern "C" fn PyLong_AsLongLongAndOverflow(o: *mut PyObject, overflow: *mut c_int) -> c_longlong {
    *overflow = 0;
    let Some(v) = index_value(o) else {
        return -1;
    };
    match i64::try_from(v) {
        Ok(x) => x,
        Err(_) => {
            *overflow = if v < 0 { -1 } else { 1 };
            -1
        }
    }
}

/// # Safety
/// `o` must be a live object
#[no_mangle]
pub unsafe extern "C" fn PyLong_AsLongLong(o: *mut PyObject) -> c_longlong {
    let Some(v) = index_value(o) else {
        return -1;
    };
    match i64::try_from(v) {
        Ok(x) => x,
        Err(_) => {
            set_error(PyExc_OverflowError(), "Python int too large to convert to C long");
            -1
        }
    }
}

/// # Safety
/// `o` must be a live object
#[no_mangle]
pub unsafe extern "C" fn PyLong_AsLong(o: *mut PyObject) -> c_long {
    let Some(v) = index_value(o) else {
        return -1;
    };
    match c_long::try_from(v) {
        Ok(x) => x,
        Err(_) => {
            set_error(PyExc_OverflowError(), "Python int too large to convert to C long");
            -1
        }
    }
}

/// # Safety
/// `o` must be a live object
#[no_mangle]
pub unsafe extern "C" fn PyLong_AsSsize_t(o: *mut PyObject) -> Py_ssize_t {
    let Some(v) = index_value(o) else {
        return -1;
    };
    match Py_ssize_t::try_from(v) {
        Ok(x) => x,
        Err(_) => {
            set_error(PyExc_OverflowError(), "Python int too large to convert to C ssize_t");
            -1
        }
    }
}

unsafe fn as_unsigned(o: *mut PyObject, max: u128) -> Option<u128> {
    let v = index_value(o)?;
    if v < 0 {
        set_error(PyExc_OverflowError(), "can't convert negative int to unsigned");
        return None;
    }
    let v = v as u128;
    if v > max {
        set_error(PyExc_OverflowError(), "int too big to convert");
        return None;
    }
    Some(v)
}

/// # Safety
/// `o` must be a live object
#[no_mangle]
pub unsafe extern "C" fn PyLong_AsUnsignedLongLong(o: *mut PyObject) -> c_ulonglong {
    as_unsigned(o, u64::MAX as u128).map_or(u64::MAX, |v| v as u64)
}

/// # Safety
/// `o` must be a live object
#[no_mangle]
pub unsafe extern "C" fn PyLong_AsSize_t(o: *mut PyObject) -> usize {
    as_unsigned(o, usize::MAX as u128).map_or(usize::MAX, |v| v as usize)
}

/// # Safety
/// `o` must be a live object
#[no_mangle]
pub unsafe extern "C" fn PyLong_AsDouble(o: *mut PyObject) -> f64 {
    match index_value(o) {
        Some(v) => v as f64,
        None => -1.0,
    }
}

#[no_mangle]
pub unsafe extern "C" fn PyBool_FromLong(v: c_long) -> *mut PyObject {
    Py_NewRef(if v != 0 { Py_True() } else { Py_False() })
}

/// Hash shared with integral floats (reduction modulo 2**61 - 1)
pub(crate) fn hash_i128(v: i128) -> Py_hash_t {
    const MODULUS: u128 = (1 << 61) - 1;
    let m = (v.unsigned_abs() % MODULUS) as Py_hash_t;
    let h = if v < 0 { -m } else { m };
    if h == -1 {
        -2
    } else {
        h
    }
}

// ============================================================================
// Slots
// ============================================================================

unsafe extern "C" fn long_dealloc(o: *mut PyObject) {
    free_instance(o);
}

unsafe extern "C" fn long_repr(o: *mut PyObject) -> *mut PyObject {
    unicode_from_str(&long_value(o).to_string())
}

unsafe extern "C" fn bool_repr(o: *mut PyObject) -> *mut PyObject {
    unicode_from_str(if long_value(o) != 0 { "True" } else { "False" })
}

unsafe extern "C" fn long_hash(o: *mut PyObject) -> Py_hash_t {
    hash_i128(long_value(o))
}

unsafe fn overflow() -> *mut PyObject {
    raise_null(PyExc_OverflowError(), "integer overflow")
}

unsafe fn not_implemented() -> *mut PyObject {
    Py_NewRef(Py_NotImplemented())
}

macro_rules! int_binop {
    ($name:ident, |$a:ident, $b:ident| $body:expr) => {
        unsafe extern "C" fn $name(x: *mut PyObject, y: *mut PyObject) -> *mut PyObject {
            if !PyLong_Check(x) || !PyLong_Check(y) {
                return not_implemented();
            }
            let ($a, $b) = (long_value(x), long_value(y));
            $body
        }
    };
}

int_binop!(long_add, |a, b| a.checked_add(b).map_or_else(|| overflow(), |v| long_from_i128(v)));
int_binop!(long_sub, |a, b| a.checked_sub(b).map_or_else(|| overflow(), |v| long_from_i128(v)));
int_binop!(long_mul, |a, b| a.checked_mul(b).map_or_else(|| overflow(), |v| long_from_i128(v)));
int_binop!(long_and, |a, b| long_from_i128(a & b));
int_binop!(long_or, |a, b| long_from_i128(a | b));
int_binop!(long_xor, |a, b| long_from_i128(a ^ b));

int_binop!(long_floor_divide, |a, b| {
    if b == 0 {
        return raise_null(PyExc_ZeroDivisionError(), "integer division or modulo by zero");
    }
    match a.checked_div(b) {
        Some(q) => {
            let q = if a % b != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q };
            long_from_i128(q)
        }
        None => overflow(),
    }
});

int_binop!(long_remainder, |a, b| {
    if b == 0 {
        return raise_null(PyExc_ZeroDivisionError(), "integer division or modulo by zero");
    }
    let r = a.checked_rem(b).unwrap_or(0);
    let r = if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r };
    long_from_i128(r)
});

int_binop!(long_true_divide, |a, b| {
    if b == 0 {
        return raise_null(PyExc_ZeroDivisionError(), "division by zero");
    }
    PyFloat_FromDouble(a as f64 / b as f64)
});

int_binop!(long_lshift, |a, b| {
    if b < 0 {
        return raise_null(PyExc_ValueError(), "negative shift count");
    }
    match u32::try_from(b).ok().and_then(|s| a.checked_shl(s)) {
        Some(v) if (v >> b) == a => long_from_i128(v),
        _ if a == 0 => long_from_i128(0),
        _ => overflow(),
    }
});

int_binop!(long_rshift, |a, b| {
    if b < 0 {
        return raise_null(PyExc_ValueError(), "negative shift count");
    }
    let shift = b.min(127) as u32;
    long_from_i128(a >> shift)
});

unsafe extern "C" fn long_power(x: *mut PyObject, y: *mut PyObject, z: *mut PyObject) -> *mut PyObject {
    if !PyLong_Check(x) || !PyLong_Check(y) {
        return not_implemented();
    }
    let (a, b) = (long_value(x), long_value(y));
    if b < 0 {
        return PyFloat_FromDouble((a as f64).powf(b as f64));
    }
    let Ok(exp) = u32::try_from(b) else {
        return overflow();
    };
    if !z.is_null() && z != Py_None() {
        if !PyLong_Check(z) {
            return not_implemented();
        }
        let m = long_value(z);
        if m == 0 {
            return raise_null(PyExc_ValueError(), "pow() 3rd argument cannot be 0");
        }
        let mut result: i128 = 1;
        let mut base = a.rem_euclid(m);
        let mut e = exp;
        while e > 0 {
            if e & 1 == 1 {
                result = match result.checked_mul(base) {
                    Some(v) => v.rem_euclid(m),
                    None => return overflow(),
                };
            }
            base = match base.checked_mul(base) {
                Some(v) => v.rem_euclid(m),
                None => return overflow(),
            };
            e >>= 1;
        }
        return long_from_i128(result);
    }
    a.checked_pow(exp).map_or_else(|| overflow(), |v| long_from_i128(v))
}

unsafe extern "C" fn long_negative(o: *mut PyObject) -> *mut PyObject {
    long_value(o).checked_neg().map_or_else(|| overflow(), |v| long_from_i128(v))
}

unsafe extern "C" fn long_positive(o: *mut PyObject) -> *mut PyObject {
    long_int(o)
}

unsafe extern "C" fn long_absolute(o: *mut PyObject) -> *mut PyObject {
    long_value(o).checked_abs().map_or_else(|| overflow(), |v| long_from_i128(v))
}

unsafe extern "C" fn long_invert(o: *mut PyObject) -> *mut PyObject {
    long_from_i128(!long_value(o))
}

unsafe extern "C" fn long_bool(o: *mut PyObject) -> c_int {
    (long_value(o) != 0) as c_int
}

/// Exact `int` copy (bool becomes a plain int)
unsafe extern "C" fn long_int(o: *mut PyObject) -> *mut PyObject {
    if PyLong_CheckExact(o) {
        Py_NewRef(o)
    } else {
        long_from_i128(long_value(o))
    }
}

unsafe extern "C" fn long_float(o: *mut PyObject) -> *mut PyObject {
    PyFloat_FromDouble(long_value(o) as f64)
}

pub(crate) fn compare<T: PartialOrd>(a: T, b: T, op: c_int) -> bool {
    match op {
        Py_LT => a < b,
        Py_LE => a <= b,
        Py_EQ => a == b,
        Py_NE => a != b,
        Py_GT => a > b,
        _ => a >= b,
    }
}

unsafe extern "C" fn long_richcompare(a: *mut PyObject, b: *mut PyObject, op: c_int) -> *mut PyObject {
    if !PyLong_Check(a) {
        return not_implemented();
    }
    let result = if PyLong_Check(b) {
        compare(long_value(a), long_value(b), op)
    } else if PyFloat_Check(b) {
        compare(long_value(a) as f64, float_value(b), op)
    } else {
        return not_implemented();
    };
    PyBool_FromLong(result as c_long)
}

unsafe fn parse_int(text: &str) -> *mut PyObject {
    let cleaned: String = text.trim().chars().filter(|&c| c != '_').collect();
    match cleaned.parse::<i128>() {
        Ok(v) => long_from_i128(v),
        Err(_) => raise_null(
            PyExc_ValueError(),
            format!("invalid literal for int() with base 10: '{}'", text),
        ),
    }
}

unsafe extern "C" fn long_new(tp: *mut PyTypeObject, args: *mut PyObject, _kwds: *mut PyObject) -> *mut PyObject {
    let items = if args.is_null() { &[][..] } else { tuple_items(args) };
    let value = match items {
        [] => long_from_i128(0),
        [x] if PyLong_Check(*x) => long_int(*x),
        [x] if PyFloat_Check(*x) => PyLong_FromDouble(float_value(*x)),
        [x] if PyUnicode_Check(*x) => parse_int(unicode_as_str(*x).unwrap_or("")),
        [x] => match index_value(*x) {
            Some(v) => long_from_i128(v),
            None => null_mut(),
        },
        _ => return raise_null(PyExc_TypeError(), "int() takes at most 1 argument"),
    };
    if value.is_null() || tp == PyLong_Type() {
        return value;
    }
    let v = long_value(value);
    Py_DECREF(value);
    let o = PyType_GenericAlloc(tp, 0);
    if !o.is_null() {
        (*(o as *mut PyLongObject)).value = v;
    }
    o
}

unsafe extern "C" fn bool_new(_tp: *mut PyTypeObject, args: *mut PyObject, _kwds: *mut PyObject) -> *mut PyObject {
    let items = if args.is_null() { &[][..] } else { tuple_items(args) };
    match items {
        [] => PyBool_FromLong(0),
        [x] => match PyObject_IsTrue(*x) {
            r if r < 0 => null_mut(),
            r => PyBool_FromLong(r as c_long),
        },
        _ => raise_null(PyExc_TypeError(), "bool() takes at most 1 argument"),
    }
}

unsafe fn bool_singleton(value: i128) -> *mut PyObject {
    let o: *mut PyLongObject = Box::into_raw(Box::new(core::mem::zeroed()));
    (*o).ob_base.ob_refcnt = IMMORTAL_REFCNT;
    (*o).ob_base.ob_type = PyBool_Type();
    (*o).value = value;
    o as *mut PyObject
}

pub(crate) unsafe fn init() {
    let tp = new_static_type(
        c"int",
        size_of::<PyLongObject>(),
        0,
        Py_TPFLAGS_BASETYPE | Py_TPFLAGS_LONG_SUBCLASS,
    );
    let number = leak_table::<PyNumberMethods>();
    (*number).nb_add = Some(long_add);
    (*number).nb_subtract = Some(long_sub);
    (*number).nb_multiply = Some(long_mul);
    (*number).nb_remainder = Some(long_remainder);
    (*number).nb_power = Some(long_power);
    (*number).nb_negative = Some(long_negative);
    (*number).nb_positive = Some(long_positive);
    (*number).nb_absolute = Some(long_absolute);
    (*number).nb_bool = Some(long_bool);
    (*number).nb_invert = Some(long_invert);
    (*number).nb_lshift = Some(long_lshift);
    (*number).nb_rshift = Some(long_rshift);
    (*number).nb_and = Some(long_and);
    (*number).nb_xor = Some(long_xor);
    (*number).nb_or = Some(long_or);
    (*number).nb_int = Some(long_int);
    (*number).nb_float = Some(long_float);
    (*number).nb_floor_divide = Some(long_floor_divide);
    (*number).nb_true_divide = Some(long_true_divide);
    (*number).nb_index = Some(long_int);
    (*tp).tp_as_number = number;
    (*tp).tp_dealloc = Some(long_dealloc);
    (*tp).tp_repr = Some(long_repr);
    (*tp).tp_hash = Some(long_hash);
    (*tp).tp_richcompare = Some(long_richcompare);
    (*tp).tp_new = Some(long_new);
    LONG_TYPE.store(tp, Ordering::Release);

    let bool_type = new_static_type(c"bool", size_of::<PyLongObject>(), 0, 0);
    (*bool_type).tp_base = tp;
    (*bool_type).tp_repr = Some(bool_repr);
    (*bool_type).tp_new = Some(bool_new);
    BOOL_TYPE.store(bool_type, Ordering::Release);
    TRUE.store(bool_singleton(1), Ordering::Release);
    FALSE.store(bool_singleton(0), Ordering::Release);
}
