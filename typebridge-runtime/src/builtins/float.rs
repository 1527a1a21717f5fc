//! `float`

use core::ffi::{c_int, c_long};
use core::mem::size_of;
use core::ptr::null_mut;
use core::sync::atomic::Ordering;

use crate::builtins::long::{compare, hash_i128, index_value, long_value, PyBool_FromLong, PyLong_Check};
use crate::builtins::none::Py_NotImplemented;
use crate::builtins::tuple::tuple_items;
use crate::builtins::unicode::{unicode_as_str, unicode_from_str, PyUnicode_Check};
use crate::errors::{raise_null, set_error, PyExc_TypeError, PyExc_ValueError, PyExc_ZeroDivisionError};
use crate::object::*;
use crate::refcount::{Py_DECREF, Py_NewRef};
use crate::typeobject::{free_instance, leak_table, new_static_type, obj_type_name, PyType_GenericAlloc};

global_ptr!(FLOAT_TYPE, PyFloat_Type, PyTypeObject);

#[inline]
pub unsafe fn PyFloat_Check(o: *mut PyObject) -> bool {
    Py_TYPE(o) == PyFloat_Type() || crate::typeobject::PyObject_TypeCheck(o, PyFloat_Type())
}

#[inline]
pub unsafe fn float_value(o: *mut PyObject) -> f64 {
    (*(o as *mut PyFloatObject)).ob_fval
}

#[no_mangle]
pub unsafe extern "C" fn PyFloat_FromDouble(v: f64) -> *mut PyObject {
    let o = PyType_GenericAlloc(PyFloat_Type(), 0);
    if o.is_null() {
        return null_mut();
    }
    (*(o as *mut PyFloatObject)).ob_fval = v;
    o
}

/// Float value of `o`, accepting ints and `__float__`/`__index__` providers
///
/// # Safety
/// `o` must be a live object
#[no_mangle]
pub unsafe extern "C" fn PyFloat_AsDouble(o: *mut PyObject) -> f64 {
    if PyFloat_Check(o) {
        return float_value(o);
    }
    if PyLong_Check(o) {
        return long_value(o) as f64;
    }
    let number = (*Py_TYPE(o)).tp_as_number;
    if let Some(to_float) = number.as_ref().and_then(|n| n.nb_float) {
        let r = to_float(o);
        if r.is_null() {
            return -1.0;
        }
        if !PyFloat_Check(r) {
            Py_DECREF(r);
            set_error(PyExc_TypeError(), "__float__ returned non-float");
            return -1.0;
        }
        let v = float_value(r);
        Py_DECREF(r);
        return v;
    }
    if number.as_ref().and_then(|n| n.nb_index).is_some() {
        return index_value(o).map_or(-1.0, |v| v as f64);
    }
    set_error(
        PyExc_TypeError(),
        format!("must be real number, not {}", obj_type_name(o)),
    );
    -1.0
}

/// Shortest text that reads back to the same value, in the interpreter's style
pub(crate) fn format_float(v: f64) -> String {
    if v.is_nan() {
        return "nan".to_owned();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf" } else { "-inf" }.to_owned();
    }
    let text = format!("{v:?}");
    match text.split_once('e') {
        Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp:0>2}"),
        Some((mantissa, exp)) => format!("{mantissa}e-{:0>2}", &exp[1..]),
        None => text,
    }
}

unsafe extern "C" fn float_dealloc(o: *mut PyObject) {
    free_instance(o);
}

unsafe extern "C" fn float_repr(o: *mut PyObject) -> *mut PyObject {
    unicode_from_str(&format_float(float_value(o)))
}

unsafe extern "C" fn float_hash(o: *mut PyObject) -> Py_hash_t {
    let v = float_value(o);
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e38 {
        return hash_i128(v as i128);
    }
    let h = v.to_bits() as Py_hash_t;
    if h == -1 {
        -2
    } else {
        h
    }
}

/// Float operand value (ints widen), or None for foreign types
unsafe fn operand(o: *mut PyObject) -> Option<f64> {
    if PyFloat_Check(o) {
        Some(float_value(o))
    } else if PyLong_Check(o) {
        Some(long_value(o) as f64)
    } else {
        None
    }
}

macro_rules! float_binop {
    ($name:ident, |$a:ident, $b:ident| $body:expr) => {
        unsafe extern "C" fn $name(x: *mut PyObject, y: *mut PyObject) -> *mut PyObject {
            let (Some($a), Some($b)) = (operand(x), operand(y)) else {
                return Py_NewRef(Py_NotImplemented());
            };
            $body
        }
    };
}

float_binop!(float_add, |a, b| PyFloat_FromDouble(a + b));
float_binop!(float_sub, |a, b| PyFloat_FromDouble(a - b));
float_binop!(float_mul, |a, b| PyFloat_FromDouble(a * b));
float_binop!(float_div, |a, b| {
    if b == 0.0 {
        return raise_null(PyExc_ZeroDivisionError(), "float division by zero");
    }
    PyFloat_FromDouble(a / b)
});
float_binop!(float_floor_div, |a, b| {
    if b == 0.0 {
        return raise_null(PyExc_ZeroDivisionError(), "float floor division by zero");
    }
    PyFloat_FromDouble((a / b).floor())
});
float_binop!(float_rem, |a, b| {
    if b == 0.0 {
        return raise_null(PyExc_ZeroDivisionError(), "float modulo");
    }
    let r = a % b;
    PyFloat_FromDouble(if r != 0.0 && ((r < 0.0) != (b < 0.0)) { r + b } else { r })
});

unsafe extern "C" fn float_pow(x: *mut PyObject, y: *mut PyObject, _z: *mut PyObject) -> *mut PyObject {
    let (Some(a), Some(b)) = (operand(x), operand(y)) else {
        return Py_NewRef(Py_NotImplemented());
    };
    PyFloat_FromDouble(a.powf(b))
}

unsafe extern "C" fn float_neg(o: *mut PyObject) -> *mut PyObject {
    PyFloat_FromDouble(-float_value(o))
}

unsafe extern "C" fn float_pos(o: *mut PyObject) -> *mut PyObject {
    PyFloat_FromDouble(float_value(o))
}

unsafe extern "C" fn float_abs(o: *mut PyObject) -> *mut PyObject {
    PyFloat_FromDouble(float_value(o).abs())
}

unsafe extern "C" fn float_bool(o: *mut PyObject) -> c_int {
    (float_value(o) != 0.0) as c_int
}

unsafe extern "C" fn float_int(o: *mut PyObject) -> *mut PyObject {
    crate::builtins::long::PyLong_FromDouble(float_value(o))
}

unsafe extern "C" fn float_float(o: *mut PyObject) -> *mut PyObject {
    if Py_TYPE(o) == PyFloat_Type() {
        Py_NewRef(o)
    } else {
        PyFloat_FromDouble(float_value(o))
    }
}

unsafe extern "C" fn float_richcompare(a: *mut PyObject, b: *mut PyObject, op: c_int) -> *mut PyObject {
    let (Some(x), Some(y)) = (operand(a), operand(b)) else {
        return Py_NewRef(Py_NotImplemented());
    };
    PyBool_FromLong(compare(x, y, op) as c_long)
}

unsafe extern "C" fn float_new(_tp: *mut PyTypeObject, args: *mut PyObject, _kwds: *mut PyObject) -> *mut PyObject {
    let items = if args.is_null() { &[][..] } else { tuple_items(args) };
    match items {
        [] => PyFloat_FromDouble(0.0),
        [x] if PyUnicode_Check(*x) => {
            let text = unicode_as_str(*x).unwrap_or("");
            match text.trim().parse::<f64>() {
                Ok(v) => PyFloat_FromDouble(v),
                Err(_) => raise_null(
                    PyExc_ValueError(),
                    format!("could not convert string to float: '{}'", text),
                ),
            }
        }
        [x] => {
            let v = PyFloat_AsDouble(*x);
            if v == -1.0 && !crate::errors::PyErr_Occurred().is_null() {
                return null_mut();
            }
            PyFloat_FromDouble(v)
        }
        _ => raise_null(PyExc_TypeError(), "float expected at most 1 argument"),
    }
}

pub(crate) unsafe fn init() {
    let tp = new_static_type(c"float", size_of::<PyFloatObject>(), 0, Py_TPFLAGS_BASETYPE);
    let number = leak_table::<PyNumberMethods>();
    (*number).nb_add = Some(float_add);
    (*number).nb_subtract = Some(float_sub);
    (*number).nb_multiply = Some(float_mul);
    (*number).nb_remainder = Some(float_rem);
    (*number).nb_power = Some(float_pow);
    (*number).nb_negative = Some(float_neg);
    (*number).nb_positive = Some(float_pos);
    (*number).nb_absolute = Some(float_abs);
    (*number).nb_bool = Some(float_bool);
    (*number).nb_int = Some(float_int);
    (*number).nb_float = Some(float_float);
    (*number).nb_floor_divide = Some(float_floor_div);
    (*number).nb_true_divide = Some(float_div);
    (*tp).tp_as_number = number;
    (*tp).tp_dealloc = Some(float_dealloc);
    (*tp).tp_repr = Some(float_repr);
    (*tp).tp_hash = Some(float_hash);
    (*tp).tp_richcompare = Some(float_richcompare);
    (*tp).tp_new = Some(float_new);
    FLOAT_TYPE.store(tp, Ordering::Release);
}
