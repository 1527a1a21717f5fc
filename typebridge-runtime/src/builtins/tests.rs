//! Tests for the builtin types and the abstract protocol over them

use core::ptr::null_mut;

use crate::abstract_::*;
use crate::builtins::dict::*;
use crate::builtins::float::*;
use crate::builtins::list::*;
use crate::builtins::long::*;
use crate::builtins::module::*;
use crate::builtins::none::*;
use crate::builtins::tuple::*;
use crate::builtins::unicode::*;
use crate::errors::*;
use crate::gil::with_gil;
use crate::object::*;
use crate::refcount::*;
use crate::Py_Initialize;

fn runtime<R>(f: impl FnOnce() -> R) -> R {
    Py_Initialize();
    with_gil(f)
}

unsafe fn text(o: *mut PyObject) -> String {
    let s = PyObject_Repr(o);
    assert!(!s.is_null());
    let out = unicode_as_str(s).unwrap().to_owned();
    Py_DECREF(s);
    out
}

unsafe fn s(v: &str) -> *mut PyObject {
    unicode_from_str(v)
}

#[test]
fn test_int_roundtrip_and_overflow() {
    runtime(|| unsafe {
        let max = PyLong_FromLongLong(i32::MAX as i64);
        assert_eq!(PyLong_AsLong(max), i32::MAX as core::ffi::c_long);

        let big = PyLong_FromUnsignedLongLong(u64::MAX);
        assert_eq!(PyLong_AsLongLong(big), -1);
        assert_eq!(PyErr_ExceptionMatches(PyExc_OverflowError()), 1);
        PyErr_Clear();

        let mut overflow = 0;
        PyLong_AsLongLongAndOverflow(big, &mut overflow);
        assert_eq!(overflow, 1);
        assert!(PyErr_Occurred().is_null());

        Py_DECREF(max);
        Py_DECREF(big);
    });
}

#[test]
fn test_int_arithmetic_floor_semantics() {
    runtime(|| unsafe {
        let a = PyLong_FromLong(-7);
        let b = PyLong_FromLong(2);
        let q = PyNumber_FloorDivide(a, b);
        let r = PyNumber_Remainder(a, b);
        assert_eq!(long_value(q), -4);
        assert_eq!(long_value(r), 1);

        let zero = PyLong_FromLong(0);
        assert!(PyNumber_FloorDivide(a, zero).is_null());
        assert_eq!(PyErr_ExceptionMatches(PyExc_ZeroDivisionError()), 1);
        PyErr_Clear();

        for o in [a, b, q, r, zero] {
            Py_DECREF(o);
        }
    });
}

#[test]
fn test_mixed_int_float_addition() {
    runtime(|| unsafe {
        let i = PyLong_FromLong(2);
        let f = PyFloat_FromDouble(0.5);
        let sum = PyNumber_Add(i, f);
        assert!(PyFloat_Check(sum));
        assert_eq!(float_value(sum), 2.5);
        assert_eq!(text(sum), "2.5");
        Py_DECREF(i);
        Py_DECREF(f);
        Py_DECREF(sum);
    });
}

#[test]
fn test_unsupported_operands_raise_type_error() {
    runtime(|| unsafe {
        let i = PyLong_FromLong(1);
        let t = PyTuple_New(0);
        assert!(PyNumber_Subtract(i, t).is_null());
        let err = FetchedError::take().unwrap();
        assert!(err.message().contains("unsupported operand type(s) for -"));
        Py_DECREF(i);
        Py_DECREF(t);
    });
}

#[test]
fn test_bool_singletons() {
    runtime(|| unsafe {
        let t = PyBool_FromLong(5);
        assert_eq!(t, Py_True());
        assert_eq!(PyObject_IsTrue(Py_None()), 0);
        assert!(PyLong_Check(t));
        assert_eq!(text(t), "True");
        Py_DECREF(t);
    });
}

#[test]
fn test_str_repr_and_hash_stable() {
    runtime(|| unsafe {
        let a = s("it's");
        let b = s("it's");
        assert_eq!(text(a), "\"it's\"");
        assert_eq!(PyObject_Hash(a), PyObject_Hash(b));
        assert_eq!(PyObject_RichCompareBool(a, b, Py_EQ), 1);
        assert_eq!(PyUnicode_GetLength(a), 4);
        Py_DECREF(a);
        Py_DECREF(b);
    });
}

#[test]
fn test_tuple_items_and_repr() {
    runtime(|| unsafe {
        let t = tuple_from_vec(vec![PyLong_FromLong(1), s("x")]);
        assert_eq!(PyTuple_Size(t), 2);
        assert_eq!(text(t), "(1, 'x')");
        let one = tuple_from_vec(vec![PyLong_FromLong(1)]);
        assert_eq!(text(one), "(1,)");
        assert!(PyTuple_GetItem(t, 2).is_null());
        assert_eq!(PyErr_ExceptionMatches(PyExc_IndexError()), 1);
        PyErr_Clear();
        Py_DECREF(t);
        Py_DECREF(one);
    });
}

#[test]
fn test_list_mutation_and_negative_index() {
    runtime(|| unsafe {
        let l = PyList_New(0);
        for i in 0..3 {
            let v = PyLong_FromLong(i);
            PyList_Append(l, v);
            Py_DECREF(v);
        }
        let last = PySequence_GetItem(l, -1);
        assert_eq!(long_value(last), 2);
        Py_DECREF(last);

        let key = PyLong_FromLong(0);
        assert_eq!(PyObject_DelItem(l, key), 0);
        Py_DECREF(key);
        assert_eq!(text(l), "[1, 2]");
        assert!(PyObject_Hash(l) == -1);
        PyErr_Clear();
        Py_DECREF(l);
    });
}

#[test]
fn test_iteration_over_list_and_tuple() {
    runtime(|| unsafe {
        let l = list_from_vec(vec![PyLong_FromLong(4), PyLong_FromLong(5)]);
        let t = PySequence_Tuple(l);
        let it = PyObject_GetIter(t);
        let mut seen = Vec::new();
        loop {
            let item = PyIter_Next(it);
            if item.is_null() {
                break;
            }
            seen.push(long_value(item));
            Py_DECREF(item);
        }
        assert!(PyErr_Occurred().is_null());
        assert_eq!(seen, vec![4, 5]);
        Py_DECREF(it);
        Py_DECREF(t);
        Py_DECREF(l);
    });
}

#[test]
fn test_dict_set_get_delete() {
    runtime(|| unsafe {
        let d = PyDict_New();
        let k = s("answer");
        let v = PyLong_FromLong(42);
        assert_eq!(PyDict_SetItem(d, k, v), 0);
        assert_eq!(PyDict_GetItem(d, k), v);

        let other_key = s("answer");
        assert_eq!(PyDict_GetItem(d, other_key), v);
        assert_eq!(PyDict_Size(d), 1);

        assert_eq!(PyDict_DelItem(d, k), 0);
        assert_eq!(PyDict_DelItem(d, k), -1);
        assert_eq!(PyErr_ExceptionMatches(PyExc_KeyError()), 1);
        PyErr_Clear();

        for o in [d, k, v, other_key] {
            Py_DECREF(o);
        }
    });
}

#[test]
fn test_dict_int_and_float_keys_collide() {
    runtime(|| unsafe {
        let d = PyDict_New();
        let i = PyLong_FromLong(1);
        let f = PyFloat_FromDouble(1.0);
        PyDict_SetItem(d, i, Py_None());
        assert_eq!(PyDict_Contains(d, f), 1);
        Py_DECREF(d);
        Py_DECREF(i);
        Py_DECREF(f);
    });
}

#[test]
fn test_dict_next_and_repr() {
    runtime(|| unsafe {
        let d = PyDict_New();
        PyDict_SetItemString(d, c"a".as_ptr(), Py_True());
        PyDict_SetItemString(d, c"b".as_ptr(), Py_None());
        let mut pos = 0;
        let mut key = null_mut();
        let mut value = null_mut();
        let mut keys = Vec::new();
        while PyDict_Next(d, &mut pos, &mut key, &mut value) != 0 {
            keys.push(unicode_as_str(key).unwrap().to_owned());
        }
        assert_eq!(keys, ["a", "b"]);
        assert_eq!(text(d), "{'a': True, 'b': None}");
        Py_DECREF(d);
    });
}

#[test]
fn test_module_attributes() {
    runtime(|| unsafe {
        let m = PyModule_New(c"demo".as_ptr());
        let v = PyLong_FromLong(3);
        assert_eq!(PyModule_AddObject(m, c"three".as_ptr(), v), 0);
        let got = PyObject_GetAttrString(m, c"three".as_ptr());
        assert_eq!(long_value(got), 3);
        Py_DECREF(got);
        assert_eq!(text(m), "<module 'demo'>");

        let registered = PyImport_AddModule(c"demo.registered".as_ptr());
        assert_eq!(PyImport_AddModule(c"demo.registered".as_ptr()), registered);
        Py_DECREF(m);
    });
}

#[test]
fn test_builtin_type_call_constructs_values() {
    runtime(|| unsafe {
        let arg = s(" 12 ");
        let n = PyObject_CallOneArg(PyLong_Type() as *mut PyObject, arg);
        assert_eq!(long_value(n), 12);
        let f = PyObject_CallOneArg(PyFloat_Type() as *mut PyObject, arg);
        assert_eq!(float_value(f), 12.0);
        for o in [arg, n, f] {
            Py_DECREF(o);
        }
    });
}

#[test]
fn test_isinstance_with_tuple_of_types() {
    runtime(|| unsafe {
        let v = PyBool_FromLong(0);
        let classes = tuple_from_vec(vec![
            Py_NewRef(PyFloat_Type() as *mut PyObject),
            Py_NewRef(PyLong_Type() as *mut PyObject),
        ]);
        assert_eq!(PyObject_IsInstance(v, classes), 1);
        assert_eq!(PyObject_IsInstance(v, PyUnicode_Type() as *mut PyObject), 0);
        Py_DECREF(v);
        Py_DECREF(classes);
    });
}
