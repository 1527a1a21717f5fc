//! Abstract object protocol
//!
//! Slot-dispatching entry points: calls, attributes, items, iteration,
//! comparison, numbers, sequences and buffers. Everything here works on any
//! object by consulting its type's slots; nothing assumes a concrete layout.

use core::ffi::{c_char, c_int, c_void, CStr};
use core::ptr::null_mut;

use crate::builtins::dict::PyDict_Check;
use crate::builtins::float::{PyFloat_Check, PyFloat_FromDouble};
use crate::builtins::iter::PySeqIter_New;
use crate::builtins::list::{collect_iterable, list_from_vec, list_items, PyList_Check};
use crate::builtins::long::{
    index_value, long_from_i128, long_value, PyLong_Check, PyLong_CheckExact, PyLong_Type, Py_False,
    Py_True,
};
use crate::builtins::none::{Py_None, Py_NotImplemented};
use crate::builtins::tuple::{tuple_from_vec, tuple_items, PyTuple_Check, PyTuple_New, PyTuple_Type};
use crate::builtins::unicode::{unicode_from_str, PyUnicode_Check, PyUnicode_Type};
use crate::errors::{
    raise_neg, raise_null, PyErr_Clear, PyErr_ExceptionMatches, PyErr_Occurred,
    PyExc_AttributeError, PyExc_BufferError, PyExc_StopIteration, PyExc_SystemError,
    PyExc_TypeError,
};
use crate::object::*;
use crate::refcount::{Py_DECREF, Py_INCREF, Py_NewRef, Py_XDECREF};
use crate::typeobject::{obj_type_name, type_name, PyObject_TypeCheck, PyType_Check, PyType_IsSubtype};

// ============================================================================
// Calls
// ============================================================================

/// Call `callable(*args, **kwargs)`; `args` must be a tuple, `kwargs` null or a dict
///
/// # Safety
/// Arguments must be live objects of the stated kinds
#[no_mangle]
pub unsafe extern "C" fn PyObject_Call(callable: *mut PyObject, args: *mut PyObject, kwargs: *mut PyObject) -> *mut PyObject {
    let Some(call) = (*Py_TYPE(callable)).tp_call else {
        return raise_null(
            PyExc_TypeError(),
            format!("'{}' object is not callable", obj_type_name(callable)),
        );
    };
    let result = call(callable, args, kwargs);
    match (result.is_null(), PyErr_Occurred().is_null()) {
        (true, true) => raise_null(
            PyExc_SystemError(),
            format!("{} returned NULL without setting an exception", obj_type_name(callable)),
        ),
        (false, false) => {
            Py_DECREF(result);
            null_mut()
        }
        _ => result,
    }
}

/// # Safety
/// `callable` must be live; `args` null or a tuple
#[no_mangle]
pub unsafe extern "C" fn PyObject_CallObject(callable: *mut PyObject, args: *mut PyObject) -> *mut PyObject {
    if !args.is_null() {
        return PyObject_Call(callable, args, null_mut());
    }
    PyObject_CallNoArgs(callable)
}

/// # Safety
/// `callable` must be live
#[no_mangle]
pub unsafe extern "C" fn PyObject_CallNoArgs(callable: *mut PyObject) -> *mut PyObject {
    let args = PyTuple_New(0);
    if args.is_null() {
        return null_mut();
    }
    let r = PyObject_Call(callable, args, null_mut());
    Py_DECREF(args);
    r
}

/// # Safety
/// Both must be live
#[no_mangle]
pub unsafe extern "C" fn PyObject_CallOneArg(callable: *mut PyObject, arg: *mut PyObject) -> *mut PyObject {
    let args = tuple_from_vec(vec![Py_NewRef(arg)]);
    if args.is_null() {
        return null_mut();
    }
    let r = PyObject_Call(callable, args, null_mut());
    Py_DECREF(args);
    r
}

// ============================================================================
// Attributes
// ============================================================================

unsafe fn with_name<T>(name: *const c_char, err: T, f: impl FnOnce(*mut PyObject) -> T) -> T {
    let n = unicode_from_str(&CStr::from_ptr(name).to_string_lossy());
    if n.is_null() {
        return err;
    }
    let r = f(n);
    Py_DECREF(n);
    r
}

/// # Safety
/// `o` must be live, `name` a str
#[no_mangle]
pub unsafe extern "C" fn PyObject_GetAttr(o: *mut PyObject, name: *mut PyObject) -> *mut PyObject {
    if !PyUnicode_Check(name) {
        return raise_null(
            PyExc_TypeError(),
            format!("attribute name must be string, not '{}'", obj_type_name(name)),
        );
    }
    match (*Py_TYPE(o)).tp_getattro {
        Some(get) => get(o, name),
        None => raise_null(
            PyExc_AttributeError(),
            format!("'{}' object has no attributes", obj_type_name(o)),
        ),
    }
}

/// # Safety
/// `o` must be live, `name` NUL-terminated UTF-8
#[no_mangle]
pub unsafe extern "C" fn PyObject_GetAttrString(o: *mut PyObject, name: *const c_char) -> *mut PyObject {
    with_name(name, null_mut(), |n| PyObject_GetAttr(o, n))
}

/// Store (or with null `value`, delete) an attribute
///
/// # Safety
/// `o` must be live, `name` a str
#[no_mangle]
pub unsafe extern "C" fn PyObject_SetAttr(o: *mut PyObject, name: *mut PyObject, value: *mut PyObject) -> c_int {
    if !PyUnicode_Check(name) {
        return raise_neg(
            PyExc_TypeError(),
            format!("attribute name must be string, not '{}'", obj_type_name(name)),
        );
    }
    match (*Py_TYPE(o)).tp_setattro {
        Some(set) => set(o, name, value),
        None => raise_neg(
            PyExc_TypeError(),
            format!("'{}' object has only read-only attributes", obj_type_name(o)),
        ),
    }
}

/// # Safety
/// `o` must be live, `name` NUL-terminated UTF-8
#[no_mangle]
pub unsafe extern "C" fn PyObject_SetAttrString(o: *mut PyObject, name: *const c_char, value: *mut PyObject) -> c_int {
    with_name(name, -1, |n| PyObject_SetAttr(o, n, value))
}

/// # Safety
/// `o` must be live, `name` a str
#[no_mangle]
pub unsafe extern "C" fn PyObject_DelAttr(o: *mut PyObject, name: *mut PyObject) -> c_int {
    PyObject_SetAttr(o, name, null_mut())
}

/// 1 when the lookup succeeds; any error is swallowed
///
/// # Safety
/// `o` must be live, `name` a str
#[no_mangle]
pub unsafe extern "C" fn PyObject_HasAttr(o: *mut PyObject, name: *mut PyObject) -> c_int {
    let r = PyObject_GetAttr(o, name);
    if r.is_null() {
        PyErr_Clear();
        return 0;
    }
    Py_DECREF(r);
    1
}

/// # Safety
/// `o` must be live, `name` NUL-terminated UTF-8
#[no_mangle]
pub unsafe extern "C" fn PyObject_HasAttrString(o: *mut PyObject, name: *const c_char) -> c_int {
    let r = PyObject_GetAttrString(o, name);
    if r.is_null() {
        PyErr_Clear();
        return 0;
    }
    Py_DECREF(r);
    1
}

// ============================================================================
// Items and length
// ============================================================================

#[inline]
unsafe fn mapping<'a>(o: *mut PyObject) -> Option<&'a PyMappingMethods> {
    (*Py_TYPE(o)).tp_as_mapping.as_ref()
}

#[inline]
unsafe fn sequence<'a>(o: *mut PyObject) -> Option<&'a PySequenceMethods> {
    (*Py_TYPE(o)).tp_as_sequence.as_ref()
}

#[inline]
unsafe fn number<'a>(o: *mut PyObject) -> Option<&'a PyNumberMethods> {
    (*Py_TYPE(o)).tp_as_number.as_ref()
}

/// Index for sequence slots, with negatives counted from the end
unsafe fn sequence_index(o: *mut PyObject, key: *mut PyObject) -> Option<Py_ssize_t> {
    let i = Py_ssize_t::try_from(index_value(key)?).unwrap_or(Py_ssize_t::MAX);
    if i >= 0 {
        return Some(i);
    }
    match sequence(o).and_then(|s| s.sq_length) {
        Some(len) => {
            let n = len(o);
            if n < 0 {
                return None;
            }
            Some(i + n)
        }
        None => Some(i),
    }
}

/// `o[key]`
///
/// # Safety
/// Both must be live
#[no_mangle]
pub unsafe extern "C" fn PyObject_GetItem(o: *mut PyObject, key: *mut PyObject) -> *mut PyObject {
    if let Some(sub) = mapping(o).and_then(|m| m.mp_subscript) {
        return sub(o, key);
    }
    if let Some(item) = sequence(o).and_then(|s| s.sq_item) {
        if !PyLong_Check(key) && number(key).and_then(|n| n.nb_index).is_none() {
            return raise_null(
                PyExc_TypeError(),
                format!("sequence index must be integer, not '{}'", obj_type_name(key)),
            );
        }
        return match sequence_index(o, key) {
            Some(i) => item(o, i),
            None => null_mut(),
        };
    }
    if PyType_Check(o) {
        return raise_null(
            PyExc_TypeError(),
            format!("type '{}' is not subscriptable", type_name(o as *mut PyTypeObject)),
        );
    }
    raise_null(
        PyExc_TypeError(),
        format!("'{}' object is not subscriptable", obj_type_name(o)),
    )
}

unsafe fn assign_item(o: *mut PyObject, key: *mut PyObject, value: *mut PyObject) -> c_int {
    if let Some(ass) = mapping(o).and_then(|m| m.mp_ass_subscript) {
        return ass(o, key, value);
    }
    if let Some(ass) = sequence(o).and_then(|s| s.sq_ass_item) {
        return match sequence_index(o, key) {
            Some(i) => ass(o, i, value),
            None => -1,
        };
    }
    let what = if value.is_null() { "doesn't support item deletion" } else { "does not support item assignment" };
    raise_neg(PyExc_TypeError(), format!("'{}' object {}", obj_type_name(o), what))
}

/// `o[key] = value`
///
/// # Safety
/// All must be live
#[no_mangle]
pub unsafe extern "C" fn PyObject_SetItem(o: *mut PyObject, key: *mut PyObject, value: *mut PyObject) -> c_int {
    if value.is_null() {
        return raise_neg(PyExc_SystemError(), "null value passed to PyObject_SetItem");
    }
    assign_item(o, key, value)
}

/// `del o[key]`
///
/// # Safety
/// Both must be live
#[no_mangle]
pub unsafe extern "C" fn PyObject_DelItem(o: *mut PyObject, key: *mut PyObject) -> c_int {
    assign_item(o, key, null_mut())
}

/// `len(o)`
///
/// # Safety
/// `o` must be live
#[no_mangle]
pub unsafe extern "C" fn PyObject_Size(o: *mut PyObject) -> Py_ssize_t {
    if let Some(len) = sequence(o).and_then(|s| s.sq_length) {
        return len(o);
    }
    if let Some(len) = mapping(o).and_then(|m| m.mp_length) {
        return len(o);
    }
    raise_neg(
        PyExc_TypeError(),
        format!("object of type '{}' has no len()", obj_type_name(o)),
    ) as Py_ssize_t
}

/// # Safety
/// `o` must be live
#[no_mangle]
pub unsafe extern "C" fn PyObject_Length(o: *mut PyObject) -> Py_ssize_t {
    PyObject_Size(o)
}

// ============================================================================
// Iteration
// ============================================================================

/// # Safety
/// `o` must be live
#[no_mangle]
pub unsafe extern "C" fn PyIter_Check(o: *mut PyObject) -> c_int {
    (*Py_TYPE(o)).tp_iternext.is_some() as c_int
}

/// `iter(o)`, falling back to `sq_item` indexing
///
/// # Safety
/// `o` must be live
#[no_mangle]
pub unsafe extern "C" fn PyObject_GetIter(o: *mut PyObject) -> *mut PyObject {
    match (*Py_TYPE(o)).tp_iter {
        Some(iter) => {
            let it = iter(o);
            if !it.is_null() && PyIter_Check(it) == 0 {
                let msg = format!("iter() returned non-iterator of type '{}'", obj_type_name(it));
                Py_DECREF(it);
                return raise_null(PyExc_TypeError(), msg);
            }
            it
        }
        None if !PyDict_Check(o) && sequence(o).and_then(|s| s.sq_item).is_some() => PySeqIter_New(o),
        None => raise_null(
            PyExc_TypeError(),
            format!("'{}' object is not iterable", obj_type_name(o)),
        ),
    }
}

/// Next item, or null at exhaustion (no error set) or on failure (error set)
///
/// # Safety
/// `it` must be an iterator
#[no_mangle]
pub unsafe extern "C" fn PyIter_Next(it: *mut PyObject) -> *mut PyObject {
    let Some(next) = (*Py_TYPE(it)).tp_iternext else {
        return raise_null(
            PyExc_TypeError(),
            format!("'{}' object is not an iterator", obj_type_name(it)),
        );
    };
    let item = next(it);
    if item.is_null() && PyErr_ExceptionMatches(PyExc_StopIteration()) != 0 {
        PyErr_Clear();
    }
    item
}

// ============================================================================
// Truth, comparison, identity text
// ============================================================================

/// # Safety
/// `o` must be live
#[no_mangle]
pub unsafe extern "C" fn PyObject_IsTrue(o: *mut PyObject) -> c_int {
    if o == Py_True() {
        return 1;
    }
    if o == Py_False() || o == Py_None() {
        return 0;
    }
    if let Some(b) = number(o).and_then(|n| n.nb_bool) {
        return b(o);
    }
    let len = if let Some(len) = mapping(o).and_then(|m| m.mp_length) {
        len(o)
    } else if let Some(len) = sequence(o).and_then(|s| s.sq_length) {
        len(o)
    } else {
        return 1;
    };
    if len < 0 {
        -1
    } else {
        (len > 0) as c_int
    }
}

/// # Safety
/// `o` must be live
#[no_mangle]
pub unsafe extern "C" fn PyObject_Not(o: *mut PyObject) -> c_int {
    match PyObject_IsTrue(o) {
        r if r < 0 => r,
        r => (r == 0) as c_int,
    }
}

const SWAPPED_OP: [c_int; 6] = [Py_GT, Py_GE, Py_EQ, Py_NE, Py_LT, Py_LE];
const OP_SYMBOL: [&str; 6] = ["<", "<=", "==", "!=", ">", ">="];

unsafe fn try_compare(f: Option<richcmpfunc>, a: *mut PyObject, b: *mut PyObject, op: c_int) -> Option<*mut PyObject> {
    let r = f?(a, b, op);
    if r == Py_NotImplemented() {
        Py_DECREF(r);
        return None;
    }
    Some(r)
}

/// Rich comparison with the reflected operand tried first for proper subtypes
///
/// # Safety
/// Both must be live; `op` one of `Py_LT..=Py_GE`
#[no_mangle]
pub unsafe extern "C" fn PyObject_RichCompare(v: *mut PyObject, w: *mut PyObject, op: c_int) -> *mut PyObject {
    let Some(swapped) = usize::try_from(op).ok().and_then(|i| SWAPPED_OP.get(i).copied()) else {
        return raise_null(PyExc_SystemError(), "bad comparison operator");
    };
    let (vt, wt) = (Py_TYPE(v), Py_TYPE(w));
    let mut checked_reverse = false;
    if vt != wt && PyType_IsSubtype(wt, vt) != 0 && (*wt).tp_richcompare.is_some() {
        checked_reverse = true;
        if let Some(r) = try_compare((*wt).tp_richcompare, w, v, swapped) {
            return r;
        }
        if !PyErr_Occurred().is_null() {
            return null_mut();
        }
    }
    if let Some(r) = try_compare((*vt).tp_richcompare, v, w, op) {
        return r;
    }
    if !PyErr_Occurred().is_null() {
        return null_mut();
    }
    if !checked_reverse {
        if let Some(r) = try_compare((*wt).tp_richcompare, w, v, swapped) {
            return r;
        }
        if !PyErr_Occurred().is_null() {
            return null_mut();
        }
    }
    match op {
        Py_EQ => Py_NewRef(if v == w { Py_True() } else { Py_False() }),
        Py_NE => Py_NewRef(if v != w { Py_True() } else { Py_False() }),
        _ => raise_null(
            PyExc_TypeError(),
            format!(
                "'{}' not supported between instances of '{}' and '{}'",
                OP_SYMBOL[op as usize],
                type_name(vt),
                type_name(wt)
            ),
        ),
    }
}

/// Comparison as 0/1/-1; identical objects are equal without a slot call
///
/// # Safety
/// Both must be live
#[no_mangle]
pub unsafe extern "C" fn PyObject_RichCompareBool(v: *mut PyObject, w: *mut PyObject, op: c_int) -> c_int {
    if v == w {
        if op == Py_EQ {
            return 1;
        }
        if op == Py_NE {
            return 0;
        }
    }
    let r = PyObject_RichCompare(v, w, op);
    if r.is_null() {
        return -1;
    }
    let b = if r == Py_True() {
        1
    } else if r == Py_False() {
        0
    } else {
        PyObject_IsTrue(r)
    };
    Py_DECREF(r);
    b
}

unsafe fn checked_text(r: *mut PyObject, what: &str) -> *mut PyObject {
    if !r.is_null() && !PyUnicode_Check(r) {
        let msg = format!("{what} returned non-string (type {})", obj_type_name(r));
        Py_DECREF(r);
        return raise_null(PyExc_TypeError(), msg);
    }
    r
}

/// `repr(o)`; a null `o` renders as `<NULL>`
///
/// # Safety
/// `o` must be live or null
#[no_mangle]
pub unsafe extern "C" fn PyObject_Repr(o: *mut PyObject) -> *mut PyObject {
    if o.is_null() {
        return unicode_from_str("<NULL>");
    }
    match (*Py_TYPE(o)).tp_repr {
        Some(repr) => checked_text(repr(o), "__repr__"),
        None => unicode_from_str(&format!("<{} object at {:p}>", obj_type_name(o), o)),
    }
}

/// `str(o)`
///
/// # Safety
/// `o` must be live or null
#[no_mangle]
pub unsafe extern "C" fn PyObject_Str(o: *mut PyObject) -> *mut PyObject {
    if o.is_null() {
        return unicode_from_str("<NULL>");
    }
    if Py_TYPE(o) == PyUnicode_Type() {
        return Py_NewRef(o);
    }
    match (*Py_TYPE(o)).tp_str {
        Some(s) => checked_text(s(o), "__str__"),
        None => PyObject_Repr(o),
    }
}

/// # Safety
/// `o` must be live
#[no_mangle]
pub unsafe extern "C" fn PyObject_Hash(o: *mut PyObject) -> Py_hash_t {
    match (*Py_TYPE(o)).tp_hash {
        Some(h) => h(o),
        None => PyObject_HashNotImplemented(o),
    }
}

/// Hash slot for unhashable types
///
/// # Safety
/// `o` must be live
#[no_mangle]
pub unsafe extern "C" fn PyObject_HashNotImplemented(o: *mut PyObject) -> Py_hash_t {
    raise_neg(
        PyExc_TypeError(),
        format!("unhashable type: '{}'", obj_type_name(o)),
    ) as Py_hash_t
}

/// New reference to `type(o)`
///
/// # Safety
/// `o` must be live
#[no_mangle]
pub unsafe extern "C" fn PyObject_Type(o: *mut PyObject) -> *mut PyObject {
    Py_NewRef(Py_TYPE(o) as *mut PyObject)
}

unsafe fn class_test(cls: *mut PyObject, what: &str, test: &mut dyn FnMut(*mut PyTypeObject) -> bool) -> c_int {
    if PyTuple_Check(cls) {
        for &item in tuple_items(cls) {
            match class_test(item, what, test) {
                0 => {}
                r => return r,
            }
        }
        return 0;
    }
    if !PyType_Check(cls) {
        return raise_neg(
            PyExc_TypeError(),
            format!("{what}() arg 2 must be a type or tuple of types"),
        );
    }
    test(cls as *mut PyTypeObject) as c_int
}

/// `isinstance(o, cls)` for a type or tuple of types
///
/// # Safety
/// Both must be live
#[no_mangle]
pub unsafe extern "C" fn PyObject_IsInstance(o: *mut PyObject, cls: *mut PyObject) -> c_int {
    class_test(cls, "isinstance", &mut |tp| PyObject_TypeCheck(o, tp))
}

/// `issubclass(derived, cls)`
///
/// # Safety
/// Both must be live
#[no_mangle]
pub unsafe extern "C" fn PyObject_IsSubclass(derived: *mut PyObject, cls: *mut PyObject) -> c_int {
    if !PyType_Check(derived) {
        return raise_neg(PyExc_TypeError(), "issubclass() arg 1 must be a class");
    }
    class_test(cls, "issubclass", &mut |tp| {
        PyType_IsSubtype(derived as *mut PyTypeObject, tp) != 0
    })
}

// ============================================================================
// Numbers
// ============================================================================

type BinarySlot = fn(&PyNumberMethods) -> Option<binaryfunc>;

/// Dispatch a binary slot with the right operand's slot taking priority for subtypes
unsafe fn binary_op1(v: *mut PyObject, w: *mut PyObject, slot: BinarySlot) -> *mut PyObject {
    let (vt, wt) = (Py_TYPE(v), Py_TYPE(w));
    let slotv = number(v).and_then(slot);
    let mut slotw = if wt != vt { number(w).and_then(slot) } else { None };
    if slotw.map(|f| f as usize) == slotv.map(|f| f as usize) {
        slotw = None;
    }
    if let Some(fv) = slotv {
        if let Some(fw) = slotw {
            if PyType_IsSubtype(wt, vt) != 0 {
                let r = fw(v, w);
                if r != Py_NotImplemented() {
                    return r;
                }
                Py_DECREF(r);
                slotw = None;
            }
        }
        let r = fv(v, w);
        if r != Py_NotImplemented() {
            return r;
        }
        Py_DECREF(r);
    }
    if let Some(fw) = slotw {
        let r = fw(v, w);
        if r != Py_NotImplemented() {
            return r;
        }
        Py_DECREF(r);
    }
    Py_NewRef(Py_NotImplemented())
}

unsafe fn unsupported(v: *mut PyObject, w: *mut PyObject, symbol: &str) -> *mut PyObject {
    raise_null(
        PyExc_TypeError(),
        format!(
            "unsupported operand type(s) for {symbol}: '{}' and '{}'",
            obj_type_name(v),
            obj_type_name(w)
        ),
    )
}

unsafe fn binary_op(v: *mut PyObject, w: *mut PyObject, slot: BinarySlot, symbol: &str) -> *mut PyObject {
    let r = binary_op1(v, w, slot);
    if r == Py_NotImplemented() {
        Py_DECREF(r);
        return unsupported(v, w, symbol);
    }
    r
}

macro_rules! number_binop {
    ($($name:ident => $field:ident, $symbol:literal;)*) => {
        $(
            /// # Safety
            /// Both operands must be live
            #[no_mangle]
            pub unsafe extern "C" fn $name(v: *mut PyObject, w: *mut PyObject) -> *mut PyObject {
                binary_op(v, w, |n| n.$field, $symbol)
            }
        )*
    };
}

number_binop! {
    PyNumber_Subtract => nb_subtract, "-";
    PyNumber_TrueDivide => nb_true_divide, "/";
    PyNumber_FloorDivide => nb_floor_divide, "//";
    PyNumber_Remainder => nb_remainder, "%";
    PyNumber_Lshift => nb_lshift, "<<";
    PyNumber_Rshift => nb_rshift, ">>";
    PyNumber_And => nb_and, "&";
    PyNumber_Or => nb_or, "|";
    PyNumber_Xor => nb_xor, "^";
    PyNumber_MatrixMultiply => nb_matrix_multiply, "@";
}

/// `v + w`, falling back to sequence concatenation
///
/// # Safety
/// Both operands must be live
#[no_mangle]
pub unsafe extern "C" fn PyNumber_Add(v: *mut PyObject, w: *mut PyObject) -> *mut PyObject {
    let r = binary_op1(v, w, |n| n.nb_add);
    if r != Py_NotImplemented() {
        return r;
    }
    Py_DECREF(r);
    if let Some(concat) = sequence(v).and_then(|s| s.sq_concat) {
        return concat(v, w);
    }
    unsupported(v, w, "+")
}

unsafe fn repeat(seq: *mut PyObject, count: *mut PyObject, f: ssizeargfunc) -> *mut PyObject {
    match index_value(count) {
        Some(n) => f(seq, Py_ssize_t::try_from(n).unwrap_or(Py_ssize_t::MAX)),
        None => null_mut(),
    }
}

/// `v * w`, falling back to sequence repetition on either side
///
/// # Safety
/// Both operands must be live
#[no_mangle]
pub unsafe extern "C" fn PyNumber_Multiply(v: *mut PyObject, w: *mut PyObject) -> *mut PyObject {
    let r = binary_op1(v, w, |n| n.nb_multiply);
    if r != Py_NotImplemented() {
        return r;
    }
    Py_DECREF(r);
    if let Some(f) = sequence(v).and_then(|s| s.sq_repeat) {
        return repeat(v, w, f);
    }
    if let Some(f) = sequence(w).and_then(|s| s.sq_repeat) {
        return repeat(w, v, f);
    }
    unsupported(v, w, "*")
}

/// `pow(v, w, z)`; `z` is `None` for the two-argument form
///
/// # Safety
/// All must be live
#[no_mangle]
pub unsafe extern "C" fn PyNumber_Power(v: *mut PyObject, w: *mut PyObject, z: *mut PyObject) -> *mut PyObject {
    let slotv = number(v).and_then(|n| n.nb_power);
    let slotw = number(w).and_then(|n| n.nb_power).filter(|_| Py_TYPE(v) != Py_TYPE(w));
    for f in [slotv, slotw].into_iter().flatten() {
        let r = f(v, w, z);
        if r != Py_NotImplemented() {
            return r;
        }
        Py_DECREF(r);
    }
    unsupported(v, w, "** or pow()")
}

macro_rules! number_unop {
    ($($name:ident => $field:ident, $symbol:literal;)*) => {
        $(
            /// # Safety
            /// `o` must be live
            #[no_mangle]
            pub unsafe extern "C" fn $name(o: *mut PyObject) -> *mut PyObject {
                match number(o).and_then(|n| n.$field) {
                    Some(f) => f(o),
                    None => raise_null(
                        PyExc_TypeError(),
                        format!("bad operand type for {}: '{}'", $symbol, obj_type_name(o)),
                    ),
                }
            }
        )*
    };
}

number_unop! {
    PyNumber_Negative => nb_negative, "unary -";
    PyNumber_Positive => nb_positive, "unary +";
    PyNumber_Absolute => nb_absolute, "abs()";
    PyNumber_Invert => nb_invert, "unary ~";
}

/// # Safety
/// `o` must be live
#[no_mangle]
pub unsafe extern "C" fn PyNumber_Check(o: *mut PyObject) -> c_int {
    number(o).is_some_and(|n| n.nb_index.is_some() || n.nb_int.is_some() || n.nb_float.is_some()) as c_int
}

/// `operator.index(o)` as an exact int
///
/// # Safety
/// `o` must be live
#[no_mangle]
pub unsafe extern "C" fn PyNumber_Index(o: *mut PyObject) -> *mut PyObject {
    if PyLong_CheckExact(o) {
        return Py_NewRef(o);
    }
    match index_value(o) {
        Some(v) => long_from_i128(v),
        None => null_mut(),
    }
}

/// `int(o)`
///
/// # Safety
/// `o` must be live
#[no_mangle]
pub unsafe extern "C" fn PyNumber_Long(o: *mut PyObject) -> *mut PyObject {
    if PyLong_CheckExact(o) {
        return Py_NewRef(o);
    }
    if PyLong_Check(o) {
        return long_from_i128(long_value(o));
    }
    if let Some(f) = number(o).and_then(|n| n.nb_int) {
        let r = f(o);
        if !r.is_null() && !PyLong_Check(r) {
            let msg = format!("__int__ returned non-int (type {})", obj_type_name(r));
            Py_DECREF(r);
            return raise_null(PyExc_TypeError(), msg);
        }
        return r;
    }
    if number(o).and_then(|n| n.nb_index).is_some() {
        return PyNumber_Index(o);
    }
    if PyUnicode_Check(o) {
        return PyObject_CallOneArg(PyLong_Type() as *mut PyObject, o);
    }
    raise_null(
        PyExc_TypeError(),
        format!(
            "int() argument must be a string or a real number, not '{}'",
            obj_type_name(o)
        ),
    )
}

/// `float(o)`
///
/// # Safety
/// `o` must be live
#[no_mangle]
pub unsafe extern "C" fn PyNumber_Float(o: *mut PyObject) -> *mut PyObject {
    if PyFloat_Check(o) {
        return Py_NewRef(o);
    }
    let v = crate::builtins::float::PyFloat_AsDouble(o);
    if v == -1.0 && !PyErr_Occurred().is_null() {
        return null_mut();
    }
    PyFloat_FromDouble(v)
}

// ============================================================================
// Sequences and mappings
// ============================================================================

/// # Safety
/// `o` must be live
#[no_mangle]
pub unsafe extern "C" fn PySequence_Check(o: *mut PyObject) -> c_int {
    (!PyDict_Check(o) && sequence(o).and_then(|s| s.sq_item).is_some()) as c_int
}

/// # Safety
/// `o` must be live
#[no_mangle]
pub unsafe extern "C" fn PySequence_Size(o: *mut PyObject) -> Py_ssize_t {
    match sequence(o).and_then(|s| s.sq_length) {
        Some(len) => len(o),
        None => raise_neg(
            PyExc_TypeError(),
            format!("object of type '{}' has no len()", obj_type_name(o)),
        ) as Py_ssize_t,
    }
}

/// `o[i]` with negative `i` counted from the end
///
/// # Safety
/// `o` must be live
#[no_mangle]
pub unsafe extern "C" fn PySequence_GetItem(o: *mut PyObject, i: Py_ssize_t) -> *mut PyObject {
    if let Some(item) = sequence(o).and_then(|s| s.sq_item) {
        let mut i = i;
        if i < 0 {
            if let Some(len) = sequence(o).and_then(|s| s.sq_length) {
                let n = len(o);
                if n < 0 {
                    return null_mut();
                }
                i += n;
            }
        }
        return item(o, i);
    }
    if let Some(sub) = mapping(o).and_then(|m| m.mp_subscript) {
        let key = long_from_i128(i as i128);
        if key.is_null() {
            return null_mut();
        }
        let r = sub(o, key);
        Py_DECREF(key);
        return r;
    }
    raise_null(
        PyExc_TypeError(),
        format!("'{}' object does not support indexing", obj_type_name(o)),
    )
}

/// # Safety
/// `o` must be live
#[no_mangle]
pub unsafe extern "C" fn PySequence_SetItem(o: *mut PyObject, i: Py_ssize_t, v: *mut PyObject) -> c_int {
    let key = long_from_i128(i as i128);
    if key.is_null() {
        return -1;
    }
    let rc = assign_item(o, key, v);
    Py_DECREF(key);
    rc
}

/// `value in o`
///
/// # Safety
/// Both must be live
#[no_mangle]
pub unsafe extern "C" fn PySequence_Contains(o: *mut PyObject, value: *mut PyObject) -> c_int {
    if let Some(contains) = sequence(o).and_then(|s| s.sq_contains) {
        return contains(o, value);
    }
    let it = PyObject_GetIter(o);
    if it.is_null() {
        return -1;
    }
    loop {
        let item = PyIter_Next(it);
        if item.is_null() {
            Py_DECREF(it);
            return if PyErr_Occurred().is_null() { 0 } else { -1 };
        }
        let eq = PyObject_RichCompareBool(item, value, Py_EQ);
        Py_DECREF(item);
        if eq != 0 {
            Py_DECREF(it);
            return eq;
        }
    }
}

/// `tuple(o)`
///
/// # Safety
/// `o` must be live
#[no_mangle]
pub unsafe extern "C" fn PySequence_Tuple(o: *mut PyObject) -> *mut PyObject {
    if Py_TYPE(o) == PyTuple_Type() {
        return Py_NewRef(o);
    }
    if PyList_Check(o) {
        return tuple_from_vec(list_items(o).iter().map(|&x| Py_NewRef(x)).collect());
    }
    match collect_iterable(o) {
        Some(items) => tuple_from_vec(items),
        None => null_mut(),
    }
}

/// `list(o)`
///
/// # Safety
/// `o` must be live
#[no_mangle]
pub unsafe extern "C" fn PySequence_List(o: *mut PyObject) -> *mut PyObject {
    match collect_iterable(o) {
        Some(items) => list_from_vec(items),
        None => null_mut(),
    }
}

/// # Safety
/// `o` must be live
#[no_mangle]
pub unsafe extern "C" fn PyMapping_Check(o: *mut PyObject) -> c_int {
    mapping(o).and_then(|m| m.mp_subscript).is_some() as c_int
}

// ============================================================================
// Buffers
// ============================================================================

/// # Safety
/// `o` must be live
#[no_mangle]
pub unsafe extern "C" fn PyObject_CheckBuffer(o: *mut PyObject) -> c_int {
    (*Py_TYPE(o))
        .tp_as_buffer
        .as_ref()
        .and_then(|b| b.bf_getbuffer)
        .is_some() as c_int
}

/// Ask `o` to export a buffer into `view`
///
/// # Safety
/// `o` must be live; `view` writable
#[no_mangle]
pub unsafe extern "C" fn PyObject_GetBuffer(o: *mut PyObject, view: *mut Py_buffer, flags: c_int) -> c_int {
    match (*Py_TYPE(o)).tp_as_buffer.as_ref().and_then(|b| b.bf_getbuffer) {
        Some(get) => get(o, view, flags),
        None => raise_neg(
            PyExc_TypeError(),
            format!("a bytes-like object is required, not '{}'", obj_type_name(o)),
        ),
    }
}

/// Release an exported buffer and drop its reference to the exporter
///
/// # Safety
/// `view` must have been filled by [`PyObject_GetBuffer`] (or be empty)
#[no_mangle]
pub unsafe extern "C" fn PyBuffer_Release(view: *mut Py_buffer) {
    let o = (*view).obj;
    if o.is_null() {
        return;
    }
    if let Some(release) = (*Py_TYPE(o)).tp_as_buffer.as_ref().and_then(|b| b.bf_releasebuffer) {
        release(o, view);
    }
    (*view).obj = null_mut();
    Py_DECREF(o);
}

/// Fill `view` for a contiguous one-dimensional byte region
///
/// # Safety
/// `view` writable; `buf` valid for `len` bytes while the view lives
#[no_mangle]
pub unsafe extern "C" fn PyBuffer_FillInfo(
    view: *mut Py_buffer,
    o: *mut PyObject,
    buf: *mut c_void,
    len: Py_ssize_t,
    readonly: c_int,
    flags: c_int,
) -> c_int {
    if view.is_null() {
        return raise_neg(PyExc_BufferError(), "PyBuffer_FillInfo: view==NULL argument is obsolete");
    }
    if flags & PyBUF_WRITABLE != 0 && readonly != 0 {
        return raise_neg(PyExc_BufferError(), "Object is not writable.");
    }
    if !o.is_null() {
        Py_INCREF(o);
    }
    *view = Py_buffer {
        buf,
        obj: o,
        len,
        itemsize: 1,
        readonly,
        ndim: 1,
        format: if flags & PyBUF_FORMAT != 0 { c"B".as_ptr() as *mut c_char } else { null_mut() },
        ..Py_buffer::new()
    };
    if flags & PyBUF_ND == PyBUF_ND {
        (*view).shape = &mut (*view).len;
    }
    if flags & PyBUF_STRIDES == PyBUF_STRIDES {
        (*view).strides = &mut (*view).itemsize;
    }
    0
}

/// 1 when the view describes C-contiguous memory
///
/// # Safety
/// `view` must be a filled buffer
#[no_mangle]
pub unsafe extern "C" fn PyBuffer_IsContiguous(view: *const Py_buffer, order: c_char) -> c_int {
    if !(*view).suboffsets.is_null() {
        return 0;
    }
    if (*view).strides.is_null() || (*view).ndim == 0 {
        return 1;
    }
    let ndim = (*view).ndim as usize;
    let shape = core::slice::from_raw_parts((*view).shape, ndim);
    let strides = core::slice::from_raw_parts((*view).strides, ndim);
    let mut expected = (*view).itemsize;
    let c_order = |expected: &mut Py_ssize_t| {
        for i in (0..ndim).rev() {
            if shape[i] > 1 && strides[i] != *expected {
                return false;
            }
            *expected *= shape[i];
        }
        true
    };
    match order as u8 {
        b'C' | b'A' => c_order(&mut expected) as c_int,
        _ => {
            for i in 0..ndim {
                if shape[i] > 1 && strides[i] != expected {
                    return 0;
                }
                expected *= shape[i];
            }
            1
        }
    }
}

/// Clear the error indicator when it holds `AttributeError`; true when it did
pub(crate) unsafe fn clear_attribute_error() -> bool {
    if PyErr_ExceptionMatches(PyExc_AttributeError()) != 0 {
        PyErr_Clear();
        return true;
    }
    false
}

/// Owned string form of `o`, or its type name when `str()` fails
pub unsafe fn display(o: *mut PyObject) -> String {
    let s = PyObject_Str(o);
    if s.is_null() {
        PyErr_Clear();
        return format!("<{} object>", obj_type_name(o));
    }
    let text = crate::builtins::unicode::unicode_as_str(s).unwrap_or("").to_owned();
    Py_XDECREF(s);
    text
}
