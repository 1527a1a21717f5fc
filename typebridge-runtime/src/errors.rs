//! Error indicator and exception hierarchy
//!
//! Design: the current error is a thread-local (type, value, traceback) triple
//! holding owned references. Values are normalized eagerly: `PyErr_SetObject`
//! always stores an exception instance, so `PyErr_Fetch` callers can read
//! `args` and `__cause__` without a separate normalization step.

use core::cell::Cell;
use core::ffi::{c_char, c_int, CStr};
use core::mem::{offset_of, size_of};
use core::ptr::null_mut;
use core::sync::atomic::Ordering;

use crate::abstract_::{PyObject_Call, PyObject_Repr, PyObject_Str, PySequence_Tuple};
use crate::builtins::dict::{PyDict_New, PyDict_SetItem};
use crate::builtins::long::PyBool_FromLong;
use crate::builtins::none::Py_None;
use crate::builtins::tuple::{tuple_from_vec, tuple_items, PyTuple_Check, PyTuple_New};
use crate::builtins::unicode::{unicode_as_str, unicode_from_str};
use crate::object::*;
use crate::refcount::{Py_CLEAR, Py_DECREF, Py_NewRef, Py_XDECREF};
use crate::typeobject::{
    free_instance, new_static_type, obj_type_name, type_name, type_new, PyObject_GenericGetAttr,
    PyObject_GenericSetAttr, PyObject_TypeCheck, PyType_Check, PyType_GenericAlloc,
    PyType_IsSubtype, PyType_Ready, PyType_Type, _PyObject_GetDictPtr,
};

// ============================================================================
// Exception types
// ============================================================================

global_ptr!(EXC_BASE_EXCEPTION, PyExc_BaseException, PyObject);
global_ptr!(EXC_EXCEPTION, PyExc_Exception, PyObject);
global_ptr!(EXC_TYPE_ERROR, PyExc_TypeError, PyObject);
global_ptr!(EXC_VALUE_ERROR, PyExc_ValueError, PyObject);
global_ptr!(EXC_ATTRIBUTE_ERROR, PyExc_AttributeError, PyObject);
global_ptr!(EXC_ARITHMETIC_ERROR, PyExc_ArithmeticError, PyObject);
global_ptr!(EXC_OVERFLOW_ERROR, PyExc_OverflowError, PyObject);
global_ptr!(EXC_ZERO_DIVISION_ERROR, PyExc_ZeroDivisionError, PyObject);
global_ptr!(EXC_LOOKUP_ERROR, PyExc_LookupError, PyObject);
global_ptr!(EXC_KEY_ERROR, PyExc_KeyError, PyObject);
global_ptr!(EXC_INDEX_ERROR, PyExc_IndexError, PyObject);
global_ptr!(EXC_STOP_ITERATION, PyExc_StopIteration, PyObject);
global_ptr!(EXC_RUNTIME_ERROR, PyExc_RuntimeError, PyObject);
global_ptr!(EXC_NOT_IMPLEMENTED_ERROR, PyExc_NotImplementedError, PyObject);
global_ptr!(EXC_SYSTEM_ERROR, PyExc_SystemError, PyObject);
global_ptr!(EXC_BUFFER_ERROR, PyExc_BufferError, PyObject);
global_ptr!(EXC_MEMORY_ERROR, PyExc_MemoryError, PyObject);

unsafe fn subclass(
    slot: &core::sync::atomic::AtomicPtr<PyObject>,
    name: &'static CStr,
    base: &core::sync::atomic::AtomicPtr<PyObject>,
) {
    let tp = new_static_type(name, 0, 0, Py_TPFLAGS_BASETYPE);
    (*tp).tp_base = base.load(Ordering::Acquire) as *mut PyTypeObject;
    slot.store(tp as *mut PyObject, Ordering::Release);
}

pub(crate) unsafe fn init_exceptions() {
    let base = new_static_type(
        c"BaseException",
        size_of::<PyBaseExceptionObject>(),
        0,
        Py_TPFLAGS_BASETYPE | Py_TPFLAGS_BASE_EXC_SUBCLASS,
    );
    (*base).tp_dictoffset = offset_of!(PyBaseExceptionObject, dict) as Py_ssize_t;
    (*base).tp_new = Some(BaseException_new);
    (*base).tp_init = Some(BaseException_init);
    (*base).tp_dealloc = Some(BaseException_dealloc);
    (*base).tp_str = Some(BaseException_str);
    (*base).tp_repr = Some(BaseException_repr);
    (*base).tp_getattro = Some(BaseException_getattro);
    (*base).tp_setattro = Some(BaseException_setattro);
    (*base).tp_alloc = Some(PyType_GenericAlloc);
    EXC_BASE_EXCEPTION.store(base as *mut PyObject, Ordering::Release);

    subclass(&EXC_EXCEPTION, c"Exception", &EXC_BASE_EXCEPTION);
    subclass(&EXC_TYPE_ERROR, c"TypeError", &EXC_EXCEPTION);
    subclass(&EXC_VALUE_ERROR, c"ValueError", &EXC_EXCEPTION);
    subclass(&EXC_ATTRIBUTE_ERROR, c"AttributeError", &EXC_EXCEPTION);
    subclass(&EXC_ARITHMETIC_ERROR, c"ArithmeticError", &EXC_EXCEPTION);
    subclass(&EXC_OVERFLOW_ERROR, c"OverflowError", &EXC_ARITHMETIC_ERROR);
    subclass(&EXC_ZERO_DIVISION_ERROR, c"ZeroDivisionError", &EXC_ARITHMETIC_ERROR);
    subclass(&EXC_LOOKUP_ERROR, c"LookupError", &EXC_EXCEPTION);
    subclass(&EXC_KEY_ERROR, c"KeyError", &EXC_LOOKUP_ERROR);
    subclass(&EXC_INDEX_ERROR, c"IndexError", &EXC_LOOKUP_ERROR);
    subclass(&EXC_STOP_ITERATION, c"StopIteration", &EXC_EXCEPTION);
    subclass(&EXC_RUNTIME_ERROR, c"RuntimeError", &EXC_EXCEPTION);
    subclass(&EXC_NOT_IMPLEMENTED_ERROR, c"NotImplementedError", &EXC_RUNTIME_ERROR);
    subclass(&EXC_SYSTEM_ERROR, c"SystemError", &EXC_EXCEPTION);
    subclass(&EXC_BUFFER_ERROR, c"BufferError", &EXC_EXCEPTION);
    subclass(&EXC_MEMORY_ERROR, c"MemoryError", &EXC_EXCEPTION);
}

pub(crate) unsafe fn ready_exceptions() -> c_int {
    let all = [
        PyExc_BaseException(),
        PyExc_Exception(),
        PyExc_TypeError(),
        PyExc_ValueError(),
        PyExc_AttributeError(),
        PyExc_ArithmeticError(),
        PyExc_OverflowError(),
        PyExc_ZeroDivisionError(),
        PyExc_LookupError(),
        PyExc_KeyError(),
        PyExc_IndexError(),
        PyExc_StopIteration(),
        PyExc_RuntimeError(),
        PyExc_NotImplementedError(),
        PyExc_SystemError(),
        PyExc_BufferError(),
        PyExc_MemoryError(),
    ];
    for tp in all {
        if PyType_Ready(tp as *mut PyTypeObject) < 0 {
            return -1;
        }
    }
    0
}

#[inline]
pub unsafe fn PyExceptionInstance_Check(o: *mut PyObject) -> bool {
    PyType_HasFeature(Py_TYPE(o), Py_TPFLAGS_BASE_EXC_SUBCLASS)
}

#[inline]
pub unsafe fn PyExceptionClass_Check(o: *mut PyObject) -> bool {
    PyType_Check(o) && PyType_HasFeature(o as *mut PyTypeObject, Py_TPFLAGS_BASE_EXC_SUBCLASS)
}

// ============================================================================
// BaseException
// ============================================================================

#[inline]
unsafe fn exc(o: *mut PyObject) -> *mut PyBaseExceptionObject {
    o as *mut PyBaseExceptionObject
}

unsafe extern "C" fn BaseException_new(
    tp: *mut PyTypeObject,
    args: *mut PyObject,
    _kwds: *mut PyObject,
) -> *mut PyObject {
    let alloc = (*tp).tp_alloc.unwrap_or(PyType_GenericAlloc);
    let o = alloc(tp, 0);
    if o.is_null() {
        return null_mut();
    }
    (*exc(o)).args = if args.is_null() { PyTuple_New(0) } else { Py_NewRef(args) };
    o
}

unsafe extern "C" fn BaseException_init(o: *mut PyObject, args: *mut PyObject, _kwds: *mut PyObject) -> c_int {
    if !args.is_null() {
        let old = (*exc(o)).args;
        (*exc(o)).args = Py_NewRef(args);
        Py_XDECREF(old);
    }
    0
}

unsafe extern "C" fn BaseException_dealloc(o: *mut PyObject) {
    let e = exc(o);
    Py_CLEAR(&mut (*e).dict);
    Py_CLEAR(&mut (*e).args);
    Py_CLEAR(&mut (*e).notes);
    Py_CLEAR(&mut (*e).traceback);
    Py_CLEAR(&mut (*e).context);
    Py_CLEAR(&mut (*e).cause);
    // A subtype may have placed its dict elsewhere
    let dictptr = _PyObject_GetDictPtr(o);
    if !dictptr.is_null() {
        Py_CLEAR(dictptr);
    }
    free_instance(o);
}

unsafe fn exception_args<'a>(o: *mut PyObject) -> &'a [*mut PyObject] {
    let args = (*exc(o)).args;
    if args.is_null() {
        &[]
    } else {
        tuple_items(args)
    }
}

unsafe extern "C" fn BaseException_str(o: *mut PyObject) -> *mut PyObject {
    match exception_args(o) {
        [] => unicode_from_str(""),
        [single] => PyObject_Str(*single),
        _ => PyObject_Str((*exc(o)).args),
    }
}

unsafe extern "C" fn BaseException_repr(o: *mut PyObject) -> *mut PyObject {
    let name = obj_type_name(o).rsplit('.').next().unwrap_or("?").to_owned();
    let inner = match exception_args(o) {
        [] => return unicode_from_str(&format!("{name}()")),
        [single] => PyObject_Repr(*single),
        _ => PyObject_Repr((*exc(o)).args),
    };
    if inner.is_null() {
        return null_mut();
    }
    let text = unicode_as_str(inner).unwrap_or("").to_owned();
    Py_DECREF(inner);
    if exception_args(o).len() == 1 {
        unicode_from_str(&format!("{name}({text})"))
    } else {
        unicode_from_str(&format!("{name}{text}"))
    }
}

unsafe fn or_none(p: *mut PyObject) -> *mut PyObject {
    Py_NewRef(if p.is_null() { Py_None() } else { p })
}

unsafe extern "C" fn BaseException_getattro(o: *mut PyObject, name: *mut PyObject) -> *mut PyObject {
    let e = exc(o);
    match unicode_as_str(name) {
        Some("args") => or_none((*e).args),
        Some("__cause__") => or_none((*e).cause),
        Some("__context__") => or_none((*e).context),
        Some("__traceback__") => or_none((*e).traceback),
        Some("__suppress_context__") => PyBool_FromLong((*e).suppress_context as _),
        _ => PyObject_GenericGetAttr(o, name),
    }
}

/// Store an exception-or-None into a link field
unsafe fn set_link(slot: *mut *mut PyObject, value: *mut PyObject, what: &str) -> c_int {
    if value.is_null() {
        return raise_neg(PyExc_TypeError(), format!("{what} may not be deleted"));
    }
    let new = if value == Py_None() {
        null_mut()
    } else if PyExceptionInstance_Check(value) {
        Py_NewRef(value)
    } else {
        return raise_neg(
            PyExc_TypeError(),
            format!("exception {what} must be None or derive from BaseException"),
        );
    };
    let old = *slot;
    *slot = new;
    Py_XDECREF(old);
    0
}

unsafe extern "C" fn BaseException_setattro(o: *mut PyObject, name: *mut PyObject, value: *mut PyObject) -> c_int {
    let e = exc(o);
    match unicode_as_str(name) {
        Some("args") => {
            if value.is_null() {
                return raise_neg(PyExc_TypeError(), "args may not be deleted");
            }
            let t = PySequence_Tuple(value);
            if t.is_null() {
                return -1;
            }
            let old = (*e).args;
            (*e).args = t;
            Py_XDECREF(old);
            0
        }
        Some("__cause__") => {
            let rc = set_link(&mut (*e).cause, value, "cause");
            if rc == 0 {
                (*e).suppress_context = 1;
            }
            rc
        }
        Some("__context__") => set_link(&mut (*e).context, value, "context"),
        Some("__traceback__") => {
            let new = if value.is_null() || value == Py_None() { null_mut() } else { Py_NewRef(value) };
            let old = (*e).traceback;
            (*e).traceback = new;
            Py_XDECREF(old);
            0
        }
        _ => PyObject_GenericSetAttr(o, name, value),
    }
}

/// # Safety
/// `o` must be an exception instance
#[no_mangle]
pub unsafe extern "C" fn PyException_GetArgs(o: *mut PyObject) -> *mut PyObject {
    or_none((*exc(o)).args)
}

/// Replace `args` (borrowed `args`)
///
/// # Safety
/// `o` must be an exception instance, `args` a tuple
#[no_mangle]
pub unsafe extern "C" fn PyException_SetArgs(o: *mut PyObject, args: *mut PyObject) {
    let old = (*exc(o)).args;
    (*exc(o)).args = Py_NewRef(args);
    Py_XDECREF(old);
}

/// New reference to `__cause__`, or null
///
/// # Safety
/// `o` must be an exception instance
#[no_mangle]
pub unsafe extern "C" fn PyException_GetCause(o: *mut PyObject) -> *mut PyObject {
    let cause = (*exc(o)).cause;
    if cause.is_null() {
        null_mut()
    } else {
        Py_NewRef(cause)
    }
}

/// Set `__cause__`, stealing `cause` (may be null)
///
/// # Safety
/// `o` must be an exception instance
#[no_mangle]
pub unsafe extern "C" fn PyException_SetCause(o: *mut PyObject, cause: *mut PyObject) {
    let e = exc(o);
    let old = (*e).cause;
    (*e).cause = cause;
    (*e).suppress_context = 1;
    Py_XDECREF(old);
}

/// # Safety
/// `o` must be an exception instance
#[no_mangle]
pub unsafe extern "C" fn PyException_GetContext(o: *mut PyObject) -> *mut PyObject {
    let ctx = (*exc(o)).context;
    if ctx.is_null() {
        null_mut()
    } else {
        Py_NewRef(ctx)
    }
}

/// Set `__context__`, stealing `ctx` (may be null)
///
/// # Safety
/// `o` must be an exception instance
#[no_mangle]
pub unsafe extern "C" fn PyException_SetContext(o: *mut PyObject, ctx: *mut PyObject) {
    let e = exc(o);
    let old = (*e).context;
    (*e).context = ctx;
    Py_XDECREF(old);
}

/// # Safety
/// `o` must be an exception instance
#[no_mangle]
pub unsafe extern "C" fn PyException_GetTraceback(o: *mut PyObject) -> *mut PyObject {
    let tb = (*exc(o)).traceback;
    if tb.is_null() {
        null_mut()
    } else {
        Py_NewRef(tb)
    }
}

/// Set `__traceback__` (borrowed `tb`; None clears)
///
/// # Safety
/// `o` must be an exception instance
#[no_mangle]
pub unsafe extern "C" fn PyException_SetTraceback(o: *mut PyObject, tb: *mut PyObject) -> c_int {
    let e = exc(o);
    let new = if tb.is_null() || tb == Py_None() { null_mut() } else { Py_NewRef(tb) };
    let old = (*e).traceback;
    (*e).traceback = new;
    Py_XDECREF(old);
    0
}

// ============================================================================
// Error indicator
// ============================================================================

struct ErrorState {
    ty: Cell<*mut PyObject>,
    value: Cell<*mut PyObject>,
    traceback: Cell<*mut PyObject>,
}

thread_local! {
    static CURRENT: ErrorState = const {
        ErrorState {
            ty: Cell::new(null_mut()),
            value: Cell::new(null_mut()),
            traceback: Cell::new(null_mut()),
        }
    };
}

/// Install an error, stealing all three references
///
/// # Safety
/// Each argument must be null or an owned reference
#[no_mangle]
pub unsafe extern "C" fn PyErr_Restore(ty: *mut PyObject, value: *mut PyObject, traceback: *mut PyObject) {
    let (old_ty, old_value, old_tb) = CURRENT.with(|s| {
        (s.ty.replace(ty), s.value.replace(value), s.traceback.replace(traceback))
    });
    Py_XDECREF(old_ty);
    Py_XDECREF(old_value);
    Py_XDECREF(old_tb);
}

/// Move the current error out, leaving the indicator clear
///
/// # Safety
/// Out pointers must be writable
#[no_mangle]
pub unsafe extern "C" fn PyErr_Fetch(
    ty: *mut *mut PyObject,
    value: *mut *mut PyObject,
    traceback: *mut *mut PyObject,
) {
    CURRENT.with(|s| {
        *ty = s.ty.replace(null_mut());
        *value = s.value.replace(null_mut());
        *traceback = s.traceback.replace(null_mut());
    });
}

/// Borrowed type of the current error, or null
#[no_mangle]
pub extern "C" fn PyErr_Occurred() -> *mut PyObject {
    CURRENT.with(|s| s.ty.get())
}

/// # Safety
/// Requires an initialized runtime
#[no_mangle]
pub unsafe extern "C" fn PyErr_Clear() {
    PyErr_Restore(null_mut(), null_mut(), null_mut());
}

/// Build an instance of exception class `ty` from `value` (new reference)
unsafe fn instantiate(ty: *mut PyObject, value: *mut PyObject) -> *mut PyObject {
    if !value.is_null() && PyObject_TypeCheck(value, ty as *mut PyTypeObject) {
        return Py_NewRef(value);
    }
    let args = if value.is_null() || value == Py_None() {
        PyTuple_New(0)
    } else if PyTuple_Check(value) {
        Py_NewRef(value)
    } else {
        tuple_from_vec(vec![Py_NewRef(value)])
    };
    if args.is_null() {
        return null_mut();
    }
    let inst = PyObject_Call(ty, args, null_mut());
    Py_DECREF(args);
    inst
}

/// Raise `ty` with `value` (borrowed); the stored value is always an instance
///
/// # Safety
/// `ty` must be an exception class
#[no_mangle]
pub unsafe extern "C" fn PyErr_SetObject(ty: *mut PyObject, value: *mut PyObject) {
    if ty.is_null() || !PyExceptionClass_Check(ty) {
        let msg = format!(
            "exception {} not a BaseException subclass",
            if ty.is_null() { "NULL" } else { obj_type_name(ty) }
        );
        set_error(PyExc_SystemError(), msg);
        return;
    }
    let inst = instantiate(ty, value);
    if inst.is_null() {
        // Instantiation failed and left its own error in place
        return;
    }
    let actual = Py_NewRef(Py_TYPE(inst) as *mut PyObject);
    PyErr_Restore(actual, inst, null_mut());
}

/// # Safety
/// `ty` must be an exception class, `msg` a NUL-terminated UTF-8 string
#[no_mangle]
pub unsafe extern "C" fn PyErr_SetString(ty: *mut PyObject, msg: *const c_char) {
    let text = CStr::from_ptr(msg).to_string_lossy();
    set_error(ty, text);
}

/// # Safety
/// `ty` must be an exception class
#[no_mangle]
pub unsafe extern "C" fn PyErr_SetNone(ty: *mut PyObject) {
    PyErr_SetObject(ty, null_mut());
}

/// Does `given` (class or instance) match `exc` (class or tuple of classes)
///
/// # Safety
/// Arguments must be null or live objects
#[no_mangle]
pub unsafe extern "C" fn PyErr_GivenExceptionMatches(given: *mut PyObject, exc: *mut PyObject) -> c_int {
    if given.is_null() || exc.is_null() {
        return 0;
    }
    if PyTuple_Check(exc) {
        return tuple_items(exc)
            .iter()
            .any(|&e| PyErr_GivenExceptionMatches(given, e) != 0) as c_int;
    }
    let given = if PyExceptionInstance_Check(given) {
        Py_TYPE(given) as *mut PyObject
    } else {
        given
    };
    if PyExceptionClass_Check(given) && PyExceptionClass_Check(exc) {
        return PyType_IsSubtype(given as *mut PyTypeObject, exc as *mut PyTypeObject);
    }
    (given == exc) as c_int
}

/// # Safety
/// `exc` must be an exception class or tuple
#[no_mangle]
pub unsafe extern "C" fn PyErr_ExceptionMatches(exc: *mut PyObject) -> c_int {
    PyErr_GivenExceptionMatches(PyErr_Occurred(), exc)
}

/// Make `*value` an instance of `*ty`
///
/// # Safety
/// Pointers must reference a fetched triple
#[no_mangle]
pub unsafe extern "C" fn PyErr_NormalizeException(
    ty: *mut *mut PyObject,
    value: *mut *mut PyObject,
    traceback: *mut *mut PyObject,
) {
    if (*ty).is_null() {
        return;
    }
    let inst = instantiate(*ty, *value);
    if inst.is_null() {
        Py_XDECREF(*ty);
        Py_XDECREF(*value);
        Py_XDECREF(*traceback);
        PyErr_Fetch(ty, value, traceback);
        return;
    }
    Py_XDECREF(*value);
    *value = inst;
    let actual = Py_TYPE(inst) as *mut PyObject;
    if actual != *ty {
        Py_XDECREF(*ty);
        *ty = Py_NewRef(actual);
    }
}

/// Raise `MemoryError`; always returns null
#[no_mangle]
pub extern "C" fn PyErr_NoMemory() -> *mut PyObject {
    unsafe { PyErr_SetNone(PyExc_MemoryError()) };
    null_mut()
}

#[no_mangle]
pub extern "C" fn PyErr_BadInternalCall() {
    unsafe { set_error(PyExc_SystemError(), "bad argument to internal function") };
}

/// Create a new exception class `module.Name` deriving from `base`
///
/// # Safety
/// `name` must be NUL-terminated; `base` null, a class, or a tuple of classes
#[no_mangle]
pub unsafe extern "C" fn PyErr_NewException(
    name: *const c_char,
    base: *mut PyObject,
    dict: *mut PyObject,
) -> *mut PyObject {
    let full = CStr::from_ptr(name).to_string_lossy().into_owned();
    let Some((module, short)) = full.rsplit_once('.') else {
        return raise_null(PyExc_SystemError(), "PyErr_NewException: name must be module.class");
    };
    let base = if base.is_null() { PyExc_Exception() } else { base };
    let bases = if PyTuple_Check(base) {
        Py_NewRef(base)
    } else {
        tuple_from_vec(vec![Py_NewRef(base)])
    };
    let dict = if dict.is_null() { PyDict_New() } else { Py_NewRef(dict) };
    let module_key = unicode_from_str("__module__");
    let module_value = unicode_from_str(module);
    PyDict_SetItem(dict, module_key, module_value);
    Py_DECREF(module_key);
    Py_DECREF(module_value);
    let args = tuple_from_vec(vec![unicode_from_str(short), bases, dict]);
    let tp = type_new(PyType_Type(), args, null_mut());
    Py_DECREF(args);
    tp
}

// ============================================================================
// Rust-side helpers
// ============================================================================

/// Set the error indicator from a Rust message
pub unsafe fn set_error(ty: *mut PyObject, msg: impl AsRef<str>) {
    let text = unicode_from_str(msg.as_ref());
    PyErr_SetObject(ty, text);
    Py_XDECREF(text);
}

/// Set an error and return the null sentinel
pub unsafe fn raise_null(ty: *mut PyObject, msg: impl AsRef<str>) -> *mut PyObject {
    set_error(ty, msg);
    null_mut()
}

/// Set an error and return the -1 sentinel
pub unsafe fn raise_neg(ty: *mut PyObject, msg: impl AsRef<str>) -> c_int {
    set_error(ty, msg);
    -1
}

/// Owned snapshot of the current error, cleared from the indicator
pub struct FetchedError {
    pub ty: *mut PyObject,
    pub value: *mut PyObject,
    pub traceback: *mut PyObject,
}

impl FetchedError {
    /// Take the current error, if any
    pub fn take() -> Option<Self> {
        let mut err = FetchedError {
            ty: null_mut(),
            value: null_mut(),
            traceback: null_mut(),
        };
        unsafe { PyErr_Fetch(&mut err.ty, &mut err.value, &mut err.traceback) };
        if err.ty.is_null() {
            None
        } else {
            Some(err)
        }
    }

    /// Put the error back into the indicator
    pub fn restore(self) {
        let this = core::mem::ManuallyDrop::new(self);
        unsafe { PyErr_Restore(this.ty, this.value, this.traceback) };
    }

    /// `str(value)`, falling back to the type name
    pub fn message(&self) -> String {
        unsafe {
            if !self.value.is_null() {
                let s = PyObject_Str(self.value);
                if !s.is_null() {
                    let text = unicode_as_str(s).unwrap_or("").to_owned();
                    Py_DECREF(s);
                    return text;
                }
                PyErr_Clear();
            }
            type_name(self.ty as *mut PyTypeObject).to_owned()
        }
    }
}

impl Drop for FetchedError {
    fn drop(&mut self) {
        unsafe {
            Py_XDECREF(self.ty);
            Py_XDECREF(self.value);
            Py_XDECREF(self.traceback);
        }
    }
}
