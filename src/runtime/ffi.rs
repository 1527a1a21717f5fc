//! Native API surface, grouped by protocol
//!
//! Every name here is a direct pass-through to the interpreter object layer;
//! no logic lives in this module. Callers check the error indicator after any
//! entry point that can fail and turn it into a [`BridgeError`] with
//! [`crate::exceptions::rethrow_last`].
//!
//! [`BridgeError`]: crate::error::BridgeError

pub use typebridge_runtime::object::{
    Py_buffer, Py_hash_t, Py_ssize_t, PyBufferProcs, PyHeapTypeObject, PyMappingMethods,
    PyMethodDef, PyNumberMethods, PyObject, PySequenceMethods, PyTypeObject, PyVarObject,
};

/// Object protocol
pub mod object {
    pub use typebridge_runtime::{
        PyObject_Call, PyObject_CallNoArgs, PyObject_CallObject, PyObject_CallOneArg,
        PyObject_DelAttr, PyObject_GenericGetAttr, PyObject_GenericSetAttr, PyObject_GetAttr,
        PyObject_GetAttrString, PyObject_GetIter, PyObject_HasAttr, PyObject_Hash,
        PyObject_IsInstance, PyObject_IsSubclass, PyObject_IsTrue, PyObject_Repr,
        PyObject_RichCompare, PyObject_RichCompareBool, PyObject_SetAttr, PyObject_SetAttrString,
        PyObject_Size, PyObject_Str, PyObject_Type, PyObject_TypeCheck, Py_HashPointer, Py_TYPE,
    };
    pub use typebridge_runtime::object::{Py_EQ, Py_GE, Py_GT, Py_LE, Py_LT, Py_NE};
}

/// Reference counting; the inline forms skip the call unless the build
/// traces references
pub mod refcount {
    pub use typebridge_runtime::{
        Py_DECREF, Py_DecRef, Py_INCREF, Py_IncRef, Py_NewRef, Py_REFCNT, Py_XDECREF, Py_XINCREF,
    };
}

/// Number protocol
pub mod number {
    pub use typebridge_runtime::{
        PyNumber_Absolute, PyNumber_Add, PyNumber_And, PyNumber_Check, PyNumber_Float,
        PyNumber_FloorDivide, PyNumber_Index, PyNumber_Invert, PyNumber_Long, PyNumber_Lshift,
        PyNumber_MatrixMultiply, PyNumber_Multiply, PyNumber_Negative, PyNumber_Or,
        PyNumber_Positive, PyNumber_Power, PyNumber_Remainder, PyNumber_Rshift,
        PyNumber_Subtract, PyNumber_TrueDivide, PyNumber_Xor,
    };
}

/// Sequence protocol
pub mod sequence {
    pub use typebridge_runtime::{
        PySequence_Check, PySequence_Contains, PySequence_GetItem, PySequence_List,
        PySequence_SetItem, PySequence_Size, PySequence_Tuple,
    };
}

/// Mapping protocol
pub mod mapping {
    pub use typebridge_runtime::{PyMapping_Check, PyObject_DelItem, PyObject_GetItem, PyObject_SetItem};
}

pub mod dict {
    pub use typebridge_runtime::{
        dict_pairs, PyDict_Check, PyDict_Contains, PyDict_GetItem, PyDict_GetItemString,
        PyDict_New, PyDict_Next, PyDict_SetItem, PyDict_SetItemString, PyDict_Size,
    };
}

pub mod list {
    pub use typebridge_runtime::{
        list_from_vec, list_items, PyList_Append, PyList_Check, PyList_GetItem, PyList_New,
        PyList_SetItem, PyList_Size,
    };
}

pub mod tuple {
    pub use typebridge_runtime::{
        tuple_from_vec, tuple_items, PyTuple_Check, PyTuple_GetItem, PyTuple_New, PyTuple_SetItem,
        PyTuple_Size,
    };
}

/// Numbers, booleans, text
pub mod scalar {
    pub use typebridge_runtime::{
        float_value, index_value, long_from_i128, long_value, PyBool_Check, PyBool_FromLong,
        PyBool_Type, PyFloat_AsDouble, PyFloat_Check, PyFloat_FromDouble, PyFloat_Type,
        PyLong_Check, PyLong_CheckExact, PyLong_FromLongLong,
        PyLong_FromUnsignedLongLong, PyLong_Type, PyUnicode_AsUTF8, PyUnicode_Check,
        PyUnicode_FromString, PyUnicode_GetLength, PyUnicode_Type, Py_False, Py_IsNone,
        Py_None, Py_NotImplemented, Py_True, _PyNone_Type,
    };
    pub use typebridge_runtime::{unicode_as_str, unicode_from_str};
}

pub mod module {
    pub use typebridge_runtime::{
        PyImport_AddModule, PyModule_AddObjectRef, PyModule_Check, PyModule_GetDict,
        PyModule_GetName, PyModule_New,
    };
}

/// Type objects
pub mod types {
    pub use typebridge_runtime::object::{
        Py_TPFLAGS_BASETYPE, Py_TPFLAGS_BASE_EXC_SUBCLASS, Py_TPFLAGS_DEFAULT,
        Py_TPFLAGS_HAVE_GC, Py_TPFLAGS_HEAPTYPE, Py_TPFLAGS_READY, Py_TPFLAGS_TYPE_SUBCLASS,
    };
    pub use typebridge_runtime::{
        free_instance, obj_type_name, type_module, type_name, type_new, PyBaseObject_Type,
        PyType_Check, PyType_GenericAlloc, PyType_GenericNew, PyType_IsSubtype, PyType_Ready,
        PyType_Type, _PyObject_GetDictPtr, _PyType_Lookup,
    };
}

pub mod memory {
    pub use typebridge_runtime::{PyMem_Free, PyMem_Malloc, PyObject_Free, PyObject_Malloc};
}

/// Error indicator and exception objects
pub mod error {
    pub use typebridge_runtime::{
        FetchedError, PyErr_Clear, PyErr_ExceptionMatches, PyErr_Fetch,
        PyErr_GivenExceptionMatches, PyErr_NormalizeException, PyErr_Occurred, PyErr_Restore,
        PyErr_SetObject, PyErr_SetString, PyExceptionClass_Check, PyExc_AttributeError,
        PyExc_BaseException,
        PyExc_BufferError, PyExc_Exception, PyExc_IndexError, PyExc_KeyError,
        PyExc_NotImplementedError, PyExc_OverflowError, PyExc_RuntimeError,
        PyExc_StopIteration, PyExc_SystemError, PyExc_TypeError, PyExc_ValueError,
        PyExceptionInstance_Check, PyException_GetArgs, PyException_GetCause,
        PyException_GetTraceback, PyException_SetArgs, PyException_SetCause,
    };
}

/// Iterator protocol
pub mod iter {
    pub use typebridge_runtime::{PyIter_Check, PyIter_Next, PyObject_GetIter};
}

pub mod buffer {
    pub use typebridge_runtime::object::{
        PyBUF_FORMAT, PyBUF_FULL, PyBUF_FULL_RO, PyBUF_ND, PyBUF_SIMPLE, PyBUF_STRIDES,
        PyBUF_WRITABLE,
    };
    pub use typebridge_runtime::{PyBuffer_Release, PyObject_CheckBuffer, PyObject_GetBuffer};
}

/// Builtin callables
pub mod function {
    pub use typebridge_runtime::object::{METH_KEYWORDS, METH_NOARGS, METH_O, METH_VARARGS};
    pub use typebridge_runtime::{PyCFunction_New, PyCFunction_NewEx};
}

/// Interpreter lock
pub mod gil {
    pub use typebridge_runtime::{
        allow_threads, with_gil, GilGuard, PyGILState_Check, PyGILState_Ensure,
        PyGILState_Release,
    };
}

use self::object::Py_TYPE;
use self::types::PyType_IsSubtype;

/// Width-checked conversion into the platform index type
pub fn to_index(n: usize) -> Option<Py_ssize_t> {
    Py_ssize_t::try_from(n).ok()
}

/// Non-negative index back to a host length
pub fn from_index(n: Py_ssize_t) -> Option<usize> {
    usize::try_from(n).ok()
}

/// `isinstance` against a type pointer, without touching the error state
///
/// # Safety
/// `ob` must be live and `tp` a type
pub unsafe fn instance_of(ob: *mut PyObject, tp: *mut PyTypeObject) -> bool {
    let own = Py_TYPE(ob);
    own == tp || PyType_IsSubtype(own, tp) != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_width_is_pointer_width() {
        assert_eq!(std::mem::size_of::<Py_ssize_t>(), std::mem::size_of::<usize>());
        assert_eq!(to_index(usize::MAX), None);
        assert_eq!(to_index(7), Some(7));
        assert_eq!(from_index(-1), None);
    }
}
