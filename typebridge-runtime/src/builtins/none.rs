//! `None` and `NotImplemented` singletons

use core::mem::size_of;
use core::sync::atomic::Ordering;

use crate::builtins::unicode::unicode_from_str;
use crate::object::*;
use crate::refcount::IMMORTAL_REFCNT;
use crate::typeobject::new_static_type;

global_ptr!(NONE_TYPE, _PyNone_Type, PyTypeObject);
global_ptr!(NOT_IMPLEMENTED_TYPE, _PyNotImplemented_Type, PyTypeObject);
global_ptr!(NONE, Py_None, PyObject);
global_ptr!(NOT_IMPLEMENTED, Py_NotImplemented, PyObject);

unsafe fn singleton(tp: *mut PyTypeObject) -> *mut PyObject {
    let o: *mut PyObject = Box::into_raw(Box::new(core::mem::zeroed()));
    (*o).ob_refcnt = IMMORTAL_REFCNT;
    (*o).ob_type = tp;
    o
}

unsafe extern "C" fn none_repr(_o: *mut PyObject) -> *mut PyObject {
    unicode_from_str("None")
}

unsafe extern "C" fn none_bool(_o: *mut PyObject) -> core::ffi::c_int {
    0
}

unsafe extern "C" fn notimplemented_repr(_o: *mut PyObject) -> *mut PyObject {
    unicode_from_str("NotImplemented")
}

pub(crate) unsafe fn init() {
    let none_type = new_static_type(c"NoneType", size_of::<PyObject>(), 0, 0);
    (*none_type).tp_repr = Some(none_repr);
    let number = crate::typeobject::leak_table::<PyNumberMethods>();
    (*number).nb_bool = Some(none_bool);
    (*none_type).tp_as_number = number;
    NONE_TYPE.store(none_type, Ordering::Release);
    NONE.store(singleton(none_type), Ordering::Release);

    let ni_type = new_static_type(c"NotImplementedType", size_of::<PyObject>(), 0, 0);
    (*ni_type).tp_repr = Some(notimplemented_repr);
    NOT_IMPLEMENTED_TYPE.store(ni_type, Ordering::Release);
    NOT_IMPLEMENTED.store(singleton(ni_type), Ordering::Release);
}

#[inline]
pub unsafe fn Py_IsNone(o: *mut PyObject) -> bool {
    o == Py_None()
}
