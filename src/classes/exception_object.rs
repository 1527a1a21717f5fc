//! Managed exception types
//!
//! Wrappers of managed exceptions sit under the interpreter's `Exception`,
//! so their text comes from the managed message rather than `args`.

use std::ffi::c_int;

use crate::clr_object::require_managed;
use crate::error::Result;
use crate::managed::ObjectRef;
use crate::reference::NewReference;
use crate::runtime::ffi::scalar::unicode_from_str;
use crate::runtime::ffi::PyObject;
use crate::trampoline::trampoline;
use crate::types::{Slot, SlotTable};

pub(crate) fn fill(t: &mut SlotTable) {
    t.insert("tp_str", Slot::Unary(exception_str));
    t.insert("tp_repr", Slot::Unary(exception_repr));
    // `args` was set when the wrapper was created; the native init would
    // replace it with the constructor arguments
    t.insert("tp_init", Slot::ObjObjArg(exception_init));
}

fn message_of(obj: &ObjectRef) -> String {
    obj.as_exception().map(|data| data.message()).unwrap_or_default()
}

unsafe fn text(s: &str) -> Result<*mut PyObject> {
    NewReference::checked(unicode_from_str(s)).map(NewReference::into_raw)
}

unsafe extern "C" fn exception_str(ob: *mut PyObject) -> *mut PyObject {
    trampoline("tp_str", || {
        let obj = require_managed(ob)?;
        text(&message_of(&obj))
    })
}

unsafe extern "C" fn exception_repr(ob: *mut PyObject) -> *mut PyObject {
    trampoline("tp_repr", || {
        let obj = require_managed(ob)?;
        let message = message_of(&obj).replace('\'', "\\'");
        text(&format!("{}('{}')", obj.ty().name(), message))
    })
}

unsafe extern "C" fn exception_init(_ob: *mut PyObject, _args: *mut PyObject, _kwds: *mut PyObject) -> c_int {
    0
}

#[cfg(test)]
mod tests {
    use crate::class_manager;
    use crate::clr_object::{require_managed, wrap};
    use crate::managed::{core, ObjectRef};
    use crate::reference::NewReference;
    use crate::runtime::ffi::error::{PyException_GetArgs, PyExc_Exception};
    use crate::runtime::ffi::object::{PyObject_Call, PyObject_IsInstance, PyObject_Repr, PyObject_Str};
    use crate::runtime::ffi::scalar::{unicode_as_str, unicode_from_str};
    use crate::runtime::ffi::tuple::{tuple_from_vec, PyTuple_GetItem};
    use crate::runtime::ffi::PyObject;
    use crate::testing::runtime;

    #[test]
    fn test_str_and_repr_use_managed_message() {
        runtime(|| unsafe {
            let c = core();
            let obj = ObjectRef::new_exception(&c.invalid_operation_exception, "it's closed", None);
            let ob = wrap(&obj, obj.ty()).unwrap();
            let s = NewReference::checked(PyObject_Str(ob.as_ptr())).unwrap();
            assert_eq!(unicode_as_str(s.as_ptr()), Some("it's closed"));
            let r = NewReference::checked(PyObject_Repr(ob.as_ptr())).unwrap();
            assert_eq!(unicode_as_str(r.as_ptr()), Some("InvalidOperationException('it\\'s closed')"));
            assert_eq!(PyObject_IsInstance(ob.as_ptr(), PyExc_Exception()), 1);
        });
    }

    #[test]
    fn test_constructed_exception_keeps_args() {
        runtime(|| unsafe {
            let c = core();
            let tp = class_manager::get_or_create(&c.argument_exception).unwrap();
            let msg = unicode_from_str("bad value");
            let args = NewReference::from_raw(tuple_from_vec(vec![msg]));
            let ob = NewReference::checked(PyObject_Call(tp as *mut PyObject, args.as_ptr(), std::ptr::null_mut())).unwrap();
            let obj = require_managed(ob.as_ptr()).unwrap();
            assert_eq!(obj.as_exception().unwrap().message(), "bad value");
            let exc_args = NewReference::checked(PyException_GetArgs(ob.as_ptr())).unwrap();
            assert_eq!(unicode_as_str(PyTuple_GetItem(exc_args.as_ptr(), 0)), Some("bad value"));
        });
    }
}
