//! Interface types
//!
//! An interface type cannot be instantiated; calling it with an object that
//! implements it yields a second wrapper over the same managed object, typed
//! as the interface so that only its members are visible.

use tracing::trace;

use crate::classes::class_object::require_class;
use crate::clr_object::{get_managed_object, wrap_as};
use crate::exceptions::{raise_as, short_repr};
use crate::reference::NewReference;
use crate::runtime::ffi::error::PyExc_TypeError;
use crate::runtime::ffi::tuple::tuple_items;
use crate::runtime::ffi::{PyObject, PyTypeObject};
use crate::trampoline::trampoline;
use crate::types::{Slot, SlotTable};

pub(crate) fn fill(t: &mut SlotTable) {
    t.insert("tp_new", Slot::New(interface_new));
}

unsafe extern "C" fn interface_new(tp: *mut PyTypeObject, args: *mut PyObject, _kwds: *mut PyObject) -> *mut PyObject {
    trampoline("tp_new", || {
        let iface = require_class(tp)?.ty().clone();
        let items = if args.is_null() { &[][..] } else { tuple_items(args) };
        let [arg] = items else {
            return Ok(raise_as(
                PyExc_TypeError(),
                format!("interface takes exactly one argument, got {}", items.len()),
            ));
        };
        let obj = match get_managed_object(*arg) {
            Some(obj) if obj.ty().implements(&iface) => obj,
            _ => {
                return Ok(raise_as(
                    PyExc_TypeError(),
                    format!("{} does not implement {}", short_repr(*arg), iface.full_name()),
                ))
            }
        };
        trace!(event = "interface_view", iface = %iface, ty = %obj.ty());
        wrap_as(&obj, tp).map(NewReference::into_raw)
    })
}

#[cfg(test)]
mod tests {
    use crate::class_manager;
    use crate::clr_object::{require_managed, wrap};
    use crate::managed::{core, MethodBuilder, ObjectRef, TypeBuilder, Value};
    use crate::reference::NewReference;
    use crate::runtime::ffi::error::{PyErr_Clear, PyErr_ExceptionMatches, PyExc_TypeError};
    use crate::runtime::ffi::object::{PyObject_Call, PyObject_CallNoArgs, PyObject_GetAttrString, PyObject_HasAttr};
    use crate::runtime::ffi::refcount::Py_NewRef;
    use crate::runtime::ffi::scalar::{long_from_i128, long_value, unicode_from_str};
    use crate::runtime::ffi::tuple::tuple_from_vec;
    use crate::runtime::ffi::PyObject;
    use crate::testing::runtime;

    #[test]
    fn test_interface_view_shares_the_managed_object() {
        runtime(|| unsafe {
            let c = core();
            let sized = TypeBuilder::interface("Demo", "ISized")
                .method(MethodBuilder::new("Size").returns(&c.int32))
                .build();
            let boxy = TypeBuilder::class("Demo", "Box")
                .implements(&sized)
                .method(MethodBuilder::new("Size").returns(&c.int32).body(|_, _| Ok(Value::I32(8))))
                .method(MethodBuilder::new("Open").body(|_, _| Ok(Value::Null)))
                .build();
            let obj = ObjectRef::alloc(&boxy);
            let wrapper = wrap(&obj, &boxy).unwrap();

            let tp = class_manager::get_or_create(&sized).unwrap();
            let args = NewReference::from_raw(tuple_from_vec(vec![Py_NewRef(wrapper.as_ptr())]));
            let view = NewReference::checked(PyObject_Call(tp as *mut PyObject, args.as_ptr(), std::ptr::null_mut())).unwrap();
            assert!(require_managed(view.as_ptr()).unwrap().ptr_eq(&obj));

            let size = NewReference::checked(PyObject_GetAttrString(view.as_ptr(), c"Size".as_ptr())).unwrap();
            let n = NewReference::checked(PyObject_CallNoArgs(size.as_ptr())).unwrap();
            assert_eq!(long_value(n.as_ptr()), 8);
            let open = NewReference::from_raw(unicode_from_str("Open"));
            assert_eq!(PyObject_HasAttr(view.as_ptr(), open.as_ptr()), 0);
        });
    }

    #[test]
    fn test_non_implementing_argument_is_type_error() {
        runtime(|| unsafe {
            let c = core();
            let tp = class_manager::get_or_create(&c.ienumerable).unwrap();
            let args = NewReference::from_raw(tuple_from_vec(vec![long_from_i128(1)]));
            assert!(PyObject_Call(tp as *mut PyObject, args.as_ptr(), std::ptr::null_mut()).is_null());
            assert!(PyErr_ExceptionMatches(PyExc_TypeError()) != 0);
            PyErr_Clear();
        });
    }
}
