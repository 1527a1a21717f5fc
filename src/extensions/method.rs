//! Method objects and bound methods
//!
//! A method object holds every overload of one name visible on a type. Read
//! through an instance it yields a bound method carrying that instance; read
//! through the class it is returned as-is and can be called with the
//! instance as the first argument, or with no instance for static overloads.

use std::sync::Arc;

use tracing::trace;

use super::{dealloc_boxed, new_boxed, state, ExtensionKind};
use crate::binder::{CallArgs, MethodBinder};
use crate::clr_object::require_managed;
use crate::error::Result;
use crate::managed::{MethodInfo, Type};
use crate::reference::{BorrowedReference, NativeObject, NewReference};
use crate::runtime::ffi::scalar::{unicode_from_str, Py_None};
use crate::runtime::ffi::types::obj_type_name;
use crate::runtime::ffi::PyObject;
use crate::trampoline::trampoline;
use crate::types::{Slot, SlotTable};

/// Overloads of one method name on one type
pub struct MethodObject {
    ty: Type,
    binder: MethodBinder,
}

impl MethodObject {
    /// Native method object for `methods`, all named `name`
    ///
    /// # Safety
    /// The interpreter lock must be held
    pub unsafe fn create(ty: &Type, name: &str, methods: Vec<Arc<MethodInfo>>) -> Result<NewReference> {
        let value = MethodObject {
            ty: ty.clone(),
            binder: MethodBinder::new(name, methods),
        };
        new_boxed(ExtensionKind::Method, value)
    }

    /// The method object behind `ob`, if it is one
    ///
    /// # Safety
    /// `ob` must be live and outlive the borrow
    pub unsafe fn from_object<'a>(ob: *mut PyObject) -> Option<&'a MethodObject> {
        super::boxed_ref(ob, ExtensionKind::Method)
    }

    pub fn declaring_type(&self) -> &Type {
        &self.ty
    }

    pub fn binder(&self) -> &MethodBinder {
        &self.binder
    }
}

/// A method object together with the instance it was read from
pub struct BoundMethod {
    method: NativeObject,
    target: NativeObject,
}

pub(super) fn method_slots() -> SlotTable {
    let mut t = SlotTable::new();
    t.insert("tp_dealloc", Slot::Destructor(dealloc_boxed::<MethodObject>));
    t.insert("tp_call", Slot::Ternary(method_call));
    t.insert("tp_descr_get", Slot::Ternary(method_descr_get));
    t.insert("tp_repr", Slot::Unary(method_repr));
    t
}

pub(super) fn bound_slots() -> SlotTable {
    let mut t = SlotTable::new();
    t.insert("tp_dealloc", Slot::Destructor(dealloc_boxed::<BoundMethod>));
    t.insert("tp_call", Slot::Ternary(bound_call));
    t.insert("tp_repr", Slot::Unary(bound_repr));
    t
}

unsafe extern "C" fn method_call(ob: *mut PyObject, args: *mut PyObject, kwds: *mut PyObject) -> *mut PyObject {
    trampoline("tp_call", || {
        let this = state::<MethodObject>(ob)?;
        let call = CallArgs::from_native(args, kwds)?;
        this.binder.invoke(None, &call).map(NewReference::into_raw)
    })
}

/// Class access returns the method object; instance access binds it
unsafe extern "C" fn method_descr_get(descr: *mut PyObject, ob: *mut PyObject, _tp: *mut PyObject) -> *mut PyObject {
    trampoline("tp_descr_get", || {
        let descr_ref = BorrowedReference::from_raw(descr);
        if ob.is_null() || ob == Py_None() {
            return Ok(NewReference::from_nullable(descr_ref).into_raw());
        }
        let bound = BoundMethod {
            method: NativeObject::from_borrowed(descr_ref)?,
            target: NativeObject::from_borrowed(BorrowedReference::from_raw(ob))?,
        };
        trace!(event = "method_bound", method = state::<MethodObject>(descr)?.binder.name(), target = obj_type_name(ob));
        new_boxed(ExtensionKind::BoundMethod, bound).map(NewReference::into_raw)
    })
}

unsafe extern "C" fn method_repr(ob: *mut PyObject) -> *mut PyObject {
    trampoline("tp_repr", || {
        let this = state::<MethodObject>(ob)?;
        let text = format!("<method '{}' of '{}' objects>", this.binder.name(), this.ty.full_name());
        NewReference::checked(unicode_from_str(&text)).map(NewReference::into_raw)
    })
}

unsafe extern "C" fn bound_call(ob: *mut PyObject, args: *mut PyObject, kwds: *mut PyObject) -> *mut PyObject {
    trampoline("tp_call", || {
        let this = state::<BoundMethod>(ob)?;
        let method = state::<MethodObject>(this.method.as_ptr())?;
        let target = require_managed(this.target.as_ptr())?;
        let call = CallArgs::from_native(args, kwds)?;
        method.binder.invoke(Some(&target), &call).map(NewReference::into_raw)
    })
}

unsafe extern "C" fn bound_repr(ob: *mut PyObject) -> *mut PyObject {
    trampoline("tp_repr", || {
        let this = state::<BoundMethod>(ob)?;
        let method = state::<MethodObject>(this.method.as_ptr())?;
        let text = format!(
            "<bound method '{}' of '{}' object>",
            method.binder.name(),
            obj_type_name(this.target.as_ptr())
        );
        NewReference::checked(unicode_from_str(&text)).map(NewReference::into_raw)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clr_object::wrap;
    use crate::managed::{core, MethodBuilder, ObjectRef, TypeBuilder, Value};
    use crate::runtime::ffi::object::{PyObject_Call, PyObject_Repr, Py_TYPE};
    use crate::runtime::ffi::scalar::{long_from_i128, long_value, unicode_as_str};
    use crate::runtime::ffi::tuple::tuple_from_vec;
    use crate::testing::runtime;

    fn calculator() -> Type {
        let c = core();
        TypeBuilder::class("Demo", "Calculator")
            .field("Offset", &c.int32)
            .method(
                MethodBuilder::new("Add")
                    .param("a", &c.int32)
                    .param("b", &c.int32)
                    .returns(&c.int32)
                    .static_()
                    .body(|_, args| Ok(Value::I32(args[0].as_i128().unwrap_or(0) as i32 + args[1].as_i128().unwrap_or(0) as i32))),
            )
            .method(
                MethodBuilder::new("Shift")
                    .param("a", &c.int32)
                    .returns(&c.int32)
                    .body(|this, args| {
                        let offset = this.map(|t| t.field(0)).and_then(|v| v.as_i128()).unwrap_or(0);
                        Ok(Value::I32((args[0].as_i128().unwrap_or(0) + offset) as i32))
                    }),
            )
            .build()
    }

    unsafe fn ints(values: &[i128]) -> NewReference {
        NewReference::from_raw(tuple_from_vec(values.iter().map(|&v| long_from_i128(v)).collect()))
    }

    #[test]
    fn test_static_call_through_method_object() {
        runtime(|| unsafe {
            let ty = calculator();
            let add = MethodObject::create(&ty, "Add", ty.find_methods("Add")).unwrap();
            let args = ints(&[2, 5]);
            let result = NewReference::checked(PyObject_Call(add.as_ptr(), args.as_ptr(), std::ptr::null_mut())).unwrap();
            assert_eq!(long_value(result.as_ptr()), 7);
        });
    }

    #[test]
    fn test_instance_access_binds_target() {
        runtime(|| unsafe {
            let ty = calculator();
            let obj = ObjectRef::alloc(&ty);
            obj.set_field(0, Value::I32(100));
            let wrapper = wrap(&obj, &ty).unwrap();
            let shift = MethodObject::create(&ty, "Shift", ty.find_methods("Shift")).unwrap();

            let get = (*Py_TYPE(shift.as_ptr())).tp_descr_get.unwrap();
            let bound = NewReference::checked(get(shift.as_ptr(), wrapper.as_ptr(), std::ptr::null_mut())).unwrap();
            assert_ne!(bound.as_ptr(), shift.as_ptr());
            let args = ints(&[1]);
            let result = NewReference::checked(PyObject_Call(bound.as_ptr(), args.as_ptr(), std::ptr::null_mut())).unwrap();
            assert_eq!(long_value(result.as_ptr()), 101);

            let unbound = NewReference::checked(get(shift.as_ptr(), std::ptr::null_mut(), std::ptr::null_mut())).unwrap();
            assert_eq!(unbound.as_ptr(), shift.as_ptr());
        });
    }

    #[test]
    fn test_unbound_call_takes_instance_first() {
        runtime(|| unsafe {
            let ty = calculator();
            let obj = ObjectRef::alloc(&ty);
            obj.set_field(0, Value::I32(10));
            let wrapper = wrap(&obj, &ty).unwrap();
            let shift = MethodObject::create(&ty, "Shift", ty.find_methods("Shift")).unwrap();
            let args = NewReference::from_raw(tuple_from_vec(vec![
                crate::runtime::ffi::refcount::Py_NewRef(wrapper.as_ptr()),
                long_from_i128(5),
            ]));
            let result = NewReference::checked(PyObject_Call(shift.as_ptr(), args.as_ptr(), std::ptr::null_mut())).unwrap();
            assert_eq!(long_value(result.as_ptr()), 15);
        });
    }

    #[test]
    fn test_repr_names_method_and_type() {
        runtime(|| unsafe {
            let ty = calculator();
            let add = MethodObject::create(&ty, "Add", ty.find_methods("Add")).unwrap();
            assert!(MethodObject::from_object(add.as_ptr()).is_some());
            let repr = NewReference::checked(PyObject_Repr(add.as_ptr())).unwrap();
            assert_eq!(unicode_as_str(repr.as_ptr()), Some("<method 'Add' of 'Demo.Calculator' objects>"));
        });
    }
}
