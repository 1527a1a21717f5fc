//! Property descriptors
//!
//! Data descriptors over a managed property. Instance properties read
//! through the class return the descriptor itself; static ones read and
//! write the value whether reached through the class or an instance.

use std::ffi::c_int;
use std::sync::Arc;

use super::{dealloc_boxed, new_boxed, state, ExtensionKind};
use crate::clr_object::require_managed;
use crate::converter::{to_managed, to_python};
use crate::error::{BridgeError, Result};
use crate::exceptions::{raise_as, unwrap_invoke};
use crate::managed::{ObjectRef, PropertyInfo};
use crate::reference::{BorrowedReference, NewReference};
use crate::runtime::ffi::error::{PyExc_AttributeError, PyExc_TypeError};
use crate::runtime::ffi::scalar::{unicode_from_str, Py_None};
use crate::runtime::ffi::types::PyType_Check;
use crate::runtime::ffi::PyObject;
use crate::trampoline::trampoline;
use crate::types::{Slot, SlotTable};

pub struct PropertyObject {
    info: Arc<PropertyInfo>,
}

impl PropertyObject {
    /// # Safety
    /// The interpreter lock must be held
    pub unsafe fn create(info: Arc<PropertyInfo>) -> Result<NewReference> {
        new_boxed(ExtensionKind::Property, PropertyObject { info })
    }

    pub fn info(&self) -> &PropertyInfo {
        &self.info
    }

    /// Target for an access through `ob`; None for static properties
    unsafe fn target(&self, ob: *mut PyObject) -> Result<Option<ObjectRef>> {
        if self.info.is_static() {
            return Ok(None);
        }
        require_managed(ob).map(Some)
    }
}

pub(super) fn slots() -> SlotTable {
    let mut t = SlotTable::new();
    t.insert("tp_dealloc", Slot::Destructor(dealloc_boxed::<PropertyObject>));
    t.insert("tp_descr_get", Slot::Ternary(property_get));
    t.insert("tp_descr_set", Slot::ObjObjArg(property_set));
    t.insert("tp_repr", Slot::Unary(property_repr));
    t
}

unsafe extern "C" fn property_get(descr: *mut PyObject, ob: *mut PyObject, _tp: *mut PyObject) -> *mut PyObject {
    trampoline("tp_descr_get", || {
        let this = state::<PropertyObject>(descr)?;
        let class_access = ob.is_null() || ob == Py_None();
        if class_access && !this.info.is_static() {
            return Ok(NewReference::from_nullable(BorrowedReference::from_raw(descr)).into_raw());
        }
        let target = this.target(ob)?;
        let value = this.info.get(target.as_ref()).map_err(unwrap_invoke)?;
        to_python(&value, this.info.property_type()).map(NewReference::into_raw)
    })
}

/// `ob` is the class itself when the assignment went through the metatype
unsafe extern "C" fn property_set(descr: *mut PyObject, ob: *mut PyObject, value: *mut PyObject) -> c_int {
    trampoline("tp_descr_set", || {
        let this = state::<PropertyObject>(descr)?;
        let info = &this.info;
        if value.is_null() {
            return Ok(raise_as(PyExc_TypeError(), format!("cannot delete property '{}'", info.name())));
        }
        if !info.can_write() {
            return Ok(raise_as(
                PyExc_AttributeError(),
                format!("property '{}' of '{}' is read-only", info.name(), info.declaring_type()),
            ));
        }
        if PyType_Check(ob) && !info.is_static() {
            return Err(BridgeError::InvalidArgument(format!(
                "instance property '{}' cannot be set on the class",
                info.name()
            )));
        }
        let target = this.target(ob)?;
        let converted = to_managed(value, info.property_type())?;
        info.set(target.as_ref(), converted).map_err(unwrap_invoke)?;
        Ok(0)
    })
}

unsafe extern "C" fn property_repr(ob: *mut PyObject) -> *mut PyObject {
    trampoline("tp_repr", || {
        let this = state::<PropertyObject>(ob)?;
        let text = format!("<property '{}' of '{}'>", this.info.name(), this.info.declaring_type().full_name());
        NewReference::checked(unicode_from_str(&text)).map(NewReference::into_raw)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clr_object::wrap;
    use crate::managed::{core, PropertyBuilder, Type, TypeBuilder, Value};
    use crate::runtime::ffi::error::{PyErr_Clear, PyErr_ExceptionMatches};
    use crate::runtime::ffi::object::Py_TYPE;
    use crate::runtime::ffi::scalar::{long_from_i128, long_value, unicode_as_str};
    use crate::testing::runtime;

    fn thermometer() -> Type {
        let c = core();
        TypeBuilder::class("Demo", "Thermometer")
            .auto_property("Celsius", &c.int32)
            .property(PropertyBuilder::new("Scale", &c.string).getter(|_, _| Ok(Value::string("C"))))
            .build()
    }

    unsafe fn descriptor(ty: &Type, name: &str) -> NewReference {
        PropertyObject::create(ty.find_property(name).unwrap()).unwrap()
    }

    #[test]
    fn test_get_and_set_through_instance() {
        runtime(|| unsafe {
            let ty = thermometer();
            let obj = ObjectRef::alloc(&ty);
            let wrapper = wrap(&obj, &ty).unwrap();
            let celsius = descriptor(&ty, "Celsius");
            let tp = Py_TYPE(celsius.as_ptr());

            let value = NewReference::from_raw(long_from_i128(21));
            assert_eq!((*tp).tp_descr_set.unwrap()(celsius.as_ptr(), wrapper.as_ptr(), value.as_ptr()), 0);
            let read = NewReference::checked((*tp).tp_descr_get.unwrap()(celsius.as_ptr(), wrapper.as_ptr(), std::ptr::null_mut())).unwrap();
            assert_eq!(long_value(read.as_ptr()), 21);
        });
    }

    #[test]
    fn test_read_only_property_raises_attribute_error() {
        runtime(|| unsafe {
            let ty = thermometer();
            let obj = ObjectRef::alloc(&ty);
            let wrapper = wrap(&obj, &ty).unwrap();
            let scale = descriptor(&ty, "Scale");
            let tp = Py_TYPE(scale.as_ptr());
            let value = NewReference::checked(unicode_from_str("F")).unwrap();
            assert_eq!((*tp).tp_descr_set.unwrap()(scale.as_ptr(), wrapper.as_ptr(), value.as_ptr()), -1);
            assert!(PyErr_ExceptionMatches(PyExc_AttributeError()) != 0);
            PyErr_Clear();
            let read = NewReference::checked((*tp).tp_descr_get.unwrap()(scale.as_ptr(), wrapper.as_ptr(), std::ptr::null_mut())).unwrap();
            assert_eq!(unicode_as_str(read.as_ptr()), Some("C"));
        });
    }

    #[test]
    fn test_class_access_returns_descriptor() {
        runtime(|| unsafe {
            let ty = thermometer();
            let celsius = descriptor(&ty, "Celsius");
            let get = (*Py_TYPE(celsius.as_ptr())).tp_descr_get.unwrap();
            let got = NewReference::checked(get(celsius.as_ptr(), std::ptr::null_mut(), std::ptr::null_mut())).unwrap();
            assert_eq!(got.as_ptr(), celsius.as_ptr());
        });
    }

    #[test]
    fn test_wrong_value_type_is_type_error() {
        runtime(|| unsafe {
            let ty = thermometer();
            let obj = ObjectRef::alloc(&ty);
            let wrapper = wrap(&obj, &ty).unwrap();
            let celsius = descriptor(&ty, "Celsius");
            let value = NewReference::checked(unicode_from_str("warm")).unwrap();
            let set = (*Py_TYPE(celsius.as_ptr())).tp_descr_set.unwrap();
            assert_eq!(set(celsius.as_ptr(), wrapper.as_ptr(), value.as_ptr()), -1);
            assert!(PyErr_ExceptionMatches(PyExc_TypeError()) != 0);
            PyErr_Clear();
        });
    }
}
