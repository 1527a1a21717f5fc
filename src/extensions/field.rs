//! Field descriptors

use std::ffi::c_int;
use std::sync::Arc;

use super::{dealloc_boxed, new_boxed, state, ExtensionKind};
use crate::clr_object::require_managed;
use crate::converter::{to_managed, to_python};
use crate::error::Result;
use crate::exceptions::raise_as;
use crate::managed::{FieldInfo, ObjectRef};
use crate::reference::{BorrowedReference, NewReference};
use crate::runtime::ffi::error::{PyExc_AttributeError, PyExc_TypeError};
use crate::runtime::ffi::scalar::{unicode_from_str, Py_None};
use crate::runtime::ffi::types::PyType_Check;
use crate::runtime::ffi::PyObject;
use crate::trampoline::trampoline;
use crate::types::{Slot, SlotTable};

pub struct FieldObject {
    info: Arc<FieldInfo>,
}

impl FieldObject {
    /// # Safety
    /// The interpreter lock must be held
    pub unsafe fn create(info: Arc<FieldInfo>) -> Result<NewReference> {
        new_boxed(ExtensionKind::Field, FieldObject { info })
    }

    pub fn info(&self) -> &FieldInfo {
        &self.info
    }

    unsafe fn target(&self, ob: *mut PyObject) -> Result<Option<ObjectRef>> {
        if self.info.is_static() {
            return Ok(None);
        }
        require_managed(ob).map(Some)
    }
}

pub(super) fn slots() -> SlotTable {
    let mut t = SlotTable::new();
    t.insert("tp_dealloc", Slot::Destructor(dealloc_boxed::<FieldObject>));
    t.insert("tp_descr_get", Slot::Ternary(field_get));
    t.insert("tp_descr_set", Slot::ObjObjArg(field_set));
    t.insert("tp_repr", Slot::Unary(field_repr));
    t
}

unsafe extern "C" fn field_get(descr: *mut PyObject, ob: *mut PyObject, _tp: *mut PyObject) -> *mut PyObject {
    trampoline("tp_descr_get", || {
        let this = state::<FieldObject>(descr)?;
        if (ob.is_null() || ob == Py_None()) && !this.info.is_static() {
            return Ok(NewReference::from_nullable(BorrowedReference::from_raw(descr)).into_raw());
        }
        let target = this.target(ob)?;
        let value = this.info.get(target.as_ref())?;
        to_python(&value, this.info.field_type()).map(NewReference::into_raw)
    })
}

unsafe extern "C" fn field_set(descr: *mut PyObject, ob: *mut PyObject, value: *mut PyObject) -> c_int {
    trampoline("tp_descr_set", || {
        let this = state::<FieldObject>(descr)?;
        let info = &this.info;
        if value.is_null() {
            return Ok(raise_as(PyExc_TypeError(), format!("cannot delete field '{}'", info.name())));
        }
        if info.is_read_only() {
            return Ok(raise_as(
                PyExc_AttributeError(),
                format!("field '{}' of '{}' is read-only", info.name(), info.declaring_type()),
            ));
        }
        if PyType_Check(ob) && !info.is_static() {
            return Ok(raise_as(
                PyExc_TypeError(),
                format!("instance field '{}' cannot be set on the class", info.name()),
            ));
        }
        let target = this.target(ob)?;
        let converted = to_managed(value, info.field_type())?;
        info.set(target.as_ref(), converted)?;
        Ok(0)
    })
}

unsafe extern "C" fn field_repr(ob: *mut PyObject) -> *mut PyObject {
    trampoline("tp_repr", || {
        let this = state::<FieldObject>(ob)?;
        let text = format!("<field '{}' of '{}'>", this.info.name(), this.info.declaring_type().full_name());
        NewReference::checked(unicode_from_str(&text)).map(NewReference::into_raw)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clr_object::wrap;
    use crate::managed::{core, Type, TypeBuilder, Value};
    use crate::runtime::ffi::error::{PyErr_Clear, PyErr_ExceptionMatches};
    use crate::runtime::ffi::object::Py_TYPE;
    use crate::runtime::ffi::scalar::{long_from_i128, long_value};
    use crate::testing::runtime;

    fn counter() -> Type {
        let c = core();
        TypeBuilder::class("Demo", "Counter")
            .field("Count", &c.int32)
            .readonly_field("Id", &c.int64)
            .static_field("Total", &c.int32, Value::I32(5))
            .build()
    }

    #[test]
    fn test_instance_field_round_trip() {
        runtime(|| unsafe {
            let ty = counter();
            let obj = ObjectRef::alloc(&ty);
            let wrapper = wrap(&obj, &ty).unwrap();
            let count = FieldObject::create(ty.find_field("Count").unwrap()).unwrap();
            let tp = Py_TYPE(count.as_ptr());
            let value = NewReference::from_raw(long_from_i128(9));
            assert_eq!((*tp).tp_descr_set.unwrap()(count.as_ptr(), wrapper.as_ptr(), value.as_ptr()), 0);
            assert_eq!(obj.field(0), Value::I32(9));
            let read = NewReference::checked((*tp).tp_descr_get.unwrap()(count.as_ptr(), wrapper.as_ptr(), std::ptr::null_mut())).unwrap();
            assert_eq!(long_value(read.as_ptr()), 9);
        });
    }

    #[test]
    fn test_static_field_reads_through_class() {
        runtime(|| unsafe {
            let ty = counter();
            let total = FieldObject::create(ty.find_field("Total").unwrap()).unwrap();
            let get = (*Py_TYPE(total.as_ptr())).tp_descr_get.unwrap();
            let read = NewReference::checked(get(total.as_ptr(), std::ptr::null_mut(), std::ptr::null_mut())).unwrap();
            assert_eq!(long_value(read.as_ptr()), 5);
        });
    }

    #[test]
    fn test_readonly_field_rejects_assignment() {
        runtime(|| unsafe {
            let ty = counter();
            let obj = ObjectRef::alloc(&ty);
            let wrapper = wrap(&obj, &ty).unwrap();
            let id = FieldObject::create(ty.find_field("Id").unwrap()).unwrap();
            let value = NewReference::from_raw(long_from_i128(1));
            let set = (*Py_TYPE(id.as_ptr())).tp_descr_set.unwrap();
            assert_eq!(set(id.as_ptr(), wrapper.as_ptr(), value.as_ptr()), -1);
            assert!(PyErr_ExceptionMatches(PyExc_AttributeError()) != 0);
            PyErr_Clear();
        });
    }
}
