//! Native iterator over a managed collection

use std::ptr::null_mut;

use parking_lot::Mutex;

use super::{dealloc_boxed, new_boxed, state, ExtensionKind};
use crate::converter::to_python;
use crate::error::{BridgeError, Result};
use crate::managed::{core, ManagedEnumerator, ObjectRef, Type};
use crate::reference::NewReference;
use crate::runtime::ffi::refcount::Py_NewRef;
use crate::runtime::ffi::PyObject;
use crate::trampoline::trampoline;
use crate::types::{Slot, SlotTable};

pub struct IteratorObject {
    source: Mutex<ManagedEnumerator>,
    element: Type,
}

impl IteratorObject {
    /// Iterator over `obj`, converting items as `element`
    ///
    /// # Safety
    /// The interpreter lock must be held
    pub unsafe fn create(obj: &ObjectRef, element: &Type) -> Result<NewReference> {
        let source = ManagedEnumerator::new(obj)?.ok_or_else(|| {
            BridgeError::InvalidArgument(format!("'{}' object is not iterable", obj.ty().full_name()))
        })?;
        new_boxed(
            ExtensionKind::Iterator,
            IteratorObject {
                source: Mutex::new(source),
                element: element.clone(),
            },
        )
    }
}

/// Declared type of the items `ty` enumerates
pub fn element_type_of(ty: &Type) -> Type {
    if let Some(elem) = ty.element_type().filter(|_| ty.is_array()) {
        return elem.clone();
    }
    if ty.generic_definition() == Some(&core().list) {
        if let Some(arg) = ty.generic_arguments().first() {
            return arg.clone();
        }
    }
    core().object.clone()
}

pub(super) fn slots() -> SlotTable {
    let mut t = SlotTable::new();
    t.insert("tp_dealloc", Slot::Destructor(dealloc_boxed::<IteratorObject>));
    t.insert("tp_iter", Slot::Unary(iter_self));
    t.insert("tp_iternext", Slot::Unary(iter_next));
    t
}

unsafe extern "C" fn iter_self(ob: *mut PyObject) -> *mut PyObject {
    Py_NewRef(ob)
}

/// Null with no error set once the collection is exhausted
unsafe extern "C" fn iter_next(ob: *mut PyObject) -> *mut PyObject {
    trampoline("tp_iternext", || {
        let this = state::<IteratorObject>(ob)?;
        let next = this.source.lock().next();
        match next {
            None => Ok(null_mut()),
            Some(Ok(value)) => to_python(&value, &this.element).map(NewReference::into_raw),
            Some(Err(e)) => Err(BridgeError::Managed(e)),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managed::Value;
    use crate::runtime::ffi::iter::PyIter_Next;
    use crate::runtime::ffi::scalar::{long_value, unicode_as_str};
    use crate::testing::runtime;

    #[test]
    fn test_array_items_then_clean_stop() {
        runtime(|| unsafe {
            let c = core();
            let arr = ObjectRef::array_from(&c.int32, vec![Value::I32(4), Value::I32(5)]).unwrap();
            let it = IteratorObject::create(&arr, &element_type_of(arr.ty())).unwrap();
            let first = NewReference::checked(PyIter_Next(it.as_ptr())).unwrap();
            assert_eq!(long_value(first.as_ptr()), 4);
            let second = NewReference::checked(PyIter_Next(it.as_ptr())).unwrap();
            assert_eq!(long_value(second.as_ptr()), 5);
            assert!(PyIter_Next(it.as_ptr()).is_null());
            assert!(!crate::exceptions::error_occurred());
        });
    }

    #[test]
    fn test_list_element_type() {
        runtime(|| unsafe {
            let c = core();
            let list_ty = c.list.make_generic_type(&[c.string.clone()]).unwrap();
            assert_eq!(element_type_of(&list_ty), c.string);
            let list = ObjectRef::new_list(&list_ty, vec![Value::string("x")]);
            let it = IteratorObject::create(&list, &element_type_of(&list_ty)).unwrap();
            let item = NewReference::checked(PyIter_Next(it.as_ptr())).unwrap();
            assert_eq!(unicode_as_str(item.as_ptr()), Some("x"));
        });
    }

    #[test]
    fn test_plain_object_is_not_iterable() {
        runtime(|| unsafe {
            let obj = ObjectRef::alloc(&core().object);
            assert!(IteratorObject::create(&obj, &core().object).is_err());
        });
    }
}
