//! Native type synthesis
//!
//! [`create_type`] turns a managed type into a native heap type object:
//! bases from the provider chain, instance layout extending the primary
//! base, slots from the class implementation's layers, and a type dict
//! holding a descriptor per managed member. The result is an instance of the
//! bridge metatype, so the class implementation can be found again from the
//! type object alone.

pub mod layout;
pub mod meta_type;
pub mod providers;
pub mod slots;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::classes::ClassBase;
use crate::error::Result;
use crate::exceptions::{check_status, rethrow_last};
use crate::reference::NewReference;
use crate::runtime::code_page;
use crate::runtime::ffi::dict::{PyDict_New, PyDict_SetItemString};
use crate::runtime::ffi::memory::PyObject_Free;
use crate::runtime::ffi::refcount::Py_NewRef;
use crate::runtime::ffi::scalar::{unicode_from_str, PyUnicode_AsUTF8};
use crate::runtime::ffi::tuple::tuple_from_vec;
use crate::runtime::ffi::types::*;
use crate::runtime::ffi::{PyHeapTypeObject, PyObject, PyTypeObject};

pub use self::layout::InstanceLayout;
pub use self::meta_type::{class_of, is_bridge_type, metatype, BridgeTypeObject};
pub use self::providers::{BaseTypeProvider, CollectionMixinProvider, DefaultBaseTypeProvider};
pub use self::slots::{Slot, SlotTable};

/// Build the native type object for `class`
///
/// # Safety
/// The interpreter lock must be held
pub unsafe fn create_type(class: Arc<ClassBase>) -> Result<NewReference> {
    let ty = class.ty().clone();
    let bases = providers::resolve(&ty)?;
    let primary = bases[0].as_ptr() as *mut PyTypeObject;
    let layout = layout::compute(primary)?;

    let meta = metatype()?;
    let tp = PyType_GenericAlloc(meta, 0) as *mut PyTypeObject;
    if tp.is_null() {
        return Err(rethrow_last());
    }
    // Dropping this on any early return runs the metatype's deallocator,
    // which tolerates a half-built type
    let owned = NewReference::from_raw(tp as *mut PyObject);
    let ht = tp as *mut PyHeapTypeObject;

    let name = NewReference::checked(unicode_from_str(ty.name()))?;
    (*ht).ht_name = Py_NewRef(name.as_ptr());
    (*ht).ht_qualname = Py_NewRef(name.as_ptr());
    (*tp).tp_name = PyUnicode_AsUTF8((*ht).ht_name);

    let mut flags = Py_TPFLAGS_DEFAULT | Py_TPFLAGS_HEAPTYPE | Py_TPFLAGS_HAVE_GC;
    if class.is_subclassable() {
        flags |= Py_TPFLAGS_BASETYPE;
    }
    (*tp).tp_flags = flags;
    (*tp).tp_as_number = &mut (*ht).as_number;
    (*tp).tp_as_sequence = &mut (*ht).as_sequence;
    (*tp).tp_as_mapping = &mut (*ht).as_mapping;
    (*tp).tp_as_buffer = &mut (*ht).as_buffer;

    (*tp).tp_base = Py_NewRef(primary as *mut PyObject) as *mut PyTypeObject;
    let base_refs: Vec<*mut PyObject> = bases.iter().map(|b| Py_NewRef(b.as_ptr())).collect();
    (*tp).tp_bases = tuple_from_vec(base_refs);
    if (*tp).tp_bases.is_null() {
        return Err(rethrow_last());
    }

    layout.apply(tp);
    meta_type::bind_class(tp, layout.handle_offset, class.clone());

    let mut table = class.slots();
    let gc = code_page::gc_slots();
    table.insert("tp_traverse", Slot::Traverse(gc.traverse));
    table.insert("tp_clear", Slot::Inquiry(gc.clear));
    table.insert("tp_is_gc", Slot::Inquiry(gc.is_gc));
    table.insert("tp_alloc", Slot::Alloc(PyType_GenericAlloc));
    table.insert("tp_free", Slot::Free(PyObject_Free));
    table.apply(tp)?;

    let dict = PyDict_New();
    if dict.is_null() {
        return Err(rethrow_last());
    }
    (*tp).tp_dict = dict;
    class.populate(tp, dict)?;

    if PyType_Ready(tp) < 0 {
        let err = rethrow_last();
        warn!(event = "type_ready_failed", ty = %ty, error = %err, "synthesized type rejected");
        return Err(err);
    }

    let module = NewReference::checked(unicode_from_str(ty.namespace()))?;
    check_status(PyDict_SetItemString(dict, c"__module__".as_ptr(), module.as_ptr()))?;

    debug!(
        event = "type_synthesized",
        ty = %ty,
        kind = ?class.kind(),
        bases = bases.len(),
        basicsize = layout.basicsize,
        handle_offset = layout.handle_offset,
        slots = table.len(),
        "native type created"
    );
    Ok(owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class_manager;
    use crate::managed::{core, TypeBuilder};
    use crate::runtime::ffi::error::PyExc_Exception;
    use crate::runtime::offsets::PTR_SIZE;
    use crate::testing::runtime;

    #[test]
    fn test_exception_type_extends_native_exception() {
        runtime(|| unsafe {
            let c = core();
            let tp = class_manager::get_or_create(&c.argument_exception).unwrap();
            assert!(PyType_IsSubtype(tp, PyExc_Exception() as *mut PyTypeObject) != 0);
            assert!((*tp).tp_flags & Py_TPFLAGS_BASE_EXC_SUBCLASS != 0);
            let base = class_manager::get_or_create(&c.exception).unwrap();
            assert_eq!(
                meta_type::handle_offset_of(tp),
                meta_type::handle_offset_of(base),
                "subclasses reuse the handle slot"
            );
        });
    }

    #[test]
    fn test_sealed_types_reject_subclassing() {
        runtime(|| unsafe {
            let c = core();
            let sealed = TypeBuilder::class("Demo", "Final").sealed().build();
            let tp = class_manager::get_or_create(&sealed).unwrap();
            assert_eq!((*tp).tp_flags & Py_TPFLAGS_BASETYPE, 0);
            let open = class_manager::get_or_create(&c.object).unwrap();
            assert_ne!((*open).tp_flags & Py_TPFLAGS_BASETYPE, 0);
        });
    }

    #[test]
    fn test_module_and_name_follow_managed_type() {
        runtime(|| unsafe {
            let ty = TypeBuilder::class("Demo.Shapes", "Square").build();
            let tp = class_manager::get_or_create(&ty).unwrap();
            assert_eq!(type_name(tp), "Square");
            assert_eq!(type_module(tp), "Demo.Shapes");
            let object = class_manager::get_or_create(&core().object).unwrap();
            assert_eq!((*tp).tp_basicsize, (*object).tp_basicsize);
            assert_eq!((*object).tp_basicsize % PTR_SIZE, 0);
        });
    }
}
