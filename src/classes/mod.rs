//! Class implementations
//!
//! Every bridged type has one [`ClassBase`] behind it, chosen by the shape of
//! the managed type. The class decides which slots the native type gets and
//! fills the type dict with member descriptors. Slot tables are layered:
//! the kind-specific layer goes in first and the generic layer in [`base`]
//! only fills what is still empty.

pub mod array_object;
pub mod base;
pub mod class_object;
pub mod derived;
pub mod exception_object;
pub mod interface_object;
pub mod operators;

use std::sync::Arc;

use tracing::trace;

use crate::error::{BridgeError, Result};
use crate::exceptions::check_status;
use crate::extensions::{FieldObject, MethodObject, PropertyObject};
use crate::managed::{core, MethodInfo, Type};
use crate::reference::NewReference;
use crate::runtime::ffi::dict::PyDict_SetItem;
use crate::runtime::ffi::scalar::unicode_from_str;
use crate::runtime::ffi::{PyObject, PyTypeObject};
use crate::types::SlotTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    Class,
    Struct,
    Enum,
    Array,
    Interface,
    Exception,
    /// Open generic definition; only closed instantiations can be created
    GenericDefinition,
    /// Managed type generated for a native subclass of a bridged type
    Derived,
}

/// The class implementation behind one bridged type
pub struct ClassBase {
    ty: Type,
    kind: ClassKind,
}

impl ClassBase {
    pub fn new(ty: &Type) -> Result<Self> {
        let kind = classify(ty)?;
        trace!(event = "class_classified", ty = %ty, kind = ?kind);
        Ok(ClassBase { ty: ty.clone(), kind })
    }

    pub(crate) fn derived(ty: &Type) -> Self {
        ClassBase {
            ty: ty.clone(),
            kind: ClassKind::Derived,
        }
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn kind(&self) -> ClassKind {
        self.kind
    }

    /// Can native code subclass this type
    pub fn is_subclassable(&self) -> bool {
        matches!(self.kind, ClassKind::Class | ClassKind::Exception | ClassKind::Derived) && !self.ty.is_sealed()
    }

    /// Slots for the native type, kind-specific layers first
    pub fn slots(&self) -> SlotTable {
        let mut table = SlotTable::new();
        match self.kind {
            ClassKind::GenericDefinition => class_object::generic_definition(&mut table),
            ClassKind::Array => array_object::fill(&mut table),
            ClassKind::Interface => interface_object::fill(&mut table),
            ClassKind::Exception => {
                exception_object::fill(&mut table);
                class_object::fill(&mut table);
            }
            ClassKind::Enum => {
                class_object::enum_fill(&mut table);
                class_object::fill(&mut table);
            }
            ClassKind::Class | ClassKind::Struct | ClassKind::Derived => class_object::fill(&mut table),
        }
        operators::fill(&mut table, &self.ty);
        base::fill(&mut table, &self.ty);
        table
    }

    /// Put a descriptor for every declared member into `dict`
    ///
    /// Members inherited from a bridged base are reached through the MRO;
    /// only method groups are rebuilt here so that overloads added by this
    /// type join the inherited ones.
    ///
    /// # Safety
    /// The interpreter lock must be held; `dict` is the type's own dict
    pub unsafe fn populate(&self, _tp: *mut PyTypeObject, dict: *mut PyObject) -> Result<()> {
        if self.kind == ClassKind::GenericDefinition {
            return Ok(());
        }
        let mut sources = vec![self.ty.clone()];
        if self.ty.is_interface() {
            sources.extend(self.ty.all_interfaces());
        }

        let mut method_names: Vec<String> = Vec::new();
        for source in &sources {
            for name in source.members().method_names() {
                if !method_names.iter().any(|n| n == name) {
                    method_names.push(name.to_owned());
                }
            }
        }
        for name in &method_names {
            let group = distinct_overloads(self.ty.find_methods(name));
            set_member(dict, name, MethodObject::create(&self.ty, name, group)?)?;
        }

        let mut count = method_names.len();
        for source in &sources {
            for property in source.members().properties.iter() {
                if !property.index_parameters().is_empty() {
                    continue;
                }
                set_member(dict, property.name(), PropertyObject::create(property.clone())?)?;
                count += 1;
            }
            // Compiler-generated backing fields stay hidden
            for field in source.members().fields.iter().filter(|f| !f.name().starts_with('<')) {
                set_member(dict, field.name(), FieldObject::create(field.clone())?)?;
                count += 1;
            }
        }
        trace!(event = "type_populated", ty = %self.ty, members = count);
        Ok(())
    }
}

fn classify(ty: &Type) -> Result<ClassKind> {
    let c = core();
    let kind = if ty.is_derived_from_native() {
        ClassKind::Derived
    } else if ty.is_generic_definition() {
        ClassKind::GenericDefinition
    } else if ty.contains_generic_parameters() {
        return Err(BridgeError::Configuration(format!(
            "{} mentions open generic parameters",
            ty
        )));
    } else if ty.is_array() {
        ClassKind::Array
    } else if ty.is_interface() {
        ClassKind::Interface
    } else if ty.is_enum() {
        ClassKind::Enum
    } else if ty == &c.exception || ty.is_subclass_of(&c.exception) {
        ClassKind::Exception
    } else if ty.is_value_type() {
        ClassKind::Struct
    } else {
        ClassKind::Class
    };
    Ok(kind)
}

/// Keep the most derived method of each signature; overrides hide what they
/// override
fn distinct_overloads(methods: Vec<Arc<MethodInfo>>) -> Vec<Arc<MethodInfo>> {
    let mut out: Vec<Arc<MethodInfo>> = Vec::with_capacity(methods.len());
    for m in methods {
        if !out.iter().any(|kept| kept.same_signature(&m) && kept.is_static() == m.is_static()) {
            out.push(m);
        }
    }
    out
}

unsafe fn set_member(dict: *mut PyObject, name: &str, value: NewReference) -> Result<()> {
    let key = NewReference::checked(unicode_from_str(name))?;
    check_status(PyDict_SetItem(dict, key.as_ptr(), value.as_ptr()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class_manager;
    use crate::managed::{MethodBuilder, TypeBuilder, Value};
    use crate::runtime::ffi::dict::PyDict_GetItemString;
    use crate::testing::runtime;

    #[test]
    fn test_kinds_follow_type_shape() {
        let c = core();
        let kind = |ty: &Type| ClassBase::new(ty).unwrap().kind();
        assert_eq!(kind(&c.object), ClassKind::Class);
        assert_eq!(kind(&c.int32), ClassKind::Struct);
        assert_eq!(kind(&c.argument_exception), ClassKind::Exception);
        assert_eq!(kind(&c.ienumerable), ClassKind::Interface);
        assert_eq!(kind(&c.list), ClassKind::GenericDefinition);
        assert_eq!(kind(&c.int32.make_array_type(1)), ClassKind::Array);
        let color = TypeBuilder::enumeration("Demo", "Shade", &c.int32).variant("Dark", 1).build();
        assert_eq!(kind(&color), ClassKind::Enum);
    }

    #[test]
    fn test_sealed_and_struct_types_are_final() {
        let c = core();
        assert!(ClassBase::new(&c.object).unwrap().is_subclassable());
        assert!(!ClassBase::new(&c.string).unwrap().is_subclassable());
        assert!(!ClassBase::new(&c.int32).unwrap().is_subclassable());
    }

    #[test]
    fn test_overrides_hide_overridden_methods() {
        let c = core();
        let base = TypeBuilder::class("Demo", "Speaker")
            .method(MethodBuilder::new("Speak").returns(&c.string).virtual_().body(|_, _| Ok(Value::string("..."))))
            .build();
        let derived = TypeBuilder::class("Demo", "Parrot")
            .base(&base)
            .method(MethodBuilder::new("Speak").returns(&c.string).body(|_, _| Ok(Value::string("hello"))))
            .method(MethodBuilder::new("Speak").param("times", &c.int32).returns(&c.string).body(|_, _| Ok(Value::Null)))
            .build();
        let group = distinct_overloads(derived.find_methods("Speak"));
        assert_eq!(group.len(), 2);
        assert!(group.iter().all(|m| m.declaring_type() == &derived));
    }

    #[test]
    fn test_dict_holds_descriptors_but_no_backing_fields() {
        runtime(|| unsafe {
            let c = core();
            let ty = TypeBuilder::class("Demo", "Gauge")
                .auto_property("Level", &c.int32)
                .field("Limit", &c.int32)
                .method(MethodBuilder::new("Reset").body(|_, _| Ok(Value::Null)))
                .build();
            let tp = class_manager::get_or_create(&ty).unwrap();
            let dict = (*tp).tp_dict;
            assert!(!PyDict_GetItemString(dict, c"Level".as_ptr()).is_null());
            assert!(!PyDict_GetItemString(dict, c"Limit".as_ptr()).is_null());
            assert!(!PyDict_GetItemString(dict, c"Reset".as_ptr()).is_null());
            assert!(PyDict_GetItemString(dict, c"<Level>k__BackingField".as_ptr()).is_null());
        });
    }
}
