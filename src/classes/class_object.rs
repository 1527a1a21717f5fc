//! Construction for classes, structs and enums

use tracing::trace;

use crate::binder::{CallArgs, MethodBinder};
use crate::classes::{ClassBase, ClassKind};
use crate::clr_object::{get_managed_object, require_managed, wrap_as};
use crate::converter::{to_managed, to_python};
use crate::error::{BridgeError, Result};
use crate::exceptions::{raise_as, short_repr};
use crate::managed::{core, ObjectRef, Type, TypeCode, Value};
use crate::reference::NewReference;
use crate::runtime::ffi::error::{PyExc_OverflowError, PyExc_TypeError};
use crate::runtime::ffi::refcount::Py_NewRef;
use crate::runtime::ffi::scalar::{index_value, long_from_i128, unicode_from_str};
use crate::runtime::ffi::types::type_name;
use crate::runtime::ffi::{PyObject, PyTypeObject};
use crate::trampoline::trampoline;
use crate::types::{class_of, Slot, SlotTable};

pub(crate) fn fill(t: &mut SlotTable) {
    t.insert("tp_new", Slot::New(class_new));
}

pub(crate) fn enum_fill(t: &mut SlotTable) {
    t.insert("nb_int", Slot::Unary(enum_int));
    t.insert("nb_index", Slot::Unary(enum_int));
    t.insert("tp_str", Slot::Unary(enum_str));
}

pub(crate) fn generic_definition(t: &mut SlotTable) {
    t.insert("tp_new", Slot::New(open_generic_new));
}

/// The class behind `tp`, or a configuration error
///
/// # Safety
/// `tp` must be a live type object
pub(crate) unsafe fn require_class<'a>(tp: *mut PyTypeObject) -> Result<&'a ClassBase> {
    class_of(tp).ok_or_else(|| {
        BridgeError::Configuration(format!("'{}' has no class implementation", type_name(tp)))
    })
}

unsafe extern "C" fn class_new(tp: *mut PyTypeObject, args: *mut PyObject, kwds: *mut PyObject) -> *mut PyObject {
    trampoline("tp_new", || {
        let class = require_class(tp)?;
        let ty = class.ty();
        let call = CallArgs::from_native(args, kwds)?;

        if class.kind() != ClassKind::Derived && ty.is_abstract() {
            return Ok(raise_as(
                PyExc_TypeError(),
                format!("cannot instantiate abstract class '{}'", ty.name()),
            ));
        }
        if ty.is_primitive() || ty == &core().string {
            return new_primitive(ty, &call).map(NewReference::into_raw);
        }
        if class.kind() == ClassKind::Enum {
            return new_enum(tp, ty, &call);
        }
        let obj = construct(class, &call)?;
        trace!(event = "instance_constructed", ty = %ty, args = call.positional.len());
        wrap_as(&obj, tp).map(NewReference::into_raw)
    })
}

/// Primitives come back as native values, not wrappers
unsafe fn new_primitive(ty: &Type, call: &CallArgs) -> Result<NewReference> {
    let value = match call.positional.as_slice() {
        [] if call.keywords.is_empty() => Value::default_for(ty),
        [arg] if call.keywords.is_empty() => to_managed(*arg, ty)?,
        _ => {
            return Err(BridgeError::InvalidArgument(format!(
                "{}() takes at most one positional argument",
                ty.name()
            )))
        }
    };
    if ty == &core().string && value.is_null() {
        return NewReference::checked(unicode_from_str(""));
    }
    to_python(&value, ty)
}

unsafe fn new_enum(tp: *mut PyTypeObject, ty: &Type, call: &CallArgs) -> Result<*mut PyObject> {
    let [arg] = call.positional.as_slice() else {
        return Err(BridgeError::InvalidArgument(format!(
            "{}() takes exactly one argument",
            ty.name()
        )));
    };
    if let Some(existing) = get_managed_object(*arg) {
        if existing.ty() == ty {
            return Ok(Py_NewRef(*arg));
        }
    }
    let Some(n) = index_value(*arg) else {
        return Ok(raise_as(
            PyExc_TypeError(),
            format!("{}() argument must be an integer, not {}", ty.name(), short_repr(*arg)),
        ));
    };
    let code = ty.underlying_type().map(Type::type_code).unwrap_or(TypeCode::Int32);
    let Some(raw) = Value::integer(code, n) else {
        return Ok(raise_as(PyExc_OverflowError(), format!("{} is out of range for {}", n, ty.name())));
    };
    wrap_as(&ObjectRef::boxed(ty, raw), tp).map(NewReference::into_raw)
}

/// Run the best matching constructor, or allocate when none is declared
///
/// Types generated for native subclasses have no constructors of their own;
/// they use the nearest base that does, and fall back to a bare allocation
/// when none of those accept the arguments.
pub(crate) unsafe fn construct(class: &ClassBase, call: &CallArgs) -> Result<ObjectRef> {
    let ty = class.ty();
    let derived = class.kind() == ClassKind::Derived;
    let ctors = if derived {
        ty.ancestors()
            .map(|t| t.members().constructors.clone())
            .find(|c| !c.is_empty())
            .unwrap_or_default()
    } else {
        ty.members().constructors.clone()
    };
    let no_args = call.positional.is_empty() && call.keywords.is_empty();

    if ctors.is_empty() {
        if no_args || derived {
            return Ok(ObjectRef::alloc(ty));
        }
        return Err(BridgeError::NoMatch {
            method: ty.name().to_owned(),
            signature: call.describe(),
        });
    }
    let binder = MethodBinder::new(ty.name(), ctors);
    match binder.bind(None, call) {
        Ok(binding) => binding.construct_as(ty),
        Err(_) if no_args && ty.is_value_type() => Ok(ObjectRef::alloc(ty)),
        Err(BridgeError::NoMatch { .. }) if derived => {
            trace!(event = "derived_construct_fallback", ty = %ty, "no base constructor matched");
            match binder.bind(None, &CallArgs::positional(&[])) {
                Ok(binding) => binding.construct_as(ty),
                Err(_) => Ok(ObjectRef::alloc(ty)),
            }
        }
        Err(e) => Err(e),
    }
}

unsafe extern "C" fn enum_int(ob: *mut PyObject) -> *mut PyObject {
    trampoline("nb_int", || {
        let obj = require_managed(ob)?;
        let n = obj.boxed_value().and_then(Value::as_i128).unwrap_or(0);
        NewReference::checked(long_from_i128(n)).map(NewReference::into_raw)
    })
}

unsafe extern "C" fn enum_str(ob: *mut PyObject) -> *mut PyObject {
    trampoline("tp_str", || {
        let obj = require_managed(ob)?;
        let text = obj.enum_name().unwrap_or_else(|| Value::Object(obj.clone()).to_string());
        NewReference::checked(unicode_from_str(&text)).map(NewReference::into_raw)
    })
}

unsafe extern "C" fn open_generic_new(tp: *mut PyTypeObject, _args: *mut PyObject, _kwds: *mut PyObject) -> *mut PyObject {
    raise_as(
        PyExc_TypeError(),
        format!(
            "cannot instantiate open generic type '{}'; subscript it with type arguments first",
            type_name(tp)
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class_manager;
    use crate::managed::{MethodBuilder, ParameterInfo, TypeBuilder};
    use crate::runtime::ffi::error::{PyErr_Clear, PyErr_ExceptionMatches};
    use crate::runtime::ffi::number::PyNumber_Index;
    use crate::runtime::ffi::object::{PyObject_Call, PyObject_Str};
    use crate::runtime::ffi::scalar::{long_value, unicode_as_str, PyLong_Check};
    use crate::runtime::ffi::tuple::tuple_from_vec;
    use crate::testing::runtime;

    fn point() -> Type {
        let c = core();
        TypeBuilder::class("Demo", "Point")
            .field("X", &c.int32)
            .field("Y", &c.int32)
            .constructor(
                vec![ParameterInfo::new("x", &c.int32), ParameterInfo::new("y", &c.int32)],
                |this, args| {
                    this.set_field(0, args[0].clone());
                    this.set_field(1, args[1].clone());
                    Ok(())
                },
            )
            .build()
    }

    unsafe fn call_type(ty: &Type, args: Vec<*mut PyObject>) -> *mut PyObject {
        let tp = class_manager::get_or_create(ty).unwrap();
        let args = NewReference::from_raw(tuple_from_vec(args));
        PyObject_Call(tp as *mut PyObject, args.as_ptr(), std::ptr::null_mut())
    }

    #[test]
    fn test_constructor_binds_arguments() {
        runtime(|| unsafe {
            let ty = point();
            let ob = NewReference::checked(call_type(&ty, vec![long_from_i128(3), long_from_i128(4)])).unwrap();
            let obj = require_managed(ob.as_ptr()).unwrap();
            assert_eq!(obj.field(0), Value::I32(3));
            assert_eq!(obj.field(1), Value::I32(4));
        });
    }

    #[test]
    fn test_wrong_arity_names_the_signature() {
        runtime(|| unsafe {
            let ty = point();
            assert!(call_type(&ty, vec![long_from_i128(3)]).is_null());
            let err = crate::exceptions::rethrow_last();
            assert!(err.to_string().contains("Point"), "{}", err);
        });
    }

    #[test]
    fn test_abstract_class_cannot_be_instantiated() {
        runtime(|| unsafe {
            let ty = TypeBuilder::class("Demo", "Shape")
                .abstract_()
                .method(MethodBuilder::new("Area").returns(&core().double).abstract_())
                .build();
            assert!(call_type(&ty, vec![]).is_null());
            assert!(PyErr_ExceptionMatches(PyExc_TypeError()) != 0);
            PyErr_Clear();
        });
    }

    #[test]
    fn test_primitive_construction_returns_native_value() {
        runtime(|| unsafe {
            let ob = NewReference::checked(call_type(&core().int32, vec![long_from_i128(12)])).unwrap();
            assert!(PyLong_Check(ob.as_ptr()));
            assert_eq!(long_value(ob.as_ptr()), 12);
            assert!(call_type(&core().byte, vec![long_from_i128(300)]).is_null());
            assert!(PyErr_ExceptionMatches(PyExc_OverflowError()) != 0);
            PyErr_Clear();
        });
    }

    #[test]
    fn test_enum_from_int_converts_back() {
        runtime(|| unsafe {
            let c = core();
            let ty = TypeBuilder::enumeration("Demo", "Level", &c.int32)
                .variant("Low", 1)
                .variant("High", 5)
                .build();
            let ob = NewReference::checked(call_type(&ty, vec![long_from_i128(5)])).unwrap();
            let s = NewReference::checked(PyObject_Str(ob.as_ptr())).unwrap();
            assert_eq!(unicode_as_str(s.as_ptr()), Some("High"));
            let n = NewReference::checked(PyNumber_Index(ob.as_ptr())).unwrap();
            assert_eq!(long_value(n.as_ptr()), 5);
        });
    }

    #[test]
    fn test_open_generic_is_type_error() {
        runtime(|| unsafe {
            assert!(call_type(&core().list, vec![]).is_null());
            assert!(PyErr_ExceptionMatches(PyExc_TypeError()) != 0);
            PyErr_Clear();
        });
    }

    #[test]
    fn test_struct_without_arguments_is_zeroed() {
        runtime(|| unsafe {
            let c = core();
            let ty = TypeBuilder::structure("Demo", "Pair").field("A", &c.int32).build();
            let ob = NewReference::checked(call_type(&ty, vec![])).unwrap();
            assert_eq!(require_managed(ob.as_ptr()).unwrap().field(0), Value::I32(0));
        });
    }
}
