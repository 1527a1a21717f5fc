//! Slots shared by every bridged instance type
//!
//! This layer goes in last, so anything a kind-specific layer installed wins.
//! Most slots here are driven by well-known managed members: `ToString`,
//! `Equals`, `CompareTo`, `GetHashCode`, `Count` and the `Item` indexer.

use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::ffi::c_int;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tracing::trace;

use crate::binder::{CallArgs, MethodBinder};
use crate::clr_object::{clr_dealloc, get_managed_object, require_managed};
use crate::converter::{to_managed, to_python_value};
use crate::error::Result;
use crate::exceptions::{raise_as, unwrap_invoke};
use crate::extensions::iterator::element_type_of;
use crate::extensions::IteratorObject;
use crate::managed::{core, MethodInfo, ObjectRef, Type, Value};
use crate::reference::NewReference;
use crate::runtime::ffi::error::PyExc_TypeError;
use crate::runtime::ffi::object::{PyObject_GenericGetAttr, Py_HashPointer, Py_EQ, Py_GE, Py_GT, Py_LE, Py_LT, Py_NE};
use crate::runtime::ffi::refcount::Py_NewRef;
use crate::runtime::ffi::scalar::{unicode_as_str, unicode_from_str, PyBool_FromLong, Py_NotImplemented};
use crate::runtime::ffi::tuple::{tuple_items, PyTuple_Check};
use crate::runtime::ffi::types::obj_type_name;
use crate::runtime::ffi::{PyObject, Py_hash_t, Py_ssize_t};
use crate::trampoline::trampoline;
use crate::types::{CollectionMixinProvider, Slot, SlotTable};

pub fn fill(t: &mut SlotTable, ty: &Type) {
    t.insert("tp_dealloc", Slot::Destructor(clr_dealloc));
    t.insert("tp_repr", Slot::Unary(clr_repr));
    t.insert("tp_str", Slot::Unary(clr_str));
    t.insert("tp_richcompare", Slot::RichCompare(clr_richcompare));
    t.insert("tp_hash", Slot::Hash(clr_hash));

    if CollectionMixinProvider::is_collection(ty) {
        t.insert("tp_iter", Slot::Unary(clr_iter));
    }
    if has_length(ty) {
        t.insert("mp_length", Slot::Len(clr_length));
        t.insert("sq_length", Slot::Len(clr_length));
    }
    if let Some(indexer) = ty.indexer() {
        if indexer.getter().is_some() {
            t.insert("mp_subscript", Slot::Binary(indexer_get));
        }
        if indexer.setter().is_some() {
            t.insert("mp_ass_subscript", Slot::ObjObjArg(indexer_set));
        }
    }
    if ty.implements(&core().iget_attr) {
        t.insert("tp_getattro", Slot::Binary(intercepted_getattr));
    }
}

fn is_list(ty: &Type) -> bool {
    ty.generic_definition() == Some(&core().list)
}

fn has_length(ty: &Type) -> bool {
    is_list(ty) || count_property(ty).is_some()
}

fn count_property(ty: &Type) -> Option<Arc<crate::managed::PropertyInfo>> {
    ty.find_property("Count")
        .filter(|p| !p.is_static() && p.index_parameters().is_empty() && p.getter().is_some())
}

/// Instance method `name` taking exactly `arity` parameters, most derived first
fn instance_method(ty: &Type, name: &str, arity: usize) -> Option<Arc<MethodInfo>> {
    ty.find_methods(name)
        .into_iter()
        .find(|m| !m.is_static() && m.parameters().len() == arity)
}

unsafe fn not_implemented() -> *mut PyObject {
    Py_NewRef(Py_NotImplemented())
}

unsafe fn py_bool(value: bool) -> *mut PyObject {
    PyBool_FromLong(value as _)
}

unsafe extern "C" fn clr_repr(ob: *mut PyObject) -> *mut PyObject {
    trampoline("tp_repr", || {
        let obj = require_managed(ob)?;
        let text = format!("<{} object at {:#x}>", obj.ty().full_name(), ob as usize);
        NewReference::checked(unicode_from_str(&text)).map(NewReference::into_raw)
    })
}

/// `ToString()` when the type declares one, else the managed display form
unsafe extern "C" fn clr_str(ob: *mut PyObject) -> *mut PyObject {
    trampoline("tp_str", || {
        let obj = require_managed(ob)?;
        let text = match instance_method(obj.ty(), "ToString", 0) {
            Some(method) => {
                let value = method.invoke(Some(&obj), &mut []).map_err(unwrap_invoke)?;
                value.as_str().map(str::to_owned).unwrap_or_else(|| value.to_string())
            }
            None => Value::Object(obj).to_string(),
        };
        NewReference::checked(unicode_from_str(&text)).map(NewReference::into_raw)
    })
}

unsafe extern "C" fn clr_richcompare(ob: *mut PyObject, other: *mut PyObject, op: c_int) -> *mut PyObject {
    trampoline("tp_richcompare", || {
        let Some(obj) = get_managed_object(ob) else {
            return Ok(not_implemented());
        };
        let outcome = match op {
            Py_EQ | Py_NE => equals(&obj, other)?.map(|eq| eq == (op == Py_EQ)),
            Py_LT | Py_LE | Py_GT | Py_GE => compare(&obj, other)?.map(|ord| match op {
                Py_LT => ord == Ordering::Less,
                Py_LE => ord != Ordering::Greater,
                Py_GT => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }),
            _ => None,
        };
        Ok(match outcome {
            Some(b) => py_bool(b),
            None => not_implemented(),
        })
    })
}

/// None when the comparison is not defined for these operands
unsafe fn equals(obj: &ObjectRef, other: *mut PyObject) -> Result<Option<bool>> {
    if let Some(method) = instance_method(obj.ty(), "Equals", 1) {
        let Ok(arg) = to_managed(other, method.parameters()[0].ty()) else {
            return Ok(None);
        };
        let result = method.invoke(Some(obj), &mut [arg]).map_err(unwrap_invoke)?;
        return Ok(result.as_bool());
    }
    let Some(rhs) = get_managed_object(other) else {
        return Ok(None);
    };
    match (obj.boxed_value(), rhs.boxed_value()) {
        (Some(a), Some(b)) if obj.ty() == rhs.ty() => Ok(Some(a == b)),
        _ => Ok(Some(obj.ptr_eq(&rhs))),
    }
}

unsafe fn compare(obj: &ObjectRef, other: *mut PyObject) -> Result<Option<Ordering>> {
    if let Some(method) = instance_method(obj.ty(), "CompareTo", 1) {
        let Ok(arg) = to_managed(other, method.parameters()[0].ty()) else {
            return Ok(None);
        };
        let result = method.invoke(Some(obj), &mut [arg]).map_err(unwrap_invoke)?;
        return Ok(result.as_i128().map(|n| n.cmp(&0)));
    }
    let Some(rhs) = get_managed_object(other) else {
        return Ok(None);
    };
    if obj.ty() != rhs.ty() {
        return Ok(None);
    }
    Ok(match (obj.boxed_value(), rhs.boxed_value()) {
        (Some(Value::String(a)), Some(Value::String(b))) => Some(a.cmp(b)),
        (Some(a), Some(b)) => match (a.as_i128(), b.as_i128()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => a.as_f64().zip(b.as_f64()).and_then(|(x, y)| x.partial_cmp(&y)),
        },
        _ => None,
    })
}

/// `GetHashCode()`, then the boxed value, then identity
unsafe extern "C" fn clr_hash(ob: *mut PyObject) -> Py_hash_t {
    trampoline("tp_hash", || {
        let obj = require_managed(ob)?;
        let hash = if let Some(method) = instance_method(obj.ty(), "GetHashCode", 0) {
            let value = method.invoke(Some(&obj), &mut []).map_err(unwrap_invoke)?;
            value.as_i128().unwrap_or(0) as Py_hash_t
        } else if let Some(value) = obj.boxed_value() {
            hash_value(value)
        } else {
            return Ok(Py_HashPointer(obj.address() as *const _));
        };
        // -1 is the error sentinel
        Ok(if hash == -1 { -2 } else { hash })
    })
}

fn hash_value(value: &Value) -> Py_hash_t {
    let mut hasher = DefaultHasher::new();
    match value {
        Value::String(s) => s.hash(&mut hasher),
        Value::Char(c) => c.hash(&mut hasher),
        Value::Bool(b) => b.hash(&mut hasher),
        Value::F32(_) | Value::F64(_) => value.as_f64().unwrap_or(0.0).to_bits().hash(&mut hasher),
        other => other.as_i128().unwrap_or(0).hash(&mut hasher),
    }
    hasher.finish() as Py_hash_t
}

unsafe extern "C" fn clr_iter(ob: *mut PyObject) -> *mut PyObject {
    trampoline("tp_iter", || {
        let obj = require_managed(ob)?;
        IteratorObject::create(&obj, &element_type_of(obj.ty())).map(NewReference::into_raw)
    })
}

unsafe extern "C" fn clr_length(ob: *mut PyObject) -> Py_ssize_t {
    trampoline("sq_length", || {
        let obj = require_managed(ob)?;
        if let Some(items) = obj.as_list() {
            return Ok(items.lock().len() as Py_ssize_t);
        }
        if let Some(data) = obj.as_array() {
            return Ok(data.len() as Py_ssize_t);
        }
        let Some(count) = count_property(obj.ty()) else {
            return Ok(raise_as(PyExc_TypeError(), format!("object of type '{}' has no len()", obj.ty().full_name())));
        };
        let value = count.get(Some(&obj)).map_err(unwrap_invoke)?;
        Ok(value.as_i128().unwrap_or(0) as Py_ssize_t)
    })
}

/// A tuple key supplies one argument per index parameter
unsafe fn index_args(key: *mut PyObject) -> Vec<*mut PyObject> {
    if PyTuple_Check(key) {
        tuple_items(key).to_vec()
    } else {
        vec![key]
    }
}

/// Binder over the indexer accessor, or the message of the TypeError to raise
fn indexer_binder(obj: &ObjectRef, setter: bool) -> std::result::Result<MethodBinder, String> {
    let name = obj.ty().full_name();
    let indexer = obj.ty().indexer().ok_or_else(|| format!("'{}' object is not subscriptable", name))?;
    let accessor = if setter { indexer.setter() } else { indexer.getter() };
    let method = accessor.ok_or_else(|| format!("'{}' object does not support item assignment", name))?;
    Ok(MethodBinder::new(method.name(), vec![method.clone()]))
}

unsafe extern "C" fn indexer_get(ob: *mut PyObject, key: *mut PyObject) -> *mut PyObject {
    trampoline("mp_subscript", || {
        let obj = require_managed(ob)?;
        let binder = match indexer_binder(&obj, false) {
            Ok(binder) => binder,
            Err(msg) => return Ok(raise_as(PyExc_TypeError(), msg)),
        };
        let call = CallArgs::positional(&index_args(key));
        binder.invoke(Some(&obj), &call).map(NewReference::into_raw)
    })
}

unsafe extern "C" fn indexer_set(ob: *mut PyObject, key: *mut PyObject, value: *mut PyObject) -> c_int {
    trampoline("mp_ass_subscript", || {
        let obj = require_managed(ob)?;
        if value.is_null() {
            return Ok(raise_as(
                PyExc_TypeError(),
                format!("'{}' object does not support item deletion", obj.ty().full_name()),
            ));
        }
        let binder = match indexer_binder(&obj, true) {
            Ok(binder) => binder,
            Err(msg) => return Ok(raise_as(PyExc_TypeError(), msg)),
        };
        let mut args = index_args(key);
        args.push(value);
        binder.invoke(Some(&obj), &CallArgs::positional(&args))?.dispose();
        Ok(0)
    })
}

/// Ask the managed object first; fall back to normal lookup when it declines
unsafe extern "C" fn intercepted_getattr(ob: *mut PyObject, name: *mut PyObject) -> *mut PyObject {
    trampoline("tp_getattro", || {
        let (Some(obj), Some(attr)) = (get_managed_object(ob), unicode_as_str(name)) else {
            return Ok(PyObject_GenericGetAttr(ob, name));
        };
        let Some(method) = instance_method(obj.ty(), "TryGetAttr", 2) else {
            return Ok(PyObject_GenericGetAttr(ob, name));
        };
        let mut args = [Value::string(attr), Value::Null];
        let found = method.invoke(Some(&obj), &mut args).map_err(unwrap_invoke)?;
        if found.as_bool() == Some(true) {
            trace!(event = "getattr_intercepted", ty = %obj.ty(), attr, source = obj_type_name(ob));
            return to_python_value(&args[1]).map(NewReference::into_raw);
        }
        Ok(PyObject_GenericGetAttr(ob, name))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class_manager;
    use crate::clr_object::wrap;
    use crate::managed::{MethodBuilder, ParameterInfo, PropertyBuilder, TypeBuilder};
    use crate::runtime::ffi::error::{PyErr_Clear, PyErr_ExceptionMatches};
    use crate::runtime::ffi::mapping::{PyObject_GetItem, PyObject_SetItem};
    use crate::runtime::ffi::object::{PyObject_GetAttrString, PyObject_Hash, PyObject_RichCompareBool, PyObject_Size, PyObject_Str};
    use crate::runtime::ffi::scalar::{long_from_i128, long_value};
    use crate::testing::runtime;

    fn money() -> Type {
        let c = core();
        TypeBuilder::class("Demo", "Money")
            .field("Cents", &c.int64)
            .method(
                MethodBuilder::new("ToString")
                    .returns(&c.string)
                    .body(|this, _| {
                        let cents = this.and_then(|t| t.field(0).as_i128()).unwrap_or(0);
                        Ok(Value::string(&format!("${}.{:02}", cents / 100, cents % 100)))
                    }),
            )
            .method(
                MethodBuilder::new("Equals")
                    .param("other", &c.object)
                    .returns(&c.boolean)
                    .body(|this, args| {
                        let mine = this.and_then(|t| t.field(0).as_i128());
                        let theirs = args[0].as_object().and_then(|o| o.field(0).as_i128());
                        Ok(Value::Bool(mine.is_some() && mine == theirs))
                    }),
            )
            .method(
                MethodBuilder::new("GetHashCode")
                    .returns(&c.int32)
                    .body(|this, _| Ok(Value::I32(this.and_then(|t| t.field(0).as_i128()).unwrap_or(0) as i32))),
            )
            .build()
    }

    unsafe fn cents(ty: &Type, value: i64) -> NewReference {
        let obj = ObjectRef::alloc(ty);
        obj.set_field(0, Value::I64(value));
        wrap(&obj, ty).unwrap()
    }

    #[test]
    fn test_str_uses_to_string() {
        runtime(|| unsafe {
            let ty = money();
            let a = cents(&ty, 1205);
            let s = NewReference::checked(PyObject_Str(a.as_ptr())).unwrap();
            assert_eq!(unicode_as_str(s.as_ptr()), Some("$12.05"));
        });
    }

    #[test]
    fn test_equals_and_hash_follow_managed_members() {
        runtime(|| unsafe {
            let ty = money();
            let a = cents(&ty, 500);
            let b = cents(&ty, 500);
            let c = cents(&ty, 700);
            assert_eq!(PyObject_RichCompareBool(a.as_ptr(), b.as_ptr(), Py_EQ), 1);
            assert_eq!(PyObject_RichCompareBool(a.as_ptr(), c.as_ptr(), Py_NE), 1);
            assert_eq!(PyObject_Hash(a.as_ptr()), 500);
        });
    }

    #[test]
    fn test_plain_objects_compare_by_identity() {
        runtime(|| unsafe {
            let ty = TypeBuilder::class("Demo", "Token").build();
            let obj = ObjectRef::alloc(&ty);
            let first = wrap(&obj, &ty).unwrap();
            let second = wrap(&obj, &ty).unwrap();
            let other = wrap(&ObjectRef::alloc(&ty), &ty).unwrap();
            assert_ne!(first.as_ptr(), second.as_ptr());
            assert_eq!(PyObject_RichCompareBool(first.as_ptr(), second.as_ptr(), Py_EQ), 1);
            assert_eq!(PyObject_RichCompareBool(first.as_ptr(), other.as_ptr(), Py_EQ), 0);
            assert_eq!(PyObject_Hash(first.as_ptr()), PyObject_Hash(second.as_ptr()));
        });
    }

    #[test]
    fn test_ordering_without_compare_to_is_type_error() {
        runtime(|| unsafe {
            let ty = TypeBuilder::class("Demo", "Unordered").build();
            let a = wrap(&ObjectRef::alloc(&ty), &ty).unwrap();
            let b = wrap(&ObjectRef::alloc(&ty), &ty).unwrap();
            assert_eq!(PyObject_RichCompareBool(a.as_ptr(), b.as_ptr(), Py_LT), -1);
            assert!(PyErr_ExceptionMatches(PyExc_TypeError()) != 0);
            PyErr_Clear();
        });
    }

    #[test]
    fn test_indexer_and_count() {
        runtime(|| unsafe {
            let c = core();
            let ty = TypeBuilder::class("Demo", "Slots")
                .field("Last", &c.int32)
                .property(
                    PropertyBuilder::new("Item", &c.int32)
                        .index(ParameterInfo::new("i", &c.int32))
                        .getter(|_, args| Ok(Value::I32(args[0].as_i128().unwrap_or(0) as i32 * 10)))
                        .setter(|this, args| {
                            if let Some(t) = this {
                                t.set_field(0, args[1].clone());
                            }
                            Ok(Value::Null)
                        }),
                )
                .property(PropertyBuilder::new("Count", &c.int32).getter(|_, _| Ok(Value::I32(3))))
                .build();
            let obj = ObjectRef::alloc(&ty);
            let wrapper = wrap(&obj, &ty).unwrap();

            let key = NewReference::from_raw(long_from_i128(4));
            let item = NewReference::checked(PyObject_GetItem(wrapper.as_ptr(), key.as_ptr())).unwrap();
            assert_eq!(long_value(item.as_ptr()), 40);

            let value = NewReference::from_raw(long_from_i128(9));
            assert_eq!(PyObject_SetItem(wrapper.as_ptr(), key.as_ptr(), value.as_ptr()), 0);
            assert_eq!(obj.field(0), Value::I32(9));
            assert_eq!(PyObject_Size(wrapper.as_ptr()), 3);
        });
    }

    #[test]
    fn test_missing_length_and_indexer_raise_type_error() {
        runtime(|| unsafe {
            let c = core();
            let plain = TypeBuilder::class("Demo", "Token").build();
            let token = wrap(&ObjectRef::alloc(&plain), &plain).unwrap();
            let key = NewReference::from_raw(long_from_i128(0));

            assert_eq!(clr_length(token.as_ptr()), -1);
            assert!(PyErr_ExceptionMatches(PyExc_TypeError()) != 0);
            PyErr_Clear();

            assert!(indexer_get(token.as_ptr(), key.as_ptr()).is_null());
            assert!(PyErr_ExceptionMatches(PyExc_TypeError()) != 0);
            PyErr_Clear();

            let frozen = TypeBuilder::class("Demo", "Frozen")
                .property(
                    PropertyBuilder::new("Item", &c.int32)
                        .index(ParameterInfo::new("i", &c.int32))
                        .getter(|_, _| Ok(Value::I32(1))),
                )
                .build();
            let ob = wrap(&ObjectRef::alloc(&frozen), &frozen).unwrap();
            assert_eq!(indexer_set(ob.as_ptr(), key.as_ptr(), key.as_ptr()), -1);
            assert!(PyErr_ExceptionMatches(PyExc_TypeError()) != 0);
            PyErr_Clear();
        });
    }

    #[test]
    fn test_get_attr_interception_falls_back() {
        runtime(|| unsafe {
            let c = core();
            let ty = TypeBuilder::class("Demo", "Dynamic")
                .implements(&c.iget_attr)
                .auto_property("Real", &c.int32)
                .method(
                    MethodBuilder::new("TryGetAttr")
                        .param("name", &c.string)
                        .parameter(ParameterInfo::new("value", &c.object).out())
                        .returns(&c.boolean)
                        .body(|_, args| {
                            if args[0].as_str() == Some("magic") {
                                args[1] = Value::I32(42);
                                return Ok(Value::Bool(true));
                            }
                            Ok(Value::Bool(false))
                        }),
                )
                .build();
            class_manager::get_or_create(&ty).unwrap();
            let obj = ObjectRef::alloc(&ty);
            let wrapper = wrap(&obj, &ty).unwrap();
            let magic = NewReference::checked(PyObject_GetAttrString(wrapper.as_ptr(), c"magic".as_ptr())).unwrap();
            assert_eq!(long_value(magic.as_ptr()), 42);
            let real = NewReference::checked(PyObject_GetAttrString(wrapper.as_ptr(), c"Real".as_ptr())).unwrap();
            assert_eq!(long_value(real.as_ptr()), 0);
        });
    }
}
