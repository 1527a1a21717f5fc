//! Native subclasses of bridged types
//!
//! `class Sub(Bridged): ...` reaches the metatype's `tp_new`. Besides the
//! native type, a managed type deriving from the bridged base is generated
//! so that managed code sees instances of the subclass as real managed
//! objects. Each virtual method of the base that the class body redefines
//! gets a managed override which calls back into the native definition.
//! Instances remember their native object, so they convert back to it
//! instead of getting a second wrapper.

use std::cell::RefCell;
use std::ptr::null_mut;
use std::sync::Arc;

use tracing::{debug, trace};

use super::{distinct_overloads, ClassBase};
use crate::class_manager;
use crate::converter::{to_managed, to_python};
use crate::error::{BridgeError, Result};
use crate::exceptions::raise_as;
use crate::extensions::MethodObject;
use crate::managed::{
    Invoker, ManagedException, MethodBuilder, MethodInfo, ObjectRef, Type, TypeBuilder, TypeCode, TypeKind, Value,
};
use crate::reference::NewReference;
use crate::runtime::ffi::dict::{PyDict_Check, PyDict_Contains, PyDict_GetItemString};
use crate::runtime::ffi::error::PyExc_TypeError;
use crate::runtime::ffi::gil::with_gil;
use crate::runtime::ffi::object::{PyObject_Call, Py_TYPE};
use crate::runtime::ffi::refcount::Py_NewRef;
use crate::runtime::ffi::scalar::{unicode_as_str, unicode_from_str};
use crate::runtime::ffi::tuple::{tuple_from_vec, tuple_items, PyTuple_Check};
use crate::runtime::ffi::types::{type_name, type_new, PyType_Check, _PyType_Lookup};
use crate::runtime::ffi::{PyObject, PyTypeObject};
use crate::types::meta_type::{bind_class, handle_offset_of};
use crate::types::class_of;

thread_local! {
    /// Overrides running on this thread, by object address and signature
    static ACTIVE: RefCell<Vec<(usize, String)>> = const { RefCell::new(Vec::new()) };
}

/// `tp_new` of the metatype
///
/// Classes with no bridged base are handed to the plain type constructor.
///
/// # Safety
/// The interpreter lock must be held; `args` is the `(name, bases, dict)`
/// tuple of a class statement
pub unsafe fn create_subclass(meta: *mut PyTypeObject, args: *mut PyObject, kwds: *mut PyObject) -> Result<*mut PyObject> {
    let items = if args.is_null() { &[][..] } else { tuple_items(args) };
    let [name, bases, dict] = items else {
        return plain(meta, args, kwds);
    };
    let (name, bases, dict) = (*name, *bases, *dict);
    if !PyTuple_Check(bases) || !PyDict_Check(dict) {
        return plain(meta, args, kwds);
    }
    let bridged = tuple_items(bases)
        .iter()
        .map(|&b| b as *mut PyTypeObject)
        .find(|&b| PyType_Check(b as *mut PyObject) && class_of(b).is_some());
    let Some(base_tp) = bridged else {
        return plain(meta, args, kwds);
    };
    let Some(base_class) = class_of(base_tp) else {
        return plain(meta, args, kwds);
    };
    if !base_class.is_subclassable() {
        return Ok(raise_as(
            PyExc_TypeError(),
            format!("type '{}' is not an acceptable base type", type_name(base_tp)),
        ));
    }
    let handle_offset = handle_offset_of(base_tp).ok_or_else(|| {
        BridgeError::Configuration(format!("'{}' has no managed handle slot", type_name(base_tp)))
    })?;

    let class_name = unicode_as_str(name)
        .ok_or_else(|| BridgeError::InvalidArgument("class name must be a string".into()))?
        .to_owned();
    let namespace = module_of(dict).unwrap_or_else(|| base_class.ty().namespace().to_owned());
    let ty = derive_type(base_class.ty(), &namespace, &class_name, dict)?;

    let tp = NewReference::checked(type_new(meta, args, kwds))?;
    bind_class(tp.as_ptr() as *mut PyTypeObject, handle_offset, Arc::new(ClassBase::derived(&ty)));
    let result = NewReference::from_nullable(tp.borrow());
    class_manager::register(&ty, tp)?;
    debug!(event = "derived_type_created", ty = %ty, base = %base_class.ty(), "native subclass of a bridged type");
    Ok(result.into_raw())
}

unsafe fn plain(meta: *mut PyTypeObject, args: *mut PyObject, kwds: *mut PyObject) -> Result<*mut PyObject> {
    NewReference::checked(type_new(meta, args, kwds)).map(NewReference::into_raw)
}

unsafe fn module_of(dict: *mut PyObject) -> Option<String> {
    let module = PyDict_GetItemString(dict, c"__module__".as_ptr());
    if module.is_null() {
        return None;
    }
    unicode_as_str(module).map(str::to_owned)
}

/// Managed type under `base` overriding every virtual method `dict` redefines
unsafe fn derive_type(base: &Type, namespace: &str, name: &str, dict: *mut PyObject) -> Result<Type> {
    let mut names: Vec<String> = Vec::new();
    for t in base.ancestors() {
        for n in t.members().method_names() {
            if !names.iter().any(|seen| seen == n) {
                names.push(n.to_owned());
            }
        }
    }
    let mut overridden: Vec<Arc<MethodInfo>> = Vec::new();
    for n in &names {
        let key = NewReference::checked(unicode_from_str(n))?;
        if PyDict_Contains(dict, key.as_ptr()) != 1 {
            continue;
        }
        overridden.extend(
            distinct_overloads(base.find_methods(n))
                .into_iter()
                .filter(|m| m.is_virtual() && !m.is_static()),
        );
    }
    trace!(event = "derived_overrides", name, count = overridden.len());

    let ty = TypeBuilder::new(namespace, name, TypeKind::Class, TypeCode::Object)
        .base(base)
        .derived_from_native()
        .build_with(move |_, m| {
            for method in overridden {
                let mut builder = MethodBuilder::new(method.name()).virtual_();
                for p in method.parameters() {
                    builder = builder.parameter(p.clone());
                }
                if let Some(rt) = method.return_type() {
                    builder = builder.returns(rt);
                }
                m.method(builder.with_invoker(override_invoker(method)));
            }
        });
    Ok(ty)
}

/// Pops its entry when the native call returns or unwinds
struct ActiveGuard;

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        ACTIVE.with(|a| {
            a.borrow_mut().pop();
        });
    }
}

fn override_invoker(base: Arc<MethodInfo>) -> Invoker {
    Arc::new(move |this: Option<&ObjectRef>, args: &mut [Value]| {
        let Some(this) = this else {
            return Err(ManagedException::null_reference(format!("{} needs a target", base.signature())));
        };
        let key = (this.address(), base.signature());
        // The native definition calling the base implementation lands here again
        let reentered = ACTIVE.with(|a| a.borrow().contains(&key));
        if reentered {
            return call_base(&base, this, args);
        }
        ACTIVE.with(|a| a.borrow_mut().push(key));
        let _guard = ActiveGuard;
        with_gil(|| unsafe { call_native(&base, this, args) })
    })
}

fn call_base(base: &MethodInfo, this: &ObjectRef, args: &mut [Value]) -> std::result::Result<Value, ManagedException> {
    match &base.invoker {
        Some(body) => body(Some(this), args),
        None => Err(ManagedException::not_supported(format!(
            "{} is abstract and has no native definition",
            base.signature()
        ))),
    }
}

unsafe fn call_native(base: &MethodInfo, this: &ObjectRef, args: &mut [Value]) -> std::result::Result<Value, ManagedException> {
    let native = this.native_self();
    if native.is_null() {
        return call_base(base, this, args);
    }
    let attr = NewReference::checked(unicode_from_str(base.name())).map_err(ManagedException::from_bridge_error)?;
    let func = _PyType_Lookup(Py_TYPE(native), attr.as_ptr());
    // Not redefined on this native class, or only the bridged descriptor
    if func.is_null() || MethodObject::from_object(func).is_some() {
        return call_base(base, this, args);
    }
    invoke_native(base, func, native, args).map_err(ManagedException::from_bridge_error)
}

unsafe fn invoke_native(base: &MethodInfo, func: *mut PyObject, native: *mut PyObject, args: &[Value]) -> Result<Value> {
    let mut converted = Vec::with_capacity(args.len() + 1);
    converted.push(NewReference::from_raw(Py_NewRef(native)));
    for (value, param) in args.iter().zip(base.parameters()) {
        converted.push(to_python(value, param.ty())?);
    }
    let tuple = NewReference::checked(tuple_from_vec(converted.into_iter().map(NewReference::into_raw).collect()))?;
    let result = NewReference::checked(PyObject_Call(func, tuple.as_ptr(), null_mut()))?;
    match base.return_type() {
        Some(rt) => Ok(to_managed(result.as_ptr(), rt)?),
        None => Ok(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clr_object::{get_managed_object, require_managed};
    use crate::converter::to_python_value;
    use crate::managed::core;
    use crate::runtime::ffi::dict::{PyDict_New, PyDict_SetItemString};
    use crate::runtime::ffi::error::{PyErr_Clear, PyErr_ExceptionMatches};
    use crate::runtime::ffi::function::{PyCFunction_New, METH_VARARGS};
    use crate::runtime::ffi::object::PyObject_CallNoArgs;
    use crate::runtime::ffi::tuple::PyTuple_Size;
    use crate::runtime::ffi::PyMethodDef;
    use crate::testing::runtime;

    fn greeter() -> Type {
        let c = core();
        TypeBuilder::class("Demo", "Greeter")
            .default_constructor()
            .method(
                MethodBuilder::new("Greet")
                    .param("name", &c.string)
                    .returns(&c.string)
                    .virtual_()
                    .body(|_, args| Ok(Value::string(&format!("hello {}", args[0].as_str().unwrap_or("?"))))),
            )
            .method(MethodBuilder::new("Wave").returns(&c.string).body(|_, _| Ok(Value::string("wave"))))
            .build()
    }

    /// Native definition of `Greet`: `(self, name)`
    unsafe extern "C" fn native_greet(_slf: *mut PyObject, args: *mut PyObject) -> *mut PyObject {
        let items = tuple_items(args);
        let own = get_managed_object(items[0]).is_some();
        let name = unicode_as_str(items[1]).unwrap_or("?");
        unicode_from_str(&format!("hi {} ({}, {})", name, own, PyTuple_Size(args)))
    }

    unsafe fn subclass(base: &Type, with_override: bool) -> NewReference {
        let base_tp = class_manager::get_or_create(base).unwrap();
        let dict = NewReference::from_raw(PyDict_New());
        if with_override {
            let def: &'static PyMethodDef = Box::leak(Box::new(PyMethodDef {
                ml_name: c"Greet".as_ptr(),
                ml_meth: native_greet as *mut std::ffi::c_void,
                ml_flags: METH_VARARGS,
                ml_doc: std::ptr::null(),
            }));
            let func = NewReference::checked(PyCFunction_New(def, null_mut())).unwrap();
            PyDict_SetItemString(dict.as_ptr(), c"Greet".as_ptr(), func.as_ptr());
        }
        let name = unicode_from_str("Polite");
        let bases = tuple_from_vec(vec![Py_NewRef(base_tp as *mut PyObject)]);
        let args = NewReference::from_raw(tuple_from_vec(vec![name, bases, Py_NewRef(dict.as_ptr())]));
        NewReference::checked(PyObject_Call(Py_TYPE(base_tp as *mut PyObject) as *mut PyObject, args.as_ptr(), null_mut()))
            .unwrap()
    }

    #[test]
    fn test_subclass_gets_a_derived_managed_type() {
        runtime(|| unsafe {
            let base = greeter();
            let sub = subclass(&base, true);
            let class = class_of(sub.as_ptr() as *mut PyTypeObject).unwrap();
            assert_eq!(class.kind(), super::super::ClassKind::Derived);
            assert!(class.ty().is_subclass_of(&base));
            assert!(class.ty().is_derived_from_native());
            assert_eq!(class.ty().members().methods.len(), 1, "only the redefined virtual is overridden");
        });
    }

    #[test]
    fn test_virtual_call_reaches_native_definition() {
        runtime(|| unsafe {
            let base = greeter();
            let sub = subclass(&base, true);
            let instance = NewReference::checked(PyObject_CallNoArgs(sub.as_ptr())).unwrap();
            let obj = require_managed(instance.as_ptr()).unwrap();
            assert_eq!(obj.native_self(), instance.as_ptr());

            let greet = base.find_methods("Greet").remove(0);
            let result = greet.invoke(Some(&obj), &mut [Value::string("Ada")]).unwrap();
            assert_eq!(result.as_str(), Some("hi Ada (true, 2)"));
        });
    }

    #[test]
    fn test_identity_survives_round_trip() {
        runtime(|| unsafe {
            let base = greeter();
            let sub = subclass(&base, false);
            let instance = NewReference::checked(PyObject_CallNoArgs(sub.as_ptr())).unwrap();
            let obj = require_managed(instance.as_ptr()).unwrap();
            let back = to_python_value(&Value::Object(obj.clone())).unwrap();
            assert_eq!(back.as_ptr(), instance.as_ptr());

            let greet = base.find_methods("Greet").remove(0);
            let result = greet.invoke(Some(&obj), &mut [Value::string("Bo")]).unwrap();
            assert_eq!(result.as_str(), Some("hello Bo"));
        });
    }

    #[test]
    fn test_sealed_base_is_rejected() {
        runtime(|| unsafe {
            let sealed = TypeBuilder::class("Demo", "Closed").sealed().build();
            let base_tp = class_manager::get_or_create(&sealed).unwrap();
            let bases = tuple_from_vec(vec![Py_NewRef(base_tp as *mut PyObject)]);
            let args = NewReference::from_raw(tuple_from_vec(vec![unicode_from_str("Open"), bases, PyDict_New()]));
            let meta = Py_TYPE(base_tp as *mut PyObject);
            assert!(create_subclass(meta, args.as_ptr(), null_mut()).unwrap().is_null());
            assert!(PyErr_ExceptionMatches(PyExc_TypeError()) != 0);
            PyErr_Clear();
        });
    }
}
