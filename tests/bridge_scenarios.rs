//! End-to-end scenarios: managed types built at run time, driven from the
//! native side through the interpreter's object protocol.

use std::ptr::null_mut;

use typebridge::class_manager;
use typebridge::clr_object::{require_managed, wrap};
use typebridge::managed::{core, ManagedException, MethodBuilder, ObjectRef, ParameterInfo, Type, TypeBuilder, Value};
use typebridge::{rethrow_last, BridgeConfig, BridgeError, NewReference};
use typebridge_runtime::object::{Py_buffer, PyBUF_FULL};
use typebridge_runtime::{
    long_from_i128, long_value, tuple_from_vec, unicode_as_str, unicode_from_str, with_gil, PyBaseObject_Type,
    PyBuffer_Release, PyErr_Occurred, PyObject, PyObject_Call, PyObject_GetAttrString, PyObject_GetBuffer,
    PyTuple_Size, PyTypeObject,
};

fn bridge<R>(f: impl FnOnce() -> R) -> R {
    typebridge::initialize(BridgeConfig::default());
    with_gil(f)
}

unsafe fn call(callable: *mut PyObject, args: Vec<*mut PyObject>) -> *mut PyObject {
    let args = NewReference::from_raw(tuple_from_vec(args));
    PyObject_Call(callable, args.as_ptr(), null_mut())
}

unsafe fn attr(ob: *mut PyObject, name: &std::ffi::CStr) -> NewReference {
    NewReference::checked(PyObject_GetAttrString(ob, name.as_ptr())).unwrap()
}

fn point() -> Type {
    let c = core();
    TypeBuilder::class("Geometry", "Point")
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

#[test]
fn point_fields_read_as_native_ints() {
    bridge(|| unsafe {
        let ty = point();
        let tp = class_manager::get_or_create(&ty).unwrap();

        let object_tp = class_manager::get_or_create(&core().object).unwrap();
        assert_eq!((*tp).tp_base, object_tp);
        assert_eq!(PyTuple_Size((*tp).tp_bases), 1);

        let p = NewReference::checked(call(tp as *mut PyObject, vec![long_from_i128(3), long_from_i128(4)])).unwrap();
        assert_eq!(long_value(attr(p.as_ptr(), c"X").as_ptr()), 3);
        assert_eq!(long_value(attr(p.as_ptr(), c"Y").as_ptr()), 4);

        let obj = require_managed(p.as_ptr()).unwrap();
        assert_eq!(obj.field(0), Value::I32(3));
    });
}

#[test]
fn wrapper_round_trip_keeps_identity() {
    bridge(|| unsafe {
        let ty = point();
        let obj = ObjectRef::alloc(&ty);
        let ob = wrap(&obj, &ty).unwrap();
        assert!(require_managed(ob.as_ptr()).unwrap().ptr_eq(&obj));
    });
}

#[test]
fn type_cache_is_idempotent() {
    bridge(|| unsafe {
        let ty = point();
        let first = class_manager::get_or_create(&ty).unwrap();
        let second = class_manager::get_or_create(&ty).unwrap();
        assert_eq!(first, second);
        assert_eq!(class_manager::lookup(&ty), Some(first));
    });
}

fn calculator() -> Type {
    let c = core();
    let text = |s: &'static str| move |_: Option<&ObjectRef>, _: &mut [Value]| Ok::<_, ManagedException>(Value::string(s));
    TypeBuilder::class("Demo", "Calculator")
        .default_constructor()
        .method(MethodBuilder::new("Method").param("a", &c.int32).returns(&c.string).body(text("one")))
        .method(
            MethodBuilder::new("Method")
                .param("a", &c.int32)
                .param("b", &c.int32)
                .returns(&c.string)
                .body(text("two")),
        )
        .method(MethodBuilder::new("Describe").param("o", &c.object).returns(&c.string).body(text("object")))
        .method(MethodBuilder::new("Describe").param("s", &c.string).returns(&c.string).body(text("string")))
        .method(MethodBuilder::new("Width").param("n", &c.int64).returns(&c.string).body(text("long")))
        .method(MethodBuilder::new("Width").param("n", &c.int32).returns(&c.string).body(text("int")))
        .build()
}

unsafe fn calculator_instance() -> NewReference {
    let tp = class_manager::get_or_create(&calculator()).unwrap();
    NewReference::checked(call(tp as *mut PyObject, Vec::new())).unwrap()
}

unsafe fn text_of(ob: *mut PyObject) -> String {
    let result = NewReference::checked(ob).unwrap();
    unicode_as_str(result.as_ptr()).unwrap_or_default().to_owned()
}

#[test]
fn overloads_resolve_through_native_calls() {
    bridge(|| unsafe {
        let calc = calculator_instance();

        let method = attr(calc.as_ptr(), c"Method");
        assert_eq!(text_of(call(method.as_ptr(), vec![long_from_i128(1)])), "one");
        assert_eq!(text_of(call(method.as_ptr(), vec![long_from_i128(1), long_from_i128(2)])), "two");

        let describe = attr(calc.as_ptr(), c"Describe");
        assert_eq!(text_of(call(describe.as_ptr(), vec![unicode_from_str("hi")])), "string");
        assert_eq!(text_of(call(describe.as_ptr(), vec![long_from_i128(5)])), "object");

        let width = attr(calc.as_ptr(), c"Width");
        assert_eq!(text_of(call(width.as_ptr(), vec![long_from_i128(7)])), "int");
        assert_eq!(text_of(call(width.as_ptr(), vec![long_from_i128(1 << 40)])), "long");
    });
}

#[test]
fn no_matching_overload_names_the_method() {
    bridge(|| unsafe {
        let calc = calculator_instance();
        let method = attr(calc.as_ptr(), c"Method");
        assert!(call(method.as_ptr(), Vec::new()).is_null());
        match rethrow_last() {
            BridgeError::Python(e) => {
                assert_eq!(e.type_name(), "TypeError");
                assert!(e.message().contains("No method matches"), "{}", e.message());
                assert!(e.message().contains("Method"), "{}", e.message());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(PyErr_Occurred().is_null());
    });
}

#[test]
fn managed_exception_comes_back_as_the_same_object() {
    bridge(|| unsafe {
        let c = core();
        let thrown = ManagedException::new(&c.invalid_operation_exception, "vault is sealed");
        let raised = thrown.clone();
        let vault = TypeBuilder::class("Demo", "Vault")
            .default_constructor()
            .method(MethodBuilder::new("Open").body(move |_, _| Err(raised.clone())))
            .build();
        let tp = class_manager::get_or_create(&vault).unwrap();
        let v = NewReference::checked(call(tp as *mut PyObject, Vec::new())).unwrap();
        let open = attr(v.as_ptr(), c"Open");

        assert!(call(open.as_ptr(), Vec::new()).is_null());
        match rethrow_last() {
            BridgeError::Managed(e) => {
                assert!(e.object().ptr_eq(thrown.object()));
                assert_eq!(e.message(), "vault is sealed");
            }
            other => panic!("expected the managed exception back, got {other}"),
        }
    });
}

#[test]
fn layout_grows_only_for_missing_slots() {
    bridge(|| unsafe {
        let ptr = std::mem::size_of::<usize>() as isize;
        let object_tp = class_manager::get_or_create(&core().object).unwrap();
        let native_object = PyBaseObject_Type();
        assert_eq!((*object_tp).tp_basicsize, (*native_object).tp_basicsize + 3 * ptr);

        // The bridged object already reserves dict, weak list and handle
        let point_tp = class_manager::get_or_create(&point()).unwrap();
        assert_eq!((*point_tp).tp_basicsize, (*object_tp).tp_basicsize);
        assert_eq!((*point_tp).tp_dictoffset, (*object_tp).tp_dictoffset);

        let exc_tp: *mut PyTypeObject = class_manager::get_or_create(&core().exception).unwrap();
        let native_exc = (*exc_tp).tp_base;
        // Exceptions bring their own dict; only the weak list and handle are added
        assert_eq!((*exc_tp).tp_dictoffset, (*native_exc).tp_dictoffset);
        assert_eq!((*exc_tp).tp_basicsize, (*native_exc).tp_basicsize + 2 * ptr);
    });
}

#[test]
fn int_array_exports_a_writable_buffer() {
    bridge(|| unsafe {
        let c = core();
        let array = ObjectRef::array_from(&c.int32, vec![Value::I32(1), Value::I32(2), Value::I32(3)]).unwrap();
        let ob = wrap(&array, &c.int32.make_array_type(1)).unwrap();

        let mut view = Py_buffer::new();
        assert_eq!(PyObject_GetBuffer(ob.as_ptr(), &mut view, PyBUF_FULL), 0);
        assert_eq!((view.itemsize, view.ndim, view.readonly), (4, 1, 0));
        assert_eq!((*view.shape, *view.strides), (3, 4));
        *(view.buf as *mut i32).add(1) = 20;
        assert_eq!(array.as_array().unwrap().pin_count(), 1);

        PyBuffer_Release(&mut view);
        assert_eq!(array.as_array().unwrap().pin_count(), 0);
        assert_eq!(array.as_array().unwrap().get(1).unwrap(), Value::I32(20));
    });
}
