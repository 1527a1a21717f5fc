//! Operator overloads as numeric slots
//!
//! A static `op_Addition` and friends on the managed type fill the matching
//! `nb_*` slot. The thunk binds the overloads of whichever operand is a
//! wrapper, left operand first, and answers `NotImplemented` when none of
//! them accepts the operands so the interpreter can try the reflected form.

use tracing::trace;

use crate::binder::{CallArgs, MethodBinder};
use crate::clr_object::get_managed_object;
use crate::error::{BridgeError, Result};
use crate::managed::{MethodInfo, Type};
use crate::reference::NewReference;
use crate::runtime::ffi::refcount::Py_NewRef;
use crate::runtime::ffi::scalar::Py_NotImplemented;
use crate::runtime::ffi::PyObject;
use crate::trampoline::trampoline;
use crate::types::{Slot, SlotTable};

fn static_overloads(ty: &Type, op: &str, arity: usize) -> Vec<std::sync::Arc<MethodInfo>> {
    ty.find_methods(op)
        .into_iter()
        .filter(|m| m.is_static() && m.parameters().len() == arity)
        .collect()
}

/// Bind `op` against the operands' types; None means no overload applies
unsafe fn dispatch(op: &str, operands: &[*mut PyObject]) -> Result<Option<NewReference>> {
    let mut tried: Vec<Type> = Vec::with_capacity(operands.len());
    for &ob in operands {
        let Some(obj) = get_managed_object(ob) else { continue };
        let ty = obj.ty().clone();
        if tried.contains(&ty) {
            continue;
        }
        let methods = static_overloads(&ty, op, operands.len());
        tried.push(ty);
        if methods.is_empty() {
            continue;
        }
        let binder = MethodBinder::new(op, methods);
        match binder.bind(None, &CallArgs::positional(operands)) {
            Ok(binding) => return binding.invoke().map(Some),
            Err(BridgeError::NoMatch { .. } | BridgeError::Conversion(_) | BridgeError::AmbiguousOverload { .. }) => {
                trace!(event = "operator_unmatched", op, "trying the other operand");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(None)
}

unsafe fn answer(result: Option<NewReference>) -> *mut PyObject {
    match result {
        Some(r) => r.into_raw(),
        None => Py_NewRef(Py_NotImplemented()),
    }
}

macro_rules! binary_operators {
    ($($slot:literal => $op:literal, $thunk:ident;)*) => {
        $(
            unsafe extern "C" fn $thunk(a: *mut PyObject, b: *mut PyObject) -> *mut PyObject {
                trampoline($slot, || dispatch($op, &[a, b]).map(|r| answer(r)))
            }
        )*

        const BINARY: &[(&str, &str, unsafe extern "C" fn(*mut PyObject, *mut PyObject) -> *mut PyObject)] = &[
            $(($slot, $op, $thunk),)*
        ];
    };
}

macro_rules! unary_operators {
    ($($slot:literal => $op:literal, $thunk:ident;)*) => {
        $(
            unsafe extern "C" fn $thunk(a: *mut PyObject) -> *mut PyObject {
                trampoline($slot, || dispatch($op, &[a]).map(|r| answer(r)))
            }
        )*

        const UNARY: &[(&str, &str, unsafe extern "C" fn(*mut PyObject) -> *mut PyObject)] = &[
            $(($slot, $op, $thunk),)*
        ];
    };
}

binary_operators! {
    "nb_add" => "op_Addition", op_add;
    "nb_subtract" => "op_Subtraction", op_subtract;
    "nb_multiply" => "op_Multiply", op_multiply;
    "nb_true_divide" => "op_Division", op_divide;
    "nb_remainder" => "op_Modulus", op_modulus;
    "nb_and" => "op_BitwiseAnd", op_and;
    "nb_or" => "op_BitwiseOr", op_or;
    "nb_xor" => "op_ExclusiveOr", op_xor;
    "nb_lshift" => "op_LeftShift", op_lshift;
    "nb_rshift" => "op_RightShift", op_rshift;
}

unary_operators! {
    "nb_negative" => "op_UnaryNegation", op_negate;
    "nb_positive" => "op_UnaryPlus", op_plus;
    "nb_invert" => "op_OnesComplement", op_invert;
}

/// Install a slot for every operator the type declares
pub fn fill(t: &mut SlotTable, ty: &Type) {
    for &(slot, op, thunk) in BINARY {
        if !static_overloads(ty, op, 2).is_empty() {
            t.insert(slot, Slot::Binary(thunk));
        }
    }
    for &(slot, op, thunk) in UNARY {
        if !static_overloads(ty, op, 1).is_empty() {
            t.insert(slot, Slot::Unary(thunk));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clr_object::{require_managed, wrap};
    use crate::managed::{core, MethodBuilder, ObjectRef, TypeBuilder, Value};
    use crate::runtime::ffi::error::{PyErr_Clear, PyErr_ExceptionMatches, PyExc_TypeError};
    use crate::runtime::ffi::number::{PyNumber_Add, PyNumber_Multiply, PyNumber_Negative, PyNumber_Subtract};
    use crate::runtime::ffi::scalar::long_from_i128;
    use crate::testing::runtime;

    fn vector() -> Type {
        let c = core();
        TypeBuilder::class("Demo", "Vec1")
            .field("V", &c.int32)
            .build_with(|ty, m| {
                let field = |v: &Value| v.as_object().and_then(|o| o.field(0).as_i128()).unwrap_or(0);
                let make = {
                    let ty = ty.clone();
                    move |n: i128| {
                        let o = ObjectRef::alloc(&ty);
                        o.set_field(0, Value::I32(n as i32));
                        Value::Object(o)
                    }
                };
                let add_make = make.clone();
                m.method(
                    MethodBuilder::new("op_Addition")
                        .param("a", ty)
                        .param("b", ty)
                        .returns(ty)
                        .static_()
                        .body(move |_, args| Ok(add_make(field(&args[0]) + field(&args[1])))),
                );
                let scale_make = make.clone();
                m.method(
                    MethodBuilder::new("op_Multiply")
                        .param("a", ty)
                        .param("k", &c.int32)
                        .returns(ty)
                        .static_()
                        .body(move |_, args| Ok(scale_make(field(&args[0]) * args[1].as_i128().unwrap_or(0)))),
                );
                m.method(
                    MethodBuilder::new("op_UnaryNegation")
                        .param("a", ty)
                        .returns(ty)
                        .static_()
                        .body(move |_, args| Ok(make(-field(&args[0])))),
                );
            })
    }

    unsafe fn new_vec(ty: &Type, v: i32) -> NewReference {
        let o = ObjectRef::alloc(ty);
        o.set_field(0, Value::I32(v));
        wrap(&o, ty).unwrap()
    }

    unsafe fn value_of(ob: &NewReference) -> Value {
        require_managed(ob.as_ptr()).unwrap().field(0)
    }

    #[test]
    fn test_declared_operators_fill_slots() {
        let ty = vector();
        let mut t = SlotTable::new();
        fill(&mut t, &ty);
        assert!(t.contains("nb_add"));
        assert!(t.contains("nb_multiply"));
        assert!(t.contains("nb_negative"));
        assert!(!t.contains("nb_subtract"));
    }

    #[test]
    fn test_operators_dispatch_to_static_methods() {
        runtime(|| unsafe {
            let ty = vector();
            let a = new_vec(&ty, 2);
            let b = new_vec(&ty, 5);
            let sum = NewReference::checked(PyNumber_Add(a.as_ptr(), b.as_ptr())).unwrap();
            assert_eq!(value_of(&sum), Value::I32(7));

            let k = NewReference::from_raw(long_from_i128(3));
            let scaled = NewReference::checked(PyNumber_Multiply(a.as_ptr(), k.as_ptr())).unwrap();
            assert_eq!(value_of(&scaled), Value::I32(6));

            let neg = NewReference::checked(PyNumber_Negative(b.as_ptr())).unwrap();
            assert_eq!(value_of(&neg), Value::I32(-5));
        });
    }

    #[test]
    fn test_unmatched_operands_fall_back_to_type_error() {
        runtime(|| unsafe {
            let ty = vector();
            let a = new_vec(&ty, 2);
            let k = NewReference::from_raw(long_from_i128(3));
            // op_Addition wants two vectors
            assert!(PyNumber_Add(a.as_ptr(), k.as_ptr()).is_null());
            assert!(PyErr_ExceptionMatches(PyExc_TypeError()) != 0);
            PyErr_Clear();
            assert!(PyNumber_Subtract(a.as_ptr(), a.as_ptr()).is_null());
            PyErr_Clear();
        });
    }
}
