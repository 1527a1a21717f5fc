//! Value conversion in both directions
//!
//! Outbound ([`to_python`]): wrappers and native handles pass through,
//! registered encoders come next, then lists, interface views, primitives and
//! finally a fresh wrapper. Inbound ([`to_managed`]): native handles, unwrapped
//! wrappers, `None`, nullables, decoders, then per-type-code rules with exact
//! range checks. Inbound failures are [`ConversionError`]s so the binder can
//! try another overload without touching the native error state.

use tracing::trace;

use crate::clr_object::{get_managed_object, wrap};
use crate::codecs;
use crate::error::{BridgeError, ConversionError, Result};
use crate::exceptions::{rethrow_last, restore};
use crate::managed::{core, ObjectRef, Type, TypeCode, Value};
use crate::reference::{BorrowedReference, NativeObject, NewReference};
use crate::runtime::ffi::error::PyErr_Clear;
use crate::runtime::ffi::iter::{PyIter_Next, PyObject_GetIter};
use crate::runtime::ffi::list::list_from_vec;
use crate::runtime::ffi::object::{PyObject_IsTrue, PyObject_Size};
use crate::runtime::ffi::refcount::Py_NewRef;
use crate::runtime::ffi::scalar::*;
use crate::runtime::ffi::types::obj_type_name;
use crate::runtime::ffi::PyObject;

/// Native object for `value`, declared as `declared` at the call site
///
/// # Safety
/// The interpreter lock must be held
pub unsafe fn to_python(value: &Value, declared: &Type) -> Result<NewReference> {
    if let Some(ty) = value.runtime_type() {
        if let Some(encoded) = codecs::encode(value, &ty) {
            return encoded;
        }
    }
    let ob = match value {
        Value::Null => Py_NewRef(Py_None()),
        Value::Bool(b) => PyBool_FromLong(*b as _),
        Value::Char(c) => unicode_from_str(c.encode_utf8(&mut [0u8; 4])),
        Value::String(s) => unicode_from_str(s),
        Value::F32(v) => PyFloat_FromDouble(*v as f64),
        Value::F64(v) => PyFloat_FromDouble(*v),
        Value::Object(obj) => return object_to_python(obj, declared),
        integer => match integer.as_i128() {
            Some(n) => long_from_i128(n),
            None => return Err(ConversionError::mismatch("integer", format!("{:?}", integer)).into()),
        },
    };
    NewReference::checked(ob)
}

/// [`to_python`] declared as the value's own runtime type
///
/// # Safety
/// The interpreter lock must be held
pub unsafe fn to_python_value(value: &Value) -> Result<NewReference> {
    let declared = value.runtime_type().unwrap_or_else(|| core().object.clone());
    to_python(value, &declared)
}

unsafe fn object_to_python(obj: &ObjectRef, declared: &Type) -> Result<NewReference> {
    if let Some(native) = obj.as_native() {
        return Ok(native.new_reference());
    }
    let existing = obj.native_self();
    if !existing.is_null() {
        return Ok(NewReference::from_nullable(BorrowedReference::from_raw(existing)));
    }
    let ty = obj.ty();
    if let Some(items) = obj.as_list() {
        let elem = ty.generic_arguments().first().cloned().unwrap_or_else(|| core().object.clone());
        let snapshot = items.lock().clone();
        let mut converted = Vec::with_capacity(snapshot.len());
        for item in &snapshot {
            converted.push(to_python(item, &elem)?.into_raw());
        }
        return NewReference::checked(list_from_vec(converted));
    }
    if declared.is_interface() && ty.implements(declared) {
        return wrap(obj, declared);
    }
    if declared.is_array() && declared.element_type().is_some_and(Type::is_interface) && declared.is_assignable_from(ty) {
        return wrap(obj, declared);
    }
    if let Some(inner) = obj.boxed_value() {
        if !ty.is_enum() {
            return to_python_value(inner);
        }
    }
    wrap(obj, ty)
}

/// Managed value of type `ty` for the native object `ob`
///
/// # Safety
/// The interpreter lock must be held; `ob` must be live
pub unsafe fn to_managed(ob: *mut PyObject, ty: &Type) -> Result<Value, ConversionError> {
    let c = core();
    if ty.is_generic_definition() || ty.contains_generic_parameters() {
        return Err(ConversionError::OpenGeneric { target: ty.full_name() });
    }
    if ty == &c.py_object {
        let native = NativeObject::from_borrowed(BorrowedReference::from_raw(ob))
            .map_err(|e| ConversionError::mismatch(ty.full_name(), e.to_string()))?;
        return Ok(Value::Object(ObjectRef::native(native)));
    }
    if let Some(obj) = get_managed_object(ob) {
        return unwrap_to(obj, ty);
    }
    if ob == Py_None() {
        if ty.is_value_type() && !ty.is_nullable() {
            return Err(ConversionError::NullToValueType { target: ty.full_name() });
        }
        return Ok(Value::Null);
    }
    if let Some(underlying) = ty.underlying_type().filter(|_| ty.is_nullable()) {
        return to_managed(ob, underlying);
    }
    if let Some(decoded) = codecs::decode(BorrowedReference::from_raw(ob), ty) {
        return decoded;
    }
    if ty == &c.object {
        return Ok(guess_object(ob));
    }
    if ty.is_array() {
        return to_array(ob, ty);
    }
    if ty.generic_definition() == Some(&c.list) {
        return to_list(ob, ty);
    }
    primitive(ob, ty)
}

/// Two-channel form: speculative callers pass `set_error = false` and only
/// look at the returned option
///
/// # Safety
/// As for [`to_managed`]
pub unsafe fn convert_to_managed(ob: *mut PyObject, ty: &Type, set_error: bool) -> Option<Value> {
    match to_managed(ob, ty) {
        Ok(v) => Some(v),
        Err(e) => {
            trace!(event = "conversion_failed", target = %ty, source = obj_type_name(ob), error = %e);
            if set_error {
                restore(BridgeError::Conversion(e));
            }
            None
        }
    }
}

fn unwrap_to(obj: ObjectRef, ty: &Type) -> Result<Value, ConversionError> {
    if ty.is_assignable_from(obj.ty()) {
        return Ok(Value::Object(obj));
    }
    // A boxed primitive asked for as its own primitive type
    if let Some(inner) = obj.boxed_value() {
        if ty.is_primitive() && inner.type_code() == ty.type_code() {
            return Ok(inner.clone());
        }
    }
    Err(ConversionError::mismatch(ty.full_name(), obj.ty().full_name()))
}

/// Natural managed value of a native object when the target is `object`
unsafe fn guess_object(ob: *mut PyObject) -> Value {
    if PyBool_Check(ob) {
        return Value::Bool(ob == Py_True());
    }
    if PyLong_Check(ob) {
        let n = long_value(ob);
        if let Some(v) = Value::integer(TypeCode::Int32, n).or_else(|| Value::integer(TypeCode::Int64, n)) {
            return v;
        }
    }
    if PyFloat_Check(ob) {
        return Value::F64(float_value(ob));
    }
    if let Some(s) = unicode_as_str(ob) {
        return Value::string(s);
    }
    match NativeObject::from_borrowed(BorrowedReference::from_raw(ob)) {
        Ok(native) => Value::Object(ObjectRef::native(native)),
        Err(_) => Value::Null,
    }
}

unsafe fn to_array(ob: *mut PyObject, ty: &Type) -> Result<Value, ConversionError> {
    let mismatch = || ConversionError::mismatch(ty.full_name(), obj_type_name(ob));
    let elem = ty.element_type().ok_or_else(mismatch)?.clone();
    if ty.array_rank() != Some(1) || PyUnicode_Check(ob) {
        return Err(mismatch());
    }
    let values = collect_elements(ob, &elem).ok_or_else(mismatch)??;
    let array = ObjectRef::new_array(&elem, &[values.len()]);
    if let Some(data) = array.as_array() {
        for (i, v) in values.into_iter().enumerate() {
            data.set(i, v).map_err(|e| ConversionError::Element {
                index: i,
                source: Box::new(ConversionError::mismatch(elem.full_name(), e.message())),
            })?;
        }
    }
    Ok(Value::Object(array))
}

unsafe fn to_list(ob: *mut PyObject, ty: &Type) -> Result<Value, ConversionError> {
    if PyUnicode_Check(ob) {
        return Err(ConversionError::mismatch(ty.full_name(), "str"));
    }
    let elem = ty.generic_arguments().first().cloned().unwrap_or_else(|| core().object.clone());
    let values = collect_elements(ob, &elem)
        .ok_or_else(|| ConversionError::mismatch(ty.full_name(), obj_type_name(ob)))??;
    Ok(Value::Object(ObjectRef::new_list(ty, values)))
}

/// Convert every element of an iterable; None when `ob` is not iterable
unsafe fn collect_elements(ob: *mut PyObject, elem: &Type) -> Option<Result<Vec<Value>, ConversionError>> {
    let iter = PyObject_GetIter(ob);
    if iter.is_null() {
        PyErr_Clear();
        return None;
    }
    let iter = NewReference::from_raw(iter);
    let hint = PyObject_Size(ob);
    let mut out = match usize::try_from(hint) {
        Ok(n) => Vec::with_capacity(n),
        Err(_) => {
            PyErr_Clear();
            Vec::new()
        }
    };
    loop {
        let item = PyIter_Next(iter.as_ptr());
        if item.is_null() {
            if crate::exceptions::error_occurred() {
                let err = rethrow_last();
                return Some(Err(ConversionError::Decode {
                    target: elem.full_name(),
                    message: err.to_string(),
                }));
            }
            break;
        }
        let item = NewReference::from_raw(item);
        match to_managed(item.as_ptr(), elem) {
            Ok(v) => out.push(v),
            Err(e) => {
                return Some(Err(ConversionError::Element {
                    index: out.len(),
                    source: Box::new(e),
                }))
            }
        }
    }
    Some(Ok(out))
}

unsafe fn primitive(ob: *mut PyObject, ty: &Type) -> Result<Value, ConversionError> {
    let mismatch = || ConversionError::mismatch(ty.full_name(), obj_type_name(ob));
    if !ty.is_primitive() {
        return Err(mismatch());
    }
    let code = ty.type_code();
    let settings = crate::config();
    match code {
        TypeCode::Boolean => {
            if PyBool_Check(ob) {
                Ok(Value::Bool(ob == Py_True()))
            } else if !settings.conversion.strict_bool {
                match PyObject_IsTrue(ob) {
                    t if t < 0 => {
                        PyErr_Clear();
                        Err(mismatch())
                    }
                    t => Ok(Value::Bool(t != 0)),
                }
            } else {
                Err(mismatch())
            }
        }
        TypeCode::String => unicode_as_str(ob).map(Value::string).ok_or_else(mismatch),
        TypeCode::Char => {
            if let Some(s) = unicode_as_str(ob) {
                let mut chars = s.chars();
                return match (chars.next(), chars.next()) {
                    (Some(c), None) if (c as u32) <= u16::MAX as u32 => Ok(Value::Char(c)),
                    _ => Err(mismatch()),
                };
            }
            if PyLong_Check(ob) && !PyBool_Check(ob) {
                let n = long_value(ob);
                return u16::try_from(n)
                    .ok()
                    .and_then(|u| char::from_u32(u as u32))
                    .map(Value::Char)
                    .ok_or_else(|| ConversionError::overflow(ty.full_name(), n));
            }
            Err(mismatch())
        }
        TypeCode::Single | TypeCode::Double => {
            let v = if PyFloat_Check(ob) {
                float_value(ob)
            } else if PyLong_Check(ob) && !PyBool_Check(ob) {
                long_value(ob) as f64
            } else {
                return Err(mismatch());
            };
            if code == TypeCode::Single {
                if v.is_finite() && v.abs() > f32::MAX as f64 {
                    return Err(ConversionError::overflow(ty.full_name(), v));
                }
                return Ok(Value::F32(v as f32));
            }
            Ok(Value::F64(v))
        }
        code if code.is_integer() => {
            if PyBool_Check(ob) {
                return Err(mismatch());
            }
            let n = if PyLong_Check(ob) {
                long_value(ob)
            } else if PyFloat_Check(ob) {
                let f = float_value(ob);
                if !settings.conversion.allow_float_to_int || f.fract() != 0.0 || !f.is_finite() {
                    return Err(mismatch());
                }
                f as i128
            } else {
                match index_value(ob) {
                    Some(n) => n,
                    None => {
                        PyErr_Clear();
                        return Err(mismatch());
                    }
                }
            };
            Value::integer(code, n).ok_or_else(|| ConversionError::overflow(ty.full_name(), n))
        }
        _ => Err(mismatch()),
    }
}
