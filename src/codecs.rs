//! User-registered value codecs
//!
//! Encoders turn managed values into native objects and decoders go the
//! other way. Both are consulted before the built-in conversion rules, in
//! registration order; the first codec that claims a type handles it.
//! Registrations are process-wide and cleared by [`clear`].

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::error::{ConversionError, Result};
use crate::managed::{ObjectRef, Type, Value};
use crate::reference::{BorrowedReference, NewReference};
use crate::runtime::ffi::object::Py_TYPE;
use crate::runtime::ffi::scalar::{long_from_i128, long_value, PyBool_Type, PyLong_Type};
use crate::runtime::ffi::types::PyType_IsSubtype;
use crate::runtime::ffi::PyTypeObject;

/// Managed value to native object
///
/// Codecs run with the interpreter lock held.
pub trait PyEncoder: Send + Sync {
    fn can_encode(&self, ty: &Type) -> bool;

    fn encode(&self, value: &Value) -> Result<NewReference>;
}

/// Native object to managed value
pub trait PyDecoder: Send + Sync {
    /// `native` is the type of the object being converted
    fn can_decode(&self, native: *mut PyTypeObject, target: &Type) -> bool;

    fn decode(&self, ob: BorrowedReference, target: &Type) -> Result<Value, ConversionError>;
}

/// Encoders tried in order
#[derive(Default, Clone)]
pub struct EncoderGroup {
    encoders: Vec<Arc<dyn PyEncoder>>,
}

impl EncoderGroup {
    pub fn add(&mut self, encoder: Arc<dyn PyEncoder>) {
        self.encoders.push(encoder);
    }

    pub fn len(&self) -> usize {
        self.encoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encoders.is_empty()
    }

    fn find(&self, ty: &Type) -> Option<Arc<dyn PyEncoder>> {
        self.encoders.iter().find(|e| e.can_encode(ty)).cloned()
    }
}

impl PyEncoder for EncoderGroup {
    fn can_encode(&self, ty: &Type) -> bool {
        self.encoders.iter().any(|e| e.can_encode(ty))
    }

    fn encode(&self, value: &Value) -> Result<NewReference> {
        let ty = value.runtime_type().ok_or_else(|| ConversionError::mismatch("non-null value", "null"))?;
        match self.find(&ty) {
            Some(encoder) => encoder.encode(value),
            None => Err(ConversionError::mismatch("encodable value", ty.full_name()).into()),
        }
    }
}

/// Decoders tried in order
#[derive(Default, Clone)]
pub struct DecoderGroup {
    decoders: Vec<Arc<dyn PyDecoder>>,
}

impl DecoderGroup {
    pub fn add(&mut self, decoder: Arc<dyn PyDecoder>) {
        self.decoders.push(decoder);
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    fn find(&self, native: *mut PyTypeObject, target: &Type) -> Option<Arc<dyn PyDecoder>> {
        self.decoders.iter().find(|d| d.can_decode(native, target)).cloned()
    }
}

impl PyDecoder for DecoderGroup {
    fn can_decode(&self, native: *mut PyTypeObject, target: &Type) -> bool {
        self.decoders.iter().any(|d| d.can_decode(native, target))
    }

    fn decode(&self, ob: BorrowedReference, target: &Type) -> Result<Value, ConversionError> {
        let native = unsafe { Py_TYPE(ob.as_ptr()) };
        match self.find(native, target) {
            Some(decoder) => decoder.decode(ob, target),
            None => Err(ConversionError::mismatch(target.full_name(), "undecodable object")),
        }
    }
}

static ENCODERS: Lazy<RwLock<EncoderGroup>> = Lazy::new(Default::default);
static DECODERS: Lazy<RwLock<DecoderGroup>> = Lazy::new(Default::default);

pub fn register_encoder(encoder: Arc<dyn PyEncoder>) {
    let mut group = ENCODERS.write();
    group.add(encoder);
    debug!(event = "codec_registered", direction = "encode", count = group.len(), "encoder added");
}

pub fn register_decoder(decoder: Arc<dyn PyDecoder>) {
    let mut group = DECODERS.write();
    group.add(decoder);
    debug!(event = "codec_registered", direction = "decode", count = group.len(), "decoder added");
}

/// Drop every registered codec
pub fn clear() {
    *ENCODERS.write() = EncoderGroup::default();
    *DECODERS.write() = DecoderGroup::default();
}

/// Run the first encoder claiming `ty`; None when no encoder does
///
/// # Safety
/// The interpreter lock must be held
pub unsafe fn encode(value: &Value, ty: &Type) -> Option<Result<NewReference>> {
    // Encoders may convert nested values; never call one under the lock
    let encoder = {
        let group = ENCODERS.read();
        if group.is_empty() {
            return None;
        }
        group.find(ty)?
    };
    trace!(event = "codec_encode", ty = %ty, "encoder selected");
    Some(encoder.encode(value))
}

/// Run the first decoder claiming `(type of ob, target)`
///
/// # Safety
/// The interpreter lock must be held; `ob` must be live
pub unsafe fn decode(ob: BorrowedReference, target: &Type) -> Option<Result<Value, ConversionError>> {
    let decoder = {
        let group = DECODERS.read();
        if group.is_empty() {
            return None;
        }
        group.find(Py_TYPE(ob.as_ptr()), target)?
    };
    trace!(event = "codec_decode", target = %target, "decoder selected");
    Some(decoder.decode(ob, target))
}

/// Enums as plain native integers, in both directions
pub struct EnumIntCodec;

impl PyEncoder for EnumIntCodec {
    fn can_encode(&self, ty: &Type) -> bool {
        ty.is_enum()
    }

    fn encode(&self, value: &Value) -> Result<NewReference> {
        let n = value
            .as_i128()
            .ok_or_else(|| ConversionError::mismatch("enum value", format!("{:?}", value)))?;
        unsafe { NewReference::checked(long_from_i128(n)) }
    }
}

impl PyDecoder for EnumIntCodec {
    fn can_decode(&self, native: *mut PyTypeObject, target: &Type) -> bool {
        target.is_enum()
            && native != PyBool_Type()
            && (native == PyLong_Type() || unsafe { PyType_IsSubtype(native, PyLong_Type()) } != 0)
    }

    fn decode(&self, ob: BorrowedReference, target: &Type) -> Result<Value, ConversionError> {
        let n = unsafe { long_value(ob.as_ptr()) };
        let code = target.underlying_type().map(Type::type_code).unwrap_or(crate::managed::TypeCode::Int32);
        let raw = Value::integer(code, n).ok_or_else(|| ConversionError::overflow(target.full_name(), n))?;
        Ok(Value::Object(ObjectRef::boxed(target, raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managed::{core, TypeBuilder};
    use crate::runtime::ffi::refcount::Py_DECREF;
    use crate::runtime::ffi::scalar::{unicode_as_str, unicode_from_str};
    use crate::testing::runtime;

    struct Shout;

    impl PyEncoder for Shout {
        fn can_encode(&self, ty: &Type) -> bool {
            ty == &core().string
        }

        fn encode(&self, value: &Value) -> Result<NewReference> {
            let text = value.as_str().unwrap_or_default().to_uppercase();
            unsafe { NewReference::checked(unicode_from_str(&text)) }
        }
    }

    struct Never;

    impl PyEncoder for Never {
        fn can_encode(&self, _ty: &Type) -> bool {
            false
        }

        fn encode(&self, _value: &Value) -> Result<NewReference> {
            unreachable!("never selected")
        }
    }

    #[test]
    fn test_group_first_claimant_wins() {
        runtime(|| unsafe {
            let mut group = EncoderGroup::default();
            group.add(Arc::new(Never));
            group.add(Arc::new(Shout));
            assert!(group.can_encode(&core().string));
            assert!(!group.can_encode(&core().int32));
            let ob = group.encode(&Value::string("hi")).unwrap();
            assert_eq!(unicode_as_str(ob.as_ptr()), Some("HI"));
        });
    }

    #[test]
    fn test_enum_int_codec_round_trip() {
        runtime(|| unsafe {
            let c = core();
            let color = TypeBuilder::enumeration("Demo", "Tint", &c.byte).variant("Red", 1).build();
            let boxed = Value::Object(ObjectRef::boxed(&color, Value::U8(1)));
            let ob = EnumIntCodec.encode(&boxed).unwrap();
            assert_eq!(long_value(ob.as_ptr()), 1);
            assert!(EnumIntCodec.can_decode(Py_TYPE(ob.as_ptr()), &color));
            let back = EnumIntCodec.decode(ob.borrow(), &color).unwrap();
            assert_eq!(back.as_object().map(|o| o.ty().clone()), Some(color.clone()));

            let big = long_from_i128(300);
            let err = EnumIntCodec.decode(BorrowedReference::from_raw(big), &color).unwrap_err();
            assert!(err.is_overflow());
            Py_DECREF(big);
        });
    }

    #[test]
    fn test_unclaimed_type_declines() {
        runtime(|| unsafe {
            let lonely = TypeBuilder::class("Demo", "Unclaimed").build();
            let value = Value::Object(ObjectRef::alloc(&lonely));
            assert!(encode(&value, &lonely).is_none());
        });
    }
}
