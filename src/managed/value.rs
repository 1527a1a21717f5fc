//! Values crossing method boundaries

use std::fmt;
use std::sync::Arc;

use super::object::ObjectRef;
use super::types::{Type, TypeCode};

/// A managed value: unboxed primitives, strings, or an object reference
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Char(char),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    String(Arc<str>),
    Object(ObjectRef),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn string(s: &str) -> Self {
        Value::String(Arc::from(s))
    }

    /// Primitive classification of the value itself; objects report the
    /// code of their runtime type
    pub fn type_code(&self) -> TypeCode {
        match self {
            Value::Null => TypeCode::Object,
            Value::Bool(_) => TypeCode::Boolean,
            Value::Char(_) => TypeCode::Char,
            Value::I8(_) => TypeCode::SByte,
            Value::U8(_) => TypeCode::Byte,
            Value::I16(_) => TypeCode::Int16,
            Value::U16(_) => TypeCode::UInt16,
            Value::I32(_) => TypeCode::Int32,
            Value::U32(_) => TypeCode::UInt32,
            Value::I64(_) => TypeCode::Int64,
            Value::U64(_) => TypeCode::UInt64,
            Value::F32(_) => TypeCode::Single,
            Value::F64(_) => TypeCode::Double,
            Value::String(_) => TypeCode::String,
            Value::Object(o) => o.ty().type_code(),
        }
    }

    /// Runtime type, None for null
    pub fn runtime_type(&self) -> Option<Type> {
        match self {
            Value::Null => None,
            Value::Object(o) => Some(o.ty().clone()),
            other => super::core().for_code(other.type_code()).cloned(),
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer payload widened, looking through boxes
    pub fn as_i128(&self) -> Option<i128> {
        let v = match self {
            Value::I8(v) => *v as i128,
            Value::U8(v) => *v as i128,
            Value::I16(v) => *v as i128,
            Value::U16(v) => *v as i128,
            Value::I32(v) => *v as i128,
            Value::U32(v) => *v as i128,
            Value::I64(v) => *v as i128,
            Value::U64(v) => *v as i128,
            Value::Object(o) => return o.boxed_value().and_then(|b| b.as_i128()),
            _ => return None,
        };
        Some(v)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F32(v) => Some(*v as f64),
            Value::F64(v) => Some(*v),
            other => other.as_i128().map(|i| i as f64),
        }
    }

    /// Build an integer value of the given code; None when out of range
    pub fn integer(code: TypeCode, v: i128) -> Option<Value> {
        let value = match code {
            TypeCode::SByte => Value::I8(i8::try_from(v).ok()?),
            TypeCode::Byte => Value::U8(u8::try_from(v).ok()?),
            TypeCode::Int16 => Value::I16(i16::try_from(v).ok()?),
            TypeCode::UInt16 => Value::U16(u16::try_from(v).ok()?),
            TypeCode::Int32 => Value::I32(i32::try_from(v).ok()?),
            TypeCode::UInt32 => Value::U32(u32::try_from(v).ok()?),
            TypeCode::Int64 => Value::I64(i64::try_from(v).ok()?),
            TypeCode::UInt64 => Value::U64(u64::try_from(v).ok()?),
            _ => return None,
        };
        Some(value)
    }

    /// Zero value for value types, null otherwise
    pub fn default_for(ty: &Type) -> Value {
        if ty.is_nullable() || !ty.is_value_type() {
            return Value::Null;
        }
        match ty.type_code() {
            TypeCode::Boolean => Value::Bool(false),
            TypeCode::Char => Value::Char('\0'),
            TypeCode::Single => Value::F32(0.0),
            TypeCode::Double => Value::F64(0.0),
            code if code.is_integer() => Value::integer(code, 0).unwrap_or_default(),
            _ if ty.is_enum() => {
                let zero = ty
                    .underlying_type()
                    .and_then(|u| Value::integer(u.type_code(), 0))
                    .unwrap_or(Value::I32(0));
                Value::Object(ObjectRef::boxed(ty, zero))
            }
            _ => Value::Object(ObjectRef::alloc(ty)),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::I8(a), Value::I8(b)) => a == b,
            (Value::U8(a), Value::U8(b)) => a == b,
            (Value::I16(a), Value::I16(b)) => a == b,
            (Value::U16(a), Value::U16(b)) => a == b,
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::U32(a), Value::U32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::U64(a), Value::U64(b)) => a == b,
            (Value::F32(a), Value::F32(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Char(v) => write!(f, "{:?}", v),
            Value::I8(v) => write!(f, "{}i8", v),
            Value::U8(v) => write!(f, "{}u8", v),
            Value::I16(v) => write!(f, "{}i16", v),
            Value::U16(v) => write!(f, "{}u16", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}u32", v),
            Value::I64(v) => write!(f, "{}i64", v),
            Value::U64(v) => write!(f, "{}u64", v),
            Value::F32(v) => write!(f, "{}f32", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Object(o) => write!(f, "{:?}", o),
        }
    }
}

/// Text of a value the way `ToString` renders it by default
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Char(v) => write!(f, "{}", v),
            Value::String(s) => f.write_str(s),
            Value::Object(o) => match o.boxed_value() {
                Some(inner) if o.ty().is_enum() => match o.enum_name() {
                    Some(name) => f.write_str(&name),
                    None => write!(f, "{}", inner),
                },
                Some(inner) => write!(f, "{}", inner),
                None => f.write_str(&o.ty().full_name()),
            },
            Value::F32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            other => write!(f, "{}", other.as_i128().unwrap_or_default()),
        }
    }
}

macro_rules! value_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

value_from!(
    bool => Bool, char => Char, i8 => I8, u8 => U8, i16 => I16, u16 => U16,
    i32 => I32, u32 => U32, i64 => I64, u64 => U64, f32 => F32, f64 => F64,
    ObjectRef => Object,
);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::string(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(Arc::from(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managed::core;

    #[test]
    fn test_integer_construction_is_range_checked() {
        assert_eq!(Value::integer(TypeCode::Byte, 255), Some(Value::U8(255)));
        assert_eq!(Value::integer(TypeCode::Byte, 256), None);
        assert_eq!(Value::integer(TypeCode::Int32, i32::MAX as i128 + 1), None);
    }

    #[test]
    fn test_defaults() {
        let c = core();
        assert_eq!(Value::default_for(&c.int32), Value::I32(0));
        assert_eq!(Value::default_for(&c.string), Value::Null);
        assert_eq!(Value::default_for(&c.int32.make_nullable()), Value::Null);
        assert_eq!(Value::default_for(&c.boolean), Value::Bool(false));
    }

    #[test]
    fn test_runtime_type_of_primitives() {
        let c = core();
        assert_eq!(Value::I64(1).runtime_type(), Some(c.int64.clone()));
        assert_eq!(Value::string("x").runtime_type(), Some(c.string.clone()));
        assert!(Value::Null.runtime_type().is_none());
    }

    #[test]
    fn test_display_matches_script_spelling() {
        assert_eq!(Value::Bool(true).to_string(), "True");
        assert_eq!(Value::I32(-4).to_string(), "-4");
        assert_eq!(Value::string("hi").to_string(), "hi");
    }
}
