//! Error types for the bridge
//!
//! Two families: [`ConversionError`] for value marshaling that a caller may
//! recover from (the binder tries the next overload), and [`BridgeError`] for
//! everything that propagates. Both render human-readable messages because the
//! text ends up in native exceptions that script authors read.

use std::fmt;

use crate::exceptions::PythonException;
use crate::managed::ManagedException;

/// Why a value could not cross the boundary
#[derive(Debug, Clone, PartialEq)]
pub enum ConversionError {
    /// Source value has the wrong shape for the target type
    TypeMismatch { expected: String, actual: String },
    /// Numeric source outside the target's representable range
    Overflow { target: String, value: String },
    /// `None` offered where a non-nullable value type is required
    NullToValueType { target: String },
    /// Target is an unbound generic type
    OpenGeneric { target: String },
    /// One element of a sequence failed
    Element { index: usize, source: Box<ConversionError> },
    /// A registered decoder accepted the value but could not produce a result
    Decode { target: String, message: String },
}

impl ConversionError {
    pub fn mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        ConversionError::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn overflow(target: impl Into<String>, value: impl fmt::Display) -> Self {
        ConversionError::Overflow {
            target: target.into(),
            value: value.to_string(),
        }
    }

    /// True for range failures, including ones nested inside sequences
    pub fn is_overflow(&self) -> bool {
        match self {
            ConversionError::Overflow { .. } => true,
            ConversionError::Element { source, .. } => source.is_overflow(),
            _ => false,
        }
    }
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionError::TypeMismatch { expected, actual } => {
                write!(f, "'{}' value cannot be converted to {}", actual, expected)
            }
            ConversionError::Overflow { target, value } => {
                write!(f, "value {} is out of range for {}", value, target)
            }
            ConversionError::NullToValueType { target } => {
                write!(f, "None cannot be converted to value type {}", target)
            }
            ConversionError::OpenGeneric { target } => {
                write!(f, "cannot convert to open generic type {}", target)
            }
            ConversionError::Element { index, source } => {
                write!(f, "element {}: {}", index, source)
            }
            ConversionError::Decode { target, message } => {
                write!(f, "decoding to {} failed: {}", target, message)
            }
        }
    }
}

impl std::error::Error for ConversionError {}

/// Errors surfaced by the bridge's public API
#[derive(Debug, Clone)]
pub enum BridgeError {
    /// Bridge setup defect (bad base-type provider, non-type base, readiness failure)
    Configuration(String),
    /// Value conversion failure
    Conversion(ConversionError),
    /// Exception raised inside the native runtime
    Python(PythonException),
    /// Exception thrown by managed code
    Managed(ManagedException),
    /// No overload accepted the supplied arguments
    NoMatch { method: String, signature: String },
    /// Two equally ranked overloads from unrelated declaring types
    AmbiguousOverload { method: String, first: String, second: String },
    /// A native API failed without setting an error
    Runtime(String),
    InvalidArgument(String),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Configuration(msg) => write!(f, "bridge configuration error: {}", msg),
            BridgeError::Conversion(e) => write!(f, "{}", e),
            BridgeError::Python(e) => write!(f, "{}", e),
            BridgeError::Managed(e) => write!(f, "{}: {}", e.type_name(), e.message()),
            BridgeError::NoMatch { method, signature } => {
                write!(f, "No method matches given arguments for {}: {}", method, signature)
            }
            BridgeError::AmbiguousOverload { method, first, second } => write!(
                f,
                "ambiguous call to {}: {} and {} are declared on unrelated types",
                method, first, second
            ),
            BridgeError::Runtime(msg) => write!(f, "native runtime failure: {}", msg),
            BridgeError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BridgeError::Conversion(e) => Some(e),
            BridgeError::Python(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConversionError> for BridgeError {
    fn from(e: ConversionError) -> Self {
        BridgeError::Conversion(e)
    }
}

impl From<PythonException> for BridgeError {
    fn from(e: PythonException) -> Self {
        BridgeError::Python(e)
    }
}

impl From<ManagedException> for BridgeError {
    fn from(e: ManagedException) -> Self {
        BridgeError::Managed(e)
    }
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_overflow_is_detected() {
        let e = ConversionError::Element {
            index: 2,
            source: Box::new(ConversionError::overflow("Int32", 1u64 << 40)),
        };
        assert!(e.is_overflow());
        assert_eq!(e.to_string(), "element 2: value 1099511627776 is out of range for Int32");
    }

    #[test]
    fn test_no_match_message_names_method() {
        let e = BridgeError::NoMatch {
            method: "Method".into(),
            signature: "()".into(),
        };
        assert_eq!(e.to_string(), "No method matches given arguments for Method: ()");
    }
}
