//! Exception translation across the boundary
//!
//! Native to managed: [`rethrow_last`] takes the pending native error. A
//! native exception that wraps a managed exception comes back as that same
//! managed object; anything else becomes a [`PythonException`] carrying the
//! type name, message, traceback text and the `__cause__` chain.
//!
//! Managed to native: [`restore`] installs a [`BridgeError`] into the error
//! indicator. Managed exceptions go through registered encoders first, then
//! back to their original native object if they started life there, then
//! are wrapped as instances of their bridged exception type.

use std::fmt;
use std::ptr::null_mut;

use tracing::{debug, trace, warn};

use crate::error::{BridgeError, ConversionError};
use crate::managed::{core, ManagedException, Value};
use crate::reference::{BorrowedReference, NativeObject, NewReference};
use crate::runtime::ffi::error::*;
use crate::runtime::ffi::object::{PyObject_Repr, PyObject_Str, Py_TYPE};
use crate::runtime::ffi::refcount::Py_DECREF;
use crate::runtime::ffi::scalar::unicode_as_str;
use crate::runtime::ffi::types::{obj_type_name, type_name};
use crate::runtime::ffi::PyObject;
use crate::trampoline::Sentinel;

/// An exception raised inside the interpreter, seen from Rust
#[derive(Clone)]
pub struct PythonException {
    type_name: String,
    message: String,
    traceback: Option<String>,
    inner: Option<Box<PythonException>>,
    value: Option<NativeObject>,
}

impl PythonException {
    /// Exception with no native object behind it
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        PythonException {
            type_name: type_name.into(),
            message: message.into(),
            traceback: None,
            inner: None,
            value: None,
        }
    }

    /// Snapshot a native exception instance, following `__cause__`
    ///
    /// # Safety
    /// `value` must be a live exception instance; the interpreter lock held
    pub unsafe fn from_value(value: BorrowedReference) -> Self {
        Self::from_value_depth(value, 0)
    }

    unsafe fn from_value_depth(value: BorrowedReference, depth: usize) -> Self {
        let ob = value.address();
        let traceback = text_of(PyException_GetTraceback(ob));
        let cause = PyException_GetCause(ob);
        let inner = if !cause.is_null() && depth < MAX_CAUSE_DEPTH {
            let inner = Self::from_value_depth(BorrowedReference::from_raw(cause), depth + 1);
            Py_DECREF(cause);
            Some(Box::new(inner))
        } else {
            if !cause.is_null() {
                Py_DECREF(cause);
            }
            None
        };
        PythonException {
            type_name: obj_type_name(ob).to_owned(),
            message: text_of(ob).unwrap_or_default(),
            traceback,
            inner,
            value: NativeObject::from_borrowed(value).ok(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Formatted traceback, when the interpreter recorded one
    pub fn traceback(&self) -> Option<&str> {
        self.traceback.as_deref()
    }

    /// The `__cause__` of this exception
    pub fn inner(&self) -> Option<&PythonException> {
        self.inner.as_deref()
    }

    /// Native exception object, when this came from the interpreter
    pub fn value(&self) -> Option<&NativeObject> {
        self.value.as_ref()
    }

    /// Managed stand-in: a `PythonException` object remembering the native
    /// exception so that raising it again restores the original
    pub fn to_managed(&self) -> ManagedException {
        let inner = self.inner.as_ref().map(|i| i.to_managed());
        let message = format!("{} : {}", self.type_name, self.message);
        let managed = match inner {
            Some(inner) => ManagedException::with_inner(&core().python_exception, message, inner),
            None => ManagedException::new(&core().python_exception, message),
        };
        if let Some(data) = managed.object().as_exception() {
            data.set_native(self.value.clone());
            data.set_traceback(self.traceback.clone());
        }
        managed
    }
}

const MAX_CAUSE_DEPTH: usize = 32;

/// `str(ob)` as an owned string; None for null or a failing `__str__`
unsafe fn text_of(ob: *mut PyObject) -> Option<String> {
    if ob.is_null() {
        return None;
    }
    let s = PyObject_Str(ob);
    if s.is_null() {
        PyErr_Clear();
        return None;
    }
    let text = unicode_as_str(s).map(str::to_owned);
    Py_DECREF(s);
    text
}

impl fmt::Display for PythonException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}

impl fmt::Debug for PythonException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PythonException")
            .field("type", &self.type_name)
            .field("message", &self.message)
            .field("inner", &self.inner)
            .finish()
    }
}

impl std::error::Error for PythonException {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Take the pending native error as a Rust error
///
/// A managed exception that crossed into the interpreter comes back as the
/// identical object.
pub fn rethrow_last() -> BridgeError {
    let Some(fetched) = FetchedError::take() else {
        return BridgeError::Runtime("native call failed without setting an exception".into());
    };
    if fetched.value.is_null() {
        let name = unsafe { type_name(fetched.ty as *mut _) }.to_owned();
        return BridgeError::Python(PythonException::new(name, fetched.message()));
    }
    unsafe {
        if let Some(obj) = crate::clr_object::get_managed_object(fetched.value) {
            if let Some(managed) = ManagedException::from_object(obj) {
                trace!(event = "exception_roundtrip", ty = %managed.type_name(), "managed exception returned");
                return BridgeError::Managed(managed);
            }
        }
        let err = PythonException::from_value(BorrowedReference::from_raw(fetched.value));
        debug!(event = "python_exception", ty = %err.type_name(), message = %err.message(), "native exception captured");
        BridgeError::Python(err)
    }
}

/// Is there a pending native error
pub fn error_occurred() -> bool {
    !PyErr_Occurred().is_null()
}

/// Unwrap an invocation wrapper and keep the thrown exception
pub fn unwrap_invoke(err: crate::managed::InvokeError) -> BridgeError {
    BridgeError::Managed(err.into_exception())
}

/// Native exception class a non-exception error is reported as
unsafe fn native_type_for(err: &BridgeError) -> *mut PyObject {
    match err {
        BridgeError::Conversion(e) if e.is_overflow() => PyExc_OverflowError(),
        BridgeError::Conversion(ConversionError::Decode { .. }) => PyExc_ValueError(),
        BridgeError::Conversion(_) => PyExc_TypeError(),
        BridgeError::NoMatch { .. } | BridgeError::AmbiguousOverload { .. } => PyExc_TypeError(),
        BridgeError::InvalidArgument(_) => PyExc_ValueError(),
        BridgeError::Configuration(_) => PyExc_SystemError(),
        BridgeError::Runtime(_) => PyExc_RuntimeError(),
        BridgeError::Python(_) | BridgeError::Managed(_) => PyExc_Exception(),
    }
}

/// Install `err` as the current native error
///
/// # Safety
/// The interpreter lock must be held
pub unsafe fn restore(err: BridgeError) {
    match err {
        BridgeError::Python(e) => match e.value() {
            Some(value) => {
                let ob = value.as_ptr();
                PyErr_SetObject(Py_TYPE(ob) as *mut PyObject, ob);
            }
            None => typebridge_runtime::set_error(PyExc_Exception(), e.to_string()),
        },
        BridgeError::Managed(e) => restore_managed(&e),
        other => typebridge_runtime::set_error(native_type_for(&other), other.to_string()),
    }
}

/// Raise a managed exception in the interpreter
///
/// # Safety
/// The interpreter lock must be held
pub unsafe fn restore_managed(e: &ManagedException) {
    let value = Value::Object(e.object().clone());
    match crate::codecs::encode(&value, e.ty()) {
        Some(Ok(encoded)) if PyExceptionInstance_Check(encoded.as_ptr()) => {
            let ob = encoded.as_ptr();
            PyErr_SetObject(Py_TYPE(ob) as *mut PyObject, ob);
            drop(encoded);
            return;
        }
        Some(Ok(encoded)) => warn!(
            event = "exception_codec",
            ty = %e.type_name(),
            produced = obj_type_name(encoded.as_ptr()),
            "encoder for exception type produced a non-exception; ignoring"
        ),
        Some(Err(err)) => warn!(event = "exception_codec", ty = %e.type_name(), error = %err, "exception encoder failed"),
        None => {}
    }
    if let Some(native) = e.object().as_exception().and_then(|d| d.native()) {
        let ob = native.as_ptr();
        PyErr_SetObject(Py_TYPE(ob) as *mut PyObject, ob);
        return;
    }
    match crate::clr_object::wrap(e.object(), e.ty()) {
        Ok(wrapper) => {
            let ob = wrapper.as_ptr();
            debug!(event = "exception_to_native", ty = %e.type_name(), "managed exception raised natively");
            PyErr_SetObject(Py_TYPE(ob) as *mut PyObject, ob);
        }
        Err(wrap_err) => {
            warn!(event = "exception_to_native", ty = %e.type_name(), error = %wrap_err, "wrapping failed; raising a plain exception");
            typebridge_runtime::set_error(PyExc_Exception(), e.to_string());
        }
    }
}

/// Restore and produce the null sentinel
///
/// # Safety
/// The interpreter lock must be held
pub unsafe fn raise(err: BridgeError) -> *mut PyObject {
    restore(err);
    null_mut()
}

/// Set a specific native exception and produce the slot's error sentinel
///
/// # Safety
/// The interpreter lock must be held
pub unsafe fn raise_as<R: Sentinel>(exc: *mut PyObject, message: impl AsRef<str>) -> R {
    typebridge_runtime::set_error(exc, message);
    R::error_value()
}

/// `repr(ob)` cut to the configured length, for error messages
///
/// # Safety
/// The interpreter lock must be held; `ob` must be live
pub unsafe fn short_repr(ob: *mut PyObject) -> String {
    let text = match NewReference::checked(PyObject_Repr(ob)) {
        Ok(repr) => unicode_as_str(repr.as_ptr()).unwrap_or_default().to_owned(),
        Err(_) => format!("<{} object>", obj_type_name(ob)),
    };
    let limit = crate::config().conversion.max_repr_length;
    if text.chars().count() <= limit {
        return text;
    }
    let mut cut: String = text.chars().take(limit).collect();
    cut.push_str("...");
    cut
}

impl ManagedException {
    /// Managed view of a Rust-side error: managed exceptions stay themselves,
    /// native ones become a `PythonException` object, the rest a plain
    /// `Exception` with the error's message
    pub fn from_bridge_error(err: BridgeError) -> ManagedException {
        match err {
            BridgeError::Managed(e) => e,
            BridgeError::Python(e) => e.to_managed(),
            BridgeError::Conversion(e) if e.is_overflow() => ManagedException::overflow(e.to_string()),
            BridgeError::Conversion(e) => ManagedException::invalid_cast(e.to_string()),
            BridgeError::InvalidArgument(msg) => ManagedException::argument(msg),
            other => ManagedException::new(&core().exception, other.to_string()),
        }
    }
}

/// `-1` from a native call means the error indicator is set
pub fn check_status(status: std::ffi::c_int) -> Result<(), BridgeError> {
    if status < 0 {
        Err(rethrow_last())
    } else {
        Ok(())
    }
}

/// Owned object behind a managed `PythonException`, if any
pub fn native_of(e: &ManagedException) -> Option<NativeObject> {
    e.object().as_exception().and_then(|d| d.native())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::runtime;

    #[test]
    fn test_native_error_becomes_python_exception() {
        runtime(|| unsafe {
            typebridge_runtime::set_error(PyExc_ValueError(), "bad value");
            match rethrow_last() {
                BridgeError::Python(e) => {
                    assert_eq!(e.type_name(), "ValueError");
                    assert_eq!(e.message(), "bad value");
                    assert!(e.value().is_some());
                }
                other => panic!("unexpected {:?}", other),
            }
            assert!(!error_occurred());
        });
    }

    #[test]
    fn test_no_pending_error_is_runtime_error() {
        runtime(|| {
            assert!(matches!(rethrow_last(), BridgeError::Runtime(_)));
        });
    }

    #[test]
    fn test_python_exception_restores_same_object() {
        runtime(|| unsafe {
            typebridge_runtime::set_error(PyExc_KeyError(), "k");
            let BridgeError::Python(first) = rethrow_last() else { panic!("expected python error") };
            let original = first.value().unwrap().as_ptr();
            restore(BridgeError::Python(first));
            let BridgeError::Python(second) = rethrow_last() else { panic!("expected python error") };
            assert_eq!(second.value().unwrap().as_ptr(), original);
        });
    }

    #[test]
    fn test_conversion_overflow_maps_to_overflow_error() {
        runtime(|| unsafe {
            restore(BridgeError::Conversion(ConversionError::overflow("Int32", 1u64 << 33)));
            assert!(PyErr_ExceptionMatches(PyExc_OverflowError()) != 0);
            PyErr_Clear();
        });
    }

    #[test]
    fn test_short_repr_is_truncated() {
        runtime(|| unsafe {
            let long = "x".repeat(crate::config().conversion.max_repr_length * 2);
            let ob = NewReference::checked(crate::runtime::ffi::scalar::unicode_from_str(&long)).unwrap();
            let text = short_repr(ob.as_ptr());
            assert!(text.ends_with("..."));
            assert_eq!(text.chars().count(), crate::config().conversion.max_repr_length + 3);
        });
    }

    #[test]
    fn test_raise_as_sets_requested_type() {
        runtime(|| unsafe {
            let status: std::ffi::c_int = raise_as(PyExc_KeyError(), "missing");
            assert_eq!(status, -1);
            assert!(PyErr_ExceptionMatches(PyExc_KeyError()) != 0);
            PyErr_Clear();
        });
    }

    #[test]
    fn test_python_exception_to_managed_keeps_native() {
        runtime(|| unsafe {
            typebridge_runtime::set_error(PyExc_ValueError(), "oops");
            let BridgeError::Python(e) = rethrow_last() else { panic!("expected python error") };
            let managed = e.to_managed();
            assert_eq!(managed.ty(), &core().python_exception);
            assert_eq!(managed.message(), "ValueError : oops");
            assert_eq!(native_of(&managed).map(|n| n.as_ptr()), e.value().map(|n| n.as_ptr()));
        });
    }
}
