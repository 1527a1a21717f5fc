//! The unwind boundary for native-facing slots
//!
//! Every `extern "C"` thunk runs its body through [`trampoline`]: an `Err` is
//! installed into the error indicator and a panic is caught and reported as a
//! `SystemError`. Either way the slot returns its error sentinel and nothing
//! unwinds into the interpreter.

use std::any::Any;
use std::ffi::c_int;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr::null_mut;

use tracing::error;

use crate::error::BridgeError;
use crate::runtime::ffi::error::PyExc_SystemError;
use crate::runtime::ffi::{PyObject, Py_ssize_t};

/// Value a slot returns to signal "error set"
pub trait Sentinel {
    fn error_value() -> Self;
}

impl Sentinel for *mut PyObject {
    fn error_value() -> Self {
        null_mut()
    }
}

impl Sentinel for c_int {
    fn error_value() -> Self {
        -1
    }
}

/// Also covers `Py_hash_t`
impl Sentinel for Py_ssize_t {
    fn error_value() -> Self {
        -1
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

/// Run a slot body, converting errors and panics into the native error state
///
/// # Safety
/// The interpreter lock must be held, as for any slot
pub unsafe fn trampoline<R, F>(slot: &'static str, body: F) -> R
where
    R: Sentinel,
    F: FnOnce() -> Result<R, BridgeError>,
{
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(value)) => value,
        Ok(Err(err)) => {
            crate::exceptions::restore(err);
            R::error_value()
        }
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            error!(event = "slot_panic", slot, message = %msg, "panic caught at the native boundary");
            typebridge_runtime::set_error(PyExc_SystemError(), format!("panic in {}: {}", slot, msg));
            R::error_value()
        }
    }
}

/// Slots with no error channel (`tp_dealloc`, `bf_releasebuffer`): failures
/// are logged and swallowed
///
/// # Safety
/// As for [`trampoline`]
pub unsafe fn trampoline_void<F>(slot: &'static str, body: F)
where
    F: FnOnce() -> Result<(), BridgeError>,
{
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(event = "slot_error", slot, error = %err, "error in a slot that cannot report it"),
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            error!(event = "slot_panic", slot, message = %msg, "panic caught at the native boundary");
        }
    }
}
