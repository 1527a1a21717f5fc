//! Typebridge - managed types as native interpreter types
//!
//! A managed type becomes one synthesized native type object, cached for the
//! life of the interpreter; a managed instance becomes a native instance that
//! holds an identity handle back to it. Method calls, attribute access and
//! operators on the native side are routed through the binder and the
//! converter into managed code, and exceptions travel both ways keeping
//! their identity.

// Core modules
pub mod binder;
pub mod buffer;
pub mod class_manager;
pub mod classes;
pub mod clr_object;
pub mod codecs;
pub mod config;
pub mod converter;
pub mod error;
pub mod exceptions;
pub mod extensions;
pub mod logging;
pub mod managed;
pub mod reference;
pub mod trampoline;
pub mod types;

pub(crate) mod runtime;

// Re-export commonly used items
pub use binder::{Binding, MethodBinder};
pub use config::BridgeConfig;
pub use converter::{convert_to_managed, to_managed, to_python};
pub use error::{BridgeError, ConversionError, Result};
pub use exceptions::{rethrow_last, PythonException};
pub use reference::{BorrowedReference, NativeObject, NewReference, StolenReference};

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::runtime::code_page;
use crate::runtime::ffi::gil::with_gil;

static CONFIG: Lazy<RwLock<Arc<BridgeConfig>>> = Lazy::new(|| RwLock::new(Arc::new(BridgeConfig::default())));

/// Active bridge configuration
pub fn config() -> Arc<BridgeConfig> {
    CONFIG.read().clone()
}

/// Bring up the interpreter object layer and install `config`
///
/// Safe to call again; the GC slot implementation chosen first stays.
pub fn initialize(config: BridgeConfig) {
    typebridge_runtime::Py_Initialize();
    let slots = code_page::install(config.slots.native_code_page);
    *CONFIG.write() = Arc::new(config);
    info!(event = "bridge_initialized", native_gc_slots = slots.is_native(), "bridge ready");
}

/// Drop every cached native type, reflected member type and codec
///
/// Wrappers still referenced from native code keep their types alive; the
/// count of identity handles they hold is reported.
pub fn shutdown() {
    let types = class_manager::reset();
    with_gil(|| unsafe { extensions::reset() });
    codecs::clear();
    types::providers::reset();
    let live = managed::live_handles();
    if live > 0 {
        warn!(event = "bridge_shutdown", types, live_handles = live, "identity handles still held by native objects");
    } else {
        info!(event = "bridge_shutdown", types, "bridge state cleared");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::runtime::ffi::gil::with_gil;

    /// Run `f` with the interpreter initialized and its lock held
    pub fn runtime<R>(f: impl FnOnce() -> R) -> R {
        typebridge_runtime::Py_Initialize();
        with_gil(f)
    }
}
