//! Typebridge Runtime - embedded interpreter object layer
//!
//! This crate provides a CPython-shaped object model behind a C ABI:
//! reference-counted objects, type objects with slot tables, the builtin
//! types, the exception hierarchy and error indicator, the abstract object
//! protocol, the buffer protocol and the global interpreter lock. Layouts are
//! `#[repr(C)]` so offsets computed against these structs are the offsets an
//! extension module would see.
//!
//! Call [`Py_Initialize`] before touching any type or singleton accessor.

#![allow(non_snake_case, non_camel_case_types, non_upper_case_globals)]
#![allow(clippy::missing_safety_doc)]

/// Process-wide pointer published once during initialization
macro_rules! global_ptr {
    ($slot:ident, $accessor:ident, $ty:ty) => {
        static $slot: ::core::sync::atomic::AtomicPtr<$ty> =
            ::core::sync::atomic::AtomicPtr::new(::core::ptr::null_mut());

        #[inline]
        pub fn $accessor() -> *mut $ty {
            $slot.load(::core::sync::atomic::Ordering::Acquire)
        }
    };
}

pub mod object;
pub mod memory;
pub mod refcount;
pub mod typeobject;
pub mod errors;
pub mod builtins;
pub mod abstract_;
pub mod gil;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

use tracing::{error, info};

pub use abstract_::*;
pub use builtins::dict::*;
pub use builtins::float::*;
pub use builtins::function::*;
pub use builtins::iter::*;
pub use builtins::list::*;
pub use builtins::long::*;
pub use builtins::module::*;
pub use builtins::none::*;
pub use builtins::tuple::*;
pub use builtins::unicode::*;
pub use errors::*;
pub use gil::*;
pub use memory::*;
pub use object::*;
pub use refcount::*;
pub use typeobject::*;

static INIT: Once = Once::new();
static READY: AtomicBool = AtomicBool::new(false);

/// Build and ready every builtin type; idempotent
#[no_mangle]
pub extern "C" fn Py_Initialize() {
    INIT.call_once(|| unsafe {
        typeobject::init_core_types();
        builtins::init_types();
        errors::init_exceptions();
        let steps: [unsafe fn() -> core::ffi::c_int; 4] = [
            typeobject::ready_core_types,
            builtins::ready_types,
            errors::ready_exceptions,
            builtins::module::init_module_table,
        ];
        for step in steps {
            if step() < 0 {
                error!("builtin type initialization failed");
                return;
            }
        }
        READY.store(true, Ordering::Release);
        info!("interpreter object layer initialized");
    });
}

/// 1 once [`Py_Initialize`] has completed successfully
#[no_mangle]
pub extern "C" fn Py_IsInitialized() -> core::ffi::c_int {
    READY.load(Ordering::Acquire) as core::ffi::c_int
}

/// Builtin types and singletons are immortal; finalization only clears
/// the calling thread's error indicator
#[no_mangle]
pub extern "C" fn Py_Finalize() {
    if Py_IsInitialized() != 0 {
        unsafe { errors::PyErr_Clear() };
        info!("interpreter object layer finalized");
    }
}
