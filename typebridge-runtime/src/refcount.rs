//! Reference counting - C API and inline fast paths
//!
//! Counts are plain integers mutated under the interpreter lock. Objects whose
//! count reaches zero are handed to their type's `tp_dealloc`.
//!
//! With the `trace-refs` feature every heap object is linked into a global
//! doubly-linked chain through `_ob_next/_ob_prev`, and the inline helpers route
//! through the out-of-line entry points so the chain stays consistent.

use crate::object::{PyObject, Py_ssize_t};

/// Count given to static singletons and builtin types so they are never freed
pub const IMMORTAL_REFCNT: Py_ssize_t = 1 << 30;

/// Increment reference count (not null-safe)
#[inline(always)]
pub unsafe fn Py_INCREF(op: *mut PyObject) {
    #[cfg(feature = "trace-refs")]
    {
        Py_IncRef(op);
    }
    #[cfg(not(feature = "trace-refs"))]
    {
        (*op).ob_refcnt += 1;
    }
}

/// Decrement reference count, deallocating at zero (not null-safe)
#[inline(always)]
pub unsafe fn Py_DECREF(op: *mut PyObject) {
    #[cfg(feature = "trace-refs")]
    {
        Py_DecRef(op);
    }
    #[cfg(not(feature = "trace-refs"))]
    {
        (*op).ob_refcnt -= 1;
        if (*op).ob_refcnt == 0 {
            _Py_Dealloc(op);
        }
    }
}

#[inline(always)]
pub unsafe fn Py_XINCREF(op: *mut PyObject) {
    if !op.is_null() {
        Py_INCREF(op);
    }
}

#[inline(always)]
pub unsafe fn Py_XDECREF(op: *mut PyObject) {
    if !op.is_null() {
        Py_DECREF(op);
    }
}

/// Increment and return the same pointer
#[inline(always)]
pub unsafe fn Py_NewRef(op: *mut PyObject) -> *mut PyObject {
    Py_INCREF(op);
    op
}

/// Null the slot first, then release what it held
#[inline]
pub unsafe fn Py_CLEAR(slot: *mut *mut PyObject) {
    let old = *slot;
    if !old.is_null() {
        *slot = core::ptr::null_mut();
        Py_DECREF(old);
    }
}

/// Out-of-line increment (null-safe)
///
/// # Safety
/// `op` must be null or a live object
#[no_mangle]
pub unsafe extern "C" fn Py_IncRef(op: *mut PyObject) {
    if op.is_null() {
        return;
    }
    debug_assert!((*op).ob_refcnt > 0, "incref of a dead object");
    (*op).ob_refcnt += 1;
}

/// Out-of-line decrement (null-safe)
///
/// # Safety
/// `op` must be null or a live object owned by the caller
#[no_mangle]
pub unsafe extern "C" fn Py_DecRef(op: *mut PyObject) {
    if op.is_null() {
        return;
    }
    debug_assert!((*op).ob_refcnt > 0, "refcount underflow");
    (*op).ob_refcnt -= 1;
    if (*op).ob_refcnt == 0 {
        _Py_Dealloc(op);
    }
}

/// Destroy object (cold path)
///
/// # Safety
/// `op` must have a zero reference count
#[no_mangle]
#[cold]
#[inline(never)]
pub unsafe extern "C" fn _Py_Dealloc(op: *mut PyObject) {
    let tp = (*op).ob_type;
    #[cfg(feature = "trace-refs")]
    _Py_ForgetReference(op);
    if let Some(dealloc) = (*tp).tp_dealloc {
        dealloc(op);
    }
}

/// Initialize the count of a freshly allocated object
///
/// # Safety
/// `op` must point at an allocated, header-sized block
#[no_mangle]
pub unsafe extern "C" fn _Py_NewReference(op: *mut PyObject) {
    (*op).ob_refcnt = 1;
    #[cfg(feature = "trace-refs")]
    chain::link(op);
}

#[cfg(feature = "trace-refs")]
pub use chain::{_Py_ForgetReference, _Py_RefChainLength};

#[cfg(feature = "trace-refs")]
mod chain {
    use super::*;
    use once_cell::sync::Lazy;
    use parking_lot::Mutex;

    struct Sentinel(*mut PyObject);
    unsafe impl Send for Sentinel {}

    /// Head of the live-object chain; a self-linked sentinel
    static REFCHAIN: Lazy<Mutex<Sentinel>> = Lazy::new(|| {
        let head = Box::into_raw(Box::new(PyObject {
            _ob_next: core::ptr::null_mut(),
            _ob_prev: core::ptr::null_mut(),
            ob_refcnt: IMMORTAL_REFCNT,
            ob_type: core::ptr::null_mut(),
        }));
        unsafe {
            (*head)._ob_next = head;
            (*head)._ob_prev = head;
        }
        Mutex::new(Sentinel(head))
    });

    pub(super) unsafe fn link(op: *mut PyObject) {
        let head = REFCHAIN.lock();
        let head = head.0;
        (*op)._ob_prev = head;
        (*op)._ob_next = (*head)._ob_next;
        (*(*head)._ob_next)._ob_prev = op;
        (*head)._ob_next = op;
    }

    /// Unlink an object from the chain (no-op for unlinked objects)
    ///
    /// # Safety
    /// `op` must be a live object
    #[no_mangle]
    pub unsafe extern "C" fn _Py_ForgetReference(op: *mut PyObject) {
        let _guard = REFCHAIN.lock();
        if (*op)._ob_next.is_null() {
            return;
        }
        (*(*op)._ob_prev)._ob_next = (*op)._ob_next;
        (*(*op)._ob_next)._ob_prev = (*op)._ob_prev;
        (*op)._ob_next = core::ptr::null_mut();
        (*op)._ob_prev = core::ptr::null_mut();
    }

    /// Number of objects currently linked into the chain
    #[no_mangle]
    pub extern "C" fn _Py_RefChainLength() -> Py_ssize_t {
        let head = REFCHAIN.lock();
        let head = head.0;
        let mut n = 0;
        unsafe {
            let mut cur = (*head)._ob_next;
            while cur != head {
                n += 1;
                cur = (*cur)._ob_next;
            }
        }
        n
    }
}
