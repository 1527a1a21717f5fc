//! Identity handles: strong references that live inside native memory
//!
//! A [`GcHandle`] is stored as a raw pointer in a wrapper's reserved slot. It
//! keeps its managed object alive until the slot's owner frees it, which
//! happens exactly once, from the wrapper's deallocation routine.

use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::object::{ManagedObject, ObjectRef};

static LIVE: AtomicUsize = AtomicUsize::new(0);

/// Number of handles allocated and not yet freed
pub fn live_handles() -> usize {
    LIVE.load(Ordering::Acquire)
}

/// Owned strong handle to a managed object
#[derive(Debug)]
pub struct GcHandle(ObjectRef);

impl GcHandle {
    pub fn alloc(obj: &ObjectRef) -> Self {
        LIVE.fetch_add(1, Ordering::AcqRel);
        GcHandle(obj.clone())
    }

    pub fn target(&self) -> &ObjectRef {
        &self.0
    }

    /// Give the handle up as a pointer-sized word
    pub fn into_raw(self) -> *mut c_void {
        let this = std::mem::ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so the reference moves out exactly once
        let obj = unsafe { std::ptr::read(&this.0) };
        obj.into_raw() as *mut c_void
    }

    /// Reclaim a handle produced by [`into_raw`](Self::into_raw)
    ///
    /// # Safety
    /// `raw` must come from `into_raw` and be reclaimed at most once
    pub unsafe fn from_raw(raw: *mut c_void) -> Self {
        GcHandle(ObjectRef::from_raw(raw as *const ManagedObject))
    }

    /// Target of a raw handle without consuming it
    ///
    /// # Safety
    /// `raw` must be a live handle from `into_raw`
    pub unsafe fn borrow_raw(raw: *mut c_void) -> ObjectRef {
        ObjectRef::clone_raw(raw as *const ManagedObject)
    }

    /// Release the handle now
    pub fn free(self) {
        drop(self)
    }
}

impl Drop for GcHandle {
    fn drop(&mut self) {
        LIVE.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managed::core;

    #[test]
    fn test_raw_round_trip_preserves_identity() {
        let obj = ObjectRef::alloc(&core().object);
        let before = live_handles();
        let raw = GcHandle::alloc(&obj).into_raw();
        assert!(live_handles() >= before + 1);
        let peek = unsafe { GcHandle::borrow_raw(raw) };
        assert!(peek.ptr_eq(&obj));
        let handle = unsafe { GcHandle::from_raw(raw) };
        assert!(handle.target().ptr_eq(&obj));
        handle.free();
    }
}
