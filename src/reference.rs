//! Reference kinds over native object addresses
//!
//! The native runtime's counting contract, encoded in types:
//! - [`BorrowedReference`]: no ownership; valid while some lender keeps it alive
//! - [`NewReference`]: owns one count; moved to an owner or disposed exactly once
//! - [`StolenReference`]: ownership already handed to a native API
//!
//! [`NativeObject`] is the long-lived owner a `NewReference` moves into. It may
//! be stored on the managed side and dropped from any thread: its count is only
//! touched with the interpreter lock held.

use std::fmt;
use std::mem::ManuallyDrop;
use std::ptr::null_mut;

use typebridge_runtime::{with_gil, PyObject, Py_DECREF, Py_INCREF, Py_XDECREF};

use crate::error::{BridgeError, Result};

/// Non-owning view of a native object
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BorrowedReference(*mut PyObject);

impl BorrowedReference {
    pub const fn null() -> Self {
        Self(null_mut())
    }

    /// # Safety
    /// `ptr` must be null or point to a live object for as long as the
    /// borrow is used
    pub const unsafe fn from_raw(ptr: *mut PyObject) -> Self {
        Self(ptr)
    }

    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }

    /// Address of the referenced object
    ///
    /// # Panics
    /// On a null reference; passing null into the native runtime crashes far
    /// from the cause
    pub fn address(&self) -> *mut PyObject {
        assert!(!self.0.is_null(), "dereferenced a null borrowed reference");
        self.0
    }

    /// Address, possibly null
    pub fn as_ptr(&self) -> *mut PyObject {
        self.0
    }
}

impl fmt::Debug for BorrowedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BorrowedReference({:p})", self.0)
    }
}

/// Exclusively owned reference; not `Clone`
#[must_use = "a new reference must be moved to an owner or disposed"]
pub struct NewReference(*mut PyObject);

impl NewReference {
    pub const fn null() -> Self {
        Self(null_mut())
    }

    /// Take ownership of a count the caller already holds
    ///
    /// # Safety
    /// `ptr` must be null or an owned reference
    pub unsafe fn from_raw(ptr: *mut PyObject) -> Self {
        Self(ptr)
    }

    /// Result of a native call returning a new reference; null becomes the
    /// pending native error
    ///
    /// # Safety
    /// `ptr` must be null or an owned reference
    pub unsafe fn checked(ptr: *mut PyObject) -> Result<Self> {
        if ptr.is_null() {
            return Err(crate::exceptions::rethrow_last());
        }
        Ok(Self(ptr))
    }

    /// Acquire a count on a borrowed object (null stays null)
    ///
    /// # Safety
    /// The interpreter lock must be held
    pub unsafe fn from_nullable(borrowed: BorrowedReference) -> Self {
        if !borrowed.is_null() {
            Py_INCREF(borrowed.0);
        }
        Self(borrowed.0)
    }

    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }

    pub fn borrow(&self) -> BorrowedReference {
        BorrowedReference(self.0)
    }

    /// Address of the referenced object
    ///
    /// # Panics
    /// On a null reference
    pub fn address(&self) -> *mut PyObject {
        self.borrow().address()
    }

    /// Address, possibly null
    pub fn as_ptr(&self) -> *mut PyObject {
        self.0
    }

    /// Transfer the count into a long-lived owner
    pub fn move_to_owner(self) -> Result<NativeObject> {
        let this = ManuallyDrop::new(self);
        if this.0.is_null() {
            return Err(BridgeError::Runtime("null reference moved to an owner".into()));
        }
        Ok(NativeObject(this.0))
    }

    /// Hand the count to a native API that steals its argument
    pub fn steal(self) -> StolenReference {
        let this = ManuallyDrop::new(self);
        StolenReference(this.0)
    }

    /// Release the raw owned pointer to the caller
    pub fn into_raw(self) -> *mut PyObject {
        ManuallyDrop::new(self).0
    }

    /// Release the count now
    pub fn dispose(self) {
        drop(self)
    }
}

impl Drop for NewReference {
    fn drop(&mut self) {
        // The holder of a raw native reference holds the interpreter lock
        unsafe { Py_XDECREF(self.0) };
        self.0 = null_mut();
    }
}

impl fmt::Debug for NewReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NewReference({:p})", self.0)
    }
}

/// A count whose release is now the native runtime's job
#[derive(Debug)]
pub struct StolenReference(*mut PyObject);

impl StolenReference {
    pub fn as_ptr(&self) -> *mut PyObject {
        self.0
    }
}

/// Owning handle to a native object, storable in managed data
pub struct NativeObject(*mut PyObject);

// Count changes happen under the interpreter lock (see Clone/Drop)
unsafe impl Send for NativeObject {}
unsafe impl Sync for NativeObject {}

impl NativeObject {
    /// Acquire a new owner for a borrowed object
    ///
    /// # Safety
    /// `borrowed` must be live and the interpreter lock held
    pub unsafe fn from_borrowed(borrowed: BorrowedReference) -> Result<Self> {
        NewReference::from_nullable(borrowed).move_to_owner()
    }

    pub fn borrow(&self) -> BorrowedReference {
        BorrowedReference(self.0)
    }

    pub fn as_ptr(&self) -> *mut PyObject {
        self.0
    }

    /// Another count on the same object
    ///
    /// # Safety
    /// The interpreter lock must be held
    pub unsafe fn new_reference(&self) -> NewReference {
        NewReference::from_nullable(self.borrow())
    }
}

impl Clone for NativeObject {
    fn clone(&self) -> Self {
        with_gil(|| unsafe { Py_INCREF(self.0) });
        NativeObject(self.0)
    }
}

impl Drop for NativeObject {
    fn drop(&mut self) {
        let ptr = self.0;
        with_gil(|| unsafe { Py_DECREF(ptr) });
    }
}

impl PartialEq for NativeObject {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for NativeObject {}

impl fmt::Debug for NativeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeObject({:p})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use typebridge_runtime::{PyLong_FromLong, Py_REFCNT};

    use crate::testing::runtime;

    #[test]
    fn test_new_reference_dispose_releases_once() {
        runtime(|| unsafe {
            let raw = PyLong_FromLong(100_000);
            let keep = NewReference::from_nullable(BorrowedReference::from_raw(raw));
            assert_eq!(Py_REFCNT(raw), 2);
            NewReference::from_raw(raw).dispose();
            assert_eq!(Py_REFCNT(raw), 1);
            drop(keep);
        });
    }

    #[test]
    fn test_move_to_owner_transfers_count() {
        runtime(|| unsafe {
            let raw = PyLong_FromLong(123_456);
            let owner = NewReference::from_raw(raw).move_to_owner().unwrap();
            assert_eq!(Py_REFCNT(raw), 1);
            let second = owner.clone();
            assert_eq!(Py_REFCNT(raw), 2);
            drop(second);
            assert_eq!(owner.as_ptr(), raw);
        });
    }

    #[test]
    fn test_null_reference_cannot_be_owned() {
        assert!(NewReference::null().move_to_owner().is_err());
    }

    #[test]
    #[should_panic(expected = "null borrowed reference")]
    fn test_null_address_is_fatal() {
        let _ = BorrowedReference::null().address();
    }

    #[test]
    fn test_steal_skips_release() {
        runtime(|| unsafe {
            let raw = PyLong_FromLong(77_777);
            let extra = NewReference::from_nullable(BorrowedReference::from_raw(raw));
            let stolen = extra.steal();
            assert_eq!(Py_REFCNT(stolen.as_ptr()), 2);
            Py_DECREF(stolen.as_ptr());
            Py_DECREF(raw);
        });
    }
}
