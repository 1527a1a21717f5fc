//! Managed exceptions as Rust errors
//!
//! A [`ManagedException`] is a handle to an exception *object*; cloning it
//! clones the handle, so an exception that travels through the interpreter and
//! back is still the same object.

use std::fmt;

use super::object::ObjectRef;
use super::types::Type;

#[derive(Clone, PartialEq)]
pub struct ManagedException(ObjectRef);

impl ManagedException {
    /// Exception of type `ty`; `ty` must derive from `Exception`
    pub fn new(ty: &Type, message: impl AsRef<str>) -> Self {
        ManagedException(ObjectRef::new_exception(ty, message.as_ref(), None))
    }

    pub fn with_inner(ty: &Type, message: impl AsRef<str>, inner: ManagedException) -> Self {
        ManagedException(ObjectRef::new_exception(ty, message.as_ref(), Some(inner.0)))
    }

    /// Adopt an existing exception object; None when `obj` has no exception
    /// payload
    pub fn from_object(obj: ObjectRef) -> Option<Self> {
        obj.as_exception().is_some().then_some(ManagedException(obj))
    }

    pub fn argument(message: impl AsRef<str>) -> Self {
        Self::new(&super::core().argument_exception, message)
    }

    pub fn invalid_cast(message: impl AsRef<str>) -> Self {
        Self::new(&super::core().invalid_cast_exception, message)
    }

    pub fn invalid_operation(message: impl AsRef<str>) -> Self {
        Self::new(&super::core().invalid_operation_exception, message)
    }

    pub fn overflow(message: impl AsRef<str>) -> Self {
        Self::new(&super::core().overflow_exception, message)
    }

    pub fn index_out_of_range(index: usize, len: usize) -> Self {
        Self::new(
            &super::core().index_out_of_range_exception,
            format!("index {} is outside the bounds of an array of length {}", index, len),
        )
    }

    pub fn key_not_found(message: impl AsRef<str>) -> Self {
        Self::new(&super::core().key_not_found_exception, message)
    }

    pub fn not_supported(message: impl AsRef<str>) -> Self {
        Self::new(&super::core().not_supported_exception, message)
    }

    pub fn null_reference(message: impl AsRef<str>) -> Self {
        Self::new(&super::core().null_reference_exception, message)
    }

    /// The exception object itself
    pub fn object(&self) -> &ObjectRef {
        &self.0
    }

    pub fn into_object(self) -> ObjectRef {
        self.0
    }

    pub fn ty(&self) -> &Type {
        self.0.ty()
    }

    pub fn type_name(&self) -> String {
        self.0.ty().full_name()
    }

    pub fn message(&self) -> String {
        self.0.as_exception().map(|e| e.message()).unwrap_or_default()
    }

    pub fn inner(&self) -> Option<ManagedException> {
        self.0
            .as_exception()
            .and_then(|e| e.inner())
            .and_then(ManagedException::from_object)
    }

    /// Is this exception of type `ty` or a subclass
    pub fn is(&self, ty: &Type) -> bool {
        ty.is_assignable_from(self.0.ty())
    }
}

impl fmt::Display for ManagedException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name(), self.message())
    }
}

impl fmt::Debug for ManagedException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedException")
            .field("type", &self.type_name())
            .field("message", &self.message())
            .field("object", &self.0)
            .finish()
    }
}

impl std::error::Error for ManagedException {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managed::core;

    #[test]
    fn test_clone_keeps_identity() {
        let e = ManagedException::argument("bad");
        let copy = e.clone();
        assert!(copy.object().ptr_eq(e.object()));
        assert_eq!(e.to_string(), "System.ArgumentException: bad");
    }

    #[test]
    fn test_inner_chain() {
        let inner = ManagedException::overflow("too big");
        let outer = ManagedException::with_inner(&core().exception, "wrapped", inner.clone());
        assert_eq!(outer.inner(), Some(inner));
        assert!(outer.is(&core().exception));
        assert!(!outer.is(&core().overflow_exception));
    }
}
