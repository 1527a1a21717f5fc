//! Instance layout of synthesized types
//!
//! A bridged instance is its primary base's instance with up to three
//! pointer slots appended: the instance dict, the weak-reference list and the
//! managed-identity handle. Slots the base already has are reused at the
//! base's offsets, which is what lets a bridged exception stay layout
//! compatible with the interpreter's exception object.

use tracing::trace;

use super::meta_type;
use crate::error::{BridgeError, Result};
use crate::runtime::ffi::types::type_name;
use crate::runtime::ffi::{PyTypeObject, Py_ssize_t};
use crate::runtime::offsets::PTR_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceLayout {
    pub basicsize: Py_ssize_t,
    pub dictoffset: Py_ssize_t,
    pub weaklistoffset: Py_ssize_t,
    /// Where the managed identity handle lives
    pub handle_offset: Py_ssize_t,
}

/// Layout of a type whose primary base is `base`
///
/// # Safety
/// `base` must be a ready type object
pub unsafe fn compute(base: *mut PyTypeObject) -> Result<InstanceLayout> {
    if (*base).tp_itemsize != 0 {
        return Err(BridgeError::Configuration(format!(
            "cannot extend variable-size type '{}'",
            type_name(base)
        )));
    }
    let mut size = (*base).tp_basicsize;
    let mut append = || {
        let at = size;
        size += PTR_SIZE;
        at
    };
    let dictoffset = match (*base).tp_dictoffset {
        0 => append(),
        inherited => inherited,
    };
    let weaklistoffset = match (*base).tp_weaklistoffset {
        0 => append(),
        inherited => inherited,
    };
    let handle_offset = match meta_type::handle_offset_of(base) {
        Some(inherited) => inherited,
        None => append(),
    };
    let layout = InstanceLayout {
        basicsize: size,
        dictoffset,
        weaklistoffset,
        handle_offset,
    };
    trace!(event = "layout", base = type_name(base), ?layout, "instance layout computed");
    Ok(layout)
}

impl InstanceLayout {
    /// Store the offsets in a type under construction
    ///
    /// # Safety
    /// `tp` must not be ready yet
    pub unsafe fn apply(&self, tp: *mut PyTypeObject) {
        (*tp).tp_basicsize = self.basicsize;
        (*tp).tp_itemsize = 0;
        (*tp).tp_dictoffset = self.dictoffset;
        (*tp).tp_weaklistoffset = self.weaklistoffset;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ffi::error::PyExc_Exception;
    use crate::runtime::ffi::types::PyBaseObject_Type;
    use crate::runtime::offsets::{exception_cause_offset, object_head_size};
    use crate::testing::runtime;

    #[test]
    fn test_object_base_gains_three_slots() {
        runtime(|| unsafe {
            let layout = compute(PyBaseObject_Type()).unwrap();
            let head = object_head_size();
            assert_eq!(layout.dictoffset, head);
            assert_eq!(layout.weaklistoffset, head + PTR_SIZE);
            assert_eq!(layout.handle_offset, head + 2 * PTR_SIZE);
            assert_eq!(layout.basicsize, head + 3 * PTR_SIZE);
        });
    }

    #[test]
    fn test_exception_base_reuses_its_dict() {
        runtime(|| unsafe {
            let base = PyExc_Exception() as *mut PyTypeObject;
            let layout = compute(base).unwrap();
            assert_eq!(layout.dictoffset, (*base).tp_dictoffset);
            assert!(layout.handle_offset >= (*base).tp_basicsize);
            assert!(layout.handle_offset > exception_cause_offset());
            assert_eq!(layout.basicsize, layout.handle_offset + PTR_SIZE);
        });
    }
}
