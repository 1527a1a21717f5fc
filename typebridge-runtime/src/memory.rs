//! Object memory - size-prefixed raw allocation for objects and buffers
//!
//! Design: every block carries a small header recording its usable size so
//! `PyObject_Free` can rebuild the `Layout` without the caller passing it back.
//! Blocks are 16-byte aligned, which covers every object layout in the runtime.

use core::ffi::c_void;
use std::alloc::{self, Layout};

const ALIGN: usize = 16;

/// Allocation header (16 bytes) - prefixed before every block
#[repr(C, align(16))]
struct BlockHeader {
    size: usize,
}

impl BlockHeader {
    #[inline]
    unsafe fn from_block(block: *mut c_void) -> *mut Self {
        (block as *mut u8).sub(core::mem::size_of::<Self>()) as *mut Self
    }
}

#[inline]
fn layout_for(size: usize) -> Option<Layout> {
    let total = size.checked_add(core::mem::size_of::<BlockHeader>())?;
    Layout::from_size_align(total, ALIGN).ok()
}

unsafe fn raw_alloc(size: usize, zeroed: bool) -> *mut c_void {
    // Zero-size requests still get a distinct block
    let size = size.max(1);
    let Some(layout) = layout_for(size) else {
        return core::ptr::null_mut();
    };
    let base = if zeroed {
        alloc::alloc_zeroed(layout)
    } else {
        alloc::alloc(layout)
    };
    if base.is_null() {
        return core::ptr::null_mut();
    }
    let header = base as *mut BlockHeader;
    header.write(BlockHeader { size });
    tracing::trace!(event = "allocation", size_bytes = size, address = ?base, "block allocated");
    header.add(1) as *mut c_void
}

/// Allocate `size` bytes of uninitialized memory
///
/// # Safety
/// Returned block must be released with `PyObject_Free`
#[no_mangle]
pub unsafe extern "C" fn PyObject_Malloc(size: usize) -> *mut c_void {
    raw_alloc(size, false)
}

/// Allocate `nelem * elsize` zeroed bytes
///
/// # Safety
/// Returned block must be released with `PyObject_Free`
#[no_mangle]
pub unsafe extern "C" fn PyObject_Calloc(nelem: usize, elsize: usize) -> *mut c_void {
    match nelem.checked_mul(elsize) {
        Some(size) => raw_alloc(size, true),
        None => core::ptr::null_mut(),
    }
}

/// Resize a block, preserving its prefix
///
/// # Safety
/// `block` must be null or come from this allocator
#[no_mangle]
pub unsafe extern "C" fn PyObject_Realloc(block: *mut c_void, size: usize) -> *mut c_void {
    if block.is_null() {
        return raw_alloc(size, false);
    }
    let header = BlockHeader::from_block(block);
    let old = (*header).size;
    let (Some(old_layout), Some(new_layout)) = (layout_for(old), layout_for(size.max(1))) else {
        return core::ptr::null_mut();
    };
    let base = alloc::realloc(header as *mut u8, old_layout, new_layout.size());
    if base.is_null() {
        return core::ptr::null_mut();
    }
    let header = base as *mut BlockHeader;
    (*header).size = size.max(1);
    header.add(1) as *mut c_void
}

/// Release a block (null-safe)
///
/// # Safety
/// `block` must be null or come from this allocator, released once
#[no_mangle]
pub unsafe extern "C" fn PyObject_Free(block: *mut c_void) {
    if block.is_null() {
        return;
    }
    let header = BlockHeader::from_block(block);
    if let Some(layout) = layout_for((*header).size) {
        tracing::trace!(event = "deallocation", address = ?header, "block released");
        alloc::dealloc(header as *mut u8, layout);
    }
}

/// Raw-memory allocator used for buffers that are not objects
///
/// # Safety
/// See `PyObject_Malloc`
#[no_mangle]
pub unsafe extern "C" fn PyMem_Malloc(size: usize) -> *mut c_void {
    PyObject_Malloc(size)
}

/// # Safety
/// See `PyObject_Free`
#[no_mangle]
pub unsafe extern "C" fn PyMem_Free(block: *mut c_void) {
    PyObject_Free(block)
}

/// Usable size of a live block (testing aid)
///
/// # Safety
/// `block` must be a live block from this allocator
pub unsafe fn block_size(block: *mut c_void) -> usize {
    (*BlockHeader::from_block(block)).size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calloc_is_zeroed_and_aligned() {
        unsafe {
            let p = PyObject_Calloc(4, 8) as *mut u64;
            assert!(!p.is_null());
            assert_eq!(p as usize % ALIGN, 0);
            for i in 0..4 {
                assert_eq!(*p.add(i), 0);
            }
            assert_eq!(block_size(p as *mut c_void), 32);
            PyObject_Free(p as *mut c_void);
        }
    }

    #[test]
    fn test_realloc_preserves_prefix() {
        unsafe {
            let p = PyObject_Malloc(2) as *mut u8;
            *p = 7;
            *p.add(1) = 9;
            let q = PyObject_Realloc(p as *mut c_void, 64) as *mut u8;
            assert_eq!(*q, 7);
            assert_eq!(*q.add(1), 9);
            assert_eq!(block_size(q as *mut c_void), 64);
            PyObject_Free(q as *mut c_void);
        }
    }

    #[test]
    fn test_free_null_is_noop() {
        unsafe { PyObject_Free(core::ptr::null_mut()) };
    }

    #[test]
    fn test_overflowing_calloc_fails() {
        unsafe { assert!(PyObject_Calloc(usize::MAX, 2).is_null()) };
    }
}
