//! GC cooperation slots
//!
//! Bridged instances never take part in the interpreter's cycle detection:
//! `tp_traverse` and `tp_clear` report nothing (0) and `tp_is_gc` reports
//! "not collectible" (1). On x86_64 and aarch64 the three functions are
//! pre-assembled bytes copied into an executable page that is never unmapped,
//! so the slot addresses stay valid for the life of the process. Elsewhere, or
//! when the page cannot be mapped, plain Rust functions fill the slots.

use std::ffi::{c_int, c_void};

use once_cell::sync::OnceCell;
use tracing::{debug, warn};
use typebridge_runtime::{inquiry, traverseproc, visitproc, PyObject};

/// Function pointers for the three GC cooperation slots
#[derive(Clone, Copy)]
pub struct GcSlots {
    pub traverse: traverseproc,
    pub clear: inquiry,
    pub is_gc: inquiry,
    native: bool,
}

impl GcSlots {
    /// True when the slots live in the mapped code page
    pub fn is_native(&self) -> bool {
        self.native
    }
}

static SLOTS: OnceCell<GcSlots> = OnceCell::new();

unsafe extern "C" fn traverse_none(_ob: *mut PyObject, _visit: visitproc, _arg: *mut c_void) -> c_int {
    0
}

unsafe extern "C" fn clear_none(_ob: *mut PyObject) -> c_int {
    0
}

unsafe extern "C" fn never_collectible(_ob: *mut PyObject) -> c_int {
    1
}

const FALLBACK: GcSlots = GcSlots {
    traverse: traverse_none,
    clear: clear_none,
    is_gc: never_collectible,
    native: false,
};

/// Machine code for `return 0` and `return 1` under the C calling convention
#[cfg(target_arch = "x86_64")]
mod code {
    /// xor eax, eax; ret
    pub const RETURN_0: &[u8] = &[0x31, 0xC0, 0xC3];
    /// mov eax, 1; ret
    pub const RETURN_1: &[u8] = &[0xB8, 0x01, 0x00, 0x00, 0x00, 0xC3];
}

#[cfg(all(target_arch = "aarch64", not(target_vendor = "apple")))]
mod code {
    /// mov w0, #0; ret
    pub const RETURN_0: &[u8] = &[0x00, 0x00, 0x80, 0x52, 0xC0, 0x03, 0x5F, 0xD6];
    /// mov w0, #1; ret
    pub const RETURN_1: &[u8] = &[0x20, 0x00, 0x80, 0x52, 0xC0, 0x03, 0x5F, 0xD6];
}

/// Byte offset of the `return 1` stub inside the page
const RETURN_1_AT: usize = 16;

#[cfg(unix)]
mod platform {
    use std::ptr;

    pub const PAGE_SIZE: usize = 4096;

    pub unsafe fn alloc_rw(size: usize) -> *mut u8 {
        let ptr = libc::mmap(
            ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        );
        if ptr == libc::MAP_FAILED {
            ptr::null_mut()
        } else {
            ptr as *mut u8
        }
    }

    pub unsafe fn make_executable(ptr: *mut u8, size: usize) -> bool {
        libc::mprotect(ptr as *mut _, size, libc::PROT_READ | libc::PROT_EXEC) == 0
    }

    pub unsafe fn free(ptr: *mut u8, size: usize) {
        libc::munmap(ptr as *mut _, size);
    }
}

#[cfg(windows)]
mod platform {
    use std::ptr;

    use winapi::um::memoryapi::{VirtualAlloc, VirtualFree, VirtualProtect};
    use winapi::um::processthreadsapi::{FlushInstructionCache, GetCurrentProcess};
    use winapi::um::winnt::{MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_EXECUTE_READ, PAGE_READWRITE};

    pub const PAGE_SIZE: usize = 4096;

    pub unsafe fn alloc_rw(size: usize) -> *mut u8 {
        VirtualAlloc(ptr::null_mut(), size, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE) as *mut u8
    }

    pub unsafe fn make_executable(ptr: *mut u8, size: usize) -> bool {
        let mut old = 0;
        if VirtualProtect(ptr as *mut _, size, PAGE_EXECUTE_READ, &mut old) == 0 {
            return false;
        }
        FlushInstructionCache(GetCurrentProcess(), ptr as *const _, size) != 0
    }

    pub unsafe fn free(ptr: *mut u8, _size: usize) {
        VirtualFree(ptr as *mut _, 0, MEM_RELEASE);
    }
}

/// Make freshly written code visible to instruction fetch
#[cfg(all(target_arch = "aarch64", not(target_vendor = "apple"), unix))]
unsafe fn sync_icache(start: *const u8, len: usize) {
    use std::arch::asm;

    let ctr: u64;
    asm!("mrs {0}, ctr_el0", out(reg) ctr);
    let dline = 4usize << ((ctr >> 16) & 0xf);
    let iline = 4usize << (ctr & 0xf);
    let end = start as usize + len;

    let mut addr = start as usize & !(dline - 1);
    while addr < end {
        asm!("dc cvau, {0}", in(reg) addr);
        addr += dline;
    }
    asm!("dsb ish");
    let mut addr = start as usize & !(iline - 1);
    while addr < end {
        asm!("ic ivau, {0}", in(reg) addr);
        addr += iline;
    }
    asm!("dsb ish", "isb");
}

#[cfg(not(all(target_arch = "aarch64", not(target_vendor = "apple"), unix)))]
unsafe fn sync_icache(_start: *const u8, _len: usize) {}

#[cfg(any(
    target_arch = "x86_64",
    all(target_arch = "aarch64", not(target_vendor = "apple"))
))]
fn map_native() -> Option<GcSlots> {
    use platform::PAGE_SIZE;

    unsafe {
        let page = platform::alloc_rw(PAGE_SIZE);
        if page.is_null() {
            return None;
        }
        std::ptr::copy_nonoverlapping(code::RETURN_0.as_ptr(), page, code::RETURN_0.len());
        std::ptr::copy_nonoverlapping(
            code::RETURN_1.as_ptr(),
            page.add(RETURN_1_AT),
            code::RETURN_1.len(),
        );
        if !platform::make_executable(page, PAGE_SIZE) {
            platform::free(page, PAGE_SIZE);
            return None;
        }
        sync_icache(page, PAGE_SIZE);
        // `return 0` serves both signatures: the extra arguments are ignored
        let zero = page as *const ();
        let one = page.add(RETURN_1_AT) as *const ();
        Some(GcSlots {
            traverse: std::mem::transmute::<*const (), traverseproc>(zero),
            clear: std::mem::transmute::<*const (), inquiry>(zero),
            is_gc: std::mem::transmute::<*const (), inquiry>(one),
            native: true,
        })
    }
}

#[cfg(not(any(
    target_arch = "x86_64",
    all(target_arch = "aarch64", not(target_vendor = "apple"))
)))]
fn map_native() -> Option<GcSlots> {
    None
}

/// Choose the slot implementation once per process
///
/// Later calls return the first choice whatever `prefer_native` says: slot
/// addresses already written into live types must stay valid.
pub fn install(prefer_native: bool) -> GcSlots {
    *SLOTS.get_or_init(|| {
        if !prefer_native {
            debug!(event = "gc_slots", native = false, "using built-in GC slot functions");
            return FALLBACK;
        }
        match map_native() {
            Some(slots) => {
                debug!(event = "gc_slots", native = true, "mapped GC slot code page");
                slots
            }
            None => {
                warn!(event = "gc_slots", "executable code page unavailable; using built-in GC slot functions");
                FALLBACK
            }
        }
    })
}

/// Installed slots, installing the native page on first use
pub fn gc_slots() -> GcSlots {
    match SLOTS.get() {
        Some(slots) => *slots,
        None => install(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_report_fixed_values() {
        let slots = gc_slots();
        let ob = std::ptr::null_mut();
        unsafe {
            assert_eq!((slots.traverse)(ob, traverse_visit, std::ptr::null_mut()), 0);
            assert_eq!((slots.clear)(ob), 0);
            assert_eq!((slots.is_gc)(ob), 1);
        }
    }

    unsafe extern "C" fn traverse_visit(_ob: *mut PyObject, _arg: *mut c_void) -> c_int {
        panic!("bridged instances report no references")
    }

    #[test]
    fn test_install_is_sticky() {
        let first = install(true);
        let second = install(false);
        assert_eq!(first.is_native(), second.is_native());
        assert_eq!(first.is_gc as usize, second.is_gc as usize);
    }

    #[test]
    fn test_fallback_values() {
        unsafe {
            assert_eq!((FALLBACK.clear)(std::ptr::null_mut()), 0);
            assert_eq!((FALLBACK.is_gc)(std::ptr::null_mut()), 1);
        }
    }
}
