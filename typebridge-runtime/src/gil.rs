//! Global interpreter lock
//!
//! A reentrant lock owned by at most one OS thread. `PyGILState_Ensure`
//! nests freely on the owning thread; `PyEval_SaveThread` hands the lock
//! off entirely (whatever the nesting depth) and `PyEval_RestoreThread`
//! reinstates the saved depth.

use std::thread::{self, ThreadId};

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::object::{PyGILState_STATE, PyThreadState};

struct Owner {
    thread: Option<ThreadId>,
    depth: usize,
}

struct Gil {
    owner: Mutex<Owner>,
    released: Condvar,
}

static GIL: Lazy<Gil> = Lazy::new(|| Gil {
    owner: Mutex::new(Owner { thread: None, depth: 0 }),
    released: Condvar::new(),
});

impl Gil {
    fn acquire(&self, depth: usize) {
        let me = thread::current().id();
        let mut owner = self.owner.lock();
        while owner.thread.is_some_and(|t| t != me) {
            self.released.wait(&mut owner);
        }
        owner.thread = Some(me);
        owner.depth += depth;
    }

    /// Drop one nesting level; fully releases at zero
    fn release_one(&self) -> bool {
        let me = thread::current().id();
        let mut owner = self.owner.lock();
        if owner.thread != Some(me) || owner.depth == 0 {
            return false;
        }
        owner.depth -= 1;
        if owner.depth == 0 {
            owner.thread = None;
            self.released.notify_one();
        }
        true
    }

    /// Give the lock up entirely, returning the depth that was held
    fn release_all(&self) -> usize {
        let me = thread::current().id();
        let mut owner = self.owner.lock();
        if owner.thread != Some(me) {
            return 0;
        }
        let depth = std::mem::take(&mut owner.depth);
        owner.thread = None;
        self.released.notify_one();
        depth
    }

    fn held_by_current(&self) -> bool {
        self.owner.lock().thread == Some(thread::current().id())
    }
}

/// Acquire the lock for this thread (reentrant)
#[no_mangle]
pub extern "C" fn PyGILState_Ensure() -> PyGILState_STATE {
    let state = if GIL.held_by_current() {
        PyGILState_STATE::PyGILState_LOCKED
    } else {
        PyGILState_STATE::PyGILState_UNLOCKED
    };
    GIL.acquire(1);
    trace!(?state, "gil ensured");
    state
}

/// Undo the matching [`PyGILState_Ensure`]
#[no_mangle]
pub extern "C" fn PyGILState_Release(state: PyGILState_STATE) {
    if !GIL.release_one() {
        tracing::warn!(?state, "gil released by a thread that does not hold it");
    }
}

/// 1 when the calling thread holds the lock
#[no_mangle]
pub extern "C" fn PyGILState_Check() -> core::ffi::c_int {
    GIL.held_by_current() as core::ffi::c_int
}

/// Release the lock completely; the returned state restores it
#[no_mangle]
pub extern "C" fn PyEval_SaveThread() -> *mut PyThreadState {
    let depth = GIL.release_all();
    Box::into_raw(Box::new(PyThreadState { depth }))
}

/// Reacquire the lock saved by [`PyEval_SaveThread`]
///
/// # Safety
/// `ts` must come from [`PyEval_SaveThread`] and is consumed
#[no_mangle]
pub unsafe extern "C" fn PyEval_RestoreThread(ts: *mut PyThreadState) {
    if ts.is_null() {
        return;
    }
    let ts = Box::from_raw(ts);
    if ts.depth > 0 {
        GIL.acquire(ts.depth);
    }
}

/// RAII holder for the interpreter lock
pub struct GilGuard {
    state: PyGILState_STATE,
}

impl GilGuard {
    pub fn acquire() -> Self {
        Self { state: PyGILState_Ensure() }
    }
}

impl Drop for GilGuard {
    fn drop(&mut self) {
        PyGILState_Release(self.state);
    }
}

/// Run `f` with the interpreter lock held
pub fn with_gil<R>(f: impl FnOnce() -> R) -> R {
    let _guard = GilGuard::acquire();
    f()
}

/// Run `f` with the interpreter lock released, restoring it afterwards (even on panic)
pub fn allow_threads<R>(f: impl FnOnce() -> R) -> R {
    struct Restore(*mut PyThreadState);
    impl Drop for Restore {
        fn drop(&mut self) {
            unsafe { PyEval_RestoreThread(self.0) }
        }
    }
    let _restore = Restore(PyEval_SaveThread());
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_reentrant_ensure() {
        let outer = PyGILState_Ensure();
        let inner = PyGILState_Ensure();
        assert_eq!(inner, PyGILState_STATE::PyGILState_LOCKED);
        assert_eq!(PyGILState_Check(), 1);
        PyGILState_Release(inner);
        assert_eq!(PyGILState_Check(), 1);
        PyGILState_Release(outer);
    }

    #[test]
    fn test_allow_threads_lets_other_thread_in() {
        with_gil(|| {
            let ran = Arc::new(AtomicBool::new(false));
            let flag = ran.clone();
            allow_threads(|| {
                let handle = std::thread::spawn(move || {
                    with_gil(|| flag.store(true, Ordering::SeqCst));
                });
                handle.join().unwrap();
            });
            assert!(ran.load(Ordering::SeqCst));
            assert_eq!(PyGILState_Check(), 1);
        });
    }
}
