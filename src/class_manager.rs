//! Managed type to native type cache
//!
//! Exactly one native type object exists per managed type. Lookups are
//! lock-free reads; a miss synthesizes the type with the interpreter lock
//! held, which serializes creation and lets base types be created
//! recursively without holding any cache entry.

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use tracing::{debug, trace};

use crate::classes::ClassBase;
use crate::error::{BridgeError, Result};
use crate::managed::Type;
use crate::reference::{NativeObject, NewReference};
use crate::runtime::ffi::gil::with_gil;
use crate::runtime::ffi::PyTypeObject;
use crate::types;

static CACHE: Lazy<DashMap<Type, NativeObject>> = Lazy::new(DashMap::new);

/// Native type object for `ty`, creating and caching it on first request
///
/// The pointer is borrowed from the cache and stays valid until
/// [`reset`].
pub fn get_or_create(ty: &Type) -> Result<*mut PyTypeObject> {
    if let Some(found) = CACHE.get(ty) {
        trace!(event = "class_cache_hit", ty = %ty);
        return Ok(found.as_ptr() as *mut PyTypeObject);
    }
    with_gil(|| {
        // Another thread may have finished while we waited for the lock
        if let Some(found) = CACHE.get(ty) {
            return Ok(found.as_ptr() as *mut PyTypeObject);
        }
        debug!(event = "class_cache_miss", ty = %ty, "synthesizing native type");
        let class = Arc::new(ClassBase::new(ty)?);
        let created = unsafe { types::create_type(class)? };
        let tp = insert(ty, created)?;
        Ok(tp)
    })
}

/// Publish a type created elsewhere (native subclasses of bridged types)
pub(crate) fn register(ty: &Type, tp: NewReference) -> Result<*mut PyTypeObject> {
    with_gil(|| insert(ty, tp))
}

fn insert(ty: &Type, tp: NewReference) -> Result<*mut PyTypeObject> {
    let owner = tp.move_to_owner()?;
    let entry = CACHE.entry(ty.clone()).or_insert(owner);
    Ok(entry.as_ptr() as *mut PyTypeObject)
}

/// Cached native type for `ty`, without creating one
pub fn lookup(ty: &Type) -> Option<*mut PyTypeObject> {
    CACHE.get(ty).map(|found| found.as_ptr() as *mut PyTypeObject)
}

/// Managed type of a bridged native type
///
/// # Safety
/// `tp` must be a live type object
pub unsafe fn managed_type_of(tp: *mut PyTypeObject) -> Option<Type> {
    types::class_of(tp).map(|class| class.ty().clone())
}

pub fn cached_count() -> usize {
    CACHE.len()
}

/// Forget every cached type; returns how many were dropped
///
/// Live instances keep their types alive; new requests build fresh ones.
pub fn reset() -> usize {
    let drained: Vec<NativeObject> = {
        let keys: Vec<Type> = CACHE.iter().map(|e| e.key().clone()).collect();
        keys.iter().filter_map(|k| CACHE.remove(k).map(|(_, v)| v)).collect()
    };
    let count = drained.len();
    // Deallocation may run arbitrary slots; no map shard is locked here
    with_gil(|| drop(drained));
    debug!(event = "class_cache_reset", count, "native type cache cleared");
    count
}

/// Native type of `ty` or a configuration error naming it
pub(crate) fn require(ty: &Type) -> Result<*mut PyTypeObject> {
    get_or_create(ty).map_err(|e| match e {
        BridgeError::Configuration(msg) => {
            BridgeError::Configuration(format!("no native type for {}: {}", ty, msg))
        }
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managed::{core, TypeBuilder};
    use crate::runtime::ffi::types::PyType_IsSubtype;
    use crate::testing::runtime;

    #[test]
    fn test_same_managed_type_same_native_type() {
        runtime(|| {
            let ty = TypeBuilder::class("Demo", "Cached").build();
            let a = get_or_create(&ty).unwrap();
            let b = get_or_create(&ty).unwrap();
            assert_eq!(a, b);
            assert_eq!(lookup(&ty), Some(a));
            assert_eq!(unsafe { managed_type_of(a) }, Some(ty));
        });
    }

    #[test]
    fn test_base_types_are_created_first() {
        runtime(|| unsafe {
            let base = TypeBuilder::class("Demo", "Animal").build();
            let derived = TypeBuilder::class("Demo", "Dog").base(&base).build();
            let dog = get_or_create(&derived).unwrap();
            let animal = lookup(&base).expect("base synthesized with derived");
            assert!(PyType_IsSubtype(dog, animal) != 0);
            let object = lookup(&core().object).unwrap();
            assert!(PyType_IsSubtype(dog, object) != 0);
        });
    }

    #[test]
    fn test_concurrent_requests_yield_one_type() {
        let ty = TypeBuilder::class("Demo", "Contended").build();
        crate::testing::runtime(|| {});
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ty = ty.clone();
                std::thread::spawn(move || get_or_create(&ty).map(|tp| tp as usize).unwrap())
            })
            .collect();
        let results: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.windows(2).all(|w| w[0] == w[1]));
    }
}
