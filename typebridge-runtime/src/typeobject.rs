//! Type objects - `type`, `object`, type readiness and generic attribute access
//!
//! Design: static builtin types are leaked boxes published through atomic
//! globals during `Py_Initialize`; heap types are allocated by their metatype's
//! `tp_alloc` as `PyHeapTypeObject` and own their protocol tables.
//!
//! `PyType_Ready` computes a C3 method resolution order and inherits every
//! unset slot from each type on it, most-derived first. The deallocator that
//! frees an instance's memory (`free_instance`) also drops the instance's
//! reference to a heap type.

use core::ffi::{c_char, c_int, c_ulong, c_void, CStr};
use core::mem::size_of;
use core::ptr::null_mut;
use core::sync::atomic::Ordering;

use crate::builtins::dict::{dict_lookup, PyDict_Copy, PyDict_DelItem, PyDict_New, PyDict_SetItem};
use crate::builtins::none::{Py_None, Py_NotImplemented};
use crate::builtins::tuple::{tuple_from_vec, tuple_items, PyTuple_Size};
use crate::builtins::unicode::{unicode_as_str, unicode_from_str, PyUnicode_AsUTF8, PyUnicode_Check};
use crate::builtins::long::PyBool_FromLong;
use crate::errors::{
    raise_neg, raise_null, PyErr_ExceptionMatches, PyErr_Clear, PyExc_AttributeError,
    PyExc_KeyError, PyExc_TypeError, PyErr_NoMemory,
};
use crate::memory::{PyObject_Calloc, PyObject_Free};
use crate::object::*;
use crate::refcount::{Py_CLEAR, Py_DECREF, Py_INCREF, Py_NewRef, Py_XDECREF, _Py_NewReference, IMMORTAL_REFCNT};
use crate::abstract_::PyObject_Repr;

global_ptr!(TYPE_TYPE, PyType_Type, PyTypeObject);
global_ptr!(BASE_OBJECT_TYPE, PyBaseObject_Type, PyTypeObject);

/// Allocate a static builtin type (immortal, `ob_type` = `type`)
pub(crate) unsafe fn new_static_type(
    name: &'static CStr,
    basicsize: usize,
    itemsize: usize,
    flags: c_ulong,
) -> *mut PyTypeObject {
    let tp: *mut PyTypeObject = Box::into_raw(Box::new(core::mem::zeroed()));
    (*tp).ob_base.ob_base.ob_refcnt = IMMORTAL_REFCNT;
    (*tp).ob_base.ob_base.ob_type = PyType_Type();
    (*tp).tp_name = name.as_ptr();
    (*tp).tp_basicsize = basicsize as Py_ssize_t;
    (*tp).tp_itemsize = itemsize as Py_ssize_t;
    (*tp).tp_flags = Py_TPFLAGS_DEFAULT | flags;
    tp
}

/// Leak a default protocol table for a static type
pub(crate) fn leak_table<T: Default>() -> *mut T {
    Box::into_raw(Box::<T>::default())
}

pub(crate) unsafe fn init_core_types() {
    let type_type = new_static_type(
        c"type",
        size_of::<PyHeapTypeObject>(),
        0,
        Py_TPFLAGS_BASETYPE | Py_TPFLAGS_TYPE_SUBCLASS,
    );
    (*type_type).ob_base.ob_base.ob_type = type_type;
    (*type_type).tp_call = Some(type_call);
    (*type_type).tp_new = Some(type_new);
    (*type_type).tp_init = Some(type_init);
    (*type_type).tp_dealloc = Some(type_dealloc);
    (*type_type).tp_getattro = Some(type_getattro);
    (*type_type).tp_setattro = Some(type_setattro);
    (*type_type).tp_repr = Some(type_repr);
    TYPE_TYPE.store(type_type, Ordering::Release);

    let object_type = new_static_type(c"object", size_of::<PyObject>(), 0, Py_TPFLAGS_BASETYPE);
    (*object_type).tp_dealloc = Some(object_dealloc);
    (*object_type).tp_repr = Some(object_repr);
    (*object_type).tp_str = Some(object_str);
    (*object_type).tp_hash = Some(object_hash);
    (*object_type).tp_richcompare = Some(object_richcompare);
    (*object_type).tp_getattro = Some(PyObject_GenericGetAttr);
    (*object_type).tp_setattro = Some(PyObject_GenericSetAttr);
    (*object_type).tp_init = Some(object_init);
    (*object_type).tp_alloc = Some(PyType_GenericAlloc);
    (*object_type).tp_new = Some(object_new);
    (*object_type).tp_free = Some(PyObject_Free);
    BASE_OBJECT_TYPE.store(object_type, Ordering::Release);
    (*type_type).tp_base = object_type;
}

pub(crate) unsafe fn ready_core_types() -> c_int {
    if PyType_Ready(PyBaseObject_Type()) < 0 {
        return -1;
    }
    PyType_Ready(PyType_Type())
}

// ============================================================================
// Queries
// ============================================================================

/// Name of a type as a Rust string slice
pub unsafe fn type_name<'a>(tp: *mut PyTypeObject) -> &'a str {
    if tp.is_null() || (*tp).tp_name.is_null() {
        return "?";
    }
    CStr::from_ptr((*tp).tp_name).to_str().unwrap_or("?")
}

/// Name of an object's type
pub unsafe fn obj_type_name<'a>(o: *mut PyObject) -> &'a str {
    type_name(Py_TYPE(o))
}

#[inline]
pub unsafe fn PyType_Check(o: *mut PyObject) -> bool {
    PyType_HasFeature(Py_TYPE(o), Py_TPFLAGS_TYPE_SUBCLASS)
}

#[inline]
pub unsafe fn PyObject_TypeCheck(o: *mut PyObject, tp: *mut PyTypeObject) -> bool {
    Py_TYPE(o) == tp || PyType_IsSubtype(Py_TYPE(o), tp) != 0
}

/// Non-zero when `a` is `b` or derives from it (MRO walk)
///
/// # Safety
/// Both must be valid type objects
#[no_mangle]
pub unsafe extern "C" fn PyType_IsSubtype(a: *mut PyTypeObject, b: *mut PyTypeObject) -> c_int {
    if a == b {
        return 1;
    }
    let mro = (*a).tp_mro;
    if !mro.is_null() {
        return tuple_items(mro).iter().any(|&t| t as *mut PyTypeObject == b) as c_int;
    }
    let mut cur = (*a).tp_base;
    while !cur.is_null() {
        if cur == b {
            return 1;
        }
        cur = (*cur).tp_base;
    }
    (b == PyBaseObject_Type()) as c_int
}

/// # Safety
/// `tp` must be a valid type object
#[no_mangle]
pub unsafe extern "C" fn PyType_GetFlags(tp: *mut PyTypeObject) -> c_ulong {
    (*tp).tp_flags
}

/// Find `name` along the MRO of `tp` (borrowed, never raises)
///
/// # Safety
/// `tp` must be a valid type object and `name` a str
#[no_mangle]
pub unsafe extern "C" fn _PyType_Lookup(tp: *mut PyTypeObject, name: *mut PyObject) -> *mut PyObject {
    let mro = (*tp).tp_mro;
    if mro.is_null() {
        let mut cur = tp;
        while !cur.is_null() {
            if !(*cur).tp_dict.is_null() {
                let found = dict_lookup((*cur).tp_dict, name);
                if !found.is_null() {
                    return found;
                }
            }
            cur = (*cur).tp_base;
        }
        return null_mut();
    }
    for &base in tuple_items(mro) {
        let dict = (*(base as *mut PyTypeObject)).tp_dict;
        if dict.is_null() {
            continue;
        }
        let found = dict_lookup(dict, name);
        if !found.is_null() {
            return found;
        }
    }
    null_mut()
}

/// Pointer to an instance's dict slot, or null when the type has none
///
/// # Safety
/// `o` must be a live object
#[no_mangle]
pub unsafe extern "C" fn _PyObject_GetDictPtr(o: *mut PyObject) -> *mut *mut PyObject {
    let offset = (*Py_TYPE(o)).tp_dictoffset;
    if offset <= 0 {
        return null_mut();
    }
    (o as *mut u8).add(offset as usize) as *mut *mut PyObject
}

// ============================================================================
// Readiness
// ============================================================================

/// Finalize a type: base linkage, MRO, dict and slot inheritance
///
/// # Safety
/// `tp` must be a valid, fully allocated type object
#[no_mangle]
pub unsafe extern "C" fn PyType_Ready(tp: *mut PyTypeObject) -> c_int {
    if (*tp).tp_flags & Py_TPFLAGS_READY != 0 {
        return 0;
    }
    (*tp).tp_flags |= Py_TPFLAGS_READYING;
    let rc = ready_inner(tp);
    (*tp).tp_flags &= !Py_TPFLAGS_READYING;
    if rc == 0 {
        (*tp).tp_flags |= Py_TPFLAGS_READY;
        tracing::trace!(event = "type_ready", name = type_name(tp), "type ready");
    }
    rc
}

unsafe fn ready_inner(tp: *mut PyTypeObject) -> c_int {
    let object = PyBaseObject_Type();
    let mut base = (*tp).tp_base;
    if base.is_null() && tp != object {
        base = object;
        Py_INCREF(base as *mut PyObject);
        (*tp).tp_base = base;
    }
    if !base.is_null() && (*base).tp_flags & Py_TPFLAGS_READY == 0 && PyType_Ready(base) < 0 {
        return -1;
    }
    if Py_TYPE(tp as *mut PyObject).is_null() && !base.is_null() {
        (*tp).ob_base.ob_base.ob_type = Py_TYPE(base as *mut PyObject);
    }

    if (*tp).tp_bases.is_null() {
        let items = if base.is_null() {
            Vec::new()
        } else {
            vec![Py_NewRef(base as *mut PyObject)]
        };
        let bases = tuple_from_vec(items);
        if bases.is_null() {
            return -1;
        }
        (*tp).tp_bases = bases;
    } else {
        for &b in tuple_items((*tp).tp_bases) {
            if !PyType_Check(b) {
                return raise_neg(PyExc_TypeError(), "bases must be types");
            }
            let b = b as *mut PyTypeObject;
            if (*b).tp_flags & Py_TPFLAGS_READY == 0 && PyType_Ready(b) < 0 {
                return -1;
            }
        }
    }

    if (*tp).tp_dict.is_null() {
        let dict = PyDict_New();
        if dict.is_null() {
            return -1;
        }
        (*tp).tp_dict = dict;
    }

    let mro = compute_mro(tp);
    if mro.is_null() {
        return -1;
    }
    (*tp).tp_mro = mro;

    if !base.is_null() {
        inherit_special(tp, base);
    }
    for &b in tuple_items(mro).iter().skip(1) {
        inherit_slots(tp, b as *mut PyTypeObject);
    }
    0
}

/// C3 linearization over the declared bases
unsafe fn compute_mro(tp: *mut PyTypeObject) -> *mut PyObject {
    let bases: Vec<*mut PyTypeObject> = tuple_items((*tp).tp_bases)
        .iter()
        .map(|&b| b as *mut PyTypeObject)
        .collect();
    let mut seqs: Vec<Vec<*mut PyTypeObject>> = bases
        .iter()
        .map(|&b| {
            if (*b).tp_mro.is_null() {
                vec![b]
            } else {
                tuple_items((*b).tp_mro)
                    .iter()
                    .map(|&t| t as *mut PyTypeObject)
                    .collect()
            }
        })
        .collect();
    seqs.push(bases);

    let mut result = vec![tp];
    loop {
        seqs.retain(|s| !s.is_empty());
        if seqs.is_empty() {
            break;
        }
        let candidate = seqs
            .iter()
            .map(|s| s[0])
            .find(|c| !seqs.iter().any(|s| s[1..].contains(c)));
        let Some(next) = candidate else {
            return raise_null(
                PyExc_TypeError(),
                format!(
                    "Cannot create a consistent method resolution order (MRO) for bases of {}",
                    type_name(tp)
                ),
            );
        };
        result.push(next);
        for s in seqs.iter_mut() {
            if s[0] == next {
                s.remove(0);
            }
        }
    }
    tuple_from_vec(
        result
            .into_iter()
            .map(|t| Py_NewRef(t as *mut PyObject))
            .collect(),
    )
}

unsafe fn inherit_special(tp: *mut PyTypeObject, base: *mut PyTypeObject) {
    if (*tp).tp_basicsize == 0 {
        (*tp).tp_basicsize = (*base).tp_basicsize;
    }
    if (*tp).tp_itemsize == 0 {
        (*tp).tp_itemsize = (*base).tp_itemsize;
    }
    if (*tp).tp_dictoffset == 0 {
        (*tp).tp_dictoffset = (*base).tp_dictoffset;
    }
    if (*tp).tp_weaklistoffset == 0 {
        (*tp).tp_weaklistoffset = (*base).tp_weaklistoffset;
    }
    (*tp).tp_flags |= (*base).tp_flags & SUBCLASS_FLAGS;
}

/// Copy every unset field of a protocol table from a base's table
pub(crate) trait InheritSlots {
    fn inherit_from(&mut self, base: &Self);
}

macro_rules! impl_inherit_slots {
    ($table:ty; $($field:ident),* $(,)?) => {
        impl InheritSlots for $table {
            fn inherit_from(&mut self, base: &Self) {
                $(
                    if self.$field.is_none() {
                        self.$field = base.$field;
                    }
                )*
            }
        }
    };
}

impl_inherit_slots!(PyNumberMethods;
    nb_add, nb_subtract, nb_multiply, nb_remainder, nb_divmod, nb_power,
    nb_negative, nb_positive, nb_absolute, nb_bool, nb_invert, nb_lshift,
    nb_rshift, nb_and, nb_xor, nb_or, nb_int, nb_reserved, nb_float,
    nb_inplace_add, nb_inplace_subtract, nb_inplace_multiply,
    nb_inplace_remainder, nb_inplace_power, nb_inplace_lshift,
    nb_inplace_rshift, nb_inplace_and, nb_inplace_xor, nb_inplace_or,
    nb_floor_divide, nb_true_divide, nb_inplace_floor_divide,
    nb_inplace_true_divide, nb_index, nb_matrix_multiply,
    nb_inplace_matrix_multiply,
);
impl_inherit_slots!(PySequenceMethods;
    sq_length, sq_concat, sq_repeat, sq_item, was_sq_slice, sq_ass_item,
    was_sq_ass_slice, sq_contains, sq_inplace_concat, sq_inplace_repeat,
);
impl_inherit_slots!(PyMappingMethods; mp_length, mp_subscript, mp_ass_subscript);
impl_inherit_slots!(PyAsyncMethods; am_await, am_aiter, am_anext, am_send);
impl_inherit_slots!(PyBufferProcs; bf_getbuffer, bf_releasebuffer);

unsafe fn inherit_table<T: InheritSlots>(mine: &mut *mut T, theirs: *mut T) {
    if theirs.is_null() {
        return;
    }
    if mine.is_null() {
        *mine = theirs;
    } else if *mine != theirs {
        (**mine).inherit_from(&*theirs);
    }
}

macro_rules! copy_slots {
    ($tp:expr, $base:expr; $($field:ident),* $(,)?) => {
        $(
            if (*$tp).$field.is_none() {
                (*$tp).$field = (*$base).$field;
            }
        )*
    };
}

unsafe fn inherit_slots(tp: *mut PyTypeObject, base: *mut PyTypeObject) {
    inherit_table(&mut (*tp).tp_as_number, (*base).tp_as_number);
    inherit_table(&mut (*tp).tp_as_sequence, (*base).tp_as_sequence);
    inherit_table(&mut (*tp).tp_as_mapping, (*base).tp_as_mapping);
    inherit_table(&mut (*tp).tp_as_async, (*base).tp_as_async);
    inherit_table(&mut (*tp).tp_as_buffer, (*base).tp_as_buffer);

    copy_slots!(tp, base;
        tp_dealloc, tp_repr, tp_call, tp_str, tp_getattro, tp_setattro,
        tp_iter, tp_iternext, tp_descr_get, tp_descr_set, tp_init, tp_alloc,
        tp_new, tp_free, tp_is_gc, tp_finalize,
    );
    if (*base).tp_flags & Py_TPFLAGS_HAVE_GC != 0 {
        copy_slots!(tp, base; tp_traverse, tp_clear);
    }
    // Equality and hashing must stay consistent, so they travel together
    if (*tp).tp_richcompare.is_none() && (*tp).tp_hash.is_none() {
        (*tp).tp_richcompare = (*base).tp_richcompare;
        (*tp).tp_hash = (*base).tp_hash;
    }
}

// ============================================================================
// Allocation and lifetime
// ============================================================================

/// Zeroed instance allocation; heap types gain a reference per instance
///
/// # Safety
/// `tp` must be a ready type object
#[no_mangle]
pub unsafe extern "C" fn PyType_GenericAlloc(tp: *mut PyTypeObject, nitems: Py_ssize_t) -> *mut PyObject {
    let size = (*tp).tp_basicsize as usize + nitems.max(0) as usize * (*tp).tp_itemsize as usize;
    let obj = PyObject_Calloc(1, size) as *mut PyObject;
    if obj.is_null() {
        return PyErr_NoMemory();
    }
    (*obj).ob_type = tp;
    if (*tp).tp_flags & Py_TPFLAGS_HEAPTYPE != 0 {
        Py_INCREF(tp as *mut PyObject);
    }
    if (*tp).tp_itemsize != 0 {
        (*(obj as *mut PyVarObject)).ob_size = nitems;
    }
    _Py_NewReference(obj);
    obj
}

/// # Safety
/// `tp` must be a ready type object
#[no_mangle]
pub unsafe extern "C" fn PyType_GenericNew(
    tp: *mut PyTypeObject,
    _args: *mut PyObject,
    _kwds: *mut PyObject,
) -> *mut PyObject {
    let alloc = (*tp).tp_alloc.unwrap_or(PyType_GenericAlloc);
    alloc(tp, 0)
}

/// Release instance memory and the instance's reference to a heap type
///
/// # Safety
/// `o` must be an object whose count reached zero; its fields already cleared
pub unsafe fn free_instance(o: *mut PyObject) {
    let tp = Py_TYPE(o);
    match (*tp).tp_free {
        Some(free) => free(o as *mut c_void),
        None => PyObject_Free(o as *mut c_void),
    }
    if (*tp).tp_flags & Py_TPFLAGS_HEAPTYPE != 0 {
        Py_DECREF(tp as *mut PyObject);
    }
}

unsafe extern "C" fn object_dealloc(o: *mut PyObject) {
    let dictptr = _PyObject_GetDictPtr(o);
    if !dictptr.is_null() {
        Py_CLEAR(dictptr);
    }
    free_instance(o);
}

fn same_fn(slot: Option<destructor>, f: destructor) -> bool {
    slot.map(|s| s as usize) == Some(f as usize)
}

/// Deallocator for heap types created by `type_new`: clears the slots the
/// subtype added, then defers to the nearest base deallocator
unsafe extern "C" fn subtype_dealloc(o: *mut PyObject) {
    let tp = Py_TYPE(o);
    let mut base = tp;
    while !base.is_null() && same_fn((*base).tp_dealloc, subtype_dealloc) {
        base = (*base).tp_base;
    }
    if (*tp).tp_dictoffset != 0 && (base.is_null() || (*base).tp_dictoffset == 0) {
        let dictptr = _PyObject_GetDictPtr(o);
        if !dictptr.is_null() {
            Py_CLEAR(dictptr);
        }
    }
    match base.as_ref().and_then(|b| b.tp_dealloc) {
        Some(dealloc) => dealloc(o),
        None => free_instance(o),
    }
}

unsafe extern "C" fn type_dealloc(o: *mut PyObject) {
    let tp = o as *mut PyTypeObject;
    tracing::debug!(event = "type_dealloc", name = type_name(tp), "heap type released");
    let ht = o as *mut PyHeapTypeObject;
    Py_CLEAR(&mut (*tp).tp_dict);
    Py_CLEAR(&mut (*tp).tp_mro);
    Py_CLEAR(&mut (*tp).tp_bases);
    Py_XDECREF((*tp).tp_base as *mut PyObject);
    (*tp).tp_base = null_mut();
    if (*tp).tp_flags & Py_TPFLAGS_HEAPTYPE != 0 {
        Py_CLEAR(&mut (*ht).ht_name);
        Py_CLEAR(&mut (*ht).ht_qualname);
        Py_CLEAR(&mut (*ht).ht_module);
    }
    free_instance(o);
}

// ============================================================================
// object
// ============================================================================

unsafe fn has_excess_args(args: *mut PyObject, kwds: *mut PyObject) -> bool {
    (!args.is_null() && PyTuple_Size(args) > 0)
        || (!kwds.is_null() && crate::builtins::dict::PyDict_Size(kwds) > 0)
}

unsafe extern "C" fn object_init(_o: *mut PyObject, _args: *mut PyObject, _kwds: *mut PyObject) -> c_int {
    0
}

unsafe extern "C" fn object_new(
    tp: *mut PyTypeObject,
    args: *mut PyObject,
    kwds: *mut PyObject,
) -> *mut PyObject {
    let init_is_default = (*tp).tp_init.map(|f| f as usize) == Some(object_init as usize);
    if has_excess_args(args, kwds) && init_is_default {
        return raise_null(PyExc_TypeError(), format!("{}() takes no arguments", type_name(tp)));
    }
    let alloc = (*tp).tp_alloc.unwrap_or(PyType_GenericAlloc);
    alloc(tp, 0)
}

unsafe extern "C" fn object_repr(o: *mut PyObject) -> *mut PyObject {
    unicode_from_str(&format!("<{} object at {:p}>", obj_type_name(o), o))
}

unsafe extern "C" fn object_str(o: *mut PyObject) -> *mut PyObject {
    PyObject_Repr(o)
}

/// Identity hash (address, rotated past the alignment bits)
#[no_mangle]
pub extern "C" fn Py_HashPointer(p: *const c_void) -> Py_hash_t {
    let h = (p as usize).rotate_right(4) as Py_hash_t;
    if h == -1 {
        -2
    } else {
        h
    }
}

unsafe extern "C" fn object_hash(o: *mut PyObject) -> Py_hash_t {
    Py_HashPointer(o as *const c_void)
}

unsafe extern "C" fn object_richcompare(a: *mut PyObject, b: *mut PyObject, op: c_int) -> *mut PyObject {
    match op {
        Py_EQ if a == b => PyBool_FromLong(1),
        Py_NE if a == b => PyBool_FromLong(0),
        _ => Py_NewRef(Py_NotImplemented()),
    }
}

/// Attribute lookup honoring data descriptors, instance dict, then the type
///
/// # Safety
/// `o` must be a live object and `name` a str
#[no_mangle]
pub unsafe extern "C" fn PyObject_GenericGetAttr(o: *mut PyObject, name: *mut PyObject) -> *mut PyObject {
    if !PyUnicode_Check(name) {
        return raise_null(PyExc_TypeError(), "attribute name must be string");
    }
    let tp = Py_TYPE(o);
    let descr = _PyType_Lookup(tp, name);
    let mut getter = None;
    if !descr.is_null() {
        Py_INCREF(descr);
        let dtp = Py_TYPE(descr);
        getter = (*dtp).tp_descr_get;
        if let (Some(get), Some(_)) = (getter, (*dtp).tp_descr_set) {
            let res = get(descr, o, tp as *mut PyObject);
            Py_DECREF(descr);
            return res;
        }
    }
    let dictptr = _PyObject_GetDictPtr(o);
    if !dictptr.is_null() && !(*dictptr).is_null() {
        let found = dict_lookup(*dictptr, name);
        if !found.is_null() {
            Py_XDECREF(descr);
            return Py_NewRef(found);
        }
    }
    if let Some(get) = getter {
        let res = get(descr, o, tp as *mut PyObject);
        Py_DECREF(descr);
        return res;
    }
    if !descr.is_null() {
        return descr;
    }
    raise_null(
        PyExc_AttributeError(),
        format!(
            "'{}' object has no attribute '{}'",
            type_name(tp),
            unicode_as_str(name).unwrap_or("?")
        ),
    )
}

/// Attribute store honoring data descriptors, then the instance dict
///
/// # Safety
/// `o` must be a live object, `name` a str; null `value` deletes
#[no_mangle]
pub unsafe extern "C" fn PyObject_GenericSetAttr(
    o: *mut PyObject,
    name: *mut PyObject,
    value: *mut PyObject,
) -> c_int {
    if !PyUnicode_Check(name) {
        return raise_neg(PyExc_TypeError(), "attribute name must be string");
    }
    let tp = Py_TYPE(o);
    let attr = unicode_as_str(name).unwrap_or("?");
    let descr = _PyType_Lookup(tp, name);
    if !descr.is_null() {
        if let Some(set) = (*Py_TYPE(descr)).tp_descr_set {
            Py_INCREF(descr);
            let rc = set(descr, o, value);
            Py_DECREF(descr);
            return rc;
        }
    }
    let dictptr = _PyObject_GetDictPtr(o);
    if dictptr.is_null() {
        let msg = if descr.is_null() {
            format!("'{}' object has no attribute '{}'", type_name(tp), attr)
        } else {
            format!("'{}' object attribute '{}' is read-only", type_name(tp), attr)
        };
        return raise_neg(PyExc_AttributeError(), msg);
    }
    if (*dictptr).is_null() {
        if value.is_null() {
            return raise_neg(
                PyExc_AttributeError(),
                format!("'{}' object has no attribute '{}'", type_name(tp), attr),
            );
        }
        let dict = PyDict_New();
        if dict.is_null() {
            return -1;
        }
        *dictptr = dict;
    }
    if value.is_null() {
        if PyDict_DelItem(*dictptr, name) < 0 {
            if PyErr_ExceptionMatches(PyExc_KeyError()) != 0 {
                PyErr_Clear();
                return raise_neg(
                    PyExc_AttributeError(),
                    format!("'{}' object has no attribute '{}'", type_name(tp), attr),
                );
            }
            return -1;
        }
        return 0;
    }
    PyDict_SetItem(*dictptr, name, value)
}

// ============================================================================
// type
// ============================================================================

unsafe fn short_name<'a>(tp: *mut PyTypeObject) -> &'a str {
    let full = type_name(tp);
    if (*tp).tp_flags & Py_TPFLAGS_HEAPTYPE != 0 {
        return full;
    }
    full.rsplit('.').next().unwrap_or(full)
}

/// Module recorded in the type's own dict, else the dotted prefix of `tp_name`
pub unsafe fn type_module(tp: *mut PyTypeObject) -> String {
    if !(*tp).tp_dict.is_null() {
        let key = unicode_from_str("__module__");
        let found = dict_lookup((*tp).tp_dict, key);
        Py_DECREF(key);
        if !found.is_null() {
            if let Some(m) = unicode_as_str(found) {
                return m.to_owned();
            }
        }
    }
    if (*tp).tp_flags & Py_TPFLAGS_HEAPTYPE == 0 {
        let full = type_name(tp);
        if let Some((module, _)) = full.rsplit_once('.') {
            return module.to_owned();
        }
    }
    "builtins".to_owned()
}

unsafe fn special_type_attr(tp: *mut PyTypeObject, name: &str) -> Option<*mut PyObject> {
    let res = match name {
        "__name__" | "__qualname__" => unicode_from_str(short_name(tp)),
        "__module__" => unicode_from_str(&type_module(tp)),
        "__mro__" if !(*tp).tp_mro.is_null() => Py_NewRef((*tp).tp_mro),
        "__bases__" if !(*tp).tp_bases.is_null() => Py_NewRef((*tp).tp_bases),
        "__base__" => {
            if (*tp).tp_base.is_null() {
                Py_NewRef(Py_None())
            } else {
                Py_NewRef((*tp).tp_base as *mut PyObject)
            }
        }
        "__dict__" if !(*tp).tp_dict.is_null() => Py_NewRef((*tp).tp_dict),
        "__doc__" if !(*tp).tp_doc.is_null() => {
            let doc = CStr::from_ptr((*tp).tp_doc).to_string_lossy();
            unicode_from_str(&doc)
        }
        _ => return None,
    };
    Some(res)
}

unsafe extern "C" fn type_getattro(o: *mut PyObject, name: *mut PyObject) -> *mut PyObject {
    let tp = o as *mut PyTypeObject;
    let Some(attr_name) = unicode_as_str(name) else {
        return raise_null(PyExc_TypeError(), "attribute name must be string");
    };
    if let Some(res) = special_type_attr(tp, attr_name) {
        return res;
    }
    let meta = Py_TYPE(o);
    let meta_attr = _PyType_Lookup(meta, name);
    let mut meta_get = None;
    if !meta_attr.is_null() {
        let mtp = Py_TYPE(meta_attr);
        meta_get = (*mtp).tp_descr_get;
        if let (Some(get), Some(_)) = (meta_get, (*mtp).tp_descr_set) {
            return get(meta_attr, o, meta as *mut PyObject);
        }
    }
    let attr = _PyType_Lookup(tp, name);
    if !attr.is_null() {
        if let Some(get) = (*Py_TYPE(attr)).tp_descr_get {
            return get(attr, null_mut(), o);
        }
        return Py_NewRef(attr);
    }
    if let Some(get) = meta_get {
        return get(meta_attr, o, meta as *mut PyObject);
    }
    if !meta_attr.is_null() {
        return Py_NewRef(meta_attr);
    }
    raise_null(
        PyExc_AttributeError(),
        format!("type object '{}' has no attribute '{}'", short_name(tp), attr_name),
    )
}

unsafe extern "C" fn type_setattro(o: *mut PyObject, name: *mut PyObject, value: *mut PyObject) -> c_int {
    let tp = o as *mut PyTypeObject;
    let Some(attr_name) = unicode_as_str(name) else {
        return raise_neg(PyExc_TypeError(), "attribute name must be string");
    };
    if (*tp).tp_flags & Py_TPFLAGS_HEAPTYPE == 0 {
        return raise_neg(
            PyExc_TypeError(),
            format!("cannot set '{}' attribute of immutable type '{}'", attr_name, type_name(tp)),
        );
    }
    // Data descriptors on the metatype win over the type dict
    let meta_attr = _PyType_Lookup(Py_TYPE(o), name);
    if !meta_attr.is_null() {
        if let Some(set) = (*Py_TYPE(meta_attr)).tp_descr_set {
            return set(meta_attr, o, value);
        }
    }
    if value.is_null() {
        if PyDict_DelItem((*tp).tp_dict, name) < 0 {
            if PyErr_ExceptionMatches(PyExc_KeyError()) != 0 {
                PyErr_Clear();
                return raise_neg(
                    PyExc_AttributeError(),
                    format!("type object '{}' has no attribute '{}'", type_name(tp), attr_name),
                );
            }
            return -1;
        }
        return 0;
    }
    PyDict_SetItem((*tp).tp_dict, name, value)
}

unsafe extern "C" fn type_repr(o: *mut PyObject) -> *mut PyObject {
    let tp = o as *mut PyTypeObject;
    let module = type_module(tp);
    let text = if module == "builtins" {
        format!("<class '{}'>", short_name(tp))
    } else {
        format!("<class '{}.{}'>", module, short_name(tp))
    };
    unicode_from_str(&text)
}

unsafe extern "C" fn type_init(_o: *mut PyObject, _args: *mut PyObject, _kwds: *mut PyObject) -> c_int {
    0
}

unsafe extern "C" fn type_call(o: *mut PyObject, args: *mut PyObject, kwds: *mut PyObject) -> *mut PyObject {
    let tp = o as *mut PyTypeObject;
    // type(x) answers the type of x
    if tp == PyType_Type()
        && !args.is_null()
        && PyTuple_Size(args) == 1
        && (kwds.is_null() || crate::builtins::dict::PyDict_Size(kwds) == 0)
    {
        let arg = tuple_items(args)[0];
        return Py_NewRef(Py_TYPE(arg) as *mut PyObject);
    }
    let Some(new) = (*tp).tp_new else {
        return raise_null(
            PyExc_TypeError(),
            format!("cannot create '{}' instances", type_name(tp)),
        );
    };
    let obj = new(tp, args, kwds);
    if obj.is_null() || !PyObject_TypeCheck(obj, tp) {
        return obj;
    }
    if let Some(init) = (*Py_TYPE(obj)).tp_init {
        if init(obj, args, kwds) < 0 {
            Py_DECREF(obj);
            return null_mut();
        }
    }
    obj
}

/// True when `t` adds instance fields beyond `base` other than the
/// dict/weaklist slots a heap type appends
unsafe fn extra_ivars(t: *mut PyTypeObject, base: *mut PyTypeObject) -> bool {
    let ptr_size = size_of::<*mut PyObject>() as Py_ssize_t;
    let mut t_size = (*t).tp_basicsize;
    if (*t).tp_itemsize != (*base).tp_itemsize {
        return true;
    }
    let heap = (*t).tp_flags & Py_TPFLAGS_HEAPTYPE != 0;
    if heap
        && (*t).tp_weaklistoffset != 0
        && (*base).tp_weaklistoffset == 0
        && (*t).tp_weaklistoffset + ptr_size == t_size
    {
        t_size -= ptr_size;
    }
    if heap
        && (*t).tp_dictoffset != 0
        && (*base).tp_dictoffset == 0
        && (*t).tp_dictoffset + ptr_size == t_size
    {
        t_size -= ptr_size;
    }
    t_size != (*base).tp_basicsize
}

unsafe fn solid_base(t: *mut PyTypeObject) -> *mut PyTypeObject {
    let base = if (*t).tp_base.is_null() {
        PyBaseObject_Type()
    } else {
        solid_base((*t).tp_base)
    };
    if t != base && extra_ivars(t, base) {
        t
    } else {
        base
    }
}

/// The base whose instance layout every other base is compatible with
unsafe fn best_base(bases: &[*mut PyObject]) -> *mut PyTypeObject {
    let mut winner: *mut PyTypeObject = null_mut();
    let mut best: *mut PyTypeObject = null_mut();
    for &b in bases {
        if !PyType_Check(b) {
            return raise_null(PyExc_TypeError(), "bases must be types") as *mut PyTypeObject;
        }
        let b = b as *mut PyTypeObject;
        if (*b).tp_flags & Py_TPFLAGS_BASETYPE == 0 {
            return raise_null(
                PyExc_TypeError(),
                format!("type '{}' is not an acceptable base type", type_name(b)),
            ) as *mut PyTypeObject;
        }
        let candidate = solid_base(b);
        if winner.is_null() {
            winner = candidate;
            best = b;
        } else if PyType_IsSubtype(winner, candidate) != 0 {
        } else if PyType_IsSubtype(candidate, winner) != 0 {
            winner = candidate;
            best = b;
        } else {
            return raise_null(PyExc_TypeError(), "multiple bases have instance lay-out conflict")
                as *mut PyTypeObject;
        }
    }
    best
}

/// `type(name, bases, dict)`: create a heap type
///
/// # Safety
/// `meta` must be `type` or a subtype; `args` a tuple
#[no_mangle]
pub unsafe extern "C" fn type_new(
    meta: *mut PyTypeObject,
    args: *mut PyObject,
    kwds: *mut PyObject,
) -> *mut PyObject {
    let items = if args.is_null() { &[][..] } else { tuple_items(args) };
    if items.len() == 1 && meta == PyType_Type() {
        return Py_NewRef(Py_TYPE(items[0]) as *mut PyObject);
    }
    if items.len() != 3 {
        return raise_null(PyExc_TypeError(), "type() takes 1 or 3 arguments");
    }
    let (name, bases, dict) = (items[0], items[1], items[2]);
    if !PyUnicode_Check(name)
        || !crate::builtins::tuple::PyTuple_Check(bases)
        || !crate::builtins::dict::PyDict_Check(dict)
    {
        return raise_null(
            PyExc_TypeError(),
            "type.__new__() argument types must be (str, tuple, dict)",
        );
    }

    // The most derived metatype among the bases wins
    let mut winner = meta;
    for &b in tuple_items(bases) {
        let bt = Py_TYPE(b);
        if PyType_IsSubtype(winner, bt) != 0 {
            continue;
        }
        if PyType_IsSubtype(bt, winner) != 0 {
            winner = bt;
            continue;
        }
        return raise_null(
            PyExc_TypeError(),
            "metaclass conflict: the metaclass of a derived class must be a (non-strict) subclass of the metaclasses of all its bases",
        );
    }
    if winner != meta {
        if let Some(new) = (*winner).tp_new {
            if new as usize != type_new as usize {
                return new(winner, args, kwds);
            }
        }
    }
    let meta = winner;

    let bases = if PyTuple_Size(bases) == 0 {
        tuple_from_vec(vec![Py_NewRef(PyBaseObject_Type() as *mut PyObject)])
    } else {
        Py_NewRef(bases)
    };
    if bases.is_null() {
        return null_mut();
    }
    let base = best_base(tuple_items(bases));
    if base.is_null() {
        Py_DECREF(bases);
        return null_mut();
    }

    let alloc = (*meta).tp_alloc.unwrap_or(PyType_GenericAlloc);
    let obj = alloc(meta, 0);
    if obj.is_null() {
        Py_DECREF(bases);
        return null_mut();
    }
    let ht = obj as *mut PyHeapTypeObject;
    let tp = obj as *mut PyTypeObject;
    (*tp).tp_flags = Py_TPFLAGS_DEFAULT | Py_TPFLAGS_HEAPTYPE | Py_TPFLAGS_BASETYPE;
    (*ht).ht_name = Py_NewRef(name);
    (*ht).ht_qualname = Py_NewRef(name);
    (*tp).tp_name = PyUnicode_AsUTF8(name);
    (*tp).tp_as_async = &mut (*ht).as_async;
    (*tp).tp_as_number = &mut (*ht).as_number;
    (*tp).tp_as_sequence = &mut (*ht).as_sequence;
    (*tp).tp_as_mapping = &mut (*ht).as_mapping;
    (*tp).tp_as_buffer = &mut (*ht).as_buffer;
    (*tp).tp_bases = bases;
    (*tp).tp_base = Py_NewRef(base as *mut PyObject) as *mut PyTypeObject;
    (*tp).tp_dict = PyDict_Copy(dict);
    if (*tp).tp_dict.is_null() {
        Py_DECREF(obj);
        return null_mut();
    }

    let ptr_size = size_of::<*mut PyObject>() as Py_ssize_t;
    let mut size = (*base).tp_basicsize;
    (*tp).tp_itemsize = (*base).tp_itemsize;
    if (*base).tp_dictoffset == 0 && (*base).tp_itemsize == 0 {
        (*tp).tp_dictoffset = size;
        size += ptr_size;
    }
    if (*base).tp_weaklistoffset == 0 && (*base).tp_itemsize == 0 {
        (*tp).tp_weaklistoffset = size;
        size += ptr_size;
    }
    (*tp).tp_basicsize = size;
    (*tp).tp_dealloc = Some(subtype_dealloc);
    (*tp).tp_alloc = Some(PyType_GenericAlloc);
    (*tp).tp_free = Some(PyObject_Free);

    if PyType_Ready(tp) < 0 {
        Py_DECREF(obj);
        return null_mut();
    }
    tracing::debug!(event = "type_new", name = type_name(tp), base = type_name(base), "heap type created");
    obj
}

/// Raw `tp_name` pointer of a type
///
/// # Safety
/// `tp` must be a valid type object
#[no_mangle]
pub unsafe extern "C" fn _PyType_Name(tp: *mut PyTypeObject) -> *const c_char {
    (*tp).tp_name
}
