//! Slot tables keyed by protocol name
//!
//! Class implementations contribute slots by the name of the type-object
//! field they fill (`tp_repr`, `nb_add`, `mp_subscript`, ...). Layers are
//! added most derived first and an existing entry is never replaced, so the
//! most specific implementation of a slot wins. [`SlotTable::apply`] writes
//! the table into a type whose protocol tables are already linked.

use std::collections::BTreeMap;

use typebridge_runtime::{
    allocfunc, binaryfunc, destructor, freefunc, getbufferproc, hashfunc, inquiry, lenfunc,
    newfunc, objobjargproc, objobjproc, releasebufferproc, richcmpfunc, ssizeargfunc,
    ternaryfunc, traverseproc, unaryfunc,
};

use crate::error::{BridgeError, Result};
use crate::runtime::ffi::PyTypeObject;

/// A slot function, tagged by signature
///
/// Several native slot kinds share one signature (`tp_getattro` and
/// `nb_add` are both binary functions); the name decides the field.
#[derive(Clone, Copy)]
pub enum Slot {
    Destructor(destructor),
    Unary(unaryfunc),
    Binary(binaryfunc),
    Ternary(ternaryfunc),
    Hash(hashfunc),
    Inquiry(inquiry),
    Len(lenfunc),
    SsizeArg(ssizeargfunc),
    ObjObj(objobjproc),
    ObjObjArg(objobjargproc),
    RichCompare(richcmpfunc),
    New(newfunc),
    Traverse(traverseproc),
    GetBuffer(getbufferproc),
    ReleaseBuffer(releasebufferproc),
    Alloc(allocfunc),
    Free(freefunc),
}

impl Slot {
    fn kind(&self) -> &'static str {
        match self {
            Slot::Destructor(_) => "destructor",
            Slot::Unary(_) => "unaryfunc",
            Slot::Binary(_) => "binaryfunc",
            Slot::Ternary(_) => "ternaryfunc",
            Slot::Hash(_) => "hashfunc",
            Slot::Inquiry(_) => "inquiry",
            Slot::Len(_) => "lenfunc",
            Slot::SsizeArg(_) => "ssizeargfunc",
            Slot::ObjObj(_) => "objobjproc",
            Slot::ObjObjArg(_) => "objobjargproc",
            Slot::RichCompare(_) => "richcmpfunc",
            Slot::New(_) => "newfunc",
            Slot::Traverse(_) => "traverseproc",
            Slot::GetBuffer(_) => "getbufferproc",
            Slot::ReleaseBuffer(_) => "releasebufferproc",
            Slot::Alloc(_) => "allocfunc",
            Slot::Free(_) => "freefunc",
        }
    }
}

/// Slots gathered from every layer of a class implementation
#[derive(Default, Clone)]
pub struct SlotTable {
    slots: BTreeMap<&'static str, Slot>,
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `slot` under `name` unless a more derived layer already did;
    /// returns whether it was added
    pub fn insert(&mut self, name: &'static str, slot: Slot) -> bool {
        if self.slots.contains_key(name) {
            return false;
        }
        self.slots.insert(name, slot);
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Slot> {
        self.slots.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.slots.keys().copied()
    }

    /// Write every entry into `tp`
    ///
    /// A name with no matching field, or a function whose signature does not
    /// fit the field, is a configuration error; nothing is written past it.
    ///
    /// # Safety
    /// `tp` must be a type under construction whose `tp_as_*` pointers are
    /// either null or point at writable tables
    pub unsafe fn apply(&self, tp: *mut PyTypeObject) -> Result<()> {
        for (&name, &slot) in &self.slots {
            write_slot(tp, name, slot)?;
        }
        Ok(())
    }
}

fn mismatch(name: &str, slot: Slot) -> BridgeError {
    BridgeError::Configuration(format!(
        "slot '{}' cannot take a {} function",
        name,
        slot.kind()
    ))
}

unsafe fn table<T>(tp: *mut PyTypeObject, ptr: *mut T, name: &str) -> Result<*mut T> {
    if ptr.is_null() {
        return Err(BridgeError::Configuration(format!(
            "slot '{}' needs a protocol table that '{}' does not have",
            name,
            typebridge_runtime::type_name(tp)
        )));
    }
    Ok(ptr)
}

unsafe fn write_slot(tp: *mut PyTypeObject, name: &'static str, slot: Slot) -> Result<()> {
    let t = &mut *tp;
    match name {
        "tp_dealloc" => match slot {
            Slot::Destructor(f) => t.tp_dealloc = Some(f),
            other => return Err(mismatch(name, other)),
        },
        "tp_repr" | "tp_str" | "tp_iter" | "tp_iternext" => {
            let Slot::Unary(f) = slot else { return Err(mismatch(name, slot)) };
            match name {
                "tp_repr" => t.tp_repr = Some(f),
                "tp_str" => t.tp_str = Some(f),
                "tp_iter" => t.tp_iter = Some(f),
                _ => t.tp_iternext = Some(f),
            }
        }
        "tp_getattro" => match slot {
            Slot::Binary(f) => t.tp_getattro = Some(f),
            other => return Err(mismatch(name, other)),
        },
        "tp_setattro" | "tp_descr_set" | "tp_init" => {
            let Slot::ObjObjArg(f) = slot else { return Err(mismatch(name, slot)) };
            match name {
                "tp_setattro" => t.tp_setattro = Some(f),
                "tp_descr_set" => t.tp_descr_set = Some(f),
                _ => t.tp_init = Some(f),
            }
        }
        "tp_call" | "tp_descr_get" => {
            let Slot::Ternary(f) = slot else { return Err(mismatch(name, slot)) };
            if name == "tp_call" {
                t.tp_call = Some(f);
            } else {
                t.tp_descr_get = Some(f);
            }
        }
        "tp_hash" => match slot {
            Slot::Hash(f) => t.tp_hash = Some(f),
            other => return Err(mismatch(name, other)),
        },
        "tp_richcompare" => match slot {
            Slot::RichCompare(f) => t.tp_richcompare = Some(f),
            other => return Err(mismatch(name, other)),
        },
        "tp_new" => match slot {
            Slot::New(f) => t.tp_new = Some(f),
            other => return Err(mismatch(name, other)),
        },
        "tp_alloc" => match slot {
            Slot::Alloc(f) => t.tp_alloc = Some(f),
            other => return Err(mismatch(name, other)),
        },
        "tp_free" => match slot {
            Slot::Free(f) => t.tp_free = Some(f),
            other => return Err(mismatch(name, other)),
        },
        "tp_traverse" => match slot {
            Slot::Traverse(f) => t.tp_traverse = Some(f),
            other => return Err(mismatch(name, other)),
        },
        "tp_clear" | "tp_is_gc" => {
            let Slot::Inquiry(f) = slot else { return Err(mismatch(name, slot)) };
            if name == "tp_clear" {
                t.tp_clear = Some(f);
            } else {
                t.tp_is_gc = Some(f);
            }
        }
        n if n.starts_with("nb_") => write_number(tp, name, slot)?,
        n if n.starts_with("sq_") => write_sequence(tp, name, slot)?,
        n if n.starts_with("mp_") => write_mapping(tp, name, slot)?,
        n if n.starts_with("bf_") => write_buffer(tp, name, slot)?,
        _ => {
            return Err(BridgeError::Configuration(format!("unknown slot name '{}'", name)));
        }
    }
    Ok(())
}

unsafe fn write_number(tp: *mut PyTypeObject, name: &'static str, slot: Slot) -> Result<()> {
    let nb = &mut *table(tp, (*tp).tp_as_number, name)?;
    match slot {
        Slot::Binary(f) => {
            let field = match name {
                "nb_add" => &mut nb.nb_add,
                "nb_subtract" => &mut nb.nb_subtract,
                "nb_multiply" => &mut nb.nb_multiply,
                "nb_remainder" => &mut nb.nb_remainder,
                "nb_lshift" => &mut nb.nb_lshift,
                "nb_rshift" => &mut nb.nb_rshift,
                "nb_and" => &mut nb.nb_and,
                "nb_xor" => &mut nb.nb_xor,
                "nb_or" => &mut nb.nb_or,
                "nb_floor_divide" => &mut nb.nb_floor_divide,
                "nb_true_divide" => &mut nb.nb_true_divide,
                "nb_matrix_multiply" => &mut nb.nb_matrix_multiply,
                _ => return Err(mismatch(name, slot)),
            };
            *field = Some(f);
        }
        Slot::Unary(f) => {
            let field = match name {
                "nb_negative" => &mut nb.nb_negative,
                "nb_positive" => &mut nb.nb_positive,
                "nb_absolute" => &mut nb.nb_absolute,
                "nb_invert" => &mut nb.nb_invert,
                "nb_int" => &mut nb.nb_int,
                "nb_float" => &mut nb.nb_float,
                "nb_index" => &mut nb.nb_index,
                _ => return Err(mismatch(name, slot)),
            };
            *field = Some(f);
        }
        Slot::Ternary(f) if name == "nb_power" => nb.nb_power = Some(f),
        Slot::Inquiry(f) if name == "nb_bool" => nb.nb_bool = Some(f),
        other => return Err(mismatch(name, other)),
    }
    Ok(())
}

unsafe fn write_sequence(tp: *mut PyTypeObject, name: &'static str, slot: Slot) -> Result<()> {
    let sq = &mut *table(tp, (*tp).tp_as_sequence, name)?;
    match (name, slot) {
        ("sq_length", Slot::Len(f)) => sq.sq_length = Some(f),
        ("sq_concat", Slot::Binary(f)) => sq.sq_concat = Some(f),
        ("sq_item", Slot::SsizeArg(f)) => sq.sq_item = Some(f),
        ("sq_repeat", Slot::SsizeArg(f)) => sq.sq_repeat = Some(f),
        ("sq_contains", Slot::ObjObj(f)) => sq.sq_contains = Some(f),
        (_, other) => return Err(mismatch(name, other)),
    }
    Ok(())
}

unsafe fn write_mapping(tp: *mut PyTypeObject, name: &'static str, slot: Slot) -> Result<()> {
    let mp = &mut *table(tp, (*tp).tp_as_mapping, name)?;
    match (name, slot) {
        ("mp_length", Slot::Len(f)) => mp.mp_length = Some(f),
        ("mp_subscript", Slot::Binary(f)) => mp.mp_subscript = Some(f),
        ("mp_ass_subscript", Slot::ObjObjArg(f)) => mp.mp_ass_subscript = Some(f),
        (_, other) => return Err(mismatch(name, other)),
    }
    Ok(())
}

unsafe fn write_buffer(tp: *mut PyTypeObject, name: &'static str, slot: Slot) -> Result<()> {
    let bf = &mut *table(tp, (*tp).tp_as_buffer, name)?;
    match (name, slot) {
        ("bf_getbuffer", Slot::GetBuffer(f)) => bf.bf_getbuffer = Some(f),
        ("bf_releasebuffer", Slot::ReleaseBuffer(f)) => bf.bf_releasebuffer = Some(f),
        (_, other) => return Err(mismatch(name, other)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr::null_mut;

    use typebridge_runtime::{PyHeapTypeObject, PyObject};

    unsafe extern "C" fn repr_a(_ob: *mut PyObject) -> *mut PyObject {
        null_mut()
    }

    unsafe extern "C" fn repr_b(_ob: *mut PyObject) -> *mut PyObject {
        null_mut()
    }

    unsafe extern "C" fn add(_a: *mut PyObject, _b: *mut PyObject) -> *mut PyObject {
        null_mut()
    }

    fn blank_heap_type() -> Box<PyHeapTypeObject> {
        // Plain data: all-zero is the empty type
        let mut ht: Box<PyHeapTypeObject> = Box::new(unsafe { std::mem::zeroed() });
        ht.ht_type.tp_as_number = &mut ht.as_number;
        ht.ht_type.tp_as_sequence = &mut ht.as_sequence;
        ht.ht_type.tp_as_mapping = &mut ht.as_mapping;
        ht.ht_type.tp_as_buffer = &mut ht.as_buffer;
        ht
    }

    #[test]
    fn test_first_layer_wins() {
        let mut table = SlotTable::new();
        assert!(table.insert("tp_repr", Slot::Unary(repr_a)));
        assert!(!table.insert("tp_repr", Slot::Unary(repr_b)));
        match table.get("tp_repr") {
            Some(Slot::Unary(f)) => assert_eq!(f as usize, repr_a as usize),
            _ => panic!("tp_repr missing"),
        }
    }

    #[test]
    fn test_apply_routes_by_name() {
        let mut ht = blank_heap_type();
        let mut table = SlotTable::new();
        table.insert("tp_str", Slot::Unary(repr_a));
        table.insert("nb_add", Slot::Binary(add));
        table.insert("mp_subscript", Slot::Binary(add));
        unsafe { table.apply(&mut ht.ht_type).unwrap() };
        assert_eq!(ht.ht_type.tp_str.map(|f| f as usize), Some(repr_a as usize));
        assert_eq!(ht.as_number.nb_add.map(|f| f as usize), Some(add as usize));
        assert_eq!(ht.as_mapping.mp_subscript.map(|f| f as usize), Some(add as usize));
        assert!(ht.ht_type.tp_repr.is_none());
    }

    #[test]
    fn test_unknown_name_is_configuration_error() {
        let mut ht = blank_heap_type();
        let mut table = SlotTable::new();
        table.insert("tp_frobnicate", Slot::Unary(repr_a));
        let err = unsafe { table.apply(&mut ht.ht_type) }.unwrap_err();
        assert!(matches!(err, BridgeError::Configuration(_)));
    }

    #[test]
    fn test_signature_mismatch_is_rejected() {
        let mut ht = blank_heap_type();
        let mut table = SlotTable::new();
        table.insert("nb_negative", Slot::Binary(add));
        assert!(unsafe { table.apply(&mut ht.ht_type) }.is_err());
    }
}
