//! Heap objects of the managed runtime
//!
//! An [`ObjectRef`] is a counted reference; identity is the allocation. The
//! payload is fixed at allocation from the object's type: plain instances
//! carry a field vector, arrays carry typed storage, exceptions carry their
//! message and inner exception.

use std::any::Any;
use std::fmt;
use std::ptr::null_mut;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use typebridge_runtime::PyObject;

use super::exceptions::ManagedException;
use super::types::{Type, TypeCode};
use super::value::Value;
use crate::reference::NativeObject;

/// Element storage of an array, typed by element code
pub enum ArrayStorage {
    Bool(Vec<bool>),
    I8(Vec<i8>),
    U8(Vec<u8>),
    I16(Vec<i16>),
    U16(Vec<u16>),
    I32(Vec<i32>),
    U32(Vec<u32>),
    I64(Vec<i64>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    /// Chars, strings, enums and references
    Values(Vec<Value>),
}

macro_rules! storage_dispatch {
    ($self:expr, $v:ident => $body:expr) => {
        match $self {
            ArrayStorage::Bool($v) => $body,
            ArrayStorage::I8($v) => $body,
            ArrayStorage::U8($v) => $body,
            ArrayStorage::I16($v) => $body,
            ArrayStorage::U16($v) => $body,
            ArrayStorage::I32($v) => $body,
            ArrayStorage::U32($v) => $body,
            ArrayStorage::I64($v) => $body,
            ArrayStorage::U64($v) => $body,
            ArrayStorage::F32($v) => $body,
            ArrayStorage::F64($v) => $body,
            ArrayStorage::Values($v) => $body,
        }
    };
}

impl ArrayStorage {
    fn zeroed(elem: &Type, len: usize) -> Self {
        match elem.type_code() {
            _ if !elem.is_primitive() => ArrayStorage::Values(vec![Value::default_for(elem); len]),
            TypeCode::Boolean => ArrayStorage::Bool(vec![false; len]),
            TypeCode::SByte => ArrayStorage::I8(vec![0; len]),
            TypeCode::Byte => ArrayStorage::U8(vec![0; len]),
            TypeCode::Int16 => ArrayStorage::I16(vec![0; len]),
            TypeCode::UInt16 => ArrayStorage::U16(vec![0; len]),
            TypeCode::Int32 => ArrayStorage::I32(vec![0; len]),
            TypeCode::UInt32 => ArrayStorage::U32(vec![0; len]),
            TypeCode::Int64 => ArrayStorage::I64(vec![0; len]),
            TypeCode::UInt64 => ArrayStorage::U64(vec![0; len]),
            TypeCode::Single => ArrayStorage::F32(vec![0.0; len]),
            TypeCode::Double => ArrayStorage::F64(vec![0.0; len]),
            _ => ArrayStorage::Values(vec![Value::default_for(elem); len]),
        }
    }

    pub fn len(&self) -> usize {
        storage_dispatch!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start of the element memory
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        storage_dispatch!(self, v => v.as_mut_ptr() as *mut u8)
    }

    fn get(&self, i: usize) -> Option<Value> {
        let v = match self {
            ArrayStorage::Bool(v) => Value::Bool(*v.get(i)?),
            ArrayStorage::I8(v) => Value::I8(*v.get(i)?),
            ArrayStorage::U8(v) => Value::U8(*v.get(i)?),
            ArrayStorage::I16(v) => Value::I16(*v.get(i)?),
            ArrayStorage::U16(v) => Value::U16(*v.get(i)?),
            ArrayStorage::I32(v) => Value::I32(*v.get(i)?),
            ArrayStorage::U32(v) => Value::U32(*v.get(i)?),
            ArrayStorage::I64(v) => Value::I64(*v.get(i)?),
            ArrayStorage::U64(v) => Value::U64(*v.get(i)?),
            ArrayStorage::F32(v) => Value::F32(*v.get(i)?),
            ArrayStorage::F64(v) => Value::F64(*v.get(i)?),
            ArrayStorage::Values(v) => v.get(i)?.clone(),
        };
        Some(v)
    }

    /// Store a value of exactly the element representation
    fn set(&mut self, i: usize, value: Value) -> Result<(), Value> {
        macro_rules! put {
            ($v:expr, $x:expr) => {
                match $v.get_mut(i) {
                    Some(slot) => {
                        *slot = $x;
                        Ok(())
                    }
                    None => Err(Value::Null),
                }
            };
        }
        match (self, value) {
            (ArrayStorage::Bool(v), Value::Bool(x)) => put!(v, x),
            (ArrayStorage::I8(v), Value::I8(x)) => put!(v, x),
            (ArrayStorage::U8(v), Value::U8(x)) => put!(v, x),
            (ArrayStorage::I16(v), Value::I16(x)) => put!(v, x),
            (ArrayStorage::U16(v), Value::U16(x)) => put!(v, x),
            (ArrayStorage::I32(v), Value::I32(x)) => put!(v, x),
            (ArrayStorage::U32(v), Value::U32(x)) => put!(v, x),
            (ArrayStorage::I64(v), Value::I64(x)) => put!(v, x),
            (ArrayStorage::U64(v), Value::U64(x)) => put!(v, x),
            (ArrayStorage::F32(v), Value::F32(x)) => put!(v, x),
            (ArrayStorage::F64(v), Value::F64(x)) => put!(v, x),
            (ArrayStorage::Values(v), x) => put!(v, x),
            (_, other) => Err(other),
        }
    }
}

/// Fixed-size, possibly multi-dimensional array
pub struct ArrayData {
    elem: Type,
    dims: Vec<usize>,
    storage: RwLock<ArrayStorage>,
    pins: AtomicUsize,
}

impl ArrayData {
    pub fn element_type(&self) -> &Type {
        &self.elem
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn len(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row-major flat index of a multi-dimensional position
    pub fn flat_index(&self, indices: &[usize]) -> Option<usize> {
        if indices.len() != self.dims.len() {
            return None;
        }
        let mut flat = 0;
        for (&i, &dim) in indices.iter().zip(&self.dims) {
            if i >= dim {
                return None;
            }
            flat = flat * dim + i;
        }
        Some(flat)
    }

    pub fn get(&self, index: usize) -> Result<Value, ManagedException> {
        self.storage
            .read()
            .get(index)
            .ok_or_else(|| ManagedException::index_out_of_range(index, self.len()))
    }

    pub fn set(&self, index: usize, value: Value) -> Result<(), ManagedException> {
        let len = self.len();
        if index >= len {
            return Err(ManagedException::index_out_of_range(index, len));
        }
        self.storage.write().set(index, value).map_err(|rejected| {
            ManagedException::invalid_cast(format!(
                "cannot store {:?} in an array of {}",
                rejected,
                self.elem.name()
            ))
        })
    }

    /// Element values in storage order
    pub fn to_vec(&self) -> Vec<Value> {
        let storage = self.storage.read();
        (0..storage.len()).filter_map(|i| storage.get(i)).collect()
    }

    /// Address of the first element; stable because arrays never resize
    pub fn data_ptr(&self) -> *mut u8 {
        self.storage.write().as_mut_ptr()
    }

    /// Keep the element memory in place for an outstanding export
    pub fn pin(&self) {
        self.pins.fetch_add(1, Ordering::AcqRel);
    }

    pub fn unpin(&self) {
        let prev = self.pins.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "array unpinned more often than pinned");
    }

    pub fn pin_count(&self) -> usize {
        self.pins.load(Ordering::Acquire)
    }
}

/// Message, cause and (for interpreter-raised errors) the original native
/// exception
pub struct ExceptionData {
    message: RwLock<String>,
    inner: RwLock<Option<ObjectRef>>,
    native: Mutex<Option<NativeObject>>,
    traceback: RwLock<Option<String>>,
}

impl ExceptionData {
    fn new() -> Self {
        ExceptionData {
            message: RwLock::new(String::new()),
            inner: RwLock::new(None),
            native: Mutex::new(None),
            traceback: RwLock::new(None),
        }
    }

    pub fn message(&self) -> String {
        self.message.read().clone()
    }

    pub fn set_message(&self, message: impl Into<String>) {
        *self.message.write() = message.into();
    }

    pub fn inner(&self) -> Option<ObjectRef> {
        self.inner.read().clone()
    }

    pub fn set_inner(&self, inner: Option<ObjectRef>) {
        *self.inner.write() = inner;
    }

    /// Native exception this object stands for, if it came from the interpreter
    pub fn native(&self) -> Option<NativeObject> {
        self.native.lock().clone()
    }

    pub fn set_native(&self, value: Option<NativeObject>) {
        *self.native.lock() = value;
    }

    pub fn traceback(&self) -> Option<String> {
        self.traceback.read().clone()
    }

    pub fn set_traceback(&self, text: Option<String>) {
        *self.traceback.write() = text;
    }
}

pub enum Payload {
    None,
    Boxed(Value),
    Array(ArrayData),
    List(Mutex<Vec<Value>>),
    Exception(ExceptionData),
    /// Handle to an interpreter object (the `PyObject` type)
    Native(NativeObject),
    Host(Box<dyn Any + Send + Sync>),
}

pub struct ManagedObject {
    ty: Type,
    fields: Mutex<Vec<Value>>,
    payload: Payload,
    /// Native instance this object was created for, when its type derives
    /// from an interpreter-side subclass; not owning
    native_self: AtomicPtr<PyObject>,
}

/// Counted reference to a managed object
#[derive(Clone)]
pub struct ObjectRef(Arc<ManagedObject>);

impl ObjectRef {
    fn with_payload(ty: &Type, payload: Payload) -> Self {
        let fields = (0..ty.instance_field_count()).map(|_| Value::Null).collect();
        let obj = ObjectRef(Arc::new(ManagedObject {
            ty: ty.clone(),
            fields: Mutex::new(fields),
            payload,
            native_self: AtomicPtr::new(null_mut()),
        }));
        obj.init_field_defaults();
        obj
    }

    fn init_field_defaults(&self) {
        let mut fields = self.0.fields.lock();
        for t in self.0.ty.ancestors() {
            for f in t.members().fields.iter() {
                if let super::members::FieldSlot::Instance(i) = f.slot {
                    if let Some(slot) = fields.get_mut(i) {
                        *slot = Value::default_for(f.field_type());
                    }
                }
            }
        }
    }

    /// Fresh, uninitialized instance of `ty`; the payload follows the type
    pub fn alloc(ty: &Type) -> Self {
        let core = super::core();
        let payload = if ty == &core.exception || ty.is_subclass_of(&core.exception) {
            Payload::Exception(ExceptionData::new())
        } else if ty.generic_definition() == Some(&core.list) {
            Payload::List(Mutex::new(Vec::new()))
        } else {
            Payload::None
        };
        Self::with_payload(ty, payload)
    }

    /// Box a primitive or enum value under `ty`
    pub fn boxed(ty: &Type, value: Value) -> Self {
        Self::with_payload(ty, Payload::Boxed(value))
    }

    /// Zero-filled array with the given dimensions
    pub fn new_array(elem: &Type, dims: &[usize]) -> Self {
        let len = dims.iter().product();
        let ty = elem.make_array_type(dims.len());
        Self::with_payload(
            &ty,
            Payload::Array(ArrayData {
                elem: elem.clone(),
                dims: dims.to_vec(),
                storage: RwLock::new(ArrayStorage::zeroed(elem, len)),
                pins: AtomicUsize::new(0),
            }),
        )
    }

    /// One-dimensional array from values of the element representation
    pub fn array_from(elem: &Type, values: Vec<Value>) -> Result<Self, ManagedException> {
        let array = Self::new_array(elem, &[values.len()]);
        if let Some(data) = array.as_array() {
            for (i, v) in values.into_iter().enumerate() {
                data.set(i, v)?;
            }
        }
        Ok(array)
    }

    /// `List<T>` holding `items`
    pub fn new_list(list_ty: &Type, items: Vec<Value>) -> Self {
        Self::with_payload(list_ty, Payload::List(Mutex::new(items)))
    }

    /// Exception of `ty` with a message and optional inner exception
    pub fn new_exception(ty: &Type, message: &str, inner: Option<ObjectRef>) -> Self {
        let data = ExceptionData::new();
        data.set_message(message);
        data.set_inner(inner);
        Self::with_payload(ty, Payload::Exception(data))
    }

    /// Managed handle to an interpreter object
    pub fn native(value: NativeObject) -> Self {
        Self::with_payload(&super::core().py_object, Payload::Native(value))
    }

    /// Instance of `ty` carrying host state
    pub fn host<T: Any + Send + Sync>(ty: &Type, state: T) -> Self {
        Self::with_payload(ty, Payload::Host(Box::new(state)))
    }

    pub fn ty(&self) -> &Type {
        &self.0.ty
    }

    pub fn payload(&self) -> &Payload {
        &self.0.payload
    }

    pub fn field(&self, index: usize) -> Value {
        self.0.fields.lock().get(index).cloned().unwrap_or_default()
    }

    pub fn set_field(&self, index: usize, value: Value) {
        if let Some(slot) = self.0.fields.lock().get_mut(index) {
            *slot = value;
        }
    }

    /// Read an instance field by name
    pub fn get_field_named(&self, name: &str) -> Option<Value> {
        let field = self.0.ty.find_field(name)?;
        field.get(Some(self)).ok()
    }

    /// Write an instance field by name; false when no such field exists
    pub fn set_field_named(&self, name: &str, value: Value) -> bool {
        match self.0.ty.find_field(name) {
            Some(field) => field.set(Some(self), value).is_ok(),
            None => false,
        }
    }

    pub fn boxed_value(&self) -> Option<&Value> {
        match &self.0.payload {
            Payload::Boxed(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayData> {
        match &self.0.payload {
            Payload::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Mutex<Vec<Value>>> {
        match &self.0.payload {
            Payload::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_exception(&self) -> Option<&ExceptionData> {
        match &self.0.payload {
            Payload::Exception(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_native(&self) -> Option<&NativeObject> {
        match &self.0.payload {
            Payload::Native(n) => Some(n),
            _ => None,
        }
    }

    pub fn host_state<T: Any>(&self) -> Option<&T> {
        match &self.0.payload {
            Payload::Host(state) => state.downcast_ref(),
            _ => None,
        }
    }

    /// Name of the enum member holding this boxed value
    pub fn enum_name(&self) -> Option<String> {
        let value = self.boxed_value()?.as_i128()?;
        self.0.ty.members().fields.iter().find_map(|f| {
            let member = f.get(None).ok()?;
            (member.as_i128() == Some(value)).then(|| f.name().to_owned())
        })
    }

    pub fn native_self(&self) -> *mut PyObject {
        self.0.native_self.load(Ordering::Acquire)
    }

    pub(crate) fn set_native_self(&self, ob: *mut PyObject) {
        self.0.native_self.store(ob, Ordering::Release);
    }

    /// Clear the back pointer only if it still names `ob`
    pub(crate) fn clear_native_self(&self, ob: *mut PyObject) {
        let _ = self
            .0
            .native_self
            .compare_exchange(ob, null_mut(), Ordering::AcqRel, Ordering::Acquire);
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Stable address used for identity hashing
    pub fn address(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    pub(crate) fn into_raw(self) -> *const ManagedObject {
        Arc::into_raw(self.0)
    }

    /// # Safety
    /// `ptr` must come from [`ObjectRef::into_raw`] and not have been
    /// reclaimed
    pub(crate) unsafe fn from_raw(ptr: *const ManagedObject) -> Self {
        ObjectRef(Arc::from_raw(ptr))
    }

    /// New reference from a raw pointer without taking over its count
    ///
    /// # Safety
    /// As for [`ObjectRef::from_raw`]; the raw owner must outlive the call
    pub(crate) unsafe fn clone_raw(ptr: *const ManagedObject) -> Self {
        Arc::increment_strong_count(ptr);
        ObjectRef(Arc::from_raw(ptr))
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ObjectRef {}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} at {:#x}>", self.0.ty.full_name(), self.address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managed::core;

    #[test]
    fn test_array_storage_is_typed() {
        let c = core();
        let arr = ObjectRef::array_from(&c.int32, vec![1.into(), 2.into(), 3.into()]).unwrap();
        let data = arr.as_array().unwrap();
        assert_eq!(data.len(), 3);
        assert_eq!(data.get(1).unwrap(), Value::I32(2));
        assert!(data.set(0, Value::I64(9)).is_err());
        assert!(data.get(3).is_err());
        assert_eq!(arr.ty(), &c.int32.make_array_type(1));
    }

    #[test]
    fn test_multidimensional_index_is_row_major() {
        let arr = ObjectRef::new_array(&core().int32, &[2, 3]);
        let data = arr.as_array().unwrap();
        assert_eq!(data.flat_index(&[1, 2]), Some(5));
        assert_eq!(data.flat_index(&[2, 0]), None);
        assert_eq!(data.flat_index(&[0]), None);
    }

    #[test]
    fn test_pins_balance() {
        let arr = ObjectRef::new_array(&core().double, &[4]);
        let data = arr.as_array().unwrap();
        data.pin();
        assert_eq!(data.pin_count(), 1);
        data.unpin();
        assert_eq!(data.pin_count(), 0);
    }

    #[test]
    fn test_exception_allocation_gets_exception_payload() {
        let c = core();
        let e = ObjectRef::alloc(&c.argument_exception);
        assert!(e.as_exception().is_some());
        assert!(ObjectRef::alloc(&c.object).as_exception().is_none());
    }

    #[test]
    fn test_identity_equality() {
        let c = core();
        let a = ObjectRef::alloc(&c.object);
        let b = ObjectRef::alloc(&c.object);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }
}
