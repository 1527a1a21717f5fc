//! The managed side of the bridge
//!
//! A small reflective object runtime: types with identity, late-bound members,
//! reference-counted heap objects, exceptions as objects, and strong identity
//! handles that native memory can hold. Bridged code sees nothing else of the
//! host program.

mod builder;
mod core_types;
mod enumerate;
mod exceptions;
mod handle;
mod members;
mod object;
mod types;
mod value;

pub use self::builder::{MemberSet, MethodBuilder, PropertyBuilder, TypeBuilder};
pub use self::core_types::{core, CoreTypes};
pub use self::enumerate::ManagedEnumerator;
pub use self::exceptions::ManagedException;
pub use self::handle::{live_handles, GcHandle};
pub use self::members::{
    FieldInfo, FieldSlot, InvokeError, Invoker, Members, MethodInfo, ParamKind, ParameterInfo,
    PropertyInfo,
};
pub use self::object::{ArrayData, ArrayStorage, ExceptionData, ManagedObject, ObjectRef, Payload};
pub use self::types::{MemberFactory, Type, TypeCode, TypeKind};
pub use self::value::Value;
