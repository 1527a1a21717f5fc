//! Runtime type handles
//!
//! A [`Type`] is compared by identity: two handles are equal only when they
//! point at the same definition. Array and generic instantiations are cached
//! on the type they are derived from, so `int32.make_array_type(1)` returns
//! the same handle on every call.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use super::exceptions::ManagedException;
use super::members::{FieldInfo, Members, MethodInfo, PropertyInfo};

/// Shape of a type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Class,
    Struct,
    Interface,
    Enum,
    Array { rank: usize },
    Nullable,
    GenericDefinition,
    GenericInstance,
    Primitive,
}

/// Primitive classification used by conversion and overload ranking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCode {
    Object,
    Boolean,
    Char,
    SByte,
    Byte,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Single,
    Double,
    String,
}

impl TypeCode {
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            TypeCode::SByte
                | TypeCode::Byte
                | TypeCode::Int16
                | TypeCode::UInt16
                | TypeCode::Int32
                | TypeCode::UInt32
                | TypeCode::Int64
                | TypeCode::UInt64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, TypeCode::Single | TypeCode::Double)
    }

    /// Inclusive range of an integer code
    pub fn integer_range(self) -> Option<(i128, i128)> {
        let range = match self {
            TypeCode::SByte => (i8::MIN as i128, i8::MAX as i128),
            TypeCode::Byte => (0, u8::MAX as i128),
            TypeCode::Int16 => (i16::MIN as i128, i16::MAX as i128),
            TypeCode::UInt16 => (0, u16::MAX as i128),
            TypeCode::Int32 => (i32::MIN as i128, i32::MAX as i128),
            TypeCode::UInt32 => (0, u32::MAX as i128),
            TypeCode::Int64 => (i64::MIN as i128, i64::MAX as i128),
            TypeCode::UInt64 => (0, u64::MAX as i128),
            _ => return None,
        };
        Some(range)
    }

    /// Size in bytes of an unboxed value
    pub fn size(self) -> Option<usize> {
        let size = match self {
            TypeCode::Boolean | TypeCode::SByte | TypeCode::Byte => 1,
            TypeCode::Int16 | TypeCode::UInt16 | TypeCode::Char => 2,
            TypeCode::Int32 | TypeCode::UInt32 | TypeCode::Single => 4,
            TypeCode::Int64 | TypeCode::UInt64 | TypeCode::Double => 8,
            TypeCode::Object | TypeCode::String => return None,
        };
        Some(size)
    }
}

/// Builds the members of a generic instantiation from its arguments
pub type MemberFactory = Arc<dyn Fn(&Type, &[Type]) -> Members + Send + Sync>;

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TypeFlags {
    pub is_abstract: bool,
    pub is_sealed: bool,
    pub derived_from_native: bool,
}

pub(crate) struct TypeInner {
    pub name: String,
    pub namespace: String,
    pub kind: TypeKind,
    pub code: TypeCode,
    pub base: Option<Type>,
    pub interfaces: Vec<Type>,
    pub flags: TypeFlags,
    /// Array element, nullable or enum underlying type
    pub element: Option<Type>,
    pub generic_args: Vec<Type>,
    pub definition: Option<Type>,
    pub generic_arity: usize,
    pub factory: Option<MemberFactory>,
    pub members: OnceCell<Members>,
    arrays: Mutex<HashMap<usize, Type>>,
    instantiations: Mutex<HashMap<Vec<Type>, Type>>,
    nullable: OnceCell<Type>,
}

impl TypeInner {
    pub fn new(namespace: &str, name: &str, kind: TypeKind, code: TypeCode) -> Self {
        TypeInner {
            name: name.to_owned(),
            namespace: namespace.to_owned(),
            kind,
            code,
            base: None,
            interfaces: Vec::new(),
            flags: TypeFlags::default(),
            element: None,
            generic_args: Vec::new(),
            definition: None,
            generic_arity: 0,
            factory: None,
            members: OnceCell::new(),
            arrays: Mutex::new(HashMap::new()),
            instantiations: Mutex::new(HashMap::new()),
            nullable: OnceCell::new(),
        }
    }
}

/// Identity handle for a runtime type
#[derive(Clone)]
pub struct Type(pub(crate) Arc<TypeInner>);

static EMPTY_MEMBERS: once_cell::sync::Lazy<Members> = once_cell::sync::Lazy::new(Members::default);

impl Type {
    pub(crate) fn from_inner(inner: TypeInner) -> Self {
        Type(Arc::new(inner))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn namespace(&self) -> &str {
        &self.0.namespace
    }

    /// `Namespace.Name`, with `[]` for arrays and bracketed arguments for
    /// generic instantiations
    pub fn full_name(&self) -> String {
        if self.0.namespace.is_empty() {
            self.0.name.clone()
        } else {
            format!("{}.{}", self.0.namespace, self.0.name)
        }
    }

    pub fn kind(&self) -> TypeKind {
        self.0.kind
    }

    pub fn type_code(&self) -> TypeCode {
        self.0.code
    }

    pub fn base(&self) -> Option<&Type> {
        self.0.base.as_ref()
    }

    /// Directly declared interfaces
    pub fn interfaces(&self) -> &[Type] {
        &self.0.interfaces
    }

    pub fn is_class(&self) -> bool {
        self.0.kind == TypeKind::Class
    }

    pub fn is_interface(&self) -> bool {
        self.0.kind == TypeKind::Interface
    }

    pub fn is_enum(&self) -> bool {
        self.0.kind == TypeKind::Enum
    }

    pub fn is_array(&self) -> bool {
        matches!(self.0.kind, TypeKind::Array { .. })
    }

    pub fn array_rank(&self) -> Option<usize> {
        match self.0.kind {
            TypeKind::Array { rank } => Some(rank),
            _ => None,
        }
    }

    pub fn is_nullable(&self) -> bool {
        self.0.kind == TypeKind::Nullable
    }

    pub fn is_primitive(&self) -> bool {
        self.0.kind == TypeKind::Primitive
    }

    /// Structs, enums and primitive value types; `String` is a reference type
    pub fn is_value_type(&self) -> bool {
        match self.0.kind {
            TypeKind::Struct | TypeKind::Enum | TypeKind::Nullable => true,
            TypeKind::Primitive => self.0.code != TypeCode::String,
            _ => false,
        }
    }

    pub fn is_generic_definition(&self) -> bool {
        self.0.kind == TypeKind::GenericDefinition
    }

    pub fn is_generic_instance(&self) -> bool {
        self.0.kind == TypeKind::GenericInstance
    }

    /// True for definitions and instantiations that still mention one
    pub fn contains_generic_parameters(&self) -> bool {
        self.is_generic_definition()
            || self.0.generic_args.iter().any(Type::contains_generic_parameters)
            || self.0.element.as_ref().is_some_and(Type::contains_generic_parameters)
    }

    pub fn is_abstract(&self) -> bool {
        self.0.flags.is_abstract || self.is_interface()
    }

    pub fn is_sealed(&self) -> bool {
        self.0.flags.is_sealed
    }

    /// Created by subclassing a bridged type from the interpreter
    pub fn is_derived_from_native(&self) -> bool {
        self.0.flags.derived_from_native
    }

    /// Array element type
    pub fn element_type(&self) -> Option<&Type> {
        if self.is_array() {
            self.0.element.as_ref()
        } else {
            None
        }
    }

    /// Nullable's wrapped type or an enum's storage type
    pub fn underlying_type(&self) -> Option<&Type> {
        match self.0.kind {
            TypeKind::Nullable | TypeKind::Enum => self.0.element.as_ref(),
            _ => None,
        }
    }

    pub fn generic_arguments(&self) -> &[Type] {
        &self.0.generic_args
    }

    pub fn generic_definition(&self) -> Option<&Type> {
        self.0.definition.as_ref()
    }

    pub fn generic_arity(&self) -> usize {
        self.0.generic_arity
    }

    /// Declared members; empty until a builder binds them
    pub fn members(&self) -> &Members {
        self.0.members.get().unwrap_or(&EMPTY_MEMBERS)
    }

    pub(crate) fn set_members(&self, members: Members) {
        if self.0.members.set(members).is_err() {
            tracing::warn!(event = "members_rebound", ty = %self, "members already bound; ignoring");
        }
    }

    /// Walk from this type up through its bases
    pub fn ancestors(&self) -> impl Iterator<Item = Type> {
        let mut next = Some(self.clone());
        std::iter::from_fn(move || {
            let cur = next.take()?;
            next = cur.base().cloned();
            Some(cur)
        })
    }

    /// Strict subclass test along the base chain
    pub fn is_subclass_of(&self, other: &Type) -> bool {
        self.ancestors().skip(1).any(|t| &t == other)
    }

    /// Interface implemented by this type, its bases, or inherited by its
    /// interfaces
    pub fn implements(&self, iface: &Type) -> bool {
        fn search(list: &[Type], iface: &Type) -> bool {
            list.iter().any(|i| i == iface || search(i.interfaces(), iface))
        }
        self.ancestors().any(|t| search(t.interfaces(), iface))
    }

    /// Can a value of type `other` be stored in a location of this type
    pub fn is_assignable_from(&self, other: &Type) -> bool {
        if self == other || other.is_subclass_of(self) {
            return true;
        }
        let core = super::core();
        if self == &core.object {
            return true;
        }
        if self == &core.value_type {
            return other.is_value_type() && !other.is_nullable();
        }
        if self.is_interface() && other.implements(self) {
            return true;
        }
        if self.is_nullable() {
            return self.underlying_type().is_some_and(|u| u.is_assignable_from(other));
        }
        if let (Some(mine), Some(theirs)) = (self.element_type(), other.element_type()) {
            // Reference-element arrays are covariant
            return self.array_rank() == other.array_rank()
                && !theirs.is_value_type()
                && mine.is_assignable_from(theirs);
        }
        false
    }

    /// Array of this element type; one handle per rank
    pub fn make_array_type(&self, rank: usize) -> Type {
        let rank = rank.max(1);
        let mut arrays = self.0.arrays.lock();
        arrays
            .entry(rank)
            .or_insert_with(|| {
                let suffix = format!("[{}]", ",".repeat(rank - 1));
                let mut inner = TypeInner::new(
                    &self.0.namespace,
                    &format!("{}{}", self.0.name, suffix),
                    TypeKind::Array { rank },
                    TypeCode::Object,
                );
                inner.base = Some(super::core().array.clone());
                inner.element = Some(self.clone());
                inner.flags.is_sealed = true;
                let ty = Type::from_inner(inner);
                ty.set_members(Members::default());
                ty
            })
            .clone()
    }

    /// `Nullable<T>` over this value type
    pub fn make_nullable(&self) -> Type {
        self.0
            .nullable
            .get_or_init(|| {
                let core = super::core();
                let mut inner = TypeInner::new(
                    "System",
                    &format!("Nullable[{}]", self.0.name),
                    TypeKind::Nullable,
                    TypeCode::Object,
                );
                inner.base = Some(core.value_type.clone());
                inner.element = Some(self.clone());
                inner.generic_args = vec![self.clone()];
                inner.definition = Some(core.nullable.clone());
                inner.flags.is_sealed = true;
                let ty = Type::from_inner(inner);
                ty.set_members(Members::default());
                ty
            })
            .clone()
    }

    /// Close a generic definition over `args`; one handle per argument list
    pub fn make_generic_type(&self, args: &[Type]) -> Result<Type, ManagedException> {
        if !self.is_generic_definition() {
            return Err(ManagedException::invalid_operation(format!(
                "{} is not a generic type definition",
                self.full_name()
            )));
        }
        if args.len() != self.0.generic_arity {
            return Err(ManagedException::argument(format!(
                "{} expects {} type arguments, got {}",
                self.full_name(),
                self.0.generic_arity,
                args.len()
            )));
        }
        let core = super::core();
        if self == &core.nullable {
            return Ok(args[0].make_nullable());
        }
        if let Some(found) = self.0.instantiations.lock().get(args) {
            return Ok(found.clone());
        }
        let names: Vec<&str> = args.iter().map(Type::name).collect();
        let mut inner = TypeInner::new(
            &self.0.namespace,
            &format!("{}[{}]", self.0.name, names.join(",")),
            TypeKind::GenericInstance,
            TypeCode::Object,
        );
        inner.base = self.0.base.clone();
        inner.interfaces = self.0.interfaces.clone();
        inner.generic_args = args.to_vec();
        inner.definition = Some(self.clone());
        inner.flags = self.0.flags;
        let ty = Type::from_inner(inner);
        let members = match &self.0.factory {
            Some(factory) => factory(&ty, args),
            None => Members::default(),
        };
        ty.set_members(members);
        // A racing instantiation may have landed first; keep the published one
        let mut cache = self.0.instantiations.lock();
        Ok(cache.entry(args.to_vec()).or_insert(ty).clone())
    }

    /// Instance fields of this type and its bases
    pub fn instance_field_count(&self) -> usize {
        self.ancestors()
            .map(|t| t.members().fields.iter().filter(|f| !f.is_static()).count())
            .sum()
    }

    /// Methods called `name` declared on this type and its bases, most
    /// derived first; interfaces contribute their own and inherited members
    pub fn find_methods(&self, name: &str) -> Vec<Arc<MethodInfo>> {
        let mut out: Vec<Arc<MethodInfo>> = Vec::new();
        for t in self.ancestors() {
            out.extend(t.members().methods.iter().filter(|m| m.name() == name).cloned());
        }
        if self.is_interface() {
            for iface in self.all_interfaces() {
                out.extend(iface.members().methods.iter().filter(|m| m.name() == name).cloned());
            }
        }
        out
    }

    pub fn find_property(&self, name: &str) -> Option<Arc<PropertyInfo>> {
        for t in self.ancestors().chain(self.all_interfaces()) {
            if let Some(p) = t.members().properties.iter().find(|p| p.name() == name) {
                return Some(p.clone());
            }
        }
        None
    }

    pub fn find_field(&self, name: &str) -> Option<Arc<FieldInfo>> {
        self.ancestors()
            .find_map(|t| t.members().fields.iter().find(|f| f.name() == name).cloned())
    }

    /// Indexer (`Item` with parameters) visible on this type
    pub fn indexer(&self) -> Option<Arc<PropertyInfo>> {
        self.find_property("Item").filter(|p| !p.index_parameters().is_empty())
    }

    /// Every interface reachable from this type, deduplicated
    pub fn all_interfaces(&self) -> Vec<Type> {
        fn collect(list: &[Type], out: &mut Vec<Type>) {
            for i in list {
                if !out.contains(i) {
                    out.push(i.clone());
                    collect(i.interfaces(), out);
                }
            }
        }
        let mut out = Vec::new();
        for t in self.ancestors() {
            collect(t.interfaces(), &mut out);
        }
        out
    }

    /// Stable address for identity hashing and logging
    pub fn address(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address().hash(state)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Type({})", self.full_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managed::{core, TypeBuilder};

    #[test]
    fn test_array_types_are_cached_per_rank() {
        let int32 = &core().int32;
        let a = int32.make_array_type(1);
        assert_eq!(a, int32.make_array_type(1));
        assert_ne!(a, int32.make_array_type(2));
        assert_eq!(a.name(), "Int32[]");
        assert_eq!(int32.make_array_type(2).name(), "Int32[,]");
        assert_eq!(a.element_type(), Some(int32));
    }

    #[test]
    fn test_assignability_follows_bases_and_interfaces() {
        let c = core();
        let shape = TypeBuilder::class("Demo", "Shape").implements(&c.ienumerable).build();
        let circle = TypeBuilder::class("Demo", "Circle").base(&shape).build();
        assert!(shape.is_assignable_from(&circle));
        assert!(!circle.is_assignable_from(&shape));
        assert!(c.ienumerable.is_assignable_from(&circle));
        assert!(c.object.is_assignable_from(&c.int32));
        assert!(c.value_type.is_assignable_from(&c.int32));
        assert!(!c.value_type.is_assignable_from(&c.string));
    }

    #[test]
    fn test_array_covariance_only_for_reference_elements() {
        let c = core();
        let objects = c.object.make_array_type(1);
        assert!(objects.is_assignable_from(&c.string.make_array_type(1)));
        assert!(!objects.is_assignable_from(&c.int32.make_array_type(1)));
    }

    #[test]
    fn test_generic_instantiation_identity_and_arity() {
        let c = core();
        let ints = c.list.make_generic_type(&[c.int32.clone()]).unwrap();
        assert_eq!(ints, c.list.make_generic_type(&[c.int32.clone()]).unwrap());
        assert!(ints.is_generic_instance());
        assert!(!ints.contains_generic_parameters());
        assert!(c.list.make_generic_type(&[]).is_err());
        assert!(c.int32.make_generic_type(&[c.int32.clone()]).is_err());
    }

    #[test]
    fn test_nullable_wraps_underlying() {
        let c = core();
        let n = c.nullable.make_generic_type(&[c.int32.clone()]).unwrap();
        assert!(n.is_nullable());
        assert_eq!(n.underlying_type(), Some(&c.int32));
        assert_eq!(n, c.int32.make_nullable());
    }

    #[test]
    fn test_integer_ranges() {
        assert_eq!(TypeCode::Byte.integer_range(), Some((0, 255)));
        assert_eq!(TypeCode::Int32.integer_range(), Some((i32::MIN as i128, i32::MAX as i128)));
        assert_eq!(TypeCode::Double.integer_range(), None);
    }
}
