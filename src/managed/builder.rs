//! Fluent construction of runtime types
//!
//! ```ignore
//! let point = TypeBuilder::class("Demo", "Point")
//!     .field("X", &core().int32)
//!     .field("Y", &core().int32)
//!     .constructor(
//!         vec![ParameterInfo::new("x", &core().int32), ParameterInfo::new("y", &core().int32)],
//!         |this, args| {
//!             this.set_field(0, args[0].clone());
//!             this.set_field(1, args[1].clone());
//!             Ok(())
//!         },
//!     )
//!     .build();
//! ```
//!
//! Members that mention the type being built go through
//! [`TypeBuilder::build_with`], which hands the finished handle to a closure
//! before the members are sealed.

use std::sync::Arc;

use parking_lot::Mutex;

use super::exceptions::ManagedException;
use super::members::{FieldInfo, FieldSlot, Invoker, Members, MethodInfo, ParameterInfo, PropertyInfo};
use super::object::ObjectRef;
use super::types::{MemberFactory, Type, TypeCode, TypeInner, TypeKind};
use super::value::Value;

type Pending = Box<dyn FnOnce(&Type, &mut MemberSet)>;

pub struct TypeBuilder {
    inner: TypeInner,
    pending: Vec<Pending>,
}

impl TypeBuilder {
    /// Bare builder with no implied base
    pub(crate) fn new(namespace: &str, name: &str, kind: TypeKind, code: TypeCode) -> Self {
        TypeBuilder {
            inner: TypeInner::new(namespace, name, kind, code),
            pending: Vec::new(),
        }
    }

    /// Reference type deriving from `object` unless [`base`](Self::base) says otherwise
    pub fn class(namespace: &str, name: &str) -> Self {
        Self::new(namespace, name, TypeKind::Class, TypeCode::Object).base(&super::core().object)
    }

    /// Value type deriving from `ValueType`
    pub fn structure(namespace: &str, name: &str) -> Self {
        Self::new(namespace, name, TypeKind::Struct, TypeCode::Object)
            .base(&super::core().value_type)
            .sealed()
    }

    pub fn interface(namespace: &str, name: &str) -> Self {
        Self::new(namespace, name, TypeKind::Interface, TypeCode::Object)
    }

    /// Enum stored as `underlying`; add members with [`variant`](Self::variant)
    pub fn enumeration(namespace: &str, name: &str, underlying: &Type) -> Self {
        let mut b = Self::new(namespace, name, TypeKind::Enum, TypeCode::Object)
            .base(&super::core().enum_)
            .sealed();
        b.inner.element = Some(underlying.clone());
        b
    }

    /// Open generic class; `factory` produces the members of each instantiation
    pub fn generic_class(namespace: &str, name: &str, arity: usize, factory: MemberFactory) -> Self {
        let mut b = Self::new(namespace, name, TypeKind::GenericDefinition, TypeCode::Object)
            .base(&super::core().object);
        b.inner.generic_arity = arity;
        b.inner.factory = Some(factory);
        b
    }

    pub fn base(mut self, base: &Type) -> Self {
        self.inner.base = Some(base.clone());
        self
    }

    pub fn implements(mut self, iface: &Type) -> Self {
        self.inner.interfaces.push(iface.clone());
        self
    }

    pub fn sealed(mut self) -> Self {
        self.inner.flags.is_sealed = true;
        self
    }

    pub fn abstract_(mut self) -> Self {
        self.inner.flags.is_abstract = true;
        self
    }

    /// Mark as an open generic definition of `arity` parameters
    pub(crate) fn set_generic(&mut self, arity: usize, factory: Option<MemberFactory>) {
        self.inner.generic_arity = arity;
        self.inner.factory = factory;
    }

    pub(crate) fn derived_from_native(mut self) -> Self {
        self.inner.flags.derived_from_native = true;
        self
    }

    fn defer(mut self, f: impl FnOnce(&Type, &mut MemberSet) + 'static) -> Self {
        self.pending.push(Box::new(f));
        self
    }

    pub fn field(self, name: &str, ty: &Type) -> Self {
        let (name, ty) = (name.to_owned(), ty.clone());
        self.defer(move |_, m| {
            m.field(&name, &ty);
        })
    }

    pub fn readonly_field(self, name: &str, ty: &Type) -> Self {
        let (name, ty) = (name.to_owned(), ty.clone());
        self.defer(move |_, m| {
            m.readonly_field(&name, &ty);
        })
    }

    pub fn static_field(self, name: &str, ty: &Type, value: Value) -> Self {
        let (name, ty) = (name.to_owned(), ty.clone());
        self.defer(move |_, m| {
            m.static_field(&name, &ty, value, false);
        })
    }

    /// Enum member; the value is range-checked against the underlying type
    pub fn variant(self, name: &str, value: i128) -> Self {
        let name = name.to_owned();
        self.defer(move |ty, m| {
            let code = ty.underlying_type().map(Type::type_code).unwrap_or(TypeCode::Int32);
            match Value::integer(code, value) {
                Some(raw) => {
                    let boxed = Value::Object(ObjectRef::boxed(ty, raw));
                    m.static_field(&name, ty, boxed, true);
                }
                None => tracing::warn!(event = "enum_variant_range", ty = %ty, name = %name, value, "enum value out of range; skipped"),
            }
        })
    }

    pub fn constructor<F>(self, params: Vec<ParameterInfo>, body: F) -> Self
    where
        F: Fn(&ObjectRef, &mut [Value]) -> Result<(), ManagedException> + Send + Sync + 'static,
    {
        self.defer(move |_, m| {
            m.constructor(params, body);
        })
    }

    /// Parameterless constructor with no body
    pub fn default_constructor(self) -> Self {
        self.defer(|_, m| {
            m.constructor(Vec::new(), |_, _| Ok(()));
        })
    }

    pub fn method(self, method: MethodBuilder) -> Self {
        self.defer(move |_, m| {
            m.method(method);
        })
    }

    pub fn property(self, property: PropertyBuilder) -> Self {
        self.defer(move |_, m| {
            m.property(property);
        })
    }

    /// Field-backed read/write property
    pub fn auto_property(self, name: &str, ty: &Type) -> Self {
        let (name, ty) = (name.to_owned(), ty.clone());
        self.defer(move |_, m| {
            m.auto_property(&name, &ty);
        })
    }

    pub fn build(self) -> Type {
        self.build_with(|_, _| {})
    }

    /// Finish the type, letting `f` add members that refer to it
    pub fn build_with(self, f: impl FnOnce(&Type, &mut MemberSet)) -> Type {
        let ty = Type::from_inner(self.inner);
        let mut set = MemberSet::new(&ty);
        for add in self.pending {
            add(&ty, &mut set);
        }
        f(&ty, &mut set);
        ty.set_members(set.finish());
        tracing::trace!(event = "type_built", ty = %ty, "managed type defined");
        ty
    }
}

/// Members under construction for one declaring type
pub struct MemberSet {
    declaring: Type,
    next_field: usize,
    members: Members,
}

impl MemberSet {
    pub(crate) fn new(declaring: &Type) -> Self {
        MemberSet {
            declaring: declaring.clone(),
            next_field: declaring.base().map(Type::instance_field_count).unwrap_or(0),
            members: Members::default(),
        }
    }

    pub fn declaring_type(&self) -> &Type {
        &self.declaring
    }

    fn push_field(&mut self, name: &str, ty: &Type, slot: FieldSlot, read_only: bool) -> Arc<FieldInfo> {
        let field = Arc::new(FieldInfo {
            name: name.to_owned(),
            declaring: self.declaring.clone(),
            ty: ty.clone(),
            slot,
            read_only,
        });
        self.members.fields.push(field.clone());
        field
    }

    /// Instance field; returns its slot index
    pub fn field(&mut self, name: &str, ty: &Type) -> usize {
        let index = self.next_field;
        self.next_field += 1;
        self.push_field(name, ty, FieldSlot::Instance(index), false);
        index
    }

    pub fn readonly_field(&mut self, name: &str, ty: &Type) -> usize {
        let index = self.next_field;
        self.next_field += 1;
        self.push_field(name, ty, FieldSlot::Instance(index), true);
        index
    }

    pub fn static_field(&mut self, name: &str, ty: &Type, value: Value, read_only: bool) {
        self.push_field(name, ty, FieldSlot::Static(Mutex::new(value)), read_only);
    }

    pub fn constructor<F>(&mut self, params: Vec<ParameterInfo>, body: F)
    where
        F: Fn(&ObjectRef, &mut [Value]) -> Result<(), ManagedException> + Send + Sync + 'static,
    {
        let invoker: Invoker = Arc::new(move |this, args| match this {
            Some(this) => body(this, args).map(|_| Value::Null),
            None => Err(ManagedException::null_reference("constructor invoked without an instance")),
        });
        let ctor = MethodInfo {
            name: ".ctor".to_owned(),
            declaring: self.declaring.clone(),
            params,
            return_type: None,
            is_static: false,
            is_virtual: false,
            is_abstract: false,
            is_constructor: true,
            generic_arity: 0,
            may_block: false,
            invoker: Some(invoker),
        };
        self.members.constructors.push(Arc::new(ctor));
    }

    pub fn method(&mut self, method: MethodBuilder) -> Arc<MethodInfo> {
        let info = Arc::new(method.finish(&self.declaring));
        self.members.methods.push(info.clone());
        info
    }

    pub fn property(&mut self, property: PropertyBuilder) -> Arc<PropertyInfo> {
        let PropertyBuilder { name, ty, index_params, is_static, getter, setter } = property;
        let interface = self.declaring.is_interface();
        let getter = getter.or_else(|| interface.then(|| Absent)).map(|body| {
            let mut m = MethodBuilder::new(&format!("get_{}", name)).returns(&ty);
            m.params = index_params.clone();
            m.is_static = is_static;
            m.invoker = body.into_invoker();
            self.method(m)
        });
        let setter = setter.map(|body| {
            let mut m = MethodBuilder::new(&format!("set_{}", name));
            m.params = index_params.clone();
            m.params.push(ParameterInfo::new("value", &ty));
            m.is_static = is_static;
            m.invoker = body.into_invoker();
            self.method(m)
        });
        let info = Arc::new(PropertyInfo {
            name,
            declaring: self.declaring.clone(),
            ty,
            index_params,
            getter,
            setter,
            is_static,
        });
        self.members.properties.push(info.clone());
        info
    }

    /// Property over a new private field
    pub fn auto_property(&mut self, name: &str, ty: &Type) -> Arc<PropertyInfo> {
        let index = self.field(&format!("<{}>k__BackingField", name), ty);
        self.property(
            PropertyBuilder::new(name, ty)
                .getter(move |this, _| Ok(this.map(|t| t.field(index)).unwrap_or_default()))
                .setter(move |this, args| {
                    if let (Some(this), Some(v)) = (this, args.first()) {
                        this.set_field(index, v.clone());
                    }
                    Ok(Value::Null)
                }),
        )
    }

    pub(crate) fn finish(self) -> Members {
        self.members
    }
}

/// An accessor body, or a declared-but-abstract accessor
enum AccessorBody {
    Body(Invoker),
    Absent,
}

use AccessorBody::Absent;

impl AccessorBody {
    fn into_invoker(self) -> Option<Invoker> {
        match self {
            AccessorBody::Body(f) => Some(f),
            AccessorBody::Absent => None,
        }
    }
}

pub struct MethodBuilder {
    name: String,
    params: Vec<ParameterInfo>,
    return_type: Option<Type>,
    is_static: bool,
    is_virtual: bool,
    is_abstract: bool,
    generic_arity: usize,
    may_block: bool,
    invoker: Option<Invoker>,
}

impl MethodBuilder {
    pub fn new(name: &str) -> Self {
        MethodBuilder {
            name: name.to_owned(),
            params: Vec::new(),
            return_type: None,
            is_static: false,
            is_virtual: false,
            is_abstract: false,
            generic_arity: 0,
            may_block: false,
            invoker: None,
        }
    }

    pub fn param(mut self, name: &str, ty: &Type) -> Self {
        self.params.push(ParameterInfo::new(name, ty));
        self
    }

    pub fn parameter(mut self, param: ParameterInfo) -> Self {
        self.params.push(param);
        self
    }

    pub fn returns(mut self, ty: &Type) -> Self {
        self.return_type = Some(ty.clone());
        self
    }

    pub fn static_(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn virtual_(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    pub fn abstract_(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn generic(mut self, arity: usize) -> Self {
        self.generic_arity = arity;
        self
    }

    /// Long-running body; the binder may release the interpreter lock
    pub fn may_block(mut self) -> Self {
        self.may_block = true;
        self
    }

    pub fn body<F>(mut self, f: F) -> Self
    where
        F: Fn(Option<&ObjectRef>, &mut [Value]) -> Result<Value, ManagedException> + Send + Sync + 'static,
    {
        self.invoker = Some(Arc::new(f));
        self
    }

    pub(crate) fn with_invoker(mut self, invoker: Invoker) -> Self {
        self.invoker = Some(invoker);
        self
    }

    fn finish(self, declaring: &Type) -> MethodInfo {
        let is_abstract = self.is_abstract || (declaring.is_interface() && self.invoker.is_none());
        MethodInfo {
            name: self.name,
            declaring: declaring.clone(),
            params: self.params,
            return_type: self.return_type,
            is_static: self.is_static,
            is_virtual: self.is_virtual,
            is_abstract,
            is_constructor: false,
            generic_arity: self.generic_arity,
            may_block: self.may_block,
            invoker: self.invoker,
        }
    }
}

pub struct PropertyBuilder {
    name: String,
    ty: Type,
    index_params: Vec<ParameterInfo>,
    is_static: bool,
    getter: Option<AccessorBody>,
    setter: Option<AccessorBody>,
}

impl PropertyBuilder {
    pub fn new(name: &str, ty: &Type) -> Self {
        PropertyBuilder {
            name: name.to_owned(),
            ty: ty.clone(),
            index_params: Vec::new(),
            is_static: false,
            getter: None,
            setter: None,
        }
    }

    /// Indexer parameter; an indexer is conventionally named `Item`
    pub fn index(mut self, param: ParameterInfo) -> Self {
        self.index_params.push(param);
        self
    }

    pub fn static_(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Getter body; receives the index arguments
    pub fn getter<F>(mut self, f: F) -> Self
    where
        F: Fn(Option<&ObjectRef>, &mut [Value]) -> Result<Value, ManagedException> + Send + Sync + 'static,
    {
        self.getter = Some(AccessorBody::Body(Arc::new(f)));
        self
    }

    /// Setter body; receives the index arguments followed by the value
    pub fn setter<F>(mut self, f: F) -> Self
    where
        F: Fn(Option<&ObjectRef>, &mut [Value]) -> Result<Value, ManagedException> + Send + Sync + 'static,
    {
        self.setter = Some(AccessorBody::Body(Arc::new(f)));
        self
    }

    /// Declared setter without a body (interfaces)
    pub fn abstract_setter(mut self) -> Self {
        self.setter = Some(AccessorBody::Absent);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managed::core;

    #[test]
    fn test_field_indices_continue_after_base() {
        let c = core();
        let base = TypeBuilder::class("Demo", "Base").field("A", &c.int32).build();
        let derived = TypeBuilder::class("Demo", "Derived")
            .base(&base)
            .field("B", &c.int32)
            .build();
        assert_eq!(derived.instance_field_count(), 2);
        let obj = ObjectRef::alloc(&derived);
        obj.set_field_named("B", Value::I32(7));
        assert_eq!(obj.field(1), Value::I32(7));
        assert_eq!(obj.get_field_named("A"), Some(Value::I32(0)));
    }

    #[test]
    fn test_self_referencing_operator() {
        let c = core();
        let money = TypeBuilder::class("Demo", "Money").field("Amount", &c.int64).build_with(|ty, m| {
            m.method(
                MethodBuilder::new("op_Addition")
                    .param("a", ty)
                    .param("b", ty)
                    .returns(ty)
                    .static_(),
            );
        });
        let add = &money.find_methods("op_Addition")[0];
        assert_eq!(add.parameters()[0].ty(), &money);
        assert_eq!(add.return_type(), Some(&money));
    }

    #[test]
    fn test_auto_property_round_trip() {
        let c = core();
        let ty = TypeBuilder::class("Demo", "Named").auto_property("Name", &c.string).build();
        let obj = ObjectRef::alloc(&ty);
        let prop = ty.find_property("Name").unwrap();
        prop.set(Some(&obj), Value::string("x")).unwrap();
        assert_eq!(prop.get(Some(&obj)).unwrap(), Value::string("x"));
    }

    #[test]
    fn test_enum_variants_are_boxed_statics() {
        let c = core();
        let color = TypeBuilder::enumeration("Demo", "Color", &c.int32)
            .variant("Red", 0)
            .variant("Blue", 2)
            .build();
        let blue = color.find_field("Blue").unwrap().get(None).unwrap();
        let obj = blue.as_object().unwrap();
        assert_eq!(obj.ty(), &color);
        assert_eq!(obj.enum_name().as_deref(), Some("Blue"));
        assert_eq!(blue.to_string(), "Blue");
    }

    #[test]
    fn test_interface_methods_dispatch_to_implementation() {
        let c = core();
        let iface = TypeBuilder::interface("Demo", "IArea")
            .method(MethodBuilder::new("Area").returns(&c.double))
            .build();
        let square = TypeBuilder::class("Demo", "Square")
            .implements(&iface)
            .method(MethodBuilder::new("Area").returns(&c.double).body(|_, _| Ok(Value::F64(4.0))))
            .build();
        let area = &iface.find_methods("Area")[0];
        assert!(area.is_abstract());
        let obj = ObjectRef::alloc(&square);
        assert_eq!(area.invoke(Some(&obj), &mut []).unwrap(), Value::F64(4.0));
    }
}
