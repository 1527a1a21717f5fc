//! Reflected members: methods, constructors, properties, fields

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::exceptions::ManagedException;
use super::object::ObjectRef;
use super::types::Type;
use super::value::Value;

/// Body of a method: receives the target (None for static methods) and the
/// argument slots. By-ref and out parameters are written back into `args`.
pub type Invoker =
    Arc<dyn Fn(Option<&ObjectRef>, &mut [Value]) -> Result<Value, ManagedException> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    In,
    Ref,
    Out,
}

#[derive(Debug, Clone)]
pub struct ParameterInfo {
    name: String,
    ty: Type,
    kind: ParamKind,
    default: Option<Value>,
    is_params: bool,
}

impl ParameterInfo {
    pub fn new(name: &str, ty: &Type) -> Self {
        ParameterInfo {
            name: name.to_owned(),
            ty: ty.clone(),
            kind: ParamKind::In,
            default: None,
            is_params: false,
        }
    }

    pub fn by_ref(mut self) -> Self {
        self.kind = ParamKind::Ref;
        self
    }

    pub fn out(mut self) -> Self {
        self.kind = ParamKind::Out;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Trailing variable-length parameter; `ty` must be an array type
    pub fn params_array(mut self) -> Self {
        self.is_params = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn kind(&self) -> ParamKind {
        self.kind
    }

    pub fn is_out(&self) -> bool {
        self.kind == ParamKind::Out
    }

    pub fn is_by_ref(&self) -> bool {
        self.kind != ParamKind::In
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    pub fn is_params(&self) -> bool {
        self.is_params
    }
}

/// Failure reported by [`MethodInfo::invoke`]
#[derive(Debug, Clone)]
pub enum InvokeError {
    /// The method body threw; the payload is the thrown exception
    TargetInvocation(ManagedException),
    /// Instance method invoked without a target
    NullTarget { method: String },
    /// Abstract method with no override on the target's type
    Abstract { method: String },
}

impl InvokeError {
    /// The exception a caller should observe, with the invocation wrapper
    /// stripped
    pub fn into_exception(self) -> ManagedException {
        match self {
            InvokeError::TargetInvocation(e) => e,
            InvokeError::NullTarget { method } => {
                ManagedException::null_reference(format!("non-static method {} requires a target", method))
            }
            InvokeError::Abstract { method } => {
                ManagedException::not_supported(format!("cannot invoke abstract method {}", method))
            }
        }
    }
}

impl fmt::Display for InvokeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvokeError::TargetInvocation(e) => {
                write!(f, "exception has been thrown by the target of an invocation: {}", e)
            }
            InvokeError::NullTarget { method } => write!(f, "non-static method {} requires a target", method),
            InvokeError::Abstract { method } => write!(f, "cannot invoke abstract method {}", method),
        }
    }
}

impl std::error::Error for InvokeError {}

/// A method or constructor
pub struct MethodInfo {
    pub(crate) name: String,
    pub(crate) declaring: Type,
    pub(crate) params: Vec<ParameterInfo>,
    pub(crate) return_type: Option<Type>,
    pub(crate) is_static: bool,
    pub(crate) is_virtual: bool,
    pub(crate) is_abstract: bool,
    pub(crate) is_constructor: bool,
    pub(crate) generic_arity: usize,
    pub(crate) may_block: bool,
    pub(crate) invoker: Option<Invoker>,
}

impl MethodInfo {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn declaring_type(&self) -> &Type {
        &self.declaring
    }

    pub fn parameters(&self) -> &[ParameterInfo] {
        &self.params
    }

    /// None for `void`
    pub fn return_type(&self) -> Option<&Type> {
        self.return_type.as_ref()
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn is_virtual(&self) -> bool {
        self.is_virtual || self.is_abstract
    }

    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    pub fn is_constructor(&self) -> bool {
        self.is_constructor
    }

    pub fn is_generic(&self) -> bool {
        self.generic_arity > 0
    }

    /// Marked long-running: the interpreter lock may be released around it
    pub fn may_block(&self) -> bool {
        self.may_block
    }

    /// Same name and parameter types
    pub fn same_signature(&self, other: &MethodInfo) -> bool {
        self.name == other.name
            && self.params.len() == other.params.len()
            && self.params.iter().zip(&other.params).all(|(a, b)| a.ty == b.ty && a.kind == b.kind)
    }

    /// `Name(Type, Type)` for diagnostics
    pub fn signature(&self) -> String {
        let params: Vec<String> = self.params.iter().map(|p| p.ty.name().to_owned()).collect();
        format!("{}({})", self.name, params.join(", "))
    }

    /// Most derived override of this method visible from `ty`
    fn resolve_override(&self, ty: &Type) -> Option<Arc<MethodInfo>> {
        ty.ancestors()
            .take_while(|t| t != &self.declaring)
            .find_map(|t| {
                t.members()
                    .methods
                    .iter()
                    .find(|m| !m.is_static && m.same_signature(self))
                    .cloned()
            })
    }

    /// Run the method. Constructors allocate the new object and return it;
    /// virtual methods dispatch on the target's runtime type.
    pub fn invoke(&self, target: Option<&ObjectRef>, args: &mut [Value]) -> Result<Value, InvokeError> {
        if self.is_constructor {
            return self.construct_as(&self.declaring, args).map(Value::Object);
        }
        if !self.is_static && target.is_none() {
            return Err(InvokeError::NullTarget { method: self.signature() });
        }
        if self.is_virtual() {
            if let Some(target) = target {
                if let Some(over) = self.resolve_override(target.ty()) {
                    return over.invoke_body(target, args);
                }
            }
        }
        match &self.invoker {
            Some(body) => body(target, args).map_err(InvokeError::TargetInvocation),
            None => Err(InvokeError::Abstract { method: self.signature() }),
        }
    }

    /// Run a constructor body against a fresh instance of `ty`, which must be
    /// the declaring type or derive from it
    pub fn construct_as(&self, ty: &Type, args: &mut [Value]) -> Result<ObjectRef, InvokeError> {
        if !self.is_constructor || (ty != &self.declaring && !ty.is_subclass_of(&self.declaring)) {
            return Err(InvokeError::TargetInvocation(ManagedException::invalid_operation(format!(
                "{} cannot construct {}",
                self.signature(),
                ty
            ))));
        }
        let this = ObjectRef::alloc(ty);
        if let Some(body) = &self.invoker {
            body(Some(&this), args).map_err(InvokeError::TargetInvocation)?;
        }
        Ok(this)
    }

    fn invoke_body(&self, target: &ObjectRef, args: &mut [Value]) -> Result<Value, InvokeError> {
        match &self.invoker {
            Some(body) => body(Some(target), args).map_err(InvokeError::TargetInvocation),
            None => Err(InvokeError::Abstract { method: self.signature() }),
        }
    }
}

impl fmt::Debug for MethodInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MethodInfo({}.{})", self.declaring.name(), self.signature())
    }
}

/// Property with optional accessors; an indexer has index parameters
pub struct PropertyInfo {
    pub(crate) name: String,
    pub(crate) declaring: Type,
    pub(crate) ty: Type,
    pub(crate) index_params: Vec<ParameterInfo>,
    pub(crate) getter: Option<Arc<MethodInfo>>,
    pub(crate) setter: Option<Arc<MethodInfo>>,
    pub(crate) is_static: bool,
}

impl PropertyInfo {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn declaring_type(&self) -> &Type {
        &self.declaring
    }

    pub fn property_type(&self) -> &Type {
        &self.ty
    }

    pub fn index_parameters(&self) -> &[ParameterInfo] {
        &self.index_params
    }

    pub fn getter(&self) -> Option<&Arc<MethodInfo>> {
        self.getter.as_ref()
    }

    pub fn setter(&self) -> Option<&Arc<MethodInfo>> {
        self.setter.as_ref()
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn can_write(&self) -> bool {
        self.setter.is_some()
    }

    /// Read a non-indexed property
    pub fn get(&self, target: Option<&ObjectRef>) -> Result<Value, InvokeError> {
        match &self.getter {
            Some(getter) => getter.invoke(target, &mut []),
            None => Err(InvokeError::TargetInvocation(ManagedException::argument(format!(
                "property {} has no getter",
                self.name
            )))),
        }
    }

    /// Write a non-indexed property
    pub fn set(&self, target: Option<&ObjectRef>, value: Value) -> Result<(), InvokeError> {
        match &self.setter {
            Some(setter) => setter.invoke(target, &mut [value]).map(|_| ()),
            None => Err(InvokeError::TargetInvocation(ManagedException::argument(format!(
                "property {} is read-only",
                self.name
            )))),
        }
    }
}

impl fmt::Debug for PropertyInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropertyInfo({}.{}: {})", self.declaring.name(), self.name, self.ty.name())
    }
}

/// Storage location of a field
pub enum FieldSlot {
    /// Index into the object's field vector
    Instance(usize),
    Static(Mutex<Value>),
}

pub struct FieldInfo {
    pub(crate) name: String,
    pub(crate) declaring: Type,
    pub(crate) ty: Type,
    pub(crate) slot: FieldSlot,
    pub(crate) read_only: bool,
}

impl FieldInfo {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn declaring_type(&self) -> &Type {
        &self.declaring
    }

    pub fn field_type(&self) -> &Type {
        &self.ty
    }

    pub fn is_static(&self) -> bool {
        matches!(self.slot, FieldSlot::Static(_))
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn get(&self, target: Option<&ObjectRef>) -> Result<Value, ManagedException> {
        match (&self.slot, target) {
            (FieldSlot::Static(cell), _) => Ok(cell.lock().clone()),
            (FieldSlot::Instance(index), Some(obj)) => Ok(obj.field(*index)),
            (FieldSlot::Instance(_), None) => Err(ManagedException::null_reference(format!(
                "instance field {} requires a target",
                self.name
            ))),
        }
    }

    /// Store without checking `read_only`; callers that expose fields to
    /// scripts check it first
    pub fn set(&self, target: Option<&ObjectRef>, value: Value) -> Result<(), ManagedException> {
        match (&self.slot, target) {
            (FieldSlot::Static(cell), _) => {
                *cell.lock() = value;
                Ok(())
            }
            (FieldSlot::Instance(index), Some(obj)) => {
                obj.set_field(*index, value);
                Ok(())
            }
            (FieldSlot::Instance(_), None) => Err(ManagedException::null_reference(format!(
                "instance field {} requires a target",
                self.name
            ))),
        }
    }
}

impl fmt::Debug for FieldInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldInfo({}.{}: {})", self.declaring.name(), self.name, self.ty.name())
    }
}

/// Members declared directly on one type
#[derive(Default)]
pub struct Members {
    pub constructors: Vec<Arc<MethodInfo>>,
    pub methods: Vec<Arc<MethodInfo>>,
    pub properties: Vec<Arc<PropertyInfo>>,
    pub fields: Vec<Arc<FieldInfo>>,
}

impl Members {
    /// Distinct method names, declaration order
    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for m in &self.methods {
            if !names.contains(&m.name()) {
                names.push(m.name());
            }
        }
        names
    }
}
