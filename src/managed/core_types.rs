//! Well-known types every bridge instance starts with

use std::sync::Arc;

use once_cell::sync::Lazy;

use super::builder::{MemberSet, MethodBuilder, PropertyBuilder, TypeBuilder};
use super::exceptions::ManagedException;
use super::members::{Members, ParameterInfo};
use super::object::ObjectRef;
use super::types::{MemberFactory, Type, TypeCode, TypeKind};
use super::value::Value;

pub struct CoreTypes {
    pub object: Type,
    pub value_type: Type,
    pub enum_: Type,
    pub array: Type,
    pub string: Type,
    pub boolean: Type,
    pub char: Type,
    pub sbyte: Type,
    pub byte: Type,
    pub int16: Type,
    pub uint16: Type,
    pub int32: Type,
    pub uint32: Type,
    pub int64: Type,
    pub uint64: Type,
    pub single: Type,
    pub double: Type,
    pub ienumerable: Type,
    pub ienumerator: Type,
    /// `Nullable<T>`
    pub nullable: Type,
    /// `List<T>`
    pub list: Type,
    pub exception: Type,
    pub argument_exception: Type,
    pub invalid_cast_exception: Type,
    pub invalid_operation_exception: Type,
    pub overflow_exception: Type,
    pub index_out_of_range_exception: Type,
    pub key_not_found_exception: Type,
    pub not_supported_exception: Type,
    pub null_reference_exception: Type,
    /// Stands for an error raised inside the interpreter
    pub python_exception: Type,
    /// Handle to an interpreter object
    pub py_object: Type,
    /// Attribute interception: `bool TryGetAttr(string name, out object value)`
    pub iget_attr: Type,
}

impl CoreTypes {
    /// Primitive type for a type code
    pub fn for_code(&self, code: TypeCode) -> Option<&Type> {
        let ty = match code {
            TypeCode::Object => &self.object,
            TypeCode::Boolean => &self.boolean,
            TypeCode::Char => &self.char,
            TypeCode::SByte => &self.sbyte,
            TypeCode::Byte => &self.byte,
            TypeCode::Int16 => &self.int16,
            TypeCode::UInt16 => &self.uint16,
            TypeCode::Int32 => &self.int32,
            TypeCode::UInt32 => &self.uint32,
            TypeCode::Int64 => &self.int64,
            TypeCode::UInt64 => &self.uint64,
            TypeCode::Single => &self.single,
            TypeCode::Double => &self.double,
            TypeCode::String => &self.string,
        };
        Some(ty)
    }

    /// Every primitive, in type-code order
    pub fn primitives(&self) -> [&Type; 13] {
        [
            &self.boolean,
            &self.char,
            &self.sbyte,
            &self.byte,
            &self.int16,
            &self.uint16,
            &self.int32,
            &self.uint32,
            &self.int64,
            &self.uint64,
            &self.single,
            &self.double,
            &self.string,
        ]
    }
}

static CORE: Lazy<CoreTypes> = Lazy::new(build);

/// The process-wide core types
pub fn core() -> &'static CoreTypes {
    &CORE
}

// Nothing below may call `core()`: it runs inside the initializer. Every base
// is passed explicitly and members only touch `core()` when invoked.

fn system(name: &str, kind: TypeKind, code: TypeCode) -> TypeBuilder {
    TypeBuilder::new("System", name, kind, code)
}

fn primitive(name: &str, code: TypeCode, base: &Type) -> Type {
    system(name, TypeKind::Primitive, code).base(base).sealed().build()
}

fn exception_members(m: &mut MemberSet, string: &Type, exception: &Type) {
    m.constructor(Vec::new(), |_, _| Ok(()));
    m.constructor(vec![ParameterInfo::new("message", string)], |this, args| {
        if let (Some(data), Some(msg)) = (this.as_exception(), args.first()) {
            data.set_message(msg.as_str().unwrap_or_default());
        }
        Ok(())
    });
    m.constructor(
        vec![ParameterInfo::new("message", string), ParameterInfo::new("innerException", exception)],
        |this, args| {
            if let Some(data) = this.as_exception() {
                data.set_message(args.first().and_then(Value::as_str).unwrap_or_default());
                data.set_inner(args.get(1).and_then(Value::as_object).cloned());
            }
            Ok(())
        },
    );
}

fn exception_type(name: &str, base: &Type, string: &Type, exception: &Type) -> Type {
    let (string, exception) = (string.clone(), exception.clone());
    system(name, TypeKind::Class, TypeCode::Object)
        .base(base)
        .build_with(move |_, m| exception_members(m, &string, &exception))
}

fn list_factory() -> MemberFactory {
    Arc::new(|ty: &Type, args: &[Type]| -> Members {
        let core = core();
        let elem = args.first().cloned().unwrap_or_else(|| core.object.clone());
        let mut m = MemberSet::new(ty);
        m.constructor(Vec::new(), |_, _| Ok(()));
        m.method(
            MethodBuilder::new("Add").param("item", &elem).body(|this, args| {
                if let (Some(list), Some(v)) = (this.and_then(ObjectRef::as_list), args.first()) {
                    list.lock().push(v.clone());
                }
                Ok(Value::Null)
            }),
        );
        m.method(MethodBuilder::new("Clear").body(|this, _| {
            if let Some(list) = this.and_then(ObjectRef::as_list) {
                list.lock().clear();
            }
            Ok(Value::Null)
        }));
        m.property(PropertyBuilder::new("Count", &core.int32).getter(|this, _| {
            let len = this.and_then(ObjectRef::as_list).map(|l| l.lock().len()).unwrap_or(0);
            Ok(Value::I32(i32::try_from(len).unwrap_or(i32::MAX)))
        }));
        m.property(
            PropertyBuilder::new("Item", &elem)
                .index(ParameterInfo::new("index", &core.int32))
                .getter(|this, args| {
                    let list = this.and_then(ObjectRef::as_list).map(|l| l.lock());
                    let index = args.first().and_then(Value::as_i128).unwrap_or(-1);
                    match list {
                        Some(items) => usize::try_from(index)
                            .ok()
                            .and_then(|i| items.get(i).cloned())
                            .ok_or_else(|| ManagedException::index_out_of_range(index.max(0) as usize, items.len())),
                        None => Err(ManagedException::null_reference("list indexer without an instance")),
                    }
                })
                .setter(|this, args| {
                    let list = this.and_then(ObjectRef::as_list);
                    let index = args.first().and_then(Value::as_i128).unwrap_or(-1);
                    let value = args.get(1).cloned().unwrap_or_default();
                    match list {
                        Some(list) => {
                            let mut items = list.lock();
                            let len = items.len();
                            match usize::try_from(index).ok().and_then(|i| items.get_mut(i)) {
                                Some(slot) => {
                                    *slot = value;
                                    Ok(Value::Null)
                                }
                                None => Err(ManagedException::index_out_of_range(index.max(0) as usize, len)),
                            }
                        }
                        None => Err(ManagedException::null_reference("list indexer without an instance")),
                    }
                }),
        );
        m.finish()
    })
}

fn build() -> CoreTypes {
    let object = system("Object", TypeKind::Class, TypeCode::Object).build();
    let value_type = system("ValueType", TypeKind::Class, TypeCode::Object)
        .base(&object)
        .abstract_()
        .build();
    let enum_ = system("Enum", TypeKind::Class, TypeCode::Object)
        .base(&value_type)
        .abstract_()
        .build();
    let array = system("Array", TypeKind::Class, TypeCode::Object)
        .base(&object)
        .abstract_()
        .build();

    let string = primitive("String", TypeCode::String, &object);
    let boolean = primitive("Boolean", TypeCode::Boolean, &value_type);
    let char = primitive("Char", TypeCode::Char, &value_type);
    let sbyte = primitive("SByte", TypeCode::SByte, &value_type);
    let byte = primitive("Byte", TypeCode::Byte, &value_type);
    let int16 = primitive("Int16", TypeCode::Int16, &value_type);
    let uint16 = primitive("UInt16", TypeCode::UInt16, &value_type);
    let int32 = primitive("Int32", TypeCode::Int32, &value_type);
    let uint32 = primitive("UInt32", TypeCode::UInt32, &value_type);
    let int64 = primitive("Int64", TypeCode::Int64, &value_type);
    let uint64 = primitive("UInt64", TypeCode::UInt64, &value_type);
    let single = primitive("Single", TypeCode::Single, &value_type);
    let double = primitive("Double", TypeCode::Double, &value_type);

    let ienumerator = TypeBuilder::new("System.Collections", "IEnumerator", TypeKind::Interface, TypeCode::Object)
        .method(MethodBuilder::new("MoveNext").returns(&boolean))
        .property(PropertyBuilder::new("Current", &object))
        .build();
    let ienumerable = TypeBuilder::new("System.Collections", "IEnumerable", TypeKind::Interface, TypeCode::Object)
        .method(MethodBuilder::new("GetEnumerator").returns(&ienumerator))
        .build();

    let mut nullable = system("Nullable", TypeKind::GenericDefinition, TypeCode::Object).base(&value_type);
    nullable.set_generic(1, None);
    let nullable = nullable.sealed().build();

    let mut list = TypeBuilder::new("System.Collections.Generic", "List", TypeKind::GenericDefinition, TypeCode::Object)
        .base(&object)
        .implements(&ienumerable);
    list.set_generic(1, Some(list_factory()));
    let list = list.build();

    let s = string.clone();
    let exception = system("Exception", TypeKind::Class, TypeCode::Object)
        .base(&object)
        .build_with(move |ty, m| {
            exception_members(m, &s, ty);
            m.property(PropertyBuilder::new("Message", &s).getter(|this, _| {
                Ok(this
                    .and_then(ObjectRef::as_exception)
                    .map(|e| Value::from(e.message()))
                    .unwrap_or_default())
            }));
            m.property(PropertyBuilder::new("InnerException", ty).getter(|this, _| {
                Ok(this
                    .and_then(ObjectRef::as_exception)
                    .and_then(|e| e.inner())
                    .map(Value::Object)
                    .unwrap_or_default())
            }));
            m.method(MethodBuilder::new("ToString").returns(&s).virtual_().body(|this, _| {
                let text = this
                    .and_then(|t| ManagedException::from_object(t.clone()))
                    .map(|e| e.to_string())
                    .unwrap_or_default();
                Ok(Value::from(text))
            }));
        });
    let system_exception = |name: &str, base: &Type| exception_type(name, base, &string, &exception);
    let argument_exception = system_exception("ArgumentException", &exception);
    let invalid_cast_exception = system_exception("InvalidCastException", &exception);
    let invalid_operation_exception = system_exception("InvalidOperationException", &exception);
    let arithmetic_exception = system_exception("ArithmeticException", &exception);
    let overflow_exception = system_exception("OverflowException", &arithmetic_exception);
    let index_out_of_range_exception = system_exception("IndexOutOfRangeException", &exception);
    let not_supported_exception = system_exception("NotSupportedException", &exception);
    let null_reference_exception = system_exception("NullReferenceException", &exception);
    let key_not_found_exception = {
        let (s, e) = (string.clone(), exception.clone());
        TypeBuilder::new("System.Collections.Generic", "KeyNotFoundException", TypeKind::Class, TypeCode::Object)
            .base(&exception)
            .build_with(move |_, m| exception_members(m, &s, &e))
    };
    let python_exception = {
        let (s, e) = (string.clone(), exception.clone());
        TypeBuilder::new("Python.Runtime", "PythonException", TypeKind::Class, TypeCode::Object)
            .base(&exception)
            .build_with(move |_, m| exception_members(m, &s, &e))
    };

    let py_object = TypeBuilder::new("Python.Runtime", "PyObject", TypeKind::Class, TypeCode::Object)
        .base(&object)
        .sealed()
        .build();
    let iget_attr = TypeBuilder::new("Python.Runtime", "IGetAttr", TypeKind::Interface, TypeCode::Object)
        .method(
            MethodBuilder::new("TryGetAttr")
                .param("name", &string)
                .parameter(ParameterInfo::new("value", &object).out())
                .returns(&boolean),
        )
        .build();

    CoreTypes {
        object,
        value_type,
        enum_,
        array,
        string,
        boolean,
        char,
        sbyte,
        byte,
        int16,
        uint16,
        int32,
        uint32,
        int64,
        uint64,
        single,
        double,
        ienumerable,
        ienumerator,
        nullable,
        list,
        exception,
        argument_exception,
        invalid_cast_exception,
        invalid_operation_exception,
        overflow_exception,
        index_out_of_range_exception,
        key_not_found_exception,
        not_supported_exception,
        null_reference_exception,
        python_exception,
        py_object,
        iget_attr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_lookup_by_code() {
        let c = core();
        assert_eq!(c.for_code(TypeCode::Int32), Some(&c.int32));
        assert_eq!(c.for_code(TypeCode::String).map(Type::full_name).as_deref(), Some("System.String"));
        assert!(c.int32.is_value_type());
        assert!(!c.string.is_value_type());
    }

    #[test]
    fn test_exception_hierarchy() {
        let c = core();
        assert!(c.overflow_exception.is_subclass_of(&c.exception));
        assert_eq!(c.exception.base(), Some(&c.object));
        assert_eq!(c.exception.members().constructors.len(), 3);
        assert!(c.exception.find_property("Message").is_some());
        assert!(c.argument_exception.find_property("Message").is_some());
    }

    #[test]
    fn test_exception_constructor_sets_message() {
        let c = core();
        let ctor = c
            .argument_exception
            .members()
            .constructors
            .iter()
            .find(|m| m.parameters().len() == 1)
            .cloned()
            .unwrap();
        let obj = ctor.invoke(None, &mut [Value::string("boom")]).unwrap();
        let e = ManagedException::from_object(obj.as_object().unwrap().clone()).unwrap();
        assert_eq!(e.message(), "boom");
        assert_eq!(e.ty(), &c.argument_exception);
    }

    #[test]
    fn test_list_members_from_factory() {
        let c = core();
        let ints = c.list.make_generic_type(&[c.int32.clone()]).unwrap();
        let list = ObjectRef::alloc(&ints);
        let add = &ints.find_methods("Add")[0];
        add.invoke(Some(&list), &mut [Value::I32(5)]).unwrap();
        let count = ints.find_property("Count").unwrap().get(Some(&list)).unwrap();
        assert_eq!(count, Value::I32(1));
        let item = ints.indexer().unwrap();
        let got = item.getter().unwrap().invoke(Some(&list), &mut [Value::I32(0)]).unwrap();
        assert_eq!(got, Value::I32(5));
        assert!(item.getter().unwrap().invoke(Some(&list), &mut [Value::I32(3)]).is_err());
    }
}
