//! Uniform iteration over managed collections

use std::sync::Arc;

use super::exceptions::ManagedException;
use super::members::MethodInfo;
use super::object::ObjectRef;
use super::value::Value;

enum Source {
    /// Snapshot of an array or list
    Items(std::vec::IntoIter<Value>),
    /// Live `IEnumerator`
    Enumerator {
        target: ObjectRef,
        move_next: Arc<MethodInfo>,
        current: Arc<MethodInfo>,
    },
}

/// Iterator over an array, a `List<T>`, or anything with `GetEnumerator`
pub struct ManagedEnumerator {
    source: Source,
}

impl ManagedEnumerator {
    /// Enumerator for `obj`, or None when it is not enumerable
    pub fn new(obj: &ObjectRef) -> Result<Option<Self>, ManagedException> {
        if let Some(array) = obj.as_array() {
            return Ok(Some(Self::items(array.to_vec())));
        }
        if let Some(list) = obj.as_list() {
            let snapshot = list.lock().clone();
            return Ok(Some(Self::items(snapshot)));
        }
        let Some(get) = obj
            .ty()
            .find_methods("GetEnumerator")
            .into_iter()
            .find(|m| !m.is_static() && m.parameters().is_empty())
        else {
            return Ok(None);
        };
        let value = get.invoke(Some(obj), &mut []).map_err(|e| e.into_exception())?;
        match value {
            Value::Object(enumerator) => Self::from_enumerator(enumerator).map(Some),
            _ => Err(ManagedException::invalid_operation("GetEnumerator returned null")),
        }
    }

    fn items(values: Vec<Value>) -> Self {
        ManagedEnumerator { source: Source::Items(values.into_iter()) }
    }

    /// Drive an object that already is an enumerator
    pub fn from_enumerator(target: ObjectRef) -> Result<Self, ManagedException> {
        let ty = target.ty().clone();
        let move_next = ty.find_methods("MoveNext").into_iter().find(|m| m.parameters().is_empty());
        let current = ty.find_property("Current").and_then(|p| p.getter().cloned());
        match (move_next, current) {
            (Some(move_next), Some(current)) => Ok(ManagedEnumerator {
                source: Source::Enumerator { target, move_next, current },
            }),
            _ => Err(ManagedException::invalid_operation(format!(
                "{} is not an enumerator",
                ty.full_name()
            ))),
        }
    }

    /// Is `obj` something [`new`](Self::new) accepts
    pub fn is_enumerable(obj: &ObjectRef) -> bool {
        obj.as_array().is_some()
            || obj.as_list().is_some()
            || !obj.ty().find_methods("GetEnumerator").is_empty()
    }
}

impl Iterator for ManagedEnumerator {
    type Item = Result<Value, ManagedException>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.source {
            Source::Items(items) => items.next().map(Ok),
            Source::Enumerator { target, move_next, current } => {
                match move_next.invoke(Some(target), &mut []) {
                    Ok(Value::Bool(true)) => {
                        Some(current.invoke(Some(target), &mut []).map_err(|e| e.into_exception()))
                    }
                    Ok(_) => None,
                    Err(e) => Some(Err(e.into_exception())),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managed::{core, MethodBuilder, PropertyBuilder, TypeBuilder};

    #[test]
    fn test_array_and_list_enumerate_in_order() {
        let c = core();
        let arr = ObjectRef::array_from(&c.int32, vec![Value::I32(1), Value::I32(2)]).unwrap();
        let got: Vec<Value> = ManagedEnumerator::new(&arr).unwrap().unwrap().map(|v| v.unwrap()).collect();
        assert_eq!(got, vec![Value::I32(1), Value::I32(2)]);

        let list_ty = c.list.make_generic_type(&[c.string.clone()]).unwrap();
        let list = ObjectRef::new_list(&list_ty, vec![Value::string("a")]);
        assert_eq!(ManagedEnumerator::new(&list).unwrap().unwrap().count(), 1);
    }

    #[test]
    fn test_custom_enumerator_is_driven() {
        let c = core();
        let counter = TypeBuilder::class("Demo", "Countdown")
            .implements(&c.ienumerator)
            .field("Left", &c.int32)
            .method(MethodBuilder::new("MoveNext").returns(&c.boolean).body(|this, _| {
                let this = this.unwrap();
                let left = this.field(0).as_i128().unwrap_or(0);
                this.set_field(0, Value::I32(left as i32 - 1));
                Ok(Value::Bool(left > 0))
            }))
            .property(PropertyBuilder::new("Current", &c.object).getter(|this, _| Ok(this.unwrap().field(0))))
            .build();
        let obj = ObjectRef::alloc(&counter);
        obj.set_field(0, Value::I32(3));
        let seen: Vec<Value> = ManagedEnumerator::from_enumerator(obj).unwrap().map(|v| v.unwrap()).collect();
        assert_eq!(seen, vec![Value::I32(2), Value::I32(1), Value::I32(0)]);
    }

    #[test]
    fn test_plain_object_is_not_enumerable() {
        let obj = ObjectRef::alloc(&core().object);
        assert!(!ManagedEnumerator::is_enumerable(&obj));
        assert!(ManagedEnumerator::new(&obj).unwrap().is_none());
    }
}
