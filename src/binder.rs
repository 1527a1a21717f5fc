//! Overload resolution
//!
//! A [`MethodBinder`] holds one method group. Binding a native call runs in
//! three passes: arity (positional count, keywords, defaults, omitted out
//! parameters, a trailing params array), conversion of every argument of each
//! surviving candidate, and ranking of the candidates that converted. The
//! lowest precedence score wins; equal scores prefer the more derived
//! declaring type.

use std::sync::Arc;

use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::clr_object::get_managed_object;
use crate::converter::{to_managed, to_python};
use crate::error::{BridgeError, ConversionError, Result};
use crate::exceptions::{rethrow_last, unwrap_invoke};
use crate::managed::{core, MethodInfo, ObjectRef, ParameterInfo, Type, TypeCode, Value};
use crate::reference::{BorrowedReference, NewReference};
use crate::runtime::ffi::dict::{dict_pairs, PyDict_Check};
use crate::runtime::ffi::gil::allow_threads;
use crate::runtime::ffi::scalar::{unicode_as_str, PyBool_Check, PyFloat_Check, PyLong_Check, PyUnicode_Check, Py_None};
use crate::runtime::ffi::sequence::PySequence_Check;
use crate::runtime::ffi::tuple::{tuple_from_vec, tuple_items, PyTuple_Check};
use crate::runtime::ffi::types::obj_type_name;
use crate::runtime::ffi::PyObject;

pub type ArgVec = SmallVec<[*mut PyObject; 8]>;

type ValueVec = SmallVec<[Value; 8]>;

/// Arguments of one native call, borrowed from the caller's tuple and dict
#[derive(Default)]
pub struct CallArgs {
    pub positional: ArgVec,
    pub keywords: Vec<(String, *mut PyObject)>,
}

impl CallArgs {
    /// Split an `(args, kwds)` pair as passed to `tp_call`
    ///
    /// # Safety
    /// `args` must be a tuple or null, `kwds` a dict or null; both must
    /// outlive the returned value
    pub unsafe fn from_native(args: *mut PyObject, kwds: *mut PyObject) -> Result<Self> {
        let mut call = CallArgs::default();
        if !args.is_null() {
            if !PyTuple_Check(args) {
                return Err(BridgeError::InvalidArgument("positional arguments must be a tuple".into()));
            }
            call.positional.extend_from_slice(tuple_items(args));
        }
        if !kwds.is_null() {
            if !PyDict_Check(kwds) {
                return Err(BridgeError::InvalidArgument("keyword arguments must be a dict".into()));
            }
            for (key, value) in dict_pairs(kwds) {
                let name = unicode_as_str(key)
                    .ok_or_else(|| BridgeError::InvalidArgument("keywords must be strings".into()))?;
                call.keywords.push((name.to_owned(), value));
            }
        }
        Ok(call)
    }

    pub fn positional(items: &[*mut PyObject]) -> Self {
        CallArgs {
            positional: SmallVec::from_slice(items),
            keywords: Vec::new(),
        }
    }

    fn keyword(&self, name: &str) -> Option<*mut PyObject> {
        self.keywords.iter().find(|(k, _)| k == name).map(|(_, v)| *v)
    }

    fn without_first(&self) -> CallArgs {
        CallArgs {
            positional: SmallVec::from_slice(&self.positional[1..]),
            keywords: self.keywords.clone(),
        }
    }

    /// `(int, str, name=float)`: every argument's native type name
    ///
    /// # Safety
    /// Every argument must be live
    pub unsafe fn describe(&self) -> String {
        let mut parts: Vec<String> = self.positional.iter().map(|&a| obj_type_name(a).to_owned()).collect();
        for (name, value) in &self.keywords {
            parts.push(format!("{}={}", name, obj_type_name(*value)));
        }
        format!("({})", parts.join(", "))
    }
}

/// Where one parameter's value comes from
enum Source {
    Positional(usize),
    Keyword(*mut PyObject),
    Default(Value),
    /// Out parameter the caller left off
    Omitted,
    /// A single sequence handed straight to the params array
    ParamsPassThrough(usize),
    /// Positional tail from this index packed into the params array
    ParamsPack(usize),
}

/// A selected overload with converted arguments, ready to run
pub struct Binding {
    pub method: Arc<MethodInfo>,
    pub target: Option<ObjectRef>,
    pub args: Vec<Value>,
}

impl Binding {
    /// Run the method and convert the result, packing by-ref values
    ///
    /// # Safety
    /// The interpreter lock must be held
    pub unsafe fn invoke(mut self) -> Result<NewReference> {
        let result = call_managed(&self.method, self.target.as_ref(), &mut self.args)?;
        pack_result(&self.method, &result, &self.args)
    }

    /// Run a constructor against a fresh instance of `ty`
    pub fn construct_as(mut self, ty: &Type) -> Result<ObjectRef> {
        let method = self.method.clone();
        let blocking = method.may_block() && crate::config().binder.allow_threads_for_blocking;
        let outcome = if blocking {
            allow_threads(|| method.construct_as(ty, &mut self.args))
        } else {
            method.construct_as(ty, &mut self.args)
        };
        outcome.map_err(unwrap_invoke)
    }
}

fn call_managed(method: &MethodInfo, target: Option<&ObjectRef>, args: &mut [Value]) -> Result<Value> {
    let blocking = method.may_block() && crate::config().binder.allow_threads_for_blocking;
    let outcome = if blocking {
        trace!(event = "allow_threads", method = %method.signature(), "releasing interpreter lock");
        allow_threads(|| method.invoke(target, args))
    } else {
        method.invoke(target, args)
    };
    outcome.map_err(unwrap_invoke)
}

/// Result alone, the single out value of a void method, or a tuple of the
/// result followed by every by-ref value in declaration order
unsafe fn pack_result(method: &MethodInfo, result: &Value, args: &[Value]) -> Result<NewReference> {
    let params = method.parameters();
    let by_ref: SmallVec<[usize; 4]> = params
        .iter()
        .enumerate()
        .filter(|(_, p)| p.is_by_ref())
        .map(|(i, _)| i)
        .collect();
    let returned = |value: &Value| match method.return_type() {
        Some(ty) => to_python(value, ty),
        None => Ok(NewReference::from_nullable(BorrowedReference::from_raw(Py_None()))),
    };
    if by_ref.is_empty() {
        return returned(result);
    }
    if method.return_type().is_none() && by_ref.len() == 1 {
        let i = by_ref[0];
        return to_python(&args[i], params[i].ty());
    }
    let mut items: Vec<NewReference> = Vec::with_capacity(by_ref.len() + 1);
    items.push(returned(result)?);
    for &i in &by_ref {
        items.push(to_python(&args[i], params[i].ty())?);
    }
    let tuple = tuple_from_vec(items.into_iter().map(NewReference::into_raw).collect());
    if tuple.is_null() {
        return Err(rethrow_last());
    }
    Ok(NewReference::from_raw(tuple))
}

/// One method group and its resolution rules
#[derive(Clone)]
pub struct MethodBinder {
    name: String,
    methods: Vec<Arc<MethodInfo>>,
}

struct Candidate {
    method: Arc<MethodInfo>,
    target: Option<ObjectRef>,
    args: ValueVec,
    score: i64,
}

impl MethodBinder {
    pub fn new(name: impl Into<String>, methods: Vec<Arc<MethodInfo>>) -> Self {
        MethodBinder {
            name: name.into(),
            methods,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn methods(&self) -> &[Arc<MethodInfo>] {
        &self.methods
    }

    pub fn add(&mut self, method: Arc<MethodInfo>) {
        self.methods.push(method);
    }

    /// Select the overload for `args` called on `target`
    ///
    /// Without a target an instance method takes its target from the first
    /// positional argument when that is a wrapper of the declaring type.
    ///
    /// # Safety
    /// The interpreter lock must be held; every argument must be live
    pub unsafe fn bind(&self, target: Option<&ObjectRef>, args: &CallArgs) -> Result<Binding> {
        let shifted = (!args.positional.is_empty()).then(|| args.without_first());
        let mut planned: SmallVec<[(Arc<MethodInfo>, Option<ObjectRef>, &CallArgs, SmallVec<[Source; 8]>); 4]> =
            SmallVec::new();
        for method in &self.methods {
            let (this, call) = match (target, method.is_static() || method.is_constructor()) {
                (Some(t), false) => (Some(t.clone()), args),
                (_, true) => (None, args),
                (None, false) => match (unbound_target(method, args), &shifted) {
                    (Some(t), Some(rest)) => (Some(t), rest),
                    _ => continue,
                },
            };
            if let Some(plan) = plan(method, call) {
                planned.push((method.clone(), this, call, plan));
            }
        }

        let needs_resolution = planned.len() > 1;
        let mut matches: SmallVec<[Candidate; 4]> = SmallVec::new();
        let mut last_error = None;
        for (method, this, call, plan) in planned.iter() {
            match convert_all(method, call, plan, needs_resolution) {
                Ok(values) => matches.push(Candidate {
                    method: method.clone(),
                    target: this.clone(),
                    args: values,
                    score: precedence(method),
                }),
                Err(e) => {
                    trace!(event = "overload_rejected", method = %method.signature(), error = %e);
                    last_error = Some(e);
                }
            }
        }

        if matches.is_empty() {
            if planned.len() == 1 {
                if let Some(e) = last_error {
                    return Err(BridgeError::Conversion(e));
                }
            }
            let signature = args.describe();
            debug!(event = "overload_no_match", method = %self.name, signature = %signature, candidates = self.methods.len());
            return Err(BridgeError::NoMatch {
                method: self.name.clone(),
                signature,
            });
        }

        let best = select(&self.name, matches)?;
        debug!(event = "overload_selected", method = %best.method.signature(), score = best.score);
        Ok(Binding {
            method: best.method,
            target: best.target,
            args: best.args.into_vec(),
        })
    }

    /// Bind and run, returning the converted result
    ///
    /// # Safety
    /// As for [`MethodBinder::bind`]
    pub unsafe fn invoke(&self, target: Option<&ObjectRef>, args: &CallArgs) -> Result<NewReference> {
        self.bind(target, args)?.invoke()
    }
}

/// First argument as the target of an unbound instance call
unsafe fn unbound_target(method: &MethodInfo, args: &CallArgs) -> Option<ObjectRef> {
    let first = *args.positional.first()?;
    let obj = get_managed_object(first)?;
    method.declaring_type().is_assignable_from(obj.ty()).then_some(obj)
}

/// Source of every parameter, or None when the call shape cannot fit
unsafe fn plan(method: &MethodInfo, args: &CallArgs) -> Option<SmallVec<[Source; 8]>> {
    let params = method.parameters();
    let n = args.positional.len();
    let variadic = params.last().is_some_and(ParameterInfo::is_params);
    let fixed = params.len() - variadic as usize;
    if n > fixed && !variadic {
        return None;
    }
    for (name, _) in &args.keywords {
        match params.iter().position(|p| p.name() == name) {
            Some(i) if i >= n && i < fixed => {}
            _ => return None,
        }
    }
    let mut sources = SmallVec::new();
    for (i, p) in params[..fixed].iter().enumerate() {
        let source = if i < n {
            Source::Positional(i)
        } else if let Some(ob) = args.keyword(p.name()) {
            Source::Keyword(ob)
        } else if let Some(default) = p.default_value() {
            Source::Default(default.clone())
        } else if p.is_out() {
            Source::Omitted
        } else {
            return None;
        };
        sources.push(source);
    }
    if variadic {
        let rest = n.saturating_sub(fixed);
        let single_sequence =
            rest == 1 && PySequence_Check(args.positional[fixed]) != 0 && !PyUnicode_Check(args.positional[fixed]);
        sources.push(if single_sequence {
            Source::ParamsPassThrough(fixed)
        } else {
            Source::ParamsPack(fixed.min(n))
        });
    }
    Some(sources)
}

unsafe fn convert_all(
    method: &MethodInfo,
    args: &CallArgs,
    plan: &[Source],
    needs_resolution: bool,
) -> Result<ValueVec, ConversionError> {
    let mut values = ValueVec::with_capacity(plan.len());
    for (p, source) in method.parameters().iter().zip(plan) {
        let value = match source {
            Source::Positional(_) if p.is_out() => Value::default_for(p.ty()),
            Source::Positional(i) | Source::ParamsPassThrough(i) => {
                convert_arg(args.positional[*i], p.ty(), needs_resolution)?
            }
            Source::Keyword(ob) => convert_arg(*ob, p.ty(), needs_resolution)?,
            Source::Default(v) => v.clone(),
            Source::Omitted => Value::default_for(p.ty()),
            Source::ParamsPack(start) => pack_params(&args.positional[*start..], p.ty())?,
        };
        values.push(value);
    }
    Ok(values)
}

unsafe fn convert_arg(ob: *mut PyObject, ty: &Type, needs_resolution: bool) -> Result<Value, ConversionError> {
    if needs_resolution && !alias_matches(ob, ty) {
        return Err(ConversionError::mismatch(ty.full_name(), obj_type_name(ob)));
    }
    to_managed(ob, ty)
}

/// With several candidates in play, the argument's own native type must
/// agree with a primitive parameter: `bool` only for Boolean, `int` for the
/// numeric codes, `float` for floating codes, `str` for String and Char
unsafe fn alias_matches(ob: *mut PyObject, ty: &Type) -> bool {
    if !ty.is_primitive() {
        return true;
    }
    let code = ty.type_code();
    if PyBool_Check(ob) {
        code == TypeCode::Boolean
    } else if PyLong_Check(ob) {
        code.is_integer() || code.is_float()
    } else if PyFloat_Check(ob) {
        code.is_float()
    } else if PyUnicode_Check(ob) {
        matches!(code, TypeCode::String | TypeCode::Char)
    } else {
        true
    }
}

unsafe fn pack_params(items: &[*mut PyObject], array_ty: &Type) -> Result<Value, ConversionError> {
    let elem = array_ty
        .element_type()
        .ok_or_else(|| ConversionError::mismatch(array_ty.full_name(), "params array"))?;
    let mut values = Vec::with_capacity(items.len());
    for (index, &ob) in items.iter().enumerate() {
        let v = to_managed(ob, elem).map_err(|e| ConversionError::Element {
            index,
            source: Box::new(e),
        })?;
        values.push(v);
    }
    ObjectRef::array_from(elem, values)
        .map(Value::Object)
        .map_err(|e| ConversionError::mismatch(array_ty.full_name(), e.message()))
}

/// Overload precedence; lower is preferred
pub fn precedence(method: &MethodInfo) -> i64 {
    let mut score = 0;
    if method.is_static() {
        score += 3000;
    }
    if method.is_generic() {
        score += 1;
    }
    score + method.parameters().iter().map(|p| arg_precedence(p.ty())).sum::<i64>()
}

/// Parameter precedence: `object` least specific, then `object[]`, then the
/// fixed primitive order, with arrays ranked by their element
pub fn arg_precedence(ty: &Type) -> i64 {
    let c = core();
    if ty == &c.object {
        return 3000;
    }
    if let Some(elem) = ty.element_type() {
        if elem == &c.object {
            return 2500;
        }
        return 400 + arg_precedence(elem);
    }
    if ty.is_primitive() {
        return match ty.type_code() {
            TypeCode::SByte => 10,
            TypeCode::Byte => 11,
            TypeCode::Int16 => 12,
            TypeCode::UInt16 => 13,
            TypeCode::Int32 => 14,
            TypeCode::UInt32 => 15,
            TypeCode::Int64 => 16,
            TypeCode::UInt64 => 17,
            TypeCode::Single => 20,
            TypeCode::Double => 21,
            TypeCode::String => 30,
            TypeCode::Char => 31,
            TypeCode::Boolean => 40,
            TypeCode::Object => 3000,
        };
    }
    if ty.is_class() || ty.is_interface() || ty.is_enum() || ty.is_value_type() || ty.is_generic_instance() {
        return 1;
    }
    2000
}

/// Lowest score wins. Among candidates sharing that score, one declared on
/// a more derived type shadows the base declaration; what remains must come
/// from a single declaring type, and the earliest of those is taken
fn select(name: &str, matches: SmallVec<[Candidate; 4]>) -> Result<Candidate> {
    let Some(min) = matches.iter().map(|c| c.score).min() else {
        return Err(BridgeError::NoMatch {
            method: name.to_owned(),
            signature: "()".into(),
        });
    };
    let mut tied: SmallVec<[Candidate; 4]> = matches.into_iter().filter(|c| c.score == min).collect();
    let shadowed = |c: &Candidate| {
        let mine = c.method.declaring_type();
        tied.iter().any(|o| {
            let theirs = o.method.declaring_type();
            theirs != mine && theirs.is_subclass_of(mine)
        })
    };
    let survivors: SmallVec<[usize; 4]> = (0..tied.len()).filter(|&i| !shadowed(&tied[i])).collect();
    let Some(&first) = survivors.first() else {
        return Err(BridgeError::NoMatch {
            method: name.to_owned(),
            signature: "()".into(),
        });
    };
    let owner = tied[first].method.declaring_type();
    if let Some(&other) = survivors.iter().find(|&&i| tied[i].method.declaring_type() != owner) {
        return Err(BridgeError::AmbiguousOverload {
            method: name.to_owned(),
            first: describe_method(&tied[first].method),
            second: describe_method(&tied[other].method),
        });
    }
    Ok(tied.swap_remove(first))
}

fn describe_method(method: &MethodInfo) -> String {
    format!("{}.{}", method.declaring_type().name(), method.signature())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managed::{MethodBuilder, TypeBuilder};
    use crate::runtime::ffi::refcount::Py_DECREF;
    use crate::runtime::ffi::scalar::{long_from_i128, long_value, unicode_from_str, PyFloat_FromDouble};
    use crate::runtime::ffi::tuple::tuple_items;
    use crate::testing::runtime;

    fn tagged(name: &str, tag: &'static str, params: &[(&str, &Type)]) -> MethodBuilder {
        let mut m = MethodBuilder::new(name).static_().returns(&core().string);
        for (pname, ty) in params {
            m = m.param(pname, ty);
        }
        m.body(move |_, _| Ok(Value::string(tag)))
    }

    unsafe fn call_tag(binder: &MethodBinder, args: &[*mut PyObject]) -> Result<String> {
        let result = binder.invoke(None, &CallArgs::positional(args))?;
        Ok(unicode_as_str(result.as_ptr()).unwrap_or_default().to_owned())
    }

    #[test]
    fn test_string_overload_beats_object() {
        runtime(|| unsafe {
            let c = core();
            let ty = TypeBuilder::class("Demo", "Pick")
                .method(tagged("F", "object", &[("x", &c.object)]))
                .method(tagged("F", "string", &[("x", &c.string)]))
                .build();
            let binder = MethodBinder::new("F", ty.find_methods("F"));
            let s = unicode_from_str("hello");
            assert_eq!(call_tag(&binder, &[s]).unwrap(), "string");
            let n = long_from_i128(1);
            assert_eq!(call_tag(&binder, &[n]).unwrap(), "object");
            Py_DECREF(s);
            Py_DECREF(n);
        });
    }

    #[test]
    fn test_int_overload_beats_long() {
        runtime(|| unsafe {
            let c = core();
            let ty = TypeBuilder::class("Demo", "Widths")
                .method(tagged("F", "long", &[("x", &c.int64)]))
                .method(tagged("F", "int", &[("x", &c.int32)]))
                .build();
            let binder = MethodBinder::new("F", ty.find_methods("F"));
            let small = long_from_i128(7);
            assert_eq!(call_tag(&binder, &[small]).unwrap(), "int");
            let big = long_from_i128(1 << 40);
            assert_eq!(call_tag(&binder, &[big]).unwrap(), "long");
            Py_DECREF(small);
            Py_DECREF(big);
        });
    }

    #[test]
    fn test_arity_selects_and_no_match_names_arguments() {
        runtime(|| unsafe {
            let c = core();
            let ty = TypeBuilder::class("Demo", "Arity")
                .method(tagged("Method", "one", &[("a", &c.int32)]))
                .method(tagged("Method", "two", &[("a", &c.int32), ("b", &c.int32)]))
                .build();
            let binder = MethodBinder::new("Method", ty.find_methods("Method"));
            let one = long_from_i128(1);
            assert_eq!(call_tag(&binder, &[one]).unwrap(), "one");
            assert_eq!(call_tag(&binder, &[one, one]).unwrap(), "two");
            match call_tag(&binder, &[]) {
                Err(BridgeError::NoMatch { method, signature }) => {
                    assert_eq!(method, "Method");
                    assert_eq!(signature, "()");
                }
                other => panic!("unexpected {:?}", other.map(|_| ())),
            }
            let f = PyFloat_FromDouble(1.5);
            let err = call_tag(&binder, &[one, f, one]).unwrap_err();
            assert!(err.to_string().contains("(int, float, int)"), "{}", err);
            Py_DECREF(one);
            Py_DECREF(f);
        });
    }

    #[test]
    fn test_keywords_and_defaults_fill_parameters() {
        runtime(|| unsafe {
            let c = core();
            let ty = TypeBuilder::class("Demo", "Kw")
                .method(
                    MethodBuilder::new("Sum")
                        .static_()
                        .returns(&c.int32)
                        .param("a", &c.int32)
                        .parameter(ParameterInfo::new("b", &c.int32).with_default(Value::I32(10)))
                        .body(|_, args| {
                            let a = args[0].as_i128().unwrap_or(0);
                            let b = args[1].as_i128().unwrap_or(0);
                            Ok(Value::I32((a + b) as i32))
                        }),
                )
                .build();
            let binder = MethodBinder::new("Sum", ty.find_methods("Sum"));
            let one = long_from_i128(1);
            let r = binder.invoke(None, &CallArgs::positional(&[one])).unwrap();
            assert_eq!(long_value(r.as_ptr()), 11);

            let five = long_from_i128(5);
            let call = CallArgs {
                positional: SmallVec::from_slice(&[one]),
                keywords: vec![("b".to_owned(), five)],
            };
            let r = binder.invoke(None, &call).unwrap();
            assert_eq!(long_value(r.as_ptr()), 6);

            let bad = CallArgs {
                positional: SmallVec::from_slice(&[one]),
                keywords: vec![("c".to_owned(), five)],
            };
            assert!(matches!(binder.bind(None, &bad), Err(BridgeError::NoMatch { .. })));
            Py_DECREF(one);
            Py_DECREF(five);
        });
    }

    #[test]
    fn test_out_parameters_are_packed() {
        runtime(|| unsafe {
            let c = core();
            let ty = TypeBuilder::class("Demo", "Outs")
                .method(
                    MethodBuilder::new("TryParse")
                        .static_()
                        .returns(&c.boolean)
                        .param("text", &c.string)
                        .parameter(ParameterInfo::new("value", &c.int32).out())
                        .body(|_, args| {
                            let parsed = args[0].as_str().and_then(|s| s.parse::<i32>().ok());
                            args[1] = Value::I32(parsed.unwrap_or(0));
                            Ok(Value::Bool(parsed.is_some()))
                        }),
                )
                .method(
                    MethodBuilder::new("Fill")
                        .static_()
                        .parameter(ParameterInfo::new("value", &c.int32).out())
                        .body(|_, args| {
                            args[0] = Value::I32(42);
                            Ok(Value::Null)
                        }),
                )
                .build();
            let text = unicode_from_str("17");
            let parse = MethodBinder::new("TryParse", ty.find_methods("TryParse"));
            let r = parse.invoke(None, &CallArgs::positional(&[text])).unwrap();
            let items = tuple_items(r.as_ptr());
            assert_eq!(items.len(), 2);
            assert_eq!(items[0], crate::runtime::ffi::scalar::Py_True());
            assert_eq!(long_value(items[1]), 17);

            let fill = MethodBinder::new("Fill", ty.find_methods("Fill"));
            let r = fill.invoke(None, &CallArgs::default()).unwrap();
            assert_eq!(long_value(r.as_ptr()), 42);
            Py_DECREF(text);
        });
    }

    #[test]
    fn test_params_array_packs_tail() {
        runtime(|| unsafe {
            let c = core();
            let ty = TypeBuilder::class("Demo", "Variadic")
                .method(
                    MethodBuilder::new("Count")
                        .static_()
                        .returns(&c.int32)
                        .parameter(ParameterInfo::new("items", &c.int32.make_array_type(1)).params_array())
                        .body(|_, args| {
                            let len = args[0].as_object().and_then(|o| o.as_array()).map_or(0, |a| a.len());
                            Ok(Value::I32(len as i32))
                        }),
                )
                .build();
            let binder = MethodBinder::new("Count", ty.find_methods("Count"));
            let (a, b, d) = (long_from_i128(1), long_from_i128(2), long_from_i128(3));
            let r = binder.invoke(None, &CallArgs::positional(&[a, b, d])).unwrap();
            assert_eq!(long_value(r.as_ptr()), 3);
            let r = binder.invoke(None, &CallArgs::default()).unwrap();
            assert_eq!(long_value(r.as_ptr()), 0);
            let seq = tuple_from_vec(vec![long_from_i128(4), long_from_i128(5)]);
            let r = binder.invoke(None, &CallArgs::positional(&[seq])).unwrap();
            assert_eq!(long_value(r.as_ptr()), 2);
            for ob in [a, b, d, seq] {
                Py_DECREF(ob);
            }
        });
    }

    #[test]
    fn test_more_derived_declaration_wins_tie() {
        runtime(|| unsafe {
            let c = core();
            let base = TypeBuilder::class("Demo", "TieBase").method(tagged("G", "base", &[("x", &c.int32)])).build();
            let derived = TypeBuilder::class("Demo", "TieDerived")
                .base(&base)
                .method(tagged("G", "derived", &[("y", &c.int32)]))
                .build();
            let mut methods = base.find_methods("G");
            methods.extend(derived.members().methods.iter().cloned());
            let binder = MethodBinder::new("G", methods);
            let n = long_from_i128(3);
            assert_eq!(call_tag(&binder, &[n]).unwrap(), "derived");
            Py_DECREF(n);
        });
    }

    #[test]
    fn test_unrelated_declaring_types_are_ambiguous() {
        runtime(|| unsafe {
            let c = core();
            let left = TypeBuilder::class("Demo", "Left").method(tagged("H", "left", &[("x", &c.int32)])).build();
            let right = TypeBuilder::class("Demo", "Right").method(tagged("H", "right", &[("x", &c.int32)])).build();
            let mut methods = left.find_methods("H");
            methods.extend(right.find_methods("H"));
            let binder = MethodBinder::new("H", methods);
            let n = long_from_i128(3);
            assert!(matches!(call_tag(&binder, &[n]), Err(BridgeError::AmbiguousOverload { .. })));
            Py_DECREF(n);
        });
    }

    #[test]
    fn test_lower_score_after_an_unrelated_tie_still_wins() {
        runtime(|| unsafe {
            let c = core();
            let left = TypeBuilder::class("Demo", "PickLeft")
                .method(tagged("H", "left int", &[("x", &c.int32)]))
                .method(tagged("H", "left sbyte", &[("x", &c.sbyte)]))
                .build();
            let right = TypeBuilder::class("Demo", "PickRight").method(tagged("H", "right int", &[("x", &c.int32)])).build();
            let by_sig = |ty: &Type, param: &Type| {
                ty.find_methods("H").into_iter().find(|m| m.parameters()[0].ty() == param).unwrap()
            };
            let tie_first = vec![by_sig(&left, &c.int32), by_sig(&right, &c.int32), by_sig(&left, &c.sbyte)];
            let mut best_first = tie_first.clone();
            best_first.rotate_right(1);

            let n = long_from_i128(3);
            for methods in [tie_first, best_first] {
                let binder = MethodBinder::new("H", methods);
                assert_eq!(call_tag(&binder, &[n]).unwrap(), "left sbyte");
            }
            Py_DECREF(n);
        });
    }

    #[test]
    fn test_related_reference_parameters_rank_equally() {
        runtime(|| unsafe {
            let animal = TypeBuilder::class("Zoo", "Animal").default_constructor().build();
            let dog = TypeBuilder::class("Zoo", "Dog").base(&animal).default_constructor().build();
            let cat = TypeBuilder::class("Zoo", "Cat").base(&animal).default_constructor().build();
            assert_eq!(arg_precedence(&dog), arg_precedence(&animal));
            assert_eq!(arg_precedence(&dog), arg_precedence(&cat));

            // Equal scores on one declaring type: declaration order decides
            let ty = TypeBuilder::class("Zoo", "Keeper")
                .method(tagged("Feed", "animal", &[("a", &animal)]))
                .method(tagged("Feed", "dog", &[("d", &dog)]))
                .build();
            let binder = MethodBinder::new("Feed", ty.find_methods("Feed"));
            let rex = crate::clr_object::wrap(&ObjectRef::alloc(&dog), &dog).unwrap();
            assert_eq!(call_tag(&binder, &[rex.as_ptr()]).unwrap(), "animal");
        });
    }

    #[test]
    fn test_single_candidate_reports_conversion_error() {
        runtime(|| unsafe {
            let c = core();
            let ty = TypeBuilder::class("Demo", "Narrow").method(tagged("N", "n", &[("x", &c.byte)])).build();
            let binder = MethodBinder::new("N", ty.find_methods("N"));
            let big = long_from_i128(256);
            let err = call_tag(&binder, &[big]).unwrap_err();
            assert!(matches!(&err, BridgeError::Conversion(e) if e.is_overflow()), "{}", err);
            Py_DECREF(big);
        });
    }

    #[test]
    fn test_precedence_order() {
        let c = core();
        assert!(arg_precedence(&c.int32) < arg_precedence(&c.int64));
        assert!(arg_precedence(&c.double) < arg_precedence(&c.string));
        assert!(arg_precedence(&c.string) < arg_precedence(&c.boolean));
        assert_eq!(arg_precedence(&c.object.make_array_type(1)), 2500);
        assert_eq!(arg_precedence(&c.int32.make_array_type(1)), 414);
        assert!(arg_precedence(&c.boolean) < arg_precedence(&c.object));
    }
}
