// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 The objvm Authors

//! The call protocol: method resolution, inline caching, and
//! positional/named argument binding.
//!
//! A [`CallSite`] owns one [`MethodCacheLine`]; callers are expected to
//! keep one per lexical call site (a host function that calls the same
//! selector repeatedly reuses the same `CallSite` the way a compiled call
//! instruction would reuse its operand cache slot). Lookups that miss the
//! cache walk the super-class chain; a selector no class in the chain
//! implements falls back to `method_missing`, and a class with no
//! `method_missing` either makes that fallback loop infinite — so a
//! receiver's `Object` class must always terminate it (see
//! `builtins::install_object_method_missing`).

use crate::class::ClassData;
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::function::FunctionData;
use crate::ic::{IvarCacheLine, MethodCacheLine};
use crate::object::Payload;
use crate::runtime::Runtime;
use crate::symbol::symbol;
use crate::value::Value;

/// A reusable dispatch cache for one call site.
pub struct CallSite {
    cache: MethodCacheLine,
}

impl CallSite {
    #[must_use]
    pub const fn new() -> Self {
        Self { cache: MethodCacheLine::new() }
    }
}

impl Default for CallSite {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve_method(class: Value, selector: Value) -> Option<Value> {
    let mut current = Some(class);
    while let Some(c) = current {
        let obj = c.as_object()?;
        let Payload::Class(data) = &obj.get().payload else { return None };
        let data = data.borrow();
        if let Some(method) = data.get_method(selector) {
            return Some(method);
        }
        current = data.super_class;
    }
    None
}

/// Dispatch `selector` on `receiver` with purely positional arguments,
/// consulting and updating `site`'s inline cache.
pub fn call(rt: &Runtime, site: &CallSite, receiver: Value, selector: Value, args: &[Value]) -> Result<Value> {
    call_with_named_arguments(rt, site, receiver, selector, args, &[])
}

/// Dispatch with both positional and named arguments.
pub fn call_with_named_arguments(
    rt: &Runtime,
    site: &CallSite,
    receiver: Value,
    selector: Value,
    positional: &[Value],
    named: &[(Value, Value)],
) -> Result<Value> {
    let class = rt.class_of(receiver);
    let Some(method) = site.cache.get_or_resolve(class, || resolve_method(class, selector)) else {
        return call_method_missing(rt, class, receiver, selector, positional);
    };
    invoke_method(rt, receiver, method, positional, named)
}

/// Dispatch without going through any persistent cache — for reflective
/// call sites (`send`) where there is no stable call-site identity to
/// attach a cache line to.
pub fn call_with_arguments(rt: &Runtime, receiver: Value, selector: Value, args: &[Value]) -> Result<Value> {
    let site = CallSite::new();
    call(rt, &site, receiver, selector, args)
}

fn call_method_missing(rt: &Runtime, class: Value, receiver: Value, selector: Value, args: &[Value]) -> Result<Value> {
    let missing_selector = Value::symbol(symbol("method_missing"));
    let Some(method) = resolve_method(class, missing_selector) else {
        method_missing_abort(rt, receiver, selector);
    };
    let args_array = rt.gc.allocate(
        rt.builtins.array,
        &crate::object::ARRAY,
        Payload::Array(std::cell::RefCell::new(args.to_vec())),
        &[receiver, selector],
    );
    invoke_method(rt, receiver, method, &[selector, Value::heap(args_array)], &[])
}

/// A selector no class in the receiver's chain implements, and that has
/// no `method_missing` fallback either, is a fatal condition: there is no
/// recoverable `Error` variant for it (see `error` module docs).
fn method_missing_abort(rt: &Runtime, receiver: Value, selector: Value) -> ! {
    let class_name = rt
        .class_of(receiver)
        .as_object()
        .and_then(|obj| match &obj.get().payload {
            Payload::Class(data) => data.borrow().name.as_symbol(),
            Payload::Plain | Payload::Str(_) | Payload::Array(_) | Payload::Map(_) | Payload::Function(_)
            | Payload::Environment(_) | Payload::Fiber(_) | Payload::Exception(_) | Payload::BoxedFloat(_) => None,
        })
        .map(crate::symbol::symbol_to_string);
    panic!(
        "unhandled selector `{:?}` sent to an instance of {}",
        selector,
        class_name.as_deref().unwrap_or("<unknown class>")
    );
}

fn invoke_method(
    rt: &Runtime,
    receiver: Value,
    method: Value,
    positional: &[Value],
    named: &[(Value, Value)],
) -> Result<Value> {
    let obj = method.as_object().ok_or(Error::TypeMismatch { expected: "Function", got: "non-object" })?;
    let Payload::Function(data) = &obj.get().payload else {
        return Err(Error::TypeMismatch { expected: "Function", got: obj.get().type_desc.name });
    };
    let bound = bind_arguments(rt, data, positional, named)?;

    let fiber_value = crate::fiber::current_fiber();
    if let Some(fv) = fiber_value {
        push_frame(fv, receiver, data.closure_env);
    }
    let result = data.invoke(rt, receiver, &bound);
    if let Some(fv) = fiber_value {
        pop_frame(fv);
    }
    result
}

fn push_frame(fiber_value: Value, self_value: Value, parent_env: Option<Value>) {
    if let Some(obj) = fiber_value.as_object() {
        if let Payload::Fiber(data) = &obj.get().payload {
            data.push_frame(Frame::with_parent_env(self_value, parent_env));
        }
    }
}

fn pop_frame(fiber_value: Value) {
    if let Some(obj) = fiber_value.as_object() {
        if let Payload::Fiber(data) = &obj.get().payload {
            data.pop_frame();
        }
    }
}

/// Bind positional and named arguments into declaration order.
///
/// Named arguments are resolved first and win their slot outright; any
/// positional arguments then fill whatever declared slots are still open,
/// left to right. A name with no matching parameter, a name supplied more
/// than once, a positional-argument count that overruns a non-variadic
/// signature, or a required slot left unfilled are all arity errors.
pub fn bind_arguments(
    rt: &Runtime,
    signature: &FunctionData,
    positional: &[Value],
    named: &[(Value, Value)],
) -> Result<Vec<Value>> {
    let sig = &signature.signature;
    let fixed = sig.positional.len();

    let mut bound: Vec<Value> = vec![Value::UNDEFINED; fixed];
    let mut filled = vec![false; fixed];

    for (name, value) in named {
        let Some(index) = sig.positional.iter().position(|p| p == name) else {
            return Err(Error::Arity(format!("no such parameter: {name:?}")));
        };
        if filled[index] {
            return Err(Error::Arity(format!("parameter {name:?} supplied more than once")));
        }
        bound[index] = *value;
        filled[index] = true;
    }

    let mut positional_iter = positional.iter().copied();
    for i in 0..fixed {
        if filled[i] {
            continue;
        }
        let Some(arg) = positional_iter.next() else { continue };
        bound[i] = arg;
        filled[i] = true;
    }

    if let Some(missing) = filled.iter().position(|f| !f) {
        return Err(Error::Arity(format!("missing required argument `{:?}`", sig.positional[missing])));
    }

    let rest: Vec<Value> = positional_iter.collect();
    if sig.is_variadic() {
        let rest_obj = rt.gc.allocate(rt.builtins.array, &crate::object::ARRAY, Payload::Array(std::cell::RefCell::new(rest)), positional);
        bound.push(Value::heap(rest_obj));
    } else if !rest.is_empty() {
        return Err(Error::Arity(format!(
            "expected at most {fixed} positional argument(s), got {}",
            positional.len()
        )));
    }

    Ok(bound)
}

/// Build a closure: liberate the currently running frame (if any) onto the
/// heap and bind the new function's `closure_env` to it, so a reference
/// with `level >= 1` inside `body` resolves into the defining scope after
/// that native frame has long since returned (spec §4.7).
///
/// `captured_locals` is the number of local slots the defining frame needs
/// preserved — the compiler's analysis of which locals `body` actually
/// reaches determines this in a real front-end; callers here pass the
/// count that covers everything the closure captures.
#[must_use]
pub fn create_closure(
    rt: &Runtime,
    name: Value,
    signature: crate::function::Signature,
    body: crate::function::NativeBody,
    captured_locals: usize,
) -> Value {
    let closure_env = crate::fiber::current_fiber().and_then(|fv| {
        let obj = fv.as_object()?;
        let Payload::Fiber(data) = &obj.get().payload else { return None };
        data.liberate_top_frame(rt, captured_locals)
    });
    let function_data = FunctionData::new(name, signature, body, closure_env);
    let obj = rt.gc.allocate(rt.builtins.function, &crate::object::FUNCTION, Payload::Function(function_data), &[]);
    Value::heap(obj)
}

/// Read a `(level, index)` lexical reference relative to the currently
/// running frame. `level` 0 is the running frame's own locals; `level >= 1`
/// walks into the enclosing scope a closure was built from.
#[must_use]
pub fn read_lexical(level: usize, index: usize) -> Value {
    with_current_fiber_data(|data| data.read_lexical(level, index)).unwrap_or(Value::UNDEFINED)
}

/// Write a `(level, index)` lexical reference, per the same addressing as
/// [`read_lexical`].
pub fn write_lexical(level: usize, index: usize, value: Value) {
    with_current_fiber_data(|data| data.assign_lexical(level, index, value));
}

fn with_current_fiber_data<R>(f: impl FnOnce(&crate::fiber::FiberData) -> R) -> Option<R> {
    let fv = crate::fiber::current_fiber()?;
    let obj = fv.as_object()?;
    let Payload::Fiber(data) = &obj.get().payload else { return None };
    Some(f(data))
}

/// Allocate a bare instance of `class` with no instance variables set and
/// `initialize` left uncalled.
#[must_use]
pub fn create_object_without_initialize(rt: &Runtime, class: Value) -> Value {
    let obj = rt.gc.allocate(class, &crate::object::PLAIN, Payload::Plain, &[class]);
    Value::heap(obj)
}

/// Allocate an instance of `class` and, if its own method table (not its
/// superclass chain — see `ClassData::initialize`) defines `initialize`,
/// invoke it on the new instance with `args`.
pub fn create_object_with_arguments(rt: &Runtime, class: Value, args: &[Value]) -> Result<Value> {
    let instance = create_object_without_initialize(rt, class);
    let initialize = class.as_object().and_then(|obj| match &obj.get().payload {
        Payload::Class(data) => data.borrow().initialize(),
        _ => None,
    });
    if let Some(initialize) = initialize {
        invoke_method(rt, instance, initialize, args, &[])?;
    }
    Ok(instance)
}

/// Convenience wrapper for the common case of purely positional
/// constructor arguments.
pub fn create_object(rt: &Runtime, class: Value, args: &[Value]) -> Result<Value> {
    create_object_with_arguments(rt, class, args)
}

/// Read an instance variable by name, consulting `site`'s index cache.
#[must_use]
pub fn read_ivar(rt: &Runtime, site: &IvarCacheLine, receiver: Value, name: Value) -> Value {
    let class = rt.class_of(receiver);
    let index = site.lookup(class).or_else(|| {
        let index = resolve_ivar_index(class, name)?;
        site.record(class, index);
        Some(index)
    });
    match (index, receiver.as_object()) {
        (Some(idx), Some(obj)) => obj.get().get_ivar(idx),
        _ => Value::UNDEFINED,
    }
}

/// Write an instance variable by name.
///
/// # Panics
/// Panics if `name` was never declared on the receiver's class — every
/// ivar write site the compiler emits targets a name that class
/// definition already declared, so an unresolved name here means a
/// corrupted bytecode stream or a malformed manual `Frame` build.
pub fn write_ivar(site: &IvarCacheLine, receiver: Value, class: Value, name: Value, value: Value) {
    let index = site.lookup(class).or_else(|| {
        let index = resolve_ivar_index(class, name);
        if let Some(idx) = index {
            site.record(class, idx);
        }
        index
    });
    let index = index.expect("write to an instance variable name never declared on this class");
    if let Some(obj) = receiver.as_object() {
        obj.get().set_ivar(index, value);
    }
}

fn resolve_ivar_index(class: Value, name: Value) -> Option<usize> {
    let mut current = Some(class);
    while let Some(c) = current {
        let obj = c.as_object()?;
        let Payload::Class(data) = &obj.get().payload else { return None };
        let data: &ClassData = &data.borrow();
        if let Some(index) = data.index_of_instance_variable(name) {
            return Some(index);
        }
        current = data.super_class;
    }
    None
}

/// Read a property by name: an explicitly registered getter wins; absent
/// one, property access is sugar for a zero-argument method call of the
/// same name.
pub fn get_property(rt: &Runtime, receiver: Value, name: Value) -> Result<Value> {
    let class = rt.class_of(receiver);
    if let Some(getter) = resolve_property_getter(class, name) {
        return invoke_method(rt, receiver, getter, &[], &[]);
    }
    call_with_arguments(rt, receiver, name, &[])
}

fn resolve_property_getter(class: Value, name: Value) -> Option<Value> {
    let mut current = Some(class);
    while let Some(c) = current {
        let obj = c.as_object()?;
        let Payload::Class(data) = &obj.get().payload else { return None };
        let data = data.borrow();
        if let Some(getter) = data.lookup_property_getter(name) {
            return Some(getter);
        }
        current = data.super_class;
    }
    None
}

fn resolve_property_setter(class: Value, name: Value) -> Option<Value> {
    let mut current = Some(class);
    while let Some(c) = current {
        let obj = c.as_object()?;
        let Payload::Class(data) = &obj.get().payload else { return None };
        let data = data.borrow();
        if let Some(setter) = data.lookup_property_setter(name) {
            return Some(setter);
        }
        current = data.super_class;
    }
    None
}

/// Write a property by name: an explicitly registered setter wins; absent
/// one, falls back to calling a one-argument method of the same name.
pub fn set_property(rt: &Runtime, receiver: Value, name: Value, value: Value) -> Result<Value> {
    let class = rt.class_of(receiver);
    if let Some(setter) = resolve_property_setter(class, name) {
        return invoke_method(rt, receiver, setter, &[value], &[]);
    }
    call_with_arguments(rt, receiver, name, &[value])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::ClassData;
    use crate::config::RuntimeConfig;
    use crate::function::{NativeBody, Signature};
    use crate::object::PLAIN;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn make_function(rt: &Runtime, name: &str, signature: Signature, body: NativeBody) -> Value {
        let data = FunctionData::new(Value::symbol(symbol(name)), signature, body, None);
        let obj = rt.gc.allocate(rt.builtins.function, &crate::object::FUNCTION, Payload::Function(data), &[]);
        Value::heap(obj)
    }

    #[test]
    fn simple_dispatch_finds_and_invokes_a_method() {
        let rt = Runtime::new(RuntimeConfig::default());
        let selector = Value::symbol(symbol("double"));
        let body: NativeBody = Rc::new(|_rt, _self_value, args| Ok(Value::int(args[0].as_int().unwrap() * 2)));
        let method = make_function(&rt, "double", Signature::fixed(vec![Value::symbol(symbol("n"))]), body);

        if let Payload::Class(data) = &rt.builtins.integer.as_object().unwrap().get().payload {
            data.borrow_mut().define_method(selector, method).unwrap();
        }

        let site = CallSite::new();
        let result = call(&rt, &site, Value::int(21), selector, &[Value::int(2)]).unwrap();
        assert_eq!(result, Value::int(42));
    }

    #[test]
    fn missing_selector_without_method_missing_aborts() {
        let rt = Runtime::new(RuntimeConfig::default());
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            call_with_arguments(&rt, Value::int(1), Value::symbol(symbol("nope")), &[])
        }));
        assert!(result.is_err());
    }

    #[test]
    fn named_arguments_win_and_positional_arguments_backfill_leftover_slots() {
        let rt = Runtime::new(RuntimeConfig::default());
        let body: NativeBody = Rc::new(|_rt, _self_value, args| Ok(args[0]));
        let sig = Signature::fixed(vec![
            Value::symbol(symbol("a")),
            Value::symbol(symbol("b")),
            Value::symbol(symbol("c")),
        ]);
        let obj = rt.gc.allocate(
            rt.builtins.function,
            &crate::object::FUNCTION,
            Payload::Function(FunctionData::new(Value::symbol(symbol("g")), sig, body, None)),
            &[],
        );
        let Payload::Function(data) = &obj.get().payload else { unreachable!() };

        // def g(a, b, c); g(1, c: 3, b: 2) => [1, 2, 3]
        let bound = bind_arguments(
            &rt,
            data,
            &[Value::int(1)],
            &[(Value::symbol(symbol("c")), Value::int(3)), (Value::symbol(symbol("b")), Value::int(2))],
        )
        .unwrap();
        assert_eq!(bound, vec![Value::int(1), Value::int(2), Value::int(3)]);

        // g(5, 6, a: 1) => named `a` wins; positional 5, 6 backfill b, c.
        let bound = bind_arguments(
            &rt,
            data,
            &[Value::int(5), Value::int(6)],
            &[(Value::symbol(symbol("a")), Value::int(1))],
        )
        .unwrap();
        assert_eq!(bound, vec![Value::int(1), Value::int(5), Value::int(6)]);
    }

    #[test]
    fn naming_the_same_parameter_twice_is_an_arity_error() {
        let rt = Runtime::new(RuntimeConfig::default());
        let body: NativeBody = Rc::new(|_rt, _self_value, args| Ok(args[0]));
        let sig = Signature::fixed(vec![Value::symbol(symbol("x"))]);
        let obj = rt.gc.allocate(
            rt.builtins.function,
            &crate::object::FUNCTION,
            Payload::Function(FunctionData::new(Value::symbol(symbol("f")), sig, body, None)),
            &[],
        );
        let Payload::Function(data) = &obj.get().payload else { unreachable!() };
        let err = bind_arguments(
            &rt,
            data,
            &[],
            &[(Value::symbol(symbol("x")), Value::int(1)), (Value::symbol(symbol("x")), Value::int(2))],
        )
        .unwrap_err();
        assert!(matches!(err, Error::Arity(_)));
    }

    #[test]
    fn create_object_without_initialize_skips_the_constructor() {
        let rt = Runtime::new(RuntimeConfig::default());
        let selector = Value::symbol(symbol("initialize"));
        let body: NativeBody = Rc::new(|_rt, _self_value, _args| panic!("initialize must not run"));
        let method = make_function(&rt, "initialize", Signature::fixed(vec![]), body);
        let class_obj = rt.gc.allocate(
            rt.builtins.class,
            &crate::object::CLASS,
            Payload::Class(RefCell::new(ClassData::new(Value::symbol(symbol("Probe")), Some(rt.builtins.object)))),
            &[],
        );
        let class_value = Value::heap(class_obj);
        if let Payload::Class(data) = &class_obj.get().payload {
            data.borrow_mut().define_method(selector, method).unwrap();
        }
        let instance = create_object_without_initialize(&rt, class_value);
        assert_eq!(rt.class_of(instance), class_value);
    }

    #[test]
    fn create_object_with_arguments_invokes_the_class_own_initialize_only() {
        let rt = Runtime::new(RuntimeConfig::default());
        let selector = Value::symbol(symbol("initialize"));
        let ivar = Value::symbol(symbol("x"));
        let site = IvarCacheLine::new();
        let super_class = rt.builtins.object;

        let sub_obj = rt.gc.allocate(
            rt.builtins.class,
            &crate::object::CLASS,
            Payload::Class(RefCell::new(ClassData::new(Value::symbol(symbol("Sub")), Some(super_class)))),
            &[],
        );
        let sub_value = Value::heap(sub_obj);
        let index = if let Payload::Class(data) = &sub_obj.get().payload {
            data.borrow_mut().define_instance_variable(ivar)
        } else {
            unreachable!()
        };

        let body: NativeBody = Rc::new(move |_rt, self_value, args| {
            if let Some(obj) = self_value.as_object() {
                obj.get().set_ivar(index, args[0]);
            }
            Ok(self_value)
        });
        let method = make_function(&rt, "initialize", Signature::fixed(vec![Value::symbol(symbol("v"))]), body);
        if let Payload::Class(data) = &sub_obj.get().payload {
            data.borrow_mut().define_method(selector, method).unwrap();
        }

        let instance = create_object_with_arguments(&rt, sub_value, &[Value::int(9)]).unwrap();
        assert_eq!(read_ivar(&rt, &site, instance, ivar), Value::int(9));

        // Object (the superclass) has no `initialize` of its own — a
        // direct instance of it must allocate without running Sub's.
        let bare = create_object_with_arguments(&rt, super_class, &[]).unwrap();
        assert_eq!(rt.class_of(bare), super_class);
    }

    #[test]
    fn ivar_read_write_round_trips_through_cache() {
        let rt = Runtime::new(RuntimeConfig::default());
        let name = Value::symbol(symbol("count"));
        if let Payload::Class(data) = &rt.builtins.object.as_object().unwrap().get().payload {
            data.borrow_mut().define_instance_variable(name);
        }
        let instance = rt.gc.allocate(rt.builtins.object, &PLAIN, Payload::Plain, &[]);
        let instance_value = Value::heap(instance);
        let site = IvarCacheLine::new();
        write_ivar(&site, instance_value, rt.builtins.object, name, Value::int(7));
        assert_eq!(read_ivar(&rt, &site, instance_value, name), Value::int(7));
    }
}
