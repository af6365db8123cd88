// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 The objvm Authors

//! Module loading glue.
//!
//! A compiled module is presented to the core as an entry function, the
//! `(symbol, value)` globals its compilation produced, and a source-file/
//! line map indexed by code offset (kept for backtraces, not otherwise
//! consulted by this crate). Loading a module allocates a fresh
//! *meta-class* for it — the same "per-object class synthesized on first
//! use" mechanism `class.rs` documents for ordinary objects — calls the
//! entry with no arguments, then copies every global onto the resulting
//! object as an instance variable of that meta-class, and finally stores
//! the entry's return value under the well-known `__module_value__` ivar.
//! The wrapper is published under the module's name in the runtime's
//! global namespace so `require`d modules are visible to later top-level
//! code.

use crate::class::ClassData;
use crate::error::{Error, Result};
use crate::object::Payload;
use crate::runtime::Runtime;
use crate::symbol::{symbol, SymbolId};
use crate::value::Value;
use std::cell::RefCell;

/// One source-offset → line mapping entry, for backtrace reconstruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineMapEntry {
    pub code_offset: u64,
    pub line: u32,
}

/// A loadable unit: a name, its zero-argument entry point, the globals
/// its compilation produced, and its line map.
pub struct ModuleDescriptor {
    pub name: SymbolId,
    pub entry: Value,
    pub globals: Vec<(SymbolId, Value)>,
    pub line_map: Vec<LineMapEntry>,
}

fn module_value_ivar_index(rt: &Runtime) -> usize {
    let name = Value::symbol(symbol("__module_value__"));
    let obj = rt.builtins.object.as_object().expect("Object class is always a heap value");
    let Payload::Class(data) = &obj.get().payload else {
        unreachable!("Object's class slot always holds a Class payload")
    };
    let mut data = data.borrow_mut();
    data.index_of_instance_variable(name).unwrap_or_else(|| data.define_instance_variable(name))
}

/// Allocate a fresh meta-class under `Object` for one module instance:
/// `is_meta` set, named after the module, with no `initialize` slot (the
/// entry function already played that role).
fn create_module_meta_class(rt: &Runtime, module_name: SymbolId) -> Value {
    let mut data = ClassData::new(Value::symbol(module_name), Some(rt.builtins.object));
    data.is_meta = true;
    let obj = rt.gc.allocate(rt.builtins.class, &crate::object::CLASS, Payload::Class(RefCell::new(data)), &[]);
    Value::heap(obj)
}

/// Run `descriptor`'s entry point, wrap the result and its globals in a
/// fresh meta-class instance, and register it as a global under the
/// module's name.
pub fn load_module(rt: &Runtime, descriptor: &ModuleDescriptor) -> Result<Value> {
    let obj = descriptor
        .entry
        .as_object()
        .ok_or(Error::ModuleLoad("entry point is not a callable object".into()))?;
    let Payload::Function(function) = &obj.get().payload else {
        return Err(Error::ModuleLoad("entry point is not a Function".into()));
    };
    let result = function.invoke(rt, Value::NIL, &[])?;

    let meta_class = create_module_meta_class(rt, descriptor.name);
    let wrapper = crate::dispatch::create_object_without_initialize(rt, meta_class);
    let wrapper_obj = wrapper.as_object().expect("create_object_without_initialize always returns a heap value");

    let Some(meta_obj) = meta_class.as_object() else { unreachable!() };
    let Payload::Class(meta_data) = &meta_obj.get().payload else { unreachable!() };
    for (name, value) in &descriptor.globals {
        let mut meta_data = meta_data.borrow_mut();
        let name_value = Value::symbol(*name);
        let index = meta_data.index_of_instance_variable(name_value).unwrap_or_else(|| meta_data.define_instance_variable(name_value));
        drop(meta_data);
        wrapper_obj.get().set_ivar(index, *value);
    }

    let ivar_index = module_value_ivar_index(rt);
    wrapper_obj.get().set_ivar(ivar_index, result);

    rt.define_global(descriptor.name, wrapper);
    Ok(wrapper)
}

/// Read a loaded module's `__module_value__` back out of its wrapper.
#[must_use]
pub fn module_value(rt: &Runtime, module: Value) -> Value {
    let index = module_value_ivar_index(rt);
    module.as_object().map_or(Value::UNDEFINED, |obj| obj.get().get_ivar(index))
}

/// Read one of a loaded module's globals back out of its wrapper by name.
#[must_use]
pub fn module_global(rt: &Runtime, module: Value, name: SymbolId) -> Value {
    let class = rt.class_of(module);
    let Some(class_obj) = class.as_object() else { return Value::UNDEFINED };
    let Payload::Class(data) = &class_obj.get().payload else { return Value::UNDEFINED };
    let Some(index) = data.borrow().index_of_instance_variable(Value::symbol(name)) else {
        return Value::UNDEFINED;
    };
    module.as_object().map_or(Value::UNDEFINED, |obj| obj.get().get_ivar(index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::function::{FunctionData, NativeBody, Signature};
    use std::rc::Rc;

    #[test]
    fn loading_a_module_publishes_it_as_a_global() {
        let rt = Runtime::new(RuntimeConfig::default());
        let body: NativeBody = Rc::new(|_rt, _self_value, _args| Ok(Value::int(42)));
        let entry_data = FunctionData::new(Value::symbol(symbol("entry")), Signature::fixed(vec![]), body, None);
        let entry_obj = rt.gc.allocate(rt.builtins.function, &crate::object::FUNCTION, Payload::Function(entry_data), &[]);

        let name = symbol("probe_module");
        let descriptor = ModuleDescriptor { name, entry: Value::heap(entry_obj), globals: Vec::new(), line_map: Vec::new() };
        let module = load_module(&rt, &descriptor).unwrap();

        assert_eq!(rt.lookup_global(name), Some(module));
        assert_eq!(module_value(&rt, module), Value::int(42));
    }

    #[test]
    fn loading_a_module_copies_its_globals_onto_the_meta_class_instance() {
        let rt = Runtime::new(RuntimeConfig::default());
        let body: NativeBody = Rc::new(|_rt, _self_value, _args| Ok(Value::NIL));
        let entry_data = FunctionData::new(Value::symbol(symbol("entry")), Signature::fixed(vec![]), body, None);
        let entry_obj = rt.gc.allocate(rt.builtins.function, &crate::object::FUNCTION, Payload::Function(entry_data), &[]);

        let name = symbol("with_globals");
        let pi = symbol("pi");
        let descriptor = ModuleDescriptor {
            name,
            entry: Value::heap(entry_obj),
            globals: vec![(pi, Value::int(3))],
            line_map: vec![LineMapEntry { code_offset: 0, line: 1 }],
        };
        let module = load_module(&rt, &descriptor).unwrap();

        assert_eq!(module_global(&rt, module, pi), Value::int(3));
    }

    #[test]
    fn each_module_gets_its_own_meta_class() {
        let rt = Runtime::new(RuntimeConfig::default());
        let body: NativeBody = Rc::new(|_rt, _self_value, _args| Ok(Value::NIL));
        let make_entry = || {
            let data = FunctionData::new(Value::symbol(symbol("entry")), Signature::fixed(vec![]), body.clone(), None);
            Value::heap(rt.gc.allocate(rt.builtins.function, &crate::object::FUNCTION, Payload::Function(data), &[]))
        };

        let a = load_module(&rt, &ModuleDescriptor { name: symbol("a"), entry: make_entry(), globals: Vec::new(), line_map: Vec::new() }).unwrap();
        let b = load_module(&rt, &ModuleDescriptor { name: symbol("b"), entry: make_entry(), globals: Vec::new(), line_map: Vec::new() }).unwrap();

        assert_ne!(rt.class_of(a), rt.class_of(b));
    }
}
