// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 The objvm Authors

//! The global runtime: garbage collector, builtin classes, and the
//! top-level namespace, tied together behind one handle every other
//! module is threaded through.

use crate::class::ClassData;
use crate::config::RuntimeConfig;
use crate::gc::Gc;
use crate::object::{Payload, PLAIN};
use crate::symbol::symbol;
use crate::value::Value;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Handles to the bootstrap class hierarchy, resolved once at startup and
/// consulted by [`Runtime::class_of`] and by `builtins` when wiring up
/// native methods.
pub struct Builtins {
    pub object: Value,
    pub class: Value,
    pub nil: Value,
    pub boolean: Value,
    pub integer: Value,
    pub float: Value,
    pub symbol: Value,
    pub string: Value,
    pub array: Value,
    pub map: Value,
    pub function: Value,
    pub environment: Value,
    pub fiber: Value,
    pub exception: Value,
}

/// Process-wide runtime state: the collector, the builtin class table, and
/// the top-level namespace globals are defined into.
pub struct Runtime {
    pub gc: Gc,
    pub builtins: Builtins,
    globals: RwLock<HashMap<crate::symbol::SymbolId, Value>>,
    pub config: RuntimeConfig,
}

impl Runtime {
    /// Boot a fresh runtime: allocate the class-of-classes cycle and every
    /// builtin class, then return a handle ready for `builtins::install`
    /// to populate with native methods.
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        crate::symbol::reserve(config.symbol_table_capacity);
        let gc = Gc::new(config.initial_gc_threshold);
        let builtins = bootstrap_classes(&gc);
        Self { gc, builtins, globals: RwLock::new(HashMap::new()), config }
    }

    /// Map any value to the class that owns its methods: the builtin class
    /// for immediates, or the object's own class pointer for heap values.
    #[must_use]
    pub fn class_of(&self, value: Value) -> Value {
        if let Some(obj) = value.as_object() {
            return obj.get().class();
        }
        if value.is_nil() {
            self.builtins.nil
        } else if value.is_bool() {
            self.builtins.boolean
        } else if value.is_int() {
            self.builtins.integer
        } else if value.is_float() {
            self.builtins.float
        } else if value.is_symbol() {
            self.builtins.symbol
        } else {
            // `Undefined` never escapes to user code as a receiver; treat
            // it as Object so a stray occurrence fails loudly at dispatch
            // rather than panicking here.
            self.builtins.object
        }
    }

    /// Encode `f` as the `1010` immediate when the round trip through `f32`
    /// loses no precision, falling back to a boxed `Float` object otherwise
    /// (mirrors `snow/include/snow/numeric.hpp`'s dual representation).
    #[must_use]
    pub fn make_float(&self, f: f64) -> Value {
        #[allow(clippy::cast_possible_truncation)]
        let roundtrips = f64::from(f as f32) == f;
        if roundtrips {
            Value::float(f)
        } else {
            let obj = self.gc.allocate(self.builtins.float, &crate::object::FLOAT_BOXED, Payload::BoxedFloat(f), &[]);
            Value::heap(obj)
        }
    }

    pub fn define_global(&self, name: crate::symbol::SymbolId, value: Value) {
        self.globals.write().insert(name, value);
    }

    #[must_use]
    pub fn lookup_global(&self, name: crate::symbol::SymbolId) -> Option<Value> {
        self.globals.read().get(&name).copied()
    }
}

fn bootstrap_classes(gc: &Gc) -> Builtins {
    // `Object` has no superclass; every other builtin class chains to it.
    // Each class's own `class` field is set to itself until `Class` exists,
    // then retargeted — mirroring how every Smalltalk-family VM closes the
    // metaclass cycle at boot.
    let make = |gc: &Gc, name: &str, super_class: Option<Value>| -> Value {
        let name_value = Value::symbol(symbol(name));
        let data = ClassData::new(name_value, super_class);
        let obj = gc.allocate(Value::NIL, &crate::object::CLASS, Payload::Class(std::cell::RefCell::new(data)), &[]);
        Value::heap(obj)
    };

    let object = make(gc, "Object", None);
    let class = make(gc, "Class", Some(object));
    let nil = make(gc, "Nil", Some(object));
    let boolean = make(gc, "Boolean", Some(object));
    let integer = make(gc, "Integer", Some(object));
    let float = make(gc, "Float", Some(object));
    let symbol_class = make(gc, "Symbol", Some(object));
    let string = make(gc, "String", Some(object));
    let array = make(gc, "Array", Some(object));
    let map = make(gc, "Map", Some(object));
    let function = make(gc, "Function", Some(object));
    let environment = make(gc, "Environment", Some(object));
    let fiber = make(gc, "Fiber", Some(object));
    let exception = make(gc, "Exception", Some(object));

    for class_value in [
        object, class, nil, boolean, integer, float, symbol_class, string, array, map, function,
        environment, fiber, exception,
    ] {
        if let Some(obj) = class_value.as_object() {
            obj.get().set_class(class);
        }
    }

    Builtins {
        object,
        class,
        nil,
        boolean,
        integer,
        float,
        symbol: symbol_class,
        string,
        array,
        map,
        function,
        environment,
        fiber,
        exception,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_of_maps_immediates_to_builtin_classes() {
        let rt = Runtime::new(RuntimeConfig::default());
        assert_eq!(rt.class_of(Value::NIL), rt.builtins.nil);
        assert_eq!(rt.class_of(Value::TRUE), rt.builtins.boolean);
        assert_eq!(rt.class_of(Value::int(1)), rt.builtins.integer);
        assert_eq!(rt.class_of(Value::float(1.0)), rt.builtins.float);
    }

    #[test]
    fn globals_round_trip() {
        let rt = Runtime::new(RuntimeConfig::default());
        let name = symbol("probe_global");
        assert_eq!(rt.lookup_global(name), None);
        rt.define_global(name, Value::int(5));
        assert_eq!(rt.lookup_global(name), Some(Value::int(5)));
    }

    #[test]
    fn every_builtin_except_object_chains_to_object() {
        let rt = Runtime::new(RuntimeConfig::default());
        let check = |class: Value| {
            let obj = class.as_object().unwrap();
            let crate::object::Payload::Class(data) = &obj.get().payload else { panic!("not a class") };
            assert_eq!(data.borrow().super_class, Some(rt.builtins.object));
        };
        check(rt.builtins.class);
        check(rt.builtins.integer);
        check(rt.builtins.fiber);
    }
}
