// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 The objvm Authors

//! Classes: method tables, instance-variable layout, and property entries.
//!
//! A class's method table is kept sorted by selector so lookup is a binary
//! search; the super link chains to the parent class (or `None` for
//! `Object`, the root). Meta-classes are ordinary `ClassData` values too —
//! a class's own class is its meta-class, closing the usual cycle at
//! bootstrap (see `builtins::bootstrap`).

use crate::error::{Error, Result};
use crate::value::Value;
use std::cmp::Ordering;

/// A bound method entry: selector plus the callable that implements it.
#[derive(Clone, Copy)]
pub struct MethodEntry {
    pub selector: Value,
    pub method: Value,
}

/// A property's getter and/or setter, keyed by property name.
#[derive(Clone, Copy)]
pub struct PropertyEntry {
    pub name: Value,
    pub getter: Option<Value>,
    pub setter: Option<Value>,
}

/// Per-class state: name, super link, method table, property table and the
/// instance-variable name → slot-index layout every instance shares.
pub struct ClassData {
    pub name: Value,
    pub super_class: Option<Value>,
    /// Sorted by `selector`'s raw bits so lookup can binary-search.
    methods: Vec<MethodEntry>,
    properties: Vec<PropertyEntry>,
    ivar_names: Vec<Value>,
    /// The `initialize` method, cached separately from the sorted table so
    /// `create_object`'s constructor dispatch is a direct field read rather
    /// than a binary search for a well-known name.
    initialize: Option<Value>,
    /// True for the handful of bootstrap meta-classes (`Class`'s own class
    /// tree); affects nothing at runtime but is surfaced for introspection.
    pub is_meta: bool,
}

impl ClassData {
    #[must_use]
    pub fn new(name: Value, super_class: Option<Value>) -> Self {
        Self {
            name,
            super_class,
            methods: Vec::new(),
            properties: Vec::new(),
            ivar_names: Vec::new(),
            initialize: None,
            is_meta: false,
        }
    }

    fn method_search(&self, selector: Value) -> Result<usize, usize> {
        self.methods.binary_search_by(|entry| cmp_value(entry.selector, selector))
    }

    /// Insert a method's implementation, caching it separately if its
    /// selector is `initialize`. A duplicate definition of the same
    /// selector is always an error — classes cannot be reopened to replace
    /// an existing method.
    pub fn define_method(&mut self, selector: Value, method: Value) -> crate::error::Result<()> {
        match self.method_search(selector) {
            Ok(_) => return Err(Error::DuplicateMethod(describe_selector(selector))),
            Err(idx) => self.methods.insert(idx, MethodEntry { selector, method }),
        }
        if is_initialize_selector(selector) {
            self.initialize = Some(method);
        }
        Ok(())
    }

    /// The cached `initialize` method, if this class defines one.
    #[must_use]
    pub fn initialize(&self) -> Option<Value> {
        self.initialize
    }

    /// Look up a method on this class only (no super-chain walk — that is
    /// `dispatch`'s job, since it also drives the inline cache).
    ///
    /// `initialize` short-circuits through the cached slot before the
    /// binary search, matching the class-lookup algorithm's first step.
    #[must_use]
    pub fn get_method(&self, selector: Value) -> Option<Value> {
        if is_initialize_selector(selector) {
            if let Some(method) = self.initialize {
                return Some(method);
            }
        }
        self.method_search(selector).ok().map(|idx| self.methods[idx].method)
    }

    pub fn define_property(&mut self, name: Value, getter: Option<Value>, setter: Option<Value>) {
        if let Some(entry) = self.properties.iter_mut().find(|e| value_eq(e.name, name)) {
            if getter.is_some() {
                entry.getter = getter;
            }
            if setter.is_some() {
                entry.setter = setter;
            }
        } else {
            self.properties.push(PropertyEntry { name, getter, setter });
        }
    }

    #[must_use]
    pub fn lookup_property_getter(&self, name: Value) -> Option<Value> {
        self.properties.iter().find(|e| value_eq(e.name, name)).and_then(|e| e.getter)
    }

    #[must_use]
    pub fn lookup_property_setter(&self, name: Value) -> Option<Value> {
        self.properties.iter().find(|e| value_eq(e.name, name)).and_then(|e| e.setter)
    }

    /// Append a new instance variable to this class's layout, returning its
    /// slot index. Subclasses extend their parent's layout at bootstrap
    /// time by copying inherited names before appending their own.
    pub fn define_instance_variable(&mut self, name: Value) -> usize {
        let index = self.ivar_names.len();
        self.ivar_names.push(name);
        index
    }

    #[must_use]
    pub fn index_of_instance_variable(&self, name: Value) -> Option<usize> {
        self.ivar_names.iter().position(|n| value_eq(*n, name))
    }

    #[must_use]
    pub fn ivar_count(&self) -> usize {
        self.ivar_names.len()
    }

    /// Mark every `Value` this class directly references reachable: its
    /// name, its super link, every method/property value, and every ivar
    /// name symbol.
    pub fn trace(&self, mark: &mut dyn FnMut(Value)) {
        mark(self.name);
        if let Some(super_class) = self.super_class {
            mark(super_class);
        }
        for entry in &self.methods {
            mark(entry.selector);
            mark(entry.method);
        }
        for entry in &self.properties {
            mark(entry.name);
            if let Some(g) = entry.getter {
                mark(g);
            }
            if let Some(s) = entry.setter {
                mark(s);
            }
        }
        for name in &self.ivar_names {
            mark(*name);
        }
        // `initialize` also lives in `methods` above — no separate mark
        // needed, it's the same Value.
    }
}

fn cmp_value(a: Value, b: Value) -> Ordering {
    raw_bits(a).cmp(&raw_bits(b))
}

fn value_eq(a: Value, b: Value) -> bool {
    a == b
}

fn is_initialize_selector(selector: Value) -> bool {
    selector.as_symbol() == Some(crate::symbol::symbol("initialize"))
}

fn describe_selector(selector: Value) -> String {
    selector.as_symbol().map(crate::symbol::symbol_to_string).unwrap_or_else(|| format!("{selector:?}"))
}

fn raw_bits(v: Value) -> usize {
    // Symbols are the only selector/name representation; comparing their
    // interned id gives a stable total order for the method table.
    v.as_symbol().map_or(0, crate::symbol::SymbolId::as_u32) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::symbol;

    fn sym_value(s: &str) -> Value {
        Value::symbol(symbol(s))
    }

    #[test]
    fn methods_sorted_and_found() {
        let mut class = ClassData::new(sym_value("Probe"), None);
        class.define_method(sym_value("zeta"), Value::int(1)).unwrap();
        class.define_method(sym_value("alpha"), Value::int(2)).unwrap();
        assert_eq!(class.get_method(sym_value("alpha")), Some(Value::int(2)));
        assert_eq!(class.get_method(sym_value("zeta")), Some(Value::int(1)));
        assert_eq!(class.get_method(sym_value("missing")), None);
    }

    #[test]
    fn redefining_a_method_is_a_duplicate_error() {
        let mut class = ClassData::new(sym_value("Probe"), None);
        class.define_method(sym_value("m"), Value::int(1)).unwrap();
        let err = class.define_method(sym_value("m"), Value::int(2)).unwrap_err();
        assert!(matches!(err, crate::error::Error::DuplicateMethod(_)));
        assert_eq!(class.get_method(sym_value("m")), Some(Value::int(1)));
    }

    #[test]
    fn defining_initialize_caches_it_separately_and_it_is_found_by_get_method() {
        let mut class = ClassData::new(sym_value("Probe"), None);
        class.define_method(sym_value("initialize"), Value::int(7)).unwrap();
        assert_eq!(class.initialize(), Some(Value::int(7)));
        assert_eq!(class.get_method(sym_value("initialize")), Some(Value::int(7)));
    }

    #[test]
    fn instance_variable_layout_assigns_stable_indices() {
        let mut class = ClassData::new(sym_value("Probe"), None);
        let a = class.define_instance_variable(sym_value("a"));
        let b = class.define_instance_variable(sym_value("b"));
        assert_eq!((a, b), (0, 1));
        assert_eq!(class.index_of_instance_variable(sym_value("b")), Some(1));
        assert_eq!(class.index_of_instance_variable(sym_value("missing")), None);
    }

    #[test]
    fn property_getter_and_setter_tracked_independently() {
        let mut class = ClassData::new(sym_value("Probe"), None);
        class.define_property(sym_value("x"), Some(Value::int(10)), None);
        class.define_property(sym_value("x"), None, Some(Value::int(20)));
        assert_eq!(class.lookup_property_getter(sym_value("x")), Some(Value::int(10)));
        assert_eq!(class.lookup_property_setter(sym_value("x")), Some(Value::int(20)));
    }
}
