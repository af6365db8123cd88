// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 The objvm Authors

//! Function descriptors and closures.
//!
//! There is no in-scope bytecode compiler or native codegen (parsing and
//! codegen are external collaborators), so a function's body is a boxed
//! Rust closure over the dispatch protocol rather than a compiled
//! instruction stream — an entry point played by a `fn`/`Fn` value instead
//! of a machine-code address.

use crate::error::Result;
use crate::runtime::Runtime;
use crate::value::Value;
use std::rc::Rc;

/// Parameter shape: fixed positional names plus an optional variadic tail
/// that collects any extra positional arguments as an array.
#[derive(Clone)]
pub struct Signature {
    pub positional: Vec<Value>,
    pub variadic: Option<Value>,
}

impl Signature {
    #[must_use]
    pub fn fixed(positional: Vec<Value>) -> Self {
        Self { positional, variadic: None }
    }

    #[must_use]
    pub fn arity(&self) -> usize {
        self.positional.len()
    }

    #[must_use]
    pub fn is_variadic(&self) -> bool {
        self.variadic.is_some()
    }
}

/// The callable body: host-provided native code. `self_value` is the bound
/// receiver, `args` are already bound by name/position into declaration
/// order, and `rt` gives the body access to the allocator and dispatcher
/// for any further calls or allocations it needs to make.
pub type NativeBody = Rc<dyn Fn(&Runtime, Value, &[Value]) -> Result<Value>>;

/// A function object: its parameter shape, its callable body, and — for a
/// closure created inside another frame — the captured environment it was
/// built from.
pub struct FunctionData {
    pub name: Value,
    pub signature: Signature,
    pub body: NativeBody,
    /// `Some` for closures; `None` for top-level/method functions that
    /// never captured an enclosing frame.
    pub closure_env: Option<Value>,
}

impl FunctionData {
    #[must_use]
    pub fn new(name: Value, signature: Signature, body: NativeBody, closure_env: Option<Value>) -> Self {
        Self { name, signature, body, closure_env }
    }

    pub fn invoke(&self, rt: &Runtime, self_value: Value, args: &[Value]) -> Result<Value> {
        (self.body)(rt, self_value, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;

    #[test]
    fn invoke_runs_the_body_with_bound_self_and_args() {
        let rt = Runtime::new(RuntimeConfig::default());
        let body: NativeBody = Rc::new(|_rt, self_value, args| {
            assert!(self_value.is_nil());
            Ok(args[0])
        });
        let data = FunctionData::new(
            Value::NIL,
            Signature::fixed(vec![Value::NIL]),
            body,
            None,
        );
        let result = data.invoke(&rt, Value::NIL, &[Value::int(7)]).unwrap();
        assert_eq!(result, Value::int(7));
    }

    #[test]
    fn variadic_signature_reports_no_fixed_arity_ceiling() {
        let sig = Signature { positional: vec![Value::NIL], variadic: Some(Value::NIL) };
        assert!(sig.is_variadic());
        assert_eq!(sig.arity(), 1);
    }
}
