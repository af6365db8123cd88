// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 The objvm Authors

//! Raising and handling exceptions.
//!
//! `throw` never returns: it wraps the raised value and a backtrace
//! snapshot of the current fiber's shadow stack into an `Exception` object
//! and hands it back as an `Error::Thrown` for `?` to propagate. `ensure`
//! blocks are guaranteed to run exactly once regardless of whether the
//! guarded body raised, returned normally, or the catch handler itself
//! raised.

use crate::error::{Error, Result};
use crate::fiber::current_fiber;
use crate::object::{ExceptionData, Payload};
use crate::runtime::Runtime;
use crate::value::Value;

fn capture_backtrace() -> Vec<String> {
    current_fiber()
        .and_then(|fv| fv.as_object())
        .map(|obj| match &obj.get().payload {
            Payload::Fiber(data) => data.backtrace(),
            _ => Vec::new(),
        })
        .unwrap_or_default()
}

/// Raise `value`. Captures the current fiber's backtrace and wraps both
/// into an `Exception` object reachable from the returned error.
#[must_use]
pub fn throw(rt: &Runtime, value: Value) -> Error {
    let backtrace = capture_backtrace();
    let data = ExceptionData { value, backtrace };
    let obj = rt.gc.allocate(rt.builtins.exception, &crate::object::EXCEPTION, Payload::Exception(data), &[value]);
    Error::Thrown(Value::heap(obj))
}

/// Read the originally-thrown value back out of an exception object
/// (the value `throw` was called with, not the wrapper object itself).
#[must_use]
pub fn exception_value(exception: Value) -> Value {
    exception
        .as_object()
        .map(|obj| match &obj.get().payload {
            Payload::Exception(data) => data.value,
            _ => exception,
        })
        .unwrap_or(exception)
}

/// Run `try_body`; if it raises (`Error::Thrown`), run `catch` with the
/// exception object in its place. `ensure` always runs exactly once,
/// after the try/catch outcome is known and before it is returned to the
/// caller — regardless of which path was taken or whether `catch` itself
/// raised.
pub fn try_catch_ensure(
    try_body: impl FnOnce() -> Result<Value>,
    catch: impl FnOnce(Value) -> Result<Value>,
    ensure: impl FnOnce(),
) -> Result<Value> {
    let outcome = match try_body() {
        Err(Error::Thrown(exception)) => catch(exception),
        other => other,
    };
    ensure();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use std::cell::Cell;

    #[test]
    fn throw_is_caught_and_ensure_runs_once() {
        let rt = Runtime::new(RuntimeConfig::default());
        let ensure_count = Cell::new(0);
        let result = try_catch_ensure(
            || Err(throw(&rt, Value::int(99))),
            |exception| Ok(exception_value(exception)),
            || ensure_count.set(ensure_count.get() + 1),
        );
        assert_eq!(result.unwrap(), Value::int(99));
        assert_eq!(ensure_count.get(), 1);
    }

    #[test]
    fn ensure_runs_even_when_body_succeeds() {
        let ensure_count = Cell::new(0);
        let result = try_catch_ensure(
            || Ok(Value::int(1)),
            |exception| Ok(exception_value(exception)),
            || ensure_count.set(ensure_count.get() + 1),
        );
        assert_eq!(result.unwrap(), Value::int(1));
        assert_eq!(ensure_count.get(), 1);
    }

    #[test]
    fn non_thrown_errors_bypass_catch_but_still_run_ensure() {
        let ensure_count = Cell::new(0);
        let result = try_catch_ensure(
            || Err(Error::Arity("boom".into())),
            |exception| Ok(exception_value(exception)),
            || ensure_count.set(ensure_count.get() + 1),
        );
        assert!(matches!(result, Err(Error::Arity(_))));
        assert_eq!(ensure_count.get(), 1);
    }
}
