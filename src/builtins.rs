// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 The objvm Authors

//! Bootstrap method installation for the builtin classes.
//!
//! `runtime::Runtime::new` only allocates the class objects themselves;
//! [`install`] populates their method tables. Kept separate so a host that
//! wants a bare class hierarchy without any native behavior (e.g. a test
//! that only exercises dispatch mechanics) can skip it.

use crate::error::Error;
use crate::function::{FunctionData, NativeBody, Signature};
use crate::object::Payload;
use crate::runtime::Runtime;
use crate::symbol::symbol;
use crate::value::Value;
use std::cell::RefCell;
use std::rc::Rc;

fn define_native(rt: &Runtime, class: Value, name: &str, params: &[&str], variadic: bool, body: NativeBody) {
    let selector = Value::symbol(symbol(name));
    let mut signature = Signature::fixed(params.iter().map(|p| Value::symbol(symbol(p))).collect());
    if variadic {
        signature.variadic = Some(Value::symbol(symbol("rest")));
    }
    let data = FunctionData::new(selector, signature, body, None);
    let obj = rt.gc.allocate(rt.builtins.function, &crate::object::FUNCTION, Payload::Function(data), &[]);
    let Some(class_obj) = class.as_object() else { return };
    let Payload::Class(class_data) = &class_obj.get().payload else { return };
    class_data.borrow_mut().define_method(selector, Value::heap(obj)).expect("builtin method names are unique per class");
}

fn expect_int(value: Value, role: &'static str) -> crate::error::Result<i64> {
    value.as_int().ok_or(Error::TypeMismatch { expected: "Integer", got: role })
}

/// Install native methods on every builtin class. Call once per runtime,
/// right after [`Runtime::new`].
pub fn install(rt: &Runtime) {
    install_object(rt);
    install_class(rt);
    install_integer(rt);
    install_float(rt);
    install_string(rt);
    install_array(rt);
    install_map(rt);
    install_fiber(rt);
}

fn install_object(rt: &Runtime) {
    let object = rt.builtins.object;

    define_native(rt, object, "class", &[], false, Rc::new(|rt, self_value, _args| Ok(rt.class_of(self_value))));

    define_native(
        rt,
        object,
        "==",
        &["other"],
        false,
        Rc::new(|_rt, self_value, args| Ok(Value::bool(self_value == args[0]))),
    );

    // The terminal `method_missing`: every lookup eventually reaches
    // `Object`, so this is what keeps an unhandled selector a catchable
    // exception instead of the fatal abort in `dispatch::method_missing_abort`.
    define_native(
        rt,
        object,
        "method_missing",
        &["selector", "args"],
        false,
        Rc::new(|rt, self_value, args| {
            let message = format!(
                "undefined method {:?} for {:?}",
                args[0],
                rt.class_of(self_value)
            );
            let string_obj = rt.gc.allocate(rt.builtins.string, &crate::object::STRING, Payload::Str(RefCell::new(message)), &[]);
            Err(crate::exception::throw(rt, Value::heap(string_obj)))
        }),
    );
}

fn install_class(rt: &Runtime) {
    define_native(rt, rt.builtins.class, "name", &[], false, Rc::new(|_rt, self_value, _args| {
        let obj = self_value.as_object().ok_or(Error::TypeMismatch { expected: "Class", got: "non-object" })?;
        let Payload::Class(data) = &obj.get().payload else {
            return Err(Error::TypeMismatch { expected: "Class", got: obj.get().type_desc.name });
        };
        Ok(data.borrow().name)
    }));
}

fn install_integer(rt: &Runtime) {
    let integer = rt.builtins.integer;
    macro_rules! arith {
        ($name:expr, $op:tt) => {
            define_native(rt, integer, $name, &["other"], false, Rc::new(|_rt, self_value, args| {
                let a = expect_int(self_value, "receiver")?;
                let b = expect_int(args[0], "argument")?;
                Ok(Value::int(a $op b))
            }));
        };
    }
    arith!("+", +);
    arith!("-", -);
    arith!("*", *);

    define_native(rt, integer, "/", &["other"], false, Rc::new(|_rt, self_value, args| {
        let a = expect_int(self_value, "receiver")?;
        let b = expect_int(args[0], "argument")?;
        if b == 0 {
            return Err(Error::Arity("division by zero".into()));
        }
        Ok(Value::int(a / b))
    }));

    define_native(rt, integer, "<", &["other"], false, Rc::new(|_rt, self_value, args| {
        Ok(Value::bool(expect_int(self_value, "receiver")? < expect_int(args[0], "argument")?))
    }));
}

fn install_float(rt: &Runtime) {
    let float = rt.builtins.float;
    define_native(rt, float, "+", &["other"], false, Rc::new(|rt, self_value, args| {
        let a = crate::object::read_float(self_value).ok_or(Error::TypeMismatch { expected: "Float", got: "receiver" })?;
        let b = crate::object::read_float(args[0]).ok_or(Error::TypeMismatch { expected: "Float", got: "argument" })?;
        Ok(rt.make_float(a + b))
    }));
}

fn install_string(rt: &Runtime) {
    let string = rt.builtins.string;

    define_native(rt, string, "length", &[], false, Rc::new(|_rt, self_value, _args| {
        let obj = self_value.as_object().ok_or(Error::TypeMismatch { expected: "String", got: "non-object" })?;
        let Payload::Str(s) = &obj.get().payload else {
            return Err(Error::TypeMismatch { expected: "String", got: obj.get().type_desc.name });
        };
        #[allow(clippy::cast_possible_wrap)]
        Ok(Value::int(s.borrow().len() as i64))
    }));

    define_native(rt, string, "+", &["other"], false, Rc::new(|rt, self_value, args| {
        let a = string_contents(self_value)?;
        let b = string_contents(args[0])?;
        let obj = rt.gc.allocate(rt.builtins.string, &crate::object::STRING, Payload::Str(RefCell::new(a + &b)), &[]);
        Ok(Value::heap(obj))
    }));
}

fn string_contents(value: Value) -> crate::error::Result<String> {
    let obj = value.as_object().ok_or(Error::TypeMismatch { expected: "String", got: "non-object" })?;
    let Payload::Str(s) = &obj.get().payload else {
        return Err(Error::TypeMismatch { expected: "String", got: obj.get().type_desc.name });
    };
    Ok(s.borrow().clone())
}

fn install_array(rt: &Runtime) {
    let array = rt.builtins.array;

    define_native(rt, array, "length", &[], false, Rc::new(|_rt, self_value, _args| {
        let obj = self_value.as_object().ok_or(Error::TypeMismatch { expected: "Array", got: "non-object" })?;
        let Payload::Array(items) = &obj.get().payload else {
            return Err(Error::TypeMismatch { expected: "Array", got: obj.get().type_desc.name });
        };
        #[allow(clippy::cast_possible_wrap)]
        Ok(Value::int(items.borrow().len() as i64))
    }));

    define_native(rt, array, "at", &["index"], false, Rc::new(|_rt, self_value, args| {
        let obj = self_value.as_object().ok_or(Error::TypeMismatch { expected: "Array", got: "non-object" })?;
        let Payload::Array(items) = &obj.get().payload else {
            return Err(Error::TypeMismatch { expected: "Array", got: obj.get().type_desc.name });
        };
        let index = expect_int(args[0], "index")?;
        let index = usize::try_from(index).map_err(|_| Error::Arity("negative array index".into()))?;
        Ok(items.borrow().get(index).copied().unwrap_or(Value::NIL))
    }));

    define_native(rt, array, "push", &["value"], false, Rc::new(|_rt, self_value, args| {
        let obj = self_value.as_object().ok_or(Error::TypeMismatch { expected: "Array", got: "non-object" })?;
        let Payload::Array(items) = &obj.get().payload else {
            return Err(Error::TypeMismatch { expected: "Array", got: obj.get().type_desc.name });
        };
        items.borrow_mut().push(args[0]);
        Ok(self_value)
    }));
}

fn install_map(rt: &Runtime) {
    let map = rt.builtins.map;

    define_native(rt, map, "at", &["key"], false, Rc::new(|_rt, self_value, args| {
        let obj = self_value.as_object().ok_or(Error::TypeMismatch { expected: "Map", got: "non-object" })?;
        let Payload::Map(entries) = &obj.get().payload else {
            return Err(Error::TypeMismatch { expected: "Map", got: obj.get().type_desc.name });
        };
        let key = args[0];
        Ok(entries.borrow().iter().find(|(k, _)| *k == key).map_or(Value::NIL, |(_, v)| *v))
    }));

    define_native(rt, map, "set", &["key", "value"], false, Rc::new(|_rt, self_value, args| {
        let obj = self_value.as_object().ok_or(Error::TypeMismatch { expected: "Map", got: "non-object" })?;
        let Payload::Map(entries) = &obj.get().payload else {
            return Err(Error::TypeMismatch { expected: "Map", got: obj.get().type_desc.name });
        };
        let (key, value) = (args[0], args[1]);
        let mut entries = entries.borrow_mut();
        if let Some(slot) = entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            entries.push((key, value));
        }
        drop(entries);
        Ok(self_value)
    }));
}

fn install_fiber(rt: &Runtime) {
    define_native(rt, rt.builtins.fiber, "resume", &["value"], false, Rc::new(|_rt, self_value, args| {
        let obj = self_value.as_object().ok_or(Error::TypeMismatch { expected: "Fiber", got: "non-object" })?;
        let Payload::Fiber(data) = &obj.get().payload else {
            return Err(Error::TypeMismatch { expected: "Fiber", got: obj.get().type_desc.name });
        };
        data.resume(args[0])
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::dispatch::{call_with_arguments, CallSite};

    fn rt_with_builtins() -> Runtime {
        let rt = Runtime::new(RuntimeConfig::default());
        install(&rt);
        rt
    }

    #[test]
    fn integer_arithmetic_dispatches_through_the_method_table() {
        let rt = rt_with_builtins();
        let result = call_with_arguments(&rt, Value::int(4), Value::symbol(symbol("+")), &[Value::int(5)]).unwrap();
        assert_eq!(result, Value::int(9));
    }

    #[test]
    fn unhandled_selector_raises_a_catchable_exception_via_object_method_missing() {
        let rt = rt_with_builtins();
        let err = call_with_arguments(&rt, Value::int(1), Value::symbol(symbol("no_such_selector")), &[]).unwrap_err();
        assert!(matches!(err, Error::Thrown(_)));
    }

    #[test]
    fn array_push_and_at_round_trip() {
        let rt = rt_with_builtins();
        let obj = rt.gc.allocate(rt.builtins.array, &crate::object::ARRAY, Payload::Array(RefCell::new(Vec::new())), &[]);
        let array = Value::heap(obj);
        let site = CallSite::new();
        crate::dispatch::call(&rt, &site, array, Value::symbol(symbol("push")), &[Value::int(7)]).unwrap();
        let result = call_with_arguments(&rt, array, Value::symbol(symbol("at")), &[Value::int(0)]).unwrap();
        assert_eq!(result, Value::int(7));
    }
}
