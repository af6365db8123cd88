// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 The objvm Authors

//! The uniform heap cell.
//!
//! Every heap value — including classes themselves — is represented by one
//! [`Object`]: a class pointer, an instance-variable array grown on demand,
//! and a private payload. Builtin kinds (strings, arrays, maps, functions,
//! environments, fibers, classes, exceptions) all live in the same cell
//! shape; [`Payload`] is the closed set of private-data kinds this runtime
//! knows how to trace and finalize.
//!
//! The private region is always out-of-line here (a boxed [`Payload`]
//! reached through one pointer in the cell) rather than inlined up to a
//! small budget as the design sketches — see `DESIGN.md` for why that
//! simplification is safe to make in Rust.

use crate::class::ClassData;
use crate::frame::EnvironmentData;
use crate::function::FunctionData;
use crate::value::Value;
use std::cell::{Cell, RefCell};
use std::ptr::NonNull;

/// Private payload kinds. `Plain` objects (ordinary user instances) carry
/// only instance variables and have no extra payload.
pub enum Payload {
    Plain,
    Str(RefCell<String>),
    Array(RefCell<Vec<Value>>),
    /// Association-list map: linear lookup, same tradeoff the design notes
    /// make for `HeapMap` (small maps dominate, and it keeps insertion order).
    Map(RefCell<Vec<(Value, Value)>>),
    Function(FunctionData),
    Environment(EnvironmentData),
    Fiber(crate::fiber::FiberData),
    Class(RefCell<ClassData>),
    /// A raised value plus the frame chain captured at the throw site.
    Exception(ExceptionData),
    /// Full-precision fallback for a float the `1010` immediate tag's `f32`
    /// truncation would lose bits from.
    BoxedFloat(f64),
}

/// Snapshot captured by `throw` for backtrace reconstruction.
pub struct ExceptionData {
    pub value: Value,
    pub backtrace: Vec<String>,
}

/// Per-kind behavior the GC needs: how to find the Values a payload holds
/// reachable, and what to do when the cell is swept.
pub struct TypeDescriptor {
    pub name: &'static str,
    pub trace: fn(&Payload, &mut dyn FnMut(Value)),
    pub finalize: fn(&mut Payload),
}

fn trace_plain(_: &Payload, _: &mut dyn FnMut(Value)) {}
fn finalize_plain(_: &mut Payload) {}

fn trace_array(payload: &Payload, mark: &mut dyn FnMut(Value)) {
    if let Payload::Array(cells) = payload {
        for v in cells.borrow().iter() {
            mark(*v);
        }
    }
}

fn trace_map(payload: &Payload, mark: &mut dyn FnMut(Value)) {
    if let Payload::Map(entries) = payload {
        for (k, v) in entries.borrow().iter() {
            mark(*k);
            mark(*v);
        }
    }
}

fn trace_function(payload: &Payload, mark: &mut dyn FnMut(Value)) {
    if let Payload::Function(data) = payload {
        if let Some(env) = data.closure_env {
            mark(env);
        }
    }
}

fn trace_environment(payload: &Payload, mark: &mut dyn FnMut(Value)) {
    if let Payload::Environment(env) = payload {
        env.trace(mark);
    }
}

fn trace_fiber(payload: &Payload, mark: &mut dyn FnMut(Value)) {
    if let Payload::Fiber(data) = payload {
        data.trace_roots(mark);
    }
}

fn trace_class(payload: &Payload, mark: &mut dyn FnMut(Value)) {
    if let Payload::Class(data) = payload {
        data.borrow().trace(mark);
    }
}

fn trace_exception(payload: &Payload, mark: &mut dyn FnMut(Value)) {
    if let Payload::Exception(data) = payload {
        mark(data.value);
    }
}

/// Read a float out of either representation: the `1010` immediate tag or
/// a boxed `Float` object, mirroring `snow/include/snow/numeric.hpp`'s
/// dual fast-path/boxed accessor.
#[must_use]
pub fn read_float(value: Value) -> Option<f64> {
    if let Some(f) = value.as_float() {
        return Some(f);
    }
    match &value.as_object()?.get().payload {
        Payload::BoxedFloat(f) => Some(*f),
        _ => None,
    }
}

/// Type descriptors for the builtin kinds, keyed by the same index stored
/// in each [`Object`]'s `type_desc` field.
pub static PLAIN: TypeDescriptor = TypeDescriptor { name: "Plain", trace: trace_plain, finalize: finalize_plain };
pub static STRING: TypeDescriptor = TypeDescriptor { name: "String", trace: trace_plain, finalize: finalize_plain };
pub static ARRAY: TypeDescriptor = TypeDescriptor { name: "Array", trace: trace_array, finalize: finalize_plain };
pub static MAP: TypeDescriptor = TypeDescriptor { name: "Map", trace: trace_map, finalize: finalize_plain };
pub static FUNCTION: TypeDescriptor = TypeDescriptor { name: "Function", trace: trace_function, finalize: finalize_plain };
pub static ENVIRONMENT: TypeDescriptor = TypeDescriptor { name: "Environment", trace: trace_environment, finalize: finalize_plain };
pub static FIBER: TypeDescriptor = TypeDescriptor { name: "Fiber", trace: trace_fiber, finalize: finalize_plain };
pub static CLASS: TypeDescriptor = TypeDescriptor { name: "Class", trace: trace_class, finalize: finalize_plain };
pub static EXCEPTION: TypeDescriptor = TypeDescriptor { name: "Exception", trace: trace_exception, finalize: finalize_plain };
pub static FLOAT_BOXED: TypeDescriptor = TypeDescriptor { name: "Float", trace: trace_plain, finalize: finalize_plain };

/// The uniform heap cell.
///
/// Carries a class pointer, a type descriptor (for private-data layout),
/// an instance-variable array grown on demand, and the private payload
/// itself. One cell per allocator slot; a cell's page offset recovers the
/// owning block in O(1) (see [`crate::alloc`]).
pub struct Object {
    /// Class of this object. Always a heap `Value` pointing at a `Class`
    /// object, except during bootstrap of the class-of-classes cycle.
    pub class: Cell<Value>,
    pub type_desc: &'static TypeDescriptor,
    pub ivars: RefCell<Vec<Value>>,
    pub payload: Payload,
    /// Live bit used by the debug double-free check.
    pub(crate) live: Cell<bool>,
    /// Mark bit for the current GC cycle. Cleared before every mark phase.
    pub(crate) marked: Cell<bool>,
}

impl Object {
    #[must_use]
    pub fn new(class: Value, type_desc: &'static TypeDescriptor, payload: Payload) -> Self {
        Self {
            class: Cell::new(class),
            type_desc,
            ivars: RefCell::new(Vec::new()),
            payload,
            live: Cell::new(true),
            marked: Cell::new(false),
        }
    }

    #[must_use]
    pub fn class(&self) -> Value {
        self.class.get()
    }

    pub fn set_class(&self, class: Value) {
        self.class.set(class);
    }

    /// Read an instance variable by index, returning `Undefined` if the
    /// array hasn't grown that far yet (a missing ivar yields nil at the
    /// host boundary; the raw slot sentinel is `Undefined`).
    #[must_use]
    pub fn get_ivar(&self, index: usize) -> Value {
        self.ivars.borrow().get(index).copied().unwrap_or(Value::UNDEFINED)
    }

    pub fn set_ivar(&self, index: usize, value: Value) {
        let mut ivars = self.ivars.borrow_mut();
        if ivars.len() <= index {
            ivars.resize(index + 1, Value::UNDEFINED);
        }
        ivars[index] = value;
    }

    /// Trace every Value reachable directly from this object: its class,
    /// its instance variables, and whatever its payload points at.
    pub fn trace(&self, mark: &mut dyn FnMut(Value)) {
        mark(self.class.get());
        for v in self.ivars.borrow().iter() {
            mark(*v);
        }
        (self.type_desc.trace)(&self.payload, mark);
    }

    #[must_use]
    pub(crate) fn is_marked(&self) -> bool {
        self.marked.get()
    }

    pub(crate) fn set_marked(&self, marked: bool) {
        self.marked.set(marked);
    }
}

/// A non-null, non-owning pointer to a heap-allocated [`Object`].
///
/// Lifetime is managed entirely by the GC; this type is `Copy` and carries
/// no destructor, mirroring how `Value` itself behaves.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef(NonNull<Object>);

impl ObjectRef {
    /// # Safety
    /// `ptr` must point at a live, properly initialized `Object` for as
    /// long as the returned `ObjectRef` is used.
    #[must_use]
    pub unsafe fn from_ptr(ptr: *mut Object) -> Self {
        // SAFETY: caller guarantees `ptr` is non-null and valid.
        Self(unsafe { NonNull::new_unchecked(ptr) })
    }

    #[must_use]
    pub fn as_ptr(self) -> *mut Object {
        self.0.as_ptr()
    }

    #[must_use]
    pub fn get(self) -> &'static Object {
        // SAFETY: the GC never moves or frees a cell while any live Value
        // can still reach it (mark-sweep only frees unmarked cells, and
        // marking happens before any mutator code resumes).
        unsafe { self.0.as_ref() }
    }
}

impl std::fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjectRef({:p})", self.as_ptr())
    }
}
