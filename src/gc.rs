// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 The objvm Authors

//! Stop-the-world mark-sweep collector.
//!
//! Roots are: every handle currently registered in the [`RootTable`]
//! (`gc_create_root`/`gc_free_root`, for values a host call keeps alive
//! across allocations that aren't yet reachable from any object graph) plus
//! whatever transient root slice the caller passes to [`Gc::collect`] —
//! typically the runtime's global namespace and every live fiber, each of
//! which recursively marks its own shadow-stack frames
//! (`fiber::FiberData::trace_roots`) when it is traced as an ordinary
//! object.
//!
//! Collection runs when `allocated >= threshold`; the threshold doubles
//! after a cycle that reclaims less than half of what's occupied, and
//! halves (never below the configured floor) after one that reclaims more
//! than three quarters — an adaptive policy in place of a fixed
//! generational design.

use crate::alloc::Allocator;
use crate::object::{Object, ObjectRef, Payload, TypeDescriptor};
use crate::value::Value;
use parking_lot::Mutex;
use std::cell::Cell;
use std::collections::HashMap;

/// A stable handle into the [`RootTable`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RootHandle(u64);

struct RootTable {
    next_id: u64,
    roots: HashMap<u64, Value>,
}

impl RootTable {
    fn new() -> Self {
        Self { next_id: 0, roots: HashMap::new() }
    }

    fn create(&mut self, value: Value) -> RootHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.roots.insert(id, value);
        RootHandle(id)
    }

    fn free(&mut self, handle: RootHandle) {
        self.roots.remove(&handle.0);
    }
}

/// The allocator plus the collector state layered over it.
pub struct Gc {
    allocator: Allocator,
    roots: Mutex<RootTable>,
    threshold: Cell<usize>,
    floor: usize,
}

impl Gc {
    #[must_use]
    pub fn new(initial_threshold: usize) -> Self {
        Self {
            allocator: Allocator::new(),
            roots: Mutex::new(RootTable::new()),
            threshold: Cell::new(initial_threshold),
            floor: initial_threshold,
        }
    }

    /// Register `value` as a root until explicitly freed.
    pub fn create_root(&self, value: Value) -> RootHandle {
        self.roots.lock().create(value)
    }

    pub fn free_root(&self, handle: RootHandle) {
        self.roots.lock().free(handle);
    }

    /// Allocate a new object, triggering a collection first if the
    /// occupancy threshold has been reached. `extra_roots` are folded in
    /// for the triggered cycle only (see module docs).
    pub fn allocate(
        &self,
        class: Value,
        type_desc: &'static TypeDescriptor,
        payload: Payload,
        extra_roots: &[Value],
    ) -> ObjectRef {
        if self.allocator.occupied_count() >= self.threshold.get() {
            self.collect(extra_roots);
        }
        let ptr = self.allocator.alloc(Object::new(class, type_desc, payload));
        // SAFETY: `ptr` was just returned by `alloc` and is non-null.
        unsafe { ObjectRef::from_ptr(ptr) }
    }

    /// Run one full mark-sweep cycle.
    pub fn collect(&self, extra_roots: &[Value]) {
        let before = self.allocator.occupied_count();
        self.mark(extra_roots);
        self.sweep();
        let after = self.allocator.occupied_count();
        self.adapt_threshold(before, after);
        tracing::debug!(before, after, threshold = self.threshold.get(), "gc cycle complete");
    }

    fn mark(&self, extra_roots: &[Value]) {
        let mut worklist: Vec<Value> = Vec::new();
        worklist.extend(self.roots.lock().roots.values().copied());
        worklist.extend_from_slice(extra_roots);

        while let Some(value) = worklist.pop() {
            let Some(obj) = value.as_object() else { continue };
            let cell = obj.get();
            if cell.is_marked() {
                continue;
            }
            cell.set_marked(true);
            cell.trace(&mut |child| worklist.push(child));
        }
    }

    fn sweep(&self) {
        let mut dead = Vec::new();
        self.allocator.for_each_occupied_cell(|ptr| {
            // SAFETY: `ptr` came from `for_each_occupied_cell`, which only
            // yields cells written by a previous `alloc` and not yet freed.
            let cell = unsafe { &*ptr };
            if cell.is_marked() {
                cell.set_marked(false);
            } else {
                dead.push(ptr);
            }
        });
        for ptr in dead {
            // SAFETY: unmarked after a full mark phase means unreachable
            // from every root and every live fiber, and no other reference
            // to this cell can exist to alias the `&mut` below.
            let cell: &mut Object = unsafe { &mut *ptr };
            (cell.type_desc.finalize)(&mut cell.payload);
            // SAFETY: the finalizer above ran first; the cell is otherwise
            // unreachable, so freeing it now is sound.
            unsafe { self.allocator.free(ptr) };
        }
    }

    fn adapt_threshold(&self, before: usize, after: usize) {
        if before == 0 {
            return;
        }
        #[allow(clippy::cast_precision_loss)]
        let reclaimed_fraction = (before - after) as f64 / before as f64;
        let current = self.threshold.get();
        if reclaimed_fraction < 0.5 {
            self.threshold.set(current.saturating_mul(2));
        } else if reclaimed_fraction > 0.75 {
            self.threshold.set((current / 2).max(self.floor));
        }
    }

    #[must_use]
    pub fn occupied_count(&self) -> usize {
        self.allocator.occupied_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::PLAIN;

    fn plain_class() -> Value {
        Value::int(1)
    }

    #[test]
    fn unrooted_object_is_collected() {
        let gc = Gc::new(1024);
        let obj = gc.allocate(plain_class(), &PLAIN, Payload::Plain, &[]);
        assert_eq!(gc.occupied_count(), 1);
        gc.collect(&[]);
        assert_eq!(gc.occupied_count(), 0);
        drop(obj);
    }

    #[test]
    fn rooted_object_survives_collection() {
        let gc = Gc::new(1024);
        let obj = gc.allocate(plain_class(), &PLAIN, Payload::Plain, &[]);
        let handle = gc.create_root(Value::heap(obj));
        gc.collect(&[]);
        assert_eq!(gc.occupied_count(), 1);
        gc.free_root(handle);
        gc.collect(&[]);
        assert_eq!(gc.occupied_count(), 0);
    }

    #[test]
    fn transitively_reachable_array_contents_survive() {
        let gc = Gc::new(1024);
        let inner = gc.allocate(plain_class(), &PLAIN, Payload::Plain, &[]);
        let inner_value = Value::heap(inner);
        let array = gc.allocate(
            plain_class(),
            &crate::object::ARRAY,
            Payload::Array(std::cell::RefCell::new(vec![inner_value])),
            &[],
        );
        let handle = gc.create_root(Value::heap(array));
        gc.collect(&[]);
        assert_eq!(gc.occupied_count(), 2);
        gc.free_root(handle);
        gc.collect(&[]);
        assert_eq!(gc.occupied_count(), 0);
    }

    #[test]
    fn threshold_doubles_when_little_is_reclaimed() {
        let gc = Gc::new(4);
        let a = gc.allocate(plain_class(), &PLAIN, Payload::Plain, &[]);
        let b = gc.allocate(plain_class(), &PLAIN, Payload::Plain, &[]);
        let _ha = gc.create_root(Value::heap(a));
        let _hb = gc.create_root(Value::heap(b));
        gc.collect(&[]);
        assert_eq!(gc.threshold.get(), 8);
    }
}
