// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 The objvm Authors

//! Inline caches.
//!
//! Each call site and each instance-variable access owns one cache line.
//! A method cache line is a 3-state machine (`Uninitialized`,
//! `Premorphic`, `Monomorphic`):
//!
//! - `Uninitialized`: the first lookup resolves the method, records the
//!   class, and moves to `Premorphic`.
//! - `Premorphic`: always re-resolves (this state hasn't proven the site
//!   is monomorphic yet), but promotes to `Monomorphic` if the class
//!   matches what was seen last time.
//! - `Monomorphic`: sticky. A repeat of the cached class is a pure cache
//!   hit with no resolve at all; a different class falls back to a full
//!   resolve without demoting the line — a polymorphic call site costs
//!   more to track than to just re-walk the method table.
//!
//! There is no megamorphic tier: a cache that degrades to "always resolve"
//! behaves identically to one that was never cached, so there is nothing
//! to gain from a fourth state.

use crate::value::Value;
use std::cell::Cell;

/// One dispatch call site's cache.
pub struct MethodCacheLine {
    state: Cell<MethodCacheState>,
}

#[derive(Clone, Copy)]
enum MethodCacheState {
    Uninitialized,
    Premorphic { class: Value, method: Value },
    Monomorphic { class: Value, method: Value },
}

impl MethodCacheLine {
    #[must_use]
    pub const fn new() -> Self {
        Self { state: Cell::new(MethodCacheState::Uninitialized) }
    }

    /// Resolve the method for `class`, consulting and updating this cache
    /// line per the state machine above. `resolve` performs the full
    /// method-table walk and is only called when the state machine
    /// requires it — never on a `Monomorphic` hit.
    pub fn get_or_resolve(&self, class: Value, resolve: impl FnOnce() -> Option<Value>) -> Option<Value> {
        match self.state.get() {
            MethodCacheState::Uninitialized => {
                let method = resolve()?;
                self.state.set(MethodCacheState::Premorphic { class, method });
                Some(method)
            }
            MethodCacheState::Premorphic { class: cached, .. } => {
                let method = resolve()?;
                if cached == class {
                    self.state.set(MethodCacheState::Monomorphic { class, method });
                } else {
                    self.state.set(MethodCacheState::Premorphic { class, method });
                }
                Some(method)
            }
            MethodCacheState::Monomorphic { class: cached, method } => {
                if cached == class { Some(method) } else { resolve() }
            }
        }
    }
}

impl Default for MethodCacheLine {
    fn default() -> Self {
        Self::new()
    }
}

/// One instance-variable access site's cache: remembers the class and the
/// slot index the name resolved to last time.
pub struct IvarCacheLine {
    state: Cell<Option<(Value, usize)>>,
}

impl IvarCacheLine {
    #[must_use]
    pub const fn new() -> Self {
        Self { state: Cell::new(None) }
    }

    #[must_use]
    pub fn lookup(&self, class: Value) -> Option<usize> {
        match self.state.get() {
            Some((cached, index)) if cached == class => Some(index),
            _ => None,
        }
    }

    pub fn record(&self, class: Value, index: usize) {
        self.state.set(Some((class, index)));
    }
}

impl Default for IvarCacheLine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(n: i64) -> Value {
        Value::int(n)
    }

    #[test]
    fn uninitialized_line_resolves_once_and_becomes_premorphic() {
        let line = MethodCacheLine::new();
        let mut calls = 0;
        let result = line.get_or_resolve(class(1), || {
            calls += 1;
            Some(Value::int(100))
        });
        assert_eq!(result, Some(Value::int(100)));
        assert_eq!(calls, 1);
    }

    #[test]
    fn premorphic_always_resolves_even_on_a_repeat_class() {
        let line = MethodCacheLine::new();
        line.get_or_resolve(class(1), || Some(Value::int(100)));

        let mut calls = 0;
        let result = line.get_or_resolve(class(1), || {
            calls += 1;
            Some(Value::int(101))
        });
        assert_eq!(result, Some(Value::int(101)));
        assert_eq!(calls, 1, "premorphic must re-resolve before promoting");
    }

    #[test]
    fn repeat_class_promotes_to_monomorphic_and_then_skips_resolve() {
        let line = MethodCacheLine::new();
        line.get_or_resolve(class(1), || Some(Value::int(100)));
        line.get_or_resolve(class(1), || Some(Value::int(100)));

        let mut calls = 0;
        let result = line.get_or_resolve(class(1), || {
            calls += 1;
            Some(Value::int(999))
        });
        assert_eq!(result, Some(Value::int(100)), "monomorphic hit must not call resolve");
        assert_eq!(calls, 0);
    }

    #[test]
    fn monomorphic_line_resolves_a_different_class_without_losing_its_own_state() {
        let line = MethodCacheLine::new();
        line.get_or_resolve(class(1), || Some(Value::int(100)));
        line.get_or_resolve(class(1), || Some(Value::int(100)));

        let result = line.get_or_resolve(class(2), || Some(Value::int(200)));
        assert_eq!(result, Some(Value::int(200)));

        // Monomorphic is sticky: class(1) is still a pure cache hit.
        let mut calls = 0;
        let result = line.get_or_resolve(class(1), || {
            calls += 1;
            Some(Value::int(999))
        });
        assert_eq!(result, Some(Value::int(100)));
        assert_eq!(calls, 0);
    }

    #[test]
    fn ivar_cache_line_tracks_class_and_index() {
        let line = IvarCacheLine::new();
        line.record(class(1), 4);
        assert_eq!(line.lookup(class(1)), Some(4));
        assert_eq!(line.lookup(class(2)), None);
    }
}
