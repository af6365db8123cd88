// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 The objvm Authors

//! Process-wide symbol interning.
//!
//! Symbols are the runtime representation of identifiers: method names,
//! parameter names, instance-variable names. Interning them to small
//! integers means every comparison on the hot dispatch path is an integer
//! equality instead of a string compare.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;

/// A small integer identifying an interned string.
///
/// Stable for the lifetime of the process: once assigned, a `SymbolId`
/// never changes meaning and is never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub u32);

impl SymbolId {
    /// Raw numeric value, used to pack a symbol into a tagged [`crate::value::Value`].
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

struct SymbolTable {
    strings: Vec<Box<str>>,
    by_string: HashMap<Box<str>, SymbolId>,
}

impl SymbolTable {
    fn new() -> Self {
        Self {
            strings: Vec::new(),
            by_string: HashMap::new(),
        }
    }

    fn reserve(&mut self, additional: usize) {
        self.strings.reserve(additional);
        self.by_string.reserve(additional);
    }

    fn intern(&mut self, s: &str) -> SymbolId {
        if let Some(id) = self.by_string.get(s) {
            return *id;
        }
        let id = SymbolId(u32::try_from(self.strings.len()).expect("symbol table exhausted"));
        let boxed: Box<str> = s.into();
        self.strings.push(boxed.clone());
        self.by_string.insert(boxed, id);
        id
    }

    fn resolve(&self, id: SymbolId) -> Option<&str> {
        self.strings.get(id.0 as usize).map(std::convert::AsRef::as_ref)
    }
}

static TABLE: Lazy<RwLock<SymbolTable>> = Lazy::new(|| RwLock::new(SymbolTable::new()));

/// Intern `s`, returning its stable [`SymbolId`]. Idempotent: interning the
/// same string twice returns the same id.
#[must_use]
pub fn symbol(s: &str) -> SymbolId {
    TABLE.write().intern(s)
}

/// Reserve room for `additional` more interned strings without rehashing.
///
/// Called once from [`crate::runtime::Runtime::new`] with
/// `RuntimeConfig::symbol_table_capacity` — the table is process-global
/// (symbols never scope to one runtime), so this only ever grows it.
pub fn reserve(additional: usize) {
    TABLE.write().reserve(additional);
}

/// Recover the original string for a previously interned symbol.
///
/// Panics if `id` was never returned by [`symbol`] — symbols are never
/// freed, so a valid id is always resolvable.
#[must_use]
pub fn symbol_to_string(id: SymbolId) -> String {
    TABLE
        .read()
        .resolve(id)
        .unwrap_or_else(|| panic!("unknown symbol id {}", id.0))
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_idempotent() {
        let a = symbol("length");
        let b = symbol("length");
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_strings_get_distinct_ids() {
        let a = symbol("foo_distinct");
        let b = symbol("bar_distinct");
        assert_ne!(a, b);
    }

    #[test]
    fn round_trips_through_string() {
        let id = symbol("round_trip_case");
        assert_eq!(symbol_to_string(id), "round_trip_case");
    }
}
