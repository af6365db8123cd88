// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 The objvm Authors

//! Persisted-value marshal format.
//!
//! A byte stream of tagged values. Heap values are deduplicated by
//! identity: the writer remembers the stream offset it first wrote each
//! object's tag byte at, and any later reference to that same object
//! becomes a `BackReference` to that offset instead of a second copy. The
//! reader mirrors this with an offset -> `Value` map, populated *before*
//! recursing into a container's elements, so a back-reference that closes
//! a cycle back onto a container still in the middle of being read
//! resolves correctly.

use crate::error::{Error, Result};
use crate::object::{Payload, ARRAY, MAP, STRING};
use crate::runtime::Runtime;
use crate::symbol::symbol_to_string;
use crate::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;

// Tags below 16 carry an immediate payload or a NUL-terminated symbol
// string; 16/17/18 are the three container/back-reference kinds. String
// (non-symbol) payloads are a fourth immediate-range tag, length-prefixed
// since they may contain embedded NUL bytes.
const TAG_NIL: u8 = 0;
const TAG_FALSE: u8 = 1;
const TAG_TRUE: u8 = 2;
const TAG_UNDEFINED: u8 = 3;
const TAG_INT: u8 = 4;
const TAG_SYMBOL: u8 = 5;
const TAG_FLOAT: u8 = 6;
const TAG_STRING: u8 = 7;
const TAG_ARRAY: u8 = 16;
const TAG_MAP: u8 = 17;
const TAG_BACKREF: u8 = 18;

/// Serializes a value graph into the marshal byte format.
pub struct Writer {
    buf: Vec<u8>,
    seen: HashMap<usize, u64>,
}

impl Writer {
    #[must_use]
    pub fn new() -> Self {
        Self { buf: Vec::new(), seen: HashMap::new() }
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn write_u64(&mut self, n: u64) {
        self.buf.extend_from_slice(&n.to_be_bytes());
    }

    fn write_length_prefixed(&mut self, bytes: &[u8]) {
        self.write_u64(u64::try_from(bytes.len()).expect("marshaled byte strings fit in u64"));
        self.buf.extend_from_slice(bytes);
    }

    /// Write a symbol's text NUL-terminated, matching the host format's
    /// immediate-symbol encoding (no length prefix).
    fn write_symbol_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        self.buf.push(0);
    }

    /// Append `value` to the stream, sharing structure with anything
    /// already written via a `BackReference`.
    pub fn write_value(&mut self, value: Value) -> Result<()> {
        if value.is_nil() {
            self.buf.push(TAG_NIL);
            return Ok(());
        }
        if value.is_false() {
            self.buf.push(TAG_FALSE);
            return Ok(());
        }
        if value.is_true() {
            self.buf.push(TAG_TRUE);
            return Ok(());
        }
        if value.is_undefined() {
            self.buf.push(TAG_UNDEFINED);
            return Ok(());
        }
        if let Some(n) = value.as_int() {
            self.buf.push(TAG_INT);
            self.buf.extend_from_slice(&n.to_be_bytes());
            return Ok(());
        }
        if let Some(f) = crate::object::read_float(value) {
            self.buf.push(TAG_FLOAT);
            self.buf.extend_from_slice(&f.to_bits().to_be_bytes());
            return Ok(());
        }
        if let Some(id) = value.as_symbol() {
            self.buf.push(TAG_SYMBOL);
            self.write_symbol_bytes(symbol_to_string(id).as_bytes());
            return Ok(());
        }

        let obj = value.as_object().expect("every Value is heap, immediate, symbol or undefined");
        let key = obj.as_ptr() as usize;
        if let Some(&offset) = self.seen.get(&key) {
            self.buf.push(TAG_BACKREF);
            self.write_u64(offset);
            return Ok(());
        }
        let offset = u64::try_from(self.buf.len()).expect("marshal streams fit in u64 offsets");
        self.seen.insert(key, offset);

        match &obj.get().payload {
            Payload::Str(s) => {
                self.buf.push(TAG_STRING);
                self.write_length_prefixed(s.borrow().as_bytes());
            }
            Payload::Array(items) => {
                self.buf.push(TAG_ARRAY);
                let items = items.borrow().clone();
                self.write_u64(u64::try_from(items.len()).expect("array fits in u64"));
                for item in items {
                    self.write_value(item)?;
                }
            }
            Payload::Map(entries) => {
                self.buf.push(TAG_MAP);
                let entries = entries.borrow().clone();
                self.write_u64(u64::try_from(entries.len()).expect("map fits in u64"));
                for (k, v) in entries {
                    self.write_value(k)?;
                    self.write_value(v)?;
                }
            }
            _ => return Err(Error::Marshal(format!("{} values cannot be marshaled", obj.get().type_desc.name))),
        }
        Ok(())
    }
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

/// Deserializes a marshal byte stream back into a value graph.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    seen: HashMap<u64, Value>,
}

impl<'a> Reader<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0, seen: HashMap::new() }
    }

    fn read_u8(&mut self) -> Result<u8> {
        let byte = *self.buf.get(self.pos).ok_or_else(|| Error::Marshal("truncated stream".into()))?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_n(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or_else(|| Error::Marshal("length overflow".into()))?;
        let slice = self.buf.get(self.pos..end).ok_or_else(|| Error::Marshal("truncated stream".into()))?;
        self.pos = end;
        Ok(slice)
    }

    fn read_u64(&mut self) -> Result<u64> {
        let bytes: [u8; 8] = self.read_n(8)?.try_into().expect("read_n(8) returns 8 bytes");
        Ok(u64::from_be_bytes(bytes))
    }

    fn read_i64(&mut self) -> Result<i64> {
        let bytes: [u8; 8] = self.read_n(8)?.try_into().expect("read_n(8) returns 8 bytes");
        Ok(i64::from_be_bytes(bytes))
    }

    fn read_f64(&mut self) -> Result<f64> {
        let bytes: [u8; 8] = self.read_n(8)?.try_into().expect("read_n(8) returns 8 bytes");
        Ok(f64::from_bits(u64::from_be_bytes(bytes)))
    }

    fn read_length_prefixed(&mut self) -> Result<Vec<u8>> {
        let len = usize::try_from(self.read_u64()?).map_err(|_| Error::Marshal("length overflow".into()))?;
        Ok(self.read_n(len)?.to_vec())
    }

    /// Read a NUL-terminated symbol string.
    fn read_symbol_bytes(&mut self) -> Result<Vec<u8>> {
        let start = self.pos;
        loop {
            if self.read_u8()? == 0 {
                return Ok(self.buf[start..self.pos - 1].to_vec());
            }
        }
    }

    /// Read the next value out of the stream.
    pub fn read_value(&mut self, rt: &Runtime) -> Result<Value> {
        let start_offset = self.pos as u64;
        let tag = self.read_u8()?;
        match tag {
            TAG_NIL => Ok(Value::NIL),
            TAG_FALSE => Ok(Value::FALSE),
            TAG_TRUE => Ok(Value::TRUE),
            TAG_UNDEFINED => Ok(Value::UNDEFINED),
            TAG_INT => Ok(Value::int(self.read_i64()?)),
            TAG_FLOAT => Ok(rt.make_float(self.read_f64()?)),
            TAG_SYMBOL => {
                let bytes = self.read_symbol_bytes()?;
                let s = String::from_utf8(bytes).map_err(|e| Error::Marshal(e.to_string()))?;
                Ok(Value::symbol(crate::symbol::symbol(&s)))
            }
            TAG_BACKREF => {
                let offset = self.read_u64()?;
                self.seen.get(&offset).copied().ok_or_else(|| Error::Marshal("dangling back-reference".into()))
            }
            TAG_STRING => {
                let bytes = self.read_length_prefixed()?;
                let s = String::from_utf8(bytes).map_err(|e| Error::Marshal(e.to_string()))?;
                let obj = rt.gc.allocate(rt.builtins.string, &STRING, Payload::Str(RefCell::new(s)), &[]);
                let value = Value::heap(obj);
                self.seen.insert(start_offset, value);
                Ok(value)
            }
            TAG_ARRAY => {
                let len = usize::try_from(self.read_u64()?).map_err(|_| Error::Marshal("length overflow".into()))?;
                let obj = rt.gc.allocate(
                    rt.builtins.array,
                    &ARRAY,
                    Payload::Array(RefCell::new(vec![Value::UNDEFINED; len])),
                    &[],
                );
                let value = Value::heap(obj);
                self.seen.insert(start_offset, value);
                for i in 0..len {
                    let item = self.read_value(rt)?;
                    if let Payload::Array(cells) = &obj.get().payload {
                        cells.borrow_mut()[i] = item;
                    }
                }
                Ok(value)
            }
            TAG_MAP => {
                let len = usize::try_from(self.read_u64()?).map_err(|_| Error::Marshal("length overflow".into()))?;
                let obj = rt.gc.allocate(
                    rt.builtins.map,
                    &MAP,
                    Payload::Map(RefCell::new(vec![(Value::UNDEFINED, Value::UNDEFINED); len])),
                    &[],
                );
                let value = Value::heap(obj);
                self.seen.insert(start_offset, value);
                for i in 0..len {
                    let k = self.read_value(rt)?;
                    let v = self.read_value(rt)?;
                    if let Payload::Map(entries) = &obj.get().payload {
                        entries.borrow_mut()[i] = (k, v);
                    }
                }
                Ok(value)
            }
            other => Err(Error::Marshal(format!("unknown tag byte {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;

    #[test]
    fn immediates_round_trip() {
        let rt = Runtime::new(RuntimeConfig::default());
        for value in [Value::NIL, Value::TRUE, Value::FALSE, Value::UNDEFINED, Value::int(-17), Value::float(2.5)] {
            let mut writer = Writer::new();
            writer.write_value(value).unwrap();
            let bytes = writer.into_bytes();
            let mut reader = Reader::new(&bytes);
            let read_back = reader.read_value(&rt).unwrap();
            if let Some(f) = value.as_float() {
                assert!((read_back.as_float().unwrap() - f).abs() < f64::EPSILON);
            } else {
                assert_eq!(read_back, value);
            }
        }
    }

    #[test]
    fn shared_array_element_becomes_a_single_back_reference() {
        let rt = Runtime::new(RuntimeConfig::default());
        let shared = rt.gc.allocate(rt.builtins.array, &ARRAY, Payload::Array(RefCell::new(vec![Value::int(1)])), &[]);
        let shared_value = Value::heap(shared);
        let outer = rt.gc.allocate(
            rt.builtins.array,
            &ARRAY,
            Payload::Array(RefCell::new(vec![shared_value, shared_value])),
            &[],
        );
        let mut writer = Writer::new();
        writer.write_value(Value::heap(outer)).unwrap();
        let bytes = writer.into_bytes();

        let mut reader = Reader::new(&bytes);
        let read_back = reader.read_value(&rt).unwrap();
        let Payload::Array(items) = &read_back.as_object().unwrap().get().payload else { panic!() };
        let items = items.borrow();
        assert_eq!(items[0], items[1]);
    }
}
