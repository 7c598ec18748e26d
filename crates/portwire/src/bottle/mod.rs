// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bottle: ordered container of tagged values.
//!
//! A bottle is the default message payload. It has two interconvertible
//! forms:
//!
//! - **binary** ([`binary`]): tagged, little-endian, with a compact
//!   homogeneous encoding when every element has the same scalar kind
//! - **text** ([`text`]): s-expression-like, e.g. `set name 42 3.14 (a b)`
//!
//! Storage is shared: cloning is cheap and the first mutation of a shared
//! bottle copies it. [`Bottle::null`] is an immutable sentinel that
//! rejects every mutation.
//!
//! # Example
//!
//! ```
//! use portwire::Bottle;
//!
//! let mut b = Bottle::new();
//! b.add_string("set").add_string("name").add_int32(42).add_float64(3.14);
//! b.add_list().add_string("a").add_string("b");
//! assert_eq!(b.to_string(), "set name 42 3.14 (a b)");
//!
//! let back = Bottle::decode(&b.encode()).unwrap();
//! assert_eq!(back, b);
//! ```

pub mod binary;
pub mod text;

pub use binary::{BareField, MAX_NESTING_DEPTH};

use crate::error::{Error, Result};
use crate::portable::Portable;
use crate::reader::ConnectionReader;
use crate::value::{Value, ValueKind, Vocab};
use crate::writer::ConnectionWriter;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

static NULL_VALUE: Value = Value::Null;

/// Ordered, copy-on-write sequence of [`Value`]s.
#[derive(Clone, PartialEq, Default)]
pub struct Bottle {
    items: Arc<Vec<Value>>,
    null: bool,
}

impl Bottle {
    /// Empty, mutable bottle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide immutable sentinel, returned by failed lookups.
    pub fn null() -> &'static Bottle {
        static NULL: OnceLock<Bottle> = OnceLock::new();
        NULL.get_or_init(|| Bottle {
            items: Arc::new(Vec::new()),
            null: true,
        })
    }

    /// Whether this is (a copy of) the null sentinel.
    pub fn is_null(&self) -> bool {
        self.null
    }

    /// Mutable storage, detaching shared contents. `None` for the sentinel.
    fn items_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self.writable_items() {
            Ok(items) => Some(items),
            Err(_) => {
                log::warn!("[Bottle] mutation of the null bottle ignored");
                None
            }
        }
    }

    fn writable_items(&mut self) -> Result<&mut Vec<Value>> {
        if self.null {
            return Err(Error::ReadOnly);
        }
        Ok(Arc::make_mut(&mut self.items))
    }

    // ------------------------------------------------------------------
    // Appenders
    // ------------------------------------------------------------------

    /// Append any value, failing with [`Error::ReadOnly`] on the null sentinel.
    pub fn try_add(&mut self, value: impl Into<Value>) -> Result<&mut Self> {
        self.writable_items()?.push(value.into());
        Ok(self)
    }

    /// Append any value; ignored (with a warning) on the null sentinel.
    pub fn add(&mut self, value: impl Into<Value>) -> &mut Self {
        if let Some(items) = self.items_mut() {
            items.push(value.into());
        }
        self
    }

    pub fn add_int32(&mut self, v: i32) -> &mut Self {
        self.add(Value::Int32(v))
    }

    pub fn add_int64(&mut self, v: i64) -> &mut Self {
        self.add(Value::Int64(v))
    }

    pub fn add_float64(&mut self, v: f64) -> &mut Self {
        self.add(Value::Float64(v))
    }

    pub fn add_string(&mut self, v: &str) -> &mut Self {
        self.add(Value::String(v.to_owned()))
    }

    pub fn add_vocab(&mut self, v: Vocab) -> &mut Self {
        self.add(Value::Vocab(v))
    }

    pub fn add_blob(&mut self, v: &[u8]) -> &mut Self {
        self.add(Value::Blob(v.to_vec()))
    }

    pub fn add_dict(&mut self, v: BTreeMap<String, Value>) -> &mut Self {
        self.add(Value::Dict(v))
    }

    pub fn add_null(&mut self) -> &mut Self {
        self.add(Value::Null)
    }

    /// Append an empty nested list and return it for filling.
    ///
    /// On the null sentinel this returns the sentinel itself, so chained
    /// additions stay no-ops.
    pub fn add_list(&mut self) -> &mut Bottle {
        if self.null {
            log::warn!("[Bottle] mutation of the null bottle ignored");
            return self;
        }
        let items = Arc::make_mut(&mut self.items);
        items.push(Value::List(Bottle::new()));
        match items.last_mut() {
            Some(Value::List(list)) => list,
            _ => unreachable!("a list was just pushed"),
        }
    }

    // ------------------------------------------------------------------
    // Access
    // ------------------------------------------------------------------

    /// Element at `index`, or `Value::Null` when out of range.
    pub fn get(&self, index: usize) -> &Value {
        self.items.get(index).unwrap_or(&NULL_VALUE)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.items
    }

    /// Remove every element (no-op on the sentinel).
    pub fn clear(&mut self) {
        if let Some(items) = self.items_mut() {
            items.clear();
        }
    }

    /// Remove and return the last element.
    pub fn pop(&mut self) -> Option<Value> {
        self.items_mut()?.pop()
    }

    /// Replace the contents with `len` elements of `other` starting at `first`.
    ///
    /// The range is clamped to `other`; `usize::MAX` copies to the end.
    pub fn copy_range(&mut self, other: &Bottle, first: usize, len: usize) {
        let start = first.min(other.len());
        let end = start.saturating_add(len).min(other.len());
        let slice = other.items[start..end].to_vec();
        if let Some(items) = self.items_mut() {
            *items = slice;
        }
    }

    // ------------------------------------------------------------------
    // Association lookups
    // ------------------------------------------------------------------

    /// Value associated with `key`.
    ///
    /// A string/vocab element equal to `key` yields the element after it.
    /// A sub-list headed by `key` yields its second element when the group
    /// is a pair, or the group's tail as a list otherwise. A miss yields
    /// `Value::Null`.
    pub fn find(&self, key: &str) -> Value {
        let mut iter = self.items.iter().peekable();
        while let Some(item) = iter.next() {
            if item.matches_key(key) {
                return iter.peek().map(|v| (*v).clone()).unwrap_or_default();
            }
            if let Value::List(group) = item {
                if group.get(0).matches_key(key) {
                    if group.len() == 2 {
                        return group.get(1).clone();
                    }
                    let mut tail = Bottle::new();
                    tail.copy_range(group, 1, usize::MAX);
                    return Value::List(tail);
                }
            }
        }
        Value::Null
    }

    /// Sub-list headed by `key`, or [`Bottle::null`].
    pub fn find_group(&self, key: &str) -> &Bottle {
        for item in self.items.iter() {
            if let Value::List(group) = item {
                if group.get(0).matches_key(key) {
                    return group;
                }
            }
        }
        Bottle::null()
    }

    /// Whether `key` appears as a key element or a group head.
    pub fn check(&self, key: &str) -> bool {
        self.items.iter().any(|item| match item {
            Value::List(group) => group.get(0).matches_key(key),
            other => other.matches_key(key),
        })
    }

    // ------------------------------------------------------------------
    // Encodings
    // ------------------------------------------------------------------

    /// Common scalar tag of every element, or 0 for mixed/empty bottles.
    pub fn specialization(&self) -> i32 {
        let first = match self.items.first() {
            Some(v) => v.kind(),
            None => return 0,
        };
        if first.is_specializable() && self.items.iter().all(|v| v.kind() == first) {
            first.tag()
        } else {
            0
        }
    }

    /// Common kind when [`specialization`](Self::specialization) is non-zero.
    pub fn specialized_kind(&self) -> Option<ValueKind> {
        (self.specialization() != 0).then(|| self.get(0).kind())
    }

    /// Parse the text form strictly.
    pub fn parse(s: &str) -> Result<Bottle> {
        text::parse(s)
    }

    /// Parse the text form, logging and returning an empty bottle on error.
    pub fn from_string(s: &str) -> Bottle {
        match text::parse(s) {
            Ok(b) => b,
            Err(e) => {
                log::warn!("[Bottle] cannot parse {:?}: {}", s, e);
                Bottle::new()
            }
        }
    }

    /// Binary form in a fresh buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = ConnectionWriter::new();
        binary::write(self, &mut writer);
        writer.to_bytes()
    }

    /// Decode a binary buffer. Trailing bytes are a protocol error.
    pub fn decode(bytes: &[u8]) -> Result<Bottle> {
        let mut reader = ConnectionReader::from_bytes(bytes.to_vec());
        let bottle = binary::read(&mut reader)?;
        if reader.size() != 0 {
            return Err(crate::Error::protocol(format!(
                "{} trailing bytes after bottle",
                reader.size()
            )));
        }
        Ok(bottle)
    }

    /// Decode a bare (tag-free) payload using a layout agreed out of band.
    pub fn read_bare(reader: &mut ConnectionReader<'_>, layout: &[BareField]) -> Result<Bottle> {
        binary::read_bare(reader, layout)
    }
}

impl Portable for Bottle {
    fn read(&mut self, reader: &mut ConnectionReader<'_>) -> bool {
        if self.null {
            log::warn!("[Bottle] read into the null bottle ignored");
            reader.set_error();
            return false;
        }
        let result = if reader.is_text_mode() {
            reader
                .expect_text(b'\n')
                .ok_or_else(|| crate::Error::protocol("missing text line"))
                .and_then(|line| text::parse(&line))
        } else {
            binary::read(reader)
        };
        match result {
            Ok(bottle) => {
                self.items = bottle.items;
                true
            }
            Err(e) => {
                log::debug!("[Bottle] read failed: {}", e);
                reader.set_error();
                false
            }
        }
    }

    fn write(&self, writer: &mut ConnectionWriter) -> bool {
        if writer.is_text_mode() {
            writer.append_line(&self.to_string());
        } else {
            binary::write(self, writer);
        }
        true
    }
}

impl fmt::Display for Bottle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        text::write_bottle(f, self)
    }
}

impl fmt::Debug for Bottle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.null {
            return f.write_str("Bottle(null)");
        }
        write!(f, "Bottle({})", self)
    }
}

impl FromIterator<Value> for Bottle {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Bottle {
            items: Arc::new(iter.into_iter().collect()),
            null: false,
        }
    }
}

impl<'a> IntoIterator for &'a Bottle {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_bottle() -> Bottle {
        let mut b = Bottle::new();
        b.add_string("name").add_string("camera");
        b.add_list().add_string("size").add_int32(640);
        b.add_list()
            .add_string("range")
            .add_float64(0.5)
            .add_float64(2.0);
        b
    }

    #[test]
    fn test_get_out_of_range_is_null() {
        let b = config_bottle();
        assert!(b.get(99).is_null());
        assert_eq!(b.len(), 4);
    }

    #[test]
    fn test_find_pair_key_and_group() {
        let b = config_bottle();
        assert_eq!(b.find("name"), Value::from("camera"));
        assert_eq!(b.find("size"), Value::Int32(640));
        let range = b.find("range");
        assert_eq!(range.as_list().unwrap().len(), 2);
        assert!(b.find("missing").is_null());
        assert!(b.check("size"));
        assert!(!b.check("640"));
    }

    #[test]
    fn test_find_group_miss_returns_sentinel() {
        let b = config_bottle();
        assert_eq!(b.find_group("size").len(), 2);
        assert!(b.find_group("nothing").is_null());
    }

    #[test]
    fn test_null_sentinel_rejects_mutation() {
        let mut n = Bottle::null().clone();
        n.add_int32(1).add_string("x");
        n.add_list().add_int32(2);
        n.clear();
        assert!(n.is_empty());
        assert!(n.is_null());
        assert!(matches!(n.try_add(5), Err(Error::ReadOnly)));

        let mut b = Bottle::new();
        b.try_add(5).unwrap().try_add("x").unwrap();
        assert_eq!(b.to_string(), "5 x");
        assert!(Bottle::null().is_empty());
    }

    #[test]
    fn test_copy_on_write_detaches() {
        let a = config_bottle();
        let mut b = a.clone();
        b.add_int32(7);
        assert_eq!(a.len(), 4);
        assert_eq!(b.len(), 5);
    }

    #[test]
    fn test_copy_range_clamps() {
        let src = config_bottle();
        let mut dst = Bottle::new();
        dst.copy_range(&src, 1, usize::MAX);
        assert_eq!(dst.len(), 3);
        dst.copy_range(&src, 10, 2);
        assert!(dst.is_empty());
    }

    #[test]
    fn test_specialization() {
        let mut ints = Bottle::new();
        ints.add_int32(1).add_int32(2);
        assert_eq!(ints.specialization(), crate::value::TAG_INT32);
        assert_eq!(ints.specialized_kind(), Some(ValueKind::Int32));
        assert_eq!(Bottle::new().specialization(), 0);
        assert_eq!(config_bottle().specialization(), 0);
    }

    #[test]
    fn test_portable_text_and_binary() {
        let b = config_bottle();

        let mut w = ConnectionWriter::text();
        assert!(b.write(&mut w));
        let text = String::from_utf8(w.to_bytes()).unwrap();
        assert_eq!(text, "name camera (size 640) (range 0.5 2.0)\n");

        let mut r = ConnectionReader::from_text(&text);
        let mut back = Bottle::new();
        assert!(back.read(&mut r));
        assert_eq!(back, b);

        let mut w = ConnectionWriter::new();
        assert!(b.write(&mut w));
        let mut r = ConnectionReader::from_bytes(w.to_bytes());
        let mut back = Bottle::new();
        assert!(back.read(&mut r));
        assert_eq!(back, b);
    }

    #[test]
    fn test_from_string_is_lenient() {
        assert!(Bottle::from_string("(unbalanced").is_empty());
        assert!(Bottle::parse("(unbalanced").is_err());
    }
}
