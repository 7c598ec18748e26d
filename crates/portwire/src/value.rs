// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tagged value type carried by bottles.
//!
//! Every [`Value`] has a numeric wire tag. Tags are a cross-implementation
//! contract and must match bit for bit:
//!
//! ```text
//! INT32   = 1          STRING  = 4          VOCAB   = 1 + 8
//! BLOB    = 4 + 8      INT64   = 1 + 16     FLOAT64 = 2 + 16
//! INT8    = 32 + 1     INT16   = 64 + 1     FLOAT32 = 128 + 2
//! LIST    = 256        DICT    = 512        (container bits)
//! ```
//!
//! `INT8`, `INT16` and `FLOAT32` are accepted on read and widened; this
//! crate never emits them.

use crate::bottle::Bottle;
use std::collections::BTreeMap;
use std::fmt;

/// Element tag of a null value (no content on the wire).
pub const TAG_NULL: i32 = 0;
/// 32-bit signed integer.
pub const TAG_INT32: i32 = 1;
/// Length-prefixed, NUL-terminated string.
pub const TAG_STRING: i32 = 4;
/// Packed 4-character symbolic code.
pub const TAG_VOCAB: i32 = 1 + 8;
/// Length-prefixed raw bytes.
pub const TAG_BLOB: i32 = 4 + 8;
/// 64-bit signed integer.
pub const TAG_INT64: i32 = 1 + 16;
/// IEEE 754 double.
pub const TAG_FLOAT64: i32 = 2 + 16;
/// 8-bit signed integer (read only).
pub const TAG_INT8: i32 = 32 + 1;
/// 16-bit signed integer (read only).
pub const TAG_INT16: i32 = 64 + 1;
/// IEEE 754 single (read only).
pub const TAG_FLOAT32: i32 = 128 + 2;
/// Container bit: ordered list.
pub const TAG_LIST: i32 = 256;
/// Container bit: key/value dictionary.
pub const TAG_DICT: i32 = 512;

/// Compact symbolic code: up to four ASCII characters packed little-endian.
///
/// ```
/// use portwire::Vocab;
///
/// let set = Vocab::encode("set");
/// assert_eq!(set.code(), b's' as u32 | (b'e' as u32) << 8 | (b't' as u32) << 16);
/// assert_eq!(set.decode(), "set");
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Vocab(u32);

impl Vocab {
    /// Pack up to the first four bytes of `s`.
    pub fn encode(s: &str) -> Self {
        let code = s
            .bytes()
            .take(4)
            .enumerate()
            .fold(0u32, |acc, (i, b)| acc | (u32::from(b) << (8 * i)));
        Self(code)
    }

    /// Wrap a raw code.
    pub const fn from_code(code: u32) -> Self {
        Self(code)
    }

    /// Raw packed code.
    pub const fn code(self) -> u32 {
        self.0
    }

    /// Unpack to text, stopping at the first zero byte.
    pub fn decode(self) -> String {
        self.0
            .to_le_bytes()
            .iter()
            .take_while(|&&b| b != 0)
            .map(|&b| char::from(b))
            .collect()
    }

    /// Whether the code round-trips through [`Vocab::decode`] as printable text.
    pub fn is_printable(self) -> bool {
        let bytes = self.0.to_le_bytes();
        let len = bytes.iter().take_while(|&&b| b != 0).count();
        bytes[..len].iter().all(|b| b.is_ascii_graphic())
            && bytes[len..].iter().all(|&b| b == 0)
            && len > 0
    }
}

impl fmt::Display for Vocab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.decode())
    }
}

/// Kind discriminant of a [`Value`], used by bare layouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Int32,
    Int64,
    Float64,
    Vocab,
    String,
    Blob,
    List,
    Dict,
}

impl ValueKind {
    /// Wire tag of this kind (`LIST`/`DICT` without subcode).
    pub fn tag(self) -> i32 {
        match self {
            ValueKind::Null => TAG_NULL,
            ValueKind::Int32 => TAG_INT32,
            ValueKind::Int64 => TAG_INT64,
            ValueKind::Float64 => TAG_FLOAT64,
            ValueKind::Vocab => TAG_VOCAB,
            ValueKind::String => TAG_STRING,
            ValueKind::Blob => TAG_BLOB,
            ValueKind::List => TAG_LIST,
            ValueKind::Dict => TAG_DICT,
        }
    }

    /// Whether bottles made only of this kind use the homogeneous encoding.
    pub fn is_specializable(self) -> bool {
        matches!(
            self,
            ValueKind::Int32
                | ValueKind::Int64
                | ValueKind::Float64
                | ValueKind::Vocab
                | ValueKind::String
                | ValueKind::Blob
        )
    }
}

/// Discriminated union carried by a [`Bottle`].
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Vocab(Vocab),
    String(String),
    Blob(Vec<u8>),
    List(Bottle),
    Dict(BTreeMap<String, Value>),
}

impl Value {
    /// Kind discriminant.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Int32(_) => ValueKind::Int32,
            Value::Int64(_) => ValueKind::Int64,
            Value::Float64(_) => ValueKind::Float64,
            Value::Vocab(_) => ValueKind::Vocab,
            Value::String(_) => ValueKind::String,
            Value::Blob(_) => ValueKind::Blob,
            Value::List(_) => ValueKind::List,
            Value::Dict(_) => ValueKind::Dict,
        }
    }

    /// Element tag as written on the wire (nested lists carry their subcode).
    pub fn tag(&self) -> i32 {
        match self {
            Value::List(list) => TAG_LIST | list.specialization(),
            other => other.kind().tag(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view (int32, int64 and vocab codes).
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(v) => Some(i64::from(*v)),
            Value::Int64(v) => Some(*v),
            Value::Vocab(v) => Some(i64::from(v.code())),
            _ => None,
        }
    }

    /// Floating-point view (integers are widened).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float64(v) => Some(*v),
            Value::Int32(v) => Some(f64::from(*v)),
            Value::Int64(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_vocab(&self) -> Option<Vocab> {
        match self {
            Value::Vocab(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Bottle> {
        match self {
            Value::List(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Whether this value names `key` (string or vocab with the same text).
    pub(crate) fn matches_key(&self, key: &str) -> bool {
        match self {
            Value::String(s) => s == key,
            Value::Vocab(v) => v.decode() == key,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::bottle::text::write_value(f, self)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<Vocab> for Value {
    fn from(v: Vocab) -> Self {
        Value::Vocab(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl From<Bottle> for Value {
    fn from(v: Bottle) -> Self {
        Value::List(v)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Value::Dict(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_values_are_wire_contract() {
        assert_eq!(TAG_INT32, 1);
        assert_eq!(TAG_VOCAB, 9);
        assert_eq!(TAG_FLOAT64, 18);
        assert_eq!(TAG_STRING, 4);
        assert_eq!(TAG_BLOB, 12);
        assert_eq!(TAG_INT64, 17);
        assert_eq!(TAG_LIST, 256);
        assert_eq!(TAG_DICT, 512);
    }

    #[test]
    fn test_vocab_roundtrip_and_truncation() {
        assert_eq!(Vocab::encode("ok").decode(), "ok");
        assert_eq!(Vocab::encode("toolong").decode(), "tool");
        assert!(Vocab::encode("set").is_printable());
        assert!(!Vocab::from_code(0).is_printable());
        assert!(!Vocab::from_code(0x0001_0061).is_printable());
    }

    #[test]
    fn test_nested_list_tag_carries_subcode() {
        let mut ints = Bottle::new();
        ints.add_int32(1).add_int32(2);
        assert_eq!(Value::from(ints).tag(), TAG_LIST | TAG_INT32);

        let mut mixed = Bottle::new();
        mixed.add_int32(1).add_string("x");
        assert_eq!(Value::from(mixed).tag(), TAG_LIST);
    }

    #[test]
    fn test_numeric_views() {
        assert_eq!(Value::Int32(7).as_f64(), Some(7.0));
        assert_eq!(Value::Int64(-3).as_i64(), Some(-3));
        assert_eq!(Value::from("x").as_i64(), None);
        assert!(Value::Vocab(Vocab::encode("go")).matches_key("go"));
    }
}
