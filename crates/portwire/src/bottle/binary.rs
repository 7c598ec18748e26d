// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Binary bottle codec.
//!
//! # Layout
//!
//! ```text
//! bottle   := [LIST | subcode : i32] [count : i32] element*
//! element  := [tag : i32]? content          (tag omitted when subcode != 0)
//! content  := int32 (4) | int64 (8) | float64 (8) | vocab (4)
//!           | string [len incl NUL : i32] bytes NUL
//!           | blob   [len : i32] bytes
//!           | list   [count : i32] element*   (element tag = LIST | subcode)
//!           | dict   [count : i32] (key-string-content [tag : i32] content)*
//!           | null   (nothing)
//! ```
//!
//! Bare mode drops the top tag, the top count and every element tag;
//! nested lists keep their count. A bare payload is only readable with a
//! [`BareField`] layout agreed out of band.

use super::Bottle;
use crate::error::{Error, Result};
use crate::reader::ConnectionReader;
use crate::value::{
    Value, ValueKind, Vocab, TAG_BLOB, TAG_DICT, TAG_FLOAT32, TAG_FLOAT64, TAG_INT16, TAG_INT32,
    TAG_INT64, TAG_INT8, TAG_LIST, TAG_NULL, TAG_STRING, TAG_VOCAB,
};
use crate::writer::ConnectionWriter;
use std::collections::BTreeMap;

/// Deepest list/dict nesting accepted on read.
pub const MAX_NESTING_DEPTH: usize = 64;

/// One field of a bare (tag-free) layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BareField {
    /// Single scalar of the given kind.
    Scalar(ValueKind),
    /// Counted sequence (`[count:i32]` then elements), decoded as a nested list.
    Seq(Box<BareField>),
}

impl BareField {
    /// Sequence of `inner`.
    pub fn seq(inner: BareField) -> Self {
        BareField::Seq(Box::new(inner))
    }
}

// ============================================================================
// Write
// ============================================================================

/// Encode `bottle` into `writer`, honouring the writer's bare mode.
pub fn write(bottle: &Bottle, writer: &mut ConnectionWriter) {
    let bare = writer.is_bare_mode();
    let sub = bottle.specialization();
    if !bare {
        writer.append_int32(TAG_LIST | sub);
        writer.append_int32(bottle.len() as i32);
    }
    for item in bottle.iter() {
        write_element(writer, item, sub, bare);
    }
}

fn write_element(writer: &mut ConnectionWriter, value: &Value, sub: i32, bare: bool) {
    if sub == 0 && !bare {
        writer.append_int32(value.tag());
    }
    write_content(writer, value, bare);
}

fn write_content(writer: &mut ConnectionWriter, value: &Value, bare: bool) {
    match value {
        Value::Null => {}
        Value::Int32(v) => writer.append_int32(*v),
        Value::Int64(v) => writer.append_int64(*v),
        Value::Float64(v) => writer.append_float64(*v),
        Value::Vocab(v) => writer.append_int32(v.code() as i32),
        Value::String(s) => writer.append_string(s),
        Value::Blob(bytes) => {
            writer.append_int32(bytes.len() as i32);
            writer.append_block(bytes);
        }
        Value::List(list) => {
            let sub = list.specialization();
            writer.append_int32(list.len() as i32);
            for item in list.iter() {
                write_element(writer, item, sub, bare);
            }
        }
        Value::Dict(map) => {
            writer.append_int32(map.len() as i32);
            for (key, item) in map {
                writer.append_string(key);
                if !bare {
                    writer.append_int32(item.tag());
                }
                write_content(writer, item, bare);
            }
        }
    }
}

// ============================================================================
// Read
// ============================================================================

/// Decode one tagged bottle. On failure the reader's error flag is set.
pub fn read(reader: &mut ConnectionReader<'_>) -> Result<Bottle> {
    let result = read_tagged(reader);
    if result.is_err() {
        reader.set_error();
    }
    result
}

fn read_tagged(reader: &mut ConnectionReader<'_>) -> Result<Bottle> {
    let tag = expect_i32(reader)?;
    if tag & TAG_LIST == 0 {
        return Err(Error::protocol(format!("expected list tag, got {}", tag)));
    }
    read_list(reader, tag & !TAG_LIST, 0)
}

fn expect_i32(reader: &mut ConnectionReader<'_>) -> Result<i32> {
    reader
        .expect_int32()
        .ok_or_else(|| Error::protocol("short read"))
}

/// Smallest encoding of one element under list subcode `sub`.
fn min_element_width(sub: i32) -> usize {
    match sub {
        TAG_INT8 => 1,
        TAG_INT16 => 2,
        _ => 4,
    }
}

/// Read a non-negative count whose elements (at least `width` bytes each)
/// fit in the declared remainder.
fn expect_count(reader: &mut ConnectionReader<'_>, width: usize) -> Result<usize> {
    let count = expect_i32(reader)?;
    let count = usize::try_from(count)
        .map_err(|_| Error::protocol(format!("negative count {}", count)))?;
    if count.saturating_mul(width) > reader.size() {
        return Err(Error::protocol(format!(
            "count {} exceeds the {} declared bytes left",
            count,
            reader.size()
        )));
    }
    Ok(count)
}

fn expect_len(reader: &mut ConnectionReader<'_>) -> Result<usize> {
    let len = expect_i32(reader)?;
    let len =
        usize::try_from(len).map_err(|_| Error::protocol(format!("negative length {}", len)))?;
    if len > reader.size() {
        return Err(Error::protocol(format!(
            "length {} exceeds the {} declared bytes left",
            len,
            reader.size()
        )));
    }
    Ok(len)
}

fn read_list(reader: &mut ConnectionReader<'_>, sub: i32, depth: usize) -> Result<Bottle> {
    if depth > MAX_NESTING_DEPTH {
        return Err(Error::protocol("nesting too deep"));
    }
    if sub & (TAG_LIST | TAG_DICT) != 0 {
        return Err(Error::protocol(format!("bad list subcode {}", sub)));
    }
    let count = expect_count(reader, min_element_width(sub))?;
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        let tag = if sub != 0 { sub } else { expect_i32(reader)? };
        items.push(read_content(reader, tag, depth)?);
    }
    Ok(items.into_iter().collect())
}

fn read_string(reader: &mut ConnectionReader<'_>) -> Result<String> {
    let len = expect_len(reader)?;
    reader
        .expect_string(len)
        .ok_or_else(|| Error::protocol("short string"))
}

fn read_content(reader: &mut ConnectionReader<'_>, tag: i32, depth: usize) -> Result<Value> {
    let short = || Error::protocol("short read");
    let value = match tag {
        TAG_NULL => Value::Null,
        TAG_INT32 => Value::Int32(expect_i32(reader)?),
        TAG_INT8 => Value::Int32(i32::from(reader.expect_int8().ok_or_else(short)?)),
        TAG_INT16 => Value::Int32(i32::from(reader.expect_int16().ok_or_else(short)?)),
        TAG_INT64 => Value::Int64(reader.expect_int64().ok_or_else(short)?),
        TAG_FLOAT64 => Value::Float64(reader.expect_float64().ok_or_else(short)?),
        TAG_FLOAT32 => Value::Float64(f64::from(reader.expect_float32().ok_or_else(short)?)),
        TAG_VOCAB => Value::Vocab(Vocab::from_code(expect_i32(reader)? as u32)),
        TAG_STRING => Value::String(read_string(reader)?),
        TAG_BLOB => {
            let len = expect_len(reader)?;
            Value::Blob(reader.expect_block(len).ok_or_else(short)?)
        }
        TAG_DICT => {
            if depth >= MAX_NESTING_DEPTH {
                return Err(Error::protocol("nesting too deep"));
            }
            let count = expect_count(reader, 8)?;
            let mut map = BTreeMap::new();
            for _ in 0..count {
                let key = read_string(reader)?;
                let item_tag = expect_i32(reader)?;
                map.insert(key, read_content(reader, item_tag, depth + 1)?);
            }
            Value::Dict(map)
        }
        t if t & TAG_LIST != 0 => Value::List(read_list(reader, t & !TAG_LIST, depth + 1)?),
        other => return Err(Error::protocol(format!("unknown tag {}", other))),
    };
    Ok(value)
}

// ============================================================================
// Bare read
// ============================================================================

/// Decode a bare payload: one value per top-level field of `layout`.
pub fn read_bare(reader: &mut ConnectionReader<'_>, layout: &[BareField]) -> Result<Bottle> {
    let result = layout
        .iter()
        .map(|field| read_bare_field(reader, field, 0))
        .collect::<Result<Bottle>>();
    if result.is_err() {
        reader.set_error();
    }
    result
}

fn read_bare_field(
    reader: &mut ConnectionReader<'_>,
    field: &BareField,
    depth: usize,
) -> Result<Value> {
    match field {
        BareField::Scalar(kind) => match kind {
            ValueKind::List | ValueKind::Dict => {
                Err(Error::protocol("bare containers need a Seq layout"))
            }
            kind => read_content(reader, kind.tag(), depth),
        },
        BareField::Seq(inner) => {
            if depth >= MAX_NESTING_DEPTH {
                return Err(Error::protocol("nesting too deep"));
            }
            let count = expect_count(reader, 4)?;
            (0..count)
                .map(|_| read_bare_field(reader, inner, depth + 1))
                .collect::<Result<Bottle>>()
                .map(Value::List)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(bytes: Vec<u8>) -> Result<Bottle> {
        let mut r = ConnectionReader::from_bytes(bytes);
        read(&mut r)
    }

    fn words(ws: &[i32]) -> Vec<u8> {
        ws.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn test_homogeneous_ints_omit_element_tags() {
        let mut b = Bottle::new();
        b.add_int32(1).add_int32(2).add_int32(3);
        assert_eq!(b.encode(), words(&[TAG_LIST | TAG_INT32, 3, 1, 2, 3]));
    }

    #[test]
    fn test_mixed_elements_are_tagged() {
        let mut b = Bottle::new();
        b.add_int32(5).add_string("a");
        let mut expected = words(&[TAG_LIST, 2, TAG_INT32, 5, TAG_STRING, 2]);
        expected.extend_from_slice(b"a\0");
        assert_eq!(b.encode(), expected);
    }

    #[test]
    fn test_concrete_scenario_is_deterministic() {
        let mut b = Bottle::new();
        b.add_string("set").add_string("name").add_int32(42).add_float64(3.14);
        b.add_list().add_string("a").add_string("b");

        let mut expected = words(&[TAG_LIST, 5, TAG_STRING, 4]);
        expected.extend_from_slice(b"set\0");
        expected.extend(words(&[TAG_STRING, 5]));
        expected.extend_from_slice(b"name\0");
        expected.extend(words(&[TAG_INT32, 42, TAG_FLOAT64]));
        expected.extend_from_slice(&3.14f64.to_le_bytes());
        expected.extend(words(&[TAG_LIST | TAG_STRING, 2, 2]));
        expected.extend_from_slice(b"a\0");
        expected.extend(words(&[2]));
        expected.extend_from_slice(b"b\0");

        assert_eq!(b.encode(), expected);
        assert_eq!(b.encode(), b.clone().encode());
        assert_eq!(decode(expected).unwrap(), b);
    }

    #[test]
    fn test_narrow_tags_are_widened() {
        let mut bytes = words(&[TAG_LIST, 3, TAG_INT8]);
        bytes.push(0xFE);
        bytes.extend(words(&[TAG_INT16]));
        bytes.extend_from_slice(&300i16.to_le_bytes());
        bytes.extend(words(&[TAG_FLOAT32]));
        bytes.extend_from_slice(&0.5f32.to_le_bytes());
        let b = decode(bytes).unwrap();
        assert_eq!(b.get(0), &Value::Int32(-2));
        assert_eq!(b.get(1), &Value::Int32(300));
        assert_eq!(b.get(2), &Value::Float64(0.5));
    }

    #[test]
    fn test_specialized_narrow_lists_are_widened() {
        let mut bytes = words(&[TAG_LIST | TAG_INT8, 3]);
        bytes.extend_from_slice(&[1, 2, 0xFF]);
        let b = decode(bytes).unwrap();
        assert_eq!(b.len(), 3);
        assert_eq!(b.get(0), &Value::Int32(1));
        assert_eq!(b.get(2), &Value::Int32(-1));

        let mut bytes = words(&[TAG_LIST | TAG_INT16, 2]);
        bytes.extend_from_slice(&1i16.to_le_bytes());
        bytes.extend_from_slice(&(-300i16).to_le_bytes());
        let b = decode(bytes).unwrap();
        assert_eq!(b.get(0), &Value::Int32(1));
        assert_eq!(b.get(1), &Value::Int32(-300));

        // One byte short of the declared count.
        let mut bytes = words(&[TAG_LIST | TAG_INT16, 2]);
        bytes.extend_from_slice(&[1, 0, 2]);
        assert!(decode(bytes).is_err());
    }

    #[test]
    fn test_dict_and_null_roundtrip() {
        let mut map = BTreeMap::new();
        map.insert("gain".to_owned(), Value::Float64(0.1));
        map.insert("id".to_owned(), Value::Int64(1 << 40));
        let mut b = Bottle::new();
        b.add_dict(map).add_null().add_blob(&[0, 255]);
        assert_eq!(decode(b.encode()).unwrap(), b);
    }

    #[test]
    fn test_bad_input_is_rejected() {
        assert!(decode(words(&[TAG_INT32, 1])).is_err());
        assert!(decode(words(&[TAG_LIST, 1000])).is_err());
        assert!(decode(words(&[TAG_LIST, -1])).is_err());
        assert!(decode(words(&[TAG_LIST, 1, 7777, 0])).is_err());

        let mut r = ConnectionReader::from_bytes(words(&[TAG_LIST, 2, TAG_INT32]));
        assert!(read(&mut r).is_err());
        assert!(r.is_error());
    }

    #[test]
    fn test_deep_nesting_is_bounded() {
        let depth = MAX_NESTING_DEPTH + 2;
        let mut ws = vec![TAG_LIST, 1];
        for _ in 0..depth {
            ws.extend([TAG_LIST, 1]);
        }
        ws.extend([TAG_INT32, 0]);
        assert!(decode(words(&ws)).is_err());
    }

    #[test]
    fn test_bare_write_and_read() {
        let mut b = Bottle::new();
        b.add_int32(7).add_float64(1.5);
        b.add_list().add_int32(1).add_int32(2);

        let mut w = ConnectionWriter::new();
        w.set_bare_mode(true);
        write(&b, &mut w);
        let mut expected = words(&[7]);
        expected.extend_from_slice(&1.5f64.to_le_bytes());
        expected.extend(words(&[2, 1, 2]));
        assert_eq!(w.to_bytes(), expected);

        let layout = [
            BareField::Scalar(ValueKind::Int32),
            BareField::Scalar(ValueKind::Float64),
            BareField::seq(BareField::Scalar(ValueKind::Int32)),
        ];
        let mut r = ConnectionReader::from_bytes(expected);
        r.set_bare_mode(true);
        assert_eq!(read_bare(&mut r, &layout).unwrap(), b);
    }
}
