// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::float_cmp)] // Exact float round trips are the point
#![allow(clippy::cast_possible_truncation)] // Test parameters

//! Bottle codec integration tests.
//!
//! Randomized bottles (seeded `fastrand`) must survive the binary codec
//! exactly, and the text codec for the kinds text can represent.

use portwire::{Bottle, ConnectionReader, ConnectionWriter, Portable, Value, Vocab};

fn random_word(rng: &mut fastrand::Rng) -> String {
    let len = rng.usize(1..12);
    (0..len)
        .map(|i| {
            if i > 0 && rng.u8(0..6) == 0 {
                ' '
            } else {
                rng.alphanumeric()
            }
        })
        .collect()
}

/// Bottle using only int32, float64, string and nested lists.
fn random_text_safe(rng: &mut fastrand::Rng, depth: usize) -> Bottle {
    let mut bottle = Bottle::new();
    for _ in 0..rng.usize(1..8) {
        match rng.u8(0..4) {
            0 => {
                bottle.add_int32(rng.i32(..));
            }
            1 => {
                bottle.add_float64((rng.f64() - 0.5) * 1e6);
            }
            2 => {
                bottle.add_string(&random_word(rng));
            }
            _ if depth < 3 => {
                let nested = random_text_safe(rng, depth + 1);
                bottle.add(Value::List(nested));
            }
            _ => {
                bottle.add_int32(rng.i32(-10..10));
            }
        }
    }
    bottle
}

/// Bottle using every writable kind.
fn random_any(rng: &mut fastrand::Rng, depth: usize) -> Bottle {
    let mut bottle = Bottle::new();
    for _ in 0..rng.usize(0..10) {
        match rng.u8(0..8) {
            0 => {
                bottle.add_int32(rng.i32(..));
            }
            1 => {
                bottle.add_int64(rng.i64(..));
            }
            2 => {
                bottle.add_float64(rng.f64() * 1e3);
            }
            3 => {
                bottle.add_string(&random_word(rng));
            }
            4 => {
                bottle.add_vocab(Vocab::encode("get"));
            }
            5 => {
                let blob: Vec<u8> = (0..rng.usize(0..16)).map(|_| rng.u8(..)).collect();
                bottle.add_blob(&blob);
            }
            6 if depth < 4 => {
                bottle.add(Value::List(random_any(rng, depth + 1)));
            }
            _ => {
                // Homogeneous run, exercises list specialization.
                let mut ints = Bottle::new();
                for _ in 0..rng.usize(1..6) {
                    ints.add_int32(rng.i32(..));
                }
                bottle.add(Value::List(ints));
            }
        }
    }
    bottle
}

#[test]
fn test_binary_round_trip_randomized() {
    let mut rng = fastrand::Rng::with_seed(0x5eed_b077);
    for _ in 0..200 {
        let bottle = random_any(&mut rng, 0);
        let bytes = bottle.encode();
        let back = Bottle::decode(&bytes).expect("decodes what it encoded");
        assert_eq!(back, bottle, "binary mismatch for {}", bottle);
    }
}

#[test]
fn test_text_round_trip_randomized() {
    let mut rng = fastrand::Rng::with_seed(42);
    for _ in 0..200 {
        let bottle = random_text_safe(&mut rng, 0);
        let text = bottle.to_string();
        let back = Bottle::parse(&text).expect("parses what it printed");
        assert_eq!(back, bottle, "text mismatch for {:?}", text);
    }
}

#[test]
fn test_portable_through_writer_and_reader() {
    let mut rng = fastrand::Rng::with_seed(7);
    for _ in 0..50 {
        let bottle = random_any(&mut rng, 0);
        let mut writer = ConnectionWriter::new();
        assert!(bottle.write(&mut writer));
        let mut reader = ConnectionReader::from_bytes(writer.to_bytes());
        let mut back = Bottle::new();
        assert!(back.read(&mut reader));
        assert_eq!(back, bottle);
        assert_eq!(reader.size(), 0);
    }
}

#[test]
fn test_truncated_input_never_panics() {
    let mut rng = fastrand::Rng::with_seed(99);
    for _ in 0..100 {
        let bytes = random_any(&mut rng, 0).encode();
        if bytes.is_empty() {
            continue;
        }
        let cut = rng.usize(0..bytes.len());
        assert!(Bottle::decode(&bytes[..cut]).is_err());
    }
}

#[test]
fn test_concrete_command_scenario() {
    let bottle = Bottle::parse("set name 42 3.14 (a b)").expect("valid text");
    assert_eq!(bottle.len(), 5);
    assert_eq!(bottle.get(0).as_str(), Some("set"));
    assert_eq!(bottle.get(2), &Value::Int32(42));
    assert_eq!(bottle.get(3), &Value::Float64(3.14));
    assert_eq!(bottle.find("name"), Value::Int32(42));
    let group = bottle.get(4).as_list().expect("nested list");
    assert_eq!(group.to_string(), "a b");

    let back = Bottle::decode(&bottle.encode()).expect("binary round trip");
    assert_eq!(back.to_string(), "set name 42 3.14 (a b)");
}
