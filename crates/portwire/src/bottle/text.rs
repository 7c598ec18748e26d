// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Text bottle codec.
//!
//! ```text
//! bottle := value (' ' value)*
//! value  := null | int32 | int64 'L' | float | inf | -inf | nan
//!         | bare-string | '"' escaped-string '"'
//!         | '[' vocab ']' | '[#' decimal ']'
//!         | '{' byte* '}' | '(' bottle ')' | '<' (key value)* '>'
//! ```
//!
//! Printing is lossless: integers that do not fit in 32 bits are never
//! confused with int32 (`L` suffix), floats always carry a `.` or an
//! exponent, and a string is quoted whenever its bare form would parse as
//! something else.

use super::Bottle;
use crate::error::{Error, Result};
use crate::value::{Value, Vocab};
use std::collections::BTreeMap;
use std::fmt::{self, Write};

const DELIMITERS: &[char] = &['(', ')', '[', ']', '{', '}', '<', '>', '"'];

// ============================================================================
// Printing
// ============================================================================

pub(crate) fn write_bottle<W: Write>(out: &mut W, bottle: &Bottle) -> fmt::Result {
    for (i, item) in bottle.iter().enumerate() {
        if i > 0 {
            out.write_char(' ')?;
        }
        write_value(out, item)?;
    }
    Ok(())
}

pub(crate) fn write_value<W: Write>(out: &mut W, value: &Value) -> fmt::Result {
    match value {
        Value::Null => out.write_str("null"),
        Value::Int32(v) => write!(out, "{}", v),
        Value::Int64(v) => write!(out, "{}L", v),
        Value::Float64(v) => write_float(out, *v),
        Value::Vocab(v) => write_vocab(out, *v),
        Value::String(s) => write_string(out, s),
        Value::Blob(bytes) => {
            out.write_char('{')?;
            for (i, b) in bytes.iter().enumerate() {
                if i > 0 {
                    out.write_char(' ')?;
                }
                write!(out, "{}", b)?;
            }
            out.write_char('}')
        }
        Value::List(list) => {
            out.write_char('(')?;
            write_bottle(out, list)?;
            out.write_char(')')
        }
        Value::Dict(map) => {
            out.write_char('<')?;
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.write_char(' ')?;
                }
                write_string(out, key)?;
                out.write_char(' ')?;
                write_value(out, item)?;
            }
            out.write_char('>')
        }
    }
}

fn write_float<W: Write>(out: &mut W, v: f64) -> fmt::Result {
    if v.is_nan() {
        out.write_str("nan")
    } else if v.is_infinite() {
        out.write_str(if v > 0.0 { "inf" } else { "-inf" })
    } else {
        // Debug keeps the shortest round-trip digits and a trailing ".0".
        write!(out, "{:?}", v)
    }
}

fn write_vocab<W: Write>(out: &mut W, v: Vocab) -> fmt::Result {
    let text = v.decode();
    if v.is_printable() && !text.contains(|c| c == '[' || c == ']' || c == '#') {
        write!(out, "[{}]", text)
    } else {
        write!(out, "[#{}]", v.code())
    }
}

fn needs_quotes(s: &str) -> bool {
    s.is_empty()
        || s
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '\\' || DELIMITERS.contains(&c))
        || !matches!(classify(s), Value::String(_))
}

fn write_string<W: Write>(out: &mut W, s: &str) -> fmt::Result {
    if !needs_quotes(s) {
        return out.write_str(s);
    }
    out.write_char('"')?;
    for c in s.chars() {
        match c {
            '"' => out.write_str("\\\"")?,
            '\\' => out.write_str("\\\\")?,
            '\n' => out.write_str("\\n")?,
            '\r' => out.write_str("\\r")?,
            '\t' => out.write_str("\\t")?,
            '\0' => out.write_str("\\0")?,
            c => out.write_char(c)?,
        }
    }
    out.write_char('"')
}

// ============================================================================
// Parsing
// ============================================================================

/// Interpret one unquoted token.
pub fn classify(token: &str) -> Value {
    match token {
        "null" => return Value::Null,
        "inf" | "+inf" => return Value::Float64(f64::INFINITY),
        "-inf" => return Value::Float64(f64::NEG_INFINITY),
        "nan" => return Value::Float64(f64::NAN),
        _ => {}
    }
    if let Some(digits) = token.strip_suffix('L') {
        if let Ok(v) = digits.parse::<i64>() {
            return Value::Int64(v);
        }
    }
    if let Ok(v) = token.parse::<i32>() {
        return Value::Int32(v);
    }
    if let Ok(v) = token.parse::<i64>() {
        return Value::Int64(v);
    }
    let numeric_start = token
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.'));
    if numeric_start {
        if let Ok(v) = token.parse::<f64>() {
            return Value::Float64(v);
        }
    }
    Value::String(token.to_owned())
}

/// Parse a whole text bottle.
pub fn parse(input: &str) -> Result<Bottle> {
    let mut parser = Parser {
        chars: input.char_indices().peekable(),
        input,
        depth: 0,
    };
    let bottle = parser.sequence(None)?;
    Ok(bottle)
}

struct Parser<'s> {
    chars: std::iter::Peekable<std::str::CharIndices<'s>>,
    input: &'s str,
    depth: usize,
}

impl Parser<'_> {
    fn error(&self, msg: &str) -> Error {
        Error::protocol(format!("text bottle: {} in {:?}", msg, self.input))
    }

    fn skip_whitespace(&mut self) {
        while self.chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
    }

    /// Values up to `close` (or end of input when `close` is `None`).
    fn sequence(&mut self, close: Option<char>) -> Result<Bottle> {
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            match (self.chars.peek().map(|&(_, c)| c), close) {
                (None, None) => break,
                (None, Some(c)) => return Err(self.error(&format!("missing '{}'", c))),
                (Some(c), Some(expected)) if c == expected => {
                    self.chars.next();
                    break;
                }
                _ => items.push(self.value()?),
            }
        }
        Ok(items.into_iter().collect())
    }

    fn value(&mut self) -> Result<Value> {
        let (start, c) = match self.chars.peek() {
            Some(&item) => item,
            None => return Err(self.error("unexpected end")),
        };
        match c {
            '(' => {
                self.chars.next();
                self.nested(|p| p.sequence(Some(')')).map(Value::List))
            }
            '[' => {
                self.chars.next();
                self.vocab()
            }
            '{' => {
                self.chars.next();
                self.blob()
            }
            '<' => {
                self.chars.next();
                self.nested(|p| p.dict())
            }
            '"' => {
                self.chars.next();
                self.quoted().map(Value::String)
            }
            ')' | ']' | '}' | '>' => Err(self.error(&format!("unexpected '{}'", c))),
            _ => {
                let token = self.token(start);
                Ok(classify(token))
            }
        }
    }

    fn nested(&mut self, f: impl FnOnce(&mut Self) -> Result<Value>) -> Result<Value> {
        if self.depth >= super::MAX_NESTING_DEPTH {
            return Err(self.error("nesting too deep"));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// Bare token starting at byte offset `start`.
    fn token(&mut self, start: usize) -> &str {
        let input = self.input;
        let mut end = input.len();
        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_whitespace() || DELIMITERS.contains(&c) {
                end = i;
                break;
            }
            self.chars.next();
        }
        &input[start..end]
    }

    fn until(&mut self, close: char) -> Result<String> {
        let mut text = String::new();
        for (_, c) in self.chars.by_ref() {
            if c == close {
                return Ok(text);
            }
            text.push(c);
        }
        Err(self.error(&format!("missing '{}'", close)))
    }

    fn vocab(&mut self) -> Result<Value> {
        let text = self.until(']')?;
        if let Some(code) = text.strip_prefix('#') {
            let code = code
                .parse::<u32>()
                .map_err(|_| self.error("bad numeric vocab"))?;
            return Ok(Value::Vocab(Vocab::from_code(code)));
        }
        Ok(Value::Vocab(Vocab::encode(&text)))
    }

    fn blob(&mut self) -> Result<Value> {
        let text = self.until('}')?;
        text.split_whitespace()
            .map(|b| b.parse::<u8>().map_err(|_| self.error("bad blob byte")))
            .collect::<Result<Vec<u8>>>()
            .map(Value::Blob)
    }

    fn dict(&mut self) -> Result<Value> {
        let mut map = BTreeMap::new();
        loop {
            self.skip_whitespace();
            match self.chars.peek() {
                None => return Err(self.error("missing '>'")),
                Some(&(_, '>')) => {
                    self.chars.next();
                    return Ok(Value::Dict(map));
                }
                Some(_) => {}
            }
            let key = match self.value()? {
                Value::String(s) => s,
                other => other.to_string(),
            };
            self.skip_whitespace();
            if matches!(self.chars.peek(), None | Some(&(_, '>'))) {
                return Err(self.error("dict key without value"));
            }
            let item = self.value()?;
            map.insert(key, item);
        }
    }

    fn quoted(&mut self) -> Result<String> {
        let mut text = String::new();
        while let Some((_, c)) = self.chars.next() {
            match c {
                '"' => return Ok(text),
                '\\' => match self.chars.next() {
                    Some((_, 'n')) => text.push('\n'),
                    Some((_, 'r')) => text.push('\r'),
                    Some((_, 't')) => text.push('\t'),
                    Some((_, '0')) => text.push('\0'),
                    Some((_, other)) => text.push(other),
                    None => break,
                },
                c => text.push(c),
            }
        }
        Err(self.error("unterminated string"))
    }
}
