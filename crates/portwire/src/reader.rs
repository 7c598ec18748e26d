// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cursor over one incoming message.
//!
//! A [`ConnectionReader`] reads at most the number of bytes the sender
//! declared in the message index. Every primitive returns `Option`/`bool`;
//! the first failure (short read, over-read, bad data) sets a sticky error
//! flag and every later read fails without touching the stream.
//!
//! ```
//! use portwire::{ConnectionReader, ConnectionWriter};
//!
//! let mut writer = ConnectionWriter::new();
//! writer.append_int32(7);
//! let mut reader = ConnectionReader::from_bytes(writer.to_bytes());
//! assert_eq!(reader.expect_int32(), Some(7));
//! assert_eq!(reader.expect_int32(), None);
//! assert!(!reader.is_good());
//! ```

use crate::bottle::Bottle;
use crate::transport::TwoWayStream;
use crate::writer::{ConnectionWriter, SharedObject};
use std::io::{self, Read};

/// Generate little-endian expect methods for primitive types.
macro_rules! impl_expect_le {
    ($name:ident, $type:ty, $size:expr) => {
        pub fn $name(&mut self) -> Option<$type> {
            let mut bytes = [0u8; $size];
            if !self.expect_block_into(&mut bytes) {
                return None;
            }
            Some(<$type>::from_le_bytes(bytes))
        }
    };
}

enum Source<'a> {
    Stream(&'a mut dyn TwoWayStream),
    Buffer(io::Cursor<Vec<u8>>),
}

impl Source<'_> {
    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        match self {
            Source::Stream(stream) => stream.read_exact(buf),
            Source::Buffer(cursor) => cursor.read_exact(buf),
        }
    }

    fn is_ok(&self) -> bool {
        match self {
            Source::Stream(stream) => stream.is_ok(),
            Source::Buffer(_) => true,
        }
    }
}

/// Reader for one message (declared length, modes, envelope, reply).
pub struct ConnectionReader<'a> {
    source: Source<'a>,
    remaining: usize,
    text_mode: bool,
    bare_mode: bool,
    error: bool,
    dropped: bool,
    pushback: Option<i32>,
    envelope: Option<Vec<u8>>,
    reply: Option<ConnectionWriter>,
    reference: Option<SharedObject>,
}

impl<'a> ConnectionReader<'a> {
    fn with_source(source: Source<'a>, len: usize) -> Self {
        Self {
            source,
            remaining: len,
            text_mode: false,
            bare_mode: false,
            error: false,
            dropped: false,
            pushback: None,
            envelope: None,
            reply: None,
            reference: None,
        }
    }

    /// Reader over `len` declared bytes of `stream`.
    pub fn from_stream(stream: &'a mut dyn TwoWayStream, len: usize) -> Self {
        Self::with_source(Source::Stream(stream), len)
    }

    /// Reader over an owned buffer; the declared length is the buffer length.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let len = bytes.len();
        Self::with_source(Source::Buffer(io::Cursor::new(bytes)), len)
    }

    /// Text-mode reader over an owned buffer.
    pub fn from_text(text: &str) -> Self {
        let mut reader = Self::from_bytes(text.as_bytes().to_vec());
        reader.text_mode = true;
        reader
    }

    // ------------------------------------------------------------------
    // Primitives
    // ------------------------------------------------------------------

    /// Fill `buf` completely or fail (sticky).
    pub fn expect_block_into(&mut self, buf: &mut [u8]) -> bool {
        if self.error {
            return false;
        }
        if buf.len() > self.remaining {
            log::debug!(
                "[ConnectionReader] over-read: want {} bytes, {} declared bytes left",
                buf.len(),
                self.remaining
            );
            self.error = true;
            return false;
        }
        if let Err(e) = self.source.read_exact(buf) {
            log::debug!("[ConnectionReader] short read of {} bytes: {}", buf.len(), e);
            self.error = true;
            return false;
        }
        self.remaining -= buf.len();
        true
    }

    /// Read exactly `len` bytes.
    pub fn expect_block(&mut self, len: usize) -> Option<Vec<u8>> {
        if self.error || len > self.remaining {
            self.error = true;
            return None;
        }
        let mut buf = vec![0u8; len];
        self.expect_block_into(&mut buf).then_some(buf)
    }

    impl_expect_le!(expect_int8, i8, 1);
    impl_expect_le!(expect_int16, i16, 2);
    impl_expect_le!(expect_int64, i64, 8);
    impl_expect_le!(expect_float32, f32, 4);
    impl_expect_le!(expect_float64, f64, 8);

    /// Read an `i32`, serving a pushed-back value first.
    pub fn expect_int32(&mut self) -> Option<i32> {
        if self.error {
            return None;
        }
        if let Some(v) = self.pushback.take() {
            return Some(v);
        }
        let mut bytes = [0u8; 4];
        if !self.expect_block_into(&mut bytes) {
            return None;
        }
        Some(i32::from_le_bytes(bytes))
    }

    /// Push one `i32` back; the next [`expect_int32`](Self::expect_int32) returns it.
    ///
    /// Returns `false` if the slot is already taken.
    pub fn push_int(&mut self, value: i32) -> bool {
        if self.pushback.is_some() {
            return false;
        }
        self.pushback = Some(value);
        true
    }

    /// Read text up to `terminator` (consumed, not returned).
    ///
    /// For `\n`, a trailing `\r` is stripped. Reaching the end of the
    /// declared length also ends the text.
    pub fn expect_text(&mut self, terminator: u8) -> Option<String> {
        if self.error {
            return None;
        }
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            if self.remaining == 0 {
                if line.is_empty() {
                    self.error = true;
                    return None;
                }
                break;
            }
            if !self.expect_block_into(&mut byte) {
                return None;
            }
            if byte[0] == terminator {
                break;
            }
            line.push(byte[0]);
        }
        if terminator == b'\n' && line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Read `len` bytes as a string, dropping a trailing NUL.
    pub fn expect_string(&mut self, len: usize) -> Option<String> {
        let mut bytes = self.expect_block(len)?;
        if bytes.last() == Some(&0) {
            bytes.pop();
        }
        Some(match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => {
                log::trace!("[ConnectionReader] non UTF-8 string, decoding lossily");
                String::from_utf8_lossy(e.as_bytes()).into_owned()
            }
        })
    }

    /// Discard the unread declared bytes, even after a decode error.
    ///
    /// Returns `false` only when the source itself fails.
    pub fn drain(&mut self) -> bool {
        let mut scratch = [0u8; 512];
        while self.remaining > 0 {
            let n = self.remaining.min(scratch.len());
            if let Err(e) = self.source.read_exact(&mut scratch[..n]) {
                log::debug!("[ConnectionReader] drain failed: {}", e);
                self.error = true;
                return false;
            }
            self.remaining -= n;
        }
        self.pushback = None;
        true
    }

    /// Turn a text-mode message into a binary one.
    ///
    /// Reads one text line, parses it as a [`Bottle`], and re-encodes it
    /// through the binary codec into an in-memory source. Any bytes left in
    /// the declared message are discarded first so the connection stays in
    /// lockstep. No-op for binary readers.
    pub fn convert_text_mode(&mut self) -> bool {
        if !self.text_mode {
            return true;
        }
        let line = match self.expect_text(b'\n') {
            Some(line) => line,
            None => return false,
        };
        if self.error || !self.drain() {
            return false;
        }
        let bottle = match Bottle::parse(&line) {
            Ok(bottle) => bottle,
            Err(e) => {
                log::debug!("[ConnectionReader] cannot convert text message: {}", e);
                self.error = true;
                return false;
            }
        };
        let bytes = bottle.encode();
        self.remaining = bytes.len();
        self.source = Source::Buffer(io::Cursor::new(bytes));
        self.text_mode = false;
        true
    }

    // ------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------

    /// Unread declared bytes.
    pub fn size(&self) -> usize {
        self.remaining
    }

    pub fn is_text_mode(&self) -> bool {
        self.text_mode
    }

    pub fn set_text_mode(&mut self, text_mode: bool) {
        self.text_mode = text_mode;
    }

    pub fn is_bare_mode(&self) -> bool {
        self.bare_mode
    }

    pub fn set_bare_mode(&mut self, bare_mode: bool) {
        self.bare_mode = bare_mode;
    }

    /// Valid, not dropped, stream healthy and no sticky error.
    pub fn is_good(&self) -> bool {
        !self.error && !self.dropped && self.source.is_ok()
    }

    pub fn is_error(&self) -> bool {
        self.error
    }

    /// Mark the cursor failed (e.g. a decoder found a bad tag).
    pub fn set_error(&mut self) {
        self.error = true;
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped
    }

    pub(crate) fn mark_dropped(&mut self) {
        self.dropped = true;
    }

    pub fn envelope(&self) -> Option<&[u8]> {
        self.envelope.as_deref()
    }

    pub(crate) fn set_envelope(&mut self, envelope: Vec<u8>) {
        self.envelope = Some(envelope);
    }

    /// Object handed over by an in-process sender, if any.
    pub fn reference(&self) -> Option<&SharedObject> {
        self.reference.as_ref()
    }

    pub(crate) fn set_reference(&mut self, object: SharedObject) {
        self.reference = Some(object);
    }

    /// Paired reply writer, present when the sender waits for a reply.
    ///
    /// Whatever is written here travels back on the same exchange once the
    /// read completes.
    pub fn writer(&mut self) -> Option<&mut ConnectionWriter> {
        self.reply.as_mut()
    }

    pub(crate) fn enable_reply(&mut self, text_mode: bool) {
        let mut writer = ConnectionWriter::new();
        writer.set_text_mode(text_mode);
        self.reply = Some(writer);
    }

    pub(crate) fn take_reply(&mut self) -> Option<ConnectionWriter> {
        self.reply.take()
    }
}

impl std::fmt::Debug for ConnectionReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionReader")
            .field("remaining", &self.remaining)
            .field("text_mode", &self.text_mode)
            .field("bare_mode", &self.bare_mode)
            .field("error", &self.error)
            .field("dropped", &self.dropped)
            .field("pushback", &self.pushback)
            .field("has_envelope", &self.envelope.is_some())
            .field("has_reply", &self.reply.is_some())
            .finish()
    }
}
