// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Buffered message writer.
//!
//! A [`ConnectionWriter`] collects one outgoing message as a list of blocks.
//! Carriers announce the block lengths in the message index before sending
//! the bytes, so the receiving side knows exactly where the message ends.
//!
//! ```
//! use portwire::ConnectionWriter;
//!
//! let mut writer = ConnectionWriter::new();
//! writer.append_int32(42);
//! writer.append_string("hi");
//! writer.append_external_block(vec![1, 2, 3]);
//! assert_eq!(writer.block_lengths(), vec![4 + 4 + 3, 3]);
//! ```

use std::any::Any;
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

/// Object handed across an in-process connection without serialization.
pub type SharedObject = Arc<dyn Any + Send + Sync>;

/// Generate little-endian append methods for primitive types.
macro_rules! impl_append_le {
    ($name:ident, $type:ty) => {
        pub fn $name(&mut self, value: $type) {
            self.current().extend_from_slice(&value.to_le_bytes());
        }
    };
}

/// Buffered writer for one message (and, on the receiving side, one reply).
#[derive(Default)]
pub struct ConnectionWriter {
    blocks: Vec<Vec<u8>>,
    sealed: bool,
    text_mode: bool,
    bare_mode: bool,
    error: bool,
    envelope: Option<Vec<u8>>,
    reference: Option<SharedObject>,
}

impl ConnectionWriter {
    /// Binary-mode writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Text-mode writer (values are written as human-readable lines).
    pub fn text() -> Self {
        Self {
            text_mode: true,
            ..Self::default()
        }
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

    fn current(&mut self) -> &mut Vec<u8> {
        if self.sealed || self.blocks.is_empty() {
            self.blocks.push(Vec::new());
            self.sealed = false;
        }
        let last = self.blocks.len() - 1;
        &mut self.blocks[last]
    }

    impl_append_le!(append_int8, i8);
    impl_append_le!(append_int16, i16);
    impl_append_le!(append_int32, i32);
    impl_append_le!(append_int64, i64);
    impl_append_le!(append_float32, f32);
    impl_append_le!(append_float64, f64);

    /// Copy raw bytes into the current block.
    pub fn append_block(&mut self, data: &[u8]) {
        self.current().extend_from_slice(data);
    }

    /// Append a block that travels as its own index entry.
    pub fn append_external_block(&mut self, data: Vec<u8>) {
        self.blocks.push(data);
        self.sealed = true;
    }

    /// Length-prefixed (NUL included), NUL-terminated string.
    pub fn append_string(&mut self, s: &str) {
        let len = s.len() + 1;
        self.append_int32(len as i32);
        let block = self.current();
        block.extend_from_slice(s.as_bytes());
        block.push(0);
    }

    /// Raw text followed by `terminator`.
    pub fn append_text(&mut self, s: &str, terminator: u8) {
        let block = self.current();
        block.extend_from_slice(s.as_bytes());
        block.push(terminator);
    }

    /// Raw text followed by a newline.
    pub fn append_line(&mut self, s: &str) {
        self.append_text(s, b'\n');
    }

    /// Out-of-band per-message metadata (e.g. timestamps).
    pub fn set_envelope(&mut self, envelope: Vec<u8>) {
        self.envelope = Some(envelope);
    }

    pub fn envelope(&self) -> Option<&[u8]> {
        self.envelope.as_deref()
    }

    /// Attach an object for carriers that can hand it over without bytes.
    pub fn set_reference(&mut self, object: SharedObject) {
        self.reference = Some(object);
    }

    pub fn reference(&self) -> Option<&SharedObject> {
        self.reference.as_ref()
    }

    pub(crate) fn take_reference(&mut self) -> Option<SharedObject> {
        self.reference.take()
    }

    /// Mark the message as failed (a `Portable` could not encode itself).
    pub fn set_error(&mut self) {
        self.error = true;
    }

    pub fn is_error(&self) -> bool {
        self.error
    }

    /// Lengths of the non-empty content blocks, in order.
    pub fn block_lengths(&self) -> Vec<usize> {
        self.blocks
            .iter()
            .filter(|b| !b.is_empty())
            .map(Vec::len)
            .collect()
    }

    pub fn total_len(&self) -> usize {
        self.blocks.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_len() == 0
    }

    /// Concatenated content bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_len());
        for block in &self.blocks {
            out.extend_from_slice(block);
        }
        out
    }

    /// Write every content block to `out` (no index, no envelope).
    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        for block in self.blocks.iter().filter(|b| !b.is_empty()) {
            out.write_all(block)?;
        }
        Ok(())
    }

    /// Drop content, envelope and reference; keep the mode flags.
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.sealed = false;
        self.error = false;
        self.envelope = None;
        self.reference = None;
    }
}

impl fmt::Debug for ConnectionWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionWriter")
            .field("blocks", &self.block_lengths())
            .field("text_mode", &self.text_mode)
            .field("bare_mode", &self.bare_mode)
            .field("error", &self.error)
            .field("has_envelope", &self.envelope.is_some())
            .field("has_reference", &self.reference.is_some())
            .finish()
    }
}
