// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Types that travel as connection payloads.

use crate::reader::ConnectionReader;
use crate::writer::ConnectionWriter;

/// Anything that can encode itself through a [`ConnectionWriter`] and decode
/// itself from a [`ConnectionReader`].
///
/// [`Bottle`](crate::Bottle) is the stock implementation; generated
/// fixed-layout message types implement it with the same primitives,
/// usually in bare mode.
///
/// Both methods follow the cursor contract: return `false` on failure and
/// leave the cursor's error flag set.
pub trait Portable {
    /// Decode from `reader`, replacing the current contents.
    fn read(&mut self, reader: &mut ConnectionReader<'_>) -> bool;

    /// Encode into `writer`.
    fn write(&self, writer: &mut ConnectionWriter) -> bool;
}

/// Raw payload bytes, written as one block and read to the end of the message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawBytes(pub Vec<u8>);

impl Portable for RawBytes {
    fn read(&mut self, reader: &mut ConnectionReader<'_>) -> bool {
        match reader.expect_block(reader.size()) {
            Some(bytes) => {
                self.0 = bytes;
                true
            }
            None => false,
        }
    }

    fn write(&self, writer: &mut ConnectionWriter) -> bool {
        writer.append_block(&self.0);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_bytes_take_whole_message() {
        let mut w = ConnectionWriter::new();
        assert!(RawBytes(vec![1, 2, 3]).write(&mut w));
        let mut r = ConnectionReader::from_bytes(w.to_bytes());
        let mut out = RawBytes::default();
        assert!(out.read(&mut r));
        assert_eq!(out.0, vec![1, 2, 3]);
        assert_eq!(r.size(), 0);
    }
}
