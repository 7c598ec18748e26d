// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared handshake and framing phases.
//!
//! Carriers compose these instead of inheriting behaviour. All reads are
//! exact: a short read fails the phase with no retry.
//!
//! # Wire formats
//!
//! ```text
//! yarp number      "YA" [u32 le] "RP"                       (8 bytes)
//! specifier        yarp number (7777 + code [| 0x80 no-ack])
//! counted string   [u32 le len incl NUL] bytes NUL
//! index            [in:u8][out:u8][flags:u8][0xFF x 7]
//!                  [u32 le len] x (in + out)  [u32 0]
//! ack              yarp number (0)
//! ```

use super::{ConnectionState, Incoming};
use crate::config::{
    HEADER_SIZE, INDEX_FLAG_ENVELOPE, INDEX_HEADER_SIZE, INDEX_RESERVED, MAX_INDEX_BLOCKS,
    SPECIFIER_BASE, SPECIFIER_CODE_MASK, SPECIFIER_NO_ACK,
};
use crate::error::{Error, Result};
use crate::transport::TwoWayStream;
use crate::writer::ConnectionWriter;
use std::io::{Read, Write};

// ============================================================================
// Primitives
// ============================================================================

/// Read exactly `buf.len()` bytes, mapping EOF to a protocol error.
pub fn read_exact(stream: &mut dyn TwoWayStream, buf: &mut [u8], what: &str) -> Result<()> {
    stream.read_exact(buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => {
            Error::protocol(format!("short read in {} ({} bytes wanted)", what, buf.len()))
        }
        _ => Error::Io(e),
    })
}

fn read_u32(stream: &mut dyn TwoWayStream, what: &str) -> Result<u32> {
    let mut buf = [0u8; 4];
    read_exact(stream, &mut buf, what)?;
    Ok(u32::from_le_bytes(buf))
}

/// `"YA" + u32le(n) + "RP"`.
pub fn yarp_number(n: u32) -> [u8; HEADER_SIZE] {
    let mut out = [0u8; HEADER_SIZE];
    out[..2].copy_from_slice(b"YA");
    out[2..6].copy_from_slice(&n.to_le_bytes());
    out[6..].copy_from_slice(b"RP");
    out
}

pub fn parse_yarp_number(bytes: &[u8]) -> Option<u32> {
    if bytes.len() < HEADER_SIZE || &bytes[..2] != b"YA" || &bytes[6..8] != b"RP" {
        return None;
    }
    let mut n = [0u8; 4];
    n.copy_from_slice(&bytes[2..6]);
    Some(u32::from_le_bytes(n))
}

/// Protocol specifier of a yarp-number carrier.
pub fn specifier(code: u32, require_ack: bool) -> [u8; HEADER_SIZE] {
    let flags = if require_ack { 0 } else { SPECIFIER_NO_ACK };
    yarp_number(SPECIFIER_BASE + (code & SPECIFIER_CODE_MASK) + flags)
}

/// `(code, require_ack)` of a yarp-number specifier.
pub fn parse_specifier(bytes: &[u8]) -> Option<(u32, bool)> {
    let v = parse_yarp_number(bytes)?.checked_sub(SPECIFIER_BASE)?;
    if v > 0xFF {
        return None;
    }
    Some((v & SPECIFIER_CODE_MASK, v & SPECIFIER_NO_ACK == 0))
}

pub fn send_yarp_number(stream: &mut dyn TwoWayStream, n: u32) -> Result<()> {
    stream.write_all(&yarp_number(n))?;
    Ok(())
}

pub fn expect_yarp_number(stream: &mut dyn TwoWayStream) -> Result<u32> {
    let mut buf = [0u8; HEADER_SIZE];
    read_exact(stream, &mut buf, "yarp number")?;
    parse_yarp_number(&buf)
        .ok_or_else(|| Error::protocol(format!("bad yarp number {:02x?}", buf)))
}

/// Length-prefixed, NUL-terminated string.
pub fn send_counted_string(stream: &mut dyn TwoWayStream, s: &str) -> Result<()> {
    let len = u32::try_from(s.len() + 1).map_err(|_| Error::NameTooLong(s.len() + 1))?;
    stream.write_all(&len.to_le_bytes())?;
    stream.write_all(s.as_bytes())?;
    stream.write_all(&[0])?;
    Ok(())
}

pub fn expect_counted_string(stream: &mut dyn TwoWayStream, max_len: usize) -> Result<String> {
    let len = read_u32(stream, "string length")? as usize;
    if len > max_len {
        return Err(Error::NameTooLong(len));
    }
    let mut buf = vec![0u8; len];
    read_exact(stream, &mut buf, "string")?;
    if buf.last() == Some(&0) {
        buf.pop();
    }
    String::from_utf8(buf).map_err(|_| Error::protocol("string is not UTF-8"))
}

/// Read one `\n`-terminated line (a trailing `\r` is dropped).
pub fn expect_line(stream: &mut dyn TwoWayStream, max_len: usize) -> Result<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        read_exact(stream, &mut byte, "line")?;
        if byte[0] == b'\n' {
            break;
        }
        if line.len() >= max_len {
            return Err(Error::MessageTooLarge(line.len() + 1));
        }
        line.push(byte[0]);
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    String::from_utf8(line).map_err(|_| Error::protocol("line is not UTF-8"))
}

// ============================================================================
// Handshake
// ============================================================================

/// Read the 8-byte protocol specifier.
pub fn read_header(stream: &mut dyn TwoWayStream) -> Result<[u8; HEADER_SIZE]> {
    let mut header = [0u8; HEADER_SIZE];
    read_exact(stream, &mut header, "protocol specifier")?;
    Ok(header)
}

/// Specifier, sender name and route qualifier.
pub fn send_header(state: &mut ConnectionState, header: &[u8; HEADER_SIZE]) -> Result<()> {
    let from = state.route().from_name().to_owned();
    let qualifier = state.spec().qualifier();
    let stream = state.stream();
    stream.write_all(header)?;
    send_counted_string(stream, &from)?;
    send_counted_string(stream, &qualifier)?;
    Ok(())
}

/// Read the sender name into the route.
pub fn expect_sender_specifier(state: &mut ConnectionState) -> Result<()> {
    let max = state.config().max_name_len;
    let from = expect_counted_string(state.stream(), max)?;
    log::debug!("[Handshake] sender specifier {:?}", from);
    let route = state.route().clone().with_from_name(&from);
    state.set_route(route);
    Ok(())
}

/// Read the route qualifier and merge it into the connection spec.
pub fn expect_qualifier(state: &mut ConnectionState) -> Result<()> {
    let max = state.config().max_name_len;
    let qualifier = expect_counted_string(state.stream(), max)?;
    let spec = super::CarrierSpec::parse(&format!("{}{}", state.spec().name(), qualifier));
    let route = state.route().clone().with_carrier_name(&spec.to_string());
    state.set_spec(spec);
    state.set_route(route);
    Ok(())
}

// ============================================================================
// Index
// ============================================================================

/// Write the index for `writer`'s blocks (envelope first when present).
pub fn send_index(
    stream: &mut dyn TwoWayStream,
    writer: &ConnectionWriter,
    expect_reply: bool,
) -> Result<()> {
    let mut lengths = Vec::new();
    if let Some(envelope) = writer.envelope() {
        lengths.push(envelope.len());
    }
    lengths.extend(writer.block_lengths());
    if lengths.len() > MAX_INDEX_BLOCKS {
        return Err(Error::protocol(format!("{} blocks do not fit an index", lengths.len())));
    }

    let out_blocks = usize::from(expect_reply);
    let mut index = Vec::with_capacity(INDEX_HEADER_SIZE + 4 * (lengths.len() + out_blocks + 1));
    index.push(lengths.len() as u8);
    index.push(out_blocks as u8);
    index.push(if writer.envelope().is_some() { INDEX_FLAG_ENVELOPE } else { 0 });
    index.resize(INDEX_HEADER_SIZE, INDEX_RESERVED);
    for len in &lengths {
        let len = u32::try_from(*len).map_err(|_| Error::MessageTooLarge(*len))?;
        index.extend_from_slice(&len.to_le_bytes());
    }
    for _ in 0..out_blocks {
        index.extend_from_slice(&0u32.to_le_bytes());
    }
    index.extend_from_slice(&0u32.to_le_bytes());
    stream.write_all(&index)?;
    if let Some(envelope) = writer.envelope() {
        stream.write_all(envelope)?;
    }
    Ok(())
}

/// Read an index (and the envelope it announces).
pub fn expect_index(stream: &mut dyn TwoWayStream, max_message_size: usize) -> Result<Incoming> {
    let mut header = [0u8; INDEX_HEADER_SIZE];
    read_exact(stream, &mut header, "index")?;
    let in_blocks = usize::from(header[0]);
    let out_blocks = usize::from(header[1]);
    let has_envelope = header[2] & INDEX_FLAG_ENVELOPE != 0;
    if has_envelope && in_blocks == 0 {
        return Err(Error::protocol("index announces an envelope but no blocks"));
    }

    let mut lengths = Vec::with_capacity(in_blocks);
    for _ in 0..in_blocks {
        lengths.push(read_u32(stream, "index block length")? as usize);
    }
    for _ in 0..out_blocks {
        read_u32(stream, "index reply length")?;
    }
    let sentinel = read_u32(stream, "index sentinel")?;
    if sentinel != 0 {
        return Err(Error::protocol(format!("bad index sentinel {:#x}", sentinel)));
    }

    let (envelope_len, payload) = if has_envelope {
        (Some(lengths[0]), &lengths[1..])
    } else {
        (None, &lengths[..])
    };
    let len = payload.iter().fold(0usize, |acc, l| acc.saturating_add(*l));
    if len > max_message_size {
        return Err(Error::MessageTooLarge(len));
    }

    let envelope = match envelope_len {
        Some(elen) if elen > max_message_size => return Err(Error::MessageTooLarge(elen)),
        Some(elen) => {
            let mut buf = vec![0u8; elen];
            read_exact(stream, &mut buf, "envelope")?;
            Some(buf)
        }
        None => None,
    };
    log::trace!(
        "[Index] in={} out={} len={} envelope={:?}",
        in_blocks,
        out_blocks,
        len,
        envelope.as_ref().map(Vec::len)
    );

    Ok(Incoming {
        len,
        envelope,
        expects_reply: out_blocks > 0,
        body: None,
        reference: None,
    })
}

// ============================================================================
// Ack
// ============================================================================

/// Zero-length acknowledgement block.
pub fn send_ack(stream: &mut dyn TwoWayStream) -> Result<()> {
    send_yarp_number(stream, 0)?;
    stream.flush()?;
    Ok(())
}

/// Consume one acknowledgement (and any block it announces).
pub fn expect_ack(stream: &mut dyn TwoWayStream) -> Result<()> {
    let len = expect_yarp_number(stream)? as usize;
    if len > 0 {
        let mut skip = vec![0u8; len];
        read_exact(stream, &mut skip, "ack block")?;
    }
    Ok(())
}
