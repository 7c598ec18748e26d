// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Human-readable line carrier (usable from telnet).
//!
//! Handshake is `CONNECT <name>\n`; every message is one text line with no
//! index. A payload spanning several lines is refused on write, since the
//! receiver frames by newline. The `text_ack` variant (`CONNACK `) greets the sender with
//! `Welcome <name>` and confirms each line with `<ACK>`.

use super::{phases, Carrier, ConnectionState, Incoming};
use crate::config::{HEADER_SIZE, TEXT_ACK, TEXT_ACK_HEADER, TEXT_HEADER};
use crate::error::{Error, Result};
use crate::writer::ConnectionWriter;
use std::io::Write;

/// Line-oriented carrier.
#[derive(Clone, Debug)]
pub struct TextCarrier {
    name: String,
    header: [u8; HEADER_SIZE],
    ack: bool,
}

impl TextCarrier {
    /// `text`: no acknowledgements.
    pub fn new() -> Self {
        Self::with_header("text", *TEXT_HEADER, false)
    }

    /// `text_ack`: greeting and per-line acknowledgements.
    pub fn with_ack() -> Self {
        Self::with_header("text_ack", *TEXT_ACK_HEADER, true)
    }

    /// Text carrier answering to a custom 8-byte specifier.
    pub fn with_header(name: &str, header: [u8; HEADER_SIZE], ack: bool) -> Self {
        Self {
            name: name.to_owned(),
            header,
            ack,
        }
    }
}

impl Default for TextCarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl Carrier for TextCarrier {
    fn name(&self) -> &str {
        &self.name
    }

    fn check_header(&self, header: &[u8]) -> bool {
        header.starts_with(&self.header)
    }

    fn header(&self) -> [u8; HEADER_SIZE] {
        self.header
    }

    fn require_ack(&self) -> bool {
        self.ack
    }

    fn can_escape(&self) -> bool {
        true
    }

    fn is_text_mode(&self) -> bool {
        true
    }

    fn create(&self) -> Box<dyn Carrier> {
        Box::new(self.clone())
    }

    fn send_header(&mut self, state: &mut ConnectionState) -> Result<()> {
        let from = state.route().from_name().to_owned();
        let header = self.header;
        let stream = state.stream();
        stream.write_all(&header)?;
        stream.write_all(from.as_bytes())?;
        stream.write_all(b"\n")?;
        Ok(())
    }

    fn expect_reply_to_header(&mut self, state: &mut ConnectionState) -> Result<()> {
        if !self.ack {
            return Ok(());
        }
        let max = state.config().max_name_len;
        let greeting = phases::expect_line(state.stream(), max + 16)?;
        if !greeting.starts_with("Welcome") {
            return Err(Error::protocol(format!("unexpected greeting {:?}", greeting)));
        }
        Ok(())
    }

    fn expect_sender_specifier(&mut self, state: &mut ConnectionState) -> Result<()> {
        let max = state.config().max_name_len;
        let from = phases::expect_line(state.stream(), max).map_err(|e| match e {
            Error::MessageTooLarge(len) => Error::NameTooLong(len),
            other => other,
        })?;
        let route = state.route().clone().with_from_name(from.trim());
        state.set_route(route);
        Ok(())
    }

    fn expect_extra_header(&mut self, _state: &mut ConnectionState) -> Result<()> {
        Ok(())
    }

    fn respond_to_header(&mut self, state: &mut ConnectionState) -> Result<()> {
        if self.ack {
            let from = state.route().from_name().to_owned();
            let stream = state.stream();
            write!(stream, "Welcome {}\r\n", from)?;
            stream.flush()?;
        }
        Ok(())
    }

    fn send_index(
        &mut self,
        _state: &mut ConnectionState,
        _writer: &ConnectionWriter,
        _expect_reply: bool,
    ) -> Result<()> {
        Ok(())
    }

    fn write(
        &mut self,
        state: &mut ConnectionState,
        writer: &mut ConnectionWriter,
        _expect_reply: bool,
    ) -> Result<()> {
        let mut line = writer.to_bytes();
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        if line.contains(&b'\n') {
            return Err(Error::protocol("text carrier messages must fit on one line"));
        }
        line.push(b'\n');
        let stream = state.stream();
        stream.begin_packet();
        stream.write_all(&line)?;
        stream.end_packet()?;
        Ok(())
    }

    fn expect_index(&mut self, state: &mut ConnectionState) -> Result<Incoming> {
        let max = state.config().max_message_size;
        let mut line = phases::expect_line(state.stream(), max)?.into_bytes();
        line.push(b'\n');
        Ok(Incoming {
            len: line.len(),
            body: Some(line),
            ..Incoming::default()
        })
    }

    fn send_ack(&mut self, state: &mut ConnectionState) -> Result<()> {
        let stream = state.stream();
        write!(stream, "{}\r\n", TEXT_ACK)?;
        stream.flush()?;
        Ok(())
    }

    fn expect_ack(&mut self, state: &mut ConnectionState) -> Result<()> {
        let line = phases::expect_line(state.stream(), TEXT_ACK.len() + 1)?;
        if line != TEXT_ACK {
            return Err(Error::protocol(format!("expected {}, got {:?}", TEXT_ACK, line)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carrier::CarrierSpec;
    use crate::config::ConnectionConfig;
    use crate::route::Route;
    use crate::transport::MemoryStream;
    use std::io::Read;

    fn text_state() -> (ConnectionState, MemoryStream) {
        let (a, b) = MemoryStream::pair();
        let state = ConnectionState::new(
            Box::new(a),
            Route::new("/w", "/r", "text"),
            CarrierSpec::parse("text"),
            ConnectionConfig::default(),
        );
        (state, b)
    }

    #[test]
    fn test_multi_line_payload_is_refused() {
        let (mut state, mut peer) = text_state();
        let mut carrier = TextCarrier::new();

        let mut two_lines = ConnectionWriter::text();
        two_lines.append_line("first");
        two_lines.append_line("second");
        assert!(matches!(
            carrier.write(&mut state, &mut two_lines, false),
            Err(Error::Protocol(_))
        ));

        let mut one_line = ConnectionWriter::text();
        one_line.append_line("set gain 0.5");
        carrier.write(&mut state, &mut one_line, false).unwrap();
        let mut buf = [0u8; 13];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"set gain 0.5\n");
        assert_eq!(peer.available(), 0);
    }

    #[test]
    fn test_text_variants_have_distinct_headers() {
        let text = TextCarrier::new();
        let ack = TextCarrier::with_ack();
        assert!(text.check_header(b"CONNECT "));
        assert!(!text.check_header(&ack.header()));
        assert!(ack.require_ack());
        assert!(text.is_text_mode());
        assert!(!text.supports_reply());
    }
}
