// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Carrier abstraction.
//!
//! A carrier is the per-connection protocol object: it writes and checks
//! the 8-byte protocol specifier, exchanges routing metadata, frames each
//! message with an index, and optionally acknowledges, replies or filters
//! deliveries. Default phase methods delegate to [`phases`], so a concrete
//! carrier only overrides what it does differently.
//!
//! # Handshake
//!
//! ```text
//! sender                                   receiver
//! ------                                   --------
//! prepare_send
//! send_header   -- specifier, name, extra -->  (registry sniffs specifier)
//!                                          expect_sender_specifier
//!                                          expect_extra_header
//! expect_reply_to_header  <-- reply ----   respond_to_header
//! ```
//!
//! # Messages
//!
//! ```text
//! write:  [index][blocks...]            -->  expect_index, accept_incoming_data
//! expect_ack                            <--  send_ack       (no reply expected)
//! expect_index (reply)                  <--  reply          (reply expected)
//! ```

pub mod local;
pub mod mcast;
pub mod phases;
pub mod priority;
pub mod tcp;
pub mod text;
pub mod udp;

use crate::config::{ConnectionConfig, HEADER_SIZE};
use crate::error::{Error, Result};
use crate::reader::ConnectionReader;
use crate::route::Route;
use crate::transport::{BoxedStream, TwoWayStream};
use crate::writer::{ConnectionWriter, SharedObject};
use std::fmt;

// ============================================================================
// Carrier names
// ============================================================================

/// Parsed carrier string `<name>[+key.value]*`.
///
/// Each `+` piece splits at its first `.` into a key and a value, so
/// `mcast+group.239.255.0.1` yields `group = 239.255.0.1`. A piece without
/// a `.` is a flag with an empty value.
///
/// ```
/// use portwire::CarrierSpec;
///
/// let spec = CarrierSpec::parse("tcp+recv.priority+level.15");
/// assert_eq!(spec.name(), "tcp");
/// assert_eq!(spec.get("recv"), Some("priority"));
/// assert_eq!(spec.get("level"), Some("15"));
/// assert_eq!(spec.qualifier(), "+recv.priority+level.15");
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CarrierSpec {
    name: String,
    params: Vec<(String, String)>,
}

impl CarrierSpec {
    pub fn parse(s: &str) -> Self {
        let mut pieces = s.trim().split('+');
        let name = pieces.next().unwrap_or_default().to_owned();
        let params = pieces
            .filter(|piece| !piece.is_empty())
            .map(|piece| match piece.split_once('.') {
                Some((key, value)) => (key.to_owned(), value.to_owned()),
                None => (piece.to_owned(), String::new()),
            })
            .collect();
        Self { name, params }
    }

    /// Carrier name without modifiers.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_owned();
        self
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Last value given for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Every value given for `key`, in order.
    pub fn get_all<'s>(&'s self, key: &'s str) -> impl Iterator<Item = &'s str> + 's {
        self.params
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Numeric parameter; a present but malformed value is an error.
    pub fn get_f64(&self, key: &str) -> Result<Option<f64>> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw.parse::<f64>().map(Some).map_err(|_| {
                Error::Config(format!("carrier parameter {}={:?} is not a number", key, raw))
            }),
        }
    }

    /// The `+key.value` suffix, empty when there are no parameters.
    pub fn qualifier(&self) -> String {
        self.params
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    format!("+{}", k)
                } else {
                    format!("+{}.{}", k, v)
                }
            })
            .collect()
    }
}

impl fmt::Display for CarrierSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.qualifier())
    }
}

// ============================================================================
// Connection state
// ============================================================================

/// Everything a carrier needs to drive one connection.
pub struct ConnectionState {
    stream: BoxedStream,
    route: Route,
    spec: CarrierSpec,
    config: ConnectionConfig,
}

impl ConnectionState {
    pub fn new(
        stream: BoxedStream,
        route: Route,
        spec: CarrierSpec,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            stream,
            route,
            spec,
            config,
        }
    }

    pub fn stream(&mut self) -> &mut dyn TwoWayStream {
        self.stream.as_mut()
    }

    /// Swap the underlying stream, returning the previous one.
    pub fn replace_stream(&mut self, stream: BoxedStream) -> BoxedStream {
        std::mem::replace(&mut self.stream, stream)
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn set_route(&mut self, route: Route) {
        self.route = route;
    }

    pub fn spec(&self) -> &CarrierSpec {
        &self.spec
    }

    pub fn set_spec(&mut self, spec: CarrierSpec) {
        self.spec = spec;
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

impl fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionState")
            .field("route", &self.route)
            .field("spec", &self.spec.to_string())
            .field("stream_ok", &self.stream.is_ok())
            .finish()
    }
}

/// What the index (or an out-of-band handoff) announced for one message.
#[derive(Default)]
pub struct Incoming {
    /// Declared payload length, envelope excluded.
    pub len: usize,
    /// Per-message metadata sent ahead of the payload.
    pub envelope: Option<Vec<u8>>,
    /// The sender blocks until a reply arrives.
    pub expects_reply: bool,
    /// Payload already pulled off the wire; `None` means read it from the stream.
    pub body: Option<Vec<u8>>,
    /// Object handed over in-process.
    pub reference: Option<SharedObject>,
}

impl fmt::Debug for Incoming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Incoming")
            .field("len", &self.len)
            .field("envelope", &self.envelope.as_ref().map(Vec::len))
            .field("expects_reply", &self.expects_reply)
            .field("buffered", &self.body.is_some())
            .field("reference", &self.reference.is_some())
            .finish()
    }
}

// ============================================================================
// Carrier trait
// ============================================================================

/// Per-connection transport/protocol plugin.
///
/// Registries hold one prototype per carrier and call [`create`](Self::create)
/// for each connection.
pub trait Carrier: Send {
    // ------------------------------------------------------------------
    // Identity and capabilities
    // ------------------------------------------------------------------

    fn name(&self) -> &str;

    /// Whether `header` is this carrier's protocol specifier.
    fn check_header(&self, header: &[u8]) -> bool;

    /// Protocol specifier sent first on the wire.
    fn header(&self) -> [u8; HEADER_SIZE];

    /// Adopt flags encoded in a received specifier.
    fn set_parameters(&mut self, _header: &[u8]) {}

    fn is_connectionless(&self) -> bool {
        false
    }

    fn require_ack(&self) -> bool {
        false
    }

    /// Whether payload bytes could collide with framing.
    fn can_escape(&self) -> bool {
        false
    }

    fn is_text_mode(&self) -> bool {
        false
    }

    fn is_bare_mode(&self) -> bool {
        false
    }

    fn is_local(&self) -> bool {
        false
    }

    fn supports_reply(&self) -> bool {
        false
    }

    /// Modifiers have no wire presence; they attach to another carrier.
    fn is_modifier(&self) -> bool {
        false
    }

    /// Apply `+key.value` parameters.
    fn configure(&mut self, _spec: &CarrierSpec) -> Result<()> {
        Ok(())
    }

    /// Fresh per-connection instance.
    fn create(&self) -> Box<dyn Carrier>;

    // ------------------------------------------------------------------
    // Handshake
    // ------------------------------------------------------------------

    fn prepare_send(&mut self, _state: &mut ConnectionState) -> Result<()> {
        Ok(())
    }

    fn send_header(&mut self, state: &mut ConnectionState) -> Result<()> {
        phases::send_header(state, &self.header())
    }

    fn expect_reply_to_header(&mut self, _state: &mut ConnectionState) -> Result<()> {
        Ok(())
    }

    fn expect_sender_specifier(&mut self, state: &mut ConnectionState) -> Result<()> {
        phases::expect_sender_specifier(state)
    }

    fn expect_extra_header(&mut self, state: &mut ConnectionState) -> Result<()> {
        phases::expect_qualifier(state)
    }

    fn respond_to_header(&mut self, _state: &mut ConnectionState) -> Result<()> {
        Ok(())
    }

    /// Called once the handshake completed on either side.
    fn on_connect(&mut self, _state: &ConnectionState) -> Result<()> {
        Ok(())
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    fn send_index(
        &mut self,
        state: &mut ConnectionState,
        writer: &ConnectionWriter,
        expect_reply: bool,
    ) -> Result<()> {
        phases::send_index(state.stream(), writer, expect_reply)
    }

    fn expect_index(&mut self, state: &mut ConnectionState) -> Result<Incoming> {
        let max = state.config().max_message_size;
        phases::expect_index(state.stream(), max)
    }

    /// Send one message: index, then content, as one packet.
    fn write(
        &mut self,
        state: &mut ConnectionState,
        writer: &mut ConnectionWriter,
        expect_reply: bool,
    ) -> Result<()> {
        state.stream().begin_packet();
        self.send_index(state, writer, expect_reply)?;
        writer.write_to(state.stream())?;
        state.stream().end_packet()?;
        Ok(())
    }

    /// Send the reply to a message that expected one.
    fn reply(&mut self, state: &mut ConnectionState, writer: &mut ConnectionWriter) -> Result<()> {
        self.write(state, writer, false)
    }

    fn send_ack(&mut self, state: &mut ConnectionState) -> Result<()> {
        phases::send_ack(state.stream())
    }

    fn expect_ack(&mut self, state: &mut ConnectionState) -> Result<()> {
        phases::expect_ack(state.stream())
    }

    /// Admission hook: `false` drops the message silently.
    fn accept_incoming_data(&mut self, _reader: &mut ConnectionReader<'_>) -> bool {
        true
    }

    /// Release per-connection resources. Idempotent.
    fn close(&mut self, _state: &mut ConnectionState) {}
}

impl fmt::Debug for dyn Carrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Carrier")
            .field("name", &self.name())
            .field("modifier", &self.is_modifier())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_parse_pieces() {
        let spec = CarrierSpec::parse("mcast+group.239.255.0.1+quiet");
        assert_eq!(spec.name(), "mcast");
        assert_eq!(spec.get("group"), Some("239.255.0.1"));
        assert_eq!(spec.get("quiet"), Some(""));
        assert_eq!(spec.to_string(), "mcast+group.239.255.0.1+quiet");
    }

    #[test]
    fn test_spec_repeated_keys() {
        let spec = CarrierSpec::parse("tcp+recv.a+recv.b");
        assert_eq!(spec.get("recv"), Some("b"));
        assert_eq!(spec.get_all("recv").collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_spec_numeric_params() {
        let spec = CarrierSpec::parse("tcp+level.15+tc.x");
        assert_eq!(spec.get_f64("level").unwrap(), Some(15.0));
        assert_eq!(spec.get_f64("missing").unwrap(), None);
        assert!(matches!(spec.get_f64("tc"), Err(Error::Config(_))));
    }

    #[test]
    fn test_plain_name_has_empty_qualifier() {
        let spec = CarrierSpec::parse("tcp");
        assert_eq!(spec.qualifier(), "");
        assert!(spec.params().is_empty());
    }
}
