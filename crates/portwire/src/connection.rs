// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection driver.
//!
//! A [`Connection`] owns one stream and one carrier instance. It runs the
//! handshake from either side, then moves messages:
//!
//! - [`Connection::write`] frames a message and waits for the ack when the
//!   carrier requires one
//! - [`Connection::rpc`] sends a message and reads the reply
//! - [`Connection::read`] receives one message, runs admission (carrier and
//!   `recv` modifiers), hands the reader to the caller, then acks or replies
//!
//! # Example
//!
//! ```
//! use portwire::transport::MemoryStream;
//! use portwire::{Bottle, CarrierRegistry, Connection, ConnectionConfig, Route};
//! use std::thread;
//!
//! let registry = CarrierRegistry::with_defaults();
//! let (a, b) = MemoryStream::pair();
//!
//! thread::scope(|s| {
//!     s.spawn(|| {
//!         let route = Route::new("/sensor", "/logger", "tcp");
//!         let mut conn = Connection::connect(Box::new(a), route, &registry, ConnectionConfig::default())
//!             .unwrap();
//!         let mut msg = Bottle::new();
//!         msg.add_string("hello").add_int32(42);
//!         conn.write(&msg).unwrap();
//!     });
//!
//!     let mut conn = Connection::accept(Box::new(b), "/logger", &registry, ConnectionConfig::default())
//!         .unwrap();
//!     let mut got = Bottle::new();
//!     assert!(conn.read_into(&mut got).unwrap());
//!     assert_eq!(got.to_string(), "hello 42");
//! });
//! ```

use crate::carrier::{Carrier, CarrierSpec, ConnectionState, Incoming};
use crate::config::{ConnectionConfig, HEADER_SIZE};
use crate::error::{Error, Result};
use crate::portable::Portable;
use crate::reader::ConnectionReader;
use crate::registry::CarrierRegistry;
use crate::route::Route;
use crate::transport::BoxedStream;
use crate::writer::{ConnectionWriter, SharedObject};
use std::io::{self, Write};

/// Outcome of one [`Connection::read`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery<T> {
    /// Admitted and handed to the caller.
    Accepted(T),
    /// Dropped by admission control; the caller never saw it.
    Rejected,
}

impl<T> Delivery<T> {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Delivery::Accepted(_))
    }

    pub fn accepted(self) -> Option<T> {
        match self {
            Delivery::Accepted(value) => Some(value),
            Delivery::Rejected => None,
        }
    }
}

/// One established connection endpoint.
pub struct Connection {
    state: ConnectionState,
    carrier: Box<dyn Carrier>,
    modifiers: Vec<Box<dyn Carrier>>,
    closed: bool,
}

impl Connection {
    // ------------------------------------------------------------------
    // Handshake
    // ------------------------------------------------------------------

    /// Open the sending side of `route` over `stream`.
    ///
    /// The carrier is picked from the route's carrier string
    /// (`tcp+recv.priority+level.15`); its parameters travel to the receiver.
    pub fn connect(
        stream: BoxedStream,
        route: Route,
        registry: &CarrierRegistry,
        config: ConnectionConfig,
    ) -> Result<Self> {
        let spec = CarrierSpec::parse(route.carrier_name());
        let mut carrier = registry
            .choose_carrier(spec.name())
            .ok_or_else(|| Error::CarrierNotFound(spec.name().to_owned()))?;
        if carrier.is_modifier() {
            return Err(Error::Config(format!(
                "'{}' is a modifier, not a carrier",
                carrier.name()
            )));
        }
        carrier.configure(&spec)?;

        let timeout = config.handshake_timeout;
        let mut state = ConnectionState::new(stream, route, spec, config);
        state.stream().set_read_timeout(timeout)?;

        carrier.prepare_send(&mut state)?;
        carrier.send_header(&mut state)?;
        state.stream().flush()?;
        carrier.expect_reply_to_header(&mut state)?;

        state.stream().set_read_timeout(None)?;
        carrier.on_connect(&state)?;
        log::debug!("[Connection] connected {}", state.route());

        Ok(Self {
            state,
            carrier,
            modifiers: Vec::new(),
            closed: false,
        })
    }

    /// Accept an incoming connection for `local_port`, sniffing the carrier
    /// from the protocol specifier.
    pub fn accept(
        stream: BoxedStream,
        local_port: &str,
        registry: &CarrierRegistry,
        config: ConnectionConfig,
    ) -> Result<Self> {
        Self::accept_inner(stream, local_port, registry, config, None)
    }

    /// Accept an incoming connection that must use `carrier_name`.
    pub fn accept_with(
        stream: BoxedStream,
        local_port: &str,
        registry: &CarrierRegistry,
        config: ConnectionConfig,
        carrier_name: &str,
    ) -> Result<Self> {
        Self::accept_inner(stream, local_port, registry, config, Some(carrier_name))
    }

    fn accept_inner(
        mut stream: BoxedStream,
        local_port: &str,
        registry: &CarrierRegistry,
        config: ConnectionConfig,
        expected: Option<&str>,
    ) -> Result<Self> {
        stream.set_read_timeout(config.handshake_timeout)?;
        let header = crate::carrier::phases::read_header(stream.as_mut())?;

        let mut carrier = match expected {
            Some(name) => {
                let carrier = registry
                    .choose_carrier(name)
                    .ok_or_else(|| Error::CarrierNotFound(name.to_owned()))?;
                if !carrier.check_header(&header) {
                    return Err(Error::protocol(format!(
                        "expected {} specifier, got {:?}",
                        carrier.name(),
                        String::from_utf8_lossy(&header)
                    )));
                }
                carrier
            }
            None => registry
                .choose_carrier_for_header(&header)
                .ok_or_else(|| Error::CarrierNotFound(describe_header(&header)))?,
        };
        carrier.set_parameters(&header);

        let route = Route::new("", local_port, carrier.name());
        let spec = CarrierSpec::parse(carrier.name());
        let mut state = ConnectionState::new(stream, route, spec, config);

        carrier.expect_sender_specifier(&mut state)?;
        carrier.expect_extra_header(&mut state)?;
        carrier.configure(&state.spec().clone())?;
        carrier.respond_to_header(&mut state)?;
        state.stream().flush()?;
        state.stream().set_read_timeout(None)?;

        let modifiers = attach_modifiers(registry, &state)?;
        carrier.on_connect(&state)?;
        log::debug!(
            "[Connection] accepted {} ({} modifier(s))",
            state.route(),
            modifiers.len()
        );

        Ok(Self {
            state,
            carrier,
            modifiers,
            closed: false,
        })
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn route(&self) -> &Route {
        self.state.route()
    }

    pub fn carrier(&self) -> &dyn Carrier {
        self.carrier.as_ref()
    }

    /// Names of the attached `recv` modifiers.
    pub fn modifiers(&self) -> Vec<&str> {
        self.modifiers.iter().map(|m| m.name()).collect()
    }

    pub fn is_open(&self) -> bool {
        !self.closed
    }

    /// Empty writer in the carrier's text/bare mode, e.g. to attach an envelope.
    pub fn new_writer(&self) -> ConnectionWriter {
        let mut writer = ConnectionWriter::new();
        writer.set_text_mode(self.carrier.is_text_mode());
        writer.set_bare_mode(self.carrier.is_bare_mode());
        writer
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    /// Send one message; blocks for the ack when the carrier requires one.
    pub fn write(&mut self, msg: &dyn Portable) -> Result<()> {
        let writer = self.serialize(msg);
        self.send(writer, false)
    }

    /// Send a prepared writer (blocks, envelope and all).
    pub fn write_with(&mut self, writer: ConnectionWriter) -> Result<()> {
        self.send(writer, false)
    }

    /// Hand an object over without serializing it (local carrier only).
    pub fn write_reference(&mut self, object: SharedObject) -> Result<()> {
        if !self.carrier.is_local() {
            return Err(Error::Unsupported("object references need the local carrier"));
        }
        let mut writer = self.new_writer();
        writer.set_reference(object);
        self.send(writer, false)
    }

    /// Send `msg` and read the peer's reply with `f`.
    pub fn rpc<T>(
        &mut self,
        msg: &dyn Portable,
        f: impl FnOnce(&mut ConnectionReader<'_>) -> T,
    ) -> Result<T> {
        let writer = self.serialize(msg);
        self.send(writer, true)?;

        let mut incoming = self.carrier.expect_index(&mut self.state)?;
        let mut reader = open_reader(&mut self.state, &mut incoming, self.carrier.as_ref());
        let value = f(&mut reader);
        if !reader.drain() {
            return Err(Error::protocol("reply truncated"));
        }
        Ok(value)
    }

    fn serialize(&self, msg: &dyn Portable) -> ConnectionWriter {
        let mut writer = self.new_writer();
        if !msg.write(&mut writer) {
            writer.set_error();
        }
        writer
    }

    fn send(&mut self, mut writer: ConnectionWriter, expect_reply: bool) -> Result<()> {
        self.ensure_open()?;
        if writer.is_error() {
            return Err(Error::protocol("message could not be serialized"));
        }
        if expect_reply && !self.carrier.supports_reply() {
            return Err(Error::Unsupported("replies on this carrier"));
        }
        self.carrier.write(&mut self.state, &mut writer, expect_reply)?;
        if !expect_reply && self.carrier.require_ack() {
            self.carrier.expect_ack(&mut self.state)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Receiving
    // ------------------------------------------------------------------

    /// Receive one message.
    ///
    /// `f` runs only if the carrier and every modifier admit the message.
    /// Whatever `f` leaves unread is drained; an ack or reply follows as the
    /// carrier requires. A rejected message that expects a reply gets an
    /// empty one.
    ///
    /// On a packet transport, a failed read discards the rest of the
    /// offending packet so the next read starts on a packet boundary.
    pub fn read<T>(&mut self, f: impl FnOnce(&mut ConnectionReader<'_>) -> T) -> Result<Delivery<T>> {
        self.ensure_open()?;
        let result = self.read_message(f);
        if result.is_err() {
            self.state.stream().discard_packet();
        }
        result
    }

    fn read_message<T>(
        &mut self,
        f: impl FnOnce(&mut ConnectionReader<'_>) -> T,
    ) -> Result<Delivery<T>> {
        let mut incoming = self.carrier.expect_index(&mut self.state)?;
        let expects_reply = incoming.expects_reply;

        let (delivery, drained, reply) = {
            let mut reader = open_reader(&mut self.state, &mut incoming, self.carrier.as_ref());
            if expects_reply {
                reader.enable_reply(self.carrier.is_text_mode());
            }
            let admitted = self.carrier.accept_incoming_data(&mut reader)
                && self
                    .modifiers
                    .iter_mut()
                    .all(|m| m.accept_incoming_data(&mut reader));
            let delivery = if admitted {
                Delivery::Accepted(f(&mut reader))
            } else {
                reader.mark_dropped();
                Delivery::Rejected
            };
            let drained = reader.drain();
            (delivery, drained, reader.take_reply())
        };

        if !delivery.is_accepted() {
            log::trace!("[Connection] {} rejected a message", self.state.route());
        }
        if !drained {
            return Err(Error::protocol("message truncated"));
        }

        if expects_reply {
            let mut writer = match reply {
                Some(writer) if delivery.is_accepted() => writer,
                _ => self.new_writer(),
            };
            self.carrier.reply(&mut self.state, &mut writer)?;
        } else if self.carrier.require_ack() {
            self.carrier.send_ack(&mut self.state)?;
        }
        Ok(delivery)
    }

    /// Receive one message into `obj`.
    ///
    /// `Ok(false)` means admission dropped it; a message `obj` cannot
    /// decode is a protocol error.
    pub fn read_into(&mut self, obj: &mut dyn Portable) -> Result<bool> {
        match self.read(|reader| obj.read(reader))? {
            Delivery::Accepted(true) => Ok(true),
            Delivery::Accepted(false) => Err(Error::protocol("message could not be decoded")),
            Delivery::Rejected => Ok(false),
        }
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Release the carrier, the modifiers and the stream. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for modifier in &mut self.modifiers {
            modifier.close(&mut self.state);
        }
        self.carrier.close(&mut self.state);
        self.state.stream().close();
        log::debug!("[Connection] closed {}", self.state.route());
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection closed",
            )));
        }
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("route", self.state.route())
            .field("carrier", &self.carrier.name())
            .field("modifiers", &self.modifiers())
            .field("closed", &self.closed)
            .finish()
    }
}

fn open_reader<'a>(
    state: &'a mut ConnectionState,
    incoming: &mut Incoming,
    carrier: &dyn Carrier,
) -> ConnectionReader<'a> {
    let mut reader = match incoming.body.take() {
        Some(body) => ConnectionReader::from_bytes(body),
        None => ConnectionReader::from_stream(state.stream(), incoming.len),
    };
    reader.set_text_mode(carrier.is_text_mode());
    reader.set_bare_mode(carrier.is_bare_mode());
    if let Some(envelope) = incoming.envelope.take() {
        reader.set_envelope(envelope);
    }
    if let Some(object) = incoming.reference.take() {
        reader.set_reference(object);
    }
    reader
}

/// Instantiate, configure and connect every `recv` modifier of the route.
fn attach_modifiers(
    registry: &CarrierRegistry,
    state: &ConnectionState,
) -> Result<Vec<Box<dyn Carrier>>> {
    let names: Vec<String> = state.spec().get_all("recv").map(str::to_owned).collect();
    let mut modifiers = Vec::with_capacity(names.len());
    for name in names {
        let mut modifier = registry
            .choose_carrier(&name)
            .ok_or_else(|| Error::CarrierNotFound(name.clone()))?;
        if !modifier.is_modifier() {
            return Err(Error::Config(format!("'{}' cannot be used as recv modifier", name)));
        }
        modifier.configure(state.spec())?;
        modifier.on_connect(state)?;
        modifiers.push(modifier);
    }
    Ok(modifiers)
}

fn describe_header(header: &[u8; HEADER_SIZE]) -> String {
    format!("header {:?}", String::from_utf8_lossy(header))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bottle::Bottle;
    use crate::transport::MemoryStream;
    use std::thread;

    fn config() -> ConnectionConfig {
        ConnectionConfig::default()
    }

    #[test]
    fn test_tcp_write_read_with_ack() {
        let registry = CarrierRegistry::with_defaults();
        let (a, b) = MemoryStream::pair();

        thread::scope(|s| {
            let sender = s.spawn(|| {
                let route = Route::new("/src", "/dst", "tcp");
                let mut conn = Connection::connect(Box::new(a), route, &registry, config()).unwrap();
                assert_eq!(conn.carrier().name(), "tcp");
                let msg = Bottle::parse("set name 42 3.14 (a b)").unwrap();
                conn.write(&msg).unwrap();
            });

            let mut conn = Connection::accept(Box::new(b), "/dst", &registry, config()).unwrap();
            assert_eq!(conn.route().from_name(), "/src");
            assert_eq!(conn.route().to_name(), "/dst");
            assert_eq!(conn.route().carrier_name(), "tcp");
            let mut got = Bottle::new();
            assert!(conn.read_into(&mut got).unwrap());
            assert_eq!(got.to_string(), "set name 42 3.14 (a b)");
            sender.join().unwrap();
        });
    }

    #[test]
    fn test_rpc_round_trip() {
        let registry = CarrierRegistry::with_defaults();
        let (a, b) = MemoryStream::pair();

        thread::scope(|s| {
            let client = s.spawn(|| {
                let route = Route::new("/client", "/server", "tcp");
                let mut conn = Connection::connect(Box::new(a), route, &registry, config()).unwrap();
                let mut request = Bottle::new();
                request.add_string("add").add_int32(2).add_int32(3);
                conn.rpc(&request, |reader| {
                    let mut reply = Bottle::new();
                    assert!(reply.read(reader));
                    reply
                })
                .unwrap()
            });

            let mut conn = Connection::accept(Box::new(b), "/server", &registry, config()).unwrap();
            let delivery = conn
                .read(|reader| {
                    let mut request = Bottle::new();
                    assert!(request.read(reader));
                    let sum = request.get(1).as_i64().unwrap() + request.get(2).as_i64().unwrap();
                    let mut reply = Bottle::new();
                    reply.add_int64(sum);
                    assert!(reply.write(reader.writer().unwrap()));
                })
                .unwrap();
            assert!(delivery.is_accepted());

            let reply = client.join().unwrap();
            assert_eq!(reply.get(0).as_i64(), Some(5));
        });
    }

    #[test]
    fn test_text_carrier_exchange() {
        let registry = CarrierRegistry::with_defaults();
        let (a, b) = MemoryStream::pair();

        thread::scope(|s| {
            s.spawn(|| {
                let route = Route::new("/telnet", "/dst", "text_ack");
                let mut conn = Connection::connect(Box::new(a), route, &registry, config()).unwrap();
                let mut msg = Bottle::new();
                msg.add_string("hello world").add_float64(1.5);
                conn.write(&msg).unwrap();
                assert!(matches!(
                    conn.rpc(&msg, |_| ()),
                    Err(Error::Unsupported(_))
                ));
            });

            let mut conn = Connection::accept(Box::new(b), "/dst", &registry, config()).unwrap();
            assert_eq!(conn.carrier().name(), "text_ack");
            assert_eq!(conn.route().from_name(), "/telnet");
            let mut got = Bottle::new();
            assert!(conn.read_into(&mut got).unwrap());
            assert_eq!(got.get(0).as_str(), Some("hello world"));
            assert_eq!(got.get(1).as_f64(), Some(1.5));
        });
    }

    #[test]
    fn test_unknown_carrier_fails_both_sides() {
        let registry = CarrierRegistry::with_defaults();
        let (a, _b) = MemoryStream::pair();
        let route = Route::new("/src", "/dst", "shmem");
        assert!(matches!(
            Connection::connect(Box::new(a), route, &registry, config()),
            Err(Error::CarrierNotFound(name)) if name == "shmem"
        ));

        let (mut c, d) = MemoryStream::pair();
        c.write_all(b"GET / HTTP/1.1\r\n").unwrap();
        assert!(matches!(
            Connection::accept(Box::new(d), "/dst", &registry, config()),
            Err(Error::CarrierNotFound(_))
        ));
    }

    #[test]
    fn test_accept_with_rejects_other_specifier() {
        let registry = CarrierRegistry::with_defaults();
        let (mut a, b) = MemoryStream::pair();
        a.write_all(b"CONNECT /telnet\n").unwrap();
        assert!(matches!(
            Connection::accept_with(Box::new(b), "/dst", &registry, config(), "tcp"),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_closed_connection_refuses_io() {
        let registry = CarrierRegistry::with_defaults();
        let (a, b) = MemoryStream::pair();

        thread::scope(|s| {
            s.spawn(|| {
                let mut conn = Connection::accept(Box::new(b), "/dst", &registry, config()).unwrap();
                conn.close();
                conn.close();
                assert!(!conn.is_open());
            });
            let route = Route::new("/src", "/dst", "fast_tcp");
            let mut conn = Connection::connect(Box::new(a), route, &registry, config()).unwrap();
            conn.close();
            assert!(matches!(conn.write(&Bottle::new()), Err(Error::Io(_))));
        });
    }
}
