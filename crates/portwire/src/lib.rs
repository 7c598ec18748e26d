// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Portwire - robotics middleware messaging core
//!
//! Typed value containers, their binary and text codecs, and the carrier
//! layer that moves them between ports: handshake, framing, acks, replies,
//! admission control and in-process handoff.
//!
//! ## Quick Start
//!
//! ```rust
//! use portwire::{Bottle, Value};
//!
//! let mut cmd = Bottle::new();
//! cmd.add_string("set").add_string("gain").add_float64(0.5);
//! assert_eq!(cmd.to_string(), "set gain 0.5");
//!
//! let wire = cmd.encode();
//! let back = Bottle::decode(&wire).unwrap();
//! assert_eq!(back.find("gain"), Value::Float64(0.5));
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                         Application Layer                           |
//! |   Bottle / Portable  ->  Connection (write, read, rpc)              |
//! +---------------------------------------------------------------------+
//! |                           Carrier Layer                             |
//! |   CarrierRegistry | handshake phases | index framing | modifiers    |
//! |   tcp  fast_tcp  text  text_ack  udp  mcast  local  priority        |
//! +---------------------------------------------------------------------+
//! |                          Transport Layer                            |
//! |   TwoWayStream: TCP socket | datagram | in-memory pipe | null       |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Bottle`] | Ordered, nestable list of typed values |
//! | [`ConnectionReader`] / [`ConnectionWriter`] | Per-message cursor and block buffer |
//! | [`Carrier`] | Per-connection protocol plugin |
//! | [`CarrierRegistry`] | Carrier lookup by name or header, plugin discovery |
//! | [`Connection`] | Handshake and message exchange over one stream |
//!
//! ## Features
//!
//! - `plugin-descriptors` (default): YAML carrier descriptors via
//!   [`plugin::DirectoryDiscovery`]

// Clippy: No blanket suppressions. Fix issues properly or use inline #[allow] with justification.

/// Typed value container and its codecs.
pub mod bottle;
/// Carrier trait, handshake phases and the built-in carriers.
pub mod carrier;
/// Wire constants and runtime connection settings.
pub mod config;
/// Handshake and message driver.
pub mod connection;
/// Error type.
pub mod error;
/// Carrier plugin descriptors and discovery.
pub mod plugin;
/// Serialization trait for anything sent over a connection.
pub mod portable;
/// Read cursor over one message.
pub mod reader;
/// Carrier registry.
pub mod registry;
/// Connection identity.
pub mod route;
/// Byte streams under the carriers.
pub mod transport;
/// Typed values held by bottles.
pub mod value;
/// Block buffer for one outgoing message.
pub mod writer;

pub use bottle::Bottle;
pub use carrier::local::{LocalCarrier, LocalCarrierManager};
pub use carrier::priority::{
    Clock, ElectionToken, ManualClock, MonotonicClock, PriorityCarrier, PriorityElection,
    PriorityParams,
};
pub use carrier::{Carrier, CarrierSpec, ConnectionState, Incoming};
pub use config::ConnectionConfig;
pub use connection::{Connection, Delivery};
pub use error::{Error, Result};
pub use plugin::{CarrierDescriptor, PluginDiscovery, StaticDiscovery};
pub use portable::{Portable, RawBytes};
pub use reader::ConnectionReader;
pub use registry::{BuiltinServices, CarrierFactory, CarrierRegistry};
pub use route::Route;
pub use value::{Value, ValueKind, Vocab};
pub use writer::{ConnectionWriter, SharedObject};

/// Portwire version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
