// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Portwire configuration - wire constants and runtime connection settings.
//!
//! # Architecture
//!
//! - **Level 1 (Static)**: Compile-time constants (header sizes, magic numbers, tags)
//! - **Level 2 (Dynamic)**: [`ConnectionConfig`] for per-connection limits and timeouts
//!
//! Wire constants are a cross-implementation contract. **Never hardcode them elsewhere!**
//!
//! # Example
//!
//! ```
//! use portwire::config::{ConnectionConfig, HEADER_SIZE};
//! use std::time::Duration;
//!
//! assert_eq!(HEADER_SIZE, 8);
//! let config = ConnectionConfig {
//!     handshake_timeout: Some(Duration::from_secs(2)),
//!     ..Default::default()
//! };
//! assert_eq!(config.max_name_len, 1024);
//! ```

use std::time::Duration;

// =======================================================================
// Handshake layout
// =======================================================================

/// Size of the protocol specifier (carrier magic) in bytes.
pub const HEADER_SIZE: usize = 8;

/// Base added to a carrier's specifier code inside a yarp number header.
pub const SPECIFIER_BASE: u32 = 7777;

/// Specifier flag set when the sender does not require acknowledgements.
pub const SPECIFIER_NO_ACK: u32 = 0x80;

/// Mask extracting the carrier code from a specifier.
pub const SPECIFIER_CODE_MASK: u32 = 0x7F;

/// Size of the fixed secondary index header.
pub const INDEX_HEADER_SIZE: usize = 10;

/// Index flag: the first inbound block carries the envelope.
pub const INDEX_FLAG_ENVELOPE: u8 = 0x01;

/// Filler for unused index header bytes.
pub const INDEX_RESERVED: u8 = 0xFF;

/// Largest block count expressible in the index header.
pub const MAX_INDEX_BLOCKS: usize = u8::MAX as usize;

/// Protocol specifier of the text carrier.
pub const TEXT_HEADER: &[u8; HEADER_SIZE] = b"CONNECT ";

/// Protocol specifier of the text carrier ack variant.
pub const TEXT_ACK_HEADER: &[u8; HEADER_SIZE] = b"CONNACK ";

/// Protocol specifier of the in-process carrier.
pub const LOCAL_HEADER: &[u8; HEADER_SIZE] = b"LOCALITY";

/// Acknowledgement line of the text carrier ack variant.
pub const TEXT_ACK: &str = "<ACK>";

// =======================================================================
// Specifier codes
// =======================================================================

/// Carrier code for the udp carrier.
pub const UDP_CODE: u32 = 0;

/// Carrier code for the mcast carrier.
pub const MCAST_CODE: u32 = 1;

/// Carrier code for the tcp carrier.
pub const TCP_CODE: u32 = 3;

// =======================================================================
// Limits
// =======================================================================

/// Default maximum sender-name length (bytes, NUL included).
pub const DEFAULT_MAX_NAME_LEN: usize = 1024;

/// Default maximum declared message size (16 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Largest datagram the udp/mcast carriers exchange.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Default multicast group used by the mcast carrier.
pub const DEFAULT_MCAST_GROUP: [u8; 4] = [239, 255, 42, 1];

/// Environment variable overriding [`ConnectionConfig::handshake_timeout`] (milliseconds).
pub const ENV_HANDSHAKE_TIMEOUT_MS: &str = "PORTWIRE_HANDSHAKE_TIMEOUT_MS";

// =======================================================================
// Runtime configuration
// =======================================================================

/// Per-connection runtime settings.
///
/// Retry policy is deliberately absent: a failed handshake is reported to
/// the caller, which decides whether to try again.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Read timeout applied to the stream while the handshake runs.
    ///
    /// `None` blocks until the peer sends, closes, or the stream errors.
    pub handshake_timeout: Option<Duration>,

    /// Maximum accepted sender-name length (bytes, NUL included).
    pub max_name_len: usize,

    /// Maximum accepted declared message length (anti-OOM protection).
    pub max_message_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: None,
            max_name_len: DEFAULT_MAX_NAME_LEN,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl ConnectionConfig {
    /// Defaults, with `PORTWIRE_HANDSHAKE_TIMEOUT_MS` applied when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(ENV_HANDSHAKE_TIMEOUT_MS) {
            match raw.trim().parse::<u64>() {
                Ok(0) => config.handshake_timeout = None,
                Ok(ms) => config.handshake_timeout = Some(Duration::from_millis(ms)),
                Err(_) => log::warn!(
                    "[Config] ignoring {}={:?}: not a number of milliseconds",
                    ENV_HANDSHAKE_TIMEOUT_MS,
                    raw
                ),
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_constants() {
        assert_eq!(TEXT_HEADER.len(), HEADER_SIZE);
        assert_eq!(LOCAL_HEADER.len(), HEADER_SIZE);
        assert_ne!(TEXT_HEADER, TEXT_ACK_HEADER);
        assert_eq!(INDEX_HEADER_SIZE, 10);
        assert_eq!(SPECIFIER_BASE + TCP_CODE, 7780);
    }

    #[test]
    fn test_default_config_blocks_forever() {
        let config = ConnectionConfig::default();
        assert!(config.handshake_timeout.is_none());
        assert_eq!(config.max_message_size, 16 * 1024 * 1024);
    }
}
