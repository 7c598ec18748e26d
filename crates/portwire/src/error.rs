// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Errors returned by connection-level operations.
//!
//! Low-level cursor reads keep a boolean/`Option` contract with a sticky
//! error flag (see [`crate::reader::ConnectionReader`]). Everything above
//! the cursor (handshake phases, registry installation, message exchange)
//! reports failures through this enum.

/// Errors returned by portwire operations.
///
/// # Example
///
/// ```
/// use portwire::Error;
///
/// let err = Error::CarrierNotFound("shmem".into());
/// assert_eq!(err.to_string(), "Carrier not found: shmem");
/// ```
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Malformed or short header, bad index, unknown or mismatched tag.
    Protocol(String),
    /// Sender name exceeds the configured limit.
    NameTooLong(usize),
    /// Declared message length exceeds the configured limit.
    MessageTooLarge(usize),

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// I/O error with underlying cause.
    Io(std::io::Error),
    /// Rendezvous partner vanished (local carrier teardown race).
    PeerGone,

    // ========================================================================
    // Registry Errors
    // ========================================================================
    /// No carrier matches the requested name or header, even after discovery.
    CarrierNotFound(String),
    /// A carrier's header signature cannot be told apart from a registered one.
    AmbiguousSignature {
        /// Carrier being registered.
        name: String,
        /// Already registered carrier it collides with.
        existing: String,
    },

    // ========================================================================
    // Other Errors
    // ========================================================================
    /// Mutation attempted on an immutable instance (the null bottle).
    ReadOnly,
    /// Invalid configuration or carrier parameter.
    Config(String),
    /// Operation not supported by this carrier.
    Unsupported(&'static str),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            Error::NameTooLong(len) => write!(f, "Sender name too long: {} bytes", len),
            Error::MessageTooLarge(len) => write!(f, "Message too large: {} bytes", len),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::PeerGone => write!(f, "Peer vanished during handoff"),
            Error::CarrierNotFound(name) => write!(f, "Carrier not found: {}", name),
            Error::AmbiguousSignature { name, existing } => write!(
                f,
                "Carrier '{}' header is indistinguishable from '{}'",
                name, existing
            ),
            Error::ReadOnly => write!(f, "Instance is read-only"),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Unsupported(what) => write!(f, "Unsupported operation: {}", what),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl Error {
    /// Shorthand for a protocol violation.
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }
}

/// Convenient alias for results using the crate [`Error`] type.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_variants() {
        assert_eq!(
            Error::protocol("bad index").to_string(),
            "Protocol error: bad index"
        );
        assert_eq!(
            Error::AmbiguousSignature {
                name: "a".into(),
                existing: "b".into()
            }
            .to_string(),
            "Carrier 'a' header is indistinguishable from 'b'"
        );
        assert_eq!(Error::NameTooLong(9000).to_string(), "Sender name too long: 9000 bytes");
    }

    #[test]
    fn test_io_error_source() {
        use std::error::Error as _;
        let err: Error = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof").into();
        assert!(err.source().is_some());
        assert!(Error::PeerGone.source().is_none());
    }
}
