// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Byte-stream collaborators consumed by carriers.
//!
//! Carriers never open sockets on their own account except when they switch
//! a connection to datagrams. Everything else arrives as a [`TwoWayStream`]:
//!
//! - [`SocketStream`] - plain TCP (`std::net::TcpStream`)
//! - [`MemoryStream`] - cross-wired in-memory pipe (tests, in-process bootstrap)
//! - [`DatagramStream`] - UDP unicast/multicast with packet boundaries
//! - [`NullStream`] - no physical wire (local carrier)
//!
//! # Example
//!
//! ```
//! use portwire::transport::{MemoryStream, TwoWayStream};
//! use std::io::{Read, Write};
//!
//! let (mut a, mut b) = MemoryStream::pair();
//! a.write_all(b"hello").unwrap();
//! let mut buf = [0u8; 5];
//! b.read_exact(&mut buf).unwrap();
//! assert_eq!(&buf, b"hello");
//! assert!(a.is_ok());
//! ```

mod datagram;
mod memory;

pub use datagram::DatagramStream;
pub use memory::MemoryStream;

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

/// Abstraction over the byte-oriented streams a connection runs on.
///
/// # Implementation Notes
///
/// - Reads block until at least one byte, EOF, an error, or the read timeout
/// - `begin_packet` / `end_packet` delimit one message for packet transports;
///   stream transports treat `end_packet` as a flush
/// - `is_ok` turns false after EOF or an I/O error and never turns back
pub trait TwoWayStream: Read + Write + Send {
    /// Whether the stream is still usable.
    fn is_ok(&self) -> bool;

    /// Close both directions. Idempotent.
    fn close(&mut self);

    /// Local socket address, if the stream has one.
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Remote socket address, if the stream has one.
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Set the blocking read timeout (`None` = block forever).
    fn set_read_timeout(&mut self, _dur: Option<Duration>) -> io::Result<()> {
        Ok(())
    }

    /// Mark the start of an outgoing message.
    fn begin_packet(&mut self) {}

    /// Mark the end of an outgoing message.
    fn end_packet(&mut self) -> io::Result<()> {
        self.flush()
    }

    /// Drop what is left of the current incoming packet. No-op on streams.
    fn discard_packet(&mut self) {}
}

/// Type alias for a boxed stream.
pub type BoxedStream = Box<dyn TwoWayStream>;

// ============================================================================
// TCP
// ============================================================================

/// TCP stream tracking its own health.
#[derive(Debug)]
pub struct SocketStream {
    stream: TcpStream,
    ok: bool,
}

impl SocketStream {
    /// Wrap a connected TCP stream.
    pub fn new(stream: TcpStream) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("[SocketStream] set_nodelay failed: {}", e);
        }
        Self { stream, ok: true }
    }

    /// Connect to `addr`.
    pub fn connect(addr: SocketAddr) -> io::Result<Self> {
        Ok(Self::new(TcpStream::connect(addr)?))
    }

    /// Borrow the underlying TCP stream.
    pub fn get_ref(&self) -> &TcpStream {
        &self.stream
    }
}

impl Read for SocketStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.stream.read(buf) {
            Ok(0) if !buf.is_empty() => {
                self.ok = false;
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(e) if is_transient(&e) => Err(e),
            Err(e) => {
                self.ok = false;
                Err(e)
            }
        }
    }
}

impl Write for SocketStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf).inspect_err(|_| self.ok = false)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl TwoWayStream for SocketStream {
    fn is_ok(&self) -> bool {
        self.ok
    }

    fn close(&mut self) {
        if self.ok {
            let _ = self.stream.shutdown(Shutdown::Both);
            self.ok = false;
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.stream.local_addr().ok()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.peer_addr().ok()
    }

    fn set_read_timeout(&mut self, dur: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(dur)
    }
}

// ============================================================================
// Null stream
// ============================================================================

/// Stream with no physical wire: reads hit EOF, writes are refused.
///
/// Used by carriers that move data out of band (the local carrier).
#[derive(Debug, Default)]
pub struct NullStream {
    closed: bool,
}

impl NullStream {
    /// Create an open null stream.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Read for NullStream {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }
}

impl Write for NullStream {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "null stream carries no bytes",
        ))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl TwoWayStream for NullStream {
    fn is_ok(&self) -> bool {
        !self.closed
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Timeouts and interrupts do not poison a stream.
pub(crate) fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_stream_trait_object_safe() {
        fn _accept_stream(_s: &dyn TwoWayStream) {}
        let null = NullStream::new();
        _accept_stream(&null);
    }

    #[test]
    fn test_null_stream_reads_eof_and_refuses_writes() {
        let mut s = NullStream::new();
        let mut buf = [0u8; 4];
        assert_eq!(s.read(&mut buf).unwrap(), 0);
        assert!(s.write(b"x").is_err());
        assert!(s.is_ok());
        s.close();
        assert!(!s.is_ok());
    }

    #[test]
    fn test_socket_stream_eof_marks_not_ok() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = SocketStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        let mut server = SocketStream::new(server);

        client.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
        assert!(server.peer_addr().is_some());

        client.close();
        assert_eq!(server.read(&mut buf).unwrap(), 0);
        assert!(!server.is_ok());
    }
}
