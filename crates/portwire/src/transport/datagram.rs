// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP stream with packet boundaries.
//!
//! Outgoing bytes accumulate until [`TwoWayStream::end_packet`] (or a
//! flush), then leave as one datagram. Incoming datagrams are served byte
//! by byte; a read past the end of the current datagram blocks on the next.

use super::TwoWayStream;
use crate::config::MAX_DATAGRAM_SIZE;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

/// Datagram-backed stream used by the udp and mcast carriers.
#[derive(Debug)]
pub struct DatagramStream {
    socket: UdpSocket,
    target: Option<SocketAddr>,
    outgoing: Vec<u8>,
    incoming: Vec<u8>,
    pos: usize,
    ok: bool,
}

impl DatagramStream {
    fn from_socket(socket: UdpSocket, target: Option<SocketAddr>) -> Self {
        Self {
            socket,
            target,
            outgoing: Vec::new(),
            incoming: Vec::new(),
            pos: 0,
            ok: true,
        }
    }

    /// Receiving stream bound to `addr` (port 0 = ephemeral).
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        log::debug!("[Datagram] bound receiver on {}", socket.local_addr()?);
        Ok(Self::from_socket(socket, None))
    }

    /// Sending stream targeting `target` from an ephemeral local port.
    pub fn sender(target: SocketAddr) -> io::Result<Self> {
        let local: SocketAddr = if target.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((std::net::Ipv6Addr::UNSPECIFIED, 0))
        };
        let socket = UdpSocket::bind(local)?;
        log::debug!("[Datagram] sender {} -> {}", socket.local_addr()?, target);
        Ok(Self::from_socket(socket, Some(target)))
    }

    /// Receiving stream joined to an IPv4 multicast group.
    ///
    /// The socket is bound with `SO_REUSEADDR` so several receivers on one
    /// host can join the same group.
    pub fn join_multicast(group: SocketAddrV4) -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, group.port()));
        socket.bind(&bind_addr.into())?;
        let socket: UdpSocket = socket.into();
        socket.join_multicast_v4(group.ip(), &Ipv4Addr::UNSPECIFIED)?;
        socket.set_multicast_loop_v4(true)?;
        log::debug!("[Datagram] joined multicast group {}", group);
        Ok(Self::from_socket(socket, None))
    }

    /// Sending stream targeting an IPv4 multicast group.
    pub fn multicast_sender(group: SocketAddrV4) -> io::Result<Self> {
        let stream = Self::sender(SocketAddr::V4(group))?;
        stream.socket.set_multicast_loop_v4(true)?;
        let _ = stream.socket.set_multicast_ttl_v4(1);
        Ok(stream)
    }

    fn fill(&mut self) -> io::Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let n = self.socket.recv(&mut buf).inspect_err(|e| {
            if !super::is_transient(e) {
                self.ok = false;
            }
        })?;
        buf.truncate(n);
        self.incoming = buf;
        self.pos = 0;
        Ok(())
    }
}

impl Read for DatagramStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos >= self.incoming.len() {
            self.fill()?;
        }
        let available = &self.incoming[self.pos..];
        let n = buf.len().min(available.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        Ok(n)
    }
}

impl Write for DatagramStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.outgoing.len() + buf.len() > MAX_DATAGRAM_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "datagram too large: {} bytes (max {})",
                    self.outgoing.len() + buf.len(),
                    MAX_DATAGRAM_SIZE
                ),
            ));
        }
        self.outgoing.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.outgoing.is_empty() {
            return Ok(());
        }
        let target = self
            .target
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no datagram target"))?;
        let result = self.socket.send_to(&self.outgoing, target);
        self.outgoing.clear();
        result.inspect_err(|_| self.ok = false).map(|_| ())
    }
}

impl TwoWayStream for DatagramStream {
    fn is_ok(&self) -> bool {
        self.ok
    }

    fn close(&mut self) {
        self.ok = false;
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr().ok()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.target
    }

    fn set_read_timeout(&mut self, dur: Option<Duration>) -> io::Result<()> {
        self.socket.set_read_timeout(dur)
    }

    fn begin_packet(&mut self) {
        self.outgoing.clear();
    }

    fn discard_packet(&mut self) {
        if self.pos < self.incoming.len() {
            log::debug!(
                "[Datagram] discarded {} unread bytes",
                self.incoming.len() - self.pos
            );
        }
        self.incoming.clear();
        self.pos = 0;
    }
}
