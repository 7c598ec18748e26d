// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Datagram carrier.
//!
//! The handshake runs on the bootstrap stream; the receiver then binds a
//! UDP socket, answers with its port, and both sides switch to datagrams.
//! Each message (index plus content) is one datagram. No acks, no replies.

use super::{phases, Carrier, ConnectionState};
use crate::config::{HEADER_SIZE, UDP_CODE};
use crate::error::{Error, Result};
use crate::transport::{DatagramStream, TwoWayStream};
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Unicast datagram carrier.
#[derive(Clone, Debug)]
pub struct UdpCarrier {
    name: String,
}

impl UdpCarrier {
    pub fn new() -> Self {
        Self::named("udp")
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
        }
    }
}

impl Default for UdpCarrier {
    fn default() -> Self {
        Self::new()
    }
}

/// Address the receiver is reachable on, as seen from the bootstrap stream.
pub(crate) fn local_ip(stream: &dyn TwoWayStream) -> IpAddr {
    stream
        .local_addr()
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Address of the peer, as seen from the bootstrap stream.
pub(crate) fn peer_ip(stream: &dyn TwoWayStream) -> IpAddr {
    stream
        .peer_addr()
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

pub(crate) fn expect_port(state: &mut ConnectionState) -> Result<u16> {
    let port = phases::expect_yarp_number(state.stream())?;
    u16::try_from(port).map_err(|_| Error::protocol(format!("bad datagram port {}", port)))
}

impl Carrier for UdpCarrier {
    fn name(&self) -> &str {
        &self.name
    }

    fn check_header(&self, header: &[u8]) -> bool {
        phases::parse_specifier(header) == Some((UDP_CODE, false))
    }

    fn header(&self) -> [u8; HEADER_SIZE] {
        phases::specifier(UDP_CODE, false)
    }

    fn is_connectionless(&self) -> bool {
        true
    }

    fn create(&self) -> Box<dyn Carrier> {
        Box::new(self.clone())
    }

    fn expect_reply_to_header(&mut self, state: &mut ConnectionState) -> Result<()> {
        let port = expect_port(state)?;
        let target = SocketAddr::new(peer_ip(state.stream()), port);
        let datagram = DatagramStream::sender(target)?;
        let mut bootstrap = state.replace_stream(Box::new(datagram));
        bootstrap.close();
        log::debug!("[UdpCarrier] {} switched to datagrams -> {}", state.route(), target);
        Ok(())
    }

    fn respond_to_header(&mut self, state: &mut ConnectionState) -> Result<()> {
        let ip = local_ip(state.stream());
        let datagram = DatagramStream::bind(SocketAddr::new(ip, 0))?;
        let port = datagram.local_addr().map(|addr| addr.port()).unwrap_or(0);
        phases::send_yarp_number(state.stream(), u32::from(port))?;
        state.stream().flush()?;
        let mut bootstrap = state.replace_stream(Box::new(datagram));
        bootstrap.close();
        log::debug!("[UdpCarrier] {} receiving datagrams on port {}", state.route(), port);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_udp_header_has_no_ack_flag() {
        let udp = UdpCarrier::new();
        assert_eq!(phases::parse_specifier(&udp.header()), Some((UDP_CODE, false)));
        assert!(udp.check_header(&udp.header()));
        assert!(udp.is_connectionless());
        assert!(!udp.require_ack());
    }
}
