// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Multicast carrier.
//!
//! Like udp, but the sender names an IPv4 group (`mcast+group.239.1.2.3`)
//! in the extra header. The receiver joins that group on an ephemeral port
//! and answers with the port; the sender then targets `group:port`.

use super::udp::expect_port;
use super::{phases, Carrier, CarrierSpec, ConnectionState};
use crate::config::{DEFAULT_MCAST_GROUP, HEADER_SIZE, MCAST_CODE};
use crate::error::{Error, Result};
use crate::transport::{DatagramStream, TwoWayStream};
use std::io::Write;
use std::net::{Ipv4Addr, SocketAddrV4};

/// IPv4 multicast datagram carrier.
#[derive(Clone, Debug)]
pub struct McastCarrier {
    name: String,
    group: Ipv4Addr,
}

impl McastCarrier {
    pub fn new() -> Self {
        Self::named("mcast")
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            group: Ipv4Addr::from(DEFAULT_MCAST_GROUP),
        }
    }

    pub fn group(&self) -> Ipv4Addr {
        self.group
    }
}

impl Default for McastCarrier {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_group(raw: &str) -> Result<Ipv4Addr> {
    let group: Ipv4Addr = raw
        .parse()
        .map_err(|_| Error::Config(format!("bad multicast group {:?}", raw)))?;
    if !group.is_multicast() {
        return Err(Error::Config(format!("{} is not a multicast address", group)));
    }
    Ok(group)
}

impl Carrier for McastCarrier {
    fn name(&self) -> &str {
        &self.name
    }

    fn check_header(&self, header: &[u8]) -> bool {
        phases::parse_specifier(header) == Some((MCAST_CODE, false))
    }

    fn header(&self) -> [u8; HEADER_SIZE] {
        phases::specifier(MCAST_CODE, false)
    }

    fn is_connectionless(&self) -> bool {
        true
    }

    fn configure(&mut self, spec: &CarrierSpec) -> Result<()> {
        if let Some(raw) = spec.get("group") {
            self.group = parse_group(raw)?;
        }
        Ok(())
    }

    fn create(&self) -> Box<dyn Carrier> {
        Box::new(self.clone())
    }

    fn send_header(&mut self, state: &mut ConnectionState) -> Result<()> {
        phases::send_header(state, &self.header())?;
        phases::send_counted_string(state.stream(), &self.group.to_string())
    }

    fn expect_extra_header(&mut self, state: &mut ConnectionState) -> Result<()> {
        phases::expect_qualifier(state)?;
        let max = state.config().max_name_len;
        let raw = phases::expect_counted_string(state.stream(), max)?;
        self.group = parse_group(&raw)?;
        Ok(())
    }

    fn respond_to_header(&mut self, state: &mut ConnectionState) -> Result<()> {
        let datagram = DatagramStream::join_multicast(SocketAddrV4::new(self.group, 0))?;
        let port = datagram.local_addr().map(|addr| addr.port()).unwrap_or(0);
        phases::send_yarp_number(state.stream(), u32::from(port))?;
        state.stream().flush()?;
        let mut bootstrap = state.replace_stream(Box::new(datagram));
        bootstrap.close();
        log::debug!("[McastCarrier] {} joined {}:{}", state.route(), self.group, port);
        Ok(())
    }

    fn expect_reply_to_header(&mut self, state: &mut ConnectionState) -> Result<()> {
        let port = expect_port(state)?;
        let datagram = DatagramStream::multicast_sender(SocketAddrV4::new(self.group, port))?;
        let mut bootstrap = state.replace_stream(Box::new(datagram));
        bootstrap.close();
        Ok(())
    }
}
