// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stream carrier over TCP (or any reliable byte stream).
//!
//! `tcp` acknowledges every message that does not expect a reply;
//! `fast_tcp` is the same protocol with acks switched off in the specifier.

use super::{phases, Carrier, ConnectionState};
use crate::config::{HEADER_SIZE, TCP_CODE};
use crate::error::Result;
use std::io::Write;

/// Binary, index-framed stream carrier.
#[derive(Clone, Debug)]
pub struct TcpCarrier {
    name: String,
    require_ack: bool,
}

impl TcpCarrier {
    /// `tcp`: acknowledged.
    pub fn new() -> Self {
        Self::named("tcp", true)
    }

    /// `fast_tcp`: unacknowledged.
    pub fn fast() -> Self {
        Self::named("fast_tcp", false)
    }

    pub fn named(name: &str, require_ack: bool) -> Self {
        Self {
            name: name.to_owned(),
            require_ack,
        }
    }
}

impl Default for TcpCarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl Carrier for TcpCarrier {
    fn name(&self) -> &str {
        &self.name
    }

    fn check_header(&self, header: &[u8]) -> bool {
        phases::parse_specifier(header) == Some((TCP_CODE, self.require_ack))
    }

    fn header(&self) -> [u8; HEADER_SIZE] {
        phases::specifier(TCP_CODE, self.require_ack)
    }

    fn set_parameters(&mut self, header: &[u8]) {
        if let Some((_, ack)) = phases::parse_specifier(header) {
            self.require_ack = ack;
        }
    }

    fn require_ack(&self) -> bool {
        self.require_ack
    }

    fn supports_reply(&self) -> bool {
        true
    }

    fn create(&self) -> Box<dyn Carrier> {
        Box::new(self.clone())
    }

    fn expect_reply_to_header(&mut self, state: &mut ConnectionState) -> Result<()> {
        let port = phases::expect_yarp_number(state.stream())?;
        log::debug!("[TcpCarrier] receiver answered from port {}", port);
        Ok(())
    }

    fn respond_to_header(&mut self, state: &mut ConnectionState) -> Result<()> {
        let port = state
            .stream()
            .local_addr()
            .map(|addr| u32::from(addr.port()))
            .unwrap_or(0);
        phases::send_yarp_number(state.stream(), port)?;
        state.stream().flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_variants_are_distinguishable() {
        let tcp = TcpCarrier::new();
        let fast = TcpCarrier::fast();
        assert!(tcp.check_header(&tcp.header()));
        assert!(!tcp.check_header(&fast.header()));
        assert!(!fast.check_header(&tcp.header()));
        assert!(tcp.require_ack());
        assert!(!fast.require_ack());
    }

    #[test]
    fn test_set_parameters_reads_ack_flag() {
        let mut carrier = TcpCarrier::new();
        carrier.set_parameters(&TcpCarrier::fast().header());
        assert!(!carrier.require_ack());
    }
}
