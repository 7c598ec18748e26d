// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Logical connection identity.

use std::fmt;
use std::sync::Arc;

/// Identifies one logical connection: `(from, to, carrier)`.
///
/// The carrier field holds the full carrier string, qualifier included
/// (`tcp+recv.priority+level.15`).
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Route {
    from: Arc<str>,
    to: Arc<str>,
    carrier: Arc<str>,
}

impl Route {
    pub fn new(from: &str, to: &str, carrier: &str) -> Self {
        Self {
            from: Arc::from(from),
            to: Arc::from(to),
            carrier: Arc::from(carrier),
        }
    }

    pub fn from_name(&self) -> &str {
        &self.from
    }

    pub fn to_name(&self) -> &str {
        &self.to
    }

    pub fn carrier_name(&self) -> &str {
        &self.carrier
    }

    pub fn with_from_name(mut self, from: &str) -> Self {
        self.from = Arc::from(from);
        self
    }

    pub fn with_to_name(mut self, to: &str) -> Self {
        self.to = Arc::from(to);
        self
    }

    pub fn with_carrier_name(mut self, carrier: &str) -> Self {
        self.carrier = Arc::from(carrier);
        self
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}->{}", self.from, self.carrier, self.to)
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Route({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_display_and_builders() {
        let route = Route::new("/src", "/dst", "tcp");
        assert_eq!(route.to_string(), "/src->tcp->/dst");
        let route = route.with_carrier_name("text").with_from_name("/other");
        assert_eq!(route.from_name(), "/other");
        assert_eq!(route.carrier_name(), "text");
        assert_eq!(route.to_name(), "/dst");
    }
}
