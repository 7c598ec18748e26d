// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Temporal-priority admission modifier.
//!
//! Attached with `recv.priority` (e.g. `tcp+recv.priority+level.15+tc.0.5`).
//! Every connection into the same destination port joins one election group.
//! Each arriving message stimulates its sender's charge, which then decays
//! exponentially; a message is delivered only while its sender holds the
//! highest charge of the group.
//!
//! | param | meaning                         | default |
//! |-------|---------------------------------|---------|
//! | level | charge ceiling P                | 10      |
//! | tc    | decay constant (s), <= 0 = none | 1.0     |
//! | tr    | resting time at P (s)           | 0       |
//! | st    | stimulation; < 0 inhibits peers | level   |

use super::{Carrier, CarrierSpec, ConnectionState};
use crate::config::HEADER_SIZE;
use crate::error::{Error, Result};
use crate::reader::ConnectionReader;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

pub const DEFAULT_LEVEL: f64 = 10.0;
pub const DEFAULT_DECAY: f64 = 1.0;

// ============================================================================
// Clocks
// ============================================================================

/// Time source for arbitration, as an offset from an arbitrary origin.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

/// Wall-independent process clock.
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock advanced by hand, for deterministic arbitration.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    pub fn set(&self, at: Duration) {
        *self.now.lock() = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }
}

// ============================================================================
// Parameters
// ============================================================================

/// Per-sender arbitration parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PriorityParams {
    pub level: f64,
    pub tc: f64,
    pub tr: f64,
    pub st: f64,
}

impl Default for PriorityParams {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL,
            tc: DEFAULT_DECAY,
            tr: 0.0,
            st: DEFAULT_LEVEL,
        }
    }
}

impl PriorityParams {
    /// Read `level`, `tc`, `tr` and `st` from a carrier spec.
    pub fn from_spec(spec: &CarrierSpec) -> Result<Self> {
        let level = spec.get_f64("level")?.unwrap_or(DEFAULT_LEVEL);
        let params = Self {
            level,
            tc: spec.get_f64("tc")?.unwrap_or(DEFAULT_DECAY),
            tr: spec.get_f64("tr")?.unwrap_or(0.0),
            st: spec.get_f64("st")?.unwrap_or(level),
        };
        if !params.level.is_finite() || params.level < 0.0 {
            return Err(Error::Config(format!("priority level {} must be >= 0", level)));
        }
        if !params.tr.is_finite() || params.tr < 0.0 {
            return Err(Error::Config(format!("priority tr {} must be >= 0", params.tr)));
        }
        // Negative tc (no decay) and negative st (inhibition) are meaningful.
        if !params.tc.is_finite() {
            return Err(Error::Config(format!("priority tc {} must be finite", params.tc)));
        }
        if !params.st.is_finite() {
            return Err(Error::Config(format!("priority st {} must be finite", params.st)));
        }
        Ok(params)
    }

    pub fn is_inhibitory(&self) -> bool {
        self.st < 0.0
    }
}

// ============================================================================
// Election
// ============================================================================

#[derive(Debug)]
struct PeerState {
    params: PriorityParams,
    charge: f64,
    last: Option<Duration>,
    rest_until: Option<Duration>,
}

impl PeerState {
    fn new(params: PriorityParams) -> Self {
        Self {
            params,
            charge: 0.0,
            last: None,
            rest_until: None,
        }
    }

    fn decayed(&self, at: Duration) -> f64 {
        match self.last {
            Some(last) if self.params.tc > 0.0 => {
                let dt = at.saturating_sub(last).as_secs_f64();
                self.charge * (-dt / self.params.tc).exp()
            }
            _ => self.charge,
        }
    }

    fn settle(&mut self, at: Duration) {
        self.charge = self.decayed(at);
        self.last = Some(at);
    }

    fn is_resting(&self, at: Duration) -> bool {
        self.rest_until.is_some_and(|end| at < end)
    }

    fn stimulate(&mut self, at: Duration) {
        self.settle(at);
        if self.is_resting(at) {
            return;
        }
        let ceiling = self.params.level;
        self.charge = (self.charge + self.params.st.abs()).min(ceiling);
        if self.charge >= ceiling && self.params.tr > 0.0 {
            self.rest_until = Some(at + Duration::from_secs_f64(self.params.tr));
        }
    }
}

/// Election groups, one per destination port.
///
/// Inhibitory members never compete: they only drain the others.
///
/// A single lock covers join, leave and each whole arbitration, so two
/// arrivals on the same port are always ordered.
#[derive(Debug, Default)]
pub struct PriorityElection {
    groups: Mutex<HashMap<String, HashMap<u64, PeerState>>>,
    next_id: AtomicU64,
}

impl PriorityElection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the group of `port`. The returned token leaves on drop.
    pub fn join(self: &Arc<Self>, port: &str, params: PriorityParams) -> ElectionToken {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.groups
            .lock()
            .entry(port.to_owned())
            .or_default()
            .insert(id, PeerState::new(params));
        log::debug!("[Priority] peer #{} joined {} with {:?}", id, port, params);
        ElectionToken {
            election: Arc::downgrade(self),
            port: port.to_owned(),
            id,
        }
    }

    /// Members currently in the group of `port`.
    pub fn group_size(&self, port: &str) -> usize {
        self.groups.lock().get(port).map_or(0, HashMap::len)
    }

    fn leave(&self, port: &str, id: u64) {
        let mut groups = self.groups.lock();
        if let Some(group) = groups.get_mut(port) {
            group.remove(&id);
            if group.is_empty() {
                groups.remove(port);
            }
        }
    }

    fn arbitrate(&self, port: &str, id: u64, at: Duration) -> bool {
        let mut groups = self.groups.lock();
        let Some(group) = groups.get_mut(port) else {
            return true;
        };
        let (own, st) = match group.get_mut(&id) {
            Some(me) => {
                me.stimulate(at);
                (me.charge, me.params.st)
            }
            None => return true,
        };

        let mut accept = st >= 0.0;
        for (peer_id, peer) in group.iter_mut() {
            if *peer_id == id {
                continue;
            }
            peer.settle(at);
            if st < 0.0 {
                peer.charge = (peer.charge + st).max(0.0);
            } else if !peer.params.is_inhibitory() && peer.charge > own {
                accept = false;
            }
        }
        accept
    }

    fn charge(&self, port: &str, id: u64, at: Duration) -> f64 {
        self.groups
            .lock()
            .get(port)
            .and_then(|group| group.get(&id))
            .map_or(0.0, |peer| peer.decayed(at))
    }
}

/// Membership in an election group; leaves the group on drop.
pub struct ElectionToken {
    election: Weak<PriorityElection>,
    port: String,
    id: u64,
}

impl ElectionToken {
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Register an arrival at `at`; `true` means deliver it.
    pub fn arbitrate(&self, at: Duration) -> bool {
        self.election
            .upgrade()
            .map_or(true, |election| election.arbitrate(&self.port, self.id, at))
    }

    /// This member's charge as of `at`.
    pub fn charge(&self, at: Duration) -> f64 {
        self.election
            .upgrade()
            .map_or(0.0, |election| election.charge(&self.port, self.id, at))
    }
}

impl Drop for ElectionToken {
    fn drop(&mut self) {
        if let Some(election) = self.election.upgrade() {
            election.leave(&self.port, self.id);
        }
    }
}

impl std::fmt::Debug for ElectionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElectionToken")
            .field("port", &self.port)
            .field("id", &self.id)
            .finish()
    }
}

// ============================================================================
// Carrier
// ============================================================================

/// Admission modifier arbitrating deliveries by temporal priority.
pub struct PriorityCarrier {
    name: String,
    election: Arc<PriorityElection>,
    clock: Arc<dyn Clock>,
    params: PriorityParams,
    token: Option<ElectionToken>,
}

impl PriorityCarrier {
    pub fn new(election: Arc<PriorityElection>, clock: Arc<dyn Clock>) -> Self {
        Self::named("priority", election, clock)
    }

    pub fn named(name: &str, election: Arc<PriorityElection>, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.to_owned(),
            election,
            clock,
            params: PriorityParams::default(),
            token: None,
        }
    }

    pub fn params(&self) -> &PriorityParams {
        &self.params
    }
}

impl Carrier for PriorityCarrier {
    fn name(&self) -> &str {
        &self.name
    }

    fn check_header(&self, _header: &[u8]) -> bool {
        false
    }

    fn header(&self) -> [u8; HEADER_SIZE] {
        [0; HEADER_SIZE]
    }

    fn is_modifier(&self) -> bool {
        true
    }

    fn configure(&mut self, spec: &CarrierSpec) -> Result<()> {
        self.params = PriorityParams::from_spec(spec)?;
        Ok(())
    }

    fn create(&self) -> Box<dyn Carrier> {
        Box::new(PriorityCarrier::named(
            &self.name,
            self.election.clone(),
            self.clock.clone(),
        ))
    }

    fn on_connect(&mut self, state: &ConnectionState) -> Result<()> {
        let port = state.route().to_name();
        self.token = Some(self.election.join(port, self.params));
        Ok(())
    }

    fn accept_incoming_data(&mut self, _reader: &mut ConnectionReader<'_>) -> bool {
        let Some(token) = &self.token else {
            return true;
        };
        let accepted = token.arbitrate(self.clock.now());
        if !accepted {
            log::trace!("[Priority] {} dropped a message", token.port());
        }
        accepted
    }

    fn close(&mut self, _state: &mut ConnectionState) {
        self.token = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(level: f64, st: f64) -> PriorityParams {
        PriorityParams {
            level,
            st,
            ..PriorityParams::default()
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_params_from_spec() {
        let spec = CarrierSpec::parse("tcp+recv.priority+level.15+tc.0.5+tr.2");
        let p = PriorityParams::from_spec(&spec).unwrap();
        assert_eq!(p.level, 15.0);
        assert_eq!(p.tc, 0.5);
        assert_eq!(p.tr, 2.0);
        assert_eq!(p.st, 15.0);
        assert!(!p.is_inhibitory());

        let bad = CarrierSpec::parse("tcp+level.-1");
        assert!(PriorityParams::from_spec(&bad).is_err());
    }

    #[test]
    fn test_non_finite_params_are_rejected() {
        for raw in ["tc.NaN", "tc.inf", "st.nan", "st.-inf", "tr.NaN", "level.nan"] {
            let spec = CarrierSpec::parse(&format!("tcp+recv.priority+{}", raw));
            assert!(
                matches!(PriorityParams::from_spec(&spec), Err(Error::Config(_))),
                "{} accepted",
                raw
            );
        }
        let spec = CarrierSpec::parse("tcp+recv.priority+tc.-1+st.-5");
        let p = PriorityParams::from_spec(&spec).unwrap();
        assert_eq!(p.tc, -1.0);
        assert!(p.is_inhibitory());
    }

    #[test]
    fn test_higher_priority_wins_within_decay_window() {
        let election = Arc::new(PriorityElection::new());
        let high = election.join("/dst", params(15.0, 15.0));
        let low = election.join("/dst", params(10.0, 10.0));

        assert!(high.arbitrate(ms(0)));
        assert!(!low.arbitrate(ms(100)));
        assert!(high.arbitrate(ms(200)));
    }

    #[test]
    fn test_decay_lets_lower_priority_through() {
        let election = Arc::new(PriorityElection::new());
        let high = election.join("/dst", params(15.0, 15.0));
        let low = election.join("/dst", params(10.0, 10.0));

        assert!(high.arbitrate(ms(0)));
        // 15 * e^-1 ~= 5.5 < 10
        assert!(low.arbitrate(ms(1000)));
        assert!((high.charge(ms(1000)) - 15.0 * (-1.0f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn test_inhibitory_sender_is_dropped_and_suppresses_peers() {
        let election = Arc::new(PriorityElection::new());
        let high = election.join("/dst", params(15.0, 15.0));
        let low = election.join("/dst", params(10.0, 10.0));
        let inhibitor = election.join("/dst", params(20.0, -20.0));

        assert!(high.arbitrate(ms(0)));
        assert!(!inhibitor.arbitrate(ms(10)));
        assert_eq!(high.charge(ms(10)), 0.0);
        assert!(low.arbitrate(ms(20)));
    }

    #[test]
    fn test_no_decay_when_tc_is_not_positive() {
        let election = Arc::new(PriorityElection::new());
        let sticky = election.join(
            "/dst",
            PriorityParams {
                tc: 0.0,
                ..params(15.0, 15.0)
            },
        );
        let other = election.join("/dst", params(10.0, 10.0));

        assert!(sticky.arbitrate(ms(0)));
        assert!(!other.arbitrate(Duration::from_secs(3600)));
    }

    #[test]
    fn test_resting_blocks_stimulation() {
        let election = Arc::new(PriorityElection::new());
        let resting = election.join(
            "/dst",
            PriorityParams {
                tr: 1.0,
                ..params(10.0, 10.0)
            },
        );

        assert!(resting.arbitrate(ms(0)));
        assert_eq!(resting.charge(ms(0)), 10.0);
        // Inside [0, 1s): decays, no new stimulation.
        resting.arbitrate(ms(500));
        assert!((resting.charge(ms(500)) - 10.0 * (-0.5f64).exp()).abs() < 1e-9);
        // After the window it can recharge.
        resting.arbitrate(ms(1500));
        assert_eq!(resting.charge(ms(1500)), 10.0);
    }

    #[test]
    fn test_token_drop_leaves_group() {
        let election = Arc::new(PriorityElection::new());
        let a = election.join("/dst", PriorityParams::default());
        let b = election.join("/dst", PriorityParams::default());
        assert_eq!(election.group_size("/dst"), 2);
        drop(a);
        assert_eq!(election.group_size("/dst"), 1);
        drop(b);
        assert_eq!(election.group_size("/dst"), 0);
    }

    #[test]
    fn test_groups_are_per_port() {
        let election = Arc::new(PriorityElection::new());
        let high = election.join("/a", params(15.0, 15.0));
        let low = election.join("/b", params(1.0, 1.0));
        assert!(high.arbitrate(ms(0)));
        assert!(low.arbitrate(ms(1)));
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new();
        clock.advance(ms(250));
        clock.advance(ms(250));
        assert_eq!(clock.now(), ms(500));
        clock.set(ms(10));
        assert_eq!(clock.now(), ms(10));
    }
}
