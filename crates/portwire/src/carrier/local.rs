// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process carrier.
//!
//! The handshake (`LOCALITY`, sender name, qualifier) runs once on the
//! bootstrap stream. The receiver then offers a rendezvous in the shared
//! [`LocalCarrierManager`] under `(to, from)` and answers; the sender claims
//! it, and both sides drop the bootstrap stream.
//!
//! After that, messages never touch a wire:
//!
//! - data travels through a zero-capacity channel, so `write` blocks until
//!   the receiver takes the message (object references are handed over as is)
//! - the sender then blocks on a one-slot ack channel until the receiver
//!   has consumed the message
//! - dropping either side disconnects both channels and wakes the other
//!   with [`Error::PeerGone`]

use super::{phases, Carrier, ConnectionState, Incoming};
use crate::config::{HEADER_SIZE, LOCAL_HEADER};
use crate::error::{Error, Result};
use crate::transport::NullStream;
use crate::writer::{ConnectionWriter, SharedObject};
use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One handed-off message.
pub struct LocalMessage {
    pub bytes: Vec<u8>,
    pub envelope: Option<Vec<u8>>,
    pub reference: Option<SharedObject>,
}

/// Sender half of a rendezvous.
struct LocalLink {
    data_tx: Sender<LocalMessage>,
    ack_rx: Receiver<()>,
}

/// Receiver half of a rendezvous.
struct LocalPeer {
    data_rx: Receiver<LocalMessage>,
    ack_tx: Sender<()>,
}

type RendezvousKey = (String, String);

/// An unclaimed offer; `id` tells successive offers on one port pair apart.
struct PendingOffer {
    id: u64,
    link: LocalLink,
}

/// Rendezvous point for in-process connections, keyed by `(to, from)` port names.
#[derive(Default)]
pub struct LocalCarrierManager {
    pending: Mutex<HashMap<RendezvousKey, PendingOffer>>,
    next_id: AtomicU64,
}

impl LocalCarrierManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rendezvous offered by receivers and not yet claimed by senders.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    fn offer(&self, to: &str, from: &str) -> (u64, LocalPeer) {
        let (data_tx, data_rx) = bounded(0);
        let (ack_tx, ack_rx) = bounded(1);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let key = (to.to_owned(), from.to_owned());
        let offer = PendingOffer {
            id,
            link: LocalLink { data_tx, ack_rx },
        };
        if self.pending.lock().insert(key, offer).is_some() {
            log::warn!("[LocalCarrier] replaced unclaimed rendezvous {} <- {}", to, from);
        }
        (id, LocalPeer { data_rx, ack_tx })
    }

    fn claim(&self, to: &str, from: &str) -> Option<LocalLink> {
        self.pending
            .lock()
            .remove(&(to.to_owned(), from.to_owned()))
            .map(|offer| offer.link)
    }

    /// Drop offer `id` if it is still pending; a newer offer on the same
    /// pair stays.
    fn withdraw(&self, to: &str, from: &str, id: u64) {
        let mut pending = self.pending.lock();
        let key = (to.to_owned(), from.to_owned());
        if pending.get(&key).is_some_and(|offer| offer.id == id) {
            pending.remove(&key);
        }
    }
}

impl std::fmt::Debug for LocalCarrierManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCarrierManager")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Zero-copy in-process carrier.
pub struct LocalCarrier {
    name: String,
    manager: Arc<LocalCarrierManager>,
    link: Option<LocalLink>,
    peer: Option<LocalPeer>,
    offer: Option<(RendezvousKey, u64)>,
}

impl LocalCarrier {
    pub fn new(manager: Arc<LocalCarrierManager>) -> Self {
        Self::named("local", manager)
    }

    pub fn named(name: &str, manager: Arc<LocalCarrierManager>) -> Self {
        Self {
            name: name.to_owned(),
            manager,
            link: None,
            peer: None,
            offer: None,
        }
    }

    fn switch_to_null_stream(state: &mut ConnectionState) {
        let mut bootstrap = state.replace_stream(Box::new(NullStream::new()));
        bootstrap.close();
    }
}

impl Carrier for LocalCarrier {
    fn name(&self) -> &str {
        &self.name
    }

    fn check_header(&self, header: &[u8]) -> bool {
        header.starts_with(LOCAL_HEADER)
    }

    fn header(&self) -> [u8; HEADER_SIZE] {
        *LOCAL_HEADER
    }

    fn require_ack(&self) -> bool {
        true
    }

    fn is_local(&self) -> bool {
        true
    }

    fn create(&self) -> Box<dyn Carrier> {
        Box::new(LocalCarrier::named(&self.name, self.manager.clone()))
    }

    fn respond_to_header(&mut self, state: &mut ConnectionState) -> Result<()> {
        let to = state.route().to_name().to_owned();
        let from = state.route().from_name().to_owned();
        let (id, peer) = self.manager.offer(&to, &from);
        self.peer = Some(peer);
        self.offer = Some(((to, from), id));
        phases::send_yarp_number(state.stream(), 0)?;
        state.stream().flush()?;
        Self::switch_to_null_stream(state);
        Ok(())
    }

    fn expect_reply_to_header(&mut self, state: &mut ConnectionState) -> Result<()> {
        phases::expect_yarp_number(state.stream())?;
        let route = state.route();
        let link = self
            .manager
            .claim(route.to_name(), route.from_name())
            .ok_or_else(|| {
                Error::protocol(format!("no local rendezvous for {}", route))
            })?;
        self.link = Some(link);
        Self::switch_to_null_stream(state);
        log::debug!("[LocalCarrier] {} linked in-process", state.route());
        Ok(())
    }

    fn write(
        &mut self,
        _state: &mut ConnectionState,
        writer: &mut ConnectionWriter,
        _expect_reply: bool,
    ) -> Result<()> {
        let link = self.link.as_ref().ok_or(Error::PeerGone)?;
        let message = LocalMessage {
            bytes: writer.to_bytes(),
            envelope: writer.envelope().map(<[u8]>::to_vec),
            reference: writer.take_reference(),
        };
        link.data_tx.send(message).map_err(|_| Error::PeerGone)
    }

    fn expect_ack(&mut self, _state: &mut ConnectionState) -> Result<()> {
        let link = self.link.as_ref().ok_or(Error::PeerGone)?;
        link.ack_rx.recv().map_err(|_| Error::PeerGone)
    }

    fn expect_index(&mut self, _state: &mut ConnectionState) -> Result<Incoming> {
        let peer = self.peer.as_ref().ok_or(Error::PeerGone)?;
        let message = peer.data_rx.recv().map_err(|_| Error::PeerGone)?;
        Ok(Incoming {
            len: message.bytes.len(),
            envelope: message.envelope,
            expects_reply: false,
            body: Some(message.bytes),
            reference: message.reference,
        })
    }

    fn send_ack(&mut self, _state: &mut ConnectionState) -> Result<()> {
        if let Some(peer) = &self.peer {
            if peer.ack_tx.send(()).is_err() {
                log::debug!("[LocalCarrier] sender left before the ack");
            }
        }
        Ok(())
    }

    fn close(&mut self, _state: &mut ConnectionState) {
        self.link = None;
        self.peer = None;
        if let Some(((to, from), id)) = self.offer.take() {
            self.manager.withdraw(&to, &from, id);
        }
    }
}
