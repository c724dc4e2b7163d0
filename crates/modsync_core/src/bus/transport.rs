//! Transport contract and an in-memory loopback network.
//!
//! The real transport belongs to the host application's networking layer;
//! `LoopbackNetwork` connects several in-process peers for tests and the
//! CLI demo.

use log::debug;
use std::collections::{BTreeMap, VecDeque};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Stable identity of one session peer.
pub type PeerId = Uuid;

/// One event as carried by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub sender: PeerId,
    pub event: String,
    pub payload: Vec<u8>,
}

/// Bus/transport errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The local peer is no longer attached to the network.
    Disconnected(PeerId),
    InvalidPayload(String),
}

impl Display for BusError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected(peer) => write!(f, "peer {peer} is disconnected"),
            Self::InvalidPayload(message) => write!(f, "invalid event payload: {message}"),
        }
    }
}

impl Error for BusError {}

/// Named-event transport supplied by the host networking layer.
///
/// Delivery is at-least-once with per-`(sender, event)` ordering.
pub trait Transport {
    fn local_peer(&self) -> PeerId;

    /// Sends to every other peer in the session.
    fn broadcast(&mut self, event: &str, payload: &[u8]) -> Result<(), BusError>;

    /// Returns messages received since the last call, in arrival order.
    fn drain_incoming(&mut self) -> Vec<WireMessage>;
}

#[derive(Debug, Default)]
struct NetworkState {
    inboxes: BTreeMap<PeerId, VecDeque<WireMessage>>,
    duplicate_delivery: bool,
}

/// In-process network connecting any number of peers.
#[derive(Debug, Clone, Default)]
pub struct LoopbackNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a new peer with a fresh id.
    pub fn connect(&self) -> LoopbackTransport {
        let peer = Uuid::new_v4();
        self.lock().inboxes.insert(peer, VecDeque::new());
        LoopbackTransport {
            peer,
            network: self.clone(),
        }
    }

    /// Detaches `peer`; messages addressed to it are dropped.
    pub fn disconnect(&self, peer: PeerId) {
        self.lock().inboxes.remove(&peer);
    }

    /// Delivers every message twice, exercising at-least-once handling.
    pub fn set_duplicate_delivery(&self, enabled: bool) {
        self.lock().duplicate_delivery = enabled;
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.lock().inboxes.keys().copied().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NetworkState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One peer's attachment to a `LoopbackNetwork`.
#[derive(Debug)]
pub struct LoopbackTransport {
    peer: PeerId,
    network: LoopbackNetwork,
}

impl Transport for LoopbackTransport {
    fn local_peer(&self) -> PeerId {
        self.peer
    }

    fn broadcast(&mut self, event: &str, payload: &[u8]) -> Result<(), BusError> {
        let mut state = self.network.lock();
        if !state.inboxes.contains_key(&self.peer) {
            return Err(BusError::Disconnected(self.peer));
        }
        let copies = if state.duplicate_delivery { 2 } else { 1 };
        let message = WireMessage {
            sender: self.peer,
            event: event.to_string(),
            payload: payload.to_vec(),
        };
        for (peer, inbox) in state.inboxes.iter_mut() {
            if *peer == self.peer {
                continue;
            }
            for _ in 0..copies {
                inbox.push_back(message.clone());
            }
        }
        debug!(
            "event=transport_send module=bus status=ok event_name={} sender={}",
            event, self.peer
        );
        Ok(())
    }

    fn drain_incoming(&mut self) -> Vec<WireMessage> {
        let mut state = self.network.lock();
        match state.inboxes.get_mut(&self.peer) {
            Some(inbox) => inbox.drain(..).collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BusError, LoopbackNetwork, Transport};

    #[test]
    fn broadcast_reaches_every_other_peer_in_order() {
        let network = LoopbackNetwork::new();
        let mut a = network.connect();
        let mut b = network.connect();
        let mut c = network.connect();

        a.broadcast("ping", b"1").unwrap();
        a.broadcast("ping", b"2").unwrap();

        assert!(a.drain_incoming().is_empty());
        let at_b = b.drain_incoming();
        assert_eq!(at_b.len(), 2);
        assert_eq!(at_b[0].payload, b"1");
        assert_eq!(at_b[1].payload, b"2");
        assert_eq!(at_b[0].sender, a.local_peer());
        assert_eq!(c.drain_incoming().len(), 2);
    }

    #[test]
    fn duplicate_delivery_doubles_messages() {
        let network = LoopbackNetwork::new();
        let mut a = network.connect();
        let mut b = network.connect();
        network.set_duplicate_delivery(true);

        a.broadcast("ping", b"").unwrap();
        assert_eq!(b.drain_incoming().len(), 2);
    }

    #[test]
    fn disconnected_peer_cannot_send() {
        let network = LoopbackNetwork::new();
        let mut a = network.connect();
        network.disconnect(a.local_peer());

        let err = a.broadcast("ping", b"").expect_err("send after disconnect");
        assert_eq!(err, BusError::Disconnected(a.local_peer()));
        assert!(a.drain_incoming().is_empty());
    }
}
