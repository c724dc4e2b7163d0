//! Handshake wire format and per-pair phases.

use crate::bus::transport::{BusError, PeerId};
use serde::{Deserialize, Serialize};

const EVENT_PREFIX: &str = "modsync";

/// Phase of one (peer, extension) handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    Idle,
    AwaitingPeerAck,
    /// Terminal success.
    Reconciled,
    /// Terminal failure; the extension's content stays withheld.
    TimedOut,
}

impl HandshakePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingPeerAck => "awaiting_peer_ack",
            Self::Reconciled => "reconciled",
            Self::TimedOut => "timed_out",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Reconciled | Self::TimedOut)
    }
}

/// Key of one handshake: the remote side and the extension.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PairKey {
    pub peer: PeerId,
    pub extension_id: String,
}

impl PairKey {
    pub fn new(peer: PeerId, extension_id: impl Into<String>) -> Self {
        Self {
            peer,
            extension_id: extension_id.into(),
        }
    }
}

/// Payload of both handshake events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeMessage {
    pub extension_id: String,
    /// Peer the message is meant for; `None` addresses everyone.
    #[serde(default)]
    pub target: Option<PeerId>,
}

impl HandshakeMessage {
    pub fn new(extension_id: impl Into<String>, target: Option<PeerId>) -> Self {
        Self {
            extension_id: extension_id.into(),
            target,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, BusError> {
        serde_json::to_vec(self).map_err(|err| BusError::InvalidPayload(err.to_string()))
    }

    pub fn decode(payload: &[u8]) -> Result<Self, BusError> {
        serde_json::from_slice(payload).map_err(|err| BusError::InvalidPayload(err.to_string()))
    }

    /// Whether `local` should act on this message.
    pub fn is_addressed_to(&self, local: PeerId) -> bool {
        self.target.map_or(true, |target| target == local)
    }
}

/// Event asking peers to acknowledge `extension_id`.
pub fn start_event_name(extension_id: &str) -> String {
    format!("{EVENT_PREFIX}/{extension_id}/handshake/start")
}

/// Event acknowledging `extension_id`.
pub fn finish_event_name(extension_id: &str) -> String {
    format!("{EVENT_PREFIX}/{extension_id}/handshake/finish")
}
