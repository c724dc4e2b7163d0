//! Per-(peer, extension) handshake state machine.
//!
//! # Responsibility
//! - Start handshakes when a remote peer joins an authoritative session.
//! - Answer incoming handshakes for extensions loaded locally.
//! - Expire unanswered handshakes and reconcile the active content set.
//!
//! # Invariants
//! - The active pointer is published only while no pair awaits an ack.
//! - An extension is admitted only when every pair for it is reconciled.
//! - Each pair reports at most one timeout.
//! - Leaving a session discards every pair and reverts to baseline.
//! - Handshake events are ignored while outside a session.

use crate::bus::event_bus::Outbox;
use crate::bus::transport::PeerId;
use crate::content::registry::ContentRegistry;
use crate::diagnostics::{Diagnostics, NoticeKind};
use crate::extension::host::ExtensionTable;
use crate::runtime::ScheduledTask;
use crate::schedule::{TaskId, TaskQueue};
use crate::session::handshake::{
    finish_event_name, start_event_name, HandshakeMessage, HandshakePhase, PairKey,
};
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Collaborators borrowed from the session context for one operation.
pub struct HandshakeIo<'a> {
    pub registry: &'a mut ContentRegistry,
    pub outbox: &'a mut Outbox,
    pub scheduler: &'a mut TaskQueue<ScheduledTask>,
    pub diagnostics: &'a Diagnostics,
    pub extensions: &'a mut ExtensionTable,
}

#[derive(Debug, Clone, Copy)]
struct PairState {
    phase: HandshakePhase,
    timeout_task: Option<TaskId>,
}

/// Owns every `SessionPeerState` of the local peer.
#[derive(Debug)]
pub struct HandshakeCoordinator {
    local_peer: PeerId,
    timeout: Duration,
    pairs: BTreeMap<PairKey, PairState>,
    remote_peers: BTreeSet<PeerId>,
    is_authority: bool,
    in_session: bool,
}

impl HandshakeCoordinator {
    pub fn new(local_peer: PeerId, timeout: Duration) -> Self {
        Self {
            local_peer,
            timeout,
            pairs: BTreeMap::new(),
            remote_peers: BTreeSet::new(),
            is_authority: false,
            in_session: false,
        }
    }

    pub fn local_peer(&self) -> PeerId {
        self.local_peer
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_authority(&self) -> bool {
        self.is_authority
    }

    pub fn in_session(&self) -> bool {
        self.in_session
    }

    /// Phase of one pair; pairs never seen are `Idle`.
    pub fn phase(&self, peer: PeerId, extension_id: &str) -> HandshakePhase {
        self.pairs
            .get(&PairKey::new(peer, extension_id))
            .map_or(HandshakePhase::Idle, |state| state.phase)
    }

    /// Every tracked pair and its phase, in key order.
    pub fn pairs(&self) -> Vec<(PairKey, HandshakePhase)> {
        self.pairs
            .iter()
            .map(|(key, state)| (key.clone(), state.phase))
            .collect()
    }

    /// Local peer entered a networked session.
    ///
    /// An authority reconciles its own extensions immediately; everyone
    /// else stays on baseline until an authority handshakes with them.
    pub fn on_joined_session(&mut self, is_authority: bool, io: &mut HandshakeIo<'_>) {
        self.discard_pairs(io);
        self.in_session = true;
        self.is_authority = is_authority;
        info!(
            "event=session_join module=session status=ok peer={} authority={} extensions={}",
            self.local_peer,
            is_authority,
            io.extensions.len()
        );
        io.diagnostics
            .show(NoticeKind::HandshakeRequested, "Extension handshake requested");
        io.extensions.notify_session_joined();

        if is_authority {
            let extension_ids = io.extensions.ids();
            self.acknowledge_locally(&extension_ids, io);
        }
        self.reconcile_content(io);
    }

    /// Offline or single-player session became ready.
    ///
    /// Every loaded extension is self-acknowledged without a round trip.
    pub fn on_local_session_ready(&mut self, io: &mut HandshakeIo<'_>) {
        self.discard_pairs(io);
        self.in_session = true;
        self.is_authority = true;
        info!(
            "event=session_local_ready module=session status=ok peer={} extensions={}",
            self.local_peer,
            io.extensions.len()
        );
        let extension_ids = io.extensions.ids();
        self.acknowledge_locally(&extension_ids, io);
        self.reconcile_content(io);
    }

    /// Remote peer joined. Only the authority starts handshakes.
    pub fn on_peer_joined(&mut self, peer: PeerId, io: &mut HandshakeIo<'_>) {
        if !self.in_session || !self.is_authority || peer == self.local_peer {
            debug!(
                "event=handshake_start module=session status=skip peer={} authority={} in_session={}",
                peer, self.is_authority, self.in_session
            );
            return;
        }

        self.remote_peers.insert(peer);
        for extension_id in io.extensions.ids() {
            self.start_handshake(peer, &extension_id, io);
        }
        self.reconcile_content(io);
    }

    /// Extensions were installed after the session started.
    ///
    /// A local or authoritative session acknowledges them itself and
    /// starts their handshakes with every remote peer already present.
    /// Other peers wait for the authority.
    pub fn on_extensions_installed(&mut self, extension_ids: &[String], io: &mut HandshakeIo<'_>) {
        if !self.in_session || !self.is_authority || extension_ids.is_empty() {
            debug!(
                "event=handshake_late_install module=session status=skip extensions={} authority={} in_session={}",
                extension_ids.len(),
                self.is_authority,
                self.in_session
            );
            return;
        }

        self.acknowledge_locally(extension_ids, io);
        let peers: Vec<PeerId> = self.remote_peers.iter().copied().collect();
        for peer in &peers {
            for extension_id in extension_ids {
                self.start_handshake(*peer, extension_id, io);
            }
        }
        info!(
            "event=handshake_late_install module=session status=ok extensions={} peers={}",
            extension_ids.len(),
            peers.len()
        );
        self.reconcile_content(io);
    }

    /// `StartHandshake(extension_id)` arrived from `sender`.
    pub fn on_start_received(
        &mut self,
        sender: PeerId,
        message: &HandshakeMessage,
        io: &mut HandshakeIo<'_>,
    ) {
        if sender == self.local_peer || !message.is_addressed_to(self.local_peer) {
            return;
        }
        let extension_id = message.extension_id.as_str();
        if !self.in_session {
            debug!(
                "event=handshake_reply module=session status=skip peer={} extension_id={} reason=not_in_session",
                sender, extension_id
            );
            return;
        }
        if !io.extensions.contains(extension_id) {
            debug!(
                "event=handshake_reply module=session status=skip peer={} extension_id={} reason=not_loaded",
                sender, extension_id
            );
            return;
        }

        let key = PairKey::new(sender, extension_id);
        let phase = self.phase(sender, extension_id);
        if matches!(phase, HandshakePhase::Idle | HandshakePhase::TimedOut) {
            self.await_ack(key, io);
            io.diagnostics.show(
                NoticeKind::HandshakeReceived,
                format!("Handshake received: {extension_id}"),
            );
        }

        if let Some(finish) = encode_message(&HandshakeMessage::new(extension_id, Some(sender))) {
            io.outbox
                .broadcast(finish_event_name(extension_id), finish.clone());
            if phase != HandshakePhase::Reconciled {
                io.outbox.raise_local(finish_event_name(extension_id), finish);
            }
        }
        info!(
            "event=handshake_reply module=session status=ok peer={} extension_id={} phase={}",
            sender,
            extension_id,
            phase.as_str()
        );
        self.reconcile_content(io);
    }

    /// `FinishHandshake(extension_id)` arrived, either from the remote
    /// side or as the local echo of our own reply.
    pub fn on_finish_received(
        &mut self,
        sender: PeerId,
        message: &HandshakeMessage,
        io: &mut HandshakeIo<'_>,
    ) {
        let peer = if sender == self.local_peer {
            match message.target {
                Some(target) if target != self.local_peer => target,
                _ => return,
            }
        } else if message.is_addressed_to(self.local_peer) {
            sender
        } else {
            return;
        };

        let extension_id = message.extension_id.as_str();
        if !self.in_session {
            debug!(
                "event=handshake_finish module=session status=skip peer={} extension_id={} reason=not_in_session",
                peer, extension_id
            );
            return;
        }
        let key = PairKey::new(peer, extension_id);
        let Some(state) = self.pairs.get_mut(&key) else {
            debug!(
                "event=handshake_finish module=session status=skip peer={} extension_id={} reason=unknown_pair",
                peer, extension_id
            );
            return;
        };
        if state.phase != HandshakePhase::AwaitingPeerAck {
            debug!(
                "event=handshake_finish module=session status=skip peer={} extension_id={} phase={}",
                peer,
                extension_id,
                state.phase.as_str()
            );
            return;
        }

        state.phase = HandshakePhase::Reconciled;
        if let Some(task) = state.timeout_task.take() {
            io.scheduler.cancel(task);
        }
        info!(
            "event=handshake_finish module=session status=ok peer={} extension_id={}",
            peer, extension_id
        );
        io.diagnostics.show(
            NoticeKind::HandshakeFinished,
            format!("Handshake finished: {extension_id}"),
        );
        io.extensions.notify_handshake_completed(extension_id);
        self.reconcile_content(io);
    }

    /// Timeout task for `key` fired.
    pub fn on_timeout(&mut self, key: &PairKey, io: &mut HandshakeIo<'_>) {
        let Some(state) = self.pairs.get_mut(key) else {
            return;
        };
        if state.phase != HandshakePhase::AwaitingPeerAck {
            return;
        }
        state.phase = HandshakePhase::TimedOut;
        state.timeout_task = None;

        warn!(
            "event=handshake_timeout module=session status=error peer={} extension_id={} timeout_ms={}",
            key.peer,
            key.extension_id,
            self.timeout.as_millis()
        );
        io.diagnostics.show(
            NoticeKind::HandshakeTimedOut,
            format!("Handshake timed out: {}", key.extension_id),
        );
        self.reconcile_content(io);
    }

    /// Remote peer left; its pairs no longer constrain the content set.
    pub fn on_peer_left(&mut self, peer: PeerId, io: &mut HandshakeIo<'_>) {
        self.remote_peers.remove(&peer);
        let keys: Vec<PairKey> = self
            .pairs
            .keys()
            .filter(|key| key.peer == peer)
            .cloned()
            .collect();
        if keys.is_empty() {
            return;
        }
        for key in &keys {
            if let Some(task) = self.pairs.remove(key).and_then(|state| state.timeout_task) {
                io.scheduler.cancel(task);
            }
        }
        info!(
            "event=session_peer_left module=session status=ok peer={} pairs={}",
            peer,
            keys.len()
        );
        self.reconcile_content(io);
    }

    /// Local peer left the session; resets to baseline unconditionally.
    pub fn on_left_session(&mut self, io: &mut HandshakeIo<'_>) {
        let discarded = self.discard_pairs(io);
        self.in_session = false;
        self.is_authority = false;
        io.registry.revert();
        io.extensions.notify_session_left();
        info!(
            "event=session_leave module=session status=ok peer={} discarded_pairs={}",
            self.local_peer, discarded
        );
    }

    /// Publishes or reverts so the active pointer matches pair phases.
    ///
    /// Returns whether the extended set is active afterwards.
    pub fn reconcile_content(&self, io: &mut HandshakeIo<'_>) -> bool {
        if self
            .pairs
            .values()
            .any(|state| state.phase == HandshakePhase::AwaitingPeerAck)
        {
            io.registry.revert();
            return false;
        }

        let mut admitted = BTreeSet::new();
        let mut withheld = BTreeSet::new();
        for (key, state) in &self.pairs {
            if state.phase == HandshakePhase::Reconciled {
                admitted.insert(key.extension_id.clone());
            } else {
                withheld.insert(key.extension_id.clone());
            }
        }
        admitted.retain(|extension_id| !withheld.contains(extension_id));

        if admitted.is_empty() {
            io.registry.revert();
            return false;
        }
        match io.registry.publish_extended(&admitted) {
            Ok(_) => true,
            Err(err) => {
                error!(
                    "event=content_publish module=session status=error error={}",
                    err
                );
                io.registry.revert();
                false
            }
        }
    }

    fn acknowledge_locally(&mut self, extension_ids: &[String], io: &mut HandshakeIo<'_>) {
        for extension_id in extension_ids {
            self.pairs.insert(
                PairKey::new(self.local_peer, extension_id.as_str()),
                PairState {
                    phase: HandshakePhase::Reconciled,
                    timeout_task: None,
                },
            );
            io.extensions.notify_handshake_completed(extension_id);
        }
        if !extension_ids.is_empty() {
            io.diagnostics
                .show(NoticeKind::HandshakeFinished, "Extension handshake finished");
        }
    }

    fn start_handshake(&mut self, peer: PeerId, extension_id: &str, io: &mut HandshakeIo<'_>) {
        if self.phase(peer, extension_id) == HandshakePhase::AwaitingPeerAck {
            return;
        }
        self.await_ack(PairKey::new(peer, extension_id), io);
        if let Some(start) = encode_message(&HandshakeMessage::new(extension_id, Some(peer))) {
            io.outbox.broadcast(start_event_name(extension_id), start);
        }
        info!(
            "event=handshake_start module=session status=ok peer={} extension_id={}",
            peer, extension_id
        );
        io.diagnostics.show(
            NoticeKind::HandshakeRequested,
            format!("Handshake requested: {extension_id}"),
        );
    }

    fn await_ack(&mut self, key: PairKey, io: &mut HandshakeIo<'_>) {
        if let Some(task) = self.pairs.get(&key).and_then(|state| state.timeout_task) {
            io.scheduler.cancel(task);
        }
        let task = io
            .scheduler
            .schedule(self.timeout, ScheduledTask::HandshakeTimeout(key.clone()));
        self.pairs.insert(
            key,
            PairState {
                phase: HandshakePhase::AwaitingPeerAck,
                timeout_task: Some(task),
            },
        );
    }

    fn discard_pairs(&mut self, io: &mut HandshakeIo<'_>) -> usize {
        self.remote_peers.clear();
        let discarded = self.pairs.len();
        for state in std::mem::take(&mut self.pairs).into_values() {
            if let Some(task) = state.timeout_task {
                io.scheduler.cancel(task);
            }
        }
        discarded
    }
}

fn encode_message(message: &HandshakeMessage) -> Option<Vec<u8>> {
    match message.encode() {
        Ok(payload) => Some(payload),
        Err(err) => {
            error!(
                "event=handshake_encode module=session status=error extension_id={} error={}",
                message.extension_id, err
            );
            None
        }
    }
}
