//! Handler registry and dispatch loop over a `Transport`.
//!
//! # Invariants
//! - Multiple handlers per event name run in registration order.
//! - Events without a handler are dropped silently (debug log only).
//! - Handlers never call the transport directly; they queue into an
//!   `Outbox` that is flushed after each event.

use crate::bus::transport::{BusError, PeerId, Transport, WireMessage};
use log::{debug, warn};
use std::collections::{BTreeMap, VecDeque};

/// Upper bound on events handled by one `dispatch` call, so a handler that
/// keeps raising local events cannot starve the caller.
const MAX_EVENTS_PER_DISPATCH: usize = 1024;

/// Where a delivered event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOrigin {
    Local,
    Remote,
}

/// Event as seen by handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusEvent {
    pub name: String,
    pub sender: PeerId,
    pub payload: Vec<u8>,
    pub origin: EventOrigin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Outbound {
    Broadcast { name: String, payload: Vec<u8> },
    Local { name: String, payload: Vec<u8> },
}

/// Events queued by handlers or lifecycle calls, sent on flush.
#[derive(Debug, Default)]
pub struct Outbox {
    entries: Vec<Outbound>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a send to every other peer.
    pub fn broadcast(&mut self, name: impl Into<String>, payload: Vec<u8>) {
        self.entries.push(Outbound::Broadcast {
            name: name.into(),
            payload,
        });
    }

    /// Queues a delivery to the local peer's own handlers.
    pub fn raise_local(&mut self, name: impl Into<String>, payload: Vec<u8>) {
        self.entries.push(Outbound::Local {
            name: name.into(),
            payload,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Handler invoked with the owner's context, the event and an outbox.
pub type Handler<C> = Box<dyn FnMut(&mut C, &BusEvent, &mut Outbox)>;

/// Named-event bus bound to one transport.
pub struct EventBus<C, T: Transport> {
    transport: T,
    handlers: BTreeMap<String, Vec<Handler<C>>>,
    pending: VecDeque<BusEvent>,
}

impl<C, T: Transport> EventBus<C, T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            handlers: BTreeMap::new(),
            pending: VecDeque::new(),
        }
    }

    pub fn local_peer(&self) -> PeerId {
        self.transport.local_peer()
    }

    /// Registers `handler` for `name`, after any existing handlers.
    pub fn register_handler(
        &mut self,
        name: impl Into<String>,
        handler: impl FnMut(&mut C, &BusEvent, &mut Outbox) + 'static,
    ) {
        self.handlers
            .entry(name.into())
            .or_default()
            .push(Box::new(handler));
    }

    pub fn has_handler(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Sends `name` to every other peer.
    pub fn broadcast(&mut self, name: &str, payload: &[u8]) -> Result<(), BusError> {
        self.transport.broadcast(name, payload)
    }

    /// Queues `name` for the local peer's handlers on the next dispatch.
    pub fn raise_local(&mut self, name: &str, payload: Vec<u8>) {
        let sender = self.local_peer();
        self.pending.push_back(BusEvent {
            name: name.to_string(),
            sender,
            payload,
            origin: EventOrigin::Local,
        });
    }

    /// Sends or queues everything in `outbox`.
    ///
    /// Broadcast failures are logged and skipped; delivery is best effort.
    pub fn flush(&mut self, outbox: Outbox) {
        for entry in outbox.entries {
            match entry {
                Outbound::Broadcast { name, payload } => {
                    if let Err(err) = self.transport.broadcast(&name, &payload) {
                        warn!(
                            "event=bus_send module=bus status=error event_name={} error={}",
                            name, err
                        );
                    }
                }
                Outbound::Local { name, payload } => self.raise_local(&name, payload),
            }
        }
    }

    /// Pulls incoming transport messages and runs handlers for every
    /// pending event. Returns the number of events handled.
    pub fn dispatch(&mut self, context: &mut C) -> usize {
        for WireMessage {
            sender,
            event,
            payload,
        } in self.transport.drain_incoming()
        {
            self.pending.push_back(BusEvent {
                name: event,
                sender,
                payload,
                origin: EventOrigin::Remote,
            });
        }

        let mut handled = 0;
        while handled < MAX_EVENTS_PER_DISPATCH {
            let Some(event) = self.pending.pop_front() else {
                break;
            };
            handled += 1;

            let mut outbox = Outbox::new();
            match self.handlers.get_mut(&event.name) {
                Some(handlers) => {
                    for handler in handlers.iter_mut() {
                        handler(context, &event, &mut outbox);
                    }
                }
                None => debug!(
                    "event=bus_drop module=bus status=skip event_name={} sender={}",
                    event.name, event.sender
                ),
            }
            self.flush(outbox);
        }

        if !self.pending.is_empty() {
            debug!(
                "event=bus_dispatch module=bus status=deferred remaining={}",
                self.pending.len()
            );
        }
        handled
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::{EventBus, EventOrigin};
    use crate::bus::transport::{LoopbackNetwork, Transport};

    #[derive(Default)]
    struct Seen {
        entries: Vec<String>,
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let network = LoopbackNetwork::new();
        let mut bus: EventBus<Seen, _> = EventBus::new(network.connect());
        bus.register_handler("greet", |seen: &mut Seen, _, _| {
            seen.entries.push("first".to_string())
        });
        bus.register_handler("greet", |seen: &mut Seen, _, _| {
            seen.entries.push("second".to_string())
        });

        bus.raise_local("greet", Vec::new());
        let mut seen = Seen::default();
        assert_eq!(bus.dispatch(&mut seen), 1);
        assert_eq!(seen.entries, vec!["first", "second"]);
    }

    #[test]
    fn handlers_do_not_run_on_callers_stack() {
        let network = LoopbackNetwork::new();
        let mut bus: EventBus<Seen, _> = EventBus::new(network.connect());
        bus.register_handler("greet", |seen: &mut Seen, _, _| {
            seen.entries.push("ran".to_string())
        });

        let mut seen = Seen::default();
        bus.raise_local("greet", Vec::new());
        assert!(seen.entries.is_empty());
        bus.dispatch(&mut seen);
        assert_eq!(seen.entries, vec!["ran"]);
    }

    #[test]
    fn remote_events_reach_handlers_and_replies_are_sent() {
        let network = LoopbackNetwork::new();
        let mut a: EventBus<Seen, _> = EventBus::new(network.connect());
        let mut b: EventBus<Seen, _> = EventBus::new(network.connect());
        b.register_handler("ping", |seen: &mut Seen, event, outbox| {
            assert_eq!(event.origin, EventOrigin::Remote);
            seen.entries.push(String::from_utf8_lossy(&event.payload).into_owned());
            outbox.broadcast("pong", event.payload.clone());
        });
        a.register_handler("pong", |seen: &mut Seen, event, _| {
            seen.entries.push(format!("pong:{}", String::from_utf8_lossy(&event.payload)));
        });

        a.broadcast("ping", b"7").unwrap();
        let mut seen_b = Seen::default();
        let mut seen_a = Seen::default();
        b.dispatch(&mut seen_b);
        a.dispatch(&mut seen_a);

        assert_eq!(seen_b.entries, vec!["7"]);
        assert_eq!(seen_a.entries, vec!["pong:7"]);
    }

    #[test]
    fn unknown_events_are_dropped() {
        let network = LoopbackNetwork::new();
        let mut a: EventBus<Seen, _> = EventBus::new(network.connect());
        let mut b: EventBus<Seen, _> = EventBus::new(network.connect());
        a.broadcast("nobody-listens", b"").unwrap();

        let mut seen = Seen::default();
        assert_eq!(b.dispatch(&mut seen), 1);
        assert!(seen.entries.is_empty());
        assert_eq!(b.transport().local_peer(), b.local_peer());
    }

    #[test]
    fn local_raises_from_handlers_run_in_same_pass() {
        let network = LoopbackNetwork::new();
        let mut bus: EventBus<Seen, _> = EventBus::new(network.connect());
        bus.register_handler("start", |_: &mut Seen, _, outbox| {
            outbox.raise_local("finish", Vec::new());
        });
        bus.register_handler("finish", |seen: &mut Seen, event, _| {
            assert_eq!(event.origin, EventOrigin::Local);
            seen.entries.push("finished".to_string());
        });

        bus.raise_local("start", Vec::new());
        let mut seen = Seen::default();
        assert_eq!(bus.dispatch(&mut seen), 2);
        assert_eq!(seen.entries, vec!["finished"]);
    }
}
