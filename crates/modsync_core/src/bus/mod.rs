//! Named-event bus between session peers.
//!
//! # Responsibility
//! - Route named events from the external transport (and local raises) to
//!   registered handlers.
//! - Queue outbound broadcasts produced by handlers.
//!
//! # Invariants
//! - Handlers run on the bus's dispatch pass, never on the caller's stack.
//! - Per `(sender, event name)` delivery order is preserved.

pub mod event_bus;
pub mod transport;
