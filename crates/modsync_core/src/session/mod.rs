//! Session content handshake.
//!
//! `handshake` defines the wire format and per-pair phases;
//! `coordinator` drives the state machine and content reconciliation.

pub mod coordinator;
pub mod handshake;
