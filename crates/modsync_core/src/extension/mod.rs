//! Extension host.
//!
//! Discovers extension packages, instantiates exactly one entry point per
//! extension, probes optional capabilities and keeps the loaded set for the
//! session context. The loading mechanism itself is pluggable
//! (`ModuleLoader`).

pub mod capability;
pub mod contract;
pub mod host;
pub mod loader;
pub mod manifest;
pub mod panel;
