//! Shared content model and the baseline/extended registry.
//!
//! # Responsibility
//! - Define content items contributed by the baseline or by extensions.
//! - Own the process-wide active content pointer.
//!
//! # Invariants
//! - `baseline` is captured once and never mutated afterwards.
//! - Readers only ever observe a complete `ContentSet`.

pub mod item;
pub mod registry;
