//! Optional extension capabilities and the cached capability set.

use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Optional contract an extension entry point may implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    /// Renders an options panel (`UiPanel`).
    HasUi,
    /// Takes part in session lifecycle and handshakes (`NetworkedExtension`).
    IsNetworked,
}

impl Capability {
    /// Stable string id used in logs and CLI output.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HasUi => CAPABILITY_UI,
            Self::IsNetworked => CAPABILITY_NETWORKED,
        }
    }

    /// User-facing short description.
    pub fn description(self) -> &'static str {
        match self {
            Self::HasUi => "Provides an options panel rendered in the extension menu.",
            Self::IsNetworked => "Receives session join/leave and handshake completion callbacks.",
        }
    }
}

pub const CAPABILITY_UI: &str = "ui";
pub const CAPABILITY_NETWORKED: &str = "networked";

/// Parses one capability from its string id.
pub fn parse_capability(value: &str) -> Result<Capability, CapabilityError> {
    let normalized = value.trim();
    if normalized.is_empty() {
        return Err(CapabilityError::EmptyCapability);
    }

    match normalized {
        CAPABILITY_UI => Ok(Capability::HasUi),
        CAPABILITY_NETWORKED => Ok(Capability::IsNetworked),
        other => Err(CapabilityError::UnsupportedCapability(other.to_string())),
    }
}

/// Capability parse errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    EmptyCapability,
    UnsupportedCapability(String),
}

impl Display for CapabilityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyCapability => write!(f, "capability value must not be empty"),
            Self::UnsupportedCapability(value) => {
                write!(f, "capability is unsupported: {value}")
            }
        }
    }
}

impl Error for CapabilityError {}

/// Capabilities detected once at load time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    entries: BTreeSet<Capability>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, capability: Capability) {
        self.entries.insert(capability);
    }

    pub fn implements(&self, capability: Capability) -> bool {
        self.entries.contains(&capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.entries.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Comma-separated ids, `none` when empty.
    pub fn to_label(&self) -> String {
        if self.entries.is_empty() {
            return "none".to_string();
        }
        self.iter()
            .map(Capability::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_capability, Capability, CapabilityError, CapabilitySet};

    #[test]
    fn parses_supported_capabilities() {
        assert_eq!(parse_capability("ui").unwrap(), Capability::HasUi);
        assert_eq!(
            parse_capability(" networked ").unwrap(),
            Capability::IsNetworked
        );
    }

    #[test]
    fn rejects_empty_and_unknown_capabilities() {
        assert_eq!(
            parse_capability("  ").unwrap_err(),
            CapabilityError::EmptyCapability
        );
        assert_eq!(
            parse_capability("Networked").unwrap_err(),
            CapabilityError::UnsupportedCapability("Networked".to_string())
        );
    }

    #[test]
    fn set_answers_implements_queries() {
        let set: CapabilitySet = [Capability::IsNetworked].into_iter().collect();
        assert!(set.implements(Capability::IsNetworked));
        assert!(!set.implements(Capability::HasUi));
        assert_eq!(set.to_label(), "networked");
        assert_eq!(CapabilitySet::new().to_label(), "none");
    }

    #[test]
    fn exposes_user_facing_descriptions() {
        assert!(Capability::HasUi.description().contains("panel"));
        assert!(Capability::IsNetworked.description().contains("handshake"));
    }
}
