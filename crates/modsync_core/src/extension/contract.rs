//! Contract a loaded module's entry point must satisfy.
//!
//! # Invariants
//! - `initialize` is called exactly once per entry-point instance.
//! - Capability probes (`ui_panel`, `networked`) are answered from the
//!   instance itself; nothing has to be declared up front.
//! - Lifecycle callbacks run on the session dispatch context and must not
//!   block indefinitely. This is a caller obligation; nothing enforces it.

use crate::content::item::ContentItem;
use crate::extension::capability::{Capability, CapabilitySet};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Failure reported by an extension's own code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionFailure(pub String);

impl ExtensionFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl Display for ExtensionFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for ExtensionFailure {}

/// Content items an extension hands over during `initialize`.
///
/// Items are owned here until the host registers them on the session
/// context.
#[derive(Debug, Default)]
pub struct ContentContributions {
    entries: Vec<(String, serde_json::Value)>,
}

impl ContentContributions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one shared item under a stable `name`.
    pub fn add(&mut self, name: impl Into<String>, data: serde_json::Value) -> &mut Self {
        self.entries.push((name.into(), data));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stamps every item with its owning extension id.
    pub fn into_items(self, extension_id: &str) -> Vec<ContentItem> {
        self.entries
            .into_iter()
            .map(|(name, data)| ContentItem::from_extension(extension_id, name, data))
            .collect()
    }
}

/// Required entry point of every extension.
pub trait Extension: Send {
    /// Registers content and returns the extension id.
    fn initialize(
        &mut self,
        contributions: &mut ContentContributions,
    ) -> Result<String, ExtensionFailure>;

    /// Optional options-panel contract.
    fn ui_panel(&mut self) -> Option<&mut dyn UiPanel> {
        None
    }

    /// Optional session/networking contract.
    fn networked(&mut self) -> Option<&mut dyn NetworkedExtension> {
        None
    }
}

/// Options panel drawn inside the extension menu.
pub trait UiPanel {
    fn render_frame(&mut self);
}

/// Session lifecycle callbacks.
pub trait NetworkedExtension {
    fn on_session_joined(&mut self);
    fn on_session_left(&mut self);
    fn on_handshake_completed(&mut self);
}

/// Probes `extension` for every optional contract.
pub fn detect_capabilities(extension: &mut dyn Extension) -> CapabilitySet {
    let mut capabilities = CapabilitySet::new();
    if extension.ui_panel().is_some() {
        capabilities.insert(Capability::HasUi);
    }
    if extension.networked().is_some() {
        capabilities.insert(Capability::IsNetworked);
    }
    capabilities
}

#[cfg(test)]
mod tests {
    use super::{
        detect_capabilities, ContentContributions, Extension, ExtensionFailure,
        NetworkedExtension,
    };
    use crate::extension::capability::Capability;
    use serde_json::json;

    struct Plain;

    impl Extension for Plain {
        fn initialize(
            &mut self,
            contributions: &mut ContentContributions,
        ) -> Result<String, ExtensionFailure> {
            contributions.add("bulwark", json!({"health": 2}));
            Ok("plain".to_string())
        }
    }

    struct Chatty {
        joined: u32,
    }

    impl NetworkedExtension for Chatty {
        fn on_session_joined(&mut self) {
            self.joined += 1;
        }

        fn on_session_left(&mut self) {}

        fn on_handshake_completed(&mut self) {}
    }

    impl Extension for Chatty {
        fn initialize(
            &mut self,
            _contributions: &mut ContentContributions,
        ) -> Result<String, ExtensionFailure> {
            Ok("chatty".to_string())
        }

        fn networked(&mut self) -> Option<&mut dyn NetworkedExtension> {
            Some(self)
        }
    }

    #[test]
    fn detects_only_implemented_contracts() {
        assert!(detect_capabilities(&mut Plain).is_empty());

        let capabilities = detect_capabilities(&mut Chatty { joined: 0 });
        assert!(capabilities.implements(Capability::IsNetworked));
        assert!(!capabilities.implements(Capability::HasUi));
    }

    #[test]
    fn contributions_are_stamped_with_extension_id() {
        let mut contributions = ContentContributions::new();
        let id = Plain.initialize(&mut contributions).unwrap();
        let items = contributions.into_items(&id);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "bulwark");
        assert_eq!(items[0].extension_id(), Some("plain"));
    }
}
