//! Extension options menu state.
//!
//! Framework-agnostic: the host UI draws whatever `PanelMenu::frame`
//! returns and forwards clicks back as `open`/`back`/`toggle` calls.

use crate::extension::capability::Capability;
use crate::extension::host::ExtensionTable;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// One selectable row in the menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelEntry {
    pub extension_id: String,
    pub label: String,
}

/// What the host UI should draw this frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelFrame {
    Hidden,
    Menu(Vec<PanelEntry>),
    /// The extension's own panel was rendered below a back button.
    Extension { extension_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelError {
    UnknownExtension(String),
    NoPanel(String),
}

impl Display for PanelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownExtension(id) => write!(f, "extension is not loaded: {id}"),
            Self::NoPanel(id) => write!(f, "extension has no options panel: {id}"),
        }
    }
}

impl Error for PanelError {}

/// Visibility and selection of the options menu.
#[derive(Debug, Clone, Default)]
pub struct PanelMenu {
    visible: bool,
    open: Option<String>,
}

impl PanelMenu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shows or hides the menu. Returns the new visibility.
    pub fn toggle(&mut self) -> bool {
        self.visible = !self.visible;
        self.visible
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Gameplay input is suspended while the menu is shown.
    pub fn locks_input(&self) -> bool {
        self.visible
    }

    pub fn open_extension(&self) -> Option<&str> {
        self.open.as_deref()
    }

    /// Rows for every extension implementing `HasUi`, in load order.
    pub fn entries(&self, extensions: &ExtensionTable) -> Vec<PanelEntry> {
        extensions
            .descriptors()
            .filter(|descriptor| descriptor.implements(Capability::HasUi))
            .map(|descriptor| PanelEntry {
                extension_id: descriptor.id.clone(),
                label: format!("{} Options", descriptor.id),
            })
            .collect()
    }

    /// Selects one extension's panel.
    pub fn open(&mut self, extension_id: &str, extensions: &ExtensionTable) -> Result<(), PanelError> {
        let descriptor = extensions
            .get(extension_id)
            .map(|entry| &entry.descriptor)
            .ok_or_else(|| PanelError::UnknownExtension(extension_id.to_string()))?;
        if !descriptor.implements(Capability::HasUi) {
            return Err(PanelError::NoPanel(extension_id.to_string()));
        }
        self.open = Some(extension_id.to_string());
        Ok(())
    }

    /// Returns from an extension panel to the menu.
    pub fn back(&mut self) {
        self.open = None;
    }

    /// Produces this frame, rendering the open extension panel if any.
    pub fn frame(&mut self, extensions: &mut ExtensionTable) -> PanelFrame {
        if !self.visible {
            return PanelFrame::Hidden;
        }
        if let Some(extension_id) = self.open.clone() {
            if extensions.render_panel(&extension_id) {
                return PanelFrame::Extension { extension_id };
            }
            self.open = None;
        }
        PanelFrame::Menu(self.entries(extensions))
    }
}
