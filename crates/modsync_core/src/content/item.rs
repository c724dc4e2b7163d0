//! Content item and content set model.
//!
//! # Invariants
//! - Item names are unique within one `ContentSet`.
//! - A `ContentSet` is immutable once built; swaps replace the whole set.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Who contributed one content item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "extension_id")]
pub enum ContentOrigin {
    /// Present without any extension loaded.
    Baseline,
    /// Contributed by the extension with this id.
    Extension(String),
}

/// Opaque unit of shared content.
///
/// The core never interprets `data`; gameplay code outside this crate does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Stable name, unique within a content set.
    pub name: String,
    pub origin: ContentOrigin,
    /// Free-form payload owned by the consumer.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl ContentItem {
    /// Creates a baseline item with an empty payload.
    pub fn baseline(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            origin: ContentOrigin::Baseline,
            data: serde_json::Value::Null,
        }
    }

    /// Creates an item owned by `extension_id`.
    pub fn from_extension(
        extension_id: impl Into<String>,
        name: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            origin: ContentOrigin::Extension(extension_id.into()),
            data,
        }
    }

    /// Returns the contributing extension id, if any.
    pub fn extension_id(&self) -> Option<&str> {
        match &self.origin {
            ContentOrigin::Baseline => None,
            ContentOrigin::Extension(id) => Some(id.as_str()),
        }
    }
}

/// Which of the two sets a `ContentSet` snapshot represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentSetKind {
    Baseline,
    Extended,
}

impl ContentSetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Extended => "extended",
        }
    }
}

/// Ordered, immutable sequence of shared content items.
#[derive(Debug, Clone)]
pub struct ContentSet {
    kind: ContentSetKind,
    items: Vec<Arc<ContentItem>>,
}

impl ContentSet {
    pub(crate) fn new(kind: ContentSetKind, items: Vec<Arc<ContentItem>>) -> Self {
        Self { kind, items }
    }

    /// Empty baseline used before capture.
    pub(crate) fn empty_baseline() -> Self {
        Self::new(ContentSetKind::Baseline, Vec::new())
    }

    pub fn kind(&self) -> ContentSetKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ContentItem>> {
        self.items.iter()
    }

    pub fn items(&self) -> &[Arc<ContentItem>] {
        &self.items
    }

    /// Item names in set order.
    pub fn names(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ContentItem>> {
        self.items.iter().find(|item| item.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}
