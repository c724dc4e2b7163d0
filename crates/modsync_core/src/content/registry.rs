//! Baseline/extended content registry.
//!
//! # Responsibility
//! - Capture the baseline set once per process.
//! - Collect extension contributions until the extended set is published.
//! - Swap the active content pointer between baseline and extended.
//!
//! # Invariants
//! - All mutations happen on the single session dispatch context.
//! - The active pointer always holds a whole `Arc<ContentSet>`; a publish
//!   builds the new set first and swaps it in with one store.
//! - Contributions are append-only and sealed by the first publish.

use crate::content::item::{ContentItem, ContentSet, ContentSetKind};
use log::{debug, info};
use std::collections::{BTreeSet, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, RwLock};

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Registry lifecycle contract violations.
///
/// These are caller bugs: fatal to the call, never to the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    AlreadyCaptured,
    BaselineNotCaptured,
    /// Contributions arrived after the extended set was published.
    AlreadyPublished(String),
    /// The same extension registered its content twice.
    DoublePublish(String),
    DuplicateItem(String),
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyCaptured => write!(f, "baseline content was already captured"),
            Self::BaselineNotCaptured => write!(f, "baseline content has not been captured"),
            Self::AlreadyPublished(id) => write!(
                f,
                "extended content already published; cannot register content for `{id}`"
            ),
            Self::DoublePublish(id) => {
                write!(f, "content for extension `{id}` was already registered")
            }
            Self::DuplicateItem(name) => write!(f, "content item name is duplicated: {name}"),
        }
    }
}

impl Error for RegistryError {}

/// Read-only, cloneable view of the active content pointer.
///
/// Safe to hand to gameplay code on other threads; every read returns a
/// complete set.
#[derive(Debug, Clone)]
pub struct ActiveContentView {
    pointer: Arc<RwLock<Arc<ContentSet>>>,
}

impl ActiveContentView {
    /// Returns the currently authoritative content set.
    pub fn current(&self) -> Arc<ContentSet> {
        let guard = self
            .pointer
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }
}

#[derive(Debug)]
struct Contribution {
    extension_id: String,
    items: Vec<Arc<ContentItem>>,
}

/// Holds baseline and extension content and the active pointer.
#[derive(Debug)]
pub struct ContentRegistry {
    baseline: Arc<ContentSet>,
    baseline_captured: bool,
    contributions: Vec<Contribution>,
    sealed: bool,
    extended: Option<Arc<ContentSet>>,
    published_with: Option<BTreeSet<String>>,
    pointer: Arc<RwLock<Arc<ContentSet>>>,
}

impl Default for ContentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentRegistry {
    pub fn new() -> Self {
        let baseline = Arc::new(ContentSet::empty_baseline());
        Self {
            pointer: Arc::new(RwLock::new(Arc::clone(&baseline))),
            baseline,
            baseline_captured: false,
            contributions: Vec::new(),
            sealed: false,
            extended: None,
            published_with: None,
        }
    }

    /// Snapshots `items` as the baseline set.
    ///
    /// # Errors
    /// - `AlreadyCaptured` on any call after the first successful one.
    /// - `DuplicateItem` when two items share a name.
    pub fn capture_baseline(&mut self, items: Vec<ContentItem>) -> RegistryResult<()> {
        if self.baseline_captured {
            return Err(RegistryError::AlreadyCaptured);
        }
        if let Some(name) = first_duplicate(std::iter::empty(), &items) {
            return Err(RegistryError::DuplicateItem(name));
        }

        let baseline = Arc::new(ContentSet::new(
            ContentSetKind::Baseline,
            items.into_iter().map(Arc::new).collect(),
        ));
        info!(
            "event=baseline_capture module=content status=ok items={}",
            baseline.len()
        );
        self.baseline = Arc::clone(&baseline);
        self.baseline_captured = true;
        self.store(baseline);
        Ok(())
    }

    /// Appends one extension's items to the pending extended set.
    ///
    /// Returns the number of items registered.
    pub fn register_extension_content(
        &mut self,
        extension_id: &str,
        items: Vec<ContentItem>,
    ) -> RegistryResult<usize> {
        if !self.baseline_captured {
            return Err(RegistryError::BaselineNotCaptured);
        }
        if self.sealed {
            return Err(RegistryError::AlreadyPublished(extension_id.to_string()));
        }
        if self
            .contributions
            .iter()
            .any(|entry| entry.extension_id == extension_id)
        {
            return Err(RegistryError::DoublePublish(extension_id.to_string()));
        }

        let existing = self.baseline.iter().map(|item| item.name.as_str()).chain(
            self.contributions
                .iter()
                .flat_map(|entry| entry.items.iter().map(|item| item.name.as_str())),
        );
        if let Some(name) = first_duplicate(existing, &items) {
            return Err(RegistryError::DuplicateItem(name));
        }

        let count = items.len();
        self.contributions.push(Contribution {
            extension_id: extension_id.to_string(),
            items: items.into_iter().map(Arc::new).collect(),
        });
        debug!(
            "event=content_register module=content status=ok extension_id={} items={}",
            extension_id, count
        );
        Ok(count)
    }

    /// Publishes baseline plus the content of `admitted` extensions and
    /// points the active pointer at it.
    ///
    /// Idempotent: returns `Ok(false)` without rebuilding when the same
    /// admitted set is already active.
    pub fn publish_extended(&mut self, admitted: &BTreeSet<String>) -> RegistryResult<bool> {
        if !self.baseline_captured {
            return Err(RegistryError::BaselineNotCaptured);
        }
        self.sealed = true;

        if self.is_extended_active() && self.published_with.as_ref() == Some(admitted) {
            return Ok(false);
        }

        let items = self
            .baseline
            .iter()
            .cloned()
            .chain(
                self.contributions
                    .iter()
                    .filter(|entry| admitted.contains(&entry.extension_id))
                    .flat_map(|entry| entry.items.iter().cloned()),
            )
            .collect::<Vec<_>>();
        let extended = Arc::new(ContentSet::new(ContentSetKind::Extended, items));

        info!(
            "event=content_publish module=content status=ok items={} extensions={}",
            extended.len(),
            admitted.len()
        );
        self.extended = Some(Arc::clone(&extended));
        self.published_with = Some(admitted.clone());
        self.store(extended);
        Ok(true)
    }

    /// Points the active pointer back at the baseline.
    ///
    /// Returns whether the pointer moved.
    pub fn revert(&mut self) -> bool {
        if !self.is_extended_active() {
            return false;
        }
        self.store(Arc::clone(&self.baseline));
        info!("event=content_revert module=content status=ok");
        true
    }

    /// Returns the currently authoritative content set.
    pub fn active_content_set(&self) -> Arc<ContentSet> {
        self.view().current()
    }

    /// Returns a cloneable read handle to the active pointer.
    pub fn view(&self) -> ActiveContentView {
        ActiveContentView {
            pointer: Arc::clone(&self.pointer),
        }
    }

    pub fn is_extended_active(&self) -> bool {
        self.active_content_set().kind() == ContentSetKind::Extended
    }

    pub fn baseline(&self) -> Arc<ContentSet> {
        Arc::clone(&self.baseline)
    }

    pub fn is_baseline_captured(&self) -> bool {
        self.baseline_captured
    }

    /// Last published extended set, if any.
    pub fn extended(&self) -> Option<Arc<ContentSet>> {
        self.extended.clone()
    }

    /// Extension ids with registered content, in registration order.
    pub fn registered_extensions(&self) -> Vec<&str> {
        self.contributions
            .iter()
            .map(|entry| entry.extension_id.as_str())
            .collect()
    }

    fn store(&self, set: Arc<ContentSet>) {
        let mut guard = self
            .pointer
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = set;
    }
}

fn first_duplicate<'a>(
    existing: impl Iterator<Item = &'a str>,
    items: &[ContentItem],
) -> Option<String> {
    let mut taken: HashSet<&str> = existing.collect();
    items
        .iter()
        .find(|item| !taken.insert(item.name.as_str()))
        .map(|item| item.name.clone())
}
