//! Extension package manifest parsing and validation.
//!
//! A package is a `*.extension.json` file naming the extension id, its
//! version and the entry point to instantiate.

use crate::extension::capability::{parse_capability, Capability, CapabilityError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

static EXTENSION_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]+(?:[._-][a-z0-9]+)*$").expect("valid extension id regex")
});
static SEMVER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("valid semver regex"));

/// Declarative extension package manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionManifest {
    /// Stable extension identifier, e.g. `rounds.shields`.
    pub id: String,
    /// Semantic version string (`major.minor.patch`).
    pub version: String,
    /// Name of the entry point inside the loader's catalog.
    pub entry_point: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional capability hints; detection never depends on them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
}

impl ExtensionManifest {
    /// Parses and validates manifest JSON.
    pub fn from_json_str(raw: &str) -> Result<Self, ManifestError> {
        let manifest: Self =
            serde_json::from_str(raw).map_err(|err| ManifestError::Malformed(err.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Validates declaration-level manifest invariants.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.id.trim().is_empty() {
            return Err(ManifestError::EmptyId);
        }
        if !is_valid_extension_id(self.id.trim()) {
            return Err(ManifestError::InvalidId(self.id.clone()));
        }

        if self.version.trim().is_empty() {
            return Err(ManifestError::EmptyVersion);
        }
        if !SEMVER_RE.is_match(self.version.trim()) {
            return Err(ManifestError::InvalidVersion(self.version.clone()));
        }

        if self.entry_point.trim().is_empty() {
            return Err(ManifestError::MissingEntryPoint);
        }

        self.declared_capabilities()?;
        Ok(())
    }

    /// Parses the optional capability hints.
    pub fn declared_capabilities(&self) -> Result<BTreeSet<Capability>, ManifestError> {
        let mut declared = BTreeSet::new();
        for raw in &self.capabilities {
            let capability = parse_capability(raw).map_err(ManifestError::Capability)?;
            if !declared.insert(capability) {
                return Err(ManifestError::DuplicateCapability(
                    capability.as_str().to_string(),
                ));
            }
        }
        Ok(declared)
    }
}

/// Returns whether `value` is a well-formed extension id.
pub fn is_valid_extension_id(value: &str) -> bool {
    EXTENSION_ID_RE.is_match(value)
}

/// Manifest parse and validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestError {
    Malformed(String),
    EmptyId,
    InvalidId(String),
    EmptyVersion,
    InvalidVersion(String),
    MissingEntryPoint,
    Capability(CapabilityError),
    DuplicateCapability(String),
}

impl Display for ManifestError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(message) => write!(f, "manifest is not valid JSON: {message}"),
            Self::EmptyId => write!(f, "manifest id must not be empty"),
            Self::InvalidId(value) => write!(f, "manifest id is invalid: {value}"),
            Self::EmptyVersion => write!(f, "manifest version must not be empty"),
            Self::InvalidVersion(value) => write!(
                f,
                "manifest version is invalid: {value} (expected major.minor.patch)"
            ),
            Self::MissingEntryPoint => write!(f, "manifest entry_point must not be empty"),
            Self::Capability(err) => write!(f, "manifest capability: {err}"),
            Self::DuplicateCapability(value) => {
                write!(f, "manifest capability is duplicated: {value}")
            }
        }
    }
}

impl Error for ManifestError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Capability(err) => Some(err),
            _ => None,
        }
    }
}
