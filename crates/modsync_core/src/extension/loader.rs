//! Pluggable module loading.
//!
//! # Responsibility
//! - Turn one candidate path into a loaded module exposing an entry-point
//!   factory.
//!
//! # Invariants
//! - Loaders never instantiate entry points; `ExtensionHost` does.
//! - A failure only concerns the one candidate being loaded.

use crate::extension::contract::Extension;
use crate::extension::manifest::{ExtensionManifest, ManifestError};
use log::debug;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Constructor for one entry-point type.
pub type EntryPointFactory =
    Arc<dyn Fn() -> Result<Box<dyn Extension>, String> + Send + Sync>;

/// Module parsed by a loader, ready for instantiation.
#[derive(Clone)]
pub struct LoadedModule {
    pub path: PathBuf,
    pub manifest: ExtensionManifest,
    pub factory: EntryPointFactory,
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule")
            .field("path", &self.path)
            .field("manifest", &self.manifest)
            .finish_non_exhaustive()
    }
}

/// Load failures for one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// The candidate could not be read.
    Io { path: PathBuf, message: String },
    /// The candidate could not be parsed.
    Malformed { path: PathBuf, message: String },
    /// Parsed, but violates manifest rules.
    InvalidManifest { path: PathBuf, error: ManifestError },
    /// No entry point satisfies the extension contract.
    NoEntryPoint { path: PathBuf, entry_point: String },
}

impl LoadError {
    pub fn path(&self) -> &Path {
        match self {
            Self::Io { path, .. }
            | Self::Malformed { path, .. }
            | Self::InvalidManifest { path, .. }
            | Self::NoEntryPoint { path, .. } => path,
        }
    }

    /// Stable code used in log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io { .. } => "load_io",
            Self::Malformed { .. } => "load_malformed",
            Self::InvalidManifest { .. } => "load_invalid_manifest",
            Self::NoEntryPoint { .. } => "load_no_entry_point",
        }
    }
}

impl Display for LoadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, message } => {
                write!(f, "cannot read `{}`: {message}", path.display())
            }
            Self::Malformed { path, message } => {
                write!(f, "malformed extension `{}`: {message}", path.display())
            }
            Self::InvalidManifest { path, error } => {
                write!(f, "invalid manifest `{}`: {error}", path.display())
            }
            Self::NoEntryPoint { path, entry_point } => write!(
                f,
                "extension `{}` has no entry point `{entry_point}`",
                path.display()
            ),
        }
    }
}

impl Error for LoadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidManifest { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Mechanism that turns a candidate path into a `LoadedModule`.
pub trait ModuleLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<LoadedModule, LoadError>;
}

/// Entry-point factories known to the process, keyed by name.
#[derive(Clone, Default)]
pub struct EntryPointCatalog {
    factories: BTreeMap<String, EntryPointFactory>,
}

impl EntryPointCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fallible constructor under `name`, replacing any
    /// previous one.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn() -> Result<Box<dyn Extension>, String> + Send + Sync + 'static,
    ) -> &mut Self {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    /// Registers an infallible constructor for `E`.
    pub fn register_type<E, F>(&mut self, name: impl Into<String>, build: F) -> &mut Self
    where
        E: Extension + 'static,
        F: Fn() -> E + Send + Sync + 'static,
    {
        self.register(name, move || Ok(Box::new(build()) as Box<dyn Extension>))
    }

    pub fn get(&self, name: &str) -> Option<EntryPointFactory> {
        self.factories.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

/// Loads `*.extension.json` manifests and resolves entry points from a
/// catalog.
#[derive(Clone, Default)]
pub struct ManifestLoader {
    catalog: EntryPointCatalog,
}

impl ManifestLoader {
    pub fn new(catalog: EntryPointCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &EntryPointCatalog {
        &self.catalog
    }
}

impl ModuleLoader for ManifestLoader {
    fn load(&self, path: &Path) -> Result<LoadedModule, LoadError> {
        let raw = std::fs::read_to_string(path).map_err(|err| LoadError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;

        let manifest = ExtensionManifest::from_json_str(&raw).map_err(|error| match error {
            ManifestError::Malformed(message) => LoadError::Malformed {
                path: path.to_path_buf(),
                message,
            },
            error => LoadError::InvalidManifest {
                path: path.to_path_buf(),
                error,
            },
        })?;

        let factory =
            self.catalog
                .get(manifest.entry_point.trim())
                .ok_or_else(|| LoadError::NoEntryPoint {
                    path: path.to_path_buf(),
                    entry_point: manifest.entry_point.clone(),
                })?;

        debug!(
            "event=module_load module=extension status=ok path={} extension_id={} entry_point={}",
            path.display(),
            manifest.id,
            manifest.entry_point
        );
        Ok(LoadedModule {
            path: path.to_path_buf(),
            manifest,
            factory,
        })
    }
}
