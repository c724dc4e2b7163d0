//! Extension discovery, instantiation and capability binding.
//!
//! # Responsibility
//! - Enumerate candidate packages in a directory.
//! - Load, instantiate and initialize each candidate in isolation.
//! - Detect optional capabilities once and cache them in the descriptor.
//! - Hand results back to the session context (directly or from a worker
//!   thread).
//!
//! # Invariants
//! - A failing candidate never prevents loading the remaining ones.
//! - Exactly one entry-point instance exists per loaded extension.
//! - Extension ids are unique across one load pass.
//! - Panics raised by extension code are contained and reported.

use crate::content::item::ContentItem;
use crate::extension::capability::{Capability, CapabilitySet};
use crate::extension::contract::{detect_capabilities, ContentContributions, Extension};
use crate::extension::loader::{LoadError, LoadedModule, ModuleLoader};
use crate::extension::manifest::is_valid_extension_id;
use log::{error, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

/// File name suffix of an extension package.
pub const PACKAGE_SUFFIX: &str = ".extension.json";

static CANDIDATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^.][^/\\]*\.extension\.json$").expect("valid candidate file regex")
});

/// Candidate enumeration failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    /// The directory itself could not be listed.
    Unreadable { path: PathBuf, message: String },
    /// One directory entry could not be inspected.
    BadEntry { path: PathBuf, message: String },
}

impl Display for DiscoveryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unreadable { path, message } => {
                write!(f, "cannot list `{}`: {message}", path.display())
            }
            Self::BadEntry { path, message } => {
                write!(f, "cannot inspect entry in `{}`: {message}", path.display())
            }
        }
    }
}

impl Error for DiscoveryError {}

/// Entry-point construction or initialization failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstantiationError {
    ConstructorFailed { entry_point: String, message: String },
    ConstructorPanicked { entry_point: String },
    InitializeFailed { entry_point: String, message: String },
    InitializePanicked { entry_point: String },
    InvalidId { entry_point: String, id: String },
    /// `initialize` reported a different id than the manifest declares.
    IdMismatch { declared: String, reported: String },
}

impl Display for InstantiationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConstructorFailed {
                entry_point,
                message,
            } => write!(f, "entry point `{entry_point}` failed to construct: {message}"),
            Self::ConstructorPanicked { entry_point } => {
                write!(f, "entry point `{entry_point}` panicked during construction")
            }
            Self::InitializeFailed {
                entry_point,
                message,
            } => write!(f, "entry point `{entry_point}` failed to initialize: {message}"),
            Self::InitializePanicked { entry_point } => {
                write!(f, "entry point `{entry_point}` panicked during initialize")
            }
            Self::InvalidId { entry_point, id } => {
                write!(f, "entry point `{entry_point}` reported invalid id `{id}`")
            }
            Self::IdMismatch { declared, reported } => write!(
                f,
                "extension id mismatch: manifest declares `{declared}`, entry point reports `{reported}`"
            ),
        }
    }
}

impl Error for InstantiationError {}

/// Any per-candidate failure during a load pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    Discovery(DiscoveryError),
    Load(LoadError),
    Instantiation(InstantiationError),
    DuplicateExtensionId(String),
    /// The background load worker died before reporting.
    WorkerLost,
}

impl HostError {
    /// Stable code used in log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Discovery(_) => "discovery_failed",
            Self::Load(err) => err.code(),
            Self::Instantiation(_) => "instantiation_failed",
            Self::DuplicateExtensionId(_) => "duplicate_extension_id",
            Self::WorkerLost => "worker_lost",
        }
    }
}

impl Display for HostError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discovery(err) => write!(f, "{err}"),
            Self::Load(err) => write!(f, "{err}"),
            Self::Instantiation(err) => write!(f, "{err}"),
            Self::DuplicateExtensionId(id) => write!(f, "extension id already loaded: {id}"),
            Self::WorkerLost => write!(f, "extension load worker exited without a report"),
        }
    }
}

impl Error for HostError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Discovery(err) => Some(err),
            Self::Load(err) => Some(err),
            Self::Instantiation(err) => Some(err),
            Self::DuplicateExtensionId(_) | Self::WorkerLost => None,
        }
    }
}

impl From<DiscoveryError> for HostError {
    fn from(value: DiscoveryError) -> Self {
        Self::Discovery(value)
    }
}

impl From<LoadError> for HostError {
    fn from(value: LoadError) -> Self {
        Self::Load(value)
    }
}

impl From<InstantiationError> for HostError {
    fn from(value: InstantiationError) -> Self {
        Self::Instantiation(value)
    }
}

/// Restartable enumeration of candidate packages in one directory.
///
/// Each `iter()` call lists the directory again. Candidates are yielded in
/// file-name order so every peer loads in the same order.
#[derive(Debug, Clone)]
pub struct Discovery {
    directory: PathBuf,
}

impl Discovery {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn iter(&self) -> DiscoveryIter {
        DiscoveryIter {
            directory: self.directory.clone(),
            entries: None,
        }
    }
}

impl<'a> IntoIterator for &'a Discovery {
    type Item = Result<PathBuf, DiscoveryError>;
    type IntoIter = DiscoveryIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy iterator; the directory is listed on the first `next()`.
#[derive(Debug)]
pub struct DiscoveryIter {
    directory: PathBuf,
    entries: Option<std::vec::IntoIter<Result<PathBuf, DiscoveryError>>>,
}

impl Iterator for DiscoveryIter {
    type Item = Result<PathBuf, DiscoveryError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.entries.is_none() {
            self.entries = Some(list_candidates(&self.directory).into_iter());
        }
        self.entries.as_mut().and_then(Iterator::next)
    }
}

/// Returns whether `file_name` looks like an extension package.
pub fn is_candidate_file_name(file_name: &str) -> bool {
    CANDIDATE_RE.is_match(file_name)
}

fn list_candidates(directory: &Path) -> Vec<Result<PathBuf, DiscoveryError>> {
    let read_dir = match std::fs::read_dir(directory) {
        Ok(read_dir) => read_dir,
        Err(err) => {
            return vec![Err(DiscoveryError::Unreadable {
                path: directory.to_path_buf(),
                message: err.to_string(),
            })]
        }
    };

    let mut candidates = Vec::new();
    let mut failures = Vec::new();
    for entry in read_dir {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                failures.push(Err(DiscoveryError::BadEntry {
                    path: directory.to_path_buf(),
                    message: err.to_string(),
                }));
                continue;
            }
        };
        let path = entry.path();
        if path.is_dir() {
            continue;
        }
        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(is_candidate_file_name)
            .unwrap_or(false);
        if matches {
            candidates.push(path);
        }
    }

    candidates.sort();
    candidates.into_iter().map(Ok).chain(failures).collect()
}

/// Immutable identity and capability record of one loaded extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionDescriptor {
    pub id: String,
    pub version: String,
    pub source: PathBuf,
    pub capabilities: CapabilitySet,
}

impl ExtensionDescriptor {
    pub fn implements(&self, capability: Capability) -> bool {
        self.capabilities.implements(capability)
    }
}

/// Constructed and initialized entry point, before capability probing.
pub struct EntryPointHandle {
    pub extension_id: String,
    pub instance: Box<dyn Extension>,
    pub contributions: ContentContributions,
}

/// Extension ready to install into a session context.
pub struct LoadedExtension {
    pub descriptor: ExtensionDescriptor,
    instance: Box<dyn Extension>,
    content: Vec<ContentItem>,
}

impl LoadedExtension {
    /// Assembles an already-initialized extension, for hosts that load
    /// modules outside `ExtensionHost`.
    pub fn new(
        descriptor: ExtensionDescriptor,
        instance: Box<dyn Extension>,
        content: Vec<ContentItem>,
    ) -> Self {
        Self {
            descriptor,
            instance,
            content,
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    /// Capability check against the descriptor resolved at load time.
    pub fn implements(&self, capability: Capability) -> bool {
        self.descriptor.implements(capability)
    }

    /// Content contributed during `initialize`, until taken.
    pub fn content(&self) -> &[ContentItem] {
        &self.content
    }

    /// Moves contributed content out for registration.
    pub fn take_content(&mut self) -> Vec<ContentItem> {
        std::mem::take(&mut self.content)
    }

    pub fn instance_mut(&mut self) -> &mut dyn Extension {
        self.instance.as_mut()
    }
}

/// Per-candidate failure record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    pub path: Option<PathBuf>,
    pub error: HostError,
}

/// Outcome of one load pass.
#[derive(Default)]
pub struct LoadReport {
    pub loaded: Vec<LoadedExtension>,
    pub failures: Vec<LoadFailure>,
}

impl LoadReport {
    pub fn loaded_ids(&self) -> Vec<&str> {
        self.loaded.iter().map(LoadedExtension::id).collect()
    }
}

/// Result of polling a background load.
pub enum LoadPoll {
    Pending,
    Ready(LoadReport),
    Lost,
}

/// Handle to a load pass running on a worker thread.
pub struct PendingLoad {
    receiver: Receiver<LoadReport>,
    worker: Option<JoinHandle<()>>,
}

impl PendingLoad {
    /// Non-blocking check for the worker's report.
    pub fn poll(&mut self) -> LoadPoll {
        match self.receiver.try_recv() {
            Ok(report) => {
                self.join_worker();
                LoadPoll::Ready(report)
            }
            Err(TryRecvError::Empty) => LoadPoll::Pending,
            Err(TryRecvError::Disconnected) => {
                self.join_worker();
                LoadPoll::Lost
            }
        }
    }

    /// Blocks until the worker reports.
    pub fn wait(mut self) -> Result<LoadReport, HostError> {
        let report = self.receiver.recv().map_err(|_| HostError::WorkerLost);
        self.join_worker();
        report
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("event=extension_load module=extension status=error error_code=worker_panicked");
            }
        }
    }
}

/// Loads extensions through a pluggable `ModuleLoader`.
#[derive(Clone)]
pub struct ExtensionHost {
    loader: Arc<dyn ModuleLoader>,
}

impl ExtensionHost {
    pub fn new(loader: Arc<dyn ModuleLoader>) -> Self {
        Self { loader }
    }

    /// Enumerates candidate packages in `directory`.
    pub fn discover(&self, directory: impl Into<PathBuf>) -> Discovery {
        Discovery::new(directory)
    }

    /// Parses one candidate.
    pub fn load(&self, path: &Path) -> Result<LoadedModule, LoadError> {
        self.loader.load(path)
    }

    /// Constructs and initializes the module's single entry point.
    pub fn instantiate(&self, module: &LoadedModule) -> Result<EntryPointHandle, InstantiationError> {
        let entry_point = module.manifest.entry_point.clone();

        let constructed = catch_unwind(AssertUnwindSafe(|| (module.factory)()));
        let mut instance = match constructed {
            Ok(Ok(instance)) => instance,
            Ok(Err(message)) => {
                return Err(InstantiationError::ConstructorFailed {
                    entry_point,
                    message,
                })
            }
            Err(_) => return Err(InstantiationError::ConstructorPanicked { entry_point }),
        };

        let mut contributions = ContentContributions::new();
        let initialized =
            catch_unwind(AssertUnwindSafe(|| instance.initialize(&mut contributions)));
        let extension_id = match initialized {
            Ok(Ok(id)) => id.trim().to_string(),
            Ok(Err(err)) => {
                return Err(InstantiationError::InitializeFailed {
                    entry_point,
                    message: err.to_string(),
                })
            }
            Err(_) => return Err(InstantiationError::InitializePanicked { entry_point }),
        };

        if !is_valid_extension_id(&extension_id) {
            return Err(InstantiationError::InvalidId {
                entry_point,
                id: extension_id,
            });
        }
        if extension_id != module.manifest.id.trim() {
            return Err(InstantiationError::IdMismatch {
                declared: module.manifest.id.clone(),
                reported: extension_id,
            });
        }

        Ok(EntryPointHandle {
            extension_id,
            instance,
            contributions,
        })
    }

    /// Probes an instantiated entry point for optional contracts.
    pub fn detect_capabilities(&self, handle: &mut EntryPointHandle) -> CapabilitySet {
        detect_capabilities(handle.instance.as_mut())
    }

    /// Runs load, instantiate and capability detection for one candidate.
    pub fn load_one(&self, path: &Path) -> Result<LoadedExtension, HostError> {
        let module = self.load(path)?;
        let mut handle = self.instantiate(&module)?;
        let capabilities = self.detect_capabilities(&mut handle);

        if let Ok(declared) = module.manifest.declared_capabilities() {
            if !declared.is_empty() && declared.iter().copied().ne(capabilities.iter()) {
                warn!(
                    "event=capability_detect module=extension status=mismatch extension_id={} declared={:?} detected={}",
                    handle.extension_id,
                    declared,
                    capabilities.to_label()
                );
            }
        }

        let EntryPointHandle {
            extension_id,
            instance,
            contributions,
        } = handle;
        let content = contributions.into_items(&extension_id);
        Ok(LoadedExtension {
            descriptor: ExtensionDescriptor {
                id: extension_id,
                version: module.manifest.version.clone(),
                source: module.path.clone(),
                capabilities,
            },
            instance,
            content,
        })
    }

    /// Loads every candidate, isolating failures per candidate.
    pub fn load_all<I>(&self, candidates: I) -> LoadReport
    where
        I: IntoIterator<Item = Result<PathBuf, DiscoveryError>>,
    {
        let started_at = Instant::now();
        let mut report = LoadReport::default();

        for candidate in candidates {
            let path = match candidate {
                Ok(path) => path,
                Err(err) => {
                    warn!(
                        "event=extension_discover module=extension status=error error={}",
                        err
                    );
                    report.failures.push(LoadFailure {
                        path: None,
                        error: err.into(),
                    });
                    continue;
                }
            };

            let outcome = self.load_one(&path).and_then(|loaded| {
                if report.loaded.iter().any(|other| other.id() == loaded.id()) {
                    Err(HostError::DuplicateExtensionId(loaded.id().to_string()))
                } else {
                    Ok(loaded)
                }
            });
            match outcome {
                Ok(loaded) => {
                    info!(
                        "event=extension_load module=extension status=ok extension_id={} version={} capabilities={} items={}",
                        loaded.id(),
                        loaded.descriptor.version,
                        loaded.descriptor.capabilities.to_label(),
                        loaded.content().len()
                    );
                    report.loaded.push(loaded);
                }
                Err(err) => {
                    warn!(
                        "event=extension_load module=extension status=error path={} error_code={} error={}",
                        path.display(),
                        err.code(),
                        err
                    );
                    report.failures.push(LoadFailure {
                        path: Some(path),
                        error: err,
                    });
                }
            }
        }

        info!(
            "event=extension_load_pass module=extension status=ok loaded={} failed={} duration_ms={}",
            report.loaded.len(),
            report.failures.len(),
            started_at.elapsed().as_millis()
        );
        report
    }

    /// Convenience over `load_all` for externally enumerated paths.
    pub fn load_paths<I, P>(&self, paths: I) -> LoadReport
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.load_all(paths.into_iter().map(|path| Ok(path.into())))
    }

    /// Discovers and loads `directory` on a worker thread.
    ///
    /// The report must be installed from the session context; nothing is
    /// registered from the worker.
    pub fn spawn_load(&self, directory: impl Into<PathBuf>) -> PendingLoad {
        let host = self.clone();
        let discovery = self.discover(directory);
        let (sender, receiver) = mpsc::channel();
        let worker = std::thread::Builder::new()
            .name("modsync-extension-load".to_string())
            .spawn(move || {
                let report = host.load_all(&discovery);
                let _ = sender.send(report);
            });

        let worker = match worker {
            Ok(worker) => Some(worker),
            Err(err) => {
                error!(
                    "event=extension_load module=extension status=error error_code=worker_spawn_failed error={}",
                    err
                );
                None
            }
        };
        PendingLoad { receiver, worker }
    }
}

/// Installed extensions in load order.
#[derive(Default)]
pub struct ExtensionTable {
    entries: Vec<LoadedExtension>,
}

impl ExtensionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, extension: LoadedExtension) -> Result<(), HostError> {
        if self.contains(extension.id()) {
            return Err(HostError::DuplicateExtensionId(extension.id().to_string()));
        }
        self.entries.push(extension);
        Ok(())
    }

    pub fn contains(&self, extension_id: &str) -> bool {
        self.get(extension_id).is_some()
    }

    pub fn get(&self, extension_id: &str) -> Option<&LoadedExtension> {
        self.entries.iter().find(|entry| entry.id() == extension_id)
    }

    pub fn get_mut(&mut self, extension_id: &str) -> Option<&mut LoadedExtension> {
        self.entries
            .iter_mut()
            .find(|entry| entry.id() == extension_id)
    }

    /// Extension ids in load order.
    pub fn ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|entry| entry.id().to_string())
            .collect()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ExtensionDescriptor> {
        self.entries.iter().map(|entry| &entry.descriptor)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn networked_entries(&mut self) -> impl Iterator<Item = &mut LoadedExtension> {
        self.entries
            .iter_mut()
            .filter(|entry| entry.implements(Capability::IsNetworked))
    }

    /// Fires `on_session_joined` on every networked extension.
    pub fn notify_session_joined(&mut self) {
        for entry in self.networked_entries() {
            let id = entry.descriptor.id.clone();
            if let Some(networked) = entry.instance.networked() {
                guard_callback(&id, "on_session_joined", || networked.on_session_joined());
            }
        }
    }

    /// Fires `on_session_left` on every networked extension.
    pub fn notify_session_left(&mut self) {
        for entry in self.networked_entries() {
            let id = entry.descriptor.id.clone();
            if let Some(networked) = entry.instance.networked() {
                guard_callback(&id, "on_session_left", || networked.on_session_left());
            }
        }
    }

    /// Fires `on_handshake_completed` on one networked extension.
    pub fn notify_handshake_completed(&mut self, extension_id: &str) {
        let Some(entry) = self.get_mut(extension_id) else {
            return;
        };
        if !entry.implements(Capability::IsNetworked) {
            return;
        }
        if let Some(networked) = entry.instance.networked() {
            guard_callback(extension_id, "on_handshake_completed", || {
                networked.on_handshake_completed()
            });
        }
    }

    /// Draws one extension's panel. Returns `false` when it has none.
    pub fn render_panel(&mut self, extension_id: &str) -> bool {
        let Some(entry) = self.get_mut(extension_id) else {
            return false;
        };
        if !entry.implements(Capability::HasUi) {
            return false;
        }
        match entry.instance.ui_panel() {
            Some(panel) => {
                guard_callback(extension_id, "render_frame", || panel.render_frame());
                true
            }
            None => false,
        }
    }
}

fn guard_callback(extension_id: &str, hook: &str, callback: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
        error!(
            "event=extension_callback module=extension status=error extension_id={} hook={} error_code=callback_panicked",
            extension_id, hook
        );
    }
}

#[cfg(test)]
mod tests {
    use super::{is_candidate_file_name, Discovery, DiscoveryError};
    use std::fs;

    #[test]
    fn candidate_names_require_package_suffix() {
        assert!(is_candidate_file_name("shields.extension.json"));
        assert!(!is_candidate_file_name("shields.json"));
        assert!(!is_candidate_file_name(".hidden.extension.json"));
        assert!(!is_candidate_file_name("notes.txt"));
    }

    #[test]
    fn discovery_is_sorted_and_restartable() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.extension.json"), "{}").unwrap();
        fs::write(dir.path().join("a.extension.json"), "{}").unwrap();
        fs::write(dir.path().join("readme.md"), "ignored").unwrap();
        fs::create_dir(dir.path().join("c.extension.json")).unwrap();

        let discovery = Discovery::new(dir.path());
        let first: Vec<_> = discovery.iter().map(|entry| entry.unwrap()).collect();
        assert_eq!(
            first,
            vec![
                dir.path().join("a.extension.json"),
                dir.path().join("b.extension.json"),
            ]
        );

        fs::write(dir.path().join("0.extension.json"), "{}").unwrap();
        let second: Vec<_> = discovery.iter().map(|entry| entry.unwrap()).collect();
        assert_eq!(second.len(), 3);
        assert_eq!(second[0], dir.path().join("0.extension.json"));
    }

    #[test]
    fn unreadable_directory_yields_single_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let entries: Vec<_> = Discovery::new(&missing).iter().collect();
        assert_eq!(entries.len(), 1);
        assert!(matches!(
            entries[0],
            Err(DiscoveryError::Unreadable { .. })
        ));
    }
}
