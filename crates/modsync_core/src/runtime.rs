//! Session runtime: the single-writer context tying every component
//! together.
//!
//! # Responsibility
//! - Own registry, coordinator, loaded extensions, scheduler, panel and
//!   diagnostics for one local peer.
//! - Install load reports and bind each extension's handshake events.
//! - Drive bus dispatch and due scheduled tasks from `tick`.
//!
//! # Invariants
//! - Registry and handshake state change only through `&mut self`.
//! - Background loads hand their report back to `tick`; nothing is
//!   registered from the worker thread.

use crate::bus::event_bus::{BusEvent, EventBus, Outbox};
use crate::bus::transport::{PeerId, Transport};
use crate::config::{ConfigError, HostConfig};
use crate::content::item::{ContentItem, ContentSet};
use crate::content::registry::{ActiveContentView, ContentRegistry, RegistryError};
use crate::diagnostics::{Diagnostics, LogSink, NoticeKind};
use crate::extension::host::{ExtensionHost, ExtensionTable, LoadPoll, LoadReport, PendingLoad};
use crate::extension::loader::ModuleLoader;
use crate::extension::panel::{PanelEntry, PanelError, PanelFrame, PanelMenu};
use crate::schedule::{Clock, SystemClock, TaskQueue};
use crate::session::coordinator::{HandshakeCoordinator, HandshakeIo};
use crate::session::handshake::{finish_event_name, start_event_name, HandshakeMessage, PairKey};
use log::{error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Work deferred onto the session context's task queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduledTask {
    /// Deferred startup load of the extension directory.
    LoadExtensions,
    /// Staggered "loaded" notice for one extension.
    AnnounceExtension { extension_id: String },
    HandshakeTimeout(PairKey),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    Config(ConfigError),
    Registry(RegistryError),
}

impl Display for RuntimeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "invalid host config: {err}"),
            Self::Registry(err) => write!(f, "content registry: {err}"),
        }
    }
}

impl Error for RuntimeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Registry(err) => Some(err),
        }
    }
}

impl From<ConfigError> for RuntimeError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<RegistryError> for RuntimeError {
    fn from(value: RegistryError) -> Self {
        Self::Registry(value)
    }
}

/// Injected collaborators with production defaults.
#[derive(Clone)]
pub struct RuntimeOptions {
    pub clock: Arc<dyn Clock>,
    pub diagnostics: Diagnostics,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            diagnostics: Diagnostics::new().with_sink(Arc::new(LogSink)),
        }
    }
}

/// State mutated by bus handlers and lifecycle calls.
pub struct SessionContext {
    registry: ContentRegistry,
    coordinator: HandshakeCoordinator,
    extensions: ExtensionTable,
    scheduler: TaskQueue<ScheduledTask>,
    diagnostics: Diagnostics,
    panel: PanelMenu,
}

impl SessionContext {
    fn split<'a>(
        &'a mut self,
        outbox: &'a mut Outbox,
    ) -> (&'a mut HandshakeCoordinator, HandshakeIo<'a>) {
        (
            &mut self.coordinator,
            HandshakeIo {
                registry: &mut self.registry,
                outbox,
                scheduler: &mut self.scheduler,
                diagnostics: &self.diagnostics,
                extensions: &mut self.extensions,
            },
        )
    }

    fn handle_start(&mut self, event: &BusEvent, outbox: &mut Outbox) {
        let Some(message) = decode(event) else {
            return;
        };
        let (coordinator, mut io) = self.split(outbox);
        coordinator.on_start_received(event.sender, &message, &mut io);
    }

    fn handle_finish(&mut self, event: &BusEvent, outbox: &mut Outbox) {
        let Some(message) = decode(event) else {
            return;
        };
        let (coordinator, mut io) = self.split(outbox);
        coordinator.on_finish_received(event.sender, &message, &mut io);
    }

    pub fn registry(&self) -> &ContentRegistry {
        &self.registry
    }

    pub fn coordinator(&self) -> &HandshakeCoordinator {
        &self.coordinator
    }

    pub fn extensions(&self) -> &ExtensionTable {
        &self.extensions
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }
}

fn decode(event: &BusEvent) -> Option<HandshakeMessage> {
    match HandshakeMessage::decode(&event.payload) {
        Ok(message) => Some(message),
        Err(err) => {
            warn!(
                "event=handshake_decode module=session status=error event_name={} sender={} error={}",
                event.name, event.sender, err
            );
            None
        }
    }
}

/// One local peer's extension host and session state.
pub struct SessionRuntime<T: Transport> {
    bus: EventBus<SessionContext, T>,
    context: SessionContext,
    host: ExtensionHost,
    config: HostConfig,
    pending_load: Option<PendingLoad>,
}

impl<T: Transport> SessionRuntime<T> {
    /// Builds the runtime and captures `baseline` as the baseline set.
    pub fn new(
        config: HostConfig,
        transport: T,
        loader: Arc<dyn ModuleLoader>,
        baseline: Vec<ContentItem>,
        options: RuntimeOptions,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;
        let mut registry = ContentRegistry::new();
        registry.capture_baseline(baseline)?;

        let bus = EventBus::new(transport);
        let local_peer = bus.local_peer();
        info!(
            "event=runtime_init module=runtime status=ok peer={} extension_dir={} handshake_timeout_ms={}",
            local_peer,
            config.extension_dir.display(),
            config.handshake_timeout_ms
        );
        Ok(Self {
            context: SessionContext {
                registry,
                coordinator: HandshakeCoordinator::new(local_peer, config.handshake_timeout()),
                extensions: ExtensionTable::new(),
                scheduler: TaskQueue::new(options.clock),
                diagnostics: options.diagnostics,
                panel: PanelMenu::new(),
            },
            bus,
            host: ExtensionHost::new(loader),
            config,
            pending_load: None,
        })
    }

    pub fn local_peer(&self) -> PeerId {
        self.bus.local_peer()
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn transport(&self) -> &T {
        self.bus.transport()
    }

    /// Defers the extension directory load by `load_delay_ms`.
    pub fn schedule_startup_load(&mut self) {
        self.context
            .scheduler
            .schedule(self.config.load_delay(), ScheduledTask::LoadExtensions);
        info!(
            "event=extension_load module=runtime status=start delay_ms={}",
            self.config.load_delay_ms
        );
    }

    /// Whether a background load is still running.
    pub fn is_loading(&self) -> bool {
        self.pending_load.is_some()
    }

    /// Loads the extension directory on the calling thread.
    pub fn load_now(&mut self) -> Vec<String> {
        let discovery = self.host.discover(self.config.extension_dir.clone());
        let report = self.host.load_all(&discovery);
        self.install(report)
    }

    /// Starts a background load unless one is already running.
    pub fn start_background_load(&mut self) {
        if self.pending_load.is_some() {
            return;
        }
        self.pending_load = Some(self.host.spawn_load(self.config.extension_dir.clone()));
    }

    /// Registers a load report's content and handshake events, then
    /// brings a running session up to date with the new extensions.
    ///
    /// Returns the ids installed from this report, in load order.
    pub fn install(&mut self, report: LoadReport) -> Vec<String> {
        let LoadReport { loaded, failures } = report;

        for failure in &failures {
            let source = failure
                .path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| self.config.extension_dir.display().to_string());
            self.context.diagnostics.show(
                NoticeKind::LoadFailed,
                format!("Failed to load {source}: {}", failure.error),
            );
        }

        let mut installed = Vec::new();
        for mut extension in loaded {
            let extension_id = extension.id().to_string();
            if self.context.extensions.contains(&extension_id) {
                warn!(
                    "event=extension_install module=runtime status=skip extension_id={} reason=already_installed",
                    extension_id
                );
                continue;
            }

            let content = extension.take_content();
            if let Err(err) = self
                .context
                .registry
                .register_extension_content(&extension_id, content)
            {
                error!(
                    "event=extension_install module=runtime status=error extension_id={} error={}",
                    extension_id, err
                );
                self.context.diagnostics.show(
                    NoticeKind::LoadFailed,
                    format!("Failed to install {extension_id}: {err}"),
                );
                continue;
            }
            if let Err(err) = self.context.extensions.insert(extension) {
                error!(
                    "event=extension_install module=runtime status=error extension_id={} error={}",
                    extension_id, err
                );
                continue;
            }

            self.bus.register_handler(
                start_event_name(&extension_id),
                |context: &mut SessionContext, event: &BusEvent, outbox: &mut Outbox| {
                    context.handle_start(event, outbox)
                },
            );
            self.bus.register_handler(
                finish_event_name(&extension_id),
                |context: &mut SessionContext, event: &BusEvent, outbox: &mut Outbox| {
                    context.handle_finish(event, outbox)
                },
            );

            let delay = self.config.announce_interval() * installed.len() as u32;
            self.context.scheduler.schedule(
                delay,
                ScheduledTask::AnnounceExtension {
                    extension_id: extension_id.clone(),
                },
            );
            installed.push(extension_id);
        }

        info!(
            "event=extension_install module=runtime status=ok installed={} failed={}",
            installed.len(),
            failures.len()
        );
        if !installed.is_empty() {
            self.with_coordinator(|coordinator, io| {
                coordinator.on_extensions_installed(&installed, io)
            });
        }
        installed
    }

    /// Runs one step of the session context: collects a finished
    /// background load, dispatches bus events and runs due tasks.
    ///
    /// Returns the number of events and tasks processed.
    pub fn tick(&mut self) -> usize {
        self.poll_background_load();
        let mut processed = self.bus.dispatch(&mut self.context);

        for task in self.context.scheduler.take_due() {
            processed += 1;
            match task {
                ScheduledTask::LoadExtensions => self.start_background_load(),
                ScheduledTask::AnnounceExtension { extension_id } => self
                    .context
                    .diagnostics
                    .show(NoticeKind::ExtensionLoaded, format!("Loaded {extension_id}")),
                ScheduledTask::HandshakeTimeout(key) => {
                    self.with_coordinator(|coordinator, io| coordinator.on_timeout(&key, io))
                }
            }
        }
        processed
    }

    /// Local peer joined a networked session.
    pub fn on_joined_session(&mut self, is_authority: bool) {
        self.with_coordinator(|coordinator, io| coordinator.on_joined_session(is_authority, io));
    }

    pub fn on_peer_joined(&mut self, peer: PeerId) {
        self.with_coordinator(|coordinator, io| coordinator.on_peer_joined(peer, io));
    }

    pub fn on_peer_left(&mut self, peer: PeerId) {
        self.with_coordinator(|coordinator, io| coordinator.on_peer_left(peer, io));
    }

    pub fn on_left_session(&mut self) {
        self.with_coordinator(|coordinator, io| coordinator.on_left_session(io));
    }

    /// Offline session is ready; reconciles without the network.
    pub fn on_local_session_ready(&mut self) {
        self.with_coordinator(|coordinator, io| coordinator.on_local_session_ready(io));
    }

    /// Content set gameplay should use right now.
    pub fn active_content_set(&self) -> Arc<ContentSet> {
        self.context.registry.active_content_set()
    }

    /// Read handle for gameplay code on other threads.
    pub fn content_view(&self) -> ActiveContentView {
        self.context.registry.view()
    }

    pub fn toggle_panel(&mut self) -> bool {
        self.context.panel.toggle()
    }

    pub fn panel_locks_input(&self) -> bool {
        self.context.panel.locks_input()
    }

    pub fn panel_entries(&self) -> Vec<PanelEntry> {
        self.context.panel.entries(&self.context.extensions)
    }

    pub fn open_panel(&mut self, extension_id: &str) -> Result<(), PanelError> {
        self.context
            .panel
            .open(extension_id, &self.context.extensions)
    }

    pub fn close_panel(&mut self) {
        self.context.panel.back();
    }

    /// Draws the options menu for this frame.
    pub fn panel_frame(&mut self) -> PanelFrame {
        self.context.panel.frame(&mut self.context.extensions)
    }

    fn poll_background_load(&mut self) {
        let Some(pending) = self.pending_load.as_mut() else {
            return;
        };
        match pending.poll() {
            LoadPoll::Pending => {}
            LoadPoll::Ready(report) => {
                self.pending_load = None;
                self.install(report);
            }
            LoadPoll::Lost => {
                self.pending_load = None;
                error!("event=extension_load module=runtime status=error error_code=worker_lost");
                self.context.diagnostics.show(
                    NoticeKind::LoadFailed,
                    "Extension loading stopped before reporting",
                );
            }
        }
    }

    fn with_coordinator(
        &mut self,
        operation: impl FnOnce(&mut HandshakeCoordinator, &mut HandshakeIo<'_>),
    ) {
        let mut outbox = Outbox::new();
        {
            let (coordinator, mut io) = self.context.split(&mut outbox);
            operation(coordinator, &mut io);
        }
        self.bus.flush(outbox);
    }
}
