//! Extension host and session content handshake.
//!
//! Loads third-party extensions at startup and keeps the active shared
//! content set consistent across the peers of a session.

pub mod bus;
pub mod config;
pub mod content;
pub mod diagnostics;
pub mod extension;
pub mod logging;
pub mod runtime;
pub mod schedule;
pub mod session;

pub use bus::event_bus::{BusEvent, EventBus, EventOrigin, Outbox};
pub use bus::transport::{
    BusError, LoopbackNetwork, LoopbackTransport, PeerId, Transport, WireMessage,
};
pub use config::{ConfigError, HostConfig};
pub use content::item::{ContentItem, ContentOrigin, ContentSet, ContentSetKind};
pub use content::registry::{ActiveContentView, ContentRegistry, RegistryError, RegistryResult};
pub use diagnostics::{Diagnostics, DiagnosticsSink, LogSink, Notice, NoticeKind, RecordingSink};
pub use extension::capability::{Capability, CapabilitySet};
pub use extension::contract::{
    ContentContributions, Extension, ExtensionFailure, NetworkedExtension, UiPanel,
};
pub use extension::host::{
    Discovery, DiscoveryError, ExtensionDescriptor, ExtensionHost, ExtensionTable, HostError,
    InstantiationError, LoadFailure, LoadPoll, LoadReport, LoadedExtension, PendingLoad,
    PACKAGE_SUFFIX,
};
pub use extension::loader::{EntryPointCatalog, LoadError, LoadedModule, ManifestLoader, ModuleLoader};
pub use extension::manifest::{ExtensionManifest, ManifestError};
pub use extension::panel::{PanelEntry, PanelError, PanelFrame, PanelMenu};
pub use logging::{default_log_level, init_logging, logging_status};
pub use runtime::{RuntimeError, RuntimeOptions, ScheduledTask, SessionContext, SessionRuntime};
pub use schedule::{Clock, ManualClock, SystemClock, TaskId, TaskQueue};
pub use session::coordinator::{HandshakeCoordinator, HandshakeIo};
pub use session::handshake::{HandshakeMessage, HandshakePhase, PairKey};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
