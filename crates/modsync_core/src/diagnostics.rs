//! Human-readable status notices.
//!
//! # Responsibility
//! - Surface load and handshake progress to the host application.
//!
//! # Invariants
//! - Emitting a notice is fire-and-forget; a failing sink never affects
//!   protocol state.

use log::{info, warn};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

/// Category of one notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoticeKind {
    ExtensionLoaded,
    LoadFailed,
    HandshakeRequested,
    HandshakeReceived,
    HandshakeFinished,
    HandshakeTimedOut,
    Info,
}

impl NoticeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExtensionLoaded => "extension_loaded",
            Self::LoadFailed => "load_failed",
            Self::HandshakeRequested => "handshake_requested",
            Self::HandshakeReceived => "handshake_received",
            Self::HandshakeFinished => "handshake_finished",
            Self::HandshakeTimedOut => "handshake_timed_out",
            Self::Info => "info",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn new(kind: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Display surface supplied by the host application.
pub trait DiagnosticsSink: Send + Sync {
    fn show_message(&self, notice: &Notice);
}

/// Sink that only writes notices to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticsSink for LogSink {
    fn show_message(&self, notice: &Notice) {
        info!(
            "event=notice module=diagnostics kind={} message={}",
            notice.kind.as_str(),
            notice.message
        );
    }
}

/// Sink that keeps every notice in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn count(&self, kind: NoticeKind) -> usize {
        self.notices()
            .iter()
            .filter(|notice| notice.kind == kind)
            .count()
    }
}

impl DiagnosticsSink for RecordingSink {
    fn show_message(&self, notice: &Notice) {
        self.notices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(notice.clone());
    }
}

/// Fan-out over the registered sinks.
#[derive(Clone, Default)]
pub struct Diagnostics {
    sinks: Vec<Arc<dyn DiagnosticsSink>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn add_sink(&mut self, sink: Arc<dyn DiagnosticsSink>) {
        self.sinks.push(sink);
    }

    /// Sends one notice to every sink. Sink panics are swallowed.
    pub fn show(&self, kind: NoticeKind, message: impl Into<String>) {
        let notice = Notice::new(kind, message);
        for sink in &self.sinks {
            let delivered = catch_unwind(AssertUnwindSafe(|| sink.show_message(&notice)));
            if delivered.is_err() {
                warn!(
                    "event=notice module=diagnostics status=error kind={} error_code=sink_panicked",
                    notice.kind.as_str()
                );
            }
        }
    }
}
