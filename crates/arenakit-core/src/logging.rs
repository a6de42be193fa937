//! Leveled logging consumed by the allocators.
//!
//! Allocators hold an optional logger and emit human-readable messages at
//! state-changing points: construction, allocation, deallocation and
//! failures. Logging never affects allocation outcomes. The production
//! implementation forwards to the `log` facade; [`BufferLogger`] records
//! entries in memory for assertions.

use std::sync::Arc;

use parking_lot::Mutex;

/// Message severity, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Trace,
    Debug,
    Information,
    Warning,
    Error,
    Critical,
}

/// Sink for allocator diagnostics.
///
/// Implementations must not panic and must not call back into the
/// allocator that emitted the message.
pub trait AllocLogger: Send + Sync {
    fn log(&self, severity: Severity, message: &str);
}

/// Forwards allocator diagnostics to the `log` crate.
///
/// `Information` maps to `info`, `Critical` to `error`; the remaining
/// severities map to their same-named levels.
#[derive(Debug, Default)]
pub struct FacadeLogger;

impl AllocLogger for FacadeLogger {
    fn log(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Trace => log::trace!("{message}"),
            Severity::Debug => log::debug!("{message}"),
            Severity::Information => log::info!("{message}"),
            Severity::Warning => log::warn!("{message}"),
            Severity::Error | Severity::Critical => log::error!("{message}"),
        }
    }
}

/// In-memory logger for tests and post-mortem inspection.
#[derive(Debug, Default)]
pub struct BufferLogger {
    entries: Mutex<Vec<(Severity, String)>>,
}

impl BufferLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded entries in emission order.
    pub fn entries(&self) -> Vec<(Severity, String)> {
        self.entries.lock().clone()
    }

    /// True if any recorded message at `severity` contains `needle`.
    pub fn contains(&self, severity: Severity, needle: &str) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|(s, m)| *s == severity && m.contains(needle))
    }
}

impl AllocLogger for BufferLogger {
    fn log(&self, severity: Severity, message: &str) {
        self.entries.lock().push((severity, message.to_owned()));
    }
}

/// Optional logger handle held by every allocator instance.
///
/// A `None` handle is silent; all emission helpers are no-ops.
#[derive(Clone, Default)]
pub(crate) struct LoggerHandle(Option<Arc<dyn AllocLogger>>);

impl LoggerHandle {
    pub(crate) fn new(logger: Option<Arc<dyn AllocLogger>>) -> Self {
        Self(logger)
    }

    pub(crate) fn debug(&self, message: impl AsRef<str>) {
        self.emit(Severity::Debug, message.as_ref());
    }

    pub(crate) fn information(&self, message: impl AsRef<str>) {
        self.emit(Severity::Information, message.as_ref());
    }

    pub(crate) fn warning(&self, message: impl AsRef<str>) {
        self.emit(Severity::Warning, message.as_ref());
    }

    pub(crate) fn error(&self, message: impl AsRef<str>) {
        self.emit(Severity::Error, message.as_ref());
    }

    fn emit(&self, severity: Severity, message: &str) {
        if let Some(logger) = &self.0 {
            logger.log(severity, message);
        }
    }
}

impl std::fmt::Debug for LoggerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LoggerHandle")
            .field(&self.0.as_ref().map(|_| "dyn AllocLogger"))
            .finish()
    }
}
