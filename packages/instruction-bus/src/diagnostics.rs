//! Logging side channel.
//!
//! Registration and routing failures that never reach a completion are
//! reported here. An application installs one handler for the lifetime of
//! the dispatcher; every message is also mirrored to `tracing` unless the
//! mirror is disabled in [`DispatcherConfig`](crate::DispatcherConfig).

use std::fmt;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// Severity of a side-channel message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Debug => write!(f, "debug"),
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Application-supplied log sink.
pub type LogHandler = Box<dyn Fn(Severity, &str) + Send + Sync>;

pub(crate) struct Diagnostics {
    handler: OnceLock<LogHandler>,
    trace: bool,
}

impl Diagnostics {
    pub(crate) fn new(trace: bool) -> Self {
        Self {
            handler: OnceLock::new(),
            trace,
        }
    }

    /// Install the handler. Only the first call succeeds.
    pub(crate) fn register_handler(&self, handler: LogHandler) -> bool {
        self.handler.set(handler).is_ok()
    }

    pub(crate) fn has_handler(&self) -> bool {
        self.handler.get().is_some()
    }

    pub(crate) fn emit(&self, severity: Severity, message: &str) {
        if self.trace {
            match severity {
                Severity::Debug => tracing::debug!(target: "instruction_bus", "{message}"),
                Severity::Info => tracing::info!(target: "instruction_bus", "{message}"),
                Severity::Warning => tracing::warn!(target: "instruction_bus", "{message}"),
                Severity::Error => tracing::error!(target: "instruction_bus", "{message}"),
            }
        }
        if let Some(handler) = self.handler.get() {
            handler(severity, message);
        }
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("has_handler", &self.has_handler())
            .field("trace", &self.trace)
            .finish()
    }
}
