//! Test fixtures for code that sits on the instruction bus.
//!
//! # Feature Flag
//!
//! This module is only available with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! instruction-bus = { version = "0.1", features = ["testing"] }
//! ```
//!
//! # Example
//!
//! ```ignore
//! use instruction_bus::testing::{RecordingLog, StaticToken};
//!
//! let log = RecordingLog::new();
//! builder.register_logging_handler(log.handler());
//!
//! let completion = entry_point.send(Login::new("ada"), Some(StaticToken::shared("ada", AccessLevel::User)));
//! assert!(log.contains("Login"));
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use crate::core::AccessLevel;
use crate::diagnostics::{LogHandler, Severity};
use crate::interface::{AuthorizationToken, Token};

/// Token with a fixed subject and level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticToken {
    subject: String,
    level: AccessLevel,
}

impl StaticToken {
    pub fn new(subject: impl Into<String>, level: AccessLevel) -> Self {
        Self {
            subject: subject.into(),
            level,
        }
    }

    /// Build the token already wrapped as a shared [`Token`].
    pub fn shared(subject: impl Into<String>, level: AccessLevel) -> Token {
        Arc::new(Self::new(subject, level))
    }
}

impl AuthorizationToken for StaticToken {
    fn subject(&self) -> &str {
        &self.subject
    }

    fn access_level(&self) -> AccessLevel {
        self.level
    }
}

/// Captures side-channel messages for assertions.
#[derive(Debug, Clone, Default)]
pub struct RecordingLog {
    entries: Arc<Mutex<Vec<(Severity, String)>>>,
}

impl RecordingLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handler that appends to this log. May be handed out more than once.
    pub fn handler(&self) -> LogHandler {
        let entries = self.entries.clone();
        Box::new(move |severity: Severity, message: &str| {
            entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((severity, message.to_string()));
        })
    }

    /// Snapshot of everything recorded so far.
    pub fn entries(&self) -> Vec<(Severity, String)> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns true if any recorded message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|(_, message)| message.contains(needle))
    }

    /// Number of messages recorded at `severity`.
    pub fn count_at(&self, severity: Severity) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(s, _)| *s == severity)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}
