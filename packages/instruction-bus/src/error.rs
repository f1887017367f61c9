//! Structured error types for the instruction bus.
//!
//! Errors are split by the boundary they cross:
//!
//! | Type                  | Raised during | Reaches the caller through     |
//! |-----------------------|---------------|--------------------------------|
//! | [`InstructionError`]  | routing       | the instruction's completion   |
//! | [`InstructionSetError`] | registration | `Result` from the set method   |
//! | [`RegistrationError`] | registration  | `Result` from the builder + log |
//! | [`RouteRejection`]    | routing       | the logging side channel only  |
//!
//! # The Completion Rule
//!
//! > **Only command-set and handler failures ever complete an instruction.**
//!
//! A [`RouteRejection`] is logged and swallowed. The instruction it names is
//! dropped without being completed, so a caller awaiting it stays pending.
//!
//! # Example
//!
//! ```ignore
//! use instruction_bus::InstructionError;
//!
//! match completion.await {
//!     Ok(session) => println!("logged in: {session:?}"),
//!     Err(InstructionError::Closed) => eprintln!("dispatcher is shutting down"),
//!     Err(InstructionError::NotBound { kind }) => eprintln!("{kind} is not supported"),
//!     Err(e) => eprintln!("login failed: {e}"),
//! }
//! ```

use std::fmt;

use thiserror::Error;

use crate::core::{AccessLevel, SourceId};

/// Failure delivered through an instruction's completion channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstructionError {
    /// The instruction reached a command set that has been closed.
    #[error("instruction set is closed")]
    Closed,

    /// The instruction's kind still has the placeholder handler.
    #[error("no handler bound for instruction kind {kind}")]
    NotBound {
        /// Name of the unbound kind.
        kind: &'static str,
    },

    /// A checked downcast failed while dispatching (caller-side programming error).
    #[error("instruction type mismatch: expected {expected}")]
    TypeMismatch {
        /// Type name the set or handler expected.
        expected: &'static str,
    },

    /// The handler refused or failed the instruction.
    #[error("instruction rejected: {reason}")]
    Rejected {
        /// Handler-supplied reason.
        reason: String,
    },
}

impl InstructionError {
    /// Create a handler-level rejection.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }
}

/// Failure while a target populates its command set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InstructionSetError {
    /// The kind has no entry in the set's table. Means the family's
    /// enumeration is missing a variant.
    #[error("instruction kind {kind} is not part of this set")]
    UnknownKind {
        /// Name of the missing kind.
        kind: &'static str,
    },

    /// The minimum access level was already assigned.
    #[error("minimum access level already set to {current}")]
    AlreadySet {
        /// The level that stays in force.
        current: AccessLevel,
    },
}

/// Failure while registering a source or target with the dispatcher.
///
/// Every variant is also reported through the logging side channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError<F: fmt::Debug> {
    /// The family is not in the dispatcher's allow-list.
    #[error("family {family:?} is not routed by this dispatcher")]
    FamilyNotAllowed {
        /// The rejected family.
        family: F,
    },

    /// A target already owns the family's command set.
    #[error("a target is already registered for family {family:?}")]
    AlreadyRegistered {
        /// The contested family.
        family: F,
    },

    /// The target reported a family other than the one its kind type belongs to.
    #[error("target reports family {reported:?} but its kinds belong to {declared:?}")]
    FamilyMismatch {
        /// What `InstructionTarget::family` returned.
        reported: F,
        /// What the kind type declares.
        declared: F,
    },

    /// The source asked for no families at all.
    #[error("source requires no families")]
    NoRequiredFamilies,

    /// The target's registration callback returned `false`.
    #[error("target for family {family:?} declined registration")]
    TargetDeclined {
        /// Family of the discarded set.
        family: F,
    },

    /// The source's registration callback returned `false`.
    #[error("source {source_id} declined registration")]
    SourceDeclined {
        /// The discarded (never reused) identity.
        source_id: SourceId,
    },
}

/// Reason the dispatcher refused to route an instruction.
///
/// Rejections are logged only. The instruction is dropped uncompleted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteRejection<F: fmt::Debug> {
    /// `validate()` returned false.
    #[error("instruction {kind} failed validation")]
    InvalidInstruction {
        /// Kind name of the invalid instruction.
        kind: &'static str,
    },

    /// The entry point was used before the dispatcher was built.
    #[error("dispatcher is not started")]
    NotStarted,

    /// No source with this identity is registered.
    #[error("unknown source {source_id}")]
    UnknownSource {
        /// The unrecognized identity.
        source_id: SourceId,
    },

    /// The source is not allowed to submit instructions of this family.
    #[error("source {source_id} may not submit {family:?} instructions")]
    FamilyNotAllowed {
        /// The submitting source.
        source_id: SourceId,
        /// The instruction's family.
        family: F,
    },

    /// No target registered a set for the family.
    #[error("no target registered for family {family:?}")]
    NoTargetForFamily {
        /// The instruction's family.
        family: F,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum TestFamily {
        Sessions,
    }

    #[test]
    fn test_instruction_error_display() {
        assert_eq!(InstructionError::Closed.to_string(), "instruction set is closed");

        let err = InstructionError::NotBound { kind: "Login" };
        assert!(err.to_string().contains("Login"));

        let err = InstructionError::rejected("bad password");
        assert_eq!(err.to_string(), "instruction rejected: bad password");
    }

    #[test]
    fn test_set_error_is_pattern_matchable() {
        let err = InstructionSetError::AlreadySet {
            current: AccessLevel::Admin,
        };
        match err {
            InstructionSetError::AlreadySet { current } => assert_eq!(current, AccessLevel::Admin),
            _ => panic!("Expected AlreadySet"),
        }
        assert!(err.to_string().contains("admin"));
    }

    #[test]
    fn test_registration_error_display() {
        let err = RegistrationError::AlreadyRegistered {
            family: TestFamily::Sessions,
        };
        assert!(err.to_string().contains("Sessions"));

        let err: RegistrationError<TestFamily> = RegistrationError::SourceDeclined {
            source_id: SourceId::new(3),
        };
        assert!(err.to_string().contains("source-3"));
    }

    #[test]
    fn test_route_rejection_display() {
        let err = RouteRejection::FamilyNotAllowed {
            source_id: SourceId::new(2),
            family: TestFamily::Sessions,
        };
        let display = err.to_string();
        assert!(display.contains("source-2"));
        assert!(display.contains("Sessions"));
    }

    #[test]
    fn test_instruction_error_converts_into_anyhow() {
        let err: anyhow::Error = InstructionError::Closed.into();
        assert_eq!(
            err.downcast_ref::<InstructionError>(),
            Some(&InstructionError::Closed)
        );
    }
}
