//! # Instruction Bus
//!
//! An in-process instruction dispatch bus. Independent **sources** submit
//! typed instructions; independent **targets** own the handlers for one
//! instruction family each; results come back through one-shot completions.
//!
//! ## Core Concepts
//!
//! - [`Family`] = a group of instructions routed as a unit to one target
//! - [`InstructionKind`] = the enumerable kinds of one family
//! - [`Instruction`] = a typed instruction body with its result type
//! - [`InstructionSet`] = a family's handler table, owned by its target
//!
//! ## Architecture
//!
//! ```text
//! Source ── EntryPoint::send(body, token) ──► Completion (returned at once)
//!                     │
//!                     ▼
//!               Dispatcher
//!      validate → source known → family allowed → set registered
//!                     │             (refusals: logged, never completed)
//!                     ▼
//!        InstructionSet::dispatch ── attach token ──► bound handler
//!                     │                                      │
//!        Closed / NotBound / TypeMismatch           fulfill / fail / reject
//!                     └─────────────► Promise ◄──────────────┘
//! ```
//!
//! ## Lifecycle
//!
//! 1. **Registration** on a [`DispatcherBuilder`]: targets populate the sets,
//!    sources receive their [`EntryPoint`]s. Single-threaded (`&mut self`).
//! 2. **Routing** on the [`Dispatcher`] returned by `build()`: entry points
//!    may be used from any number of threads.
//! 3. **Shutdown**: [`Dispatcher::shutdown`] (or dropping the last handle)
//!    closes every set. Later instructions complete with
//!    [`InstructionError::Closed`].
//!
//! ## Example
//!
//! ```ignore
//! use instruction_bus::*;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
//! enum Subsystem { Sessions }
//!
//! instruction_kinds! {
//!     pub enum SessionKind: Subsystem = Subsystem::Sessions { Login, Logout }
//! }
//!
//! struct Login { user: String }
//!
//! impl Instruction for Login {
//!     type Kind = SessionKind;
//!     type Output = u64;
//!     const KIND: SessionKind = SessionKind::Login;
//!
//!     fn validate(&self) -> bool { !self.user.is_empty() }
//! }
//!
//! let mut builder = DispatcherBuilder::new(DispatcherConfig::new([Subsystem::Sessions]));
//! builder.register_target(&mut session_manager)?;
//! builder.register_source(&mut web_frontend)?;
//! let dispatcher = builder.build();
//!
//! // Inside the source, with the entry point it was handed:
//! let session = entry_point.send(Login { user: "ada".into() }, Some(token)).await?;
//! ```
//!
//! ## Guarantees
//!
//! - **Exactly once**: a completion resolves at most once
//! - **Refusals are silent to the caller**: instructions the dispatcher refuses
//!   are reported through the logging side channel and their completion never
//!   resolves
//! - **No panics on type confusion**: erased instructions are downcast with
//!   checks and fail with [`InstructionError::TypeMismatch`]

mod completion;
mod config;
mod core;
mod diagnostics;
mod dispatch;
mod envelope;
mod error;
mod interface;
mod set;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;


// Re-export core traits and identities
pub use crate::core::{AccessLevel, Family, FamilyOf, Instruction, InstructionId, InstructionKind, SourceId};

// Re-export completion channel
pub use completion::{channel, Completion, InstructionResult, Promise};

// Re-export envelope types
pub use envelope::{AnyInstruction, Envelope};

// Re-export command sets
pub use set::{AnyInstructionSet, ErasedHandler, InstructionSet};

// Re-export dispatcher
pub use dispatch::{Dispatcher, DispatcherBuilder, EntryPoint};

// Re-export capability interfaces
pub use interface::{AuthorizationToken, InstructionSource, InstructionTarget, Token};

// Re-export configuration
pub use config::{DispatcherConfig, FAMILIES_VAR, TRACE_VAR};

// Re-export diagnostics
pub use diagnostics::{LogHandler, Severity};

// Re-export error types
pub use crate::error::{InstructionError, InstructionSetError, RegistrationError, RouteRejection};
