//! Capability interfaces for components that plug into the dispatcher.
//!
//! | Role   | Implements              | Receives at registration      |
//! |--------|-------------------------|-------------------------------|
//! | Target | [`InstructionTarget`]   | an empty [`InstructionSet`]   |
//! | Source | [`InstructionSource`]   | a bound [`EntryPoint`]        |
//!
//! Both callbacks are invoked exactly once, during the registration phase.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::core::{AccessLevel, Family, InstructionKind};
use crate::dispatch::EntryPoint;
use crate::set::InstructionSet;

/// Authorization token attached to instructions at routing time.
///
/// Issuance and validation live outside the bus. The bus only carries the
/// token from the source to the handler.
pub trait AuthorizationToken: fmt::Debug + Send + Sync {
    /// Who the token was issued to.
    fn subject(&self) -> &str;

    /// The capability level the token grants.
    fn access_level(&self) -> AccessLevel;
}

/// Shared handle to an authorization token.
pub type Token = Arc<dyn AuthorizationToken>;

/// A component that owns the handlers for one instruction family.
///
/// # Example
///
/// ```ignore
/// struct SessionManager { sessions: Arc<SessionStore> }
///
/// impl InstructionTarget<Subsystem> for SessionManager {
///     type Kind = SessionKind;
///
///     fn register_instruction_set(&mut self, set: &mut InstructionSet<SessionKind>) -> bool {
///         let store = self.sessions.clone();
///         set.bind::<Login, _>(move |envelope| {
///             let id = store.open(&envelope.body().user);
///             envelope.fulfill(id);
///         })
///         .is_ok()
///             && set.set_minimum_access_level(AccessLevel::Anonymous).is_ok()
///     }
/// }
/// ```
pub trait InstructionTarget<F: Family> {
    /// The kind enum of the family this target serves.
    type Kind: InstructionKind<Family = F>;

    /// The family this target serves.
    ///
    /// Defaults to the family declared by `Self::Kind`. Overriding it with a
    /// different value makes registration fail.
    fn family(&self) -> F {
        <Self::Kind as InstructionKind>::FAMILY
    }

    /// Bind handlers and set the minimum access level.
    ///
    /// Called exactly once by the dispatcher. Returning `false` discards the
    /// set and leaves the family unregistered.
    fn register_instruction_set(&mut self, set: &mut InstructionSet<Self::Kind>) -> bool;
}

/// A component that submits instructions.
pub trait InstructionSource<F: Family> {
    /// Families this source will submit. Must be non-empty.
    fn required_families(&self) -> HashSet<F>;

    /// Keep the entry point for later submissions.
    ///
    /// Called exactly once by the dispatcher. Returning `false` discards the
    /// source identity without reusing it.
    fn register_handler(&mut self, entry_point: EntryPoint<F>) -> bool;
}
