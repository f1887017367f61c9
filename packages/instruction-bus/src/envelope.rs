//! Instruction envelopes and the type-erased instruction handle.
//!
//! An [`Envelope`] wraps a typed instruction body with the transport-level
//! metadata the bus needs: an id for diagnostics, the authorization token
//! attached at routing time, and the instruction's [`Promise`].
//!
//! The dispatcher never sees `Envelope<I>` directly. It routes
//! `Box<dyn AnyInstruction<F>>`, which exposes only what routing needs
//! (family, validation, the erased kind) plus `fail()` so that a command set
//! can complete an instruction whose concrete type it does not know.

use std::any::{type_name, Any};

use crate::completion::{self, Completion, InstructionResult, Promise};
use crate::core::{AccessLevel, FamilyOf, Instruction, InstructionId, InstructionKind};
use crate::error::InstructionError;
use crate::interface::Token;

/// A typed instruction in flight.
///
/// Created by a source through [`Envelope::new`] (or implicitly by
/// [`EntryPoint::send`](crate::EntryPoint::send)), consumed by the handler
/// bound to `I::KIND`.
///
/// Completing the envelope consumes it: `fulfill`, `fail` and `reject` all
/// take `self`.
pub struct Envelope<I: Instruction> {
    id: InstructionId,
    kind: I::Kind,
    body: I,
    token: Option<Token>,
    promise: Promise<I::Output>,
}

impl<I: Instruction> Envelope<I> {
    /// Wrap an instruction body, returning the envelope and the caller's completion.
    pub fn new(body: I) -> (Self, Completion<I::Output>) {
        let (promise, completion) = completion::channel();
        let envelope = Self {
            id: InstructionId::new(),
            kind: I::KIND,
            body,
            token: None,
            promise,
        };
        (envelope, completion)
    }

    /// Diagnostic id of this instruction.
    pub fn id(&self) -> InstructionId {
        self.id
    }

    /// The instruction's kind.
    pub fn kind(&self) -> I::Kind {
        self.kind
    }

    /// The instruction's family.
    pub fn family(&self) -> FamilyOf<I> {
        <I::Kind as InstructionKind>::FAMILY
    }

    /// The typed body.
    pub fn body(&self) -> &I {
        &self.body
    }

    /// The token attached by the dispatcher, if any.
    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    /// Returns true if the attached token grants at least `minimum`.
    ///
    /// No token never authorizes.
    pub fn is_authorized(&self, minimum: AccessLevel) -> bool {
        self.token
            .as_ref()
            .is_some_and(|token| token.access_level().satisfies(minimum))
    }

    /// Returns true if the caller dropped its completion.
    pub fn is_abandoned(&self) -> bool {
        self.promise.is_abandoned()
    }

    /// Complete successfully.
    pub fn fulfill(self, output: I::Output) -> bool {
        self.promise.fulfill(output)
    }

    /// Complete with a failure.
    pub fn fail(self, error: InstructionError) -> bool {
        self.promise.fail(error)
    }

    /// Complete with a handler-level rejection.
    pub fn reject(self, reason: impl Into<String>) -> bool {
        self.promise.fail(InstructionError::rejected(reason))
    }

    /// Complete with a prepared result.
    pub fn complete(self, result: InstructionResult<I::Output>) -> bool {
        self.promise.complete(result)
    }

    /// Split into body, token and promise.
    ///
    /// Useful when the body moves to a worker and the promise is completed
    /// from there.
    pub fn into_parts(self) -> (I, Option<Token>, Promise<I::Output>) {
        (self.body, self.token, self.promise)
    }

    /// Erase the concrete type for submission through an entry point.
    pub fn boxed(self) -> Box<dyn AnyInstruction<FamilyOf<I>>> {
        Box::new(self)
    }
}

impl<I: Instruction> std::fmt::Debug for Envelope<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("has_token", &self.token.is_some())
            .finish_non_exhaustive()
    }
}

/// Type-erased instruction handle routed by the dispatcher.
///
/// This trait is implemented for every [`Envelope`]. Command sets downcast
/// [`AnyInstruction::kind`] to their kind enum, and typed handlers downcast
/// [`AnyInstruction::as_any`] to `Envelope<I>`. Both downcasts are checked;
/// a mismatch fails the instruction with
/// [`InstructionError::TypeMismatch`].
pub trait AnyInstruction<F>: Send {
    /// Diagnostic id.
    fn id(&self) -> InstructionId;

    /// Family the instruction is routed under.
    fn family(&self) -> F;

    /// The kind value, erased. Downcasts to the family's kind enum.
    fn kind(&self) -> &dyn Any;

    /// Name of the kind, for diagnostics.
    fn kind_name(&self) -> &'static str;

    /// Structural validation of the body.
    fn validate(&self) -> bool;

    /// The attached token, if any.
    fn token(&self) -> Option<&Token>;

    /// Replace the attached token.
    fn attach_token(&mut self, token: Option<Token>);

    /// Complete the instruction with a failure.
    fn fail(self: Box<Self>, error: InstructionError);

    /// Borrow as `Any` to test the concrete type.
    fn as_any(&self) -> &dyn Any;

    /// Convert into `Any` for downcasting to the concrete envelope.
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<I: Instruction> AnyInstruction<FamilyOf<I>> for Envelope<I> {
    fn id(&self) -> InstructionId {
        self.id
    }

    fn family(&self) -> FamilyOf<I> {
        <I::Kind as InstructionKind>::FAMILY
    }

    fn kind(&self) -> &dyn Any {
        &self.kind
    }

    fn kind_name(&self) -> &'static str {
        self.kind.name()
    }

    fn validate(&self) -> bool {
        self.body.validate()
    }

    fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    fn attach_token(&mut self, token: Option<Token>) {
        self.token = token;
    }

    fn fail(self: Box<Self>, error: InstructionError) {
        if !self.promise.fail(error) {
            tracing::debug!(
                instruction_id = %self.id,
                kind = self.kind.name(),
                instruction = type_name::<I>(),
                "failure dropped: completion no longer awaited"
            );
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}
