//! The dispatcher: registration, then routing.
//!
//! ```text
//!   DispatcherBuilder (single-threaded, &mut self)
//!     register_target ──► InstructionSet per family
//!     register_source ──► SourceId + EntryPoint handed to the source
//!          │
//!        build()
//!          ▼
//!   Dispatcher (Clone, Send + Sync)        EntryPoint::submit / send
//!     immutable routing table  ◄────────────────┘
//!          │ validate → source known → family allowed → set registered
//!          ▼
//!   InstructionSet::dispatch ──► handler ──► Promise
//! ```
//!
//! Entry points are handed out during registration but only route once the
//! builder has been turned into a [`Dispatcher`]. Anything submitted earlier
//! is rejected as [`RouteRejection::NotStarted`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::debug;

use crate::completion::Completion;
use crate::config::DispatcherConfig;
use crate::core::{AccessLevel, Family, Instruction, InstructionKind, SourceId};
use crate::diagnostics::{Diagnostics, Severity};
use crate::envelope::{AnyInstruction, Envelope};
use crate::error::{RegistrationError, RouteRejection};
use crate::interface::{InstructionSource, InstructionTarget, Token};
use crate::set::{AnyInstructionSet, InstructionSet};

/// Sealed routing state, written once by [`DispatcherBuilder::build`].
struct RoutingTable<F: Family> {
    sets: HashMap<F, Arc<dyn AnyInstructionSet<F>>>,
    sources: HashMap<SourceId, HashSet<F>>,
}

/// State shared by the builder, the dispatcher and every entry point.
struct Shared<F: Family> {
    config: DispatcherConfig<F>,
    diagnostics: Diagnostics,
    table: OnceLock<RoutingTable<F>>,
}

impl<F: Family> Shared<F> {
    fn route(&self, source_id: SourceId, instruction: Box<dyn AnyInstruction<F>>, token: Option<Token>) {
        let family = instruction.family();

        if !instruction.validate() {
            self.reject(
                &*instruction,
                source_id,
                RouteRejection::InvalidInstruction {
                    kind: instruction.kind_name(),
                },
            );
            return;
        }

        let Some(table) = self.table.get() else {
            self.reject(&*instruction, source_id, RouteRejection::NotStarted);
            return;
        };

        let Some(allowed) = table.sources.get(&source_id) else {
            self.reject(&*instruction, source_id, RouteRejection::UnknownSource { source_id });
            return;
        };

        if !allowed.contains(&family) {
            self.reject(
                &*instruction,
                source_id,
                RouteRejection::FamilyNotAllowed { source_id, family },
            );
            return;
        }

        let Some(set) = table.sets.get(&family) else {
            self.reject(&*instruction, source_id, RouteRejection::NoTargetForFamily { family });
            return;
        };

        debug!(
            %source_id,
            ?family,
            kind = instruction.kind_name(),
            instruction_id = %instruction.id(),
            "routing instruction"
        );
        set.dispatch(instruction, token);
    }

    /// Report a refused instruction. The instruction is dropped by the
    /// caller afterwards without being completed.
    fn reject(&self, instruction: &dyn AnyInstruction<F>, source_id: SourceId, rejection: RouteRejection<F>) {
        let severity = match rejection {
            RouteRejection::InvalidInstruction { .. } | RouteRejection::FamilyNotAllowed { .. } => {
                Severity::Warning
            }
            RouteRejection::NotStarted
            | RouteRejection::UnknownSource { .. }
            | RouteRejection::NoTargetForFamily { .. } => Severity::Error,
        };
        self.diagnostics.emit(
            severity,
            &format!(
                "dropping instruction {} ({}) from {}: {}",
                instruction.id(),
                instruction.kind_name(),
                source_id,
                rejection
            ),
        );
    }

    fn minimum_access_level_for(&self, family: F) -> AccessLevel {
        self.table
            .get()
            .and_then(|table| table.sets.get(&family))
            .map(|set| set.minimum_access_level())
            .unwrap_or(AccessLevel::Invalid)
    }
}

/// Registration phase of a dispatcher.
///
/// # Example
///
/// ```ignore
/// let config = DispatcherConfig::new([Subsystem::Sessions, Subsystem::Devices]);
/// let mut builder = DispatcherBuilder::new(config);
/// builder.register_logging_handler(|severity, message| eprintln!("[{severity}] {message}"));
///
/// builder.register_target(&mut session_manager)?;
/// builder.register_target(&mut device_manager)?;
/// builder.register_source(&mut web_frontend)?;
///
/// let dispatcher = builder.build();
/// ```
pub struct DispatcherBuilder<F: Family> {
    shared: Arc<Shared<F>>,
    sets: HashMap<F, Arc<dyn AnyInstructionSet<F>>>,
    sources: HashMap<SourceId, HashSet<F>>,
    last_source_id: u64,
}

impl<F: Family> DispatcherBuilder<F> {
    pub fn new(config: DispatcherConfig<F>) -> Self {
        let diagnostics = Diagnostics::new(config.trace_diagnostics());
        Self {
            shared: Arc::new(Shared {
                config,
                diagnostics,
                table: OnceLock::new(),
            }),
            sets: HashMap::new(),
            sources: HashMap::new(),
            last_source_id: 0,
        }
    }

    /// Install the side-channel log handler.
    ///
    /// Returns false if a handler was already installed, on either the
    /// builder or the built dispatcher.
    pub fn register_logging_handler<H>(&self, handler: H) -> bool
    where
        H: Fn(Severity, &str) + Send + Sync + 'static,
    {
        self.shared.diagnostics.register_handler(Box::new(handler))
    }

    /// Register the target that owns one family's instruction set.
    ///
    /// The dispatcher creates the set, lets the target bind its handlers and
    /// keeps the set if the target accepts. Every failure is also logged.
    pub fn register_target<T>(&mut self, target: &mut T) -> Result<(), RegistrationError<F>>
    where
        T: InstructionTarget<F>,
    {
        let family = target.family();
        let declared = <T::Kind as InstructionKind>::FAMILY;

        if !self.shared.config.allows(family) {
            return Err(self.registration_failed(RegistrationError::FamilyNotAllowed { family }));
        }
        if self.sets.contains_key(&family) {
            return Err(self.registration_failed(RegistrationError::AlreadyRegistered { family }));
        }
        if family != declared {
            return Err(self.registration_failed(RegistrationError::FamilyMismatch {
                reported: family,
                declared,
            }));
        }

        let mut set = InstructionSet::<T::Kind>::new();
        if !target.register_instruction_set(&mut set) {
            return Err(self.registration_failed(RegistrationError::TargetDeclined { family }));
        }

        let level = set.minimum_access_level();
        if !level.is_valid() {
            self.shared.diagnostics.emit(
                Severity::Warning,
                &format!("target for family {family:?} registered without a minimum access level"),
            );
        }
        self.shared.diagnostics.emit(
            Severity::Info,
            &format!(
                "registered target for family {family:?} ({} of {} kinds bound, minimum access level {level})",
                set.bound_kinds().len(),
                <T::Kind as InstructionKind>::all().len(),
            ),
        );
        self.sets.insert(family, Arc::new(set));
        Ok(())
    }

    /// Register a source and hand it an entry point.
    ///
    /// Returns the identity allocated to the source. Identities start at 1
    /// and are never reused, even when the source declines.
    pub fn register_source<S>(&mut self, source: &mut S) -> Result<SourceId, RegistrationError<F>>
    where
        S: InstructionSource<F>,
    {
        let families = source.required_families();
        if families.is_empty() {
            return Err(self.registration_failed(RegistrationError::NoRequiredFamilies));
        }
        if let Some(family) = families.iter().copied().find(|f| !self.shared.config.allows(*f)) {
            return Err(self.registration_failed(RegistrationError::FamilyNotAllowed { family }));
        }

        self.last_source_id += 1;
        let source_id = SourceId::new(self.last_source_id);
        let entry_point = EntryPoint {
            source_id,
            shared: self.shared.clone(),
        };

        if !source.register_handler(entry_point) {
            return Err(self.registration_failed(RegistrationError::SourceDeclined { source_id }));
        }

        self.shared.diagnostics.emit(
            Severity::Info,
            &format!("registered {source_id} for families {families:?}"),
        );
        self.sources.insert(source_id, families);
        Ok(source_id)
    }

    /// Minimum access level of a registered family, `Invalid` otherwise.
    pub fn minimum_access_level_for(&self, family: F) -> AccessLevel {
        self.sets
            .get(&family)
            .map(|set| set.minimum_access_level())
            .unwrap_or(AccessLevel::Invalid)
    }

    /// Families that have a registered target.
    pub fn registered_families(&self) -> HashSet<F> {
        self.sets.keys().copied().collect()
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn is_family_allowed(&self, family: F) -> bool {
        self.shared.config.allows(family)
    }

    /// Seal the registrations and start routing.
    ///
    /// Keep the returned [`Dispatcher`]: dropping its last handle closes
    /// every instruction set.
    #[must_use = "dropping the dispatcher closes every instruction set"]
    pub fn build(self) -> Dispatcher<F> {
        let table = RoutingTable {
            sets: self.sets,
            sources: self.sources,
        };
        let families = table.sets.len();
        let sources = table.sources.len();

        // The builder is the only writer and is consumed here.
        let sealed = self.shared.table.set(table).is_ok();
        debug_assert!(sealed, "routing table sealed twice");

        self.shared.diagnostics.emit(
            Severity::Info,
            &format!("dispatcher started with {families} families and {sources} sources"),
        );

        Dispatcher {
            inner: Arc::new(DispatcherInner {
                shared: self.shared,
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    fn registration_failed(&self, error: RegistrationError<F>) -> RegistrationError<F> {
        let severity = match error {
            RegistrationError::TargetDeclined { .. } | RegistrationError::SourceDeclined { .. } => {
                Severity::Warning
            }
            _ => Severity::Error,
        };
        self.shared
            .diagnostics
            .emit(severity, &format!("registration failed: {error}"));
        error
    }
}

impl<F: Family> std::fmt::Debug for DispatcherBuilder<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherBuilder")
            .field("allowed_families", self.shared.config.families())
            .field("registered_families", &self.sets.keys().collect::<Vec<_>>())
            .field("sources", &self.sources.len())
            .finish_non_exhaustive()
    }
}

struct DispatcherInner<F: Family> {
    shared: Arc<Shared<F>>,
    shut_down: AtomicBool,
}

impl<F: Family> DispatcherInner<F> {
    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(table) = self.shared.table.get() else {
            return;
        };
        for set in table.sets.values() {
            set.close();
        }
        self.shared.diagnostics.emit(
            Severity::Info,
            &format!("dispatcher shut down, closed {} instruction sets", table.sets.len()),
        );
    }
}

impl<F: Family> Drop for DispatcherInner<F> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Routing phase of a dispatcher.
///
/// Cheap to clone. Dropping the last handle shuts the dispatcher down:
/// every instruction set is closed, and instructions still submitted
/// through surviving entry points complete with
/// [`InstructionError::Closed`](crate::InstructionError::Closed).
#[must_use = "dropping the last dispatcher handle closes every instruction set"]
pub struct Dispatcher<F: Family> {
    inner: Arc<DispatcherInner<F>>,
}

impl<F: Family> Clone for Dispatcher<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<F: Family> Dispatcher<F> {
    /// Close every registered instruction set. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Install the side-channel log handler if none was installed during
    /// registration.
    pub fn register_logging_handler<H>(&self, handler: H) -> bool
    where
        H: Fn(Severity, &str) + Send + Sync + 'static,
    {
        self.inner.shared.diagnostics.register_handler(Box::new(handler))
    }

    /// Minimum access level of a registered family, `Invalid` otherwise.
    pub fn minimum_access_level_for(&self, family: F) -> AccessLevel {
        self.inner.shared.minimum_access_level_for(family)
    }

    /// Families that have a registered target.
    pub fn registered_families(&self) -> HashSet<F> {
        self.table()
            .map(|table| table.sets.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn source_count(&self) -> usize {
        self.table().map(|table| table.sources.len()).unwrap_or(0)
    }

    pub fn is_family_allowed(&self, family: F) -> bool {
        self.inner.shared.config.allows(family)
    }

    /// Families a registered source may submit.
    pub fn allowed_families(&self, source_id: SourceId) -> Option<&HashSet<F>> {
        self.table().and_then(|table| table.sources.get(&source_id))
    }

    pub fn config(&self) -> &DispatcherConfig<F> {
        &self.inner.shared.config
    }

    fn table(&self) -> Option<&RoutingTable<F>> {
        self.inner.shared.table.get()
    }
}

impl<F: Family> std::fmt::Debug for Dispatcher<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registered_families", &self.registered_families())
            .field("sources", &self.source_count())
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

/// A source's bound handle into the dispatcher.
///
/// Every instruction submitted through an entry point is routed on behalf
/// of the source it was issued to.
pub struct EntryPoint<F: Family> {
    source_id: SourceId,
    shared: Arc<Shared<F>>,
}

impl<F: Family> Clone for EntryPoint<F> {
    fn clone(&self) -> Self {
        Self {
            source_id: self.source_id,
            shared: self.shared.clone(),
        }
    }
}

impl<F: Family> EntryPoint<F> {
    /// The identity this entry point submits under.
    pub fn source_id(&self) -> SourceId {
        self.source_id
    }

    /// Submit an erased instruction.
    ///
    /// Returns immediately. Rejected instructions are logged and dropped
    /// without completing.
    pub fn submit(&self, instruction: Box<dyn AnyInstruction<F>>, token: Option<Token>) {
        self.shared.route(self.source_id, instruction, token);
    }

    /// Wrap `body` in an envelope, submit it and return its completion.
    pub fn send<I>(&self, body: I, token: Option<Token>) -> Completion<I::Output>
    where
        I: Instruction,
        I::Kind: InstructionKind<Family = F>,
    {
        let (envelope, completion) = Envelope::new(body);
        self.submit(envelope.boxed(), token);
        completion
    }

    /// Minimum access level of a registered family, `Invalid` before the
    /// dispatcher is built or when the family has no target.
    pub fn minimum_access_level_for(&self, family: F) -> AccessLevel {
        self.shared.minimum_access_level_for(family)
    }
}

impl<F: Family> std::fmt::Debug for EntryPoint<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryPoint")
            .field("source_id", &self.source_id)
            .finish_non_exhaustive()
    }
}
