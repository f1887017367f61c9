//! Per-family handler tables.
//!
//! An [`InstructionSet`] maps every kind of one family to a handler. It is
//! built by the dispatcher with every kind pointing at the unbound
//! placeholder, handed to the owning target to populate, then frozen behind
//! an [`AnyInstructionSet`] handle for routing.
//!
//! # Lifecycle
//!
//! ```text
//! new() ──► target binds handlers ──► dispatch() … dispatch() ──► close()
//!  │        + sets access level            (concurrent)             │
//!  └ every kind = Unbound                                           └ table cleared,
//!                                                                     every later
//!                                                                     dispatch fails
//!                                                                     with Closed
//! ```

use std::any::type_name;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::core::{AccessLevel, Instruction, InstructionKind};
use crate::envelope::{AnyInstruction, Envelope};
use crate::error::{InstructionError, InstructionSetError};
use crate::interface::Token;

/// Type-erased handler stored in a set's table.
pub type ErasedHandler<F> = Arc<dyn Fn(Box<dyn AnyInstruction<F>>) + Send + Sync>;

/// One table entry.
enum Slot<F> {
    /// Placeholder: fails every instruction with `NotBound`.
    Unbound,
    Bound(ErasedHandler<F>),
}

impl<F> Clone for Slot<F> {
    fn clone(&self) -> Self {
        match self {
            Slot::Unbound => Slot::Unbound,
            Slot::Bound(handler) => Slot::Bound(handler.clone()),
        }
    }
}

/// Handler table for one instruction family.
///
/// # Example
///
/// ```ignore
/// let mut set = InstructionSet::<SessionKind>::new();
///
/// set.bind::<Login, _>(|envelope| {
///     let session = open_session(&envelope.body().user);
///     envelope.fulfill(session);
/// })?;
/// set.set_minimum_access_level(AccessLevel::Anonymous)?;
/// ```
pub struct InstructionSet<K: InstructionKind> {
    handlers: RwLock<HashMap<K, Slot<K::Family>>>,
    minimum_access_level: AccessLevel,
    closed: AtomicBool,
}

impl<K: InstructionKind> InstructionSet<K> {
    /// Create a set with every kind of the family bound to the placeholder.
    pub fn new() -> Self {
        let handlers = K::all()
            .iter()
            .map(|kind| (*kind, Slot::Unbound))
            .collect();
        Self {
            handlers: RwLock::new(handlers),
            minimum_access_level: AccessLevel::Invalid,
            closed: AtomicBool::new(false),
        }
    }

    /// Bind a typed handler for `I::KIND`, replacing any earlier binding.
    ///
    /// The handler receives the instruction as an [`Envelope`] and owns the
    /// obligation to complete it exactly once, now or later, on any thread.
    ///
    /// # Errors
    ///
    /// [`InstructionSetError::UnknownKind`] if the kind is missing from the
    /// table, which means `K::all()` does not list it.
    pub fn bind<I, H>(&mut self, handler: H) -> Result<(), InstructionSetError>
    where
        I: Instruction<Kind = K>,
        H: Fn(Envelope<I>) + Send + Sync + 'static,
    {
        let erased: ErasedHandler<K::Family> =
            Arc::new(move |instruction: Box<dyn AnyInstruction<K::Family>>| {
                if !instruction.as_any().is::<Envelope<I>>() {
                    instruction.fail(InstructionError::TypeMismatch {
                        expected: type_name::<I>(),
                    });
                    return;
                }
                if let Ok(envelope) = instruction.into_any().downcast::<Envelope<I>>() {
                    handler(*envelope);
                }
            });
        self.bind_erased(I::KIND, erased)
    }

    /// Bind an erased handler for `kind`.
    ///
    /// For targets that serve several kinds from one routine and do their own
    /// downcasting. Prefer [`InstructionSet::bind`].
    pub fn bind_erased(
        &mut self,
        kind: K,
        handler: ErasedHandler<K::Family>,
    ) -> Result<(), InstructionSetError> {
        let handlers = self
            .handlers
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        let slot = handlers
            .get_mut(&kind)
            .ok_or(InstructionSetError::UnknownKind { kind: kind.name() })?;
        *slot = Slot::Bound(handler);
        Ok(())
    }

    /// Assign the minimum access level. Only the first non-`Invalid` value sticks.
    ///
    /// # Errors
    ///
    /// [`InstructionSetError::AlreadySet`] if a level was assigned before.
    /// The existing level is left unchanged.
    pub fn set_minimum_access_level(&mut self, level: AccessLevel) -> Result<(), InstructionSetError> {
        if self.minimum_access_level.is_valid() {
            return Err(InstructionSetError::AlreadySet {
                current: self.minimum_access_level,
            });
        }
        self.minimum_access_level = level;
        Ok(())
    }

    /// The assigned minimum access level (`Invalid` if never set).
    pub fn minimum_access_level(&self) -> AccessLevel {
        self.minimum_access_level
    }

    /// Returns true if a real handler is bound for `kind`.
    pub fn is_bound(&self, kind: K) -> bool {
        matches!(self.read_handlers().get(&kind), Some(Slot::Bound(_)))
    }

    /// Kinds that have a real handler.
    pub fn bound_kinds(&self) -> Vec<K> {
        let handlers = self.read_handlers();
        K::all()
            .iter()
            .copied()
            .filter(|kind| matches!(handlers.get(kind), Some(Slot::Bound(_))))
            .collect()
    }

    /// Route one instruction to its handler.
    ///
    /// Attaches `token` and invokes the handler bound to the instruction's
    /// kind. Does not wait for the handler to complete the instruction.
    ///
    /// Fails the instruction with:
    /// - [`InstructionError::Closed`] once the set is closed
    /// - [`InstructionError::TypeMismatch`] if its kind belongs to another family type
    /// - [`InstructionError::NotBound`] if its kind still has the placeholder
    pub fn dispatch(&self, mut instruction: Box<dyn AnyInstruction<K::Family>>, token: Option<Token>) {
        if self.is_closed() {
            instruction.fail(InstructionError::Closed);
            return;
        }

        let Some(kind) = instruction.kind().downcast_ref::<K>().copied() else {
            instruction.fail(InstructionError::TypeMismatch {
                expected: type_name::<K>(),
            });
            return;
        };

        // Clone the entry out so the lock is not held while the handler runs.
        let slot = self.read_handlers().get(&kind).cloned();

        match slot {
            Some(Slot::Bound(handler)) => {
                instruction.attach_token(token);
                handler(instruction);
            }
            Some(Slot::Unbound) => instruction.fail(InstructionError::NotBound { kind: kind.name() }),
            // Table cleared by a concurrent close, or the kind is missing from K::all().
            None if self.is_closed() => instruction.fail(InstructionError::Closed),
            None => instruction.fail(InstructionError::NotBound { kind: kind.name() }),
        }
    }

    /// Close the set and discard its table. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.write_handlers().clear();
        debug!(
            family = ?K::FAMILY,
            kinds = type_name::<K>(),
            "instruction set closed"
        );
    }

    /// Returns true once [`InstructionSet::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Acquire the table for reading, recovering from poison if necessary.
    fn read_handlers(&self) -> RwLockReadGuard<'_, HashMap<K, Slot<K::Family>>> {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquire the table for writing, recovering from poison if necessary.
    fn write_handlers(&self) -> RwLockWriteGuard<'_, HashMap<K, Slot<K::Family>>> {
        self.handlers.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K: InstructionKind> Default for InstructionSet<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: InstructionKind> std::fmt::Debug for InstructionSet<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstructionSet")
            .field("family", &K::FAMILY)
            .field("bound_kinds", &self.bound_kinds())
            .field("minimum_access_level", &self.minimum_access_level)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Type-erased command set handle stored by the dispatcher.
///
/// Implemented by every [`InstructionSet`]; lets one registry hold sets of
/// different kind types that share a family type.
pub trait AnyInstructionSet<F>: Send + Sync {
    /// The family this set serves.
    fn family(&self) -> F;

    /// Route one instruction. See [`InstructionSet::dispatch`].
    fn dispatch(&self, instruction: Box<dyn AnyInstruction<F>>, token: Option<Token>);

    /// The assigned minimum access level.
    fn minimum_access_level(&self) -> AccessLevel;

    /// Close the set. See [`InstructionSet::close`].
    fn close(&self);

    /// Returns true once closed.
    fn is_closed(&self) -> bool;
}

impl<K: InstructionKind> AnyInstructionSet<K::Family> for InstructionSet<K> {
    fn family(&self) -> K::Family {
        K::FAMILY
    }

    fn dispatch(&self, instruction: Box<dyn AnyInstruction<K::Family>>, token: Option<Token>) {
        InstructionSet::dispatch(self, instruction, token)
    }

    fn minimum_access_level(&self) -> AccessLevel {
        InstructionSet::minimum_access_level(self)
    }

    fn close(&self) {
        InstructionSet::close(self)
    }

    fn is_closed(&self) -> bool {
        InstructionSet::is_closed(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticToken;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum TestFamily {
        Devices,
        Drift,
    }

    crate::instruction_kinds! {
        enum DeviceKind: TestFamily = TestFamily::Devices {
            Reboot,
            Rename,
            Wipe,
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum DriftKind {
        Listed,
        Forgotten,
    }

    // Hand-written enumeration that forgets a variant.
    impl InstructionKind for DriftKind {
        type Family = TestFamily;
        const FAMILY: TestFamily = TestFamily::Drift;

        fn all() -> &'static [Self] {
            &[DriftKind::Listed]
        }

        fn name(&self) -> &'static str {
            match self {
                DriftKind::Listed => "Listed",
                DriftKind::Forgotten => "Forgotten",
            }
        }
    }

    struct Reboot;
    impl Instruction for Reboot {
        type Kind = DeviceKind;
        type Output = ();
        const KIND: DeviceKind = DeviceKind::Reboot;
    }

    struct Rename {
        name: String,
    }
    impl Instruction for Rename {
        type Kind = DeviceKind;
        type Output = String;
        const KIND: DeviceKind = DeviceKind::Rename;
    }

    // Claims the Rename kind but is a different body type.
    struct ImpostorRename;
    impl Instruction for ImpostorRename {
        type Kind = DeviceKind;
        type Output = String;
        const KIND: DeviceKind = DeviceKind::Rename;
    }

    struct Wipe;
    impl Instruction for Wipe {
        type Kind = DeviceKind;
        type Output = ();
        const KIND: DeviceKind = DeviceKind::Wipe;
    }

    struct Forgotten;
    impl Instruction for Forgotten {
        type Kind = DriftKind;
        type Output = ();
        const KIND: DriftKind = DriftKind::Forgotten;
    }

    struct ListedDrift;
    impl Instruction for ListedDrift {
        type Kind = DriftKind;
        type Output = ();
        const KIND: DriftKind = DriftKind::Listed;
    }

    #[test]
    fn test_new_set_has_every_kind_unbound() {
        let set = InstructionSet::<DeviceKind>::new();
        assert!(set.bound_kinds().is_empty());
        for kind in DeviceKind::all() {
            assert!(!set.is_bound(*kind));
        }
        assert_eq!(set.minimum_access_level(), AccessLevel::Invalid);
        assert!(!set.is_closed());
    }

    /// Dispatch `body` to `set` and return the failure it completed with.
    fn failure_of<I>(set: &InstructionSet<DeviceKind>, body: I) -> Option<InstructionError>
    where
        I: Instruction<Kind = DeviceKind>,
    {
        let (envelope, mut completion) = Envelope::new(body);
        set.dispatch(envelope.boxed(), None);
        completion.try_take().and_then(|result| result.err())
    }

    #[test]
    fn test_every_unbound_kind_fails_with_not_bound() {
        let set = InstructionSet::<DeviceKind>::new();

        for kind in DeviceKind::all() {
            // Exhaustive so a new kind cannot be skipped
            let failure = match kind {
                DeviceKind::Reboot => failure_of(&set, Reboot),
                DeviceKind::Rename => failure_of(&set, Rename { name: "x".into() }),
                DeviceKind::Wipe => failure_of(&set, Wipe),
            };
            assert_eq!(
                failure,
                Some(InstructionError::NotBound { kind: kind.name() }),
                "kind {kind:?}"
            );
        }
    }

    #[test]
    fn test_bound_handler_completes_instruction() {
        let mut set = InstructionSet::<DeviceKind>::new();
        set.bind::<Rename, _>(|envelope| {
            let renamed = format!("device:{}", envelope.body().name);
            envelope.fulfill(renamed);
        })
        .unwrap();

        assert!(set.is_bound(DeviceKind::Rename));
        assert_eq!(set.bound_kinds(), vec![DeviceKind::Rename]);

        let (envelope, mut completion) = Envelope::new(Rename {
            name: "lamp".into(),
        });
        set.dispatch(envelope.boxed(), None);
        assert_eq!(completion.try_take(), Some(Ok("device:lamp".to_string())));
    }

    #[test]
    fn test_rebinding_last_write_wins() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let mut set = InstructionSet::<DeviceKind>::new();
        let counter = first.clone();
        set.bind::<Reboot, _>(move |envelope| {
            counter.fetch_add(1, Ordering::SeqCst);
            envelope.fulfill(());
        })
        .unwrap();
        let counter = second.clone();
        set.bind::<Reboot, _>(move |envelope| {
            counter.fetch_add(1, Ordering::SeqCst);
            envelope.fulfill(());
        })
        .unwrap();

        let (envelope, _completion) = Envelope::new(Reboot);
        set.dispatch(envelope.boxed(), None);

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_bind_unknown_kind_fails() {
        let mut set = InstructionSet::<DriftKind>::new();
        let result = set.bind::<Forgotten, _>(|envelope| {
            envelope.fulfill(());
        });
        assert_eq!(
            result,
            Err(InstructionSetError::UnknownKind { kind: "Forgotten" })
        );

        // The listed kind still binds
        assert!(set.bind::<ListedDrift, _>(|e| {
            e.fulfill(());
        })
        .is_ok());
    }

    #[test]
    fn test_dispatching_kind_missing_from_table_fails_not_bound() {
        let set = InstructionSet::<DriftKind>::new();
        let (envelope, mut completion) = Envelope::new(Forgotten);
        set.dispatch(envelope.boxed(), None);
        assert_eq!(
            completion.try_take(),
            Some(Err(InstructionError::NotBound { kind: "Forgotten" }))
        );
    }

    #[test]
    fn test_minimum_access_level_set_once() {
        let mut set = InstructionSet::<DeviceKind>::new();
        assert!(set.set_minimum_access_level(AccessLevel::Operator).is_ok());
        assert_eq!(set.minimum_access_level(), AccessLevel::Operator);

        let result = set.set_minimum_access_level(AccessLevel::Anonymous);
        assert_eq!(
            result,
            Err(InstructionSetError::AlreadySet {
                current: AccessLevel::Operator
            })
        );
        assert_eq!(set.minimum_access_level(), AccessLevel::Operator);
    }

    #[test]
    fn test_setting_invalid_leaves_level_assignable() {
        let mut set = InstructionSet::<DeviceKind>::new();
        assert!(set.set_minimum_access_level(AccessLevel::Invalid).is_ok());
        assert!(set.set_minimum_access_level(AccessLevel::User).is_ok());
        assert_eq!(set.minimum_access_level(), AccessLevel::User);
    }

    #[test]
    fn test_closed_set_fails_with_closed_not_handler_result() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut set = InstructionSet::<DeviceKind>::new();
        let counter = calls.clone();
        set.bind::<Reboot, _>(move |envelope| {
            counter.fetch_add(1, Ordering::SeqCst);
            envelope.fulfill(());
        })
        .unwrap();

        set.close();
        assert!(set.is_closed());
        assert!(set.bound_kinds().is_empty());

        let (envelope, mut completion) = Envelope::new(Reboot);
        set.dispatch(envelope.boxed(), None);
        assert_eq!(completion.try_take(), Some(Err(InstructionError::Closed)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_close_is_idempotent() {
        let set = InstructionSet::<DeviceKind>::new();
        set.close();
        set.close();
        assert!(set.is_closed());
    }

    #[test]
    fn test_dispatch_attaches_token() {
        let seen = Arc::new(Mutex::new(None));
        let mut set = InstructionSet::<DeviceKind>::new();
        let slot = seen.clone();
        set.bind::<Reboot, _>(move |envelope| {
            let subject = envelope.token().map(|t| t.subject().to_string());
            *slot.lock().unwrap() = subject;
            envelope.fulfill(());
        })
        .unwrap();

        let (envelope, _completion) = Envelope::new(Reboot);
        set.dispatch(
            envelope.boxed(),
            Some(StaticToken::shared("operator-7", AccessLevel::Operator)),
        );
        assert_eq!(seen.lock().unwrap().as_deref(), Some("operator-7"));
    }

    #[test]
    fn test_handler_type_mismatch_fails_instead_of_panicking() {
        let mut set = InstructionSet::<DeviceKind>::new();
        set.bind::<Rename, _>(|envelope| {
            envelope.fulfill("unreachable".into());
        })
        .unwrap();

        // Same kind, different body type
        let (envelope, mut completion) = Envelope::new(ImpostorRename);
        set.dispatch(envelope.boxed(), None);
        match completion.try_take() {
            Some(Err(InstructionError::TypeMismatch { expected })) => {
                assert!(expected.contains("Rename"));
            }
            other => panic!("Expected TypeMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_set_kind_mismatch_fails_instead_of_panicking() {
        // A DriftKind instruction presented to the DeviceKind set (same family type)
        let set = InstructionSet::<DeviceKind>::new();
        let (envelope, mut completion) = Envelope::new(ListedDrift);
        set.dispatch(envelope.boxed(), None);
        match completion.try_take() {
            Some(Err(InstructionError::TypeMismatch { expected })) => {
                assert!(expected.contains("DeviceKind"));
            }
            other => panic!("Expected TypeMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_erased_handler_serves_several_kinds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut set = InstructionSet::<DeviceKind>::new();

        for kind in [DeviceKind::Reboot, DeviceKind::Wipe] {
            let counter = calls.clone();
            set.bind_erased(
                kind,
                Arc::new(move |instruction: Box<dyn AnyInstruction<TestFamily>>| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    instruction.fail(InstructionError::rejected("maintenance window"));
                }),
            )
            .unwrap();
        }

        let (envelope, mut completion) = Envelope::new(Reboot);
        set.dispatch(envelope.boxed(), None);
        assert_eq!(
            completion.try_take(),
            Some(Err(InstructionError::rejected("maintenance window")))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(set.bound_kinds(), vec![DeviceKind::Reboot, DeviceKind::Wipe]);
    }

    #[test]
    fn test_deferred_completion_from_worker_thread() {
        let mut set = InstructionSet::<DeviceKind>::new();
        set.bind::<Rename, _>(|envelope| {
            std::thread::spawn(move || {
                let name = envelope.body().name.to_uppercase();
                envelope.fulfill(name);
            });
        })
        .unwrap();

        let (envelope, completion) = Envelope::new(Rename {
            name: "hub".into(),
        });
        set.dispatch(envelope.boxed(), None);
        assert_eq!(completion.blocking_wait(), Ok("HUB".to_string()));
    }

    #[test]
    fn test_erased_set_handle() {
        let mut set = InstructionSet::<DeviceKind>::new();
        set.set_minimum_access_level(AccessLevel::Admin).unwrap();
        set.bind::<Reboot, _>(|envelope| {
            envelope.fulfill(());
        })
        .unwrap();

        let erased: Arc<dyn AnyInstructionSet<TestFamily>> = Arc::new(set);
        assert_eq!(erased.family(), TestFamily::Devices);
        assert_eq!(erased.minimum_access_level(), AccessLevel::Admin);

        let (envelope, mut completion) = Envelope::new(Reboot);
        erased.dispatch(envelope.boxed(), None);
        assert_eq!(completion.try_take(), Some(Ok(())));

        erased.close();
        assert!(erased.is_closed());
    }
}
