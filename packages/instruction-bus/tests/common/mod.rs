// Common test utilities

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use instruction_bus::testing::RecordingLog;
use instruction_bus::{
    instruction_kinds, AccessLevel, DispatcherBuilder, DispatcherConfig, EntryPoint, Instruction,
    InstructionSet, InstructionSource, InstructionTarget,
};

/// Initialize a tracing subscriber that respects RUST_LOG.
///
/// Run tests with: RUST_LOG=instruction_bus=debug cargo test -- --nocapture
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Test,
    Other,
}

instruction_kinds! {
    pub enum TestKind: Family = Family::Test {
        K1,
        K2,
        K3,
    }
}

pub struct K1;

impl Instruction for K1 {
    type Kind = TestKind;
    type Output = ();
    const KIND: TestKind = TestKind::K1;
}

pub struct K2(pub String);

impl Instruction for K2 {
    type Kind = TestKind;
    type Output = ();
    const KIND: TestKind = TestKind::K2;

    fn validate(&self) -> bool {
        !self.0.is_empty()
    }
}

pub struct K3(pub i64);

impl Instruction for K3 {
    type Kind = TestKind;
    type Output = ();
    const KIND: TestKind = TestKind::K3;

    fn validate(&self) -> bool {
        self.0 > 0
    }
}

/// Target for the Test family: each kind bumps its own counter.
#[derive(Default)]
pub struct CounterTarget {
    pub a: Arc<AtomicUsize>,
    pub b: Arc<AtomicUsize>,
    pub c: Arc<AtomicUsize>,
}

impl CounterTarget {
    pub fn counts(&self) -> (usize, usize, usize) {
        (
            self.a.load(Ordering::SeqCst),
            self.b.load(Ordering::SeqCst),
            self.c.load(Ordering::SeqCst),
        )
    }
}

impl InstructionTarget<Family> for CounterTarget {
    type Kind = TestKind;

    fn register_instruction_set(&mut self, set: &mut InstructionSet<TestKind>) -> bool {
        let a = self.a.clone();
        let b = self.b.clone();
        let c = self.c.clone();
        set.bind::<K1, _>(move |envelope| {
            a.fetch_add(1, Ordering::SeqCst);
            envelope.fulfill(());
        })
        .is_ok()
            && set
                .bind::<K2, _>(move |envelope| {
                    b.fetch_add(1, Ordering::SeqCst);
                    envelope.fulfill(());
                })
                .is_ok()
            && set
                .bind::<K3, _>(move |envelope| {
                    c.fetch_add(1, Ordering::SeqCst);
                    envelope.fulfill(());
                })
                .is_ok()
            && set.set_minimum_access_level(AccessLevel::User).is_ok()
    }
}

/// Source that keeps its entry point.
pub struct Client {
    families: HashSet<Family>,
    entry: Option<EntryPoint<Family>>,
}

impl Client {
    pub fn new(families: impl IntoIterator<Item = Family>) -> Self {
        Self {
            families: families.into_iter().collect(),
            entry: None,
        }
    }

    pub fn entry(&self) -> &EntryPoint<Family> {
        self.entry.as_ref().expect("client was not registered")
    }
}

impl InstructionSource<Family> for Client {
    fn required_families(&self) -> HashSet<Family> {
        self.families.clone()
    }

    fn register_handler(&mut self, entry_point: EntryPoint<Family>) -> bool {
        self.entry = Some(entry_point);
        true
    }
}

/// Builder for both families with a recording log installed.
pub fn builder() -> (DispatcherBuilder<Family>, RecordingLog) {
    init_tracing();
    let log = RecordingLog::new();
    let builder = DispatcherBuilder::new(DispatcherConfig::new([Family::Test, Family::Other]));
    builder.register_logging_handler(log.handler());
    (builder, log)
}
