//! Core traits and identities for the instruction bus.
//!
//! # Overview
//!
//! Three type-level concepts describe every instruction that flows through
//! the bus:
//! - [`Family`] = a group of related instructions routed as a unit to one target
//! - [`InstructionKind`] = one enum per family, one variant per instruction
//! - [`Instruction`] = the typed body of a single instruction, with its result shape
//!
//! Kinds must be exhaustively enumerable. The [`instruction_kinds!`](crate::instruction_kinds)
//! macro declares the enum and its enumeration from one variant list, so the
//! per-family handler table can never miss a kind.

use std::fmt;
use std::hash::Hash;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A family of related instructions.
///
/// **Note**: This trait is automatically implemented for any type that is
/// `Copy + Eq + Hash + Debug + Send + Sync + 'static`. Application code
/// normally uses a plain enum.
///
/// # Example
///
/// ```ignore
/// #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// enum Subsystem {
///     SessionManager,
///     UserManagerAdmin,
///     DeviceManager,
/// }
/// // Family is automatically implemented!
/// ```
pub trait Family: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

// Blanket implementation for any type that meets the requirements
impl<T: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static> Family for T {}

/// The set of instruction kinds belonging to one family.
///
/// Implementations must list every variant in [`InstructionKind::all`]. The
/// handler table of an [`InstructionSet`](crate::InstructionSet) is built
/// from that list, so a variant missing from it cannot be bound later.
/// Prefer [`instruction_kinds!`](crate::instruction_kinds), which generates
/// the list from the enum declaration itself.
pub trait InstructionKind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// The family this kind belongs to.
    type Family: Family;

    /// The family value every kind of this type is routed under.
    const FAMILY: Self::Family;

    /// Every declared kind of the family.
    fn all() -> &'static [Self];

    /// Stable, human-readable name used in diagnostics and errors.
    fn name(&self) -> &'static str;
}

/// The typed body of one instruction.
///
/// Each concrete instruction names its kind and the result its handler
/// produces. Structural checks (non-empty strings, non-sentinel ids) go in
/// [`Instruction::validate`]; the dispatcher drops instructions that fail it
/// before they reach any handler.
///
/// # Example
///
/// ```ignore
/// struct Login {
///     user: String,
///     password: String,
/// }
///
/// impl Instruction for Login {
///     type Kind = SessionKind;
///     type Output = SessionId;
///     const KIND: SessionKind = SessionKind::Login;
///
///     fn validate(&self) -> bool {
///         !self.user.is_empty() && !self.password.is_empty()
///     }
/// }
/// ```
pub trait Instruction: Send + 'static {
    /// The kind enum of the family this instruction belongs to.
    type Kind: InstructionKind;

    /// The success payload delivered through the instruction's completion.
    type Output: Send + 'static;

    /// The kind of this instruction.
    const KIND: Self::Kind;

    /// Structural validation. Defaults to `true`.
    fn validate(&self) -> bool {
        true
    }
}

/// Shorthand for the family of an instruction type.
pub type FamilyOf<I> = <<I as Instruction>::Kind as InstructionKind>::Family;

/// Ordered capability level required to use a family of instructions.
///
/// `Invalid` is the "unset" sentinel and orders below every real level.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum AccessLevel {
    /// Not set.
    #[default]
    Invalid,
    /// Unauthenticated callers.
    Anonymous,
    /// Regular authenticated users.
    User,
    /// Operators with elevated rights.
    Operator,
    /// Full administrative rights.
    Admin,
}

impl AccessLevel {
    /// Returns true for every level except `Invalid`.
    pub fn is_valid(&self) -> bool {
        !matches!(self, AccessLevel::Invalid)
    }

    /// Returns true if this level satisfies `required`.
    ///
    /// An `Invalid` level never satisfies anything, and nothing satisfies an
    /// `Invalid` requirement.
    pub fn satisfies(self, required: AccessLevel) -> bool {
        self.is_valid() && required.is_valid() && self >= required
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessLevel::Invalid => write!(f, "invalid"),
            AccessLevel::Anonymous => write!(f, "anonymous"),
            AccessLevel::User => write!(f, "user"),
            AccessLevel::Operator => write!(f, "operator"),
            AccessLevel::Admin => write!(f, "admin"),
        }
    }
}

/// Dispatcher-issued identity of a registered source.
///
/// Identities are allocated monotonically starting at 1. `0` is reserved as
/// [`SourceId::INVALID`] and is never issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceId(u64);

impl SourceId {
    /// Sentinel value that no registered source ever carries.
    pub const INVALID: Self = Self(0);

    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Check if this is a real identity (not INVALID).
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }

    /// Get the raw value.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "source-{}", self.0)
        } else {
            write!(f, "INVALID")
        }
    }
}

/// Unique id carried by every envelope so diagnostics about one instruction
/// can be correlated across the source, dispatcher and handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstructionId(Uuid);

impl InstructionId {
    /// Create a new random instruction id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get a reference to the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for InstructionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for InstructionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for InstructionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Declares an instruction kind enum together with its [`InstructionKind`]
/// implementation.
///
/// The enumeration returned by `all()` and the names returned by `name()`
/// are generated from the same variant list as the enum, so they cannot
/// drift apart.
///
/// # Example
///
/// ```ignore
/// use instruction_bus::instruction_kinds;
///
/// #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// enum Subsystem { Sessions }
///
/// instruction_kinds! {
///     /// Session manager instructions.
///     pub enum SessionKind: Subsystem = Subsystem::Sessions {
///         Login,
///         Logout,
///         Refresh,
///     }
/// }
///
/// assert_eq!(SessionKind::all().len(), 3);
/// assert_eq!(SessionKind::Logout.name(), "Logout");
/// ```
#[macro_export]
macro_rules! instruction_kinds {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident : $family_ty:ty = $family:path {
            $( $(#[$variant_meta:meta])* $variant:ident ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $( $(#[$variant_meta])* $variant ),+
        }

        impl $crate::InstructionKind for $name {
            type Family = $family_ty;

            const FAMILY: $family_ty = $family;

            fn all() -> &'static [Self] {
                &[ $( $name::$variant ),+ ]
            }

            fn name(&self) -> &'static str {
                match self {
                    $( $name::$variant => stringify!($variant) ),+
                }
            }
        }
    };
}
