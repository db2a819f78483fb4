//! Identity types for traced runtime objects.
//!
//! Every scope, call activation, closure and thunk is identified by an
//! integer assigned once by the host. The tracer never mints these values;
//! it only correlates them. Wrapping each in its own newtype keeps a
//! `CallId` from ever being used where a `ThunkId` is expected.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Wraps a host-assigned identity.
            #[must_use]
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// Returns the raw host identity.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id!(
    /// Identity of a lexical binding frame.
    ScopeId,
    "scope#"
);

define_id!(
    /// Identity of one call activation.
    CallId,
    "call#"
);

define_id!(
    /// Identity of a closure (function value).
    ClosureId,
    "closure#"
);

define_id!(
    /// Identity of a suspended lazy value.
    ///
    /// One thunk may be visible through several call activations, so a
    /// `ThunkId` alone does not name a thunk record; see
    /// [`ThunkKey`](crate::thunk::ThunkKey).
    ThunkId,
    "thunk#"
);

/// Position on the host's single global logical clock.
///
/// The host increments the clock monotonically; the tracer only compares
/// timestamps and never derives wall-clock time from them.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The origin of the logical clock.
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn new(tick: u64) -> Self {
        Self(tick)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The timestamp one tick later.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

impl From<u64> for Timestamp {
    fn from(tick: u64) -> Self {
        Self(tick)
    }
}

/// Identifier of one tracing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    /// Creates a new random session ID.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
