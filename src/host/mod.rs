//! Boundary to the host interpreter.
//!
//! The tracer never inspects runtime objects directly. Every handler receives
//! a [`Host`] it can query for the clock, the live stack and scope handles.
//! [`SimulatedHost`] is an in-memory implementation for tests and benchmarks.

mod simulated;

use serde::{Deserialize, Serialize};

use crate::ids::{CallId, ClosureId, ScopeId, ThunkId, Timestamp};
use crate::scope::ScopeKind;

pub use simulated::SimulatedHost;

/// The callee of a call frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionKind {
    /// A user or package closure.
    Closure(ClosureId),
    /// A builtin primitive (arguments evaluated eagerly).
    Builtin,
    /// A special primitive (arguments unevaluated).
    Special,
}

impl FunctionKind {
    /// The closure identity, for closure calls.
    #[must_use]
    pub const fn closure(self) -> Option<ClosureId> {
        match self {
            Self::Closure(id) => Some(id),
            Self::Builtin | Self::Special => None,
        }
    }
}

/// A call activation on the live stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallFrame {
    pub call_id: CallId,
    pub function: FunctionKind,
    pub name: String,
    /// Name of the scope the callee was defined in, if it has one.
    pub package: Option<String>,
    /// Frame scope of the activation (the caller's scope for primitives).
    pub scope: ScopeId,
}

impl CallFrame {
    /// The closure identity if this is a closure call.
    #[must_use]
    pub const fn closure(&self) -> Option<ClosureId> {
        self.function.closure()
    }
}

/// A thunk being forced on the live stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThunkFrame {
    pub thunk_id: ThunkId,
    pub birth_time: Timestamp,
    pub force_entry_time: Timestamp,
    /// False for thunks that are not call arguments (e.g. delayed bindings).
    pub is_argument: bool,
    /// Scope the thunk's expression is evaluated in.
    pub scope: Option<ScopeId>,
}

/// One frame of the live stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frame {
    Call(CallFrame),
    Thunk(ThunkFrame),
}

impl Frame {
    #[must_use]
    pub const fn as_call(&self) -> Option<&CallFrame> {
        match self {
            Self::Call(call) => Some(call),
            Self::Thunk(_) => None,
        }
    }

    #[must_use]
    pub const fn as_thunk(&self) -> Option<&ThunkFrame> {
        match self {
            Self::Thunk(thunk) => Some(thunk),
            Self::Call(_) => None,
        }
    }

    /// The frame as a closure call, skipping primitives.
    #[must_use]
    pub fn as_closure_call(&self) -> Option<(&CallFrame, ClosureId)> {
        let call = self.as_call()?;
        call.closure().map(|closure| (call, closure))
    }

    /// The frame as an argument thunk, skipping other thunks.
    #[must_use]
    pub fn as_argument_thunk(&self) -> Option<&ThunkFrame> {
        self.as_thunk().filter(|thunk| thunk.is_argument)
    }
}

/// Snapshot of a host scope object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeHandle {
    pub id: ScopeId,
    pub kind: ScopeKind,
    pub name: Option<String>,
    pub hashed: bool,
    pub parent: Option<ScopeId>,
    pub call_id: Option<CallId>,
    pub birth_time: Timestamp,
    pub locked: Option<bool>,
}

impl ScopeHandle {
    /// A handle with no name, parent or owning call.
    #[must_use]
    pub const fn new(id: ScopeId, kind: ScopeKind, birth_time: Timestamp) -> Self {
        Self {
            id,
            kind,
            name: None,
            hashed: false,
            parent: None,
            call_id: None,
            birth_time,
            locked: None,
        }
    }
}

/// A binding whose value is itself a scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeBinding {
    pub name: String,
    pub scope: ScopeId,
}

/// Queries the tracer may issue against the host interpreter.
///
/// Stack index 0 is the innermost frame. Implementations only need to
/// answer consistently for the duration of one event callback.
pub trait Host {
    /// Current value of the logical clock.
    fn time(&self) -> Timestamp;

    /// Number of frames on the live stack.
    fn stack_size(&self) -> usize;

    /// Frame at `index`, counting outward from the innermost.
    fn frame(&self, index: usize) -> Option<&Frame>;

    /// Handle for a scope, or `None` if the host does not know it.
    fn scope(&self, id: ScopeId) -> Option<ScopeHandle>;

    /// Scope-valued bindings of a scope.
    fn scope_bindings(&self, id: ScopeId) -> Vec<ScopeBinding>;

    /// Loaded package namespaces.
    fn namespaces(&self) -> Vec<ScopeId>;

    /// Attached package export scopes.
    fn packages(&self) -> Vec<ScopeId>;

    fn global_scope(&self) -> ScopeId;

    fn empty_scope(&self) -> ScopeId;
}

/// Outward iterator over the live stack, yielding `(index, frame)`.
pub struct Frames<'a, H: ?Sized> {
    host: &'a H,
    index: usize,
}

impl<'a, H: Host + ?Sized> Iterator for Frames<'a, H> {
    type Item = (usize, &'a Frame);

    fn next(&mut self) -> Option<Self::Item> {
        let frame = self.host.frame(self.index)?;
        let index = self.index;
        self.index += 1;
        Some((index, frame))
    }
}

/// Iterates the live stack from index `from` outward.
pub fn frames_from<H: Host + ?Sized>(host: &H, from: usize) -> Frames<'_, H> {
    Frames { host, index: from }
}
