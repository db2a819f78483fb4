//! Events emitted by the host interpreter.
//!
//! Each variant carries the data that cannot be recovered by querying the
//! [`Host`](crate::host::Host) afterwards: identities of the objects
//! involved and values that only exist for the duration of the callback.

use serde::{Deserialize, Serialize};

use crate::host::FunctionKind;
use crate::ids::{CallId, ScopeId, ThunkId, Timestamp};
use crate::ledger::CapabilityArgs;
use crate::scope::AccessKind;

/// A formal argument bound to a thunk at call entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgumentBinding {
    pub thunk: ThunkId,
    pub formal_position: u32,
    pub name: String,
    pub birth_time: Timestamp,
}

/// A value produced by a call or a forced thunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueInfo {
    /// Host type name of the value.
    pub type_name: String,
    /// Set when the value is itself a scope.
    pub scope: Option<ScopeId>,
}

impl ValueInfo {
    #[must_use]
    pub fn of_type(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            scope: None,
        }
    }

    #[must_use]
    pub fn scope(scope: ScopeId) -> Self {
        Self {
            type_name: "environment".to_string(),
            scope: Some(scope),
        }
    }
}

/// Use of a reflective capability (frame introspection, scope conversion,
/// locking, parent rewiring, ...). Emitted when the capability returns,
/// while its own call frame is still on the stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityUse {
    pub name: String,
    /// Host frame depth at the call.
    pub depth: Option<u32>,
    pub result: Option<ValueInfo>,
    /// Scope arguments, in argument order.
    pub arg_scopes: [Option<ScopeId>; 2],
    pub args: CapabilityArgs,
    /// True if the capability mutates the scope it targets.
    pub mutating: bool,
    /// `Some(true)` for lock, `Some(false)` for unlock of the first argument scope.
    pub lock: Option<bool>,
}

impl CapabilityUse {
    /// A non-mutating use with no arguments and no result.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            depth: None,
            result: None,
            arg_scopes: [None; 2],
            args: CapabilityArgs::default(),
            mutating: false,
            lock: None,
        }
    }

    /// The scope the capability acts on: its first argument scope, else
    /// the scope it returned.
    #[must_use]
    pub fn target(&self) -> Option<ScopeId> {
        self.arg_scopes[0].or_else(|| self.result.as_ref().and_then(|r| r.scope))
    }
}

/// Explicit construction of a new scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeConstruction {
    pub scope: ScopeId,
    pub constructor: String,
    pub hashed: Option<bool>,
    pub parent: Option<ScopeId>,
    pub size: Option<i64>,
    pub frame_count: Option<u32>,
}

/// One host event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum TraceEvent {
    SessionStart,
    SessionEnd,
    PackageLoad {
        scope: ScopeId,
    },
    PackageAttach {
        scope: ScopeId,
    },
    CallEntry {
        call: CallId,
        function: FunctionKind,
        name: String,
        scope: ScopeId,
        arguments: Vec<ArgumentBinding>,
        /// Thunks in actual-argument order; `None` for eager arguments.
        actuals: Vec<Option<ThunkId>>,
    },
    CallExit {
        call: CallId,
        function: FunctionKind,
        name: String,
        scope: ScopeId,
        result: Option<ValueInfo>,
    },
    ThunkForceEntry {
        thunk: ThunkId,
    },
    ThunkForceExit {
        thunk: ThunkId,
        value: Option<ValueInfo>,
    },
    ThunkValueLookup {
        thunk: ThunkId,
    },
    ThunkExpressionLookup {
        thunk: ThunkId,
    },
    /// The thunk's expression was taken unevaluated by a quoting builtin.
    ThunkSubstitute {
        thunk: ThunkId,
    },
    ScopeAccess {
        kind: AccessKind,
        scope: ScopeId,
        symbol: Option<String>,
        value_type: Option<String>,
    },
    AttributeSet {
        scope: ScopeId,
        attribute: String,
        /// Attribute values; `None` for missing entries.
        values: Vec<Option<String>>,
    },
    Allocation {
        scope: ScopeId,
    },
    DispatchEntry {
        scope: ScopeId,
    },
    EvalEntry {
        scope: ScopeId,
        expression: String,
    },
    EvalExit {
        scope: ScopeId,
    },
    Error,
    CapabilityUse(CapabilityUse),
    ScopeConstruction(ScopeConstruction),
}

impl TraceEvent {
    /// Short name for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SessionStart => "session_start",
            Self::SessionEnd => "session_end",
            Self::PackageLoad { .. } => "package_load",
            Self::PackageAttach { .. } => "package_attach",
            Self::CallEntry { .. } => "call_entry",
            Self::CallExit { .. } => "call_exit",
            Self::ThunkForceEntry { .. } => "thunk_force_entry",
            Self::ThunkForceExit { .. } => "thunk_force_exit",
            Self::ThunkValueLookup { .. } => "thunk_value_lookup",
            Self::ThunkExpressionLookup { .. } => "thunk_expression_lookup",
            Self::ThunkSubstitute { .. } => "thunk_substitute",
            Self::ScopeAccess { .. } => "scope_access",
            Self::AttributeSet { .. } => "attribute_set",
            Self::Allocation { .. } => "allocation",
            Self::DispatchEntry { .. } => "dispatch_entry",
            Self::EvalEntry { .. } => "eval_entry",
            Self::EvalExit { .. } => "eval_exit",
            Self::Error => "error",
            Self::CapabilityUse(_) => "capability_use",
            Self::ScopeConstruction(_) => "scope_construction",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_target_prefers_argument() {
        let mut cap = CapabilityUse::new("parent.env");
        cap.result = Some(ValueInfo::scope(ScopeId::new(2)));
        assert_eq!(cap.target(), Some(ScopeId::new(2)));

        cap.arg_scopes[0] = Some(ScopeId::new(1));
        assert_eq!(cap.target(), Some(ScopeId::new(1)));

        cap.result = Some(ValueInfo::of_type("integer"));
        cap.arg_scopes[0] = None;
        assert_eq!(cap.target(), None);
    }

    #[test]
    fn test_event_json_shape() {
        let event = TraceEvent::ThunkForceEntry {
            thunk: ThunkId::new(4),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "thunk_force_entry");
        assert_eq!(json["thunk"], 4);
        assert_eq!(event.name(), "thunk_force_entry");
    }
}
