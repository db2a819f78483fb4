//! Call activation records.

use serde::{Deserialize, Serialize};

use crate::ids::{CallId, ClosureId, ScopeId, Timestamp};

/// How a call activation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallExit {
    /// Clock value at exit.
    pub time: Timestamp,
    /// Type name of the returned value, if the call produced one.
    pub result_type: Option<String>,
}

/// One invocation of a closure.
///
/// Created at call entry, finalized at call exit and kept for the rest of
/// the session so that thunks forced after the call returned can still be
/// correlated with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallActivation {
    /// Host-assigned activation identity.
    pub id: CallId,
    /// The closure being invoked.
    pub closure_id: ClosureId,
    /// Closure name as reported at entry.
    pub name: String,
    /// The activation's own frame scope.
    pub scope: ScopeId,
    /// Clock value at entry.
    pub entry_time: Timestamp,
    exit: Option<CallExit>,
    force_position: u32,
    forced: Vec<u32>,
    escaped_scope: bool,
}

impl CallActivation {
    /// Creates a live activation.
    #[must_use]
    pub fn new(
        id: CallId,
        closure_id: ClosureId,
        name: impl Into<String>,
        scope: ScopeId,
        entry_time: Timestamp,
    ) -> Self {
        Self {
            id,
            closure_id,
            name: name.into(),
            scope,
            entry_time,
            exit: None,
            force_position: 0,
            forced: Vec::new(),
            escaped_scope: false,
        }
    }

    /// Marks the activation as exited. A second exit is ignored.
    pub fn exit(&mut self, time: Timestamp, result_type: Option<String>) {
        if self.exit.is_none() {
            self.exit = Some(CallExit { time, result_type });
        }
    }

    #[must_use]
    pub const fn has_exited(&self) -> bool {
        self.exit.is_some()
    }

    #[must_use]
    pub fn exit_info(&self) -> Option<&CallExit> {
        self.exit.as_ref()
    }

    /// Number of this call's own thunks forced so far.
    #[must_use]
    pub const fn force_position(&self) -> u32 {
        self.force_position
    }

    /// Registers the forcing of the argument at `formal_position` and
    /// returns the force position it was assigned.
    pub fn force_argument(&mut self, formal_position: u32) -> u32 {
        let position = self.force_position;
        self.force_position += 1;
        self.forced.push(formal_position);
        position
    }

    /// Formal positions of forced arguments, in force order.
    #[must_use]
    pub fn force_order(&self) -> &[u32] {
        &self.forced
    }

    #[must_use]
    pub const fn has_escaped_scope(&self) -> bool {
        self.escaped_scope
    }

    /// Marks the activation's scope as escaped. Returns true only the first
    /// time; the flag is never cleared.
    pub fn mark_scope_escaped(&mut self) -> bool {
        let newly = !self.escaped_scope;
        self.escaped_scope = true;
        newly
    }
}
