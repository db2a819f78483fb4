//! Error types for scopetrace.
//!
//! All errors are strongly typed using thiserror. Errors fall into two
//! classes: consistency violations (the host broke the entry/exit ordering
//! contract, so the trace can no longer be trusted) and input errors
//! (malformed configuration or event-code text) that leave the session intact.

use thiserror::Error;

use crate::ids::{CallId, ScopeId, ThunkId};

/// Errors produced while tracing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraceError {
    #[error("Call not found: {id} (no prior call-entry event)")]
    CallNotFound {
        id: CallId,
    },

    #[error("Thunk not found: {thunk} (call: {call:?})")]
    ThunkNotFound {
        thunk: ThunkId,
        call: Option<CallId>,
    },

    #[error("Scope not found: {id}")]
    ScopeNotFound {
        id: ScopeId,
    },

    #[error("Eval depth of {id} would become negative")]
    EvalDepthUnderflow {
        id: ScopeId,
    },

    #[error("Backtrace underflow: exit event with no matching entry")]
    BacktraceUnderflow,

    #[error("Invalid event code '{code}'")]
    InvalidEventCode {
        code: String,
    },

    #[error("Invalid event name '{name}': {reason}")]
    InvalidEventName {
        name: String,
        reason: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },

    #[error("Session aborted: {reason}")]
    SessionAborted {
        reason: String,
    },
}

impl TraceError {
    /// Creates a thunk-not-found error for a `(thunk, call)` correlation.
    #[must_use]
    pub const fn thunk_not_found(thunk: ThunkId, call: Option<CallId>) -> Self {
        Self::ThunkNotFound { thunk, call }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns true if this error means the host violated the event
    /// ordering contract. Fatal errors abort the session.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::CallNotFound { .. }
                | Self::ThunkNotFound { .. }
                | Self::ScopeNotFound { .. }
                | Self::EvalDepthUnderflow { .. }
                | Self::BacktraceUnderflow
                | Self::SessionAborted { .. }
        )
    }
}

/// Result type alias for scopetrace operations.
pub type TraceResult<T> = Result<T, TraceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_not_found_message() {
        let err = TraceError::CallNotFound { id: CallId::new(9) };
        let msg = err.to_string();
        assert!(msg.contains("call#9"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_thunk_not_found_message() {
        let err = TraceError::thunk_not_found(ThunkId::new(4), Some(CallId::new(2)));
        let msg = err.to_string();
        assert!(msg.contains("thunk#4"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_input_errors_are_not_fatal() {
        assert!(!TraceError::invalid_config("depth").is_fatal());
        assert!(!TraceError::InvalidEventCode {
            code: "?".to_string()
        }
        .is_fatal());
        assert!(!TraceError::InvalidEventName {
            name: String::new(),
            reason: "empty".to_string(),
        }
        .is_fatal());
    }

    #[test]
    fn test_eval_underflow_is_fatal() {
        let err = TraceError::EvalDepthUnderflow { id: ScopeId::new(1) };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("negative"));
    }
}
