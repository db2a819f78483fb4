//! Tracer configuration.
//!
//! The caller-frame offsets and the length of the provenance chain were
//! tuned empirically against one host; they are parameters here rather than
//! constants so that other hosts can adjust them.

use serde::{Deserialize, Serialize};

use crate::error::{TraceError, TraceResult};
use crate::ledger::AncestorChain;
use crate::scope::{AccessKind, ScopeKind};

/// Rule deciding when a plain scope access counts as a reflective access.
///
/// An access of kind `kind` is recorded when the closure call found at
/// `frame_offset` on the live stack belongs to the accessor package and is
/// named one of `functions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessorRule {
    pub kind: AccessKind,
    pub functions: Vec<String>,
    pub frame_offset: usize,
}

impl AccessorRule {
    #[must_use]
    pub fn new(kind: AccessKind, functions: &[&str], frame_offset: usize) -> Self {
        Self {
            kind,
            functions: functions.iter().map(|f| (*f).to_string()).collect(),
            frame_offset,
        }
    }

    /// Returns true if this rule covers `function` for `kind`.
    #[must_use]
    pub fn matches(&self, kind: AccessKind, function: &str) -> bool {
        self.kind == kind && self.functions.iter().any(|f| f == function)
    }
}

/// A wrapper that re-labels an accessor when found further out the stack.
///
/// With the defaults, a `get0` lookup issued from inside `dynGet` is
/// recorded as `dynGet`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessorWrapper {
    pub inner: String,
    pub outer: String,
    pub frame_offset: usize,
}

/// Configuration for a tracing session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    /// Number of enclosing (closure, call) pairs recorded per ledger row.
    pub ancestor_depth: usize,
    /// Stack index where the caller-chain walk starts.
    pub caller_frame_offset: usize,
    /// Separator used when rendering the backtrace.
    pub backtrace_delimiter: String,
    /// Package that owns the reflective accessor functions.
    pub accessor_package: String,
    /// Accessor rules, checked in order.
    pub accessors: Vec<AccessorRule>,
    /// Accessor wrappers, applied after a rule matched.
    pub accessor_wrappers: Vec<AccessorWrapper>,
    /// Closures inside which plain scope accesses are not recorded.
    pub quiet_functions: Vec<String>,
    /// Scope kinds that stop the parent walk of a nested eval.
    pub eval_boundary_kinds: Vec<ScopeKind>,
    /// Closures whose returned scope is recorded under their own name
    /// instead of `Return`.
    pub named_returns: Vec<String>,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            ancestor_depth: AncestorChain::DEFAULT_LEN,
            caller_frame_offset: 1,
            backtrace_delimiter: "|".to_string(),
            accessor_package: "base".to_string(),
            accessors: vec![
                AccessorRule::new(AccessKind::Lookup, &["get", "get0", "mget"], 3),
                AccessorRule::new(AccessKind::Assign, &["assign"], 3),
                AccessorRule::new(AccessKind::Define, &["assign"], 3),
                AccessorRule::new(AccessKind::Exists, &["exists"], 3),
                AccessorRule::new(AccessKind::Remove, &["remove", "rm"], 5),
                AccessorRule::new(AccessKind::List, &["ls", "objects"], 7),
            ],
            accessor_wrappers: vec![AccessorWrapper {
                inner: "get0".to_string(),
                outer: "dynGet".to_string(),
                frame_offset: 15,
            }],
            quiet_functions: vec!["library".to_string(), "loadNamespace".to_string()],
            eval_boundary_kinds: vec![ScopeKind::Namespace, ScopeKind::Package],
            named_returns: vec!["getNamespace".to_string()],
        }
    }
}

impl TracerConfig {
    /// Parses a configuration from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `TraceError::InvalidConfig` if the JSON is malformed or the
    /// resulting configuration fails validation.
    pub fn from_json(json: &str) -> TraceResult<Self> {
        let cfg: Self = serde_json::from_str(json)
            .map_err(|e| TraceError::invalid_config(format!("malformed JSON: {e}")))?;
        cfg.validate()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `TraceError::InvalidConfig` when a bound is violated.
    pub fn validate(self) -> TraceResult<Self> {
        if self.ancestor_depth > AncestorChain::MAX_LEN {
            return Err(TraceError::invalid_config(format!(
                "ancestor_depth must be at most {} (got {})",
                AncestorChain::MAX_LEN,
                self.ancestor_depth
            )));
        }

        if self.backtrace_delimiter.is_empty() {
            return Err(TraceError::invalid_config(
                "backtrace_delimiter must not be empty",
            ));
        }

        for rule in &self.accessors {
            if rule.functions.is_empty() {
                return Err(TraceError::invalid_config(format!(
                    "accessor rule for {:?} names no functions",
                    rule.kind
                )));
            }
        }

        if let Some(name) = self
            .named_returns
            .iter()
            .find(|name| name.is_empty() || name.contains('|'))
        {
            return Err(TraceError::invalid_config(format!(
                "named return {name:?} is not a valid event name"
            )));
        }

        Ok(self)
    }

    /// Returns true if `name` opens a quiet region.
    #[must_use]
    pub fn is_quiet(&self, name: &str) -> bool {
        self.quiet_functions.iter().any(|f| f == name)
    }

    /// Label of the access row written when the closure `name` returns a
    /// scope.
    #[must_use]
    pub fn return_label<'a>(&'a self, name: &str) -> &'a str {
        self.named_returns
            .iter()
            .find(|n| *n == name)
            .map_or("Return", String::as_str)
    }
}
