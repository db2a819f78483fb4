//! Scope records and their event-code log.
//!
//! A scope is a lexical binding frame. The tracer keeps one record per scope
//! identity for the whole session; the record is created on first observation
//! by whichever event sees the scope first and is never removed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{TraceError, TraceResult};
use crate::ids::{CallId, ScopeId, Timestamp};
use crate::ledger::AncestorChain;

/// Category of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    /// The top-level user workspace.
    Global,
    /// The terminal scope with no parent.
    Empty,
    /// The base scope of the runtime.
    Base,
    /// Frame of a closure call activation.
    Call,
    /// Attached package exports.
    Package,
    /// Package internals.
    Namespace,
    /// Any other scope (explicitly constructed, captured, ...).
    Other,
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Global => "global",
            Self::Empty => "empty",
            Self::Base => "base",
            Self::Call => "call",
            Self::Package => "package",
            Self::Namespace => "namespace",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// Kind of a plain binding access reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessKind {
    Lookup,
    Assign,
    Define,
    Remove,
    Exists,
    List,
}

impl AccessKind {
    /// Returns true if the access mutates the scope.
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::Assign | Self::Define | Self::Remove)
    }

    /// The event code appended to the scope log.
    #[must_use]
    pub const fn code(self) -> EventCode {
        match self {
            Self::Lookup => EventCode::Lookup,
            Self::Assign => EventCode::Assign,
            Self::Define => EventCode::Define,
            Self::Remove => EventCode::Remove,
            Self::Exists => EventCode::Exists,
            Self::List => EventCode::List,
        }
    }

    /// Short name used as the function label when an access is recorded
    /// because the scope is inside a nested eval.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Lookup => "L",
            Self::Assign => "A",
            Self::Define => "D",
            Self::Remove => "R",
            Self::Exists => "E",
            Self::List => "ls",
        }
    }
}

/// One entry of a scope's event log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCode {
    Lookup,
    Assign,
    Define,
    Remove,
    Exists,
    List,
    Lock,
    Unlock,
    ClassSet,
    DispatchEntry,
    EvalEnterDirect,
    EvalExitDirect,
    EvalEnterIndirect,
    EvalExitIndirect,
    CallEntry,
    CallExit,
    Escape,
    /// A named event, e.g. a reflective capability touching the scope.
    Named(String),
}

const TOKEN_DELIMITER: char = '|';
const NAMED_PREFIX: char = ':';

impl EventCode {
    /// Single-character code of a built-in event; `None` for named events.
    #[must_use]
    pub const fn symbol(&self) -> Option<char> {
        let c = match self {
            Self::Lookup => 'L',
            Self::Assign => 'A',
            Self::Define => 'D',
            Self::Remove => 'R',
            Self::Exists => 'E',
            Self::List => 'S',
            Self::Lock => '+',
            Self::Unlock => '-',
            Self::ClassSet => '@',
            Self::DispatchEntry => '$',
            Self::EvalEnterDirect => '(',
            Self::EvalExitDirect => ')',
            Self::EvalEnterIndirect => '[',
            Self::EvalExitIndirect => ']',
            Self::CallEntry => '>',
            Self::CallExit => '<',
            Self::Escape => '!',
            Self::Named(_) => return None,
        };
        Some(c)
    }

    /// Maps a single-character code back to its event.
    #[must_use]
    pub const fn from_symbol(c: char) -> Option<Self> {
        let code = match c {
            'L' => Self::Lookup,
            'A' => Self::Assign,
            'D' => Self::Define,
            'R' => Self::Remove,
            'E' => Self::Exists,
            'S' => Self::List,
            '+' => Self::Lock,
            '-' => Self::Unlock,
            '@' => Self::ClassSet,
            '$' => Self::DispatchEntry,
            '(' => Self::EvalEnterDirect,
            ')' => Self::EvalExitDirect,
            '[' => Self::EvalEnterIndirect,
            ']' => Self::EvalExitIndirect,
            '>' => Self::CallEntry,
            '<' => Self::CallExit,
            '!' => Self::Escape,
            _ => return None,
        };
        Some(code)
    }

    /// Creates a named event.
    ///
    /// # Errors
    ///
    /// Returns `TraceError::InvalidEventName` if the name is empty or
    /// contains the log delimiter.
    pub fn named(name: impl Into<String>) -> TraceResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(TraceError::InvalidEventName {
                name,
                reason: "name is empty".to_string(),
            });
        }
        if name.contains(TOKEN_DELIMITER) {
            return Err(TraceError::InvalidEventName {
                name,
                reason: format!("name contains '{TOKEN_DELIMITER}'"),
            });
        }
        Ok(Self::Named(name))
    }
}

impl fmt::Display for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self, self.symbol()) {
            (_, Some(c)) => write!(f, "{c}"),
            (Self::Named(name), None) => write!(f, "{NAMED_PREFIX}{name}"),
            (_, None) => Ok(()),
        }
    }
}

impl FromStr for EventCode {
    type Err = TraceError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        if let Some(name) = token.strip_prefix(NAMED_PREFIX) {
            return Self::named(name);
        }

        let mut chars = token.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Self::from_symbol(c).ok_or_else(|| TraceError::InvalidEventCode {
                code: token.to_string(),
            }),
            _ => Err(TraceError::InvalidEventCode {
                code: token.to_string(),
            }),
        }
    }
}

/// Append-only sequence of event codes.
///
/// Rendered as `|`-delimited tokens with a leading and trailing delimiter,
/// e.g. `|>|L|A|:sys.frame_0|<|`. An empty log renders as `|`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventLog(Vec<EventCode>);

impl EventLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event. There is no way to remove one.
    pub fn push(&mut self, code: EventCode) {
        self.0.push(code);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventCode> {
        self.0.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[EventCode] {
        &self.0
    }

    /// Parses a rendered log.
    ///
    /// # Errors
    ///
    /// Returns `TraceError::InvalidEventCode` for an unknown token.
    pub fn parse(text: &str) -> TraceResult<Self> {
        text.parse()
    }
}

impl fmt::Display for EventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{TOKEN_DELIMITER}")?;
        for code in &self.0 {
            write!(f, "{code}{TOKEN_DELIMITER}")?;
        }
        Ok(())
    }
}

impl FromStr for EventLog {
    type Err = TraceError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let inner = text.strip_prefix(TOKEN_DELIMITER).unwrap_or(text);
        let inner = inner.strip_suffix(TOKEN_DELIMITER).unwrap_or(inner);
        if inner.is_empty() {
            return Ok(Self::new());
        }
        inner
            .split(TOKEN_DELIMITER)
            .map(EventCode::from_str)
            .collect::<TraceResult<Vec<_>>>()
            .map(Self)
    }
}

/// Where and under which stack a scope was allocated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub ancestors: AncestorChain,
    pub backtrace: String,
}

/// Tracer-side record of one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub id: ScopeId,
    pub name: Option<String>,
    pub kind: ScopeKind,
    /// Owning call activation, for call frames.
    pub call_id: Option<CallId>,
    pub hashed: bool,
    /// Parent relation, by id only.
    pub parent: Option<ScopeId>,
    pub birth_time: Timestamp,
    pub last_write_time: Option<Timestamp>,
    package: Option<String>,
    events: EventLog,
    locked: Option<bool>,
    classes: Vec<String>,
    evals: u64,
    eval_depth: u32,
    dispatch: bool,
    provenance: Option<Provenance>,
}

impl Scope {
    #[must_use]
    pub fn new(id: ScopeId, kind: ScopeKind, birth_time: Timestamp) -> Self {
        Self {
            id,
            name: None,
            kind,
            call_id: None,
            hashed: false,
            parent: None,
            birth_time,
            last_write_time: None,
            package: None,
            events: EventLog::new(),
            locked: None,
            classes: Vec::new(),
            evals: 0,
            eval_depth: 0,
            dispatch: false,
            provenance: None,
        }
    }

    pub fn push_event(&mut self, code: EventCode) {
        self.events.push(code);
    }

    #[must_use]
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Records a write at `time`.
    pub fn record_write(&mut self, time: Timestamp) {
        self.last_write_time = Some(time);
    }

    /// Package-qualified name, once discovered.
    #[must_use]
    pub fn package(&self) -> Option<&str> {
        self.package.as_deref()
    }

    #[must_use]
    pub fn is_package(&self) -> bool {
        self.package.is_some()
    }

    /// Sets the package-qualified name. Returns false, leaving the name
    /// untouched, if one was already set.
    pub fn set_package(&mut self, qualified_name: impl Into<String>) -> bool {
        if self.package.is_some() {
            return false;
        }
        self.package = Some(qualified_name.into());
        true
    }

    /// Tri-state lock flag: `None` until a lock or unlock is observed.
    #[must_use]
    pub const fn locked(&self) -> Option<bool> {
        self.locked
    }

    pub fn lock(&mut self) {
        self.locked = Some(true);
        self.events.push(EventCode::Lock);
    }

    pub fn unlock(&mut self) {
        self.locked = Some(false);
        self.events.push(EventCode::Unlock);
    }

    /// Seeds the lock flag from the host without logging an event.
    pub fn observe_locked(&mut self, locked: Option<bool>) {
        if self.locked.is_none() {
            self.locked = locked;
        }
    }

    #[must_use]
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// Adds a class name if not already present.
    pub fn add_class(&mut self, class: &str) {
        if !self.classes.iter().any(|c| c == class) {
            self.classes.push(class.to_string());
        }
    }

    #[must_use]
    pub const fn has_dispatch(&self) -> bool {
        self.dispatch
    }

    pub fn set_dispatch(&mut self) {
        self.dispatch = true;
        self.events.push(EventCode::DispatchEntry);
    }

    /// Enters a nested eval of source text in this scope.
    pub fn push_eval(&mut self, direct: bool) {
        self.evals += 1;
        self.eval_depth += 1;
        self.events.push(if direct {
            EventCode::EvalEnterDirect
        } else {
            EventCode::EvalEnterIndirect
        });
    }

    /// Leaves a nested eval.
    ///
    /// # Errors
    ///
    /// Returns `TraceError::EvalDepthUnderflow` if no eval is active.
    pub fn pop_eval(&mut self, direct: bool) -> TraceResult<()> {
        self.eval_depth = self
            .eval_depth
            .checked_sub(1)
            .ok_or(TraceError::EvalDepthUnderflow { id: self.id })?;
        self.events.push(if direct {
            EventCode::EvalExitDirect
        } else {
            EventCode::EvalExitIndirect
        });
        Ok(())
    }

    #[must_use]
    pub const fn inside_eval(&self) -> bool {
        self.eval_depth > 0
    }

    /// Total number of evals ever entered in this scope.
    #[must_use]
    pub const fn eval_count(&self) -> u64 {
        self.evals
    }

    #[must_use]
    pub const fn eval_depth(&self) -> u32 {
        self.eval_depth
    }

    #[must_use]
    pub fn provenance(&self) -> Option<&Provenance> {
        self.provenance.as_ref()
    }

    /// Sets allocation provenance once; later calls are ignored.
    pub fn set_provenance(&mut self, provenance: Provenance) {
        if self.provenance.is_none() {
            self.provenance = Some(provenance);
        }
    }
}
