//! Append-only output ledgers.
//!
//! Each ledger kind has one row type. Rows are written once and never
//! mutated; a row whose key is already present is dropped, so replaying the
//! same host event cannot duplicate output.

use std::collections::HashSet;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

use crate::ids::{CallId, ClosureId, ScopeId, ThunkId, Timestamp};
use crate::thunk::{EffectKind, ThunkKey};

const MAX_CHAIN_LEN: usize = 8;

/// One enclosing caller: the closure and the activation that ran it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ancestor {
    pub closure_id: ClosureId,
    pub call_id: CallId,
}

/// Bounded chain of enclosing callers, innermost first.
///
/// The chain always has `len` slots; callers that could not be found are
/// `None`. It is `Copy` so it can be handed to each row by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AncestorChain {
    slots: [Option<Ancestor>; MAX_CHAIN_LEN],
    len: usize,
}

impl AncestorChain {
    /// Chain length used unless configured otherwise.
    pub const DEFAULT_LEN: usize = 4;
    /// Upper bound on the configurable chain length.
    pub const MAX_LEN: usize = MAX_CHAIN_LEN;

    /// An all-absent chain with `len` slots, clamped to `MAX_LEN`.
    #[must_use]
    pub const fn empty(len: usize) -> Self {
        Self {
            slots: [None; Self::MAX_LEN],
            len: if len > Self::MAX_LEN { Self::MAX_LEN } else { len },
        }
    }

    /// Builds a chain from found callers. Extra callers are dropped.
    #[must_use]
    pub fn from_callers(len: usize, callers: impl IntoIterator<Item = Option<Ancestor>>) -> Self {
        let mut chain = Self::empty(len);
        for (slot, caller) in chain.slots[..chain.len].iter_mut().zip(callers) {
            *slot = caller;
        }
        chain
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The caller at `index`, if the slot exists and was filled.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<Ancestor> {
        self.slots[..self.len].get(index).copied().flatten()
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<Ancestor>> + '_ {
        self.slots[..self.len].iter().copied()
    }
}

impl Default for AncestorChain {
    fn default() -> Self {
        Self::empty(Self::DEFAULT_LEN)
    }
}

/// Optional arguments of a reflective capability call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapabilityArgs {
    pub env_name: Option<String>,
    pub symbol: Option<String>,
    pub bindings: Option<bool>,
    pub fun_id: Option<ClosureId>,
    pub n: Option<i64>,
    pub which: Option<i64>,
    pub x_int: Option<i64>,
    pub x_char: Option<String>,
    /// Frame scopes returned by a frame-listing capability, outermost first.
    pub frame_scopes: Vec<ScopeId>,
}

/// A recorded scope access: a reflective capability, an accessor-mediated
/// binding access, or a scope returned from a call or thunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeAccessRow {
    pub time: Timestamp,
    /// Host frame depth at the access, where known.
    pub depth: Option<u32>,
    /// Capability or accessor name (`Return`, `Argument` for returned scopes).
    pub function: String,
    /// Scope whose bindings were touched.
    pub scope: Option<ScopeId>,
    pub value_type: Option<String>,
    pub result_type: Option<String>,
    pub result_scope: Option<ScopeId>,
    pub arg_scopes: [Option<ScopeId>; 2],
    pub args: CapabilityArgs,
    pub ancestors: AncestorChain,
    pub backtrace: String,
}

impl ScopeAccessRow {
    /// A row with only the always-present fields set.
    #[must_use]
    pub fn new(
        time: Timestamp,
        function: impl Into<String>,
        ancestors: AncestorChain,
        backtrace: String,
    ) -> Self {
        Self {
            time,
            depth: None,
            function: function.into(),
            scope: None,
            value_type: None,
            result_type: None,
            result_scope: None,
            arg_scopes: [None; 2],
            args: CapabilityArgs::default(),
            ancestors,
            backtrace,
        }
    }
}

/// Provenance of an explicitly constructed scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeConstructionRow {
    pub time: Timestamp,
    pub scope: ScopeId,
    pub constructor: String,
    pub hashed: Option<bool>,
    pub parent: Option<ScopeId>,
    /// Closure-call depth of the parent scope on the live stack.
    pub parent_depth: Option<u32>,
    pub parent_kind: Option<String>,
    pub size: Option<i64>,
    pub frame_count: Option<u32>,
    pub ancestors: AncestorChain,
    pub backtrace: String,
}

/// One scope entered by a nested evaluation of source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalRow {
    pub time: Timestamp,
    pub scope: ScopeId,
    /// True for the scope the text was evaluated in, false for its parents.
    pub direct: bool,
    pub expression: String,
    pub ancestors: AncestorChain,
    pub backtrace: String,
}

/// A thunk as it appears in an effect row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThunkRef {
    pub closure_id: ClosureId,
    pub call_id: CallId,
    pub thunk_id: ThunkId,
    pub formal_position: u32,
}

impl ThunkRef {
    #[must_use]
    pub const fn key(&self) -> ThunkKey {
        ThunkKey::new(self.thunk_id, self.call_id)
    }
}

/// An effect attributed to a pending thunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectRow {
    pub time: Timestamp,
    pub kind: EffectKind,
    pub scope: Option<ScopeId>,
    pub symbol: Option<String>,
    pub transitive: bool,
    /// The directly responsible thunk, for transitive rows.
    pub source: Option<ThunkRef>,
    pub target: ThunkRef,
    pub ancestors: AncestorChain,
    pub backtrace: String,
}

/// A capability that handed out the scope of a closure call.
///
/// The source is the call whose scope was reflected on. The sink is the
/// code that asked for it: the innermost pending argument thunk, else the
/// innermost closure call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallReflectionRow {
    pub time: Timestamp,
    pub capability: String,
    pub source: Ancestor,
    pub sink: Option<Ancestor>,
    pub sink_thunk: Option<ThunkRef>,
    /// Closure calls from the top of the stack to the source, inclusive.
    /// Absent once the source call has left the stack.
    pub depth: Option<u32>,
    /// True if this reflection let the scope outlive its call.
    pub escaped: bool,
    pub backtrace: String,
}

/// How a thunk's unevaluated expression was inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetaKind {
    Substitute,
    Expression,
}

impl MetaKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Substitute => "substitute",
            Self::Expression => "expression",
        }
    }
}

/// Inspection of a thunk's expression while its owning call is live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaprogramRow {
    pub time: Timestamp,
    pub kind: MetaKind,
    pub thunk: ThunkRef,
    /// Innermost closure call on the stack at the inspection.
    pub sink: Option<Ancestor>,
    /// Closure calls between the inspection and the owning call.
    pub depth: u32,
    pub backtrace: String,
}

/// A ledger row with an identity used to drop duplicates.
pub trait LedgerRow {
    type Key: Eq + Hash;

    fn key(&self) -> Self::Key;
}

impl LedgerRow for ScopeAccessRow {
    type Key = (
        Timestamp,
        String,
        Option<ScopeId>,
        Option<ScopeId>,
        [Option<ScopeId>; 2],
        CapabilityArgs,
    );

    fn key(&self) -> Self::Key {
        (
            self.time,
            self.function.clone(),
            self.scope,
            self.result_scope,
            self.arg_scopes,
            self.args.clone(),
        )
    }
}

impl LedgerRow for ScopeConstructionRow {
    type Key = ScopeId;

    fn key(&self) -> Self::Key {
        self.scope
    }
}

impl LedgerRow for EvalRow {
    type Key = (Timestamp, ScopeId, bool);

    fn key(&self) -> Self::Key {
        (self.time, self.scope, self.direct)
    }
}

impl LedgerRow for EffectRow {
    type Key = (Timestamp, EffectKind, Option<ScopeId>, Option<String>, ThunkKey);

    fn key(&self) -> Self::Key {
        (
            self.time,
            self.kind.clone(),
            self.scope,
            self.symbol.clone(),
            self.target.key(),
        )
    }
}

impl LedgerRow for CallReflectionRow {
    type Key = (Timestamp, String, CallId);

    fn key(&self) -> Self::Key {
        (self.time, self.capability.clone(), self.source.call_id)
    }
}

impl LedgerRow for MetaprogramRow {
    type Key = (Timestamp, MetaKind, ThunkKey);

    fn key(&self) -> Self::Key {
        (self.time, self.kind, self.thunk.key())
    }
}

/// Append-only table of rows.
#[derive(Debug)]
pub struct Ledger<R: LedgerRow> {
    rows: Vec<R>,
    keys: HashSet<R::Key>,
}

impl<R: LedgerRow> Default for Ledger<R> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            keys: HashSet::new(),
        }
    }
}

impl<R: LedgerRow> Ledger<R> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `row` unless a row with the same key exists. Returns true if
    /// the row was appended.
    pub fn append(&mut self, row: R) -> bool {
        if !self.keys.insert(row.key()) {
            return false;
        }
        self.rows.push(row);
        true
    }

    #[must_use]
    pub fn rows(&self) -> &[R] {
        &self.rows
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &R> {
        self.rows.iter()
    }

    /// Consumes the ledger, returning its rows in append order.
    #[must_use]
    pub fn into_rows(self) -> Vec<R> {
        self.rows
    }
}

/// The ledgers produced by a session.
#[derive(Debug, Default)]
pub struct Ledgers {
    pub accesses: Ledger<ScopeAccessRow>,
    pub constructions: Ledger<ScopeConstructionRow>,
    pub evals: Ledger<EvalRow>,
    pub effects: Ledger<EffectRow>,
    pub reflections: Ledger<CallReflectionRow>,
    pub metaprograms: Ledger<MetaprogramRow>,
}
