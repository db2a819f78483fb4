//! Thunk (lazy argument) records.
//!
//! One suspended value can be passed on through several calls, so the same
//! `ThunkId` may appear under more than one activation. Each appearance gets
//! its own record, keyed by [`ThunkKey`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::{CallId, ClosureId, ThunkId, Timestamp};
use crate::scope::AccessKind;

/// Correlation key of a thunk record: the thunk as seen through one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ThunkKey {
    /// The underlying lazy value.
    pub thunk: ThunkId,
    /// The activation it was passed to.
    pub call: CallId,
}

impl ThunkKey {
    #[must_use]
    pub const fn new(thunk: ThunkId, call: CallId) -> Self {
        Self { thunk, call }
    }
}

impl fmt::Display for ThunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.thunk, self.call)
    }
}

/// What a thunk was blamed for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    /// A plain binding access.
    Access(AccessKind),
    /// A reflective capability, by name.
    Capability(String),
    /// An interpreter-level error raised while the thunk was pending.
    Error,
}

impl EffectKind {
    /// Returns true if the effect mutates a scope.
    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Access(kind) if kind.is_write())
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Access(kind) => write!(f, "{}", kind.code()),
            Self::Capability(name) => f.write_str(name),
            Self::Error => f.write_str("error"),
        }
    }
}

/// Side-effect tag carried by a thunk record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SideEffect {
    pub kind: EffectKind,
    pub transitive: bool,
}

/// Tracer-side record of one thunk under one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thunk {
    pub key: ThunkKey,
    /// Closure of the owning call.
    pub closure_id: ClosureId,
    /// Position among the callee's formals.
    pub formal_position: u32,
    /// Formal parameter name.
    pub name: String,
    pub birth_time: Timestamp,
    actual_position: Option<u32>,
    force_entry_time: Option<Timestamp>,
    force_exit_time: Option<Timestamp>,
    force_position: Option<u32>,
    escaped: bool,
    force_depth: Option<u32>,
    companion_position: Option<u32>,
    parent: Option<ThunkKey>,
    effects: Vec<SideEffect>,
    value_type: Option<String>,
    value_lookups: u32,
    expression_lookups: u32,
    metaprograms: u32,
    meta_depth: Option<u32>,
}

impl Thunk {
    #[must_use]
    pub fn new(
        key: ThunkKey,
        closure_id: ClosureId,
        formal_position: u32,
        name: impl Into<String>,
        birth_time: Timestamp,
    ) -> Self {
        Self {
            key,
            closure_id,
            formal_position,
            name: name.into(),
            birth_time,
            actual_position: None,
            force_entry_time: None,
            force_exit_time: None,
            force_position: None,
            escaped: false,
            force_depth: None,
            companion_position: None,
            parent: None,
            effects: Vec::new(),
            value_type: None,
            value_lookups: 0,
            expression_lookups: 0,
            metaprograms: 0,
            meta_depth: None,
        }
    }

    #[must_use]
    pub const fn actual_position(&self) -> Option<u32> {
        self.actual_position
    }

    pub fn set_actual_position(&mut self, position: u32) {
        self.actual_position = Some(position);
    }

    #[must_use]
    pub const fn force_position(&self) -> Option<u32> {
        self.force_position
    }

    pub fn set_force_position(&mut self, position: u32) {
        self.force_position = Some(position);
    }

    #[must_use]
    pub const fn force_entry_time(&self) -> Option<Timestamp> {
        self.force_entry_time
    }

    #[must_use]
    pub const fn force_exit_time(&self) -> Option<Timestamp> {
        self.force_exit_time
    }

    #[must_use]
    pub const fn has_escaped(&self) -> bool {
        self.escaped
    }

    /// Sets the escaped flag. It is never cleared.
    pub fn mark_escaped(&mut self) {
        self.escaped = true;
    }

    /// Records force entry. The depth is dropped if the thunk has escaped.
    pub fn force(&mut self, time: Timestamp, depth: Option<u32>, companion: Option<u32>) {
        self.force_entry_time = Some(time);
        self.force_depth = if self.escaped { None } else { depth };
        self.companion_position = companion;
    }

    /// Records force exit and the type of the produced value.
    pub fn finish_force(&mut self, time: Timestamp, value_type: Option<String>) {
        self.force_exit_time = Some(time);
        self.value_type = value_type;
    }

    #[must_use]
    pub const fn force_depth(&self) -> Option<u32> {
        self.force_depth
    }

    #[must_use]
    pub const fn companion_position(&self) -> Option<u32> {
        self.companion_position
    }

    #[must_use]
    pub const fn parent(&self) -> Option<ThunkKey> {
        self.parent
    }

    /// Links the dynamic parent. Returns false if one was already set.
    pub fn set_parent(&mut self, parent: ThunkKey) -> bool {
        if self.parent.is_some() {
            return false;
        }
        self.parent = Some(parent);
        true
    }

    #[must_use]
    pub fn effects(&self) -> &[SideEffect] {
        &self.effects
    }

    /// Adds a side-effect tag unless an identical one is present.
    pub fn add_effect(&mut self, kind: EffectKind, transitive: bool) {
        let effect = SideEffect { kind, transitive };
        if !self.effects.contains(&effect) {
            self.effects.push(effect);
        }
    }

    #[must_use]
    pub fn value_type(&self) -> Option<&str> {
        self.value_type.as_deref()
    }

    pub fn record_value_lookup(&mut self) {
        self.value_lookups += 1;
    }

    pub fn record_expression_lookup(&mut self) {
        self.expression_lookups += 1;
    }

    #[must_use]
    pub const fn value_lookups(&self) -> u32 {
        self.value_lookups
    }

    #[must_use]
    pub const fn expression_lookups(&self) -> u32 {
        self.expression_lookups
    }

    /// Records an inspection of the expression `depth` closure calls away
    /// from the owning call. The deepest inspection is kept.
    pub fn metaprogram(&mut self, depth: u32) {
        self.metaprograms += 1;
        self.meta_depth = Some(self.meta_depth.map_or(depth, |d| d.max(depth)));
    }

    /// Number of expression inspections made while the owning call was live.
    #[must_use]
    pub const fn metaprograms(&self) -> u32 {
        self.metaprograms
    }

    #[must_use]
    pub const fn meta_depth(&self) -> Option<u32> {
        self.meta_depth
    }
}
