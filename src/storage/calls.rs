use indexmap::IndexMap;

use crate::call::CallActivation;
use crate::error::{TraceError, TraceResult};
use crate::ids::CallId;

/// Id-keyed registry of call activations.
#[derive(Debug, Default)]
pub struct CallTable {
    calls: IndexMap<CallId, CallActivation>,
}

impl CallTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an activation. A repeated insert returns the existing
    /// record unchanged.
    pub fn insert(&mut self, activation: CallActivation) -> &mut CallActivation {
        self.calls.entry(activation.id).or_insert(activation)
    }

    /// Strict lookup.
    ///
    /// # Errors
    ///
    /// Returns `TraceError::CallNotFound` if no entry event registered `id`.
    pub fn lookup(&self, id: CallId) -> TraceResult<&CallActivation> {
        self.calls.get(&id).ok_or(TraceError::CallNotFound { id })
    }

    /// Strict mutable lookup.
    ///
    /// # Errors
    ///
    /// Returns `TraceError::CallNotFound` if no entry event registered `id`.
    pub fn lookup_mut(&mut self, id: CallId) -> TraceResult<&mut CallActivation> {
        self.calls.get_mut(&id).ok_or(TraceError::CallNotFound { id })
    }

    /// Permissive lookup for calls that may legitimately be unknown.
    #[must_use]
    pub fn get(&self, id: CallId) -> Option<&CallActivation> {
        self.calls.get(&id)
    }

    pub fn get_mut(&mut self, id: CallId) -> Option<&mut CallActivation> {
        self.calls.get_mut(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CallActivation> {
        self.calls.values()
    }
}
