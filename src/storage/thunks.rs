use std::collections::HashMap;

use indexmap::IndexMap;

use crate::error::{TraceError, TraceResult};
use crate::ids::{CallId, ThunkId};
use crate::thunk::{Thunk, ThunkKey};

/// Registry of thunk records keyed by `(thunk, call)`.
#[derive(Debug, Default)]
pub struct ThunkTable {
    records: IndexMap<ThunkKey, Thunk>,
    /// Calls each thunk was registered under, in registration order.
    by_thunk: HashMap<ThunkId, Vec<CallId>>,
}

impl ThunkTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a record. A repeated key returns the existing record.
    pub fn insert(&mut self, thunk: Thunk) -> &mut Thunk {
        let key = thunk.key;
        if !self.records.contains_key(&key) {
            self.by_thunk.entry(key.thunk).or_default().push(key.call);
        }
        self.records.entry(key).or_insert(thunk)
    }

    /// Strict lookup.
    ///
    /// # Errors
    ///
    /// Returns `TraceError::ThunkNotFound` on a miss.
    pub fn lookup(&self, thunk: ThunkId, call: CallId) -> TraceResult<&Thunk> {
        self.records
            .get(&ThunkKey::new(thunk, call))
            .ok_or(TraceError::thunk_not_found(thunk, Some(call)))
    }

    /// Strict mutable lookup.
    ///
    /// # Errors
    ///
    /// Returns `TraceError::ThunkNotFound` on a miss.
    pub fn lookup_mut(&mut self, thunk: ThunkId, call: CallId) -> TraceResult<&mut Thunk> {
        self.records
            .get_mut(&ThunkKey::new(thunk, call))
            .ok_or(TraceError::thunk_not_found(thunk, Some(call)))
    }

    /// Lookup for correlations that may legitimately be unobserved.
    pub fn lookup_permissive(&mut self, thunk: ThunkId, call: CallId) -> Option<&mut Thunk> {
        self.records.get_mut(&ThunkKey::new(thunk, call))
    }

    #[must_use]
    pub fn get(&self, key: ThunkKey) -> Option<&Thunk> {
        self.records.get(&key)
    }

    /// Every key registered for `thunk`, oldest first.
    #[must_use]
    pub fn keys_for(&self, thunk: ThunkId) -> Vec<ThunkKey> {
        self.by_thunk
            .get(&thunk)
            .map(|calls| calls.iter().map(|&call| ThunkKey::new(thunk, call)).collect())
            .unwrap_or_default()
    }

    /// The most recently registered record for `thunk`, which belongs to
    /// the closest enclosing call.
    ///
    /// # Errors
    ///
    /// Returns `TraceError::ThunkNotFound` if `thunk` was never registered.
    pub fn latest(&self, thunk: ThunkId) -> TraceResult<ThunkKey> {
        self.by_thunk
            .get(&thunk)
            .and_then(|calls| calls.last())
            .map(|&call| ThunkKey::new(thunk, call))
            .ok_or(TraceError::thunk_not_found(thunk, None))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Thunk> {
        self.records.values()
    }
}
