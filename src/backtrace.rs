//! Flattened call-chain snapshot attached to every ledger row.
//!
//! Only the labels of the live call activations are kept, in push order;
//! rendering is O(depth) per row and nothing is retained once a call exits.

use crate::error::{TraceError, TraceResult};
use crate::ids::CallId;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    call_id: CallId,
    label: String,
}

/// Push/pop stack of call-activation labels.
#[derive(Debug, Clone)]
pub struct Backtrace {
    entries: Vec<Entry>,
    delimiter: String,
}

impl Default for Backtrace {
    fn default() -> Self {
        Self::new("|")
    }
}

impl Backtrace {
    #[must_use]
    pub fn new(delimiter: impl Into<String>) -> Self {
        Self {
            entries: Vec::new(),
            delimiter: delimiter.into(),
        }
    }

    /// Appends an activation to the top of the stack.
    pub fn push(&mut self, call_id: CallId, label: impl Into<String>) {
        self.entries.push(Entry {
            call_id,
            label: label.into(),
        });
    }

    /// Removes the top activation and returns its id.
    ///
    /// # Errors
    ///
    /// Returns `TraceError::BacktraceUnderflow` when the stack is empty,
    /// which means an exit event arrived without its entry.
    pub fn pop(&mut self) -> TraceResult<CallId> {
        self.entries
            .pop()
            .map(|entry| entry.call_id)
            .ok_or(TraceError::BacktraceUnderflow)
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Display for Backtrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (idx, entry) in self.entries.iter().enumerate() {
            if idx > 0 {
                f.write_str(&self.delimiter)?;
            }
            f.write_str(&entry.label)?;
        }
        Ok(())
    }
}
