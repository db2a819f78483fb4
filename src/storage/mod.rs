//! Session registries.
//!
//! Each table owns its records directly, keyed by the host-assigned identity.
//! Relations between records (parent scope, owning call, parent thunk) are
//! plain id lookups. Tables keep insertion order so that exported rows come
//! out in discovery order.

mod calls;
mod scopes;
mod thunks;

pub use calls::CallTable;
pub use scopes::ScopeTable;
pub use thunks::ThunkTable;
