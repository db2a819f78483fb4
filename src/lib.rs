//! # scopetrace - Scope and Lazy-Argument Provenance Tracing
//!
//! scopetrace observes a lexically-scoped, lazily-evaluated interpreter and
//! records how scopes are created, reached and mutated, and which pending
//! lazy argument is responsible for each effect.
//!
//! ## Core Concepts
//!
//! - **Scope**: A binding environment with a birth time and an event log
//! - **Call**: One activation of a closure
//! - **Thunk**: A lazy argument, keyed by `(thunk, call)`
//! - **Attribution**: Blaming the proximate pending thunk directly and its
//!   enclosing thunks transitively
//! - **Ledgers**: Append-only scope-access, construction, eval, effect,
//!   call-reflection and metaprogramming rows
//!
//! ## Usage
//!
//! ```rust,ignore
//! use scopetrace::{SimulatedHost, TraceEvent, TraceSession, TracerConfig};
//!
//! let host = SimulatedHost::new();
//! let mut session = TraceSession::new(TracerConfig::default())?;
//! session.dispatch(&host, TraceEvent::SessionStart)?;
//! // ... forward host events ...
//! let output = session.finish()?;
//! for table in output.tables() {
//!     println!("{}: {} rows", table.name(), table.nrow());
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core records
pub mod backtrace;
pub mod call;
pub mod config;
pub mod error;
pub mod ids;
pub mod scope;
pub mod thunk;

// Host boundary and registries
pub mod event;
pub mod host;
pub mod storage;

// Attribution and output
pub mod attribution;
pub mod export;
pub mod ledger;
pub mod session;

// Re-export primary types at crate root for convenience
pub use backtrace::Backtrace;
pub use call::CallActivation;
pub use config::{AccessorRule, AccessorWrapper, TracerConfig};
pub use error::{TraceError, TraceResult};
pub use event::{ArgumentBinding, CapabilityUse, ScopeConstruction, TraceEvent, ValueInfo};
pub use export::{Column, Logical, Table, NA_INTEGER, NA_STRING};
pub use host::{CallFrame, Frame, FunctionKind, Host, ScopeHandle, SimulatedHost, ThunkFrame};
pub use ids::{CallId, ClosureId, ScopeId, SessionId, ThunkId, Timestamp};
pub use ledger::{
    Ancestor, AncestorChain, CallReflectionRow, EffectRow, EvalRow, Ledger, Ledgers, MetaKind,
    MetaprogramRow, ScopeAccessRow, ScopeConstructionRow, ThunkRef,
};
pub use scope::{AccessKind, EventCode, EventLog, Scope, ScopeKind};
pub use session::{TraceOutput, TraceSession};
pub use storage::{CallTable, ScopeTable, ThunkTable};
pub use thunk::{EffectKind, Thunk, ThunkKey};
