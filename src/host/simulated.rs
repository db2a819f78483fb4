//! In-memory reference host.
//!
//! Keeps a logical clock, a scope graph and a frame stack. Every operation
//! that creates something or pushes a frame advances the clock by one tick
//! first, so birth and entry times are strictly increasing.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::host::{CallFrame, Frame, FunctionKind, Host, ScopeBinding, ScopeHandle, ThunkFrame};
use crate::ids::{CallId, ClosureId, ScopeId, ThunkId, Timestamp};
use crate::scope::ScopeKind;

#[derive(Debug, Clone)]
struct SimScope {
    handle: ScopeHandle,
    bindings: Vec<ScopeBinding>,
}

#[derive(Debug, Clone, Copy)]
struct SimThunk {
    birth_time: Timestamp,
    scope: ScopeId,
}

/// Scriptable host used by tests and benchmarks.
#[derive(Debug, Clone)]
pub struct SimulatedHost {
    clock: Timestamp,
    next_id: u64,
    scopes: IndexMap<ScopeId, SimScope>,
    thunks: HashMap<ThunkId, SimThunk>,
    /// Innermost frame last.
    frames: Vec<Frame>,
    namespaces: Vec<ScopeId>,
    packages: Vec<ScopeId>,
    empty: ScopeId,
    base: ScopeId,
    global: ScopeId,
}

impl Default for SimulatedHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedHost {
    /// Creates a host with the empty, base and global scopes born at time 0.
    #[must_use]
    pub fn new() -> Self {
        let mut host = Self {
            clock: Timestamp::ZERO,
            next_id: 1,
            scopes: IndexMap::new(),
            thunks: HashMap::new(),
            frames: Vec::new(),
            namespaces: Vec::new(),
            packages: Vec::new(),
            empty: ScopeId::new(0),
            base: ScopeId::new(0),
            global: ScopeId::new(0),
        };
        host.empty = host.insert_scope(ScopeKind::Empty, None, Some("R_EmptyEnv"));
        host.base = host.insert_scope(ScopeKind::Base, Some(host.empty), Some("base"));
        host.global = host.insert_scope(ScopeKind::Global, Some(host.base), Some("R_GlobalEnv"));
        host
    }

    fn mint(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn insert_scope(
        &mut self,
        kind: ScopeKind,
        parent: Option<ScopeId>,
        name: Option<&str>,
    ) -> ScopeId {
        let id = ScopeId::new(self.mint());
        let mut handle = ScopeHandle::new(id, kind, self.clock);
        handle.parent = parent;
        handle.name = name.map(str::to_string);
        self.scopes.insert(
            id,
            SimScope {
                handle,
                bindings: Vec::new(),
            },
        );
        id
    }

    /// Advances the clock by one tick and returns the new time.
    pub fn tick(&mut self) -> Timestamp {
        self.clock = self.clock.next();
        self.clock
    }

    #[must_use]
    pub const fn now(&self) -> Timestamp {
        self.clock
    }

    #[must_use]
    pub const fn base_scope(&self) -> ScopeId {
        self.base
    }

    /// Creates a scope born at the next tick.
    pub fn new_scope(&mut self, kind: ScopeKind, parent: Option<ScopeId>) -> ScopeId {
        self.tick();
        self.insert_scope(kind, parent, None)
    }

    /// Creates a named scope born at the next tick.
    pub fn new_named_scope(
        &mut self,
        kind: ScopeKind,
        parent: Option<ScopeId>,
        name: &str,
    ) -> ScopeId {
        self.tick();
        self.insert_scope(kind, parent, Some(name))
    }

    /// Creates a namespace scope and registers it as loaded.
    pub fn add_namespace(&mut self, name: &str) -> ScopeId {
        let id = self.new_named_scope(ScopeKind::Namespace, Some(self.base), name);
        self.namespaces.push(id);
        id
    }

    /// Creates a package export scope and registers it as attached.
    pub fn add_package(&mut self, name: &str) -> ScopeId {
        let id = self.new_named_scope(ScopeKind::Package, Some(self.global), name);
        self.packages.push(id);
        id
    }

    /// Mutable access to a scope handle, e.g. to set `hashed` or `locked`.
    pub fn handle_mut(&mut self, id: ScopeId) -> Option<&mut ScopeHandle> {
        self.scopes.get_mut(&id).map(|s| &mut s.handle)
    }

    /// Binds `value` under `name` in `scope`. Unknown scopes are ignored.
    pub fn bind(&mut self, scope: ScopeId, name: &str, value: ScopeId) {
        if let Some(s) = self.scopes.get_mut(&scope) {
            s.bindings.push(ScopeBinding {
                name: name.to_string(),
                scope: value,
            });
        }
    }

    /// Scope of the innermost closure call, or the global scope.
    #[must_use]
    pub fn current_scope(&self) -> ScopeId {
        self.frames
            .iter()
            .rev()
            .find_map(|f| f.as_closure_call().map(|(call, _)| call.scope))
            .unwrap_or(self.global)
    }

    /// Pushes a closure call with a fresh call scope whose parent is global.
    pub fn enter_closure(&mut self, name: &str, closure: ClosureId) -> CallFrame {
        self.enter_closure_from(name, closure, None)
    }

    /// Like [`enter_closure`](Self::enter_closure) for a closure defined in
    /// the named package.
    pub fn enter_closure_from(
        &mut self,
        name: &str,
        closure: ClosureId,
        package: Option<&str>,
    ) -> CallFrame {
        self.tick();
        let call_id = CallId::new(self.mint());
        let scope = self.insert_scope(ScopeKind::Call, Some(self.global), None);
        if let Some(s) = self.scopes.get_mut(&scope) {
            s.handle.call_id = Some(call_id);
        }
        let frame = CallFrame {
            call_id,
            function: FunctionKind::Closure(closure),
            name: name.to_string(),
            package: package.map(str::to_string),
            scope,
        };
        self.frames.push(Frame::Call(frame.clone()));
        frame
    }

    /// Pushes a builtin call from the base package.
    pub fn enter_builtin(&mut self, name: &str) -> CallFrame {
        self.enter_primitive(name, FunctionKind::Builtin)
    }

    /// Pushes a special call from the base package.
    pub fn enter_special(&mut self, name: &str) -> CallFrame {
        self.enter_primitive(name, FunctionKind::Special)
    }

    fn enter_primitive(&mut self, name: &str, function: FunctionKind) -> CallFrame {
        self.tick();
        let frame = CallFrame {
            call_id: CallId::new(self.mint()),
            function,
            name: name.to_string(),
            package: Some("base".to_string()),
            scope: self.current_scope(),
        };
        self.frames.push(Frame::Call(frame.clone()));
        frame
    }

    /// Creates an unforced argument thunk in the current scope.
    pub fn create_thunk(&mut self) -> (ThunkId, Timestamp) {
        let scope = self.current_scope();
        let birth_time = self.tick();
        let id = ThunkId::new(self.mint());
        self.thunks.insert(id, SimThunk { birth_time, scope });
        (id, birth_time)
    }

    /// Pushes a force frame for a thunk made by `create_thunk`.
    ///
    /// An unknown thunk is treated as born now.
    pub fn force(&mut self, thunk: ThunkId) -> ThunkFrame {
        let now = self.tick();
        let sim = self.thunks.get(&thunk).copied();
        let frame = ThunkFrame {
            thunk_id: thunk,
            birth_time: sim.map_or(now, |t| t.birth_time),
            force_entry_time: now,
            is_argument: true,
            scope: sim.map(|t| t.scope),
        };
        self.frames.push(Frame::Thunk(frame.clone()));
        frame
    }

    /// Pops the innermost frame.
    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }
}

impl Host for SimulatedHost {
    fn time(&self) -> Timestamp {
        self.clock
    }

    fn stack_size(&self) -> usize {
        self.frames.len()
    }

    fn frame(&self, index: usize) -> Option<&Frame> {
        let pos = self.frames.len().checked_sub(index + 1)?;
        self.frames.get(pos)
    }

    fn scope(&self, id: ScopeId) -> Option<ScopeHandle> {
        self.scopes.get(&id).map(|s| s.handle.clone())
    }

    fn scope_bindings(&self, id: ScopeId) -> Vec<ScopeBinding> {
        self.scopes
            .get(&id)
            .map(|s| s.bindings.clone())
            .unwrap_or_default()
    }

    fn namespaces(&self) -> Vec<ScopeId> {
        self.namespaces.clone()
    }

    fn packages(&self) -> Vec<ScopeId> {
        self.packages.clone()
    }

    fn global_scope(&self) -> ScopeId {
        self.global
    }

    fn empty_scope(&self) -> ScopeId {
        self.empty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_scopes() {
        let host = SimulatedHost::new();
        let global = host.scope(host.global_scope()).unwrap();
        assert_eq!(global.kind, ScopeKind::Global);
        assert_eq!(global.parent, Some(host.base_scope()));
        let empty = host.scope(host.empty_scope()).unwrap();
        assert_eq!(empty.parent, None);
        assert_eq!(host.time(), Timestamp::ZERO);
    }

    #[test]
    fn test_closure_call_owns_scope() {
        let mut host = SimulatedHost::new();
        let frame = host.enter_closure("f", ClosureId::new(1));
        let scope = host.scope(frame.scope).unwrap();
        assert_eq!(scope.kind, ScopeKind::Call);
        assert_eq!(scope.call_id, Some(frame.call_id));
        assert_eq!(host.current_scope(), frame.scope);

        let builtin = host.enter_builtin("length");
        assert_eq!(builtin.scope, frame.scope);
        assert_eq!(host.stack_size(), 2);
        assert_eq!(host.frame(0).and_then(Frame::as_call).unwrap().name, "length");
    }

    #[test]
    fn test_thunk_times_increase() {
        let mut host = SimulatedHost::new();
        let (thunk, birth) = host.create_thunk();
        let frame = host.force(thunk);
        assert_eq!(frame.birth_time, birth);
        assert!(frame.force_entry_time > birth);
        assert!(host.pop().is_some());
        assert_eq!(host.stack_size(), 0);
    }

    #[test]
    fn test_bindings_are_listed() {
        let mut host = SimulatedHost::new();
        let ns = host.add_namespace("stats");
        let inner = host.new_scope(ScopeKind::Other, Some(ns));
        host.bind(ns, "cache", inner);
        assert_eq!(host.namespaces(), vec![ns]);
        assert_eq!(host.scope_bindings(ns)[0].scope, inner);
    }
}
