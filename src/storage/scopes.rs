use std::collections::HashSet;

use indexmap::IndexMap;

use crate::error::{TraceError, TraceResult};
use crate::host::{Host, ScopeHandle};
use crate::ids::ScopeId;
use crate::scope::Scope;

/// Id-keyed registry of scope records.
#[derive(Debug, Default)]
pub struct ScopeTable {
    scopes: IndexMap<ScopeId, Scope>,
}

impl ScopeTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a scope, or refreshes the owning call of an existing one.
    ///
    /// Fields fixed at creation (kind, parent, birth time) are never
    /// overwritten by a later handle.
    pub fn insert(&mut self, handle: &ScopeHandle) -> &mut Scope {
        let scope = self.scopes.entry(handle.id).or_insert_with(|| {
            let mut scope = Scope::new(handle.id, handle.kind, handle.birth_time);
            scope.name.clone_from(&handle.name);
            scope.hashed = handle.hashed;
            scope.parent = handle.parent;
            scope
        });
        if handle.call_id.is_some() {
            scope.call_id = handle.call_id;
        }
        if scope.name.is_none() {
            scope.name.clone_from(&handle.name);
        }
        scope.observe_locked(handle.locked);
        scope
    }

    /// Resolves `id` through the host and inserts it.
    ///
    /// # Errors
    ///
    /// Returns `TraceError::ScopeNotFound` if the host has no such scope.
    pub fn ensure<H: Host + ?Sized>(&mut self, host: &H, id: ScopeId) -> TraceResult<&mut Scope> {
        let handle = host.scope(id).ok_or(TraceError::ScopeNotFound { id })?;
        Ok(self.insert(&handle))
    }

    #[must_use]
    pub fn lookup(&self, id: ScopeId) -> Option<&Scope> {
        self.scopes.get(&id)
    }

    pub fn lookup_mut(&mut self, id: ScopeId) -> Option<&mut Scope> {
        self.scopes.get_mut(&id)
    }

    #[must_use]
    pub fn contains(&self, id: ScopeId) -> bool {
        self.scopes.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Scope> {
        self.scopes.values()
    }

    /// Names every scope reachable from `root` through scope-valued
    /// bindings, depth first.
    ///
    /// `root` is named `qualified_name`; a scope reached through binding
    /// `b` of a scope named `n` is named `n::b`. A scope that already has a
    /// package name keeps it and is not walked again. Returns the number of
    /// scopes that received a name.
    ///
    /// # Errors
    ///
    /// Returns `TraceError::ScopeNotFound` if the host cannot resolve a
    /// reachable scope.
    pub fn discover<H: Host + ?Sized>(
        &mut self,
        host: &H,
        root: ScopeId,
        qualified_name: &str,
    ) -> TraceResult<usize> {
        // Cycle guard for this walk; the set-once package name only guards
        // against re-walking scopes named by an earlier discovery.
        let mut visited: HashSet<ScopeId> = HashSet::new();
        let mut pending = vec![(root, qualified_name.to_string())];
        let mut named = 0;

        while let Some((id, name)) = pending.pop() {
            if !visited.insert(id) {
                continue;
            }

            let scope = self.ensure(host, id)?;
            if !scope.set_package(name.as_str()) {
                continue;
            }
            named += 1;

            // Reversed so bindings are visited in host order.
            for binding in host.scope_bindings(id).into_iter().rev() {
                if !visited.contains(&binding.scope) {
                    pending.push((binding.scope, format!("{name}::{}", binding.name)));
                }
            }
        }

        Ok(named)
    }
}
