//! Tracing session: the explicit context that owns every registry and
//! ledger and routes host events to their handlers.
//!
//! Handlers run synchronously inside the host's callback. A fatal error
//! (the host broke the entry/exit ordering contract) aborts the session;
//! from then on every event is rejected and [`TraceSession::finish`]
//! discards the partial ledgers.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use crate::attribution::{self, AccessMode, Blame};
use crate::backtrace::Backtrace;
use crate::call::CallActivation;
use crate::config::TracerConfig;
use crate::error::{TraceError, TraceResult};
use crate::event::{ArgumentBinding, CapabilityUse, ScopeConstruction, TraceEvent, ValueInfo};
use crate::host::{FunctionKind, Host};
use crate::ids::{CallId, ScopeId, SessionId, ThunkId, Timestamp};
use crate::ledger::{
    Ancestor, AncestorChain, CallReflectionRow, EffectRow, EvalRow, Ledgers, MetaKind,
    MetaprogramRow, ScopeAccessRow, ScopeConstructionRow, ThunkRef,
};
use crate::scope::{AccessKind, EventCode, Provenance, Scope, ScopeKind};
use crate::storage::{CallTable, ScopeTable, ThunkTable};
use crate::thunk::{EffectKind, Thunk, ThunkKey};

#[derive(Debug, Clone)]
enum SessionState {
    Active,
    Aborted(TraceError),
}

/// Everything a finished session produced.
#[derive(Debug)]
pub struct TraceOutput {
    /// Session that produced the output.
    pub session_id: SessionId,
    /// Wall-clock start of the session.
    pub started_at: DateTime<Utc>,
    /// Wall-clock time `finish` was called.
    pub finished_at: DateTime<Utc>,
    /// Length of every ancestor chain in the output.
    pub ancestor_depth: usize,
    /// Every scope observed, in first-seen order.
    pub scopes: ScopeTable,
    /// Every closure activation, in entry order.
    pub calls: CallTable,
    /// Every argument thunk record, in registration order.
    pub thunks: ThunkTable,
    /// Every ledger.
    pub ledgers: Ledgers,
}

/// One tracing session.
#[derive(Debug)]
pub struct TraceSession {
    id: SessionId,
    started_at: DateTime<Utc>,
    config: TracerConfig,
    state: SessionState,
    scopes: ScopeTable,
    calls: CallTable,
    thunks: ThunkTable,
    backtrace: Backtrace,
    ledgers: Ledgers,
    quiet_depth: u32,
}

impl Default for TraceSession {
    fn default() -> Self {
        Self::with_config(TracerConfig::default())
    }
}

impl TraceSession {
    /// Creates a session after validating `config`.
    ///
    /// # Errors
    ///
    /// Returns `TraceError::InvalidConfig` if validation fails.
    pub fn new(config: TracerConfig) -> TraceResult<Self> {
        Ok(Self::with_config(config.validate()?))
    }

    fn with_config(config: TracerConfig) -> Self {
        let backtrace = Backtrace::new(config.backtrace_delimiter.clone());
        Self {
            id: SessionId::new(),
            started_at: Utc::now(),
            config,
            state: SessionState::Active,
            scopes: ScopeTable::new(),
            calls: CallTable::new(),
            thunks: ThunkTable::new(),
            backtrace,
            ledgers: Ledgers::default(),
            quiet_depth: 0,
        }
    }

    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Wall-clock time the session was created.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub const fn config(&self) -> &TracerConfig {
        &self.config
    }

    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        matches!(self.state, SessionState::Aborted(_))
    }

    #[must_use]
    pub const fn scopes(&self) -> &ScopeTable {
        &self.scopes
    }

    #[must_use]
    pub const fn calls(&self) -> &CallTable {
        &self.calls
    }

    #[must_use]
    pub const fn thunks(&self) -> &ThunkTable {
        &self.thunks
    }

    #[must_use]
    pub const fn ledgers(&self) -> &Ledgers {
        &self.ledgers
    }

    #[must_use]
    pub const fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Handles one host event.
    ///
    /// Exit events must be dispatched while the exiting frame is still on
    /// the host stack.
    ///
    /// # Errors
    ///
    /// Returns `TraceError::SessionAborted` once the session is aborted.
    /// Fatal errors from the handler abort the session and are returned;
    /// non-fatal errors (e.g. an invalid capability name) are returned and
    /// leave the session active.
    pub fn dispatch<H: Host + ?Sized>(&mut self, host: &H, event: TraceEvent) -> TraceResult<()> {
        if let SessionState::Aborted(cause) = &self.state {
            return Err(TraceError::SessionAborted {
                reason: cause.to_string(),
            });
        }

        let name = event.name();
        trace!(session = %self.id, event = name, time = %host.time(), "handling event");

        let result = self.handle(host, event);
        if let Err(err) = &result {
            if err.is_fatal() {
                warn!(session = %self.id, event = name, error = %err, "aborting trace session");
                self.state = SessionState::Aborted(err.clone());
            }
        }
        result
    }

    /// Ends the session and hands over every registry and ledger.
    ///
    /// # Errors
    ///
    /// Returns `TraceError::SessionAborted` if the session was aborted; the
    /// partial ledgers are dropped.
    pub fn finish(self) -> TraceResult<TraceOutput> {
        match self.state {
            SessionState::Aborted(cause) => Err(TraceError::SessionAborted {
                reason: cause.to_string(),
            }),
            SessionState::Active => {
                debug!(
                    session = %self.id,
                    scopes = self.scopes.len(),
                    calls = self.calls.len(),
                    thunks = self.thunks.len(),
                    effects = self.ledgers.effects.len(),
                    "trace session finished"
                );
                Ok(TraceOutput {
                    session_id: self.id,
                    started_at: self.started_at,
                    finished_at: Utc::now(),
                    ancestor_depth: self.config.ancestor_depth,
                    scopes: self.scopes,
                    calls: self.calls,
                    thunks: self.thunks,
                    ledgers: self.ledgers,
                })
            }
        }
    }

    fn handle<H: Host + ?Sized>(&mut self, host: &H, event: TraceEvent) -> TraceResult<()> {
        match event {
            TraceEvent::SessionStart => self.on_session_start(host),
            TraceEvent::SessionEnd => {
                debug!(
                    session = %self.id,
                    accesses = self.ledgers.accesses.len(),
                    evals = self.ledgers.evals.len(),
                    effects = self.ledgers.effects.len(),
                    "host ended trace session"
                );
                Ok(())
            }
            TraceEvent::PackageLoad { scope } => self.discover(host, scope, "namespace"),
            TraceEvent::PackageAttach { scope } => self.discover(host, scope, "package"),
            TraceEvent::CallEntry {
                call,
                function,
                name,
                scope,
                arguments,
                actuals,
            } => self.on_call_entry(host, call, function, name, scope, arguments, &actuals),
            TraceEvent::CallExit {
                call,
                function,
                name,
                scope,
                result,
            } => self.on_call_exit(host, call, function, &name, scope, result),
            TraceEvent::ThunkForceEntry { thunk } => self.on_force_entry(host, thunk),
            TraceEvent::ThunkForceExit { thunk, value } => self.on_force_exit(host, thunk, value),
            TraceEvent::ThunkValueLookup { thunk } => self.on_thunk_lookup(host, thunk, None),
            TraceEvent::ThunkExpressionLookup { thunk } => {
                self.on_thunk_lookup(host, thunk, Some(MetaKind::Expression))
            }
            TraceEvent::ThunkSubstitute { thunk } => {
                self.on_thunk_lookup(host, thunk, Some(MetaKind::Substitute))
            }
            TraceEvent::ScopeAccess {
                kind,
                scope,
                symbol,
                value_type,
            } => self.on_scope_access(host, kind, scope, symbol, value_type),
            TraceEvent::AttributeSet {
                scope,
                attribute,
                values,
            } => self.on_attribute_set(host, scope, &attribute, values),
            TraceEvent::Allocation { scope } => self.on_allocation(host, scope),
            TraceEvent::DispatchEntry { scope } => {
                self.scopes.ensure(host, scope)?.set_dispatch();
                Ok(())
            }
            TraceEvent::EvalEntry { scope, expression } => self.on_eval_entry(host, scope, expression),
            TraceEvent::EvalExit { scope } => self.on_eval_exit(host, scope),
            TraceEvent::Error => self.on_error(host),
            TraceEvent::CapabilityUse(capability) => self.on_capability(host, capability),
            TraceEvent::ScopeConstruction(construction) => self.on_construction(host, construction),
        }
    }

    fn on_session_start<H: Host + ?Sized>(&mut self, host: &H) -> TraceResult<()> {
        for namespace in host.namespaces() {
            self.discover(host, namespace, "namespace")?;
        }
        for package in host.packages() {
            self.discover(host, package, "package")?;
        }
        self.scopes.ensure(host, host.global_scope())?;
        self.scopes.ensure(host, host.empty_scope())?;

        debug!(session = %self.id, scopes = self.scopes.len(), "trace session started");
        Ok(())
    }

    fn discover<H: Host + ?Sized>(&mut self, host: &H, root: ScopeId, prefix: &str) -> TraceResult<()> {
        let qualified = host
            .scope(root)
            .and_then(|handle| handle.name)
            .map_or_else(|| prefix.to_string(), |name| format!("{prefix}:{name}"));
        let named = self.scopes.discover(host, root, &qualified)?;
        trace!(root = %root, name = %qualified, named, "discovered package scopes");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn on_call_entry<H: Host + ?Sized>(
        &mut self,
        host: &H,
        call: CallId,
        function: FunctionKind,
        name: String,
        scope: ScopeId,
        arguments: Vec<ArgumentBinding>,
        actuals: &[Option<ThunkId>],
    ) -> TraceResult<()> {
        self.backtrace.push(call, name.as_str());

        let Some(closure_id) = function.closure() else {
            return Ok(());
        };

        self.scopes.ensure(host, scope)?.push_event(EventCode::CallEntry);

        for argument in arguments {
            self.thunks.insert(Thunk::new(
                ThunkKey::new(argument.thunk, call),
                closure_id,
                argument.formal_position,
                argument.name,
                argument.birth_time,
            ));
        }

        for (position, thunk) in actuals.iter().enumerate() {
            let Some(thunk) = thunk else { continue };
            if let Some(record) = self.thunks.lookup_permissive(*thunk, call) {
                record.set_actual_position(u32::try_from(position).unwrap_or(u32::MAX));
            }
        }

        if self.config.is_quiet(&name) {
            self.quiet_depth += 1;
        }

        self.calls
            .insert(CallActivation::new(call, closure_id, name, scope, host.time()));
        Ok(())
    }

    fn on_call_exit<H: Host + ?Sized>(
        &mut self,
        host: &H,
        call: CallId,
        function: FunctionKind,
        name: &str,
        scope: ScopeId,
        result: Option<ValueInfo>,
    ) -> TraceResult<()> {
        if function.closure().is_none() {
            self.backtrace.pop()?;
            return Ok(());
        }

        let now = host.time();
        self.scopes.ensure(host, scope)?.push_event(EventCode::CallExit);

        let activation = self.calls.lookup_mut(call)?;
        activation.exit(now, result.as_ref().map(|r| r.type_name.clone()));
        let closure_id = activation.closure_id;

        self.backtrace.pop()?;
        if self.config.is_quiet(name) {
            self.quiet_depth = self.quiet_depth.saturating_sub(1);
        }

        let Some(returned) = result.and_then(|r| r.scope) else {
            return Ok(());
        };

        let label = self.config.return_label(name).to_string();
        let named = label != "Return";
        self.scopes
            .ensure(host, returned)?
            .push_event(EventCode::named(label.as_str())?);

        let mut row = self.access_row(host, now, label);
        row.result_type = Some("environment".to_string());
        row.result_scope = Some(returned);
        if !named {
            row.args.fun_id = Some(closure_id);
        }
        self.ledgers.accesses.append(row);
        Ok(())
    }

    fn on_force_entry<H: Host + ?Sized>(&mut self, host: &H, thunk: ThunkId) -> TraceResult<()> {
        let keys = self.thunks.keys_for(thunk);
        if keys.is_empty() {
            return Err(TraceError::thunk_not_found(thunk, None));
        }

        let now = host.time();
        let mut birth_time = None;

        for key in keys {
            let formal_position = self.thunks.lookup(thunk, key.call)?.formal_position;

            // Force position is read before the call records this force.
            let call = self.calls.lookup_mut(key.call)?;
            let position = call.force_argument(formal_position);
            let call_escaped = attribution::thunk_escaped(call);

            let record = self.thunks.lookup_mut(thunk, key.call)?;
            record.set_force_position(position);
            // Escape must be settled before depth is computed.
            if call_escaped {
                record.mark_escaped();
            }
            let escaped = record.has_escaped();
            birth_time = Some(record.birth_time);

            let (depth, companion) =
                attribution::force_depth_and_companion(host, &self.thunks, key, escaped);
            self.thunks
                .lookup_mut(thunk, key.call)?
                .force(now, depth, companion);
        }

        let Some(birth_time) = birth_time else {
            return Ok(());
        };
        if let Some(parent) = attribution::parent_thunk(host, &self.thunks, birth_time)? {
            for key in self.thunks.keys_for(thunk) {
                self.thunks.lookup_mut(thunk, key.call)?.set_parent(parent);
            }
        }
        Ok(())
    }

    fn on_force_exit<H: Host + ?Sized>(
        &mut self,
        host: &H,
        thunk: ThunkId,
        value: Option<ValueInfo>,
    ) -> TraceResult<()> {
        let keys = self.thunks.keys_for(thunk);
        if keys.is_empty() {
            return Err(TraceError::thunk_not_found(thunk, None));
        }

        let now = host.time();
        let value_type = value.as_ref().map(|v| v.type_name.clone());
        for key in keys {
            self.thunks
                .lookup_mut(thunk, key.call)?
                .finish_force(now, value_type.clone());
        }

        let Some(returned) = value.and_then(|v| v.scope) else {
            return Ok(());
        };

        let latest = self.thunks.latest(thunk)?;
        let closure_id = self.calls.lookup(latest.call)?.closure_id;
        self.scopes
            .ensure(host, returned)?
            .push_event(EventCode::named("Argument")?);

        let mut row = self.access_row(host, now, "Argument");
        row.result_type = Some("environment".to_string());
        row.result_scope = Some(returned);
        row.args.fun_id = Some(closure_id);
        self.ledgers.accesses.append(row);
        Ok(())
    }

    /// Value lookups pass `None`; expression inspections pass their kind
    /// and are measured against each owning call still on the stack.
    fn on_thunk_lookup<H: Host + ?Sized>(
        &mut self,
        host: &H,
        thunk: ThunkId,
        meta: Option<MetaKind>,
    ) -> TraceResult<()> {
        let now = host.time();
        for key in self.thunks.keys_for(thunk) {
            let escaped = attribution::thunk_escaped(self.calls.lookup(key.call)?);
            let record = self.thunks.lookup_mut(thunk, key.call)?;
            if escaped {
                record.mark_escaped();
            }
            match meta {
                None => record.record_value_lookup(),
                Some(MetaKind::Expression) => record.record_expression_lookup(),
                // An expression lookup follows every substitute.
                Some(MetaKind::Substitute) => {}
            }

            let Some(kind) = meta else { continue };
            let Some(found) = attribution::meta_depth(host, key.call) else {
                continue;
            };
            if kind == MetaKind::Expression {
                record.metaprogram(found.depth);
            }
            let thunk = self.thunk_ref(key)?;
            self.ledgers.metaprograms.append(MetaprogramRow {
                time: now,
                kind,
                thunk,
                sink: found.sink,
                depth: found.depth,
                backtrace: self.backtrace.to_string(),
            });
        }
        Ok(())
    }

    fn on_scope_access<H: Host + ?Sized>(
        &mut self,
        host: &H,
        kind: AccessKind,
        scope: ScopeId,
        symbol: Option<String>,
        value_type: Option<String>,
    ) -> TraceResult<()> {
        if self.quiet_depth > 0 {
            return Ok(());
        }

        let now = host.time();
        let accessor = attribution::accessor_name(host, &self.config, kind);

        let record = self.scopes.ensure(host, scope)?;
        if kind.is_write() {
            record.record_write(now);
        }
        let function =
            accessor.or_else(|| record.inside_eval().then(|| kind.label().to_string()));
        if function.is_some() {
            record.push_event(kind.code());
        }
        let birth_time = record.birth_time;

        if let Some(function) = function {
            let mut row = self.access_row(host, now, function);
            row.scope = Some(scope);
            row.value_type = value_type;
            row.args.symbol.clone_from(&symbol);
            self.ledgers.accesses.append(row);
        }

        self.attribute(
            host,
            EffectKind::Access(kind),
            AccessMode::from(kind),
            Some((scope, birth_time)),
            symbol,
        )
    }

    fn on_attribute_set<H: Host + ?Sized>(
        &mut self,
        host: &H,
        scope: ScopeId,
        attribute: &str,
        values: Vec<Option<String>>,
    ) -> TraceResult<()> {
        let record = self.scopes.ensure(host, scope)?;
        if attribute != "class" {
            return Ok(());
        }
        record.push_event(EventCode::ClassSet);
        for class in values.into_iter().flatten() {
            record.add_class(&class);
        }
        Ok(())
    }

    fn on_allocation<H: Host + ?Sized>(&mut self, host: &H, scope: ScopeId) -> TraceResult<()> {
        let provenance = Provenance {
            ancestors: self.ancestors(host, 0),
            backtrace: self.backtrace.to_string(),
        };
        self.scopes.ensure(host, scope)?.set_provenance(provenance);
        Ok(())
    }

    fn on_eval_entry<H: Host + ?Sized>(
        &mut self,
        host: &H,
        scope: ScopeId,
        expression: String,
    ) -> TraceResult<()> {
        let now = host.time();
        let ancestors = self.ancestors(host, self.config.caller_frame_offset);
        let backtrace = self.backtrace.to_string();

        for (index, id) in eval_chain(host, &self.config, scope)?.into_iter().enumerate() {
            let direct = index == 0;
            self.scopes.ensure(host, id)?.push_eval(direct);
            self.ledgers.evals.append(EvalRow {
                time: now,
                scope: id,
                direct,
                expression: expression.clone(),
                ancestors,
                backtrace: backtrace.clone(),
            });
        }
        Ok(())
    }

    fn on_eval_exit<H: Host + ?Sized>(&mut self, host: &H, scope: ScopeId) -> TraceResult<()> {
        for (index, id) in eval_chain(host, &self.config, scope)?.into_iter().enumerate() {
            self.scopes.ensure(host, id)?.pop_eval(index == 0)?;
        }
        Ok(())
    }

    fn on_error<H: Host + ?Sized>(&mut self, host: &H) -> TraceResult<()> {
        let pending = attribution::pending_thunks(host, &self.thunks)?;
        let blame = attribution::blame_error(&pending);
        self.record_effects(host, &EffectKind::Error, None, None, &blame)
    }

    fn on_capability<H: Host + ?Sized>(
        &mut self,
        host: &H,
        capability: CapabilityUse,
    ) -> TraceResult<()> {
        // Reject a bad name before anything is recorded.
        EventCode::named(capability.name.as_str())?;

        let now = host.time();
        let result_scope = capability.result.as_ref().and_then(|r| r.scope);

        if let Some(id) = result_scope {
            let mut event = format!("{}_0", capability.name);
            if let Some(depth) = attribution::scope_depth(host, id, 0) {
                // The innermost closure frame is the capability's own wrapper.
                event.push_str(&format!("^{}", depth.saturating_sub(1)));
            }
            self.scopes.ensure(host, id)?.push_event(EventCode::named(event)?);
        }

        for (slot, id) in capability.arg_scopes.iter().enumerate() {
            let Some(id) = *id else { continue };
            let record = self.scopes.ensure(host, id)?;
            record.push_event(EventCode::named(format!("{}_{}", capability.name, slot + 1))?);
            if slot == 0 {
                match capability.lock {
                    Some(true) => record.lock(),
                    Some(false) => record.unlock(),
                    None => {}
                }
            }
        }

        let target = capability.target();
        let mut row = self.access_row(host, now, capability.name.as_str());
        row.depth = capability.depth;
        row.scope = target;
        row.result_type = capability.result.as_ref().map(|r| r.type_name.clone());
        row.result_scope = result_scope;
        row.arg_scopes = capability.arg_scopes;
        row.args = capability.args.clone();
        self.ledgers.accesses.append(row);

        let mode = if capability.mutating {
            AccessMode::Write
        } else {
            AccessMode::Read
        };
        let target = target.and_then(|id| self.scopes.lookup(id).map(|s| (id, s.birth_time)));
        self.attribute(
            host,
            EffectKind::Capability(capability.name.clone()),
            mode,
            target,
            capability.args.symbol,
        )?;

        if let Some(id) = result_scope {
            self.reflect_call_scope(host, &capability.name, id)?;
        }
        Ok(())
    }

    /// Records a capability handing out `scope` when it belongs to a
    /// closure call, and marks the call's scope escaped if it outlives it.
    fn reflect_call_scope<H: Host + ?Sized>(
        &mut self,
        host: &H,
        capability: &str,
        scope: ScopeId,
    ) -> TraceResult<()> {
        let Some(call_id) = self.scopes.lookup(scope).and_then(|s| s.call_id) else {
            return Ok(());
        };
        let Some(call) = self.calls.get(call_id) else {
            return Ok(());
        };
        let source = Ancestor {
            closure_id: call.closure_id,
            call_id,
        };
        let escaped = attribution::scope_escapes(host, call);

        let found = attribution::reflection_sink(host, &self.thunks, call_id)?;
        let sink_thunk = found.thunk.map(|key| self.thunk_ref(key)).transpose()?;
        self.ledgers.reflections.append(CallReflectionRow {
            time: host.time(),
            capability: capability.to_string(),
            source,
            sink: found.sink,
            sink_thunk,
            depth: found.depth,
            escaped,
            backtrace: self.backtrace.to_string(),
        });

        if !escaped {
            return Ok(());
        }
        let newly = self
            .calls
            .get_mut(call_id)
            .is_some_and(CallActivation::mark_scope_escaped);
        if newly {
            self.scopes.ensure(host, scope)?.push_event(EventCode::Escape);
            debug!(call = %call_id, scope = %scope, capability, "call scope escaped");
        }
        Ok(())
    }

    fn on_construction<H: Host + ?Sized>(
        &mut self,
        host: &H,
        construction: ScopeConstruction,
    ) -> TraceResult<()> {
        EventCode::named(construction.constructor.as_str())?;

        let now = host.time();
        let ancestors = self.ancestors(host, self.config.caller_frame_offset);
        let backtrace = self.backtrace.to_string();

        let mut parent_depth = None;
        let mut parent_kind = None;
        if let Some(parent) = construction.parent {
            parent_depth = attribution::scope_depth(host, parent, 0);
            let record = self.scopes.ensure(host, parent)?;
            record.push_event(EventCode::named(format!("{}_1", construction.constructor))?);
            parent_kind = parent_label(record);
        }

        self.scopes
            .ensure(host, construction.scope)?
            .push_event(EventCode::named(format!("{}_0", construction.constructor))?);

        self.ledgers.constructions.append(ScopeConstructionRow {
            time: now,
            scope: construction.scope,
            constructor: construction.constructor,
            hashed: construction.hashed,
            parent: construction.parent,
            parent_depth,
            parent_kind,
            size: construction.size,
            frame_count: construction.frame_count,
            ancestors,
            backtrace,
        });
        Ok(())
    }

    fn attribute<H: Host + ?Sized>(
        &mut self,
        host: &H,
        kind: EffectKind,
        mode: AccessMode,
        target: Option<(ScopeId, Timestamp)>,
        symbol: Option<String>,
    ) -> TraceResult<()> {
        let pending = attribution::pending_thunks(host, &self.thunks)?;
        if pending.is_empty() {
            return Ok(());
        }
        let blame = attribution::attribute(&pending, mode, target.map(|(_, birth)| birth));
        self.record_effects(host, &kind, target.map(|(id, _)| id), symbol, &blame)
    }

    fn record_effects<H: Host + ?Sized>(
        &mut self,
        host: &H,
        kind: &EffectKind,
        scope: Option<ScopeId>,
        symbol: Option<String>,
        blame: &[Blame],
    ) -> TraceResult<()> {
        if blame.is_empty() {
            return Ok(());
        }

        let now = host.time();
        let ancestors = self.ancestors(host, self.config.caller_frame_offset);
        let backtrace = self.backtrace.to_string();
        // Errors go to the closest record only; other effects reach every
        // call the thunk was passed through.
        let every_record = *kind != EffectKind::Error;

        for b in blame {
            let source = b.source.map(|key| self.thunk_ref(key)).transpose()?;
            let targets = if every_record {
                self.thunks.keys_for(b.key.thunk)
            } else {
                vec![b.key]
            };

            for key in targets {
                self.thunks
                    .lookup_mut(key.thunk, key.call)?
                    .add_effect(kind.clone(), b.transitive);

                let target = self.thunk_ref(key)?;
                let appended = self.ledgers.effects.append(EffectRow {
                    time: now,
                    kind: kind.clone(),
                    scope,
                    symbol: symbol.clone(),
                    transitive: b.transitive,
                    source,
                    target,
                    ancestors,
                    backtrace: backtrace.clone(),
                });
                if appended {
                    trace!(thunk = %key, effect = %kind, transitive = b.transitive, "attributed effect");
                }
            }
        }
        Ok(())
    }

    fn thunk_ref(&self, key: ThunkKey) -> TraceResult<ThunkRef> {
        let record = self.thunks.lookup(key.thunk, key.call)?;
        Ok(ThunkRef {
            closure_id: record.closure_id,
            call_id: key.call,
            thunk_id: key.thunk,
            formal_position: record.formal_position,
        })
    }

    fn ancestors<H: Host + ?Sized>(&self, host: &H, start: usize) -> AncestorChain {
        attribution::caller_chain(host, start, self.config.ancestor_depth)
    }

    fn access_row<H: Host + ?Sized>(
        &self,
        host: &H,
        time: Timestamp,
        function: impl Into<String>,
    ) -> ScopeAccessRow {
        ScopeAccessRow::new(
            time,
            function,
            self.ancestors(host, self.config.caller_frame_offset),
            self.backtrace.to_string(),
        )
    }
}

/// Scopes touched by a nested eval in `scope`: the scope itself, then its
/// parents up to the first boundary kind.
fn eval_chain<H: Host + ?Sized>(
    host: &H,
    config: &TracerConfig,
    scope: ScopeId,
) -> TraceResult<Vec<ScopeId>> {
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut next = Some(scope);

    while let Some(id) = next {
        let handle = host.scope(id).ok_or(TraceError::ScopeNotFound { id })?;
        if config.eval_boundary_kinds.contains(&handle.kind) || !seen.insert(id) {
            break;
        }
        chain.push(id);
        next = handle.parent;
    }
    Ok(chain)
}

fn parent_label(scope: &Scope) -> Option<String> {
    match scope.kind {
        ScopeKind::Global => Some("global".to_string()),
        ScopeKind::Empty => Some("empty".to_string()),
        ScopeKind::Base => Some("base".to_string()),
        _ => scope.name.clone(),
    }
}
