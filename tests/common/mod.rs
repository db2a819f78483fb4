#![allow(dead_code)]

use scopetrace::{
    AccessKind, ArgumentBinding, CallFrame, ClosureId, ScopeId, SimulatedHost,
    ThunkId, Timestamp, TraceEvent, TraceOutput, TraceResult, TraceSession, TracerConfig,
    ValueInfo,
};

/// Routes session logs to the test harness; `RUST_LOG=scopetrace=trace`
/// shows every dispatched event.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Drives a `SimulatedHost` and a `TraceSession` in lockstep, the way an
/// interpreter would emit events while mutating its own stack.
pub struct Tracer {
    pub host: SimulatedHost,
    pub session: TraceSession,
}

impl Tracer {
    pub fn start() -> Self {
        Self::start_with(SimulatedHost::new(), TracerConfig::default())
    }

    pub fn start_with(host: SimulatedHost, config: TracerConfig) -> Self {
        init_logging();
        let mut tracer = Self {
            host,
            session: TraceSession::new(config).unwrap(),
        };
        tracer.emit(TraceEvent::SessionStart);
        tracer
    }

    pub fn emit(&mut self, event: TraceEvent) {
        self.session.dispatch(&self.host, event).unwrap();
    }

    pub fn try_emit(&mut self, event: TraceEvent) -> TraceResult<()> {
        self.session.dispatch(&self.host, event)
    }

    pub fn lazy(&mut self) -> (ThunkId, Timestamp) {
        self.host.create_thunk()
    }

    pub fn call(&mut self, name: &str, closure: u64, args: &[(ThunkId, Timestamp)]) -> CallFrame {
        let frame = self.host.enter_closure(name, ClosureId::new(closure));
        self.emit_entry(&frame, args);
        frame
    }

    pub fn call_from(&mut self, package: &str, name: &str, closure: u64) -> CallFrame {
        let frame = self
            .host
            .enter_closure_from(name, ClosureId::new(closure), Some(package));
        self.emit_entry(&frame, &[]);
        frame
    }

    pub fn builtin(&mut self, name: &str) -> CallFrame {
        let frame = self.host.enter_builtin(name);
        self.emit_entry(&frame, &[]);
        frame
    }

    fn emit_entry(&mut self, frame: &CallFrame, args: &[(ThunkId, Timestamp)]) {
        let arguments = args
            .iter()
            .enumerate()
            .map(|(i, &(thunk, birth_time))| ArgumentBinding {
                thunk,
                formal_position: u32::try_from(i).unwrap(),
                name: format!("arg{i}"),
                birth_time,
            })
            .collect();
        let actuals = args.iter().map(|&(thunk, _)| Some(thunk)).collect();
        self.emit(TraceEvent::CallEntry {
            call: frame.call_id,
            function: frame.function,
            name: frame.name.clone(),
            scope: frame.scope,
            arguments,
            actuals,
        });
    }

    pub fn exit(&mut self, frame: &CallFrame, result: Option<ValueInfo>) {
        self.host.tick();
        self.emit(TraceEvent::CallExit {
            call: frame.call_id,
            function: frame.function,
            name: frame.name.clone(),
            scope: frame.scope,
            result,
        });
        self.host.pop();
    }

    pub fn force(&mut self, thunk: ThunkId) {
        self.host.force(thunk);
        self.emit(TraceEvent::ThunkForceEntry { thunk });
    }

    pub fn resolve(&mut self, thunk: ThunkId, value: Option<ValueInfo>) {
        self.host.tick();
        self.emit(TraceEvent::ThunkForceExit { thunk, value });
        self.host.pop();
    }

    pub fn access(&mut self, kind: AccessKind, scope: ScopeId, symbol: &str) {
        self.host.tick();
        self.emit(TraceEvent::ScopeAccess {
            kind,
            scope,
            symbol: Some(symbol.to_string()),
            value_type: None,
        });
    }

    pub fn finish(self) -> TraceOutput {
        self.session.finish().unwrap()
    }
}
