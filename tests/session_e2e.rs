mod common;

use common::Tracer;
use scopetrace::{
    AccessKind, CapabilityUse, EffectKind, EventCode, Host, MetaKind, ScopeConstruction,
    ScopeKind, SimulatedHost, ThunkId, ThunkKey, TraceError, TraceEvent, TracerConfig, ValueInfo,
};

#[test]
fn force_of_unregistered_thunk_aborts_session() {
    let mut t = Tracer::start();
    let global = t.host.global_scope();
    let x = t.lazy();
    let _f = t.call("f", 1, &[x]);
    t.force(x.0);
    t.access(AccessKind::Assign, global, "a");
    assert_eq!(t.session.ledgers().effects.len(), 1);

    let stray = ThunkId::new(999);
    t.host.force(stray);
    let err = t
        .try_emit(TraceEvent::ThunkForceEntry { thunk: stray })
        .unwrap_err();
    assert!(matches!(err, TraceError::ThunkNotFound { .. }));
    assert!(t.session.is_aborted());

    let err = t.try_emit(TraceEvent::SessionEnd).unwrap_err();
    assert!(matches!(err, TraceError::SessionAborted { .. }));

    let err = t.session.finish().unwrap_err();
    assert!(matches!(err, TraceError::SessionAborted { .. }));
}

#[test]
fn unmatched_eval_exit_aborts_session() {
    let mut t = Tracer::start();
    let global = t.host.global_scope();
    let err = t
        .try_emit(TraceEvent::EvalExit { scope: global })
        .unwrap_err();
    assert_eq!(err, TraceError::EvalDepthUnderflow { id: global });
    assert!(t.session.is_aborted());
}

#[test]
fn package_scopes_are_named_at_start_and_attach() {
    let mut host = SimulatedHost::new();
    let ns = host.add_namespace("stats");
    let helpers = host.new_scope(ScopeKind::Other, Some(ns));
    host.bind(ns, "helpers", helpers);
    host.bind(helpers, "home", ns);
    let exports = host.add_package("stats");

    let mut t = Tracer::start_with(host, TracerConfig::default());
    let scopes = t.session.scopes();
    assert_eq!(scopes.lookup(ns).unwrap().package(), Some("namespace:stats"));
    assert_eq!(
        scopes.lookup(helpers).unwrap().package(),
        Some("namespace:stats::helpers")
    );
    assert_eq!(scopes.lookup(exports).unwrap().package(), Some("package:stats"));

    let utils = t.host.add_package("utils");
    t.emit(TraceEvent::PackageAttach { scope: utils });
    let scope = t.session.scopes().lookup(utils).unwrap();
    assert!(scope.is_package());
    assert_eq!(scope.package(), Some("package:utils"));
}

#[test]
fn nested_eval_records_scope_chain_and_plain_accesses() {
    let mut t = Tracer::start();
    let global = t.host.global_scope();
    let local = t.host.new_scope(ScopeKind::Other, Some(global));

    let f = t.call("f", 3, &[]);
    let eval = t.builtin("eval");
    t.emit(TraceEvent::EvalEntry {
        scope: local,
        expression: "x <- 1".to_string(),
    });
    t.access(AccessKind::Assign, local, "x");
    t.host.tick();
    t.emit(TraceEvent::EvalExit { scope: local });
    t.exit(&eval, None);
    t.access(AccessKind::Lookup, local, "x");
    t.exit(&f, None);
    let out = t.finish();

    let evals = out.ledgers.evals.rows();
    assert_eq!(evals.len(), 4);
    assert_eq!(evals[0].scope, local);
    assert!(evals[0].direct);
    assert_eq!(evals[1].scope, global);
    assert!(evals[1..].iter().all(|row| !row.direct));
    assert_eq!(evals[0].ancestors.get(0).map(|a| a.call_id), Some(f.call_id));
    assert_eq!(evals[0].backtrace, "f|eval");

    let accesses = out.ledgers.accesses.rows();
    assert_eq!(accesses.len(), 1);
    assert_eq!(accesses[0].function, "A");
    assert_eq!(accesses[0].scope, Some(local));
    assert_eq!(accesses[0].args.symbol.as_deref(), Some("x"));

    let scope = out.scopes.lookup(local).unwrap();
    assert_eq!(scope.eval_depth(), 0);
    assert_eq!(scope.eval_count(), 1);
    assert_eq!(scope.events().to_string(), "|(|A|)|");
    assert_eq!(
        out.scopes.lookup(global).unwrap().events().to_string(),
        "|[|]|"
    );
}

#[test]
fn accessor_frame_turns_plain_access_into_row() {
    let mut t = Tracer::start();
    let global = t.host.global_scope();

    let get = t.call_from("base", "get", 20);
    let inner: Vec<_> = ["a", "b", "c"].iter().map(|n| t.builtin(n)).collect();
    t.access(AccessKind::Lookup, global, "mtcars");
    for frame in inner.iter().rev() {
        t.exit(frame, None);
    }
    t.exit(&get, None);

    // Same shape, but the accessor is not from the base package.
    let imposter = t.call_from("mypkg", "get", 21);
    let inner: Vec<_> = ["a", "b", "c"].iter().map(|n| t.builtin(n)).collect();
    t.access(AccessKind::Lookup, global, "mtcars");
    for frame in inner.iter().rev() {
        t.exit(frame, None);
    }
    t.exit(&imposter, None);

    let out = t.finish();
    let rows = out.ledgers.accesses.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].function, "get");
    assert_eq!(rows[0].scope, Some(global));
    assert_eq!(rows[0].backtrace, "get|a|b|c");
    assert_eq!(out.scopes.lookup(global).unwrap().events().to_string(), "|L|");
}

#[test]
fn get0_inside_dyn_get_is_reported_as_dyn_get() {
    let mut t = Tracer::start();
    let global = t.host.global_scope();

    let _outer = t.call_from("base", "dynGet", 30);
    for i in 0..11 {
        t.builtin(&format!("w{i}"));
    }
    let _get0 = t.call_from("base", "get0", 31);
    for name in ["a", "b", "c"] {
        t.builtin(name);
    }
    t.access(AccessKind::Lookup, global, "x");

    let rows = t.session.ledgers().accesses.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].function, "dynGet");
}

#[test]
fn quiet_region_suppresses_access_handling() {
    let mut t = Tracer::start();
    let global = t.host.global_scope();
    let x = t.lazy();
    let _f = t.call("f", 1, &[x]);
    t.force(x.0);

    let library = t.call("library", 2, &[]);
    t.access(AccessKind::Assign, global, ".packages");
    t.exit(&library, None);
    assert!(t.session.ledgers().effects.is_empty());
    assert_eq!(t.session.scopes().lookup(global).unwrap().last_write_time, None);

    t.access(AccessKind::Assign, global, "y");
    assert_eq!(t.session.ledgers().effects.len(), 1);
}

#[test]
fn mutating_capability_is_attributed_as_write() {
    let mut t = Tracer::start();
    let global = t.host.global_scope();
    let x = t.lazy();
    let f = t.call("f", 1, &[x]);
    t.force(x.0);

    let frame = t.builtin("parent.env<-");
    let mut capability = CapabilityUse::new("parent.env<-");
    capability.depth = Some(3);
    capability.arg_scopes = [Some(global), Some(f.scope)];
    capability.mutating = true;
    capability.args.which = Some(1);
    t.emit(TraceEvent::CapabilityUse(capability));
    t.exit(&frame, None);
    let out = t.finish();

    let row = &out.ledgers.accesses.rows()[0];
    assert_eq!(row.function, "parent.env<-");
    assert_eq!(row.depth, Some(3));
    assert_eq!(row.scope, Some(global));
    assert_eq!(row.arg_scopes, [Some(global), Some(f.scope)]);
    assert_eq!(row.args.which, Some(1));
    assert_eq!(row.backtrace, "f|parent.env<-");

    let effects = out.ledgers.effects.rows();
    assert_eq!(effects.len(), 1);
    assert_eq!(effects[0].kind, EffectKind::Capability("parent.env<-".to_string()));
    assert_eq!(effects[0].target.thunk_id, x.0);

    let named = |scope, name: &str| {
        out.scopes
            .lookup(scope)
            .unwrap()
            .events()
            .iter()
            .any(|code| *code == EventCode::Named(name.to_string()))
    };
    assert!(named(global, "parent.env<-_1"));
    assert!(named(f.scope, "parent.env<-_2"));
}

#[test]
fn scope_construction_and_allocation_provenance() {
    let mut t = Tracer::start();
    let global = t.host.global_scope();
    let f = t.call("f", 7, &[]);

    let frame = t.builtin("new.env");
    let fresh = t.host.new_scope(ScopeKind::Other, Some(f.scope));
    t.emit(TraceEvent::Allocation { scope: fresh });
    t.emit(TraceEvent::ScopeConstruction(ScopeConstruction {
        scope: fresh,
        constructor: "new.env".to_string(),
        hashed: Some(true),
        parent: Some(f.scope),
        size: Some(29),
        frame_count: None,
    }));
    let other = t.host.new_scope(ScopeKind::Other, Some(global));
    t.emit(TraceEvent::ScopeConstruction(ScopeConstruction {
        scope: other,
        constructor: "new.env".to_string(),
        hashed: Some(false),
        parent: Some(global),
        size: None,
        frame_count: None,
    }));
    t.exit(&frame, Some(ValueInfo::scope(fresh)));
    t.exit(&f, Some(ValueInfo::scope(fresh)));
    t.emit(TraceEvent::Allocation { scope: fresh });
    let out = t.finish();

    let rows = out.ledgers.constructions.rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].parent_depth, Some(1));
    assert_eq!(rows[0].parent_kind, None);
    assert_eq!(rows[0].size, Some(29));
    assert_eq!(rows[1].parent_depth, None);
    assert_eq!(rows[1].parent_kind.as_deref(), Some("global"));

    let scope = out.scopes.lookup(fresh).unwrap();
    let provenance = scope.provenance().unwrap();
    assert_eq!(provenance.ancestors.get(0).map(|a| a.call_id), Some(f.call_id));
    assert_eq!(provenance.backtrace, "f|new.env");
    assert_eq!(
        scope.events().to_string(),
        "|:new.env_0|:Return|"
    );

    let returned = &out.ledgers.accesses.rows()[0];
    assert_eq!(returned.function, "Return");
    assert_eq!(returned.result_scope, Some(fresh));
    assert_eq!(returned.args.fun_id.map(|id| id.get()), Some(7));
}

#[test]
fn thunk_metadata_lookups_are_counted() {
    let mut t = Tracer::start();
    let x = t.lazy();
    let f = t.call("f", 1, &[x]);
    t.emit(TraceEvent::ThunkExpressionLookup { thunk: x.0 });
    t.exit(&f, None);
    t.emit(TraceEvent::ThunkValueLookup { thunk: x.0 });
    t.emit(TraceEvent::ThunkValueLookup { thunk: ThunkId::new(404) });
    let out = t.finish();

    let record = out.thunks.iter().next().unwrap();
    assert_eq!(record.expression_lookups(), 1);
    assert_eq!(record.value_lookups(), 1);
    assert!(record.has_escaped());
}

#[test]
fn config_from_json_shortens_ancestor_chain() {
    let config =
        TracerConfig::from_json(r#"{"ancestor_depth": 2, "quiet_functions": []}"#).unwrap();
    assert!(config.quiet_functions.is_empty());

    let mut t = Tracer::start_with(SimulatedHost::new(), config);
    let library = t.call("library", 1, &[]);
    t.exit(&library, None);
    let out = t.finish();

    let tables = out.tables();
    let evals = tables.iter().find(|table| table.name() == "evals").unwrap();
    let columns: Vec<&str> = evals.column_names().collect();
    assert!(columns.contains(&"source_call_id_2"));
    assert!(!columns.contains(&"source_fun_id_3"));

    assert!(TracerConfig::from_json(r#"{"ancestor_depth": 99}"#).is_err());
    assert!(TracerConfig::from_json("not json").is_err());
}

#[test]
fn expression_inspection_depth_is_measured_from_owning_call() {
    let mut t = Tracer::start();
    let x = t.lazy();
    let f = t.call("f", 1, &[x]);
    let g = t.call("g", 2, &[]);
    let quote = t.builtin("substitute");
    t.emit(TraceEvent::ThunkSubstitute { thunk: x.0 });
    t.emit(TraceEvent::ThunkExpressionLookup { thunk: x.0 });
    t.exit(&quote, None);
    t.exit(&g, None);
    t.exit(&f, None);

    // The owning call is gone: counted, but not measured.
    t.emit(TraceEvent::ThunkExpressionLookup { thunk: x.0 });
    let out = t.finish();

    let rows = out.ledgers.metaprograms.rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].kind, MetaKind::Substitute);
    assert_eq!(rows[1].kind, MetaKind::Expression);
    for row in rows {
        assert_eq!(row.depth, 1);
        assert_eq!(row.thunk.call_id, f.call_id);
        assert_eq!(row.sink.map(|a| a.call_id), Some(g.call_id));
        assert_eq!(row.backtrace, "f|g|substitute");
    }

    let record = out.thunks.get(ThunkKey::new(x.0, f.call_id)).unwrap();
    assert_eq!(record.expression_lookups(), 2);
    assert_eq!(record.metaprograms(), 1);
    assert_eq!(record.meta_depth(), Some(1));
    assert!(record.has_escaped());

    let tables = out.tables();
    let meta = tables.iter().find(|table| table.name() == "metaprograms").unwrap();
    assert_eq!(meta.nrow(), 2);
    assert_eq!(
        meta.column("type").unwrap().as_character().unwrap(),
        ["substitute", "expression"]
    );
}

#[test]
fn configured_named_return_replaces_return_label() {
    let config = TracerConfig {
        named_returns: vec!["asNamespace".to_string()],
        ..TracerConfig::default()
    };
    let mut t = Tracer::start_with(SimulatedHost::new(), config);
    let ns = t.host.add_namespace("stats");

    let lookup = t.call("asNamespace", 5, &[]);
    t.exit(&lookup, Some(ValueInfo::scope(ns)));
    let f = t.call("getNamespace", 6, &[]);
    t.exit(&f, Some(ValueInfo::scope(ns)));
    let out = t.finish();

    let rows = out.ledgers.accesses.rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].function, "asNamespace");
    assert_eq!(rows[0].args.fun_id, None);
    assert_eq!(rows[1].function, "Return");
    assert_eq!(rows[1].args.fun_id.map(|id| id.get()), Some(6));
    assert_eq!(
        out.scopes.lookup(ns).unwrap().events().to_string(),
        "|:asNamespace|:Return|"
    );
}
