//! Attribution engine.
//!
//! Every decision here is derived from the *live* stack at the moment of the
//! event, never from stored history: forcing one thunk can recursively force
//! another, so depth counters kept across events would drift.
//!
//! Timestamps used below, for a pending thunk `T` and a scope `S`:
//!
//! * `t1(T)` is the thunk's birth time,
//! * `t3(T)` is its force-entry time,
//! * `t2` is the birth time of `S`.

use crate::call::CallActivation;
use crate::config::TracerConfig;
use crate::error::TraceResult;
use crate::host::{frames_from, Frame, Host};
use crate::ids::{CallId, ScopeId, Timestamp};
use crate::ledger::{Ancestor, AncestorChain};
use crate::scope::AccessKind;
use crate::storage::ThunkTable;
use crate::thunk::ThunkKey;

/// An argument thunk being forced on the live stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingThunk {
    /// Record of the closest call the thunk was passed to.
    pub key: ThunkKey,
    pub birth_time: Timestamp,
    pub force_entry_time: Timestamp,
    /// Stack index of the force frame.
    pub index: usize,
}

/// Collects the pending argument thunks, innermost first.
///
/// # Errors
///
/// Returns `TraceError::ThunkNotFound` if a force frame refers to a thunk no
/// call entry registered.
pub fn pending_thunks<H: Host + ?Sized>(
    host: &H,
    thunks: &ThunkTable,
) -> TraceResult<Vec<PendingThunk>> {
    frames_from(host, 0)
        .filter_map(|(index, frame)| frame.as_argument_thunk().map(|t| (index, t)))
        .map(|(index, frame)| {
            thunks.latest(frame.thunk_id).map(|key| PendingThunk {
                key,
                birth_time: frame.birth_time,
                force_entry_time: frame.force_entry_time,
                index,
            })
        })
        .collect()
}

/// Whether an effect reads or mutates its scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

impl From<AccessKind> for AccessMode {
    fn from(kind: AccessKind) -> Self {
        if kind.is_write() {
            Self::Write
        } else {
            Self::Read
        }
    }
}

/// Responsibility assigned to one pending thunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Blame {
    pub key: ThunkKey,
    pub transitive: bool,
    /// The direct cause, for transitive blame.
    pub source: Option<ThunkKey>,
}

/// Decides which pending thunks are responsible for an effect on a scope
/// born at `scope_birth`.
///
/// Reads are local to the innermost thunk when `t2 > t3(innermost)`; writes
/// when `t2 > t1(innermost)`. Otherwise the first thunk passing the interval
/// test is the direct cause: `t1 < t2 < t3` for reads, `t2 < t1 <= t3` for
/// writes. Every thunk enclosing the direct cause is blamed transitively.
/// With no target scope the innermost thunk is the direct cause.
#[must_use]
pub fn attribute(
    pending: &[PendingThunk],
    mode: AccessMode,
    scope_birth: Option<Timestamp>,
) -> Vec<Blame> {
    let Some(innermost) = pending.first() else {
        return Vec::new();
    };

    let direct = match scope_birth {
        None => Some(0),
        Some(t2) => {
            let local = match mode {
                AccessMode::Read => t2 > innermost.force_entry_time,
                AccessMode::Write => t2 > innermost.birth_time,
            };
            if local {
                return Vec::new();
            }
            pending.iter().position(|t| match mode {
                AccessMode::Read => t.birth_time < t2 && t2 < t.force_entry_time,
                AccessMode::Write => t2 < t.birth_time && t.birth_time <= t.force_entry_time,
            })
        }
    };

    direct.map_or_else(Vec::new, |index| blame_from(pending, index))
}

/// Blames every pending thunk for an interpreter error: the innermost
/// directly, the rest transitively.
#[must_use]
pub fn blame_error(pending: &[PendingThunk]) -> Vec<Blame> {
    if pending.is_empty() {
        return Vec::new();
    }
    blame_from(pending, 0)
}

fn blame_from(pending: &[PendingThunk], direct: usize) -> Vec<Blame> {
    let source = pending[direct].key;
    std::iter::once(Blame {
        key: source,
        transitive: false,
        source: None,
    })
    .chain(pending[direct + 1..].iter().map(|t| Blame {
        key: t.key,
        transitive: true,
        source: Some(source),
    }))
    .collect()
}

/// Finds the next caller at or beyond `*index` and leaves `*index` on it.
///
/// The first thunk frame seen fixes the scope of interest; the caller is
/// then the first closure call running in that scope. Without a thunk frame
/// any closure call qualifies.
pub fn next_caller<H: Host + ?Sized>(host: &H, index: &mut usize) -> Option<Ancestor> {
    let mut scope_of_interest: Option<ScopeId> = None;

    while let Some(frame) = host.frame(*index) {
        match frame {
            Frame::Thunk(thunk) => {
                if scope_of_interest.is_none() {
                    scope_of_interest = thunk.scope;
                }
            }
            Frame::Call(call) => {
                if let Some(closure_id) = call.closure() {
                    if scope_of_interest.map_or(true, |scope| scope == call.scope) {
                        return Some(Ancestor {
                            closure_id,
                            call_id: call.call_id,
                        });
                    }
                }
            }
        }
        *index += 1;
    }

    None
}

/// Resolves up to `len` successive callers starting at stack index `start`.
#[must_use]
pub fn caller_chain<H: Host + ?Sized>(host: &H, start: usize, len: usize) -> AncestorChain {
    let mut index = start;
    AncestorChain::from_callers(
        len,
        (0..len).map(|_| {
            let caller = next_caller(host, &mut index);
            index += 1;
            caller
        }),
    )
}

/// Number of closure calls from stack index `from` outward up to and
/// including the one whose frame scope is `scope`.
#[must_use]
pub fn scope_depth<H: Host + ?Sized>(host: &H, scope: ScopeId, from: usize) -> Option<u32> {
    let mut depth = 0;
    for (_, frame) in frames_from(host, from) {
        if let Some((call, _)) = frame.as_closure_call() {
            depth += 1;
            if call.scope == scope {
                return Some(depth);
            }
        }
    }
    None
}

/// Computes force depth and companion position for `key` at its force
/// entry. The thunk's own frame is expected at stack index 0.
///
/// Depth counts closure calls up to and including the owning call and is
/// `None` if the thunk escaped or the owning call is not on the stack. The
/// companion is the formal position of the nearest other pending argument
/// of the same call.
#[must_use]
pub fn force_depth_and_companion<H: Host + ?Sized>(
    host: &H,
    thunks: &ThunkTable,
    key: ThunkKey,
    escaped: bool,
) -> (Option<u32>, Option<u32>) {
    let mut depth = 0;
    let mut reached_call = false;
    let mut companion = None;

    for (_, frame) in frames_from(host, 1) {
        match frame {
            Frame::Thunk(thunk) => {
                if companion.is_none() && thunk.is_argument {
                    companion = thunks
                        .get(ThunkKey::new(thunk.thunk_id, key.call))
                        .map(|sibling| sibling.formal_position);
                }
            }
            Frame::Call(call) => {
                if escaped {
                    continue;
                }
                if call.closure().is_some() {
                    depth += 1;
                }
                if call.call_id == key.call {
                    reached_call = true;
                    break;
                }
            }
        }
    }

    let depth = (!escaped && reached_call).then_some(depth);
    (depth, companion)
}

/// Finds the dynamic parent of a thunk born at `birth_time`: the nearest
/// enclosing pending argument thunk whose force entry is not before that
/// birth.
///
/// # Errors
///
/// Returns `TraceError::ThunkNotFound` if the parent's force frame refers to
/// an unregistered thunk.
pub fn parent_thunk<H: Host + ?Sized>(
    host: &H,
    thunks: &ThunkTable,
    birth_time: Timestamp,
) -> TraceResult<Option<ThunkKey>> {
    for (_, frame) in frames_from(host, 1) {
        let Some(candidate) = frame.as_argument_thunk() else {
            continue;
        };
        // Born and forced entirely before this thunk existed.
        if candidate.force_entry_time < birth_time {
            continue;
        }
        return thunks.latest(candidate.thunk_id).map(Some);
    }
    Ok(None)
}

/// Who reflected on a call's scope, and how far up the stack that call is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReflectionSink {
    /// Innermost pending argument thunk's owning call, else the innermost
    /// closure call.
    pub sink: Option<Ancestor>,
    /// Set when the sink is a pending argument thunk.
    pub thunk: Option<ThunkKey>,
    /// Closure calls from the top of the stack to `source`, inclusive.
    pub depth: Option<u32>,
}

/// Walks the live stack for the sink of a reflection on the scope of
/// `source`.
///
/// # Errors
///
/// Returns `TraceError::ThunkNotFound` if the innermost pending argument
/// thunk was never registered.
pub fn reflection_sink<H: Host + ?Sized>(
    host: &H,
    thunks: &ThunkTable,
    source: CallId,
) -> TraceResult<ReflectionSink> {
    let mut found = ReflectionSink {
        sink: None,
        thunk: None,
        depth: None,
    };
    let mut depth = 1;

    for (_, frame) in frames_from(host, 0) {
        match frame {
            Frame::Thunk(thunk) => {
                if found.sink.is_some() || !thunk.is_argument {
                    continue;
                }
                let key = thunks.latest(thunk.thunk_id)?;
                let record = thunks.lookup(key.thunk, key.call)?;
                found.sink = Some(Ancestor {
                    closure_id: record.closure_id,
                    call_id: key.call,
                });
                found.thunk = Some(key);
            }
            Frame::Call(call) => {
                let Some(closure_id) = call.closure() else {
                    continue;
                };
                if found.sink.is_none() {
                    found.sink = Some(Ancestor {
                        closure_id,
                        call_id: call.call_id,
                    });
                }
                if call.call_id == source {
                    found.depth = Some(depth);
                    break;
                }
                depth += 1;
            }
        }
    }

    Ok(found)
}

/// Distance between an expression inspection and the thunk's owning call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaDepth {
    /// Innermost closure call at the inspection.
    pub sink: Option<Ancestor>,
    /// Closure calls passed before reaching the owning call.
    pub depth: u32,
}

/// Counts closure calls from the top of the stack up to `owner`. Returns
/// `None` if `owner` is no longer on the stack.
#[must_use]
pub fn meta_depth<H: Host + ?Sized>(host: &H, owner: CallId) -> Option<MetaDepth> {
    let mut sink = None;
    let mut depth = 0;

    for (_, frame) in frames_from(host, 0) {
        let Some((call, closure_id)) = frame.as_closure_call() else {
            continue;
        };
        if sink.is_none() {
            sink = Some(Ancestor {
                closure_id,
                call_id: call.call_id,
            });
        }
        if call.call_id == owner {
            return Some(MetaDepth { sink, depth });
        }
        depth += 1;
    }
    None
}

/// A thunk counts as escaped once its owning call exited or leaked its scope.
#[must_use]
pub const fn thunk_escaped(call: &CallActivation) -> bool {
    call.has_exited() || call.has_escaped_scope()
}

/// Returns true if handing out `call`'s scope now lets it outlive the call:
/// the call already exited, or no frame on the live stack belongs to it.
#[must_use]
pub fn scope_escapes<H: Host + ?Sized>(host: &H, call: &CallActivation) -> bool {
    call.has_exited()
        || !frames_from(host, 0)
            .any(|(_, frame)| frame.as_call().is_some_and(|c| c.call_id == call.id))
}

/// Name of the reflective accessor behind a plain binding access, if any.
///
/// An accessor rule matches when the frame at its offset is a closure call
/// from the accessor package with one of the rule's names. A matching
/// wrapper found further out replaces the name.
#[must_use]
pub fn accessor_name<H: Host + ?Sized>(
    host: &H,
    config: &TracerConfig,
    kind: AccessKind,
) -> Option<String> {
    let name = config
        .accessors
        .iter()
        .filter(|rule| rule.kind == kind)
        .find_map(|rule| {
            let (call, _) = host.frame(rule.frame_offset)?.as_closure_call()?;
            let in_package = call.package.as_deref() == Some(config.accessor_package.as_str());
            (in_package && rule.matches(kind, &call.name)).then(|| call.name.clone())
        })?;

    let wrapped = config
        .accessor_wrappers
        .iter()
        .filter(|wrapper| wrapper.inner == name)
        .find_map(|wrapper| {
            let (outer, _) = host.frame(wrapper.frame_offset)?.as_closure_call()?;
            (outer.name == wrapper.outer).then(|| outer.name.clone())
        });

    Some(wrapped.unwrap_or(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::SimulatedHost;
    use crate::ids::{CallId, ClosureId, ThunkId};
    use crate::thunk::Thunk;

    fn pending(thunk: u64, birth: u64, entry: u64) -> PendingThunk {
        PendingThunk {
            key: ThunkKey::new(ThunkId::new(thunk), CallId::new(thunk)),
            birth_time: Timestamp::new(birth),
            force_entry_time: Timestamp::new(entry),
            index: 0,
        }
    }

    #[test]
    fn test_write_chains_transitively() {
        // T2 (born 2, forced 3) inside T1 (born 1, forced 2); S born at 0.
        let stack = [pending(2, 2, 3), pending(1, 1, 2)];
        let blame = attribute(&stack, AccessMode::Write, Some(Timestamp::new(0)));

        assert_eq!(blame.len(), 2);
        assert_eq!(blame[0].key, stack[0].key);
        assert!(!blame[0].transitive);
        assert_eq!(blame[0].source, None);
        assert_eq!(blame[1].key, stack[1].key);
        assert!(blame[1].transitive);
        assert_eq!(blame[1].source, Some(stack[0].key));
    }

    #[test]
    fn test_write_to_younger_scope_is_local() {
        let stack = [pending(1, 4, 5)];
        assert!(attribute(&stack, AccessMode::Write, Some(Timestamp::new(10))).is_empty());
    }

    #[test]
    fn test_read_outside_window_is_not_blamed() {
        // Scope born before the thunk: t1 < t2 fails.
        let stack = [pending(1, 3, 6)];
        assert!(attribute(&stack, AccessMode::Read, Some(Timestamp::new(1))).is_empty());
    }

    #[test]
    fn test_read_inside_window_is_blamed() {
        let stack = [pending(2, 8, 9), pending(1, 3, 6)];
        // Not local (5 < 9), T2 fails (8 < 5 false), T1 passes (3 < 5 < 6).
        let blame = attribute(&stack, AccessMode::Read, Some(Timestamp::new(5)));
        assert_eq!(blame.len(), 1);
        assert_eq!(blame[0].key, stack[1].key);
        assert!(!blame[0].transitive);
    }

    #[test]
    fn test_read_of_scope_born_after_force_is_local() {
        let stack = [pending(1, 1, 2)];
        assert!(attribute(&stack, AccessMode::Read, Some(Timestamp::new(3))).is_empty());
    }

    #[test]
    fn test_no_scope_blames_innermost() {
        let stack = [pending(2, 2, 3), pending(1, 1, 2)];
        let blame = attribute(&stack, AccessMode::Read, None);
        assert_eq!(blame.len(), 2);
        assert!(!blame[0].transitive);
        assert!(blame[1].transitive);
    }

    #[test]
    fn test_error_blames_all_pending() {
        let stack = [pending(3, 5, 6), pending(2, 2, 3), pending(1, 1, 2)];
        let blame = blame_error(&stack);
        assert_eq!(blame.len(), 3);
        assert!(blame[1..].iter().all(|b| b.transitive && b.source == Some(stack[0].key)));
        assert!(blame_error(&[]).is_empty());
    }

    fn register(thunks: &mut ThunkTable, thunk: ThunkId, call: CallId, pos: u32, birth: Timestamp) {
        thunks.insert(Thunk::new(
            ThunkKey::new(thunk, call),
            ClosureId::new(1),
            pos,
            "arg",
            birth,
        ));
    }

    #[test]
    fn test_pending_thunks_resolve_latest_record() {
        let mut host = SimulatedHost::new();
        let mut thunks = ThunkTable::new();
        let f = host.enter_closure("f", ClosureId::new(1));
        let (x, birth) = host.create_thunk();
        let g = host.enter_closure("g", ClosureId::new(2));
        register(&mut thunks, x, f.call_id, 0, birth);
        register(&mut thunks, x, g.call_id, 0, birth);
        host.force(x);

        let pending = pending_thunks(&host, &thunks).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].key, ThunkKey::new(x, g.call_id));
        assert_eq!(pending[0].index, 0);
    }

    #[test]
    fn test_unregistered_pending_thunk_is_fatal() {
        let mut host = SimulatedHost::new();
        let (x, _) = host.create_thunk();
        host.force(x);
        let err = pending_thunks(&host, &ThunkTable::new()).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_force_depth_and_companion() {
        let mut host = SimulatedHost::new();
        let mut thunks = ThunkTable::new();
        let (a, a_birth) = host.create_thunk();
        let (b, b_birth) = host.create_thunk();
        let f = host.enter_closure("f", ClosureId::new(1));
        register(&mut thunks, a, f.call_id, 0, a_birth);
        register(&mut thunks, b, f.call_id, 1, b_birth);

        host.force(a);
        host.enter_closure("g", ClosureId::new(2));
        host.force(b);

        let key = ThunkKey::new(b, f.call_id);
        let (depth, companion) = force_depth_and_companion(&host, &thunks, key, false);
        assert_eq!(depth, Some(2));
        assert_eq!(companion, Some(0));

        let (depth, companion) = force_depth_and_companion(&host, &thunks, key, true);
        assert_eq!(depth, None);
        assert_eq!(companion, Some(0));
    }

    #[test]
    fn test_parent_skips_unrelated_thunks() {
        let mut host = SimulatedHost::new();
        let mut thunks = ThunkTable::new();
        let f = host.enter_closure("f", ClosureId::new(1));
        let (outer, outer_birth) = host.create_thunk();
        register(&mut thunks, outer, f.call_id, 0, outer_birth);
        let outer_frame = host.force(outer);

        let (inner, inner_birth) = host.create_thunk();
        register(&mut thunks, inner, f.call_id, 1, inner_birth);
        host.force(inner);

        // Outer started forcing before inner was born.
        assert!(outer_frame.force_entry_time < inner_birth);
        assert_eq!(parent_thunk(&host, &thunks, inner_birth).unwrap(), None);

        // A thunk born before outer's force entry gets outer as parent.
        assert_eq!(
            parent_thunk(&host, &thunks, outer_birth).unwrap(),
            Some(ThunkKey::new(outer, f.call_id))
        );
    }

    #[test]
    fn test_caller_chain_follows_thunk_scope() {
        let mut host = SimulatedHost::new();
        let main = host.enter_closure("main", ClosureId::new(1));
        let (x, _) = host.create_thunk();
        let callee = host.enter_closure("callee", ClosureId::new(2));
        host.force(x);
        host.enter_builtin("get");

        let chain = caller_chain(&host, 1, 2);
        assert_eq!(
            chain.get(0),
            Some(Ancestor {
                closure_id: ClosureId::new(1),
                call_id: main.call_id,
            })
        );
        // Nothing beyond main.
        assert_eq!(chain.get(1), None);

        let chain = caller_chain(&host, 2, 2);
        assert_eq!(chain.get(0).map(|a| a.call_id), Some(callee.call_id));
        assert_eq!(chain.get(1).map(|a| a.call_id), Some(main.call_id));
    }

    #[test]
    fn test_reflection_sink_prefers_pending_thunk() {
        let mut host = SimulatedHost::new();
        let mut thunks = ThunkTable::new();
        let f = host.enter_closure("f", ClosureId::new(1));
        let (x, birth) = host.create_thunk();
        let g = host.enter_closure("g", ClosureId::new(2));
        register(&mut thunks, x, g.call_id, 0, birth);
        host.force(x);
        host.enter_closure("h", ClosureId::new(3));

        let found = reflection_sink(&host, &thunks, f.call_id).unwrap();
        assert_eq!(found.thunk, Some(ThunkKey::new(x, g.call_id)));
        assert_eq!(found.sink.map(|a| a.call_id), Some(g.call_id));
        // h, g, f
        assert_eq!(found.depth, Some(3));
    }

    #[test]
    fn test_reflection_sink_without_thunk() {
        let mut host = SimulatedHost::new();
        let thunks = ThunkTable::new();
        let f = host.enter_closure("f", ClosureId::new(1));
        let g = host.enter_closure("g", ClosureId::new(2));
        host.enter_builtin("sys.function");

        let found = reflection_sink(&host, &thunks, f.call_id).unwrap();
        assert_eq!(found.thunk, None);
        assert_eq!(found.sink.map(|a| a.call_id), Some(g.call_id));
        assert_eq!(found.depth, Some(2));

        let gone = reflection_sink(&host, &thunks, CallId::new(999)).unwrap();
        assert_eq!(gone.depth, None);
    }

    #[test]
    fn test_meta_depth_counts_calls_below_owner() {
        let mut host = SimulatedHost::new();
        let f = host.enter_closure("f", ClosureId::new(1));
        host.enter_closure("g", ClosureId::new(2));
        host.enter_builtin("substitute");
        let h = host.enter_closure("h", ClosureId::new(3));

        let found = meta_depth(&host, f.call_id).unwrap();
        assert_eq!(found.depth, 2);
        assert_eq!(found.sink.map(|a| a.call_id), Some(h.call_id));

        let own = meta_depth(&host, h.call_id).unwrap();
        assert_eq!(own.depth, 0);
        assert!(meta_depth(&host, CallId::new(999)).is_none());
    }

    #[test]
    fn test_scope_depth() {
        let mut host = SimulatedHost::new();
        let f = host.enter_closure("f", ClosureId::new(1));
        host.enter_builtin("length");
        host.enter_closure("g", ClosureId::new(2));
        assert_eq!(scope_depth(&host, f.scope, 0), Some(2));
        assert_eq!(scope_depth(&host, host.global_scope(), 0), None);
    }

    #[test]
    fn test_scope_escape() {
        let mut host = SimulatedHost::new();
        let f = host.enter_closure("f", ClosureId::new(1));
        let mut call = CallActivation::new(
            f.call_id,
            ClosureId::new(1),
            "f",
            f.scope,
            host.now(),
        );
        assert!(!scope_escapes(&host, &call));
        assert!(!thunk_escaped(&call));

        host.pop();
        assert!(scope_escapes(&host, &call));
        call.exit(host.tick(), None);
        assert!(thunk_escaped(&call));
    }

    #[test]
    fn test_accessor_detection() {
        let mut host = SimulatedHost::new();
        let config = TracerConfig::default();
        host.enter_closure("user", ClosureId::new(1));
        host.enter_closure_from("get", ClosureId::new(2), Some("base"));
        host.enter_builtin("a");
        host.enter_builtin("b");
        host.enter_builtin("c");

        assert_eq!(
            accessor_name(&host, &config, AccessKind::Lookup).as_deref(),
            Some("get")
        );
        assert_eq!(accessor_name(&host, &config, AccessKind::Assign), None);
    }

    #[test]
    fn test_accessor_wrapper_relabels() {
        let mut host = SimulatedHost::new();
        let mut config = TracerConfig::default();
        config.accessor_wrappers[0].frame_offset = 4;
        host.enter_closure_from("dynGet", ClosureId::new(1), Some("base"));
        host.enter_closure_from("get0", ClosureId::new(2), Some("base"));
        host.enter_builtin("a");
        host.enter_builtin("b");
        host.enter_builtin("c");

        assert_eq!(
            accessor_name(&host, &config, AccessKind::Lookup).as_deref(),
            Some("dynGet")
        );
    }
}
