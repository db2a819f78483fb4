//! Columnar export of a finished session.
//!
//! Every registry and ledger becomes a [`Table`] of typed columns. Absent
//! values use explicit sentinels rather than nulls: [`NA_INTEGER`] for
//! integers, [`NA_STRING`] for strings and [`Logical::Na`] for booleans.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::ids::{ScopeId, Timestamp};
use crate::ledger::AncestorChain;
use crate::session::TraceOutput;

/// Sentinel for an absent integer.
pub const NA_INTEGER: i64 = i64::MIN;

/// Sentinel for an absent string.
pub const NA_STRING: &str = "NA";

/// Tri-state logical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Logical {
    True,
    False,
    Na,
}

impl From<bool> for Logical {
    fn from(value: bool) -> Self {
        if value {
            Self::True
        } else {
            Self::False
        }
    }
}

impl From<Option<bool>> for Logical {
    fn from(value: Option<bool>) -> Self {
        value.map_or(Self::Na, Self::from)
    }
}

impl fmt::Display for Logical {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::True => "TRUE",
            Self::False => "FALSE",
            Self::Na => NA_STRING,
        })
    }
}

/// One typed column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "values")]
pub enum Column {
    Integer(Vec<i64>),
    Character(Vec<String>),
    Logical(Vec<Logical>),
}

impl Column {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Integer(values) => values.len(),
            Self::Character(values) => values.len(),
            Self::Logical(values) => values.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn as_integer(&self) -> Option<&[i64]> {
        match self {
            Self::Integer(values) => Some(values),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_character(&self) -> Option<&[String]> {
        match self {
            Self::Character(values) => Some(values),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_logical(&self) -> Option<&[Logical]> {
        match self {
            Self::Logical(values) => Some(values),
            _ => None,
        }
    }
}

/// A named table of equally long columns, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    name: String,
    columns: IndexMap<String, Column>,
}

impl Table {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: IndexMap::new(),
        }
    }

    /// Adds an integer column; `None` becomes [`NA_INTEGER`].
    #[must_use]
    pub fn integer(mut self, column: &str, values: impl IntoIterator<Item = Option<i64>>) -> Self {
        let values = values.into_iter().map(|v| v.unwrap_or(NA_INTEGER)).collect();
        self.columns.insert(column.to_string(), Column::Integer(values));
        self
    }

    /// Adds a character column; `None` becomes [`NA_STRING`].
    #[must_use]
    pub fn character(
        mut self,
        column: &str,
        values: impl IntoIterator<Item = Option<String>>,
    ) -> Self {
        let values = values
            .into_iter()
            .map(|v| v.unwrap_or_else(|| NA_STRING.to_string()))
            .collect();
        self.columns.insert(column.to_string(), Column::Character(values));
        self
    }

    /// Adds a logical column; `None` becomes [`Logical::Na`].
    #[must_use]
    pub fn logical(mut self, column: &str, values: impl IntoIterator<Item = Option<bool>>) -> Self {
        let values = values.into_iter().map(Logical::from).collect();
        self.columns.insert(column.to_string(), Column::Logical(values));
        self
    }

    /// Adds `source_fun_id_N` / `source_call_id_N` column pairs for
    /// `depth` ancestor slots.
    #[must_use]
    pub fn ancestors(mut self, depth: usize, chains: &[AncestorChain]) -> Self {
        for slot in 0..depth {
            let n = slot + 1;
            self = self
                .integer(
                    &format!("source_fun_id_{n}"),
                    chains
                        .iter()
                        .map(|chain| chain.get(slot).map(|a| id(a.closure_id.get()))),
                )
                .integer(
                    &format!("source_call_id_{n}"),
                    chains
                        .iter()
                        .map(|chain| chain.get(slot).map(|a| id(a.call_id.get()))),
                );
        }
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Number of rows; zero for a table without columns.
    #[must_use]
    pub fn nrow(&self) -> usize {
        self.columns.values().next().map_or(0, Column::len)
    }

    #[must_use]
    pub fn ncol(&self) -> usize {
        self.columns.len()
    }
}

fn id(raw: u64) -> i64 {
    i64::try_from(raw).unwrap_or(NA_INTEGER)
}

fn time(t: Timestamp) -> i64 {
    id(t.get())
}

fn join<T: ToString>(items: impl IntoIterator<Item = T>, sep: &str) -> String {
    items
        .into_iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(sep)
}

impl TraceOutput {
    /// Renders every registry and ledger as a table.
    ///
    /// Table order is `scopes`, `calls`, `thunks`, `scope_accesses`,
    /// `scope_constructions`, `evals`, `effects`, `call_reflections`,
    /// `metaprograms`.
    #[must_use]
    pub fn tables(&self) -> Vec<Table> {
        vec![
            self.scope_table(),
            self.call_table(),
            self.thunk_table(),
            self.access_table(),
            self.construction_table(),
            self.eval_table(),
            self.effect_table(),
            self.reflection_table(),
            self.metaprogram_table(),
        ]
    }

    fn scope_table(&self) -> Table {
        let scopes = || self.scopes.iter();
        let empty = AncestorChain::empty(self.ancestor_depth);
        let chains: Vec<AncestorChain> = scopes()
            .map(|s| s.provenance().map_or(empty, |p| p.ancestors))
            .collect();

        Table::new("scopes")
            .integer("scope_id", scopes().map(|s| Some(id(s.id.get()))))
            .character("name", scopes().map(|s| s.name.clone()))
            .character("kind", scopes().map(|s| Some(s.kind.to_string())))
            .character("package", scopes().map(|s| s.package().map(str::to_string)))
            .logical("hashed", scopes().map(|s| Some(s.hashed)))
            .integer("parent_id", scopes().map(|s| s.parent.map(|p| id(p.get()))))
            .integer("call_id", scopes().map(|s| s.call_id.map(|c| id(c.get()))))
            .integer("birth_time", scopes().map(|s| Some(time(s.birth_time))))
            .integer("last_write_time", scopes().map(|s| s.last_write_time.map(time)))
            .logical("locked", scopes().map(|s| s.locked()))
            .character(
                "classes",
                scopes().map(|s| (!s.classes().is_empty()).then(|| s.classes().join(","))),
            )
            .logical("dispatch", scopes().map(|s| Some(s.has_dispatch())))
            .integer(
                "eval_count",
                scopes().map(|s| Some(i64::try_from(s.eval_count()).unwrap_or(NA_INTEGER))),
            )
            .character("events", scopes().map(|s| Some(s.events().to_string())))
            .ancestors(self.ancestor_depth, &chains)
            .character(
                "backtrace",
                scopes().map(|s| s.provenance().map(|p| p.backtrace.clone())),
            )
    }

    fn call_table(&self) -> Table {
        let calls = || self.calls.iter();
        Table::new("calls")
            .integer("call_id", calls().map(|c| Some(id(c.id.get()))))
            .integer("fun_id", calls().map(|c| Some(id(c.closure_id.get()))))
            .character("name", calls().map(|c| Some(c.name.clone())))
            .integer("scope_id", calls().map(|c| Some(id(c.scope.get()))))
            .integer("entry_time", calls().map(|c| Some(time(c.entry_time))))
            .integer("exit_time", calls().map(|c| c.exit_info().map(|e| time(e.time))))
            .character(
                "result_type",
                calls().map(|c| c.exit_info().and_then(|e| e.result_type.clone())),
            )
            .character(
                "force_order",
                calls().map(|c| Some(join(c.force_order(), ","))),
            )
            .logical("scope_escaped", calls().map(|c| Some(c.has_escaped_scope())))
    }

    fn thunk_table(&self) -> Table {
        let thunks = || self.thunks.iter();
        let int = |v: Option<u32>| v.map(i64::from);
        Table::new("thunks")
            .integer("thunk_id", thunks().map(|t| Some(id(t.key.thunk.get()))))
            .integer("call_id", thunks().map(|t| Some(id(t.key.call.get()))))
            .integer("fun_id", thunks().map(|t| Some(id(t.closure_id.get()))))
            .character("name", thunks().map(|t| Some(t.name.clone())))
            .integer("formal_position", thunks().map(|t| Some(i64::from(t.formal_position))))
            .integer("actual_position", thunks().map(|t| int(t.actual_position())))
            .integer("birth_time", thunks().map(|t| Some(time(t.birth_time))))
            .integer("force_entry_time", thunks().map(|t| t.force_entry_time().map(time)))
            .integer("force_exit_time", thunks().map(|t| t.force_exit_time().map(time)))
            .integer("force_position", thunks().map(|t| int(t.force_position())))
            .integer("force_depth", thunks().map(|t| int(t.force_depth())))
            .integer("companion_position", thunks().map(|t| int(t.companion_position())))
            .logical("escaped", thunks().map(|t| Some(t.has_escaped())))
            .integer("parent_thunk_id", thunks().map(|t| t.parent().map(|p| id(p.thunk.get()))))
            .integer("parent_call_id", thunks().map(|t| t.parent().map(|p| id(p.call.get()))))
            .character("value_type", thunks().map(|t| t.value_type().map(str::to_string)))
            .integer("value_lookups", thunks().map(|t| Some(i64::from(t.value_lookups()))))
            .integer(
                "expression_lookups",
                thunks().map(|t| Some(i64::from(t.expression_lookups()))),
            )
            .integer("metaprograms", thunks().map(|t| Some(i64::from(t.metaprograms()))))
            .integer("meta_depth", thunks().map(|t| int(t.meta_depth())))
            .character(
                "direct_effects",
                thunks().map(|t| {
                    Some(join(
                        t.effects().iter().filter(|e| !e.transitive).map(|e| &e.kind),
                        "|",
                    ))
                }),
            )
            .character(
                "transitive_effects",
                thunks().map(|t| {
                    Some(join(
                        t.effects().iter().filter(|e| e.transitive).map(|e| &e.kind),
                        "|",
                    ))
                }),
            )
    }

    fn access_table(&self) -> Table {
        let rows = || self.ledgers.accesses.iter();
        let scope_col = |v: Option<ScopeId>| v.map(|s| id(s.get()));
        Table::new("scope_accesses")
            .integer("time", rows().map(|r| Some(time(r.time))))
            .integer("depth", rows().map(|r| r.depth.map(i64::from)))
            .character("function", rows().map(|r| Some(r.function.clone())))
            .integer("scope_id", rows().map(|r| scope_col(r.scope)))
            .character("value_type", rows().map(|r| r.value_type.clone()))
            .character("result_type", rows().map(|r| r.result_type.clone()))
            .integer("result_scope_id", rows().map(|r| scope_col(r.result_scope)))
            .integer("arg_scope_id_1", rows().map(|r| scope_col(r.arg_scopes[0])))
            .integer("arg_scope_id_2", rows().map(|r| scope_col(r.arg_scopes[1])))
            .character("env_name", rows().map(|r| r.args.env_name.clone()))
            .character("symbol", rows().map(|r| r.args.symbol.clone()))
            .logical("bindings", rows().map(|r| r.args.bindings))
            .integer("fun_id", rows().map(|r| r.args.fun_id.map(|f| id(f.get()))))
            .integer("n", rows().map(|r| r.args.n))
            .integer("which", rows().map(|r| r.args.which))
            .integer("x_int", rows().map(|r| r.args.x_int))
            .character("x_char", rows().map(|r| r.args.x_char.clone()))
            .character(
                "frame_scope_ids",
                rows().map(|r| {
                    (!r.args.frame_scopes.is_empty())
                        .then(|| join(r.args.frame_scopes.iter().map(|s| s.get()), ","))
                }),
            )
            .ancestors(self.ancestor_depth, &rows().map(|r| r.ancestors).collect::<Vec<_>>())
            .character("backtrace", rows().map(|r| Some(r.backtrace.clone())))
    }

    fn construction_table(&self) -> Table {
        let rows = || self.ledgers.constructions.iter();
        Table::new("scope_constructions")
            .integer("time", rows().map(|r| Some(time(r.time))))
            .integer("scope_id", rows().map(|r| Some(id(r.scope.get()))))
            .character("constructor", rows().map(|r| Some(r.constructor.clone())))
            .logical("hashed", rows().map(|r| r.hashed))
            .integer("parent_id", rows().map(|r| r.parent.map(|p| id(p.get()))))
            .integer("parent_depth", rows().map(|r| r.parent_depth.map(i64::from)))
            .character("parent_kind", rows().map(|r| r.parent_kind.clone()))
            .integer("size", rows().map(|r| r.size))
            .integer("frame_count", rows().map(|r| r.frame_count.map(i64::from)))
            .ancestors(self.ancestor_depth, &rows().map(|r| r.ancestors).collect::<Vec<_>>())
            .character("backtrace", rows().map(|r| Some(r.backtrace.clone())))
    }

    fn eval_table(&self) -> Table {
        let rows = || self.ledgers.evals.iter();
        Table::new("evals")
            .integer("time", rows().map(|r| Some(time(r.time))))
            .integer("scope_id", rows().map(|r| Some(id(r.scope.get()))))
            .logical("direct", rows().map(|r| Some(r.direct)))
            .character("expression", rows().map(|r| Some(r.expression.clone())))
            .ancestors(self.ancestor_depth, &rows().map(|r| r.ancestors).collect::<Vec<_>>())
            .character("backtrace", rows().map(|r| Some(r.backtrace.clone())))
    }

    fn effect_table(&self) -> Table {
        let rows = || self.ledgers.effects.iter();
        Table::new("effects")
            .integer("time", rows().map(|r| Some(time(r.time))))
            .character("effect", rows().map(|r| Some(r.kind.to_string())))
            .integer("scope_id", rows().map(|r| r.scope.map(|s| id(s.get()))))
            .character("symbol", rows().map(|r| r.symbol.clone()))
            .logical("transitive", rows().map(|r| Some(r.transitive)))
            .integer("source_fun_id", rows().map(|r| r.source.map(|s| id(s.closure_id.get()))))
            .integer("source_call_id", rows().map(|r| r.source.map(|s| id(s.call_id.get()))))
            .integer("source_thunk_id", rows().map(|r| r.source.map(|s| id(s.thunk_id.get()))))
            .integer(
                "source_formal_position",
                rows().map(|r| r.source.map(|s| i64::from(s.formal_position))),
            )
            .integer("fun_id", rows().map(|r| Some(id(r.target.closure_id.get()))))
            .integer("call_id", rows().map(|r| Some(id(r.target.call_id.get()))))
            .integer("thunk_id", rows().map(|r| Some(id(r.target.thunk_id.get()))))
            .integer(
                "formal_position",
                rows().map(|r| Some(i64::from(r.target.formal_position))),
            )
            .ancestors(self.ancestor_depth, &rows().map(|r| r.ancestors).collect::<Vec<_>>())
            .character("backtrace", rows().map(|r| Some(r.backtrace.clone())))
    }

    fn reflection_table(&self) -> Table {
        let rows = || self.ledgers.reflections.iter();
        Table::new("call_reflections")
            .integer("time", rows().map(|r| Some(time(r.time))))
            .character("capability", rows().map(|r| Some(r.capability.clone())))
            .integer("source_fun_id", rows().map(|r| Some(id(r.source.closure_id.get()))))
            .integer("source_call_id", rows().map(|r| Some(id(r.source.call_id.get()))))
            .integer("sink_fun_id", rows().map(|r| r.sink.map(|a| id(a.closure_id.get()))))
            .integer("sink_call_id", rows().map(|r| r.sink.map(|a| id(a.call_id.get()))))
            .integer(
                "sink_thunk_id",
                rows().map(|r| r.sink_thunk.map(|t| id(t.thunk_id.get()))),
            )
            .integer(
                "sink_formal_position",
                rows().map(|r| r.sink_thunk.map(|t| i64::from(t.formal_position))),
            )
            .integer("depth", rows().map(|r| r.depth.map(i64::from)))
            .logical("escaped", rows().map(|r| Some(r.escaped)))
            .character("backtrace", rows().map(|r| Some(r.backtrace.clone())))
    }

    fn metaprogram_table(&self) -> Table {
        let rows = || self.ledgers.metaprograms.iter();
        Table::new("metaprograms")
            .integer("time", rows().map(|r| Some(time(r.time))))
            .character("type", rows().map(|r| Some(r.kind.as_str().to_string())))
            .integer("fun_id", rows().map(|r| Some(id(r.thunk.closure_id.get()))))
            .integer("call_id", rows().map(|r| Some(id(r.thunk.call_id.get()))))
            .integer("thunk_id", rows().map(|r| Some(id(r.thunk.thunk_id.get()))))
            .integer(
                "formal_position",
                rows().map(|r| Some(i64::from(r.thunk.formal_position))),
            )
            .integer("sink_fun_id", rows().map(|r| r.sink.map(|a| id(a.closure_id.get()))))
            .integer("sink_call_id", rows().map(|r| r.sink.map(|a| id(a.call_id.get()))))
            .integer("depth", rows().map(|r| Some(i64::from(r.depth))))
            .character("backtrace", rows().map(|r| Some(r.backtrace.clone())))
    }
}
