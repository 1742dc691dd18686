//! Execution engine abstraction - the remote analytical query stage.
//!
//! The engine is shared by every concurrent pipeline and must tolerate
//! concurrent calls; the core never serializes access to it. Cancellation
//! is scoped per call: each execution registers its remote handle in the
//! batch's [`AbortScope`], and aborting a scope cancels only the calls
//! that batch issued, never unrelated in-flight work.

mod dune;

pub use dune::DuneEngine;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Mutex;

/// Tabular result of a query execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableData {
    pub columns: Vec<String>,
    pub rows: Vec<Value>,
}

impl TableData {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First `n` rows as pretty JSON, for derivation prompts.
    pub fn sample_json(&self, n: usize) -> String {
        let sample: Vec<&Value> = self.rows.iter().take(n).collect();
        serde_json::to_string_pretty(&sample).unwrap_or_else(|_| "[]".to_string())
    }

    /// Serialize to csv, header row first, cells quoted where needed.
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        append_csv_row(&mut out, self.columns.iter().map(String::as_str));

        for row in &self.rows {
            let cells: Vec<String> = self
                .columns
                .iter()
                .map(|col| match row.get(col) {
                    None | Some(Value::Null) => String::new(),
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                })
                .collect();
            append_csv_row(&mut out, cells.iter().map(String::as_str));
        }

        out
    }
}

fn append_csv_row<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>) {
    let mut first = true;
    for cell in cells {
        if !first {
            out.push(',');
        }
        first = false;

        if cell.contains(',') || cell.contains('"') || cell.contains('\n') {
            out.push('"');
            out.push_str(&cell.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(cell);
        }
    }
    out.push('\n');
}

/// Three-valued result of one execution attempt. Transport and engine
/// errors are folded into `Failed`; the pipeline applies the same
/// single-refinement policy regardless of the failure kind.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Rows(TableData),
    Empty,
    Failed(String),
}

impl QueryOutcome {
    /// Wrap a completed result, normalizing zero rows to `Empty`.
    pub fn from_table(table: TableData) -> Self {
        if table.is_empty() {
            Self::Empty
        } else {
            Self::Rows(table)
        }
    }
}

/// Registry of remote execution handles issued on behalf of one batch.
///
/// Pipelines register a handle for the duration of each remote call; the
/// scheduler drains the scope at the deadline to cancel exactly those
/// executions still in flight.
#[derive(Debug, Default)]
pub struct AbortScope {
    handles: Mutex<HashSet<String>>,
}

impl AbortScope {
    pub fn register(&self, handle: impl Into<String>) {
        self.lock().insert(handle.into());
    }

    pub fn unregister(&self, handle: &str) {
        self.lock().remove(handle);
    }

    /// Remove and return every handle still registered.
    pub fn drain(&self) -> Vec<String> {
        self.lock().drain().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        // A poisoned lock only means a pipeline panicked mid-register;
        // the set itself is still usable.
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// The remote analytical query engine.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Execute a query, registering its remote handle in `scope` while
    /// the call is in flight. Never returns an error: failures are data
    /// (`QueryOutcome::Failed`) so the pipeline can refine on them.
    async fn execute(&self, sql: &str, scope: &AbortScope) -> QueryOutcome;

    /// Best-effort abort of every execution still registered in `scope`.
    /// Failures are logged, never propagated.
    async fn abort_scope(&self, scope: &AbortScope);
}
