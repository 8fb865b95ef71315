use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use ingredb_core::traits::TabularStore;
use ingredb_core::types::{Row, SourceKind, StructuredResult, StructuredRow, Table, Value};

use crate::safety::{sanitize, ValidatedQuery};

/// Outcome of one structured execution. An engine failure still yields a
/// (empty) result; `error` carries the diagnostic.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub result: StructuredResult,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResultSummary {
    pub result_count: usize,
    pub is_empty: bool,
    pub has_nulls: bool,
}

pub fn summarize_rows(table: &Table) -> ResultSummary {
    ResultSummary {
        result_count: table.rows.len(),
        is_empty: table.rows.is_empty(),
        has_nulls: table.rows.iter().flatten().any(|v| *v == Value::Null),
    }
}

pub struct StructuredRetriever {
    store: Arc<dyn TabularStore>,
    max_rows: usize,
}

impl StructuredRetriever {
    pub fn new(store: Arc<dyn TabularStore>, max_rows: usize) -> Self { Self { store, max_rows } }

    pub fn max_rows(&self) -> usize { self.max_rows }

    /// Runs `query` and keeps the first `min(limit, max_rows)` rows in engine
    /// order, numbered `sql-1`, `sql-2`, ...
    pub fn execute(&self, query: &ValidatedQuery, limit: usize) -> Execution {
        let cap = limit.min(self.max_rows);
        debug!(query = %sanitize(query.as_str()), cap, "executing structured query");
        let table = match self.store.query(query.as_str()) {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "structured query failed");
                return Execution {
                    result: StructuredResult { query: Some(query.to_string()), rows: Vec::new() },
                    error: Some(format!("SQL execution failed: {e:#}")),
                };
            }
        };
        let summary = summarize_rows(&table);
        let Table { columns, rows } = table;
        let rows: Vec<StructuredRow> = rows
            .into_iter()
            .take(cap)
            .enumerate()
            .map(|(i, values)| StructuredRow {
                citation_id: SourceKind::Structured.citation_id(i + 1),
                row_index: i + 1,
                record: Row::from_pairs(columns.iter().cloned().zip(values)),
            })
            .collect();
        info!(returned = summary.result_count, kept = rows.len(), has_nulls = summary.has_nulls, "structured query done");
        Execution { result: StructuredResult { query: Some(query.to_string()), rows }, error: None }
    }
}
