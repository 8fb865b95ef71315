//! Structured side of the pipeline: the SQLite store adapter, the query
//! safety filter every generated statement must pass, and the structured
//! retriever that turns a validated statement into cited rows.

pub mod retriever;
pub mod safety;
pub mod store;

pub use retriever::{summarize_rows, Execution, ResultSummary, StructuredRetriever};
pub use safety::{analyze, sanitize, table_refs, where_clause, Complexity, QueryGuard, Rejection, SafetyReport, ValidatedQuery};
pub use store::SqliteStore;
