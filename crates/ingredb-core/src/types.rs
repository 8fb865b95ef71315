//! Domain types passed between pipeline stages.
//!
//! Every stage produces one of these records and hands it on by value; no
//! later stage mutates what an earlier one built.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

pub type Meta = HashMap<String, String>;

/// Scalar cell value returned by the tabular store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self { Value::Text(s.to_string()) }
}

impl From<String> for Value {
    fn from(s: String) -> Self { Value::Text(s) }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self { Value::Integer(i) }
}

impl From<f64> for Value {
    fn from(r: f64) -> Self { Value::Real(r) }
}

/// An ordered mapping of column name to value. Column order is the order
/// the producer emitted them in and is preserved through serialization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    fields: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self { Self::default() }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self { fields: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect() }
    }

    pub fn push(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.fields.push((column.into(), value.into()));
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(c, _)| c.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(c, v)| (c.as_str(), v))
    }

    pub fn len(&self) -> usize { self.fields.len() }

    pub fn is_empty(&self) -> bool { self.fields.is_empty() }

    /// Copy of this row without the named columns.
    #[must_use]
    pub fn without(&self, columns: &[&str]) -> Row {
        Row {
            fields: self
                .fields
                .iter()
                .filter(|(c, _)| !columns.contains(&c.as_str()))
                .cloned()
                .collect(),
        }
    }

    /// Copy of this row with every value rendered as text.
    #[must_use]
    pub fn to_text(&self) -> Row {
        Row {
            fields: self
                .fields
                .iter()
                .map(|(c, v)| (c.clone(), Value::Text(v.to_string())))
                .collect(),
        }
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (column, value) in &self.fields {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// Raw tabular result: column names plus rows of scalars, in engine order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// One neighbour returned by the vector index. Higher score is more similar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    pub metadata: Meta,
}

/// Which retriever produced a record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Structured,
    Semantic,
    Hybrid,
}

impl SourceKind {
    pub fn tag(self) -> &'static str {
        match self {
            SourceKind::Structured => "sql",
            SourceKind::Semantic => "sem",
            SourceKind::Hybrid => "hyb",
        }
    }

    /// Source-scoped citation id, e.g. `sql-3`. `seq` is 1-based.
    pub fn citation_id(self, seq: usize) -> String { format!("{}-{}", self.tag(), seq) }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryType {
    Structured,
    Semantic,
    Combined,
}

impl QueryType {
    /// Case-insensitive parse of the classifier's label.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "STRUCTURED" => Some(QueryType::Structured),
            "SEMANTIC" => Some(QueryType::Semantic),
            "COMBINED" => Some(QueryType::Combined),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueryType::Structured => "STRUCTURED",
            QueryType::Semantic => "SEMANTIC",
            QueryType::Combined => "COMBINED",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Named entities pulled out of the question, used as retrieval hints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityGroups {
    #[serde(default)]
    pub chemicals: Vec<String>,
    #[serde(default)]
    pub companies: Vec<String>,
    #[serde(default)]
    pub brands: Vec<String>,
    #[serde(default)]
    pub products: Vec<String>,
}

impl EntityGroups {
    pub fn is_empty(&self) -> bool {
        self.chemicals.is_empty() && self.companies.is_empty() && self.brands.is_empty() && self.products.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub intent: String,
    pub query_type: QueryType,
    pub entities: EntityGroups,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Requested result cap; clamped to the configured maximum.
    pub limit: Option<usize>,
    pub stream: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub text: String,
    pub options: QueryOptions,
}

impl Question {
    pub fn new(text: impl Into<String>) -> Self { Self { text: text.into(), options: QueryOptions::default() } }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self { self.options.limit = Some(limit); self }

    #[must_use]
    pub fn streaming(mut self, stream: bool) -> Self { self.options.stream = stream; self }
}

/// A retained row from the structured retriever. `row_index` is 1-based.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuredRow {
    pub citation_id: String,
    pub row_index: usize,
    pub record: Row,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StructuredResult {
    /// The statement that produced the rows, when one was executed.
    pub query: Option<String>,
    pub rows: Vec<StructuredRow>,
}

impl StructuredResult {
    pub fn empty() -> Self { Self::default() }
    pub fn len(&self) -> usize { self.rows.len() }
    pub fn is_empty(&self) -> bool { self.rows.is_empty() }
}

/// A ranked neighbour from the semantic retriever. `rank` is 1-based.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SemanticRecord {
    pub citation_id: String,
    pub rank: usize,
    pub score: f32,
    /// Display fields derived from the index metadata.
    pub fields: Row,
    pub metadata: Meta,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SemanticResult {
    pub kind: SourceKind,
    pub records: Vec<SemanticRecord>,
}

impl SemanticResult {
    pub fn empty(kind: SourceKind) -> Self { Self { kind, records: Vec::new() } }
    pub fn len(&self) -> usize { self.records.len() }
    pub fn is_empty(&self) -> bool { self.records.is_empty() }
}

impl Default for SemanticResult {
    fn default() -> Self { Self::empty(SourceKind::Semantic) }
}

/// Binds an answer marker `[citation_number]` to the record it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: SourceKind,
    pub display_index: usize,
    pub citation_number: usize,
    pub record: Row,
}

/// Orchestrator states, also recorded as the route taken by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Classifying,
    RunningStructured,
    RunningSemantic,
    Synthesizing,
    Done,
}

/// Diagnostic trail: what was decided and what each stage reported.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trail {
    pub intent: Intent,
    pub route: Vec<Stage>,
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_rows: Option<Vec<Row>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_rows: Option<Vec<Row>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_query: Option<String>,
    pub citations: Vec<Citation>,
    pub trail: Trail,
}
