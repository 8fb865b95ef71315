//! Semantic retrieval over the product vector index, optionally restricted
//! to the record ids a structured filter selects.

use anyhow::{anyhow, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use ingredb_core::config::{RetrievalSettings, SafetySettings};
use ingredb_core::traits::{Embedder, TabularStore, VectorIndex};
use ingredb_core::types::{Meta, Row, SemanticRecord, SemanticResult, SourceKind, Value, VectorMatch};
use ingredb_sql::{sanitize, QueryGuard};

/// Metadata key holding the record id shared with the structured store.
pub const ID_KEY: &str = "cdph_id";

const NOT_AVAILABLE: &str = "N/A";

pub struct SemanticRetriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    store: Arc<dyn TabularStore>,
    guard: QueryGuard,
    overfetch: usize,
    id_column: String,
    filter_table: String,
}

impl SemanticRetriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        store: Arc<dyn TabularStore>,
        retrieval: &RetrievalSettings,
        safety: &SafetySettings,
    ) -> Self {
        Self {
            embedder,
            index,
            store,
            guard: QueryGuard::new(safety),
            overfetch: retrieval.hybrid_overfetch.max(1),
            id_column: retrieval.id_column.clone(),
            filter_table: retrieval.filter_table.clone(),
        }
    }

    fn embed(&self, question: &str) -> Result<Vec<f32>> {
        self.embedder
            .embed_batch(&[question.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("embedder returned no vector"))
    }

    /// Top-`k` neighbours of the question, ids `sem-1..` in rank order.
    pub fn search(&self, question: &str, k: usize) -> Result<SemanticResult> {
        if k == 0 { return Ok(SemanticResult::empty(SourceKind::Semantic)); }
        let q_vec = self.embed(question)?;
        let hits = self.index.search_vec(&q_vec, k)?;
        let records: Vec<SemanticRecord> = hits
            .into_iter()
            .take(k)
            .enumerate()
            .map(|(i, hit)| record(SourceKind::Semantic, i + 1, hit))
            .collect();
        info!(k, hits = records.len(), "semantic search");
        Ok(SemanticResult { kind: SourceKind::Semantic, records })
    }

    /// Like [`search`](Self::search), but only neighbours whose record id is
    /// selected by `filter` (a WHERE-clause body) qualify. Over-fetches
    /// `k * overfetch` neighbours and may return fewer than `k`.
    pub fn search_filtered(&self, question: &str, filter: &str, k: usize) -> Result<SemanticResult> {
        let allowed = self.allowed_ids(filter)?;
        if allowed.is_empty() || k == 0 {
            info!(k, "hybrid search: empty allow-set");
            return Ok(SemanticResult::empty(SourceKind::Hybrid));
        }
        let q_vec = self.embed(question)?;
        let hits = self.index.search_vec(&q_vec, k.saturating_mul(self.overfetch))?;
        let fetched = hits.len();
        let records: Vec<SemanticRecord> = hits
            .into_iter()
            .filter(|hit| hit.metadata.get(ID_KEY).is_some_and(|id| allowed.contains(&normalize_id(id))))
            .take(k)
            .enumerate()
            .map(|(i, hit)| record(SourceKind::Hybrid, i + 1, hit))
            .collect();
        info!(k, fetched, allowed = allowed.len(), hits = records.len(), "hybrid search");
        Ok(SemanticResult { kind: SourceKind::Hybrid, records })
    }

    fn allowed_ids(&self, filter: &str) -> Result<HashSet<String>> {
        let sql = format!("SELECT DISTINCT {} FROM {} WHERE {}", self.id_column, self.filter_table, filter.trim());
        let valid = self.guard.validate(&sql).map_err(|r| anyhow!("hybrid filter rejected: {r}"))?;
        debug!(query = %sanitize(valid.as_str()), "hybrid filter");
        let table = self.store.query(valid.as_str())?;
        Ok(table
            .rows
            .iter()
            .filter_map(|row| row.first())
            .filter(|v| **v != Value::Null)
            .map(|v| normalize_id(&v.to_string()))
            .collect())
    }
}

/// Ids may come back from the index as `"42"` or `"42.0"`; both name the same record.
fn normalize_id(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed.strip_suffix(".0").unwrap_or(trimmed).to_string()
}

fn field(meta: &Meta, key: &str) -> String {
    meta.get(key).cloned().unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

fn status(meta: &Meta) -> &'static str {
    match meta.get("is_discontinued").map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "true" | "1" | "yes") => "Discontinued",
        _ => "Active",
    }
}

/// Builds the ranked record and its display snapshot. Hybrid records carry
/// no rank column and omit CAS number, status and CDPH id.
fn record(kind: SourceKind, seq: usize, hit: VectorMatch) -> SemanticRecord {
    let meta = &hit.metadata;
    let mut fields = Row::new();
    if kind == SourceKind::Semantic {
        fields.push("Rank", i64::try_from(seq).unwrap_or(i64::MAX));
    }
    fields.push("Score", format!("{:.4}", hit.score));
    fields.push("Product", field(meta, "product_name"));
    fields.push("Chemical", field(meta, "chemical_name"));
    if kind == SourceKind::Semantic {
        fields.push("CAS Number", field(meta, "cas_number"));
    }
    fields.push("Brand", field(meta, "brand_name"));
    fields.push("Company", field(meta, "company_name"));
    let category = meta.get("sub_category").or_else(|| meta.get("primary_category")).cloned();
    fields.push("Category", category.unwrap_or_else(|| NOT_AVAILABLE.to_string()));
    if kind == SourceKind::Semantic {
        fields.push("Status", status(meta));
        fields.push("CDPH ID", field(meta, ID_KEY));
    }
    SemanticRecord { citation_id: kind.citation_id(seq), rank: seq, score: hit.score, fields, metadata: hit.metadata }
}
