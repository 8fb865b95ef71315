use std::collections::HashMap;
use tracing::warn;

use ingredb_core::types::{Citation, Row, SemanticResult, SourceKind, StructuredResult};

/// Citations for one request, numbered 1.. in assignment order:
/// every structured row first, then every semantic record.
#[derive(Debug, Default)]
pub struct CitationTable {
    entries: Vec<Citation>,
    by_id: HashMap<String, usize>,
}

impl CitationTable {
    pub fn build(structured: &StructuredResult, semantic: &SemanticResult) -> Self {
        let mut table = Self::default();
        for row in &structured.rows {
            table.push(&row.citation_id, SourceKind::Structured, row.row_index, &row.record);
        }
        for rec in &semantic.records {
            table.push(&rec.citation_id, semantic.kind, rec.rank, &rec.fields);
        }
        table
    }

    fn push(&mut self, id: &str, kind: SourceKind, display_index: usize, fields: &Row) {
        if self.by_id.contains_key(id) {
            warn!(id, "duplicate citation id ignored");
            return;
        }
        let mut record = Row::new();
        record.push("citation_id", id);
        for (column, value) in fields.iter() {
            record.push(column, value.clone());
        }
        let citation = Citation {
            id: id.to_string(),
            kind,
            display_index,
            citation_number: self.entries.len() + 1,
            record: record.to_text(),
        };
        self.by_id.insert(citation.id.clone(), self.entries.len());
        self.entries.push(citation);
    }

    pub fn get(&self, id: &str) -> Option<&Citation> { self.by_id.get(id).map(|&i| &self.entries[i]) }

    pub fn iter(&self) -> impl Iterator<Item = &Citation> { self.entries.iter() }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn into_vec(self) -> Vec<Citation> { self.entries }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingredb_core::types::{Meta, SemanticRecord, StructuredRow, Value};

    fn structured(n: usize) -> StructuredResult {
        StructuredResult {
            query: Some("SELECT ...".into()),
            rows: (1..=n)
                .map(|i| StructuredRow {
                    citation_id: SourceKind::Structured.citation_id(i),
                    row_index: i,
                    record: Row::from_pairs([("CDPHId", Value::Integer(i64::try_from(i).unwrap())), ("ProductName", Value::Null)]),
                })
                .collect(),
        }
    }

    fn semantic(kind: SourceKind, n: usize) -> SemanticResult {
        SemanticResult {
            kind,
            records: (1..=n)
                .map(|i| SemanticRecord {
                    citation_id: kind.citation_id(i),
                    rank: i,
                    score: 0.5,
                    fields: Row::from_pairs([("Score", "0.5000"), ("Product", "Serum")]),
                    metadata: Meta::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn structured_first_then_semantic_numbered_in_order() {
        let table = CitationTable::build(&structured(2), &semantic(SourceKind::Semantic, 3));
        let ids: Vec<&str> = table.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["sql-1", "sql-2", "sem-1", "sem-2", "sem-3"]);
        let numbers: Vec<usize> = table.iter().map(|c| c.citation_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
        assert_eq!(table.get("sem-1").map(|c| c.display_index), Some(1));
        assert_eq!(table.get("sem-1").map(|c| c.kind), Some(SourceKind::Semantic));
    }

    #[test]
    fn lookup_is_stable_and_records_are_text() {
        let table = CitationTable::build(&structured(1), &SemanticResult::default());
        let first = table.get("sql-1").unwrap().clone();
        assert_eq!(table.get("sql-1"), Some(&first));
        assert_eq!(first.record.columns().collect::<Vec<_>>(), vec!["citation_id", "CDPHId", "ProductName"]);
        assert_eq!(first.record.get("CDPHId"), Some(&Value::from("1")));
        assert_eq!(first.record.get("ProductName"), Some(&Value::from("null")));
        assert!(table.get("sem-1").is_none());
    }

    #[test]
    fn hybrid_records_keep_their_kind() {
        let table = CitationTable::build(&StructuredResult::empty(), &semantic(SourceKind::Hybrid, 2));
        assert!(table.iter().all(|c| c.kind == SourceKind::Hybrid));
        assert_eq!(table.get("hyb-2").map(|c| c.citation_number), Some(2));
    }

    #[test]
    fn empty_inputs_give_an_empty_table() {
        assert!(CitationTable::build(&StructuredResult::empty(), &SemanticResult::default()).is_empty());
    }
}
