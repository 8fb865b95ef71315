//! Answer synthesis: one generation call over a numbered digest of every
//! retrieved row, so that answer marker `[n]` refers to citation number `n`.

use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::info;

use ingredb_core::traits::TextGenerator;
use ingredb_core::types::{Citation, SemanticResult, SourceKind, StructuredResult};

use crate::citations::CitationTable;
use crate::prompts::ANSWER_SYSTEM;

pub const NOT_FOUND_MESSAGE: &str =
    "No products or data found matching your criteria. Try rephrasing your question or using different search terms.";

/// Columns that identify or rank a record but carry no product facts.
const INTERNAL_COLUMNS: [&str; 4] = ["citation_id", "Rank", "Score", "score"];

#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub answer: String,
    pub citations: Vec<Citation>,
}

pub struct AnswerSynthesizer {
    generator: Arc<dyn TextGenerator>,
}

impl AnswerSynthesizer {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self { Self { generator } }

    /// Produces the answer and its citations. With nothing retrieved the
    /// fixed not-found message comes back and no generation call is made.
    /// When `sink` is given, answer fragments are forwarded as they arrive.
    pub fn synthesize(
        &self,
        question: &str,
        structured: &StructuredResult,
        semantic: &SemanticResult,
        sink: Option<&mut dyn FnMut(&str)>,
    ) -> Result<Synthesis> {
        let table = CitationTable::build(structured, semantic);
        if table.is_empty() {
            info!("nothing retrieved; returning not-found answer");
            return Ok(Synthesis { answer: NOT_FOUND_MESSAGE.to_string(), citations: Vec::new() });
        }
        let prompt = build_prompt(question, structured, semantic, &table);
        let answer = match sink {
            Some(on_fragment) => self.generator.generate_stream(ANSWER_SYSTEM, &prompt, on_fragment),
            None => self.generator.generate(ANSWER_SYSTEM, &prompt),
        }
        .context("answer generation failed")?;
        info!(citations = table.len(), chars = answer.len(), "answer synthesized");
        Ok(Synthesis { answer: answer.trim().to_string(), citations: table.into_vec() })
    }
}

fn data_summary(structured: &StructuredResult, semantic: &SemanticResult) -> String {
    let mut out = String::new();
    if !structured.is_empty() {
        let _ = writeln!(out, "Found {} product result(s) from database query.", structured.len());
    }
    if !semantic.is_empty() {
        let _ = writeln!(out, "Found {} related result(s) from semantic search.", semantic.len());
    }
    out
}

fn write_section(out: &mut String, table: &CitationTable, title: &str, kinds: &[SourceKind]) {
    let mut lines = table.iter().filter(|c| kinds.contains(&c.kind)).peekable();
    if lines.peek().is_none() { return; }
    let _ = writeln!(out, "{title}:");
    for c in lines {
        let fields: Vec<String> = c
            .record
            .without(&INTERNAL_COLUMNS)
            .iter()
            .map(|(column, value)| format!("{column}: {value}"))
            .collect();
        let _ = writeln!(out, "[{}] {}", c.citation_number, fields.join(" | "));
    }
    out.push('\n');
}

/// One line per cited record: `[n] column: value | column: value`.
fn digest(table: &CitationTable) -> String {
    let mut out = String::new();
    write_section(&mut out, table, "PRODUCT RECORDS", &[SourceKind::Structured]);
    write_section(&mut out, table, "RELATED PRODUCTS", &[SourceKind::Semantic, SourceKind::Hybrid]);
    out
}

fn build_prompt(question: &str, structured: &StructuredResult, semantic: &SemanticResult, table: &CitationTable) -> String {
    format!(
        "Question: {question}\n\n{summary}\nData:\n{data}\
         Answer the question directly using only the data above. Mention product names, brands, companies \
         and categories where they help. Cite the numbered rows you rely on with [n].",
        summary = data_summary(structured, semantic),
        data = digest(table),
    )
}
