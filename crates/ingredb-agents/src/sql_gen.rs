use anyhow::{Context, Result};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::debug;

use ingredb_core::traits::TextGenerator;
use ingredb_core::types::EntityGroups;

use crate::prompts::QUERY_SYSTEM;

static SELECT_KEYWORD: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?i)\bSELECT\b").ok());

/// Retrieval hints for the non-empty entity groups, one per line.
pub fn hint_text(entities: &EntityGroups) -> Option<String> {
    let groups = [
        ("Looking for ingredients", &entities.chemicals),
        ("Filtering by companies", &entities.companies),
        ("Filtering by brands", &entities.brands),
        ("Filtering by products", &entities.products),
    ];
    let lines: Vec<String> = groups
        .iter()
        .filter(|(_, names)| !names.is_empty())
        .map(|(label, names)| format!("{label}: {}", names.join(", ")))
        .collect();
    if lines.is_empty() { None } else { Some(lines.join("\n")) }
}

/// Pulls the statement out of raw model output: drops code fences and any
/// prose before `SELECT`, and cuts at the first `;`. Output without a
/// `SELECT` is returned trimmed so the safety filter can reject it.
pub fn extract_query(raw: &str) -> String {
    let unfenced = raw.replace("```sql", "").replace("```SQL", "").replace("```", "");
    let text = unfenced.trim();
    let Some(start) = SELECT_KEYWORD.as_ref().and_then(|re| re.find(text)).map(|m| m.start()) else {
        return text.to_string();
    };
    let statement = &text[start..];
    let statement = statement.split(';').next().unwrap_or(statement);
    statement.trim().to_string()
}

pub struct QueryGenerator {
    generator: Arc<dyn TextGenerator>,
}

impl QueryGenerator {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self { Self { generator } }

    /// Asks the model for one statement. The result is untrusted until it
    /// has passed the safety filter.
    pub fn generate(&self, question: &str, hints: &EntityGroups) -> Result<String> {
        let prompt = match hint_text(hints) {
            Some(h) => format!("{question}\n\nContext:\n{h}"),
            None => question.to_string(),
        };
        let raw = self.generator.generate(QUERY_SYSTEM, &prompt).context("query generation failed")?;
        let query = extract_query(&raw);
        debug!(query = %query, "generated query");
        Ok(query)
    }
}
