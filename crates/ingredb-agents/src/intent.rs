use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use ingredb_core::traits::TextGenerator;
use ingredb_core::types::{EntityGroups, Intent, QueryType};

use crate::json::extract_json_object;
use crate::prompts::INTENT_SYSTEM;

const STRUCTURED_KEYWORDS: [&str; 4] = ["how many", "count", "total", "top"];

/// Keyword routing used whenever the model's decision is unusable.
/// `include_most` widens the keyword set for the case where the model
/// answered but left out `query_type`.
pub fn heuristic_query_type(question: &str, include_most: bool) -> QueryType {
    let q = question.to_lowercase();
    let structured = STRUCTURED_KEYWORDS.iter().any(|k| q.contains(k)) || (include_most && q.contains("most"));
    if structured { QueryType::Structured } else { QueryType::Semantic }
}

pub struct IntentClassifier {
    generator: Arc<dyn TextGenerator>,
}

impl IntentClassifier {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self { Self { generator } }

    /// Never fails: generation errors and unparseable output fall back to
    /// the keyword heuristic with no entities.
    pub fn classify(&self, question: &str) -> Intent {
        let raw = match self.generator.generate(INTENT_SYSTEM, &format!("Question: {question}")) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "intent generation failed; using keyword routing");
                return fallback(question);
            }
        };
        match extract_json_object(&raw) {
            Some(map) => from_object(question, &map),
            None => {
                debug!(raw = %raw, "no JSON object in classifier output");
                fallback(question)
            }
        }
    }
}

fn fallback(question: &str) -> Intent {
    Intent {
        intent: question.to_string(),
        query_type: heuristic_query_type(question, false),
        entities: EntityGroups::default(),
        reasoning: None,
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

fn entities(value: Option<&Value>) -> EntityGroups {
    let Some(Value::Object(groups)) = value else { return EntityGroups::default() };
    EntityGroups {
        chemicals: string_list(groups.get("chemicals")),
        companies: string_list(groups.get("companies")),
        brands: string_list(groups.get("brands")),
        products: string_list(groups.get("products")),
    }
}

fn from_object(question: &str, map: &Map<String, Value>) -> Intent {
    // Only a missing label falls back to keywords; a label we don't know routes to semantic.
    let query_type = match map.get("query_type") {
        None | Some(Value::Null) => heuristic_query_type(question, true),
        Some(label) => label.as_str().and_then(QueryType::parse).unwrap_or_else(|| {
            debug!(label = %label, "unrecognized query_type");
            QueryType::Semantic
        }),
    };
    let intent = map
        .get("intent")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map_or_else(|| question.to_string(), str::to_string);
    Intent {
        intent,
        query_type,
        entities: entities(map.get("entities")),
        reasoning: map.get("reasoning").and_then(Value::as_str).map(str::to_string),
    }
}
