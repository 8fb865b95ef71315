//! Per-request state machine.
//!
//! `next_stage` is the transition table; `Orchestrator::ask` is the driver
//! loop that runs the stage for the current state, records it in the route
//! and moves on until `Done`. Stage failures never escape: each one is
//! written to the trail and replaced by an empty result, so every request
//! reaches synthesis and returns a well-formed [`Response`].

use std::sync::Arc;
use tracing::{info, info_span, warn};

use ingredb_core::config::Settings;
use ingredb_core::traits::{Embedder, TabularStore, TextGenerator, VectorIndex};
use ingredb_core::types::{
    Citation, EntityGroups, Intent, QueryType, Question, Response, Row, SemanticResult, SourceKind, Stage,
    StructuredResult, Trail,
};
use ingredb_hybrid::SemanticRetriever;
use ingredb_sql::{analyze, sanitize, where_clause, QueryGuard, StructuredRetriever, ValidatedQuery};

use crate::intent::IntentClassifier;
use crate::sql_gen::QueryGenerator;
use crate::synth::AnswerSynthesizer;

/// Read-only handles shared by every request.
#[derive(Clone)]
pub struct Collaborators {
    pub generator: Arc<dyn TextGenerator>,
    pub store: Arc<dyn TabularStore>,
    pub index: Arc<dyn VectorIndex>,
    pub embedder: Arc<dyn Embedder>,
}

pub fn next_stage(stage: Stage, query_type: QueryType) -> Stage {
    match (stage, query_type) {
        (Stage::Classifying, QueryType::Structured | QueryType::Combined) => Stage::RunningStructured,
        (Stage::Classifying, QueryType::Semantic) => Stage::RunningSemantic,
        (Stage::RunningStructured, QueryType::Combined) => Stage::RunningSemantic,
        (Stage::RunningStructured, _) | (Stage::RunningSemantic, _) => Stage::Synthesizing,
        (Stage::Synthesizing | Stage::Done, _) => Stage::Done,
    }
}

/// What one request has accumulated so far.
struct Run {
    intent: Option<Intent>,
    structured: StructuredResult,
    semantic: SemanticResult,
    validated: Option<ValidatedQuery>,
    sql_query: Option<String>,
    answer: String,
    citations: Vec<Citation>,
    route: Vec<Stage>,
    steps: Vec<String>,
}

impl Run {
    fn new() -> Self {
        Self {
            intent: None,
            structured: StructuredResult::empty(),
            semantic: SemanticResult::default(),
            validated: None,
            sql_query: None,
            answer: String::new(),
            citations: Vec::new(),
            route: Vec::new(),
            steps: Vec::new(),
        }
    }

    fn query_type(&self) -> QueryType { self.intent.as_ref().map_or(QueryType::Semantic, |i| i.query_type) }
}

pub struct Orchestrator {
    classifier: IntentClassifier,
    query_generator: QueryGenerator,
    guard: QueryGuard,
    structured: StructuredRetriever,
    semantic: SemanticRetriever,
    synthesizer: AnswerSynthesizer,
    max_sql_results: usize,
    max_semantic_results: usize,
    hybrid_combined: bool,
}

impl Orchestrator {
    pub fn new(handles: Collaborators, settings: &Settings) -> Self {
        let retrieval = &settings.retrieval;
        Self {
            classifier: IntentClassifier::new(handles.generator.clone()),
            query_generator: QueryGenerator::new(handles.generator.clone()),
            guard: QueryGuard::new(&settings.safety),
            structured: StructuredRetriever::new(handles.store.clone(), retrieval.max_sql_results),
            semantic: SemanticRetriever::new(handles.embedder, handles.index, handles.store, retrieval, &settings.safety),
            synthesizer: AnswerSynthesizer::new(handles.generator),
            max_sql_results: retrieval.max_sql_results,
            max_semantic_results: retrieval.max_semantic_results,
            hybrid_combined: retrieval.hybrid_combined,
        }
    }

    pub fn ask(&self, question: &Question) -> Response { self.run(question, None) }

    /// Like [`ask`](Self::ask); when the question asks for streaming, answer
    /// fragments also go to `sink` as they are generated.
    pub fn ask_streaming(&self, question: &Question, sink: &mut dyn FnMut(&str)) -> Response {
        self.run(question, Some(sink))
    }

    /// Request cap clamped to `1..=max`.
    fn cap(requested: Option<usize>, max: usize) -> usize { requested.unwrap_or(max).clamp(1, max.max(1)) }

    fn run(&self, question: &Question, mut sink: Option<&mut dyn FnMut(&str)>) -> Response {
        let span = info_span!("ask", question = %question.text);
        let _enter = span.enter();
        let sql_cap = Self::cap(question.options.limit, self.max_sql_results);
        let semantic_cap = Self::cap(question.options.limit, self.max_semantic_results);

        let mut run = Run::new();
        let mut stage = Stage::Classifying;
        loop {
            run.route.push(stage);
            match stage {
                Stage::Classifying => self.classify(question, &mut run),
                Stage::RunningStructured => self.run_structured(question, sql_cap, &mut run),
                Stage::RunningSemantic => self.run_semantic(question, semantic_cap, &mut run),
                Stage::Synthesizing => {
                    let sink = if question.options.stream { sink.take() } else { None };
                    self.synthesize(question, sink, &mut run);
                }
                Stage::Done => break,
            }
            stage = next_stage(stage, run.query_type());
        }
        info!(route = ?run.route, citations = run.citations.len(), "request done");
        into_response(run, question)
    }

    fn classify(&self, question: &Question, run: &mut Run) {
        let intent = self.classifier.classify(&question.text);
        info!(query_type = %intent.query_type, "intent classified");
        run.steps.push(format!("Intent analyzed: {}", intent.query_type));
        run.intent = Some(intent);
    }

    fn run_structured(&self, question: &Question, cap: usize, run: &mut Run) {
        let entities = run.intent.as_ref().map(|i| i.entities.clone()).unwrap_or_default();
        let raw = match self.query_generator.generate(&question.text, &entities) {
            Ok(q) => q,
            Err(e) => {
                warn!(error = %e, "structured stage failed");
                run.steps.push(format!("SQL error: {e:#}"));
                return;
            }
        };
        let validated = match self.guard.validate(&raw) {
            Ok(v) => v,
            Err(rejection) => {
                warn!(query = %sanitize(&raw), reason = %rejection, "generated query rejected");
                run.steps.push(format!("SQL error: {rejection}"));
                return;
            }
        };
        let report = analyze(validated.as_str());
        info!(
            complexity = ?report.complexity,
            safety_score = report.safety_score,
            joins = report.join_count,
            "query validated"
        );
        let exec = self.structured.execute(&validated, cap);
        match exec.error {
            Some(error) => run.steps.push(format!("SQL error: {error}")),
            None => {
                run.steps.push(format!("SQL executed: {} results", exec.result.len()));
                run.sql_query = Some(validated.to_string());
                run.structured = exec.result;
            }
        }
        run.validated = Some(validated);
    }

    fn run_semantic(&self, question: &Question, cap: usize, run: &mut Run) {
        let filter = if self.hybrid_combined && run.query_type() == QueryType::Combined {
            run.validated.as_ref().and_then(where_clause)
        } else {
            None
        };
        let (label, outcome) = match &filter {
            Some(f) => ("Hybrid search", self.semantic.search_filtered(&question.text, f, cap)),
            None => ("Semantic search", self.semantic.search(&question.text, cap)),
        };
        match outcome {
            Ok(result) => {
                run.steps.push(format!("{label}: {} results", result.len()));
                run.semantic = result;
            }
            Err(e) => {
                warn!(error = %e, "semantic stage failed");
                run.steps.push(format!("Semantic error: {e:#}"));
                let kind = if filter.is_some() { SourceKind::Hybrid } else { SourceKind::Semantic };
                run.semantic = SemanticResult::empty(kind);
            }
        }
    }

    fn synthesize(&self, question: &Question, sink: Option<&mut dyn FnMut(&str)>, run: &mut Run) {
        match self.synthesizer.synthesize(&question.text, &run.structured, &run.semantic, sink) {
            Ok(s) => {
                run.answer = s.answer;
                run.citations = s.citations;
            }
            Err(e) => {
                warn!(error = %e, "synthesis failed");
                run.steps.push(format!("Response error: {e:#}"));
                run.answer = format!("Sorry, an answer could not be generated right now ({e}).");
            }
        }
    }
}

/// Internal columns are dropped and every value rendered as text.
fn display_rows<'a>(rows: impl Iterator<Item = &'a Row>) -> Option<Vec<Row>> {
    let rows: Vec<Row> = rows.map(|r| r.without(&["citation_id", "Rank", "Score"]).to_text()).collect();
    if rows.is_empty() { None } else { Some(rows) }
}

fn into_response(run: Run, question: &Question) -> Response {
    let intent = run.intent.unwrap_or_else(|| Intent {
        intent: question.text.clone(),
        query_type: QueryType::Semantic,
        entities: EntityGroups::default(),
        reasoning: None,
    });
    Response {
        answer: run.answer,
        structured_rows: display_rows(run.structured.rows.iter().map(|r| &r.record)),
        semantic_rows: display_rows(run.semantic.records.iter().map(|r| &r.fields)),
        sql_query: run.sql_query,
        citations: run.citations,
        trail: Trail { intent, route: run.route, steps: run.steps },
    }
}
