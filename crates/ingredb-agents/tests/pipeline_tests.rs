use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use ingredb_agents::prompts::{ANSWER_SYSTEM, INTENT_SYSTEM, QUERY_SYSTEM};
use ingredb_agents::{Collaborators, Orchestrator, NOT_FOUND_MESSAGE};
use ingredb_core::config::Settings;
use ingredb_core::traits::{Embedder, TabularStore, TextGenerator, VectorIndex};
use ingredb_core::types::{Meta, QueryType, Question, SourceKind, Stage, Table, VectorMatch};
use ingredb_embed::HashEmbedder;
use ingredb_sql::SqliteStore;
use ingredb_vector::MemoryVectorIndex;

const DIM: usize = 64;

/// Answers each system prompt with a canned reply and records which
/// stage called it, in order. Stages listed in `failing` get an error instead.
struct ScriptedGenerator {
    intent: String,
    query: String,
    answer: String,
    failing: Vec<&'static str>,
    calls: Mutex<Vec<&'static str>>,
}

impl ScriptedGenerator {
    fn new(intent: &str, query: &str) -> Self {
        Self {
            intent: intent.into(),
            query: query.into(),
            answer: "Here is what I found [1].".into(),
            failing: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<&'static str> { self.calls.lock().unwrap().clone() }
}

impl TextGenerator for ScriptedGenerator {
    fn generate(&self, system: &str, _user: &str) -> anyhow::Result<String> {
        let (who, reply) = match system {
            s if s == INTENT_SYSTEM => ("intent", &self.intent),
            s if s == QUERY_SYSTEM => ("query", &self.query),
            s if s == ANSWER_SYSTEM => ("answer", &self.answer),
            _ => anyhow::bail!("unexpected system prompt"),
        };
        self.calls.lock().unwrap().push(who);
        if self.failing.contains(&who) {
            anyhow::bail!("model server unavailable");
        }
        Ok(reply.clone())
    }
}

/// Wraps the SQLite fixture, logging the order of store calls against a shared clock.
struct CountingStore { inner: SqliteStore, calls: AtomicUsize, clock: Arc<AtomicUsize>, at: Mutex<Vec<usize>> }

impl TabularStore for CountingStore {
    fn query(&self, sql: &str) -> anyhow::Result<Table> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.at.lock().unwrap().push(self.clock.fetch_add(1, Ordering::SeqCst));
        self.inner.query(sql)
    }
}

/// Embedder that stamps the shared clock, so semantic work can be ordered against store calls.
struct ClockedEmbedder { inner: HashEmbedder, clock: Arc<AtomicUsize>, at: Mutex<Vec<usize>> }

impl Embedder for ClockedEmbedder {
    fn dim(&self) -> usize { self.inner.dim() }
    fn max_len(&self) -> usize { self.inner.max_len() }
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        self.at.lock().unwrap().push(self.clock.fetch_add(1, Ordering::SeqCst));
        self.inner.embed_batch(texts)
    }
}

struct OfflineIndex;

impl VectorIndex for OfflineIndex {
    fn search_vec(&self, _query_vec: &[f32], _k: usize) -> anyhow::Result<Vec<VectorMatch>> {
        anyhow::bail!("vector index offline")
    }
}

struct Fixture {
    generator: Arc<ScriptedGenerator>,
    store: Arc<CountingStore>,
    embedder: Arc<ClockedEmbedder>,
    orchestrator: Orchestrator,
}

const PRODUCTS: [(i64, &str, &str, &str); 8] = [
    (1, "Sheer Mineral SPF 30", "Titanium dioxide", "SunCo"),
    (2, "Daily Defense Lotion", "Titanium dioxide", "SunCo"),
    (3, "Matte Pressed Powder", "Titanium dioxide", "Glow"),
    (4, "Shimmer Eyeshadow", "Mica", "Glow"),
    (5, "Anti Dandruff Shampoo", "Coal tar", "Dove"),
    (6, "Night Repair Cream", "Retinyl palmitate", "Nuit"),
    (7, "Tinted Lip Balm", "Titanium dioxide", "Glow"),
    (8, "Baby Powder", "Talc", "Soft"),
];

fn fixture(intent: &str, query: &str, settings: &Settings) -> Fixture {
    build_fixture(intent, query, settings, Vec::new(), None)
}

fn build_fixture(
    intent: &str,
    query: &str,
    settings: &Settings,
    failing: Vec<&'static str>,
    index_override: Option<Arc<dyn VectorIndex>>,
) -> Fixture {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch("CREATE TABLE cosmetic_csv (CDPHId INTEGER, ProductName TEXT, ChemicalName TEXT, BrandName TEXT)").unwrap();
    for (id, product, chemical, brand) in PRODUCTS {
        conn.execute("INSERT INTO cosmetic_csv VALUES (?1, ?2, ?3, ?4)", rusqlite::params![id, product, chemical, brand]).unwrap();
    }

    let hasher = HashEmbedder::new(DIM);
    let mut index = MemoryVectorIndex::new(DIM);
    for (id, product, chemical, brand) in PRODUCTS {
        let text = format!("{product} {chemical} {brand}");
        let v = hasher.embed_batch(&[text]).unwrap().remove(0);
        let meta = Meta::from([
            ("cdph_id".to_string(), id.to_string()),
            ("product_name".to_string(), product.to_string()),
            ("chemical_name".to_string(), chemical.to_string()),
            ("brand_name".to_string(), brand.to_string()),
        ]);
        index.insert(format!("v{id}"), v, meta).unwrap();
    }

    let clock = Arc::new(AtomicUsize::new(0));
    let generator = Arc::new(ScriptedGenerator { failing, ..ScriptedGenerator::new(intent, query) });
    let store = Arc::new(CountingStore {
        inner: SqliteStore::from_connection(conn),
        calls: AtomicUsize::new(0),
        clock: clock.clone(),
        at: Mutex::new(Vec::new()),
    });
    let embedder = Arc::new(ClockedEmbedder { inner: hasher, clock, at: Mutex::new(Vec::new()) });
    let orchestrator = Orchestrator::new(
        Collaborators {
            generator: generator.clone(),
            store: store.clone(),
            index: index_override.unwrap_or_else(|| Arc::new(index)),
            embedder: embedder.clone(),
        },
        settings,
    );
    Fixture { generator, store, embedder, orchestrator }
}

const TITANIUM_SQL: &str =
    "SELECT CDPHId, ProductName FROM cosmetic_csv WHERE ChemicalName LIKE '%titanium dioxide%' ORDER BY CDPHId";

#[test]
fn semantic_questions_never_touch_the_store() {
    let f = fixture(r#"{"intent": "similar lotions", "query_type": "SEMANTIC"}"#, TITANIUM_SQL, &Settings::default());
    let response = f.orchestrator.ask(&Question::new("lotions like Daily Defense"));

    assert_eq!(f.store.calls.load(Ordering::SeqCst), 0);
    assert_eq!(f.generator.calls(), vec!["intent", "answer"]);
    assert_eq!(response.trail.route, vec![Stage::Classifying, Stage::RunningSemantic, Stage::Synthesizing, Stage::Done]);
    assert_eq!(response.citations.len(), 5);
    assert!(response.citations.iter().all(|c| c.kind == SourceKind::Semantic));
    assert!(response.structured_rows.is_none());
    assert!(response.sql_query.is_none());
}

#[test]
fn combined_runs_structured_then_semantic() {
    let f = fixture(r#"{"query_type": "COMBINED", "entities": {"chemicals": ["titanium dioxide"]}}"#, TITANIUM_SQL, &Settings::default());
    let response = f.orchestrator.ask(&Question::new("sunscreens with titanium dioxide like Sheer Mineral"));

    assert_eq!(
        response.trail.route,
        vec![Stage::Classifying, Stage::RunningStructured, Stage::RunningSemantic, Stage::Synthesizing, Stage::Done]
    );
    let store_at = f.store.at.lock().unwrap().clone();
    let embed_at = f.embedder.at.lock().unwrap().clone();
    assert_eq!(store_at.len(), 1);
    assert_eq!(embed_at.len(), 1);
    assert!(store_at[0] < embed_at[0], "semantic must run after structured");
    assert_eq!(f.generator.calls(), vec!["intent", "query", "answer"]);

    // four structured rows first, then five semantic records
    let ids: Vec<&str> = response.citations.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["sql-1", "sql-2", "sql-3", "sql-4", "sem-1", "sem-2", "sem-3", "sem-4", "sem-5"]);
    let numbers: Vec<usize> = response.citations.iter().map(|c| c.citation_number).collect();
    assert_eq!(numbers, (1..=9).collect::<Vec<_>>());
    assert_eq!(response.sql_query.as_deref(), Some(TITANIUM_SQL));
    assert_eq!(response.structured_rows.as_ref().map(Vec::len), Some(4));
    assert_eq!(response.semantic_rows.as_ref().map(Vec::len), Some(5));
    assert!(response.trail.steps.iter().any(|s| s == "SQL executed: 4 results"));
}

#[test]
fn request_limit_caps_both_retrievers() {
    let f = fixture(r#"{"query_type": "COMBINED"}"#, TITANIUM_SQL, &Settings::default());
    let response = f.orchestrator.ask(&Question::new("titanium dioxide products").with_limit(2));
    let ids: Vec<&str> = response.citations.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["sql-1", "sql-2", "sem-1", "sem-2"]);
}

#[test]
fn rejected_query_is_a_diagnostic_not_a_failure() {
    let f = fixture(r#"{"query_type": "STRUCTURED"}"#, "UPDATE cosmetic_csv SET BrandName = 'x'", &Settings::default());
    let response = f.orchestrator.ask(&Question::new("how many products use talc"));

    assert_eq!(f.store.calls.load(Ordering::SeqCst), 0);
    assert!(response.trail.steps.iter().any(|s| s.contains("Mutating SQL keyword 'UPDATE'")), "{:?}", response.trail.steps);
    assert_eq!(response.answer, NOT_FOUND_MESSAGE);
    assert!(response.citations.is_empty());
    assert_eq!(f.generator.calls(), vec!["intent", "query"], "no generation call for the answer");
}

#[test]
fn empty_results_give_not_found_without_generation() {
    let f = fixture(
        r#"{"query_type": "STRUCTURED"}"#,
        "SELECT ProductName FROM cosmetic_csv WHERE ChemicalName LIKE '%unobtainium%'",
        &Settings::default(),
    );
    let response = f.orchestrator.ask(&Question::new("how many products contain unobtainium?"));
    assert_eq!(response.answer, NOT_FOUND_MESSAGE);
    assert!(response.citations.is_empty());
    assert!(!f.generator.calls().contains(&"answer"));
    assert!(response.trail.steps.iter().any(|s| s == "SQL executed: 0 results"));
}

#[test]
fn unparseable_intent_with_how_many_routes_structured() {
    let f = fixture("I cannot answer in JSON, sorry.", TITANIUM_SQL, &Settings::default());
    let response = f.orchestrator.ask(&Question::new("How many products contain titanium dioxide?"));
    assert_eq!(response.trail.intent.query_type, QueryType::Structured);
    assert!(response.trail.intent.entities.is_empty());
    assert_eq!(response.trail.route[1], Stage::RunningStructured);
    assert!(f.embedder.at.lock().unwrap().is_empty());
}

#[test]
fn engine_error_still_reaches_synthesis() {
    let f = fixture(r#"{"query_type": "COMBINED"}"#, "SELECT NoSuchColumn FROM cosmetic_csv", &Settings::default());
    let response = f.orchestrator.ask(&Question::new("products like baby powder"));
    assert!(response.trail.steps.iter().any(|s| s.starts_with("SQL error:")));
    assert!(response.sql_query.is_none());
    assert_eq!(response.citations.len(), 5);
    assert_eq!(response.citations[0].id, "sem-1");
    assert_eq!(response.citations[0].citation_number, 1);
}

#[test]
fn failing_vector_index_keeps_structured_rows() {
    let f = build_fixture(r#"{"query_type": "COMBINED"}"#, TITANIUM_SQL, &Settings::default(), Vec::new(), Some(Arc::new(OfflineIndex)));
    let response = f.orchestrator.ask(&Question::new("titanium dioxide products like Sheer Mineral"));

    assert!(
        response.trail.steps.iter().any(|s| s.starts_with("Semantic error:") && s.contains("vector index offline")),
        "{:?}",
        response.trail.steps
    );
    assert_eq!(response.trail.route.last(), Some(&Stage::Done));
    assert!(response.semantic_rows.is_none());
    assert_eq!(response.citations.len(), 4);
    assert!(response.citations.iter().all(|c| c.kind == SourceKind::Structured));
    assert_eq!(response.answer, "Here is what I found [1].");
    assert_eq!(f.generator.calls(), vec!["intent", "query", "answer"]);
}

#[test]
fn failing_query_generation_falls_through_to_semantic() {
    let f = build_fixture(r#"{"query_type": "COMBINED"}"#, TITANIUM_SQL, &Settings::default(), vec!["query"], None);
    let response = f.orchestrator.ask(&Question::new("powders like baby powder"));

    assert_eq!(f.store.calls.load(Ordering::SeqCst), 0);
    assert!(
        response.trail.steps.iter().any(|s| s.starts_with("SQL error:") && s.contains("model server unavailable")),
        "{:?}",
        response.trail.steps
    );
    assert!(response.sql_query.is_none());
    assert!(response.structured_rows.is_none());
    assert_eq!(response.citations.len(), 5);
    assert_eq!(response.citations[0].id, "sem-1");
    assert_eq!(f.generator.calls(), vec!["intent", "query", "answer"]);
}

#[test]
fn failing_synthesis_still_returns_a_response() {
    let f = build_fixture(r#"{"query_type": "STRUCTURED"}"#, TITANIUM_SQL, &Settings::default(), vec!["answer"], None);
    let response = f.orchestrator.ask(&Question::new("how many products contain titanium dioxide?"));

    assert!(response.answer.starts_with("Sorry"), "{}", response.answer);
    assert!(response.citations.is_empty());
    assert!(response.trail.steps.iter().any(|s| s.starts_with("Response error:")), "{:?}", response.trail.steps);
    assert_eq!(response.structured_rows.as_ref().map(Vec::len), Some(4));
    assert_eq!(response.sql_query.as_deref(), Some(TITANIUM_SQL));
    assert_eq!(response.trail.route.last(), Some(&Stage::Done));
    assert!(serde_json::to_value(&response).is_ok());
}

#[test]
fn hybrid_combined_restricts_semantic_to_the_where_clause() {
    let mut settings = Settings::default();
    settings.retrieval.hybrid_combined = true;
    let f = fixture(r#"{"query_type": "COMBINED"}"#, TITANIUM_SQL, &settings);
    let response = f.orchestrator.ask(&Question::new("titanium dioxide powders"));

    // the generated query plus the hybrid filter query
    assert_eq!(f.store.calls.load(Ordering::SeqCst), 2);
    let semantic: Vec<_> = response.citations.iter().filter(|c| c.kind == SourceKind::Hybrid).collect();
    assert_eq!(semantic.len(), 4, "only the four titanium dioxide products qualify");
    assert_eq!(semantic[0].id, "hyb-1");
    assert!(response.trail.steps.iter().any(|s| s == "Hybrid search: 4 results"));
}

#[test]
fn streaming_sends_answer_fragments_to_the_sink() {
    let f = fixture(r#"{"query_type": "SEMANTIC"}"#, TITANIUM_SQL, &Settings::default());
    let mut streamed = String::new();
    let response = f
        .orchestrator
        .ask_streaming(&Question::new("powders like baby powder").streaming(true), &mut |frag: &str| streamed.push_str(frag));
    assert_eq!(streamed, response.answer);

    let mut untouched = String::new();
    f.orchestrator.ask_streaming(&Question::new("powders like baby powder"), &mut |frag: &str| untouched.push_str(frag));
    assert!(untouched.is_empty(), "non-streaming requests leave the sink alone");
}

#[test]
fn response_serializes_to_the_public_contract() {
    let f = fixture(r#"{"query_type": "COMBINED"}"#, TITANIUM_SQL, &Settings::default());
    let response = f.orchestrator.ask(&Question::new("titanium dioxide"));
    let json = serde_json::to_value(&response).unwrap();
    assert!(json["answer"].is_string());
    assert_eq!(json["citations"][0]["type"], "structured");
    assert_eq!(json["citations"][0]["record"]["citation_id"], "sql-1");
    assert_eq!(json["citations"][0]["record"]["CDPHId"], "1");
    assert!(json["semantic_rows"][0].get("Score").is_none());
    assert_eq!(json["trail"]["route"][0], "classifying");
}
