//! The question-answering pipeline: intent classification, query
//! generation, citation indexing, answer synthesis and the orchestrator
//! that sequences them per request.

pub mod citations;
pub mod intent;
pub mod json;
pub mod orchestrator;
pub mod prompts;
pub mod sql_gen;
pub mod synth;

pub use citations::CitationTable;
pub use intent::IntentClassifier;
pub use orchestrator::{next_stage, Collaborators, Orchestrator};
pub use sql_gen::QueryGenerator;
pub use synth::{AnswerSynthesizer, Synthesis, NOT_FOUND_MESSAGE};
