//! Seams to the external collaborators: embedding model, vector index,
//! tabular store and text generator. Every pipeline stage receives these as
//! `Arc<dyn Trait>` handles so each one can be swapped for a test double.

use crate::types::{Table, VectorMatch};

pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

pub trait VectorIndex: Send + Sync {
    /// Returns up to `k` neighbours of `query_vec`, best first. Ties keep the
    /// index's native order.
    fn search_vec(&self, query_vec: &[f32], k: usize) -> anyhow::Result<Vec<VectorMatch>>;
}

pub trait TabularStore: Send + Sync {
    /// Executes one read-only statement and materializes every returned row.
    fn query(&self, sql: &str) -> anyhow::Result<Table>;
}

pub trait TextGenerator: Send + Sync {
    fn generate(&self, system: &str, user: &str) -> anyhow::Result<String>;

    /// Incremental variant. `on_fragment` sees each fragment as it arrives;
    /// the return value is the concatenation of all fragments.
    fn generate_stream(
        &self,
        system: &str,
        user: &str,
        on_fragment: &mut dyn FnMut(&str),
    ) -> anyhow::Result<String> {
        let text = self.generate(system, user)?;
        on_fragment(&text);
        Ok(text)
    }
}
