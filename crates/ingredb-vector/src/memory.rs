use anyhow::{ensure, Result};

use ingredb_core::traits::VectorIndex;
use ingredb_core::types::{Meta, VectorMatch};

struct Entry { id: String, vector: Vec<f32>, metadata: Meta }

/// In-memory brute-force cosine index. Entries with equal scores come back
/// in insertion order.
#[derive(Default)]
pub struct MemoryVectorIndex { dim: usize, entries: Vec<Entry> }

impl MemoryVectorIndex {
    pub fn new(dim: usize) -> Self { Self { dim, entries: Vec::new() } }

    pub fn insert(&mut self, id: impl Into<String>, vector: Vec<f32>, metadata: Meta) -> Result<()> {
        ensure!(vector.len() == self.dim, "vector has {} dims, index expects {}", vector.len(), self.dim);
        self.entries.push(Entry { id: id.into(), vector, metadata });
        Ok(())
    }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() { return 0.0; }
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 { return 0.0; }
        dot / (norm_a * norm_b)
    }
}

impl VectorIndex for MemoryVectorIndex {
    fn search_vec(&self, query_vec: &[f32], k: usize) -> Result<Vec<VectorMatch>> {
        ensure!(query_vec.len() == self.dim, "query has {} dims, index expects {}", query_vec.len(), self.dim);
        let mut scored: Vec<(f32, &Entry)> = self.entries.iter().map(|e| (Self::cosine_similarity(query_vec, &e.vector), e)).collect();
        // stable: equal scores keep insertion order
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, e)| VectorMatch { id: e.id.clone(), score, metadata: e.metadata.clone() })
            .collect())
    }
}
