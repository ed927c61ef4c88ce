//! Semantic similarity search.
//!
//! The bundled implementation embeds text as L2-normalized TF-IDF term
//! vectors and ranks by cosine similarity, reported relative to the closest
//! document in the index. A dense embedding index can replace it behind
//! [`RetrievalBackend`] without touching the agents.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{index_terms, BackendKind, Corpus, RawHit, RetrievalBackend};
use crate::types::{Result, SearchConstraints, SourceType};

type SparseVector = HashMap<String, f32>;

/// Lowest similarity treated as a full match when nothing in the index
/// comes closer.
const MIN_REFERENCE_SIMILARITY: f32 = 0.25;

#[derive(Debug, Clone, Default)]
pub struct TermVectors {
    idf: HashMap<String, f32>,
    /// Kept in insertion order so scans are deterministic.
    vectors: Vec<(String, SparseVector)>,
}

impl TermVectors {
    pub fn build<'a, I>(documents: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, String)>,
    {
        let tokenized: Vec<(String, Vec<String>)> = documents
            .into_iter()
            .map(|(id, text)| (id.to_string(), index_terms(&text)))
            .collect();

        let n = tokenized.len() as f32;
        let mut df: HashMap<String, usize> = HashMap::new();
        for (_, tokens) in &tokenized {
            let mut seen: Vec<&String> = tokens.iter().collect();
            seen.sort();
            seen.dedup();
            for term in seen {
                *df.entry(term.clone()).or_insert(0) += 1;
            }
        }

        let idf: HashMap<String, f32> = df
            .into_iter()
            .map(|(term, count)| (term, (1.0 + n / count as f32).ln()))
            .collect();

        let mut index = Self {
            idf,
            vectors: Vec::new(),
        };
        let vectors = tokenized
            .into_iter()
            .map(|(id, tokens)| {
                let vector = index.embed_tokens(&tokens);
                (id, vector)
            })
            .collect();
        index.vectors = vectors;
        index
    }

    fn embed_tokens(&self, tokens: &[String]) -> SparseVector {
        let mut vector: SparseVector = HashMap::new();
        for token in tokens {
            if let Some(idf) = self.idf.get(token) {
                *vector.entry(token.clone()).or_insert(0.0) += idf;
            }
        }

        let norm = vector.values().map(|w| w * w).sum::<f32>().sqrt();
        if norm > 0.0 {
            for weight in vector.values_mut() {
                *weight /= norm;
            }
        }
        vector
    }

    pub fn embed(&self, text: &str) -> SparseVector {
        self.embed_tokens(&index_terms(text))
    }

    /// Similarity of each admitted document to `query`, best first, scaled
    /// so the closest document in the whole index scores 1.
    pub fn search<F>(&self, query: &str, admit: F, limit: usize) -> Vec<(String, f32)>
    where
        F: Fn(&str) -> bool,
    {
        let query_vector = self.embed(query);
        if query_vector.is_empty() {
            return Vec::new();
        }

        let similarities: Vec<(&String, f32)> = self
            .vectors
            .iter()
            .map(|(id, vector)| (id, cosine(&query_vector, vector)))
            .collect();
        let reference = similarities
            .iter()
            .map(|(_, similarity)| *similarity)
            .fold(MIN_REFERENCE_SIMILARITY, f32::max);

        let mut scored: Vec<(String, f32)> = similarities
            .into_iter()
            .filter(|(id, similarity)| *similarity > 0.0 && admit(id))
            .map(|(id, similarity)| (id.clone(), (similarity / reference).clamp(0.0, 1.0)))
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(limit);
        scored
    }
}

fn cosine(a: &SparseVector, b: &SparseVector) -> f32 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small
        .iter()
        .filter_map(|(term, w)| large.get(term).map(|v| w * v))
        .sum::<f32>()
        .clamp(0.0, 1.0)
}

pub struct VectorBackend {
    corpus: Arc<Corpus>,
    source: Option<SourceType>,
}

impl VectorBackend {
    pub fn new(corpus: Arc<Corpus>, source: Option<SourceType>) -> Self {
        Self { corpus, source }
    }
}

#[async_trait]
impl RetrievalBackend for VectorBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Vector
    }

    async fn search(
        &self,
        query: &str,
        constraints: &SearchConstraints,
        limit: usize,
    ) -> Result<Vec<RawHit>> {
        let ranked = self.corpus.vectors().search(
            query,
            |id| self.corpus.admits(id, self.source, constraints),
            limit,
        );

        Ok(ranked
            .into_iter()
            .filter_map(|(id, score)| self.corpus.hit(&id, score))
            .collect())
    }
}
