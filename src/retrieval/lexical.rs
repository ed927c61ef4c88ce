//! BM25 keyword search.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;

use super::{index_terms, BackendKind, Corpus, RawHit, RetrievalBackend};
use crate::types::{Result, SearchConstraints, SourceType};

/// Share of the saturated score a query's best match must reach to be
/// reported as a full match.
const MIN_REFERENCE_SHARE: f32 = 0.25;

/// BM25 index over tokenized documents.
///
/// Scores are reported in [0, 1] relative to the best-matching document in
/// the whole index, so a clearly relevant document scores near 1 whatever
/// the query length. The reference never drops below
/// [`MIN_REFERENCE_SHARE`] of the saturated score (every term at saturated
/// frequency), which keeps a query matching only on a stray term from
/// looking like a full match.
#[derive(Debug, Clone, Default)]
pub struct Bm25Index {
    /// Document ID -> tokenized content
    documents: HashMap<String, Vec<String>>,
    /// Term -> document IDs containing term
    inverted_index: HashMap<String, HashSet<String>>,
    doc_count: usize,
    total_tokens: usize,
    /// Term frequency saturation
    k1: f32,
    /// Length normalization
    b: f32,
}

impl Bm25Index {
    pub fn new() -> Self {
        Self::with_params(1.2, 0.75)
    }

    pub fn with_params(k1: f32, b: f32) -> Self {
        Self {
            k1,
            b,
            ..Default::default()
        }
    }

    pub fn add_document(&mut self, id: &str, content: &str) {
        let tokens = index_terms(content);

        for term in tokens.iter().collect::<HashSet<_>>() {
            self.inverted_index
                .entry(term.clone())
                .or_default()
                .insert(id.to_string());
        }

        self.total_tokens += tokens.len();
        if let Some(previous) = self.documents.insert(id.to_string(), tokens) {
            self.total_tokens -= previous.len();
        } else {
            self.doc_count += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.doc_count
    }

    pub fn is_empty(&self) -> bool {
        self.doc_count == 0
    }

    fn avg_doc_length(&self) -> f32 {
        if self.doc_count == 0 {
            0.0
        } else {
            self.total_tokens as f32 / self.doc_count as f32
        }
    }

    fn idf(&self, term: &str) -> f32 {
        let df = self.inverted_index.get(term).map_or(0, HashSet::len) as f32;
        let n = self.doc_count as f32;
        if df == 0.0 || n == 0.0 {
            return 0.0;
        }
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    fn score_document(&self, doc_id: &str, query_terms: &[String]) -> f32 {
        let Some(doc_tokens) = self.documents.get(doc_id) else {
            return 0.0;
        };

        let doc_len = doc_tokens.len() as f32;
        let avg_len = self.avg_doc_length().max(1.0);

        let mut term_freq: HashMap<&str, usize> = HashMap::new();
        for token in doc_tokens {
            *term_freq.entry(token.as_str()).or_insert(0) += 1;
        }

        query_terms
            .iter()
            .map(|term| {
                let tf = term_freq.get(term.as_str()).copied().unwrap_or(0) as f32;
                if tf == 0.0 {
                    return 0.0;
                }
                let numerator = tf * (self.k1 + 1.0);
                let denominator =
                    tf + self.k1 * (1.0 - self.b + self.b * doc_len / avg_len);
                self.idf(term) * numerator / denominator
            })
            .sum()
    }

    /// Upper bound of `score_document` for these terms.
    fn max_score(&self, query_terms: &[String]) -> f32 {
        query_terms
            .iter()
            .map(|term| self.idf(term) * (self.k1 + 1.0))
            .sum()
    }

    /// Documents matching at least one query term and accepted by `admit`,
    /// best first, with normalized scores. Ties are ordered by id.
    ///
    /// The reference score is taken over every matching document, admitted
    /// or not, so scores stay comparable between agents filtering the same
    /// index differently.
    pub fn search<F>(&self, query: &str, admit: F, limit: usize) -> Vec<(String, f32)>
    where
        F: Fn(&str) -> bool,
    {
        let query_terms: Vec<String> = index_terms(query)
            .into_iter()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let max_score = self.max_score(&query_terms);
        if max_score <= 0.0 {
            return Vec::new();
        }

        let candidates: HashSet<&String> = query_terms
            .iter()
            .filter_map(|term| self.inverted_index.get(term))
            .flatten()
            .collect();

        let raw: Vec<(&String, f32)> = candidates
            .into_iter()
            .map(|id| (id, self.score_document(id, &query_terms)))
            .collect();
        let best = raw.iter().map(|(_, score)| *score).fold(0.0_f32, f32::max);
        let reference = best.max(max_score * MIN_REFERENCE_SHARE);

        let mut scored: Vec<(String, f32)> = raw
            .into_iter()
            .filter(|(id, _)| admit(id))
            .map(|(id, score)| (id.clone(), (score / reference).clamp(0.0, 1.0)))
            .filter(|(_, score)| *score > 0.0)
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(limit);
        scored
    }
}

/// Lexical backend over the shared corpus, optionally restricted to one source type.
pub struct LexicalBackend {
    corpus: Arc<Corpus>,
    source: Option<SourceType>,
}

impl LexicalBackend {
    pub fn new(corpus: Arc<Corpus>, source: Option<SourceType>) -> Self {
        Self { corpus, source }
    }
}

#[async_trait]
impl RetrievalBackend for LexicalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Lexical
    }

    async fn search(
        &self,
        query: &str,
        constraints: &SearchConstraints,
        limit: usize,
    ) -> Result<Vec<RawHit>> {
        let ranked = self.corpus.bm25().search(
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
