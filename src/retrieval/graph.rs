//! Citation-graph expansion.
//!
//! Finds the documents most relevant to the query across every source, then
//! follows their `related` edges one hop to reach documents of the wanted
//! source type that keyword or vector search alone may miss.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{BackendKind, Corpus, RawHit, RetrievalBackend};
use crate::types::{Result, SearchConstraints, SourceType};

/// Seeds explored per query.
const SEED_COUNT: usize = 5;
/// Score multiplier applied across one edge.
const EDGE_DECAY: f32 = 0.85;

pub struct GraphBackend {
    corpus: Arc<Corpus>,
    source: Option<SourceType>,
}

impl GraphBackend {
    pub fn new(corpus: Arc<Corpus>, source: Option<SourceType>) -> Self {
        Self { corpus, source }
    }
}

#[async_trait]
impl RetrievalBackend for GraphBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Graph
    }

    async fn search(
        &self,
        query: &str,
        constraints: &SearchConstraints,
        limit: usize,
    ) -> Result<Vec<RawHit>> {
        let open = SearchConstraints::default();
        let seeds = self
            .corpus
            .bm25()
            .search(query, |id| self.corpus.admits(id, None, &open), SEED_COUNT);

        let mut reached: HashMap<String, f32> = HashMap::new();
        for (seed_id, seed_score) in &seeds {
            let Some(seed) = self.corpus.get(seed_id) else {
                continue;
            };
            for neighbour in &seed.related {
                if neighbour == seed_id
                    || !self.corpus.admits(neighbour, self.source, constraints)
                {
                    continue;
                }
                let score = seed_score * EDGE_DECAY;
                reached
                    .entry(neighbour.clone())
                    .and_modify(|s| *s = s.max(score))
                    .or_insert(score);
            }
        }

        let mut ranked: Vec<(String, f32)> = reached.into_iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit);

        Ok(ranked
            .into_iter()
            .filter_map(|(id, score)| self.corpus.hit(&id, score))
            .collect())
    }
}
