//! Retrieval backends.
//!
//! Agents reach their knowledge sources only through [`RetrievalBackend`].
//! Four kinds exist:
//! - **Vector**: semantic similarity ([`vector::VectorBackend`])
//! - **Lexical**: BM25 keyword relevance ([`lexical::LexicalBackend`])
//! - **Graph**: citation-relationship expansion ([`graph::GraphBackend`])
//! - **External**: web search, optionally site-scoped ([`web::WebSearchBackend`])
//!
//! The vector, lexical and graph backends bundled here are in-memory views
//! over a [`corpus::Corpus`] loaded at start-up. Hosted indexes plug in by
//! implementing the same trait.

pub mod corpus;
pub mod graph;
pub mod lexical;
pub mod vector;
pub mod web;

use std::fmt;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::{Result, SearchConstraints, SourceType};

pub use corpus::{Corpus, Document};
pub use graph::GraphBackend;
pub use lexical::{Bm25Index, LexicalBackend};
pub use vector::VectorBackend;
pub use web::{WebSearchBackend, IRS_SITE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Vector,
    Lexical,
    Graph,
    External,
}

impl BackendKind {
    /// Vector and lexical hits are blended by the hybrid weights; graph and
    /// external hits are merged as-is.
    pub fn is_semantic(&self) -> bool {
        matches!(self, BackendKind::Vector)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Vector => "vector",
            BackendKind::Lexical => "lexical",
            BackendKind::Graph => "graph",
            BackendKind::External => "external",
        };
        f.write_str(name)
    }
}

/// A backend-local search hit, before an agent turns it into evidence.
#[derive(Debug, Clone, PartialEq)]
pub struct RawHit {
    pub id: String,
    pub title: String,
    pub content: String,
    /// Defaults to the calling agent's specialty when absent.
    pub source_type: Option<SourceType>,
    /// Backend-local relevance; agents clamp it into [0, 1].
    pub score: f32,
    pub citation: String,
    pub url: Option<String>,
    pub published: Option<NaiveDate>,
}

#[async_trait]
pub trait RetrievalBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Ranked hits for `query`, best first, at most `limit` of them.
    async fn search(
        &self,
        query: &str,
        constraints: &SearchConstraints,
        limit: usize,
    ) -> Result<Vec<RawHit>>;
}

/// Function words dropped before indexing. Negations stay: outcome
/// detection reads them.
const STOP_WORDS: &[&str] = &[
    "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for", "from", "has", "have",
    "how", "if", "in", "into", "is", "it", "its", "of", "on", "or", "that", "the", "their",
    "this", "to", "was", "what", "when", "which", "who", "with", "under",
];

/// Lowercase alphanumeric terms longer than one character.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| s.len() > 1)
        .map(String::from)
        .collect()
}

/// [`tokenize`] without stop words; the terms the search indices use.
pub fn index_terms(text: &str) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter(|term| !STOP_WORDS.contains(&term.as_str()))
        .collect()
}
