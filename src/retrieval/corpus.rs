//! In-memory knowledge base shared by the bundled backends.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::lexical::Bm25Index;
use super::vector::TermVectors;
use super::RawHit;
use crate::types::{AppError, Result, SearchConstraints, SourceType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub source_type: SourceType,
    pub title: String,
    pub citation: String,
    pub content: String,
    #[serde(default)]
    pub published: Option<NaiveDate>,
    #[serde(default)]
    pub url: Option<String>,
    /// Ids of documents this one cites or is cited by.
    #[serde(default)]
    pub related: Vec<String>,
}

/// Documents plus the lexical and vector indices built over them. Read-only
/// after construction.
#[derive(Debug, Default)]
pub struct Corpus {
    documents: Vec<Document>,
    positions: HashMap<String, usize>,
    bm25: Bm25Index,
    vectors: TermVectors,
}

impl Corpus {
    pub fn from_documents(documents: Vec<Document>) -> Self {
        let mut bm25 = Bm25Index::new();
        let mut positions = HashMap::with_capacity(documents.len());

        for (position, doc) in documents.iter().enumerate() {
            bm25.add_document(&doc.id, &Self::indexed_text(doc));
            positions.insert(doc.id.clone(), position);
        }

        let vectors = TermVectors::build(
            documents
                .iter()
                .map(|doc| (doc.id.as_str(), Self::indexed_text(doc))),
        );

        Self {
            documents,
            positions,
            bm25,
            vectors,
        }
    }

    /// Load a JSON array of documents.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            AppError::Configuration(format!("Failed to read corpus {:?}: {}", path, e))
        })?;
        let documents: Vec<Document> = serde_json::from_str(&content).map_err(|e| {
            AppError::Configuration(format!("Failed to parse corpus {:?}: {}", path, e))
        })?;

        info!(documents = documents.len(), "Loaded corpus from {:?}", path);
        Ok(Self::from_documents(documents))
    }

    fn indexed_text(doc: &Document) -> String {
        format!("{} {} {}", doc.title, doc.citation, doc.content)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Document> {
        self.positions.get(id).map(|&i| &self.documents[i])
    }

    pub fn bm25(&self) -> &Bm25Index {
        &self.bm25
    }

    pub fn vectors(&self) -> &TermVectors {
        &self.vectors
    }

    /// Whether a document passes the source filter and document-id scoping.
    pub fn admits(
        &self,
        id: &str,
        source: Option<SourceType>,
        constraints: &SearchConstraints,
    ) -> bool {
        let Some(doc) = self.get(id) else {
            return false;
        };
        if source.is_some_and(|s| s != doc.source_type) {
            return false;
        }
        constraints.document_ids.is_empty() || constraints.document_ids.iter().any(|d| d == id)
    }

    pub fn hit(&self, id: &str, score: f32) -> Option<RawHit> {
        self.get(id).map(|doc| RawHit {
            id: doc.id.clone(),
            title: doc.title.clone(),
            content: doc.content.clone(),
            source_type: Some(doc.source_type),
            score,
            citation: doc.citation.clone(),
            url: doc.url.clone(),
            published: doc.published,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::tax_corpus;
    use super::*;

    #[test]
    fn test_lookup_and_hit() {
        let corpus = tax_corpus();
        assert_eq!(corpus.len(), 4);

        let hit = corpus.hit("case-338", 0.5).unwrap();
        assert_eq!(hit.source_type, Some(SourceType::CaseLaw));
        assert_eq!(hit.citation, "Rev. Rul. 2008-25");
        assert!(corpus.hit("missing", 0.5).is_none());
    }

    #[test]
    fn test_admits_respects_source_and_scope() {
        let corpus = tax_corpus();
        let open = SearchConstraints::default();
        assert!(corpus.admits("reg-338", Some(SourceType::Regulation), &open));
        assert!(!corpus.admits("reg-338", Some(SourceType::CaseLaw), &open));
        assert!(corpus.admits("reg-338", None, &open));

        let scoped = SearchConstraints {
            document_ids: vec!["reg-1031".to_string()],
            ..SearchConstraints::default()
        };
        assert!(!corpus.admits("reg-338", None, &scoped));
        assert!(corpus.admits("reg-1031", None, &scoped));
    }

    #[test]
    fn test_load_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.json");
        fs::write(
            &path,
            r#"[{"id": "a", "source_type": "expert", "title": "Note", "citation": "Memo 1",
                "content": "Expert commentary", "published": "2023-04-01"}]"#,
        )
        .unwrap();

        let corpus = Corpus::load(&path).unwrap();
        let doc = corpus.get("a").unwrap();
        assert_eq!(doc.source_type, SourceType::Expert);
        assert_eq!(doc.published, NaiveDate::from_ymd_opt(2023, 4, 1));
    }

    #[test]
    fn test_load_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            Corpus::load(&path),
            Err(AppError::Configuration(_))
        ));
    }
}
