//! External web search via daedra (DuckDuckGo backend), optionally
//! restricted to one site such as irs.gov.

use std::collections::HashSet;

use async_trait::async_trait;

use super::{tokenize, BackendKind, RawHit, RetrievalBackend};
use crate::types::{AppError, Result, SearchConstraints, SourceType};

/// Site searched by the IRS guidance agent.
pub const IRS_SITE: &str = "irs.gov";

pub struct WebSearchBackend {
    max_results: usize,
    site: Option<String>,
}

impl WebSearchBackend {
    pub fn new(max_results: usize) -> Self {
        Self {
            max_results,
            site: None,
        }
    }

    /// Restrict results to `domain` and its subdomains.
    pub fn scoped_to(mut self, domain: impl Into<String>) -> Self {
        self.site = Some(domain.into());
        self
    }

    fn engine_query(&self, query: &str) -> String {
        match &self.site {
            Some(site) => format!("site:{} {}", site, query),
            None => query.to_string(),
        }
    }

    /// Engines treat `site:` as a hint, so results are checked again here.
    fn admits(&self, url: &str) -> bool {
        match &self.site {
            Some(site) => host_within(url, site),
            None => true,
        }
    }
}

/// Whether `url`'s host is `domain` or one of its subdomains.
pub(crate) fn host_within(url: &str, domain: &str) -> bool {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host = authority
        .rsplit_once('@')
        .map_or(authority, |(_, host)| host)
        .split(':')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    let domain = domain.to_ascii_lowercase();
    host == domain
        || host
            .strip_suffix(&domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

impl Default for WebSearchBackend {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Search engines return no score: blend rank position with term overlap
/// between the query and the snippet.
pub(crate) fn score_web_result(query: &str, text: &str, rank: usize, total: usize) -> f32 {
    let query_terms: HashSet<String> = tokenize(query).into_iter().collect();
    if query_terms.is_empty() || total == 0 {
        return 0.0;
    }
    let text_terms: HashSet<String> = tokenize(text).into_iter().collect();
    let overlap = query_terms.intersection(&text_terms).count() as f32 / query_terms.len() as f32;
    let position = 1.0 - rank as f32 / (2 * total) as f32;
    (position * (0.6 + 0.4 * overlap)).clamp(0.0, 1.0)
}

#[async_trait]
impl RetrievalBackend for WebSearchBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::External
    }

    async fn search(
        &self,
        query: &str,
        constraints: &SearchConstraints,
        limit: usize,
    ) -> Result<Vec<RawHit>> {
        // Web results cannot be scoped to uploaded documents
        if !constraints.document_ids.is_empty() {
            return Ok(Vec::new());
        }

        let search_args = daedra::SearchArgs {
            query: self.engine_query(query),
            options: Some(daedra::SearchOptions {
                num_results: limit.min(self.max_results),
                ..Default::default()
            }),
        };

        let response = daedra::tools::search::perform_search(&search_args)
            .await
            .map_err(|e| AppError::Retrieval(format!("Web search failed: {}", e)))?;

        let results: Vec<_> = response
            .data
            .iter()
            .filter(|result| self.admits(&result.url))
            .collect();
        let total = results.len();
        Ok(results
            .into_iter()
            .enumerate()
            .map(|(rank, result)| RawHit {
                id: format!("web:{}", result.url),
                title: result.title.clone(),
                content: result.description.clone(),
                source_type: Some(SourceType::External),
                score: score_web_result(
                    query,
                    &format!("{} {}", result.title, result.description),
                    rank,
                    total,
                ),
                citation: result.url.clone(),
                url: Some(result.url.clone()),
                published: None,
            })
            .collect())
    }
}
