//! Maps `[n]` markers in a generated answer back to evidence provenance.

use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::types::{Citation, EvidenceItem};

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(\d{1,3}(?:\s*,\s*\d{1,3})*)\]").expect("citation marker pattern is valid")
});

pub fn citation_for(item: &EvidenceItem) -> Citation {
    Citation {
        source: item.title.clone(),
        reference: item.provenance.citation.clone(),
        source_type: item.source_type,
        evidence_id: item.id.clone(),
    }
}

/// Citations in order of first mention. Out-of-range numbers are ignored;
/// an answer citing nothing valid cites the window in rank order.
pub fn resolve(answer: &str, window: &[Arc<EvidenceItem>], max_citations: usize) -> Vec<Citation> {
    let mut cited: Vec<usize> = Vec::new();
    for caps in MARKER_RE.captures_iter(answer) {
        let Some(list) = caps.get(1) else {
            continue;
        };
        for number in list.as_str().split(',') {
            if let Ok(n) = number.trim().parse::<usize>() {
                if (1..=window.len()).contains(&n) && !cited.contains(&n) {
                    cited.push(n);
                }
            }
        }
    }

    if cited.is_empty() {
        return window
            .iter()
            .take(max_citations)
            .map(|item| citation_for(item))
            .collect();
    }
    cited
        .into_iter()
        .take(max_citations)
        .map(|n| citation_for(&window[n - 1]))
        .collect()
}
