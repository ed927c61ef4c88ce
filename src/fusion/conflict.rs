//! Conflict detection between ranked evidence items.
//!
//! Two items conflict when they come from different agents, cite the same
//! statutory provision or case, and state opposite outcomes. Outcome is read
//! lexically from a small keyword list; items stating both outcomes (or
//! neither) are treated as neutral and never flagged.

use std::collections::HashSet;

use crate::planner::extract_references;
use crate::retrieval::tokenize;
use crate::types::{Conflict, RankedEvidence};

/// Seam for swapping in a stronger contradiction check.
pub trait ConflictDetector: Send + Sync {
    fn detect(&self, evidence: &[RankedEvidence]) -> Vec<Conflict>;
}

const NEGATIVE_OUTCOMES: &[&str] = &[
    "disallowed",
    "not allowed",
    "not permitted",
    "prohibited",
    "ineligible",
    "not eligible",
    "does not qualify",
    "did not qualify",
    "fails to qualify",
    "nondeductible",
    "not deductible",
    "non taxable",
    "nontaxable",
    "not taxable",
    "tax free",
    "reversed",
    "denied",
    "rejected",
];

const POSITIVE_OUTCOMES: &[&str] = &[
    "allowed",
    "permitted",
    "qualifies",
    "qualified",
    "eligible",
    "deductible",
    "taxable",
    "upheld",
    "affirmed",
    "sustained",
    "granted",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Positive,
    Negative,
}

/// Stated outcome of a text, if it states exactly one.
pub fn polarity(text: &str) -> Option<Polarity> {
    let mut normalized = format!(" {} ", tokenize(text).join(" "));

    let mut negative = false;
    for phrase in NEGATIVE_OUTCOMES {
        let needle = format!(" {} ", phrase);
        if normalized.contains(&needle) {
            negative = true;
            normalized = normalized.replace(&needle, " ");
        }
    }
    let positive = POSITIVE_OUTCOMES
        .iter()
        .any(|word| normalized.contains(&format!(" {} ", word)));

    match (positive, negative) {
        (true, false) => Some(Polarity::Positive),
        (false, true) => Some(Polarity::Negative),
        _ => None,
    }
}

/// Keyword-polarity detector over the top `window` ranked items.
#[derive(Debug, Clone)]
pub struct LexicalConflictDetector {
    window: usize,
}

impl LexicalConflictDetector {
    pub fn new(window: usize) -> Self {
        Self { window }
    }
}

struct Profile<'a> {
    entry: &'a RankedEvidence,
    topics: Vec<(String, String)>,
    polarity: Option<Polarity>,
}

impl ConflictDetector for LexicalConflictDetector {
    fn detect(&self, evidence: &[RankedEvidence]) -> Vec<Conflict> {
        let profiles: Vec<Profile<'_>> = evidence
            .iter()
            .take(self.window)
            .map(|entry| {
                let text = format!("{} {}", entry.item.title, entry.item.content);
                Profile {
                    entry,
                    topics: extract_references(&text)
                        .into_iter()
                        .map(|r| (r.key(), r.label()))
                        .collect(),
                    polarity: polarity(&entry.item.content),
                }
            })
            .collect();

        let mut conflicts = Vec::new();
        for (i, first) in profiles.iter().enumerate() {
            let Some(first_polarity) = first.polarity else {
                continue;
            };
            for second in &profiles[i + 1..] {
                if second.polarity.is_none() || second.polarity == Some(first_polarity) {
                    continue;
                }
                if first.entry.contributors.first() == second.entry.contributors.first() {
                    continue;
                }
                let keys: HashSet<&str> = second.topics.iter().map(|(k, _)| k.as_str()).collect();
                if let Some((_, label)) = first.topics.iter().find(|(k, _)| keys.contains(k.as_str())) {
                    conflicts.push(Conflict {
                        first: first.entry.item.id.clone(),
                        second: second.entry.item.id.clone(),
                        topic: label.clone(),
                    });
                }
            }
        }
        conflicts
    }
}
