//! Extractive answer used when generation is unavailable or evidence is
//! insufficient. Deterministic for a given fused context.

use crate::types::{FusedContext, StreamEvent, SynthesisStrategy};

use super::citations::citation_for;

const FALLBACK_CITATIONS: usize = 5;
const FINDINGS: usize = 5;
const EXCERPT_CHARS: usize = 240;

/// First sentence of `text`, bounded in length.
fn excerpt(text: &str) -> String {
    let sentence = match text.find(". ") {
        Some(end) => &text[..=end],
        None => text,
    };
    let trimmed = sentence.trim();
    if trimmed.chars().count() <= EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let mut cut: String = trimmed.chars().take(EXCERPT_CHARS).collect();
    cut.push_str("...");
    cut
}

/// Answer sections, each emitted as one delta.
pub fn sections(query: &str, context: &FusedContext) -> Vec<String> {
    let Some(top) = context.evidence.first() else {
        return vec![
            "No documents available for synthesis.".to_string(),
            "\n\nRecommendations:\n- Please try rephrasing your query\n- Contact a tax professional"
                .to_string(),
        ];
    };

    let mut sections = vec![format!(
        "Based on the available sources, particularly '{}', the following evidence relates to: {}",
        top.item.title, query
    )];

    let findings = context
        .evidence
        .iter()
        .take(FINDINGS)
        .enumerate()
        .map(|(i, e)| {
            format!(
                "- [{}] {} ({}): {}",
                i + 1,
                e.item.title,
                e.item.provenance.citation,
                excerpt(&e.item.content)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    sections.push(format!("\n\nKey findings:\n{}", findings));

    if !context.conflicts.is_empty() {
        let topics = context
            .conflicts
            .iter()
            .map(|c| c.topic.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        sections.push(format!("\n\nNote: the sources disagree on {}.", topics));
    }

    sections.push(
        "\n\nRecommendations:\n- Review the primary documents cited\n- Consult with a tax advisor before relying on this summary"
            .to_string(),
    );
    sections
}

/// The complete fallback event sequence: deltas, then exactly one final.
pub fn events(query: &str, context: &FusedContext) -> Vec<StreamEvent> {
    let sections = sections(query, context);
    let answer = sections.concat();
    let citations = context
        .evidence
        .iter()
        .take(FALLBACK_CITATIONS)
        .map(|e| citation_for(&e.item))
        .collect();

    let mut events: Vec<StreamEvent> = sections
        .into_iter()
        .map(|text| StreamEvent::Delta { text })
        .collect();
    events.push(StreamEvent::Final {
        answer,
        citations,
        strategy: SynthesisStrategy::Fallback,
        confidence: context.aggregate_confidence,
    });
    events
}
