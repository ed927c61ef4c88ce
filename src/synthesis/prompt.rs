//! Prompt templates for each synthesis strategy.
//!
//! Evidence is rendered as a numbered list (`[1]`, `[2]`, ...) in rank
//! order; answers cite sources by those numbers and
//! [`super::citations::resolve`] maps them back.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::{AppError, EvidenceItem, FusedContext, Result, SynthesisStrategy};

/// A system and user message pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// The four stages of complex synthesis: name and instruction.
pub const COMPLEX_STAGES: [(&str, &str); 4] = [
    (
        "regulatory_analysis",
        "Analyze the regulatory requirements and compliance obligations",
    ),
    (
        "precedent_analysis",
        "Analyze the relevant precedents and case law",
    ),
    (
        "risk_assessment",
        "Assess the risks and recommend mitigation strategies",
    ),
    (
        "implementation_guidance",
        "Provide step-by-step implementation guidance",
    ),
];

/// Top `limit` ranked items placed in the prompt.
pub fn context_window(context: &FusedContext, limit: usize) -> Vec<Arc<EvidenceItem>> {
    context
        .evidence
        .iter()
        .take(limit)
        .map(|e| Arc::clone(&e.item))
        .collect()
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}

/// Numbered rendering of the prompt window.
pub fn render_sources(window: &[Arc<EvidenceItem>], content_chars: usize) -> String {
    if window.is_empty() {
        return "No documents available.".to_string();
    }
    window
        .iter()
        .enumerate()
        .map(|(i, item)| {
            format!(
                "[{}] {} ({})\nCitation: {}\nRelevance: {:.2}\n{}",
                i + 1,
                item.title,
                item.source_type,
                item.provenance.citation,
                item.score,
                truncate(&item.content, content_chars)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Conflicts between items in the window, by their numbers.
fn render_conflicts(context: &FusedContext, window: &[Arc<EvidenceItem>]) -> Option<String> {
    let numbers: HashMap<&str, usize> = window
        .iter()
        .enumerate()
        .map(|(i, item)| (item.id.as_str(), i + 1))
        .collect();

    let lines: Vec<String> = context
        .conflicts
        .iter()
        .filter_map(|c| {
            let first = numbers.get(c.first.as_str())?;
            let second = numbers.get(c.second.as_str())?;
            Some(format!(
                "- [{}] and [{}] reach different conclusions on {}",
                first, second, c.topic
            ))
        })
        .collect();

    (!lines.is_empty()).then(|| lines.join("\n"))
}

const CITATION_RULE: &str =
    "Cite sources inline by their bracketed number, e.g. [1] or [2, 3]. Only cite the sources provided.";

/// Prompt for the simple, moderate and expert strategies.
pub fn strategy_prompt(
    strategy: SynthesisStrategy,
    query: &str,
    context: &FusedContext,
    window: &[Arc<EvidenceItem>],
    content_chars: usize,
) -> Result<Prompt> {
    let sources = render_sources(window, content_chars);
    match strategy {
        SynthesisStrategy::Simple => Ok(Prompt {
            system: format!(
                "You are a professional tax research assistant. Answer clearly and accurately from the \
                 provided documents. Be concise and direct, use bullet points for key findings and state \
                 limitations when the documents are unclear. {}",
                CITATION_RULE
            ),
            user: format!(
                "Query: {}\n\nAvailable documents:\n{}\n\nProvide a brief summary answering the query, \
                 3-5 key findings and 2-3 practical recommendations.",
                query, sources
            ),
        }),
        SynthesisStrategy::Moderate => {
            let conflicts = render_conflicts(context, window)
                .map(|c| format!("\n\nConflicting sources:\n{}", c))
                .unwrap_or_default();
            Ok(Prompt {
                system: format!(
                    "You are an expert tax research analyst. Synthesize regulations, case law, precedents \
                     and expert commentary into a balanced professional analysis. Call out any conflict \
                     between sources explicitly. {}",
                    CITATION_RULE
                ),
                user: format!(
                    "Query: {}\n\nDocument sources:\n{}{}\n\nAggregate retrieval confidence: {:.2}\n\n\
                     Provide:\n1. An executive summary (2-3 paragraphs)\n2. Findings per source type\n\
                     3. Analysis of conflicting information\n4. Recommendations with risk considerations",
                    query, sources, conflicts, context.aggregate_confidence
                ),
            })
        }
        SynthesisStrategy::Expert => Ok(Prompt {
            system: format!(
                "You are a leading tax expert preparing analysis for executive decision making. Reply with \
                 a single JSON object and nothing else. {}",
                CITATION_RULE
            ),
            user: format!(
                "Query: {}\n\nAvailable research:\n{}\n\nReturn JSON with these fields:\n{}",
                query,
                sources,
                EXPERT_SCHEMA
            ),
        }),
        SynthesisStrategy::Complex | SynthesisStrategy::Fallback => Err(AppError::Internal(format!(
            "No single-prompt template for the {} strategy",
            strategy
        ))),
    }
}

/// Prompt for one complex-synthesis stage.
pub fn stage_prompt(stage: &str, instruction: &str, query: &str, sources: &str) -> Prompt {
    Prompt {
        system: "You are a senior tax research expert. Provide multi-layered analysis covering regulatory, \
                 legal and practical aspects, and consider alternative interpretations."
            .to_string(),
        user: format!(
            "{}.\n\nQuery: {}\n\nSources:\n{}\n\nFocus specifically on {} aspects. {}",
            instruction,
            query,
            sources,
            stage.replace('_', " "),
            CITATION_RULE
        ),
    }
}

/// Prompt merging the complex-synthesis stages into one answer.
pub fn merge_prompt(query: &str, stages: &[(String, String)]) -> Prompt {
    let components = stages
        .iter()
        .map(|(stage, text)| format!("## {}\n{}", stage.replace('_', " "), text))
        .collect::<Vec<_>>()
        .join("\n\n");
    Prompt {
        system: "Synthesize complex tax analysis into one executive-ready response. Keep the bracketed \
                 source numbers the analysis uses."
            .to_string(),
        user: format!(
            "Query: {}\n\nAnalysis components:\n{}\n\nWrite one cohesive response with an executive \
             summary, detailed analysis, strategic recommendations, risk assessment and implementation \
             guidance.",
            query, components
        ),
    }
}

const EXPERT_SCHEMA: &str = r#"{
  "executive_summary": "string",
  "regulatory_framework": "string",
  "precedent_analysis": "string",
  "strategic_options": ["string"],
  "risk_matrix": {"risk": "likelihood and impact"},
  "implementation_roadmap": ["string"],
  "expert_opinion": "string",
  "confidence_level": 0.0
}"#;

/// Structured answer requested by the expert strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpertAnalysis {
    pub executive_summary: String,
    #[serde(default)]
    pub regulatory_framework: String,
    #[serde(default)]
    pub precedent_analysis: String,
    pub strategic_options: Vec<String>,
    #[serde(default)]
    pub risk_matrix: serde_json::Value,
    #[serde(default)]
    pub implementation_roadmap: Vec<String>,
    pub expert_opinion: String,
    #[serde(default)]
    pub confidence_level: Option<f32>,
}

/// Parses an expert answer, tolerating surrounding prose or code fences.
pub fn parse_expert(answer: &str) -> Result<ExpertAnalysis> {
    let start = answer.find('{');
    let end = answer.rfind('}');
    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &answer[start..=end],
        _ => {
            return Err(AppError::LLM(
                "Expert answer does not contain a JSON object".to_string(),
            ))
        }
    };
    serde_json::from_str(json)
        .map_err(|e| AppError::LLM(format!("Expert answer does not match the schema: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::tests::{item, ranked};
    use crate::types::{AgentKind, Conflict, SourceType};

    #[test]
    fn test_render_sources_numbers_and_truncates() {
        let window = vec![
            item("a", SourceType::Regulation, AgentKind::Regulation, 0.9, "abcdefghij"),
            item("b", SourceType::CaseLaw, AgentKind::CaseLaw, 0.5, "short"),
        ];
        let rendered = render_sources(&window, 4);
        assert!(rendered.starts_with("[1] a (regulation)"));
        assert!(rendered.contains("abcd..."));
        assert!(rendered.contains("[2] b (case_law)"));
        assert!(rendered.contains("short"));
    }

    #[test]
    fn test_moderate_prompt_calls_out_conflicts() {
        let context = FusedContext {
            evidence: vec![
                ranked("reg", SourceType::Regulation, AgentKind::Regulation, "deductible"),
                ranked("case", SourceType::CaseLaw, AgentKind::CaseLaw, "not deductible"),
            ],
            conflicts: vec![Conflict {
                first: "reg".to_string(),
                second: "case".to_string(),
                topic: "Section 162".to_string(),
            }],
            evidence_count: 2,
            ..FusedContext::default()
        };
        let window = context_window(&context, 15);
        let prompt =
            strategy_prompt(SynthesisStrategy::Moderate, "Is it deductible?", &context, &window, 800).unwrap();
        assert!(prompt
            .user
            .contains("[1] and [2] reach different conclusions on Section 162"));
    }

    #[test]
    fn test_complex_has_no_single_prompt() {
        let context = FusedContext::default();
        assert!(strategy_prompt(SynthesisStrategy::Complex, "q", &context, &[], 800).is_err());
    }

    #[test]
    fn test_parse_expert() {
        let answer = r#"```json
{"executive_summary": "Elect.", "strategic_options": ["Make the election"], "expert_opinion": "Proceed [1]", "confidence_level": 0.8}
```"#;
        let parsed = parse_expert(answer).unwrap();
        assert_eq!(parsed.strategic_options, vec!["Make the election"]);
        assert_eq!(parsed.confidence_level, Some(0.8));

        assert!(parse_expert("no json here").is_err());
        assert!(parse_expert(r#"{"executive_summary": "missing fields"}"#).is_err());
    }
}
