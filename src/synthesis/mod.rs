//! Synthesis Selector & Streamer
//!
//! Picks a [`SynthesisStrategy`] for a fused context and turns it into a
//! stream of [`StreamEvent`]s. Whatever happens, the stream ends with exactly
//! one `final` or `error` event:
//!
//! - generation unavailable, or failing before any text was produced: the
//!   extractive fallback answer (`final`, strategy `fallback`);
//! - generation failing or passing the synthesis deadline after text was
//!   streamed: one `error` event;
//! - otherwise the generated deltas in order, then `final` with resolved
//!   citations.

pub mod citations;
pub mod fallback;
pub mod prompt;

use std::pin::Pin;
use std::sync::Arc;

use async_stream::stream;
use futures::future::join_all;
use futures::{Stream, StreamExt};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::llm::{LLMClient, TokenStream};
use crate::types::{
    AppError, EvidenceItem, FusedContext, QueryComplexity, Result, StreamEvent, SynthesisStrategy,
};
use crate::utils::toml_config::PipelineConfig;

pub use citations::resolve as resolve_citations;
pub use prompt::{parse_expert, ExpertAnalysis, Prompt};

/// Lazily produced, finite, non-restartable sequence of events.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Pure strategy choice.
///
/// Falls back when generation is unavailable, when nothing was retrieved, or
/// when acceptance was forced with fewer than `min_evidence` items; otherwise
/// the strategy follows the query complexity.
pub fn select_strategy(
    complexity: QueryComplexity,
    context: &FusedContext,
    forced: bool,
    min_evidence: usize,
    generation_available: bool,
) -> SynthesisStrategy {
    if !generation_available
        || context.evidence_count == 0
        || (forced && context.evidence_count < min_evidence)
    {
        return SynthesisStrategy::Fallback;
    }
    SynthesisStrategy::from(complexity)
}

/// Everything synthesis needs about one query.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub query: String,
    pub complexity: QueryComplexity,
    pub context: FusedContext,
    /// Whether the quality gate forced acceptance.
    pub forced: bool,
}

#[derive(Clone)]
pub struct Synthesizer {
    llm: Option<Arc<dyn LLMClient>>,
    config: PipelineConfig,
}

impl Synthesizer {
    pub fn new(llm: Option<Arc<dyn LLMClient>>, config: PipelineConfig) -> Self {
        Self { llm, config }
    }

    /// Streams the answer for `request`, bounded by `deadline`.
    pub fn stream(&self, request: SynthesisRequest, deadline: Instant) -> EventStream {
        let llm = self.llm.clone();
        let config = self.config.clone();

        Box::pin(stream! {
            let available = match &llm {
                Some(llm) => timeout_at(deadline, llm.is_available()).await.unwrap_or(false),
                None => false,
            };
            let strategy = select_strategy(
                request.complexity,
                &request.context,
                request.forced,
                config.min_evidence,
                available,
            );
            info!(%strategy, available, evidence = request.context.evidence_count, "Synthesis strategy selected");

            let window = prompt::context_window(
                &request.context,
                config.context_documents.for_complexity(request.complexity),
            );
            let started = match (&llm, strategy) {
                (Some(llm), s) if s != SynthesisStrategy::Fallback => {
                    start_generation(llm.as_ref(), s, &request, &window, &config, deadline).await
                }
                _ => Err(AppError::LLM("generation unavailable".to_string())),
            };

            let mut tokens = match started {
                Ok(tokens) => tokens,
                Err(e) => {
                    if strategy != SynthesisStrategy::Fallback {
                        warn!(%strategy, "Generation could not start, using fallback answer: {}", e);
                    }
                    for event in fallback::events(&request.query, &request.context) {
                        yield event;
                    }
                    return;
                }
            };

            let mut answer = String::new();
            let mut failure: Option<String> = None;
            loop {
                match timeout_at(deadline, tokens.next()).await {
                    Ok(Some(Ok(text))) => {
                        answer.push_str(&text);
                        yield StreamEvent::Delta { text };
                    }
                    Ok(Some(Err(e))) => {
                        failure = Some(format!("Generation failed: {}", e));
                        break;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        failure = Some("Synthesis deadline exceeded".to_string());
                        break;
                    }
                }
            }

            match failure {
                Some(message) if answer.is_empty() => {
                    warn!("{} before any output, using fallback answer", message);
                    for event in fallback::events(&request.query, &request.context) {
                        yield event;
                    }
                }
                Some(message) => {
                    warn!(streamed = answer.len(), "{}", message);
                    yield StreamEvent::Error { message };
                }
                None if answer.trim().is_empty() => {
                    warn!("Generation produced no text, using fallback answer");
                    for event in fallback::events(&request.query, &request.context) {
                        yield event;
                    }
                }
                None => {
                    if strategy == SynthesisStrategy::Expert {
                        if let Err(e) = parse_expert(&answer) {
                            warn!("{}", e);
                        }
                    }
                    let citations = citations::resolve(&answer, &window, config.max_citations);
                    debug!(citations = citations.len(), chars = answer.len(), "Synthesis complete");
                    yield StreamEvent::Final {
                        answer,
                        citations,
                        strategy,
                        confidence: request.context.aggregate_confidence,
                    };
                }
            }
        })
    }
}

/// Builds the strategy's prompt (running the analysis stages first for the
/// complex strategy) and opens the token stream.
async fn start_generation(
    llm: &dyn LLMClient,
    strategy: SynthesisStrategy,
    request: &SynthesisRequest,
    window: &[Arc<EvidenceItem>],
    config: &PipelineConfig,
    deadline: Instant,
) -> Result<TokenStream> {
    let prompt = match strategy {
        SynthesisStrategy::Complex => {
            let sources = prompt::render_sources(window, config.content_chars);
            let stages = run_stages(llm, &request.query, &sources, deadline).await?;
            prompt::merge_prompt(&request.query, &stages)
        }
        _ => prompt::strategy_prompt(
            strategy,
            &request.query,
            &request.context,
            window,
            config.content_chars,
        )?,
    };

    timeout_at(deadline, llm.stream_with_system(&prompt.system, &prompt.user))
        .await
        .map_err(|_| AppError::Timeout("synthesis deadline exceeded".to_string()))?
}

/// Runs the complex-synthesis stages concurrently. A failed stage is
/// recorded as unavailable; all stages failing is an error.
async fn run_stages(
    llm: &dyn LLMClient,
    query: &str,
    sources: &str,
    deadline: Instant,
) -> Result<Vec<(String, String)>> {
    let stages = prompt::COMPLEX_STAGES.iter().map(|(stage, instruction)| async move {
        let p = prompt::stage_prompt(stage, instruction, query, sources);
        let outcome = timeout_at(deadline, llm.generate_with_system(&p.system, &p.user))
            .await
            .unwrap_or_else(|_| Err(AppError::Timeout(format!("{} stage", stage))));
        (stage.to_string(), outcome)
    });

    let mut failures = 0;
    let results: Vec<(String, String)> = join_all(stages)
        .await
        .into_iter()
        .map(|(stage, outcome)| match outcome {
            Ok(text) => (stage, text),
            Err(e) => {
                warn!(%stage, "Analysis stage failed: {}", e);
                failures += 1;
                (stage, format!("Analysis unavailable: {}", e))
            }
        })
        .collect();

    if failures == results.len() {
        return Err(AppError::LLM("every analysis stage failed".to_string()));
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::tests::ranked;
    use crate::types::{AgentKind, SourceType};

    fn context(count: usize) -> FusedContext {
        FusedContext {
            evidence: (0..count)
                .map(|i| {
                    ranked(
                        &format!("reg-{}", i),
                        SourceType::Regulation,
                        AgentKind::Regulation,
                        "text",
                    )
                })
                .collect(),
            evidence_count: count,
            aggregate_confidence: 0.82,
            ..FusedContext::default()
        }
    }

    #[test]
    fn test_strategy_follows_complexity() {
        assert_eq!(
            select_strategy(QueryComplexity::Expert, &context(25), false, 3, true),
            SynthesisStrategy::Expert
        );
        assert_eq!(
            select_strategy(QueryComplexity::Simple, &context(3), false, 3, true),
            SynthesisStrategy::Simple
        );
    }

    #[test]
    fn test_forced_with_enough_evidence_keeps_complexity() {
        assert_eq!(
            select_strategy(QueryComplexity::Moderate, &context(4), true, 3, true),
            SynthesisStrategy::Moderate
        );
    }

    #[test]
    fn test_fallback_conditions() {
        assert_eq!(
            select_strategy(QueryComplexity::Expert, &context(25), false, 3, false),
            SynthesisStrategy::Fallback
        );
        assert_eq!(
            select_strategy(QueryComplexity::Complex, &context(2), true, 3, true),
            SynthesisStrategy::Fallback
        );
        assert_eq!(
            select_strategy(QueryComplexity::Simple, &context(0), false, 3, true),
            SynthesisStrategy::Fallback
        );
    }

    #[tokio::test]
    async fn test_without_generation_streams_fallback() {
        let synthesizer = Synthesizer::new(None, PipelineConfig::default());
        let events: Vec<StreamEvent> = synthesizer
            .stream(
                SynthesisRequest {
                    query: "Section 1031".to_string(),
                    complexity: QueryComplexity::Simple,
                    context: context(2),
                    forced: false,
                },
                Instant::now() + std::time::Duration::from_secs(5),
            )
            .collect()
            .await;

        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Final {
                strategy: SynthesisStrategy::Fallback,
                ..
            })
        ));
    }
}
