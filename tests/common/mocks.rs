//! Mock implementations for testing.
//!
//! Generation clients and retrieval agents with scripted behaviour, shared by
//! the integration suites so none of them needs Ollama or a knowledge base.

use async_stream::stream;
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use taxrag::agents::RetrievalAgent;
use taxrag::llm::{LLMClient, TokenStream};
use taxrag::retrieval::BackendKind;
use taxrag::types::{
    AgentKind, AgentResult, AgentStatus, AgentTask, AppError, EvidenceItem, Provenance, Result,
};

/// How a [`MockLLMClient`] misbehaves, if at all.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Behavior {
    /// Answers immediately in 5-character chunks.
    Normal,
    /// Every call fails.
    Failing,
    /// The availability probe reports the backend as down.
    Unavailable,
    /// Waits this long before each chunk.
    Slow(Duration),
    /// Streams this many chunks, then fails.
    FailsAfter(usize),
}

/// Mock LLM client for testing with configurable responses.
///
/// ```ignore
/// let client = MockLLMClient::new("Boot is taxable [1].");
/// let client = MockLLMClient::failing();
/// let client = MockLLMClient::new("partial answer").with_behavior(Behavior::FailsAfter(2));
/// ```
#[derive(Clone)]
pub struct MockLLMClient {
    response: String,
    behavior: Behavior,
    generate_calls: Arc<AtomicUsize>,
    stream_calls: Arc<AtomicUsize>,
}

impl MockLLMClient {
    /// Create a new mock client that returns the given response.
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            behavior: Behavior::Normal,
            generate_calls: Arc::new(AtomicUsize::new(0)),
            stream_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a mock client that always returns an error.
    pub fn failing() -> Self {
        Self::new("").with_behavior(Behavior::Failing)
    }

    pub fn unavailable() -> Self {
        Self::new("unused").with_behavior(Behavior::Unavailable)
    }

    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Number of non-streaming generations so far.
    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    /// Number of streams opened so far.
    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    fn chunks(&self) -> Vec<String> {
        self.response
            .chars()
            .collect::<Vec<_>>()
            .chunks(5)
            .map(|c| c.iter().collect())
            .collect()
    }
}

#[async_trait]
impl LLMClient for MockLLMClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.generate_with_system("", prompt).await
    }

    async fn generate_with_system(&self, _system: &str, _prompt: &str) -> Result<String> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        if self.behavior == Behavior::Failing {
            return Err(AppError::LLM("Mock LLM failure".to_string()));
        }
        Ok(self.response.clone())
    }

    async fn stream_with_system(&self, _system: &str, _prompt: &str) -> Result<TokenStream> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        let chunks = self.chunks();

        match self.behavior {
            Behavior::Failing => Err(AppError::LLM("Mock LLM failure".to_string())),
            Behavior::Normal | Behavior::Unavailable => {
                Ok(Box::new(
                    stream::iter(chunks.into_iter().map(Ok::<String, AppError>)).boxed(),
                ))
            }
            Behavior::Slow(delay) => Ok(Box::new(
                stream! {
                    for chunk in chunks {
                        tokio::time::sleep(delay).await;
                        yield Ok::<String, AppError>(chunk);
                    }
                }
                .boxed(),
            )),
            Behavior::FailsAfter(n) => Ok(Box::new(
                stream::iter(
                    chunks
                        .into_iter()
                        .take(n)
                        .map(Ok)
                        .chain(std::iter::once(Err(AppError::LLM(
                            "connection reset".to_string(),
                        )))),
                )
                .boxed(),
            )),
        }
    }

    async fn is_available(&self) -> bool {
        !matches!(self.behavior, Behavior::Unavailable | Behavior::Failing)
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}

/// One scripted response of a [`ScriptedAgent`].
#[derive(Clone, Debug)]
pub enum Script {
    /// `items` evidence items and the given confidence.
    Ok { items: usize, confidence: f32 },
    Empty,
    Error(&'static str),
    /// Sleeps, then answers as `Ok` with one item.
    Sleep(Duration),
}

/// Retrieval agent that replays a script, one entry per call. The last entry
/// repeats once the script is exhausted.
pub struct ScriptedAgent {
    kind: AgentKind,
    script: Mutex<VecDeque<Script>>,
    last: Mutex<Script>,
    tasks: Mutex<Vec<AgentTask>>,
}

impl ScriptedAgent {
    pub fn new(kind: AgentKind, script: Vec<Script>) -> Arc<Self> {
        let last = script.last().cloned().unwrap_or(Script::Empty);
        Arc::new(Self {
            kind,
            script: Mutex::new(script.into()),
            last: Mutex::new(last),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Always answers the same way.
    pub fn always(kind: AgentKind, script: Script) -> Arc<Self> {
        Self::new(kind, vec![script])
    }

    pub fn calls(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Every task received, in order.
    pub fn tasks(&self) -> Vec<AgentTask> {
        self.tasks.lock().clone()
    }

    fn next_script(&self) -> Script {
        match self.script.lock().pop_front() {
            Some(script) => {
                *self.last.lock() = script.clone();
                script
            }
            None => self.last.lock().clone(),
        }
    }
}

/// Evidence item with distinct wording per (agent, index).
pub fn evidence(kind: AgentKind, index: usize, score: f32) -> Arc<EvidenceItem> {
    const TOPICS: [&str; 8] = [
        "basis step up",
        "holding period",
        "installment reporting",
        "depreciation recapture",
        "goodwill amortization",
        "state conformity",
        "consolidated return",
        "carryover attributes",
    ];
    let topic = TOPICS[index % TOPICS.len()];
    Arc::new(EvidenceItem {
        id: format!("{}-{}", kind, index),
        source_type: kind.source_type(),
        title: format!("{} authority {}", kind, index),
        content: format!(
            "{} source item{:03} discusses {} for acquisition transactions.",
            kind, index, topic
        ),
        score,
        provenance: Provenance {
            agent: kind,
            retrieved_at: Utc::now(),
            citation: format!("{} cite {}", kind, index),
            url: None,
            published: None,
        },
    })
}

fn result(kind: AgentKind, items: Vec<Arc<EvidenceItem>>, confidence: f32) -> AgentResult {
    AgentResult {
        agent: kind,
        status: if items.is_empty() {
            AgentStatus::Empty
        } else {
            AgentStatus::Ok
        },
        items,
        confidence,
        elapsed: Duration::from_millis(5),
        diagnostic: None,
    }
}

#[async_trait]
impl RetrievalAgent for ScriptedAgent {
    fn kind(&self) -> AgentKind {
        self.kind
    }

    fn capabilities(&self) -> Vec<BackendKind> {
        vec![BackendKind::Vector, BackendKind::Lexical]
    }

    async fn retrieve(&self, task: &AgentTask) -> AgentResult {
        self.tasks.lock().push(task.clone());
        match self.next_script() {
            Script::Ok { items, confidence } => result(
                self.kind,
                (0..items).map(|i| evidence(self.kind, i, 0.9)).collect(),
                confidence,
            ),
            Script::Empty => result(self.kind, Vec::new(), 0.0),
            Script::Error(message) => AgentResult::failed(self.kind, message, Duration::ZERO),
            Script::Sleep(duration) => {
                tokio::time::sleep(duration).await;
                result(self.kind, vec![evidence(self.kind, 0, 0.9)], 0.9)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_client_streams_in_chunks() {
        let client = MockLLMClient::new("abcdefghijk");
        let chunks: Vec<String> = client
            .stream_with_system("", "")
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec!["abcde", "fghij", "k"]);
        assert_eq!(client.stream_calls(), 1);
    }

    #[tokio::test]
    async fn test_scripted_agent_repeats_last_entry() {
        let agent = ScriptedAgent::new(
            AgentKind::Expert,
            vec![Script::Empty, Script::Ok { items: 2, confidence: 0.8 }],
        );
        let task = AgentTask {
            agent: AgentKind::Expert,
            query: "q".to_string(),
            deadline: tokio::time::Instant::now() + Duration::from_secs(1),
            constraints: Default::default(),
        };
        assert_eq!(agent.retrieve(&task).await.status, AgentStatus::Empty);
        assert_eq!(agent.retrieve(&task).await.items.len(), 2);
        assert_eq!(agent.retrieve(&task).await.items.len(), 2);
        assert_eq!(agent.calls(), 3);
    }
}
