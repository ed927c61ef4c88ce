use crate::llm::client::{LLMClient, TokenStream};
use crate::types::{AppError, Result};
use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use ollama_rs::{
    generation::chat::{request::ChatMessageRequest, ChatMessage},
    models::ModelOptions,
    Ollama,
};

const DEFAULT_PORT: u16 = 11434;

pub struct OllamaClient {
    client: Ollama,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

/// Splits `scheme://host:port` into an Ollama host URL and port.
fn parse_base_url(base_url: &str) -> (String, u16) {
    let (scheme, rest) = base_url
        .split_once("://")
        .unwrap_or(("http", base_url));
    let rest = rest.split('/').next().unwrap_or_default();
    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().unwrap_or(DEFAULT_PORT)),
        None => (rest, DEFAULT_PORT),
    };
    let host = if host.is_empty() { "localhost" } else { host };
    (format!("{}://{}", scheme, host), port)
}

/// Whether `host` is an `http(s)://` URL with a plain DNS name, IPv4 or
/// bracketed IPv6 host.
fn is_valid_host(host: &str) -> bool {
    let Some((scheme, name)) = host.split_once("://") else {
        return false;
    };
    if !matches!(scheme, "http" | "https") || name.is_empty() {
        return false;
    }
    match name.strip_prefix('[').and_then(|n| n.strip_suffix(']')) {
        Some(v6) => !v6.is_empty() && v6.chars().all(|c| c.is_ascii_hexdigit() || c == ':'),
        None => name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-'),
    }
}

impl OllamaClient {
    /// # Errors
    ///
    /// Returns a configuration error when `base_url` is not an http(s) URL.
    pub fn new(base_url: String, model: String) -> Result<Self> {
        let (host, port) = parse_base_url(&base_url);
        if !is_valid_host(&host) {
            return Err(AppError::Configuration(format!(
                "Invalid Ollama base URL '{}'",
                base_url
            )));
        }

        Ok(Self {
            client: Ollama::builder().host(host.as_str()).port(port).build(),
            model,
            temperature: 0.3,
            max_tokens: 2000,
        })
    }

    pub fn with_options(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    fn request(&self, messages: Vec<ChatMessage>) -> ChatMessageRequest {
        ChatMessageRequest::new(self.model.clone(), messages).options(
            ModelOptions::default()
                .temperature(self.temperature)
                .num_predict(self.max_tokens as i32),
        )
    }

    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<String> {
        let response = self
            .client
            .send_chat_messages(self.request(messages))
            .await
            .map_err(|e| AppError::LLM(format!("Ollama error: {}", e)))?;

        Ok(response.message.content)
    }
}

#[async_trait]
impl LLMClient for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.chat(vec![ChatMessage::user(prompt.to_string())]).await
    }

    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        self.chat(vec![
            ChatMessage::system(system.to_string()),
            ChatMessage::user(prompt.to_string()),
        ])
        .await
    }

    async fn stream_with_system(&self, system: &str, prompt: &str) -> Result<TokenStream> {
        let request = self.request(vec![
            ChatMessage::system(system.to_string()),
            ChatMessage::user(prompt.to_string()),
        ]);

        let mut stream_response = self
            .client
            .send_chat_messages_stream(request)
            .await
            .map_err(|e| AppError::LLM(format!("Ollama stream error: {}", e)))?;

        let output_stream = stream! {
            while let Some(chunk_result) = stream_response.next().await {
                match chunk_result {
                    Ok(chunk) => {
                        let content = chunk.message.content;
                        if !content.is_empty() {
                            yield Ok(content);
                        }
                    }
                    Err(_) => {
                        yield Err(AppError::LLM("Stream chunk error".to_string()));
                        break;
                    }
                }
            }
        };

        Ok(Box::new(Box::pin(output_stream)))
    }

    async fn is_available(&self) -> bool {
        match self.client.list_local_models().await {
            Ok(models) => models
                .iter()
                .any(|m| m.name == self.model || m.name.starts_with(&format!("{}:", self.model))),
            Err(e) => {
                tracing::warn!("Ollama unavailable: {}", e);
                false
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
