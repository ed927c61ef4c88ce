//! Generation capability abstraction
//!
//! The research pipeline consumes text generation in two places: per-agent
//! query refinement and answer synthesis. Both go through [`LLMClient`].

use crate::types::{AppError, Result};
use crate::utils::toml_config::LlmConfig;
use async_trait::async_trait;

/// Incremental generation output, in generation order.
pub type TokenStream = Box<dyn futures::Stream<Item = Result<String>> + Send + Unpin>;

/// Generic LLM client trait for provider abstraction
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Generate a completion from a prompt
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Generate with system prompt
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String>;

    /// Stream a completion with a system prompt
    async fn stream_with_system(&self, system: &str, prompt: &str) -> Result<TokenStream>;

    /// Cheap liveness probe, checked before synthesis starts.
    async fn is_available(&self) -> bool;

    /// Get the model name/identifier
    fn model_name(&self) -> &str;
}

/// Provider enum for runtime selection
#[derive(Debug, Clone, PartialEq)]
pub enum Provider {
    /// Ollama local LLM provider
    ///
    /// # Example
    /// ```rust,ignore
    /// let provider = Provider::Ollama {
    ///     base_url: "http://localhost:11434".to_string(),
    ///     model: "llama3.2".to_string(),
    ///     temperature: 0.3,
    ///     max_tokens: 2000,
    /// };
    /// ```
    Ollama {
        base_url: String,
        model: String,
        temperature: f32,
        max_tokens: u32,
    },
}

impl Provider {
    /// Resolve the configured provider. `Ok(None)` means generation is disabled.
    pub fn from_config(config: &LlmConfig) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }

        match config.provider.to_lowercase().as_str() {
            "ollama" => Ok(Some(Provider::Ollama {
                base_url: config.base_url.clone(),
                model: config.model.clone(),
                temperature: config.temperature,
                max_tokens: config.max_tokens,
            })),
            "none" => Ok(None),
            other => Err(AppError::Configuration(format!(
                "Unknown LLM provider '{}'",
                other
            ))),
        }
    }

    /// Create a client instance for this provider
    ///
    /// # Errors
    ///
    /// Returns an error if the provider's Cargo feature is not enabled or its
    /// base URL is unusable.
    pub async fn create_client(&self) -> Result<Box<dyn LLMClient>> {
        match self {
            #[cfg(feature = "ollama")]
            Provider::Ollama {
                base_url,
                model,
                temperature,
                max_tokens,
            } => Ok(Box::new(
                super::ollama::OllamaClient::new(base_url.clone(), model.clone())?
                    .with_options(*temperature, *max_tokens),
            )),

            #[cfg(not(feature = "ollama"))]
            Provider::Ollama { .. } => Err(AppError::Configuration(
                "Ollama provider requires the 'ollama' feature".to_string(),
            )),
        }
    }

    /// Get a human-readable name for this provider
    pub fn name(&self) -> &'static str {
        match self {
            Provider::Ollama { .. } => "Ollama",
        }
    }
}

/// Configuration-based client factory
pub struct LLMClientFactory {
    default_provider: Option<Provider>,
}

impl LLMClientFactory {
    pub fn new(default_provider: Option<Provider>) -> Self {
        Self { default_provider }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        Ok(Self::new(Provider::from_config(config)?))
    }

    /// Create a client using the default provider; `None` when generation is disabled.
    pub async fn create_default(&self) -> Result<Option<Box<dyn LLMClient>>> {
        match &self.default_provider {
            Some(provider) => provider.create_client().await.map(Some),
            None => Ok(None),
        }
    }

    pub fn default_provider(&self) -> Option<&Provider> {
        self.default_provider.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_config() {
        let config = LlmConfig::default();
        let provider = Provider::from_config(&config).unwrap().unwrap();
        assert_eq!(provider.name(), "Ollama");
        match provider {
            Provider::Ollama {
                base_url,
                temperature,
                ..
            } => {
                assert_eq!(base_url, "http://localhost:11434");
                assert_eq!(temperature, 0.3);
            }
        }
    }

    #[test]
    fn test_disabled_provider() {
        let config = LlmConfig {
            enabled: false,
            ..LlmConfig::default()
        };
        assert!(Provider::from_config(&config).unwrap().is_none());
    }

    #[test]
    fn test_unknown_provider() {
        let config = LlmConfig {
            provider: "mystery".to_string(),
            ..LlmConfig::default()
        };
        assert!(matches!(
            Provider::from_config(&config),
            Err(AppError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_factory_without_provider() {
        let factory = LLMClientFactory::new(None);
        assert!(factory.default_provider().is_none());
        assert!(factory.create_default().await.unwrap().is_none());
    }
}
