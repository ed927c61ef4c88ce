//! LLM Provider Clients and Abstractions
//!
//! The pipeline talks to a generation capability through [`LLMClient`] and
//! never depends on a concrete provider. Providers are enabled via Cargo
//! features:
//! - `ollama` - Local Ollama server (default)
//!
//! When no provider is configured the pipeline still answers every query,
//! using the extractive fallback strategy.

/// Core LLM client trait and provider selection.
pub mod client;

#[cfg(feature = "ollama")]
pub mod ollama;

pub use client::{LLMClient, LLMClientFactory, Provider, TokenStream};
