// Translation service clients
//
// The engine only sees the `TranslationClient` trait. Concrete clients are
// chosen by provider through a factory:
// - OpenAi: OpenAI-compatible chat completions (OpenAI, Groq, vLLM, ...)
// - Ollama: local Ollama `/api/generate`

pub mod common;
pub mod keys;
pub mod ollama;
pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;

pub use common::*;
pub use keys::{ApiKeyRing, Secret};
use crate::config::{ClientConfig, Provider};
use crate::error::{RelayError, Result, TranslateError};

/// One translation call: source text plus optional disambiguating context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationRequest {
    pub source_text: String,
    pub context: Option<String>,
    pub target_language: String,
}

/// Main trait for the remote translation service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranslationClient: Send + Sync {
    /// Translate one unit, returning the translated text or a classified failure
    async fn translate(&self, request: &TranslationRequest) -> std::result::Result<String, TranslateError>;
}

/// Factory for creating client instances
pub struct ClientFactory;

impl ClientFactory {
    /// Create a client based on the configured provider
    pub fn create(config: &ClientConfig, keys: ApiKeyRing) -> Result<Arc<dyn TranslationClient>> {
        match config.provider {
            Provider::OpenAi => {
                if keys.is_empty() {
                    return Err(RelayError::Config(format!(
                        "No API key found; set {} (comma separated for rotation)",
                        config.api_key_env
                    )));
                }
                Ok(Arc::new(openai::OpenAiClient::new(config.clone(), keys)?))
            }
            Provider::Ollama => Ok(Arc::new(ollama::OllamaClient::new(config.clone())?)),
        }
    }
}
