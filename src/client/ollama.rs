use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{RelayError, Result, TranslateError};
use super::common::{classify_status, classify_transport, clean_translation_response, completion_prompt};
use super::{TranslationClient, TranslationRequest};

#[derive(Debug, Clone, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    format: &'static str,
    options: GenerateOptions,
}

#[derive(Debug, Clone, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Clone, Deserialize)]
struct JsonTranslation {
    text: String,
}

/// Client for a local Ollama server using JSON-formatted output.
pub struct OllamaClient {
    client: Client,
    config: ClientConfig,
}

impl OllamaClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| RelayError::Config(format!("HTTP client creation failed: {}", e)))?;

        Ok(Self { client, config })
    }
}

/// Pull the translation out of a raw Ollama reply.
fn extract_translation(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let text = match serde_json::from_str::<JsonTranslation>(raw) {
        Ok(parsed) => parsed.text.trim().to_string(),
        Err(_) => clean_translation_response(raw),
    };
    if text.is_empty() { None } else { Some(text) }
}

#[async_trait]
impl TranslationClient for OllamaClient {
    async fn translate(&self, request: &TranslationRequest) -> std::result::Result<String, TranslateError> {
        let body = GenerateRequest {
            model: &self.config.model,
            prompt: completion_prompt(request),
            stream: false,
            format: "json",
            options: GenerateOptions {
                temperature: self.config.temperature,
            },
        };

        let url = format!("{}/api/generate", self.config.endpoint.trim_end_matches('/'));
        debug!("Sending translation request to: {}", url);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        if !response.status().is_success() {
            let status = response.status();
            let headers = response.headers().clone();
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &headers, &error_text));
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| TranslateError::Transient(format!("Failed to parse response: {}", e)))?;

        debug!("Raw Ollama response: {}", generated.response);

        extract_translation(&generated.response)
            .ok_or_else(|| TranslateError::Transient("Empty translation received".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_translation() {
        assert_eq!(extract_translation("{\"text\": \" Hola mundo \"}").as_deref(), Some("Hola mundo"));
    }

    #[test]
    fn test_extract_falls_back_to_cleaning() {
        assert_eq!(
            extract_translation("Translation:\nBonjour").as_deref(),
            Some("Bonjour")
        );
        assert_eq!(extract_translation("   "), None);
        assert_eq!(extract_translation("{\"text\": \"\"}"), None);
    }
}
