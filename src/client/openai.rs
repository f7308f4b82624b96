use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{RelayError, Result, TranslateError};
use super::common::{classify_status, classify_transport, system_prompt, user_message};
use super::keys::ApiKeyRing;
use super::{TranslationClient, TranslationRequest};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// OpenAI-compatible `/chat/completions` client with API key rotation.
pub struct OpenAiClient {
    client: Client,
    config: ClientConfig,
    keys: ApiKeyRing,
}

impl OpenAiClient {
    pub fn new(config: ClientConfig, keys: ApiKeyRing) -> Result<Self> {
        // Per-call deadlines are enforced by the worker pool; this is a backstop.
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| RelayError::Config(format!("HTTP client creation failed: {}", e)))?;

        Ok(Self {
            client,
            config,
            keys,
        })
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'))
    }
}

#[async_trait]
impl TranslationClient for OpenAiClient {
    async fn translate(&self, request: &TranslationRequest) -> std::result::Result<String, TranslateError> {
        let key = self
            .keys
            .next_key()
            .ok_or_else(|| TranslateError::Authentication("no API key configured".to_string()))?;

        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_prompt(&request.target_language),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_message(request),
                },
            ],
            temperature: self.config.temperature,
        };

        let url = self.url();
        debug!("Sending translation request to: {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(key.expose())
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

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| TranslateError::Transient(format!("Failed to parse response: {}", e)))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(TranslateError::Transient("Empty translation received".to_string()));
        }
        Ok(text)
    }
}
