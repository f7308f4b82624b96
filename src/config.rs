use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::error::{Result, RelayError};

// Default values so a partial config file is still valid
fn default_target_language() -> String {
    "es".to_string()
}

fn default_workers() -> usize {
    4
}

fn default_max_concurrent() -> usize {
    4
}

fn default_requests_per_window() -> u32 {
    30
}

fn default_window_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_rate_limit_retries() -> u32 {
    10
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_cap_ms() -> u64 {
    60_000
}

fn default_jitter_ratio() -> f64 {
    0.25
}

fn default_call_timeout_secs() -> u64 {
    120
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from(".polyglot-relay/checkpoint.jsonl")
}

fn default_provider() -> Provider {
    Provider::OpenAi
}

fn default_endpoint() -> String {
    "https://api.groq.com/openai/v1".to_string()
}

fn default_model() -> String {
    "gemma2-9b-it".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_api_key_env() -> String {
    "POLYGLOT_API_KEYS".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Target language code (e.g. "es", "fa", "ja")
    #[serde(default = "default_target_language")]
    pub target_language: String,
    /// Number of concurrent workers
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Maximum outstanding calls to the translation service
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Requests allowed per window; 0 disables the quota
    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: u32,
    /// Quota window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Transient failures after which a unit fails permanently
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Rate-limit responses after which a unit fails permanently, counted
    /// separately from transient failures
    #[serde(default = "default_max_rate_limit_retries")]
    pub max_rate_limit_retries: u32,
    /// First retry delay in milliseconds
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Upper bound for retry delays in milliseconds
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    /// Fraction (0..=1) by which a backoff delay may be randomly shortened
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
    /// Timeout for a single translation call in seconds
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// How long in-flight calls may finish after shutdown is requested
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// Re-dispatch units that failed permanently in an earlier run
    #[serde(default = "default_true")]
    pub retry_failed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Path of the JSON-lines checkpoint file
    #[serde(default = "default_checkpoint_path")]
    pub path: PathBuf,
    /// Rewrite the checkpoint with one line per key after a completed run
    #[serde(default = "default_true")]
    pub compact_on_finish: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Which translation service protocol to speak
    #[serde(default = "default_provider")]
    pub provider: Provider,
    /// Base URL of the service
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Model used for translation
    #[serde(default = "default_model")]
    pub model: String,
    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Environment variable holding the API key(s), comma separated
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provider {
    /// OpenAI-compatible chat completions (OpenAI, Groq, vLLM, ...)
    OpenAi,
    /// Local Ollama server
    Ollama,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            target_language: default_target_language(),
            workers: default_workers(),
            max_concurrent: default_max_concurrent(),
            requests_per_window: default_requests_per_window(),
            window_secs: default_window_secs(),
            max_retries: default_max_retries(),
            max_rate_limit_retries: default_max_rate_limit_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            jitter_ratio: default_jitter_ratio(),
            call_timeout_secs: default_call_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            retry_failed: true,
        }
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            path: default_checkpoint_path(),
            compact_on_finish: true,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            endpoint: default_endpoint(),
            model: default_model(),
            temperature: default_temperature(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RelayError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| RelayError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| RelayError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| RelayError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let engine = &self.engine;
        if engine.target_language.trim().is_empty() {
            return Err(RelayError::Config("target_language must not be empty".to_string()));
        }
        if engine.workers == 0 {
            return Err(RelayError::Config("workers must be at least 1".to_string()));
        }
        if engine.max_concurrent == 0 {
            return Err(RelayError::Config("max_concurrent must be at least 1".to_string()));
        }
        if engine.requests_per_window > 0 && engine.window_secs == 0 {
            return Err(RelayError::Config(
                "window_secs must be positive when requests_per_window is set".to_string(),
            ));
        }
        if engine.backoff_cap_ms < engine.backoff_base_ms {
            return Err(RelayError::Config(format!(
                "backoff_cap_ms ({}) is smaller than backoff_base_ms ({})",
                engine.backoff_cap_ms, engine.backoff_base_ms
            )));
        }
        if !(0.0..=1.0).contains(&engine.jitter_ratio) {
            return Err(RelayError::Config("jitter_ratio must be within 0..=1".to_string()));
        }
        if engine.call_timeout_secs == 0 {
            return Err(RelayError::Config("call_timeout_secs must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [engine]
            target_language = "fa"
            workers = 8

            [client]
            provider = "Ollama"
            endpoint = "http://localhost:11434"
            "#,
        )
        .unwrap();

        assert_eq!(config.engine.target_language, "fa");
        assert_eq!(config.engine.workers, 8);
        assert_eq!(config.engine.max_retries, 3);
        assert_eq!(config.client.provider, Provider::Ollama);
        assert_eq!(config.client.model, "gemma2-9b-it");
        assert_eq!(config.checkpoint.path, PathBuf::from(".polyglot-relay/checkpoint.jsonl"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_workers() {
        let mut config = Config::default();
        config.engine.workers = 0;
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));
    }

    #[test]
    fn test_validation_rejects_inverted_backoff() {
        let mut config = Config::default();
        config.engine.backoff_base_ms = 10_000;
        config.engine.backoff_cap_ms = 1_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.engine.target_language = "ja".to_string();
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.engine.target_language, "ja");
        assert_eq!(loaded.engine.requests_per_window, 30);
    }
}
