use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Checkpoint persistence error: {0}")]
    Persistence(String),

    #[error("Authentication rejected by translation service: {0}")]
    Authentication(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Run interrupted before all units completed")]
    Interrupted,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Process exit code for a run that ended with this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            RelayError::Interrupted => 130,
            _ => 2,
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;

/// Failure of a single call to the translation service, already classified.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslateError {
    /// Network failure, 5xx, empty completion or call timeout.
    #[error("transient service error: {0}")]
    Transient(String),

    #[error("rate limit exceeded{}", retry_after_suffix(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    /// The service refused this particular input; retrying will not help.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("authentication rejected: {0}")]
    Authentication(String),
}

fn retry_after_suffix(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(", retry after {}ms", d.as_millis()),
        None => String::new(),
    }
}

impl TranslateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TranslateError::Transient(_) => ErrorKind::TransientService,
            TranslateError::RateLimited { .. } => ErrorKind::RateLimitExceeded,
            TranslateError::InvalidRequest(_) => ErrorKind::PermanentRequest,
            TranslateError::Authentication(_) => ErrorKind::Authentication,
        }
    }

    pub fn classify(&self) -> ClassifiedError {
        ClassifiedError {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Serialisable error class recorded in checkpoints and summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientService,
    RateLimitExceeded,
    PermanentRequest,
    Authentication,
    Persistence,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::TransientService => "transient_service",
            ErrorKind::RateLimitExceeded => "rate_limit_exceeded",
            ErrorKind::PermanentRequest => "permanent_request",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Persistence => "persistence",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}
