//! Translation units and their per-run results.

use serde::{Deserialize, Serialize};

use crate::error::ClassifiedError;

/// gettext separator between `msgctxt` and `msgid`.
const CONTEXT_SEPARATOR: char = '\u{4}';

/// One source string requiring translation. Immutable once read from a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationUnit {
    pub key: String,
    pub source_text: String,
    pub context: Option<String>,
}

impl TranslationUnit {
    /// Create a unit whose key is derived from its context and source text.
    pub fn new(source_text: impl Into<String>, context: Option<String>) -> Self {
        let source_text = source_text.into();
        let key = derive_key(&source_text, context.as_deref());
        Self {
            key,
            source_text,
            context,
        }
    }

    /// Create a unit with a key supplied by the catalog.
    pub fn with_key(
        key: impl Into<String>,
        source_text: impl Into<String>,
        context: Option<String>,
    ) -> Self {
        Self {
            key: key.into(),
            source_text: source_text.into(),
            context,
        }
    }
}

/// Stable key for a (source, context) pair. Identical across runs and builds.
pub fn derive_key(source_text: &str, context: Option<&str>) -> String {
    let mut hasher = blake3::Hasher::new();
    if let Some(ctx) = context {
        hasher.update(ctx.as_bytes());
    }
    let mut sep = [0u8; 4];
    hasher.update(CONTEXT_SEPARATOR.encode_utf8(&mut sep).as_bytes());
    hasher.update(source_text.as_bytes());
    hasher.finalize().to_hex().as_str()[..32].to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    Succeeded,
    FailedPermanent,
}

impl UnitStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, UnitStatus::Pending)
    }
}

impl std::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitStatus::Pending => write!(f, "pending"),
            UnitStatus::Succeeded => write!(f, "succeeded"),
            UnitStatus::FailedPermanent => write!(f, "failed_permanent"),
        }
    }
}

/// Mutable progress of one unit. Owned by exactly one worker at a time and
/// moved, never shared, between the queue, workers and the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationResult {
    pub key: String,
    pub translated_text: Option<String>,
    pub status: UnitStatus,
    /// Remote calls made for this unit.
    pub attempts: u32,
    /// Transient failures counted against the retry budget.
    pub transient_failures: u32,
    /// Rate-limit responses, budgeted separately.
    pub throttled: u32,
    pub last_error: Option<ClassifiedError>,
}

impl TranslationResult {
    pub fn pending(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            translated_text: None,
            status: UnitStatus::Pending,
            attempts: 0,
            transient_failures: 0,
            throttled: 0,
            last_error: None,
        }
    }

    pub fn succeed(&mut self, translated_text: String) {
        self.translated_text = Some(translated_text);
        self.status = UnitStatus::Succeeded;
    }

    pub fn fail(&mut self, error: ClassifiedError) {
        self.last_error = Some(error);
        self.status = UnitStatus::FailedPermanent;
    }
}
