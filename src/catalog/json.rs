use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

/// `[{"key": "...", "source": "...", "context": "...", "translation": "..."}]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
}

pub fn parse(content: &str) -> Result<Vec<JsonEntry>> {
    serde_json::from_str(content)
        .map_err(|e| RelayError::Catalog(format!("invalid JSON catalog: {}", e)))
}

pub fn render(entries: &[JsonEntry]) -> Result<String> {
    let mut out = serde_json::to_string_pretty(entries)?;
    out.push('\n');
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_fields() {
        let entries = parse(r#"[{"source": "Hello"}, {"key": "k2", "source": "Bye", "context": "farewell"}]"#).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, None);
        assert_eq!(entries[1].context.as_deref(), Some("farewell"));

        let rendered = render(&entries).unwrap();
        assert!(!rendered.contains("translation"));
    }

    #[test]
    fn test_rejects_non_array() {
        assert!(matches!(parse("{\"source\": \"x\"}"), Err(RelayError::Catalog(_))));
    }
}
