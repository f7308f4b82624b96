use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

/// An API credential. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Round-robin rotation over one or more API keys, shared by all workers.
#[derive(Debug, Clone, Default)]
pub struct ApiKeyRing {
    keys: Arc<Vec<Secret>>,
    cursor: Arc<AtomicUsize>,
}

impl ApiKeyRing {
    pub fn new(keys: Vec<Secret>) -> Self {
        Self {
            keys: Arc::new(keys),
            cursor: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Parse `key1,key2` or `[key1, key2]`.
    pub fn parse(raw: &str) -> Self {
        let keys = raw
            .trim()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .split(',')
            .map(|k| k.trim().trim_matches('"').trim_matches('\''))
            .filter(|k| !k.is_empty())
            .map(Secret::new)
            .collect();
        Self::new(keys)
    }

    /// Read keys from an environment variable, loading `.env` first.
    pub fn from_env(var: &str) -> Self {
        if let Err(e) = dotenv::dotenv() {
            if !e.not_found() {
                warn!("Failed to load .env file: {}", e);
            }
        }
        match std::env::var(var) {
            Ok(raw) => {
                let ring = Self::parse(&raw);
                info!(var, keys = ring.len(), "Loaded API keys");
                ring
            }
            Err(_) => Self::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Next key in rotation, or `None` when the ring is empty.
    pub fn next_key(&self) -> Option<&Secret> {
        if self.keys.is_empty() {
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.keys.len();
        self.keys.get(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bracketed_list() {
        let ring = ApiKeyRing::parse("[gsk_a, gsk_b ,\"gsk_c\"]");
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.next_key().unwrap().expose(), "gsk_a");
        assert_eq!(ring.next_key().unwrap().expose(), "gsk_b");
        assert_eq!(ring.next_key().unwrap().expose(), "gsk_c");
        assert_eq!(ring.next_key().unwrap().expose(), "gsk_a");
    }

    #[test]
    fn test_empty_ring() {
        let ring = ApiKeyRing::parse(" , ");
        assert!(ring.is_empty());
        assert!(ring.next_key().is_none());
    }

    #[test]
    fn test_secret_is_redacted() {
        let secret = Secret::new("sk-live-123");
        assert_eq!(format!("{:?}", secret), "Secret(***)");
        assert_eq!(secret.to_string(), "***");
    }
}
