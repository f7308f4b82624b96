#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use polyglot_relay::client::{TranslationClient, TranslationRequest};
use polyglot_relay::config::EngineConfig;
use polyglot_relay::error::TranslateError;
use polyglot_relay::unit::TranslationUnit;

/// Fake translation service. Each source text can be given a latency and a
/// queue of scripted responses; once the script runs out it answers
/// `<translated {source}>`.
#[derive(Default)]
pub struct ScriptedClient {
    scripts: Mutex<HashMap<String, VecDeque<Result<String, TranslateError>>>>,
    latencies: HashMap<String, Duration>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, source: &str, responses: Vec<Result<String, TranslateError>>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(source.to_string(), responses.into_iter().collect());
        self
    }

    pub fn latency(mut self, source: &str, latency: Duration) -> Self {
        self.latencies.insert(source.to_string(), latency);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Source texts in the order their calls started.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranslationClient for ScriptedClient {
    async fn translate(&self, request: &TranslationRequest) -> Result<String, TranslateError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().unwrap().push(request.source_text.clone());

        let latency = self
            .latencies
            .get(&request.source_text)
            .copied()
            .unwrap_or(Duration::from_millis(10));
        tokio::time::sleep(latency).await;

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.source_text)
            .and_then(|queue| queue.pop_front());
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        scripted.unwrap_or_else(|| Ok(translated(&request.source_text)))
    }
}

pub fn translated(source: &str) -> String {
    format!("<translated {}>", source)
}

pub fn engine_config(workers: usize, max_concurrent: usize) -> EngineConfig {
    EngineConfig {
        workers,
        max_concurrent,
        requests_per_window: 0,
        max_retries: 3,
        backoff_base_ms: 10,
        backoff_cap_ms: 100,
        jitter_ratio: 0.0,
        shutdown_grace_secs: 5,
        ..EngineConfig::default()
    }
}

pub fn units(pairs: &[(&str, &str)]) -> Vec<TranslationUnit> {
    pairs
        .iter()
        .map(|(key, text)| TranslationUnit::with_key(*key, *text, None))
        .collect()
}
