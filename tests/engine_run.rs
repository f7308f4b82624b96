mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use common::{engine_config, translated, units, ScriptedClient};
use polyglot_relay::checkpoint::{CheckpointRecord, CheckpointStore, MemoryCheckpointStore};
use polyglot_relay::engine::Engine;
use polyglot_relay::error::{ErrorKind, RelayError, TranslateError};
use polyglot_relay::unit::UnitStatus;

fn texts(report: &polyglot_relay::RunReport) -> Vec<(String, String)> {
    report
        .output
        .entries
        .iter()
        .map(|e| (e.key.clone(), e.translated_text.clone()))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_unit_recovers() {
    let client = Arc::new(ScriptedClient::new().script(
        "World",
        vec![Err(TranslateError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        })],
    ));
    let store = Arc::new(MemoryCheckpointStore::new());
    let engine = Engine::new(engine_config(2, 2), client.clone(), store.clone());

    let catalog = units(&[("a", "Hello"), ("b", "World")]);
    let report = engine.run(&catalog, CancellationToken::new()).await.unwrap();

    assert_eq!(
        texts(&report),
        vec![
            ("a".to_string(), translated("Hello")),
            ("b".to_string(), translated("World")),
        ]
    );
    assert_eq!(report.summary.succeeded, 2);
    assert_eq!(report.summary.failed, 0);
    assert_eq!(report.summary.exit_code(), 0);

    assert!(store.get("a").await.unwrap().is_succeeded());
    let b = store.get("b").await.unwrap();
    assert!(b.is_succeeded());
    assert_eq!(b.attempts, 2);
    assert_eq!(client.call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_fully_checkpointed_catalog_makes_no_calls() {
    let catalog = units(&[("a", "Hello"), ("b", "World"), ("c", "Again")]);
    let store = Arc::new(MemoryCheckpointStore::with_records(
        catalog
            .iter()
            .map(|u| CheckpointRecord::succeeded(u.key.clone(), translated(&u.source_text), 1)),
    ));
    let client = Arc::new(ScriptedClient::new());
    let engine = Engine::new(engine_config(3, 3), client.clone(), store);

    let report = engine.run(&catalog, CancellationToken::new()).await.unwrap();

    assert_eq!(client.call_count(), 0);
    assert_eq!(report.summary.reused, 3);
    assert_eq!(report.summary.dispatched, 0);
    assert_eq!(
        texts(&report),
        catalog
            .iter()
            .map(|u| (u.key.clone(), translated(&u.source_text)))
            .collect::<Vec<_>>()
    );
}

#[tokio::test(start_paused = true)]
async fn test_resume_dispatches_only_remaining_units() {
    let catalog = units(&[("a", "one"), ("b", "two"), ("c", "three"), ("d", "four"), ("e", "five")]);

    let fresh = Engine::new(
        engine_config(2, 2),
        Arc::new(ScriptedClient::new()),
        Arc::new(MemoryCheckpointStore::new()),
    );
    let uninterrupted = fresh.run(&catalog, CancellationToken::new()).await.unwrap();

    // a crash after the first two units were persisted
    let store = Arc::new(MemoryCheckpointStore::with_records(vec![
        CheckpointRecord::succeeded("a", translated("one"), 1),
        CheckpointRecord::succeeded("b", translated("two"), 1),
    ]));
    let client = Arc::new(ScriptedClient::new());
    let engine = Engine::new(engine_config(2, 2), client.clone(), store);
    let resumed = engine.run(&catalog, CancellationToken::new()).await.unwrap();

    let mut dispatched = client.calls();
    dispatched.sort();
    assert_eq!(dispatched, vec!["five", "four", "three"]);
    assert_eq!(resumed.output, uninterrupted.output);
}

#[tokio::test(start_paused = true)]
async fn test_output_follows_input_order() {
    let latencies = [80, 10, 50, 5, 70, 20, 60, 30];
    let pairs: Vec<(String, String)> = (0..latencies.len())
        .map(|i| (format!("k{}", i), format!("text {}", i)))
        .collect();

    let mut client = ScriptedClient::new();
    for ((_, text), ms) in pairs.iter().zip(latencies) {
        client = client.latency(text, Duration::from_millis(ms));
    }
    let client = Arc::new(client);
    let engine = Engine::new(engine_config(4, 4), client, Arc::new(MemoryCheckpointStore::new()));

    let borrowed: Vec<(&str, &str)> = pairs.iter().map(|(k, t)| (k.as_str(), t.as_str())).collect();
    let catalog = units(&borrowed);
    let report = engine.run(&catalog, CancellationToken::new()).await.unwrap();

    let keys: Vec<&str> = report.output.entries.iter().map(|e| e.key.as_str()).collect();
    let expected: Vec<&str> = pairs.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, expected);
    for (entry, (_, text)) in report.output.entries.iter().zip(&pairs) {
        assert_eq!(entry.translated_text, translated(text));
    }
}

#[tokio::test(start_paused = true)]
async fn test_outstanding_calls_never_exceed_limit() {
    let pairs: Vec<(String, String)> = (0..12).map(|i| (format!("k{}", i), format!("t{}", i))).collect();
    let borrowed: Vec<(&str, &str)> = pairs.iter().map(|(k, t)| (k.as_str(), t.as_str())).collect();
    let catalog = units(&borrowed);

    let client = Arc::new(ScriptedClient::new());
    let engine = Engine::new(engine_config(6, 2), client.clone(), Arc::new(MemoryCheckpointStore::new()));
    let report = engine.run(&catalog, CancellationToken::new()).await.unwrap();

    assert_eq!(report.summary.succeeded, 12);
    assert!(client.peak_in_flight() <= 2, "peak was {}", client.peak_in_flight());
    assert_eq!(engine.admission().in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_below_budget_succeed() {
    let client = Arc::new(ScriptedClient::new().script(
        "flaky",
        vec![
            Err(TranslateError::Transient("503".into())),
            Err(TranslateError::Transient("timeout".into())),
        ],
    ));
    let store = Arc::new(MemoryCheckpointStore::new());
    let engine = Engine::new(engine_config(1, 1), client, store.clone());

    let report = engine
        .run(&units(&[("f", "flaky")]), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.output.entries[0].status, UnitStatus::Succeeded);
    assert_eq!(store.get("f").await.unwrap().attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retry_budget_fails_unit_but_not_run() {
    let failures = (0..3).map(|_| Err(TranslateError::Transient("502".into()))).collect();
    let client = Arc::new(ScriptedClient::new().script("broken", failures));
    let store = Arc::new(MemoryCheckpointStore::new());
    let engine = Engine::new(engine_config(2, 2), client.clone(), store.clone());

    let catalog = units(&[("x", "broken"), ("y", "fine")]);
    let report = engine.run(&catalog, CancellationToken::new()).await.unwrap();

    assert_eq!(report.summary.succeeded, 1);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.summary.exit_code(), 1);
    let failure = &report.summary.failures[0];
    assert_eq!(failure.key, "x");
    assert_eq!(failure.error.as_ref().unwrap().kind, ErrorKind::TransientService);

    // failed units keep their source text in the output
    assert_eq!(report.output.entries[0].translated_text, "broken");
    assert_eq!(report.output.entries[0].status, UnitStatus::FailedPermanent);

    let record = store.get("x").await.unwrap();
    assert!(!record.is_succeeded());
    assert_eq!(record.attempts, 3);
    assert_eq!(client.call_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_failed_records_reused_when_retry_disabled() {
    let mut failed = CheckpointRecord::succeeded("x", "", 3);
    failed.status = polyglot_relay::checkpoint::CheckpointStatus::FailedPermanent;
    failed.translated_text = None;
    let store = Arc::new(MemoryCheckpointStore::with_records(vec![failed]));

    let client = Arc::new(ScriptedClient::new());
    let mut config = engine_config(1, 1);
    config.retry_failed = false;
    let engine = Engine::new(config, client.clone(), store);

    let report = engine
        .run(&units(&[("x", "broken")]), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(client.call_count(), 0);
    assert_eq!(report.summary.failed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_records_redispatched_by_default() {
    let mut failed = CheckpointRecord::succeeded("x", "", 3);
    failed.status = polyglot_relay::checkpoint::CheckpointStatus::FailedPermanent;
    failed.translated_text = None;
    let store = Arc::new(MemoryCheckpointStore::with_records(vec![failed]));

    let client = Arc::new(ScriptedClient::new());
    let engine = Engine::new(engine_config(1, 1), client.clone(), store.clone());

    let report = engine
        .run(&units(&[("x", "broken")]), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(client.call_count(), 1);
    assert_eq!(report.summary.succeeded, 1);
    assert!(store.get("x").await.unwrap().is_succeeded());
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_keys_are_dispatched_once() {
    let client = Arc::new(ScriptedClient::new());
    let engine = Engine::new(engine_config(2, 2), client.clone(), Arc::new(MemoryCheckpointStore::new()));

    let catalog = units(&[("a", "Hello"), ("b", "World"), ("a", "Hello")]);
    let report = engine.run(&catalog, CancellationToken::new()).await.unwrap();

    assert_eq!(client.call_count(), 2);
    assert_eq!(report.summary.total, 2);
    assert_eq!(report.output.entries.len(), 3);
    assert_eq!(report.output.entries[2].translated_text, translated("Hello"));
}

#[tokio::test(start_paused = true)]
async fn test_authentication_failure_aborts_after_flushing_progress() {
    let client = Arc::new(
        ScriptedClient::new()
            .latency("late", Duration::from_millis(100))
            .script("late", vec![Err(TranslateError::Authentication("401".into()))]),
    );
    let store = Arc::new(MemoryCheckpointStore::new());
    let engine = Engine::new(engine_config(1, 1), client, store.clone());

    let catalog = units(&[("a", "early"), ("b", "late"), ("c", "never")]);
    let err = engine.run(&catalog, CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, RelayError::Authentication(_)));
    assert_eq!(err.exit_code(), 2);
    assert!(store.get("a").await.unwrap().is_succeeded());
    assert!(store.get("b").await.is_none());
    assert!(store.get("c").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_interrupted_run_resumes_where_it_stopped() {
    let pairs: Vec<(String, String)> = (0..5).map(|i| (format!("k{}", i), format!("t{}", i))).collect();
    let borrowed: Vec<(&str, &str)> = pairs.iter().map(|(k, t)| (k.as_str(), t.as_str())).collect();
    let catalog = units(&borrowed);

    let mut slow = ScriptedClient::new();
    for (_, text) in &pairs {
        slow = slow.latency(text, Duration::from_millis(100));
    }
    let store = Arc::new(MemoryCheckpointStore::new());
    let engine = Engine::new(engine_config(1, 1), Arc::new(slow), store.clone());

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        trigger.cancel();
    });

    let err = engine.run(&catalog, shutdown).await.unwrap_err();
    assert!(matches!(err, RelayError::Interrupted));
    assert_eq!(err.exit_code(), 130);

    let persisted = store.len().await;
    assert!(persisted >= 2 && persisted < 5, "persisted {}", persisted);

    let client = Arc::new(ScriptedClient::new());
    let engine = Engine::new(engine_config(1, 1), client.clone(), store.clone());
    let report = engine.run(&catalog, CancellationToken::new()).await.unwrap();

    assert_eq!(client.call_count(), 5 - persisted);
    assert_eq!(report.summary.reused, persisted);
    assert_eq!(report.summary.succeeded, 5);
}

#[tokio::test(start_paused = true)]
async fn test_calls_still_running_after_grace_are_abandoned() {
    let client = Arc::new(ScriptedClient::new().latency("stuck", Duration::from_secs(100)));
    let store = Arc::new(MemoryCheckpointStore::new());
    let mut config = engine_config(2, 2);
    config.shutdown_grace_secs = 2;
    let engine = Engine::new(config, client.clone(), store.clone());

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let started = tokio::time::Instant::now();
    let catalog = units(&[("a", "quick"), ("b", "stuck")]);
    let err = engine.run(&catalog, shutdown).await.unwrap_err();

    assert!(matches!(err, RelayError::Interrupted));
    assert!(started.elapsed() < Duration::from_secs(10), "waited {:?}", started.elapsed());
    assert_eq!(client.call_count(), 2);
    assert!(store.get("a").await.unwrap().is_succeeded());
    // the abandoned call leaves no record, so the next run dispatches it
    assert!(store.get("b").await.is_none());
    assert_eq!(store.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_call_timeout_is_a_transient_failure() {
    let client = Arc::new(ScriptedClient::new().latency("stuck", Duration::from_secs(100)));
    let store = Arc::new(MemoryCheckpointStore::new());
    let mut config = engine_config(1, 1);
    config.call_timeout_secs = 1;
    let engine = Engine::new(config, client.clone(), store.clone());

    let started = tokio::time::Instant::now();
    let report = engine
        .run(&units(&[("x", "stuck")]), CancellationToken::new())
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(10), "waited {:?}", started.elapsed());
    assert_eq!(client.call_count(), 3);
    assert_eq!(report.summary.failed, 1);
    let error = report.summary.failures[0].error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::TransientService);
    assert!(error.message.contains("timed out"), "{}", error.message);
    assert_eq!(store.get("x").await.unwrap().attempts, 3);
}
