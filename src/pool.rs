//! Fixed-size pool of workers sharing one FIFO queue, one admission gate and
//! one checkpoint store.
//!
//! Each `WorkItem` is owned by exactly one place at a time: the queue, a
//! worker, a re-queue timer, or (once terminal) the outcome channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::admission::AdmissionController;
use crate::checkpoint::{CheckpointRecord, CheckpointStore};
use crate::client::{TranslationClient, TranslationRequest};
use crate::error::{RelayError, TranslateError};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::unit::{TranslationResult, TranslationUnit};

/// A unit together with its in-progress result.
#[derive(Debug)]
pub struct WorkItem {
    pub unit: Arc<TranslationUnit>,
    pub result: TranslationResult,
}

impl WorkItem {
    pub fn new(unit: Arc<TranslationUnit>) -> Self {
        let result = TranslationResult::pending(unit.key.clone());
        Self { unit, result }
    }
}

/// What a worker reports back to the engine.
#[derive(Debug)]
pub enum Outcome {
    /// A terminal (Succeeded or FailedPermanent) result, ownership handed over.
    Completed(TranslationResult),
    /// The run cannot continue.
    Fatal(RelayError),
}

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub workers: usize,
    pub call_timeout: Duration,
    pub target_language: String,
}

struct WorkerContext {
    settings: PoolSettings,
    client: Arc<dyn TranslationClient>,
    admission: Arc<AdmissionController>,
    store: Arc<dyn CheckpointStore>,
    policy: RetryPolicy,
    queue_tx: mpsc::UnboundedSender<WorkItem>,
    queue_rx: Mutex<mpsc::UnboundedReceiver<WorkItem>>,
    outcome_tx: mpsc::UnboundedSender<Outcome>,
    /// No new admissions once cancelled.
    stop: CancellationToken,
    /// Drop in-flight calls once cancelled.
    abandon: CancellationToken,
}

pub struct WorkerPool {
    settings: PoolSettings,
    client: Arc<dyn TranslationClient>,
    admission: Arc<AdmissionController>,
    store: Arc<dyn CheckpointStore>,
    policy: RetryPolicy,
}

/// Running pool. Outcomes arrive in completion order.
pub struct PoolHandle {
    outcomes: mpsc::UnboundedReceiver<Outcome>,
    workers: JoinSet<()>,
    stop: CancellationToken,
    abandon: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        settings: PoolSettings,
        client: Arc<dyn TranslationClient>,
        admission: Arc<AdmissionController>,
        store: Arc<dyn CheckpointStore>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            settings,
            client,
            admission,
            store,
            policy,
        }
    }

    /// Queue `items` in the given order and start the workers. Cancelling
    /// `shutdown` stops new admissions.
    pub fn start(&self, items: Vec<WorkItem>, shutdown: &CancellationToken) -> PoolHandle {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcomes) = mpsc::unbounded_channel();
        let stop = shutdown.child_token();
        let abandon = CancellationToken::new();

        let queued = items.len();
        for item in items {
            // receiver is alive in this scope
            let _ = queue_tx.send(item);
        }

        let ctx = Arc::new(WorkerContext {
            settings: self.settings.clone(),
            client: self.client.clone(),
            admission: self.admission.clone(),
            store: self.store.clone(),
            policy: self.policy.clone(),
            queue_tx,
            queue_rx: Mutex::new(queue_rx),
            outcome_tx,
            stop: stop.clone(),
            abandon: abandon.clone(),
        });

        let worker_count = self.settings.workers.max(1);
        let mut workers = JoinSet::new();
        for id in 0..worker_count {
            let ctx = ctx.clone();
            workers.spawn(run_worker(ctx).instrument(info_span!("worker", id)));
        }
        info!(workers = worker_count, queued, "Worker pool started");

        PoolHandle {
            outcomes,
            workers,
            stop,
            abandon,
        }
    }
}

impl PoolHandle {
    /// Next outcome, or `None` once every worker has exited.
    pub async fn next_outcome(&mut self) -> Option<Outcome> {
        self.outcomes.recv().await
    }

    /// Stop admitting work, give in-flight calls up to `grace` to finish,
    /// then abandon whatever is still running. Abandoned units stay pending.
    ///
    /// Outcomes produced while draining are returned so the caller can
    /// account for them.
    pub async fn shutdown(mut self, grace: Duration) -> Vec<Outcome> {
        self.stop.cancel();

        let drained = tokio::time::timeout(grace, async {
            while self.workers.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(grace_secs = grace.as_secs(), "In-flight calls exceeded shutdown grace, abandoning");
            self.abandon.cancel();
            // Workers leave at their next await point; checkpoint writes are
            // never interrupted because abandonment only races the remote call.
            while self.workers.join_next().await.is_some() {}
        }

        self.outcomes.close();
        let mut late = Vec::new();
        while let Ok(outcome) = self.outcomes.try_recv() {
            late.push(outcome);
        }
        late
    }
}

async fn next_item(ctx: &WorkerContext) -> Option<WorkItem> {
    ctx.queue_rx.lock().await.recv().await
}

async fn run_worker(ctx: Arc<WorkerContext>) {
    loop {
        let item = tokio::select! {
            biased;
            _ = ctx.stop.cancelled() => break,
            item = next_item(&ctx) => match item {
                Some(item) => item,
                None => break,
            },
        };

        if !process(&ctx, item).await {
            break;
        }
    }
    debug!("Worker exiting");
}

/// Handle one unit. Returns `false` when the worker should exit.
async fn process(ctx: &WorkerContext, mut item: WorkItem) -> bool {
    let key = item.unit.key.clone();

    // A unit that already succeeded is never sent to the service again.
    if let Some(record) = ctx.store.get(&key).await {
        if record.is_succeeded() {
            debug!(unit = %key, "Already checkpointed, skipping");
            return emit(ctx, Outcome::Completed(record.to_result()));
        }
    }

    let permit = tokio::select! {
        biased;
        _ = ctx.stop.cancelled() => return false,
        permit = ctx.admission.acquire(1) => permit,
    };

    let request = TranslationRequest {
        source_text: item.unit.source_text.clone(),
        context: item.unit.context.clone(),
        target_language: ctx.settings.target_language.clone(),
    };
    item.result.attempts += 1;
    debug!(unit = %key, attempt = item.result.attempts, "Dispatching");

    let call = tokio::select! {
        biased;
        _ = ctx.abandon.cancelled() => {
            debug!(unit = %key, "Abandoning in-flight call");
            return false;
        }
        call = tokio::time::timeout(ctx.settings.call_timeout, ctx.client.translate(&request)) => call,
    };
    let call = call.unwrap_or_else(|_| {
        Err(TranslateError::Transient(format!(
            "request timed out after {}s",
            ctx.settings.call_timeout.as_secs()
        )))
    });

    match call {
        Ok(text) => {
            item.result.succeed(text);
            let persisted = persist(ctx, &item.result).await;
            drop(permit);
            if let Err(e) = persisted {
                error!(unit = %key, error = %e, "Checkpoint write failed");
                emit(ctx, Outcome::Fatal(e));
                return false;
            }
            debug!(unit = %key, attempts = item.result.attempts, "Translated");
            emit(ctx, Outcome::Completed(item.result))
        }
        Err(err) => {
            match &err {
                TranslateError::Transient(_) => item.result.transient_failures += 1,
                TranslateError::RateLimited { .. } => item.result.throttled += 1,
                _ => {}
            }
            item.result.last_error = Some(err.classify());

            let decision = ctx.policy.decide(
                &err,
                item.result.transient_failures,
                item.result.throttled,
                rand::random::<f64>(),
            );

            if let (TranslateError::RateLimited { retry_after }, RetryDecision::Retry(delay)) = (&err, &decision) {
                ctx.admission.pause_for(retry_after.unwrap_or(*delay)).await;
            }
            drop(permit);

            match decision {
                RetryDecision::Retry(delay) => {
                    debug!(
                        unit = %key,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after backoff"
                    );
                    requeue(ctx, item, delay);
                    true
                }
                RetryDecision::GiveUp => {
                    warn!(unit = %key, attempts = item.result.attempts, error = %err, "Unit failed permanently");
                    let classified = err.classify();
                    item.result.fail(classified);
                    if let Err(e) = persist(ctx, &item.result).await {
                        error!(unit = %key, error = %e, "Checkpoint write failed");
                        emit(ctx, Outcome::Fatal(e));
                        return false;
                    }
                    emit(ctx, Outcome::Completed(item.result))
                }
                RetryDecision::Fatal => {
                    error!(unit = %key, error = %err, "Fatal service error, aborting run");
                    emit(ctx, Outcome::Fatal(RelayError::Authentication(err.to_string())));
                    false
                }
            }
        }
    }
}

async fn persist(ctx: &WorkerContext, result: &TranslationResult) -> crate::error::Result<()> {
    match CheckpointRecord::from_result(result) {
        Some(record) => ctx.store.put(record).await,
        None => Ok(()),
    }
}

/// Put the item back on the queue after `delay`, unless the pool stops first.
fn requeue(ctx: &WorkerContext, item: WorkItem, delay: Duration) {
    let tx = ctx.queue_tx.clone();
    let stop = ctx.stop.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = stop.cancelled() => {}
            _ = tokio::time::sleep(delay) => {
                let _ = tx.send(item);
            }
        }
    });
}

fn emit(ctx: &WorkerContext, outcome: Outcome) -> bool {
    ctx.outcome_tx.send(outcome).is_ok()
}
