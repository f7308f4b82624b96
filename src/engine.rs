use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use indicatif::ProgressBar;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::admission::{AdmissionConfig, AdmissionController};
use crate::aggregate::{ResultAggregator, RunReport};
use crate::checkpoint::{CheckpointRecord, CheckpointStore};
use crate::client::TranslationClient;
use crate::config::EngineConfig;
use crate::error::{RelayError, Result};
use crate::pool::{Outcome, PoolSettings, WorkItem, WorkerPool};
use crate::retry::RetryPolicy;
use crate::unit::TranslationUnit;

/// How the dispatch loop ended.
enum Stop {
    Complete,
    Fatal(RelayError),
    Interrupted,
}

pub struct Engine {
    config: EngineConfig,
    client: Arc<dyn TranslationClient>,
    store: Arc<dyn CheckpointStore>,
    admission: Arc<AdmissionController>,
    progress: ProgressBar,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        client: Arc<dyn TranslationClient>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        let admission = Arc::new(AdmissionController::new(AdmissionConfig::from(&config)));
        Self {
            config,
            client,
            store,
            admission,
            progress: ProgressBar::hidden(),
        }
    }

    /// Report progress on `bar` (hidden by default).
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = bar;
        self
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    /// Translate `units`, resuming from the checkpoint store.
    ///
    /// Returns the ordered output and summary once every unit is terminal.
    /// Fatal errors and shutdown requests flush the store before returning.
    pub async fn run(&self, units: &[TranslationUnit], shutdown: CancellationToken) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", %run_id, target = %self.config.target_language);
        self.run_inner(run_id, units, shutdown).instrument(span).await
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        units: &[TranslationUnit],
        shutdown: CancellationToken,
    ) -> Result<RunReport> {
        let records: HashMap<String, CheckpointRecord> = self
            .store
            .load()
            .await
            .map_err(|e| match e {
                RelayError::Persistence(_) => e,
                other => RelayError::Persistence(other.to_string()),
            })?
            .into_iter()
            .map(|r| (r.key.clone(), r))
            .collect();

        let mut aggregator = ResultAggregator::new(units);
        let mut pending = Vec::new();
        let mut seen = HashSet::new();

        for unit in units {
            if !seen.insert(unit.key.as_str()) {
                continue;
            }
            match records.get(&unit.key) {
                Some(record) if record.is_succeeded() || !self.config.retry_failed => {
                    aggregator.record_reused(record.to_result())?;
                }
                _ => pending.push(WorkItem::new(Arc::new(unit.clone()))),
            }
        }

        info!(
            units = aggregator.expected(),
            reused = aggregator.completed(),
            pending = pending.len(),
            "Starting translation run"
        );

        self.progress.set_length(aggregator.expected() as u64);
        self.progress.set_position(aggregator.completed() as u64);

        if pending.is_empty() {
            info!("All units already checkpointed, nothing to dispatch");
            self.progress.finish();
            return aggregator.finish(run_id);
        }

        let pool = WorkerPool::new(
            PoolSettings {
                workers: self.config.workers,
                call_timeout: Duration::from_secs(self.config.call_timeout_secs),
                target_language: self.config.target_language.clone(),
            },
            self.client.clone(),
            self.admission.clone(),
            self.store.clone(),
            RetryPolicy::from(&self.config),
        );
        let mut handle = pool.start(pending, &shutdown);

        let stop = loop {
            tokio::select! {
                outcome = handle.next_outcome() => match outcome {
                    Some(Outcome::Completed(result)) => {
                        if let Err(e) = aggregator.record(result) {
                            break Stop::Fatal(e);
                        }
                        self.progress.set_position(aggregator.completed() as u64);
                        if aggregator.is_complete() {
                            break Stop::Complete;
                        }
                    }
                    Some(Outcome::Fatal(e)) => break Stop::Fatal(e),
                    None => {
                        break Stop::Fatal(RelayError::Internal(
                            "all workers exited before the catalog completed".to_string(),
                        ))
                    }
                },
                _ = shutdown.cancelled() => break Stop::Interrupted,
            }
        };

        let grace = Duration::from_secs(self.config.shutdown_grace_secs);
        let late = handle.shutdown(grace).await;
        let late_completed = late
            .iter()
            .filter(|o| matches!(o, Outcome::Completed(_)))
            .count();

        let flushed = self.store.flush().await;

        match stop {
            Stop::Complete => {
                flushed?;
                self.progress.finish();
                let report = aggregator.finish(run_id)?;
                info!(
                    succeeded = report.summary.succeeded,
                    failed = report.summary.failed,
                    "Translation run completed"
                );
                Ok(report)
            }
            Stop::Fatal(e) => {
                if let Err(flush_err) = flushed {
                    error!(error = %flush_err, "Checkpoint flush failed after fatal error");
                }
                self.progress.abandon();
                error!(
                    error = %e,
                    completed = aggregator.completed() + late_completed,
                    "Translation run aborted"
                );
                Err(e)
            }
            Stop::Interrupted => {
                flushed?;
                self.progress.abandon();
                warn!(
                    completed = aggregator.completed() + late_completed,
                    total = aggregator.expected(),
                    "Translation run interrupted; remaining units will be dispatched next run"
                );
                Err(RelayError::Interrupted)
            }
        }
    }
}
