//! Reassembly of terminal results into catalog order.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ClassifiedError, RelayError, Result};
use crate::unit::{TranslationResult, TranslationUnit, UnitStatus};

/// One output row, in input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputEntry {
    pub key: String,
    pub source_text: String,
    /// Translation, or the source text when the unit failed permanently.
    pub translated_text: String,
    pub status: UnitStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputCatalog {
    pub entries: Vec<OutputEntry>,
}

impl OutputCatalog {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Translation by key, for catalog writers.
    pub fn translations(&self) -> HashMap<&str, &OutputEntry> {
        self.entries.iter().map(|e| (e.key.as_str(), e)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedUnit {
    pub key: String,
    pub source_text: String,
    pub error: Option<ClassifiedError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    /// Distinct keys in the catalog.
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Terminal results taken from the checkpoint without a remote call.
    pub reused: usize,
    /// Units sent to the worker pool this run.
    pub dispatched: usize,
    pub failures: Vec<FailedUnit>,
}

impl RunSummary {
    /// 0 when every unit succeeded, 1 when some failed permanently.
    pub fn exit_code(&self) -> u8 {
        if self.failed == 0 { 0 } else { 1 }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Run {}: {} units - {} succeeded, {} failed ({} reused from checkpoint, {} dispatched)",
            self.run_id, self.total, self.succeeded, self.failed, self.reused, self.dispatched
        )?;
        for failure in &self.failures {
            match &failure.error {
                Some(err) => writeln!(f, "  FAILED {} {}", failure.key, err)?,
                None => writeln!(f, "  FAILED {}", failure.key)?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub output: OutputCatalog,
    pub summary: RunSummary,
}

/// Collects terminal results keyed by unit key and replays input order.
pub struct ResultAggregator {
    order: Vec<TranslationUnit>,
    expected: HashSet<String>,
    results: HashMap<String, TranslationResult>,
    reused: usize,
}

impl ResultAggregator {
    pub fn new(units: &[TranslationUnit]) -> Self {
        Self {
            order: units.to_vec(),
            expected: units.iter().map(|u| u.key.clone()).collect(),
            results: HashMap::new(),
            reused: 0,
        }
    }

    /// Accept a terminal result handed over by a worker.
    pub fn record(&mut self, result: TranslationResult) -> Result<()> {
        if !result.status.is_terminal() {
            return Err(RelayError::Internal(format!(
                "non-terminal result for {} handed to aggregator",
                result.key
            )));
        }
        if !self.expected.contains(&result.key) {
            return Err(RelayError::Internal(format!("unknown unit key {}", result.key)));
        }
        self.results.insert(result.key.clone(), result);
        Ok(())
    }

    /// Accept a result restored from the checkpoint.
    pub fn record_reused(&mut self, result: TranslationResult) -> Result<()> {
        self.record(result)?;
        self.reused += 1;
        Ok(())
    }

    pub fn expected(&self) -> usize {
        self.expected.len()
    }

    pub fn completed(&self) -> usize {
        self.results.len()
    }

    pub fn is_complete(&self) -> bool {
        self.results.len() == self.expected.len()
    }

    /// Build the ordered catalog and summary. Fails if any unit is missing.
    pub fn finish(self, run_id: Uuid) -> Result<RunReport> {
        if !self.is_complete() {
            return Err(RelayError::Internal(format!(
                "{} of {} units have no terminal result",
                self.expected.len() - self.results.len(),
                self.expected.len()
            )));
        }

        let mut entries = Vec::with_capacity(self.order.len());
        let mut failures = Vec::new();
        let mut seen = HashSet::new();
        let mut succeeded = 0;

        for unit in &self.order {
            let result = match self.results.get(&unit.key) {
                Some(result) => result,
                None => continue,
            };
            let translated_text = match (&result.status, &result.translated_text) {
                (UnitStatus::Succeeded, Some(text)) => text.clone(),
                _ => unit.source_text.clone(),
            };

            if seen.insert(unit.key.as_str()) {
                match result.status {
                    UnitStatus::Succeeded => succeeded += 1,
                    _ => failures.push(FailedUnit {
                        key: unit.key.clone(),
                        source_text: unit.source_text.clone(),
                        error: result.last_error.clone(),
                    }),
                }
            }

            entries.push(OutputEntry {
                key: unit.key.clone(),
                source_text: unit.source_text.clone(),
                translated_text,
                status: result.status,
            });
        }

        let total = self.expected.len();
        let summary = RunSummary {
            run_id,
            total,
            succeeded,
            failed: failures.len(),
            reused: self.reused,
            dispatched: total - self.reused,
            failures,
        };

        Ok(RunReport {
            output: OutputCatalog { entries },
            summary,
        })
    }
}
