//! Durable record of terminal unit outcomes.
//!
//! The file store is an append-only JSON-lines log: one record per line,
//! later lines override earlier ones for the same key. Each `put` is written
//! and synced before it returns, so a killed process can at most leave a torn
//! final line, which `load` skips.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{ClassifiedError, RelayError, Result};
use crate::unit::{TranslationResult, UnitStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Succeeded,
    FailedPermanent,
}

/// Persisted projection of a terminal `TranslationResult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub key: String,
    pub status: CheckpointStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_text: Option<String>,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ClassifiedError>,
    pub completed_at: DateTime<Utc>,
}

impl CheckpointRecord {
    pub fn succeeded(key: impl Into<String>, translated_text: impl Into<String>, attempts: u32) -> Self {
        Self {
            key: key.into(),
            status: CheckpointStatus::Succeeded,
            translated_text: Some(translated_text.into()),
            attempts,
            last_error: None,
            completed_at: Utc::now(),
        }
    }

    /// Project a terminal result. Returns `None` for pending results.
    pub fn from_result(result: &TranslationResult) -> Option<Self> {
        let status = match result.status {
            UnitStatus::Succeeded => CheckpointStatus::Succeeded,
            UnitStatus::FailedPermanent => CheckpointStatus::FailedPermanent,
            UnitStatus::Pending => return None,
        };
        Some(Self {
            key: result.key.clone(),
            status,
            translated_text: result.translated_text.clone(),
            attempts: result.attempts,
            last_error: result.last_error.clone(),
            completed_at: Utc::now(),
        })
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == CheckpointStatus::Succeeded
    }

    /// Rebuild the in-memory result this record was projected from.
    pub fn to_result(&self) -> TranslationResult {
        let mut result = TranslationResult::pending(self.key.clone());
        result.attempts = self.attempts;
        result.translated_text = self.translated_text.clone();
        result.last_error = self.last_error.clone();
        result.status = match self.status {
            CheckpointStatus::Succeeded => UnitStatus::Succeeded,
            CheckpointStatus::FailedPermanent => UnitStatus::FailedPermanent,
        };
        result
    }
}

/// Storage for checkpoint records. Implementations serialise concurrent
/// `put` calls so persisted state is never interleaved.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// All persisted records, at most one per key.
    async fn load(&self) -> Result<Vec<CheckpointRecord>>;

    async fn get(&self, key: &str) -> Option<CheckpointRecord>;

    /// Durably persist one record, replacing any earlier record for its key.
    async fn put(&self, record: CheckpointRecord) -> Result<()>;

    /// Make sure everything accepted by `put` is on stable storage.
    async fn flush(&self) -> Result<()>;

    async fn len(&self) -> usize;
}

/// In-memory store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    records: Mutex<HashMap<String, CheckpointRecord>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = CheckpointRecord>) -> Self {
        let map = records.into_iter().map(|r| (r.key.clone(), r)).collect();
        Self {
            records: Mutex::new(map),
        }
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self) -> Result<Vec<CheckpointRecord>> {
        Ok(self.records.lock().await.values().cloned().collect())
    }

    async fn get(&self, key: &str) -> Option<CheckpointRecord> {
        self.records.lock().await.get(key).cloned()
    }

    async fn put(&self, record: CheckpointRecord) -> Result<()> {
        self.records.lock().await.insert(record.key.clone(), record);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

#[derive(Debug)]
struct JsonlState {
    file: Option<File>,
    index: HashMap<String, CheckpointRecord>,
    /// Set when a failed append could not be rolled back; no further writes.
    failed: Option<String>,
}

/// Append-only JSON-lines checkpoint file.
#[derive(Debug)]
pub struct JsonlCheckpointStore {
    path: PathBuf,
    state: Mutex<JsonlState>,
}

impl JsonlCheckpointStore {
    /// Open (or prepare to create) the checkpoint at `path` and read existing
    /// records into the in-memory index.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (index, torn_at) = read_records(&path).await?;
        if let Some(len) = torn_at {
            warn!(path = %path.display(), keep_bytes = len, "Repairing torn checkpoint tail");
            truncate_torn_tail(&path, len).await?;
        }
        info!(path = %path.display(), records = index.len(), "Opened checkpoint");
        Ok(Self {
            path,
            state: Mutex::new(JsonlState {
                file: None,
                index,
                failed: None,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the file with exactly one line per key. The old file is only
    /// replaced once the new one is complete.
    pub async fn compact(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        if let Some(file) = state.file.as_mut() {
            file.sync_data().await.map_err(persistence("sync checkpoint"))?;
        }

        let mut records: Vec<&CheckpointRecord> = state.index.values().collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        let mut buffer = Vec::new();
        for record in &records {
            serde_json::to_writer(&mut buffer, record)?;
            buffer.push(b'\n');
        }
        let count = records.len();

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, &buffer))
            .await
            .map_err(|e| RelayError::Internal(format!("compaction task failed: {}", e)))??;

        // The old append handle points at the replaced inode.
        state.file = None;
        info!(path = %self.path.display(), records = count, "Compacted checkpoint");
        Ok(count)
    }

    async fn append_handle(path: &Path) -> Result<File> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(persistence("create checkpoint directory"))?;
            }
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(persistence("open checkpoint for append"))
    }
}

#[async_trait]
impl CheckpointStore for JsonlCheckpointStore {
    async fn load(&self) -> Result<Vec<CheckpointRecord>> {
        Ok(self.state.lock().await.index.values().cloned().collect())
    }

    async fn get(&self, key: &str) -> Option<CheckpointRecord> {
        self.state.lock().await.index.get(key).cloned()
    }

    async fn put(&self, record: CheckpointRecord) -> Result<()> {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut state = self.state.lock().await;
        if let Some(reason) = &state.failed {
            return Err(RelayError::Persistence(format!(
                "checkpoint {} is no longer writable: {}",
                self.path.display(),
                reason
            )));
        }
        if state.file.is_none() {
            state.file = Some(Self::append_handle(&self.path).await?);
        }
        if let Some(file) = state.file.as_mut() {
            if let Err((err, before)) = append_line(file, &line).await {
                // a partial line must not be followed by later appends
                if let Some(len) = before {
                    let rollback = async {
                        file.set_len(len).await?;
                        file.sync_all().await
                    }
                    .await;
                    if let Err(rollback_err) = rollback {
                        warn!(error = %rollback_err, "Could not roll back partial checkpoint record");
                        state.failed = Some(err.to_string());
                    }
                }
                state.file = None;
                return Err(err);
            }
        }
        debug!(key = %record.key, status = ?record.status, "Checkpoint record written");
        state.index.insert(record.key.clone(), record);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(file) = state.file.as_mut() {
            file.flush().await.map_err(persistence("flush checkpoint"))?;
            file.sync_all().await.map_err(persistence("sync checkpoint"))?;
        }
        Ok(())
    }

    async fn len(&self) -> usize {
        self.state.lock().await.index.len()
    }
}

/// Append one line and sync it. On failure returns the error together with
/// the file length before the write, when it could be read.
async fn append_line(file: &mut File, line: &[u8]) -> std::result::Result<(), (RelayError, Option<u64>)> {
    let before = match file.metadata().await {
        Ok(meta) => meta.len(),
        Err(e) => return Err((persistence("stat checkpoint")(e), None)),
    };
    let written = async {
        file.write_all(line).await.map_err(persistence("append checkpoint record"))?;
        file.flush().await.map_err(persistence("flush checkpoint"))?;
        file.sync_data().await.map_err(persistence("sync checkpoint"))
    }
    .await;
    written.map_err(|e| (e, Some(before)))
}

/// Records keyed by unit key, plus the byte length of the intact prefix when
/// the file ends in a torn record.
///
/// Works on bytes: a tail torn inside a multi-byte character is still just a
/// torn tail.
async fn read_records(path: &Path) -> Result<(HashMap<String, CheckpointRecord>, Option<u64>)> {
    let content = match tokio::fs::read(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((HashMap::new(), None)),
        Err(e) => {
            return Err(RelayError::Persistence(format!(
                "read checkpoint {}: {}",
                path.display(),
                e
            )))
        }
    };

    let mut index = HashMap::new();
    let mut offset = 0u64;
    for (n, raw) in content.split_inclusive(|b| *b == b'\n').enumerate() {
        let start = offset;
        offset += raw.len() as u64;

        if raw.last() != Some(&b'\n') {
            // only the final segment can lack a newline
            warn!(line = n + 1, bytes = raw.len(), "Ignoring incomplete trailing checkpoint record");
            return Ok((index, Some(start)));
        }
        let line = raw.trim_ascii();
        if line.is_empty() {
            continue;
        }
        let record: CheckpointRecord = serde_json::from_slice(line).map_err(|e| {
            RelayError::Persistence(format!(
                "corrupt checkpoint {} at line {}: {}",
                path.display(),
                n + 1,
                e
            ))
        })?;
        index.insert(record.key.clone(), record);
    }
    Ok((index, None))
}

/// Cut a torn trailing record so later appends start on a fresh line.
async fn truncate_torn_tail(path: &Path, len: u64) -> Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .map_err(persistence("open checkpoint for repair"))?;
    file.set_len(len).await.map_err(persistence("truncate checkpoint"))?;
    file.sync_all().await.map_err(persistence("sync checkpoint"))?;
    Ok(())
}

fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(persistence("create checkpoint directory"))?;
    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(persistence("create temp file"))?;
    tmp.write_all(contents).map_err(persistence("write temp file"))?;
    tmp.as_file().sync_all().map_err(persistence("sync temp file"))?;
    tmp.persist(path)
        .map_err(|e| RelayError::Persistence(format!("replace {}: {}", path.display(), e.error)))?;
    Ok(())
}

fn persistence(action: &'static str) -> impl Fn(std::io::Error) -> RelayError {
    move |e| RelayError::Persistence(format!("{}: {}", action, e))
}
