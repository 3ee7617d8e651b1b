//! Durable storage for run records.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{RunRecord, StageEntry};
use crate::core::RunState;
use crate::errors::StoreError;

/// A run as the store knows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRun {
    /// The run ID.
    pub run_id: Uuid,
    /// Appended stage entries, in order.
    pub entries: Vec<StageEntry>,
    /// Terminal state, once finalized.
    pub state: Option<RunState>,
}

impl StoredRun {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            entries: Vec::new(),
            state: None,
        }
    }

    /// Returns true once the run was finalized.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.state.is_some()
    }

    fn append(&mut self, entry: &StageEntry) -> Result<(), StoreError> {
        if self.is_finalized() {
            return Err(StoreError::AlreadyFinalized { run_id: self.run_id });
        }
        self.entries.push(entry.clone());
        Ok(())
    }

    fn finalize(&mut self, state: RunState) -> Result<(), StoreError> {
        if !state.is_terminal() {
            return Err(StoreError::NotTerminal {
                run_id: self.run_id,
                state,
            });
        }
        if self.is_finalized() {
            return Err(StoreError::AlreadyFinalized { run_id: self.run_id });
        }
        self.state = Some(state);
        Ok(())
    }
}

/// Append-only store of run records.
///
/// Once a run is finalized the store rejects any further write for it.
#[async_trait]
pub trait RunRecordStore: Send + Sync {
    /// Appends a stage entry to a run.
    async fn append(&self, run_id: Uuid, entry: &StageEntry) -> Result<(), StoreError>;

    /// Marks a run terminal. No write for the run succeeds afterwards.
    async fn finalize(&self, run_id: Uuid, state: RunState) -> Result<(), StoreError>;

    /// Returns what the store holds for a run.
    async fn get(&self, run_id: Uuid) -> Result<Option<StoredRun>, StoreError>;

    /// Writes a finalized record: every entry, then the terminal state.
    async fn persist(&self, record: &RunRecord) -> Result<(), StoreError> {
        if !record.state.is_terminal() {
            return Err(StoreError::NotTerminal {
                run_id: record.run_id,
                state: record.state,
            });
        }
        for entry in &record.entries {
            self.append(record.run_id, entry).await?;
        }
        self.finalize(record.run_id, record.state).await
    }
}

/// Keeps run records in process memory.
#[derive(Debug, Default)]
pub struct InMemoryRunRecordStore {
    runs: RwLock<HashMap<Uuid, StoredRun>>,
}

impl InMemoryRunRecordStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of runs the store knows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.read().len()
    }

    /// Returns true if the store holds no runs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.read().is_empty()
    }
}

#[async_trait]
impl RunRecordStore for InMemoryRunRecordStore {
    async fn append(&self, run_id: Uuid, entry: &StageEntry) -> Result<(), StoreError> {
        self.runs
            .write()
            .entry(run_id)
            .or_insert_with(|| StoredRun::new(run_id))
            .append(entry)
    }

    async fn finalize(&self, run_id: Uuid, state: RunState) -> Result<(), StoreError> {
        self.runs
            .write()
            .entry(run_id)
            .or_insert_with(|| StoredRun::new(run_id))
            .finalize(state)
    }

    async fn get(&self, run_id: Uuid) -> Result<Option<StoredRun>, StoreError> {
        Ok(self.runs.read().get(&run_id).cloned())
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum StoreLine {
    Append { run_id: Uuid, entry: StageEntry },
    Finalize { run_id: Uuid, state: RunState },
}

/// Stores run records as JSON lines in a single file.
///
/// The file is replayed on open so finalized runs stay immutable across
/// restarts.
#[derive(Debug)]
pub struct JsonlRunRecordStore {
    path: PathBuf,
    index: RwLock<HashMap<Uuid, StoredRun>>,
    writer: tokio::sync::Mutex<()>,
}

impl JsonlRunRecordStore {
    /// Opens the store at `path`, creating parent directories if needed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut index: HashMap<Uuid, StoredRun> = HashMap::new();
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                for (lineno, line) in contents.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<StoreLine>(line)? {
                        StoreLine::Append { run_id, entry } => {
                            index
                                .entry(run_id)
                                .or_insert_with(|| StoredRun::new(run_id))
                                .entries
                                .push(entry);
                        }
                        StoreLine::Finalize { run_id, state } => {
                            let run = index.entry(run_id).or_insert_with(|| StoredRun::new(run_id));
                            if run.state.replace(state).is_some() {
                                warn!(run_id = %run_id, line = lineno + 1, "Duplicate finalize line in run store");
                            }
                        }
                    }
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        debug!(path = %path.display(), runs = index.len(), "Opened run record store");
        Ok(Self {
            path,
            index: RwLock::new(index),
            writer: tokio::sync::Mutex::new(()),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_line(&self, line: &StoreLine) -> Result<(), StoreError> {
        let mut encoded = serde_json::to_vec(line)?;
        encoded.push(b'\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&encoded).await?;
        file.flush().await?;
        Ok(())
    }

    fn check_writable(&self, run_id: Uuid) -> Result<(), StoreError> {
        match self.index.read().get(&run_id) {
            Some(run) if run.is_finalized() => Err(StoreError::AlreadyFinalized { run_id }),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl RunRecordStore for JsonlRunRecordStore {
    async fn append(&self, run_id: Uuid, entry: &StageEntry) -> Result<(), StoreError> {
        let _guard = self.writer.lock().await;
        self.check_writable(run_id)?;
        self.write_line(&StoreLine::Append {
            run_id,
            entry: entry.clone(),
        })
        .await?;
        self.index
            .write()
            .entry(run_id)
            .or_insert_with(|| StoredRun::new(run_id))
            .append(entry)
    }

    async fn finalize(&self, run_id: Uuid, state: RunState) -> Result<(), StoreError> {
        if !state.is_terminal() {
            return Err(StoreError::NotTerminal { run_id, state });
        }
        let _guard = self.writer.lock().await;
        self.check_writable(run_id)?;
        self.write_line(&StoreLine::Finalize { run_id, state }).await?;
        self.index
            .write()
            .entry(run_id)
            .or_insert_with(|| StoredRun::new(run_id))
            .finalize(state)
    }

    async fn get(&self, run_id: Uuid) -> Result<Option<StoredRun>, StoreError> {
        Ok(self.index.read().get(&run_id).cloned())
    }
}
