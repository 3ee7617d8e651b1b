//! In-memory audit trail of one pipeline run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::RunIdentity;
use crate::core::{RunState, StageKind, StageOutcome};
use crate::errors::RecordError;
use crate::utils::elapsed_ms;

/// One attempt of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// The 1-based attempt number.
    pub attempt: u32,
    /// When the attempt started.
    pub started_at: DateTime<Utc>,
    /// When the attempt returned.
    pub ended_at: DateTime<Utc>,
    /// What the attempt returned.
    pub outcome: StageOutcome,
}

impl AttemptRecord {
    /// Duration of the attempt in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> f64 {
        elapsed_ms(self.started_at, self.ended_at)
    }
}

/// A stage's final outcome and attempt history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageEntry {
    /// Stage name.
    pub stage: String,
    /// Stage kind.
    pub kind: StageKind,
    /// Final outcome, set once the stage is done.
    pub outcome: Option<StageOutcome>,
    /// Every attempt, in order.
    #[serde(default)]
    pub attempts: Vec<AttemptRecord>,
}

impl StageEntry {
    /// Creates an open entry.
    #[must_use]
    pub fn new(stage: impl Into<String>, kind: StageKind) -> Self {
        Self {
            stage: stage.into(),
            kind,
            outcome: None,
            attempts: Vec::new(),
        }
    }

    /// Number of attempts made.
    #[must_use]
    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    /// Returns true once the final outcome is set.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.outcome.is_some()
    }
}

/// The audit trail of one run.
///
/// Mutated only by the runner while the run is in flight. Once
/// [`RunRecord::finalize`] succeeds every mutator returns
/// [`RecordError::Finalized`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// The run ID.
    pub run_id: Uuid,
    /// The pipeline name.
    pub pipeline: String,
    /// What started the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    /// When the run was created.
    pub started_at: DateTime<Utc>,
    /// When the run was finalized.
    pub ended_at: Option<DateTime<Utc>>,
    /// Lifecycle state.
    pub state: RunState,
    /// Stage entries, in execution order.
    pub entries: Vec<StageEntry>,
}

impl RunRecord {
    /// Creates a pending record for a run.
    #[must_use]
    pub fn new(identity: &RunIdentity) -> Self {
        Self {
            run_id: identity.run_id,
            pipeline: identity.pipeline.clone(),
            trigger: identity.trigger.clone(),
            started_at: identity.started_at,
            ended_at: None,
            state: RunState::Pending,
            entries: Vec::new(),
        }
    }

    fn ensure_mutable(&self) -> Result<(), RecordError> {
        if self.state.is_terminal() {
            return Err(RecordError::Finalized {
                run_id: self.run_id,
                state: self.state,
            });
        }
        Ok(())
    }

    fn transition(&mut self, to: RunState) -> Result<(), RecordError> {
        self.ensure_mutable()?;
        if !self.state.can_transition_to(to) {
            return Err(RecordError::InvalidTransition {
                run_id: self.run_id,
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Moves the run from `Pending` to `Running`.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Finalized`] once the record is frozen, or
    /// [`RecordError::InvalidTransition`] if the run is not `Pending`.
    pub fn start(&mut self) -> Result<(), RecordError> {
        self.transition(RunState::Running)
    }

    /// Opens an entry for a stage.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Finalized`] once the record is frozen.
    pub fn begin_stage(&mut self, stage: impl Into<String>, kind: StageKind) -> Result<(), RecordError> {
        self.ensure_mutable()?;
        self.entries.push(StageEntry::new(stage, kind));
        Ok(())
    }

    fn open_entry(&mut self, stage: &str) -> Result<&mut StageEntry, RecordError> {
        let run_id = self.run_id;
        match self.entries.last_mut() {
            Some(entry) if !entry.is_closed() && entry.stage == stage => Ok(entry),
            _ => Err(RecordError::NoOpenStage {
                run_id,
                stage: stage.to_string(),
            }),
        }
    }

    /// Appends an attempt to the open entry of `stage`.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Finalized`] once the record is frozen, or
    /// [`RecordError::NoOpenStage`] if the last entry is not an open entry
    /// for `stage`.
    pub fn record_attempt(&mut self, stage: &str, attempt: AttemptRecord) -> Result<(), RecordError> {
        self.ensure_mutable()?;
        self.open_entry(stage)?.attempts.push(attempt);
        Ok(())
    }

    /// Sets the final outcome of the open entry of `stage`.
    ///
    /// # Errors
    ///
    /// Same as [`record_attempt`](Self::record_attempt).
    pub fn complete_stage(&mut self, stage: &str, outcome: StageOutcome) -> Result<(), RecordError> {
        self.ensure_mutable()?;
        self.open_entry(stage)?.outcome = Some(outcome);
        Ok(())
    }

    /// Moves the run to a terminal state and freezes the record.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Finalized`] if the record is already frozen,
    /// or [`RecordError::InvalidTransition`] if `state` is not terminal or
    /// not reachable from the current state.
    pub fn finalize(&mut self, state: RunState) -> Result<(), RecordError> {
        if !state.is_terminal() {
            self.ensure_mutable()?;
            return Err(RecordError::InvalidTransition {
                run_id: self.run_id,
                from: self.state,
                to: state,
            });
        }
        self.transition(state)?;
        self.ended_at = Some(Utc::now());
        Ok(())
    }

    /// Returns true once the record is frozen.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.state.is_terminal()
    }

    /// Returns the last entry, which names the failing stage of an aborted run.
    #[must_use]
    pub fn last_entry(&self) -> Option<&StageEntry> {
        self.entries.last()
    }

    /// Returns the entry for a stage name.
    #[must_use]
    pub fn entry(&self, stage: &str) -> Option<&StageEntry> {
        self.entries.iter().find(|e| e.stage == stage)
    }

    /// Returns the entry for a stage kind.
    #[must_use]
    pub fn entry_for(&self, kind: StageKind) -> Option<&StageEntry> {
        self.entries.iter().find(|e| e.kind == kind)
    }

    /// Wall time of the run in milliseconds, if finalized.
    #[must_use]
    pub fn duration_ms(&self) -> Option<f64> {
        self.ended_at.map(|end| elapsed_ms(self.started_at, end))
    }
}
