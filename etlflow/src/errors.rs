//! Error types for the etlflow runner.
//!
//! Stage failures are not errors: they travel as
//! [`StageOutcome`](crate::core::StageOutcome) values. The types here cover
//! everything that prevents a run from being executed or recorded at all.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::core::RunState;

/// The main error type for etlflow operations.
#[derive(Debug, Error)]
pub enum EtlflowError {
    /// The stage chain handed to the runner is malformed.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// Configuration could not be loaded or is invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A run record rejected a mutation.
    #[error("{0}")]
    Record(#[from] RecordError),

    /// The run record store failed.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// Another run of the same pipeline holds the run lock.
    #[error("Pipeline '{pipeline}' already has a run in progress")]
    RunLocked {
        /// The pipeline name the lock is keyed by.
        pipeline: String,
    },

    /// A runner invariant was violated.
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EtlflowError {
    /// Creates a run-locked error.
    #[must_use]
    pub fn run_locked(pipeline: impl Into<String>) -> Self {
        Self::RunLocked {
            pipeline: pipeline.into(),
        }
    }
}

/// Metadata about a chain validation error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "CHAIN-002-ORDER").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when the stage chain fails validation.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config '{path}': {source}")]
    Read {
        /// The path that was read.
        path: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration text is not valid TOML for the schema.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A field holds an invalid value.
    #[error("Invalid config field '{field}': {reason}")]
    Invalid {
        /// Dotted path of the field.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },
}

impl ConfigError {
    /// Creates an invalid-field error.
    #[must_use]
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised when mutating a [`RunRecord`](crate::record::RunRecord).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// The record was already finalized.
    #[error("Run {run_id} is finalized as {state}; record is immutable")]
    Finalized {
        /// The run ID.
        run_id: Uuid,
        /// The terminal state it was finalized with.
        state: RunState,
    },

    /// The requested transition is not allowed from the current state.
    #[error("Run {run_id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// The run ID.
        run_id: Uuid,
        /// Current state.
        from: RunState,
        /// Requested state.
        to: RunState,
    },

    /// An attempt was recorded with no open stage entry.
    #[error("Run {run_id} has no open stage entry for '{stage}'")]
    NoOpenStage {
        /// The run ID.
        run_id: Uuid,
        /// The stage the attempt was for.
        stage: String,
    },
}

/// Errors raised by a [`RunRecordStore`](crate::record::RunRecordStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store rejected the write.
    #[error("Run {run_id} is already finalized in the store")]
    AlreadyFinalized {
        /// The run ID.
        run_id: Uuid,
    },

    /// The terminal state passed to finalize is not terminal.
    #[error("Cannot finalize run {run_id} as non-terminal state {state}")]
    NotTerminal {
        /// The run ID.
        run_id: Uuid,
        /// The offending state.
        state: RunState,
    },

    /// Underlying file IO failed.
    #[error("Store IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored line could not be encoded or decoded.
    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
