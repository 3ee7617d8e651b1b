//! Collaborator ports: the narrow interfaces stages use to reach external systems.
//!
//! Each stage talks to exactly one external system through one of these
//! traits. Adapters live in [`crate::adapters`]; vendor bindings implement
//! the same traits outside this crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::core::{FailureCause, StageOutcome};

/// Category of a collaborator failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaboratorErrorKind {
    /// Network failure, timeout, or unavailable service.
    Transient,
    /// Rate limit or quota exhaustion.
    Throttled,
    /// Data does not match the expected schema.
    SchemaMismatch,
    /// Input could not be parsed.
    MalformedInput,
    /// Credentials were rejected.
    Unauthorized,
    /// A referenced object or table does not exist.
    NotFound,
}

impl CollaboratorErrorKind {
    /// Returns true if another attempt may succeed.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Transient | Self::Throttled)
    }
}

impl fmt::Display for CollaboratorErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transient => "transient",
            Self::Throttled => "throttled",
            Self::SchemaMismatch => "schema_mismatch",
            Self::MalformedInput => "malformed_input",
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not_found",
        };
        write!(f, "{s}")
    }
}

/// An error reported by an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct CollaboratorError {
    /// The failure category.
    pub kind: CollaboratorErrorKind,
    /// Detail from the collaborator.
    pub message: String,
}

impl CollaboratorError {
    /// Creates a new collaborator error.
    #[must_use]
    pub fn new(kind: CollaboratorErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates a transient error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(CollaboratorErrorKind::Transient, message)
    }

    /// Creates a throttled error.
    #[must_use]
    pub fn throttled(message: impl Into<String>) -> Self {
        Self::new(CollaboratorErrorKind::Throttled, message)
    }

    /// Creates a schema mismatch error.
    #[must_use]
    pub fn schema_mismatch(message: impl Into<String>) -> Self {
        Self::new(CollaboratorErrorKind::SchemaMismatch, message)
    }

    /// Creates a malformed input error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(CollaboratorErrorKind::MalformedInput, message)
    }

    /// Creates an unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(CollaboratorErrorKind::Unauthorized, message)
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(CollaboratorErrorKind::NotFound, message)
    }

    /// Maps the error to a classified failure cause.
    #[must_use]
    pub fn to_cause(&self, context: &str) -> FailureCause {
        let message = format!("{context}: {self}");
        if self.kind.is_transient() {
            FailureCause::transient(message)
        } else {
            FailureCause::data_contract(message)
        }
    }

    /// Maps the error to the outcome of the given attempt.
    #[must_use]
    pub fn into_outcome(self, context: &str, attempt: u32) -> StageOutcome {
        StageOutcome::from_cause(self.to_cause(context), attempt)
    }
}

impl From<std::io::Error> for CollaboratorError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        let kind = match err.kind() {
            ErrorKind::NotFound => CollaboratorErrorKind::NotFound,
            ErrorKind::PermissionDenied => CollaboratorErrorKind::Unauthorized,
            ErrorKind::InvalidData | ErrorKind::InvalidInput => {
                CollaboratorErrorKind::MalformedInput
            }
            _ => CollaboratorErrorKind::Transient,
        };
        Self::new(kind, err.to_string())
    }
}

/// Result alias for collaborator calls.
pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

/// Durable object storage.
///
/// Locations returned by `put` and `list` are the object keys themselves.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Writes an object, replacing any existing object with the same name.
    async fn put(&self, name: &str, bytes: Vec<u8>) -> CollaboratorResult<String>;

    /// Reads an object.
    async fn get(&self, location: &str) -> CollaboratorResult<Vec<u8>>;

    /// Lists object locations under a prefix, in lexical order.
    async fn list(&self, prefix: &str) -> CollaboratorResult<Vec<String>>;

    /// Removes every object under a prefix, returning how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> CollaboratorResult<usize>;
}

/// Columnar output format of a compute job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Apache Parquet.
    #[default]
    Parquet,
    /// Delimited text, used by the local engine.
    Csv,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parquet => write!(f, "parquet"),
            Self::Csv => write!(f, "csv"),
        }
    }
}

/// How a compute job treats existing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Replace everything under the output location.
    #[default]
    Overwrite,
}

/// A job submitted to the compute engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Application name reported to the engine.
    pub app_name: String,
    /// Raw input locations, in order.
    pub inputs: Vec<String>,
    /// Where the columnar output is written.
    pub output_location: String,
    /// Output format.
    pub output_format: OutputFormat,
    /// Write mode.
    pub write_mode: WriteMode,
    /// Business date column that `year` and `month` derive from.
    pub date_column: String,
    /// Value of the derived `processed_date` column (`YYYY-MM-DD`).
    pub processed_date: String,
    /// Partition columns, in order.
    pub partition_by: Vec<String>,
    /// Engine settings such as driver and executor memory.
    #[serde(default)]
    pub engine_conf: BTreeMap<String, String>,
}

/// Result of a finished compute job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    /// Where the output was written.
    pub output_location: String,
    /// Rows written.
    pub rows_written: u64,
    /// Distinct partitions written.
    pub partitions_written: u64,
}

/// Distributed compute submission.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ComputeEngine: Send + Sync {
    /// Submits a job and waits for it to finish.
    async fn submit(&self, job: &JobSpec) -> CollaboratorResult<JobResult>;
}

/// What a bulk load does with records it cannot parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnErrorPolicy {
    /// Skip malformed records and keep loading.
    #[default]
    Continue,
    /// Skip any file containing a malformed record.
    SkipFile,
    /// Fail the whole statement on the first malformed record.
    AbortStatement,
}

impl fmt::Display for OnErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => write!(f, "CONTINUE"),
            Self::SkipFile => write!(f, "SKIP_FILE"),
            Self::AbortStatement => write!(f, "ABORT_STATEMENT"),
        }
    }
}

/// A bulk load request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkLoadRequest {
    /// Columnar output location to copy from.
    pub source_location: String,
    /// Destination table (may be qualified).
    pub target_table: String,
    /// Malformed record handling.
    pub on_error: OnErrorPolicy,
    /// Stable key identifying this logical load.
    pub load_key: String,
}

/// Row counts reported by a bulk load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LoadSummary {
    /// Rows committed to the table.
    pub rows_loaded: u64,
    /// Rows skipped under the on-error policy.
    pub rows_skipped: u64,
}

/// Whether a load with a given key committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadCommitState {
    /// Rows from the load are in the table.
    Committed,
    /// No rows from the load are in the table.
    NotCommitted,
    /// The warehouse cannot tell.
    Unknown,
}

/// Analytical warehouse.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Executes a DDL statement.
    async fn execute_ddl(&self, statement: &str) -> CollaboratorResult<()>;

    /// Bulk-copies columnar output into a table.
    async fn bulk_load(&self, request: &BulkLoadRequest) -> CollaboratorResult<LoadSummary>;

    /// Reports whether a load with `load_key` committed into `target_table`.
    async fn load_state(
        &self,
        _target_table: &str,
        _load_key: &str,
    ) -> CollaboratorResult<LoadCommitState> {
        Ok(LoadCommitState::Unknown)
    }
}

/// An operational data source read by Extract.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Name used in snapshot object names.
    fn name(&self) -> &str;

    /// Reads the full current contents of the source.
    async fn read(&self) -> CollaboratorResult<Vec<u8>>;
}
