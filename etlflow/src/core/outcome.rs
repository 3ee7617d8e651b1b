//! Stage outcome type and failure causes.
//!
//! Stages never raise: every attempt ends in exactly one [`StageOutcome`],
//! and the Retryable/Fatal split is carried by the variant tag.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::Artifact;

/// Named counters reported by a successful stage (e.g. `rows_loaded`).
pub type StageMetrics = BTreeMap<String, u64>;

/// Why a stage attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CauseKind {
    /// Network, throttling, quota or resource contention.
    TransientInfrastructure,
    /// Schema mismatch, malformed input, authorization failure.
    DataContractViolation,
    /// An append-only stage cannot prove its prior attempt did not commit.
    PartialCommitAmbiguity,
    /// The run was cancelled before the stage could finish.
    Cancelled,
}

impl CauseKind {
    /// Maps a cause to whether another attempt may help.
    #[must_use]
    pub fn classification(self) -> Classification {
        match self {
            Self::TransientInfrastructure => Classification::Retryable,
            Self::DataContractViolation | Self::PartialCommitAmbiguity | Self::Cancelled => {
                Classification::Fatal
            }
        }
    }
}

impl fmt::Display for CauseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransientInfrastructure => write!(f, "transient_infrastructure"),
            Self::DataContractViolation => write!(f, "data_contract_violation"),
            Self::PartialCommitAmbiguity => write!(f, "partial_commit_ambiguity"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Retryable or Fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Another attempt may succeed.
    Retryable,
    /// Another attempt cannot succeed or is unsafe.
    Fatal,
}

/// A classified failure cause with a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCause {
    /// The cause category.
    pub kind: CauseKind,
    /// Detail for operators.
    pub message: String,
}

impl FailureCause {
    /// Creates a new failure cause.
    #[must_use]
    pub fn new(kind: CauseKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates a transient infrastructure cause.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(CauseKind::TransientInfrastructure, message)
    }

    /// Creates a data contract violation cause.
    #[must_use]
    pub fn data_contract(message: impl Into<String>) -> Self {
        Self::new(CauseKind::DataContractViolation, message)
    }

    /// Creates a partial commit ambiguity cause.
    #[must_use]
    pub fn partial_commit(message: impl Into<String>) -> Self {
        Self::new(CauseKind::PartialCommitAmbiguity, message)
    }

    /// Creates a cancellation cause.
    #[must_use]
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(CauseKind::Cancelled, message)
    }

    /// Classification of this cause.
    #[must_use]
    pub fn classification(&self) -> Classification {
        self.kind.classification()
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// The outcome of one stage attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome {
    /// The stage produced a valid artifact.
    Success {
        /// The produced artifact.
        artifact: Artifact,
        /// Counters describing the work done.
        #[serde(default)]
        metrics: StageMetrics,
    },
    /// The attempt failed for a transient reason.
    RetryableFailure {
        /// What went wrong.
        cause: FailureCause,
        /// The 1-based attempt that produced this outcome.
        attempt_count: u32,
    },
    /// The attempt failed and must not be retried.
    FatalFailure {
        /// What went wrong.
        cause: FailureCause,
    },
}

impl StageOutcome {
    /// Creates a success outcome with no metrics.
    #[must_use]
    pub fn success(artifact: Artifact) -> Self {
        Self::Success {
            artifact,
            metrics: StageMetrics::new(),
        }
    }

    /// Creates a success outcome with metrics.
    #[must_use]
    pub fn success_with_metrics(
        artifact: Artifact,
        metrics: impl IntoIterator<Item = (impl Into<String>, u64)>,
    ) -> Self {
        Self::Success {
            artifact,
            metrics: metrics.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Creates a retryable failure.
    #[must_use]
    pub fn retryable(cause: FailureCause, attempt_count: u32) -> Self {
        Self::RetryableFailure {
            cause,
            attempt_count,
        }
    }

    /// Creates a fatal failure.
    #[must_use]
    pub fn fatal(cause: FailureCause) -> Self {
        Self::FatalFailure { cause }
    }

    /// Builds the failure variant the cause's classification calls for.
    #[must_use]
    pub fn from_cause(cause: FailureCause, attempt_count: u32) -> Self {
        match cause.classification() {
            Classification::Retryable => Self::retryable(cause, attempt_count),
            Classification::Fatal => Self::fatal(cause),
        }
    }

    /// Returns true for `Success`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Returns true for `RetryableFailure`.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RetryableFailure { .. })
    }

    /// Returns true for `FatalFailure`.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalFailure { .. })
    }

    /// The artifact, for `Success`.
    #[must_use]
    pub fn artifact(&self) -> Option<&Artifact> {
        match self {
            Self::Success { artifact, .. } => Some(artifact),
            _ => None,
        }
    }

    /// A metric by name, for `Success`.
    #[must_use]
    pub fn metric(&self, name: &str) -> Option<u64> {
        match self {
            Self::Success { metrics, .. } => metrics.get(name).copied(),
            _ => None,
        }
    }

    /// The failure cause, for either failure variant.
    #[must_use]
    pub fn cause(&self) -> Option<&FailureCause> {
        match self {
            Self::Success { .. } => None,
            Self::RetryableFailure { cause, .. } | Self::FatalFailure { cause } => Some(cause),
        }
    }

    /// Overwrites the attempt count of a retryable failure.
    #[must_use]
    pub fn with_attempt(self, attempt: u32) -> Self {
        match self {
            Self::RetryableFailure { cause, .. } => Self::RetryableFailure {
                cause,
                attempt_count: attempt,
            },
            other => other,
        }
    }

    /// Short label for logs and events.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::RetryableFailure { .. } => "retryable_failure",
            Self::FatalFailure { .. } => "fatal_failure",
        }
    }
}
