//! Stage kind, idempotency class and run state enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The four stages of the chain, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Pull source records into object storage.
    Extract,
    /// Normalize and partition raw snapshots into a columnar layout.
    Transform,
    /// Create destination tables if they do not exist.
    ProvisionSchema,
    /// Bulk-copy the columnar output into the fact table.
    Load,
}

impl StageKind {
    /// Every kind, in chain order.
    pub const CHAIN: [Self; 4] = [
        Self::Extract,
        Self::Transform,
        Self::ProvisionSchema,
        Self::Load,
    ];

    /// Zero-based position of this kind in the chain.
    #[must_use]
    pub fn ordinal(self) -> usize {
        match self {
            Self::Extract => 0,
            Self::Transform => 1,
            Self::ProvisionSchema => 2,
            Self::Load => 3,
        }
    }

    /// Idempotency class the built-in stage of this kind declares.
    #[must_use]
    pub fn default_idempotency(self) -> IdempotencyClass {
        match self {
            Self::Load => IdempotencyClass::AppendOnly,
            Self::Extract | Self::Transform | Self::ProvisionSchema => {
                IdempotencyClass::OverwriteSafe
            }
        }
    }

    /// Upstream kinds whose artifacts the built-in stage consumes, in order.
    #[must_use]
    pub fn default_upstream(self) -> &'static [Self] {
        match self {
            Self::Extract => &[],
            Self::Transform => &[Self::Extract],
            Self::ProvisionSchema => &[Self::Transform],
            Self::Load => &[Self::Transform, Self::ProvisionSchema],
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Extract => write!(f, "extract"),
            Self::Transform => write!(f, "transform"),
            Self::ProvisionSchema => write!(f, "provision_schema"),
            Self::Load => write!(f, "load"),
        }
    }
}

/// Whether re-executing a stage with the same input is always safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdempotencyClass {
    /// Re-execution converges to the same external state.
    OverwriteSafe,
    /// Re-execution may duplicate committed rows.
    AppendOnly,
}

impl fmt::Display for IdempotencyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OverwriteSafe => write!(f, "overwrite-safe"),
            Self::AppendOnly => write!(f, "append-only"),
        }
    }
}

/// Lifecycle state of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Created, not yet started.
    #[default]
    Pending,
    /// Executing the chain.
    Running,
    /// Every stage reached `Success`.
    Completed,
    /// A stage failed terminally or the run was cancelled.
    Aborted,
}

impl RunState {
    /// Returns true if the state is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    /// Returns true if `next` is a legal successor of this state.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Aborted)
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_order_matches_ordinals() {
        for (idx, kind) in StageKind::CHAIN.iter().enumerate() {
            assert_eq!(kind.ordinal(), idx);
        }
    }

    #[test]
    fn test_upstream_only_points_backwards() {
        for kind in StageKind::CHAIN {
            for upstream in kind.default_upstream() {
                assert!(upstream.ordinal() < kind.ordinal());
            }
        }
    }

    #[test]
    fn test_only_load_is_append_only() {
        assert_eq!(StageKind::Load.default_idempotency(), IdempotencyClass::AppendOnly);
        assert_eq!(
            StageKind::ProvisionSchema.default_idempotency(),
            IdempotencyClass::OverwriteSafe
        );
    }

    #[test]
    fn test_run_state_transitions() {
        assert!(RunState::Pending.can_transition_to(RunState::Running));
        assert!(RunState::Running.can_transition_to(RunState::Aborted));
        assert!(!RunState::Pending.can_transition_to(RunState::Completed));
        assert!(!RunState::Completed.can_transition_to(RunState::Running));
        assert!(RunState::Aborted.is_terminal());
        assert!(!RunState::Running.is_terminal());
    }

    #[test]
    fn test_serialize_forms() {
        assert_eq!(
            serde_json::to_string(&StageKind::ProvisionSchema).unwrap(),
            r#""provision_schema""#
        );
        assert_eq!(
            serde_json::to_string(&IdempotencyClass::AppendOnly).unwrap(),
            r#""append-only""#
        );
        assert_eq!(StageKind::Load.to_string(), "load");
    }
}
