//! Per-attempt context handed to a stage.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use super::RunIdentity;
use crate::cancellation::CancellationToken;
use crate::core::StageKind;
use crate::utils::snapshot_stamp;

/// Context for a single stage attempt.
///
/// A fresh context is built for every attempt, so `attempt` and
/// `attempt_started_at` always describe the current try.
#[derive(Debug, Clone)]
pub struct StageContext {
    run: Arc<RunIdentity>,
    stage_name: String,
    kind: StageKind,
    attempt: u32,
    attempt_started_at: DateTime<Utc>,
    cancel: Arc<CancellationToken>,
}

impl StageContext {
    /// Creates a new stage context.
    #[must_use]
    pub fn new(
        run: Arc<RunIdentity>,
        stage_name: impl Into<String>,
        kind: StageKind,
        attempt: u32,
        cancel: Arc<CancellationToken>,
    ) -> Self {
        Self {
            run,
            stage_name: stage_name.into(),
            kind,
            attempt,
            attempt_started_at: Utc::now(),
            cancel,
        }
    }

    /// Creates a detached context, mainly for driving a stage directly.
    #[must_use]
    pub fn standalone(kind: StageKind) -> Self {
        Self::new(
            Arc::new(RunIdentity::new("standalone")),
            kind.to_string(),
            kind,
            1,
            Arc::new(CancellationToken::new()),
        )
    }

    /// Overrides the attempt start time.
    #[must_use]
    pub fn with_attempt_started_at(mut self, at: DateTime<Utc>) -> Self {
        self.attempt_started_at = at;
        self
    }

    /// Returns the run ID.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run.run_id
    }

    /// Returns the run identity.
    #[must_use]
    pub fn run(&self) -> &RunIdentity {
        &self.run
    }

    /// Returns the stage name.
    #[must_use]
    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    /// Returns the stage kind.
    #[must_use]
    pub fn kind(&self) -> StageKind {
        self.kind
    }

    /// Returns the 1-based attempt number.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns when this attempt started.
    #[must_use]
    pub fn attempt_started_at(&self) -> DateTime<Utc> {
        self.attempt_started_at
    }

    /// Timestamp suffix for objects written during this attempt.
    #[must_use]
    pub fn snapshot_stamp(&self) -> String {
        snapshot_stamp(self.attempt_started_at)
    }

    /// Returns the run's cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> &Arc<CancellationToken> {
        &self.cancel
    }

    /// Checks if the run is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_stage_context_accessors() {
        let run = Arc::new(RunIdentity::new("p"));
        let token = Arc::new(CancellationToken::new());
        let ctx = StageContext::new(run.clone(), "load", StageKind::Load, 2, token.clone());

        assert_eq!(ctx.run_id(), run.run_id);
        assert_eq!(ctx.stage_name(), "load");
        assert_eq!(ctx.kind(), StageKind::Load);
        assert_eq!(ctx.attempt(), 2);
        assert!(!ctx.is_cancelled());

        token.cancel("stop");
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_snapshot_stamp_uses_attempt_start() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let ctx = StageContext::standalone(StageKind::Extract).with_attempt_started_at(at);
        assert_eq!(ctx.snapshot_stamp(), "20240309_070501");
    }
}
