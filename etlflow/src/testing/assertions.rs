//! Assertions over finished run records.

use crate::core::{CauseKind, RunState, StageKind, StageOutcome};
use crate::record::RunRecord;

/// Asserts the run completed with every stage successful.
pub fn assert_run_completed(record: &RunRecord) {
    assert_eq!(
        record.state,
        RunState::Completed,
        "Expected completed run, last entry: {:?}",
        record.last_entry()
    );
    assert_eq!(record.entries.len(), StageKind::CHAIN.len());
    for entry in &record.entries {
        assert!(
            entry.outcome.as_ref().is_some_and(StageOutcome::is_success),
            "Stage '{}' did not succeed: {:?}",
            entry.stage,
            entry.outcome
        );
    }
}

/// Asserts the run aborted at `kind` with a cause of `cause`, and that
/// no later stage has an entry.
pub fn assert_run_aborted_at(record: &RunRecord, kind: StageKind, cause: CauseKind) {
    assert_eq!(record.state, RunState::Aborted, "Expected aborted run");
    let last = record.last_entry().expect("aborted run has entries");
    assert_eq!(last.kind, kind, "Run aborted at '{}'", last.stage);
    let actual = last
        .outcome
        .as_ref()
        .and_then(StageOutcome::cause)
        .map(|c| c.kind);
    assert_eq!(actual, Some(cause), "Unexpected cause for '{}'", last.stage);
    assert!(
        record.entries.iter().all(|e| e.kind.ordinal() <= kind.ordinal()),
        "Stages after {kind} have entries"
    );
}

/// Asserts the number of attempts recorded for a stage.
pub fn assert_stage_attempts(record: &RunRecord, kind: StageKind, expected: usize) {
    let entry = record
        .entry_for(kind)
        .unwrap_or_else(|| panic!("No entry for {kind}"));
    assert_eq!(
        entry.attempts.len(),
        expected,
        "Unexpected attempt count for '{}'",
        entry.stage
    );
    for (idx, attempt) in entry.attempts.iter().enumerate() {
        assert_eq!(attempt.attempt as usize, idx + 1, "Attempts out of order");
    }
}
