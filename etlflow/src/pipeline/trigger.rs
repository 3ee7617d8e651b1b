//! One-shot and interval triggers.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use super::PipelineRunner;
use crate::cancellation::CancellationToken;
use crate::config::ScheduleConfig;
use crate::context::RunIdentity;
use crate::core::RunState;
use crate::errors::EtlflowError;
use crate::record::RunRecord;

/// What starts runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// A single run.
    Once,
    /// A run every interval. Missed ticks are skipped, not caught up.
    Every(Duration),
}

impl Trigger {
    /// The configured cadence.
    #[must_use]
    pub fn from_schedule(schedule: &ScheduleConfig) -> Self {
        Self::Every(schedule.interval())
    }

    fn label(self) -> &'static str {
        match self {
            Self::Once => "once",
            Self::Every(_) => "schedule",
        }
    }
}

/// Tally of runs started by [`run_trigger`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerReport {
    /// Runs that completed.
    pub completed: usize,
    /// Runs that aborted.
    pub aborted: usize,
    /// Ticks skipped because a run was still holding the lock.
    pub skipped_locked: usize,
}

impl TriggerReport {
    fn count(&mut self, record: &RunRecord) {
        match record.state {
            RunState::Completed => self.completed += 1,
            _ => self.aborted += 1,
        }
    }
}

/// Maps a run result to a process exit status.
///
/// `0` completed, `1` aborted, `2` the run could not be started or recorded.
#[must_use]
pub fn exit_status(result: &Result<RunRecord, EtlflowError>) -> u8 {
    match result {
        Ok(record) if record.state == RunState::Completed => 0,
        Ok(_) => 1,
        Err(_) => 2,
    }
}

/// Starts runs according to `trigger` until it is exhausted or `cancel` fires.
///
/// Every tick starts a new run with a fresh run ID. A tick that finds the
/// run lock held is skipped.
///
/// # Errors
///
/// Returns the first error other than [`EtlflowError::RunLocked`]. For
/// [`Trigger::Once`], lock contention is an error too.
pub async fn run_trigger(
    runner: &PipelineRunner,
    trigger: Trigger,
    cancel: &Arc<CancellationToken>,
) -> Result<TriggerReport, EtlflowError> {
    let mut report = TriggerReport::default();
    let pipeline = runner.config().pipeline_name.clone();

    let interval = match trigger {
        Trigger::Once => {
            let identity = RunIdentity::new(pipeline).with_trigger(trigger.label());
            let record = runner.run_with_identity(identity, cancel).await?;
            report.count(&record);
            return Ok(report);
        }
        Trigger::Every(interval) => interval,
    };

    info!(pipeline = %pipeline, interval_secs = interval.as_secs(), "Schedule started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = cancel.cancelled() => break,
        }

        let identity = RunIdentity::new(pipeline.clone()).with_trigger(trigger.label());
        match runner.run_with_identity(identity, cancel).await {
            Ok(record) => report.count(&record),
            Err(EtlflowError::RunLocked { .. }) => {
                warn!(pipeline = %pipeline, "Previous run still in progress; skipping tick");
                report.skipped_locked += 1;
            }
            Err(err) => return Err(err),
        }

        if cancel.is_cancelled() {
            break;
        }
    }

    info!(
        pipeline = %pipeline,
        completed = report.completed,
        aborted = report.aborted,
        skipped = report.skipped_locked,
        "Schedule stopped"
    );
    Ok(report)
}
