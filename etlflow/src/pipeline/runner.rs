//! Sequential runner for the four-stage chain.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::{ChainEntry, GiveUpReason, InMemoryRunLock, RetryDecision, RetryPolicy, RunLock, StageChain};
use crate::cancellation::CancellationToken;
use crate::config::PipelineConfig;
use crate::context::{RunIdentity, StageContext};
use crate::core::{Artifact, FailureCause, IdempotencyClass, PipelineEvent, RunState, StageKind, StageOutcome};
use crate::errors::EtlflowError;
use crate::events::{EventSink, NoOpEventSink};
use crate::record::{AttemptRecord, InMemoryRunRecordStore, RunRecord, RunRecordStore};
use crate::stages::{Reconciliation, Stage};
use crate::utils::{elapsed_ms, now_utc};

/// Executes a validated [`StageChain`] one run at a time.
///
/// The runner owns every retry and abort decision. Stages only classify
/// their failures.
pub struct PipelineRunner {
    config: Arc<PipelineConfig>,
    chain: StageChain,
    store: Arc<dyn RunRecordStore>,
    events: Arc<dyn EventSink>,
    lock: Arc<dyn RunLock>,
}

impl std::fmt::Debug for PipelineRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRunner")
            .field("pipeline", &self.config.pipeline_name)
            .field("chain", &self.chain)
            .field("lock", &self.lock)
            .finish_non_exhaustive()
    }
}

impl PipelineRunner {
    /// Creates a runner with an in-memory record store, no event sink and
    /// a process-local run lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not validate.
    pub fn new(config: impl Into<Arc<PipelineConfig>>, chain: StageChain) -> Result<Self, EtlflowError> {
        let config = config.into();
        config.validate()?;
        Ok(Self {
            config,
            chain,
            store: Arc::new(InMemoryRunRecordStore::new()),
            events: Arc::new(NoOpEventSink),
            lock: Arc::new(InMemoryRunLock::new()),
        })
    }

    /// Sets the record store.
    #[must_use]
    pub fn with_record_store(mut self, store: Arc<dyn RunRecordStore>) -> Self {
        self.store = store;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the run lock. Runners sharing a lock exclude each other.
    #[must_use]
    pub fn with_run_lock(mut self, lock: Arc<dyn RunLock>) -> Self {
        self.lock = lock;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Returns the chain.
    #[must_use]
    pub fn chain(&self) -> &StageChain {
        &self.chain
    }

    /// Returns the record store.
    #[must_use]
    pub fn record_store(&self) -> &Arc<dyn RunRecordStore> {
        &self.store
    }

    /// Effective retry policy of a chain entry.
    ///
    /// Append-only stages get a single attempt unless the configuration
    /// opts into reconciled retries.
    #[must_use]
    pub fn policy_for(&self, entry: &ChainEntry) -> RetryPolicy {
        let policy = entry.policy.unwrap_or_else(|| self.config.retry_policy());
        if entry.stage.idempotency() == IdempotencyClass::AppendOnly && !self.config.load.reconciled_retries {
            return policy.with_max_attempts(1);
        }
        policy
    }

    /// Starts a new run with a fresh run ID.
    ///
    /// # Errors
    ///
    /// Returns [`EtlflowError::RunLocked`] without starting if another run
    /// of the pipeline holds the lock, or an error if the record could not
    /// be kept or stored. Stage failures are not errors: they end the run
    /// as [`RunState::Aborted`].
    pub async fn run(&self, cancel: &Arc<CancellationToken>) -> Result<RunRecord, EtlflowError> {
        self.run_with_identity(RunIdentity::new(self.config.pipeline_name.clone()), cancel)
            .await
    }

    /// Starts a run with a caller-supplied identity.
    ///
    /// # Errors
    ///
    /// See [`PipelineRunner::run`].
    pub async fn run_with_identity(
        &self,
        identity: RunIdentity,
        cancel: &Arc<CancellationToken>,
    ) -> Result<RunRecord, EtlflowError> {
        let Some(_guard) = self.lock.try_acquire(&self.config.pipeline_name) else {
            warn!(pipeline = %self.config.pipeline_name, "Run lock held; not starting");
            return Err(EtlflowError::run_locked(self.config.pipeline_name.clone()));
        };

        let identity = Arc::new(identity);
        let mut record = RunRecord::new(&identity);
        record.start()?;

        let span = info_span!("run", run_id = %identity.run_id, pipeline = %identity.pipeline);
        async {
            info!("Run started");
            self.events
                .emit(&PipelineEvent::run_started(identity.run_id, &identity.pipeline))
                .await;

            let state = match self.execute_chain(&identity, &mut record, cancel).await {
                Ok(state) => state,
                Err(err) => {
                    error!(error = %err, "Run failed before finalization");
                    if record.finalize(RunState::Aborted).is_ok() {
                        if let Err(store_err) = self.store.persist(&record).await {
                            warn!(error = %store_err, "Could not persist aborted run");
                        }
                    }
                    return Err(err);
                }
            };

            record.finalize(state)?;
            self.store.persist(&record).await?;

            let duration_ms = record.duration_ms().unwrap_or_default();
            self.events
                .emit(&PipelineEvent::run_finished(identity.run_id, state, duration_ms))
                .await;
            match state {
                RunState::Completed => info!(duration_ms, "Run completed"),
                _ => {
                    let failed = record.last_entry().map(|e| e.stage.as_str()).unwrap_or_default();
                    warn!(duration_ms, stage = failed, "Run aborted");
                }
            }
            Ok(record)
        }
        .instrument(span)
        .await
    }

    async fn execute_chain(
        &self,
        identity: &Arc<RunIdentity>,
        record: &mut RunRecord,
        cancel: &Arc<CancellationToken>,
    ) -> Result<RunState, EtlflowError> {
        let mut artifacts: HashMap<StageKind, Artifact> = HashMap::new();

        for entry in self.chain.entries() {
            let stage = &entry.stage;
            let name = stage.name();
            record.begin_stage(name, stage.kind())?;

            if cancel.is_cancelled() {
                let outcome = StageOutcome::fatal(cancelled_cause(cancel, name));
                self.fail_stage(identity, record, name, outcome).await?;
                return Ok(RunState::Aborted);
            }

            let inputs = gather_inputs(stage.as_ref(), &artifacts)?;
            let outcome = self.run_stage(entry, &inputs, identity, record, cancel).await?;

            match outcome.artifact().cloned() {
                Some(artifact) => {
                    artifacts.insert(stage.kind(), artifact);
                    record.complete_stage(name, outcome)?;
                }
                None => {
                    self.fail_stage(identity, record, name, outcome).await?;
                    return Ok(RunState::Aborted);
                }
            }
        }

        Ok(RunState::Completed)
    }

    async fn fail_stage(
        &self,
        identity: &RunIdentity,
        record: &mut RunRecord,
        name: &str,
        outcome: StageOutcome,
    ) -> Result<(), EtlflowError> {
        if let Some(cause) = outcome.cause() {
            error!(stage = name, cause = %cause, "Stage failed");
            self.events
                .emit(&PipelineEvent::stage_failed(identity.run_id, name, cause))
                .await;
        }
        record.complete_stage(name, outcome)?;
        Ok(())
    }

    async fn run_stage(
        &self,
        entry: &ChainEntry,
        inputs: &[Artifact],
        identity: &Arc<RunIdentity>,
        record: &mut RunRecord,
        cancel: &Arc<CancellationToken>,
    ) -> Result<StageOutcome, EtlflowError> {
        let stage = &entry.stage;
        let name = stage.name();
        let policy = self.policy_for(entry);
        let mut attempt = 1;

        loop {
            let ctx = StageContext::new(Arc::clone(identity), name, stage.kind(), attempt, Arc::clone(cancel));
            let started_at = ctx.attempt_started_at();

            self.events
                .emit(&PipelineEvent::stage_started(identity.run_id, name, attempt))
                .await;
            let span = info_span!("stage", stage = name, attempt);
            let outcome = match stage.execute(inputs, &ctx).instrument(span).await {
                retryable @ StageOutcome::RetryableFailure { .. } => retryable.with_attempt(attempt),
                other => other,
            };
            let ended_at = now_utc();
            let duration_ms = elapsed_ms(started_at, ended_at);

            record.record_attempt(
                name,
                AttemptRecord {
                    attempt,
                    started_at,
                    ended_at,
                    outcome: outcome.clone(),
                },
            )?;

            if outcome.is_success() {
                info!(stage = name, attempt, duration_ms, "Stage succeeded");
                self.events
                    .emit(&PipelineEvent::stage_succeeded(identity.run_id, name, attempt, duration_ms))
                    .await;
                return Ok(outcome);
            }
            let Some(cause) = outcome.cause() else {
                return Ok(outcome);
            };

            warn!(stage = name, attempt, cause = %cause, "Stage attempt failed");
            self.events
                .emit(&PipelineEvent::stage_attempt_failed(identity.run_id, name, attempt, cause))
                .await;

            let (delay, next_attempt) = match policy.decide(&outcome, attempt) {
                RetryDecision::Retry { delay, next_attempt } => (delay, next_attempt),
                RetryDecision::GiveUp(reason) => {
                    if reason == GiveUpReason::Exhausted {
                        warn!(stage = name, attempts = attempt, "Retries exhausted");
                    }
                    return Ok(outcome);
                }
            };

            let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            info!(stage = name, attempt, next_attempt, delay_ms, "Retry scheduled");
            self.events
                .emit(&PipelineEvent::stage_retry_scheduled(identity.run_id, name, next_attempt, delay_ms))
                .await;

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => {
                    return Ok(StageOutcome::fatal(cancelled_cause(cancel, name)));
                }
            }
            if cancel.is_cancelled() {
                return Ok(StageOutcome::fatal(cancelled_cause(cancel, name)));
            }

            if stage.idempotency() == IdempotencyClass::AppendOnly {
                let verdict = stage.reconcile(inputs, &ctx).await;
                debug!(stage = name, attempt, ?verdict, "Reconciled previous attempt");
                if verdict != Reconciliation::NotCommitted {
                    return Ok(StageOutcome::fatal(FailureCause::partial_commit(format!(
                        "attempt {attempt} of '{name}' may have committed ({verdict:?}); reconcile manually before re-running"
                    ))));
                }
            }

            attempt = next_attempt;
        }
    }
}

/// Collects the artifacts a stage declares as upstream, in declared order.
fn gather_inputs(stage: &dyn Stage, artifacts: &HashMap<StageKind, Artifact>) -> Result<Vec<Artifact>, EtlflowError> {
    stage
        .upstream()
        .iter()
        .map(|kind| {
            artifacts.get(kind).cloned().ok_or_else(|| {
                EtlflowError::Internal(format!(
                    "stage '{}' requires an artifact from {kind} that was not produced",
                    stage.name()
                ))
            })
        })
        .collect()
}

fn cancelled_cause(cancel: &CancellationToken, stage: &str) -> FailureCause {
    let reason = cancel.reason().unwrap_or_else(|| "cancelled".to_string());
    FailureCause::cancelled(format!("run cancelled before '{stage}': {reason}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CauseKind;
    use crate::events::CollectingEventSink;
    use crate::pipeline::PipelineBuilder;
    use crate::testing::ScriptedStage;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn fast_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.retry_defaults.delay_seconds = 1;
        config
    }

    fn chain(stages: [ScriptedStage; 4]) -> (StageChain, Vec<Arc<ScriptedStage>>) {
        let handles: Vec<Arc<ScriptedStage>> = stages.into_iter().map(Arc::new).collect();
        let mut builder = PipelineBuilder::new("test");
        for stage in &handles {
            builder = builder.stage(Arc::clone(stage) as Arc<dyn Stage>);
        }
        (builder.build().unwrap(), handles)
    }

    fn succeeding() -> [ScriptedStage; 4] {
        [
            ScriptedStage::succeeding("extract", StageKind::Extract),
            ScriptedStage::succeeding("transform", StageKind::Transform),
            ScriptedStage::succeeding("provision_schema", StageKind::ProvisionSchema),
            ScriptedStage::succeeding("load", StageKind::Load),
        ]
    }

    #[tokio::test]
    async fn test_all_success_completes() {
        let (chain, stages) = chain(succeeding());
        let events = Arc::new(CollectingEventSink::new());
        let runner = PipelineRunner::new(fast_config(), chain)
            .unwrap()
            .with_event_sink(events.clone());

        let record = runner.run(&Arc::new(CancellationToken::new())).await.unwrap();

        assert_eq!(record.state, RunState::Completed);
        assert_eq!(record.entries.len(), 4);
        assert!(record.entries.iter().all(|e| e.outcome.as_ref().is_some_and(StageOutcome::is_success)));
        assert!(stages.iter().all(|s| s.calls() == 1));
        assert_eq!(events.event_types().first().map(String::as_str), Some("run.started"));
        assert_eq!(events.event_types().last().map(String::as_str), Some("run.completed"));

        let stored = runner.record_store().get(record.run_id).await.unwrap().unwrap();
        assert_eq!(stored.state, Some(RunState::Completed));
    }

    #[tokio::test]
    async fn test_inputs_follow_declared_upstream() {
        let (chain, stages) = chain(succeeding());
        let runner = PipelineRunner::new(fast_config(), chain).unwrap();
        let record = runner.run(&Arc::new(CancellationToken::new())).await.unwrap();

        let artifact_of = |kind| {
            record
                .entry_for(kind)
                .and_then(|e| e.outcome.as_ref())
                .and_then(StageOutcome::artifact)
                .map(|a| a.id)
                .unwrap()
        };
        assert_eq!(
            stages[3].last_input_ids(),
            vec![artifact_of(StageKind::Transform), artifact_of(StageKind::ProvisionSchema)]
        );
        assert_eq!(stages[1].last_input_ids(), vec![artifact_of(StageKind::Extract)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_append_only_stage_is_clamped_to_one_attempt() {
        let [e, t, p, _] = succeeding();
        let load = ScriptedStage::new("load", StageKind::Load)
            .then(StageOutcome::retryable(FailureCause::transient("warehouse busy"), 1));
        let (chain, stages) = chain([e, t, p, load]);
        let runner = PipelineRunner::new(fast_config(), chain).unwrap();

        let record = runner.run(&Arc::new(CancellationToken::new())).await.unwrap();

        assert_eq!(record.state, RunState::Aborted);
        assert_eq!(stages[3].calls(), 1);
        assert_eq!(stages[3].reconcile_calls(), 0);
        assert!(record.last_entry().unwrap().outcome.as_ref().unwrap().is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconciled_retry_aborts_on_unknown() {
        let [e, t, p, _] = succeeding();
        let load = ScriptedStage::new("load", StageKind::Load)
            .then(StageOutcome::retryable(FailureCause::transient("connection reset"), 1))
            .with_reconciliation(Reconciliation::Unknown);
        let (chain, stages) = chain([e, t, p, load]);
        let mut config = fast_config();
        config.load.reconciled_retries = true;
        let runner = PipelineRunner::new(config, chain).unwrap();

        let record = runner.run(&Arc::new(CancellationToken::new())).await.unwrap();

        assert_eq!(record.state, RunState::Aborted);
        assert_eq!(stages[3].calls(), 1);
        assert_eq!(stages[3].reconcile_calls(), 1);
        let cause = record.last_entry().unwrap().outcome.as_ref().unwrap().cause().unwrap().clone();
        assert_eq!(cause.kind, CauseKind::PartialCommitAmbiguity);
    }

    #[tokio::test]
    async fn test_lock_contention_fails_fast() {
        let (chain, stages) = chain(succeeding());
        let lock = Arc::new(InMemoryRunLock::new());
        let runner = PipelineRunner::new(fast_config(), chain)
            .unwrap()
            .with_run_lock(lock.clone());

        let _held = lock.try_acquire("enterprise_data_pipeline").unwrap();
        let err = runner.run(&Arc::new(CancellationToken::new())).await.unwrap_err();

        assert!(matches!(err, EtlflowError::RunLocked { .. }));
        assert_eq!(stages[0].calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_aborts() {
        let [_, t, p, l] = succeeding();
        let extract = ScriptedStage::new("extract", StageKind::Extract)
            .then(StageOutcome::retryable(FailureCause::transient("timeout"), 1));
        let (chain, stages) = chain([extract, t, p, l]);
        let runner = PipelineRunner::new(fast_config(), chain).unwrap();
        let cancel = Arc::new(CancellationToken::new());

        let trigger = Arc::clone(&cancel);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel("operator stop");
        });

        let record = runner.run(&cancel).await.unwrap();

        assert_eq!(record.state, RunState::Aborted);
        assert_eq!(stages[0].calls(), 1);
        assert_eq!(stages[1].calls(), 0);
        let entry = record.last_entry().unwrap();
        assert_eq!(entry.attempts.len(), 1);
        assert_eq!(
            entry.outcome.as_ref().unwrap().cause().unwrap().kind,
            CauseKind::Cancelled
        );
    }

    #[tokio::test]
    async fn test_records_attempt_numbers_on_retryable_outcomes() {
        let [_, t, p, l] = succeeding();
        let extract = ScriptedStage::new("extract", StageKind::Extract)
            .then(StageOutcome::retryable(FailureCause::transient("timeout"), 99));
        let (chain, _) = chain([extract, t, p, l]);
        let mut config = fast_config();
        config.retry_defaults.max_attempts = 1;
        let runner = PipelineRunner::new(config, chain).unwrap();

        let record = runner.run(&Arc::new(CancellationToken::new())).await.unwrap();
        let entry = record.entry_for(StageKind::Extract).unwrap();
        assert!(matches!(
            entry.outcome,
            Some(StageOutcome::RetryableFailure { attempt_count: 1, .. })
        ));
        assert_eq!(entry.attempts.len(), 1);
    }
}
