//! Scripted stages for testing the runner.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::context::StageContext;
use crate::core::{Artifact, ArtifactKind, IdempotencyClass, StageKind, StageOutcome};
use crate::stages::{Reconciliation, Stage};

/// The artifact kind a stage of `kind` produces.
#[must_use]
pub fn artifact_kind_for(kind: StageKind) -> ArtifactKind {
    match kind {
        StageKind::Extract => ArtifactKind::RawSnapshot,
        StageKind::Transform => ArtifactKind::Columnar,
        StageKind::ProvisionSchema => ArtifactKind::Schema,
        StageKind::Load => ArtifactKind::LoadReceipt,
    }
}

/// A stage that replays a script of outcomes and records every call.
///
/// Once the script runs out, each call succeeds with a fresh artifact of
/// the kind the stage's position produces.
#[derive(Debug)]
pub struct ScriptedStage {
    name: String,
    kind: StageKind,
    upstream: Option<&'static [StageKind]>,
    idempotency: Option<IdempotencyClass>,
    delay: Option<Duration>,
    script: Mutex<VecDeque<StageOutcome>>,
    reconciliations: Mutex<VecDeque<Reconciliation>>,
    calls: Mutex<Vec<ScriptedCall>>,
    reconcile_calls: Mutex<usize>,
}

/// One recorded call of a [`ScriptedStage`].
#[derive(Debug, Clone)]
pub struct ScriptedCall {
    /// Attempt number from the context.
    pub attempt: u32,
    /// IDs of the input artifacts, in order.
    pub input_ids: Vec<Uuid>,
    /// Tokio clock reading at call time.
    pub at: Instant,
}

impl ScriptedStage {
    /// Creates a stage with an empty script.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: StageKind) -> Self {
        Self {
            name: name.into(),
            kind,
            upstream: None,
            idempotency: None,
            delay: None,
            script: Mutex::new(VecDeque::new()),
            reconciliations: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            reconcile_calls: Mutex::new(0),
        }
    }

    /// A stage that always succeeds.
    #[must_use]
    pub fn succeeding(name: impl Into<String>, kind: StageKind) -> Self {
        Self::new(name, kind)
    }

    /// Appends an outcome to the script.
    #[must_use]
    pub fn then(self, outcome: StageOutcome) -> Self {
        self.script.lock().push_back(outcome);
        self
    }

    /// Appends the same outcome `times` times.
    #[must_use]
    pub fn then_times(self, outcome: StageOutcome, times: usize) -> Self {
        {
            let mut script = self.script.lock();
            for _ in 0..times {
                script.push_back(outcome.clone());
            }
        }
        self
    }

    /// Overrides the declared upstream kinds.
    #[must_use]
    pub fn with_upstream(mut self, upstream: &'static [StageKind]) -> Self {
        self.upstream = Some(upstream);
        self
    }

    /// Overrides the idempotency class.
    #[must_use]
    pub fn with_idempotency(mut self, class: IdempotencyClass) -> Self {
        self.idempotency = Some(class);
        self
    }

    /// Queues a reconciliation verdict. An empty queue answers `Unknown`.
    #[must_use]
    pub fn with_reconciliation(self, verdict: Reconciliation) -> Self {
        self.reconciliations.lock().push_back(verdict);
        self
    }

    /// Makes each call take `delay` on the tokio clock.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `execute` calls.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.lock().len()
    }

    /// Every recorded call.
    #[must_use]
    pub fn recorded_calls(&self) -> Vec<ScriptedCall> {
        self.calls.lock().clone()
    }

    /// Input artifact IDs of the last call.
    #[must_use]
    pub fn last_input_ids(&self) -> Vec<Uuid> {
        self.calls
            .lock()
            .last()
            .map(|c| c.input_ids.clone())
            .unwrap_or_default()
    }

    /// Number of `reconcile` calls.
    #[must_use]
    pub fn reconcile_calls(&self) -> usize {
        *self.reconcile_calls.lock()
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        self.kind
    }

    fn idempotency(&self) -> IdempotencyClass {
        self.idempotency
            .unwrap_or_else(|| self.kind.default_idempotency())
    }

    fn upstream(&self) -> &[StageKind] {
        self.upstream
            .unwrap_or_else(|| self.kind.default_upstream())
    }

    async fn execute(&self, inputs: &[Artifact], ctx: &StageContext) -> StageOutcome {
        self.calls.lock().push(ScriptedCall {
            attempt: ctx.attempt(),
            input_ids: inputs.iter().map(|a| a.id).collect(),
            at: Instant::now(),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| {
            StageOutcome::success(
                Artifact::new(artifact_kind_for(self.kind), self.kind)
                    .with_location(format!("{}/{}", self.name, ctx.attempt())),
            )
        })
    }

    async fn reconcile(&self, _inputs: &[Artifact], _ctx: &StageContext) -> Reconciliation {
        *self.reconcile_calls.lock() += 1;
        self.reconciliations
            .lock()
            .pop_front()
            .unwrap_or(Reconciliation::Unknown)
    }
}
