//! Stage trait and the four built-in stages.
//!
//! Stages are the units of work of the chain. Each one talks to a single
//! external system through a port from [`ports`] and classifies every
//! failure into a [`StageOutcome`]; the runner never sees a raw error.

pub(crate) mod extract;
mod load;
pub mod ports;
mod provision;
mod transform;

use crate::context::StageContext;
use crate::core::{Artifact, IdempotencyClass, StageKind, StageOutcome};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

pub use extract::ExtractStage;
pub use load::{LoadOptions, LoadStage};
pub use provision::{ColumnDefinition, ProvisionSchemaStage, TableDefinition};
pub use transform::{TransformInputMode, TransformOptions, TransformStage};

/// Whether a previous attempt of an append-only stage committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reconciliation {
    /// The external system shows no trace of the previous attempt.
    NotCommitted,
    /// The previous attempt committed, fully or partially.
    Committed,
    /// The external system cannot tell.
    Unknown,
}

/// Trait for pipeline stages.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// Returns the stage's position in the chain.
    fn kind(&self) -> StageKind;

    /// Declares whether re-execution is always safe.
    fn idempotency(&self) -> IdempotencyClass {
        self.kind().default_idempotency()
    }

    /// Kinds of earlier stages whose artifacts this stage consumes, in order.
    fn upstream(&self) -> &[StageKind] {
        self.kind().default_upstream()
    }

    /// Executes one attempt.
    ///
    /// `inputs` holds one artifact per entry of [`Stage::upstream`], in the
    /// same order, each from a stage whose outcome was `Success`.
    async fn execute(&self, inputs: &[Artifact], ctx: &StageContext) -> StageOutcome;

    /// Asks the external system whether the previous attempt committed.
    ///
    /// Consulted before re-invoking an append-only stage.
    async fn reconcile(&self, _inputs: &[Artifact], _ctx: &StageContext) -> Reconciliation {
        Reconciliation::Unknown
    }
}

/// A simple function-based stage.
pub struct FnStage<F>
where
    F: Fn(&[Artifact], &StageContext) -> StageOutcome + Send + Sync,
{
    name: String,
    kind: StageKind,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&[Artifact], &StageContext) -> StageOutcome + Send + Sync,
{
    /// Creates a new function-based stage.
    pub fn new(name: impl Into<String>, kind: StageKind, func: F) -> Self {
        Self {
            name: name.into(),
            kind,
            func,
        }
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&[Artifact], &StageContext) -> StageOutcome + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&[Artifact], &StageContext) -> StageOutcome + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        self.kind
    }

    async fn execute(&self, inputs: &[Artifact], ctx: &StageContext) -> StageOutcome {
        (self.func)(inputs, ctx)
    }
}

/// Returns the input artifact produced by `kind`, if present.
pub(crate) fn input_of(inputs: &[Artifact], kind: StageKind) -> Option<&Artifact> {
    inputs.iter().find(|a| a.produced_by == kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ArtifactKind;

    #[tokio::test]
    async fn test_fn_stage() {
        let stage = FnStage::new("extract", StageKind::Extract, |_inputs, _ctx| {
            StageOutcome::success(Artifact::new(ArtifactKind::RawSnapshot, StageKind::Extract))
        });

        assert_eq!(stage.name(), "extract");
        assert_eq!(stage.idempotency(), IdempotencyClass::OverwriteSafe);
        assert!(stage.upstream().is_empty());

        let ctx = StageContext::standalone(StageKind::Extract);
        let output = stage.execute(&[], &ctx).await;
        assert!(output.is_success());
        assert_eq!(stage.reconcile(&[], &ctx).await, Reconciliation::Unknown);
    }

    #[test]
    fn test_load_defaults_are_append_only() {
        let stage = FnStage::new("load", StageKind::Load, |_inputs, _ctx| {
            StageOutcome::fatal(crate::core::FailureCause::data_contract("unused"))
        });
        assert_eq!(stage.idempotency(), IdempotencyClass::AppendOnly);
        assert_eq!(
            stage.upstream(),
            &[StageKind::Transform, StageKind::ProvisionSchema]
        );
    }

    #[test]
    fn test_input_of() {
        let raw = Artifact::new(ArtifactKind::RawSnapshot, StageKind::Extract);
        let columnar = Artifact::new(ArtifactKind::Columnar, StageKind::Transform);
        let inputs = vec![raw, columnar.clone()];
        assert_eq!(input_of(&inputs, StageKind::Transform), Some(&columnar));
        assert!(input_of(&inputs, StageKind::Load).is_none());
    }
}
