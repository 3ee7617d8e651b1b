//! Load: bulk-copy the columnar output into the fact table.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use super::ports::{BulkLoadRequest, LoadCommitState, LoadSummary, OnErrorPolicy, Warehouse};
use super::{input_of, Reconciliation, Stage};
use crate::context::StageContext;
use crate::core::{Artifact, ArtifactKind, FailureCause, IdempotencyClass, StageKind, StageOutcome};
use crate::utils::{stable_key, validate_qualified_name};

/// Settings for [`LoadStage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    /// Destination table, optionally qualified.
    pub target_table: String,
    /// Malformed record handling.
    pub on_error: OnErrorPolicy,
    /// Skipped rows above this count fail the stage.
    pub max_skipped_rows: Option<u64>,
}

impl LoadOptions {
    /// Creates options for a table with the default `Continue` policy.
    #[must_use]
    pub fn new(target_table: impl Into<String>) -> Self {
        Self {
            target_table: target_table.into(),
            on_error: OnErrorPolicy::Continue,
            max_skipped_rows: None,
        }
    }

    /// Sets the skip threshold.
    #[must_use]
    pub fn with_max_skipped_rows(mut self, max: u64) -> Self {
        self.max_skipped_rows = Some(max);
        self
    }
}

/// Append-only bulk load keyed by a stable load key.
pub struct LoadStage {
    name: String,
    warehouse: Arc<dyn Warehouse>,
    options: LoadOptions,
}

impl LoadStage {
    /// Creates a load stage.
    #[must_use]
    pub fn new(warehouse: Arc<dyn Warehouse>, options: LoadOptions) -> Self {
        Self {
            name: StageKind::Load.to_string(),
            warehouse,
            options,
        }
    }

    /// Overrides the stage name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Stable key for loading `source` into the target table.
    ///
    /// Retries within a run replay the same artifact and share the key. The
    /// Transform output prefix is fixed, so the artifact id keeps each run's
    /// load distinct from earlier runs into the same table.
    #[must_use]
    pub fn load_key(&self, source: &Artifact) -> String {
        let id = source.id.to_string();
        let mut parts: Vec<&str> = vec![self.options.target_table.as_str(), id.as_str()];
        parts.extend(source.locations.iter().map(String::as_str));
        stable_key("load", &parts)
    }

    fn schema_covers_target(&self, schema: &Artifact) -> bool {
        let target = self.options.target_table.as_str();
        let bare = target.rsplit('.').next().unwrap_or(target);
        schema
            .locations
            .iter()
            .any(|t| t == target || t.rsplit('.').next() == Some(bare))
    }
}

impl std::fmt::Debug for LoadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadStage")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for LoadStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Load
    }

    fn idempotency(&self) -> IdempotencyClass {
        IdempotencyClass::AppendOnly
    }

    async fn execute(&self, inputs: &[Artifact], ctx: &StageContext) -> StageOutcome {
        let Some(columnar) = input_of(inputs, StageKind::Transform) else {
            return StageOutcome::fatal(FailureCause::data_contract("no columnar output to load"));
        };
        if columnar.locations.is_empty() {
            return StageOutcome::fatal(FailureCause::data_contract(
                "columnar artifact has no locations",
            ));
        }
        if let Err(e) = validate_qualified_name(&self.options.target_table) {
            return StageOutcome::fatal(FailureCause::data_contract(e.to_string()));
        }
        if let Some(schema) = input_of(inputs, StageKind::ProvisionSchema) {
            if !self.schema_covers_target(schema) {
                return StageOutcome::fatal(FailureCause::data_contract(format!(
                    "table '{}' was not provisioned",
                    self.options.target_table
                )));
            }
        }

        let load_key = self.load_key(columnar);
        let mut total = LoadSummary::default();
        for location in &columnar.locations {
            let request = BulkLoadRequest {
                source_location: location.clone(),
                target_table: self.options.target_table.clone(),
                on_error: self.options.on_error,
                load_key: load_key.clone(),
            };
            match self.warehouse.bulk_load(&request).await {
                Ok(summary) => {
                    total.rows_loaded += summary.rows_loaded;
                    total.rows_skipped += summary.rows_skipped;
                }
                Err(e) => {
                    return e.into_outcome(
                        &format!("bulk load into '{}'", self.options.target_table),
                        ctx.attempt(),
                    )
                }
            }
        }

        if let Some(max) = self.options.max_skipped_rows {
            if total.rows_skipped > max {
                warn!(
                    run_id = %ctx.run_id(),
                    rows_skipped = total.rows_skipped,
                    max,
                    "Skipped rows exceed threshold"
                );
                return StageOutcome::fatal(FailureCause::data_contract(format!(
                    "{} rows skipped, threshold is {max}",
                    total.rows_skipped
                )));
            }
        }

        info!(
            run_id = %ctx.run_id(),
            table = %self.options.target_table,
            rows_loaded = total.rows_loaded,
            rows_skipped = total.rows_skipped,
            "Load committed"
        );

        let artifact = Artifact::new(ArtifactKind::LoadReceipt, StageKind::Load)
            .with_location(self.options.target_table.clone())
            .with_metadata("load_key", serde_json::json!(load_key))
            .with_metadata("on_error", serde_json::json!(self.options.on_error));

        StageOutcome::success_with_metrics(
            artifact,
            [
                ("rows_loaded", total.rows_loaded),
                ("rows_skipped", total.rows_skipped),
            ],
        )
    }

    async fn reconcile(&self, inputs: &[Artifact], ctx: &StageContext) -> Reconciliation {
        let Some(columnar) = input_of(inputs, StageKind::Transform) else {
            // Nothing could have been loaded without an input.
            return Reconciliation::NotCommitted;
        };
        let load_key = self.load_key(columnar);
        match self
            .warehouse
            .load_state(&self.options.target_table, &load_key)
            .await
        {
            Ok(LoadCommitState::NotCommitted) => Reconciliation::NotCommitted,
            Ok(LoadCommitState::Committed) => Reconciliation::Committed,
            Ok(LoadCommitState::Unknown) => Reconciliation::Unknown,
            Err(e) => {
                warn!(run_id = %ctx.run_id(), error = %e, "Load reconciliation failed");
                Reconciliation::Unknown
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::ports::{CollaboratorError, MockWarehouse};
    use mockall::predicate::{always, function};

    fn inputs() -> Vec<Artifact> {
        vec![
            Artifact::new(ArtifactKind::Columnar, StageKind::Transform).with_location("processed-data"),
            Artifact::new(ArtifactKind::Schema, StageKind::ProvisionSchema)
                .with_locations(["DB.S.sales_fact", "DB.S.customer_dimension"]),
        ]
    }

    fn ctx() -> StageContext {
        StageContext::standalone(StageKind::Load)
    }

    #[tokio::test]
    async fn test_load_reports_rows() {
        let mut warehouse = MockWarehouse::new();
        warehouse
            .expect_bulk_load()
            .with(function(|r: &BulkLoadRequest| {
                r.target_table == "DB.S.sales_fact"
                    && r.source_location == "processed-data"
                    && r.on_error == OnErrorPolicy::Continue
                    && r.load_key.starts_with("load:")
            }))
            .times(1)
            .returning(|_| {
                Ok(LoadSummary {
                    rows_loaded: 1000,
                    rows_skipped: 3,
                })
            });

        let stage = LoadStage::new(Arc::new(warehouse), LoadOptions::new("DB.S.sales_fact"));
        let outcome = stage.execute(&inputs(), &ctx()).await;

        assert_eq!(outcome.metric("rows_loaded"), Some(1000));
        assert_eq!(outcome.metric("rows_skipped"), Some(3));
        assert_eq!(outcome.artifact().unwrap().kind, ArtifactKind::LoadReceipt);
    }

    #[tokio::test]
    async fn test_skip_threshold_is_fatal() {
        let mut warehouse = MockWarehouse::new();
        warehouse.expect_bulk_load().returning(|_| {
            Ok(LoadSummary {
                rows_loaded: 10,
                rows_skipped: 4,
            })
        });

        let stage = LoadStage::new(
            Arc::new(warehouse),
            LoadOptions::new("DB.S.sales_fact").with_max_skipped_rows(3),
        );
        let outcome = stage.execute(&inputs(), &ctx()).await;
        assert!(outcome.is_fatal());
        assert!(outcome.cause().unwrap().message.contains("threshold is 3"));
    }

    #[tokio::test]
    async fn test_unprovisioned_table_is_fatal() {
        let mut warehouse = MockWarehouse::new();
        warehouse.expect_bulk_load().never();

        let stage = LoadStage::new(Arc::new(warehouse), LoadOptions::new("DB.S.orders_fact"));
        assert!(stage.execute(&inputs(), &ctx()).await.is_fatal());
    }

    #[tokio::test]
    async fn test_throttling_is_retryable() {
        let mut warehouse = MockWarehouse::new();
        warehouse
            .expect_bulk_load()
            .returning(|_| Err(CollaboratorError::throttled("queue full")));

        let stage = LoadStage::new(Arc::new(warehouse), LoadOptions::new("DB.S.sales_fact"));
        assert!(stage.execute(&inputs(), &ctx()).await.is_retryable());
    }

    #[test]
    fn test_load_key_is_stable_per_artifact() {
        let stage = LoadStage::new(Arc::new(MockWarehouse::new()), LoadOptions::new("DB.S.sales_fact"));
        let all = inputs();
        let columnar = &all[0];
        let replayed = columnar.clone();
        let next_run = Artifact::new(ArtifactKind::Columnar, StageKind::Transform)
            .with_location("processed-data");

        assert_eq!(stage.load_key(columnar), stage.load_key(&replayed));
        assert_ne!(stage.load_key(columnar), stage.load_key(&next_run));
    }

    #[tokio::test]
    async fn test_reconcile_uses_the_execute_load_key() {
        let all = inputs();
        let stage_for_key = LoadStage::new(Arc::new(MockWarehouse::new()), LoadOptions::new("DB.S.sales_fact"));
        let expected_key = stage_for_key.load_key(&all[0]);

        let mut warehouse = MockWarehouse::new();
        warehouse
            .expect_load_state()
            .with(always(), function(move |k: &str| k == expected_key))
            .times(1)
            .returning(|_, _| Ok(LoadCommitState::NotCommitted));
        let stage = LoadStage::new(Arc::new(warehouse), LoadOptions::new("DB.S.sales_fact"));
        assert_eq!(stage.reconcile(&all, &ctx()).await, Reconciliation::NotCommitted);
    }

    #[tokio::test]
    async fn test_reconcile_maps_commit_state() {
        for (state, expected) in [
            (LoadCommitState::NotCommitted, Reconciliation::NotCommitted),
            (LoadCommitState::Committed, Reconciliation::Committed),
            (LoadCommitState::Unknown, Reconciliation::Unknown),
        ] {
            let mut warehouse = MockWarehouse::new();
            warehouse
                .expect_load_state()
                .with(function(|t: &str| t == "DB.S.sales_fact"), always())
                .returning(move |_, _| Ok(state));
            let stage = LoadStage::new(Arc::new(warehouse), LoadOptions::new("DB.S.sales_fact"));
            assert_eq!(stage.reconcile(&inputs(), &ctx()).await, expected);
        }
    }

    #[tokio::test]
    async fn test_reconcile_error_is_unknown() {
        let mut warehouse = MockWarehouse::new();
        warehouse
            .expect_load_state()
            .returning(|_, _| Err(CollaboratorError::transient("no answer")));
        let stage = LoadStage::new(Arc::new(warehouse), LoadOptions::new("DB.S.sales_fact"));
        assert_eq!(stage.reconcile(&inputs(), &ctx()).await, Reconciliation::Unknown);
    }
}
