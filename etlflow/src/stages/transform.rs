//! Transform: submit raw snapshots to the compute engine for a partitioned columnar rewrite.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use super::ports::{ComputeEngine, JobSpec, ObjectStore, OutputFormat, WriteMode};
use super::{input_of, Stage};
use crate::context::StageContext;
use crate::core::{Artifact, ArtifactKind, FailureCause, StageKind, StageOutcome};

/// Which raw objects a transform job reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformInputMode {
    /// Only the snapshot written by this run's Extract.
    #[default]
    LatestSnapshot,
    /// Every `.csv` object under the raw prefix.
    AllRawSnapshots,
}

/// Settings for [`TransformStage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOptions {
    /// Input selection mode.
    pub mode: TransformInputMode,
    /// Prefix listed in `AllRawSnapshots` mode.
    pub raw_prefix: String,
    /// Business date column for the `year`/`month` partitions.
    pub date_column: String,
    /// Columnar output location.
    pub output_prefix: String,
    /// Output format.
    pub output_format: OutputFormat,
    /// Application name reported to the engine.
    pub app_name: String,
    /// Engine settings.
    pub engine_conf: BTreeMap<String, String>,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            mode: TransformInputMode::LatestSnapshot,
            raw_prefix: "raw-data".to_string(),
            date_column: "date_column".to_string(),
            output_prefix: "processed-data".to_string(),
            output_format: OutputFormat::Parquet,
            app_name: "DataTransformation".to_string(),
            engine_conf: BTreeMap::new(),
        }
    }
}

/// Builds one compute job per attempt and waits for it.
///
/// The job overwrites its output location, so re-running it with the same
/// inputs leaves the same output behind.
pub struct TransformStage {
    name: String,
    engine: Arc<dyn ComputeEngine>,
    store: Arc<dyn ObjectStore>,
    options: TransformOptions,
}

impl TransformStage {
    /// Creates a transform stage.
    #[must_use]
    pub fn new(
        engine: Arc<dyn ComputeEngine>,
        store: Arc<dyn ObjectStore>,
        options: TransformOptions,
    ) -> Self {
        Self {
            name: StageKind::Transform.to_string(),
            engine,
            store,
            options,
        }
    }

    /// Overrides the stage name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    async fn resolve_inputs(&self, inputs: &[Artifact], attempt: u32) -> Result<Vec<String>, StageOutcome> {
        let locations = match self.options.mode {
            TransformInputMode::LatestSnapshot => input_of(inputs, StageKind::Extract)
                .map(|a| a.locations.clone())
                .unwrap_or_default(),
            TransformInputMode::AllRawSnapshots => self
                .store
                .list(&self.options.raw_prefix)
                .await
                .map_err(|e| e.into_outcome("list raw snapshots", attempt))?
                .into_iter()
                .filter(|l| l.ends_with(".csv"))
                .collect(),
        };

        if locations.is_empty() {
            return Err(StageOutcome::fatal(FailureCause::data_contract(
                "no raw snapshots to transform",
            )));
        }
        Ok(locations)
    }

    fn job_spec(&self, inputs: Vec<String>, ctx: &StageContext) -> JobSpec {
        JobSpec {
            app_name: self.options.app_name.clone(),
            inputs,
            output_location: self.options.output_prefix.clone(),
            output_format: self.options.output_format,
            write_mode: WriteMode::Overwrite,
            date_column: self.options.date_column.clone(),
            processed_date: ctx.attempt_started_at().format("%Y-%m-%d").to_string(),
            partition_by: vec!["year".to_string(), "month".to_string()],
            engine_conf: self.options.engine_conf.clone(),
        }
    }
}

impl std::fmt::Debug for TransformStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformStage")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for TransformStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Transform
    }

    async fn execute(&self, inputs: &[Artifact], ctx: &StageContext) -> StageOutcome {
        let locations = match self.resolve_inputs(inputs, ctx.attempt()).await {
            Ok(locations) => locations,
            Err(outcome) => return outcome,
        };
        let input_objects = locations.len() as u64;
        let job = self.job_spec(locations, ctx);

        let result = match self.engine.submit(&job).await {
            Ok(result) => result,
            Err(e) => return e.into_outcome(&format!("job '{}'", job.app_name), ctx.attempt()),
        };

        info!(
            run_id = %ctx.run_id(),
            output = %result.output_location,
            rows = result.rows_written,
            partitions = result.partitions_written,
            "Transform job finished"
        );

        let artifact = Artifact::new(ArtifactKind::Columnar, StageKind::Transform)
            .with_location(result.output_location)
            .with_metadata("format", serde_json::json!(job.output_format))
            .with_metadata("partition_by", serde_json::json!(job.partition_by))
            .with_metadata("processed_date", serde_json::json!(job.processed_date));

        StageOutcome::success_with_metrics(
            artifact,
            [
                ("input_objects", input_objects),
                ("rows_written", result.rows_written),
                ("partitions_written", result.partitions_written),
            ],
        )
    }
}
