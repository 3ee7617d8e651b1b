//! Fixtures for runner and stage tests.

use std::sync::Arc;

use super::ScriptedStage;
use crate::adapters::{InMemoryObjectStore, InMemoryWarehouse, LocalComputeEngine, StaticSource};
use crate::config::PipelineConfig;
use crate::core::StageKind;
use crate::pipeline::{standard_chain, Collaborators, PipelineBuilder, StageChain};
use crate::stages::ports::{ObjectStore, OutputFormat, SourceReader, Warehouse};
use crate::stages::Stage;

/// Sales rows with a `date_column` and one row missing a field.
pub const SAMPLE_SALES_CSV: &str = "\
sale_id,customer_id,product_id,quantity,unit_price,total_amount,date_column
1,100,10,2,5.00,10.00,2024-01-15
2,101,11,1,7.50,7.50,2024-01-20
3,102,10,4,5.00,20.00,2024-02-03
4,103,12,1,3.25
";

/// Default configuration with a one-second retry delay and CSV output.
#[must_use]
pub fn fast_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.retry_defaults.delay_seconds = 1;
    config.transform.output_format = OutputFormat::Csv;
    config
}

/// Four scripted stages, in order, wrapped for inspection.
#[must_use]
pub fn scripted_stages() -> [Arc<ScriptedStage>; 4] {
    [
        Arc::new(ScriptedStage::succeeding("extract", StageKind::Extract)),
        Arc::new(ScriptedStage::succeeding("transform", StageKind::Transform)),
        Arc::new(ScriptedStage::succeeding("provision_schema", StageKind::ProvisionSchema)),
        Arc::new(ScriptedStage::succeeding("load", StageKind::Load)),
    ]
}

/// Builds a chain over the given stages, keeping handles to them.
///
/// # Panics
///
/// Panics if the stages do not form a valid chain.
#[must_use]
pub fn chain_of(stages: &[Arc<ScriptedStage>]) -> StageChain {
    stages
        .iter()
        .fold(PipelineBuilder::new("enterprise_data_pipeline"), |builder, stage| {
            builder.stage(Arc::clone(stage) as Arc<dyn Stage>)
        })
        .build()
        .expect("scripted stages form a valid chain")
}

/// A chain of four always-succeeding stages.
#[must_use]
pub fn succeeding_chain() -> StageChain {
    chain_of(&scripted_stages())
}

/// In-memory collaborators for an end-to-end run.
#[derive(Debug)]
pub struct InMemoryHarness {
    /// Object store shared by every stage.
    pub store: Arc<InMemoryObjectStore>,
    /// Warehouse shared by ProvisionSchema and Load.
    pub warehouse: Arc<InMemoryWarehouse>,
    /// Collaborators built over `store` and `warehouse`.
    pub collaborators: Collaborators,
}

impl InMemoryHarness {
    /// One static source named `name` holding `csv`.
    #[must_use]
    pub fn with_source(name: &str, csv: &str) -> Self {
        let store = Arc::new(InMemoryObjectStore::new());
        let object_store: Arc<dyn ObjectStore> = store.clone();
        let warehouse = Arc::new(InMemoryWarehouse::new(Arc::clone(&object_store)));
        let collaborators = Collaborators {
            engine: Arc::new(LocalComputeEngine::new(Arc::clone(&object_store))),
            store: object_store,
            warehouse: warehouse.clone() as Arc<dyn Warehouse>,
            sources: vec![Arc::new(StaticSource::new(name, csv)) as Arc<dyn SourceReader>],
        };
        Self {
            store,
            warehouse,
            collaborators,
        }
    }

    /// The standard chain over these collaborators.
    ///
    /// # Panics
    ///
    /// Panics if the chain does not validate.
    #[must_use]
    pub fn chain(&self, config: &PipelineConfig) -> StageChain {
        standard_chain(config, &self.collaborators).expect("standard chain validates")
    }
}
