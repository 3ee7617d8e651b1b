//! Wiring of the standard chain from configuration and collaborators.

use std::sync::Arc;

use super::{PipelineBuilder, StageChain};
use crate::adapters::{CsvFileSource, FsObjectStore, InMemoryWarehouse, LocalComputeEngine};
use crate::config::PipelineConfig;
use crate::errors::PipelineValidationError;
use crate::stages::ports::{ComputeEngine, ObjectStore, SourceReader, Warehouse};
use crate::stages::{
    ExtractStage, LoadOptions, LoadStage, ProvisionSchemaStage, TransformOptions, TransformStage,
};

/// The external systems a chain talks to.
#[derive(Clone)]
pub struct Collaborators {
    /// Raw and processed object storage.
    pub store: Arc<dyn ObjectStore>,
    /// Runs the transform job.
    pub engine: Arc<dyn ComputeEngine>,
    /// Target of ProvisionSchema and Load.
    pub warehouse: Arc<dyn Warehouse>,
    /// Sources Extract snapshots.
    pub sources: Vec<Arc<dyn SourceReader>>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("sources", &self.sources.iter().map(|s| s.name()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Collaborators {
    /// Local adapters: a directory-backed object store at
    /// `storage_endpoint`, the in-process compute engine, an in-memory
    /// warehouse and one CSV file source per configured source.
    #[must_use]
    pub fn local(config: &PipelineConfig) -> (Self, Arc<InMemoryWarehouse>) {
        let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(&config.storage_endpoint));
        let warehouse = Arc::new(InMemoryWarehouse::new(Arc::clone(&store)));
        let sources = config
            .extract
            .sources
            .iter()
            .map(|s| Arc::new(CsvFileSource::new(s.name.clone(), s.path.clone())) as Arc<dyn SourceReader>)
            .collect();
        let collaborators = Self {
            engine: Arc::new(LocalComputeEngine::new(Arc::clone(&store))),
            store,
            warehouse: Arc::clone(&warehouse) as Arc<dyn Warehouse>,
            sources,
        };
        (collaborators, warehouse)
    }
}

/// Builds Extract → Transform → ProvisionSchema → Load from configuration.
///
/// # Errors
///
/// Returns the builder's validation error; with the stock stages this
/// only happens if the builder rules change.
pub fn standard_chain(
    config: &PipelineConfig,
    collaborators: &Collaborators,
) -> Result<StageChain, PipelineValidationError> {
    let extract = ExtractStage::new(Arc::clone(&collaborators.store), config.extract.raw_prefix.clone())
        .with_sources(collaborators.sources.iter().cloned());

    let transform = TransformStage::new(
        Arc::clone(&collaborators.engine),
        Arc::clone(&collaborators.store),
        TransformOptions {
            mode: config.transform.mode,
            raw_prefix: config.extract.raw_prefix.clone(),
            date_column: config.transform.date_column.clone(),
            output_prefix: config.transform.output_prefix.clone(),
            output_format: config.transform.output_format,
            app_name: config.transform.app_name.clone(),
            engine_conf: config.transform.engine_conf.clone(),
        },
    );

    let provision = ProvisionSchemaStage::new(Arc::clone(&collaborators.warehouse), config.tables.clone())
        .with_qualifier(config.warehouse_target.qualifier());

    let mut load_options = LoadOptions::new(config.warehouse_target.qualified_fact_table());
    load_options.on_error = config.load.on_error;
    if let Some(max) = config.load.max_skipped_rows {
        load_options = load_options.with_max_skipped_rows(max);
    }
    let load = LoadStage::new(Arc::clone(&collaborators.warehouse), load_options);

    PipelineBuilder::new(config.pipeline_name.clone())
        .stage(Arc::new(extract))
        .stage(Arc::new(transform))
        .stage(Arc::new(provision))
        .stage(Arc::new(load))
        .build()
}
