//! Pipeline configuration.
//!
//! [`PipelineConfig`] is read from TOML and handed to the runner at
//! construction. Every field has a default, so an empty file describes the
//! stock `enterprise_data_pipeline`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::ConfigError;
use crate::pipeline::{BackoffStrategy, RetryPolicy};
use crate::stages::ports::{OnErrorPolicy, OutputFormat};
use crate::stages::{TableDefinition, TransformInputMode};
use crate::utils::{validate_identifier, validate_qualified_name};

/// Top-level pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name; also the run lock key.
    #[serde(default = "default_pipeline_name")]
    pub pipeline_name: String,
    /// Object storage endpoint. For the local adapter, a directory.
    #[serde(default = "default_storage_endpoint")]
    pub storage_endpoint: String,
    /// Compute engine endpoint.
    #[serde(default = "default_compute_endpoint")]
    pub compute_endpoint: String,
    /// Where Load and ProvisionSchema write.
    #[serde(default)]
    pub warehouse_target: WarehouseTarget,
    /// Retry schedule for every stage unless overridden.
    #[serde(default)]
    pub retry_defaults: RetryDefaults,
    /// Extract settings.
    #[serde(default)]
    pub extract: ExtractConfig,
    /// Transform settings.
    #[serde(default)]
    pub transform: TransformConfig,
    /// Load settings.
    #[serde(default)]
    pub load: LoadConfig,
    /// Tables ProvisionSchema creates.
    #[serde(default = "default_tables")]
    pub tables: Vec<TableDefinition>,
    /// Trigger cadence.
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

fn default_pipeline_name() -> String {
    "enterprise_data_pipeline".to_string()
}

fn default_storage_endpoint() -> String {
    "./etlflow-data".to_string()
}

fn default_compute_endpoint() -> String {
    "local".to_string()
}

fn default_tables() -> Vec<TableDefinition> {
    vec![TableDefinition::sales_fact(), TableDefinition::customer_dimension()]
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pipeline_name: default_pipeline_name(),
            storage_endpoint: default_storage_endpoint(),
            compute_endpoint: default_compute_endpoint(),
            warehouse_target: WarehouseTarget::default(),
            retry_defaults: RetryDefaults::default(),
            extract: ExtractConfig::default(),
            transform: TransformConfig::default(),
            load: LoadConfig::default(),
            tables: default_tables(),
            schedule: ScheduleConfig::default(),
        }
    }
}

/// Warehouse coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseTarget {
    /// Compute warehouse.
    #[serde(default = "default_warehouse")]
    pub warehouse: String,
    /// Database.
    #[serde(default = "default_database")]
    pub database: String,
    /// Schema.
    #[serde(default = "default_schema")]
    pub schema: String,
    /// Table Load writes into.
    #[serde(default = "default_fact_table")]
    pub fact_table: String,
}

fn default_warehouse() -> String {
    "ANALYTICS_WH".to_string()
}

fn default_database() -> String {
    "ENTERPRISE_DB".to_string()
}

fn default_schema() -> String {
    "PUBLIC".to_string()
}

fn default_fact_table() -> String {
    "sales_fact".to_string()
}

impl Default for WarehouseTarget {
    fn default() -> Self {
        Self {
            warehouse: default_warehouse(),
            database: default_database(),
            schema: default_schema(),
            fact_table: default_fact_table(),
        }
    }
}

impl WarehouseTarget {
    /// `DATABASE.SCHEMA`.
    #[must_use]
    pub fn qualifier(&self) -> String {
        format!("{}.{}", self.database, self.schema)
    }

    /// `DATABASE.SCHEMA.table`.
    #[must_use]
    pub fn qualified(&self, table: &str) -> String {
        format!("{}.{table}", self.qualifier())
    }

    /// The fully qualified fact table.
    #[must_use]
    pub fn qualified_fact_table(&self) -> String {
        self.qualified(&self.fact_table)
    }
}

/// Default retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryDefaults {
    /// Attempts per stage, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay between attempts.
    #[serde(default = "default_delay_seconds")]
    pub delay_seconds: u64,
    /// Backoff strategy.
    #[serde(default)]
    pub backoff: BackoffStrategy,
    /// Cap on any single delay.
    #[serde(default = "default_max_delay_seconds")]
    pub max_delay_seconds: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_delay_seconds() -> u64 {
    300
}

fn default_max_delay_seconds() -> u64 {
    3600
}

impl Default for RetryDefaults {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_seconds: default_delay_seconds(),
            backoff: BackoffStrategy::default(),
            max_delay_seconds: default_max_delay_seconds(),
        }
    }
}

impl RetryDefaults {
    /// Converts to a [`RetryPolicy`].
    #[must_use]
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(self.max_attempts)
            .with_base_delay(Duration::from_secs(self.delay_seconds))
            .with_max_delay(Duration::from_secs(self.max_delay_seconds))
            .with_backoff(self.backoff)
    }
}

/// One configured source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Source name, used in the snapshot object name.
    pub name: String,
    /// Path of the CSV file.
    pub path: PathBuf,
}

/// Extract settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Raw snapshot container.
    #[serde(default = "default_raw_prefix")]
    pub raw_prefix: String,
    /// Sources to snapshot.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

fn default_raw_prefix() -> String {
    "raw-data".to_string()
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            raw_prefix: default_raw_prefix(),
            sources: Vec::new(),
        }
    }
}

/// Transform settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Which raw snapshots feed the job.
    #[serde(default)]
    pub mode: TransformInputMode,
    /// Business date column.
    #[serde(default = "default_date_column")]
    pub date_column: String,
    /// Processed data container.
    #[serde(default = "default_output_prefix")]
    pub output_prefix: String,
    /// Output format.
    #[serde(default)]
    pub output_format: OutputFormat,
    /// Job name reported to the engine.
    #[serde(default = "default_app_name")]
    pub app_name: String,
    /// Engine settings.
    #[serde(default = "default_engine_conf")]
    pub engine_conf: BTreeMap<String, String>,
}

fn default_date_column() -> String {
    "date_column".to_string()
}

fn default_output_prefix() -> String {
    "processed-data".to_string()
}

fn default_app_name() -> String {
    "DataTransformation".to_string()
}

fn default_engine_conf() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("driver_memory".to_string(), "4g".to_string()),
        ("executor_memory".to_string(), "4g".to_string()),
    ])
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            mode: TransformInputMode::default(),
            date_column: default_date_column(),
            output_prefix: default_output_prefix(),
            output_format: OutputFormat::default(),
            app_name: default_app_name(),
            engine_conf: default_engine_conf(),
        }
    }
}

/// Load settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Malformed-record policy.
    #[serde(default)]
    pub on_error: OnErrorPolicy,
    /// Skipped rows above this count fail the stage.
    #[serde(default)]
    pub max_skipped_rows: Option<u64>,
    /// Lets Load use the configured retry schedule, gated by reconciliation.
    #[serde(default)]
    pub reconciled_retries: bool,
}

/// Trigger cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds between scheduled runs.
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
}

fn default_interval_seconds() -> u64 {
    4 * 60 * 60
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
        }
    }
}

impl ScheduleConfig {
    /// Interval as a [`Duration`].
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

impl PipelineConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline_name.trim().is_empty() {
            return Err(ConfigError::invalid("pipeline_name", "must not be empty"));
        }
        for (field, value) in [
            ("warehouse_target.warehouse", &self.warehouse_target.warehouse),
            ("warehouse_target.database", &self.warehouse_target.database),
            ("warehouse_target.schema", &self.warehouse_target.schema),
            ("warehouse_target.fact_table", &self.warehouse_target.fact_table),
        ] {
            validate_identifier(value).map_err(|e| ConfigError::invalid(field, e.to_string()))?;
        }
        validate_qualified_name(&self.warehouse_target.qualified_fact_table())
            .map_err(|e| ConfigError::invalid("warehouse_target", e.to_string()))?;

        if self.retry_defaults.max_attempts == 0 {
            return Err(ConfigError::invalid("retry_defaults.max_attempts", "must be at least 1"));
        }
        if self.retry_defaults.max_delay_seconds < self.retry_defaults.delay_seconds {
            return Err(ConfigError::invalid(
                "retry_defaults.max_delay_seconds",
                "must not be below delay_seconds",
            ));
        }
        if self.schedule.interval_seconds == 0 {
            return Err(ConfigError::invalid("schedule.interval_seconds", "must be positive"));
        }
        if self.extract.raw_prefix.trim().is_empty() {
            return Err(ConfigError::invalid("extract.raw_prefix", "must not be empty"));
        }
        if self.transform.output_prefix.trim().is_empty() {
            return Err(ConfigError::invalid("transform.output_prefix", "must not be empty"));
        }
        if self.transform.output_prefix == self.extract.raw_prefix {
            return Err(ConfigError::invalid(
                "transform.output_prefix",
                "must differ from extract.raw_prefix",
            ));
        }

        let mut names = std::collections::HashSet::new();
        for source in &self.extract.sources {
            if !names.insert(source.name.as_str()) {
                return Err(ConfigError::invalid(
                    "extract.sources",
                    format!("duplicate source name '{}'", source.name),
                ));
            }
        }

        if !self.tables.iter().any(|t| t.name == self.warehouse_target.fact_table) {
            return Err(ConfigError::invalid(
                "tables",
                format!("no definition for fact table '{}'", self.warehouse_target.fact_table),
            ));
        }
        for table in &self.tables {
            table
                .validate()
                .map_err(|e| ConfigError::invalid("tables", e.to_string()))?;
        }
        Ok(())
    }

    /// The retry policy every stage starts from.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_defaults.to_policy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.pipeline_name, "enterprise_data_pipeline");
        assert_eq!(config.warehouse_target.qualified_fact_table(), "ENTERPRISE_DB.PUBLIC.sales_fact");
        assert_eq!(config.schedule.interval(), Duration::from_secs(14_400));
        assert_eq!(config.load.on_error, OnErrorPolicy::Continue);
        assert!(!config.load.reconciled_retries);
        assert_eq!(config.transform.engine_conf.get("executor_memory").map(String::as_str), Some("4g"));

        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_for(1), Duration::from_secs(300));
    }

    #[test]
    fn test_example_file_parses() {
        let config = PipelineConfig::from_toml_str(include_str!("../../etlflow.example.toml")).unwrap();
        assert_eq!(config.extract.sources.len(), 1);
        assert_eq!(config.extract.sources[0].name, "sales");
        assert_eq!(config.transform.output_format, OutputFormat::Csv);
        assert_eq!(config.tables, PipelineConfig::default().tables);
    }

    #[test]
    fn test_parses_sections() {
        let config = PipelineConfig::from_toml_str(
            r#"
            pipeline_name = "nightly"

            [retry_defaults]
            max_attempts = 5
            delay_seconds = 2
            backoff = "exponential"
            max_delay_seconds = 10

            [extract]
            raw_prefix = "landing"
            sources = [{ name = "orders", path = "/data/orders.csv" }]

            [transform]
            mode = "all_raw_snapshots"
            output_format = "csv"

            [load]
            max_skipped_rows = 10
            reconciled_retries = true
            "#,
        )
        .unwrap();

        assert_eq!(config.pipeline_name, "nightly");
        assert_eq!(config.retry_defaults.backoff, BackoffStrategy::Exponential);
        assert_eq!(config.retry_policy().delay_for(3), Duration::from_secs(8));
        assert_eq!(config.extract.sources[0].name, "orders");
        assert_eq!(config.transform.mode, TransformInputMode::AllRawSnapshots);
        assert_eq!(config.transform.output_format, OutputFormat::Csv);
        assert_eq!(config.load.max_skipped_rows, Some(10));
        assert!(config.load.reconciled_retries);
    }

    #[test]
    fn test_rejects_invalid_values() {
        let cases = [
            ("[retry_defaults]\nmax_attempts = 0", "retry_defaults.max_attempts"),
            ("[warehouse_target]\nschema = \"bad-schema\"", "warehouse_target.schema"),
            ("[schedule]\ninterval_seconds = 0", "schedule.interval_seconds"),
            ("[warehouse_target]\nfact_table = \"orders\"", "tables"),
            ("[transform]\noutput_prefix = \"raw-data\"", "transform.output_prefix"),
        ];
        for (source, expected_field) in cases {
            match PipelineConfig::from_toml_str(source) {
                Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, expected_field),
                other => panic!("expected invalid {expected_field}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_parse_error_and_missing_file() {
        assert!(matches!(
            PipelineConfig::from_toml_str("pipeline_name = ["),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            PipelineConfig::from_file("/definitely/not/here.toml"),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etlflow.toml");
        std::fs::write(&path, "pipeline_name = \"from_disk\"\n").unwrap();
        assert_eq!(PipelineConfig::from_file(&path).unwrap().pipeline_name, "from_disk");
    }
}
