//! In-process compute engine that rewrites raw CSV into partitioned output.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use super::tabular::Table;
use crate::stages::extract::join_key;
use crate::stages::ports::{
    CollaboratorError, CollaboratorResult, ComputeEngine, JobResult, JobSpec, ObjectStore,
    OutputFormat,
};
use crate::utils::{parse_partition_date, year_month};

/// Partition value for rows whose date cannot be parsed.
pub const DEFAULT_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

/// Runs transform jobs against an object store in the current process.
///
/// Adds `processed_date`, `year` and `month` columns, groups rows into
/// `year=Y/month=M/part-00000.csv` under the output location and replaces
/// whatever was there. Only CSV output is produced.
#[derive(Clone)]
pub struct LocalComputeEngine {
    store: Arc<dyn ObjectStore>,
}

impl LocalComputeEngine {
    /// Creates an engine over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    async fn read_inputs(&self, job: &JobSpec) -> CollaboratorResult<Table> {
        let mut merged: Option<Table> = None;
        for location in &job.inputs {
            let bytes = self.store.get(location).await?;
            let text = String::from_utf8(bytes).map_err(|e| {
                CollaboratorError::malformed(format!("'{location}' is not UTF-8: {e}"))
            })?;
            let table = Table::parse(&text);
            if table.header.is_empty() {
                continue;
            }
            match merged.as_mut() {
                None => merged = Some(table),
                Some(acc) if acc.header == table.header => acc.rows.extend(table.rows),
                Some(acc) => {
                    return Err(CollaboratorError::schema_mismatch(format!(
                        "'{location}' header {:?} differs from {:?}",
                        table.header, acc.header
                    )))
                }
            }
        }
        merged.ok_or_else(|| CollaboratorError::malformed("job inputs contain no data"))
    }
}

impl std::fmt::Debug for LocalComputeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalComputeEngine").finish_non_exhaustive()
    }
}

#[async_trait]
impl ComputeEngine for LocalComputeEngine {
    async fn submit(&self, job: &JobSpec) -> CollaboratorResult<JobResult> {
        if job.output_format != OutputFormat::Csv {
            return Err(CollaboratorError::malformed(format!(
                "local engine cannot write {} output",
                job.output_format
            )));
        }

        let input = self.read_inputs(job).await?;
        let date_idx = input.column(&job.date_column).ok_or_else(|| {
            CollaboratorError::schema_mismatch(format!(
                "date column '{}' not in {:?}",
                job.date_column, input.header
            ))
        })?;

        let mut header = input.header.clone();
        header.extend(["processed_date", "year", "month"].map(String::from));

        let mut partitions: BTreeMap<(String, String), Vec<Vec<String>>> = BTreeMap::new();
        for mut row in input.rows {
            let (year, month) = row
                .get(date_idx)
                .and_then(|v| parse_partition_date(v))
                .map_or_else(
                    || (DEFAULT_PARTITION.to_string(), DEFAULT_PARTITION.to_string()),
                    |d| {
                        let (y, m) = year_month(d);
                        (y.to_string(), m.to_string())
                    },
                );
            row.extend([job.processed_date.clone(), year.clone(), month.clone()]);
            partitions.entry((year, month)).or_default().push(row);
        }

        self.store.delete_prefix(&job.output_location).await?;

        let mut rows_written = 0u64;
        for ((year, month), rows) in &partitions {
            rows_written += rows.len() as u64;
            let table = Table {
                header: header.clone(),
                rows: rows.clone(),
            };
            let name = join_key(
                &job.output_location,
                &format!("year={year}/month={month}/part-00000.csv"),
            );
            self.store.put(&name, table.render().into_bytes()).await?;
        }

        info!(
            app = %job.app_name,
            inputs = job.inputs.len(),
            rows_written,
            partitions = partitions.len(),
            "Local job finished"
        );

        Ok(JobResult {
            output_location: job.output_location.clone(),
            rows_written,
            partitions_written: partitions.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryObjectStore;
    use crate::stages::ports::{CollaboratorErrorKind, WriteMode};
    use pretty_assertions::assert_eq;

    fn job(inputs: &[&str]) -> JobSpec {
        JobSpec {
            app_name: "DataTransformation".to_string(),
            inputs: inputs.iter().map(|s| (*s).to_string()).collect(),
            output_location: "processed-data".to_string(),
            output_format: OutputFormat::Csv,
            write_mode: WriteMode::Overwrite,
            date_column: "sale_date".to_string(),
            processed_date: "2024-06-01".to_string(),
            partition_by: vec!["year".to_string(), "month".to_string()],
            engine_conf: BTreeMap::new(),
        }
    }

    fn seeded_store() -> Arc<InMemoryObjectStore> {
        let store = Arc::new(InMemoryObjectStore::new());
        store.insert(
            "raw-data/raw_data_1.csv",
            b"sale_id,sale_date\n1,2024-01-15\n2,2024-02-01\n3,bogus\n".to_vec(),
        );
        store
    }

    #[tokio::test]
    async fn test_partitions_rows_by_year_and_month() {
        let store = seeded_store();
        let engine = LocalComputeEngine::new(store.clone());

        let result = engine.submit(&job(&["raw-data/raw_data_1.csv"])).await.unwrap();

        assert_eq!(result.rows_written, 3);
        assert_eq!(result.partitions_written, 3);
        assert_eq!(
            store.list("processed-data/").await.unwrap(),
            vec![
                "processed-data/year=2024/month=1/part-00000.csv".to_string(),
                "processed-data/year=2024/month=2/part-00000.csv".to_string(),
                format!("processed-data/year={DEFAULT_PARTITION}/month={DEFAULT_PARTITION}/part-00000.csv"),
            ]
        );
        let jan = store
            .get("processed-data/year=2024/month=1/part-00000.csv")
            .await
            .unwrap();
        assert_eq!(
            String::from_utf8(jan).unwrap(),
            "sale_id,sale_date,processed_date,year,month\n1,2024-01-15,2024-06-01,2024,1\n"
        );
    }

    #[tokio::test]
    async fn test_rerun_overwrites_output() {
        let store = seeded_store();
        store.insert("processed-data/stale/part.csv", b"old".to_vec());
        let engine = LocalComputeEngine::new(store.clone());

        engine.submit(&job(&["raw-data/raw_data_1.csv"])).await.unwrap();
        let first = store.snapshot();
        engine.submit(&job(&["raw-data/raw_data_1.csv"])).await.unwrap();

        assert_eq!(store.snapshot(), first);
        assert!(!first.contains_key("processed-data/stale/part.csv"));
    }

    #[tokio::test]
    async fn test_missing_date_column_is_schema_mismatch() {
        let store = Arc::new(InMemoryObjectStore::new());
        store.insert("raw.csv", b"id\n1\n".to_vec());
        let engine = LocalComputeEngine::new(store);

        let err = engine.submit(&job(&["raw.csv"])).await.unwrap_err();
        assert_eq!(err.kind, CollaboratorErrorKind::SchemaMismatch);
    }

    #[tokio::test]
    async fn test_parquet_is_rejected() {
        let engine = LocalComputeEngine::new(seeded_store());
        let mut spec = job(&["raw-data/raw_data_1.csv"]);
        spec.output_format = OutputFormat::Parquet;
        assert_eq!(
            engine.submit(&spec).await.unwrap_err().kind,
            CollaboratorErrorKind::MalformedInput
        );
    }

    #[tokio::test]
    async fn test_mismatched_headers_are_rejected() {
        let store = seeded_store();
        store.insert("raw-data/raw_data_2.csv", b"other\n1\n".to_vec());
        let engine = LocalComputeEngine::new(store);

        let err = engine
            .submit(&job(&["raw-data/raw_data_1.csv", "raw-data/raw_data_2.csv"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind, CollaboratorErrorKind::SchemaMismatch);
    }
}
