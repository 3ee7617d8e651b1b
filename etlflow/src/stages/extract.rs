//! Extract: copy source records into timestamped raw objects.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use super::ports::{ObjectStore, SourceReader};
use super::Stage;
use crate::context::StageContext;
use crate::core::{Artifact, ArtifactKind, FailureCause, StageKind, StageOutcome};

/// Reads every configured source and writes one raw snapshot object per source.
///
/// Object names carry the attempt's start time, so a retry writes a fresh
/// snapshot next to any partial one instead of appending to it.
pub struct ExtractStage {
    name: String,
    store: Arc<dyn ObjectStore>,
    sources: Vec<Arc<dyn SourceReader>>,
    raw_prefix: String,
}

impl ExtractStage {
    /// Creates an extract stage writing under `raw_prefix`.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, raw_prefix: impl Into<String>) -> Self {
        Self {
            name: StageKind::Extract.to_string(),
            store,
            sources: Vec::new(),
            raw_prefix: raw_prefix.into(),
        }
    }

    /// Overrides the stage name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Adds a source.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn SourceReader>) -> Self {
        self.sources.push(source);
        self
    }

    /// Adds several sources.
    #[must_use]
    pub fn with_sources(mut self, sources: impl IntoIterator<Item = Arc<dyn SourceReader>>) -> Self {
        self.sources.extend(sources);
        self
    }

    fn object_name(&self, source: &dyn SourceReader, stamp: &str) -> String {
        let file = if self.sources.len() == 1 {
            format!("raw_data_{stamp}.csv")
        } else {
            format!("{}_{stamp}.csv", source.name())
        };
        join_key(&self.raw_prefix, &file)
    }
}

impl std::fmt::Debug for ExtractStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractStage")
            .field("name", &self.name)
            .field("raw_prefix", &self.raw_prefix)
            .field("sources", &self.sources.iter().map(|s| s.name()).collect::<Vec<_>>())
            .finish()
    }
}

/// Joins an object prefix and a name with a single `/`.
pub(crate) fn join_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

#[async_trait]
impl Stage for ExtractStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Extract
    }

    async fn execute(&self, _inputs: &[Artifact], ctx: &StageContext) -> StageOutcome {
        if self.sources.is_empty() {
            return StageOutcome::fatal(FailureCause::data_contract(
                "no sources configured for extract",
            ));
        }

        let stamp = ctx.snapshot_stamp();
        let mut locations = Vec::with_capacity(self.sources.len());
        let mut bytes_written = 0u64;

        for source in &self.sources {
            if ctx.is_cancelled() {
                return StageOutcome::fatal(FailureCause::cancelled(
                    "run cancelled during extract",
                ));
            }

            let payload = match source.read().await {
                Ok(bytes) => bytes,
                Err(e) => {
                    return e.into_outcome(&format!("read source '{}'", source.name()), ctx.attempt())
                }
            };

            let name = self.object_name(source.as_ref(), &stamp);
            let size = payload.len() as u64;
            match self.store.put(&name, payload).await {
                Ok(location) => {
                    debug!(run_id = %ctx.run_id(), source = source.name(), %location, size, "Wrote raw snapshot");
                    bytes_written += size;
                    locations.push(location);
                }
                Err(e) => return e.into_outcome(&format!("put '{name}'"), ctx.attempt()),
            }
        }

        info!(
            run_id = %ctx.run_id(),
            objects = locations.len(),
            bytes_written,
            "Extract wrote raw snapshots"
        );

        let objects_written = locations.len() as u64;
        let artifact = Artifact::new(ArtifactKind::RawSnapshot, StageKind::Extract)
            .with_locations(locations)
            .with_metadata("snapshot_stamp", serde_json::json!(stamp))
            .with_metadata("raw_prefix", serde_json::json!(self.raw_prefix));

        StageOutcome::success_with_metrics(
            artifact,
            [
                ("objects_written", objects_written),
                ("bytes_written", bytes_written),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryObjectStore, StaticSource};
    use crate::stages::ports::{CollaboratorError, CollaboratorResult};
    use chrono::{TimeZone, Utc};

    #[derive(Debug)]
    struct FailingSource(CollaboratorError);

    #[async_trait]
    impl SourceReader for FailingSource {
        fn name(&self) -> &str {
            "failing"
        }

        async fn read(&self) -> CollaboratorResult<Vec<u8>> {
            Err(self.0.clone())
        }
    }

    fn fixed_ctx() -> StageContext {
        StageContext::standalone(StageKind::Extract)
            .with_attempt_started_at(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn test_single_source_uses_raw_data_name() {
        let store = Arc::new(InMemoryObjectStore::new());
        let stage = ExtractStage::new(store.clone(), "raw-data")
            .with_source(Arc::new(StaticSource::new("orders", "id,amount\n1,2.50\n")));

        let outcome = stage.execute(&[], &fixed_ctx()).await;

        let artifact = outcome.artifact().unwrap();
        assert_eq!(artifact.kind, ArtifactKind::RawSnapshot);
        assert_eq!(
            artifact.locations,
            vec!["raw-data/raw_data_20240501_120000.csv".to_string()]
        );
        assert_eq!(outcome.metric("objects_written"), Some(1));
        assert_eq!(outcome.metric("bytes_written"), Some(17));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_multiple_sources_are_named_by_source() {
        let store = Arc::new(InMemoryObjectStore::new());
        let stage = ExtractStage::new(store.clone(), "raw-data/")
            .with_source(Arc::new(StaticSource::new("orders", "a\n1\n")))
            .with_source(Arc::new(StaticSource::new("customers", "b\n2\n")));

        let outcome = stage.execute(&[], &fixed_ctx()).await;

        assert_eq!(
            outcome.artifact().unwrap().locations,
            vec![
                "raw-data/orders_20240501_120000.csv".to_string(),
                "raw-data/customers_20240501_120000.csv".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_repeat_with_same_clock_converges() {
        let store = Arc::new(InMemoryObjectStore::new());
        let stage = ExtractStage::new(store.clone(), "raw-data")
            .with_source(Arc::new(StaticSource::new("orders", "id\n1\n")));

        stage.execute(&[], &fixed_ctx()).await;
        let first = store.snapshot();
        stage.execute(&[], &fixed_ctx()).await;

        assert_eq!(store.snapshot(), first);
    }

    #[tokio::test]
    async fn test_no_sources_is_fatal() {
        let stage = ExtractStage::new(Arc::new(InMemoryObjectStore::new()), "raw-data");
        let outcome = stage.execute(&[], &fixed_ctx()).await;
        assert!(outcome.is_fatal());
    }

    #[tokio::test]
    async fn test_source_errors_are_classified() {
        let stage = ExtractStage::new(Arc::new(InMemoryObjectStore::new()), "raw-data")
            .with_source(Arc::new(FailingSource(CollaboratorError::transient("timeout"))));
        assert!(stage.execute(&[], &fixed_ctx()).await.is_retryable());

        let stage = ExtractStage::new(Arc::new(InMemoryObjectStore::new()), "raw-data")
            .with_source(Arc::new(FailingSource(CollaboratorError::unauthorized("denied"))));
        assert!(stage.execute(&[], &fixed_ctx()).await.is_fatal());
    }

    #[test]
    fn test_join_key() {
        assert_eq!(join_key("raw-data/", "a.csv"), "raw-data/a.csv");
        assert_eq!(join_key("", "a.csv"), "a.csv");
    }
}
