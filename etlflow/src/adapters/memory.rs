//! In-process object store, warehouse and source.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, LazyLock};
use tracing::debug;

use super::tabular::Table;
use crate::stages::ports::{
    BulkLoadRequest, CollaboratorError, CollaboratorResult, LoadCommitState, LoadSummary,
    ObjectStore, OnErrorPolicy, SourceReader, Warehouse,
};

/// Object store backed by an ordered map.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
    faults: Mutex<VecDeque<CollaboratorError>>,
}

impl InMemoryObjectStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an object directly.
    pub fn insert(&self, name: impl Into<String>, bytes: Vec<u8>) {
        self.objects.write().insert(name.into(), bytes);
    }

    /// Makes the next `put` fail with `err`.
    pub fn fail_next_put(&self, err: CollaboratorError) {
        self.faults.lock().push_back(err);
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Returns true if no objects are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Copy of every object, for state comparisons.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.objects.read().clone()
    }
}

impl std::fmt::Debug for InMemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryObjectStore")
            .field("objects", &self.len())
            .finish()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, name: &str, bytes: Vec<u8>) -> CollaboratorResult<String> {
        if let Some(err) = self.faults.lock().pop_front() {
            return Err(err);
        }
        self.objects.write().insert(name.to_string(), bytes);
        Ok(name.to_string())
    }

    async fn get(&self, location: &str) -> CollaboratorResult<Vec<u8>> {
        self.objects
            .read()
            .get(location)
            .cloned()
            .ok_or_else(|| CollaboratorError::not_found(format!("object '{location}'")))
    }

    async fn list(&self, prefix: &str) -> CollaboratorResult<Vec<String>> {
        Ok(self
            .objects
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete_prefix(&self, prefix: &str) -> CollaboratorResult<usize> {
        let mut objects = self.objects.write();
        let before = objects.len();
        objects.retain(|k, _| !k.starts_with(prefix));
        Ok(before - objects.len())
    }
}

/// A source returning fixed bytes.
#[derive(Debug, Clone)]
pub struct StaticSource {
    name: String,
    bytes: Vec<u8>,
}

impl StaticSource {
    /// Creates a source named `name` returning `contents`.
    #[must_use]
    pub fn new(name: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: contents.into(),
        }
    }
}

#[async_trait]
impl SourceReader for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self) -> CollaboratorResult<Vec<u8>> {
        Ok(self.bytes.clone())
    }
}

#[allow(clippy::expect_used)]
static CREATE_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*CREATE\s+TABLE\s+IF\s+NOT\s+EXISTS\s+([A-Za-z0-9_.]+)\s*\((.*)\)\s*;?\s*$")
        .expect("static DDL pattern")
});

/// A table held by [`InMemoryWarehouse`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarehouseTable {
    /// Column names, in order.
    pub columns: Vec<String>,
    /// Rows, aligned to `columns`.
    pub rows: Vec<Vec<String>>,
}

enum LoadFault {
    BeforeCommit(CollaboratorError),
    AfterCommit(CollaboratorError),
}

/// Warehouse that keeps tables in memory and copies CSV output from an object store.
///
/// Loads always append, so loading the same output twice duplicates rows.
/// Every committed load key is remembered for `load_state`.
pub struct InMemoryWarehouse {
    store: Arc<dyn ObjectStore>,
    tables: RwLock<BTreeMap<String, WarehouseTable>>,
    committed: RwLock<HashMap<(String, String), LoadSummary>>,
    statements: RwLock<Vec<String>>,
    faults: Mutex<VecDeque<LoadFault>>,
    bulk_loads: Mutex<usize>,
}

impl InMemoryWarehouse {
    /// Creates a warehouse reading load sources from `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            tables: RwLock::new(BTreeMap::new()),
            committed: RwLock::new(HashMap::new()),
            statements: RwLock::new(Vec::new()),
            faults: Mutex::new(VecDeque::new()),
            bulk_loads: Mutex::new(0),
        }
    }

    /// Makes the next `bulk_load` fail before writing anything.
    pub fn fail_next_load(&self, err: CollaboratorError) {
        self.faults.lock().push_back(LoadFault::BeforeCommit(err));
    }

    /// Makes the next `bulk_load` commit its rows and then report `err`.
    pub fn fail_next_load_after_commit(&self, err: CollaboratorError) {
        self.faults.lock().push_back(LoadFault::AfterCommit(err));
    }

    /// Returns a copy of a table.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<WarehouseTable> {
        self.tables.read().get(name).cloned()
    }

    /// Names of every table.
    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        self.tables.read().keys().cloned().collect()
    }

    /// Row count of a table, zero if absent.
    #[must_use]
    pub fn row_count(&self, name: &str) -> usize {
        self.tables.read().get(name).map_or(0, |t| t.rows.len())
    }

    /// Every DDL statement executed, in order.
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.statements.read().clone()
    }

    /// Number of `bulk_load` calls received.
    #[must_use]
    pub fn bulk_load_calls(&self) -> usize {
        *self.bulk_loads.lock()
    }

    async fn read_files(&self, source_location: &str) -> CollaboratorResult<Vec<(String, Table)>> {
        let mut files = Vec::new();
        for location in self.store.list(source_location).await? {
            if !location.ends_with(".csv") {
                continue;
            }
            let bytes = self.store.get(&location).await?;
            let text = String::from_utf8(bytes).map_err(|e| {
                CollaboratorError::malformed(format!("'{location}' is not UTF-8: {e}"))
            })?;
            files.push((location, Table::parse(&text)));
        }
        if files.is_empty() {
            return Err(CollaboratorError::not_found(format!(
                "no files under '{source_location}'"
            )));
        }
        Ok(files)
    }
}

impl std::fmt::Debug for InMemoryWarehouse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryWarehouse")
            .field("tables", &self.table_names())
            .finish_non_exhaustive()
    }
}

/// Splits a column list on commas outside parentheses.
fn split_columns(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in body.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(body[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(body[start..].trim());
    parts.into_iter().filter(|p| !p.is_empty()).collect()
}

#[async_trait]
impl Warehouse for InMemoryWarehouse {
    async fn execute_ddl(&self, statement: &str) -> CollaboratorResult<()> {
        let captures = CREATE_TABLE.captures(statement).ok_or_else(|| {
            CollaboratorError::malformed("only CREATE TABLE IF NOT EXISTS is supported")
        })?;
        let name = captures[1].to_string();
        let columns = split_columns(&captures[2])
            .into_iter()
            .filter_map(|c| c.split_whitespace().next().map(str::to_string))
            .collect::<Vec<_>>();

        self.statements.write().push(statement.to_string());
        let mut tables = self.tables.write();
        if !tables.contains_key(&name) {
            debug!(table = %name, columns = columns.len(), "Created table");
            tables.insert(
                name,
                WarehouseTable {
                    columns,
                    rows: Vec::new(),
                },
            );
        }
        Ok(())
    }

    async fn bulk_load(&self, request: &BulkLoadRequest) -> CollaboratorResult<LoadSummary> {
        *self.bulk_loads.lock() += 1;
        let fail_after_commit = match self.faults.lock().pop_front() {
            Some(LoadFault::BeforeCommit(err)) => return Err(err),
            Some(LoadFault::AfterCommit(err)) => Some(err),
            None => None,
        };

        let columns = self
            .tables
            .read()
            .get(&request.target_table)
            .map(|t| t.columns.clone())
            .ok_or_else(|| {
                CollaboratorError::not_found(format!("table '{}'", request.target_table))
            })?;

        let files = self.read_files(&request.source_location).await?;
        let mut staged = Vec::new();
        let mut summary = LoadSummary::default();

        for (location, file) in files {
            let mapping: Vec<Option<usize>> = columns.iter().map(|c| file.column(c)).collect();
            let mut file_rows = Vec::with_capacity(file.rows.len());
            let mut file_skipped = 0u64;

            for row in &file.rows {
                if row.len() != file.header.len() {
                    if request.on_error == OnErrorPolicy::AbortStatement {
                        return Err(CollaboratorError::malformed(format!(
                            "'{location}': expected {} fields, found {}",
                            file.header.len(),
                            row.len()
                        )));
                    }
                    file_skipped += 1;
                    continue;
                }
                file_rows.push(
                    mapping
                        .iter()
                        .map(|idx| idx.map(|i| row[i].clone()).unwrap_or_default())
                        .collect::<Vec<_>>(),
                );
            }

            if file_skipped > 0 && request.on_error == OnErrorPolicy::SkipFile {
                summary.rows_skipped += file.rows.len() as u64;
                continue;
            }
            summary.rows_loaded += file_rows.len() as u64;
            summary.rows_skipped += file_skipped;
            staged.extend(file_rows);
        }

        {
            let mut tables = self.tables.write();
            let table = tables.get_mut(&request.target_table).ok_or_else(|| {
                CollaboratorError::not_found(format!("table '{}'", request.target_table))
            })?;
            table.rows.extend(staged);
        }
        self.committed.write().insert(
            (request.target_table.clone(), request.load_key.clone()),
            summary,
        );

        match fail_after_commit {
            Some(err) => Err(err),
            None => Ok(summary),
        }
    }

    async fn load_state(&self, target_table: &str, load_key: &str) -> CollaboratorResult<LoadCommitState> {
        let key = (target_table.to_string(), load_key.to_string());
        Ok(if self.committed.read().contains_key(&key) {
            LoadCommitState::Committed
        } else {
            LoadCommitState::NotCommitted
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const DDL: &str = "CREATE TABLE IF NOT EXISTS DB.S.sales_fact (\n    sale_id INTEGER,\n    amount DECIMAL(10,2),\n    processed_date DATE\n)";

    fn request(on_error: OnErrorPolicy) -> BulkLoadRequest {
        BulkLoadRequest {
            source_location: "processed-data".to_string(),
            target_table: "DB.S.sales_fact".to_string(),
            on_error,
            load_key: "load:abc".to_string(),
        }
    }

    async fn seeded() -> (Arc<InMemoryObjectStore>, InMemoryWarehouse) {
        let store = Arc::new(InMemoryObjectStore::new());
        store.insert(
            "processed-data/year=2024/month=1/part-00000.csv",
            b"sale_id,amount,processed_date,year,month\n1,9.99,2024-02-01,2024,1\n2,5.00\n".to_vec(),
        );
        store.insert(
            "processed-data/year=2024/month=2/part-00000.csv",
            b"sale_id,amount,processed_date,year,month\n3,1.00,2024-02-01,2024,2\n".to_vec(),
        );
        let warehouse = InMemoryWarehouse::new(store.clone());
        warehouse.execute_ddl(DDL).await.unwrap();
        (store, warehouse)
    }

    #[tokio::test]
    async fn test_object_store_roundtrip_and_prefix_ops() {
        let store = InMemoryObjectStore::new();
        store.put("a/1.csv", b"x".to_vec()).await.unwrap();
        store.put("a/2.csv", b"y".to_vec()).await.unwrap();
        store.put("b/1.csv", b"z".to_vec()).await.unwrap();

        assert_eq!(store.get("a/2.csv").await.unwrap(), b"y".to_vec());
        assert_eq!(store.list("a/").await.unwrap(), vec!["a/1.csv", "a/2.csv"]);
        assert_eq!(store.delete_prefix("a/").await.unwrap(), 2);
        assert_eq!(store.len(), 1);
        assert!(store.get("a/1.csv").await.is_err());
    }

    #[tokio::test]
    async fn test_injected_put_fault() {
        let store = InMemoryObjectStore::new();
        store.fail_next_put(CollaboratorError::transient("503"));
        assert!(store.put("k", vec![]).await.is_err());
        assert!(store.put("k", vec![]).await.is_ok());
    }

    #[test]
    fn test_split_columns_respects_parens() {
        assert_eq!(
            split_columns("a INTEGER, b DECIMAL(10,2), c DATE"),
            vec!["a INTEGER", "b DECIMAL(10,2)", "c DATE"]
        );
    }

    #[tokio::test]
    async fn test_ddl_creates_once() {
        let (_, warehouse) = seeded().await;
        warehouse.execute_ddl(DDL).await.unwrap();

        assert_eq!(warehouse.table_names(), vec!["DB.S.sales_fact"]);
        assert_eq!(
            warehouse.table("DB.S.sales_fact").unwrap().columns,
            vec!["sale_id", "amount", "processed_date"]
        );
        assert_eq!(warehouse.statements().len(), 2);
        assert!(warehouse.execute_ddl("DROP TABLE x").await.is_err());
    }

    #[tokio::test]
    async fn test_bulk_load_continue_skips_malformed_rows() {
        let (_, warehouse) = seeded().await;
        let summary = warehouse.bulk_load(&request(OnErrorPolicy::Continue)).await.unwrap();

        assert_eq!(summary, LoadSummary { rows_loaded: 2, rows_skipped: 1 });
        assert_eq!(
            warehouse.table("DB.S.sales_fact").unwrap().rows,
            vec![
                vec!["1".to_string(), "9.99".to_string(), "2024-02-01".to_string()],
                vec!["3".to_string(), "1.00".to_string(), "2024-02-01".to_string()],
            ]
        );
        assert_eq!(
            warehouse.load_state("DB.S.sales_fact", "load:abc").await.unwrap(),
            LoadCommitState::Committed
        );
    }

    #[tokio::test]
    async fn test_bulk_load_skip_file_and_abort() {
        let (_, warehouse) = seeded().await;
        let summary = warehouse.bulk_load(&request(OnErrorPolicy::SkipFile)).await.unwrap();
        assert_eq!(summary, LoadSummary { rows_loaded: 1, rows_skipped: 2 });

        let err = warehouse
            .bulk_load(&request(OnErrorPolicy::AbortStatement))
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::stages::ports::CollaboratorErrorKind::MalformedInput);
    }

    #[tokio::test]
    async fn test_loading_twice_duplicates_rows() {
        let (_, warehouse) = seeded().await;
        warehouse.bulk_load(&request(OnErrorPolicy::Continue)).await.unwrap();
        warehouse.bulk_load(&request(OnErrorPolicy::Continue)).await.unwrap();
        assert_eq!(warehouse.row_count("DB.S.sales_fact"), 4);
        assert_eq!(warehouse.bulk_load_calls(), 2);
    }

    #[tokio::test]
    async fn test_faults_before_and_after_commit() {
        let (_, warehouse) = seeded().await;

        warehouse.fail_next_load(CollaboratorError::transient("timeout"));
        assert!(warehouse.bulk_load(&request(OnErrorPolicy::Continue)).await.is_err());
        assert_eq!(warehouse.row_count("DB.S.sales_fact"), 0);
        assert_eq!(
            warehouse.load_state("DB.S.sales_fact", "load:abc").await.unwrap(),
            LoadCommitState::NotCommitted
        );

        warehouse.fail_next_load_after_commit(CollaboratorError::transient("connection dropped"));
        assert!(warehouse.bulk_load(&request(OnErrorPolicy::Continue)).await.is_err());
        assert_eq!(warehouse.row_count("DB.S.sales_fact"), 2);
        assert_eq!(
            warehouse.load_state("DB.S.sales_fact", "load:abc").await.unwrap(),
            LoadCommitState::Committed
        );
    }

    #[tokio::test]
    async fn test_missing_table_is_not_found() {
        let warehouse = InMemoryWarehouse::new(Arc::new(InMemoryObjectStore::new()));
        let err = warehouse.bulk_load(&request(OnErrorPolicy::Continue)).await.unwrap_err();
        assert_eq!(err.kind, crate::stages::ports::CollaboratorErrorKind::NotFound);
    }
}
