//! Local-filesystem object store and file source.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::stages::ports::{CollaboratorError, CollaboratorResult, ObjectStore, SourceReader};

/// Object store rooted at a local directory.
///
/// Object names map to relative paths under the root; `/` separates
/// directories on every platform.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Creates a store rooted at `root`. The directory is created on first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> CollaboratorResult<PathBuf> {
        let relative = Path::new(name);
        let safe = !name.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(CollaboratorError::malformed(format!(
                "object name '{name}' must be a relative path without '..'"
            )));
        }
        Ok(self.root.join(relative))
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()?;
        Some(parts.join("/"))
    }

    async fn walk(&self) -> CollaboratorResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if let Some(key) = self.key_for(&path) {
                    if !key.ends_with(".tmp") {
                        keys.push(key);
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, name: &str, bytes: Vec<u8>) -> CollaboratorResult<String> {
        let path = self.path_for(name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write then rename so readers never observe a partial object.
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(object = name, size = bytes.len(), "Stored object");
        Ok(name.to_string())
    }

    async fn get(&self, location: &str) -> CollaboratorResult<Vec<u8>> {
        let path = self.path_for(location)?;
        Ok(tokio::fs::read(&path).await?)
    }

    async fn list(&self, prefix: &str) -> CollaboratorResult<Vec<String>> {
        Ok(self
            .walk()
            .await?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }

    async fn delete_prefix(&self, prefix: &str) -> CollaboratorResult<usize> {
        let keys = self.list(prefix).await?;
        for key in &keys {
            tokio::fs::remove_file(self.path_for(key)?).await?;
        }
        Ok(keys.len())
    }
}

/// A source reading one local file.
#[derive(Debug, Clone)]
pub struct CsvFileSource {
    name: String,
    path: PathBuf,
}

impl CsvFileSource {
    /// Creates a source named `name` reading `path`.
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

#[async_trait]
impl SourceReader for CsvFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self) -> CollaboratorResult<Vec<u8>> {
        tokio::fs::read(&self.path).await.map_err(|e| {
            let err: CollaboratorError = e.into();
            CollaboratorError::new(err.kind, format!("{}: {}", self.path.display(), err.message))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::ports::CollaboratorErrorKind;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_list_delete() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path());

        store.put("raw-data/a.csv", b"1".to_vec()).await.unwrap();
        store.put("raw-data/b.csv", b"2".to_vec()).await.unwrap();
        store
            .put("processed-data/year=2024/month=1/part-00000.csv", b"3".to_vec())
            .await
            .unwrap();

        assert_eq!(store.get("raw-data/b.csv").await.unwrap(), b"2".to_vec());
        assert_eq!(
            store.list("raw-data").await.unwrap(),
            vec!["raw-data/a.csv".to_string(), "raw-data/b.csv".to_string()]
        );
        assert_eq!(
            store.list("processed-data/").await.unwrap(),
            vec!["processed-data/year=2024/month=1/part-00000.csv".to_string()]
        );

        assert_eq!(store.delete_prefix("raw-data/").await.unwrap(), 2);
        assert!(store.list("raw-data").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path());
        store.put("k.csv", b"old".to_vec()).await.unwrap();
        store.put("k.csv", b"new".to_vec()).await.unwrap();
        assert_eq!(store.get("k.csv").await.unwrap(), b"new".to_vec());
        assert_eq!(store.list("").await.unwrap(), vec!["k.csv".to_string()]);
    }

    #[tokio::test]
    async fn test_rejects_escaping_names() {
        let store = FsObjectStore::new("/tmp/unused");
        let err = store.put("../etc/passwd", vec![]).await.unwrap_err();
        assert_eq!(err.kind, CollaboratorErrorKind::MalformedInput);
        assert!(store.get("/abs").await.is_err());
    }

    #[tokio::test]
    async fn test_missing_root_lists_empty() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path().join("absent"));
        assert!(store.list("").await.unwrap().is_empty());
        let err = store.get("nope.csv").await.unwrap_err();
        assert_eq!(err.kind, CollaboratorErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_csv_file_source() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("orders.csv");
        std::fs::write(&path, "id\n1\n").unwrap();

        let source = CsvFileSource::new("orders", &path);
        assert_eq!(source.name(), "orders");
        assert_eq!(source.read().await.unwrap(), b"id\n1\n".to_vec());

        let missing = CsvFileSource::new("x", dir.path().join("x.csv"));
        assert_eq!(missing.read().await.unwrap_err().kind, CollaboratorErrorKind::NotFound);
    }
}
