// =============================================================================
// reports/store.rs - WHERE REPORT DOCUMENTS LIVE
// =============================================================================
//
// A report store is a flat namespace of JSON documents keyed by file-style
// names ("leaderboard-2026-10-01.json"). The emitter writes, the reader
// lists and reads. Nothing else touches it.
//
// Backends:
//   FileReportStore    one file per key under a directory (the default)
//   MemoryReportStore  a map behind a lock; dry runs and tests
//   RedisReportStore   see redis_store.rs
// =============================================================================

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

use crate::error::StoreError;

#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Backend name, for logs.
    fn backend(&self) -> &'static str;

    /// Create or replace the document at `key`.
    async fn put(&self, key: &str, json: &str) -> Result<(), StoreError>;

    /// `None` when there is no document at `key`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Every key starting with `prefix`, sorted.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// Keys become file names, so they must stay inside the directory.
fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() || key.starts_with('.') || key.contains(['/', '\\']) {
        return Err(StoreError::Backend(format!("invalid report key {key:?}")));
    }
    Ok(())
}

pub struct FileReportStore {
    dir: PathBuf,
}

impl FileReportStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ReportStore for FileReportStore {
    fn backend(&self) -> &'static str {
        "file"
    }

    async fn put(&self, key: &str, json: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        // Write-then-rename so a reader never sees half a document.
        let target = self.dir.join(key);
        let staging = self.dir.join(format!(".{key}.tmp"));
        tokio::fs::write(&staging, json.as_bytes()).await?;
        tokio::fs::rename(&staging, &target).await?;

        debug!(path = %target.display(), bytes = json.len(), "Report written");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        validate_key(key)?;
        match tokio::fs::read_to_string(self.dir.join(key)).await {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with(prefix) && !name.starts_with('.') {
                keys.push(name);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[derive(Default)]
pub struct MemoryReportStore {
    documents: RwLock<BTreeMap<String, String>>,
}

impl MemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }
}

#[async_trait]
impl ReportStore for MemoryReportStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, key: &str, json: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        self.documents.write().insert(key.to_string(), json.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.documents.read().get(key).cloned())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .documents
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_store_roundtrip_and_listing() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileReportStore::new(tmp.path().join("reports"));

        assert!(store.list_keys("leaderboard-").await.unwrap().is_empty());
        assert_eq!(store.get("leaderboard-2026-09-01.json").await.unwrap(), None);

        store.put("leaderboard-2026-10-01.json", "{\"n\":2}").await.unwrap();
        store.put("leaderboard-2026-09-01.json", "{\"n\":1}").await.unwrap();
        store.put("public-dashboard-2026-10-01.json", "{}").await.unwrap();

        assert_eq!(
            store.list_keys("leaderboard-").await.unwrap(),
            vec!["leaderboard-2026-09-01.json", "leaderboard-2026-10-01.json"]
        );
        assert_eq!(
            store.get("leaderboard-2026-10-01.json").await.unwrap().as_deref(),
            Some("{\"n\":2}")
        );
    }

    #[tokio::test]
    async fn test_file_store_overwrites() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileReportStore::new(tmp.path());
        store.put("scan-run-2026-10-01.json", "old").await.unwrap();
        store.put("scan-run-2026-10-01.json", "new").await.unwrap();
        assert_eq!(store.get("scan-run-2026-10-01.json").await.unwrap().as_deref(), Some("new"));
        // No staging files left behind.
        assert_eq!(store.list_keys("").await.unwrap(), vec!["scan-run-2026-10-01.json"]);
    }

    #[tokio::test]
    async fn test_keys_cannot_escape_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileReportStore::new(tmp.path());
        assert!(store.put("../evil.json", "{}").await.is_err());
        assert!(store.put("a/b.json", "{}").await.is_err());
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryReportStore::new();
        store.put("customer-d1-2026-10-01.json", "{}").await.unwrap();
        store.put("customer-d2-2026-10-01.json", "{}").await.unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.list_keys("customer-d1-").await.unwrap().len(), 1);
        assert_eq!(store.get("missing.json").await.unwrap(), None);
    }
}
