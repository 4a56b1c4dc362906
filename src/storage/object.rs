//! Object-storage backends
//!
//! - `MemoryObjectStore`: keeps objects in a map and counts uploads
//! - `LocalObjectStore`: writes `<root>/<bucket>/<key>` with a JSON
//!   metadata sidecar next to each object

use crate::storage::traits::{ObjectStore, StorageError, StorageResult};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use url::Url;

/// An object held by [`MemoryObjectStore`]
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct MemoryObjects {
    objects: HashMap<(String, String), StoredObject>,
    puts: usize,
}

/// In-memory [`ObjectStore`]
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    inner: Mutex<MemoryObjects>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct stored objects
    pub fn object_count(&self) -> usize {
        self.lock().objects.len()
    }

    /// Number of `put` calls, including overwrites
    pub fn put_count(&self) -> usize {
        self.lock().puts
    }

    /// Keys stored in `bucket` under `prefix`, sorted
    pub fn keys(&self, bucket: &str, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .lock()
            .objects
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Returns a stored object with its metadata
    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.lock()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryObjects> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> StorageResult<()> {
        let mut inner = self.lock();
        inner.puts += 1;
        inner.objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
                metadata: metadata.clone(),
            },
        );
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.object(bucket, key).map(|o| o.bytes))
    }

    async fn presigned_get(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> StorageResult<String> {
        if self.object(bucket, key).is_none() {
            return Err(StorageError::NotFound(format!("{}/{}", bucket, key)));
        }
        Ok(format!("memory://{}/{}?expires={}", bucket, key, expiry(ttl)))
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Sidecar {
    content_type: String,
    size: usize,
    metadata: HashMap<String, String>,
}

/// Filesystem-backed [`ObjectStore`]
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    /// Creates a store rooted at `root`; directories are created on demand
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `bucket/key` below the root, refusing keys that escape it
    fn object_path(&self, bucket: &str, key: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(bucket).join(key);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));

        if !safe {
            return Err(StorageError::Object(format!("Invalid object key: {}/{}", bucket, key)));
        }

        Ok(self.root.join(relative))
    }

    fn sidecar_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(".meta.json");
        PathBuf::from(name)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> StorageResult<()> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let sidecar = Sidecar {
            content_type: content_type.to_string(),
            size: bytes.len(),
            metadata: metadata.clone(),
        };

        tokio::fs::write(&path, bytes).await?;
        tokio::fs::write(Self::sidecar_path(&path), serde_json::to_vec_pretty(&sidecar)?).await?;

        tracing::trace!("Stored object {}", path.display());
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn presigned_get(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> StorageResult<String> {
        let path = self.object_path(bucket, key)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(StorageError::NotFound(format!("{}/{}", bucket, key)));
        }

        let absolute = std::path::absolute(&path)?;
        let mut url = Url::from_file_path(&absolute)
            .map_err(|_| StorageError::Object(format!("Not an absolute path: {}", path.display())))?;
        url.query_pairs_mut()
            .append_pair("expires", &expiry(ttl).to_string());

        Ok(url.to_string())
    }
}

fn expiry(ttl: Duration) -> i64 {
    Utc::now().timestamp() + i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX / 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> HashMap<String, String> {
        HashMap::from([("session-id".to_string(), "s1".to_string())])
    }

    #[tokio::test]
    async fn test_memory_put_and_get() {
        let store = MemoryObjectStore::new();
        store
            .put("bucket", "a/b.txt", b"hello".to_vec(), "text/plain", &meta())
            .await
            .unwrap();
        store
            .put("bucket", "a/b.txt", b"again".to_vec(), "text/plain", &meta())
            .await
            .unwrap();

        assert_eq!(store.object_count(), 1);
        assert_eq!(store.put_count(), 2);
        assert_eq!(store.get("bucket", "a/b.txt").await.unwrap(), Some(b"again".to_vec()));
        assert_eq!(store.keys("bucket", "a/"), vec!["a/b.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_memory_presigned_requires_object() {
        let store = MemoryObjectStore::new();
        let missing = store
            .presigned_get("bucket", "nope", Duration::from_secs(3600))
            .await;
        assert!(matches!(missing, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_local_store_writes_object_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        store
            .put("crawl", "sessions/s1/page.json", b"{}".to_vec(), "application/json", &meta())
            .await
            .unwrap();

        let object = dir.path().join("crawl/sessions/s1/page.json");
        assert!(object.exists());

        let sidecar = std::fs::read_to_string(dir.path().join("crawl/sessions/s1/page.json.meta.json"))
            .unwrap();
        assert!(sidecar.contains("session-id"));

        let url = store
            .presigned_get("crawl", "sessions/s1/page.json", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.contains("expires="));
    }

    #[tokio::test]
    async fn test_local_store_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        let result = store
            .put("crawl", "../outside", Vec::new(), "text/plain", &HashMap::new())
            .await;
        assert!(matches!(result, Err(StorageError::Object(_))));
        assert_eq!(store.get("crawl", "missing").await.unwrap(), None);
    }
}
