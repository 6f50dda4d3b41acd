use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::fs;
use tokio::sync::RwLock;

use crate::error::{EditorError, EditorResult};

/// Binary attachment storage keyed by caller-chosen names.
///
/// Every backend failure surfaces as [`EditorError::StoreUnavailable`]; a
/// missing key is `Ok(None)` / `Ok(false)`, never an error.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, blob: Vec<u8>) -> EditorResult<String>;
    async fn get(&self, key: &str) -> EditorResult<Option<Vec<u8>>>;
    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> EditorResult<bool>;
    async fn clear(&self) -> EditorResult<()>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    quota_bytes: Option<u64>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            quota_bytes: Some(quota_bytes),
            ..Self::default()
        }
    }

    /// Makes every write fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> EditorResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EditorError::StoreUnavailable("blob store unavailable".into()));
        }
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, blob: Vec<u8>) -> EditorResult<String> {
        self.check_available()?;
        let mut blobs = self.blobs.write().await;
        if let Some(quota) = self.quota_bytes {
            let others: u64 = blobs
                .iter()
                .filter(|(existing, _)| existing.as_str() != key)
                .map(|(_, bytes)| bytes.len() as u64)
                .sum();
            if others + blob.len() as u64 > quota {
                return Err(EditorError::StoreUnavailable(format!(
                    "quota of {quota} bytes exceeded storing {key}"
                )));
            }
        }
        blobs.insert(key.to_owned(), blob);
        Ok(key.to_owned())
    }

    async fn get(&self, key: &str) -> EditorResult<Option<Vec<u8>>> {
        Ok(self.blobs.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> EditorResult<bool> {
        self.check_available()?;
        Ok(self.blobs.write().await.remove(key).is_some())
    }

    async fn clear(&self) -> EditorResult<()> {
        self.check_available()?;
        self.blobs.write().await.clear();
        Ok(())
    }
}

/// One file per key under a directory.
#[derive(Debug, Clone)]
pub struct LocalFsBlobStore {
    base_dir: PathBuf,
    quota_bytes: Option<u64>,
}

impl LocalFsBlobStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            quota_bytes: None,
        }
    }

    pub fn with_quota(mut self, quota_bytes: Option<u64>) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn blob_path(&self, key: &str) -> anyhow::Result<PathBuf> {
        if key.is_empty()
            || key == "."
            || key == ".."
            || key.contains(['/', '\\'])
            || key.chars().any(char::is_control)
        {
            anyhow::bail!("invalid blob key: {key:?}");
        }
        Ok(self.base_dir.join(format!("{key}.blob")))
    }

    /// Bytes held by every blob except `key`.
    async fn stored_bytes_except(&self, key: &Path) -> anyhow::Result<u64> {
        let mut entries = fs::read_dir(&self.base_dir)
            .await
            .with_context(|| format!("list blob dir: {}", self.base_dir.display()))?;
        let mut total = 0;
        while let Some(entry) = entries.next_entry().await.context("read blob dir entry")? {
            let path = entry.path();
            if path == key || path.extension().is_none_or(|ext| ext != "blob") {
                continue;
            }
            total += entry.metadata().await.context("stat blob")?.len();
        }
        Ok(total)
    }

    async fn put_inner(&self, key: &str, blob: &[u8]) -> anyhow::Result<()> {
        let path = self.blob_path(key)?;
        fs::create_dir_all(&self.base_dir)
            .await
            .with_context(|| format!("create blob dir: {}", self.base_dir.display()))?;
        if let Some(quota) = self.quota_bytes {
            let others = self.stored_bytes_except(&path).await?;
            if others + blob.len() as u64 > quota {
                anyhow::bail!("quota of {quota} bytes exceeded storing {key}");
            }
        }

        let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
        fs::write(&tmp_path, blob)
            .await
            .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path)
            .await
            .with_context(|| format!("rename tmp to final: {}", path.display()))?;
        Ok(())
    }

    async fn get_inner(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let path = self.blob_path(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("read blob: {}", path.display())),
        }
    }

    async fn delete_inner(&self, key: &str) -> anyhow::Result<bool> {
        let path = self.blob_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).with_context(|| format!("remove blob: {}", path.display())),
        }
    }

    async fn clear_inner(&self) -> anyhow::Result<()> {
        match fs::remove_dir_all(&self.base_dir).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("remove blob dir: {}", self.base_dir.display()));
            }
        }
        fs::create_dir_all(&self.base_dir)
            .await
            .with_context(|| format!("create blob dir: {}", self.base_dir.display()))?;
        Ok(())
    }
}

fn unavailable(err: anyhow::Error) -> EditorError {
    EditorError::StoreUnavailable(format!("{err:#}"))
}

#[async_trait]
impl BlobStore for LocalFsBlobStore {
    async fn put(&self, key: &str, blob: Vec<u8>) -> EditorResult<String> {
        self.put_inner(key, &blob).await.map_err(unavailable)?;
        tracing::debug!(key, bytes = blob.len(), "stored blob");
        Ok(key.to_owned())
    }

    async fn get(&self, key: &str) -> EditorResult<Option<Vec<u8>>> {
        self.get_inner(key).await.map_err(unavailable)
    }

    async fn delete(&self, key: &str) -> EditorResult<bool> {
        self.delete_inner(key).await.map_err(unavailable)
    }

    async fn clear(&self) -> EditorResult<()> {
        self.clear_inner().await.map_err(unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_put_get_delete_clear() -> anyhow::Result<()> {
        let store = MemoryBlobStore::new();
        assert_eq!(store.put("a", vec![1, 2]).await?, "a");
        store.put("a", vec![3]).await?;
        assert_eq!(store.get("a").await?, Some(vec![3]));
        assert_eq!(store.get("missing").await?, None);
        assert!(store.delete("a").await?);
        assert!(!store.delete("a").await?);
        store.put("b", vec![1]).await?;
        store.clear().await?;
        assert!(store.is_empty().await);
        Ok(())
    }

    #[tokio::test]
    async fn memory_store_quota_is_a_distinct_error() -> anyhow::Result<()> {
        let store = MemoryBlobStore::with_quota(4);
        store.put("a", vec![0; 3]).await?;
        let err = store.put("b", vec![0; 2]).await.unwrap_err();
        assert!(matches!(err, EditorError::StoreUnavailable(_)));
        assert_eq!(store.get("b").await?, None);
        // Overwriting an existing key only counts the new size.
        store.put("a", vec![0; 4]).await?;
        Ok(())
    }

    #[tokio::test]
    async fn local_fs_store_round_trips_and_clears() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let store = LocalFsBlobStore::new(temp.path().join("blobs"));
        store.put("setup-retrieve-shot", b"png".to_vec()).await?;
        assert_eq!(store.get("setup-retrieve-shot").await?, Some(b"png".to_vec()));
        assert_eq!(store.get("other").await?, None);
        assert!(store.delete("setup-retrieve-shot").await?);
        assert!(!store.delete("setup-retrieve-shot").await?);

        store.put("x", vec![1]).await?;
        store.clear().await?;
        assert_eq!(store.get("x").await?, None);
        assert!(store.base_dir().exists());
        Ok(())
    }

    #[tokio::test]
    async fn local_fs_store_enforces_its_quota() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let store = LocalFsBlobStore::new(temp.path()).with_quota(Some(4));
        store.put("a", vec![0; 3]).await?;
        let err = store.put("b", vec![0; 2]).await.unwrap_err();
        assert!(matches!(err, EditorError::StoreUnavailable(ref msg) if msg.contains("quota")));
        store.put("a", vec![0; 4]).await?;
        Ok(())
    }

    #[tokio::test]
    async fn local_fs_store_rejects_path_like_keys() {
        let temp = tempfile::TempDir::new().expect("tempdir");
        let store = LocalFsBlobStore::new(temp.path());
        let err = store.put("../escape", vec![1]).await.unwrap_err();
        assert!(matches!(err, EditorError::StoreUnavailable(_)));
    }
}
