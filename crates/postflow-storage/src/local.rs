use crate::keys::validate_key;
use crate::traits::{Storage, StorageError, StorageResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Local filesystem storage implementation
#[derive(Clone, Debug)]
pub struct LocalStorage {
    base_path: PathBuf,
    public_base_url: Option<String>,
}

impl LocalStorage {
    /// Create a new LocalStorage instance
    ///
    /// # Arguments
    /// * `base_path` - Root directory for file storage (e.g., "/var/lib/postflow/media")
    /// * `public_base_url` - URL under which `base_path` is served publicly, if it is
    pub async fn new(
        base_path: impl Into<PathBuf>,
        public_base_url: Option<String>,
    ) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalStorage {
            base_path,
            public_base_url: public_base_url.filter(|u| !u.trim().is_empty()),
        })
    }

    /// Convert storage key to filesystem path with traversal checks
    fn key_to_path(&self, storage_key: &str) -> StorageResult<PathBuf> {
        if !validate_key(storage_key) {
            return Err(StorageError::InvalidKey(storage_key.to_string()));
        }

        let path = self.base_path.join(storage_key);
        if path.strip_prefix(&self.base_path).is_err() {
            return Err(StorageError::InvalidKey(
                "Storage key resolves outside storage directory".to_string(),
            ));
        }

        Ok(path)
    }

    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn put(&self, storage_key: &str, data: &[u8], _content_type: &str) -> StorageResult<()> {
        let path = self.key_to_path(storage_key)?;

        if fs::try_exists(&path).await.unwrap_or(false) {
            tracing::debug!(key = %storage_key, "Content already stored, keeping existing file");
            return Ok(());
        }

        self.ensure_parent_dir(&path).await?;

        let start = std::time::Instant::now();

        // write to a sibling temp file so readers never observe a partial blob
        let tmp_path = path.with_extension(format!(
            "{}.partial",
            path.extension().and_then(|e| e.to_str()).unwrap_or("bin")
        ));

        let mut file = fs::File::create(&tmp_path).await.map_err(|e| {
            StorageError::UploadFailed(format!(
                "Failed to create file {}: {}",
                tmp_path.display(),
                e
            ))
        })?;

        file.write_all(data).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to write file {}: {}", tmp_path.display(), e))
        })?;

        file.sync_all().await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to sync file {}: {}", tmp_path.display(), e))
        })?;

        fs::rename(&tmp_path, &path).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to move file into {}: {}", path.display(), e))
        })?;

        tracing::info!(
            path = %path.display(),
            key = %storage_key,
            size_bytes = data.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage upload successful"
        );

        Ok(())
    }

    async fn get(&self, storage_key: &str) -> StorageResult<Vec<u8>> {
        let path = self.key_to_path(storage_key)?;

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(storage_key.to_string()));
        }

        let data = fs::read(&path).await.map_err(|e| {
            StorageError::DownloadFailed(format!("Failed to read file {}: {}", path.display(), e))
        })?;

        tracing::debug!(key = %storage_key, size_bytes = data.len(), "Local storage read");

        Ok(data)
    }

    fn public_url(&self, storage_key: &str) -> Option<String> {
        let base = self.public_base_url.as_ref()?;
        validate_key(storage_key)
            .then(|| format!("{}/{}", base.trim_end_matches('/'), storage_key))
    }

    fn local_path(&self, storage_key: &str) -> Option<PathBuf> {
        self.key_to_path(storage_key).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), None).await.unwrap();

        storage
            .put("media/image/ab/abc.png", b"png-bytes", "image/png")
            .await
            .unwrap();

        assert!(storage
            .local_path("media/image/ab/abc.png")
            .is_some_and(|p| p.is_file()));
        assert_eq!(
            storage.get("media/image/ab/abc.png").await.unwrap(),
            b"png-bytes".to_vec()
        );
    }

    #[tokio::test]
    async fn existing_content_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), None).await.unwrap();

        storage.put("media/a/aa/aa.bin", b"first", "application/octet-stream").await.unwrap();
        storage.put("media/a/aa/aa.bin", b"second", "application/octet-stream").await.unwrap();

        assert_eq!(storage.get("media/a/aa/aa.bin").await.unwrap(), b"first".to_vec());
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), None).await.unwrap();

        assert!(matches!(
            storage.get("media/none.png").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), None).await.unwrap();

        assert!(matches!(
            storage.put("../escape.txt", b"x", "text/plain").await,
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn public_url_only_when_served() {
        let dir = tempfile::tempdir().unwrap();
        let private = LocalStorage::new(dir.path(), None).await.unwrap();
        assert_eq!(private.public_url("media/x.png"), None);

        let public = LocalStorage::new(dir.path(), Some("https://cdn.example.com/m/".to_string()))
            .await
            .unwrap();
        assert_eq!(
            public.public_url("media/x.png").as_deref(),
            Some("https://cdn.example.com/m/media/x.png")
        );
    }
}
