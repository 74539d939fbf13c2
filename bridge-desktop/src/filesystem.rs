//! File System Implementation using tokio::fs

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{FileMetadata, FileSystemAccess},
};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Desktop filesystem implementation rooted at the platform data directory.
pub struct DesktopFileSystem {
    data_dir: PathBuf,
}

impl DesktopFileSystem {
    /// Create a filesystem adapter using the platform's data directory
    /// (e.g., `~/.local/share/<app>` on Linux).
    pub fn new(app_name: &str) -> Result<Self> {
        let base = dirs::data_dir().ok_or_else(|| {
            BridgeError::NotAvailable("No platform data directory".to_string())
        })?;
        Ok(Self {
            data_dir: base.join(app_name),
        })
    }

    /// Create a filesystem adapter rooted at an explicit directory.
    ///
    /// Used by tests and by hosts that manage their own storage layout.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: root.into(),
        }
    }
}

#[async_trait]
impl FileSystemAccess for DesktopFileSystem {
    async fn get_data_directory(&self) -> Result<PathBuf> {
        Ok(self.data_dir.clone())
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }

    async fn metadata(&self, path: &Path) -> Result<FileMetadata> {
        let meta = tokio::fs::metadata(path).await?;
        let modified_at = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64);

        Ok(FileMetadata {
            size: meta.len(),
            modified_at,
            is_directory: meta.is_dir(),
        })
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path).await?;
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> Result<Bytes> {
        let data = tokio::fs::read(path).await?;
        Ok(Bytes::from(data))
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        debug!(path = %path.display(), bytes = data.len(), "Writing file");
        tokio::fs::write(path, &data).await?;
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> Result<()> {
        tokio::fs::remove_file(path).await?;
        Ok(())
    }

    async fn delete_dir_all(&self, path: &Path) -> Result<()> {
        tokio::fs::remove_dir_all(path).await?;
        Ok(())
    }

    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(path).await?;
        let mut result = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            result.push(entry.path());
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_read_delete_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let fs = DesktopFileSystem::with_root(dir.path());
        let path = dir.path().join("nested/episode.mp3");

        fs.write_file(&path, Bytes::from_static(b"audio"))
            .await
            .unwrap();
        assert!(fs.exists(&path).await.unwrap());

        let data = fs.read_file(&path).await.unwrap();
        assert_eq!(&data[..], b"audio");

        let meta = fs.metadata(&path).await.unwrap();
        assert_eq!(meta.size, 5);
        assert!(!meta.is_directory);

        fs.delete_file(&path).await.unwrap();
        assert!(!fs.exists(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_directory() {
        let dir = tempfile::tempdir().unwrap();
        let fs = DesktopFileSystem::with_root(dir.path());

        fs.write_file(&dir.path().join("a.bin"), Bytes::from_static(b"a"))
            .await
            .unwrap();
        fs.write_file(&dir.path().join("b.bin"), Bytes::from_static(b"b"))
            .await
            .unwrap();

        let entries = fs.list_directory(dir.path()).await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_supports_local_files_by_default() {
        let fs = DesktopFileSystem::with_root("/tmp/apc-test");
        assert!(fs.supports_local_files());
    }
}
