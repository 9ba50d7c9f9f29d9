//! File System Access Implementation using Tokio

use async_trait::async_trait;
use bridge_traits::{error::Result, storage::FileSystemAccess};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

const APP_DIR_NAME: &str = "shelfsync";

/// Per-user data directory for the library database, settings and
/// downloads (`~/.local/share/shelfsync` on Linux).
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("share")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

/// Tokio-based file system access.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioFileSystem;

impl TokioFileSystem {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileSystemAccess for TokioFileSystem {
    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(fs::try_exists(path).await?)
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).await?;
        Ok(())
    }

    async fn delete_dir_all(&self, path: &Path) -> Result<()> {
        match fs::remove_dir_all(path).await {
            Ok(()) => {
                debug!(path = ?path, "Deleted directory");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_data_dir_is_app_scoped() {
        assert!(default_data_dir().ends_with(APP_DIR_NAME));
    }

    #[tokio::test]
    async fn test_book_directory_lifecycle() {
        let root = std::env::temp_dir().join(format!("shelfsync-fs-{}", uuid::Uuid::new_v4()));
        let book_dir = root.join("li_1");
        let fs_access = TokioFileSystem::new();

        fs_access.create_dir_all(&book_dir).await.unwrap();
        tokio::fs::write(book_dir.join("part01.mp3"), vec![0u8; 128])
            .await
            .unwrap();
        assert!(fs_access.exists(&book_dir.join("part01.mp3")).await.unwrap());

        fs_access.delete_dir_all(&book_dir).await.unwrap();
        assert!(!fs_access.exists(&book_dir).await.unwrap());

        // Deleting again is a no-op.
        fs_access.delete_dir_all(&book_dir).await.unwrap();
        fs_access.delete_dir_all(&root).await.unwrap();
    }
}
