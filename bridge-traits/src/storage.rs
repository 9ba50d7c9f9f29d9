//! Storage and File System Abstractions
//!
//! Platform-agnostic traits for downloaded-file management, secure credential
//! storage and key-value settings.

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;

/// File system access trait
///
/// The download queue lays out one directory per book and removes it on
/// cancel or delete; the playback coordinator checks for downloaded tracks
/// before streaming.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::FileSystemAccess;
///
/// async fn book_dir(fs: &dyn FileSystemAccess, root: &Path, book_id: &str) -> Result<PathBuf> {
///     let dir = root.join(book_id);
///     fs.create_dir_all(&dir).await?;
///     Ok(dir)
/// }
/// ```
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Check if a file or directory exists
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Create a directory and all parent directories if they don't exist
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Delete a directory and all its contents. A missing directory is not
    /// an error.
    async fn delete_dir_all(&self, path: &Path) -> Result<()>;
}

/// Secure credential storage trait
///
/// Backed by Keychain/Keystore/Secret Service on the host. Holds the server
/// access token.
///
/// Implementations MUST encrypt data at rest and never log values.
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// Store a secret value, replacing any previous value.
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Retrieve a secret value. Returns `Ok(None)` if the key doesn't exist.
    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete a secret. Deleting a missing key is not an error.
    async fn delete_secret(&self, key: &str) -> Result<()>;

    /// Check if a secret exists without retrieving it
    async fn has_secret(&self, key: &str) -> Result<bool> {
        Ok(self.get_secret(key).await?.is_some())
    }
}

/// Key-value settings storage trait
///
/// Holds small pieces of per-device state such as `downloads_wifi_only`,
/// the last played book and `abs_progress:{bookId}` resume points.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SettingsStore;
///
/// async fn remember_position(store: &dyn SettingsStore, book_id: &str, secs: f64) -> Result<()> {
///     store.set_f64(&format!("abs_progress:{book_id}"), secs).await
/// }
/// ```
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Store a string value
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;

    /// Retrieve a string value
    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    /// Store a boolean value
    async fn set_bool(&self, key: &str, value: bool) -> Result<()>;

    /// Retrieve a boolean value
    async fn get_bool(&self, key: &str) -> Result<Option<bool>>;

    /// Store a floating-point value
    async fn set_f64(&self, key: &str, value: f64) -> Result<()>;

    /// Retrieve a floating-point value
    async fn get_f64(&self, key: &str) -> Result<Option<f64>>;

    /// Delete a setting
    async fn delete(&self, key: &str) -> Result<()>;

    /// List all setting keys starting with `prefix`
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;
}
