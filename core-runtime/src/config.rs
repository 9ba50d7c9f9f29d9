//! # Core Configuration Module
//!
//! `CoreConfig` holds every injected bridge plus the tunables of the sync core.
//! It is constructed with [`CoreConfigBuilder`], which validates the result
//! and fails fast when a required capability is missing.
//!
//! ## Required Dependencies
//!
//! - `SecureStore` - access token persistence
//! - `SettingsStore` - resume points, last played book, download preferences
//! - `AudioEngine` - the host player
//!
//! ## Optional Dependencies (with desktop defaults)
//!
//! - `HttpClient` - reqwest under `desktop-shims`
//! - `FileSystemAccess` - tokio fs under `desktop-shims`
//! - `FileTransferEngine` - reqwest/tokio downloader under `desktop-shims`
//! - `NetworkMonitor` - Wi-Fi-only download admission; without one the
//!   preference is not enforced
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .server_url("https://abs.example.com")
//!     .database_path("/data/shelfsync/library.db")
//!     .download_dir("/data/shelfsync/downloads")
//!     .secure_store(Arc::new(MySecureStore))
//!     .settings_store(Arc::new(MySettingsStore))
//!     .audio_engine(Arc::new(MyAudioEngine))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{
    AudioEngine, Clock, FileSystemAccess, FileTransferEngine, HttpClient, NetworkMonitor,
    SecureStore, SettingsStore, SystemClock,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Per-operation network deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkTimeouts {
    /// Catalog reads and file listings
    pub request: Duration,
    /// Progress fetch/report and completion fetch/update
    pub progress: Duration,
    /// Playback session open/close/sync
    pub session: Duration,
    /// Bounded session validation; kept to single-digit seconds
    pub validation: Duration,
}

impl Default for NetworkTimeouts {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(15),
            progress: Duration::from_secs(8),
            session: Duration::from_secs(15),
            validation: Duration::from_secs(5),
        }
    }
}

/// Feature flags control optional behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureFlags {
    /// Resolve missing duration/size when a book is loaded for playback
    /// instead of only on explicit request. Off by default because each
    /// duration resolution opens a server-side session.
    pub eager_metadata_resolution: bool,
    /// Enforce the Wi-Fi-only download preference (requires NetworkMonitor)
    pub enable_network_awareness: bool,
}

/// Core configuration for the sync core.
#[derive(Clone)]
pub struct CoreConfig {
    /// Base URL of the catalog/progress server
    pub server_url: String,
    /// Path to the SQLite library cache
    pub database_path: PathBuf,
    /// Root directory for downloaded books
    pub download_dir: PathBuf,

    pub http_client: Arc<dyn HttpClient>,
    pub file_system: Arc<dyn FileSystemAccess>,
    pub secure_store: Arc<dyn SecureStore>,
    pub settings_store: Arc<dyn SettingsStore>,
    pub audio_engine: Arc<dyn AudioEngine>,
    pub transfer_engine: Arc<dyn FileTransferEngine>,
    pub network_monitor: Option<Arc<dyn NetworkMonitor>>,
    pub clock: Arc<dyn Clock>,

    pub timeouts: NetworkTimeouts,
    /// Cadence of background progress reports while playing
    pub progress_report_interval: Duration,
    /// Page size for the post-login library sync
    pub sync_page_size: u32,
    /// Upper bound for the post-login library sync
    pub login_sync_timeout: Duration,
    pub features: FeatureFlags,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("server_url", &self.server_url)
            .field("database_path", &self.database_path)
            .field("download_dir", &self.download_dir)
            .field(
                "network_monitor",
                &self.network_monitor.as_ref().map(|_| "NetworkMonitor { ... }"),
            )
            .field("timeouts", &self.timeouts)
            .field("progress_report_interval", &self.progress_report_interval)
            .field("sync_page_size", &self.sync_page_size)
            .field("login_sync_timeout", &self.login_sync_timeout)
            .field("features", &self.features)
            .finish_non_exhaustive()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates paths, intervals and feature/bridge consistency.
    pub fn validate(&self) -> Result<()> {
        let url = self.server_url.trim();
        if url.is_empty() {
            return Err(Error::Config("Server URL cannot be empty".to_string()));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "Server URL must start with http:// or https://, got '{}'",
                url
            )));
        }

        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }
        if self.download_dir.as_os_str().is_empty() {
            return Err(Error::Config("Download directory cannot be empty".to_string()));
        }

        if self.timeouts.validation.is_zero() || self.timeouts.validation >= Duration::from_secs(10)
        {
            return Err(Error::Config(
                "Session validation timeout must be between 1 and 9 seconds".to_string(),
            ));
        }
        for (name, value) in [
            ("request", self.timeouts.request),
            ("progress", self.timeouts.progress),
            ("session", self.timeouts.session),
        ] {
            if value.is_zero() {
                return Err(Error::Config(format!("{} timeout must be non-zero", name)));
            }
        }

        if self.progress_report_interval < Duration::from_secs(1) {
            return Err(Error::Config(
                "Progress report interval must be at least one second".to_string(),
            ));
        }
        if self.sync_page_size == 0 || self.sync_page_size > 500 {
            return Err(Error::Config(
                "Sync page size must be between 1 and 500".to_string(),
            ));
        }

        if self.features.enable_network_awareness && self.network_monitor.is_none() {
            return Err(Error::Config(
                "Network awareness enabled but no NetworkMonitor provided. \
                 Disable the feature or inject a NetworkMonitor implementation."
                    .to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    let client = bridge_desktop::ReqwestHttpClient::try_new().map_err(|e| {
        Error::Internal(format!("Failed to build default HTTP client: {}", e))
    })?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(Error::missing(
        "HttpClient",
        "HttpClient implementation is required to reach the server. \
         Desktop: enable the 'desktop-shims' feature. \
         Mobile: inject the platform HTTP stack.",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    Ok(Arc::new(bridge_desktop::TokioFileSystem::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    Err(Error::missing(
        "FileSystemAccess",
        "FileSystemAccess implementation is required to manage downloads. \
         Desktop: enable the 'desktop-shims' feature. \
         Mobile: inject sandboxed storage access.",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_transfer_engine() -> Result<Arc<dyn FileTransferEngine>> {
    let engine = bridge_desktop::ReqwestTransferEngine::try_new().map_err(|e| {
        Error::Internal(format!("Failed to build default transfer engine: {}", e))
    })?;
    Ok(Arc::new(engine))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_transfer_engine() -> Result<Arc<dyn FileTransferEngine>> {
    Err(Error::missing(
        "FileTransferEngine",
        "FileTransferEngine implementation is required for downloads. \
         Desktop: enable the 'desktop-shims' feature. \
         Mobile: inject the OS background download manager.",
    ))
}

/// Builder for [`CoreConfig`].
#[derive(Default)]
pub struct CoreConfigBuilder {
    server_url: Option<String>,
    database_path: Option<PathBuf>,
    download_dir: Option<PathBuf>,
    http_client: Option<Arc<dyn HttpClient>>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    secure_store: Option<Arc<dyn SecureStore>>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    audio_engine: Option<Arc<dyn AudioEngine>>,
    transfer_engine: Option<Arc<dyn FileTransferEngine>>,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
    clock: Option<Arc<dyn Clock>>,
    timeouts: Option<NetworkTimeouts>,
    progress_report_interval: Option<Duration>,
    sync_page_size: Option<u32>,
    login_sync_timeout: Option<Duration>,
    features: FeatureFlags,
}

impl CoreConfigBuilder {
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = Some(url.into());
        self
    }

    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn download_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.download_dir = Some(path.into());
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    pub fn secure_store(mut self, store: Arc<dyn SecureStore>) -> Self {
        self.secure_store = Some(store);
        self
    }

    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    pub fn audio_engine(mut self, engine: Arc<dyn AudioEngine>) -> Self {
        self.audio_engine = Some(engine);
        self
    }

    pub fn transfer_engine(mut self, engine: Arc<dyn FileTransferEngine>) -> Self {
        self.transfer_engine = Some(engine);
        self
    }

    pub fn network_monitor(mut self, monitor: Arc<dyn NetworkMonitor>) -> Self {
        self.network_monitor = Some(monitor);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn timeouts(mut self, timeouts: NetworkTimeouts) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    pub fn progress_report_interval(mut self, interval: Duration) -> Self {
        self.progress_report_interval = Some(interval);
        self
    }

    pub fn sync_page_size(mut self, size: u32) -> Self {
        self.sync_page_size = Some(size);
        self
    }

    pub fn login_sync_timeout(mut self, timeout: Duration) -> Self {
        self.login_sync_timeout = Some(timeout);
        self
    }

    pub fn eager_metadata_resolution(mut self, enable: bool) -> Self {
        self.features.eager_metadata_resolution = enable;
        self
    }

    pub fn enable_network_awareness(mut self, enable: bool) -> Self {
        self.features.enable_network_awareness = enable;
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] when a required setting is missing or invalid
    /// - [`Error::CapabilityMissing`] when a required bridge was not injected
    ///   and no desktop default is available
    pub fn build(self) -> Result<CoreConfig> {
        let server_url = self
            .server_url
            .ok_or_else(|| Error::Config("Server URL is required".to_string()))?;
        let database_path = self
            .database_path
            .ok_or_else(|| Error::Config("Database path is required".to_string()))?;
        let download_dir = self
            .download_dir
            .ok_or_else(|| Error::Config("Download directory is required".to_string()))?;

        let secure_store = self.secure_store.ok_or_else(|| {
            Error::missing(
                "SecureStore",
                "SecureStore implementation is required to persist the access token. \
                 Inject Keychain/Keystore/Secret Service storage.",
            )
        })?;
        let settings_store = self.settings_store.ok_or_else(|| {
            Error::missing(
                "SettingsStore",
                "SettingsStore implementation is required for resume points and preferences. \
                 Desktop: use bridge_desktop::SqliteSettingsStore.",
            )
        })?;
        let audio_engine = self.audio_engine.ok_or_else(|| {
            Error::missing(
                "AudioEngine",
                "AudioEngine implementation is required for playback. \
                 Inject the host player adapter.",
            )
        })?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };
        let file_system = match self.file_system {
            Some(fs) => fs,
            None => provide_default_file_system()?,
        };
        let transfer_engine = match self.transfer_engine {
            Some(engine) => engine,
            None => provide_default_transfer_engine()?,
        };

        let config = CoreConfig {
            server_url: server_url.trim_end_matches('/').to_string(),
            database_path,
            download_dir,
            http_client,
            file_system,
            secure_store,
            settings_store,
            audio_engine,
            transfer_engine,
            network_monitor: self.network_monitor,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            timeouts: self.timeouts.unwrap_or_default(),
            progress_report_interval: self
                .progress_report_interval
                .unwrap_or(Duration::from_secs(10)),
            sync_page_size: self.sync_page_size.unwrap_or(50),
            login_sync_timeout: self
                .login_sync_timeout
                .unwrap_or(Duration::from_secs(30)),
            features: self.features,
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{
        EngineState, EngineTrack, HttpRequest, HttpResponse, MediaItemInfo,
        NetworkInfo, TransferId, TransferRecord, TransferRequest, TransferUpdate,
    };
    use std::path::Path;
    use tokio::sync::{broadcast, watch};

    struct NullHttp;
    #[async_trait]
    impl HttpClient for NullHttp {
        async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
            Ok(HttpResponse::new(200, "{}"))
        }
    }

    struct NullFs;
    #[async_trait]
    impl FileSystemAccess for NullFs {
        async fn exists(&self, _path: &Path) -> BridgeResult<bool> {
            Ok(false)
        }
        async fn create_dir_all(&self, _path: &Path) -> BridgeResult<()> {
            Ok(())
        }
        async fn delete_dir_all(&self, _path: &Path) -> BridgeResult<()> {
            Ok(())
        }
    }

    struct NullSecure;
    #[async_trait]
    impl SecureStore for NullSecure {
        async fn set_secret(&self, _key: &str, _value: &[u8]) -> BridgeResult<()> {
            Ok(())
        }
        async fn get_secret(&self, _key: &str) -> BridgeResult<Option<Vec<u8>>> {
            Ok(None)
        }
        async fn delete_secret(&self, _key: &str) -> BridgeResult<()> {
            Ok(())
        }
    }

    struct NullSettings;
    #[async_trait]
    impl SettingsStore for NullSettings {
        async fn set_string(&self, _key: &str, _value: &str) -> BridgeResult<()> {
            Ok(())
        }
        async fn get_string(&self, _key: &str) -> BridgeResult<Option<String>> {
            Ok(None)
        }
        async fn set_bool(&self, _key: &str, _value: bool) -> BridgeResult<()> {
            Ok(())
        }
        async fn get_bool(&self, _key: &str) -> BridgeResult<Option<bool>> {
            Ok(None)
        }
        async fn set_f64(&self, _key: &str, _value: f64) -> BridgeResult<()> {
            Ok(())
        }
        async fn get_f64(&self, _key: &str) -> BridgeResult<Option<f64>> {
            Ok(None)
        }
        async fn delete(&self, _key: &str) -> BridgeResult<()> {
            Ok(())
        }
        async fn list_keys(&self, _prefix: &str) -> BridgeResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    struct NullEngine {
        state: watch::Sender<EngineState>,
    }
    #[async_trait]
    impl AudioEngine for NullEngine {
        async fn load(
            &self,
            _media: MediaItemInfo,
            _tracks: Vec<EngineTrack>,
            _index: usize,
            _offset: Duration,
        ) -> BridgeResult<()> {
            Ok(())
        }
        async fn play(&self) -> BridgeResult<()> {
            Ok(())
        }
        async fn pause(&self) -> BridgeResult<()> {
            Ok(())
        }
        async fn stop(&self) -> BridgeResult<()> {
            Ok(())
        }
        async fn seek(&self, _index: usize, _offset: Duration) -> BridgeResult<()> {
            Ok(())
        }
        fn subscribe(&self) -> watch::Receiver<EngineState> {
            self.state.subscribe()
        }
    }

    struct NullTransfers {
        updates: broadcast::Sender<TransferUpdate>,
    }
    #[async_trait]
    impl FileTransferEngine for NullTransfers {
        async fn enqueue(&self, _request: TransferRequest) -> BridgeResult<TransferId> {
            Ok(TransferId("job-1".to_string()))
        }
        async fn cancel(&self, _id: &TransferId) -> BridgeResult<()> {
            Ok(())
        }
        async fn list_transfers(&self) -> BridgeResult<Vec<TransferRecord>> {
            Ok(Vec::new())
        }
        fn subscribe(&self) -> broadcast::Receiver<TransferUpdate> {
            self.updates.subscribe()
        }
    }

    struct OfflineMonitor;
    #[async_trait]
    impl NetworkMonitor for OfflineMonitor {
        async fn get_network_info(&self) -> BridgeResult<NetworkInfo> {
            Ok(NetworkInfo {
                status: bridge_traits::NetworkStatus::Disconnected,
                network_type: None,
                is_metered: false,
            })
        }
    }

    fn complete_builder() -> CoreConfigBuilder {
        let (state, _) = watch::channel(EngineState::default());
        let (updates, _) = broadcast::channel(4);
        CoreConfig::builder()
            .server_url("https://abs.example.com/")
            .database_path("/tmp/library.db")
            .download_dir("/tmp/downloads")
            .http_client(Arc::new(NullHttp))
            .file_system(Arc::new(NullFs))
            .secure_store(Arc::new(NullSecure))
            .settings_store(Arc::new(NullSettings))
            .audio_engine(Arc::new(NullEngine { state }))
            .transfer_engine(Arc::new(NullTransfers { updates }))
    }

    #[test]
    fn test_build_with_all_bridges() {
        let config = complete_builder().build().unwrap();

        assert_eq!(config.server_url, "https://abs.example.com");
        assert_eq!(config.timeouts, NetworkTimeouts::default());
        assert_eq!(config.sync_page_size, 50);
        assert!(!config.features.eager_metadata_resolution);
        assert!(config.timeouts.validation < Duration::from_secs(10));
    }

    #[test]
    fn test_missing_audio_engine_is_capability_error() {
        let (updates, _) = broadcast::channel(4);
        let result = CoreConfig::builder()
            .server_url("https://abs.example.com")
            .database_path("/tmp/library.db")
            .download_dir("/tmp/downloads")
            .http_client(Arc::new(NullHttp))
            .file_system(Arc::new(NullFs))
            .secure_store(Arc::new(NullSecure))
            .settings_store(Arc::new(NullSettings))
            .transfer_engine(Arc::new(NullTransfers { updates }))
            .build();

        match result {
            Err(Error::CapabilityMissing { capability, .. }) => {
                assert_eq!(capability, "AudioEngine")
            }
            other => panic!("expected CapabilityMissing, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_non_http_server_url() {
        let result = complete_builder().server_url("abs.example.com").build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_slow_validation_timeout() {
        let timeouts = NetworkTimeouts {
            validation: Duration::from_secs(30),
            ..NetworkTimeouts::default()
        };
        let result = complete_builder().timeouts(timeouts).build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_network_awareness_requires_monitor() {
        let result = complete_builder().enable_network_awareness(true).build();
        assert!(matches!(result, Err(Error::Config(_))));

        let config = complete_builder()
            .enable_network_awareness(true)
            .network_monitor(Arc::new(OfflineMonitor))
            .build()
            .unwrap();
        assert!(config.features.enable_network_awareness);
    }
}
