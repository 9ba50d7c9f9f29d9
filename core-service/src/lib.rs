//! Core service façade and bootstrap helpers.
//!
//! [`CoreService`] turns one validated [`CoreConfig`] into the running sync
//! core: authentication, the remote client, the local library cache, the
//! download queue and the playback coordinator, all sharing one
//! [`EventBus`]. Desktop apps typically enable the `desktop-shims` feature,
//! which lets the config builder fall back to the `bridge-desktop`
//! implementations for HTTP, filesystem and file transfers.
//!
//! ## Lifecycle
//!
//! ```ignore
//! let core = CoreService::new(config).await?;
//! core.restore_state().await;
//!
//! core.auth().sign_in("reader", "secret").await?;
//! core.bootstrap_after_login().await?;
//!
//! core.playback().play_item("li_1").await?;
//!
//! core.sign_out().await?;
//! ```

pub mod error;

pub use error::{CoreError, Result};

#[cfg(all(feature = "desktop-shims", not(target_arch = "wasm32")))]
pub use bridge_desktop;

use std::path::Path;
use std::sync::Arc;

use core_auth::{AuthManager, SessionStatus, TokenProvider};
use core_download::{DownloadConfig, DownloadQueueManager};
use core_library::{
    create_pool, DatabaseConfig, LocalLibraryCache, SqliteBookRepository, SyncOptions,
    SyncOutcome,
};
use core_playback::{BookmarkJournal, PlaybackConfig, PlaybackCoordinator, PlaybackDeps};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus};
use provider_audiobookshelf::{ApiClient, RemoteProgressClient};
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

const EVENT_BUS_CAPACITY: usize = 256;
const IN_MEMORY_DATABASE: &str = ":memory:";

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    config: Arc<CoreConfig>,
    events: EventBus,
    auth: Arc<AuthManager>,
    remote: RemoteProgressClient,
    library: LocalLibraryCache,
    downloads: DownloadQueueManager,
    playback: PlaybackCoordinator,
}

impl CoreService {
    /// Wire every component from `config`.
    ///
    /// Opens (and migrates) the library database and starts consuming the
    /// transfer engine's update feed.
    pub async fn new(config: CoreConfig) -> Result<Self> {
        Self::with_bookmark_journal(config, None).await
    }

    /// Like [`CoreService::new`], with a bookmark source for
    /// [`PlaybackCoordinator::list_bookmarks`].
    #[instrument(skip_all, fields(server = %config.server_url))]
    pub async fn with_bookmark_journal(
        config: CoreConfig,
        bookmarks: Option<Arc<dyn BookmarkJournal>>,
    ) -> Result<Self> {
        config.validate()?;
        let events = EventBus::new(EVENT_BUS_CAPACITY);

        let auth = Arc::new(
            AuthManager::new(
                config.server_url.clone(),
                config.secure_store.clone(),
                config.http_client.clone(),
                events.clone(),
                config.clock.clone(),
            )
            .with_validation_timeout(config.timeouts.validation),
        );
        let tokens: Arc<dyn TokenProvider> = auth.clone();
        let api = ApiClient::new(config.http_client.clone(), config.server_url.clone(), tokens);
        let remote = RemoteProgressClient::new(api, config.timeouts);

        let pool = create_pool(database_config(&config.database_path)).await?;
        let library = LocalLibraryCache::new(
            Arc::new(SqliteBookRepository::new(pool)),
            remote.clone(),
            events.clone(),
            config.clock.clone(),
        );

        let downloads = DownloadQueueManager::new(
            DownloadConfig::new(config.download_dir.clone()),
            remote.clone(),
            config.transfer_engine.clone(),
            config.file_system.clone(),
            config.settings_store.clone(),
            config.network_monitor.clone(),
            events.clone(),
        );
        downloads.start();

        let playback_config = PlaybackConfig::default()
            .report_interval(config.progress_report_interval)
            .download_dir(config.download_dir.clone());
        let eager = playback_config.eager_resolution || config.features.eager_metadata_resolution;
        let playback = PlaybackCoordinator::new(
            playback_config.eager_resolution(eager),
            PlaybackDeps {
                engine: config.audio_engine.clone(),
                remote: remote.clone(),
                library: library.clone(),
                settings: config.settings_store.clone(),
                file_system: config.file_system.clone(),
                bookmarks,
                events: events.clone(),
            },
        );

        info!(eager_resolution = eager, "Core service ready");
        Ok(Self {
            config: Arc::new(config),
            events,
            auth,
            remote,
            library,
            downloads,
            playback,
        })
    }

    // ========================================================================
    // Components
    // ========================================================================

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn auth(&self) -> &AuthManager {
        &self.auth
    }

    pub fn remote(&self) -> &RemoteProgressClient {
        &self.remote
    }

    pub fn library(&self) -> &LocalLibraryCache {
        &self.library
    }

    pub fn downloads(&self) -> &DownloadQueueManager {
        &self.downloads
    }

    pub fn playback(&self) -> &PlaybackCoordinator {
        &self.playback
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CoreEvent> {
        self.events.subscribe()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Reattach to transfers that outlived the previous run and reload the
    /// last played book without starting it. Failures are logged; the app
    /// stays usable without either.
    #[instrument(skip(self))]
    pub async fn restore_state(&self) {
        match self.downloads.restore().await {
            Ok(books) => info!(books, "Restored tracked downloads"),
            Err(e) => warn!(error = %e, "Could not restore downloads"),
        }
        match self.playback.warm_load_last_item(false).await {
            Ok(loaded) => info!(loaded, "Warm load finished"),
            Err(e) => warn!(error = %e, "Could not warm load last played book"),
        }
    }

    /// Fill the library cache right after sign-in.
    ///
    /// A sync cut short by the login timeout is a partial outcome, not an
    /// error; the books stored so far stay stored.
    #[instrument(skip(self))]
    pub async fn bootstrap_after_login(&self) -> Result<SyncOutcome> {
        let options = SyncOptions::default()
            .page_size(self.config.sync_page_size)
            .timeout(self.config.login_sync_timeout);
        let outcome = self.library.sync_all_books_to_db(options).await?;
        if !outcome.is_complete() {
            warn!(books = outcome.books(), "Library sync timed out after login");
        }
        Ok(outcome)
    }

    /// Validate the stored session. A rejected session also clears
    /// everything that belonged to the user.
    #[instrument(skip(self))]
    pub async fn validate_session(&self) -> SessionStatus {
        let had_credentials = self.auth.current_tokens().await.is_some();
        let status = self.auth.validate_session().await;
        if status == SessionStatus::Invalid && had_credentials {
            if let Err(e) = self.clear_user_state().await {
                warn!(error = %e, "Failed to clear state after rejected session");
            }
        }
        status
    }

    /// Log out or prepare for an account switch.
    ///
    /// Order matters: downloads are cancelled and playback is torn down
    /// before the cache and credentials go away.
    #[instrument(skip(self))]
    pub async fn sign_out(&self) -> Result<()> {
        self.clear_user_state().await?;
        self.auth.sign_out().await?;
        info!("Signed out and cleared user state");
        Ok(())
    }

    /// Stop background work. Downloads owned by the host engine keep
    /// running and are picked up again by [`CoreService::restore_state`].
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<()> {
        self.playback.stop().await?;
        self.downloads.shutdown();
        Ok(())
    }

    async fn clear_user_state(&self) -> Result<()> {
        let cancelled = self.downloads.cancel_all().await;
        if !cancelled.is_empty() {
            info!(books = cancelled.len(), "Cancelled downloads");
        }
        self.playback.clear().await?;
        self.library.clear().await?;
        Ok(())
    }
}

fn database_config(path: &Path) -> DatabaseConfig {
    if path.as_os_str() == IN_MEMORY_DATABASE {
        DatabaseConfig::in_memory()
    } else {
        DatabaseConfig::new(path)
    }
}
