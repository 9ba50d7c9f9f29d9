//! # Host Bridge Traits
//!
//! Collaborator contracts the sync core depends on but does not implement.
//!
//! ## Traits
//!
//! ### Networking & I/O
//! - [`HttpClient`](http::HttpClient) - Requests to the catalog/progress server
//! - [`FileTransferEngine`](transfer::FileTransferEngine) - Background file downloads
//! - [`FileSystemAccess`](storage::FileSystemAccess) - Download directory management
//!
//! ### Security & Storage
//! - [`SecureStore`](storage::SecureStore) - Credential persistence (Keychain/Keystore)
//! - [`SettingsStore`](storage::SettingsStore) - Key-value preferences storage
//!
//! ### Platform Integration
//! - [`AudioEngine`](playback::AudioEngine) - Native player with play/pause/seek and a state feed
//! - [`NetworkMonitor`](network::NetworkMonitor) - Wi-Fi detection for download admission
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Fail-Fast Strategy
//!
//! `core_runtime::config::CoreConfigBuilder::build` rejects a configuration
//! that lacks a required bridge with `Error::CapabilityMissing` naming it.
//!
//! ## Error Handling
//!
//! All bridges return [`BridgeError`](error::BridgeError). Transport failures
//! must be reported as `Network` or `Timeout` so the core can tell them apart
//! from authoritative rejections by the server.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync`.

pub mod error;
pub mod http;
pub mod network;
pub mod playback;
pub mod storage;
pub mod time;
pub mod transfer;

#[cfg(feature = "test-support")]
pub mod testing;

pub use error::BridgeError;

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use network::{NetworkInfo, NetworkMonitor, NetworkStatus, NetworkType};
pub use playback::{AudioEngine, AudioSource, EngineState, EngineTrack, MediaItemInfo, ProcessingState};
pub use storage::{FileSystemAccess, SecureStore, SettingsStore};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
pub use transfer::{
    FileTransferEngine, TransferId, TransferRecord, TransferRequest, TransferStatus,
    TransferUpdate,
};
