//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! - `HttpClient` using `reqwest`, with retry for idempotent requests
//! - `FileSystemAccess` using `tokio::fs`
//! - `SecureStore` using the `keyring` crate
//! - `SettingsStore` using a SQLite-backed key-value table
//! - `FileTransferEngine` using streamed `reqwest` downloads on tokio tasks
//!
//! Audio output and network reachability have no desktop default; hosts
//! supply their own `AudioEngine` and, optionally, a `NetworkMonitor`.
//!
//! ## Feature Flags
//!
//! - `secure-store`: Enable OS keychain integration (default)
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestHttpClient, TokioFileSystem};
//!
//! let http_client = ReqwestHttpClient::try_new()?;
//! let fs = TokioFileSystem::new();
//! ```

mod filesystem;
mod http;
mod settings;
mod transfer;

#[cfg(feature = "secure-store")]
mod secure_store;

pub use filesystem::{default_data_dir, TokioFileSystem};
pub use http::ReqwestHttpClient;
pub use settings::SqliteSettingsStore;
pub use transfer::ReqwestTransferEngine;

#[cfg(feature = "secure-store")]
pub use secure_store::KeyringSecureStore;
