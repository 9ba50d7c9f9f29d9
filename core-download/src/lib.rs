//! # Download Queue
//!
//! Admission-controlled downloads of whole books.
//!
//! ## Overview
//!
//! - [`DownloadQueueManager`]: single-active-item queue over a host
//!   [`FileTransferEngine`](bridge_traits::FileTransferEngine)
//! - [`ItemProgress`]: per-book aggregate of N file transfers
//! - Wi-Fi-only admission via the `downloads_wifi_only` setting

pub mod error;
pub mod manager;
pub mod progress;

pub use error::{DownloadError, Result};
pub use manager::{
    DownloadConfig, DownloadQueueManager, EnqueueOptions, EnqueueOutcome, WIFI_ONLY_SETTING,
};
pub use progress::{DownloadStatus, ItemProgress};
