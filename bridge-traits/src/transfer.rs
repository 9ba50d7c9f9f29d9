//! Background file-transfer contract.
//!
//! Transfers run outside the core (OS download manager, a detached task pool)
//! and report back through a broadcast stream keyed by [`TransferId`]. Each
//! job carries an opaque `group` string set at enqueue time; the download
//! queue stores the book identifier there so it can correlate updates after a
//! process restart.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::broadcast;

use crate::error::Result;

/// Opaque job identifier assigned by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransferId(pub String);

impl TransferId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single file to fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub url: String,
    pub headers: HashMap<String, String>,
    pub destination: PathBuf,
    /// Correlation key reported back with every update.
    pub group: String,
    /// Size advertised by the server, if any.
    pub expected_bytes: Option<u64>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    Enqueued,
    Running,
    Paused,
    Complete,
    Failed,
    Canceled,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Complete | TransferStatus::Failed | TransferStatus::Canceled
        )
    }
}

/// Status/progress notification for one job.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferUpdate {
    pub id: TransferId,
    pub group: String,
    pub status: TransferStatus,
    pub bytes_done: u64,
    pub bytes_total: Option<u64>,
    pub error: Option<String>,
}

/// Engine-side record of a job, used to rehydrate after restart.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRecord {
    pub id: TransferId,
    pub group: String,
    pub status: TransferStatus,
    pub bytes_done: u64,
    pub bytes_total: Option<u64>,
    pub destination: PathBuf,
}

#[async_trait]
pub trait FileTransferEngine: Send + Sync {
    /// Queue a transfer. Returns once the engine has accepted the job.
    async fn enqueue(&self, request: TransferRequest) -> Result<TransferId>;

    /// Signal a job to stop. Returns once the signal is delivered; the engine
    /// may still be unwinding the transfer.
    async fn cancel(&self, id: &TransferId) -> Result<()>;

    /// Jobs the engine currently knows about, including finished ones it has
    /// not yet forgotten.
    async fn list_transfers(&self) -> Result<Vec<TransferRecord>>;

    /// Status/progress feed for every job.
    fn subscribe(&self) -> broadcast::Receiver<TransferUpdate>;
}
