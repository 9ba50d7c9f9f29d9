//! Per-book aggregation of transfer job state.

use bridge_traits::transfer::TransferStatus;
use serde::{Deserialize, Serialize};

/// Aggregate status of a book's download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DownloadStatus {
    /// Not tracked.
    #[default]
    None,
    Queued,
    Running,
    Complete,
    Error,
}

impl DownloadStatus {
    /// Counts against the single-active-download rule.
    pub fn is_active(&self) -> bool {
        matches!(self, DownloadStatus::Queued | DownloadStatus::Running)
    }
}

/// Snapshot of one book's download.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ItemProgress {
    pub status: DownloadStatus,
    /// Fraction in `0.0..=1.0` across all files.
    pub progress: f64,
    /// Files finished.
    pub completed: u32,
    /// Files in the download.
    pub total: u32,
}

impl ItemProgress {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn percent(&self) -> u8 {
        (self.progress.clamp(0.0, 1.0) * 100.0).floor() as u8
    }
}

/// Last known state of one transfer job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct JobState {
    pub status: TransferStatus,
    pub bytes_done: u64,
    pub bytes_total: Option<u64>,
}

impl JobState {
    pub fn enqueued(expected_bytes: Option<u64>) -> Self {
        Self {
            status: TransferStatus::Enqueued,
            bytes_done: 0,
            bytes_total: expected_bytes,
        }
    }

    fn fraction(&self) -> f64 {
        match self.status {
            TransferStatus::Complete => 1.0,
            _ => match self.bytes_total {
                Some(total) if total > 0 => (self.bytes_done as f64 / total as f64).clamp(0.0, 1.0),
                _ => 0.0,
            },
        }
    }
}

/// Fold job states into a book snapshot.
///
/// `expected` is the number of files the book was admitted with; jobs the
/// engine has not acknowledged yet count as queued. A failed or externally
/// cancelled job makes the whole book `Error`.
pub(crate) fn aggregate<'a>(jobs: impl IntoIterator<Item = &'a JobState>, expected: usize) -> ItemProgress {
    let mut seen = 0usize;
    let mut completed = 0u32;
    let mut fraction = 0.0;
    let mut failed = false;
    let mut running = false;

    for job in jobs {
        seen += 1;
        fraction += job.fraction();
        match job.status {
            TransferStatus::Complete => completed += 1,
            TransferStatus::Failed | TransferStatus::Canceled => failed = true,
            TransferStatus::Running => running = true,
            TransferStatus::Enqueued | TransferStatus::Paused => {}
        }
    }

    let total = seen.max(expected);
    if total == 0 {
        return ItemProgress::none();
    }

    let status = if failed {
        DownloadStatus::Error
    } else if completed as usize == total {
        DownloadStatus::Complete
    } else if running || completed > 0 {
        DownloadStatus::Running
    } else {
        DownloadStatus::Queued
    };

    ItemProgress {
        status,
        progress: fraction / total as f64,
        completed,
        total: total as u32,
    }
}
