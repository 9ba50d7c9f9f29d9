//! Listening-time accounting and suppression of periodic progress reports.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Why a progress report is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReportOrigin {
    Periodic,
    Explicit,
}

/// Time spent actually playing since the last successful sync.
#[derive(Debug, Default)]
pub(crate) struct ListeningClock {
    since: Option<Instant>,
    accumulated: Duration,
}

impl ListeningClock {
    pub fn set_playing(&mut self, playing: bool) {
        match (playing, self.since) {
            (true, None) => self.since = Some(Instant::now()),
            (false, Some(since)) => {
                self.accumulated += since.elapsed();
                self.since = None;
            }
            _ => {}
        }
    }

    /// Drain the listened time. A running clock keeps running.
    pub fn take(&mut self) -> Duration {
        if let Some(since) = self.since {
            let now = Instant::now();
            self.accumulated += now.saturating_duration_since(since);
            self.since = Some(now);
        }
        std::mem::take(&mut self.accumulated)
    }

    /// Put back time whose sync failed.
    pub fn restore(&mut self, listened: Duration) {
        self.accumulated += listened;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Counts outstanding [`ReportingPause`] guards.
#[derive(Debug, Default, Clone)]
pub(crate) struct Suppression {
    holders: Arc<AtomicUsize>,
}

impl Suppression {
    pub fn hold(&self) -> ReportingPause {
        self.holders.fetch_add(1, Ordering::SeqCst);
        ReportingPause {
            holders: self.holders.clone(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.holders.load(Ordering::SeqCst) > 0
    }
}

/// Periodic progress reports are skipped while this guard is alive.
///
/// Explicit reports still go through.
#[must_use = "periodic reporting resumes when the guard is dropped"]
#[derive(Debug)]
pub struct ReportingPause {
    holders: Arc<AtomicUsize>,
}

impl Drop for ReportingPause {
    fn drop(&mut self) {
        self.holders.fetch_sub(1, Ordering::SeqCst);
    }
}
