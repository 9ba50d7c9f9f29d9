//! # Download Queue Manager
//!
//! Admission-controlled queue mapping books to transfer jobs.
//!
//! ## Overview
//!
//! - One book downloads at a time. Admitting a different book requires the
//!   caller to confirm replacing the active one.
//! - Each admitted book becomes one transfer job per file, grouped under the
//!   book id so engine updates can be correlated after a restart.
//! - Engine updates are folded into an [`ItemProgress`] per book and
//!   published on a `watch` channel, plus coarse [`DownloadEvent`]s on the
//!   event bus.
//!
//! ## Workflow
//!
//! 1. [`start`](DownloadQueueManager::start) subscribes to the engine feed
//! 2. [`restore`](DownloadQueueManager::restore) rehydrates jobs the engine
//!    still knows about
//! 3. [`enqueue_item_downloads`](DownloadQueueManager::enqueue_item_downloads)
//!    checks admission, lists the book's files and creates the jobs
//! 4. [`cancel_for_item`](DownloadQueueManager::cancel_for_item) signals the
//!    jobs to stop, then removes the book's directory in the background

use bridge_traits::network::NetworkMonitor;
use bridge_traits::storage::{FileSystemAccess, SettingsStore};
use bridge_traits::transfer::{
    FileTransferEngine, TransferId, TransferRecord, TransferRequest, TransferStatus,
    TransferUpdate,
};
use core_runtime::events::{CoreEvent, DownloadEvent, EventBus};
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use provider_audiobookshelf::{ItemFile, RemoteProgressClient};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{DownloadError, Result};
use crate::progress::{aggregate, DownloadStatus, ItemProgress, JobState};

/// Settings key of the Wi-Fi-only preference.
pub const WIFI_ONLY_SETTING: &str = "downloads_wifi_only";

/// Download queue configuration
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Root directory; each book gets a subdirectory named after its id
    pub download_dir: PathBuf,

    /// Minimum percent change between `DownloadEvent::Progress` events
    pub progress_event_step: u8,
}

impl DownloadConfig {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
            ..Self::default()
        }
    }

    pub fn progress_event_step(mut self, step: u8) -> Self {
        self.progress_event_step = step.max(1);
        self
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
            progress_event_step: 5,
        }
    }
}

/// Caller options for [`DownloadQueueManager::enqueue_item_downloads`].
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub episode_id: Option<String>,
    pub display_title: Option<String>,
    /// The user agreed to cancel whatever else is downloading.
    pub confirmed_replace: bool,
}

impl EnqueueOptions {
    pub fn episode_id(mut self, episode_id: impl Into<String>) -> Self {
        self.episode_id = Some(episode_id.into());
        self
    }

    pub fn display_title(mut self, title: impl Into<String>) -> Self {
        self.display_title = Some(title.into());
        self
    }

    pub fn confirmed_replace(mut self, confirmed: bool) -> Self {
        self.confirmed_replace = confirmed;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued {
        jobs: usize,
        /// Books cancelled to make room
        replaced: Vec<String>,
    },
    /// The book is already queued or running; nothing changed.
    AlreadyActive,
    /// The book is fully downloaded; nothing changed.
    AlreadyComplete,
    /// The book was cancelled while its jobs were being created.
    Cancelled,
}

struct TrackedItem {
    generation: u64,
    /// Files admitted; jobs not yet acknowledged count as queued
    expected: usize,
    jobs: HashMap<TransferId, JobState>,
    last: ItemProgress,
    last_event_percent: u8,
}

impl TrackedItem {
    fn new(generation: u64, expected: usize) -> Self {
        Self {
            generation,
            expected,
            jobs: HashMap::new(),
            last: ItemProgress::none(),
            last_event_percent: 0,
        }
    }

    fn progress(&self) -> ItemProgress {
        aggregate(self.jobs.values(), self.expected)
    }
}

#[derive(Default)]
struct QueueState {
    items: HashMap<String, TrackedItem>,
    jobs: HashMap<TransferId, String>,
    /// Unfinished jobs of cancelled or deleted items; late updates for them
    /// are dropped until the engine reports a final status
    retired: HashSet<TransferId>,
    channels: HashMap<String, watch::Sender<ItemProgress>>,
    next_generation: u64,
}

impl QueueState {
    fn status(&self, book_id: &str) -> DownloadStatus {
        self.items
            .get(book_id)
            .map(|item| item.progress().status)
            .unwrap_or_default()
    }

    fn active_except(&self, book_id: &str) -> Vec<String> {
        let mut active: Vec<String> = self
            .items
            .iter()
            .filter(|(id, item)| id.as_str() != book_id && item.progress().status.is_active())
            .map(|(id, _)| id.clone())
            .collect();
        active.sort();
        active
    }

    fn track(&mut self, book_id: &str, expected: usize) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;
        let mut item = TrackedItem::new(generation, expected);
        item.last = item.progress();
        let progress = item.last.clone();
        self.items.insert(book_id.to_string(), item);
        self.publish(book_id, progress);
        generation
    }

    fn untrack(&mut self, book_id: &str) -> Option<TrackedItem> {
        let item = self.items.remove(book_id)?;
        for (id, job) in &item.jobs {
            self.jobs.remove(id);
            if !job.status.is_terminal() {
                self.retired.insert(id.clone());
            }
        }
        self.publish(book_id, ItemProgress::none());
        self.channels
            .retain(|id, tx| tx.receiver_count() > 0 || self.items.contains_key(id));
        Some(item)
    }

    /// Drop `update` if its job was retired. A final status ends the
    /// retirement.
    fn absorb_retired(&mut self, update: &TransferUpdate) -> bool {
        if !self.retired.contains(&update.id) {
            return false;
        }
        if update.status.is_terminal() {
            self.retired.remove(&update.id);
        }
        true
    }

    fn publish(&mut self, book_id: &str, progress: ItemProgress) {
        if let Some(tx) = self.channels.get(book_id) {
            tx.send_if_modified(|current| {
                if *current == progress {
                    false
                } else {
                    *current = progress;
                    true
                }
            });
        }
    }

    fn channel(&mut self, book_id: &str) -> watch::Receiver<ItemProgress> {
        let current = self
            .items
            .get(book_id)
            .map(TrackedItem::progress)
            .unwrap_or_default();
        self.channels
            .entry(book_id.to_string())
            .or_insert_with(|| watch::channel(current).0)
            .subscribe()
    }
}

struct Inner {
    config: DownloadConfig,
    remote: RemoteProgressClient,
    engine: Arc<dyn FileTransferEngine>,
    file_system: Arc<dyn FileSystemAccess>,
    settings: Arc<dyn SettingsStore>,
    network: Option<Arc<dyn NetworkMonitor>>,
    events: EventBus,
    /// Serializes admission so two enqueues cannot both see an empty queue
    admission: tokio::sync::Mutex<()>,
    state: Mutex<QueueState>,
    /// Directory removals still running, by book
    cleanups: Mutex<HashMap<String, JoinHandle<()>>>,
    pump: Mutex<Option<CancellationToken>>,
}

/// Single-active-item download queue.
#[derive(Clone)]
pub struct DownloadQueueManager {
    inner: Arc<Inner>,
}

impl DownloadQueueManager {
    pub fn new(
        config: DownloadConfig,
        remote: RemoteProgressClient,
        engine: Arc<dyn FileTransferEngine>,
        file_system: Arc<dyn FileSystemAccess>,
        settings: Arc<dyn SettingsStore>,
        network: Option<Arc<dyn NetworkMonitor>>,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                remote,
                engine,
                file_system,
                settings,
                network,
                events,
                admission: tokio::sync::Mutex::new(()),
                state: Mutex::new(QueueState::default()),
                cleanups: Mutex::new(HashMap::new()),
                pump: Mutex::new(None),
            }),
        }
    }

    /// Start consuming the engine's update feed. Idempotent.
    pub fn start(&self) {
        let mut pump = self.inner.pump.lock();
        if pump.is_some() {
            return;
        }

        let token = CancellationToken::new();
        let mut updates = self.inner.engine.subscribe();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let stop = token.clone();

        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = stop.cancelled() => break,
                    message = updates.recv() => message,
                };
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                match message {
                    Ok(update) => inner.apply_update(update),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Transfer feed lagged, resynchronizing");
                        inner.resync().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Transfer update pump stopped");
        });

        *pump = Some(token);
        debug!("Transfer update pump started");
    }

    /// Stop consuming engine updates.
    pub fn shutdown(&self) {
        if let Some(token) = self.inner.pump.lock().take() {
            token.cancel();
        }
    }

    /// Admit a book and create its transfer jobs.
    ///
    /// A book that is already queued or running is a no-op. When a
    /// different book is active the call fails with
    /// [`DownloadError::AdmissionConflict`] unless
    /// `options.confirmed_replace` is set, in which case the other books are
    /// cancelled first.
    #[instrument(skip(self, options), fields(episode_id = ?options.episode_id))]
    pub async fn enqueue_item_downloads(
        &self,
        book_id: &str,
        options: EnqueueOptions,
    ) -> Result<EnqueueOutcome> {
        let _admission = self.inner.admission.lock().await;
        self.check_network_policy().await?;

        let (status, others) = {
            let state = self.inner.state.lock();
            (state.status(book_id), state.active_except(book_id))
        };

        match status {
            DownloadStatus::Queued | DownloadStatus::Running => {
                debug!(book_id, "Already downloading");
                return Ok(EnqueueOutcome::AlreadyActive);
            }
            DownloadStatus::Complete => {
                debug!(book_id, "Already downloaded");
                return Ok(EnqueueOutcome::AlreadyComplete);
            }
            DownloadStatus::Error => {
                // Retry: drop the failed jobs and partial files first
                self.cancel_for_item(book_id).await;
            }
            DownloadStatus::None => {}
        }

        if !others.is_empty() {
            if !options.confirmed_replace {
                info!(book_id, active = ?others, "Download admission refused");
                return Err(DownloadError::AdmissionConflict { active: others });
            }
            for other in &others {
                self.cancel_for_item(other).await;
            }
        }

        // A previous cancel may still be removing this book's directory
        let pending = self.inner.cleanups.lock().remove(book_id);
        if let Some(cleanup) = pending {
            cleanup.await.ok();
        }

        let files = self.inner.remote.list_item_files(book_id).await?;
        if files.is_empty() {
            return Err(DownloadError::NoFiles {
                book_id: book_id.to_string(),
            });
        }
        let headers = self.inner.remote.auth_headers().await?;
        let dir = self.item_dir(book_id);
        self.inner.file_system.create_dir_all(&dir).await?;

        let generation = self.inner.state.lock().track(book_id, files.len());

        let mut created: Vec<TransferId> = Vec::with_capacity(files.len());
        for file in &files {
            let request = TransferRequest {
                url: self.inner.remote.download_url(book_id, &file.ino),
                headers: headers.clone(),
                destination: dir.join(file_name(file)),
                group: book_id.to_string(),
                expected_bytes: (file.size > 0).then_some(file.size),
                display_name: options
                    .display_title
                    .clone()
                    .or_else(|| file.name.clone()),
            };
            let expected_bytes = request.expected_bytes;

            let job_id = match self.inner.engine.enqueue(request).await {
                Ok(job_id) => job_id,
                Err(e) => {
                    warn!(book_id, error = %e, "Transfer enqueue failed, rolling back");
                    self.rollback(book_id, generation, &created).await;
                    return Err(e.into());
                }
            };
            created.push(job_id.clone());

            let registered = {
                let mut state = self.inner.state.lock();
                let registered = match state.items.get_mut(book_id) {
                    Some(item) if item.generation == generation => {
                        item.jobs
                            .entry(job_id.clone())
                            .or_insert_with(|| JobState::enqueued(expected_bytes));
                        true
                    }
                    _ => false,
                };
                if registered {
                    state.jobs.insert(job_id, book_id.to_string());
                }
                registered
            };

            if !registered {
                // Cancelled while we were still creating jobs
                info!(book_id, "Download cancelled during admission");
                self.rollback(book_id, generation, &created).await;
                return Ok(EnqueueOutcome::Cancelled);
            }
        }

        self.refresh(book_id);
        self.inner
            .events
            .emit(CoreEvent::Download(DownloadEvent::Enqueued {
                book_id: book_id.to_string(),
                file_count: created.len() as u32,
            }))
            .ok();
        info!(book_id, jobs = created.len(), "Download enqueued");

        Ok(EnqueueOutcome::Enqueued {
            jobs: created.len(),
            replaced: others,
        })
    }

    /// Hard cancel: signal every job of the book to stop, then delete its
    /// partial directory in the background.
    ///
    /// Returns once the engine has been signalled. Returns `false` when the
    /// book was not tracked or is already fully downloaded; finished books
    /// are only removed by [`DownloadQueueManager::delete_local`].
    #[instrument(skip(self))]
    pub async fn cancel_for_item(&self, book_id: &str) -> bool {
        let item = {
            let mut state = self.inner.state.lock();
            if state.status(book_id) == DownloadStatus::Complete {
                debug!(book_id, "Already downloaded, nothing to cancel");
                return false;
            }
            state.untrack(book_id)
        };
        let Some(item) = item else {
            debug!(book_id, "Nothing to cancel");
            return false;
        };

        for (job_id, job) in &item.jobs {
            if job.status.is_terminal() {
                continue;
            }
            if let Err(e) = self.inner.engine.cancel(job_id).await {
                warn!(book_id, job_id = %job_id, error = %e, "Failed to cancel transfer");
            }
        }

        self.spawn_cleanup(book_id);
        self.inner
            .events
            .emit(CoreEvent::Download(DownloadEvent::Cancelled {
                book_id: book_id.to_string(),
            }))
            .ok();
        info!(book_id, jobs = item.jobs.len(), "Download cancelled");
        true
    }

    /// Cancel every unfinished book. Completed downloads stay on disk.
    /// Returns the ids that were cancelled.
    pub async fn cancel_all(&self) -> Vec<String> {
        let mut ids = Vec::new();
        for id in self.list_tracked_item_ids() {
            if self.cancel_for_item(&id).await {
                ids.push(id);
            }
        }
        if !ids.is_empty() {
            info!(count = ids.len(), "All downloads cancelled");
        }
        ids
    }

    /// Remove a finished download from disk. Refuses while jobs are still
    /// queued or running.
    #[instrument(skip(self))]
    pub async fn delete_local(&self, book_id: &str) -> Result<()> {
        let _admission = self.inner.admission.lock().await;

        {
            let mut state = self.inner.state.lock();
            if state.status(book_id).is_active() {
                return Err(DownloadError::StillActive {
                    book_id: book_id.to_string(),
                });
            }
            state.untrack(book_id);
        }

        let dir = self.item_dir(book_id);
        if self.inner.file_system.exists(&dir).await? {
            self.inner.file_system.delete_dir_all(&dir).await?;
        }

        self.inner
            .events
            .emit(CoreEvent::Download(DownloadEvent::Deleted {
                book_id: book_id.to_string(),
            }))
            .ok();
        info!(book_id, "Local download deleted");
        Ok(())
    }

    /// Progress of one book, current value first.
    pub fn watch_item_progress(&self, book_id: &str) -> BoxStream<'static, ItemProgress> {
        let rx = self.inner.state.lock().channel(book_id);
        stream::unfold((rx, true), |(mut rx, first)| async move {
            if !first {
                rx.changed().await.ok()?;
            }
            let value = rx.borrow_and_update().clone();
            Some((value, (rx, false)))
        })
        .boxed()
    }

    /// Snapshot for initial paint.
    pub fn get_quick_progress(&self, book_id: &str) -> ItemProgress {
        self.inner
            .state
            .lock()
            .items
            .get(book_id)
            .map(TrackedItem::progress)
            .unwrap_or_default()
    }

    pub fn has_active_or_queued(&self) -> bool {
        let state = self.inner.state.lock();
        state
            .items
            .values()
            .any(|item| item.progress().status.is_active())
    }

    pub fn list_tracked_item_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.state.lock().items.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Rehydrate tracked books from the engine's job list after a restart.
    /// Returns how many books were restored.
    #[instrument(skip(self))]
    pub async fn restore(&self) -> Result<usize> {
        let _admission = self.inner.admission.lock().await;
        let records = self.inner.engine.list_transfers().await?;

        let mut grouped: HashMap<String, Vec<TransferRecord>> = HashMap::new();
        for record in records {
            if record.status == TransferStatus::Canceled || record.group.is_empty() {
                continue;
            }
            grouped.entry(record.group.clone()).or_default().push(record);
        }

        let mut restored = 0;
        {
            let mut state = self.inner.state.lock();
            for (book_id, records) in grouped {
                if state.items.contains_key(&book_id) {
                    continue;
                }
                let generation = state.track(&book_id, records.len());
                for record in records {
                    if let Some(item) = state.items.get_mut(&book_id) {
                        if item.generation == generation {
                            item.jobs.insert(
                                record.id.clone(),
                                JobState {
                                    status: record.status,
                                    bytes_done: record.bytes_done,
                                    bytes_total: record.bytes_total,
                                },
                            );
                        }
                    }
                    state.jobs.insert(record.id, book_id.clone());
                }
                restored += 1;
            }
        }

        for id in self.list_tracked_item_ids() {
            self.refresh(&id);
        }
        info!(restored, "Downloads restored");
        Ok(restored)
    }

    async fn check_network_policy(&self) -> Result<()> {
        let wifi_only = match self.inner.settings.get_bool(WIFI_ONLY_SETTING).await {
            Ok(value) => value.unwrap_or(false),
            Err(e) => {
                warn!(error = %e, "Failed to read Wi-Fi-only setting");
                false
            }
        };
        if !wifi_only {
            return Ok(());
        }

        let Some(monitor) = &self.inner.network else {
            debug!("Wi-Fi-only is set but no network monitor is available");
            return Ok(());
        };
        let info = monitor.get_network_info().await?;
        if info.allows_wifi_only_transfers() {
            Ok(())
        } else {
            info!(network_type = ?info.network_type, metered = info.is_metered, "Download needs Wi-Fi");
            Err(DownloadError::WifiRequired)
        }
    }

    async fn rollback(&self, book_id: &str, generation: u64, created: &[TransferId]) {
        {
            let mut state = self.inner.state.lock();
            if state
                .items
                .get(book_id)
                .is_some_and(|item| item.generation == generation)
            {
                state.untrack(book_id);
            }
            state.retired.extend(created.iter().cloned());
        }
        for job_id in created {
            if let Err(e) = self.inner.engine.cancel(job_id).await {
                warn!(book_id, job_id = %job_id, error = %e, "Failed to cancel transfer");
            }
        }
        self.spawn_cleanup(book_id);
    }

    fn spawn_cleanup(&self, book_id: &str) {
        let dir = self.item_dir(book_id);
        let file_system = self.inner.file_system.clone();
        let id = book_id.to_string();
        let handle = tokio::spawn(async move {
            match file_system.delete_dir_all(&dir).await {
                Ok(()) => debug!(book_id = %id, "Partial download removed"),
                Err(e) => warn!(book_id = %id, error = %e, "Failed to remove partial download"),
            }
        });

        let mut cleanups = self.inner.cleanups.lock();
        cleanups.retain(|_, handle| !handle.is_finished());
        cleanups.insert(book_id.to_string(), handle);
    }

    /// Recompute and publish one book's progress.
    fn refresh(&self, book_id: &str) {
        let mut state = self.inner.state.lock();
        let Some(item) = state.items.get_mut(book_id) else {
            return;
        };
        let progress = item.progress();
        item.last = progress.clone();
        state.publish(book_id, progress);
    }

    fn item_dir(&self, book_id: &str) -> PathBuf {
        self.inner.config.download_dir.join(sanitize(book_id))
    }
}

impl Inner {
    fn apply_update(&self, update: TransferUpdate) {
        let step = self.config.progress_event_step;
        let events = {
            let mut state = self.state.lock();
            if state.absorb_retired(&update) {
                return;
            }

            let book_id = match state.jobs.get(&update.id) {
                Some(book_id) => book_id.clone(),
                // Update raced ahead of enqueue returning the id
                None => match state.items.get(&update.group) {
                    Some(item) if item.jobs.len() < item.expected => update.group.clone(),
                    _ => {
                        debug!(job_id = %update.id, group = %update.group, "Update for untracked transfer");
                        return;
                    }
                },
            };
            state.jobs.insert(update.id.clone(), book_id.clone());

            let Some(item) = state.items.get_mut(&book_id) else {
                return;
            };
            let known_total = item.jobs.get(&update.id).and_then(|job| job.bytes_total);
            item.jobs.insert(
                update.id.clone(),
                JobState {
                    status: update.status,
                    bytes_done: update.bytes_done,
                    bytes_total: update.bytes_total.or(known_total),
                },
            );

            let progress = item.progress();
            let previous = std::mem::replace(&mut item.last, progress.clone());
            let events = transition_events(&book_id, &previous, &progress, item, step, update.error);
            state.publish(&book_id, progress);
            events
        };

        for event in events {
            self.events.emit(CoreEvent::Download(event)).ok();
        }
    }

    async fn resync(&self) {
        match self.engine.list_transfers().await {
            Ok(records) => {
                {
                    // Retired jobs the engine no longer runs will never report again
                    let mut state = self.state.lock();
                    let live: HashSet<&TransferId> = records
                        .iter()
                        .filter(|record| !record.status.is_terminal())
                        .map(|record| &record.id)
                        .collect();
                    state.retired.retain(|id| live.contains(id));
                }
                for record in records {
                    self.apply_update(TransferUpdate {
                        id: record.id,
                        group: record.group,
                        status: record.status,
                        bytes_done: record.bytes_done,
                        bytes_total: record.bytes_total,
                        error: None,
                    });
                }
            }
            Err(e) => warn!(error = %e, "Failed to list transfers"),
        }
    }
}

fn transition_events(
    book_id: &str,
    previous: &ItemProgress,
    current: &ItemProgress,
    item: &mut TrackedItem,
    step: u8,
    error: Option<String>,
) -> Vec<DownloadEvent> {
    let mut events = Vec::new();
    if previous.status != current.status {
        match current.status {
            DownloadStatus::Complete => {
                info!(book_id, files = current.total, "Download complete");
                events.push(DownloadEvent::Completed {
                    book_id: book_id.to_string(),
                });
            }
            DownloadStatus::Error => {
                let message = error.unwrap_or_else(|| "Transfer stopped".to_string());
                warn!(book_id, %message, "Download failed");
                events.push(DownloadEvent::Failed {
                    book_id: book_id.to_string(),
                    message,
                });
            }
            _ => {}
        }
    }

    if current.status == DownloadStatus::Running {
        let percent = current.percent();
        if previous.status != DownloadStatus::Running
            || percent >= item.last_event_percent.saturating_add(step)
        {
            item.last_event_percent = percent;
            events.push(DownloadEvent::Progress {
                book_id: book_id.to_string(),
                completed: current.completed,
                total: current.total,
                percent,
            });
        }
    }
    events
}

fn file_name(file: &ItemFile) -> String {
    match file.name.as_deref() {
        Some(name) if !name.trim().is_empty() => sanitize(name),
        _ => sanitize(&file.ino),
    }
}

/// Single path component safe to join under the download directory.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("part 01.mp3"), "part 01.mp3");
        assert_eq!(sanitize("../etc/passwd"), ".._etc_passwd");
        assert_eq!(sanitize(".."), "_");
        assert_eq!(sanitize("  "), "_");
    }

    #[test]
    fn test_file_name_falls_back_to_ino() {
        let file = ItemFile {
            ino: "101".to_string(),
            name: None,
            size: 0,
        };
        assert_eq!(file_name(&file), "101");
    }

    #[test]
    fn test_progress_events_are_throttled() {
        let mut item = TrackedItem::new(1, 1);
        let queued = ItemProgress {
            status: DownloadStatus::Queued,
            progress: 0.0,
            completed: 0,
            total: 1,
        };
        let at = |progress: f64| ItemProgress {
            status: DownloadStatus::Running,
            progress,
            completed: 0,
            total: 1,
        };

        assert_eq!(transition_events("li_1", &queued, &at(0.01), &mut item, 5, None).len(), 1);
        assert!(transition_events("li_1", &at(0.01), &at(0.03), &mut item, 5, None).is_empty());
        assert_eq!(transition_events("li_1", &at(0.03), &at(0.06), &mut item, 5, None).len(), 1);
    }

    #[test]
    fn test_retired_jobs_are_released_on_final_status() {
        let job = |status| JobState {
            status,
            bytes_done: 0,
            bytes_total: None,
        };
        let running = TransferId("t1".to_string());
        let finished = TransferId("t2".to_string());

        let mut state = QueueState::default();
        state.track("li_1", 2);
        let item = state.items.get_mut("li_1").unwrap();
        item.jobs.insert(running.clone(), job(TransferStatus::Running));
        item.jobs.insert(finished.clone(), job(TransferStatus::Complete));
        state.untrack("li_1");
        assert_eq!(state.retired, HashSet::from([running.clone()]));

        let update = |status| TransferUpdate {
            id: running.clone(),
            group: "li_1".to_string(),
            status,
            bytes_done: 10,
            bytes_total: Some(100),
            error: None,
        };
        assert!(state.absorb_retired(&update(TransferStatus::Running)));
        assert!(state.absorb_retired(&update(TransferStatus::Canceled)));
        assert!(state.retired.is_empty());
        assert!(!state.absorb_retired(&update(TransferStatus::Running)));
    }

    #[test]
    fn test_failure_event_carries_message() {
        let mut item = TrackedItem::new(1, 1);
        let failed = ItemProgress {
            status: DownloadStatus::Error,
            ..ItemProgress::default()
        };
        let events = transition_events(
            "li_1",
            &ItemProgress::default(),
            &failed,
            &mut item,
            5,
            Some("HTTP 500".to_string()),
        );
        assert_eq!(
            events,
            vec![DownloadEvent::Failed {
                book_id: "li_1".to_string(),
                message: "HTTP 500".to_string(),
            }]
        );
    }
}
