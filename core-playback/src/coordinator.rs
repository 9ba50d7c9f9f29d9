//! # Playback Coordinator
//!
//! Owns the single [`NowPlaying`] record and keeps engine position, server
//! progress and completion flags consistent.
//!
//! ## Overview
//!
//! - `play_item` tears down the previous book (engine stopped, session
//!   closed) before a new session is opened for the next one.
//! - A background task per loaded book folds engine updates into
//!   `NowPlaying` and reports progress on a fixed interval while playing.
//! - Explicit reports (`report_progress_now`) and periodic ones share a lock,
//!   so a late periodic tick never lands after an explicit write. Flows that
//!   move the position on purpose hold a [`ReportingPause`] as well.
//! - [`CompletionCache`] is written only here, after the server accepted the
//!   change.
//!
//! ## State machine
//!
//! ```text
//! Idle -> Loading -> Playing <-> Paused -> Idle (stop)
//!                        \-> Buffering (engine)
//! ```

use bridge_traits::playback::{
    AudioEngine, AudioSource, EngineState, EngineTrack, MediaItemInfo, ProcessingState,
};
use bridge_traits::storage::{FileSystemAccess, SettingsStore};
use core_library::{Book, LocalLibraryCache};
use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent};
use futures::stream::BoxStream;
use parking_lot::Mutex;
use provider_audiobookshelf::{ProgressUpdate, RemoteProgressClient, SessionSync};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::bookmarks::{BookmarkEntry, BookmarkJournal};
use crate::completion::CompletionCache;
use crate::config::PlaybackConfig;
use crate::error::{Metric, PlaybackError, Result};
use crate::now_playing::{NowPlaying, OpenedSession, PlayerState, TrackInfo};
use crate::position::secs;
use crate::reporter::{ListeningClock, ReportOrigin, ReportingPause, Suppression};
use crate::resolver::InFlight;

/// Settings key of the most recently loaded book.
pub const LAST_PLAYED_SETTING: &str = "last_played_item";

const LOCAL_PROGRESS_PREFIX: &str = "abs_progress:";

/// Settings key of the locally kept resume point of a book.
pub fn local_progress_key(book_id: &str) -> String {
    format!("{}{}", LOCAL_PROGRESS_PREFIX, book_id)
}

/// Collaborators of [`PlaybackCoordinator`].
#[derive(Clone)]
pub struct PlaybackDeps {
    pub engine: Arc<dyn AudioEngine>,
    pub remote: RemoteProgressClient,
    pub library: LocalLibraryCache,
    pub settings: Arc<dyn SettingsStore>,
    pub file_system: Arc<dyn FileSystemAccess>,
    pub bookmarks: Option<Arc<dyn BookmarkJournal>>,
    pub events: EventBus,
}

struct Inner {
    config: PlaybackConfig,
    deps: PlaybackDeps,
    completion: CompletionCache,
    resolving: InFlight,
    now_playing: watch::Sender<Option<NowPlaying>>,
    /// Serializes load/stop/pause/resume.
    transition: AsyncMutex<()>,
    /// Serializes progress writes.
    report_lock: AsyncMutex<()>,
    listening: Mutex<ListeningClock>,
    suppression: Suppression,
    background: Mutex<Option<CancellationToken>>,
}

/// Playback coordinator
#[derive(Clone)]
pub struct PlaybackCoordinator {
    inner: Arc<Inner>,
}

impl PlaybackCoordinator {
    pub fn new(config: PlaybackConfig, deps: PlaybackDeps) -> Self {
        let (now_playing, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                config,
                deps,
                completion: CompletionCache::new(),
                resolving: InFlight::default(),
                now_playing,
                transition: AsyncMutex::new(()),
                report_lock: AsyncMutex::new(()),
                listening: Mutex::new(ListeningClock::default()),
                suppression: Suppression::default(),
                background: Mutex::new(None),
            }),
        }
    }

    /// Snapshot feed of the loaded book, `None` while idle.
    pub fn subscribe_now_playing(&self) -> watch::Receiver<Option<NowPlaying>> {
        self.inner.now_playing.subscribe()
    }

    pub fn now_playing(&self) -> Option<NowPlaying> {
        self.inner.now_playing.borrow().clone()
    }

    // ========================================================================
    // Transport
    // ========================================================================

    /// Load `book_id` at its last known position and start playing.
    #[instrument(skip(self))]
    pub async fn play_item(&self, book_id: &str) -> Result<()> {
        self.load_item(book_id, true).await
    }

    /// Continue the loaded book, or warm-load the last played one.
    ///
    /// Unless `skip_sync` is set, a server position that differs from the
    /// local one wins before playback continues.
    #[instrument(skip(self))]
    pub async fn resume(&self, skip_sync: bool) -> Result<()> {
        let transition = self.inner.transition.lock().await;
        let Some(current) = self.now_playing() else {
            drop(transition);
            return match self.warm_load_last_item(true).await? {
                true => Ok(()),
                false => Err(PlaybackError::NothingToResume),
            };
        };

        if !skip_sync {
            self.reconcile_with_server(&current).await;
        }

        self.inner.deps.engine.play().await?;
        self.set_playing(&current.book_id, true);
        self.emit(PlaybackEvent::Resumed {
            book_id: current.book_id.clone(),
            position_ms: millis(self.global_position().unwrap_or(current.position)),
        });
        Ok(())
    }

    /// Pause and push the position. The book stays loaded.
    #[instrument(skip(self))]
    pub async fn pause(&self) -> Result<()> {
        let _transition = self.inner.transition.lock().await;
        let Some(current) = self.now_playing() else {
            return Ok(());
        };

        self.inner.deps.engine.pause().await?;
        self.set_playing(&current.book_id, false);
        if let Err(e) = self.report(ReportOrigin::Explicit).await {
            debug!(book_id = %current.book_id, error = %e, "Progress report on pause failed");
        }
        self.emit(PlaybackEvent::Paused {
            book_id: current.book_id.clone(),
            position_ms: millis(self.global_position().unwrap_or(current.position)),
        });
        Ok(())
    }

    /// Tear down the loaded book.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        let _transition = self.inner.transition.lock().await;
        if let Some(stopped) = self.teardown().await {
            info!(book_id = %stopped.book_id, "Playback stopped");
        }
        Ok(())
    }

    /// Rebuild `NowPlaying` from the last played book. Returns `false` when
    /// no book was played before.
    #[instrument(skip(self))]
    pub async fn warm_load_last_item(&self, play_after_load: bool) -> Result<bool> {
        let last = match self.inner.deps.settings.get_string(LAST_PLAYED_SETTING).await {
            Ok(last) => last,
            Err(e) => {
                warn!(error = %e, "Failed to read last played book");
                None
            }
        };
        let Some(book_id) = last.filter(|id| !id.is_empty()) else {
            debug!("No last played book");
            return Ok(false);
        };

        self.load_item(&book_id, play_after_load).await?;
        Ok(true)
    }

    async fn load_item(&self, book_id: &str, play: bool) -> Result<()> {
        let _transition = self.inner.transition.lock().await;

        if let Some(current) = self.now_playing() {
            if current.book_id == book_id {
                if play && !current.state.is_playing() {
                    self.inner.deps.engine.play().await?;
                    self.set_playing(book_id, true);
                }
                return Ok(());
            }
            self.teardown().await;
        }

        match self.start_book(book_id, play).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(book_id, error = %e, "Failed to load book");
                self.emit(PlaybackEvent::Error {
                    book_id: Some(book_id.to_string()),
                    message: e.user_message().to_string(),
                    recoverable: e.is_transient(),
                });
                Err(e)
            }
        }
    }

    async fn start_book(&self, book_id: &str, play: bool) -> Result<()> {
        let deps = &self.inner.deps;

        let book = match deps.library.get_book(book_id).await {
            Ok(book) => Some(book),
            Err(e) => {
                warn!(book_id, error = %e, "Book metadata unavailable, loading without it");
                None
            }
        };
        let resume_at = match self.fetch_server_progress(book_id).await {
            Ok(position) => position.unwrap_or(0.0),
            Err(e) => {
                warn!(book_id, error = %e, "No known position, starting from the beginning");
                0.0
            }
        };

        let session = self.open_session_and_get_tracks(book_id).await?;
        let timeline = session.timeline();
        if timeline.is_empty() {
            self.close_quietly(&session.session_id).await;
            return Err(PlaybackError::NoTracks {
                book_id: book_id.to_string(),
            });
        }
        // A finished book starts over
        let resume_at = if resume_at >= timeline.total() { 0.0 } else { resume_at };
        let (index, offset) = timeline.locate(resume_at);

        let engine_tracks = match self.engine_tracks(book_id, &session.tracks).await {
            Ok(tracks) => tracks,
            Err(e) => {
                self.close_quietly(&session.session_id).await;
                return Err(e);
            }
        };

        let title = book
            .as_ref()
            .map(|b| b.title.clone())
            .unwrap_or_else(|| book_id.to_string());
        let author = book
            .as_ref()
            .map(Book::author_display)
            .filter(|a| !a.is_empty());
        let cover_url = deps.remote.cover_url(book_id, true).await;

        self.inner.now_playing.send_replace(Some(NowPlaying {
            book_id: book_id.to_string(),
            title: title.clone(),
            author: author.clone(),
            cover_url: Some(cover_url.clone()),
            tracks: session.tracks.clone(),
            track_index: index,
            session_id: Some(session.session_id.clone()),
            state: PlayerState::Loading,
            position: secs(timeline.global_position(index, offset)),
        }));

        let media = MediaItemInfo {
            book_id: book_id.to_string(),
            title: title.clone(),
            author,
            artwork_url: Some(cover_url),
        };
        let mut started = deps.engine.load(media, engine_tracks, index, secs(offset)).await;
        if started.is_ok() && play {
            started = deps.engine.play().await;
        }
        if let Err(e) = started {
            self.inner.now_playing.send_replace(None);
            if let Err(stop_error) = deps.engine.stop().await {
                debug!(error = %stop_error, "Engine stop after failed load");
            }
            self.close_quietly(&session.session_id).await;
            return Err(e.into());
        }

        self.inner.listening.lock().reset();
        self.set_playing(book_id, play);
        self.remember_last_played(book_id).await;
        self.record_session_duration(book_id, timeline.total()).await;
        self.start_background(book_id);
        if self.inner.config.eager_resolution {
            self.spawn_eager_resolution(book_id, book.as_ref());
        }

        info!(
            book_id,
            session_id = %session.session_id,
            track_index = index,
            resume_at,
            "Book loaded"
        );
        self.emit(PlaybackEvent::Started {
            book_id: book_id.to_string(),
            title,
        });
        Ok(())
    }

    /// Stop the engine, close the session with a final sync and drop
    /// `NowPlaying`. Caller holds the transition lock.
    async fn teardown(&self) -> Option<NowPlaying> {
        self.stop_background();
        let current = self.now_playing()?;
        let deps = &self.inner.deps;

        let position = self.global_position().unwrap_or(current.position);
        let listened = self.inner.listening.lock().take();

        if let Err(e) = deps.engine.stop().await {
            warn!(book_id = %current.book_id, error = %e, "Engine failed to stop");
        }

        {
            let _report = self.inner.report_lock.lock().await;
            if let Some(session_id) = current.session_id.as_deref() {
                let sync = SessionSync {
                    current_time: position.as_secs_f64(),
                    time_listened: listened.as_secs_f64(),
                    duration: current.timeline().total(),
                };
                // Failure is logged by the client; the local copy below still
                // keeps the position.
                deps.remote.close_session(session_id, Some(&sync)).await.ok();
            }
        }
        self.store_local_progress(&current.book_id, position.as_secs_f64())
            .await;

        self.inner.listening.lock().reset();
        self.inner.now_playing.send_replace(None);
        self.emit(PlaybackEvent::Stopped {
            book_id: current.book_id.clone(),
        });
        Some(current)
    }

    async fn reconcile_with_server(&self, current: &NowPlaying) {
        let remote = match self.inner.deps.remote.fetch_progress(&current.book_id).await {
            Ok(Some(progress)) if !progress.is_finished => secs(progress.current_time),
            Ok(_) => return,
            Err(e) => {
                debug!(book_id = %current.book_id, error = %e, "Resuming from local position");
                return;
            }
        };

        let local = self.global_position().unwrap_or(current.position);
        let drift = if remote > local { remote - local } else { local - remote };
        if drift > self.inner.config.resync_tolerance {
            info!(
                book_id = %current.book_id,
                local_secs = local.as_secs_f64(),
                remote_secs = remote.as_secs_f64(),
                "Server position changed elsewhere, seeking"
            );
            if let Err(e) = self.seek_global(remote).await {
                warn!(book_id = %current.book_id, error = %e, "Failed to apply server position");
            }
        }
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Open a streaming session and return its tracks.
    ///
    /// The session stays open on the server; callers that only probe must
    /// call [`close_session_by_id`](Self::close_session_by_id), also on error
    /// paths.
    pub async fn open_session_and_get_tracks(&self, book_id: &str) -> Result<OpenedSession> {
        let session = self.inner.deps.remote.open_session(book_id).await?;
        let mut tracks = session.audio_tracks;
        tracks.sort_by_key(|t| t.index);
        Ok(OpenedSession {
            session_id: session.id,
            tracks: tracks.into_iter().map(TrackInfo::from).collect(),
        })
    }

    pub async fn close_session_by_id(&self, session_id: &str) -> Result<()> {
        self.inner.deps.remote.close_session(session_id, None).await?;
        Ok(())
    }

    async fn close_quietly(&self, session_id: &str) {
        if let Err(e) = self.close_session_by_id(session_id).await {
            debug!(session_id, error = %e, "Ignoring session close failure");
        }
    }

    // ========================================================================
    // Position
    // ========================================================================

    /// Seek to a book-level position.
    #[instrument(skip(self))]
    pub async fn seek_global(&self, position: Duration) -> Result<()> {
        let current = self.now_playing().ok_or(PlaybackError::NoTrackLoaded)?;
        let timeline = current.timeline();
        let (index, offset) = timeline.locate_duration(position);

        self.inner.deps.engine.seek(index, offset).await?;

        let global = secs(timeline.global_position(index, offset.as_secs_f64()));
        self.update_now_playing(&current.book_id, |np| {
            np.track_index = index;
            np.position = global;
        });
        debug!(book_id = %current.book_id, track_index = index, offset_secs = offset.as_secs_f64(), "Seeked");
        Ok(())
    }

    /// Book-level position of the loaded book.
    pub fn global_position(&self) -> Option<Duration> {
        let current = self.now_playing()?;
        let engine = self.inner.deps.engine.state();
        if matches!(
            engine.processing,
            ProcessingState::Idle | ProcessingState::Completed
        ) {
            return Some(current.position);
        }
        let timeline = current.timeline();
        Some(secs(
            timeline.global_position(engine.track_index, engine.position.as_secs_f64()),
        ))
    }

    // ========================================================================
    // Progress
    // ========================================================================

    /// Last known position in seconds, `None` if the book was never played.
    ///
    /// The server is asked first; when it cannot be reached the locally kept
    /// position is used.
    #[instrument(skip(self))]
    pub async fn fetch_server_progress(&self, book_id: &str) -> Result<Option<f64>> {
        match self.inner.deps.remote.fetch_progress(book_id).await {
            Ok(progress) => Ok(progress.map(|p| p.current_time)),
            Err(e) => match self.local_progress(book_id).await {
                Some(position) => {
                    debug!(book_id, error = %e, position, "Using local progress");
                    Ok(Some(position))
                }
                None => Err(e.into()),
            },
        }
    }

    /// Push the current position now.
    #[instrument(skip(self))]
    pub async fn report_progress_now(&self) -> Result<()> {
        match self.report(ReportOrigin::Explicit).await? {
            true => Ok(()),
            false => Err(PlaybackError::NoTrackLoaded),
        }
    }

    /// Skip periodic reports until the returned guard is dropped.
    pub fn pause_periodic_reporting(&self) -> ReportingPause {
        self.inner.suppression.hold()
    }

    async fn report(&self, origin: ReportOrigin) -> Result<bool> {
        let suppressed = || origin == ReportOrigin::Periodic && self.inner.suppression.is_active();
        if suppressed() {
            return Ok(false);
        }
        let _report = self.inner.report_lock.lock().await;
        if suppressed() {
            return Ok(false);
        }
        let Some(current) = self.now_playing() else {
            return Ok(false);
        };

        let deps = &self.inner.deps;
        let position = self.global_position().unwrap_or(current.position);
        let current_time = position.as_secs_f64();
        let duration = current.timeline().total();
        let listened = self.inner.listening.lock().take();

        let sent = match current.session_id.as_deref() {
            Some(session_id) => {
                let sync = SessionSync {
                    current_time,
                    time_listened: listened.as_secs_f64(),
                    duration,
                };
                deps.remote.sync_session(session_id, &sync).await
            }
            None => {
                let finished = self.inner.completion.get(&current.book_id).unwrap_or(false);
                let update = ProgressUpdate::position(current_time, duration, finished);
                deps.remote.update_progress(&current.book_id, &update).await
            }
        };
        if let Err(e) = sent {
            self.inner.listening.lock().restore(listened);
            return Err(e.into());
        }

        self.store_local_progress(&current.book_id, current_time).await;
        debug!(book_id = %current.book_id, current_time, ?origin, "Progress reported");
        self.emit(PlaybackEvent::ProgressReported {
            book_id: current.book_id.clone(),
            position_ms: millis(position),
        });
        Ok(true)
    }

    async fn local_progress(&self, book_id: &str) -> Option<f64> {
        match self.inner.deps.settings.get_f64(&local_progress_key(book_id)).await {
            Ok(position) => position,
            Err(e) => {
                warn!(book_id, error = %e, "Failed to read local progress");
                None
            }
        }
    }

    async fn store_local_progress(&self, book_id: &str, position: f64) {
        let key = local_progress_key(book_id);
        if let Err(e) = self.inner.deps.settings.set_f64(&key, position).await {
            warn!(book_id, error = %e, "Failed to store local progress");
        }
    }

    // ========================================================================
    // Completion
    // ========================================================================

    /// Ask the server whether the book is finished.
    ///
    /// Falls back to the cached flag when the server cannot be reached. A
    /// fetch that raced with a local toggle does not overwrite it.
    #[instrument(skip(self))]
    pub async fn is_book_completed(&self, book_id: &str) -> Result<bool> {
        let completion = &self.inner.completion;
        let version = completion.version(book_id);

        match self.inner.deps.remote.fetch_progress(book_id).await {
            Ok(progress) => {
                let finished = progress.is_some_and(|p| p.is_finished);
                if completion.set_if_unchanged(book_id, finished, version) {
                    Ok(finished)
                } else {
                    debug!(book_id, "Completion toggled during fetch, keeping local flag");
                    Ok(completion.get(book_id).unwrap_or(finished))
                }
            }
            Err(e) => match completion.get(book_id) {
                Some(cached) => {
                    debug!(book_id, error = %e, cached, "Using cached completion");
                    Ok(cached)
                }
                None => Err(e.into()),
            },
        }
    }

    /// Write the finished flag to the server, then cache and broadcast it.
    #[instrument(skip(self))]
    pub async fn update_book_completion_status(&self, book_id: &str, finished: bool) -> Result<()> {
        self.inner
            .deps
            .remote
            .update_progress(book_id, &ProgressUpdate::finished(finished))
            .await?;
        self.apply_completion(book_id, finished);
        Ok(())
    }

    /// Mark a finished book unfinished and restore a resume point.
    ///
    /// Without `resume_at` the locally kept position is used, then the
    /// server's. When the book is loaded the engine seeks there and the
    /// position is reported right away.
    #[instrument(skip(self))]
    pub async fn mark_unfinished(&self, book_id: &str, resume_at: Option<Duration>) -> Result<()> {
        let _pause = self.pause_periodic_reporting();
        let loaded = self.now_playing().filter(|np| np.book_id == book_id);

        let position = match resume_at {
            Some(position) => position.as_secs_f64(),
            None => match self.local_progress(book_id).await {
                Some(position) => position,
                None => self.fetch_server_progress(book_id).await?.unwrap_or(0.0),
            },
        };
        self.store_local_progress(book_id, position).await;

        let duration = match &loaded {
            Some(np) => np.timeline().total(),
            None => self.known_duration_secs(book_id).await,
        };
        self.inner
            .deps
            .remote
            .update_progress(book_id, &ProgressUpdate::position(position, duration, false))
            .await?;
        self.apply_completion(book_id, false);

        if loaded.is_some() {
            self.seek_global(secs(position)).await?;
            self.report_progress_now().await?;
        }
        info!(book_id, position, "Book marked unfinished");
        Ok(())
    }

    /// Completion flag of one book, starting with the cached value.
    pub fn get_book_completion_stream(&self, book_id: &str) -> BoxStream<'static, bool> {
        self.inner.completion.stream(book_id)
    }

    /// Cached flag without a network round trip.
    pub fn cached_completion(&self, book_id: &str) -> Option<bool> {
        self.inner.completion.get(book_id)
    }

    fn apply_completion(&self, book_id: &str, finished: bool) {
        self.inner.completion.set(book_id, finished);
        info!(book_id, finished, "Completion updated");
        self.emit(PlaybackEvent::CompletionChanged {
            book_id: book_id.to_string(),
            finished,
        });
    }

    async fn known_duration_secs(&self, book_id: &str) -> f64 {
        match self.inner.deps.library.get_book_from_db(book_id).await {
            Ok(book) => book.and_then(|b| b.duration_secs()).unwrap_or(0.0),
            Err(e) => {
                debug!(book_id, error = %e, "Duration unknown");
                0.0
            }
        }
    }

    // ========================================================================
    // Bookmarks
    // ========================================================================

    /// Bookmarks of a book, ordered by position.
    pub async fn list_bookmarks(&self, book_id: &str) -> Result<Vec<BookmarkEntry>> {
        let Some(journal) = self.inner.deps.bookmarks.as_ref() else {
            return Ok(Vec::new());
        };
        let mut entries = journal.list(book_id).await?;
        entries.sort_by_key(|e| e.position_ms);
        Ok(entries)
    }

    /// Jump to a bookmark, loading its book if needed, and report at once.
    #[instrument(skip(self, entry), fields(book_id = %entry.book_id, position_ms = entry.position_ms))]
    pub async fn restore_bookmark(&self, entry: &BookmarkEntry) -> Result<()> {
        let _pause = self.pause_periodic_reporting();
        let loaded = self
            .now_playing()
            .is_some_and(|np| np.book_id == entry.book_id);
        if !loaded {
            self.load_item(&entry.book_id, false).await?;
        }

        self.seek_global(entry.position()).await?;
        self.report_progress_now().await
    }

    // ========================================================================
    // Metadata resolution
    // ========================================================================

    /// Duration of a book, opening a probing session when nothing is known.
    ///
    /// The session is closed whatever happens. A resolved value is stored and
    /// never resolved again.
    #[instrument(skip(self))]
    pub async fn resolve_book_duration(&self, book_id: &str) -> Result<Duration> {
        let _resolving = self.inner.resolving.begin(book_id, Metric::Duration)?;

        let book = self.inner.deps.library.get_book(book_id).await?;
        if let Some(ms) = book.known_duration_ms() {
            return Ok(Duration::from_millis(ms as u64));
        }

        let session = self.open_session_and_get_tracks(book_id).await?;
        let total = session.timeline().total();
        self.close_quietly(&session.session_id).await;

        if total <= 0.0 {
            return Err(PlaybackError::Unresolvable {
                book_id: book_id.to_string(),
                metric: Metric::Duration,
            });
        }
        let ms = (total * 1000.0).round() as i64;
        self.inner.deps.library.record_duration(book_id, ms).await?;
        info!(book_id, duration_ms = ms, "Duration resolved");
        Ok(Duration::from_millis(ms as u64))
    }

    /// Size of a book in bytes, summed from its file listing when unknown.
    #[instrument(skip(self))]
    pub async fn resolve_book_size(&self, book_id: &str) -> Result<u64> {
        let _resolving = self.inner.resolving.begin(book_id, Metric::Size)?;

        let book = self.inner.deps.library.get_book(book_id).await?;
        if let Some(bytes) = book.known_size_bytes() {
            return Ok(bytes as u64);
        }

        let total = self.inner.deps.remote.estimate_item_size(book_id).await?;
        if total == 0 {
            return Err(PlaybackError::Unresolvable {
                book_id: book_id.to_string(),
                metric: Metric::Size,
            });
        }
        let stored = i64::try_from(total).unwrap_or(i64::MAX);
        self.inner.deps.library.record_size(book_id, stored).await?;
        info!(book_id, size_bytes = total, "Size resolved");
        Ok(total)
    }

    pub fn is_resolving(&self, book_id: &str, metric: Metric) -> bool {
        self.inner.resolving.is_resolving(book_id, metric)
    }

    async fn record_session_duration(&self, book_id: &str, total_secs: f64) {
        if total_secs <= 0.0 {
            return;
        }
        let ms = (total_secs * 1000.0).round() as i64;
        if let Err(e) = self.inner.deps.library.record_duration(book_id, ms).await {
            debug!(book_id, error = %e, "Failed to store session duration");
        }
    }

    fn spawn_eager_resolution(&self, book_id: &str, book: Option<&Book>) {
        if book.is_some_and(|b| b.known_size_bytes().is_some()) {
            return;
        }
        let coordinator = self.clone();
        let book_id = book_id.to_string();
        tokio::spawn(async move {
            match coordinator.resolve_book_size(&book_id).await {
                Ok(_) | Err(PlaybackError::ResolutionInProgress { .. }) => {}
                Err(e) => debug!(book_id = %book_id, error = %e, "Eager size resolution failed"),
            }
        });
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Forget everything tied to the signed-in user.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<()> {
        self.stop().await?;
        self.inner.completion.clear();

        let settings = &self.inner.deps.settings;
        if let Err(e) = settings.delete(LAST_PLAYED_SETTING).await {
            warn!(error = %e, "Failed to forget last played book");
        }
        match settings.list_keys(LOCAL_PROGRESS_PREFIX).await {
            Ok(keys) => {
                for key in keys {
                    if let Err(e) = settings.delete(&key).await {
                        warn!(key = %key, error = %e, "Failed to delete local progress");
                    }
                }
            }
            Err(e) => warn!(error = %e, "Failed to list local progress"),
        }
        info!("Playback state cleared");
        Ok(())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn engine_tracks(&self, book_id: &str, tracks: &[TrackInfo]) -> Result<Vec<EngineTrack>> {
        let mut headers: Option<HashMap<String, String>> = None;
        let mut engine_tracks = Vec::with_capacity(tracks.len());

        for track in tracks {
            let source = match self.local_track(book_id, &track.content_url).await {
                Some(path) => AudioSource::LocalFile { path },
                None => {
                    let headers = match &headers {
                        Some(headers) => headers.clone(),
                        None => {
                            let fetched = self.inner.deps.remote.auth_headers().await?;
                            headers = Some(fetched.clone());
                            fetched
                        }
                    };
                    AudioSource::RemoteStream {
                        url: self.inner.deps.remote.track_url(&track.content_url),
                        headers,
                    }
                }
            };
            engine_tracks.push(EngineTrack {
                source,
                duration: secs(track.duration),
                title: track.title.clone(),
            });
        }
        Ok(engine_tracks)
    }

    /// Downloaded copy of a track, if present.
    async fn local_track(&self, book_id: &str, content_url: &str) -> Option<PathBuf> {
        let dir = self.inner.config.download_dir.as_ref()?;
        let name = content_url
            .split('?')
            .next()?
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())?;
        let name = urlencoding::decode(name).ok()?;
        let path = dir.join(book_id).join(name.as_ref());
        match self.inner.deps.file_system.exists(&path).await {
            Ok(true) => Some(path),
            _ => None,
        }
    }

    async fn remember_last_played(&self, book_id: &str) {
        if let Err(e) = self
            .inner
            .deps
            .settings
            .set_string(LAST_PLAYED_SETTING, book_id)
            .await
        {
            warn!(book_id, error = %e, "Failed to remember last played book");
        }
    }

    fn update_now_playing(&self, book_id: &str, update: impl FnOnce(&mut NowPlaying)) {
        self.inner.now_playing.send_if_modified(|slot| match slot {
            Some(np) if np.book_id == book_id => {
                let before = np.clone();
                update(np);
                *np != before
            }
            _ => false,
        });
    }

    fn set_playing(&self, book_id: &str, playing: bool) {
        self.inner.listening.lock().set_playing(playing);
        let state = if playing {
            PlayerState::Playing
        } else {
            PlayerState::Paused
        };
        self.update_now_playing(book_id, |np| np.state = state);
    }

    fn is_playing(&self, book_id: &str) -> bool {
        self.inner
            .now_playing
            .borrow()
            .as_ref()
            .is_some_and(|np| np.book_id == book_id && np.state.is_playing())
    }

    fn start_background(&self, book_id: &str) {
        let token = CancellationToken::new();
        if let Some(previous) = self.inner.background.lock().replace(token.clone()) {
            previous.cancel();
        }

        let weak = Arc::downgrade(&self.inner);
        let mut engine = self.inner.deps.engine.subscribe();
        // Seed before spawning so a change made before the task first runs
        // is still seen as a transition.
        let mut last = engine.borrow_and_update().processing;
        let period = self.inner.config.report_interval;
        let book_id = book_id.to_string();

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    changed = engine.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let state = engine.borrow_and_update().clone();
                        let Some(inner) = weak.upgrade() else { break };
                        PlaybackCoordinator { inner }
                            .on_engine_state(&book_id, &state, last)
                            .await;
                        last = state.processing;
                    }
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        let coordinator = PlaybackCoordinator { inner };
                        if coordinator.is_playing(&book_id) {
                            if let Err(e) = coordinator.report(ReportOrigin::Periodic).await {
                                debug!(book_id = %book_id, error = %e, "Periodic progress report failed");
                            }
                        }
                    }
                }
            }
            debug!(book_id = %book_id, "Playback watcher stopped");
        });
    }

    fn stop_background(&self) {
        if let Some(token) = self.inner.background.lock().take() {
            token.cancel();
        }
    }

    async fn on_engine_state(&self, book_id: &str, state: &EngineState, previous: ProcessingState) {
        let Some(current) = self.now_playing().filter(|np| np.book_id == book_id) else {
            return;
        };
        // Stopped or not loaded yet
        if state.processing == ProcessingState::Idle {
            return;
        }

        let index = state.track_index.min(current.tracks.len().saturating_sub(1));
        let timeline = current.timeline();
        let reached_end = state.processing == ProcessingState::Completed
            && previous != ProcessingState::Completed
            && current.is_last_track(index);

        let counting = state.playing && state.processing == ProcessingState::Ready;
        self.inner.listening.lock().set_playing(counting);

        let position = if reached_end {
            secs(timeline.total())
        } else {
            secs(timeline.global_position(index, state.position.as_secs_f64()))
        };
        let player_state = match state.processing {
            ProcessingState::Loading => PlayerState::Loading,
            ProcessingState::Buffering => PlayerState::Buffering,
            ProcessingState::Ready if state.playing => PlayerState::Playing,
            ProcessingState::Ready | ProcessingState::Completed => PlayerState::Paused,
            ProcessingState::Idle => current.state,
        };
        self.update_now_playing(book_id, |np| {
            np.track_index = index;
            np.position = position;
            np.state = player_state;
        });

        if reached_end {
            info!(book_id, "Reached the end of the book");
            if let Err(e) = self.report(ReportOrigin::Explicit).await {
                debug!(book_id, error = %e, "Final progress report failed");
            }
            if let Err(e) = self.update_book_completion_status(book_id, true).await {
                warn!(book_id, error = %e, "Failed to mark book finished");
            }
        }
    }

    fn emit(&self, event: PlaybackEvent) {
        self.inner.deps.events.emit(CoreEvent::Playback(event)).ok();
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
