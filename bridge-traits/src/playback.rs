//! Audio engine contract.
//!
//! The decoder/player lives in the host. The core hands it an ordered list of
//! track sources, drives it with play/pause/seek, and observes it through a
//! `watch` channel of [`EngineState`]. Positions are per track; mapping to a
//! book-level position is the coordinator's job.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;

use crate::error::Result;

/// Where the engine should read a track from.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioSource {
    /// Previously downloaded file.
    LocalFile { path: PathBuf },
    /// Server stream. Headers carry the bearer token.
    RemoteStream {
        url: String,
        headers: HashMap<String, String>,
    },
}

impl AudioSource {
    pub fn is_remote(&self) -> bool {
        matches!(self, AudioSource::RemoteStream { .. })
    }
}

/// One entry of the engine's playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineTrack {
    pub source: AudioSource,
    pub duration: Duration,
    pub title: Option<String>,
}

/// Display metadata handed to the platform media session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaItemInfo {
    pub book_id: String,
    pub title: String,
    pub author: Option<String>,
    pub artwork_url: Option<String>,
}

/// Engine buffering/processing phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessingState {
    #[default]
    Idle,
    Loading,
    Buffering,
    Ready,
    /// Reached the end of the last track.
    Completed,
}

/// Snapshot of everything the engine reports.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EngineState {
    pub processing: ProcessingState,
    pub playing: bool,
    pub track_index: usize,
    /// Position inside the current track.
    pub position: Duration,
    /// Duration of the current track, once the engine knows it.
    pub duration: Option<Duration>,
}

/// Platform audio engine.
#[async_trait]
pub trait AudioEngine: Send + Sync {
    /// Replace the playlist and position the engine at `(index, offset)`
    /// without starting playback.
    async fn load(
        &self,
        media: MediaItemInfo,
        tracks: Vec<EngineTrack>,
        index: usize,
        offset: Duration,
    ) -> Result<()>;

    async fn play(&self) -> Result<()>;

    async fn pause(&self) -> Result<()>;

    /// Stop and release the playlist.
    async fn stop(&self) -> Result<()>;

    /// Switch to track `index` and seek to `offset` inside it.
    async fn seek(&self, index: usize, offset: Duration) -> Result<()>;

    /// Latest engine state.
    fn state(&self) -> EngineState {
        self.subscribe().borrow().clone()
    }

    /// Change feed for position, duration, playing flag and processing state.
    fn subscribe(&self) -> watch::Receiver<EngineState>;
}
