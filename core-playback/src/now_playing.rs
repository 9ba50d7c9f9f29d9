//! The single "now playing" record.

use provider_audiobookshelf::AudioTrackDto;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::position::{secs, TrackTimeline};

/// Coordinator-level player state.
///
/// `Buffering` is surfaced from the engine while loading or playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlayerState {
    #[default]
    Idle,
    Loading,
    Buffering,
    Playing,
    Paused,
}

impl PlayerState {
    pub fn is_playing(&self) -> bool {
        matches!(self, PlayerState::Playing)
    }
}

/// One track of a streaming session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub title: Option<String>,
    /// Seconds
    pub duration: f64,
    /// Server-relative URL
    pub content_url: String,
}

impl From<AudioTrackDto> for TrackInfo {
    fn from(track: AudioTrackDto) -> Self {
        Self {
            title: track.title,
            duration: track.duration,
            content_url: track.content_url,
        }
    }
}

/// Result of [`open_session_and_get_tracks`](crate::PlaybackCoordinator::open_session_and_get_tracks).
///
/// The session stays open on the server until it is closed.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenedSession {
    pub session_id: String,
    pub tracks: Vec<TrackInfo>,
}

impl OpenedSession {
    pub fn timeline(&self) -> TrackTimeline {
        TrackTimeline::new(self.tracks.iter().map(|t| t.duration))
    }
}

/// Snapshot of the loaded book.
#[derive(Debug, Clone, PartialEq)]
pub struct NowPlaying {
    pub book_id: String,
    pub title: String,
    pub author: Option<String>,
    pub cover_url: Option<String>,
    pub tracks: Vec<TrackInfo>,
    pub track_index: usize,
    /// Open streaming session, if playback streams from the server.
    pub session_id: Option<String>,
    pub state: PlayerState,
    /// Book-level position
    pub position: Duration,
}

impl NowPlaying {
    pub fn timeline(&self) -> TrackTimeline {
        TrackTimeline::new(self.tracks.iter().map(|t| t.duration))
    }

    pub fn duration(&self) -> Duration {
        secs(self.timeline().total())
    }

    pub fn is_last_track(&self, index: usize) -> bool {
        index + 1 >= self.tracks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(duration: f64) -> TrackInfo {
        TrackInfo {
            title: None,
            duration,
            content_url: "/s/item/li_1/part01.mp3".into(),
        }
    }

    #[test]
    fn test_duration_sums_tracks() {
        let now_playing = NowPlaying {
            book_id: "li_1".into(),
            title: "Dune".into(),
            author: None,
            cover_url: None,
            tracks: vec![track(1800.0), track(1500.0)],
            track_index: 0,
            session_id: None,
            state: PlayerState::Loading,
            position: Duration::ZERO,
        };
        assert_eq!(now_playing.duration(), Duration::from_secs(3300));
        assert!(!now_playing.is_last_track(0));
        assert!(now_playing.is_last_track(1));
    }
}
