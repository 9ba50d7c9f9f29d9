//! # Playback Coordination
//!
//! Drives the host audio engine for one audiobook at a time and keeps the
//! server in sync with what the listener does.
//!
//! ## Overview
//!
//! - [`PlaybackCoordinator`]: the "now playing" state machine, progress
//!   reporting, completion flags and bookmark restore
//! - [`TrackTimeline`]: book-level position to (track, offset) mapping
//! - [`CompletionCache`]: finished flags with a per-book change stream
//! - On-demand duration/size resolution with one in-flight resolution per
//!   book and metric
//!
//! Eager resolution at load time is available through
//! [`PlaybackConfig::eager_resolution`] or the `eager-resolution` feature.

pub mod bookmarks;
pub mod completion;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod now_playing;
pub mod position;
mod reporter;
mod resolver;

pub use bookmarks::{BookmarkEntry, BookmarkJournal};
pub use completion::CompletionCache;
pub use config::PlaybackConfig;
pub use coordinator::{local_progress_key, PlaybackCoordinator, PlaybackDeps, LAST_PLAYED_SETTING};
pub use error::{Metric, PlaybackError, Result};
pub use now_playing::{NowPlaying, OpenedSession, PlayerState, TrackInfo};
pub use position::TrackTimeline;
pub use reporter::ReportingPause;
