//! # Playback Error Types

use bridge_traits::error::BridgeError;
use core_library::LibraryError;
use provider_audiobookshelf::RemoteError;
use std::fmt;
use thiserror::Error;

/// Lazily resolved book metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Duration,
    Size,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Duration => f.write_str("duration"),
            Metric::Size => f.write_str("size"),
        }
    }
}

/// Errors that can occur during playback operations.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // State Errors
    // ========================================================================
    /// Attempted an operation that needs a loaded book.
    #[error("No book loaded")]
    NoTrackLoaded,

    /// `resume` found neither a loaded book nor a last-played one.
    #[error("Nothing to resume")]
    NothingToResume,

    /// The server returned a session without playable tracks.
    #[error("Book {book_id} has no playable tracks")]
    NoTracks { book_id: String },

    // ========================================================================
    // Resolution Errors
    // ========================================================================
    /// A resolution of the same metric for the same book is already running.
    #[error("Resolving {metric} of {book_id} is already in progress")]
    ResolutionInProgress { book_id: String, metric: Metric },

    /// The server had no usable value.
    #[error("Could not determine {metric} of {book_id}")]
    Unresolvable { book_id: String, metric: Metric },

    // ========================================================================
    // Collaborator Errors
    // ========================================================================
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    /// Audio engine or settings store failure.
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

impl PlaybackError {
    /// Returns `true` if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            PlaybackError::Remote(e) => e.is_transient(),
            PlaybackError::ResolutionInProgress { .. } => true,
            _ => false,
        }
    }

    pub fn is_resolution_in_progress(&self) -> bool {
        matches!(self, PlaybackError::ResolutionInProgress { .. })
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            PlaybackError::NoTrackLoaded | PlaybackError::NothingToResume => {
                "Nothing is playing. Pick a book to start listening."
            }
            PlaybackError::NoTracks { .. } => "This book has no playable audio.",
            PlaybackError::ResolutionInProgress { .. } => "Still working on it. Please wait.",
            PlaybackError::Unresolvable { .. } => "The server did not report this information.",
            PlaybackError::Remote(e) => e.user_message(),
            PlaybackError::Library(e) => e.user_message(),
            PlaybackError::Bridge(_) => "The player ran into a problem. Please try again.",
        }
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;
