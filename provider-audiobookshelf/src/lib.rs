//! # Audiobook Server Provider
//!
//! Client for the Audiobookshelf-compatible server API.
//!
//! ## Overview
//!
//! - [`ApiClient`]: `request(method, path, ...)` with bearer auth, a deadline
//!   per call and classification of failures into [`RemoteError`]
//! - [`RemoteProgressClient`]: typed wrappers for catalog, progress, playback
//!   session, file listing and cover endpoints
//! - `testing::FakeServer` (feature `test-support`): in-memory server double

pub mod client;
pub mod error;
pub mod progress;
pub mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use client::ApiClient;
pub use error::{RemoteError, Result};
pub use progress::RemoteProgressClient;
pub use types::{
    AudioTrackDto, BookMetadataDto, ItemFile, LibraryDto, LibraryItemDto, LibraryItemsPage,
    MediaDto, MediaProgressDto, PlaybackSessionDto, ProgressUpdate, SessionSync,
};
