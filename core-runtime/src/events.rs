//! # Event Bus System
//!
//! Cross-component notifications for the sync core, carried over
//! `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! - **Event Types**: one enum per domain (auth, library, download, playback)
//! - **EventBus**: central broadcast channel for publishing events
//! - **EventStream**: receiver wrapper with an optional filter
//!
//! Components that need a dedicated per-item feed (download progress, the
//! completion flag of one book) expose their own `watch`/broadcast channels;
//! the bus carries the coarse-grained mirror of those changes for observers
//! that want everything.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, LibraryEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Library(LibraryEvent::BooksChanged {
//!         book_ids: vec!["li_1".to_string()],
//!     }))
//!     .ok();
//!
//! let event = stream.recv().await.unwrap();
//! assert_eq!(event.description(), "Cached books changed");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events; keep reading.
//! - **`RecvError::Closed`**: every sender was dropped; treat as shutdown.
//!
//! `emit` fails only when nobody is subscribed, so publishers call `.ok()`.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Auth(AuthEvent),
    Library(LibraryEvent),
    Download(DownloadEvent),
    Playback(PlaybackEvent),
}

impl CoreEvent {
    /// Human-readable description
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Auth(e) => e.description(),
            CoreEvent::Library(e) => e.description(),
            CoreEvent::Download(e) => e.description(),
            CoreEvent::Playback(e) => e.description(),
        }
    }

    /// Severity for log routing
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Download(DownloadEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Playback(PlaybackEvent::Error { .. }) => EventSeverity::Error,
            CoreEvent::Auth(AuthEvent::SessionStale { .. }) => EventSeverity::Warning,
            CoreEvent::Library(LibraryEvent::SyncTimedOut { .. }) => EventSeverity::Warning,
            CoreEvent::Auth(AuthEvent::SignedIn { .. } | AuthEvent::SignedOut { .. }) => {
                EventSeverity::Info
            }
            CoreEvent::Library(LibraryEvent::SyncCompleted { .. }) => EventSeverity::Info,
            CoreEvent::Download(DownloadEvent::Completed { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Authentication Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum AuthEvent {
    SignedIn {
        user_id: String,
    },
    /// Stored credentials were removed, either by the user or because the
    /// server rejected them.
    SignedOut {
        user_id: Option<String>,
        reason: SignOutReason,
    },
    /// Validation could not reach the server; the session is kept.
    SessionStale {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SignOutReason {
    UserRequested,
    Rejected,
}

impl AuthEvent {
    fn description(&self) -> &str {
        match self {
            AuthEvent::SignedIn { .. } => "User signed in",
            AuthEvent::SignedOut { .. } => "User signed out",
            AuthEvent::SessionStale { .. } => "Session could not be validated",
        }
    }
}

// ============================================================================
// Library Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum LibraryEvent {
    /// Rows for these books were inserted or changed in the local cache.
    BooksChanged {
        book_ids: Vec<String>,
    },
    SyncCompleted {
        books_synced: u64,
        duration_ms: u64,
    },
    SyncTimedOut {
        books_synced: u64,
    },
    Cleared,
}

impl LibraryEvent {
    fn description(&self) -> &str {
        match self {
            LibraryEvent::BooksChanged { .. } => "Cached books changed",
            LibraryEvent::SyncCompleted { .. } => "Library sync completed",
            LibraryEvent::SyncTimedOut { .. } => "Library sync timed out",
            LibraryEvent::Cleared => "Library cache cleared",
        }
    }
}

// ============================================================================
// Download Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum DownloadEvent {
    Enqueued {
        book_id: String,
        file_count: u32,
    },
    Progress {
        book_id: String,
        completed: u32,
        total: u32,
        percent: u8,
    },
    Completed {
        book_id: String,
    },
    Failed {
        book_id: String,
        message: String,
    },
    Cancelled {
        book_id: String,
    },
    Deleted {
        book_id: String,
    },
}

impl DownloadEvent {
    fn description(&self) -> &str {
        match self {
            DownloadEvent::Enqueued { .. } => "Download queued",
            DownloadEvent::Progress { .. } => "Download in progress",
            DownloadEvent::Completed { .. } => "Download completed",
            DownloadEvent::Failed { .. } => "Download failed",
            DownloadEvent::Cancelled { .. } => "Download cancelled",
            DownloadEvent::Deleted { .. } => "Downloaded files deleted",
        }
    }
}

// ============================================================================
// Playback Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PlaybackEvent {
    Started {
        book_id: String,
        title: String,
    },
    Paused {
        book_id: String,
        position_ms: u64,
    },
    Resumed {
        book_id: String,
        position_ms: u64,
    },
    Stopped {
        book_id: String,
    },
    ProgressReported {
        book_id: String,
        position_ms: u64,
    },
    CompletionChanged {
        book_id: String,
        finished: bool,
    },
    Error {
        book_id: Option<String>,
        message: String,
        recoverable: bool,
    },
}

impl PlaybackEvent {
    fn description(&self) -> &str {
        match self {
            PlaybackEvent::Started { .. } => "Playback started",
            PlaybackEvent::Paused { .. } => "Playback paused",
            PlaybackEvent::Resumed { .. } => "Playback resumed",
            PlaybackEvent::Stopped { .. } => "Playback stopped",
            PlaybackEvent::ProgressReported { .. } => "Progress reported",
            PlaybackEvent::CompletionChanged { .. } => "Completion status changed",
            PlaybackEvent::Error { .. } => "Playback error",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central broadcast channel. Cloning shares the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Returns the number of receivers, or an error when
    /// nobody is listening.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// Receiver with an optional predicate; non-matching events are skipped.
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |f| f(event))
    }

    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking receive. `None` when no matching event is buffered.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(Ok(event)),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn books_changed(ids: &[&str]) -> CoreEvent {
        CoreEvent::Library(LibraryEvent::BooksChanged {
            book_ids: ids.iter().map(|s| s.to_string()).collect(),
        })
    }

    #[tokio::test]
    async fn test_event_emission_no_subscribers() {
        let bus = EventBus::new(10);
        assert!(bus.emit(books_changed(&["li_1"])).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let event = CoreEvent::Playback(PlaybackEvent::CompletionChanged {
            book_id: "li_1".to_string(),
            finished: true,
        });
        assert_eq!(bus.emit(event.clone()).unwrap(), 2);

        assert_eq!(sub1.recv().await.unwrap(), event);
        assert_eq!(sub2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_event_stream_with_filter() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, CoreEvent::Download(_)));

        bus.emit(books_changed(&["li_1"])).ok();
        let download = CoreEvent::Download(DownloadEvent::Progress {
            book_id: "li_2".to_string(),
            completed: 1,
            total: 3,
            percent: 40,
        });
        bus.emit(download.clone()).ok();

        assert_eq!(stream.recv().await.unwrap(), download);
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        for i in 0..5 {
            bus.emit(books_changed(&[&format!("li_{i}")])).ok();
        }

        assert!(matches!(sub.recv().await, Err(RecvError::Lagged(_))));
    }

    #[test]
    fn test_event_severity() {
        let failed = CoreEvent::Download(DownloadEvent::Failed {
            book_id: "li_1".to_string(),
            message: "disk full".to_string(),
        });
        assert_eq!(failed.severity(), EventSeverity::Error);

        let stale = CoreEvent::Auth(AuthEvent::SessionStale {
            message: "timeout".to_string(),
        });
        assert_eq!(stale.severity(), EventSeverity::Warning);

        let reported = CoreEvent::Playback(PlaybackEvent::ProgressReported {
            book_id: "li_1".to_string(),
            position_ms: 5_000,
        });
        assert_eq!(reported.severity(), EventSeverity::Debug);
    }

    #[test]
    fn test_event_serialization_shape() {
        let event = CoreEvent::Auth(AuthEvent::SignedOut {
            user_id: Some("usr_1".to_string()),
            reason: SignOutReason::Rejected,
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Auth");
        assert_eq!(json["payload"]["event"], "SignedOut");
        assert_eq!(json["payload"]["reason"], "Rejected");
    }
}
