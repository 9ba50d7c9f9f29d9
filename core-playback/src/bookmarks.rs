//! Read-only view of the bookmark journal.

use async_trait::async_trait;
use bridge_traits::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A saved position inside a book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkEntry {
    pub book_id: String,
    /// Book-level position in milliseconds
    pub position_ms: u64,
    pub chapter_index: Option<u32>,
    pub chapter_title: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl BookmarkEntry {
    pub fn position(&self) -> Duration {
        Duration::from_millis(self.position_ms)
    }
}

/// Storage of bookmarks, owned by the host.
#[async_trait]
pub trait BookmarkJournal: Send + Sync {
    async fn list(&self, book_id: &str) -> Result<Vec<BookmarkEntry>>;
}
