//! # Local Library Cache
//!
//! Offline-first read path for book metadata.
//!
//! Reads go to the server first and are written through to SQLite before
//! they are returned, so a later read under a network failure can fall back
//! to the stored copy. A book that was never read successfully fails with
//! [`LibraryError::NotCached`].
//!
//! Writers publish the identifiers they changed on a broadcast channel;
//! [`LocalLibraryCache::subscribe_changes`] and
//! [`LocalLibraryCache::watch_book`] expose it to views that want to refresh
//! without a spinner.

use bridge_traits::time::Clock;
use core_runtime::events::{CoreEvent, EventBus, LibraryEvent};
use futures::stream::{self, BoxStream, StreamExt};
use provider_audiobookshelf::{LibraryItemDto, RemoteProgressClient};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, instrument, warn};

use crate::error::{LibraryError, Result};
use crate::models::Book;
use crate::normalize::book_from_item;
use crate::repositories::{BookRepository, Page, PageRequest};

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Bulk sync parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub page_size: u32,
    /// Bound on the whole sync, all libraries and pages included.
    pub timeout: Duration,
}

impl SyncOptions {
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            page_size: 50,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Result of [`LocalLibraryCache::sync_all_books_to_db`].
///
/// Books stored before a timeout stay stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed { books: u64 },
    TimedOut { books_so_far: u64 },
}

impl SyncOutcome {
    pub fn books(&self) -> u64 {
        match self {
            SyncOutcome::Completed { books } => *books,
            SyncOutcome::TimedOut { books_so_far } => *books_so_far,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, SyncOutcome::Completed { .. })
    }
}

/// Read-through/write-through book cache.
#[derive(Clone)]
pub struct LocalLibraryCache {
    repo: Arc<dyn BookRepository>,
    remote: RemoteProgressClient,
    events: EventBus,
    changes: broadcast::Sender<Vec<String>>,
    clock: Arc<dyn Clock>,
}

impl LocalLibraryCache {
    pub fn new(
        repo: Arc<dyn BookRepository>,
        remote: RemoteProgressClient,
        events: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            repo,
            remote,
            events,
            changes,
            clock,
        }
    }

    /// Network-first read with local fallback.
    ///
    /// Every remote error kind falls back to the stored copy. Only a missing
    /// row turns the failure into [`LibraryError::NotCached`].
    #[instrument(skip(self))]
    pub async fn get_book(&self, id: &str) -> Result<Book> {
        match self.remote.get_item(id).await {
            Ok(item) => {
                let book = book_from_item(&item, self.now_ms());
                self.write_through(book).await
            }
            Err(cause) => {
                warn!(book_id = id, error = %cause, "Remote read failed, using local copy");
                match self.repo.find_by_id(id).await? {
                    Some(book) => Ok(book),
                    None => Err(LibraryError::NotCached {
                        id: id.to_string(),
                        cause,
                    }),
                }
            }
        }
    }

    /// Local lookup only.
    pub async fn get_book_from_db(&self, id: &str) -> Result<Option<Book>> {
        self.repo.find_by_id(id).await
    }

    /// Persist a possibly partial book. Known positive duration/size are
    /// never lost.
    #[instrument(skip(self, book), fields(book_id = %book.id))]
    pub async fn upsert_book(&self, book: &Book) -> Result<()> {
        let mut book = book.clone();
        book.cached_at = self.now_ms();
        self.repo.upsert(&book).await?;
        self.notify(vec![book.id]);
        Ok(())
    }

    /// Record a resolved duration. Returns `false` when the book is not
    /// cached or already has one.
    pub async fn record_duration(&self, id: &str, duration_ms: i64) -> Result<bool> {
        let updated = self.repo.set_duration(id, duration_ms).await?;
        if updated {
            debug!(book_id = id, duration_ms, "Duration recorded");
            self.notify(vec![id.to_string()]);
        }
        Ok(updated)
    }

    /// Record a resolved size. Same contract as
    /// [`record_duration`](Self::record_duration).
    pub async fn record_size(&self, id: &str, size_bytes: i64) -> Result<bool> {
        let updated = self.repo.set_size(id, size_bytes).await?;
        if updated {
            debug!(book_id = id, size_bytes, "Size recorded");
            self.notify(vec![id.to_string()]);
        }
        Ok(updated)
    }

    pub async fn list_books(&self, page_request: PageRequest) -> Result<Page<Book>> {
        self.repo.query(page_request).await
    }

    pub async fn count(&self) -> Result<i64> {
        self.repo.count().await
    }

    /// Page through every library and store all items.
    ///
    /// The timeout bounds the whole run. Hitting it is not an error: the
    /// pages already stored are kept and the outcome says how many.
    #[instrument(skip(self), fields(page_size = options.page_size))]
    pub async fn sync_all_books_to_db(&self, options: SyncOptions) -> Result<SyncOutcome> {
        let started = tokio::time::Instant::now();
        let synced = AtomicU64::new(0);

        let outcome = match tokio::time::timeout(
            options.timeout,
            self.sync_libraries(options.page_size.max(1), &synced),
        )
        .await
        {
            Ok(Ok(())) => SyncOutcome::Completed {
                books: synced.load(Ordering::Relaxed),
            },
            Ok(Err(e)) => {
                warn!(error = %e, "Library sync failed");
                return Err(e);
            }
            Err(_) => SyncOutcome::TimedOut {
                books_so_far: synced.load(Ordering::Relaxed),
            },
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            SyncOutcome::Completed { books } => {
                info!(books, duration_ms, "Library sync completed");
                self.events
                    .emit(CoreEvent::Library(LibraryEvent::SyncCompleted {
                        books_synced: books,
                        duration_ms,
                    }))
                    .ok();
            }
            SyncOutcome::TimedOut { books_so_far } => {
                warn!(books_so_far, duration_ms, "Library sync timed out");
                self.events
                    .emit(CoreEvent::Library(LibraryEvent::SyncTimedOut {
                        books_synced: books_so_far,
                    }))
                    .ok();
            }
        }
        Ok(outcome)
    }

    /// Remove every cached book. Used on sign-out.
    pub async fn clear(&self) -> Result<()> {
        let removed = self.repo.delete_all().await?;
        info!(removed, "Library cache cleared");
        self.events
            .emit(CoreEvent::Library(LibraryEvent::Cleared))
            .ok();
        Ok(())
    }

    /// Batches of book identifiers whose stored record changed.
    pub fn subscribe_changes(&self) -> BoxStream<'static, Vec<String>> {
        stream::unfold(self.changes.subscribe(), |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(ids) => return Some((ids, rx)),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Change subscriber lagged");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }

    /// Fresh stored copy of one book each time it changes.
    pub fn watch_book(&self, id: &str) -> BoxStream<'static, Book> {
        let id = id.to_string();
        let repo = self.repo.clone();
        self.subscribe_changes()
            .filter_map(move |ids| {
                let repo = repo.clone();
                let id = id.clone();
                async move {
                    if !ids.contains(&id) {
                        return None;
                    }
                    repo.find_by_id(&id).await.ok().flatten()
                }
            })
            .boxed()
    }

    async fn sync_libraries(&self, page_size: u32, synced: &AtomicU64) -> Result<()> {
        let libraries = self.remote.list_libraries().await?;
        for library in libraries {
            if library
                .media_type
                .as_deref()
                .is_some_and(|media_type| media_type != "book")
            {
                debug!(library_id = %library.id, "Skipping non-book library");
                continue;
            }

            let mut page = 0;
            loop {
                let result = self
                    .remote
                    .list_library_items(&library.id, page_size, page)
                    .await?;
                let count = result.results.len() as u64;
                self.store_items(&result.results).await?;
                synced.fetch_add(count, Ordering::Relaxed);
                debug!(library_id = %library.id, page, count, "Library page stored");

                if !result.has_more() {
                    break;
                }
                page += 1;
            }
        }
        Ok(())
    }

    async fn store_items(&self, items: &[LibraryItemDto]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let now = self.now_ms();
        let ids: Vec<String> = items.iter().map(|item| item.id.clone()).collect();
        let existing: HashMap<String, Book> = self
            .repo
            .find_by_ids(&ids)
            .await?
            .into_iter()
            .map(|book| (book.id.clone(), book))
            .collect();

        let mut changed = Vec::new();
        for item in items {
            let mut book = book_from_item(item, now);
            match existing.get(&book.id) {
                Some(old) => {
                    book.retain_resolved_from(old);
                    if !book.same_content(old) {
                        changed.push(book);
                    }
                }
                None => changed.push(book),
            }
        }

        if changed.is_empty() {
            return Ok(());
        }
        self.repo.upsert_many(&changed).await?;
        self.notify(changed.into_iter().map(|book| book.id).collect());
        Ok(())
    }

    async fn write_through(&self, mut book: Book) -> Result<Book> {
        if let Some(existing) = self.repo.find_by_id(&book.id).await? {
            book.retain_resolved_from(&existing);
            if book.same_content(&existing) {
                return Ok(existing);
            }
        }
        self.repo.upsert(&book).await?;
        self.notify(vec![book.id.clone()]);
        Ok(book)
    }

    fn notify(&self, book_ids: Vec<String>) {
        // No receivers is fine
        self.changes.send(book_ids.clone()).ok();
        self.events
            .emit(CoreEvent::Library(LibraryEvent::BooksChanged { book_ids }))
            .ok();
    }

    fn now_ms(&self) -> i64 {
        self.clock.unix_timestamp_millis()
    }
}
