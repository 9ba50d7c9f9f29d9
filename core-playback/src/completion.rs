//! Per-book "finished" flags shared by every view.

use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy)]
struct Entry {
    finished: bool,
    version: u64,
}

/// Point in a book's write history, taken before a slow read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    epoch: u64,
    write: u64,
}

#[derive(Debug, Clone)]
enum Change {
    Set(String, bool),
    Cleared,
}

#[derive(Default)]
struct State {
    /// Bumped by `clear()`; versions from an older epoch never match
    epoch: u64,
    entries: HashMap<String, Entry>,
}

impl State {
    fn version(&self, book_id: &str) -> Version {
        Version {
            epoch: self.epoch,
            write: self.entries.get(book_id).map_or(0, |e| e.version),
        }
    }
}

/// Cached completion flags with a change broadcast.
///
/// Every write bumps a version so a read that started before a local toggle
/// or a clear can detect that its answer is stale.
pub struct CompletionCache {
    state: RwLock<State>,
    changes: broadcast::Sender<Change>,
}

impl Default for CompletionCache {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(State::default()),
            changes,
        }
    }
}

impl CompletionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, book_id: &str) -> Option<bool> {
        self.state.read().entries.get(book_id).map(|e| e.finished)
    }

    pub fn version(&self, book_id: &str) -> Version {
        self.state.read().version(book_id)
    }

    /// Store and broadcast.
    pub fn set(&self, book_id: &str, finished: bool) {
        {
            let mut state = self.state.write();
            let version = state.version(book_id).write + 1;
            state
                .entries
                .insert(book_id.to_string(), Entry { finished, version });
        }
        self.changes
            .send(Change::Set(book_id.to_string(), finished))
            .ok();
    }

    /// Store only if nothing was written or cleared since `version` was
    /// read. Returns whether the value was applied.
    pub fn set_if_unchanged(&self, book_id: &str, finished: bool, version: Version) -> bool {
        let changed = {
            let mut state = self.state.write();
            if state.version(book_id) != version {
                return false;
            }
            let previous = state.entries.insert(
                book_id.to_string(),
                Entry {
                    finished,
                    version: version.write + 1,
                },
            );
            previous.map(|e| e.finished) != Some(finished)
        };
        if changed {
            self.changes
                .send(Change::Set(book_id.to_string(), finished))
                .ok();
        }
        true
    }

    /// Forget every flag. Open streams see `false`.
    pub fn clear(&self) {
        {
            let mut state = self.state.write();
            state.epoch += 1;
            state.entries.clear();
        }
        self.changes.send(Change::Cleared).ok();
    }

    /// Flag changes for one book, starting with the cached value if any.
    ///
    /// Consecutive duplicates are dropped.
    pub fn stream(&self, book_id: &str) -> BoxStream<'static, bool> {
        let receiver = self.changes.subscribe();
        let current = self.get(book_id);
        let book_id = book_id.to_string();

        let updates = stream::unfold(receiver, move |mut receiver| {
            let book_id = book_id.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(Change::Set(id, finished)) if id == book_id => {
                            return Some((finished, receiver))
                        }
                        Ok(Change::Cleared) => return Some((false, receiver)),
                        Ok(Change::Set(..)) | Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
        });

        stream::iter(current)
            .chain(updates)
            .scan(None, |last, finished| {
                let emit = *last != Some(finished);
                *last = Some(finished);
                futures::future::ready(Some(emit.then_some(finished)))
            })
            .filter_map(futures::future::ready)
            .boxed()
    }
}
