//! In-flight markers for duration/size resolution.
//!
//! Resolving a duration opens a remote session, so at most one resolution per
//! (book, metric) may run. Unrelated books never block each other.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{Metric, PlaybackError, Result};

type Key = (String, Metric);

#[derive(Default, Clone)]
pub(crate) struct InFlight {
    active: Arc<Mutex<HashSet<Key>>>,
}

impl InFlight {
    /// Mark `(book_id, metric)` as resolving until the guard is dropped.
    pub fn begin(&self, book_id: &str, metric: Metric) -> Result<InFlightGuard> {
        let key = (book_id.to_string(), metric);
        if !self.active.lock().insert(key.clone()) {
            return Err(PlaybackError::ResolutionInProgress {
                book_id: book_id.to_string(),
                metric,
            });
        }
        Ok(InFlightGuard {
            active: self.active.clone(),
            key,
        })
    }

    pub fn is_resolving(&self, book_id: &str, metric: Metric) -> bool {
        self.active.lock().contains(&(book_id.to_string(), metric))
    }
}

pub(crate) struct InFlightGuard {
    active: Arc<Mutex<HashSet<Key>>>,
    key: Key,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.active.lock().remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_is_rejected() {
        let in_flight = InFlight::default();
        let guard = in_flight.begin("li_1", Metric::Duration).unwrap();

        let err = in_flight.begin("li_1", Metric::Duration).err().unwrap();
        assert!(err.is_resolution_in_progress());

        // Other metrics and other books are independent
        let _size = in_flight.begin("li_1", Metric::Size).unwrap();
        let _other = in_flight.begin("li_2", Metric::Duration).unwrap();

        drop(guard);
        assert!(!in_flight.is_resolving("li_1", Metric::Duration));
        assert!(in_flight.begin("li_1", Metric::Duration).is_ok());
    }
}
