//! Book-level position mapping.
//!
//! The server stores progress as seconds from the start of the book while the
//! engine only knows the current track and the offset inside it.

use std::time::Duration;

/// Seconds to `Duration`; negative and non-finite values become zero.
pub fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

/// Ordered track durations of one book, in seconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackTimeline {
    durations: Vec<f64>,
}

impl TrackTimeline {
    /// Negative or non-finite durations count as zero.
    pub fn new(durations: impl IntoIterator<Item = f64>) -> Self {
        Self {
            durations: durations
                .into_iter()
                .map(|d| if d.is_finite() && d > 0.0 { d } else { 0.0 })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.durations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.durations.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.durations.iter().sum()
    }

    /// Seconds before track `index`.
    pub fn start_of(&self, index: usize) -> f64 {
        self.durations.iter().take(index).sum()
    }

    pub fn global_position(&self, index: usize, offset: f64) -> f64 {
        let index = index.min(self.durations.len());
        self.start_of(index) + offset.max(0.0)
    }

    /// Track index and in-track offset for a book position.
    ///
    /// A position on a boundary belongs to the track that starts there. The
    /// end of the book maps to the end of the last track.
    pub fn locate(&self, global: f64) -> (usize, f64) {
        if self.durations.is_empty() {
            return (0, 0.0);
        }
        let target = if global.is_finite() {
            global.clamp(0.0, self.total())
        } else {
            0.0
        };

        let mut start = 0.0;
        for (index, duration) in self.durations.iter().enumerate() {
            if target < start + duration {
                return (index, target - start);
            }
            start += duration;
        }

        let last = self.durations.len() - 1;
        (last, self.durations[last])
    }

    pub fn locate_duration(&self, global: Duration) -> (usize, Duration) {
        let (index, offset) = self.locate(global.as_secs_f64());
        (index, secs(offset))
    }
}
