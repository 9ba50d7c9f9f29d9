//! # Playback Configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Playback coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Interval between periodic progress reports while playing.
    ///
    /// Default: 15 seconds.
    #[serde(default = "default_report_interval")]
    pub report_interval: Duration,

    /// Resolve missing duration/size right after a book is loaded.
    ///
    /// Default: off, unless built with the `eager-resolution` feature.
    #[serde(default = "default_eager_resolution")]
    pub eager_resolution: bool,

    /// Where downloaded books live (`<dir>/<book id>/<file>`). Tracks found
    /// there are played from disk instead of streamed.
    #[serde(default)]
    pub download_dir: Option<PathBuf>,

    /// A server position further than this from the local one wins on
    /// resume.
    ///
    /// Default: 2 seconds.
    #[serde(default = "default_resync_tolerance")]
    pub resync_tolerance: Duration,
}

impl PlaybackConfig {
    pub fn report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval.max(Duration::from_millis(100));
        self
    }

    pub fn eager_resolution(mut self, enable: bool) -> Self {
        self.eager_resolution = enable;
        self
    }

    pub fn download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = Some(dir.into());
        self
    }

    pub fn resync_tolerance(mut self, tolerance: Duration) -> Self {
        self.resync_tolerance = tolerance;
        self
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            report_interval: default_report_interval(),
            eager_resolution: default_eager_resolution(),
            download_dir: None,
            resync_tolerance: default_resync_tolerance(),
        }
    }
}

fn default_report_interval() -> Duration {
    Duration::from_secs(15)
}

fn default_eager_resolution() -> bool {
    cfg!(feature = "eager-resolution")
}

fn default_resync_tolerance() -> Duration {
    Duration::from_secs(2)
}
