use bridge_traits::error::BridgeError;
use provider_audiobookshelf::RemoteError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DownloadError {
    /// Another book is downloading and the caller has not confirmed
    /// cancelling it.
    #[error("Another download is active: {}", active.join(", "))]
    AdmissionConflict { active: Vec<String> },

    #[error("Downloads are restricted to Wi-Fi")]
    WifiRequired,

    #[error("Book {book_id} has no downloadable files")]
    NoFiles { book_id: String },

    #[error("Download of {book_id} is still in progress")]
    StillActive { book_id: String },

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

impl DownloadError {
    pub fn is_admission_conflict(&self) -> bool {
        matches!(self, DownloadError::AdmissionConflict { .. })
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            DownloadError::AdmissionConflict { .. } => {
                "Another book is downloading. Cancel it to start this one."
            }
            DownloadError::WifiRequired => {
                "Downloads are limited to Wi-Fi. Connect to Wi-Fi or change the setting."
            }
            DownloadError::NoFiles { .. } => "This book has nothing to download.",
            DownloadError::StillActive { .. } => "Wait for the download to finish or cancel it.",
            DownloadError::Remote(e) => e.user_message(),
            DownloadError::Bridge(_) => "The download could not be started.",
        }
    }
}

pub type Result<T> = std::result::Result<T, DownloadError>;
