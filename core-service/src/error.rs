use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Authentication error: {0}")]
    Auth(#[from] core_auth::AuthError),

    #[error("Library error: {0}")]
    Library(#[from] core_library::LibraryError),

    #[error("Download error: {0}")]
    Download(#[from] core_download::DownloadError),

    #[error("Playback error: {0}")]
    Playback(#[from] core_playback::PlaybackError),
}

impl CoreError {
    /// Short message suitable for display.
    pub fn user_message(&self) -> &'static str {
        match self {
            CoreError::InitializationFailed(_) | CoreError::Runtime(_) => {
                "The app could not start. Please reinstall or contact support."
            }
            CoreError::Auth(e) => e.user_message(),
            CoreError::Library(e) => e.user_message(),
            CoreError::Download(e) => e.user_message(),
            CoreError::Playback(e) => e.user_message(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
