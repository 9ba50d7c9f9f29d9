use provider_audiobookshelf::RemoteError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The network read failed and the book was never cached locally.
    #[error("Book {id} is not available offline ({cause})")]
    NotCached { id: String, cause: RemoteError },

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    #[error("Migration failed: {0}")]
    Migration(String),
}

impl LibraryError {
    pub fn is_not_cached(&self) -> bool {
        matches!(self, LibraryError::NotCached { .. })
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            LibraryError::NotCached { .. } => {
                "This book isn't available offline. Connect to the server to load it."
            }
            LibraryError::Remote(e) => e.user_message(),
            LibraryError::Database(_) | LibraryError::Migration(_) => {
                "The local library could not be read."
            }
            LibraryError::InvalidInput { .. } => "The book data is incomplete.",
        }
    }
}

pub type Result<T> = std::result::Result<T, LibraryError>;
