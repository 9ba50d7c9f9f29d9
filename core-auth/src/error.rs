use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Sign-in rejected by server (HTTP {status})")]
    SignInRejected { status: u16 },

    #[error("Server unreachable: {0}")]
    Network(String),

    #[error("Unexpected server response: {0}")]
    InvalidResponse(String),

    #[error("Secure storage unavailable: {0}")]
    SecureStorageUnavailable(String),

    #[error("Stored credentials are corrupted: {0}")]
    TokenCorrupted(String),

    #[error("Not authenticated")]
    NotAuthenticated,
}

impl AuthError {
    /// Short message suitable for display.
    pub fn user_message(&self) -> &'static str {
        match self {
            AuthError::SignInRejected { .. } => "Username or password is incorrect.",
            AuthError::Network(_) => "Server unavailable. Check your connection and try again.",
            AuthError::InvalidResponse(_) => "The server sent an unexpected response.",
            AuthError::SecureStorageUnavailable(_) | AuthError::TokenCorrupted(_) => {
                "Saved credentials could not be read. Please sign in again."
            }
            AuthError::NotAuthenticated => "Please sign in.",
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
