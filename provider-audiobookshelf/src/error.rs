//! Error types for the remote progress client

use bridge_traits::error::BridgeError;
use thiserror::Error;

/// Failure of a call to the audiobook server.
///
/// Callers branch on the kind: transient failures preserve local state,
/// [`RemoteError::Unauthorized`] is the only authoritative rejection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Socket, DNS or TLS failure
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Server rejected the credentials (401/403)
    #[error("Unauthorized (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("Not found: {path}")]
    NotFound { path: String },

    #[error("Server error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// No access token available locally
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Local client failure unrelated to the server
    #[error("Client error: {0}")]
    Client(String),
}

impl RemoteError {
    /// Transport-class failure; says nothing about the request or session.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Network(_) | RemoteError::Timeout(_))
    }

    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, RemoteError::Unauthorized { .. })
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            RemoteError::Network(_) | RemoteError::Timeout(_) => {
                "Server unavailable. Check your connection and try again."
            }
            RemoteError::Unauthorized { .. } | RemoteError::NotAuthenticated => {
                "Your session has expired. Please sign in again."
            }
            RemoteError::NotFound { .. } => "This item is no longer available on the server.",
            RemoteError::Api { .. } | RemoteError::Parse(_) => {
                "The server could not complete the request."
            }
            RemoteError::Client(_) => "Something went wrong. Please try again.",
        }
    }
}

impl From<BridgeError> for RemoteError {
    fn from(error: BridgeError) -> Self {
        match error {
            BridgeError::Network(msg) => RemoteError::Network(msg),
            BridgeError::Timeout(msg) => RemoteError::Timeout(msg),
            BridgeError::Io(e) => RemoteError::Network(e.to_string()),
            other => RemoteError::Client(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, RemoteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_transport_errors_stay_transient() {
        let network: RemoteError = BridgeError::Network("reset".into()).into();
        let timeout: RemoteError = BridgeError::Timeout("15s".into()).into();
        let other: RemoteError = BridgeError::OperationFailed("bad header".into()).into();

        assert!(network.is_transient());
        assert!(timeout.is_transient());
        assert!(!other.is_transient());
        assert!(!network.is_auth_rejection());
    }

    #[test]
    fn test_user_message_hides_diagnostics() {
        let error = RemoteError::Api {
            status: 500,
            message: "SQLITE_BUSY at line 42".into(),
        };
        assert!(!error.user_message().contains("SQLITE"));
        assert_eq!(
            error.to_string(),
            "Server error (HTTP 500): SQLITE_BUSY at line 42"
        );
    }
}
