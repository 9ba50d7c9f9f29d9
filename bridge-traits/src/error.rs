use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    /// Connection could not be established or was dropped mid-flight
    /// (DNS, refused, reset, TLS handshake).
    #[error("Network unreachable: {0}")]
    Network(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Transport-level failures that say nothing about the validity of the
    /// request or the caller's credentials.
    pub fn is_transient(&self) -> bool {
        matches!(self, BridgeError::Network(_) | BridgeError::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_are_transient() {
        assert!(BridgeError::Network("connection refused".into()).is_transient());
        assert!(BridgeError::Timeout("GET /api/me".into()).is_transient());
        assert!(!BridgeError::OperationFailed("bad json".into()).is_transient());
        assert!(!BridgeError::NotAvailable("keychain".into()).is_transient());
    }
}
