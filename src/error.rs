//! Primary Selector Error Types

use thiserror::Error;

/// Result type alias for primary selector operations
pub type Result<T> = std::result::Result<T, Error>;

/// Primary selector error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid bind address: {0}")]
    InvalidAddress(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Election errors
    #[error("Failed to register {identity} for election: {reason}")]
    Registration { identity: String, reason: String },

    #[error("Election participation already started")]
    AlreadyStarted,

    #[error("Election participation has not been started")]
    NotStarted,

    #[error("Already closed or has not been started")]
    AlreadyClosed,

    #[error("Interrupted while waiting for role change")]
    Interrupted,

    // Coordination service errors
    #[error("Node does not exist: {0}")]
    NoNode(String),

    #[error("Node already exists: {0}")]
    NodeExists(String),

    #[error("Node has children: {0}")]
    NotEmpty(String),

    #[error("Invalid node path: {0}")]
    InvalidPath(String),

    #[error("Connection to coordination service lost: {0}")]
    ConnectionLoss(String),

    #[error("Session is closed")]
    SessionClosed,

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ConnectionLoss(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(Error::ConnectionLoss("zk1:2181".into()).is_retryable());
        assert!(!Error::NoNode("/leader/h1:1000".into()).is_retryable());
        assert!(!Error::AlreadyClosed.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = Error::Registration {
            identity: "h1:1000".into(),
            reason: "session closed".into(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to register h1:1000 for election: session closed"
        );
        assert_eq!(
            Error::AlreadyClosed.to_string(),
            "Already closed or has not been started"
        );
    }
}
