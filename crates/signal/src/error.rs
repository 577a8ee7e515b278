//! Error types for the signal relay

/// Result type alias using the relay Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in relay operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// WebSocket transport failure on either leg
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Could not reach the worker's signaling endpoint
    #[error("Worker dial failed: {0}")]
    WorkerDial(String),

    /// Session exceeded its bounded lifetime
    #[error("Session timeout: {0}")]
    SessionTimeout(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(e.to_string())
    }
}

impl Error {
    /// Transport failures tear down both legs of the session
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Error::WebSocket(_) | Error::WorkerDial(_) | Error::SessionTimeout(_) | Error::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::WorkerDial("connection refused".to_string());
        assert_eq!(err.to_string(), "Worker dial failed: connection refused");
    }

    #[test]
    fn test_session_fatal_classification() {
        assert!(Error::WorkerDial("x".to_string()).is_session_fatal());
        assert!(Error::SessionTimeout("x".to_string()).is_session_fatal());
        assert!(!Error::InvalidConfig("x".to_string()).is_session_fatal());
    }
}
