//! Error types for the media worker
//!
//! Every failure that the original system handled by crashing (malformed
//! remote descriptions, decoder anomalies) maps to a variant here and
//! aborts at most the one session it belongs to.

/// Result type alias using the worker Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in worker operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Signaling connection error
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    Sdp(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidate(String),

    /// Data channel error
    #[error("Data channel error: {0}")]
    DataChannel(String),

    /// Media pipeline error
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// External decoder process error
    #[error("Decoder error: {0}")]
    Decoder(String),

    /// Operation timeout
    #[error("Operation timeout: {0}")]
    Timeout(String),

    /// The pipeline or session has been closed
    #[error("Closed")]
    Closed,

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtc(String),

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

impl From<webrtc::Error> for Error {
    fn from(e: webrtc::Error) -> Self {
        Error::WebRtc(e.to_string())
    }
}

impl Error {
    /// Errors that end the signaling transport, as opposed to per-message
    /// failures answered with an `error` frame
    pub fn is_transport_fatal(&self) -> bool {
        matches!(self, Error::WebSocket(_) | Error::Io(_) | Error::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Sdp("bad offer".to_string());
        assert_eq!(err.to_string(), "SDP negotiation error: bad offer");
    }

    #[test]
    fn test_transport_fatal_classification() {
        assert!(Error::WebSocket("gone".to_string()).is_transport_fatal());
        assert!(Error::Closed.is_transport_fatal());
        assert!(!Error::Sdp("bad".to_string()).is_transport_fatal());
        assert!(!Error::Timeout("candidate".to_string()).is_transport_fatal());
    }
}
