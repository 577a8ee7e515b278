//! Signaling wire protocol for vidgate.
//!
//! Both hops of the signaling path (client <-> relay <-> worker) speak the
//! same two-field JSON object: a `key` naming the message kind and a string
//! `value` carrying the payload (a serialized session description for
//! `sdp`, a serialized ICE candidate for `candidate`). The `error` key is
//! an extension over the original protocol: servers use it to report a
//! recoverable per-session failure instead of silently closing the socket.

use serde::{Deserialize, Serialize};

/// Result type alias using the protocol Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while encoding or decoding signaling messages
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The payload was not a valid signaling message
    #[error("Invalid signaling message: {0}")]
    InvalidMessage(#[from] serde_json::Error),
}

/// Message kind discriminator.
///
/// Unknown keys fail deserialization; the relay treats such frames as
/// protocol violations rather than forwarding them blindly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKey {
    /// Session description exchange (offer from the client, answer back)
    Sdp,
    /// ICE candidate exchange
    Candidate,
    /// Recoverable error report, never relayed toward the worker
    Error,
}

impl std::fmt::Display for SignalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKey::Sdp => write!(f, "sdp"),
            SignalKey::Candidate => write!(f, "candidate"),
            SignalKey::Error => write!(f, "error"),
        }
    }
}

/// One signaling frame, exactly as it appears on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalMessage {
    /// Message kind
    pub key: SignalKey,

    /// String payload; its interpretation depends on `key`
    pub value: String,
}

impl SignalMessage {
    /// Build an `sdp` message carrying a serialized session description
    pub fn sdp(value: impl Into<String>) -> Self {
        Self {
            key: SignalKey::Sdp,
            value: value.into(),
        }
    }

    /// Build a `candidate` message carrying a serialized ICE candidate
    pub fn candidate(value: impl Into<String>) -> Self {
        Self {
            key: SignalKey::Candidate,
            value: value.into(),
        }
    }

    /// Build an `error` message carrying a human-readable description
    pub fn error(value: impl Into<String>) -> Self {
        Self {
            key: SignalKey::Error,
            value: value.into(),
        }
    }

    /// Parse a message from its wire form
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serialize the message to its wire form
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sdp_round_trip() {
        let msg = SignalMessage::sdp("v=0...");
        let json = msg.to_json().unwrap();
        assert_eq!(json, r#"{"key":"sdp","value":"v=0..."}"#);
        assert_eq!(SignalMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_candidate_round_trip() {
        let msg = SignalMessage::candidate("candidate:1 1 udp 2130706431 ...");
        let parsed = SignalMessage::from_json(&msg.to_json().unwrap()).unwrap();
        assert_eq!(parsed.key, SignalKey::Candidate);
        assert_eq!(parsed.value, msg.value);
    }

    #[test]
    fn test_error_variant_round_trips() {
        let msg = SignalMessage::error("no local candidate available");
        let json = msg.to_json().unwrap();
        assert!(json.contains(r#""key":"error""#));
        assert_eq!(SignalMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(SignalMessage::from_json(r#"{"key":"renegotiate","value":""}"#).is_err());
    }

    #[test]
    fn test_missing_value_rejected() {
        assert!(SignalMessage::from_json(r#"{"key":"sdp"}"#).is_err());
    }

    #[test]
    fn test_not_json_rejected() {
        assert!(SignalMessage::from_json("not json at all").is_err());
    }
}
