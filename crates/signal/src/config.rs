//! Configuration for the signal relay

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for the relay server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Address the relay listens on for client signaling connections
    pub listen_addr: String,

    /// Worker signaling address (host:port); one connection is dialed
    /// to `ws://<worker_addr>/signal` per client session
    pub worker_addr: String,

    /// Bound on the lifetime of a whole session; expiry tears down
    /// both legs (default: 30s)
    #[serde(with = "duration_secs")]
    pub session_timeout: Duration,

    /// Forwarding failure policy. `false` (default) logs write failures
    /// on the downstream leg and keeps the session alive, matching the
    /// relay's best-effort semantics; `true` makes them session-fatal.
    pub strict_forwarding: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9000".to_string(),
            worker_addr: "127.0.0.1:9001".to_string(),
            session_timeout: Duration::from_secs(30),
            strict_forwarding: false,
        }
    }
}

impl RelayConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.is_empty() {
            return Err(Error::InvalidConfig("listen_addr must not be empty".into()));
        }
        if self.worker_addr.is_empty() {
            return Err(Error::InvalidConfig("worker_addr must not be empty".into()));
        }
        if self.session_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "session_timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// The URL dialed for the worker leg of a session
    pub fn worker_url(&self) -> String {
        format!("ws://{}/signal", self.worker_addr)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
