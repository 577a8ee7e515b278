//! Configuration types for the media worker
//!
//! One explicit struct per concern, passed to each session constructor.
//! There is no global mutable configuration state.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the worker server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Address the worker listens on for signaling connections
    pub listen_addr: String,

    /// Bound on the signaling phase of a session (default: 30s)
    #[serde(with = "duration_secs")]
    pub session_timeout: Duration,

    /// How long a `candidate` request waits for one locally gathered
    /// candidate before answering with an error (default: 3s)
    #[serde(with = "duration_secs")]
    pub candidate_timeout: Duration,

    /// Capacity of the local ICE candidate queue. Overflow drops the
    /// oldest queued candidate (default: 16).
    pub candidate_queue: usize,

    /// Cadence of upstream RTCP feedback (PLI + REMB) per track
    /// (default: 1s)
    #[serde(with = "duration_millis")]
    pub rtcp_interval: Duration,

    /// Bitrate advertised via REMB, in bits per second (default: 2 Mib/s)
    pub target_bitrate: u32,

    /// Cadence of the data-channel result drain (default: 200ms)
    #[serde(with = "duration_millis")]
    pub result_poll_interval: Duration,

    /// Capacity of the per-session result queue (default: 16)
    pub result_queue: usize,

    /// STUN servers handed to the peer connection
    pub stun_servers: Vec<String>,

    /// Path of the per-session recording container file
    pub recording_path: PathBuf,

    /// External decoder process settings
    pub decoder: DecoderConfig,
}

/// Settings for the external raw-frame decoder process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Decoder executable (default: "ffmpeg")
    pub program: String,

    /// Output frame rate the decoder is pinned to (default: 10)
    pub frame_rate: u32,

    /// Packed output pixel format, 3 bytes per pixel (default: "bgr24")
    pub pixel_format: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9001".to_string(),
            session_timeout: Duration::from_secs(30),
            candidate_timeout: Duration::from_secs(3),
            candidate_queue: 16,
            rtcp_interval: Duration::from_secs(1),
            target_bitrate: 2 * 1024 * 1024,
            result_poll_interval: Duration::from_millis(200),
            result_queue: 16,
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            recording_path: PathBuf::from("/tmp/vidgate-session.webm"),
            decoder: DecoderConfig::default(),
        }
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            frame_rate: 10,
            pixel_format: "bgr24".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.is_empty() {
            return Err(Error::InvalidConfig("listen_addr must not be empty".into()));
        }
        if self.session_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "session_timeout must be non-zero".into(),
            ));
        }
        if self.candidate_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "candidate_timeout must be non-zero".into(),
            ));
        }
        if self.candidate_queue == 0 || self.result_queue == 0 {
            return Err(Error::InvalidConfig(
                "queue capacities must be non-zero".into(),
            ));
        }
        if self.decoder.frame_rate == 0 {
            return Err(Error::InvalidConfig(
                "decoder frame_rate must be non-zero".into(),
            ));
        }
        if self.decoder.program.is_empty() {
            return Err(Error::InvalidConfig(
                "decoder program must not be empty".into(),
            ));
        }
        Ok(())
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

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        assert!(WorkerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_queue_rejected() {
        let config = WorkerConfig {
            candidate_queue: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_frame_rate_rejected() {
        let mut config = WorkerConfig::default();
        config.decoder.frame_rate = 0;
        assert!(config.validate().is_err());
    }
}
