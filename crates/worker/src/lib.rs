//! vidgate media worker
//!
//! The media end of the vidgate pair. Accepts signaling handed through
//! the relay, answers WebRTC offers, and runs a per-session media
//! pipeline: VP8/Opus reassembly, dual WebM muxing (live decoder pipe
//! plus recording file) and raw frame extraction through an external
//! decoder, with frame reports flowing back over the data channel.

pub mod config;
pub mod error;
pub mod peer;
pub mod pipeline;
pub mod role;
pub mod server;
pub mod session;

pub use config::{DecoderConfig, WorkerConfig};
pub use error::{Error, Result};
pub use peer::{RtcPeer, RtcpSink, SignalingPeer};
pub use pipeline::MediaPipeline;
pub use role::{FrameWorker, MediaRole};
pub use server::WorkerServer;
