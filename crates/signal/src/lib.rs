//! vidgate signal relay
//!
//! A two-hop WebSocket bridge between a browser client and a media worker.
//! The relay polices the session-setup handshake (sdp before candidates),
//! forwards accepted frames verbatim to the worker, and mirrors every
//! worker frame back to the client unchanged. Each session dials exactly
//! one worker connection and lives under a bounded timeout.

pub mod config;
pub mod error;
pub mod phase;
pub mod relay;
pub mod server;

pub use config::RelayConfig;
pub use error::{Error, Result};
pub use phase::HandshakePhase;
pub use server::SignalServer;
