//! Worker binary entry point
//!
//! # Usage
//!
//! ```bash
//! vidgate-worker --listen 0.0.0.0:9001 --recording-dir /var/lib/vidgate
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vidgate_worker::{WorkerConfig, WorkerServer};

/// vidgate media worker
///
/// Answers WebRTC offers relayed by vidgate-signal and runs the media
/// pipeline for each session.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on for relayed signaling connections
    #[arg(long, default_value = "0.0.0.0:9001", env = "VIDGATE_WORKER_LISTEN")]
    listen: String,

    /// Session signaling timeout in seconds
    #[arg(long, default_value_t = 30, env = "VIDGATE_SESSION_TIMEOUT")]
    session_timeout_secs: u64,

    /// Per-candidate wait in seconds
    #[arg(long, default_value_t = 3, env = "VIDGATE_CANDIDATE_TIMEOUT")]
    candidate_timeout_secs: u64,

    /// Base path for per-session recordings
    #[arg(
        long,
        default_value = "/tmp/vidgate-session.webm",
        env = "VIDGATE_RECORDING_PATH"
    )]
    recording_path: PathBuf,

    /// Decoder executable
    #[arg(long, default_value = "ffmpeg", env = "VIDGATE_DECODER")]
    decoder: String,

    /// Extracted frame rate
    #[arg(long, default_value_t = 10, env = "VIDGATE_FRAME_RATE")]
    frame_rate: u32,

    /// Receive bitrate advertised to the sender, bits per second
    #[arg(long, default_value_t = 2 * 1024 * 1024, env = "VIDGATE_TARGET_BITRATE")]
    target_bitrate: u32,

    /// STUN server, repeatable
    #[arg(long = "stun", env = "VIDGATE_STUN")]
    stun_servers: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = WorkerConfig {
        listen_addr: args.listen,
        session_timeout: Duration::from_secs(args.session_timeout_secs),
        candidate_timeout: Duration::from_secs(args.candidate_timeout_secs),
        target_bitrate: args.target_bitrate,
        recording_path: args.recording_path,
        ..Default::default()
    };
    config.decoder.program = args.decoder;
    config.decoder.frame_rate = args.frame_rate;
    if !args.stun_servers.is_empty() {
        config.stun_servers = args.stun_servers;
    }

    let server = WorkerServer::bind(config).await?;
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            let _ = shutdown_tx.send(());
        }
    });

    server.run(shutdown_rx).await?;
    Ok(())
}
