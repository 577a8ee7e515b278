//! Signal relay binary entry point
//!
//! # Usage
//!
//! ```bash
//! vidgate-signal --listen 0.0.0.0:9000 --worker-addr 127.0.0.1:9001
//! ```

use clap::Parser;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vidgate_signal::{RelayConfig, SignalServer};

/// vidgate signal relay
///
/// Bridges browser signaling connections to a media worker, enforcing the
/// sdp-then-candidates handshake order.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on for client signaling connections
    #[arg(long, default_value = "0.0.0.0:9000", env = "VIDGATE_SIGNAL_LISTEN")]
    listen: String,

    /// Worker signaling address (host:port)
    #[arg(long, default_value = "127.0.0.1:9001", env = "VIDGATE_WORKER_ADDR")]
    worker_addr: String,

    /// Session timeout in seconds
    #[arg(long, default_value_t = 30, env = "VIDGATE_SESSION_TIMEOUT")]
    session_timeout_secs: u64,

    /// Treat forwarding failures toward the worker as session-fatal
    #[arg(long, default_value_t = false, env = "VIDGATE_STRICT_FORWARDING")]
    strict_forwarding: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = RelayConfig {
        listen_addr: args.listen,
        worker_addr: args.worker_addr,
        session_timeout: Duration::from_secs(args.session_timeout_secs),
        strict_forwarding: args.strict_forwarding,
    };

    let server = SignalServer::bind(config).await?;
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
