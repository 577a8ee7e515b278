//! Worker accept loop

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::config::WorkerConfig;
use crate::session;
use crate::Result;

/// Listens for signaling connections and runs one session per socket.
pub struct WorkerServer {
    listener: TcpListener,
    config: Arc<WorkerConfig>,
}

impl WorkerServer {
    /// Validate the configuration and bind the listener. Port 0 binds an
    /// ephemeral port, see [`WorkerServer::local_addr`].
    pub async fn bind(config: WorkerConfig) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(&config.listen_addr).await?;
        info!(addr = %config.listen_addr, "worker listening");
        Ok(Self {
            listener,
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept sessions until `shutdown` fires. Sessions in flight are
    /// not awaited; their pipelines close with the process.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, remote) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            error!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    info!(%remote, "signaling connection");
                    let config = self.config.clone();
                    tokio::spawn(async move {
                        if let Err(e) = session::handle_session(stream, config).await {
                            warn!(%remote, error = %e, "session failed");
                        }
                    });
                }
                _ = shutdown.recv() => {
                    info!("worker shutting down");
                    return Ok(());
                }
            }
        }
    }
}
