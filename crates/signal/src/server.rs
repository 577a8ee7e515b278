//! Relay accept loop

use crate::config::RelayConfig;
use crate::relay;
use crate::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Signal relay server
pub struct SignalServer {
    listener: TcpListener,
    config: Arc<RelayConfig>,
}

impl SignalServer {
    /// Bind the relay listener. Binding port 0 picks an ephemeral port,
    /// observable through [`local_addr`](Self::local_addr).
    pub async fn bind(config: RelayConfig) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(&config.listen_addr).await?;
        info!("signal relay listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            config: Arc::new(config),
        })
    }

    /// The bound listening address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept sessions until the shutdown channel fires.
    ///
    /// Each accepted connection becomes an independent session task; a
    /// failed session only logs, it never stops the accept loop.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            info!(%peer_addr, "accepted client signaling connection");
                            let config = Arc::clone(&self.config);
                            tokio::spawn(async move {
                                if let Err(e) = relay::handle_session(stream, config).await {
                                    error!(%peer_addr, error = %e, "relay session failed");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept signaling connection");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("signal relay received shutdown signal");
                    break;
                }
            }
        }
        Ok(())
    }
}
