//! Per-session relay bridge
//!
//! One relayed session owns two WebSocket legs: the accepted client
//! connection (upstream) and a freshly dialed worker connection
//! (downstream). Client frames are validated against the handshake phase
//! machine and forwarded verbatim on acceptance; worker frames are mirrored
//! back to the client with no validation. The whole session, dial
//! included, runs under the configured session timeout, and dropping out of
//! the session future tears both legs down.

use crate::config::RelayConfig;
use crate::phase::HandshakePhase;
use crate::{Error, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;
use vidgate_proto::{SignalKey, SignalMessage};

type ClientStream = WebSocketStream<TcpStream>;
type WorkerStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Drive one relayed session to completion.
///
/// Returns `Ok(())` on orderly close from either side, or the first
/// session-fatal error. Timeout expiry is reported as `SessionTimeout`.
pub async fn handle_session(stream: TcpStream, config: Arc<RelayConfig>) -> Result<()> {
    let session_id = Uuid::new_v4();
    let ws = accept_async(stream).await?;
    info!(%session_id, "client signaling connection accepted");

    let (mut client_sink, client_read) = ws.split();

    let outcome = tokio::time::timeout(
        config.session_timeout,
        drive_session(session_id, &mut client_sink, client_read, &config),
    )
    .await;

    match outcome {
        Ok(result) => {
            info!(%session_id, "session ended");
            result
        }
        Err(_) => {
            info!(%session_id, "session timeout elapsed, tearing down both legs");
            send_error(&mut client_sink, "session timeout").await;
            Err(Error::SessionTimeout(session_id.to_string()))
        }
    }
}

async fn drive_session(
    session_id: Uuid,
    client_sink: &mut SplitSink<ClientStream, Message>,
    client_read: SplitStream<ClientStream>,
    config: &RelayConfig,
) -> Result<()> {
    // Exactly one downstream connection per session.
    let url = config.worker_url();
    debug!(%session_id, %url, "dialing worker");
    let (worker_ws, _) = match connect_async(&url).await {
        Ok(conn) => conn,
        Err(e) => {
            warn!(%session_id, %url, error = %e, "worker dial failed");
            send_error(client_sink, "worker unavailable").await;
            return Err(Error::WorkerDial(e.to_string()));
        }
    };
    let (worker_sink, worker_read) = worker_ws.split();

    // Frames destined for the client funnel through one queue so the
    // upstream loop (error replies) and the downstream loop (worker
    // traffic) never contend on the sink.
    let (client_tx, client_rx) = mpsc::channel::<Message>(32);

    tokio::select! {
        r = upstream_loop(session_id, client_read, worker_sink, client_tx.clone(), config) => r,
        r = downstream_loop(session_id, worker_read, client_tx) => r,
        _ = client_writer(session_id, client_sink, client_rx) => Ok(()),
    }
}

/// Client -> worker direction, with handshake phase policing.
async fn upstream_loop(
    session_id: Uuid,
    mut client_read: SplitStream<ClientStream>,
    mut worker_sink: SplitSink<WorkerStream, Message>,
    client_tx: mpsc::Sender<Message>,
    config: &RelayConfig,
) -> Result<()> {
    let mut phase = HandshakePhase::Start;

    while let Some(frame) = client_read.next().await {
        let frame = frame.map_err(Error::from)?;
        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => {
                debug!(%session_id, "client closed the session");
                break;
            }
            _ => continue,
        };

        let msg = match SignalMessage::from_json(&text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(%session_id, error = %e, "invalid signaling frame from client");
                reply_error(&client_tx, "invalid signaling message").await;
                continue;
            }
        };

        if msg.key == SignalKey::Error {
            warn!(%session_id, "client error frame is not relayed");
            continue;
        }

        match phase.admit(msg.key) {
            Some(next) => {
                debug!(%session_id, key = %msg.key, ?phase, ?next, "forwarding to worker");
                phase = next;
                if let Err(e) = worker_sink.send(Message::Text(text)).await {
                    if config.strict_forwarding {
                        return Err(Error::WebSocket(e.to_string()));
                    }
                    warn!(%session_id, error = %e, "forward to worker failed, continuing");
                }
            }
            None => {
                warn!(
                    %session_id,
                    key = %msg.key,
                    ?phase,
                    "out-of-order signaling message dropped"
                );
                reply_error(&client_tx, &format!("out-of-order {} message", msg.key)).await;
            }
        }
    }

    Ok(())
}

/// Worker -> client direction; frames pass through verbatim.
async fn downstream_loop(
    session_id: Uuid,
    mut worker_read: SplitStream<WorkerStream>,
    client_tx: mpsc::Sender<Message>,
) -> Result<()> {
    while let Some(frame) = worker_read.next().await {
        match frame.map_err(Error::from)? {
            Message::Text(text) => {
                debug!(%session_id, len = text.len(), "mirroring worker frame to client");
                if client_tx.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => {
                debug!(%session_id, "worker closed the session");
                break;
            }
            _ => {}
        }
    }
    Ok(())
}

/// Single owner of the client-facing sink.
async fn client_writer(
    session_id: Uuid,
    client_sink: &mut SplitSink<ClientStream, Message>,
    mut client_rx: mpsc::Receiver<Message>,
) {
    while let Some(frame) = client_rx.recv().await {
        if let Err(e) = client_sink.send(frame).await {
            warn!(%session_id, error = %e, "write to client failed");
            break;
        }
    }
}

async fn reply_error(client_tx: &mpsc::Sender<Message>, reason: &str) {
    if let Ok(json) = SignalMessage::error(reason).to_json() {
        let _ = client_tx.send(Message::Text(json)).await;
    }
}

async fn send_error(client_sink: &mut SplitSink<ClientStream, Message>, reason: &str) {
    if let Ok(json) = SignalMessage::error(reason).to_json() {
        let _ = client_sink.send(Message::Text(json)).await;
    }
}
