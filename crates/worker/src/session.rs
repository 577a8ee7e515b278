//! Session orchestration
//!
//! One session per inbound signaling connection: drive the sdp/candidate
//! exchange over the socket, and once ICE connects, hand the connection
//! to the media role and let the pipeline outlive the socket. A session
//! that never connects is torn down when signaling ends.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;

use vidgate_proto::{SignalKey, SignalMessage};

use crate::config::WorkerConfig;
use crate::peer::{RtcPeer, SignalingPeer};
use crate::pipeline::MediaPipeline;
use crate::role::{FrameWorker, MediaRole};
use crate::{Error, Result};

/// Serve one signaling connection end to end.
pub async fn handle_session(stream: TcpStream, config: Arc<WorkerConfig>) -> Result<()> {
    let session_id = Uuid::new_v4();
    let mut ws = accept_async(stream).await?;
    info!(%session_id, "session accepted");

    let pipeline = Arc::new(MediaPipeline::new(
        session_recording_path(&config.recording_path, &session_id),
        config.decoder.clone(),
    ));
    let role = Arc::new(FrameWorker::new(&config, pipeline.clone()));
    let peer = Arc::new(RtcPeer::new(&config, role.clone()).await?);
    role.set_rtcp_sink(peer.clone()).await;

    let (established_tx, established_rx) = watch::channel(false);
    supervise(
        peer.clone(),
        role.clone(),
        pipeline.clone(),
        established_tx,
    );

    let outcome = tokio::time::timeout(
        config.session_timeout,
        signal_loop(
            &mut ws,
            peer.clone() as Arc<dyn SignalingPeer>,
            config.candidate_timeout,
            established_rx,
        ),
    )
    .await;

    let connected = match outcome {
        Ok(Ok(connected)) => connected,
        Ok(Err(e)) => {
            pipeline.close().await?;
            let _ = peer.close().await;
            return Err(e);
        }
        Err(_) => {
            warn!(%session_id, "signaling timed out");
            let reply = SignalMessage::error("session timeout");
            if let Ok(json) = reply.to_json() {
                let _ = ws.send(Message::Text(json)).await;
            }
            false
        }
    };
    let _ = ws.close(None).await;

    if connected {
        // The media session outlives the signaling socket; the
        // supervisor closes the pipeline when ICE goes down.
        debug!(%session_id, "signaling done, media running");
        let mut closed = pipeline.closed_watch();
        let _ = closed.wait_for(|c| *c).await;
    } else {
        debug!(%session_id, "never connected, tearing down");
        pipeline.close().await?;
        let _ = peer.close().await;
    }
    info!(%session_id, "session ended");
    Ok(())
}

/// Watch ICE state: start the role when the connection comes up, tear
/// everything down when it goes away.
fn supervise(
    peer: Arc<RtcPeer>,
    role: Arc<dyn MediaRole>,
    pipeline: Arc<MediaPipeline>,
    established_tx: watch::Sender<bool>,
) {
    let mut ice = peer.ice_state();
    tokio::spawn(async move {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut running = false;
        loop {
            let state = *ice.borrow_and_update();
            match state {
                RTCIceConnectionState::Connected => {
                    let _ = established_tx.send(true);
                    if !running {
                        running = true;
                        let role = role.clone();
                        let shutdown_rx = shutdown_rx.clone();
                        tokio::spawn(async move { role.run(shutdown_rx).await });
                    }
                }
                RTCIceConnectionState::Disconnected
                | RTCIceConnectionState::Failed
                | RTCIceConnectionState::Closed => {
                    let _ = shutdown_tx.send(true);
                    if let Err(e) = pipeline.close().await {
                        warn!(error = %e, "pipeline close failed");
                    }
                    let _ = peer.close().await;
                    break;
                }
                _ => {}
            }
            if ice.changed().await.is_err() {
                break;
            }
        }
    });
}

/// Drive the sdp/candidate exchange until ICE connects or the socket
/// closes. Returns whether the connection was established.
///
/// Malformed frames and negotiation failures are answered with `error`
/// frames and do not end the loop; only transport failures do.
pub async fn signal_loop<S>(
    ws: &mut WebSocketStream<S>,
    peer: Arc<dyn SignalingPeer>,
    candidate_timeout: Duration,
    mut established: watch::Receiver<bool>,
) -> Result<bool>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut established_open = true;
    loop {
        let frame = tokio::select! {
            up = established.wait_for(|c| *c), if established_open => {
                match up {
                    Ok(_) => return Ok(true),
                    Err(_) => {
                        // Supervisor gone; keep serving signaling frames.
                        established_open = false;
                        continue;
                    }
                }
            }
            frame = ws.next() => frame,
        };
        let text = match frame {
            None | Some(Ok(Message::Close(_))) => return Ok(false),
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        };

        let msg = match SignalMessage::from_json(&text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "unparseable signal frame");
                reply(ws, SignalMessage::error("malformed signal message")).await?;
                continue;
            }
        };

        match msg.key {
            SignalKey::Sdp => match peer.accept_offer(&msg.value).await {
                Ok(answer) => reply(ws, SignalMessage::sdp(answer)).await?,
                Err(e) => {
                    warn!(error = %e, "offer rejected");
                    reply(ws, SignalMessage::error(e.to_string())).await?;
                }
            },
            SignalKey::Candidate => {
                if let Err(e) = peer.add_remote_candidate(&msg.value).await {
                    warn!(error = %e, "remote candidate rejected");
                }
                match peer.next_local_candidate(candidate_timeout).await {
                    Some(candidate) => reply(ws, SignalMessage::candidate(candidate)).await?,
                    None => {
                        reply(ws, SignalMessage::error("no local candidate available")).await?
                    }
                }
            }
            SignalKey::Error => {
                debug!(value = %msg.value, "error frame from relay, ignored");
            }
        }
    }
}

async fn reply<S>(ws: &mut WebSocketStream<S>, msg: SignalMessage) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let json = msg
        .to_json()
        .map_err(|e| Error::Signaling(e.to_string()))?;
    ws.send(Message::Text(json)).await?;
    Ok(())
}

fn session_recording_path(base: &Path, session_id: &Uuid) -> PathBuf {
    let stem = base
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("session");
    let ext = base
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("webm");
    base.with_file_name(format!("{stem}-{session_id}.{ext}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_path_is_per_session() {
        let id = Uuid::new_v4();
        let path = session_recording_path(Path::new("/tmp/rec.webm"), &id);
        assert_eq!(
            path,
            PathBuf::from(format!("/tmp/rec-{id}.webm"))
        );
    }

    #[test]
    fn test_recording_path_without_extension() {
        let id = Uuid::new_v4();
        let path = session_recording_path(Path::new("/tmp/rec"), &id);
        assert_eq!(path, PathBuf::from(format!("/tmp/rec-{id}.webm")));
    }
}
