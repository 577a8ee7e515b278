//! WebRTC peer connection wrapper
//!
//! [`RtcPeer`] is the answering side of the handshake: it accepts the
//! browser's offer, trickles candidates both ways and hands inbound
//! tracks and data channels to a [`MediaRole`]. Signaling and RTCP
//! feedback are exposed as traits so the session loop can be driven
//! against a fake peer in tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, warn};

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtcp::payload_feedbacks::receiver_estimated_maximum_bitrate::ReceiverEstimatedMaximumBitrate;

use crate::config::WorkerConfig;
use crate::role::MediaRole;
use crate::{Error, Result};

/// The answering half of SDP/ICE signaling.
#[async_trait]
pub trait SignalingPeer: Send + Sync {
    /// Apply a remote offer and produce the local answer, as the JSON
    /// encoding of a session description.
    async fn accept_offer(&self, offer: &str) -> Result<String>;

    /// Apply one trickled remote candidate.
    async fn add_remote_candidate(&self, candidate: &str) -> Result<()>;

    /// Next locally gathered candidate, or `None` if none shows up
    /// within `wait`.
    async fn next_local_candidate(&self, wait: Duration) -> Option<String>;

    async fn close(&self) -> Result<()>;
}

/// Upstream RTCP feedback toward the media sender.
#[async_trait]
pub trait RtcpSink: Send + Sync {
    /// Ask the sender for a fresh keyframe (PLI).
    async fn request_keyframe(&self, media_ssrc: u32) -> Result<()>;

    /// Advertise the receive bitrate we want (REMB).
    async fn advise_bitrate(&self, media_ssrc: u32, bitrate: u32) -> Result<()>;
}

pub struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
    candidates: Arc<Mutex<mpsc::Receiver<String>>>,
    ice_state: watch::Receiver<RTCIceConnectionState>,
}

impl RtcPeer {
    /// Build a peer connection with default codecs and interceptors and
    /// wire its track and data-channel callbacks into `role`.
    pub async fn new(config: &WorkerConfig, role: Arc<dyn MediaRole>) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| Error::WebRtc(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: config.stun_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let pc = Arc::new(api.new_peer_connection(rtc_config).await?);

        let (candidate_tx, candidate_rx) = mpsc::channel(config.candidate_queue);
        let candidates = Arc::new(Mutex::new(candidate_rx));
        {
            let queue = candidates.clone();
            pc.on_ice_candidate(Box::new(move |candidate| {
                let candidate_tx = candidate_tx.clone();
                let queue = queue.clone();
                Box::pin(async move {
                    let Some(candidate) = candidate else {
                        return;
                    };
                    match candidate.to_json() {
                        Ok(init) => {
                            enqueue_drop_oldest(&candidate_tx, &queue, init.candidate).await;
                        }
                        Err(e) => warn!(error = %e, "local candidate not serializable"),
                    }
                })
            }));
        }

        let (state_tx, ice_state) = watch::channel(RTCIceConnectionState::New);
        pc.on_ice_connection_state_change(Box::new(move |state| {
            debug!(%state, "ice connection state");
            let _ = state_tx.send(state);
            Box::pin(async {})
        }));

        {
            let role = role.clone();
            pc.on_track(Box::new(move |track, receiver, _transceiver| {
                let role = role.clone();
                Box::pin(async move {
                    role.on_track(track, receiver).await;
                })
            }));
        }
        pc.on_data_channel(Box::new(move |channel| {
            let role = role.clone();
            Box::pin(async move {
                role.on_data_channel(channel).await;
            })
        }));

        Ok(Self {
            pc,
            candidates,
            ice_state,
        })
    }

    /// ICE connection state observer, for session supervision.
    pub fn ice_state(&self) -> watch::Receiver<RTCIceConnectionState> {
        self.ice_state.clone()
    }
}

/// Queue a candidate, evicting the oldest one if the browser is not
/// draining fast enough. Recent candidates are the usable ones.
async fn enqueue_drop_oldest(
    tx: &mpsc::Sender<String>,
    rx: &Mutex<mpsc::Receiver<String>>,
    value: String,
) {
    if let Err(mpsc::error::TrySendError::Full(value)) = tx.try_send(value) {
        let _ = rx.lock().await.try_recv();
        if tx.try_send(value).is_err() {
            warn!("local candidate dropped");
        }
    }
}

#[async_trait]
impl SignalingPeer for RtcPeer {
    async fn accept_offer(&self, offer: &str) -> Result<String> {
        let offer: RTCSessionDescription =
            serde_json::from_str(offer).map_err(|e| Error::Sdp(format!("bad offer: {e}")))?;
        self.pc.set_remote_description(offer).await?;

        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer).await?;
        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| Error::Sdp("no local description after answer".to_string()))?;
        serde_json::to_string(&local).map_err(|e| Error::Sdp(e.to_string()))
    }

    async fn add_remote_candidate(&self, candidate: &str) -> Result<()> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.to_string(),
                ..Default::default()
            })
            .await
            .map_err(|e| Error::IceCandidate(e.to_string()))
    }

    async fn next_local_candidate(&self, wait: Duration) -> Option<String> {
        let mut rx = self.candidates.lock().await;
        tokio::time::timeout(wait, rx.recv()).await.ok().flatten()
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        Ok(())
    }
}

#[async_trait]
impl RtcpSink for RtcPeer {
    async fn request_keyframe(&self, media_ssrc: u32) -> Result<()> {
        self.pc
            .write_rtcp(&[Box::new(PictureLossIndication {
                sender_ssrc: 0,
                media_ssrc,
            })])
            .await?;
        Ok(())
    }

    async fn advise_bitrate(&self, media_ssrc: u32, bitrate: u32) -> Result<()> {
        self.pc
            .write_rtcp(&[Box::new(ReceiverEstimatedMaximumBitrate {
                sender_ssrc: 0,
                bitrate: bitrate as f32,
                ssrcs: vec![media_ssrc],
            })])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drop_oldest_keeps_newest() {
        let (tx, rx) = mpsc::channel(2);
        let rx = Mutex::new(rx);

        for candidate in ["a", "b", "c"] {
            enqueue_drop_oldest(&tx, &rx, candidate.to_string()).await;
        }

        let mut rx = rx.into_inner();
        assert_eq!(rx.try_recv().unwrap(), "b");
        assert_eq!(rx.try_recv().unwrap(), "c");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_candidate_wait_times_out_empty() {
        let (_tx, rx) = mpsc::channel::<String>(1);
        let rx = Mutex::new(rx);
        let mut guard = rx.lock().await;
        let got = tokio::time::timeout(Duration::from_millis(20), guard.recv()).await;
        assert!(got.is_err());
    }
}
