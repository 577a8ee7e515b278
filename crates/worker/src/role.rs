//! Media roles
//!
//! A [`MediaRole`] is what a session does with its peer connection once
//! tracks start flowing. [`FrameWorker`] is the one shipped role: it
//! pumps RTP into the pipeline, keeps the sender honest with periodic
//! RTCP feedback, and reports on extracted frames over the data channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use webrtc::data_channel::RTCDataChannel;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::track::track_remote::TrackRemote;

use crate::config::WorkerConfig;
use crate::peer::RtcpSink;
use crate::pipeline::MediaPipeline;

/// What a session does with negotiated media.
#[async_trait]
pub trait MediaRole: Send + Sync {
    /// An inbound track was negotiated.
    async fn on_track(&self, track: Arc<TrackRemote>, receiver: Arc<RTCRtpReceiver>);

    /// The browser opened a data channel.
    async fn on_data_channel(&self, channel: Arc<RTCDataChannel>);

    /// Main loop, started once the connection is up. Returns when
    /// `shutdown` fires or the media stops.
    async fn run(&self, shutdown: watch::Receiver<bool>);
}

/// Per-frame report sent back over the data channel.
#[derive(Debug, Serialize)]
pub struct FrameReport {
    /// Zero-based index of the extracted frame.
    pub frame: u64,
    /// Raw frame size in bytes.
    pub bytes: usize,
    /// Mean of all channel values, a cheap content fingerprint.
    pub mean: u8,
}

pub struct FrameWorker {
    pipeline: Arc<MediaPipeline>,
    rtcp: Mutex<Option<Arc<dyn RtcpSink>>>,
    rtcp_interval: Duration,
    target_bitrate: u32,
    result_poll_interval: Duration,
    result_tx: mpsc::Sender<String>,
    result_rx: Arc<Mutex<mpsc::Receiver<String>>>,
}

impl FrameWorker {
    pub fn new(config: &WorkerConfig, pipeline: Arc<MediaPipeline>) -> Self {
        let (result_tx, result_rx) = mpsc::channel(config.result_queue);
        Self {
            pipeline,
            rtcp: Mutex::new(None),
            rtcp_interval: config.rtcp_interval,
            target_bitrate: config.target_bitrate,
            result_poll_interval: config.result_poll_interval,
            result_tx,
            result_rx: Arc::new(Mutex::new(result_rx)),
        }
    }

    /// Install the feedback path once the peer exists. The role is
    /// created before the peer, so this cannot be a constructor input.
    pub async fn set_rtcp_sink(&self, sink: Arc<dyn RtcpSink>) {
        *self.rtcp.lock().await = Some(sink);
    }

    /// Periodic PLI + REMB toward the video sender.
    async fn rtcp_ticker(
        pipeline: Arc<MediaPipeline>,
        rtcp: Arc<dyn RtcpSink>,
        ssrc: u32,
        interval: Duration,
        bitrate: u32,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if pipeline.is_closed() {
                break;
            }
            if let Err(e) = rtcp.request_keyframe(ssrc).await {
                debug!(error = %e, "keyframe request failed");
                break;
            }
            if let Err(e) = rtcp.advise_bitrate(ssrc, bitrate).await {
                debug!(error = %e, "bitrate advice failed");
                break;
            }
        }
    }

    async fn pump_track(pipeline: Arc<MediaPipeline>, track: Arc<TrackRemote>, video: bool) {
        loop {
            if pipeline.is_closed() {
                break;
            }
            match track.read_rtp().await {
                Ok((packet, _)) => {
                    let pushed = if video {
                        pipeline.push_video(packet).await
                    } else {
                        pipeline.push_audio(packet).await
                    };
                    if pushed.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(error = %e, video, "track read ended");
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl MediaRole for FrameWorker {
    async fn on_track(&self, track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>) {
        let video = track.kind() == RTPCodecType::Video;
        info!(ssrc = track.ssrc(), video, "track up");

        if video {
            if let Some(rtcp) = self.rtcp.lock().await.clone() {
                tokio::spawn(Self::rtcp_ticker(
                    self.pipeline.clone(),
                    rtcp,
                    track.ssrc(),
                    self.rtcp_interval,
                    self.target_bitrate,
                ));
            } else {
                warn!("video track up before rtcp sink installed, no feedback loop");
            }
        }
        tokio::spawn(Self::pump_track(self.pipeline.clone(), track, video));
    }

    async fn on_data_channel(&self, channel: Arc<RTCDataChannel>) {
        info!(label = %channel.label(), "data channel up");
        let pipeline = self.pipeline.clone();
        let results = self.result_rx.clone();
        let poll_interval = self.result_poll_interval;

        let sender = channel.clone();
        channel.on_open(Box::new(move || {
            Box::pin(async move {
                let mut ticker = tokio::time::interval(poll_interval);
                loop {
                    ticker.tick().await;
                    if pipeline.is_closed() {
                        break;
                    }
                    let next = results.lock().await.try_recv();
                    if let Ok(report) = next {
                        if let Err(e) = sender.send_text(report).await {
                            debug!(error = %e, "data channel send failed");
                            break;
                        }
                    }
                }
            })
        }));
    }

    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut frame: u64 = 0;
        loop {
            let image = tokio::select! {
                image = self.pipeline.pop_image() => image,
                _ = shutdown.wait_for(|s| *s) => break,
            };
            let image = match image {
                Ok(image) => image,
                Err(_) => break,
            };

            let sum: u64 = image.iter().map(|b| u64::from(*b)).sum();
            let report = FrameReport {
                frame,
                bytes: image.len(),
                mean: (sum / image.len().max(1) as u64) as u8,
            };
            frame += 1;

            match serde_json::to_string(&report) {
                Ok(json) => {
                    // Reports are advisory; a slow consumer loses old ones.
                    if self.result_tx.try_send(json).is_err() {
                        debug!(frame = report.frame, "report queue full, dropped");
                    }
                }
                Err(e) => warn!(error = %e, "report serialization failed"),
            }
        }
        debug!(frames = frame, "frame worker loop ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DecoderConfig;

    fn worker() -> FrameWorker {
        let pipeline = Arc::new(MediaPipeline::new(
            std::env::temp_dir().join("vidgate-role-test.webm"),
            DecoderConfig::default(),
        ));
        FrameWorker::new(&WorkerConfig::default(), pipeline)
    }

    #[test]
    fn test_frame_report_shape() {
        let report = FrameReport {
            frame: 3,
            bytes: 12,
            mean: 128,
        };
        let json = serde_json::to_string(&report).unwrap();
        assert_eq!(json, r#"{"frame":3,"bytes":12,"mean":128}"#);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let worker = worker();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = {
            let worker = Arc::new(worker);
            tokio::spawn(async move { worker.run(shutdown_rx).await })
        };
        tokio::task::yield_now().await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("run must stop on shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_when_pipeline_closes() {
        let pipeline = Arc::new(MediaPipeline::new(
            std::env::temp_dir().join("vidgate-role-close-test.webm"),
            DecoderConfig::default(),
        ));
        let worker = Arc::new(FrameWorker::new(&WorkerConfig::default(), pipeline.clone()));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.run(shutdown_rx).await })
        };
        tokio::task::yield_now().await;
        pipeline.close().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("run must stop when the pipeline closes")
            .unwrap();
    }
}
