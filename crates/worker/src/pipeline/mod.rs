//! Per-session media pipeline
//!
//! Owns everything between the RTP socket and the raw frame consumer:
//! sample reassembly, dual WebM muxing (decoder pipe and recording file)
//! and the external decoder process. One pipeline per session.
//!
//! The pipeline is inert until the first video keyframe arrives. Frame
//! geometry is read out of that keyframe, the decoder is spawned for it,
//! and both muxers are started. Samples seen before then are dropped.

pub mod extract;
pub mod sample;
pub mod vp8;
pub mod webm;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::fs::File;
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use webrtc::rtp::packet::Packet;

use crate::config::DecoderConfig;
use crate::{Error, Result};
use extract::{spawn_decoder, FrameSource};
use sample::{AudioStream, MediaSample, VideoStream};
use vp8::Geometry;
use webm::{BlockWriter, TrackId};

const VIDEO_TICKS_PER_MS: u64 = 90;
const AUDIO_TICKS_PER_MS: u64 = 48;

/// How long teardown waits for the decoder to drain before killing it.
const DECODER_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

struct VideoLane {
    stream: VideoStream,
    pipe: Option<BlockWriter<ChildStdin>>,
    pipe_ticks: u64,
    file_ticks: u64,
}

struct AudioLane {
    stream: AudioStream,
    ticks: u64,
}

/// Media pipeline for one session.
///
/// `push_video` and `push_audio` are fed from the RTP read loops;
/// `pop_image` is consumed from the data-channel side. All entry points
/// are `&self`, the pipeline is shared behind an `Arc`.
pub struct MediaPipeline {
    recording_path: PathBuf,
    decoder_config: DecoderConfig,

    video: Mutex<VideoLane>,
    audio: Mutex<AudioLane>,
    file: Mutex<Option<BlockWriter<File>>>,
    frames: Mutex<Option<FrameSource<ChildStdout>>>,
    child: Mutex<Option<Child>>,

    geometry_tx: watch::Sender<Option<Geometry>>,
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
}

impl MediaPipeline {
    pub fn new(recording_path: PathBuf, decoder_config: DecoderConfig) -> Self {
        let (geometry_tx, _) = watch::channel(None);
        let (closed_tx, _) = watch::channel(false);
        Self {
            recording_path,
            decoder_config,
            video: Mutex::new(VideoLane {
                stream: VideoStream::video(),
                pipe: None,
                pipe_ticks: 0,
                file_ticks: 0,
            }),
            audio: Mutex::new(AudioLane {
                stream: AudioStream::audio(),
                ticks: 0,
            }),
            file: Mutex::new(None),
            frames: Mutex::new(None),
            child: Mutex::new(None),
            geometry_tx,
            closed: AtomicBool::new(false),
            closed_tx,
        }
    }

    /// Geometry observer. Holds `None` until the first keyframe.
    pub fn geometry(&self) -> watch::Receiver<Option<Geometry>> {
        self.geometry_tx.subscribe()
    }

    /// Close observer, for cancelling blocked readers.
    pub fn closed_watch(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Feed one video RTP packet.
    pub async fn push_video(&self, packet: Packet) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let mut lane = self.video.lock().await;
        lane.stream.push(packet);
        while let Some(sample) = lane.stream.pop() {
            self.write_video_sample(&mut lane, sample).await;
        }
        Ok(())
    }

    /// Feed one audio RTP packet.
    pub async fn push_audio(&self, packet: Packet) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let mut lane = self.audio.lock().await;
        lane.stream.push(packet);
        while let Some(sample) = lane.stream.pop() {
            let timestamp_ms = lane.ticks / AUDIO_TICKS_PER_MS;
            lane.ticks += u64::from(sample.duration_ticks);

            let mut file = self.file.lock().await;
            match file.as_mut() {
                // Audio recorded only once the keyframe has started the
                // container; early samples have nowhere to go.
                None => continue,
                Some(muxer) => {
                    if let Err(e) = muxer
                        .write_block(TrackId::Audio, false, timestamp_ms, &sample.data)
                        .await
                    {
                        warn!(error = %e, "audio block dropped from recording");
                    }
                }
            }
        }
        Ok(())
    }

    async fn write_video_sample(&self, lane: &mut VideoLane, sample: MediaSample) {
        if lane.pipe.is_none() {
            if !sample.keyframe {
                return;
            }
            let geometry = match vp8::parse_geometry(&sample.data) {
                Ok(g) => g,
                Err(e) => {
                    warn!(error = %e, "keyframe with unusable geometry, waiting for next");
                    return;
                }
            };
            if let Err(e) = self.activate(lane, geometry).await {
                warn!(error = %e, "pipeline activation failed, waiting for next keyframe");
                return;
            }
        }

        let pipe_ts = lane.pipe_ticks / VIDEO_TICKS_PER_MS;
        let file_ts = lane.file_ticks / VIDEO_TICKS_PER_MS;
        lane.pipe_ticks += u64::from(sample.duration_ticks);
        lane.file_ticks += u64::from(sample.duration_ticks);

        if let Some(pipe) = lane.pipe.as_mut() {
            if let Err(e) = pipe
                .write_block(TrackId::Video, sample.keyframe, pipe_ts, &sample.data)
                .await
            {
                warn!(error = %e, "video block dropped from decoder pipe");
            }
        }
        let mut file = self.file.lock().await;
        if let Some(muxer) = file.as_mut() {
            if let Err(e) = muxer
                .write_block(TrackId::Video, sample.keyframe, file_ts, &sample.data)
                .await
            {
                warn!(error = %e, "video block dropped from recording");
            }
        }
    }

    /// Spawn the decoder and open both muxers for the detected geometry.
    /// Geometry is fixed for the life of the session after this.
    async fn activate(&self, lane: &mut VideoLane, geometry: Geometry) -> Result<()> {
        let (child, stdin, frame_source) = spawn_decoder(&self.decoder_config, geometry)?;
        lane.pipe = Some(BlockWriter::video_only(stdin, geometry).await?);

        let file = File::create(&self.recording_path).await?;
        *self.file.lock().await = Some(BlockWriter::with_audio(file, geometry).await?);
        *self.frames.lock().await = Some(frame_source);
        *self.child.lock().await = Some(child);

        // Publish last: observers may act on geometry immediately.
        let _ = self.geometry_tx.send(Some(geometry));
        info!(
            width = geometry.width,
            height = geometry.height,
            path = %self.recording_path.display(),
            "pipeline active"
        );
        Ok(())
    }

    /// Next decoded frame, exactly `width * height * 3` bytes.
    ///
    /// Blocks until the decoder produces one, which in turn waits for the
    /// pipeline to activate. Returns [`Error::Closed`] once the pipeline
    /// shuts down, including while a caller is blocked here.
    pub async fn pop_image(&self) -> Result<Vec<u8>> {
        let mut closed = self.closed_tx.subscribe();
        let mut geometry = self.geometry_tx.subscribe();

        // Wait out the pre-keyframe phase without holding any lock.
        tokio::select! {
            known = geometry.wait_for(|g| g.is_some()) => {
                if known.is_err() {
                    return Err(Error::Closed);
                }
            }
            _ = closed.wait_for(|c| *c) => return Err(Error::Closed),
        }

        let mut frames = self.frames.lock().await;
        let source = frames.as_mut().ok_or(Error::Closed)?;
        tokio::select! {
            frame = source.read_frame() => frame,
            _ = closed.wait_for(|c| *c) => Err(Error::Closed),
        }
    }

    /// Tear the pipeline down. Idempotent; concurrent `pop_image` calls
    /// are woken with [`Error::Closed`].
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let _ = self.closed_tx.send(true);

        // Finalize the pipe muxer first: dropping the decoder's stdin is
        // what lets it drain and exit.
        let pipe = self.video.lock().await.pipe.take();
        if let Some(muxer) = pipe {
            if let Err(e) = muxer.finalize().await {
                warn!(error = %e, "decoder pipe finalize failed");
            }
        }

        if let Some(muxer) = self.file.lock().await.take() {
            match muxer.finalize().await {
                Ok(mut file) => {
                    if let Err(e) = file.sync_all().await {
                        warn!(error = %e, "recording sync failed");
                    }
                }
                Err(e) => warn!(error = %e, "recording finalize failed"),
            }
        }

        if let Some(mut child) = self.child.lock().await.take() {
            match tokio::time::timeout(DECODER_EXIT_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => debug!(%status, "decoder exited"),
                Ok(Err(e)) => warn!(error = %e, "decoder wait failed"),
                Err(_) => {
                    warn!("decoder did not exit, killing");
                    let _ = child.kill().await;
                }
            }
        }
        info!("pipeline closed");
        Ok(())
    }
}
