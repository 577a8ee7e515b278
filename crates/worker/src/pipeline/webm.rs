//! Streaming WebM muxing
//!
//! A minimal EBML writer that emits exactly the structure live consumers
//! (and ffmpeg reading from a pipe) need: an unknown-size Segment with
//! SimpleBlocks appended as samples arrive. Seek heads, cues and duration
//! back-patching are deliberately absent, the output is a stream first and
//! a file second.
//!
//! Block timestamps are in milliseconds (TimestampScale is fixed at 1ms).
//! Callers convert RTP clock ticks before writing.

use crate::pipeline::vp8::Geometry;
use crate::Result;
use tokio::io::{AsyncWrite, AsyncWriteExt};

const EBML_HEADER: u32 = 0x1A45_DFA3;
const SEGMENT: u32 = 0x1853_8067;
const INFO: u32 = 0x1549_A966;
const TIMESTAMP_SCALE: u32 = 0x2A_D7B1;
const MUXING_APP: u32 = 0x4D80;
const WRITING_APP: u32 = 0x5741;
const TRACKS: u32 = 0x1654_AE6B;
const TRACK_ENTRY: u32 = 0xAE;
const TRACK_NUMBER: u32 = 0xD7;
const TRACK_UID: u32 = 0x73C5;
const TRACK_TYPE: u32 = 0x83;
const CODEC_ID: u32 = 0x86;
const DEFAULT_DURATION: u32 = 0x23_E383;
const VIDEO: u32 = 0xE0;
const PIXEL_WIDTH: u32 = 0xB0;
const PIXEL_HEIGHT: u32 = 0xBA;
const AUDIO: u32 = 0xE1;
const SAMPLING_FREQUENCY: u32 = 0xB5;
const CHANNELS: u32 = 0x9F;
const CLUSTER: u32 = 0x1F43_B675;
const CLUSTER_TIMESTAMP: u32 = 0xE7;
const SIMPLE_BLOCK: u32 = 0xA3;

/// Marker for an element whose size is not known when its header is
/// written. Clusters and the Segment itself never get a real size.
const UNKNOWN_SIZE: [u8; 8] = [0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];

/// Track selector for [`BlockWriter::write_block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackId {
    Video,
    Audio,
}

impl TrackId {
    fn number(self) -> u8 {
        match self {
            TrackId::Video => 1,
            TrackId::Audio => 2,
        }
    }
}

/// Incremental WebM writer over any async byte sink.
///
/// Construct with [`BlockWriter::video_only`] for the decoder pipe or
/// [`BlockWriter::with_audio`] for the recording file, then feed samples
/// through [`BlockWriter::write_block`] in presentation order per track.
pub struct BlockWriter<W> {
    sink: W,
    has_audio: bool,
    cluster_open: bool,
    cluster_base_ms: u64,
    blocks_written: u64,
}

impl<W: AsyncWrite + Unpin + Send> BlockWriter<W> {
    /// Start a single-track VP8 stream.
    pub async fn video_only(sink: W, geometry: Geometry) -> Result<Self> {
        Self::start(sink, geometry, false).await
    }

    /// Start a VP8 + Opus stream.
    pub async fn with_audio(sink: W, geometry: Geometry) -> Result<Self> {
        Self::start(sink, geometry, true).await
    }

    async fn start(sink: W, geometry: Geometry, has_audio: bool) -> Result<Self> {
        let mut writer = Self {
            sink,
            has_audio,
            cluster_open: false,
            cluster_base_ms: 0,
            blocks_written: 0,
        };
        let mut head = Vec::with_capacity(256);
        write_ebml_header(&mut head);
        write_id(&mut head, SEGMENT);
        head.extend_from_slice(&UNKNOWN_SIZE);
        write_info(&mut head);
        write_tracks(&mut head, geometry, has_audio);
        writer.sink.write_all(&head).await?;
        writer.sink.flush().await?;
        Ok(writer)
    }

    /// Append one sample.
    ///
    /// `timestamp_ms` is the absolute presentation time. A new cluster is
    /// opened on every video keyframe, and whenever the running cluster
    /// can no longer express the timestamp as a signed 16-bit offset.
    pub async fn write_block(
        &mut self,
        track: TrackId,
        keyframe: bool,
        timestamp_ms: u64,
        payload: &[u8],
    ) -> Result<()> {
        let needs_cluster = !self.cluster_open
            || (track == TrackId::Video && keyframe)
            || timestamp_ms < self.cluster_base_ms
            || timestamp_ms - self.cluster_base_ms > i16::MAX as u64;

        let mut buf = Vec::with_capacity(payload.len() + 32);
        if needs_cluster {
            write_id(&mut buf, CLUSTER);
            buf.extend_from_slice(&UNKNOWN_SIZE);
            write_uint(&mut buf, CLUSTER_TIMESTAMP, timestamp_ms);
            self.cluster_base_ms = timestamp_ms;
            self.cluster_open = true;
        }

        let relative = (timestamp_ms - self.cluster_base_ms) as i16;
        write_id(&mut buf, SIMPLE_BLOCK);
        write_size(&mut buf, 4 + payload.len() as u64);
        buf.push(0x80 | track.number());
        buf.extend_from_slice(&relative.to_be_bytes());
        buf.push(if keyframe { 0x80 } else { 0x00 });
        buf.extend_from_slice(payload);

        self.sink.write_all(&buf).await?;
        self.sink.flush().await?;
        self.blocks_written += 1;
        Ok(())
    }

    /// Blocks written so far, across both tracks.
    pub fn blocks_written(&self) -> u64 {
        self.blocks_written
    }

    /// Whether this stream carries an audio track.
    pub fn has_audio(&self) -> bool {
        self.has_audio
    }

    /// Flush and hand back the sink.
    pub async fn finalize(mut self) -> Result<W> {
        self.sink.flush().await?;
        Ok(self.sink)
    }
}

fn write_ebml_header(buf: &mut Vec<u8>) {
    let mut body = Vec::with_capacity(40);
    write_uint(&mut body, 0x4286, 1); // EBMLVersion
    write_uint(&mut body, 0x42F7, 1); // EBMLReadVersion
    write_uint(&mut body, 0x42F2, 4); // EBMLMaxIDLength
    write_uint(&mut body, 0x42F3, 8); // EBMLMaxSizeLength
    write_string(&mut body, 0x4282, "webm"); // DocType
    write_uint(&mut body, 0x4287, 2); // DocTypeVersion
    write_uint(&mut body, 0x4285, 2); // DocTypeReadVersion
    write_master(buf, EBML_HEADER, &body);
}

fn write_info(buf: &mut Vec<u8>) {
    let mut body = Vec::with_capacity(40);
    // 1ms per tick, so block timestamps are plain milliseconds.
    write_uint(&mut body, TIMESTAMP_SCALE, 1_000_000);
    write_string(&mut body, MUXING_APP, "vidgate");
    write_string(&mut body, WRITING_APP, "vidgate");
    write_master(buf, INFO, &body);
}

fn write_tracks(buf: &mut Vec<u8>, geometry: Geometry, has_audio: bool) {
    let mut body = Vec::with_capacity(128);

    let mut video = Vec::with_capacity(64);
    write_uint(&mut video, TRACK_NUMBER, u64::from(TrackId::Video.number()));
    write_uint(&mut video, TRACK_UID, u64::from(TrackId::Video.number()));
    write_uint(&mut video, TRACK_TYPE, 1);
    write_string(&mut video, CODEC_ID, "V_VP8");
    write_uint(&mut video, DEFAULT_DURATION, 33_333_333);
    let mut dims = Vec::with_capacity(16);
    write_uint(&mut dims, PIXEL_WIDTH, u64::from(geometry.width));
    write_uint(&mut dims, PIXEL_HEIGHT, u64::from(geometry.height));
    write_master(&mut video, VIDEO, &dims);
    write_master(&mut body, TRACK_ENTRY, &video);

    if has_audio {
        let mut audio = Vec::with_capacity(64);
        write_uint(&mut audio, TRACK_NUMBER, u64::from(TrackId::Audio.number()));
        write_uint(&mut audio, TRACK_UID, u64::from(TrackId::Audio.number()));
        write_uint(&mut audio, TRACK_TYPE, 2);
        write_string(&mut audio, CODEC_ID, "A_OPUS");
        write_uint(&mut audio, DEFAULT_DURATION, 20_000_000);
        let mut params = Vec::with_capacity(16);
        write_float(&mut params, SAMPLING_FREQUENCY, 48_000.0);
        write_uint(&mut params, CHANNELS, 2);
        write_master(&mut audio, AUDIO, &params);
        write_master(&mut body, TRACK_ENTRY, &audio);
    }

    write_master(buf, TRACKS, &body);
}

/// Element IDs are stored with their length marker already encoded, so
/// they are emitted verbatim without the leading zero bytes.
fn write_id(buf: &mut Vec<u8>, id: u32) {
    let bytes = id.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    buf.extend_from_slice(&bytes[skip..]);
}

/// Minimal-length EBML size encoding.
fn write_size(buf: &mut Vec<u8>, value: u64) {
    let mut len = 1u32;
    while len < 8 && value >= (1u64 << (7 * len)) - 1 {
        len += 1;
    }
    let marked = value | (1u64 << (7 * len));
    let bytes = marked.to_be_bytes();
    buf.extend_from_slice(&bytes[(8 - len as usize)..]);
}

fn write_master(buf: &mut Vec<u8>, id: u32, body: &[u8]) {
    write_id(buf, id);
    write_size(buf, body.len() as u64);
    buf.extend_from_slice(body);
}

fn write_uint(buf: &mut Vec<u8>, id: u32, value: u64) {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count().min(7);
    write_id(buf, id);
    write_size(buf, (8 - skip) as u64);
    buf.extend_from_slice(&bytes[skip..]);
}

fn write_float(buf: &mut Vec<u8>, id: u32, value: f64) {
    write_id(buf, id);
    write_size(buf, 8);
    buf.extend_from_slice(&value.to_be_bytes());
}

fn write_string(buf: &mut Vec<u8>, id: u32, value: &str) {
    write_id(buf, id);
    write_size(buf, value.len() as u64);
    buf.extend_from_slice(value.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn geometry() -> Geometry {
        Geometry { width: 320, height: 240 }
    }

    /// Count SimpleBlock and Cluster headers in the raw stream.
    fn count_markers(data: &[u8], marker: &[u8]) -> usize {
        data.windows(marker.len()).filter(|w| *w == marker).count()
    }

    #[tokio::test]
    async fn test_header_declares_webm_vp8() {
        let writer = BlockWriter::video_only(Cursor::new(Vec::new()), geometry())
            .await
            .unwrap();
        let data = writer.finalize().await.unwrap().into_inner();
        assert_eq!(&data[..4], &[0x1A, 0x45, 0xDF, 0xA3]);
        assert_eq!(count_markers(&data, b"webm"), 1);
        assert_eq!(count_markers(&data, b"V_VP8"), 1);
        assert_eq!(count_markers(&data, b"A_OPUS"), 0);
    }

    #[tokio::test]
    async fn test_audio_track_present_when_requested() {
        let writer = BlockWriter::with_audio(Cursor::new(Vec::new()), geometry())
            .await
            .unwrap();
        let data = writer.finalize().await.unwrap().into_inner();
        assert_eq!(count_markers(&data, b"V_VP8"), 1);
        assert_eq!(count_markers(&data, b"A_OPUS"), 1);
    }

    #[tokio::test]
    async fn test_keyframe_opens_cluster() {
        let mut writer = BlockWriter::video_only(Cursor::new(Vec::new()), geometry())
            .await
            .unwrap();
        writer
            .write_block(TrackId::Video, true, 0, &[0x10, 0x00])
            .await
            .unwrap();
        writer
            .write_block(TrackId::Video, false, 33, &[0x11, 0x00])
            .await
            .unwrap();
        writer
            .write_block(TrackId::Video, true, 66, &[0x10, 0x00])
            .await
            .unwrap();
        assert_eq!(writer.blocks_written(), 3);

        let data = writer.finalize().await.unwrap().into_inner();
        // Two keyframes, two clusters.
        assert_eq!(count_markers(&data, &[0x1F, 0x43, 0xB6, 0x75]), 2);
    }

    #[tokio::test]
    async fn test_cluster_rolls_over_on_timestamp_overflow() {
        let mut writer = BlockWriter::video_only(Cursor::new(Vec::new()), geometry())
            .await
            .unwrap();
        writer
            .write_block(TrackId::Video, true, 0, &[0x10])
            .await
            .unwrap();
        // Past the i16 horizon of the open cluster.
        writer
            .write_block(TrackId::Video, false, 40_000, &[0x11])
            .await
            .unwrap();
        let data = writer.finalize().await.unwrap().into_inner();
        assert_eq!(count_markers(&data, &[0x1F, 0x43, 0xB6, 0x75]), 2);
    }

    #[tokio::test]
    async fn test_block_encodes_track_and_relative_timestamp() {
        let mut writer = BlockWriter::with_audio(Cursor::new(Vec::new()), geometry())
            .await
            .unwrap();
        writer
            .write_block(TrackId::Video, true, 100, &[0x10])
            .await
            .unwrap();
        writer
            .write_block(TrackId::Audio, false, 120, &[0xAA])
            .await
            .unwrap();
        let data = writer.finalize().await.unwrap().into_inner();

        // Video block: track 1, relative 0, keyframe flag set.
        let video = count_markers(&data, &[0xA3, 0x85, 0x81, 0x00, 0x00, 0x80, 0x10]);
        assert_eq!(video, 1);
        // Audio block: track 2, relative 20, no keyframe flag.
        let audio = count_markers(&data, &[0xA3, 0x85, 0x82, 0x00, 0x14, 0x00, 0xAA]);
        assert_eq!(audio, 1);
    }

    #[tokio::test]
    async fn test_backwards_timestamp_starts_fresh_cluster() {
        let mut writer = BlockWriter::video_only(Cursor::new(Vec::new()), geometry())
            .await
            .unwrap();
        writer
            .write_block(TrackId::Video, true, 500, &[0x10])
            .await
            .unwrap();
        // Earlier than the cluster base, must not underflow.
        writer
            .write_block(TrackId::Video, false, 200, &[0x11])
            .await
            .unwrap();
        let data = writer.finalize().await.unwrap().into_inner();
        assert_eq!(count_markers(&data, &[0x1F, 0x43, 0xB6, 0x75]), 2);
    }
}
