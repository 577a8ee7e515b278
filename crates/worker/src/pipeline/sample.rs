//! RTP-to-sample reassembly
//!
//! Thin facade over the webrtc sample builder that fixes the codec,
//! clock rate and lateness window per track kind, and reports durations
//! in RTP clock ticks so downstream timestamp arithmetic stays integral.

use bytes::Bytes;
use webrtc::media::io::sample_builder::SampleBuilder;
use webrtc::rtp::codecs::opus::OpusPacket;
use webrtc::rtp::codecs::vp8::Vp8Packet;
use webrtc::rtp::packet::Packet;
use webrtc::rtp::packetizer::Depacketizer;

use crate::pipeline::vp8;

/// Packets arriving more than this many sequence numbers late are given
/// up on rather than stalling reassembly.
const MAX_LATE: u16 = 10;

const VIDEO_CLOCK_RATE: u32 = 90_000;
const AUDIO_CLOCK_RATE: u32 = 48_000;

/// One reassembled media sample.
#[derive(Debug, Clone)]
pub struct MediaSample {
    pub data: Bytes,
    /// Duration in ticks of the track clock (90kHz video, 48kHz audio).
    pub duration_ticks: u32,
    pub keyframe: bool,
}

/// Ordered reassembly of RTP packets into whole samples.
pub struct SampleStream<D: Depacketizer> {
    builder: SampleBuilder<D>,
    clock_rate: u32,
    video: bool,
}

pub type VideoStream = SampleStream<Vp8Packet>;
pub type AudioStream = SampleStream<OpusPacket>;

impl SampleStream<Vp8Packet> {
    /// VP8 reassembly on the 90kHz video clock.
    pub fn video() -> Self {
        Self {
            builder: SampleBuilder::new(MAX_LATE, Vp8Packet::default(), VIDEO_CLOCK_RATE),
            clock_rate: VIDEO_CLOCK_RATE,
            video: true,
        }
    }
}

impl SampleStream<OpusPacket> {
    /// Opus reassembly on the 48kHz audio clock.
    pub fn audio() -> Self {
        Self {
            builder: SampleBuilder::new(MAX_LATE, OpusPacket::default(), AUDIO_CLOCK_RATE),
            clock_rate: AUDIO_CLOCK_RATE,
            video: false,
        }
    }
}

impl<D: Depacketizer> SampleStream<D> {
    /// Feed one RTP packet. Samples become available from [`Self::pop`]
    /// once their boundaries are known.
    pub fn push(&mut self, packet: Packet) {
        self.builder.push(packet);
    }

    /// Next complete sample, if any.
    pub fn pop(&mut self) -> Option<MediaSample> {
        let sample = self.builder.pop()?;
        let ticks = (sample.duration.as_secs_f64() * f64::from(self.clock_rate)).round() as u32;
        let keyframe = self.video && vp8::is_keyframe(&sample.data);
        Some(MediaSample {
            data: sample.data,
            duration_ticks: ticks,
            keyframe,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webrtc::rtp::header::Header;

    /// One single-packet VP8 sample: descriptor byte (start bit set)
    /// followed by the frame payload, marker bit closing the sample.
    fn vp8_packet(seq: u16, ts: u32, frame: &[u8]) -> Packet {
        let mut payload = vec![0x10];
        payload.extend_from_slice(frame);
        Packet {
            header: Header {
                version: 2,
                marker: true,
                sequence_number: seq,
                timestamp: ts,
                ..Default::default()
            },
            payload: Bytes::from(payload),
        }
    }

    #[test]
    fn test_video_sample_duration_in_ticks() {
        let mut stream = SampleStream::video();
        stream.push(vp8_packet(1, 0, &[0x10, 0x00]));
        // The next sample's timestamp pins down the first one's duration.
        stream.push(vp8_packet(2, 3000, &[0x11, 0x00]));

        let sample = stream.pop().expect("first sample complete");
        assert_eq!(sample.data.as_ref(), &[0x10, 0x00]);
        assert_eq!(sample.duration_ticks, 3000);
        assert!(sample.keyframe);
    }

    #[test]
    fn test_interframe_not_marked_keyframe() {
        let mut stream = SampleStream::video();
        stream.push(vp8_packet(1, 0, &[0x11, 0x00]));
        stream.push(vp8_packet(2, 3000, &[0x10, 0x00]));

        let sample = stream.pop().expect("first sample complete");
        assert!(!sample.keyframe);
    }

    #[test]
    fn test_audio_never_marked_keyframe() {
        let mut stream = SampleStream::audio();
        for seq in 1..=2u16 {
            stream.push(Packet {
                header: Header {
                    version: 2,
                    marker: true,
                    sequence_number: seq,
                    timestamp: u32::from(seq - 1) * 960,
                    ..Default::default()
                },
                payload: Bytes::from_static(&[0xFC, 0xFF, 0xFE]),
            });
        }
        let sample = stream.pop().expect("first sample complete");
        assert!(!sample.keyframe);
        assert_eq!(sample.duration_ticks, 960);
    }

    #[test]
    fn test_incomplete_sample_not_popped() {
        let mut stream = SampleStream::video();
        stream.push(vp8_packet(1, 0, &[0x10, 0x00]));
        assert!(stream.pop().is_none());
    }
}
