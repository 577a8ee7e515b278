//! VP8 bitstream inspection
//!
//! Works on fully reassembled VP8 frames (the payload of a video sample,
//! not raw RTP). Only the uncompressed data chunk of the frame header is
//! touched, so no entropy decoding is needed.

use crate::{Error, Result};

/// Frame geometry recovered from a VP8 keyframe header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    /// Byte size of one packed 3-bytes-per-pixel raw frame.
    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

/// Whether a reassembled VP8 frame is a keyframe.
///
/// Bit 0 of the first byte of the frame tag is the inverse keyframe flag.
/// An empty frame is not a keyframe.
pub fn is_keyframe(frame: &[u8]) -> bool {
    match frame.first() {
        Some(tag) => tag & 0x1 == 0,
        None => false,
    }
}

/// Parse width and height out of a VP8 keyframe.
///
/// The keyframe header carries a 3-byte start code at offset 3 and two
/// 16-bit little-endian dimension fields at offsets 6 and 8. The upper
/// two bits of each field are rescaling hints and are masked off.
pub fn parse_geometry(frame: &[u8]) -> Result<Geometry> {
    if !is_keyframe(frame) {
        return Err(Error::Pipeline(
            "geometry is only present in keyframes".to_string(),
        ));
    }
    if frame.len() < 10 {
        return Err(Error::Pipeline(format!(
            "keyframe too short for geometry: {} bytes",
            frame.len()
        )));
    }
    let raw = u32::from_le_bytes([frame[6], frame[7], frame[8], frame[9]]);
    let width = raw & 0x3FFF;
    let height = (raw >> 16) & 0x3FFF;
    if width == 0 || height == 0 {
        return Err(Error::Pipeline(format!(
            "degenerate keyframe geometry {width}x{height}"
        )));
    }
    Ok(Geometry { width, height })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal VP8 keyframe header with the given dimensions.
    fn keyframe_header(width: u16, height: u16) -> Vec<u8> {
        let mut frame = vec![0u8; 10];
        // Frame tag: keyframe (bit 0 clear), version 0, show_frame.
        frame[0] = 0x10;
        frame[3..6].copy_from_slice(&[0x9d, 0x01, 0x2a]);
        frame[6..8].copy_from_slice(&width.to_le_bytes());
        frame[8..10].copy_from_slice(&height.to_le_bytes());
        frame
    }

    #[test]
    fn test_keyframe_flag() {
        assert!(is_keyframe(&[0x10, 0x00]));
        assert!(!is_keyframe(&[0x11, 0x00]));
        assert!(!is_keyframe(&[]));
    }

    #[test]
    fn test_parse_geometry() {
        let frame = keyframe_header(640, 480);
        let geometry = parse_geometry(&frame).unwrap();
        assert_eq!(geometry, Geometry { width: 640, height: 480 });
        assert_eq!(geometry.frame_size(), 640 * 480 * 3);
    }

    #[test]
    fn test_rescaling_bits_masked() {
        // Set the two rescaling bits above the 14-bit dimensions.
        let mut frame = keyframe_header(1280, 720);
        frame[7] |= 0xC0;
        frame[9] |= 0xC0;
        let geometry = parse_geometry(&frame).unwrap();
        assert_eq!(geometry, Geometry { width: 1280, height: 720 });
    }

    #[test]
    fn test_interframe_rejected() {
        let mut frame = keyframe_header(640, 480);
        frame[0] |= 0x1;
        assert!(parse_geometry(&frame).is_err());
    }

    #[test]
    fn test_truncated_keyframe_rejected() {
        let frame = keyframe_header(640, 480);
        assert!(parse_geometry(&frame[..8]).is_err());
    }

    #[test]
    fn test_zero_dimension_rejected() {
        let frame = keyframe_header(0, 480);
        assert!(parse_geometry(&frame).is_err());
    }
}
