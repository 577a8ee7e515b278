//! External decoder process and raw frame extraction
//!
//! The worker does not decode VP8 itself. It pipes the live WebM stream
//! into an ffmpeg child pinned to a fixed output frame rate and packed
//! pixel format, and reads fixed-size raw frames back from its stdout.

use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;

use crate::config::DecoderConfig;
use crate::pipeline::vp8::Geometry;
use crate::{Error, Result};

/// Spawn the decoder for one session.
///
/// Returns the child (for teardown), its stdin (the muxer sink) and a
/// [`FrameSource`] over its stdout. The child is killed if the handles
/// are dropped without an explicit wait.
pub fn spawn_decoder(
    config: &DecoderConfig,
    geometry: Geometry,
) -> Result<(Child, ChildStdin, FrameSource<ChildStdout>)> {
    let mut child = Command::new(&config.program)
        .arg("-i")
        .arg("pipe:0")
        .arg("-r")
        .arg(config.frame_rate.to_string())
        .arg("-pix_fmt")
        .arg(&config.pixel_format)
        .arg("-s")
        .arg(format!("{}x{}", geometry.width, geometry.height))
        .arg("-f")
        .arg("rawvideo")
        .arg("pipe:1")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Decoder(format!("failed to spawn {}: {e}", config.program)))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| Error::Decoder("decoder stdin not captured".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Decoder("decoder stdout not captured".to_string()))?;

    debug!(
        program = %config.program,
        width = geometry.width,
        height = geometry.height,
        frame_rate = config.frame_rate,
        "decoder spawned"
    );
    Ok((child, stdin, FrameSource::new(stdout, geometry)))
}

/// Reads whole raw frames off a decoder's stdout.
///
/// Every frame is exactly `width * height * 3` bytes; the decoder output
/// has no framing of its own, the fixed size is the framing.
pub struct FrameSource<R> {
    reader: R,
    frame_size: usize,
}

impl<R: AsyncRead + Unpin> FrameSource<R> {
    pub fn new(reader: R, geometry: Geometry) -> Self {
        Self {
            reader,
            frame_size: geometry.frame_size(),
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Read exactly one frame. Blocks until the decoder has produced a
    /// full frame; EOF mid-frame means the decoder exited.
    pub async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let mut frame = vec![0u8; self.frame_size];
        self.reader
            .read_exact(&mut frame)
            .await
            .map_err(|e| Error::Decoder(format!("frame read failed: {e}")))?;
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn tiny() -> Geometry {
        // 2x2 frame, 12 bytes.
        Geometry { width: 2, height: 2 }
    }

    #[tokio::test]
    async fn test_reads_exactly_one_frame() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut source = FrameSource::new(rx, tiny());

        tx.write_all(&[7u8; 24]).await.unwrap();
        let frame = source.read_frame().await.unwrap();
        assert_eq!(frame.len(), 12);
        let frame = source.read_frame().await.unwrap();
        assert_eq!(frame, vec![7u8; 12]);
    }

    #[tokio::test]
    async fn test_eof_mid_frame_is_an_error() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut source = FrameSource::new(rx, tiny());

        tx.write_all(&[1u8; 5]).await.unwrap();
        drop(tx);
        assert!(source.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn test_read_waits_for_full_frame() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut source = FrameSource::new(rx, tiny());

        let reader = tokio::spawn(async move { source.read_frame().await });
        tx.write_all(&[3u8; 6]).await.unwrap();
        tokio::task::yield_now().await;
        tx.write_all(&[3u8; 6]).await.unwrap();
        let frame = reader.await.unwrap().unwrap();
        assert_eq!(frame, vec![3u8; 12]);
    }
}
