//! Fixed-size frame reader over the transcoder output

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

use crate::error::{PipelineError, Result};

use super::{AudioFrame, FRAME_BYTES};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Cuts a PCM byte stream into consecutive, non-overlapping 640-byte frames
pub struct FrameChunker<R> {
    reader: BufReader<R>,
    next_sequence: u64,
}

impl<R: AsyncRead + Unpin> FrameChunker<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::with_capacity(READ_BUFFER_SIZE, inner),
            next_sequence: 0,
        }
    }

    /// Block until a full frame is available.
    ///
    /// Returns `Ok(None)` when the source ends on a frame boundary and
    /// `ShortRead` when it ends with a partial frame, which is discarded.
    pub async fn next_frame(&mut self) -> Result<Option<AudioFrame>> {
        let mut buf = BytesMut::zeroed(FRAME_BYTES);
        let mut filled = 0;
        while filled < FRAME_BYTES {
            let n = self
                .reader
                .read(&mut buf[filled..])
                .await
                .map_err(PipelineError::TranscoderOutput)?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(PipelineError::ShortRead { remaining: filled });
            }
            filled += n;
        }

        let frame = AudioFrame {
            sequence: self.next_sequence,
            data: buf.freeze(),
        };
        self.next_sequence += 1;
        Ok(Some(frame))
    }

    /// Number of frames produced so far
    pub fn frames_read(&self) -> u64 {
        self.next_sequence
    }
}
