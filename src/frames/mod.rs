//! Decoded audio frames
//!
//! The transcoder emits 16 kHz mono s16le PCM. It is cut into consecutive
//! 20 ms frames of exactly 640 bytes and each frame is forwarded downstream.

pub mod chunker;
pub mod forward;

pub use chunker::FrameChunker;
pub use forward::{ForwarderFactory, FrameForwarder, LoggingForwarderFactory};

use bytes::Bytes;

pub const SAMPLE_RATE: usize = 16_000;
pub const CHANNELS: usize = 1;
pub const BYTES_PER_SAMPLE: usize = 2;
pub const FRAME_DURATION_MS: usize = 20;

/// Bytes in one 20 ms frame
pub const FRAME_BYTES: usize =
    SAMPLE_RATE * CHANNELS * BYTES_PER_SAMPLE * FRAME_DURATION_MS / 1000;

/// One 20 ms window of PCM audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Position in the connection's frame sequence, starting at 0
    pub sequence: u64,
    pub data: Bytes,
}

impl AudioFrame {
    /// Samples as signed 16-bit integers
    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.data
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|s| i16::from_le_bytes([s[0], s[1]]))
    }

    /// Largest absolute sample value, 0 for silence
    pub fn peak(&self) -> u16 {
        self.samples().map(i16::unsigned_abs).max().unwrap_or(0)
    }
}
