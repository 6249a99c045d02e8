//! Media types shared by the demuxer, re-muxer and frame relay

use bytes::Bytes;

use crate::flv::codec::CodecId;

/// Elementary stream kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn is_audio(&self) -> bool {
        matches!(self, MediaKind::Audio)
    }
}

/// One elementary stream advertised by the publisher.
///
/// Tracks are built once while probing the stream and never change afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    /// Position in discovery order; packets refer to their track by this index
    pub index: usize,
    pub kind: MediaKind,
    pub codec: CodecId,
    /// Codec configuration record (AudioSpecificConfig, avcC, hvcC); empty when
    /// the codec has none
    pub config: Bytes,
    /// First byte of the FLV tag body as sent by the publisher
    /// (SoundFormat/rate/size/type for audio, frame type/codec for video)
    pub flv_flags: u8,
}

/// One demuxed unit of compressed data
#[derive(Debug, Clone)]
pub struct MediaPacket {
    pub track: usize,
    pub data: Bytes,
    /// Decode timestamp in milliseconds
    pub dts_ms: u32,
    /// Composition offset in milliseconds (H.264/H.265 only)
    pub composition_ms: i32,
    pub is_key: bool,
}

impl MediaPacket {
    /// Presentation timestamp in milliseconds
    pub fn pts_ms(&self) -> i64 {
        self.dts_ms as i64 + self.composition_ms as i64
    }
}
