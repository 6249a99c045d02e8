//! FLV container support
//!
//! This module handles:
//! - Demuxing the publisher's FLV stream into tracks and packets
//! - Re-muxing selected audio tracks into a fresh FLV stream for the transcoder
//! - Codec identification from tag headers

pub mod codec;
pub mod demuxer;
pub mod muxer;

pub use demuxer::FlvDemuxer;
pub use muxer::{select_audio_tracks, AudioRemuxer};

use bytes::{BufMut, BytesMut};

use crate::error::FlvError;

pub const SIGNATURE: [u8; 3] = *b"FLV";
pub const VERSION: u8 = 1;
/// Size of the file header, excluding `PreviousTagSize0`
pub const HEADER_LEN: usize = 9;
pub const TAG_HEADER_LEN: usize = 11;
pub const PREV_TAG_SIZE_LEN: usize = 4;

pub const FLAG_AUDIO: u8 = 0x04;
pub const FLAG_VIDEO: u8 = 0x01;

pub const TAG_AUDIO: u8 = 8;
pub const TAG_VIDEO: u8 = 9;
pub const TAG_SCRIPT: u8 = 18;
const TAG_FILTER_BIT: u8 = 0x20;

pub const AAC_SEQUENCE_HEADER: u8 = 0;
pub const AAC_RAW: u8 = 1;

pub const AVC_SEQUENCE_HEADER: u8 = 0;
pub const AVC_NALU: u8 = 1;
pub const AVC_END_OF_SEQUENCE: u8 = 2;

pub const FRAME_TYPE_KEY: u8 = 1;

/// The 9-byte FLV file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub has_audio: bool,
    pub has_video: bool,
}

impl FileHeader {
    pub fn parse(buf: &[u8; HEADER_LEN]) -> Result<Self, FlvError> {
        let signature = [buf[0], buf[1], buf[2]];
        if signature != SIGNATURE {
            return Err(FlvError::BadSignature(signature));
        }
        if buf[3] != VERSION {
            return Err(FlvError::UnsupportedVersion(buf[3]));
        }
        let data_offset = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]);
        if (data_offset as usize) < HEADER_LEN {
            return Err(FlvError::BadDataOffset(data_offset));
        }
        Ok(Self {
            has_audio: buf[4] & FLAG_AUDIO != 0,
            has_video: buf[4] & FLAG_VIDEO != 0,
        })
    }

    /// Write the header followed by `PreviousTagSize0`
    pub fn encode(&self, out: &mut BytesMut) {
        let mut flags = 0;
        if self.has_audio {
            flags |= FLAG_AUDIO;
        }
        if self.has_video {
            flags |= FLAG_VIDEO;
        }
        out.put_slice(&SIGNATURE);
        out.put_u8(VERSION);
        out.put_u8(flags);
        out.put_u32(HEADER_LEN as u32);
        out.put_u32(0);
    }
}

/// The 11-byte header in front of every tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagHeader {
    pub tag_type: u8,
    pub data_size: u32,
    pub timestamp_ms: u32,
    pub encrypted: bool,
}

impl TagHeader {
    pub fn parse(buf: &[u8; TAG_HEADER_LEN]) -> Self {
        let data_size = u32::from_be_bytes([0, buf[1], buf[2], buf[3]]);
        let timestamp_ms = u32::from_be_bytes([buf[7], buf[4], buf[5], buf[6]]);
        Self {
            tag_type: buf[0] & 0x1f,
            data_size,
            timestamp_ms,
            encrypted: buf[0] & TAG_FILTER_BIT != 0,
        }
    }
}

/// Serialize one tag, its body given in parts, plus the trailing `PreviousTagSize`
pub fn encode_tag(out: &mut BytesMut, tag_type: u8, timestamp_ms: u32, body: &[&[u8]]) {
    let data_size: usize = body.iter().map(|part| part.len()).sum();
    out.reserve(TAG_HEADER_LEN + data_size + PREV_TAG_SIZE_LEN);
    out.put_u8(tag_type);
    out.put_uint(data_size as u64, 3);
    out.put_uint((timestamp_ms & 0x00ff_ffff) as u64, 3);
    out.put_u8((timestamp_ms >> 24) as u8);
    out.put_uint(0, 3);
    for part in body {
        out.put_slice(part);
    }
    out.put_u32((TAG_HEADER_LEN + data_size) as u32);
}
