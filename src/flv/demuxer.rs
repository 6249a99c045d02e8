//! FLV demuxer - turns the publisher's byte stream into tracks and packets

use std::collections::VecDeque;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

use crate::error::FlvError;
use crate::types::{MediaKind, MediaPacket, Track};

use super::codec::CodecId;
use super::{
    FileHeader, TagHeader, AAC_SEQUENCE_HEADER, AVC_END_OF_SEQUENCE, AVC_NALU, AVC_SEQUENCE_HEADER,
    FRAME_TYPE_KEY, HEADER_LEN, PREV_TAG_SIZE_LEN, TAG_AUDIO, TAG_HEADER_LEN, TAG_SCRIPT,
    TAG_VIDEO,
};

/// Maximum number of tags inspected while looking for the advertised tracks
pub const MAX_PROBE_TAGS: usize = 64;

const READ_BUFFER_SIZE: usize = 64 * 1024;
const MAX_DATA_OFFSET: usize = 4096;

const VIDEO_FRAME_INFO: u8 = 5;
const EX_HEADER_BIT: u8 = 0x80;
const EX_SEQUENCE_START: u8 = 0;
const EX_CODED_FRAMES: u8 = 1;
const EX_CODED_FRAMES_X: u8 = 3;

/// What a single audio/video tag body turned out to be
#[derive(Debug)]
enum TagPayload {
    SequenceHeader {
        codec: CodecId,
        flags: u8,
        config: Bytes,
    },
    Coded {
        codec: CodecId,
        flags: u8,
        data: Bytes,
        composition_ms: i32,
        is_key: bool,
    },
    Skip(&'static str),
}

/// Demuxer over an FLV byte stream.
///
/// `open` consumes the file header and probes the first tags to build the
/// track list; `read_packet` then yields packets in arrival order.
pub struct FlvDemuxer<R> {
    reader: BufReader<R>,
    header: FileHeader,
    tracks: Vec<Track>,
    pending: VecDeque<MediaPacket>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> FlvDemuxer<R> {
    /// Read the file header and probe for the advertised tracks
    pub async fn open(inner: R) -> Result<Self, FlvError> {
        let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, inner);

        let mut header_buf = [0u8; HEADER_LEN];
        if !read_full(&mut reader, &mut header_buf, "file header").await? {
            return Err(FlvError::Truncated("file header"));
        }
        let header = FileHeader::parse(&header_buf)?;

        // Skip any extension bytes between the header and the first tag,
        // then PreviousTagSize0.
        let data_offset =
            u32::from_be_bytes([header_buf[5], header_buf[6], header_buf[7], header_buf[8]]);
        if data_offset as usize > MAX_DATA_OFFSET {
            return Err(FlvError::BadDataOffset(data_offset));
        }
        let mut skip = vec![0u8; data_offset as usize - HEADER_LEN + PREV_TAG_SIZE_LEN];
        if !read_full(&mut reader, &mut skip, "file header").await? {
            return Err(FlvError::Truncated("file header"));
        }

        let mut demuxer = Self {
            reader,
            header,
            tracks: Vec::new(),
            pending: VecDeque::new(),
            eof: false,
        };
        demuxer.probe().await?;
        Ok(demuxer)
    }

    async fn probe(&mut self) -> Result<(), FlvError> {
        // Some muxers leave the flags empty; look for both kinds then.
        let advertised_any = self.header.has_audio || self.header.has_video;
        let want_audio = self.header.has_audio || !advertised_any;
        let want_video = self.header.has_video || !advertised_any;

        let mut probed = 0;
        while probed < MAX_PROBE_TAGS {
            let audio_done = !want_audio || self.track_for(MediaKind::Audio).is_some();
            let video_done = !want_video || self.track_for(MediaKind::Video).is_some();
            if audio_done && video_done {
                break;
            }

            let Some((tag, body)) = self.read_tag().await? else {
                self.eof = true;
                break;
            };
            probed += 1;
            if let Some(packet) = self.ingest(tag, body, true) {
                self.pending.push_back(packet);
            }
        }

        if self.tracks.is_empty() {
            return Err(FlvError::NoTracks);
        }

        tracing::debug!(
            "Probed {} tags: {} track(s), {} buffered packet(s)",
            probed,
            self.tracks.len(),
            self.pending.len()
        );
        Ok(())
    }

    /// Tracks found while probing, in discovery order
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn header(&self) -> FileHeader {
        self.header
    }

    /// Next packet in arrival order, `None` once the stream ends cleanly
    pub async fn read_packet(&mut self) -> Result<Option<MediaPacket>, FlvError> {
        if let Some(packet) = self.pending.pop_front() {
            return Ok(Some(packet));
        }

        loop {
            if self.eof {
                return Ok(None);
            }
            match self.read_tag().await? {
                Some((tag, body)) => {
                    if let Some(packet) = self.ingest(tag, body, false) {
                        return Ok(Some(packet));
                    }
                }
                None => {
                    self.eof = true;
                    return Ok(None);
                }
            }
        }
    }

    /// Give back the underlying stream
    pub fn into_inner(self) -> R {
        self.reader.into_inner()
    }

    fn track_for(&self, kind: MediaKind) -> Option<&Track> {
        self.tracks.iter().find(|t| t.kind == kind)
    }

    fn add_track(&mut self, codec: CodecId, flags: u8, config: Bytes) -> usize {
        let index = self.tracks.len();
        let kind = codec.kind();
        tracing::debug!(
            "Found {:?} track #{}: codec={}, config_len={}",
            kind,
            index,
            codec,
            config.len()
        );
        self.tracks.push(Track {
            index,
            kind,
            codec,
            config,
            flv_flags: flags,
        });
        index
    }

    /// Read one tag, `None` on a clean end of stream at a tag boundary
    async fn read_tag(&mut self) -> Result<Option<(TagHeader, Bytes)>, FlvError> {
        let mut header_buf = [0u8; TAG_HEADER_LEN];
        if !read_full(&mut self.reader, &mut header_buf, "tag header").await? {
            return Ok(None);
        }
        let tag = TagHeader::parse(&header_buf);
        if tag.encrypted {
            return Err(FlvError::Encrypted);
        }

        let mut body = vec![0u8; tag.data_size as usize];
        if !body.is_empty() && !read_full(&mut self.reader, &mut body, "tag body").await? {
            return Err(FlvError::Truncated("tag body"));
        }

        let mut prev_size = [0u8; PREV_TAG_SIZE_LEN];
        if !read_full(&mut self.reader, &mut prev_size, "tag trailer").await? {
            return Err(FlvError::Truncated("tag trailer"));
        }

        Ok(Some((tag, Bytes::from(body))))
    }

    /// Classify a tag, creating tracks while probing
    fn ingest(&mut self, tag: TagHeader, body: Bytes, probing: bool) -> Option<MediaPacket> {
        let (kind, payload) = match tag.tag_type {
            TAG_AUDIO => (MediaKind::Audio, parse_audio(body)),
            TAG_VIDEO => (MediaKind::Video, parse_video(body)),
            TAG_SCRIPT => {
                tracing::trace!("Skipping script data tag ({} bytes)", tag.data_size);
                return None;
            }
            other => {
                tracing::trace!("Skipping unknown tag type {}", other);
                return None;
            }
        };

        match payload {
            TagPayload::Skip(reason) => {
                tracing::trace!("Skipping {:?} tag: {}", kind, reason);
                None
            }
            TagPayload::SequenceHeader {
                codec,
                flags,
                config,
            } => {
                if self.track_for(kind).is_some() {
                    tracing::debug!("Ignoring repeated {:?} sequence header", kind);
                } else if probing {
                    self.add_track(codec, flags, config);
                } else {
                    tracing::debug!("Ignoring {:?} stream not announced at start", kind);
                }
                None
            }
            TagPayload::Coded {
                codec,
                flags,
                data,
                composition_ms,
                is_key,
            } => {
                let existing = self.track_for(kind).map(|t| t.index);
                let track = match existing {
                    Some(index) => index,
                    None if probing && !codec.has_sequence_header() => {
                        self.add_track(codec, flags, Bytes::new())
                    }
                    None => {
                        tracing::trace!("Dropping {:?} data without a track", kind);
                        return None;
                    }
                };
                Some(MediaPacket {
                    track,
                    data,
                    dts_ms: tag.timestamp_ms,
                    composition_ms,
                    is_key,
                })
            }
        }
    }
}

fn parse_audio(body: Bytes) -> TagPayload {
    let Some(&flags) = body.first() else {
        return TagPayload::Skip("empty audio tag");
    };
    let codec = CodecId::from_sound_format(flags >> 4);

    if codec == CodecId::Aac {
        if body.len() < 2 {
            return TagPayload::Skip("short AAC tag");
        }
        let payload = body.slice(2..);
        if body[1] == AAC_SEQUENCE_HEADER {
            return TagPayload::SequenceHeader {
                codec,
                flags,
                config: payload,
            };
        }
        return TagPayload::Coded {
            codec,
            flags,
            data: payload,
            composition_ms: 0,
            is_key: true,
        };
    }

    TagPayload::Coded {
        codec,
        flags,
        data: body.slice(1..),
        composition_ms: 0,
        is_key: true,
    }
}

fn parse_video(body: Bytes) -> TagPayload {
    let Some(&flags) = body.first() else {
        return TagPayload::Skip("empty video tag");
    };

    if flags & EX_HEADER_BIT != 0 {
        return parse_enhanced_video(flags, body);
    }

    let frame_type = flags >> 4;
    if frame_type == VIDEO_FRAME_INFO {
        return TagPayload::Skip("video info frame");
    }
    let codec = CodecId::from_video_codec(flags & 0x0f);
    let is_key = frame_type == FRAME_TYPE_KEY;

    if matches!(codec, CodecId::H264 | CodecId::H265) {
        if body.len() < 5 {
            return TagPayload::Skip("short AVC tag");
        }
        let composition_ms = read_si24(&body[2..5]);
        let payload = body.slice(5..);
        return match body[1] {
            AVC_SEQUENCE_HEADER => TagPayload::SequenceHeader {
                codec,
                flags,
                config: payload,
            },
            AVC_NALU => TagPayload::Coded {
                codec,
                flags,
                data: payload,
                composition_ms,
                is_key,
            },
            AVC_END_OF_SEQUENCE => TagPayload::Skip("end of sequence"),
            _ => TagPayload::Skip("unknown AVC packet type"),
        };
    }

    TagPayload::Coded {
        codec,
        flags,
        data: body.slice(1..),
        composition_ms: 0,
        is_key,
    }
}

fn parse_enhanced_video(flags: u8, body: Bytes) -> TagPayload {
    let frame_type = (flags >> 4) & 0x07;
    if frame_type == VIDEO_FRAME_INFO {
        return TagPayload::Skip("video info frame");
    }
    if body.len() < 5 {
        return TagPayload::Skip("short enhanced video tag");
    }
    let codec = CodecId::from_fourcc([body[1], body[2], body[3], body[4]]);
    let is_key = frame_type == FRAME_TYPE_KEY;
    let rest = body.slice(5..);

    match flags & 0x0f {
        EX_SEQUENCE_START => TagPayload::SequenceHeader {
            codec,
            flags,
            config: rest,
        },
        EX_CODED_FRAMES if matches!(codec, CodecId::H264 | CodecId::H265) => {
            if rest.len() < 3 {
                return TagPayload::Skip("short enhanced video tag");
            }
            TagPayload::Coded {
                codec,
                flags,
                composition_ms: read_si24(&rest[..3]),
                data: rest.slice(3..),
                is_key,
            }
        }
        EX_CODED_FRAMES | EX_CODED_FRAMES_X => TagPayload::Coded {
            codec,
            flags,
            data: rest,
            composition_ms: 0,
            is_key,
        },
        _ => TagPayload::Skip("enhanced video control packet"),
    }
}

/// Signed 24-bit big-endian integer
fn read_si24(buf: &[u8]) -> i32 {
    let raw = u32::from_be_bytes([0, buf[0], buf[1], buf[2]]);
    ((raw << 8) as i32) >> 8
}

/// Fill `buf` completely. Returns `false` if the stream ended before the
/// first byte, and a truncation error if it ended part way.
async fn read_full<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
    what: &'static str,
) -> Result<bool, FlvError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(FlvError::Truncated(what));
        }
        filled += n;
    }
    Ok(true)
}
