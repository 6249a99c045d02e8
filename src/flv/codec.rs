//! FLV codec identification

use crate::types::MediaKind;

/// Codec carried by an FLV audio or video tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
    // Audio (SoundFormat)
    LinearPcm,
    Adpcm,
    Mp3,
    LinearPcmLe,
    Nellymoser,
    G711ALaw,
    G711MuLaw,
    Aac,
    Speex,
    // Video (CodecID / enhanced FourCC)
    H263,
    ScreenVideo,
    Vp6,
    Vp6Alpha,
    ScreenVideo2,
    H264,
    H265,
    Av1,
    Vp9,
    Unknown { kind: MediaKind, id: u32 },
}

impl CodecId {
    /// Map the SoundFormat nibble of an audio tag
    pub fn from_sound_format(format: u8) -> Self {
        match format {
            0 => CodecId::LinearPcm,
            1 => CodecId::Adpcm,
            2 | 14 => CodecId::Mp3,
            3 => CodecId::LinearPcmLe,
            4..=6 => CodecId::Nellymoser,
            7 => CodecId::G711ALaw,
            8 => CodecId::G711MuLaw,
            10 => CodecId::Aac,
            11 => CodecId::Speex,
            other => CodecId::Unknown {
                kind: MediaKind::Audio,
                id: other as u32,
            },
        }
    }

    /// Map the CodecID nibble of a legacy video tag
    pub fn from_video_codec(codec: u8) -> Self {
        match codec {
            2 => CodecId::H263,
            3 => CodecId::ScreenVideo,
            4 => CodecId::Vp6,
            5 => CodecId::Vp6Alpha,
            6 => CodecId::ScreenVideo2,
            7 => CodecId::H264,
            12 => CodecId::H265,
            other => CodecId::Unknown {
                kind: MediaKind::Video,
                id: other as u32,
            },
        }
    }

    /// Map the FourCC of an enhanced-RTMP video tag
    pub fn from_fourcc(fourcc: [u8; 4]) -> Self {
        match &fourcc {
            b"avc1" => CodecId::H264,
            b"hvc1" => CodecId::H265,
            b"av01" => CodecId::Av1,
            b"vp09" => CodecId::Vp9,
            _ => CodecId::Unknown {
                kind: MediaKind::Video,
                id: u32::from_be_bytes(fourcc),
            },
        }
    }

    pub fn kind(&self) -> MediaKind {
        match self {
            CodecId::LinearPcm
            | CodecId::Adpcm
            | CodecId::Mp3
            | CodecId::LinearPcmLe
            | CodecId::Nellymoser
            | CodecId::G711ALaw
            | CodecId::G711MuLaw
            | CodecId::Aac
            | CodecId::Speex => MediaKind::Audio,
            CodecId::Unknown { kind, .. } => *kind,
            _ => MediaKind::Video,
        }
    }

    /// Whether the codec sends its configuration record in a sequence header
    /// before any coded data
    pub fn has_sequence_header(&self) -> bool {
        matches!(
            self,
            CodecId::Aac | CodecId::H264 | CodecId::H265 | CodecId::Av1 | CodecId::Vp9
        )
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            CodecId::LinearPcm => "pcm",
            CodecId::Adpcm => "adpcm",
            CodecId::Mp3 => "mp3",
            CodecId::LinearPcmLe => "pcm_le",
            CodecId::Nellymoser => "nellymoser",
            CodecId::G711ALaw => "pcm_alaw",
            CodecId::G711MuLaw => "pcm_mulaw",
            CodecId::Aac => "aac",
            CodecId::Speex => "speex",
            CodecId::H263 => "h263",
            CodecId::ScreenVideo => "flashsv",
            CodecId::Vp6 => "vp6f",
            CodecId::Vp6Alpha => "vp6a",
            CodecId::ScreenVideo2 => "flashsv2",
            CodecId::H264 => "h264",
            CodecId::H265 => "hevc",
            CodecId::Av1 => "av1",
            CodecId::Vp9 => "vp9",
            CodecId::Unknown { .. } => "unknown",
        }
    }
}

impl std::fmt::Display for CodecId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecId::Unknown { id, .. } => write!(f, "unknown({})", id),
            other => f.write_str(other.name()),
        }
    }
}
