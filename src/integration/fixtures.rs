//! Test fixtures for integration tests
//!
//! Provides synthetic FLV streams, a scripted transcoder and a recording
//! forwarder so pipelines can run without ffmpeg or a network peer.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

use crate::error::{ForwardError, Result};
use crate::flv::{
    encode_tag, FileHeader, FlvDemuxer, AAC_RAW, AAC_SEQUENCE_HEADER, AVC_NALU,
    AVC_SEQUENCE_HEADER, TAG_AUDIO, TAG_SCRIPT, TAG_VIDEO,
};
use crate::frames::{AudioFrame, ForwarderFactory, FrameForwarder, FRAME_BYTES};
use crate::pipeline::ConnectionInfo;
use crate::transcode::{ProcessControl, ProcessExit, Transcoder, TranscoderProcess};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Builds FLV byte streams tag by tag
#[derive(Debug, Clone)]
pub struct FlvBuilder {
    buf: BytesMut,
}

impl FlvBuilder {
    /// AudioSpecificConfig for AAC-LC, 44.1 kHz, stereo
    pub const AAC_CONFIG: &'static [u8] = &[0x12, 0x10];

    /// AVCDecoderConfigurationRecord stub (High profile, level 3.1)
    pub const AVC_CONFIG: &'static [u8] = &[0x01, 0x64, 0x00, 0x1f, 0xff, 0xe1, 0x00, 0x00];

    /// AAC, 44 kHz, 16-bit, stereo
    const AAC_FLAGS: u8 = 0xaf;
    /// MP3, 44 kHz, 16-bit, stereo
    const MP3_FLAGS: u8 = 0x2f;

    pub fn new(has_audio: bool, has_video: bool) -> Self {
        let mut buf = BytesMut::new();
        FileHeader {
            has_audio,
            has_video,
        }
        .encode(&mut buf);
        Self { buf }
    }

    /// An `onMetaData` script tag with an empty ECMA array
    pub fn script_tag(self) -> Self {
        let mut body = vec![0x02, 0x00, 0x0a];
        body.extend_from_slice(b"onMetaData");
        body.extend_from_slice(&[0x08, 0, 0, 0, 0, 0, 0, 0x09]);
        self.raw_tag(TAG_SCRIPT, 0, &body)
    }

    pub fn aac_sequence_header(self) -> Self {
        self.tag(
            TAG_AUDIO,
            0,
            &[&[Self::AAC_FLAGS, AAC_SEQUENCE_HEADER], Self::AAC_CONFIG],
        )
    }

    pub fn aac_frame(self, timestamp_ms: u32, data: &[u8]) -> Self {
        self.tag(TAG_AUDIO, timestamp_ms, &[&[Self::AAC_FLAGS, AAC_RAW], data])
    }

    /// `count` AAC frames 23 ms apart. Frame `i` starts with byte `i + 1`
    /// (wrapping past 255 back to 1).
    pub fn aac_frames(self, count: usize) -> Self {
        (0..count).fold(self, |builder, i| {
            builder.aac_frame(i as u32 * 23, &[Self::frame_marker(i), 0x21, 0x10])
        })
    }

    /// First payload byte of the `i`th frame written by `aac_frames`
    pub fn frame_marker(i: usize) -> u8 {
        (i % 255) as u8 + 1
    }

    pub fn mp3_frame(self, timestamp_ms: u32, data: &[u8]) -> Self {
        self.tag(TAG_AUDIO, timestamp_ms, &[&[Self::MP3_FLAGS], data])
    }

    pub fn avc_sequence_header(self) -> Self {
        self.tag(
            TAG_VIDEO,
            0,
            &[&[0x17, AVC_SEQUENCE_HEADER, 0, 0, 0], Self::AVC_CONFIG],
        )
    }

    pub fn avc_frame(self, timestamp_ms: u32, key: bool, composition_ms: i32, data: &[u8]) -> Self {
        let flags = if key { 0x17 } else { 0x27 };
        let cts = composition_ms.to_be_bytes();
        self.tag(
            TAG_VIDEO,
            timestamp_ms,
            &[&[flags, AVC_NALU, cts[1], cts[2], cts[3]], data],
        )
    }

    /// A tag with an arbitrary type byte and body
    pub fn raw_tag(self, tag_type: u8, timestamp_ms: u32, body: &[u8]) -> Self {
        self.tag(tag_type, timestamp_ms, &[body])
    }

    pub fn build(self) -> Vec<u8> {
        self.buf.to_vec()
    }

    fn tag(mut self, tag_type: u8, timestamp_ms: u32, body: &[&[u8]]) -> Self {
        encode_tag(&mut self.buf, tag_type, timestamp_ms, body);
        self
    }
}

/// In-process transcoder.
///
/// Demuxes the FLV it is fed and emits one 640-byte frame per audio packet,
/// filled with the packet's first payload byte. Output ends when the input
/// does.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTranscoder {
    starts: Arc<AtomicUsize>,
    terminated: Arc<AtomicBool>,
    /// Ignore the input closing and keep running until killed
    linger: bool,
    /// Exit at once, before reading any input
    exit_on_start: bool,
}

impl ScriptedTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transcoder that never exits on its own
    pub fn lingering() -> Self {
        Self {
            linger: true,
            ..Self::default()
        }
    }

    /// A transcoder that exits as soon as it is started, closing its input
    pub fn exiting_on_start() -> Self {
        Self {
            exit_on_start: true,
            ..Self::default()
        }
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// The process was reaped by the pipeline
    pub fn terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

impl Transcoder for ScriptedTranscoder {
    fn start(&self) -> Result<TranscoderProcess> {
        self.starts.fetch_add(1, Ordering::SeqCst);

        let (input, input_reader) = tokio::io::duplex(PIPE_CAPACITY);
        let (output_writer, output) = tokio::io::duplex(PIPE_CAPACITY);
        let linger = self.linger;
        let task = if self.exit_on_start {
            drop(input_reader);
            tokio::spawn(async move { drop(output_writer) })
        } else {
            tokio::spawn(async move {
                decode(input_reader, output_writer, linger).await;
            })
        };

        Ok(TranscoderProcess::new(
            Box::new(input),
            Box::new(output),
            Box::new(ScriptedControl {
                task: Some(task),
                terminated: self.terminated.clone(),
            }),
        ))
    }
}

async fn decode(input: DuplexStream, mut output: DuplexStream, linger: bool) {
    if let Ok(mut demuxer) = FlvDemuxer::open(input).await {
        while let Ok(Some(packet)) = demuxer.read_packet().await {
            let marker = packet.data.first().copied().unwrap_or(0);
            if output.write_all(&[marker; FRAME_BYTES]).await.is_err() {
                return;
            }
        }
    }
    if linger {
        std::future::pending::<()>().await;
    }
}

struct ScriptedControl {
    task: Option<JoinHandle<()>>,
    terminated: Arc<AtomicBool>,
}

#[async_trait]
impl ProcessControl for ScriptedControl {
    fn id(&self) -> Option<u32> {
        None
    }

    async fn wait(&mut self) -> std::io::Result<ProcessExit> {
        let killed = match self.task.as_mut() {
            Some(task) => {
                let joined = task.await;
                self.task = None;
                joined.is_err()
            }
            None => false,
        };
        self.terminated.store(true, Ordering::SeqCst);
        Ok(ProcessExit {
            code: if killed { None } else { Some(0) },
            killed,
        })
    }

    fn start_kill(&mut self) -> std::io::Result<()> {
        if let Some(task) = &self.task {
            task.abort();
        }
        Ok(())
    }
}

/// Forwarder that keeps every frame it receives
#[derive(Debug, Clone, Default)]
pub struct RecordingForwarder {
    frames: Arc<Mutex<Vec<AudioFrame>>>,
    fail_after: Option<usize>,
}

impl RecordingForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `count` frames, then fail every call with a transport error
    pub fn fail_after(count: usize) -> Self {
        Self {
            fail_after: Some(count),
            ..Self::default()
        }
    }

    pub fn frames(&self) -> Vec<AudioFrame> {
        self.frames.lock().unwrap().clone()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub fn sequences(&self) -> Vec<u64> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .map(|f| f.sequence)
            .collect()
    }
}

#[async_trait]
impl FrameForwarder for RecordingForwarder {
    async fn forward(&mut self, frame: &AudioFrame) -> std::result::Result<(), ForwardError> {
        let mut frames = self.frames.lock().unwrap();
        if self.fail_after.is_some_and(|limit| frames.len() >= limit) {
            return Err(ForwardError::Rejected("uplink rejected frame".to_string()));
        }
        frames.push(frame.clone());
        Ok(())
    }
}

impl ForwarderFactory for RecordingForwarder {
    fn create(&self, _connection: &ConnectionInfo) -> Box<dyn FrameForwarder> {
        Box::new(self.clone())
    }
}

/// Write `data` in small pieces, stopping quietly if the reader goes away
pub async fn feed<W: AsyncWrite + Unpin>(writer: &mut W, data: &[u8]) -> bool {
    for chunk in data.chunks(512) {
        if writer.write_all(chunk).await.is_err() {
            return false;
        }
    }
    true
}

/// True once the reading half of a duplex has been dropped
pub async fn peer_closed<W: AsyncWrite + Unpin>(writer: &mut W) -> bool {
    writer.write_all(&[0u8; 16]).await.is_err()
}
