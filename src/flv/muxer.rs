//! Audio-only FLV re-muxer
//!
//! Repackages the publisher's audio tracks into a fresh FLV stream without
//! touching the coded payload. The output feeds the transcoder's stdin, so
//! every tag is written and flushed as soon as it is built.

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{PipelineError, Result};
use crate::types::{MediaPacket, Track};

use super::codec::CodecId;
use super::{encode_tag, FileHeader, AAC_RAW, AAC_SEQUENCE_HEADER, TAG_AUDIO};

/// Pick every audio track, in publisher order
pub fn select_audio_tracks(tracks: &[Track]) -> Result<Vec<Track>> {
    let audio: Vec<Track> = tracks
        .iter()
        .filter(|t| t.kind.is_audio())
        .cloned()
        .collect();
    if audio.is_empty() {
        return Err(PipelineError::NoAudioTrack);
    }
    Ok(audio)
}

/// FLV writer restricted to audio tracks
pub struct AudioRemuxer<W> {
    writer: W,
    tracks: Vec<Track>,
    buf: BytesMut,
    packets_written: u64,
    finished: bool,
}

impl<W: AsyncWrite + Unpin> AudioRemuxer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            tracks: Vec::new(),
            buf: BytesMut::with_capacity(4096),
            packets_written: 0,
            finished: false,
        }
    }

    /// Write the FLV header and the codec configuration of every track
    pub async fn write_header(&mut self, tracks: &[Track]) -> std::io::Result<()> {
        if let Some(track) = tracks.iter().find(|t| !t.kind.is_audio()) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("track #{} is not an audio track", track.index),
            ));
        }
        self.tracks = tracks.to_vec();

        self.buf.clear();
        FileHeader {
            has_audio: true,
            has_video: false,
        }
        .encode(&mut self.buf);

        for track in &self.tracks {
            if track.config.is_empty() {
                continue;
            }
            if track.codec == CodecId::Aac {
                encode_tag(
                    &mut self.buf,
                    TAG_AUDIO,
                    0,
                    &[&[track.flv_flags, AAC_SEQUENCE_HEADER], &track.config],
                );
            } else {
                encode_tag(&mut self.buf, TAG_AUDIO, 0, &[&[track.flv_flags], &track.config]);
            }
        }

        self.flush_buf().await?;
        tracing::debug!(
            "Wrote FLV header for {} audio track(s): {}",
            self.tracks.len(),
            self.tracks
                .iter()
                .map(|t| t.codec.name())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(())
    }

    /// Write one packet. Returns `false` if the packet belongs to a track that
    /// was not selected and has been dropped.
    pub async fn write_packet(&mut self, packet: &MediaPacket) -> std::io::Result<bool> {
        let Some(track) = self.tracks.iter().find(|t| t.index == packet.track) else {
            return Ok(false);
        };

        self.buf.clear();
        if track.codec == CodecId::Aac {
            encode_tag(
                &mut self.buf,
                TAG_AUDIO,
                packet.dts_ms,
                &[&[track.flv_flags, AAC_RAW], &packet.data],
            );
        } else {
            encode_tag(
                &mut self.buf,
                TAG_AUDIO,
                packet.dts_ms,
                &[&[track.flv_flags], &packet.data],
            );
        }

        self.flush_buf().await?;
        self.packets_written += 1;
        Ok(true)
    }

    /// FLV has no trailer bytes; finalizing only flushes the sink.
    pub async fn write_trailer(&mut self) -> std::io::Result<()> {
        self.writer.flush().await
    }

    /// Write the trailer and close the sink. Only the first call does any work.
    pub async fn finish(&mut self) -> std::io::Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let trailer = self.write_trailer().await;
        let shutdown = self.writer.shutdown().await;
        trailer.and(shutdown)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn packets_written(&self) -> u64 {
        self.packets_written
    }

    async fn flush_buf(&mut self) -> std::io::Result<()> {
        self.writer.write_all(&self.buf).await?;
        self.writer.flush().await
    }
}
