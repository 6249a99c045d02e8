//! The two concurrently running stages of a connection

use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, Result};
use crate::flv::{AudioRemuxer, FlvDemuxer};
use crate::frames::{FrameChunker, FrameForwarder};
use crate::transcode::{ByteSink, ByteSource};

/// Publisher packets -> re-muxer -> transcoder input
pub struct PacketRelay<R> {
    pub demuxer: FlvDemuxer<R>,
    pub muxer: AudioRemuxer<ByteSink>,
    pub packets_read: u64,
}

impl<R: AsyncRead + Unpin> PacketRelay<R> {
    pub fn new(demuxer: FlvDemuxer<R>, muxer: AudioRemuxer<ByteSink>) -> Self {
        Self {
            demuxer,
            muxer,
            packets_read: 0,
        }
    }

    /// Relay until the publisher ends, an I/O fault, or `stop`.
    ///
    /// The relay is handed back so teardown can finish the re-muxer and close
    /// the publisher. On a clean publisher end the transcoder input has
    /// already been finalized and closed.
    pub async fn run(mut self, stop: CancellationToken) -> (Self, Result<()>) {
        let result = self.pump(&stop).await;
        (self, result)
    }

    async fn pump(&mut self, stop: &CancellationToken) -> Result<()> {
        loop {
            if stop.is_cancelled() {
                return Err(PipelineError::Canceled);
            }

            let packet = self
                .demuxer
                .read_packet()
                .await
                .map_err(PipelineError::StreamRead)?;

            let Some(packet) = packet else {
                tracing::info!(
                    "Publisher stream ended after {} packets ({} relayed)",
                    self.packets_read,
                    self.muxer.packets_written()
                );
                if let Err(e) = self.muxer.finish().await {
                    tracing::warn!("Failed to finalize transcoder input: {}", e);
                }
                return Ok(());
            };

            self.packets_read += 1;
            self.muxer
                .write_packet(&packet)
                .await
                .map_err(PipelineError::StreamWrite)?;
        }
    }
}

/// What the frame relay did before it stopped
#[derive(Debug)]
pub struct FrameRelayReport {
    pub frames_forwarded: u64,
    pub result: Result<()>,
}

/// Transcoder output -> 640-byte frames -> downstream forwarder
pub struct FrameRelay {
    chunker: FrameChunker<ByteSource>,
    forwarder: Box<dyn FrameForwarder>,
}

impl FrameRelay {
    pub fn new(output: ByteSource, forwarder: Box<dyn FrameForwarder>) -> Self {
        Self {
            chunker: FrameChunker::new(output),
            forwarder,
        }
    }

    /// Forward frames in order until the output ends, a failure, or `stop`.
    /// The transcoder output is closed when this returns.
    pub async fn run(mut self, stop: CancellationToken) -> FrameRelayReport {
        let mut frames_forwarded = 0;
        let result = loop {
            if stop.is_cancelled() {
                break Err(PipelineError::Canceled);
            }

            match self.chunker.next_frame().await {
                Ok(Some(frame)) => {
                    if let Err(e) = self.forwarder.forward(&frame).await {
                        break Err(PipelineError::Forward(e));
                    }
                    frames_forwarded += 1;
                }
                Ok(None) => break Ok(()),
                Err(PipelineError::ShortRead { remaining }) => {
                    tracing::debug!(
                        "Discarding {} trailing bytes of transcoder output after {} frames",
                        remaining,
                        self.chunker.frames_read()
                    );
                    break Ok(());
                }
                Err(e) => break Err(e),
            }
        };

        FrameRelayReport {
            frames_forwarded,
            result,
        }
    }
}
