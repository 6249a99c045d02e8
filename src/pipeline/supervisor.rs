//! Pipeline supervisor - one run of the state machine per connection

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::error::PipelineError;
use crate::flv::{select_audio_tracks, AudioRemuxer, FlvDemuxer};
use crate::frames::ForwarderFactory;
use crate::transcode::Transcoder;

use super::relay::{FrameRelay, FrameRelayReport, PacketRelay};
use super::{Connection, PipelineOutcome, PipelineState};

/// Upper bound for each teardown wait (stage join, process exit)
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs the capture-and-transcode pipeline for publisher connections
pub struct PipelineSupervisor {
    transcoder: Arc<dyn Transcoder>,
    forwarders: Arc<dyn ForwarderFactory>,
    drain_timeout: Duration,
}

/// Per-connection bookkeeping for state transitions and the final log line
struct Session {
    state: PipelineState,
    started: Instant,
    packets: u64,
    frames: u64,
}

impl Session {
    fn new() -> Self {
        Self {
            state: PipelineState::Idle,
            started: Instant::now(),
            packets: 0,
            frames: 0,
        }
    }

    fn enter(&mut self, next: PipelineState) {
        tracing::debug!("Pipeline state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Move to `Closed` and log the outcome. Called exactly once per connection.
    fn close(mut self, outcome: PipelineOutcome) -> PipelineOutcome {
        self.enter(PipelineState::Closed);
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        match outcome.error() {
            Some(err) => tracing::error!(
                packets = self.packets,
                frames = self.frames,
                elapsed_ms,
                "Pipeline stopped: {}",
                err
            ),
            None => tracing::info!(
                packets = self.packets,
                frames = self.frames,
                elapsed_ms,
                "Pipeline stopped: {}",
                outcome
            ),
        }
        outcome
    }
}

impl PipelineSupervisor {
    pub fn new(transcoder: Arc<dyn Transcoder>, forwarders: Arc<dyn ForwarderFactory>) -> Self {
        Self {
            transcoder,
            forwarders,
            drain_timeout: DRAIN_TIMEOUT,
        }
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Process one publisher connection from handshake to close
    pub async fn handle<S>(&self, connection: Connection<S>) -> PipelineOutcome
    where
        S: AsyncRead + Send + Unpin + 'static,
    {
        let span = tracing::info_span!(
            "publish",
            conn = %connection.info.id,
            peer = %connection.info.peer
        );
        self.run(connection).instrument(span).await
    }

    async fn run<S>(&self, connection: Connection<S>) -> PipelineOutcome
    where
        S: AsyncRead + Send + Unpin + 'static,
    {
        let Connection {
            info,
            stream,
            cancel,
        } = connection;
        let mut session = Session::new();

        // ── Negotiating ─────────────────────────────────────────────────────
        session.enter(PipelineState::Negotiating);

        let demuxer = match FlvDemuxer::open(stream).await {
            Ok(demuxer) => demuxer,
            Err(e) => {
                return session.close(PipelineOutcome::Failed(PipelineError::Handshake(e)));
            }
        };
        let header = demuxer.header();
        tracing::info!(
            has_audio = header.has_audio,
            has_video = header.has_video,
            "Publisher tracks: {}",
            demuxer
                .tracks()
                .iter()
                .map(|t| format!("#{} {:?}/{}", t.index, t.kind, t.codec))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let audio = match select_audio_tracks(demuxer.tracks()) {
            Ok(audio) => audio,
            Err(e) => return session.close(PipelineOutcome::Failed(e)),
        };

        let process = match self.transcoder.start() {
            Ok(process) => process,
            Err(e) => return session.close(PipelineOutcome::Failed(e)),
        };
        let (input, output, mut transcoder) = process.into_parts();

        let mut muxer = AudioRemuxer::new(input);
        if let Err(e) = muxer.write_header(&audio).await {
            session.enter(PipelineState::Draining);
            drop(muxer);
            drop(output);
            transcoder.shutdown(self.drain_timeout).await;
            drop(demuxer);
            return session.close(PipelineOutcome::Failed(PipelineError::StreamWrite(e)));
        }

        // ── Streaming ───────────────────────────────────────────────────────
        session.enter(PipelineState::Streaming);

        let stop = cancel.child_token();
        let forwarder = self.forwarders.create(&info);
        let mut packet_task = tokio::spawn(
            PacketRelay::new(demuxer, muxer)
                .run(stop.clone())
                .in_current_span(),
        );
        let mut frame_task = tokio::spawn(
            FrameRelay::new(output, forwarder)
                .run(stop.clone())
                .in_current_span(),
        );

        let mut packet_relay: Option<PacketRelay<S>> = None;
        let mut packet_joined = false;
        let mut frame_joined = false;

        let outcome = loop {
            tokio::select! {
                // A forwarding failure can make the transcoder exit and the
                // packet relay fail right after; report the cause, not the echo.
                biased;

                joined = &mut frame_task, if !frame_joined => {
                    frame_joined = true;
                    break match joined {
                        Ok(report) => {
                            session.frames = report.frames_forwarded;
                            match report.result {
                                Ok(()) => PipelineOutcome::EndOfStream,
                                Err(e) => PipelineOutcome::from_error(e),
                            }
                        }
                        Err(e) => PipelineOutcome::Failed(PipelineError::Task(e.to_string())),
                    };
                }
                joined = &mut packet_task, if !packet_joined => {
                    packet_joined = true;
                    match joined {
                        Ok((relay, Ok(()))) => {
                            // Input is closed; keep going until the transcoder drains.
                            session.packets = relay.packets_read;
                            packet_relay = Some(relay);
                        }
                        Ok((relay, Err(e))) => {
                            session.packets = relay.packets_read;
                            packet_relay = Some(relay);
                            break PipelineOutcome::from_error(e);
                        }
                        Err(e) => {
                            break PipelineOutcome::Failed(PipelineError::Task(e.to_string()));
                        }
                    }
                }
                _ = cancel.cancelled() => break PipelineOutcome::Canceled,
            }
        };

        // ── Draining ────────────────────────────────────────────────────────
        session.enter(PipelineState::Draining);
        stop.cancel();

        if !packet_joined {
            if let Some((relay, result)) = self.join_within(packet_task, "Packet relay").await {
                if let Err(e) = result {
                    tracing::debug!("Packet relay stopped: {}", e);
                }
                session.packets = relay.packets_read;
                packet_relay = Some(relay);
            }
        }

        if let Some(relay) = packet_relay {
            let PacketRelay {
                demuxer, mut muxer, ..
            } = relay;
            if !muxer.is_finished() {
                if let Err(e) = muxer.finish().await {
                    tracing::debug!("Ignoring transcoder input close error: {}", e);
                }
            }
            drop(muxer);
            drop(demuxer.into_inner());
            tracing::debug!("Publisher connection closed");
        }

        if !frame_joined {
            if let Some(report) = self.join_within(frame_task, "Frame relay").await {
                let FrameRelayReport {
                    frames_forwarded,
                    result,
                } = report;
                if let Err(e) = result {
                    tracing::debug!("Frame relay stopped: {}", e);
                }
                session.frames = frames_forwarded;
            }
        }

        transcoder.shutdown(self.drain_timeout).await;

        session.close(outcome)
    }

    /// Wait for a stage to stop, aborting it after the drain window. Aborting
    /// drops the stage and with it every pipe and stream it owns.
    async fn join_within<T>(&self, mut task: JoinHandle<T>, stage: &str) -> Option<T> {
        match tokio::time::timeout(self.drain_timeout, &mut task).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                tracing::warn!("{} task failed: {}", stage, e);
                None
            }
            Err(_) => {
                tracing::warn!(
                    "{} did not stop within {:?}, aborting",
                    stage,
                    self.drain_timeout
                );
                task.abort();
                match task.await {
                    Ok(value) => Some(value),
                    Err(_) => None,
                }
            }
        }
    }
}
