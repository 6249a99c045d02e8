//! Per-connection audio capture pipeline
//!
//! A publisher connection is negotiated, then two stages run side by side:
//! the packet relay (demuxer -> re-muxer -> transcoder stdin) and the frame
//! relay (transcoder stdout -> frame chunker -> forwarder). The supervisor
//! takes the first terminal signal as the outcome and always tears down.

pub mod relay;
pub mod supervisor;

pub use supervisor::{PipelineSupervisor, DRAIN_TIMEOUT};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::PipelineError;

/// Identity of one publisher session
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: Uuid,
    pub peer: String,
    pub connected_at: DateTime<Utc>,
}

impl ConnectionInfo {
    pub fn new(peer: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer: peer.into(),
            connected_at: Utc::now(),
        }
    }
}

/// A live publisher session handed to the supervisor
pub struct Connection<S> {
    pub info: ConnectionInfo,
    /// The publisher's FLV stream
    pub stream: S,
    /// Cancelled on process shutdown or explicit stop
    pub cancel: CancellationToken,
}

impl<S> Connection<S> {
    pub fn new(peer: impl Into<String>, stream: S, cancel: CancellationToken) -> Self {
        Self {
            info: ConnectionInfo::new(peer),
            stream,
            cancel,
        }
    }
}

/// Supervisor state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Negotiating,
    Streaming,
    Draining,
    Closed,
}

/// Terminal result of one connection
#[derive(Debug)]
pub enum PipelineOutcome {
    /// The transcoder output ended and every full frame was forwarded
    EndOfStream,
    /// Stopped from outside before any failure
    Canceled,
    Failed(PipelineError),
}

impl PipelineOutcome {
    /// Classify the error that ended a stage
    pub fn from_error(err: PipelineError) -> Self {
        match err {
            PipelineError::Canceled => PipelineOutcome::Canceled,
            PipelineError::ShortRead { .. } => PipelineOutcome::EndOfStream,
            other => PipelineOutcome::Failed(other),
        }
    }

    pub fn error(&self) -> Option<&PipelineError> {
        match self {
            PipelineOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}

impl std::fmt::Display for PipelineOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineOutcome::EndOfStream => f.write_str("end of stream"),
            PipelineOutcome::Canceled => f.write_str("canceled"),
            PipelineOutcome::Failed(err) => write!(f, "failed: {}", err),
        }
    }
}
