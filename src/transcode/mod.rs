//! Transcoder process adapter
//!
//! This module handles:
//! - The `Transcoder` seam used by the pipeline supervisor
//! - Launching ffmpeg as an external decode/resample stage
//! - Bounded, idempotent teardown of the running process

pub mod ffmpeg;

pub use ffmpeg::FfmpegTranscoder;

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// Byte sink feeding the transcoder's input
pub type ByteSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Byte source carrying the transcoder's decoded output
pub type ByteSource = Box<dyn AsyncRead + Send + Unpin>;

/// How a transcoder process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: Option<i32>,
    /// The process had to be killed after the grace period
    pub killed: bool,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.code == Some(0) && !self.killed
    }
}

/// Lifecycle control over a running transcoder
#[async_trait]
pub trait ProcessControl: Send {
    /// OS process id, if there is one
    fn id(&self) -> Option<u32>;

    /// Wait for the process to exit
    async fn wait(&mut self) -> std::io::Result<ProcessExit>;

    /// Ask the process to terminate without waiting for it
    fn start_kill(&mut self) -> std::io::Result<()>;
}

/// Something that can start one transcoder per connection
pub trait Transcoder: Send + Sync {
    fn start(&self) -> Result<TranscoderProcess>;
}

/// A started transcoder: its two pipes plus process control
pub struct TranscoderProcess {
    input: ByteSink,
    output: ByteSource,
    control: Box<dyn ProcessControl>,
}

impl TranscoderProcess {
    pub fn new(input: ByteSink, output: ByteSource, control: Box<dyn ProcessControl>) -> Self {
        Self {
            input,
            output,
            control,
        }
    }

    /// Split into input sink, output source and teardown handle
    pub fn into_parts(self) -> (ByteSink, ByteSource, TranscoderHandle) {
        (
            self.input,
            self.output,
            TranscoderHandle {
                control: self.control,
                exit: None,
                released: false,
            },
        )
    }
}

/// Teardown handle for a transcoder process
pub struct TranscoderHandle {
    control: Box<dyn ProcessControl>,
    exit: Option<ProcessExit>,
    released: bool,
}

impl TranscoderHandle {
    /// Wait for the process to exit, killing it if it outlives `grace`.
    ///
    /// Only the first call touches the process; later calls return the
    /// recorded exit. The exit status is logged and otherwise ignored.
    pub async fn shutdown(&mut self, grace: Duration) -> Option<ProcessExit> {
        if self.released {
            return self.exit;
        }
        self.released = true;

        let pid = self.control.id();
        let result = match tokio::time::timeout(grace, self.control.wait()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    "Transcoder pid={:?} still running after {:?}, killing",
                    pid,
                    grace
                );
                if let Err(e) = self.control.start_kill() {
                    tracing::warn!("Failed to kill transcoder pid={:?}: {}", pid, e);
                }
                self.control.wait().await.map(|exit| ProcessExit {
                    killed: true,
                    ..exit
                })
            }
        };

        match result {
            Ok(exit) if exit.success() => {
                tracing::info!("Transcoder pid={:?} exited cleanly", pid);
                self.exit = Some(exit);
            }
            Ok(exit) => {
                tracing::warn!(
                    "Transcoder pid={:?} exited abnormally: code={:?}, killed={}",
                    pid,
                    exit.code,
                    exit.killed
                );
                self.exit = Some(exit);
            }
            Err(e) => {
                tracing::warn!("Failed to reap transcoder pid={:?}: {}", pid, e);
            }
        }
        self.exit
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}
