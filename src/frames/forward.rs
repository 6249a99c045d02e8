//! Downstream delivery of audio frames

use async_trait::async_trait;

use crate::error::ForwardError;
use crate::pipeline::ConnectionInfo;

use super::{AudioFrame, FRAME_BYTES};

/// Delivers frames to the speech/translation consumer, one call per frame
#[async_trait]
pub trait FrameForwarder: Send {
    async fn forward(&mut self, frame: &AudioFrame) -> Result<(), ForwardError>;
}

/// Creates one forwarder per connection
pub trait ForwarderFactory: Send + Sync {
    fn create(&self, connection: &ConnectionInfo) -> Box<dyn FrameForwarder>;
}

/// Forwarder that only records frames in the log.
///
/// Stands in for the uplink to the translation service, which lives outside
/// this process. Like the uplink it only accepts whole 640-byte frames.
pub struct LoggingForwarder {
    connection: String,
    frames: u64,
}

impl LoggingForwarder {
    pub fn new(connection: impl Into<String>) -> Self {
        Self {
            connection: connection.into(),
            frames: 0,
        }
    }

    pub fn frames_forwarded(&self) -> u64 {
        self.frames
    }
}

#[async_trait]
impl FrameForwarder for LoggingForwarder {
    async fn forward(&mut self, frame: &AudioFrame) -> Result<(), ForwardError> {
        if frame.data.len() != FRAME_BYTES {
            return Err(ForwardError::Rejected(format!(
                "frame {} has {} bytes, expected {}",
                frame.sequence,
                frame.data.len(),
                FRAME_BYTES
            )));
        }
        self.frames += 1;
        tracing::debug!(
            conn = %self.connection,
            seq = frame.sequence,
            peak = frame.peak(),
            "Forwarding audio frame"
        );
        Ok(())
    }
}

impl Drop for LoggingForwarder {
    fn drop(&mut self) {
        tracing::debug!(
            conn = %self.connection,
            "Forwarder closed after {} frames",
            self.frames_forwarded()
        );
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingForwarderFactory;

impl ForwarderFactory for LoggingForwarderFactory {
    fn create(&self, connection: &ConnectionInfo) -> Box<dyn FrameForwarder> {
        Box::new(LoggingForwarder::new(connection.id.to_string()))
    }
}
