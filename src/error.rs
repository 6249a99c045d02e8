use thiserror::Error;

/// Errors raised while handling one publisher connection
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Handshake failed: {0}")]
    Handshake(#[source] FlvError),

    #[error("No audio track found in published stream")]
    NoAudioTrack,

    #[error("Failed to start transcoder: {0}")]
    TranscoderStart(#[source] std::io::Error),

    #[error("Stream read error: {0}")]
    StreamRead(#[source] FlvError),

    #[error("Stream write error: {0}")]
    StreamWrite(#[source] std::io::Error),

    #[error("Transcoder output error: {0}")]
    TranscoderOutput(#[source] std::io::Error),

    #[error("Transcoder output ended with {remaining} trailing bytes")]
    ShortRead { remaining: usize },

    #[error("Forward error: {0}")]
    Forward(#[from] ForwardError),

    #[error("Canceled")]
    Canceled,

    #[error("Pipeline task failed: {0}")]
    Task(String),
}

/// FLV container errors
#[derive(Error, Debug)]
pub enum FlvError {
    #[error("Not an FLV stream: signature {0:02x?}")]
    BadSignature([u8; 3]),

    #[error("Unsupported FLV version: {0}")]
    UnsupportedVersion(u8),

    #[error("Invalid FLV data offset: {0}")]
    BadDataOffset(u32),

    #[error("Encrypted FLV tags are not supported")]
    Encrypted,

    #[error("Truncated {0}")]
    Truncated(&'static str),

    #[error("No media tracks found while probing")]
    NoTracks,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Downstream delivery errors
#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("Frame rejected: {0}")]
    Rejected(String),
}

/// Process-level errors (bootstrap, configuration, listener)
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging initialization failed: {0}")]
    Logging(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, PipelineError>;
