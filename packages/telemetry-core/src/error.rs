// Error taxonomy for the telemetry core
//
// Configuration and contract errors are returned to the caller immediately.
// Per-line and per-field problems never surface here; the reader loop logs
// and counts them instead.

use thiserror::Error;

/// Result type for telemetry operations
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Errors that can occur while ingesting, decimating or fanning out samples
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Length mismatch: {timestamps} timestamps vs {values} values")]
    LengthMismatch { timestamps: usize, values: usize },

    #[error("Index {index} out of range for buffer of size {size}")]
    IndexOutOfRange { index: isize, size: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Writer error: {0}")]
    Writer(String),

    #[error("Recorder backlog full: {pending} chunks awaiting write")]
    RecorderBackpressure { pending: usize },

    #[error("Pipeline stalled: {retained} tapped samples held back by recorder backpressure")]
    PipelineStalled { retained: usize },

    #[error("Session already running")]
    AlreadyRunning,

    #[error("Channel closed")]
    ChannelClosed,
}

impl TelemetryError {
    /// Shorthand for configuration errors built from a formatted message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

impl From<serde_json::Error> for TelemetryError {
    fn from(err: serde_json::Error) -> Self {
        TelemetryError::Parse(err.to_string())
    }
}
