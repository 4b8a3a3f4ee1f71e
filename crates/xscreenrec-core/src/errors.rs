use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error("Capture task aborted: {reason}")]
    CaptureAborted { reason: String },
}

/// Rejected session input. Raised before any display or process exists.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Resolution must look like WIDTHxHEIGHT with positive integers, got {value:?}")]
    InvalidResolution { value: String },

    #[error("Command to record is empty")]
    EmptyCommand,

    #[error("Frame rate must be positive, got {value}")]
    InvalidFrameRate { value: u32 },

    #[error("Settings file {path} unreadable: {reason}")]
    SettingsFile { path: String, reason: String },
}

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("Display server {program} failed to start: {reason}")]
    DisplayStart { program: String, reason: String },

    #[error("Display {display} not ready after {waited_ms}ms")]
    DisplayTimeout { display: String, waited_ms: u64 },

    #[error("No free X display number in {first}..{last}")]
    NoFreeDisplay { first: u32, last: u32 },

    #[error("Failed to launch {program}: {reason}")]
    ProcessSpawn { program: String, reason: String },

    #[error("Framebuffer grab failed: {0}")]
    Grab(String),
}

#[derive(Error, Debug)]
pub enum EncodingError {
    #[error("No H.264 encoder element available")]
    EncoderUnavailable,

    #[error("GStreamer pipeline error: {0}")]
    GStreamerPipeline(String),

    #[error("Failed to write frame {index}: {reason}")]
    WriteFailed { index: u64, reason: String },

    #[error("Failed to finalize {path}: {reason}")]
    FinalizeFailed { path: String, reason: String },
}
