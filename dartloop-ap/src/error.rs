//! Error types for dartloop-ap
//!
//! Defines module-specific error types using thiserror for clear error propagation.
//! Playback failures inside the scheduler are absorbed and logged; these
//! variants surface only at the backend seam and at startup.

use thiserror::Error;

/// Main error type for dartloop-ap
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Audio decoding errors
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Platform refused to start playback (autoplay restriction, no device)
    #[error("Playback blocked: {0}")]
    PlaybackBlocked(String),

    /// Source identifier could not be resolved by the backend
    #[error("Unknown audio source: {0}")]
    UnknownSource(String),

    /// Invalid argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Scheduler task is no longer running
    #[error("Scheduler service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Errors from shared dartloop code
    #[error(transparent)]
    Common(#[from] dartloop_common::Error),
}

/// Convenience Result type using dartloop-ap Error
pub type Result<T> = std::result::Result<T, Error>;
