//! Error types for the speech I/O subsystem

use thiserror::Error;

/// Result type alias for speech operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while speaking or listening
///
/// Errors are `Clone` because a single failed synthesis request is
/// delivered to every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Timeout, transport failure, non-2xx status or empty body
    #[error("network error: {0}")]
    Network(String),

    /// Hardware audio resource could not be activated or was revoked
    #[error("audio unavailable: {0}")]
    AudioUnavailable(String),

    /// Hardware audio resource is held by a protected announcement
    #[error("audio resource busy: {0}")]
    ResourceBusy(String),

    /// Malformed audio payload
    #[error("decode error: {0}")]
    Decode(String),

    /// Platform recognizer failure
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Request canceled by `cancel_all`
    #[error("request canceled")]
    Canceled,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the error means the audio hardware could not be used
    #[must_use]
    pub const fn is_availability(&self) -> bool {
        matches!(self, Self::AudioUnavailable(_) | Self::ResourceBusy(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Network(format!("request timed out: {e}"))
        } else {
            Self::Network(e.to_string())
        }
    }
}
