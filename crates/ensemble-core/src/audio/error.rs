//! Audio device errors
//!
//! Device/context failures are the one error class surfaced to the user as
//! "cannot play": without an output stream there is no session. Loader and
//! persistence problems degrade gracefully elsewhere.

use thiserror::Error;

/// Errors from the audio device layer
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no audio output device available")]
    NoDevice,

    #[error("failed to query device configuration: {0}")]
    DeviceConfig(String),

    #[error("unsupported device sample format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to build audio stream: {0}")]
    StreamBuild(String),

    #[error("failed to start audio stream: {0}")]
    StreamPlay(String),
}

pub type AudioResult<T> = Result<T, AudioError>;
