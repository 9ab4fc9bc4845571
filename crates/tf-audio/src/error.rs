//! Audio backend errors

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while setting up or feeding an audio backend
///
/// None of these ever crosses into a scheduler loop: sinks swallow playback
/// failures at the call site, and construction failures degrade to a silent
/// backend.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no audio output device available")]
    NoDevice,

    #[error("unsupported output configuration: {0}")]
    ConfigError(String),

    #[error("failed to build audio stream: {0}")]
    StreamBuildError(String),

    #[error("audio stream error: {0}")]
    StreamError(String),

    #[error("cached click asset {0} does not match the active format")]
    StaleClickAsset(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;
