//! Error types for the voice command engine

use std::time::Duration;

use thiserror::Error;

use crate::voice::Phase;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice command engine
#[derive(Debug, Error)]
pub enum Error {
    /// Microphone access was not granted
    #[error("microphone permission denied")]
    PermissionDenied,

    /// A capture is already running on the microphone
    #[error("audio device busy: a capture is already active")]
    DeviceBusy,

    /// No API key configured for an external service
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),

    /// Transport failure talking to an external service
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// External service answered with a non-success status
    #[error("service error {status}: {body}")]
    Service {
        /// HTTP status code returned by the service
        status: u16,
        /// Response body, for diagnostics
        body: String,
    },

    /// Transcription service returned no usable text
    #[error("transcription returned no text")]
    EmptyResult,

    /// External call exceeded its time budget
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Spoken name did not resolve to any lexicon entry
    #[error("no match for \"{0}\"")]
    NoMatch(String),

    /// Operation ignored because another one is in flight
    #[error("{operation} rejected while {phase}")]
    ReentrancyRejected {
        /// Operation that was attempted
        operation: &'static str,
        /// Phase the session was in at the time
        phase: Phase,
    },

    /// Text-to-speech playback failed
    #[error("speech playback error: {0}")]
    SpeechPlayback(String),

    /// Audio device or encoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech synthesis error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Chat backend error
    #[error("backend error: {0}")]
    Backend(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// User-facing category of an error
///
/// Decides how the engine reacts: speak an explanation, stay silent, or
/// disable capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Capture disabled until access is granted again
    PermissionDenied,
    /// Apologize and resume listening
    TranscriptionFailed,
    /// Say the name was not found and resume listening
    NoMatch,
    /// Ignore silently, log only
    ReentrancyRejected,
    /// Treat as if speech had completed
    SpeechPlaybackError,
    /// Anything else (device, config, io)
    Internal,
}

impl Error {
    /// Category used to pick the user-facing reaction
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::PermissionDenied => ErrorKind::PermissionDenied,
            Self::MissingCredential(_)
            | Self::Network(_)
            | Self::Service { .. }
            | Self::EmptyResult
            | Self::Timeout(_) => ErrorKind::TranscriptionFailed,
            Self::NoMatch(_) => ErrorKind::NoMatch,
            Self::ReentrancyRejected { .. } => ErrorKind::ReentrancyRejected,
            Self::SpeechPlayback(_) | Self::Tts(_) => ErrorKind::SpeechPlaybackError,
            Self::DeviceBusy
            | Self::Audio(_)
            | Self::Config(_)
            | Self::Backend(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Toml(_) => ErrorKind::Internal,
        }
    }

    /// Whether the engine can carry on after this error
    ///
    /// Only a permission denial stops capture; everything else ends in a
    /// spoken message or a silent resume.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::PermissionDenied)
    }
}
