//! Error types for the Zoul voice pipeline

use thiserror::Error;

/// Result type alias for Zoul operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// The platform offers no speech-capture capability
    #[error("speech capture unsupported: {0}")]
    CaptureUnsupported(String),

    /// Another capture session already holds the audio input
    #[error("audio input busy")]
    CaptureBusy,

    /// Microphone access was denied or revoked
    #[error("microphone permission denied")]
    PermissionDenied,

    /// Capture ended without any speech
    #[error("no speech detected")]
    NoSpeechDetected,

    /// Capture was cancelled by the caller
    #[error("capture aborted")]
    Aborted,

    /// Capture failed in a way that may succeed on retry
    #[error("transient capture error: {0}")]
    TransientCapture(String),

    /// Completion or synthesis service failure (transport, HTTP status, malformed body)
    #[error("remote service error: {0}")]
    RemoteService(String),

    /// Synthesized audio could not be decoded
    #[error("audio decode error: {0}")]
    Decode(String),

    /// Invariant violation inside the pipeline
    #[error("internal state error: {0}")]
    InternalState(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Local system voice error
    #[error("local voice error: {0}")]
    LocalVoice(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether the capture layer may retry after this error
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientCapture(_) | Self::CaptureBusy)
    }

    /// Errors that end a capture attempt without being a fault
    #[must_use]
    pub const fn is_non_fatal(&self) -> bool {
        matches!(self, Self::NoSpeechDetected | Self::Aborted)
    }
}
