//! Error types for the kirana voice client.

/// Top-level error type for the voice session stack.
#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    /// Microphone access was refused or the capture stream could not be
    /// opened. Fatal to session start; never retried automatically.
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// Audio device or stream error (capture or playback).
    #[error("audio error: {0}")]
    Audio(String),

    /// WebSocket connection or protocol error.
    #[error("transport error: {0}")]
    Transport(String),

    /// The engine did not acknowledge session setup within the connect timeout.
    #[error("connect timed out after {0} ms")]
    ConnectTimeout(u64),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Tool dispatch error.
    #[error("tool error: {0}")]
    Tool(String),

    /// Session lifecycle error (double connect, use after close).
    #[error("session error: {0}")]
    Session(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, VoiceError>;
