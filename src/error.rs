//! Error types for voxpilot

use std::time::Duration;

use thiserror::Error;

/// Result type alias for voxpilot operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in voxpilot
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio capture error (recorder process)
    #[error("audio error: {0}")]
    Audio(String),

    /// Audio playback error (player process)
    #[error("playback error: {0}")]
    Playback(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Speech/LLM session connectivity error
    #[error("session error: {0}")]
    Session(String),

    /// No connected session is available
    #[error("not connected to the speech service")]
    NotConnected,

    /// A turn is already awaiting its response
    #[error("a turn is already in flight")]
    TurnInFlight,

    /// Turn completed without any response before the deadline
    #[error("turn timed out after {0:?} with no response")]
    TurnTimeout(Duration),

    /// Turn was abandoned (interrupt, disconnect)
    #[error("turn cancelled")]
    TurnCancelled,

    /// Workspace / file-context error
    #[error("workspace error: {0}")]
    Workspace(String),

    /// WebSocket transport error
    #[error("websocket error: {0}")]
    WebSocket(String),

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
