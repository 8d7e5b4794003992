//! Speech/LLM session client
//!
//! One [`SpeechSession`] is a live streaming connection to the remote
//! conversational service. Audio goes up, transcription comes back as
//! [`SessionEvent`]s, and model responses are only observed through
//! [`SpeechSession::request_turn_completion`].

mod client;
pub mod protocol;
mod turn;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use client::{RealtimeConnector, RealtimeSession};
pub use turn::{TurnTracker, await_turn};

use crate::Result;

/// Event surfaced by a session to its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Connection established and configured
    Connected,
    /// Connection closed (remote close, transport error)
    Disconnected,
    /// Service reported an error; the connection may still be usable
    Error(String),
    /// Transcription of the user's speech
    Transcription {
        /// Finalized fragment when `is_final`, else the full interim text
        text: String,
        /// Whether `text` is finalized
        is_final: bool,
    },
}

/// A live session with the speech/LLM service
#[async_trait]
pub trait SpeechSession: Send + Sync {
    /// Stream a chunk of raw PCM audio
    ///
    /// # Errors
    ///
    /// Returns error if the session is no longer connected
    fn send_audio(&self, pcm: &[u8]) -> Result<()>;

    /// Interrupt the model: drop in-flight response state and signal the service
    ///
    /// # Errors
    ///
    /// Returns error if the session is no longer connected
    fn interrupt(&self) -> Result<()>;

    /// Replace the session instructions (workspace context changed)
    ///
    /// # Errors
    ///
    /// Returns error if the session is no longer connected
    fn send_context_update(&self, instructions: &str) -> Result<()>;

    /// End the user's turn with `text` and wait for the model's full response
    ///
    /// # Errors
    ///
    /// Returns error if not connected, a turn is already outstanding, the
    /// turn is cancelled, or it times out without any response text
    async fn request_turn_completion(&self, text: &str) -> Result<String>;

    /// Close the connection
    fn disconnect(&self);

    /// Check whether the connection is up
    fn is_connected(&self) -> bool;
}

/// Opens new sessions
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// Connect and initialize a session with `instructions`
    ///
    /// # Errors
    ///
    /// Returns error if the connection cannot be established
    async fn connect(
        &self,
        instructions: String,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Arc<dyn SpeechSession>>;
}
