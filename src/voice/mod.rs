//! Voice processing module
//!
//! Handles audio capture and playback through OS audio subprocesses, and
//! text-to-speech through cloud APIs. The coordinator only sees the traits
//! defined here.

mod capture;
mod playback;
mod tts;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use capture::{AudioCapture, pcm16_rms, resolve_recorder};
pub use playback::{AudioPlayback, audio_extension, resolve_player, sine_wav};
pub use tts::{DisabledSynthesizer, TextToSpeech, synthesizer_from_config};

use crate::Result;

/// Sample rate for audio capture (24kHz, matches the Realtime API `pcm16` format)
pub const SAMPLE_RATE: u32 = 24_000;

/// Event emitted by a running capture stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// Raw mono s16le PCM, arbitrary length
    Chunk(Vec<u8>),
    /// Recorder exited cleanly without being asked to stop
    Ended,
    /// Recorder failed or exited abnormally
    Failed(String),
}

/// How a playback finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// Audio played to the end
    Completed,
    /// Playback was stopped before the end
    Stopped,
}

/// Microphone capture stream
pub trait AudioSource: Send + Sync {
    /// Start capturing, delivering events to `events` until stopped
    ///
    /// # Errors
    ///
    /// Returns error if the recorder cannot be started
    fn start(&self, events: mpsc::UnboundedSender<CaptureEvent>) -> Result<()>;

    /// Stop capturing; no further events are delivered
    fn stop(&self);

    /// Check if currently capturing
    fn is_capturing(&self) -> bool;
}

/// Speaker output
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play an encoded audio buffer to completion or until [`AudioSink::stop`]
    ///
    /// # Errors
    ///
    /// Returns error if the player fails or another playback is running
    async fn play(&self, audio: Vec<u8>) -> Result<PlaybackOutcome>;

    /// Stop the current playback, if any
    fn stop(&self);
}

/// Text-to-speech conversion
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Whether synthesis is available at all
    fn is_configured(&self) -> bool;

    /// Synthesize text, returning `None` on any failure
    async fn synthesize(&self, text: &str) -> Option<Vec<u8>>;
}
