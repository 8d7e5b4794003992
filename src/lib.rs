//! Voxpilot - voice-driven coding assistant sidecar for editors
//!
//! This library provides the core functionality for voxpilot:
//! - Turn coordination (dictation, send, speak, interrupt, hard stop)
//! - Audio capture and playback through OS audio subprocesses
//! - Streaming speech/LLM sessions over the Realtime API
//! - Text-to-speech for spoken replies
//! - Workspace context for the model
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              Editor UI shell (host)                  │
//! └────────────────────┬────────────────────────────────┘
//!                      │ intents / notifications (WebSocket)
//! ┌────────────────────▼────────────────────────────────┐
//! │                Turn Coordinator                      │
//! │   Context Set  │  Transcript  │  Turn state          │
//! └──┬──────────┬──────────────┬──────────────┬─────────┘
//!    │          │              │              │
//!  Capture   Playback    Realtime session    TTS
//!  (sox)    (afplay…)     (WebSocket)     (REST APIs)
//! ```

pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod host;
pub mod realtime;
pub mod voice;
pub mod workspace;

pub use config::Config;
pub use context::ContextSet;
pub use coordinator::{CoordinatorDeps, CoordinatorHandle, TurnState, UiNotification, UserIntent};
pub use error::{Error, Result};
pub use workspace::{FsWorkspace, Workspace};
