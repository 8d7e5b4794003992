//! Realtime API wire events
//!
//! Only the subset the turn protocol needs; unknown server events
//! deserialize to [`ServerEvent::Other`].

use serde::{Deserialize, Serialize};

use crate::voice::SAMPLE_RATE;

/// Event sent to the service
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Configure the session
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    /// Append base64 PCM to the input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioAppend { audio: String },

    /// End of the user's audio for this turn
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioCommit,

    /// Add an item to the conversation
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    /// Ask the model to respond
    #[serde(rename = "response.create")]
    ResponseCreate,
}

/// Session configuration; absent fields are left unchanged by the service
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<TranscriptionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,
}

impl SessionConfig {
    /// Initial configuration: text responses, streamed input transcription,
    /// responses only on explicit request
    #[must_use]
    pub fn initial(instructions: String, transcription_model: &str) -> Self {
        Self {
            modalities: Some(vec!["text".to_string()]),
            instructions: Some(instructions),
            input_audio_format: Some("pcm16".to_string()),
            input_audio_transcription: Some(TranscriptionConfig {
                model: transcription_model.to_string(),
            }),
            turn_detection: Some(TurnDetection::transcribe_only()),
        }
    }

    /// Update only the instructions
    #[must_use]
    pub fn instructions_only(instructions: String) -> Self {
        Self {
            instructions: Some(instructions),
            ..Self::default()
        }
    }
}

/// Server voice activity detection
///
/// Commits speech segments so they are transcribed while the user talks,
/// without starting or interrupting responses on its own.
#[derive(Debug, Clone, Serialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub create_response: bool,
    pub interrupt_response: bool,
}

impl TurnDetection {
    #[must_use]
    pub const fn transcribe_only() -> Self {
        Self {
            kind: "server_vad",
            create_response: false,
            interrupt_response: false,
        }
    }
}

/// Input transcription settings
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionConfig {
    pub model: String,
}

/// Conversation item (user message)
#[derive(Debug, Clone, Serialize)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub role: &'static str,
    pub content: Vec<ContentPart>,
}

impl ConversationItem {
    /// User message carrying `text`
    #[must_use]
    pub fn user_text(text: &str) -> Self {
        Self {
            kind: "message",
            role: "user",
            content: vec![ContentPart {
                kind: "input_text",
                text: text.to_string(),
            }],
        }
    }
}

/// Content of a conversation item
#[derive(Debug, Clone, Serialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

/// Event received from the service
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated,

    #[serde(rename = "session.updated")]
    SessionUpdated,

    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    TranscriptionDelta {
        #[serde(default)]
        item_id: String,
        #[serde(default)]
        delta: String,
    },

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted {
        #[serde(default)]
        item_id: String,
        #[serde(default)]
        transcript: String,
    },

    #[serde(rename = "conversation.item.input_audio_transcription.failed")]
    TranscriptionFailed {
        #[serde(default)]
        item_id: String,
        error: ApiError,
    },

    #[serde(rename = "response.created")]
    ResponseCreated {
        #[serde(default)]
        response: ResponseInfo,
    },

    #[serde(rename = "response.text.delta", alias = "response.output_text.delta")]
    ResponseTextDelta {
        #[serde(default)]
        response_id: String,
        #[serde(default)]
        delta: String,
    },

    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: Option<ResponseInfo>,
    },

    #[serde(rename = "error")]
    Error { error: ApiError },

    #[serde(other)]
    Other,
}

/// Error payload
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub code: Option<String>,
}

impl ApiError {
    /// Committing an empty audio buffer is expected when the user typed nothing new
    #[must_use]
    pub fn is_empty_commit(&self) -> bool {
        self.code.as_deref() == Some("input_audio_buffer_commit_empty")
    }
}

/// Response summary carried by `response.created` and `response.done`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseInfo {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub status: Option<String>,
}

/// Silent s16le PCM of the given duration
#[must_use]
pub fn silence(duration_ms: u32) -> Vec<u8> {
    let samples = SAMPLE_RATE / 1000 * duration_ms;
    vec![0u8; samples as usize * 2]
}
