//! UI shell event vocabulary

use serde::{Deserialize, Serialize};

use super::state::TurnState;

/// User intent forwarded by the UI shell
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserIntent {
    StartDictation,
    StopDictation,
    SendToModel,
    AddContextFile { path: String },
    RemoveContextFile { path: String },
    SearchFiles { query: String },
    Interrupt,
    HardStop,
}

/// Notification sent to the UI shell
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiNotification {
    RecordingStarted,
    RecordingStopped,
    /// Current best-guess transcription
    TranscriptionUpdate { text: String },
    Thinking,
    /// Full response text of a turn
    ModelResponse { text: String },
    /// Turn finished; controls may unblock
    AudioComplete,
    Error { message: String },
    FileSearchResults { query: String, files: Vec<String> },
    Interrupted,
    HardStopped,
    StateChanged { state: TurnState },
    ContextFiles { files: Vec<String> },
}

impl UiNotification {
    /// Error notification from anything displayable
    pub fn error(message: impl std::fmt::Display) -> Self {
        Self::Error {
            message: message.to_string(),
        }
    }
}

/// Session connectivity as seen by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Point-in-time view of the coordinator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub state: TurnState,
    pub transcript: String,
    pub connectivity: Connectivity,
    pub recording: bool,
    pub context_files: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intents_parse_from_tagged_json() {
        let intent: UserIntent = serde_json::from_str(r#"{"type":"send_to_model"}"#).unwrap();
        assert_eq!(intent, UserIntent::SendToModel);

        let intent: UserIntent =
            serde_json::from_str(r#"{"type":"add_context_file","path":"src/lib.rs"}"#).unwrap();
        assert_eq!(
            intent,
            UserIntent::AddContextFile {
                path: "src/lib.rs".to_string()
            }
        );
    }

    #[test]
    fn unknown_intent_is_rejected() {
        assert!(serde_json::from_str::<UserIntent>(r#"{"type":"dance"}"#).is_err());
    }

    #[test]
    fn notifications_serialize_with_type_tag() {
        let json = serde_json::to_value(UiNotification::FileSearchResults {
            query: "main".to_string(),
            files: vec!["src/main.rs".to_string()],
        })
        .unwrap();
        assert_eq!(json["type"], "file_search_results");
        assert_eq!(json["files"][0], "src/main.rs");

        let json = serde_json::to_value(UiNotification::StateChanged {
            state: TurnState::Speaking,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"type": "state_changed", "state": "speaking"}));

        let json = serde_json::to_string(&UiNotification::HardStopped).unwrap();
        assert_eq!(json, r#"{"type":"hard_stopped"}"#);
    }
}
