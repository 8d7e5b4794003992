//! Turn state and transcript accumulation

use serde::Serialize;
use tokio::time::Instant;

/// Turn Coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// No dictation, no turn in flight
    #[default]
    Idle,
    /// Microphone open, transcription accumulating
    Listening,
    /// Dictation stopped, transcript kept for a send
    Paused,
    /// Waiting for the model's response
    Sending,
    /// Speaking the response
    Speaking,
    /// Interrupted; listening resumes shortly
    Interrupted,
}

impl TurnState {
    /// Whether dictation may start from this state
    #[must_use]
    pub const fn can_start_dictation(self) -> bool {
        matches!(self, Self::Idle | Self::Paused | Self::Interrupted)
    }

    /// Whether the transcript may be sent from this state
    #[must_use]
    pub const fn can_send(self) -> bool {
        matches!(self, Self::Listening | Self::Paused)
    }

    /// Whether incoming transcription is applied in this state
    #[must_use]
    pub const fn accepts_transcription(self) -> bool {
        matches!(self, Self::Listening | Self::Paused)
    }

    /// Name used on the wire and in logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Paused => "paused",
            Self::Sending => "sending",
            Self::Speaking => "speaking",
            Self::Interrupted => "interrupted",
        }
    }
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The user's utterance for the current turn
///
/// Finalized fragments accumulate in `confirmed`; the latest interim
/// hypothesis overlays them until it is finalized or replaced.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    confirmed: String,
    interim: String,
    updated_at: Option<Instant>,
}

impl Transcript {
    /// Apply a transcription update
    pub fn apply(&mut self, text: &str, is_final: bool) {
        if is_final {
            let text = text.trim();
            if !text.is_empty() {
                if !self.confirmed.is_empty() {
                    self.confirmed.push(' ');
                }
                self.confirmed.push_str(text);
            }
            self.interim.clear();
        } else {
            self.interim = text.trim().to_string();
        }
        self.updated_at = Some(Instant::now());
    }

    /// Confirmed text followed by the interim overlay
    #[must_use]
    pub fn current(&self) -> String {
        match (self.confirmed.is_empty(), self.interim.is_empty()) {
            (_, true) => self.confirmed.clone(),
            (true, false) => self.interim.clone(),
            (false, false) => format!("{} {}", self.confirmed, self.interim),
        }
    }

    /// Whether there is nothing worth sending
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.current().trim().is_empty()
    }

    /// When the transcript last changed
    #[must_use]
    pub const fn updated_at(&self) -> Option<Instant> {
        self.updated_at
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.confirmed.clear();
        self.interim.clear();
        self.updated_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interim_overlays_confirmed_text() {
        let mut t = Transcript::default();
        t.apply("Explain", false);
        assert_eq!(t.current(), "Explain");

        t.apply("Explain recursion", true);
        t.apply("with an", false);
        assert_eq!(t.current(), "Explain recursion with an");

        t.apply("with an example", true);
        assert_eq!(t.current(), "Explain recursion with an example");
    }

    #[test]
    fn interim_is_replaced_not_appended() {
        let mut t = Transcript::default();
        t.apply("Exp", false);
        t.apply("Explain rec", false);
        assert_eq!(t.current(), "Explain rec");
    }

    #[test]
    fn clear_resets_everything() {
        let mut t = Transcript::default();
        t.apply("hello", true);
        t.clear();
        assert!(t.is_blank());
        assert!(t.updated_at().is_none());
    }

    #[test]
    fn whitespace_only_is_blank() {
        let mut t = Transcript::default();
        t.apply("   ", false);
        assert!(t.is_blank());
    }

    #[test]
    fn state_guards() {
        assert!(TurnState::Idle.can_start_dictation());
        assert!(TurnState::Interrupted.can_start_dictation());
        assert!(!TurnState::Sending.can_start_dictation());
        assert!(TurnState::Paused.can_send());
        assert!(!TurnState::Speaking.can_send());
        assert!(!TurnState::Sending.accepts_transcription());
    }

    #[test]
    fn state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&TurnState::Interrupted).unwrap(),
            "\"interrupted\""
        );
        assert_eq!(TurnState::Listening.to_string(), "listening");
    }
}
