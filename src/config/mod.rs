//! Configuration management for voxpilot
//!
//! Layering, lowest priority first: compiled defaults, the TOML file
//! (see [`file`]), environment variables, then CLI flags applied by the caller.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use self::file::VoxpilotConfigFile;
use crate::{Error, Result};

/// Default Realtime API endpoint
pub const DEFAULT_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Default Realtime model
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview";

/// Default host bridge port
pub const DEFAULT_PORT: u16 = 18790;

const DEFAULT_INSTRUCTIONS: &str = "You are a voice pair-programmer working inside the user's editor. \
Answer concisely in plain spoken sentences suitable for text-to-speech. \
Avoid markdown and long code listings unless the user asks for them.";

/// voxpilot configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory of the workspace the editor has open
    pub workspace_root: PathBuf,

    /// Host bridge configuration
    pub bridge: BridgeConfig,

    /// Speech/LLM session configuration
    pub realtime: RealtimeConfig,

    /// Voice capture, playback, and TTS configuration
    pub voice: VoiceConfig,

    /// Turn coordination tunables
    pub assistant: AssistantConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// Host bridge configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Port to listen on (loopback only)
    pub port: u16,
}

/// Speech/LLM session configuration
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// WebSocket endpoint
    pub url: String,

    /// Realtime model identifier
    pub model: String,

    /// Model used for input audio transcription
    pub transcription_model: String,

    /// How long a turn may wait for its terminal event
    pub turn_timeout: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_REALTIME_URL.to_string(),
            model: DEFAULT_REALTIME_MODEL.to_string(),
            transcription_model: "whisper-1".to_string(),
            turn_timeout: Duration::from_secs(30),
        }
    }
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// TTS provider: "openai", "elevenlabs", or "none"
    pub tts_provider: String,

    /// TTS model (e.g. "tts-1", "eleven_monolingual_v1")
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f32,

    /// Recorder command override; must write raw s16le mono 24kHz to stdout
    pub recorder_command: Option<Vec<String>>,

    /// Player command override; the audio file path is appended
    pub player_command: Option<Vec<String>>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            tts_provider: "openai".to_string(),
            tts_model: "tts-1".to_string(),
            tts_voice: "alloy".to_string(),
            tts_speed: 1.0,
            recorder_command: None,
            player_command: None,
        }
    }
}

/// Turn coordination tunables
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// Base instructions sent ahead of the workspace context
    pub instructions: String,

    /// Character budget for the workspace context blob
    pub max_context_chars: usize,

    /// Minimum idle time after the last transcription update before a send
    pub quiescence: Duration,

    /// Delay between an interrupt and resumed listening
    pub resume_delay: Duration,

    /// Maximum number of file search results returned to the host
    pub max_search_results: usize,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            max_context_chars: 24_000,
            quiescence: Duration::from_millis(300),
            resume_delay: Duration::from_millis(500),
            max_search_results: 50,
        }
    }
}

/// API keys for external services
#[derive(Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Realtime session and TTS)
    pub openai: Option<String>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<String>,
}

impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |key: &Option<String>| key.as_ref().map(|_| "***");
        f.debug_struct("ApiKeys")
            .field("openai", &mask(&self.openai))
            .field("elevenlabs", &mask(&self.elevenlabs))
            .finish()
    }
}

impl Config {
    /// Load configuration from the config file and the process environment
    ///
    /// # Errors
    ///
    /// Returns error if a value is out of range
    pub fn load(workspace_root: Option<PathBuf>) -> Result<Self> {
        let file = file::load_config_file();
        let mut config = Self::from_sources(file, |key| std::env::var(key).ok())?;

        if let Some(root) = workspace_root {
            config.workspace_root = root;
        }

        Ok(config)
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a value is out of range
    pub fn from_sources(
        file: VoxpilotConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let realtime_defaults = RealtimeConfig::default();
        let voice_defaults = VoiceConfig::default();
        let assistant_defaults = AssistantConfig::default();

        let workspace_root = env("VOXPILOT_WORKSPACE")
            .or(file.workspace)
            .map(PathBuf::from)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));

        let port = match env("VOXPILOT_PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|e| Error::Config(format!("invalid VOXPILOT_PORT {raw:?}: {e}")))?,
            None => file.server.port.unwrap_or(DEFAULT_PORT),
        };

        let realtime = RealtimeConfig {
            url: env("VOXPILOT_REALTIME_URL")
                .or(file.realtime.url)
                .unwrap_or(realtime_defaults.url),
            model: env("VOXPILOT_REALTIME_MODEL")
                .or(file.realtime.model)
                .unwrap_or(realtime_defaults.model),
            transcription_model: file
                .realtime
                .transcription_model
                .unwrap_or(realtime_defaults.transcription_model),
            turn_timeout: file
                .realtime
                .turn_timeout_secs
                .map_or(realtime_defaults.turn_timeout, Duration::from_secs),
        };

        let voice = VoiceConfig {
            tts_provider: env("VOXPILOT_TTS_PROVIDER")
                .or(file.voice.tts_provider)
                .unwrap_or(voice_defaults.tts_provider)
                .to_lowercase(),
            tts_model: file.voice.tts_model.unwrap_or(voice_defaults.tts_model),
            tts_voice: file.voice.tts_voice.unwrap_or(voice_defaults.tts_voice),
            tts_speed: file.voice.tts_speed.unwrap_or(voice_defaults.tts_speed),
            recorder_command: file.voice.recorder_command,
            player_command: file.voice.player_command,
        };

        if !(0.25..=4.0).contains(&voice.tts_speed) {
            return Err(Error::Config(format!(
                "voice.tts_speed must be between 0.25 and 4.0, got {}",
                voice.tts_speed
            )));
        }

        let assistant = AssistantConfig {
            instructions: file
                .assistant
                .instructions
                .unwrap_or(assistant_defaults.instructions),
            max_context_chars: file
                .assistant
                .max_context_chars
                .unwrap_or(assistant_defaults.max_context_chars),
            quiescence: file
                .assistant
                .quiescence_ms
                .map_or(assistant_defaults.quiescence, Duration::from_millis),
            resume_delay: file
                .assistant
                .resume_delay_ms
                .map_or(assistant_defaults.resume_delay, Duration::from_millis),
            max_search_results: file
                .assistant
                .max_search_results
                .unwrap_or(assistant_defaults.max_search_results),
        };

        if assistant.max_context_chars == 0 {
            return Err(Error::Config(
                "assistant.max_context_chars must be greater than zero".to_string(),
            ));
        }

        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY")
                .or(file.api_keys.openai)
                .filter(|k| !k.is_empty()),
            elevenlabs: env("ELEVENLABS_API_KEY")
                .or(file.api_keys.elevenlabs)
                .filter(|k| !k.is_empty()),
        };

        Ok(Self {
            workspace_root,
            bridge: BridgeConfig { port },
            realtime,
            voice,
            assistant,
            api_keys,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_file_or_env() {
        let config = Config::from_sources(VoxpilotConfigFile::default(), env_of(&[])).unwrap();

        assert_eq!(config.bridge.port, DEFAULT_PORT);
        assert_eq!(config.realtime.url, DEFAULT_REALTIME_URL);
        assert_eq!(config.realtime.turn_timeout, Duration::from_secs(30));
        assert_eq!(config.assistant.quiescence, Duration::from_millis(300));
        assert_eq!(config.assistant.resume_delay, Duration::from_millis(500));
        assert!(config.api_keys.openai.is_none());
    }

    #[test]
    fn env_overrides_file() {
        let file: VoxpilotConfigFile = toml::from_str(
            r#"
            [server]
            port = 4000

            [api_keys]
            openai = "from-file"
            "#,
        )
        .unwrap();

        let config = Config::from_sources(
            file,
            env_of(&[("VOXPILOT_PORT", "5000"), ("OPENAI_API_KEY", "from-env")]),
        )
        .unwrap();

        assert_eq!(config.bridge.port, 5000);
        assert_eq!(config.api_keys.openai.as_deref(), Some("from-env"));
    }

    #[test]
    fn file_tunables_are_read() {
        let file: VoxpilotConfigFile = toml::from_str(
            r#"
            [assistant]
            max_context_chars = 1000
            quiescence_ms = 150

            [voice]
            tts_provider = "ElevenLabs"
            player_command = ["mpv", "--really-quiet"]
            "#,
        )
        .unwrap();

        let config = Config::from_sources(file, env_of(&[])).unwrap();

        assert_eq!(config.assistant.max_context_chars, 1000);
        assert_eq!(config.assistant.quiescence, Duration::from_millis(150));
        assert_eq!(config.voice.tts_provider, "elevenlabs");
        assert_eq!(
            config.voice.player_command,
            Some(vec!["mpv".to_string(), "--really-quiet".to_string()])
        );
    }

    #[test]
    fn rejects_invalid_port() {
        let result = Config::from_sources(
            VoxpilotConfigFile::default(),
            env_of(&[("VOXPILOT_PORT", "not-a-port")]),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn rejects_out_of_range_speed() {
        let file: VoxpilotConfigFile = toml::from_str("[voice]\ntts_speed = 9.0").unwrap();
        assert!(Config::from_sources(file, env_of(&[])).is_err());
    }

    #[test]
    fn empty_api_key_is_treated_as_missing() {
        let config = Config::from_sources(
            VoxpilotConfigFile::default(),
            env_of(&[("OPENAI_API_KEY", "")]),
        )
        .unwrap();
        assert!(config.api_keys.openai.is_none());
    }

    #[test]
    fn debug_output_masks_keys() {
        let keys = ApiKeys {
            openai: Some("sk-secret".to_string()),
            elevenlabs: None,
        };
        let rendered = format!("{keys:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("***"));
    }
}
