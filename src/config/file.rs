//! TOML configuration file loading
//!
//! Supports `~/.config/voxpilot/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct VoxpilotConfigFile {
    /// Workspace root override
    #[serde(default)]
    pub workspace: Option<String>,

    /// Speech/LLM session configuration
    #[serde(default)]
    pub realtime: RealtimeFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Turn coordination tunables
    #[serde(default)]
    pub assistant: AssistantFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Bridge server configuration
    #[serde(default)]
    pub server: ServerFileConfig,
}

/// Realtime session configuration
#[derive(Debug, Default, Deserialize)]
pub struct RealtimeFileConfig {
    /// WebSocket endpoint
    pub url: Option<String>,

    /// Model identifier (e.g. "gpt-4o-realtime-preview")
    pub model: Option<String>,

    /// Input transcription model (e.g. "whisper-1")
    pub transcription_model: Option<String>,

    /// Turn completion timeout in seconds
    pub turn_timeout_secs: Option<u64>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// TTS provider ("openai", "elevenlabs", "none")
    pub tts_provider: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "alloy")
    pub tts_voice: Option<String>,

    /// TTS speed multiplier
    pub tts_speed: Option<f32>,

    /// Recorder command and arguments
    pub recorder_command: Option<Vec<String>>,

    /// Player command and arguments
    pub player_command: Option<Vec<String>>,
}

/// Turn coordination configuration
#[derive(Debug, Default, Deserialize)]
pub struct AssistantFileConfig {
    pub instructions: Option<String>,
    pub max_context_chars: Option<usize>,
    pub quiescence_ms: Option<u64>,
    pub resume_delay_ms: Option<u64>,
    pub max_search_results: Option<usize>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub elevenlabs: Option<String>,
}

/// Bridge server configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// Bridge port
    pub port: Option<u16>,
}

/// Load the TOML config file from the standard path
///
/// Returns `VoxpilotConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> VoxpilotConfigFile {
    let Some(path) = config_file_path() else {
        return VoxpilotConfigFile::default();
    };

    if !path.exists() {
        return VoxpilotConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                VoxpilotConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            VoxpilotConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/voxpilot/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("voxpilot").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_parses_to_defaults() {
        let parsed: VoxpilotConfigFile = toml::from_str("").unwrap();
        assert!(parsed.workspace.is_none());
        assert!(parsed.voice.tts_provider.is_none());
    }

    #[test]
    fn unknown_sections_are_ignored() {
        let parsed: VoxpilotConfigFile =
            toml::from_str("[telemetry]\nenabled = true\n[server]\nport = 1234").unwrap();
        assert_eq!(parsed.server.port, Some(1234));
    }
}
