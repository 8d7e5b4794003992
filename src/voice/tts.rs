//! Text-to-speech (TTS) processing

use std::sync::Arc;

use async_trait::async_trait;

use super::SpeechSynthesizer;
use crate::config::{ApiKeys, VoiceConfig};
use crate::{Error, Result};

/// TTS provider backend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TtsProvider {
    OpenAI,
    ElevenLabs,
}

/// Synthesizes speech from text
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: String,
    voice: String,
    speed: f32,
    model: String,
    provider: TtsProvider,
}

impl TextToSpeech {
    /// Create a new TTS instance using `OpenAI`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_openai(api_key: String, voice: String, speed: f32, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice,
            speed,
            model,
            provider: TtsProvider::OpenAI,
        })
    }

    /// Create a new TTS instance using ElevenLabs
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_elevenlabs(api_key: String, voice_id: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required for TTS".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice: voice_id,
            speed: 1.0,
            model,
            provider: TtsProvider::ElevenLabs,
        })
    }

    /// Synthesize text to speech
    ///
    /// Returns audio bytes (MP3 format)
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails or the provider returns no audio
    pub async fn synthesize_mp3(&self, text: &str) -> Result<Vec<u8>> {
        let audio = match self.provider {
            TtsProvider::OpenAI => self.synthesize_openai(text).await?,
            TtsProvider::ElevenLabs => self.synthesize_elevenlabs(text).await?,
        };

        if audio.is_empty() {
            return Err(Error::Tts("provider returned no audio".to_string()));
        }

        Ok(audio)
    }

    /// Synthesize using OpenAI TTS
    async fn synthesize_openai(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
            response_format: &'a str,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
            response_format: "mp3",
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }

    /// Synthesize using ElevenLabs TTS
    async fn synthesize_elevenlabs(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let url = format!(
            "https://api.elevenlabs.io/v1/text-to-speech/{}",
            self.voice
        );

        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header("Accept", "audio/mpeg")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("ElevenLabs TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }
}

#[async_trait]
impl SpeechSynthesizer for TextToSpeech {
    fn is_configured(&self) -> bool {
        true
    }

    async fn synthesize(&self, text: &str) -> Option<Vec<u8>> {
        match self.synthesize_mp3(text).await {
            Ok(audio) => {
                tracing::debug!(bytes = audio.len(), provider = ?self.provider, "synthesized speech");
                Some(audio)
            }
            Err(e) => {
                tracing::warn!(error = %e, provider = ?self.provider, "speech synthesis failed");
                None
            }
        }
    }
}

/// Synthesizer used when no TTS provider is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledSynthesizer;

#[async_trait]
impl SpeechSynthesizer for DisabledSynthesizer {
    fn is_configured(&self) -> bool {
        false
    }

    async fn synthesize(&self, _text: &str) -> Option<Vec<u8>> {
        None
    }
}

/// Build the configured synthesizer, falling back to [`DisabledSynthesizer`]
///
/// A provider without its API key is logged and treated as unconfigured;
/// spoken output is optional.
#[must_use]
pub fn synthesizer_from_config(voice: &VoiceConfig, keys: &ApiKeys) -> Arc<dyn SpeechSynthesizer> {
    let built = match voice.tts_provider.as_str() {
        "openai" => keys.openai.clone().map(|key| {
            TextToSpeech::new_openai(
                key,
                voice.tts_voice.clone(),
                voice.tts_speed,
                voice.tts_model.clone(),
            )
        }),
        "elevenlabs" => keys.elevenlabs.clone().map(|key| {
            TextToSpeech::new_elevenlabs(key, voice.tts_voice.clone(), voice.tts_model.clone())
        }),
        "none" | "" => return Arc::new(DisabledSynthesizer),
        other => {
            tracing::warn!(provider = other, "unknown TTS provider, spoken replies disabled");
            return Arc::new(DisabledSynthesizer);
        }
    };

    match built {
        Some(Ok(tts)) => {
            tracing::info!(provider = ?tts.provider, voice = %tts.voice, "TTS enabled");
            Arc::new(tts)
        }
        Some(Err(e)) => {
            tracing::warn!(error = %e, "TTS unavailable, spoken replies disabled");
            Arc::new(DisabledSynthesizer)
        }
        None => {
            tracing::info!(provider = %voice.tts_provider, "no TTS API key, spoken replies disabled");
            Arc::new(DisabledSynthesizer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_is_rejected() {
        assert!(TextToSpeech::new_openai(String::new(), "alloy".into(), 1.0, "tts-1".into()).is_err());
        assert!(TextToSpeech::new_elevenlabs(String::new(), "voice".into(), "m".into()).is_err());
    }

    #[test]
    fn missing_key_disables_synthesis() {
        let synth = synthesizer_from_config(&VoiceConfig::default(), &ApiKeys::default());
        assert!(!synth.is_configured());
    }

    #[test]
    fn configured_provider_with_key_is_enabled() {
        let keys = ApiKeys {
            openai: Some("sk-test".to_string()),
            elevenlabs: None,
        };
        let synth = synthesizer_from_config(&VoiceConfig::default(), &keys);
        assert!(synth.is_configured());
    }

    #[test]
    fn none_provider_disables_synthesis_even_with_key() {
        let voice = VoiceConfig {
            tts_provider: "none".to_string(),
            ..VoiceConfig::default()
        };
        let keys = ApiKeys {
            openai: Some("sk-test".to_string()),
            elevenlabs: None,
        };
        assert!(!synthesizer_from_config(&voice, &keys).is_configured());
    }

    #[tokio::test]
    async fn disabled_synthesizer_returns_nothing() {
        assert!(DisabledSynthesizer.synthesize("hello").await.is_none());
    }
}
