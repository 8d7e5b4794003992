//! Audio playback to speakers through a player subprocess

use std::io::Write;
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tokio::sync::oneshot;

use super::{AudioSink, PlaybackOutcome};
use crate::{Error, Result};

/// Plays encoded audio buffers by handing them to a player process
pub struct AudioPlayback {
    command: Vec<String>,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl AudioPlayback {
    /// Create a new audio playback instance
    ///
    /// Uses `command` when given, otherwise the first player found on `PATH`.
    /// The audio file path is appended as the last argument.
    ///
    /// # Errors
    ///
    /// Returns error if no player is available
    pub fn new(command: Option<&[String]>) -> Result<Self> {
        let command = match command {
            Some(cmd) if !cmd.is_empty() => cmd.to_vec(),
            _ => resolve_player()?,
        };

        tracing::debug!(command = ?command, "audio playback initialized");

        Ok(Self {
            command,
            stop_tx: Mutex::new(None),
        })
    }

    /// Register a new playback, refusing if one is already running
    fn begin(&self) -> Result<oneshot::Receiver<()>> {
        let mut guard = self
            .stop_tx
            .lock()
            .map_err(|_| Error::Playback("playback state poisoned".to_string()))?;

        if guard.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Err(Error::Playback("playback already in progress".to_string()));
        }

        let (tx, rx) = oneshot::channel();
        *guard = Some(tx);
        Ok(rx)
    }
}

#[async_trait]
impl AudioSink for AudioPlayback {
    async fn play(&self, audio: Vec<u8>) -> Result<PlaybackOutcome> {
        if audio.is_empty() {
            return Ok(PlaybackOutcome::Completed);
        }

        let mut stop_rx = self.begin()?;

        let bytes = audio.len();
        let file = tokio::task::spawn_blocking(move || write_temp(&audio))
            .await
            .map_err(|e| Error::Playback(format!("failed to stage audio: {e}")))??;

        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| Error::Playback("player command is empty".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .arg(file.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Playback(format!("failed to spawn player {program}: {e}")))?;

        tracing::debug!(bytes, program = %program, "playback started");

        let outcome = tokio::select! {
            _ = &mut stop_rx => {
                let _ = child.kill().await;
                tracing::debug!("playback stopped");
                PlaybackOutcome::Stopped
            }
            status = child.wait() => {
                let status = status
                    .map_err(|e| Error::Playback(format!("failed to wait for player: {e}")))?;
                if !status.success() {
                    return Err(Error::Playback(format!("player exited with {status}")));
                }
                tracing::debug!("playback complete");
                PlaybackOutcome::Completed
            }
        };

        drop(file);
        Ok(outcome)
    }

    fn stop(&self) {
        let tx = self.stop_tx.lock().ok().and_then(|mut guard| guard.take());
        if let Some(tx) = tx {
            let _ = tx.send(());
        }
    }
}

/// Stage audio in a temp file the player can open by path
fn write_temp(audio: &[u8]) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("voxpilot-")
        .suffix(audio_extension(audio))
        .tempfile()?;
    file.write_all(audio)?;
    file.flush()?;
    Ok(file)
}

/// Find a player on `PATH` and build its command line
///
/// # Errors
///
/// Returns error if no supported player is installed
pub fn resolve_player() -> Result<Vec<String>> {
    let candidates: &[&[&str]] = &[
        &["afplay"],
        &["ffplay", "-nodisp", "-autoexit", "-loglevel", "quiet"],
        &["mpv", "--no-video", "--really-quiet"],
        &["mpg123", "-q"],
    ];

    candidates
        .iter()
        .find(|cmd| which::which(cmd[0]).is_ok())
        .map(|cmd| cmd.iter().map(ToString::to_string).collect())
        .ok_or_else(|| {
            Error::Playback(
                "no audio player found; install ffmpeg or mpv, or set voice.player_command"
                    .to_string(),
            )
        })
}

/// File extension for an encoded audio buffer, sniffed from its header
#[must_use]
pub fn audio_extension(audio: &[u8]) -> &'static str {
    if audio.starts_with(b"RIFF") && audio.get(8..12) == Some(&b"WAVE"[..]) {
        ".wav"
    } else if audio.starts_with(b"OggS") {
        ".ogg"
    } else if audio.starts_with(b"fLaC") {
        ".flac"
    } else {
        ".mp3"
    }
}

/// Render a sine tone as 16-bit mono WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn sine_wav(frequency: f32, duration_secs: f32, sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let num_samples = (sample_rate as f32 * duration_secs).round() as usize;

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| Error::Playback(e.to_string()))?;

        for i in 0..num_samples {
            #[allow(clippy::cast_precision_loss)]
            let t = i as f32 / sample_rate as f32;
            let sample = 0.3 * (2.0 * std::f32::consts::PI * frequency * t).sin();
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Playback(e.to_string()))?;
        }

        writer
            .finalize()
            .map_err(|e| Error::Playback(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
