//! Audio capture from the microphone through a recorder subprocess
//!
//! The recorder writes raw mono s16le PCM at [`SAMPLE_RATE`] to stdout; each
//! read is forwarded as one [`CaptureEvent::Chunk`].

use std::process::Stdio;
use std::sync::Mutex;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};

use super::{AudioSource, CaptureEvent, SAMPLE_RATE};
use crate::{Error, Result};

/// Read size for recorder output (100ms of 16-bit mono audio)
const CHUNK_BYTES: usize = SAMPLE_RATE as usize / 10 * 2;

/// Captures audio by running a recorder process
pub struct AudioCapture {
    command: Vec<String>,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl AudioCapture {
    /// Create a new audio capture instance
    ///
    /// Uses `command` when given, otherwise the first recorder found on `PATH`.
    ///
    /// # Errors
    ///
    /// Returns error if no recorder is available
    pub fn new(command: Option<&[String]>) -> Result<Self> {
        let command = match command {
            Some(cmd) if !cmd.is_empty() => cmd.to_vec(),
            _ => resolve_recorder()?,
        };

        tracing::debug!(
            command = ?command,
            sample_rate = SAMPLE_RATE,
            "audio capture initialized"
        );

        Ok(Self {
            command,
            stop_tx: Mutex::new(None),
        })
    }

    /// Get the sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

impl AudioSource for AudioCapture {
    fn start(&self, events: mpsc::UnboundedSender<CaptureEvent>) -> Result<()> {
        let mut stop_tx = self
            .stop_tx
            .lock()
            .map_err(|_| Error::Audio("capture state poisoned".to_string()))?;

        if stop_tx.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Ok(());
        }

        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| Error::Audio("recorder command is empty".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Audio(format!("failed to spawn recorder {program}: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Audio("recorder stdout unavailable".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(line = %line, "recorder stderr");
                }
            });
        }

        let (tx, rx) = oneshot::channel();
        tokio::spawn(pump_recorder(child, stdout, rx, events));
        *stop_tx = Some(tx);

        tracing::debug!(program = %program, "audio capture started");
        Ok(())
    }

    fn stop(&self) {
        let tx = self.stop_tx.lock().ok().and_then(|mut guard| guard.take());
        if let Some(tx) = tx {
            let _ = tx.send(());
        }
    }

    fn is_capturing(&self) -> bool {
        self.stop_tx
            .lock()
            .is_ok_and(|guard| guard.as_ref().is_some_and(|tx| !tx.is_closed()))
    }
}

/// Forward recorder output until stopped or the process exits
async fn pump_recorder(
    mut child: Child,
    mut stdout: ChildStdout,
    mut stop_rx: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<CaptureEvent>,
) {
    let mut buf = vec![0u8; CHUNK_BYTES];

    loop {
        tokio::select! {
            _ = &mut stop_rx => {
                let _ = child.kill().await;
                tracing::debug!("audio capture stopped");
                return;
            }
            read = stdout.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => {
                    if events.send(CaptureEvent::Chunk(buf[..n].to_vec())).is_err() {
                        let _ = child.kill().await;
                        return;
                    }
                }
                Err(e) => {
                    let _ = child.kill().await;
                    let _ = events.send(CaptureEvent::Failed(format!(
                        "failed to read recorder output: {e}"
                    )));
                    return;
                }
            }
        }
    }

    let event = match child.wait().await {
        Ok(status) if status.success() => CaptureEvent::Ended,
        Ok(status) => CaptureEvent::Failed(format!("recorder exited with {status}")),
        Err(e) => CaptureEvent::Failed(format!("failed to wait for recorder: {e}")),
    };

    tracing::warn!(event = ?event, "recorder exited unexpectedly");
    let _ = events.send(event);
}

/// Find a recorder on `PATH` and build its command line
///
/// # Errors
///
/// Returns error if no supported recorder is installed
pub fn resolve_recorder() -> Result<Vec<String>> {
    let rate = SAMPLE_RATE.to_string();

    if which::which("sox").is_ok() {
        let mut cmd = vec!["sox".to_string(), "-q".to_string()];
        if cfg!(target_os = "windows") {
            cmd.extend(["-t", "waveaudio", "default"].map(String::from));
        } else {
            cmd.push("-d".to_string());
        }
        cmd.extend(raw_format_args(&rate));
        return Ok(cmd);
    }

    if which::which("rec").is_ok() {
        let mut cmd = vec!["rec".to_string(), "-q".to_string()];
        cmd.extend(raw_format_args(&rate));
        return Ok(cmd);
    }

    if which::which("arecord").is_ok() {
        return Ok([
            "arecord", "-q", "-f", "S16_LE", "-r", rate.as_str(), "-c", "1", "-t", "raw",
        ]
        .iter()
        .map(ToString::to_string)
        .collect());
    }

    Err(Error::Audio(
        "no recorder found; install sox or set voice.recorder_command".to_string(),
    ))
}

/// sox output options for raw mono s16le written to stdout
fn raw_format_args(rate: &str) -> Vec<String> {
    [
        "-t",
        "raw",
        "-r",
        rate,
        "-e",
        "signed-integer",
        "-b",
        "16",
        "-c",
        "1",
        "-L",
        "-",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

/// Root-mean-square level of s16le PCM, normalized to [0.0, 1.0]
#[must_use]
pub fn pcm16_rms(pcm: &[u8]) -> f32 {
    let samples: Vec<f32> = pcm
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect();

    if samples.is_empty() {
        return 0.0;
    }

    #[allow(clippy::cast_precision_loss)]
    let mean = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    mean.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_is_100ms_of_audio() {
        assert_eq!(CHUNK_BYTES, 4800);
    }

    #[test]
    fn rms_of_silence_is_zero() {
        assert!(pcm16_rms(&[0u8; 480]).abs() < f32::EPSILON);
        assert!(pcm16_rms(&[]).abs() < f32::EPSILON);
    }

    #[test]
    fn rms_of_full_scale_square_wave_is_near_one() {
        let mut pcm = Vec::new();
        for i in 0..100 {
            let sample: i16 = if i % 2 == 0 { i16::MAX } else { i16::MIN };
            pcm.extend_from_slice(&sample.to_le_bytes());
        }
        assert!(pcm16_rms(&pcm) > 0.99);
    }

    #[test]
    fn rms_ignores_trailing_odd_byte() {
        let pcm = [0u8, 0, 7];
        assert!(pcm16_rms(&pcm).abs() < f32::EPSILON);
    }

    #[test]
    fn explicit_command_is_used_verbatim() {
        let cmd = vec!["my-recorder".to_string(), "--raw".to_string()];
        let capture = AudioCapture::new(Some(&cmd)).unwrap();
        assert_eq!(capture.command, cmd);
        assert!(!capture.is_capturing());
    }

    #[test]
    fn raw_format_writes_to_stdout() {
        let args = raw_format_args("24000");
        assert_eq!(args.last().map(String::as_str), Some("-"));
        assert!(args.contains(&"24000".to_string()));
    }
}
