use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use voxpilot::coordinator::{self, CoordinatorDeps};
use voxpilot::host::Bridge;
use voxpilot::realtime::RealtimeConnector;
use voxpilot::voice::{
    AudioCapture, AudioPlayback, AudioSink, AudioSource, CaptureEvent, SAMPLE_RATE, TextToSpeech,
    pcm16_rms, sine_wav, synthesizer_from_config,
};
use voxpilot::{Config, FsWorkspace};

/// Voxpilot - voice-driven coding assistant sidecar for editors
#[derive(Parser)]
#[command(name = "voxpilot", version, about)]
struct Cli {
    /// Workspace root (defaults to the current directory)
    #[arg(short, long, env = "VOXPILOT_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Host bridge port
    #[arg(long, env = "VOXPILOT_PORT")]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,voxpilot=info",
        1 => "info,voxpilot=debug",
        2 => "debug",
        _ => "trace",
    };

    // Stdout may belong to the host; keep logs on stderr
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.workspace)?;
    if let Some(port) = cli.port {
        config.bridge.port = port;
    }

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(&config, duration).await,
            Command::TestSpeaker => test_speaker(&config).await,
            Command::TestTts { text } => test_tts(&config, &text).await,
        };
    }

    tracing::info!(
        workspace = %config.workspace_root.display(),
        port = config.bridge.port,
        "starting voxpilot"
    );
    tracing::debug!(?config, "loaded configuration");

    if config.api_keys.openai.is_none() {
        tracing::warn!("OPENAI_API_KEY not set; dictation will fail to connect");
    }

    let workspace = Arc::new(FsWorkspace::new(config.workspace_root.clone()));
    let deps = CoordinatorDeps {
        capture: Arc::new(AudioCapture::new(config.voice.recorder_command.as_deref())?),
        playback: Arc::new(AudioPlayback::new(config.voice.player_command.as_deref())?),
        connector: Arc::new(RealtimeConnector::new(
            config.realtime.clone(),
            config.api_keys.openai.clone(),
        )),
        synthesizer: synthesizer_from_config(&config.voice, &config.api_keys),
        workspace: Arc::clone(&workspace) as Arc<dyn voxpilot::Workspace>,
    };

    let (handle, notifications) = coordinator::spawn(deps, config.assistant.clone());
    let bridge = Bridge::new(handle.clone(), workspace, notifications, config.bridge.port);

    tracing::info!("voxpilot ready");

    tokio::select! {
        result = bridge.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            handle.dispatch(voxpilot::UserIntent::HardStop);
            // Let the coordinator close the session and recorder
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    Ok(())
}

/// Test microphone input
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let capture = AudioCapture::new(config.voice.recorder_command.as_deref())?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    capture.start(tx)?;

    println!("Sample rate: {SAMPLE_RATE} Hz");
    println!("---");

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.tick().await;
    let mut second = Vec::new();

    for i in 0..duration {
        let deadline = ticker.tick();
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                event = rx.recv() => match event {
                    Some(CaptureEvent::Chunk(pcm)) => second.extend_from_slice(&pcm),
                    Some(CaptureEvent::Failed(reason)) => anyhow::bail!("recorder failed: {reason}"),
                    Some(CaptureEvent::Ended) | None => anyhow::bail!("recorder exited early"),
                },
            }
        }

        let energy = pcm16_rms(&second);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {:.4} | {:6} bytes | [{}]", i + 1, energy, second.len(), meter);
        second.clear();
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: sox -d -n stat (to test the default input)");
    println!("  3. Set voice.recorder_command in the config file");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker(config: &Config) -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = AudioPlayback::new(config.voice.player_command.as_deref())?;
    let wav = sine_wav(440.0, 2.0, SAMPLE_RATE)?;

    println!("Playing {} bytes of WAV at {SAMPLE_RATE} Hz...", wav.len());
    playback.play(wav).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, set voice.player_command in the config file");

    Ok(())
}

/// Test TTS output
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let tts = match config.voice.tts_provider.as_str() {
        "elevenlabs" => TextToSpeech::new_elevenlabs(
            config.api_keys.elevenlabs.clone().unwrap_or_default(),
            config.voice.tts_voice.clone(),
            config.voice.tts_model.clone(),
        )?,
        _ => TextToSpeech::new_openai(
            config.api_keys.openai.clone().unwrap_or_default(),
            config.voice.tts_voice.clone(),
            config.voice.tts_speed,
            config.voice.tts_model.clone(),
        )?,
    };

    println!("Synthesizing speech...");
    let mp3_data = tts.synthesize_mp3(text).await?;
    println!("Got {} bytes of audio data", mp3_data.len());

    println!("Playing audio...");
    let playback = AudioPlayback::new(config.voice.player_command.as_deref())?;
    playback.play(mp3_data).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}
