//! Shared test utilities: in-memory doubles for every coordinator collaborator

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use voxpilot::config::AssistantConfig;
use voxpilot::coordinator::{self, CoordinatorDeps, CoordinatorHandle, TurnState};
use voxpilot::realtime::{SessionConnector, SessionEvent, SpeechSession, TurnTracker, await_turn};
use voxpilot::voice::{AudioSink, AudioSource, CaptureEvent, PlaybackOutcome, SpeechSynthesizer};
use voxpilot::{Error, FsWorkspace, Result, UiNotification, UserIntent};

/// Default model reply
pub const REPLY: &str = "Recursion is when a function calls itself.";

/// Upper bound for waiting on a notification (virtual time when paused)
const WAIT: Duration = Duration::from_secs(120);

/// Capture double; chunks and exits are injected by the test
#[derive(Default)]
pub struct MockCapture {
    events: Mutex<Option<mpsc::UnboundedSender<CaptureEvent>>>,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub fail_start: AtomicBool,
}

impl MockCapture {
    pub fn is_capturing_now(&self) -> bool {
        self.events.lock().unwrap().is_some()
    }

    pub fn emit(&self, event: CaptureEvent) {
        if let Some(tx) = self.events.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }
}

impl AudioSource for MockCapture {
    fn start(&self, events: mpsc::UnboundedSender<CaptureEvent>) -> Result<()> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(Error::Audio("no recorder".to_string()));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.events.lock().unwrap() = Some(events);
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.events.lock().unwrap().take();
    }

    fn is_capturing(&self) -> bool {
        self.events.lock().unwrap().is_some()
    }
}

/// Playback double; plays until stopped or finished by the test
#[derive(Default)]
pub struct MockPlayback {
    current: Mutex<Option<oneshot::Sender<PlaybackOutcome>>>,
    pub plays: AtomicUsize,
    pub stops: AtomicUsize,
}

impl MockPlayback {
    pub fn is_playing(&self) -> bool {
        self.current.lock().unwrap().is_some()
    }

    /// Let the current playback run to the end
    pub fn finish(&self) {
        if let Some(tx) = self.current.lock().unwrap().take() {
            let _ = tx.send(PlaybackOutcome::Completed);
        }
    }
}

#[async_trait]
impl AudioSink for MockPlayback {
    async fn play(&self, _audio: Vec<u8>) -> Result<PlaybackOutcome> {
        let (tx, rx) = oneshot::channel();
        *self.current.lock().unwrap() = Some(tx);
        self.plays.fetch_add(1, Ordering::SeqCst);
        Ok(rx.await.unwrap_or(PlaybackOutcome::Stopped))
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if let Some(tx) = self.current.lock().unwrap().take() {
            let _ = tx.send(PlaybackOutcome::Stopped);
        }
    }
}

/// Session double backed by the real turn tracker
pub struct MockSession {
    turn: TurnTracker,
    reply: Option<String>,
    timeout: Duration,
    connected: AtomicBool,
    /// Id of the response the latest turn requested
    response_id: Mutex<String>,
    pub requests: Mutex<Vec<String>>,
    pub context_updates: Mutex<Vec<String>>,
    pub interrupts: AtomicUsize,
    pub audio_chunks: AtomicUsize,
}

impl MockSession {
    pub fn is_connected_now(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn context_updates(&self) -> Vec<String> {
        self.context_updates.lock().unwrap().clone()
    }

    /// Deliver a complete response to the latest requested turn
    pub fn respond(&self, text: &str) {
        let id = self.response_id.lock().unwrap().clone();
        self.turn.push_delta(&id, text);
        self.turn.complete(&id);
    }
}

#[async_trait]
impl SpeechSession for MockSession {
    fn send_audio(&self, _pcm: &[u8]) -> Result<()> {
        self.audio_chunks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn interrupt(&self) -> Result<()> {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        self.turn.cancel();
        Ok(())
    }

    fn send_context_update(&self, instructions: &str) -> Result<()> {
        self.context_updates
            .lock()
            .unwrap()
            .push(instructions.to_string());
        Ok(())
    }

    async fn request_turn_completion(&self, text: &str) -> Result<String> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let rx = self.turn.begin()?;
        let id = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(text.to_string());
            format!("resp_{}", requests.len())
        };
        self.turn.requested();
        self.turn.created(&id);
        *self.response_id.lock().unwrap() = id;
        if let Some(reply) = &self.reply {
            self.respond(reply);
        }
        await_turn(&self.turn, rx, self.timeout).await
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.turn.cancel();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Connector double; keeps every session it opened
pub struct MockConnector {
    pub reply: Mutex<Option<String>>,
    pub fail: AtomicBool,
    pub instructions: Mutex<Vec<String>>,
    /// Connect waits for [`MockConnector::release`] while set
    pub hold: AtomicBool,
    gate: tokio::sync::Notify,
    sessions: Mutex<Vec<Arc<MockSession>>>,
    events: Mutex<Option<mpsc::UnboundedSender<SessionEvent>>>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self {
            reply: Mutex::new(Some(REPLY.to_string())),
            fail: AtomicBool::new(false),
            instructions: Mutex::new(Vec::new()),
            hold: AtomicBool::new(false),
            gate: tokio::sync::Notify::new(),
            sessions: Mutex::new(Vec::new()),
            events: Mutex::new(None),
        }
    }
}

impl MockConnector {
    pub fn session(&self) -> Arc<MockSession> {
        Arc::clone(self.sessions.lock().unwrap().last().expect("no session opened"))
    }

    /// Let a held connect finish
    pub fn release(&self) {
        self.gate.notify_one();
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn emit(&self, event: SessionEvent) {
        if let Some(tx) = self.events.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }

    pub fn transcribe(&self, text: &str, is_final: bool) {
        self.emit(SessionEvent::Transcription {
            text: text.to_string(),
            is_final,
        });
    }
}

#[async_trait]
impl SessionConnector for MockConnector {
    async fn connect(
        &self,
        instructions: String,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Arc<dyn SpeechSession>> {
        if self.hold.load(Ordering::SeqCst) {
            self.gate.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Session("connection refused".to_string()));
        }

        self.instructions.lock().unwrap().push(instructions);
        let session = Arc::new(MockSession {
            turn: TurnTracker::new(),
            reply: self.reply.lock().unwrap().clone(),
            timeout: Duration::from_secs(30),
            connected: AtomicBool::new(true),
            response_id: Mutex::new(String::new()),
            requests: Mutex::new(Vec::new()),
            context_updates: Mutex::new(Vec::new()),
            interrupts: AtomicUsize::new(0),
            audio_chunks: AtomicUsize::new(0),
        });
        self.sessions.lock().unwrap().push(Arc::clone(&session));

        let _ = events.send(SessionEvent::Connected);
        *self.events.lock().unwrap() = Some(events);
        Ok(session as Arc<dyn SpeechSession>)
    }
}

/// Synthesizer double
pub struct MockSynth {
    pub configured: bool,
    pub audio: Option<Vec<u8>>,
    pub calls: AtomicUsize,
}

impl MockSynth {
    pub fn disabled() -> Self {
        Self {
            configured: false,
            audio: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn speaking() -> Self {
        Self {
            configured: true,
            audio: Some(b"ID3 fake mp3".to_vec()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            configured: true,
            audio: None,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSynth {
    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn synthesize(&self, _text: &str) -> Option<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.audio.clone()
    }
}

/// A running coordinator wired to doubles over a temp workspace
pub struct Harness {
    pub handle: CoordinatorHandle,
    pub notifications: mpsc::UnboundedReceiver<UiNotification>,
    pub seen: Vec<UiNotification>,
    pub capture: Arc<MockCapture>,
    pub playback: Arc<MockPlayback>,
    pub connector: Arc<MockConnector>,
    pub synth: Arc<MockSynth>,
    pub workspace: Arc<FsWorkspace>,
    pub dir: tempfile::TempDir,
}

impl Harness {
    pub fn start(synth: MockSynth) -> Self {
        Self::start_with(synth, MockConnector::default())
    }

    pub fn start_with(synth: MockSynth, connector: MockConnector) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "pub fn fib(n: u64) -> u64 { n }\n").unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {}\n").unwrap();

        let capture = Arc::new(MockCapture::default());
        let playback = Arc::new(MockPlayback::default());
        let connector = Arc::new(connector);
        let synth = Arc::new(synth);
        let workspace = Arc::new(FsWorkspace::new(dir.path().to_path_buf()));

        let deps = CoordinatorDeps {
            capture: Arc::clone(&capture) as _,
            playback: Arc::clone(&playback) as _,
            connector: Arc::clone(&connector) as _,
            synthesizer: Arc::clone(&synth) as _,
            workspace: Arc::clone(&workspace) as _,
        };
        let (handle, notifications) = coordinator::spawn(deps, AssistantConfig::default());

        Self {
            handle,
            notifications,
            seen: Vec::new(),
            capture,
            playback,
            connector,
            synth,
            workspace,
            dir,
        }
    }

    pub fn dispatch(&self, intent: UserIntent) {
        assert!(self.handle.dispatch(intent), "coordinator stopped");
    }

    /// Wait for the next notification matching `pred`
    pub async fn expect(&mut self, pred: impl Fn(&UiNotification) -> bool) -> UiNotification {
        loop {
            let next = tokio::time::timeout(WAIT, self.notifications.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out; seen so far: {:#?}", self.seen))
                .expect("notification stream closed");
            self.seen.push(next.clone());
            if pred(&next) {
                return next;
            }
        }
    }

    pub async fn expect_state(&mut self, state: TurnState) {
        self.expect(|n| matches!(n, UiNotification::StateChanged { state: s } if *s == state))
            .await;
    }

    pub async fn expect_error(&mut self) -> String {
        match self.expect(|n| matches!(n, UiNotification::Error { .. })).await {
            UiNotification::Error { message } => message,
            _ => unreachable!(),
        }
    }

    /// Start dictation and wait until listening
    pub async fn listen(&mut self) {
        self.dispatch(UserIntent::StartDictation);
        self.expect_state(TurnState::Listening).await;
    }

    /// Transcribe a finalized utterance and wait for it to be shown
    pub async fn say(&mut self, text: &str) {
        self.connector.transcribe(text, true);
        let text = text.to_string();
        self.expect(move |n| matches!(n, UiNotification::TranscriptionUpdate { text: t } if t.ends_with(&text)))
            .await;
    }

    /// Let spawned work run for a while of (virtual) time
    pub async fn settle(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    pub fn saw(&self, pred: impl Fn(&UiNotification) -> bool) -> bool {
        self.seen.iter().any(pred)
    }
}
