//! Turn Coordinator
//!
//! One task owns all conversation state and drains a single inbox fed by
//! UI intents, capture events, session events, completions of spawned work,
//! and timers. Suspending work (connect, turn request, synthesis, playback)
//! runs in spawned tasks that report back through the inbox, tagged with the
//! activity generation they were started in so that completions made stale
//! by an interrupt or hard stop are dropped.

mod events;
mod state;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

pub use events::{Connectivity, Snapshot, UiNotification, UserIntent};
pub use state::{Transcript, TurnState};

use crate::config::AssistantConfig;
use crate::context::{self, ContextSet};
use crate::realtime::{SessionConnector, SessionEvent, SpeechSession};
use crate::voice::{AudioSink, AudioSource, CaptureEvent, PlaybackOutcome, SpeechSynthesizer};
use crate::workspace::Workspace;
use crate::{Error, Result};

/// Collaborators the coordinator drives
#[derive(Clone)]
pub struct CoordinatorDeps {
    pub capture: Arc<dyn AudioSource>,
    pub playback: Arc<dyn AudioSink>,
    pub connector: Arc<dyn SessionConnector>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub workspace: Arc<dyn Workspace>,
}

/// Cheap handle for feeding intents to a running coordinator
#[derive(Clone)]
pub struct CoordinatorHandle {
    inbox: mpsc::UnboundedSender<Input>,
    snapshot: watch::Receiver<Snapshot>,
}

impl CoordinatorHandle {
    /// Forward a user intent; returns false if the coordinator has stopped
    pub fn dispatch(&self, intent: UserIntent) -> bool {
        self.inbox.send(Input::Intent(intent)).is_ok()
    }

    /// Current state
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    /// Watch state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.clone()
    }
}

/// Start the coordinator task
///
/// The task runs until every [`CoordinatorHandle`] is dropped and no spawned
/// work is outstanding, then tears down any session and capture.
#[must_use]
pub fn spawn(
    deps: CoordinatorDeps,
    config: AssistantConfig,
) -> (CoordinatorHandle, mpsc::UnboundedReceiver<UiNotification>) {
    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
    let (notify_tx, notify_rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::default());

    let coordinator = Coordinator {
        deps,
        config,
        inbox: inbox_tx.downgrade(),
        notify: notify_tx,
        snapshot: snapshot_tx,
        state: TurnState::Idle,
        session: None,
        recording: None,
        context: ContextSet::new(),
        activity: 0,
        next_id: 0,
        context_version: 0,
        retry_pending: false,
    };
    tokio::spawn(coordinator.run(inbox_rx));

    let handle = CoordinatorHandle {
        inbox: inbox_tx,
        snapshot: snapshot_rx,
    };
    (handle, notify_rx)
}

enum Input {
    Intent(UserIntent),
    Connected {
        session: u64,
        result: Result<Arc<dyn SpeechSession>>,
    },
    Session {
        session: u64,
        event: SessionEvent,
    },
    Capture {
        stream: u64,
        event: CaptureEvent,
    },
    TurnResolved {
        activity: u64,
        result: Result<String>,
    },
    Synthesized {
        activity: u64,
        audio: Option<Vec<u8>>,
    },
    PlaybackFinished {
        activity: u64,
        result: Result<PlaybackOutcome>,
    },
    ContextBuilt {
        version: u64,
        blob: String,
    },
    SearchResults {
        query: String,
        result: Result<Vec<String>>,
    },
    RetrySend {
        activity: u64,
    },
    ResumeListening {
        activity: u64,
    },
}

struct LiveSession {
    id: u64,
    connectivity: Connectivity,
    handle: Option<Arc<dyn SpeechSession>>,
    transcript: Transcript,
    /// Start capture as soon as the connection is up
    listen_on_connect: bool,
    /// Context version baked into the session's initial instructions
    context_version: u64,
    forwarder: JoinHandle<()>,
}

impl LiveSession {
    fn connected(&self) -> Option<&Arc<dyn SpeechSession>> {
        self.handle
            .as_ref()
            .filter(|h| self.connectivity == Connectivity::Connected && h.is_connected())
    }
}

struct Recording {
    id: u64,
    forwarder: JoinHandle<()>,
}

struct Coordinator {
    deps: CoordinatorDeps,
    config: AssistantConfig,
    inbox: mpsc::WeakUnboundedSender<Input>,
    notify: mpsc::UnboundedSender<UiNotification>,
    snapshot: watch::Sender<Snapshot>,
    state: TurnState,
    session: Option<LiveSession>,
    recording: Option<Recording>,
    context: ContextSet,
    /// Bumped by interrupt, hard stop, and disconnect
    activity: u64,
    next_id: u64,
    context_version: u64,
    retry_pending: bool,
}

impl Coordinator {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Input>) {
        tracing::debug!("turn coordinator started");

        while let Some(input) = inbox.recv().await {
            self.handle(input);
            self.publish();
        }

        self.close_recording();
        self.deps.playback.stop();
        self.teardown_session();
        tracing::debug!("turn coordinator stopped");
    }

    fn handle(&mut self, input: Input) {
        match input {
            Input::Intent(intent) => self.handle_intent(intent),
            Input::Connected { session, result } => self.on_connected(session, result),
            Input::Session { session, event } => self.on_session_event(session, event),
            Input::Capture { stream, event } => self.on_capture_event(stream, event),
            Input::TurnResolved { activity, result } => self.on_turn_resolved(activity, result),
            Input::Synthesized { activity, audio } => self.on_synthesized(activity, audio),
            Input::PlaybackFinished { activity, result } => {
                self.on_playback_finished(activity, result);
            }
            Input::ContextBuilt { version, blob } => self.on_context_built(version, &blob),
            Input::SearchResults { query, result } => match result {
                Ok(files) => self.emit(UiNotification::FileSearchResults { query, files }),
                Err(e) => self.emit(UiNotification::error(e)),
            },
            Input::RetrySend { activity } => {
                self.retry_pending = false;
                if activity == self.activity {
                    self.request_send();
                }
            }
            Input::ResumeListening { activity } => {
                if activity == self.activity && self.state == TurnState::Interrupted {
                    self.start_dictation();
                }
            }
        }
    }

    fn handle_intent(&mut self, intent: UserIntent) {
        tracing::debug!(intent = ?intent, state = %self.state, "user intent");

        match intent {
            UserIntent::StartDictation => self.start_dictation(),
            UserIntent::StopDictation => self.stop_dictation(),
            UserIntent::SendToModel => self.request_send(),
            UserIntent::AddContextFile { path } => {
                if self.context.add(path) {
                    self.context_changed();
                }
            }
            UserIntent::RemoveContextFile { path } => {
                if self.context.remove(&path) {
                    self.context_changed();
                }
            }
            UserIntent::SearchFiles { query } => self.search_files(query),
            UserIntent::Interrupt => self.interrupt(),
            UserIntent::HardStop => self.hard_stop(),
        }
    }

    // Dictation

    fn start_dictation(&mut self) {
        if !self.state.can_start_dictation() {
            tracing::debug!(state = %self.state, "start dictation ignored");
            return;
        }

        match self.session.as_mut() {
            None => self.open_session(),
            Some(session) if session.connected().is_none() => session.listen_on_connect = true,
            Some(_) => self.enter_listening(),
        }
    }

    fn stop_dictation(&mut self) {
        if self.state == TurnState::Listening {
            self.close_recording();
            self.set_state(TurnState::Paused);
        } else if let Some(session) = &mut self.session {
            session.listen_on_connect = false;
        }
    }

    fn enter_listening(&mut self) {
        if self.recording.is_none() {
            if let Err(e) = self.open_recording() {
                tracing::warn!(error = %e, "failed to start capture");
                self.emit(UiNotification::error(e));
                self.set_state(TurnState::Paused);
                return;
            }
        }
        self.set_state(TurnState::Listening);
    }

    fn open_recording(&mut self) -> Result<()> {
        let id = self.next_id();
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.deps.capture.start(tx)?;

        let forwarder = match self.inbox.upgrade() {
            Some(inbox) => tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    if inbox.send(Input::Capture { stream: id, event }).is_err() {
                        break;
                    }
                }
            }),
            None => tokio::spawn(async {}),
        };

        self.recording = Some(Recording { id, forwarder });
        self.emit(UiNotification::RecordingStarted);
        Ok(())
    }

    fn close_recording(&mut self) {
        if let Some(recording) = self.recording.take() {
            self.deps.capture.stop();
            recording.forwarder.abort();
            self.emit(UiNotification::RecordingStopped);
        }
    }

    fn on_capture_event(&mut self, stream: u64, event: CaptureEvent) {
        if self.recording.as_ref().is_none_or(|r| r.id != stream) {
            return;
        }

        let message = match event {
            CaptureEvent::Chunk(pcm) => {
                if let Some(handle) = self.session.as_ref().and_then(LiveSession::connected) {
                    if let Err(e) = handle.send_audio(&pcm) {
                        tracing::debug!(error = %e, "dropped audio chunk");
                    }
                }
                return;
            }
            CaptureEvent::Failed(reason) => format!("microphone capture failed: {reason}"),
            CaptureEvent::Ended => "microphone capture ended unexpectedly".to_string(),
        };
        tracing::warn!(message = %message, "recording stream closed");

        self.close_recording();
        self.emit(UiNotification::Error { message });
        if self.state == TurnState::Listening {
            self.set_state(TurnState::Paused);
        }
    }

    // Session lifecycle

    fn open_session(&mut self) {
        let id = self.next_id();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        let forwarder = match self.inbox.upgrade() {
            Some(inbox) => tokio::spawn(async move {
                while let Some(event) = events_rx.recv().await {
                    if inbox.send(Input::Session { session: id, event }).is_err() {
                        break;
                    }
                }
            }),
            None => return,
        };

        self.session = Some(LiveSession {
            id,
            connectivity: Connectivity::Connecting,
            handle: None,
            transcript: Transcript::default(),
            listen_on_connect: true,
            context_version: self.context_version,
            forwarder,
        });
        tracing::info!(session = id, "opening session");

        let connector = Arc::clone(&self.deps.connector);
        let workspace = Arc::clone(&self.deps.workspace);
        let files = self.context.files().to_vec();
        let max_chars = self.config.max_context_chars;
        let base = self.config.instructions.clone();

        self.spawn_task(async move {
            let blob = context::gather(workspace.as_ref(), &files, max_chars).await;
            let result = connector
                .connect(compose_instructions(&base, &blob), events_tx)
                .await;
            Input::Connected {
                session: id,
                result,
            }
        });
    }

    fn on_connected(&mut self, id: u64, result: Result<Arc<dyn SpeechSession>>) {
        let Some(session) = self.session.as_mut().filter(|s| s.id == id) else {
            if let Ok(stale) = result {
                tracing::debug!(session = id, "discarding stale session");
                stale.disconnect();
            }
            return;
        };

        match result {
            Ok(handle) => {
                session.handle = Some(handle);
                session.connectivity = Connectivity::Connected;
                let context_moved = session.context_version != self.context_version;
                let listen = session.listen_on_connect;
                tracing::info!(session = id, "session connected");
                if context_moved {
                    tracing::debug!(session = id, "context changed while connecting");
                    self.push_context();
                }
                if listen && self.state.can_start_dictation() {
                    self.enter_listening();
                }
            }
            Err(e) => {
                tracing::warn!(session = id, error = %e, "session failed to open");
                self.teardown_session();
                self.emit(UiNotification::error(e));
                self.set_state(TurnState::Idle);
            }
        }
    }

    fn on_session_event(&mut self, id: u64, event: SessionEvent) {
        if self.session.as_ref().is_none_or(|s| s.id != id) {
            return;
        }

        match event {
            SessionEvent::Connected => tracing::debug!(session = id, "session ready"),
            SessionEvent::Transcription { text, is_final } => {
                if !self.state.accepts_transcription() {
                    tracing::debug!(state = %self.state, "late transcription ignored");
                    return;
                }
                let current = self.session.as_mut().map(|s| {
                    s.transcript.apply(&text, is_final);
                    s.transcript.current()
                });
                if let Some(text) = current {
                    self.emit(UiNotification::TranscriptionUpdate { text });
                }
            }
            SessionEvent::Error(message) => self.emit(UiNotification::Error { message }),
            SessionEvent::Disconnected => {
                tracing::warn!(session = id, state = %self.state, "session dropped");
                self.activity += 1;
                self.retry_pending = false;
                self.close_recording();
                self.deps.playback.stop();
                self.teardown_session();
                self.emit(UiNotification::error("connection to the speech service was lost"));
                self.set_state(TurnState::Idle);
            }
        }
    }

    fn teardown_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.forwarder.abort();
            if let Some(handle) = session.handle {
                handle.disconnect();
            }
            tracing::info!(session = session.id, "session closed");
        }
    }

    // Turns

    fn request_send(&mut self) {
        if !self.state.can_send() {
            tracing::debug!(state = %self.state, "send ignored");
            return;
        }
        if self.retry_pending {
            tracing::debug!("send already scheduled");
            return;
        }

        let Some(session) = &self.session else {
            self.emit(UiNotification::error(Error::NotConnected));
            return;
        };

        if session.transcript.is_blank() {
            self.emit(UiNotification::error("nothing to send yet"));
            return;
        }

        if let Some(updated) = session.transcript.updated_at() {
            let elapsed = updated.elapsed();
            if elapsed < self.config.quiescence {
                let wait = self.config.quiescence - elapsed;
                tracing::debug!(wait = ?wait, "transcription still settling, deferring send");
                self.retry_pending = true;
                self.schedule(
                    wait,
                    Input::RetrySend {
                        activity: self.activity,
                    },
                );
                return;
            }
        }

        self.begin_turn();
    }

    fn begin_turn(&mut self) {
        let Some((handle, text)) = self.session.as_mut().and_then(|s| {
            let handle = Arc::clone(s.connected()?);
            let text = s.transcript.current().trim().to_string();
            s.transcript.clear();
            Some((handle, text))
        }) else {
            self.close_recording();
            self.teardown_session();
            self.emit(UiNotification::error(Error::NotConnected));
            self.set_state(TurnState::Idle);
            return;
        };

        self.close_recording();
        self.set_state(TurnState::Sending);
        self.emit(UiNotification::Thinking);
        tracing::info!(chars = text.len(), "turn started");

        let activity = self.activity;
        self.spawn_task(async move {
            let result = handle.request_turn_completion(&text).await;
            Input::TurnResolved { activity, result }
        });
    }

    fn on_turn_resolved(&mut self, activity: u64, result: Result<String>) {
        if activity != self.activity || self.state != TurnState::Sending {
            tracing::debug!("stale turn result discarded");
            return;
        }

        let text = match result {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "turn failed");
                self.emit(UiNotification::error(e));
                self.set_state(TurnState::Idle);
                return;
            }
        };

        tracing::info!(chars = text.len(), "turn completed");
        self.emit(UiNotification::ModelResponse { text: text.clone() });

        if text.trim().is_empty() || !self.deps.synthesizer.is_configured() {
            self.finish_turn();
            return;
        }

        self.set_state(TurnState::Speaking);
        let synthesizer = Arc::clone(&self.deps.synthesizer);
        self.spawn_task(async move {
            let audio = synthesizer.synthesize(&text).await;
            Input::Synthesized { activity, audio }
        });
    }

    fn on_synthesized(&mut self, activity: u64, audio: Option<Vec<u8>>) {
        if activity != self.activity || self.state != TurnState::Speaking {
            return;
        }

        let Some(audio) = audio.filter(|a| !a.is_empty()) else {
            tracing::info!("no speech audio, skipping playback");
            self.finish_turn();
            return;
        };

        let playback = Arc::clone(&self.deps.playback);
        self.spawn_task(async move {
            let result = playback.play(audio).await;
            Input::PlaybackFinished { activity, result }
        });
    }

    fn on_playback_finished(&mut self, activity: u64, result: Result<PlaybackOutcome>) {
        if activity != self.activity || self.state != TurnState::Speaking {
            return;
        }

        match result {
            Ok(outcome) => tracing::debug!(outcome = ?outcome, "playback finished"),
            Err(e) => {
                tracing::warn!(error = %e, "playback failed");
                self.emit(UiNotification::error(e));
            }
        }
        self.finish_turn();
    }

    fn finish_turn(&mut self) {
        self.emit(UiNotification::AudioComplete);
        self.set_state(TurnState::Idle);
    }

    // Interrupt and hard stop

    fn interrupt(&mut self) {
        tracing::info!(state = %self.state, "interrupt");
        self.activity += 1;
        self.retry_pending = false;

        self.deps.playback.stop();
        self.close_recording();

        if let Some(session) = &mut self.session {
            session.transcript.clear();
            if let Some(handle) = session.connected() {
                if let Err(e) = handle.interrupt() {
                    tracing::debug!(error = %e, "interrupt signal not sent");
                }
            }
        }

        self.set_state(TurnState::Interrupted);
        self.emit(UiNotification::Interrupted);
        self.emit(UiNotification::TranscriptionUpdate {
            text: String::new(),
        });

        self.schedule(
            self.config.resume_delay,
            Input::ResumeListening {
                activity: self.activity,
            },
        );
    }

    fn hard_stop(&mut self) {
        tracing::info!(state = %self.state, "hard stop");
        self.activity += 1;
        self.retry_pending = false;

        self.close_recording();
        self.deps.playback.stop();
        self.teardown_session();

        self.set_state(TurnState::Idle);
        self.emit(UiNotification::HardStopped);
    }

    // Context

    fn context_changed(&mut self) {
        self.emit(UiNotification::ContextFiles {
            files: self.context.files().to_vec(),
        });

        self.context_version += 1;
        if self.session.as_ref().and_then(LiveSession::connected).is_some() {
            self.push_context();
        }
    }

    /// Rebuild the context blob and send it to the connected session
    fn push_context(&self) {
        let version = self.context_version;
        let workspace = Arc::clone(&self.deps.workspace);
        let files = self.context.files().to_vec();
        let max_chars = self.config.max_context_chars;

        self.spawn_task(async move {
            let blob = context::gather(workspace.as_ref(), &files, max_chars).await;
            Input::ContextBuilt { version, blob }
        });
    }

    fn on_context_built(&self, version: u64, blob: &str) {
        if version != self.context_version {
            return;
        }
        let Some(handle) = self.session.as_ref().and_then(LiveSession::connected) else {
            return;
        };

        let instructions = compose_instructions(&self.config.instructions, blob);
        if let Err(e) = handle.send_context_update(&instructions) {
            tracing::warn!(error = %e, "context update not sent");
        }
    }

    fn search_files(&self, query: String) {
        let workspace = Arc::clone(&self.deps.workspace);
        let max = self.config.max_search_results;
        self.spawn_task(async move {
            let result = workspace.find_files(&query, max).await;
            Input::SearchResults { query, result }
        });
    }

    // Plumbing

    fn set_state(&mut self, state: TurnState) {
        if self.state == state {
            return;
        }
        tracing::info!(from = %self.state, to = %state, "turn state");
        self.state = state;
        self.emit(UiNotification::StateChanged { state });
    }

    fn emit(&self, notification: UiNotification) {
        if self.notify.send(notification).is_err() {
            tracing::trace!("no UI listener");
        }
    }

    fn publish(&self) {
        let snapshot = Snapshot {
            state: self.state,
            transcript: self
                .session
                .as_ref()
                .map(|s| s.transcript.current())
                .unwrap_or_default(),
            connectivity: self
                .session
                .as_ref()
                .map_or(Connectivity::Disconnected, |s| s.connectivity),
            recording: self.recording.is_some(),
            context_files: self.context.files().to_vec(),
        };

        self.snapshot.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    const fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn spawn_task<F>(&self, work: F)
    where
        F: Future<Output = Input> + Send + 'static,
    {
        let Some(inbox) = self.inbox.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let input = work.await;
            let _ = inbox.send(input);
        });
    }

    fn schedule(&self, delay: Duration, input: Input) {
        self.spawn_task(async move {
            tokio::time::sleep(delay).await;
            input
        });
    }
}

fn compose_instructions(base: &str, context: &str) -> String {
    if context.is_empty() {
        base.to_string()
    } else {
        format!("{base}\n\n{context}")
    }
}
